//! Connection counters.
//!
//! The server runs on one thread, so these are plain integers updated from
//! the event loop callbacks.

/// Statistics for connection handling
#[derive(Debug, Default, Clone, Copy, PartialEq, Eq)]
pub struct ConnectionStats {
    /// Total number of connections accepted
    pub connections_accepted: u64,
    /// Currently active connections
    pub active_connections: u64,
    /// Total commands processed
    pub commands_processed: u64,
    /// Total bytes read
    pub bytes_read: u64,
    /// Total bytes written
    pub bytes_written: u64,
}

impl ConnectionStats {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn connection_opened(&mut self) {
        self.connections_accepted += 1;
        self.active_connections += 1;
    }

    pub fn connection_closed(&mut self) {
        self.active_connections = self.active_connections.saturating_sub(1);
    }

    pub fn command_processed(&mut self) {
        self.commands_processed += 1;
    }

    pub fn bytes_read(&mut self, count: usize) {
        self.bytes_read += count as u64;
    }

    pub fn bytes_written(&mut self, count: usize) {
        self.bytes_written += count as u64;
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_open_close() {
        let mut stats = ConnectionStats::new();
        stats.connection_opened();
        stats.connection_opened();
        stats.connection_closed();

        assert_eq!(stats.connections_accepted, 2);
        assert_eq!(stats.active_connections, 1);

        stats.connection_closed();
        stats.connection_closed();
        assert_eq!(stats.active_connections, 0);
    }

    #[test]
    fn test_traffic() {
        let mut stats = ConnectionStats::new();
        stats.bytes_read(14);
        stats.bytes_written(7);
        stats.command_processed();

        assert_eq!(stats.bytes_read, 14);
        assert_eq!(stats.bytes_written, 7);
        assert_eq!(stats.commands_processed, 1);
    }
}
