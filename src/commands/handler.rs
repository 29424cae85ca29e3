//! Command Table and Handlers
//!
//! A request is an argument vector whose first element names the command.
//! Names are matched case-insensitively against a static table that also
//! records each command's arity:
//!
//! - positive arity: exactly that many arguments, name included
//! - negative arity: at least `|arity|` arguments
//!
//! ## Supported Commands
//!
//! ### Key Commands
//! - `SET key value [EX seconds | PX milliseconds]` - Set a key
//! - `GET key` - Get a key's value
//! - `DEL key [key ...]` - Delete keys
//! - `EXISTS key [key ...]` - Count existing keys
//! - `EXPIRE key seconds` - Set expiry
//! - `TTL key` - Get remaining TTL
//! - `PERSIST key` - Remove expiry
//!
//! ### Server Commands
//! - `PING [message]` - Test connection
//! - `ECHO message` - Echo message
//! - `DBSIZE` - Number of keys
//! - `FLUSHDB` - Clear database
//! - `COMMAND` - Handshake used by redis-cli
//! - `QUIT` - Close the connection after the reply

use crate::protocol::Reply;
use crate::storage::{Db, DbError, Ttl, Value};
use std::fmt;
use std::time::Duration;
use tracing::debug;

/// Signature shared by every command handler. `args[0]` is the command name.
pub type CommandProc = fn(&mut Db, &[Value]) -> Reply;

/// One row of the command table.
#[derive(Clone, Copy)]
pub struct Command {
    pub name: &'static str,
    pub arity: i32,
    pub proc: CommandProc,
    /// Close the connection once the reply has been written
    pub closes_connection: bool,
}

impl Command {
    const fn new(name: &'static str, arity: i32, proc: CommandProc) -> Self {
        Self {
            name,
            arity,
            proc,
            closes_connection: false,
        }
    }

    /// Whether `argc` arguments (name included) satisfy the arity.
    pub fn accepts(&self, argc: usize) -> bool {
        if self.arity >= 0 {
            argc == self.arity as usize
        } else {
            argc >= self.arity.unsigned_abs() as usize
        }
    }
}

impl fmt::Debug for Command {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Command")
            .field("name", &self.name)
            .field("arity", &self.arity)
            .field("closes_connection", &self.closes_connection)
            .finish()
    }
}

/// Every supported command.
pub static COMMANDS: &[Command] = &[
    Command::new("command", -1, cmd_command),
    Command::new("ping", -1, cmd_ping),
    Command::new("echo", 2, cmd_echo),
    Command::new("set", -3, cmd_set),
    Command::new("get", 2, cmd_get),
    Command::new("del", -2, cmd_del),
    Command::new("exists", -2, cmd_exists),
    Command::new("expire", 3, cmd_expire),
    Command::new("ttl", 2, cmd_ttl),
    Command::new("persist", 2, cmd_persist),
    Command::new("dbsize", 1, cmd_dbsize),
    Command::new("flushdb", 1, cmd_flushdb),
    Command {
        name: "quit",
        arity: 1,
        proc: cmd_quit,
        closes_connection: true,
    },
];

/// Finds a command by name, ignoring ASCII case.
pub fn lookup(name: &[u8]) -> Option<&'static Command> {
    find_in(COMMANDS, name)
}

fn find_in(table: &'static [Command], name: &[u8]) -> Option<&'static Command> {
    table
        .iter()
        .find(|cmd| cmd.name.as_bytes().eq_ignore_ascii_case(name))
}

/// Result of executing one request.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Outcome {
    pub reply: Reply,
    /// The connection should close after this reply is written
    pub close: bool,
}

impl Outcome {
    fn reply(reply: Reply) -> Self {
        Self { reply, close: false }
    }
}

/// Dispatches argument vectors to the command table.
#[derive(Debug, Clone, Copy)]
pub struct CommandHandler {
    table: &'static [Command],
}

impl Default for CommandHandler {
    fn default() -> Self {
        Self { table: COMMANDS }
    }
}

impl CommandHandler {
    pub fn new() -> Self {
        Self::default()
    }

    /// Finds a command in this handler's table, ignoring ASCII case.
    pub fn lookup(&self, name: &[u8]) -> Option<&'static Command> {
        find_in(self.table, name)
    }

    /// Executes a request against `db` and returns the reply.
    pub fn execute(&self, db: &mut Db, args: &[Value]) -> Outcome {
        let Some(name) = args.first() else {
            return Outcome::reply(Reply::error("ERR empty command"));
        };

        let Some(cmd) = self.lookup(name.as_bytes()) else {
            return Outcome::reply(Reply::error(format!(
                "ERR unknown command '{}'",
                String::from_utf8_lossy(name.as_bytes())
            )));
        };

        if !cmd.accepts(args.len()) {
            return Outcome::reply(wrong_arity(cmd.name));
        }

        debug!(command = cmd.name, argc = args.len(), "executing command");
        Outcome {
            reply: (cmd.proc)(db, args),
            close: cmd.closes_connection,
        }
    }
}

// ========================================================================
// Helper functions
// ========================================================================

fn wrong_arity(name: &str) -> Reply {
    Reply::error(format!("ERR wrong number of arguments for '{}' command", name))
}

fn not_an_integer() -> Reply {
    Reply::error("ERR value is not an integer or out of range")
}

fn db_error(name: &str, err: DbError) -> Reply {
    match err {
        DbError::DeadlineOverflow => {
            Reply::error(format!("ERR invalid expire time in '{}' command", name))
        }
        DbError::Dict(e) => Reply::error(format!("ERR {}", e)),
    }
}

fn integer_arg(value: &Value) -> Option<i64> {
    std::str::from_utf8(value.as_bytes()).ok()?.parse().ok()
}

// ========================================================================
// Key Commands
// ========================================================================

/// SET key value [EX seconds | PX milliseconds]
fn cmd_set(db: &mut Db, args: &[Value]) -> Reply {
    let key = args[1].clone();
    let value = args[2].clone();

    let mut ttl: Option<Duration> = None;
    let mut i = 3;
    while i < args.len() {
        let opt = args[i].as_bytes();
        let unit_ms = if opt.eq_ignore_ascii_case(b"EX") {
            1000
        } else if opt.eq_ignore_ascii_case(b"PX") {
            1
        } else {
            return Reply::error("ERR syntax error");
        };

        // Only one expiry option is allowed.
        if ttl.is_some() {
            return Reply::error("ERR syntax error");
        }
        i += 1;
        let Some(arg) = args.get(i) else {
            return Reply::error("ERR syntax error");
        };
        let amount = match integer_arg(arg) {
            Some(n) if n > 0 => n,
            Some(_) => return Reply::error("ERR invalid expire time in 'set' command"),
            None => return not_an_integer(),
        };
        let Some(ms) = amount.checked_mul(unit_ms) else {
            return Reply::error("ERR invalid expire time in 'set' command");
        };
        ttl = Some(Duration::from_millis(ms as u64));
        i += 1;
    }

    let result = match ttl {
        Some(duration) => db.set_with_ttl(key, value, duration),
        None => db.set(key, value).map_err(DbError::from),
    };

    match result {
        Ok(()) => Reply::ok(),
        Err(e) => db_error("set", e),
    }
}

/// GET key
fn cmd_get(db: &mut Db, args: &[Value]) -> Reply {
    match db.get(&args[1]) {
        Some(value) => Reply::value(&value),
        None => Reply::null(),
    }
}

/// DEL key [key ...]
fn cmd_del(db: &mut Db, args: &[Value]) -> Reply {
    let deleted = args[1..].iter().filter(|key| db.delete(key)).count();
    Reply::integer(deleted as i64)
}

/// EXISTS key [key ...]
fn cmd_exists(db: &mut Db, args: &[Value]) -> Reply {
    let count = args[1..].iter().filter(|key| db.exists(key)).count();
    Reply::integer(count as i64)
}

/// EXPIRE key seconds
fn cmd_expire(db: &mut Db, args: &[Value]) -> Reply {
    let Some(seconds) = integer_arg(&args[2]) else {
        return not_an_integer();
    };

    if seconds <= 0 {
        // Non-positive TTL deletes the key
        return Reply::integer(db.delete(&args[1]) as i64);
    }

    match db.expire(&args[1], Duration::from_secs(seconds as u64)) {
        Ok(applied) => Reply::integer(applied as i64),
        Err(e) => db_error("expire", e),
    }
}

/// TTL key
fn cmd_ttl(db: &mut Db, args: &[Value]) -> Reply {
    match db.ttl(&args[1]) {
        Ttl::Missing => Reply::integer(-2),
        Ttl::Persistent => Reply::integer(-1),
        Ttl::Remaining(left) => Reply::integer(((left.as_millis() + 500) / 1000) as i64),
    }
}

/// PERSIST key
fn cmd_persist(db: &mut Db, args: &[Value]) -> Reply {
    Reply::integer(db.persist(&args[1]) as i64)
}

// ========================================================================
// Server Commands
// ========================================================================

/// COMMAND
fn cmd_command(_db: &mut Db, _args: &[Value]) -> Reply {
    Reply::ok()
}

/// PING [message]
fn cmd_ping(_db: &mut Db, args: &[Value]) -> Reply {
    match args.len() {
        1 => Reply::status("PONG"),
        2 => Reply::value(&args[1]),
        _ => wrong_arity("ping"),
    }
}

/// ECHO message
fn cmd_echo(_db: &mut Db, args: &[Value]) -> Reply {
    Reply::value(&args[1])
}

/// DBSIZE
fn cmd_dbsize(db: &mut Db, _args: &[Value]) -> Reply {
    Reply::integer(db.len() as i64)
}

/// FLUSHDB
fn cmd_flushdb(db: &mut Db, _args: &[Value]) -> Reply {
    db.flush();
    Reply::ok()
}

/// QUIT
fn cmd_quit(_db: &mut Db, _args: &[Value]) -> Reply {
    Reply::ok()
}

#[cfg(test)]
mod tests {
    use super::*;

    fn make_command(args: &[&str]) -> Vec<Value> {
        args.iter().map(|s| Value::from(*s)).collect()
    }

    fn run(db: &mut Db, args: &[&str]) -> Reply {
        CommandHandler::new().execute(db, &make_command(args)).reply
    }

    #[test]
    fn test_ping() {
        let mut db = Db::new();

        assert_eq!(run(&mut db, &["PING"]), Reply::status("PONG"));
        assert_eq!(run(&mut db, &["ping", "hello"]), Reply::status("hello"));
        assert!(run(&mut db, &["PING", "a", "b"]).is_error());
    }

    #[test]
    fn test_echo_and_command() {
        let mut db = Db::new();

        assert_eq!(run(&mut db, &["ECHO", "hi there"]).serialize(), b"+hi there\r\n");
        assert_eq!(run(&mut db, &["COMMAND"]), Reply::ok());
        assert_eq!(run(&mut db, &["COMMAND", "DOCS"]), Reply::ok());
    }

    #[test]
    fn test_set_get() {
        let mut db = Db::new();

        assert_eq!(run(&mut db, &["SET", "key", "value"]), Reply::ok());
        assert_eq!(run(&mut db, &["GET", "key"]).serialize(), b"+value\r\n");

        assert_eq!(run(&mut db, &["SET", "key", "other"]), Reply::ok());
        assert_eq!(run(&mut db, &["GET", "key"]).serialize(), b"+other\r\n");
    }

    #[test]
    fn test_get_nonexistent() {
        let mut db = Db::new();

        let response = run(&mut db, &["GET", "nonexistent"]);
        assert_eq!(response, Reply::null());
        assert_eq!(response.serialize(), b"+null\r\n");
    }

    #[test]
    fn test_set_with_options() {
        let mut db = Db::new();

        assert_eq!(run(&mut db, &["SET", "a", "1", "EX", "100"]), Reply::ok());
        assert_eq!(run(&mut db, &["TTL", "a"]), Reply::integer(100));

        assert_eq!(run(&mut db, &["set", "b", "1", "px", "50000"]), Reply::ok());
        assert_eq!(run(&mut db, &["TTL", "b"]), Reply::integer(50));

        assert!(run(&mut db, &["SET", "c", "1", "EX"]).is_error());
        assert!(run(&mut db, &["SET", "c", "1", "EX", "0"]).is_error());
        assert!(run(&mut db, &["SET", "c", "1", "EX", "soon"]).is_error());
        assert!(run(&mut db, &["SET", "c", "1", "NX"]).is_error());
        assert!(run(&mut db, &["SET", "c", "1", "EX", "1", "PX", "1"]).is_error());
        assert_eq!(run(&mut db, &["GET", "c"]), Reply::null());
    }

    #[test]
    fn test_del() {
        let mut db = Db::new();
        run(&mut db, &["SET", "k1", "v"]);
        run(&mut db, &["SET", "k2", "v"]);

        assert_eq!(run(&mut db, &["DEL", "k1", "k2", "k3"]), Reply::integer(2));
        assert_eq!(run(&mut db, &["DEL", "k1"]), Reply::integer(0));
    }

    #[test]
    fn test_exists() {
        let mut db = Db::new();
        run(&mut db, &["SET", "k1", "v"]);

        assert_eq!(run(&mut db, &["EXISTS", "k1"]), Reply::integer(1));
        assert_eq!(run(&mut db, &["EXISTS", "k1", "k1", "nope"]), Reply::integer(2));
    }

    #[test]
    fn test_expire_ttl_persist() {
        let mut db = Db::new();

        assert_eq!(run(&mut db, &["TTL", "k"]), Reply::integer(-2));
        assert_eq!(run(&mut db, &["EXPIRE", "k", "10"]), Reply::integer(0));

        run(&mut db, &["SET", "k", "v"]);
        assert_eq!(run(&mut db, &["TTL", "k"]), Reply::integer(-1));
        assert_eq!(run(&mut db, &["EXPIRE", "k", "10"]), Reply::integer(1));
        assert_eq!(run(&mut db, &["TTL", "k"]), Reply::integer(10));

        assert_eq!(run(&mut db, &["PERSIST", "k"]), Reply::integer(1));
        assert_eq!(run(&mut db, &["PERSIST", "k"]), Reply::integer(0));
        assert_eq!(run(&mut db, &["TTL", "k"]), Reply::integer(-1));

        assert!(run(&mut db, &["EXPIRE", "k", "ten"]).is_error());
        assert_eq!(run(&mut db, &["EXPIRE", "k", "0"]), Reply::integer(1));
        assert_eq!(run(&mut db, &["EXISTS", "k"]), Reply::integer(0));
    }

    #[test]
    fn test_out_of_range_expire_time() {
        let mut db = Db::new();

        assert_eq!(
            run(&mut db, &["SET", "k", "v", "PX", "9223372036854775807"]),
            Reply::error("ERR invalid expire time in 'set' command")
        );
        assert_eq!(run(&mut db, &["EXISTS", "k"]), Reply::integer(0));

        run(&mut db, &["SET", "k", "v"]);
        assert_eq!(
            run(&mut db, &["EXPIRE", "k", "9223372036854775807"]),
            Reply::error("ERR invalid expire time in 'expire' command")
        );
        assert_eq!(run(&mut db, &["GET", "k"]), Reply::value(&Value::from("v")));
        assert_eq!(run(&mut db, &["TTL", "k"]), Reply::integer(-1));
    }

    #[test]
    fn test_dbsize() {
        let mut db = Db::new();

        assert_eq!(run(&mut db, &["DBSIZE"]), Reply::integer(0));

        run(&mut db, &["SET", "key1", "value1"]);
        run(&mut db, &["SET", "key2", "value2"]);

        assert_eq!(run(&mut db, &["DBSIZE"]), Reply::integer(2));
    }

    #[test]
    fn test_flushdb() {
        let mut db = Db::new();

        run(&mut db, &["SET", "key1", "value1"]);
        run(&mut db, &["SET", "key2", "value2"]);

        assert_eq!(run(&mut db, &["FLUSHDB"]), Reply::ok());
        assert_eq!(run(&mut db, &["DBSIZE"]), Reply::integer(0));
    }

    #[test]
    fn test_quit_closes() {
        let mut db = Db::new();
        let outcome = CommandHandler::new().execute(&mut db, &make_command(&["QUIT"]));

        assert_eq!(outcome.reply, Reply::ok());
        assert!(outcome.close);
    }

    #[test]
    fn test_wrong_arity() {
        let mut db = Db::new();

        assert_eq!(
            run(&mut db, &["GET"]),
            Reply::error("ERR wrong number of arguments for 'get' command")
        );
        assert!(run(&mut db, &["GET", "a", "b"]).is_error());
        assert!(run(&mut db, &["SET", "a"]).is_error());
        assert!(run(&mut db, &["DEL"]).is_error());
    }

    #[test]
    fn test_unknown_command() {
        let mut db = Db::new();

        assert_eq!(
            run(&mut db, &["UNKNOWN", "x"]),
            Reply::error("ERR unknown command 'UNKNOWN'")
        );
    }

    #[test]
    fn test_lookup_ignores_case() {
        assert_eq!(lookup(b"GeT").map(|c| c.name), Some("get"));
        assert!(lookup(b"nope").is_none());
        assert!(COMMANDS.iter().all(|c| lookup(c.name.as_bytes()).is_some()));

        let handler = CommandHandler::new();
        assert_eq!(handler.lookup(b"QUIT").map(|c| c.closes_connection), Some(true));
        assert!(handler.lookup(b"").is_none());
    }

    #[test]
    fn test_arguments_are_shared_not_copied() {
        let mut db = Db::new();
        let args = make_command(&["SET", "k", "v"]);
        CommandHandler::new().execute(&mut db, &args);

        // The stored value is the argument object itself.
        assert_eq!(args[2].ref_count(), 2);
        drop(db);
        assert_eq!(args[2].ref_count(), 1);
    }
}
