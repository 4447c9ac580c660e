//! Classification of key-value store commands by name.
//!
//! The only distinction that affects dispatch is [`Category`]: a small,
//! fixed set of commands is [`Immediate`](Category::Immediate), and
//! everything else is [`Deferred`](Category::Deferred). Reads and ordinary
//! writes are both deferred; buffering them together preserves their
//! relative order inside the batch, so a read issued after a write still
//! observes that write.

use std::collections::HashSet;

use once_cell::sync::Lazy;

/// How the proxy treats a command.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Category {
    /// Flush anything buffered, then run the command right away and return
    /// its reply. Used for commands whose effect must be externally visible
    /// at once, and for blocking, administrative or connection-level
    /// commands.
    Immediate,

    /// Buffer the command and hand out a promise for its reply.
    Deferred,
}

/// Whether a command reads or writes data. Advisory only: the proxy never
/// consults this when deciding whether to buffer a command.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Access {
    Read,
    Write,
}

static IMMEDIATE: Lazy<HashSet<&'static str>> = Lazy::new(|| {
    [
        "auth",
        "bgrewriteaof",
        "bgsave",
        "blpop",
        "brpop",
        "brpoplpush",
        "config",
        "debug",
        "flushall",
        "flushdb",
        "monitor",
        "persist",
        "expire",
        "setex",
        "psubscribe",
        "publish",
        "punsubscribe",
        "quit",
        "save",
        "shutdown",
        "slaveof",
        "unwatch",
        "watch",
    ]
    .iter()
    .copied()
    .collect()
});

static READS: Lazy<HashSet<&'static str>> = Lazy::new(|| {
    [
        "ttl",
        "sort",
        "randomkey",
        "keys",
        "srandmember",
        "type",
        "get",
        "mget",
        "exists",
        "hexists",
        "hget",
        "hmget",
        "hkeys",
        "hgetall",
        "hvals",
        "hlen",
        "lindex",
        "llen",
        "lrange",
        "zscore",
        "zcard",
        "zcount",
        "zrange",
        "zrank",
        "zrangebyscore",
        "zrevrange",
        "zrevrangebyscore",
        "zrevrank",
        "smembers",
        "sismember",
        "sdiff",
        "sunion",
        "sinter",
        "scard",
        "dbsize",
        "debug",
    ]
    .iter()
    .copied()
    .collect()
});

static WRITES: Lazy<HashSet<&'static str>> = Lazy::new(|| {
    [
        "incr",
        "decr",
        "incrby",
        "decrby",
        "hincrby",
        "zincrby",
        "del",
        "expireat",
        "getset",
        "hdel",
        "hmset",
        "hset",
        "hsetnx",
        "info",
        "lastsave",
        "lpop",
        "lpush",
        "lrem",
        "lset",
        "ltrim",
        "move",
        "mset",
        "msetnx",
        "rename",
        "renamenx",
        "rpop",
        "rpoplpush",
        "rpush",
        "sadd",
        "sdiffstore",
        "select",
        "set",
        "setnx",
        "sinterstore",
        "smove",
        "spop",
        "srem",
        "subscribe",
        "sunionstore",
        "zadd",
        "zinterstore",
        "zrem",
        "zremrangebyrank",
        "zremrangebyscore",
        "zunionstore",
    ]
    .iter()
    .copied()
    .collect()
});

fn lookup(table: &HashSet<&'static str>, command: &str) -> bool {
    if command.bytes().any(|b| b.is_ascii_uppercase()) {
        table.contains(command.to_ascii_lowercase().as_str())
    } else {
        table.contains(command)
    }
}

/// Classify a command by name. Matching ignores ASCII case.
///
/// ```
/// use kvbatch::{classify, Category};
///
/// assert_eq!(classify("get"), Category::Deferred);
/// assert_eq!(classify("SET"), Category::Deferred);
/// assert_eq!(classify("expire"), Category::Immediate);
/// ```
pub fn classify(command: &str) -> Category {
    if lookup(&IMMEDIATE, command) {
        Category::Immediate
    } else {
        Category::Deferred
    }
}

/// Advisory read/write classification of a command, if it is a known one.
/// A few commands (`debug`) are listed as reads while also being immediate.
pub fn access(command: &str) -> Option<Access> {
    if lookup(&READS, command) {
        Some(Access::Read)
    } else if lookup(&WRITES, command) {
        Some(Access::Write)
    } else {
        None
    }
}
