//! An in-memory key-value backend that records every command it receives,
//! the way a store's traffic monitor would.

#![allow(dead_code)]

use std::{collections::HashMap, sync::Arc};

use kvbatch::Backend;
use parking_lot::Mutex;

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Value {
    Nil,
    Status(&'static str),
    Int(i64),
    Bulk(String),
}

impl Value {
    pub fn bulk(value: &str) -> Self {
        Value::Bulk(value.to_string())
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StoreError(pub String);

/// A cloneable view of the traffic seen by a [`MemoryStore`].
#[derive(Debug, Clone, Default)]
pub struct Monitor {
    log: Arc<Mutex<Vec<String>>>,
}

impl Monitor {
    pub fn commands(&self) -> Vec<String> {
        self.log.lock().clone()
    }

    pub fn clear(&self) {
        self.log.lock().clear()
    }

    /// Each direct command and each `exec` is one round trip; `multi` and
    /// queued commands ride along with their `exec`.
    pub fn round_trips(&self) -> usize {
        let log = self.log.lock();
        let mut trips = 0;
        let mut in_transaction = false;
        for line in log.iter() {
            match line.as_str() {
                "multi" => in_transaction = true,
                "exec" | "discard" => {
                    in_transaction = false;
                    trips += 1;
                }
                _ if !in_transaction => trips += 1,
                _ => {}
            }
        }
        trips
    }

    pub fn count(&self, command: &str) -> usize {
        self.log
            .lock()
            .iter()
            .filter(|line| line.as_str() == command)
            .count()
    }

    fn record(&self, line: String) {
        self.log.lock().push(line)
    }
}

#[derive(Debug, Default)]
pub struct MemoryStore {
    data: HashMap<String, String>,
    transaction: Option<Vec<(String, Vec<String>)>>,
    failing: Option<String>,
    panicking: Option<String>,
    monitor: Monitor,
}

impl MemoryStore {
    pub fn new() -> (Self, Monitor) {
        let store = Self::default();
        let monitor = store.monitor.clone();
        (store, monitor)
    }

    pub fn with_data(pairs: &[(&str, &str)]) -> (Self, Monitor) {
        let (mut store, monitor) = Self::new();
        store.data = pairs
            .iter()
            .map(|(key, value)| (key.to_string(), value.to_string()))
            .collect();
        (store, monitor)
    }

    /// Make every later invocation of `command` fail.
    pub fn failing_on(mut self, command: &str) -> Self {
        self.failing = Some(command.to_string());
        self
    }

    /// Make every later invocation of `command` panic.
    pub fn panicking_on(mut self, command: &str) -> Self {
        self.panicking = Some(command.to_string());
        self
    }

    fn check(&self, command: &str) -> Result<(), StoreError> {
        if let Some(ref panicking) = self.panicking {
            if panicking == command {
                panic!("store crashed during {}", command);
            }
        }

        match self.failing {
            Some(ref failing) if failing == command => {
                Err(StoreError(format!("ERR {} is unavailable", command)))
            }
            _ => Ok(()),
        }
    }

    fn apply(&mut self, command: &str, args: &[String]) -> Result<Value, StoreError> {
        let arg = |index: usize| {
            args.get(index)
                .ok_or_else(|| StoreError(format!("ERR wrong number of arguments for {}", command)))
        };

        match command {
            "get" => Ok(self
                .data
                .get(arg(0)?)
                .map_or(Value::Nil, |value| Value::Bulk(value.clone()))),
            "set" => {
                self.data.insert(arg(0)?.clone(), arg(1)?.clone());
                Ok(Value::Status("OK"))
            }
            "incr" => {
                let key = arg(0)?.clone();
                let current: i64 = match self.data.get(&key) {
                    None => 0,
                    Some(value) => value
                        .parse()
                        .map_err(|_| StoreError("ERR value is not an integer".into()))?,
                };
                self.data.insert(key, (current + 1).to_string());
                Ok(Value::Int(current + 1))
            }
            "del" => Ok(Value::Int(self.data.remove(arg(0)?).map_or(0, |_| 1))),
            "exists" => Ok(Value::Int(self.data.contains_key(arg(0)?) as i64)),
            "expire" => Ok(Value::Int(self.data.contains_key(arg(0)?) as i64)),
            "publish" => Ok(Value::Int(0)),
            other => Err(StoreError(format!("ERR unknown command '{}'", other))),
        }
    }
}

fn describe(command: &str, args: &[String]) -> String {
    let mut line = command.to_string();
    for arg in args {
        line.push(' ');
        line.push_str(arg);
    }
    line
}

impl Backend for MemoryStore {
    type Arg = String;
    type Reply = Value;
    type Error = StoreError;

    fn call(&mut self, command: &str, args: &[String]) -> Result<Value, StoreError> {
        self.monitor.record(describe(command, args));
        self.check(command)?;
        self.apply(command, args)
    }

    fn multi(&mut self) -> Result<(), StoreError> {
        self.monitor.record("multi".into());
        self.check("multi")?;
        self.transaction = Some(Vec::new());
        Ok(())
    }

    fn queue(&mut self, command: &str, args: &[String]) -> Result<(), StoreError> {
        self.monitor.record(describe(command, args));
        self.check(command)?;
        match self.transaction {
            Some(ref mut queued) => {
                queued.push((command.to_string(), args.to_vec()));
                Ok(())
            }
            None => Err(StoreError("ERR command queued outside of MULTI".into())),
        }
    }

    fn exec(&mut self) -> Result<Vec<Value>, StoreError> {
        self.monitor.record("exec".into());
        self.check("exec")?;
        let queued = self
            .transaction
            .take()
            .ok_or_else(|| StoreError("ERR EXEC without MULTI".into()))?;

        queued
            .iter()
            .map(|(command, args)| self.apply(command, args))
            .collect()
    }

    fn discard(&mut self) -> Result<(), StoreError> {
        self.monitor.record("discard".into());
        self.transaction = None;
        Ok(())
    }
}

pub fn args(parts: &[&str]) -> Vec<String> {
    parts.iter().map(|part| part.to_string()).collect()
}
