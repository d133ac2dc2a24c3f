//! Shared utilities for integration tests.

#![allow(dead_code)]

use std::collections::HashMap;
use std::net::SocketAddr;
use std::sync::{Arc, Mutex};
use std::time::Duration;

use async_trait::async_trait;
use redis::Value;
use servicekit::kv::{Command, CommandError, CommandStatus, CommandTransport};
use tokio::net::TcpListener;

/// Poll `check` until it yields a value; panics after five seconds.
pub async fn wait_for<T>(mut check: impl FnMut() -> Option<T>) -> T {
    let deadline = tokio::time::Instant::now() + Duration::from_secs(5);
    loop {
        if let Some(value) = check() {
            return value;
        }
        if tokio::time::Instant::now() > deadline {
            panic!("condition not met within 5s");
        }
        tokio::time::sleep(Duration::from_millis(10)).await;
    }
}

/// Hold a wildcard port so a server configured with it fails to bind.
pub async fn occupied_port() -> (TcpListener, u16) {
    let listener = TcpListener::bind(SocketAddr::from(([0, 0, 0, 0], 0)))
        .await
        .unwrap();
    let port = listener.local_addr().unwrap().port();
    (listener, port)
}

/// Shared, ordered event log.
#[derive(Clone, Default)]
pub struct EventLog(Arc<Mutex<Vec<String>>>);

impl EventLog {
    pub fn push(&self, event: impl Into<String>) {
        self.0.lock().unwrap().push(event.into());
    }

    pub fn events(&self) -> Vec<String> {
        self.0.lock().unwrap().clone()
    }
}

/// In-memory command transport with scripted failures.
///
/// `get` on keys starting with `missing` replies nil, other `get`s reply
/// `value`, everything else replies `OK`.
#[derive(Clone, Default)]
pub struct FakeTransport {
    failures: Arc<Mutex<HashMap<String, CommandError>>>,
    executed: Arc<Mutex<Vec<String>>>,
}

impl FakeTransport {
    pub fn new() -> Self {
        Self::default()
    }

    /// Make the command whose statement equals `statement` fail with `err`.
    pub fn failing(self, statement: &str, err: CommandError) -> Self {
        self.failures
            .lock()
            .unwrap()
            .insert(statement.to_string(), err);
        self
    }

    /// Statements executed so far, in order.
    pub fn executed(&self) -> Vec<String> {
        self.executed.lock().unwrap().clone()
    }

    fn reply(&self, command: &Command) -> Result<Value, CommandError> {
        let statement = command.statement();
        self.executed.lock().unwrap().push(statement.clone());
        if let Some(err) = self.failures.lock().unwrap().get(&statement) {
            return Err(err.clone());
        }
        match command.name() {
            "get" if statement.starts_with("get missing") => Ok(Value::Nil),
            "get" => Ok(Value::Data(b"value".to_vec())),
            "incrby" | "del" => Ok(Value::Int(1)),
            _ => Ok(Value::Okay),
        }
    }
}

#[async_trait]
impl CommandTransport for FakeTransport {
    async fn execute(&self, command: &mut Command) -> Result<(), CommandError> {
        let reply = self.reply(command);
        command.set_result(reply.clone());
        reply.map(|_| ())
    }

    async fn execute_batch(&self, commands: &mut [Command]) -> Result<(), CommandError> {
        for command in commands.iter_mut() {
            let reply = self.reply(command);
            command.set_result(reply);
        }
        match commands
            .iter()
            .find(|command| command.status() == CommandStatus::Failed)
            .and_then(Command::error)
        {
            Some(err) => Err(err.clone()),
            None => Ok(()),
        }
    }
}
