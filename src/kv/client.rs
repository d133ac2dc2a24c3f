//! Hooked command client.

use std::sync::Arc;

use async_trait::async_trait;
use redis::{FromRedisValue, ToRedisArgs};
use tracing::Instrument;

use crate::config::BatchPolicy;
use crate::kv::command::{first_failure, Command, CommandError, CommandStatus};
use crate::kv::hooks::{Context, Hooks};

/// The network side of command execution.
///
/// Implementations store each command's outcome on the command itself and
/// return a copy of the error, if any.
#[async_trait]
pub trait CommandTransport: Send + Sync {
    async fn execute(&self, command: &mut Command) -> Result<(), CommandError>;

    /// Send every command; each keeps its own outcome. Returns the first
    /// genuine failure.
    async fn execute_batch(&self, commands: &mut [Command]) -> Result<(), CommandError>;
}

/// Command client running every operation through its [`Hooks`].
#[derive(Clone)]
pub struct KvClient {
    transport: Arc<dyn CommandTransport>,
    hooks: Hooks,
    policy: BatchPolicy,
}

impl KvClient {
    pub fn new(transport: impl CommandTransport + 'static) -> Self {
        Self {
            transport: Arc::new(transport),
            hooks: Hooks::default(),
            policy: BatchPolicy::default(),
        }
    }

    pub fn with_hooks(mut self, hooks: Hooks) -> Self {
        self.hooks = hooks;
        self
    }

    pub fn with_batch_policy(mut self, policy: BatchPolicy) -> Self {
        self.policy = policy;
        self
    }

    pub fn batch_policy(&self) -> BatchPolicy {
        self.policy
    }

    /// Run one command: before-hook, execution, after-hook.
    ///
    /// A before-hook error aborts the call untouched. Otherwise the
    /// after-hook always runs and its error is reported only when execution
    /// itself succeeded.
    pub async fn process(&self, ctx: Context, command: &mut Command) -> Result<(), CommandError> {
        let ctx = (self.hooks.before)(ctx, &*command)?;
        let executed = self
            .transport
            .execute(command)
            .instrument(ctx.span().clone())
            .await;
        let after = (self.hooks.after)(&ctx, &*command);
        executed.and(after)
    }

    /// Run a batch with the same hook contract as [`KvClient::process`].
    pub async fn process_batch(
        &self,
        ctx: Context,
        commands: &mut [Command],
    ) -> Result<(), CommandError> {
        let ctx = (self.hooks.before_batch)(ctx, &*commands)?;
        let executed = self
            .execute_batch(commands)
            .instrument(ctx.span().clone())
            .await;
        let after = (self.hooks.after_batch)(&ctx, &*commands);
        executed.and(after)
    }

    async fn execute_batch(&self, commands: &mut [Command]) -> Result<(), CommandError> {
        if commands.is_empty() {
            return Ok(());
        }
        match self.policy {
            BatchPolicy::Continue => self.transport.execute_batch(commands).await,
            BatchPolicy::StopOnError => {
                let mut failed = false;
                for command in commands.iter_mut() {
                    if failed {
                        command.set_result(Err(CommandError::Skipped));
                        continue;
                    }
                    if let Err(err) = self.transport.execute(command).await {
                        // Keep the error even when the transport did not store it.
                        if command.result().is_none() {
                            command.set_result(Err(err));
                        }
                    }
                    failed = command.status() == CommandStatus::Failed;
                }
                first_failure(commands)
            }
        }
    }

    /// Start collecting commands for one batch.
    pub fn batch(&self) -> Batch<'_> {
        Batch {
            client: self,
            commands: Vec::new(),
        }
    }

    pub async fn get<T: FromRedisValue>(&self, key: &str) -> Result<T, CommandError> {
        self.query(Command::new("GET").arg(key)).await
    }

    pub async fn set<V: ToRedisArgs>(&self, key: &str, value: V) -> Result<(), CommandError> {
        let mut command = Command::new("SET").arg(key).arg(value);
        self.process(Context::new(), &mut command).await
    }

    /// Number of keys removed.
    pub async fn del(&self, key: &str) -> Result<i64, CommandError> {
        self.query(Command::new("DEL").arg(key)).await
    }

    pub async fn incr(&self, key: &str, delta: i64) -> Result<i64, CommandError> {
        self.query(Command::new("INCRBY").arg(key).arg(delta)).await
    }

    /// Run an arbitrary command and convert its reply.
    pub async fn query<T: FromRedisValue>(&self, mut command: Command) -> Result<T, CommandError> {
        self.process(Context::new(), &mut command).await?;
        command.value()
    }
}

/// Commands queued for one pipelined round trip.
pub struct Batch<'a> {
    client: &'a KvClient,
    commands: Vec<Command>,
}

impl Batch<'_> {
    pub fn add(mut self, command: Command) -> Self {
        self.commands.push(command);
        self
    }

    pub fn len(&self) -> usize {
        self.commands.len()
    }

    pub fn is_empty(&self) -> bool {
        self.commands.is_empty()
    }

    /// Execute the batch. Every command is handed back with its own outcome,
    /// alongside the batch-level result.
    pub async fn execute(mut self) -> (Vec<Command>, Result<(), CommandError>) {
        let result = self
            .client
            .process_batch(Context::new(), &mut self.commands)
            .await;
        (self.commands, result)
    }
}
