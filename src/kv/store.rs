//! Redis-backed command transport.

use async_trait::async_trait;
use futures_util::future::join_all;
use redis::aio::MultiplexedConnection;
use redis::{IntoConnectionInfo, Value};

use crate::config::{BatchPolicy, RedisConfig};
use crate::kv::client::{CommandTransport, KvClient};
use crate::kv::command::{first_failure, Command, CommandError};
use crate::kv::trace::trace_hooks;

/// Connection settings for [`connect`].
#[derive(Debug, Clone)]
pub struct RedisOptions {
    pub url: String,
    pub db: i64,
    pub batch_policy: BatchPolicy,
}

impl Default for RedisOptions {
    fn default() -> Self {
        Self::from_config(&RedisConfig::default())
    }
}

impl RedisOptions {
    pub fn from_config(config: &RedisConfig) -> Self {
        Self {
            url: config.url.clone(),
            db: config.db,
            batch_policy: config.batch_policy,
        }
    }

    /// `host:port` of the server, for span attributes.
    pub fn peer(&self) -> String {
        match url::Url::parse(&self.url) {
            Ok(url) => match (url.host_str(), url.port()) {
                (Some(host), Some(port)) => format!("{}:{}", host, port),
                (Some(host), None) => format!("{}:6379", host),
                _ => self.url.clone(),
            },
            Err(_) => self.url.clone(),
        }
    }
}

/// Transport over one multiplexed connection.
///
/// Batched commands are written back to back on the shared connection, so
/// they travel as one pipeline while each receives its own reply.
#[derive(Clone)]
pub struct RedisTransport {
    connection: MultiplexedConnection,
}

impl RedisTransport {
    pub fn new(connection: MultiplexedConnection) -> Self {
        Self { connection }
    }
}

#[async_trait]
impl CommandTransport for RedisTransport {
    async fn execute(&self, command: &mut Command) -> Result<(), CommandError> {
        let mut connection = self.connection.clone();
        let result = command
            .to_redis_cmd()
            .query_async::<_, Value>(&mut connection)
            .await
            .map_err(CommandError::from);
        let outcome = result.as_ref().map(|_| ()).map_err(Clone::clone);
        command.set_result(result);
        outcome
    }

    async fn execute_batch(&self, commands: &mut [Command]) -> Result<(), CommandError> {
        let pending = commands.iter().map(|command| {
            let cmd = command.to_redis_cmd();
            let mut connection = self.connection.clone();
            async move { cmd.query_async::<_, Value>(&mut connection).await }
        });
        let replies = join_all(pending).await;

        for (command, reply) in commands.iter_mut().zip(replies) {
            command.set_result(reply.map_err(CommandError::from));
        }
        first_failure(commands)
    }
}

/// Open a connection and return a client with tracing hooks attached.
pub async fn connect(options: &RedisOptions) -> Result<KvClient, CommandError> {
    let mut info = options.url.as_str().into_connection_info()?;
    info.redis.db = options.db;

    let client = redis::Client::open(info)?;
    let connection = client.get_multiplexed_async_connection().await?;

    tracing::info!(
        peer = %options.peer(),
        db = options.db,
        batch_policy = ?options.batch_policy,
        "Connected to redis"
    );

    Ok(KvClient::new(RedisTransport::new(connection))
        .with_hooks(trace_hooks(options))
        .with_batch_policy(options.batch_policy))
}
