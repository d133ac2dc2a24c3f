//! Commands and their outcomes.

use redis::{FromRedisValue, ToRedisArgs, Value};

/// Why a command did not produce a value.
///
/// Cloneable so every command in a batch can keep its own copy while the
/// batch call reports the first one.
#[derive(Debug, Clone, PartialEq, thiserror::Error)]
pub enum CommandError {
    /// Error reply from the server, e.g. `WRONGTYPE` or `ERR no such key`.
    #[error("{code}: {message}")]
    Server { code: String, message: String },

    #[error("connection error: {0}")]
    Io(String),

    #[error("command timed out")]
    Timeout,

    /// A before-hook declined the operation.
    #[error("aborted by hook: {0}")]
    Aborted(String),

    /// Not sent because an earlier command in the batch failed.
    #[error("skipped after an earlier failure in the batch")]
    Skipped,

    /// Reply could not be converted to the requested type.
    #[error("unexpected reply: {0}")]
    Conversion(String),

    #[error("client error: {0}")]
    Client(String),
}

impl CommandError {
    /// Key-absent conditions; these are results, not failures.
    pub fn is_not_found(&self) -> bool {
        match self {
            CommandError::Server { message, .. } => message.to_ascii_lowercase().contains("no such key"),
            _ => false,
        }
    }
}

impl From<redis::RedisError> for CommandError {
    fn from(err: redis::RedisError) -> Self {
        if err.is_timeout() {
            return CommandError::Timeout;
        }
        if err.is_io_error() || err.is_connection_dropped() || err.is_connection_refusal() {
            return CommandError::Io(err.to_string());
        }
        match err.kind() {
            redis::ErrorKind::TypeError => CommandError::Conversion(err.to_string()),
            redis::ErrorKind::ClientError | redis::ErrorKind::InvalidClientConfig => {
                CommandError::Client(err.to_string())
            }
            _ => CommandError::Server {
                code: err.code().unwrap_or("ERR").to_string(),
                message: err.detail().unwrap_or_default().to_string(),
            },
        }
    }
}

/// Outcome class used by tracing and metrics.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CommandStatus {
    /// Not executed yet.
    Pending,
    Success,
    /// The key was absent. Counted as success.
    NotFound,
    Failed,
}

impl CommandStatus {
    /// Metric label; not-found reads as `ok`.
    pub fn label(&self) -> &'static str {
        match self {
            CommandStatus::Pending => "pending",
            CommandStatus::Success | CommandStatus::NotFound => "ok",
            CommandStatus::Failed => "error",
        }
    }
}

/// One operation against the store, plus its result once executed.
#[derive(Debug, Clone)]
pub struct Command {
    name: String,
    args: Vec<Vec<u8>>,
    result: Option<Result<Value, CommandError>>,
}

impl Command {
    /// Command by name, e.g. `Command::new("SET")`.
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into().to_ascii_lowercase(),
            args: Vec::new(),
            result: None,
        }
    }

    /// Append an argument.
    pub fn arg<T: ToRedisArgs>(mut self, arg: T) -> Self {
        self.args.extend(arg.to_redis_args());
        self
    }

    /// Lower-case command name.
    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn args(&self) -> &[Vec<u8>] {
        &self.args
    }

    /// Name and arguments as one space-separated string.
    pub fn statement(&self) -> String {
        let mut statement = self.name.clone();
        for arg in &self.args {
            statement.push(' ');
            statement.push_str(&String::from_utf8_lossy(arg));
        }
        statement
    }

    pub fn result(&self) -> Option<&Result<Value, CommandError>> {
        self.result.as_ref()
    }

    pub fn set_result(&mut self, result: Result<Value, CommandError>) {
        self.result = Some(result);
    }

    pub fn error(&self) -> Option<&CommandError> {
        match &self.result {
            Some(Err(err)) => Some(err),
            _ => None,
        }
    }

    pub fn status(&self) -> CommandStatus {
        match &self.result {
            None => CommandStatus::Pending,
            Some(Ok(Value::Nil)) => CommandStatus::NotFound,
            Some(Ok(_)) => CommandStatus::Success,
            Some(Err(err)) if err.is_not_found() => CommandStatus::NotFound,
            Some(Err(_)) => CommandStatus::Failed,
        }
    }

    /// Convert the reply; `Option<T>` maps an absent key to `None`.
    pub fn value<T: FromRedisValue>(&self) -> Result<T, CommandError> {
        match &self.result {
            Some(Ok(value)) => T::from_redis_value(value).map_err(CommandError::from),
            Some(Err(err)) => Err(err.clone()),
            None => Err(CommandError::Client(format!("{} was not executed", self.name))),
        }
    }

    pub(crate) fn to_redis_cmd(&self) -> redis::Cmd {
        let mut cmd = redis::cmd(&self.name);
        for arg in &self.args {
            cmd.arg(arg.as_slice());
        }
        cmd
    }
}

/// First genuine failure among `commands`, if any.
pub(crate) fn first_failure(commands: &[Command]) -> Result<(), CommandError> {
    match commands
        .iter()
        .find(|command| command.status() == CommandStatus::Failed)
        .and_then(Command::error)
    {
        Some(err) => Err(err.clone()),
        None => Ok(()),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn statement_joins_args() {
        let cmd = Command::new("SET").arg("user:1").arg(42);
        assert_eq!(cmd.name(), "set");
        assert_eq!(cmd.statement(), "set user:1 42");
    }

    #[test]
    fn absent_key_is_not_a_failure() {
        let mut get = Command::new("GET").arg("missing");
        assert_eq!(get.status(), CommandStatus::Pending);

        get.set_result(Ok(Value::Nil));
        assert_eq!(get.status(), CommandStatus::NotFound);
        assert_eq!(get.status().label(), "ok");
        assert_eq!(get.value::<Option<String>>(), Ok(None));

        let mut rename = Command::new("RENAME").arg("a").arg("b");
        rename.set_result(Err(CommandError::Server {
            code: "ERR".into(),
            message: "no such key".into(),
        }));
        assert_eq!(rename.status(), CommandStatus::NotFound);
    }

    #[test]
    fn first_failure_skips_not_found() {
        let mut a = Command::new("GET");
        a.set_result(Ok(Value::Nil));
        let mut b = Command::new("INCR");
        b.set_result(Err(CommandError::Timeout));
        let mut c = Command::new("GET");
        c.set_result(Err(CommandError::Io("reset".into())));

        assert_eq!(first_failure(&[a, b, c]), Err(CommandError::Timeout));
    }
}
