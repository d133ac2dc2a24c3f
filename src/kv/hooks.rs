//! Before/after hooks around command execution.

use std::fmt;
use std::sync::Arc;
use std::time::{Duration, Instant};

use crate::kv::command::{Command, CommandError};

/// Per-operation context threaded from the before-hook to the after-hook.
#[derive(Debug, Clone)]
pub struct Context {
    span: tracing::Span,
    started: Instant,
}

impl Default for Context {
    fn default() -> Self {
        Self::new()
    }
}

impl Context {
    /// Context parented on the current span.
    pub fn new() -> Self {
        Self {
            span: tracing::Span::current(),
            started: Instant::now(),
        }
    }

    /// Same operation, now recorded under `span`.
    pub fn with_span(self, span: tracing::Span) -> Self {
        Self { span, ..self }
    }

    pub fn span(&self) -> &tracing::Span {
        &self.span
    }

    /// Time since the context was created.
    pub fn elapsed(&self) -> Duration {
        self.started.elapsed()
    }
}

pub type BeforeHook = Arc<dyn Fn(Context, &Command) -> Result<Context, CommandError> + Send + Sync>;
pub type AfterHook = Arc<dyn Fn(&Context, &Command) -> Result<(), CommandError> + Send + Sync>;
pub type BeforeBatchHook =
    Arc<dyn Fn(Context, &[Command]) -> Result<Context, CommandError> + Send + Sync>;
pub type AfterBatchHook = Arc<dyn Fn(&Context, &[Command]) -> Result<(), CommandError> + Send + Sync>;

/// The four hook slots. Unset slots pass the context through untouched.
///
/// Hooks run concurrently for concurrent commands and must not rely on
/// unsynchronized shared state.
#[derive(Clone)]
pub struct Hooks {
    pub(crate) before: BeforeHook,
    pub(crate) after: AfterHook,
    pub(crate) before_batch: BeforeBatchHook,
    pub(crate) after_batch: AfterBatchHook,
}

fn pass<T: ?Sized>(ctx: Context, _: &T) -> Result<Context, CommandError> {
    Ok(ctx)
}

fn done<T: ?Sized>(_: &Context, _: &T) -> Result<(), CommandError> {
    Ok(())
}

impl Default for Hooks {
    fn default() -> Self {
        Self {
            before: Arc::new(pass::<Command>),
            after: Arc::new(done::<Command>),
            before_batch: Arc::new(pass::<[Command]>),
            after_batch: Arc::new(done::<[Command]>),
        }
    }
}

impl fmt::Debug for Hooks {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Hooks").finish_non_exhaustive()
    }
}

impl Hooks {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn before<F>(mut self, hook: F) -> Self
    where
        F: Fn(Context, &Command) -> Result<Context, CommandError> + Send + Sync + 'static,
    {
        self.before = Arc::new(hook);
        self
    }

    pub fn after<F>(mut self, hook: F) -> Self
    where
        F: Fn(&Context, &Command) -> Result<(), CommandError> + Send + Sync + 'static,
    {
        self.after = Arc::new(hook);
        self
    }

    pub fn before_batch<F>(mut self, hook: F) -> Self
    where
        F: Fn(Context, &[Command]) -> Result<Context, CommandError> + Send + Sync + 'static,
    {
        self.before_batch = Arc::new(hook);
        self
    }

    pub fn after_batch<F>(mut self, hook: F) -> Self
    where
        F: Fn(&Context, &[Command]) -> Result<(), CommandError> + Send + Sync + 'static,
    {
        self.after_batch = Arc::new(hook);
        self
    }
}
