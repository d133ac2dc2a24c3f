//! Actor group: run everything, stop everything when one returns.

use std::any::Any;
use std::future::Future;
use std::panic::AssertUnwindSafe;
use std::sync::Arc;

use futures_util::FutureExt;
use tokio::task::JoinSet;

use crate::interceptor::BoxFuture;
use crate::transport::{BoxError, Server};

type RunFn = Box<dyn FnOnce() -> BoxFuture<Result<(), BoxError>> + Send>;
type InterruptFn = Box<dyn FnOnce(Option<&ActorError>) + Send>;

/// How an actor's run function ended.
#[derive(Debug, thiserror::Error)]
pub enum ActorError {
    #[error("{0}")]
    Failed(#[source] BoxError),

    #[error("panicked: {0}")]
    Panicked(String),
}

/// The first actor to stop, when it stopped with an error.
#[derive(Debug, thiserror::Error)]
#[error("actor '{actor}' stopped: {source}")]
pub struct GroupError {
    pub actor: String,
    #[source]
    pub source: ActorError,
}

struct Actor {
    name: String,
    run: RunFn,
    interrupt: InterruptFn,
}

/// A set of `(run, interrupt)` pairs run as one unit.
///
/// Every run starts concurrently. When the first one returns, every
/// interrupt is called with its error (if any), and the group then waits
/// for all remaining runs before returning that first result.
#[derive(Default)]
pub struct Group {
    actors: Vec<Actor>,
}

impl Group {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn len(&self) -> usize {
        self.actors.len()
    }

    pub fn is_empty(&self) -> bool {
        self.actors.is_empty()
    }

    /// Add an actor. `interrupt` must make `run` return promptly, and must
    /// not block itself.
    pub fn register<R, Fut, I>(&mut self, run: R, interrupt: I) -> &mut Self
    where
        R: FnOnce() -> Fut + Send + 'static,
        Fut: Future<Output = Result<(), BoxError>> + Send + 'static,
        I: FnOnce(Option<&ActorError>) + Send + 'static,
    {
        let name = format!("actor-{}", self.actors.len());
        self.register_named(name, run, interrupt)
    }

    /// Add an actor with a name used in logs and errors.
    pub fn register_named<R, Fut, I>(
        &mut self,
        name: impl Into<String>,
        run: R,
        interrupt: I,
    ) -> &mut Self
    where
        R: FnOnce() -> Fut + Send + 'static,
        Fut: Future<Output = Result<(), BoxError>> + Send + 'static,
        I: FnOnce(Option<&ActorError>) + Send + 'static,
    {
        self.actors.push(Actor {
            name: name.into(),
            run: Box::new(move || Box::pin(run())),
            interrupt: Box::new(interrupt),
        });
        self
    }

    /// Add a server: run is `start`, interrupt is `stop`.
    pub fn register_server(&mut self, server: Arc<dyn Server>) -> &mut Self {
        let name = format!("{} {}", server.scheme(), server.address());
        let runner = Arc::clone(&server);
        self.register_named(
            name,
            move || async move { runner.start().await.map_err(BoxError::from) },
            move |_| {
                if let Err(err) = server.stop() {
                    tracing::warn!(
                        scheme = server.scheme(),
                        error = %err,
                        "Failed to stop server"
                    );
                }
            },
        )
    }

    /// Run every actor until all have returned.
    ///
    /// Returns the first actor's error, or `Ok` when the first actor to
    /// return did so cleanly. An empty group returns immediately.
    pub async fn run(self) -> Result<(), GroupError> {
        if self.actors.is_empty() {
            return Ok(());
        }

        let mut names = Vec::with_capacity(self.actors.len());
        let mut interrupts = Vec::with_capacity(self.actors.len());
        let mut tasks = JoinSet::new();

        for (idx, actor) in self.actors.into_iter().enumerate() {
            names.push(actor.name);
            interrupts.push(actor.interrupt);
            let run = actor.run;
            tasks.spawn(async move {
                let outcome = match AssertUnwindSafe(async move { run().await })
                    .catch_unwind()
                    .await
                {
                    Ok(Ok(())) => Ok(()),
                    Ok(Err(err)) => Err(ActorError::Failed(err)),
                    Err(panic) => Err(ActorError::Panicked(panic_message(panic))),
                };
                (idx, outcome)
            });
        }

        tracing::debug!(actors = names.len(), "Actor group started");

        let (first_idx, first) = match tasks.join_next().await {
            Some(Ok(done)) => done,
            Some(Err(err)) => (usize::MAX, Err(ActorError::Panicked(err.to_string()))),
            None => return Ok(()),
        };
        let first_name = names
            .get(first_idx)
            .cloned()
            .unwrap_or_else(|| "unknown".to_string());

        match &first {
            Ok(()) => tracing::info!(actor = %first_name, "Actor returned, interrupting group"),
            Err(err) => tracing::error!(actor = %first_name, error = %err, "Actor failed, interrupting group"),
        }

        for (name, interrupt) in names.iter().zip(interrupts) {
            let cause = first.as_ref().err();
            if let Err(panic) = std::panic::catch_unwind(AssertUnwindSafe(|| interrupt(cause))) {
                tracing::warn!(
                    actor = %name,
                    panic = %panic_message(panic),
                    "Interrupt panicked"
                );
            }
        }

        while let Some(joined) = tasks.join_next().await {
            match joined {
                Ok((_, Ok(()))) => {}
                Ok((idx, Err(err))) => {
                    let name = names.get(idx).map(String::as_str).unwrap_or("unknown");
                    tracing::warn!(actor = %name, error = %err, "Actor stopped with error after interrupt");
                }
                Err(err) => tracing::warn!(error = %err, "Actor task failed after interrupt"),
            }
        }

        tracing::debug!("Actor group stopped");

        first.map_err(|source| GroupError {
            actor: first_name,
            source,
        })
    }
}

fn panic_message(panic: Box<dyn Any + Send>) -> String {
    if let Some(message) = panic.downcast_ref::<&str>() {
        message.to_string()
    } else if let Some(message) = panic.downcast_ref::<String>() {
        message.clone()
    } else {
        "unknown panic".to_string()
    }
}
