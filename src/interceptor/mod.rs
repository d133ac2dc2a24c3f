//! Interceptor chain composition.
//!
//! # Data Flow
//! ```text
//! [i1, i2, ..., iN] + terminal handler H
//!     → chain() folds right-to-left
//!     → i1(i2(...iN(H)))
//!
//! Call enters:  i1 → i2 → ... → iN → H
//! Call returns: H → iN → ... → i2 → i1
//! ```
//!
//! # Design Decisions
//! - `Next` is consumed by `run`, so an interceptor can forward a call at most once
//! - An empty list returns the terminal handler untouched
//! - Composition is pure; interceptors are shared via `Arc` and never mutated

use std::future::Future;
use std::pin::Pin;
use std::sync::Arc;

/// Boxed, sendable future used across the call path.
pub type BoxFuture<T> = Pin<Box<dyn Future<Output = T> + Send + 'static>>;

/// The remainder of a call path, handed to an interceptor.
pub struct Next<Req, Res, E> {
    call: Box<dyn FnOnce(Req) -> BoxFuture<Result<Res, E>> + Send>,
}

impl<Req, Res, E> Next<Req, Res, E>
where
    Req: Send + 'static,
    Res: Send + 'static,
    E: Send + 'static,
{
    /// Wrap a terminal handler.
    pub fn new<F, Fut>(handler: F) -> Self
    where
        F: FnOnce(Req) -> Fut + Send + 'static,
        Fut: Future<Output = Result<Res, E>> + Send + 'static,
    {
        Self {
            call: Box::new(move |req| Box::pin(handler(req))),
        }
    }

    /// Forward the call to the rest of the chain.
    pub async fn run(self, req: Req) -> Result<Res, E> {
        (self.call)(req).await
    }
}

/// A wrapper observing a call's entry and exit.
///
/// Implementations may short-circuit by returning without calling
/// [`Next::run`], but must hand back whatever `next` returned otherwise.
pub trait Interceptor<Req, Res, E>: Send + Sync + 'static {
    fn intercept(&self, req: Req, next: Next<Req, Res, E>) -> BoxFuture<Result<Res, E>>;
}

impl<F, Fut, Req, Res, E> Interceptor<Req, Res, E> for F
where
    F: Fn(Req, Next<Req, Res, E>) -> Fut + Send + Sync + 'static,
    Fut: Future<Output = Result<Res, E>> + Send + 'static,
{
    fn intercept(&self, req: Req, next: Next<Req, Res, E>) -> BoxFuture<Result<Res, E>> {
        Box::pin(self(req, next))
    }
}

/// Compose `interceptors` around `terminal`; the first interceptor is outermost.
pub fn chain<Req, Res, E>(
    interceptors: &[Arc<dyn Interceptor<Req, Res, E>>],
    terminal: Next<Req, Res, E>,
) -> Next<Req, Res, E>
where
    Req: Send + 'static,
    Res: Send + 'static,
    E: Send + 'static,
{
    interceptors.iter().rev().fold(terminal, |next, interceptor| {
        let interceptor = Arc::clone(interceptor);
        Next {
            call: Box::new(move |req| interceptor.intercept(req, next)),
        }
    })
}

/// An ordered list of interceptors acting as a single interceptor.
pub struct Chain<Req, Res, E> {
    interceptors: Vec<Arc<dyn Interceptor<Req, Res, E>>>,
}

impl<Req, Res, E> Chain<Req, Res, E> {
    pub fn new(interceptors: Vec<Arc<dyn Interceptor<Req, Res, E>>>) -> Self {
        Self { interceptors }
    }

    pub fn len(&self) -> usize {
        self.interceptors.len()
    }

    pub fn is_empty(&self) -> bool {
        self.interceptors.is_empty()
    }
}

impl<Req, Res, E> Interceptor<Req, Res, E> for Chain<Req, Res, E>
where
    Req: Send + 'static,
    Res: Send + 'static,
    E: Send + 'static,
{
    fn intercept(&self, req: Req, next: Next<Req, Res, E>) -> BoxFuture<Result<Res, E>> {
        let composed = chain(&self.interceptors, next);
        Box::pin(composed.run(req))
    }
}
