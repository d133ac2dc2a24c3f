//! Response body that reports when a streaming call ends.

use std::fmt;
use std::pin::Pin;
use std::task::{Context, Poll};

use http::HeaderMap;
use http_body::{Body, Frame, SizeHint};
use tokio::sync::oneshot;
use tonic::Status;

/// How a watched stream finished: its trailers, if it sent any, or why it
/// stopped before reaching them.
pub(crate) type StreamEnd = Result<Option<HeaderMap>, Status>;

/// Response body handed out by [`RpcService`](crate::transport::rpc::RpcService).
///
/// Unary bodies pass through untouched. Streaming bodies fire once, at the
/// first of: trailers, end of body, body error, or drop before the end.
pub struct RpcBody<B> {
    inner: B,
    end: Option<oneshot::Sender<StreamEnd>>,
}

impl<B> RpcBody<B> {
    pub(crate) fn new(inner: B) -> Self {
        Self { inner, end: None }
    }

    pub(crate) fn watched(inner: B, end: oneshot::Sender<StreamEnd>) -> Self {
        Self {
            inner,
            end: Some(end),
        }
    }

    fn fire(&mut self, end: StreamEnd) {
        if let Some(sender) = self.end.take() {
            let _ = sender.send(end);
        }
    }
}

impl<B> Body for RpcBody<B>
where
    B: Body + Unpin,
    B::Error: fmt::Display,
{
    type Data = B::Data;
    type Error = B::Error;

    fn poll_frame(
        mut self: Pin<&mut Self>,
        cx: &mut Context<'_>,
    ) -> Poll<Option<Result<Frame<Self::Data>, Self::Error>>> {
        let this = &mut *self;
        let polled = Pin::new(&mut this.inner).poll_frame(cx);
        match &polled {
            Poll::Ready(Some(Ok(frame))) => {
                if let Some(trailers) = frame.trailers_ref() {
                    this.fire(Ok(Some(trailers.clone())));
                } else if this.inner.is_end_stream() {
                    // The transport may stop polling once the body says it is done.
                    this.fire(Ok(None));
                }
            }
            Poll::Ready(Some(Err(err))) => {
                let status = Status::unknown(format!("response stream failed: {}", err));
                this.fire(Err(status));
            }
            Poll::Ready(None) => this.fire(Ok(None)),
            Poll::Pending => {}
        }
        polled
    }

    fn is_end_stream(&self) -> bool {
        self.inner.is_end_stream()
    }

    fn size_hint(&self) -> SizeHint {
        self.inner.size_hint()
    }
}

impl<B> Drop for RpcBody<B> {
    fn drop(&mut self) {
        self.fire(Err(Status::cancelled("response stream dropped before it ended")));
    }
}

impl<B: Default> Default for RpcBody<B> {
    fn default() -> Self {
        Self::new(B::default())
    }
}

impl<B: fmt::Debug> fmt::Debug for RpcBody<B> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("RpcBody")
            .field("inner", &self.inner)
            .field("watched", &self.end.is_some())
            .finish()
    }
}
