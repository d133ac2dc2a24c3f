//! Tower layer that runs the configured call pipeline around a tonic service.
//!
//! One `RpcService` wraps both directions:
//! - server side: around the router of registered services
//! - client side: around a `Channel`
//!
//! Per call it opens a tracing span (when enabled), notifies the stats hook,
//! and runs the unary or stream interceptor chain, whose terminal handler
//! forwards the reassembled request to the inner service.
//!
//! A unary chain returns with the response headers. A stream chain returns
//! only when the response body ends, with the trailers merged into the reply,
//! so interceptors, spans and stats see the whole stream.

use std::collections::HashSet;
use std::future::Future;
use std::sync::{Arc, Mutex};
use std::task::{Context, Poll};
use std::time::Instant;

use http::{Request, Response};
use http_body::Body;
use tokio::sync::oneshot;
use tonic::metadata::MetadataMap;
use tonic::Status;
use tower::{Layer, Service, ServiceExt};
use tracing::Instrument;

use crate::interceptor::{chain, BoxFuture, Next};
use crate::transport::rpc::body::RpcBody;
use crate::transport::rpc::call::{
    outcome_code, CallKind, RpcCall, RpcInterceptor, RpcReply, Side, StatsHandler,
};
use crate::transport::BoxError;

/// Fully wired call pipeline; immutable once built.
pub(crate) struct CallPipeline {
    pub(crate) side: Side,
    pub(crate) tracing_enabled: bool,
    pub(crate) stats: Option<Arc<dyn StatsHandler>>,
    pub(crate) unary: Vec<RpcInterceptor>,
    pub(crate) stream: Vec<RpcInterceptor>,
    pub(crate) stream_methods: HashSet<String>,
}

impl CallPipeline {
    fn kind_of(&self, method: &str) -> CallKind {
        if self.stream_methods.contains(method) {
            CallKind::Streaming
        } else {
            CallKind::Unary
        }
    }

    fn interceptors(&self, kind: CallKind) -> &[RpcInterceptor] {
        match kind {
            CallKind::Unary => &self.unary,
            CallKind::Streaming => &self.stream,
        }
    }

    fn span(&self, call: &RpcCall) -> tracing::Span {
        if !self.tracing_enabled {
            return tracing::Span::none();
        }
        let kind = match self.side {
            Side::Server => "server",
            Side::Client => "client",
        };
        tracing::info_span!(
            "rpc",
            otel.name = %call.method.trim_start_matches('/'),
            otel.kind = kind,
            otel.status_code = tracing::field::Empty,
            rpc.system = "grpc",
            rpc.service = %call.service_name(),
            rpc.method = %call.method_name(),
            rpc.grpc.status_code = tracing::field::Empty,
        )
    }
}

/// Layer applying a [`CallPipeline`].
#[derive(Clone)]
pub struct RpcLayer {
    pipeline: Arc<CallPipeline>,
}

impl RpcLayer {
    pub(crate) fn new(pipeline: CallPipeline) -> Self {
        Self {
            pipeline: Arc::new(pipeline),
        }
    }
}

impl<S> Layer<S> for RpcLayer {
    type Service = RpcService<S>;

    fn layer(&self, inner: S) -> Self::Service {
        RpcService {
            inner,
            pipeline: Arc::clone(&self.pipeline),
        }
    }
}

/// Service produced by [`RpcLayer`].
#[derive(Clone)]
pub struct RpcService<S> {
    inner: S,
    pipeline: Arc<CallPipeline>,
}

impl<S, ReqBody, ResBody> Service<Request<ReqBody>> for RpcService<S>
where
    S: Service<Request<ReqBody>, Response = Response<ResBody>> + Clone + Send + 'static,
    S::Future: Send + 'static,
    S::Error: Into<BoxError>,
    ReqBody: Send + 'static,
    ResBody: Body + Default + Send + 'static,
{
    type Response = Response<RpcBody<ResBody>>;
    type Error = BoxError;
    type Future = BoxFuture<Result<Self::Response, Self::Error>>;

    fn poll_ready(&mut self, cx: &mut Context<'_>) -> Poll<Result<(), Self::Error>> {
        self.inner.poll_ready(cx).map_err(Into::into)
    }

    fn call(&mut self, request: Request<ReqBody>) -> Self::Future {
        // The readied service goes into the future; a fresh clone stays behind.
        let clone = self.inner.clone();
        let inner = std::mem::replace(&mut self.inner, clone);
        let pipeline = Arc::clone(&self.pipeline);
        Box::pin(dispatch(pipeline, inner, request))
    }
}

/// Span, stats and timing of one call, settled when the chain returns.
struct CallOutcome {
    pipeline: Arc<CallPipeline>,
    span: tracing::Span,
    method: String,
    kind: CallKind,
    started: Instant,
}

impl CallOutcome {
    fn record(&self, result: &Result<RpcReply, Status>) {
        let code = outcome_code(result);
        self.span.record("rpc.grpc.status_code", code as i32);
        self.span
            .record("otel.status_code", if code == tonic::Code::Ok { "OK" } else { "ERROR" });
        if let Some(stats) = &self.pipeline.stats {
            stats.handle_end(&self.method, self.kind, self.pipeline.side, code, self.started.elapsed());
        }
    }
}

async fn dispatch<S, ReqBody, ResBody>(
    pipeline: Arc<CallPipeline>,
    inner: S,
    request: Request<ReqBody>,
) -> Result<Response<RpcBody<ResBody>>, BoxError>
where
    S: Service<Request<ReqBody>, Response = Response<ResBody>> + Send + 'static,
    S::Future: Send + 'static,
    S::Error: Into<BoxError>,
    ReqBody: Send + 'static,
    ResBody: Body + Default + Send + 'static,
{
    let (parts, body) = request.into_parts();
    let method = parts.uri.path().to_string();
    let kind = pipeline.kind_of(&method);
    let call = RpcCall {
        method,
        kind,
        side: pipeline.side,
        metadata: MetadataMap::from_headers(parts.headers),
        extensions: parts.extensions,
    };

    if let Some(stats) = &pipeline.stats {
        stats.handle_begin(&call);
    }
    let outcome = CallOutcome {
        pipeline: Arc::clone(&pipeline),
        span: pipeline.span(&call),
        method: call.method.clone(),
        kind,
        started: Instant::now(),
    };

    let (uri, http_method, version) = (parts.uri, parts.method, parts.version);
    let forward = move |call: RpcCall| {
        let mut request = Request::new(body);
        *request.uri_mut() = uri;
        *request.method_mut() = http_method;
        *request.version_mut() = version;
        *request.headers_mut() = call.metadata.into_headers();
        *request.extensions_mut() = call.extensions;
        async move {
            inner
                .oneshot(request)
                .await
                .map_err(|err| Status::from_error(err.into()))
        }
    };

    match kind {
        CallKind::Unary => dispatch_unary(pipeline, call, forward, outcome).await,
        CallKind::Streaming => dispatch_stream(pipeline, call, forward, outcome).await,
    }
}

/// The chain returns once the response headers are in.
async fn dispatch_unary<F, Fut, ResBody>(
    pipeline: Arc<CallPipeline>,
    call: RpcCall,
    forward: F,
    outcome: CallOutcome,
) -> Result<Response<RpcBody<ResBody>>, BoxError>
where
    F: FnOnce(RpcCall) -> Fut + Send + 'static,
    Fut: Future<Output = Result<Response<ResBody>, Status>> + Send + 'static,
    ResBody: Default + Send + 'static,
{
    // The terminal handler parks the response body here; interceptors only see headers.
    let parked: Arc<Mutex<Option<ResBody>>> = Arc::new(Mutex::new(None));
    let slot = Arc::clone(&parked);

    let terminal = Next::new(move |call: RpcCall| async move {
        let (parts, body) = forward(call).await?.into_parts();
        if let Ok(mut parked) = slot.lock() {
            *parked = Some(body);
        }
        Ok(RpcReply {
            metadata: MetadataMap::from_headers(parts.headers),
            extensions: parts.extensions,
        })
    });

    let result = chain(pipeline.interceptors(CallKind::Unary), terminal)
        .run(call)
        .instrument(outcome.span.clone())
        .await;
    outcome.record(&result);

    match result {
        Ok(reply) => {
            let body = parked
                .lock()
                .ok()
                .and_then(|mut parked| parked.take())
                .unwrap_or_default();
            Ok(reply_response(reply, RpcBody::new(body)))
        }
        Err(status) => reject(pipeline.side, status),
    }
}

/// The chain returns once the response stream has ended, while the response
/// itself is handed back as soon as its headers are in.
async fn dispatch_stream<F, Fut, ResBody>(
    pipeline: Arc<CallPipeline>,
    call: RpcCall,
    forward: F,
    outcome: CallOutcome,
) -> Result<Response<RpcBody<ResBody>>, BoxError>
where
    F: FnOnce(RpcCall) -> Fut + Send + 'static,
    Fut: Future<Output = Result<Response<ResBody>, Status>> + Send + 'static,
    ResBody: Body + Default + Send + 'static,
{
    let (head_tx, head_rx) = oneshot::channel::<Response<RpcBody<ResBody>>>();

    let terminal = Next::new(move |call: RpcCall| async move {
        let (parts, body) = forward(call).await?.into_parts();
        let headers = parts.headers.clone();

        // Trailers-only responses have already ended.
        if body.is_end_stream() || headers.contains_key("grpc-status") {
            let _ = head_tx.send(Response::from_parts(parts, RpcBody::new(body)));
            return Ok(RpcReply::new(MetadataMap::from_headers(headers)));
        }

        let (end_tx, end_rx) = oneshot::channel();
        if head_tx
            .send(Response::from_parts(parts, RpcBody::watched(body, end_tx)))
            .is_err()
        {
            return Err(Status::cancelled("caller went away before the stream started"));
        }
        let trailers = end_rx
            .await
            .unwrap_or_else(|_| Err(Status::cancelled("response stream dropped")))?;

        let mut headers = headers;
        if let Some(trailers) = trailers {
            headers.extend(trailers);
        }
        Ok(RpcReply::new(MetadataMap::from_headers(headers)))
    });

    let run = chain(pipeline.interceptors(CallKind::Streaming), terminal)
        .run(call)
        .instrument(outcome.span.clone());
    let (result_tx, result_rx) = oneshot::channel();
    tokio::spawn(async move {
        let result = run.await;
        outcome.record(&result);
        let _ = result_tx.send(result);
    });

    if let Ok(response) = head_rx.await {
        return Ok(response);
    }

    // No response reached the caller: the chain rejected or answered the call itself.
    match result_rx.await {
        Ok(Ok(reply)) => Ok(reply_response(reply, RpcBody::default())),
        Ok(Err(status)) => reject(pipeline.side, status),
        Err(_) => reject(pipeline.side, Status::internal("call pipeline stopped")),
    }
}

fn reply_response<B>(reply: RpcReply, body: B) -> Response<B> {
    let mut response = Response::new(body);
    *response.headers_mut() = reply.metadata.into_headers();
    *response.extensions_mut() = reply.extensions;
    response
}

/// Server side answers with the status; client side fails the call.
fn reject<B: Default>(side: Side, status: Status) -> Result<Response<B>, BoxError> {
    match side {
        Side::Server => Ok(status_response(&status)),
        Side::Client => Err(Box::new(status)),
    }
}

/// Trailers-only response carrying `status`.
fn status_response<B: Default>(status: &Status) -> Response<B> {
    let mut response = Response::new(B::default());
    let headers = response.headers_mut();
    headers.insert(
        http::header::CONTENT_TYPE,
        http::HeaderValue::from_static("application/grpc"),
    );
    headers.insert("grpc-status", http::HeaderValue::from(status.code() as i32));
    if let Ok(message) = http::HeaderValue::from_str(status.message()) {
        headers.insert("grpc-message", message);
    }
    response
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::VecDeque;
    use std::convert::Infallible;
    use std::pin::Pin;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::time::Duration;

    use http::HeaderMap;
    use http_body::Frame;
    use http_body_util::BodyExt;
    use tower::service_fn;
    use tower::util::BoxCloneService;

    fn pipeline(side: Side, unary: Vec<RpcInterceptor>) -> CallPipeline {
        CallPipeline {
            side,
            tracing_enabled: false,
            stats: None,
            unary,
            stream: Vec::new(),
            stream_methods: HashSet::new(),
        }
    }

    fn echo_service(
        hits: Arc<AtomicUsize>,
    ) -> BoxCloneService<Request<String>, Response<String>, Infallible> {
        BoxCloneService::new(service_fn(move |request: Request<String>| {
            let hits = hits.clone();
            async move {
                hits.fetch_add(1, Ordering::SeqCst);
                let tag = request
                    .headers()
                    .get("x-tag")
                    .and_then(|v| v.to_str().ok())
                    .unwrap_or("none")
                    .to_string();
                Ok::<_, Infallible>(Response::new(format!("{}:{}", tag, request.into_body())))
            }
        }))
    }

    fn request(body: &str) -> Request<String> {
        Request::builder()
            .uri("/demo.Echo/Say")
            .body(body.to_string())
            .unwrap()
    }

    #[tokio::test]
    async fn interceptor_metadata_reaches_handler() {
        let hits = Arc::new(AtomicUsize::new(0));
        let tagger: RpcInterceptor = Arc::new(|mut call: RpcCall, next: Next<RpcCall, RpcReply, Status>| async move {
            call.metadata.insert("x-tag", "tagged".parse().unwrap());
            next.run(call).await
        });
        let layer = RpcLayer::new(pipeline(Side::Server, vec![tagger]));
        let svc = layer.layer(echo_service(hits.clone()));

        let response = svc.oneshot(request("hi")).await.unwrap();

        let body = response.into_body().collect().await.unwrap().to_bytes();
        assert_eq!(body, "tagged:hi");
        assert_eq!(hits.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn server_rejection_becomes_status_response() {
        let hits = Arc::new(AtomicUsize::new(0));
        let deny: RpcInterceptor = Arc::new(|_call: RpcCall, _next: Next<RpcCall, RpcReply, Status>| async {
            Err::<RpcReply, Status>(Status::permission_denied("nope"))
        });
        let svc = RpcLayer::new(pipeline(Side::Server, vec![deny])).layer(echo_service(hits.clone()));

        let response = svc.oneshot(request("hi")).await.unwrap();

        assert_eq!(response.headers()["grpc-status"], "7");
        assert_eq!(response.headers()["grpc-message"], "nope");
        assert_eq!(hits.load(Ordering::SeqCst), 0);
    }

    #[tokio::test]
    async fn client_rejection_is_an_error() {
        let hits = Arc::new(AtomicUsize::new(0));
        let deny: RpcInterceptor = Arc::new(|_call: RpcCall, _next: Next<RpcCall, RpcReply, Status>| async {
            Err::<RpcReply, Status>(Status::unavailable("down"))
        });
        let svc = RpcLayer::new(pipeline(Side::Client, vec![deny])).layer(echo_service(hits));

        let err = svc.oneshot(request("hi")).await.unwrap_err();
        let status = err.downcast::<Status>().unwrap();
        assert_eq!(status.code(), tonic::Code::Unavailable);
    }

    #[tokio::test]
    async fn stream_methods_use_stream_chain() {
        let hits = Arc::new(AtomicUsize::new(0));
        let seen = Arc::new(Mutex::new(Vec::new()));
        let recorder = |label: &'static str, seen: Arc<Mutex<Vec<&'static str>>>| -> RpcInterceptor {
            Arc::new(move |call: RpcCall, next: Next<RpcCall, RpcReply, Status>| {
                let seen = seen.clone();
                async move {
                    seen.lock().unwrap().push(label);
                    next.run(call).await
                }
            })
        };
        let mut p = pipeline(Side::Server, vec![recorder("unary", seen.clone())]);
        p.stream = vec![recorder("stream", seen.clone())];
        p.stream_methods.insert("/demo.Echo/Watch".to_string());
        let svc = RpcLayer::new(p).layer(echo_service(hits));

        svc.clone().oneshot(request("a")).await.unwrap();
        let watch = Request::builder()
            .uri("/demo.Echo/Watch")
            .body(String::new())
            .unwrap();
        svc.oneshot(watch).await.unwrap();

        assert_eq!(*seen.lock().unwrap(), vec!["unary", "stream"]);
    }

    /// Body replaying a fixed list of frames.
    #[derive(Default)]
    struct Frames(VecDeque<Frame<&'static [u8]>>);

    impl Body for Frames {
        type Data = &'static [u8];
        type Error = Infallible;

        fn poll_frame(
            mut self: Pin<&mut Self>,
            _cx: &mut Context<'_>,
        ) -> Poll<Option<Result<Frame<Self::Data>, Self::Error>>> {
            Poll::Ready(self.0.pop_front().map(Ok))
        }

        fn is_end_stream(&self) -> bool {
            self.0.is_empty()
        }
    }

    fn grpc_status(code: tonic::Code) -> HeaderMap {
        let mut headers = HeaderMap::new();
        headers.insert("grpc-status", http::HeaderValue::from(code as i32));
        headers
    }

    /// Replies with one message, then trailers carrying `code`.
    fn streaming_service(code: tonic::Code) -> BoxCloneService<Request<String>, Response<Frames>, Infallible> {
        BoxCloneService::new(service_fn(move |_request: Request<String>| async move {
            let frames = vec![Frame::data(&b"update"[..]), Frame::trailers(grpc_status(code))];
            Ok::<_, Infallible>(Response::new(Frames(frames.into())))
        }))
    }

    /// Replies trailers-only, the way a handler error does.
    fn failing_service(code: tonic::Code) -> BoxCloneService<Request<String>, Response<Frames>, Infallible> {
        BoxCloneService::new(service_fn(move |_request: Request<String>| async move {
            let mut response = Response::new(Frames::default());
            *response.headers_mut() = grpc_status(code);
            Ok::<_, Infallible>(response)
        }))
    }

    fn exit_logger(log: Arc<Mutex<Vec<String>>>) -> RpcInterceptor {
        Arc::new(move |call: RpcCall, next: Next<RpcCall, RpcReply, Status>| {
            let log = log.clone();
            async move {
                log.lock().unwrap().push("enter".to_string());
                let result = next.run(call).await;
                log.lock().unwrap().push(format!("exit {:?}", outcome_code(&result)));
                result
            }
        })
    }

    async fn wait_for_events(log: &Arc<Mutex<Vec<String>>>, count: usize) -> Vec<String> {
        for _ in 0..200 {
            let events = log.lock().unwrap().clone();
            if events.len() >= count {
                return events;
            }
            tokio::time::sleep(Duration::from_millis(5)).await;
        }
        log.lock().unwrap().clone()
    }

    #[tokio::test]
    async fn stream_chain_exits_when_body_ends() {
        let log = Arc::new(Mutex::new(Vec::new()));
        let mut p = pipeline(Side::Server, Vec::new());
        p.stream = vec![exit_logger(log.clone())];
        p.stream_methods.insert("/demo.Echo/Say".to_string());
        let svc = RpcLayer::new(p).layer(streaming_service(tonic::Code::NotFound));

        let response = svc.oneshot(request("hi")).await.unwrap();
        tokio::time::sleep(Duration::from_millis(20)).await;
        assert_eq!(*log.lock().unwrap(), vec!["enter"]);

        let collected = response.into_body().collect().await.unwrap();
        assert_eq!(collected.trailers().unwrap()["grpc-status"], "5");
        assert_eq!(wait_for_events(&log, 2).await, vec!["enter", "exit NotFound"]);
    }

    #[tokio::test]
    async fn dropped_stream_exits_cancelled() {
        let log = Arc::new(Mutex::new(Vec::new()));
        let mut p = pipeline(Side::Server, Vec::new());
        p.stream = vec![exit_logger(log.clone())];
        p.stream_methods.insert("/demo.Echo/Say".to_string());
        let svc = RpcLayer::new(p).layer(streaming_service(tonic::Code::Ok));

        let response = svc.oneshot(request("hi")).await.unwrap();
        drop(response);

        assert_eq!(wait_for_events(&log, 2).await, vec!["enter", "exit Cancelled"]);
    }

    /// Stats handler keeping one line per notification.
    #[derive(Default)]
    struct RecordingStats(Mutex<Vec<String>>);

    impl RecordingStats {
        fn events(&self) -> Vec<String> {
            self.0.lock().unwrap().clone()
        }
    }

    impl StatsHandler for RecordingStats {
        fn handle_begin(&self, call: &RpcCall) {
            self.0.lock().unwrap().push(format!("begin {}", call.method));
        }

        fn handle_end(&self, method: &str, kind: CallKind, _side: Side, code: tonic::Code, _elapsed: Duration) {
            self.0
                .lock()
                .unwrap()
                .push(format!("end {} {} {:?}", method, kind.as_str(), code));
        }
    }

    fn stats_pipeline(tracing_enabled: bool, stats: &Arc<RecordingStats>, unary: Vec<RpcInterceptor>) -> CallPipeline {
        let mut p = pipeline(Side::Server, unary);
        p.tracing_enabled = tracing_enabled;
        p.stats = Some(stats.clone() as Arc<dyn StatsHandler>);
        p
    }

    #[tokio::test]
    async fn stats_see_trailers_only_handler_error() {
        for tracing_enabled in [true, false] {
            let stats = Arc::new(RecordingStats::default());
            let svc = RpcLayer::new(stats_pipeline(tracing_enabled, &stats, Vec::new()))
                .layer(failing_service(tonic::Code::NotFound));

            let response = svc.oneshot(request("hi")).await.unwrap();

            assert_eq!(response.headers()["grpc-status"], "5");
            assert_eq!(
                stats.events(),
                vec!["begin /demo.Echo/Say", "end /demo.Echo/Say unary NotFound"],
                "tracing_enabled={}",
                tracing_enabled
            );
        }
    }

    #[tokio::test]
    async fn stats_see_interceptor_rejection_once() {
        for tracing_enabled in [true, false] {
            let stats = Arc::new(RecordingStats::default());
            let deny: RpcInterceptor = Arc::new(|_call: RpcCall, _next: Next<RpcCall, RpcReply, Status>| async {
                Err::<RpcReply, Status>(Status::permission_denied("nope"))
            });
            let hits = Arc::new(AtomicUsize::new(0));
            let svc = RpcLayer::new(stats_pipeline(tracing_enabled, &stats, vec![deny]))
                .layer(echo_service(hits));

            svc.oneshot(request("hi")).await.unwrap();

            assert_eq!(
                stats.events(),
                vec!["begin /demo.Echo/Say", "end /demo.Echo/Say unary PermissionDenied"],
                "tracing_enabled={}",
                tracing_enabled
            );
        }
    }

    #[tokio::test]
    async fn stats_end_fires_after_stream_trailers() {
        let stats = Arc::new(RecordingStats::default());
        let mut p = stats_pipeline(true, &stats, Vec::new());
        p.stream_methods.insert("/demo.Echo/Say".to_string());
        let svc = RpcLayer::new(p).layer(streaming_service(tonic::Code::Unavailable));

        let response = svc.oneshot(request("hi")).await.unwrap();
        assert_eq!(stats.events(), vec!["begin /demo.Echo/Say"]);

        response.into_body().collect().await.unwrap();
        for _ in 0..200 {
            if stats.events().len() == 2 {
                break;
            }
            tokio::time::sleep(Duration::from_millis(5)).await;
        }
        assert_eq!(
            stats.events(),
            vec!["begin /demo.Echo/Say", "end /demo.Echo/Say stream Unavailable"]
        );
    }
}
