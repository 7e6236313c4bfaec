//! Per-call state machine.
//!
//! A [`CallSession`] is created together with the transport-side
//! [`TransportCall`] by [`CallSession::pair`]. The session owns the request
//! channel and the inbound event queue; the transport feeds it through the
//! [`CallDriver`].
//!
//! # Lifecycle
//!
//! ```text
//! Opening --admit/headers/message--> Active --finish/fail/cancel--> Terminated
//! Opening --finish/fail/cancel-----------------------------------> Terminated
//! ```
//!
//! Termination happens exactly once. A call that ends OK yields
//! `End` then `Status`; any other ending yields `Error` then `Status`.
//! Nothing is delivered after `Status`.

use std::future::Future;
use std::sync::{Arc, Weak};
use std::time::Duration;

use bytes::Bytes;
use duplex_rpc_core::{Metadata, MethodDescriptor, Status};
use parking_lot::Mutex;
use tokio::sync::{oneshot, watch};
use tracing::Span;

use crate::ClientError;
use crate::channel::{EventStream, Inbound, InboundSource, RequestChannel};
use crate::transport::{RequestHead, TransportCall};

/// Where a call is in its lifecycle.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum Lifecycle {
    /// Handed to the transport, not yet admitted.
    Opening,
    /// Admitted by the transport. Messages may flow in both directions.
    Active,
    /// Finished, failed or cancelled. Final.
    Terminated,
}

/// One inbound signal, in delivery order.
#[derive(Clone, Debug)]
pub enum CallEvent {
    /// Header metadata sent by the peer, at most once and before any
    /// message.
    Headers(Metadata),
    /// One serialized response message.
    Message(Bytes),
    /// The call ended with an OK status.
    End,
    /// The call ended with a non-OK status.
    Error(ClientError),
    /// Terminal status and trailers. Always the last event.
    Status { status: Status, trailers: Metadata },
}

/// How a call terminated.
#[derive(Clone, Debug)]
pub struct Termination {
    status: Status,
    trailers: Metadata,
    error: Option<ClientError>,
}

impl Termination {
    /// The terminal status.
    pub fn status(&self) -> &Status {
        &self.status
    }

    /// Trailer metadata. Empty unless the peer finished the call.
    pub fn trailers(&self) -> &Metadata {
        &self.trailers
    }

    /// The error the call failed with, `None` when it ended OK.
    pub fn error(&self) -> Option<&ClientError> {
        self.error.as_ref()
    }

    pub fn is_ok(&self) -> bool {
        self.error.is_none()
    }

    /// Error for an acknowledgement still pending at termination.
    fn pending_error(&self) -> ClientError {
        self.error.clone().unwrap_or(ClientError::ChannelClosed)
    }
}

enum Cause {
    Peer(Status),
    Transport(String),
    Cancelled(Status),
    Protocol(String),
    Local(ClientError),
}

type ReleaseHook = Box<dyn FnOnce() + Send>;

struct SessionState {
    lifecycle: Lifecycle,
    headers_received: bool,
    responses: usize,
    release: Vec<ReleaseHook>,
}

struct Shared {
    id: u64,
    method: MethodDescriptor,
    state: Mutex<SessionState>,
    requests: RequestChannel,
    inbound: Inbound<CallEvent>,
    headers: watch::Sender<Option<Metadata>>,
    terminal: watch::Sender<Option<Termination>>,
    span: Span,
}

impl InboundSource<CallEvent> for Shared {
    fn inbound(&self) -> &Inbound<CallEvent> {
        &self.inbound
    }
}

impl Shared {
    fn admit_locked(&self, state: &mut SessionState) {
        if state.lifecycle == Lifecycle::Opening {
            state.lifecycle = Lifecycle::Active;
            tracing::debug!(parent: &self.span, "call admitted");
        }
    }

    fn admit(&self) {
        let mut state = self.state.lock();
        self.admit_locked(&mut state);
    }

    fn deliver_headers(&self, metadata: Metadata) {
        {
            let mut state = self.state.lock();
            if state.lifecycle == Lifecycle::Terminated {
                tracing::trace!(parent: &self.span, "header metadata after termination ignored");
                return;
            }
            if state.headers_received {
                tracing::trace!(parent: &self.span, "duplicate header metadata ignored");
                return;
            }
            self.admit_locked(&mut state);
            state.headers_received = true;
            self.headers.send_replace(Some(metadata.clone()));
            self.inbound.enqueue(CallEvent::Headers(metadata));
        }
        self.inbound.flush();
    }

    fn deliver_message(&self, payload: Bytes) {
        {
            let mut state = self.state.lock();
            if state.lifecycle == Lifecycle::Terminated {
                tracing::trace!(parent: &self.span, "response message after termination ignored");
                return;
            }
            if !self.method.shape().streams_responses() && state.responses > 0 {
                drop(state);
                self.terminate(
                    Cause::Protocol(
                        "received a second response message on a single-response call".into(),
                    ),
                    Metadata::empty(),
                );
                return;
            }
            self.admit_locked(&mut state);
            if !state.headers_received {
                // The slot resolves empty; no event, the peer sent none.
                state.headers_received = true;
                self.headers.send_replace(Some(Metadata::empty()));
            }
            state.responses += 1;
            self.inbound.enqueue(CallEvent::Message(payload));
        }
        self.inbound.flush();
    }

    /// Move to `Terminated`. Returns `false` if the call already was.
    fn terminate(&self, cause: Cause, trailers: Metadata) -> bool {
        let (hooks, status, reset) = {
            let mut state = self.state.lock();
            if state.lifecycle == Lifecycle::Terminated {
                return false;
            }
            state.lifecycle = Lifecycle::Terminated;

            let single = !self.method.shape().streams_responses();
            let mut reset = false;
            let (status, error) = match cause {
                Cause::Peer(status) if status.is_ok() && single && state.responses == 0 => {
                    let message = "peer finished without sending a response message";
                    (
                        Status::internal(message),
                        Some(ClientError::Protocol(message.into())),
                    )
                }
                Cause::Peer(status) if status.is_ok() => (status, None),
                Cause::Peer(status) => (status.clone(), Some(ClientError::Status(status))),
                Cause::Transport(message) => (
                    Status::unavailable(message.clone()),
                    Some(ClientError::Transport(message)),
                ),
                Cause::Cancelled(status) => {
                    reset = true;
                    (status.clone(), Some(ClientError::Cancelled(status)))
                }
                Cause::Protocol(message) => (
                    Status::internal(message.clone()),
                    Some(ClientError::Protocol(message)),
                ),
                Cause::Local(error) => {
                    reset = true;
                    (error.status(), Some(error))
                }
            };

            if !state.headers_received {
                self.headers.send_replace(Some(Metadata::empty()));
            }
            match &error {
                None => self.inbound.enqueue(CallEvent::End),
                Some(error) => self.inbound.enqueue(CallEvent::Error(error.clone())),
            };
            self.inbound.enqueue(CallEvent::Status {
                status: status.clone(),
                trailers: trailers.clone(),
            });
            self.inbound.close();
            self.terminal.send_replace(Some(Termination {
                status: status.clone(),
                trailers,
                error,
            }));
            (std::mem::take(&mut state.release), status, reset)
        };

        if reset {
            self.requests.reset(status.clone());
        } else {
            self.requests.close();
        }
        tracing::debug!(
            parent: &self.span,
            code = %status.code(),
            message = status.message(),
            "call terminated"
        );
        self.inbound.flush();
        for hook in hooks {
            hook();
        }
        true
    }

    fn on_release(&self, hook: ReleaseHook) {
        let mut state = self.state.lock();
        if state.lifecycle == Lifecycle::Terminated {
            drop(state);
            hook();
        } else {
            state.release.push(hook);
        }
    }
}

impl Drop for Shared {
    fn drop(&mut self) {
        let hooks = {
            let state = self.state.get_mut();
            if state.lifecycle == Lifecycle::Terminated {
                return;
            }
            state.lifecycle = Lifecycle::Terminated;
            std::mem::take(&mut state.release)
        };
        tracing::debug!(parent: &self.span, call.id = self.id, "call dropped before termination");
        self.requests.reset(Status::cancelled("call dropped"));
        for hook in hooks {
            hook();
        }
    }
}

/// Caller-side handle to one call.
///
/// Cloning yields another handle to the same call. The call is cancelled
/// when the last handle is dropped before it terminated.
#[derive(Clone)]
pub struct CallSession {
    shared: Arc<Shared>,
}

impl CallSession {
    /// Create a session and the matching transport-side call.
    ///
    /// Transports call this from [`Transport::open`](crate::Transport::open).
    /// When `head` carries a timeout and a tokio runtime is available, the
    /// call is cancelled with `DEADLINE_EXCEEDED` once it elapses.
    pub fn pair(id: u64, method: MethodDescriptor, head: RequestHead) -> (Self, TransportCall) {
        let span = tracing::info_span!(
            "rpc.call",
            rpc.service = %method.service(),
            rpc.method = %method.method(),
            rpc.type = method.shape().as_str(),
            otel.kind = "client",
            call.id = id,
        );
        let (requests, receiver) = RequestChannel::new();
        let (headers, _) = watch::channel(None);
        let (terminal, _) = watch::channel(None);
        let shared = Arc::new(Shared {
            id,
            method: method.clone(),
            state: Mutex::new(SessionState {
                lifecycle: Lifecycle::Opening,
                headers_received: false,
                responses: 0,
                release: Vec::new(),
            }),
            requests,
            inbound: Inbound::new(),
            headers,
            terminal,
            span,
        });

        if let Some(timeout) = head.timeout() {
            arm_deadline(&shared, timeout);
        }

        let driver = CallDriver {
            id,
            shared: Arc::downgrade(&shared),
        };
        let call = TransportCall::new(method, head, receiver, driver);
        (Self { shared }, call)
    }

    pub fn id(&self) -> u64 {
        self.shared.id
    }

    pub fn method(&self) -> &MethodDescriptor {
        &self.shared.method
    }

    pub fn lifecycle(&self) -> Lifecycle {
        self.shared.state.lock().lifecycle
    }

    pub fn is_terminated(&self) -> bool {
        self.lifecycle() == Lifecycle::Terminated
    }

    /// Whether `send` and `complete` are still accepted.
    pub fn requests_open(&self) -> bool {
        self.shared.requests.is_open()
    }

    /// Whether header metadata has been received (or synthesized).
    pub fn headers_received(&self) -> bool {
        self.shared.state.lock().headers_received
    }

    /// Queue one request message.
    ///
    /// Fails immediately with [`ClientError::ChannelClosed`] after
    /// `complete()` or termination. Otherwise the returned future resolves
    /// once the transport accepted the message, or fails if the call
    /// terminates first.
    pub fn send(
        &self,
        payload: Bytes,
    ) -> Result<impl Future<Output = Result<(), ClientError>> + Send + 'static, ClientError> {
        let ack = self.shared.requests.send(payload)?;
        Ok(self.settle(ack))
    }

    /// Half-close the request channel.
    ///
    /// Same failure rules as [`send`](Self::send).
    pub fn complete(
        &self,
    ) -> Result<impl Future<Output = Result<(), ClientError>> + Send + 'static, ClientError> {
        let ack = self.shared.requests.complete()?;
        Ok(self.settle(ack))
    }

    fn settle(
        &self,
        ack: oneshot::Receiver<()>,
    ) -> impl Future<Output = Result<(), ClientError>> + Send + 'static {
        let mut terminal = self.shared.terminal.subscribe();
        async move {
            let acked = tokio::select! {
                biased;
                acked = ack => acked.is_ok(),
                _ = terminal.wait_for(Option::is_some) => false,
            };
            if acked {
                return Ok(());
            }
            let error = match &*terminal.borrow() {
                Some(termination) => termination.pending_error(),
                None => ClientError::ChannelClosed,
            };
            Err(error)
        }
    }

    /// Cancel the call with `CANCELLED`. Idempotent.
    pub fn cancel(&self) {
        if self.shared.terminate(
            Cause::Cancelled(Status::cancelled("cancelled by caller")),
            Metadata::empty(),
        ) {
            tracing::debug!(parent: &self.shared.span, "call cancelled");
        }
    }

    /// Fail the call locally, for example after a response failed to decode.
    pub(crate) fn abort(&self, error: ClientError) {
        self.shared.terminate(Cause::Local(error), Metadata::empty());
    }

    /// Header metadata. Resolves to empty metadata if the call terminated
    /// without any.
    pub async fn headers(&self) -> Metadata {
        let mut rx = self.shared.headers.subscribe();
        match rx.wait_for(Option::is_some).await {
            Ok(headers) => headers.clone().unwrap_or_default(),
            Err(_) => Metadata::empty(),
        }
    }

    /// Header metadata, if already known.
    pub fn try_headers(&self) -> Option<Metadata> {
        self.shared.headers.borrow().clone()
    }

    /// Wait for termination.
    pub async fn terminated(&self) -> Termination {
        let mut rx = self.shared.terminal.subscribe();
        let done = match rx.wait_for(Option::is_some).await {
            Ok(done) => done.clone(),
            Err(_) => None,
        };
        // The sender lives as long as `self`, so `wait_for` only returns
        // once a termination was published.
        done.unwrap_or_else(|| Termination {
            status: Status::cancelled("call dropped"),
            trailers: Metadata::empty(),
            error: Some(ClientError::Cancelled(Status::cancelled("call dropped"))),
        })
    }

    /// Wait for termination, and for the consumer of the event sequence,
    /// if one holds it, to take the terminal `Status` event.
    ///
    /// With no consumer this resolves together with
    /// [`terminated`](Self::terminated).
    pub async fn settled(&self) -> Termination {
        let mut rx = self.shared.inbound.subscribe_settled();
        let _ = rx.wait_for(|settled| *settled).await;
        self.terminated().await
    }

    /// The termination, if the call already ended.
    pub fn termination(&self) -> Option<Termination> {
        self.shared.terminal.borrow().clone()
    }

    /// Consume inbound events by pulling.
    pub fn events(&self) -> Result<EventStream<CallEvent>, ClientError> {
        EventStream::claim(self.shared.clone())
    }

    /// Consume inbound events by push. Buffered events are delivered before
    /// this returns.
    pub fn on_event(
        &self,
        handler: impl FnMut(CallEvent) + Send + 'static,
    ) -> Result<(), ClientError> {
        self.shared.inbound.claim_push(handler, false)
    }

    pub(crate) fn downgrade(&self) -> WeakSession {
        WeakSession(Arc::downgrade(&self.shared))
    }

    pub(crate) fn span(&self) -> &Span {
        &self.shared.span
    }
}

impl std::fmt::Debug for CallSession {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("CallSession")
            .field("id", &self.shared.id)
            .field("method", &self.shared.method)
            .field("lifecycle", &self.lifecycle())
            .finish()
    }
}

/// Non-owning handle, for callbacks stored inside the call itself.
#[derive(Clone)]
pub(crate) struct WeakSession(Weak<Shared>);

impl WeakSession {
    pub(crate) fn upgrade(&self) -> Option<CallSession> {
        self.0.upgrade().map(|shared| CallSession { shared })
    }
}

fn arm_deadline(shared: &Arc<Shared>, timeout: Duration) {
    let Ok(runtime) = tokio::runtime::Handle::try_current() else {
        tracing::warn!(parent: &shared.span, "no tokio runtime, deadline not enforced");
        return;
    };
    let weak = Arc::downgrade(shared);
    let mut terminal = shared.terminal.subscribe();
    runtime.spawn(async move {
        tokio::select! {
            _ = tokio::time::sleep(timeout) => {
                if let Some(shared) = weak.upgrade() {
                    shared.terminate(
                        Cause::Cancelled(Status::deadline_exceeded("deadline exceeded")),
                        Metadata::empty(),
                    );
                }
            }
            _ = terminal.wait_for(Option::is_some) => {}
        }
    });
}

/// Transport-side handle that feeds a call.
///
/// Holds no ownership: once every caller handle is gone, all methods are
/// no-ops.
#[derive(Clone)]
pub struct CallDriver {
    id: u64,
    shared: Weak<Shared>,
}

impl CallDriver {
    pub fn id(&self) -> u64 {
        self.id
    }

    /// Mark the call as accepted by the transport.
    pub fn admit(&self) {
        if let Some(shared) = self.shared.upgrade() {
            shared.admit();
        }
    }

    /// Deliver header metadata. Ignored after the first delivery, after a
    /// message, or after termination.
    pub fn send_headers(&self, metadata: Metadata) {
        if let Some(shared) = self.shared.upgrade() {
            shared.deliver_headers(metadata);
        }
    }

    /// Deliver one response message.
    pub fn send_message(&self, payload: Bytes) {
        if let Some(shared) = self.shared.upgrade() {
            shared.deliver_message(payload);
        }
    }

    /// Finish the call with the peer's status and trailers.
    pub fn finish(&self, status: Status, trailers: Metadata) {
        if let Some(shared) = self.shared.upgrade() {
            shared.terminate(Cause::Peer(status), trailers);
        }
    }

    /// Fail the call with a transport error (`UNAVAILABLE`).
    pub fn fail(&self, message: impl Into<String>) {
        if let Some(shared) = self.shared.upgrade() {
            shared.terminate(Cause::Transport(message.into()), Metadata::empty());
        }
    }

    /// Whether the call ended or every caller handle was dropped.
    pub fn is_terminated(&self) -> bool {
        match self.shared.upgrade() {
            Some(shared) => shared.state.lock().lifecycle == Lifecycle::Terminated,
            None => true,
        }
    }

    /// Wait until the call ended or was dropped.
    pub async fn terminated(&self) {
        let mut rx = match self.shared.upgrade() {
            Some(shared) => shared.terminal.subscribe(),
            None => return,
        };
        let _ = rx.wait_for(Option::is_some).await;
    }

    /// Run `hook` once the call ends. Runs immediately if it already has.
    pub fn on_release(&self, hook: impl FnOnce() + Send + 'static) {
        match self.shared.upgrade() {
            Some(shared) => shared.on_release(Box::new(hook)),
            None => hook(),
        }
    }
}

impl std::fmt::Debug for CallDriver {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("CallDriver").field("id", &self.id).finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::RequestFrame;
    use duplex_rpc_core::Code;
    use futures::StreamExt;

    fn open(method: MethodDescriptor) -> (CallSession, TransportCall) {
        CallSession::pair(1, method, RequestHead::default())
    }

    fn bidi() -> MethodDescriptor {
        MethodDescriptor::bidi("test.Service", "Bidi")
    }

    fn unary() -> MethodDescriptor {
        MethodDescriptor::unary("test.Service", "Unary")
    }

    async fn collect(session: &CallSession) -> Vec<CallEvent> {
        session.events().unwrap().collect().await
    }

    fn kinds(events: &[CallEvent]) -> Vec<&'static str> {
        events
            .iter()
            .map(|e| match e {
                CallEvent::Headers(_) => "headers",
                CallEvent::Message(_) => "message",
                CallEvent::End => "end",
                CallEvent::Error(_) => "error",
                CallEvent::Status { .. } => "status",
            })
            .collect()
    }

    #[tokio::test]
    async fn test_lifecycle_transitions() {
        let (session, call) = open(bidi());
        assert_eq!(session.lifecycle(), Lifecycle::Opening);
        call.driver().admit();
        assert_eq!(session.lifecycle(), Lifecycle::Active);
        call.driver().finish(Status::ok(), Metadata::empty());
        assert_eq!(session.lifecycle(), Lifecycle::Terminated);
        assert!(call.driver().is_terminated());
    }

    #[tokio::test]
    async fn test_successful_call_event_order() {
        let (session, call) = open(bidi());
        let driver = call.driver().clone();
        let mut md = Metadata::empty();
        md.insert("x-h", "1").unwrap();
        driver.send_headers(md);
        driver.send_message(Bytes::from_static(b"a"));
        driver.send_message(Bytes::from_static(b"b"));
        driver.finish(Status::ok(), Metadata::empty());

        let events = collect(&session).await;
        assert_eq!(
            kinds(&events),
            vec!["headers", "message", "message", "end", "status"]
        );
        assert_eq!(session.headers().await.get("x-h"), Some("1"));
    }

    #[tokio::test]
    async fn test_failed_call_has_error_not_end() {
        let (session, call) = open(bidi());
        call.driver().send_message(Bytes::from_static(b"a"));
        call.driver().fail("connection reset");

        let events = collect(&session).await;
        assert_eq!(kinds(&events), vec!["message", "error", "status"]);
        let done = session.terminated().await;
        assert_eq!(done.status().code(), Code::Unavailable);
        assert!(matches!(done.error(), Some(ClientError::Transport(_))));
    }

    #[tokio::test]
    async fn test_message_before_headers_synthesizes_empty_headers() {
        let (session, call) = open(bidi());
        call.driver().send_message(Bytes::from_static(b"a"));
        assert!(session.headers_received());
        assert!(session.headers().await.is_empty());

        let mut late = Metadata::empty();
        late.insert("x-late", "1").unwrap();
        call.driver().send_headers(late);
        assert!(session.try_headers().unwrap().is_empty());

        call.driver().finish(Status::ok(), Metadata::empty());
        assert_eq!(kinds(&collect(&session).await), vec!["message", "end", "status"]);
    }

    #[tokio::test]
    async fn test_headers_resolve_empty_on_termination() {
        let (session, call) = open(bidi());
        call.driver().fail("boom");
        assert!(session.headers().await.is_empty());
        assert!(!session.headers_received());
    }

    #[tokio::test]
    async fn test_nothing_delivered_after_status() {
        let (session, call) = open(bidi());
        let driver = call.driver().clone();
        driver.finish(Status::not_found("nope"), Metadata::empty());
        driver.send_message(Bytes::from_static(b"late"));
        driver.finish(Status::ok(), Metadata::empty());
        driver.fail("late failure");

        let events = collect(&session).await;
        assert_eq!(kinds(&events), vec!["error", "status"]);
        assert_eq!(
            session.termination().unwrap().status().code(),
            Code::NotFound
        );
    }

    #[tokio::test]
    async fn test_second_single_response_is_protocol_error() {
        let (session, call) = open(unary());
        call.driver().send_message(Bytes::from_static(b"one"));
        call.driver().send_message(Bytes::from_static(b"two"));

        let done = session.terminated().await;
        assert_eq!(done.status().code(), Code::Internal);
        assert!(matches!(done.error(), Some(ClientError::Protocol(_))));
    }

    #[tokio::test]
    async fn test_single_response_missing_is_protocol_error() {
        let (session, call) = open(unary());
        call.driver().finish(Status::ok(), Metadata::empty());
        let done = session.terminated().await;
        assert_eq!(done.status().code(), Code::Internal);
    }

    #[tokio::test]
    async fn test_cancel_is_idempotent() {
        let (session, mut call) = open(bidi());
        session.cancel();
        session.cancel();

        let events = collect(&session).await;
        assert_eq!(kinds(&events), vec!["error", "status"]);
        assert_eq!(
            session.termination().unwrap().status().code(),
            Code::Cancelled
        );
        assert!(matches!(
            call.requests().recv().await,
            Some(RequestFrame::Reset(_))
        ));
    }

    #[tokio::test]
    async fn test_send_after_complete_fails_immediately() {
        let (session, mut call) = open(bidi());
        let sent = session.send(Bytes::from_static(b"a")).unwrap();
        let completed = session.complete().unwrap();
        assert!(matches!(
            session.send(Bytes::from_static(b"b")),
            Err(ClientError::ChannelClosed)
        ));

        assert!(matches!(call.requests().recv().await, Some(RequestFrame::Message(_))));
        assert_eq!(call.requests().recv().await, Some(RequestFrame::HalfClose));
        sent.await.unwrap();
        completed.await.unwrap();
    }

    #[tokio::test]
    async fn test_pending_ack_fails_on_termination() {
        let (session, call) = open(bidi());
        let sent = session.send(Bytes::from_static(b"a")).unwrap();
        call.driver().finish(Status::unavailable("gone"), Metadata::empty());

        let err = sent.await.unwrap_err();
        assert_eq!(err.code(), Code::Unavailable);
        assert!(matches!(
            session.send(Bytes::new()),
            Err(ClientError::ChannelClosed)
        ));
    }

    #[tokio::test]
    async fn test_release_hook_runs_once() {
        use std::sync::atomic::{AtomicUsize, Ordering};

        let (session, call) = open(bidi());
        let count = Arc::new(AtomicUsize::new(0));
        let counter = count.clone();
        call.driver().on_release(move || {
            counter.fetch_add(1, Ordering::SeqCst);
        });
        session.cancel();
        call.driver().finish(Status::ok(), Metadata::empty());
        assert_eq!(count.load(Ordering::SeqCst), 1);

        let counter = count.clone();
        call.driver().on_release(move || {
            counter.fetch_add(1, Ordering::SeqCst);
        });
        assert_eq!(count.load(Ordering::SeqCst), 2);
    }

    #[tokio::test]
    async fn test_dropping_session_resets_transport() {
        let (session, mut call) = open(bidi());
        drop(session);
        assert!(call.driver().is_terminated());
        assert!(matches!(
            call.requests().recv().await,
            Some(RequestFrame::Reset(_))
        ));
        call.driver().send_message(Bytes::from_static(b"ignored"));
    }

    #[tokio::test(start_paused = true)]
    async fn test_deadline_cancels_call() {
        let head = RequestHead::default().with_timeout(Duration::from_millis(50));
        let (session, _call) = CallSession::pair(7, bidi(), head);

        let done = session.terminated().await;
        assert_eq!(done.status().code(), Code::DeadlineExceeded);
        assert!(done.error().unwrap().is_cancelled());
    }

    #[tokio::test]
    async fn test_push_handler_sees_every_event() {
        let (session, call) = open(bidi());
        call.driver().send_message(Bytes::from_static(b"early"));

        let seen = Arc::new(Mutex::new(Vec::new()));
        let sink = seen.clone();
        session
            .on_event(move |event| sink.lock().push(event))
            .unwrap();
        call.driver().finish(Status::ok(), Metadata::empty());

        assert_eq!(
            kinds(&seen.lock()),
            vec!["message", "end", "status"]
        );
        assert!(matches!(session.events(), Err(ClientError::AlreadyConsumed)));
    }

    #[tokio::test]
    async fn test_cancel_from_push_handler() {
        let (session, call) = open(bidi());
        let seen = Arc::new(Mutex::new(Vec::new()));
        let sink = seen.clone();
        let weak = session.downgrade();
        session
            .on_event(move |event| {
                if matches!(event, CallEvent::Message(_)) {
                    if let Some(session) = weak.upgrade() {
                        session.cancel();
                    }
                }
                sink.lock().push(event);
            })
            .unwrap();

        call.driver().send_message(Bytes::from_static(b"a"));
        call.driver().send_message(Bytes::from_static(b"b"));

        assert_eq!(
            kinds(&seen.lock()),
            vec!["message", "error", "status"]
        );
    }
}
