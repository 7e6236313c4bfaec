//! Ordered conduits between a call and its transport.
//!
//! Two halves live here:
//!
//! - [`RequestChannel`] / [`RequestReceiver`]: the outbound request sequence.
//!   Every accepted write is queued in order and acknowledged once the
//!   transport dequeues it.
//! - [`Inbound`] / [`EventStream`]: the inbound delivery queue. Items are
//!   buffered until exactly one consumer claims them, either by pulling
//!   ([`EventStream`]) or by registering a push handler.

use std::collections::VecDeque;
use std::pin::Pin;
use std::sync::Arc;
use std::task::{Context, Poll, Waker};

use bytes::Bytes;
use duplex_rpc_core::Status;
use futures::Stream;
use parking_lot::Mutex;
use tokio::sync::{mpsc, oneshot, watch};

use crate::ClientError;

/// A frame on the request channel, as seen by the transport.
#[derive(Debug, Clone, PartialEq)]
pub enum RequestFrame {
    /// One serialized request message.
    Message(Bytes),
    /// The caller finished sending (half-close).
    HalfClose,
    /// The caller cancelled the call. No further frames follow.
    Reset(Status),
}

type Queued = (RequestFrame, Option<oneshot::Sender<()>>);

/// Sending half of the request channel.
///
/// Owned by the call session. `send` and `complete` are rejected once the
/// channel stopped accepting writes.
#[derive(Debug)]
pub(crate) struct RequestChannel {
    inner: Mutex<RequestState>,
}

#[derive(Debug)]
struct RequestState {
    open: bool,
    tx: Option<mpsc::UnboundedSender<Queued>>,
}

impl RequestChannel {
    pub(crate) fn new() -> (Self, RequestReceiver) {
        let (tx, rx) = mpsc::unbounded_channel();
        let channel = Self {
            inner: Mutex::new(RequestState {
                open: true,
                tx: Some(tx),
            }),
        };
        (channel, RequestReceiver { rx })
    }

    /// Whether `send` and `complete` are still accepted.
    pub(crate) fn is_open(&self) -> bool {
        self.inner.lock().open
    }

    /// Queue one message. The returned receiver fires when the transport
    /// takes the frame.
    pub(crate) fn send(&self, payload: Bytes) -> Result<oneshot::Receiver<()>, ClientError> {
        let state = self.inner.lock();
        if !state.open {
            return Err(ClientError::ChannelClosed);
        }
        push(&state, RequestFrame::Message(payload))
    }

    /// Queue the half-close and stop accepting writes.
    pub(crate) fn complete(&self) -> Result<oneshot::Receiver<()>, ClientError> {
        let mut state = self.inner.lock();
        if !state.open {
            return Err(ClientError::ChannelClosed);
        }
        state.open = false;
        push(&state, RequestFrame::HalfClose)
    }

    /// Queue a reset for the transport, then close the channel.
    pub(crate) fn reset(&self, status: Status) {
        let mut state = self.inner.lock();
        state.open = false;
        if let Some(tx) = state.tx.take() {
            let _ = tx.send((RequestFrame::Reset(status), None));
        }
    }

    /// Close the channel. Frames already queued stay readable by the
    /// transport; acknowledgements for frames it never takes are dropped.
    pub(crate) fn close(&self) {
        let mut state = self.inner.lock();
        state.open = false;
        state.tx = None;
    }
}

fn push(state: &RequestState, frame: RequestFrame) -> Result<oneshot::Receiver<()>, ClientError> {
    let tx = state.tx.as_ref().ok_or(ClientError::ChannelClosed)?;
    let (ack_tx, ack_rx) = oneshot::channel();
    tx.send((frame, Some(ack_tx)))
        .map_err(|_| ClientError::ChannelClosed)?;
    Ok(ack_rx)
}

/// Receiving half of the request channel, held by the transport.
#[derive(Debug)]
pub struct RequestReceiver {
    rx: mpsc::UnboundedReceiver<Queued>,
}

impl RequestReceiver {
    /// Take the next request frame, acknowledging it to the caller.
    ///
    /// Returns `None` once the call closed the channel and every queued
    /// frame has been taken.
    pub async fn recv(&mut self) -> Option<RequestFrame> {
        let (frame, ack) = self.rx.recv().await?;
        if let Some(ack) = ack {
            let _ = ack.send(());
        }
        Some(frame)
    }

    /// Take a frame if one is immediately available.
    pub fn try_recv(&mut self) -> Option<RequestFrame> {
        let (frame, ack) = self.rx.try_recv().ok()?;
        if let Some(ack) = ack {
            let _ = ack.send(());
        }
        Some(frame)
    }
}

type PushHandler<T> = Box<dyn FnMut(T) + Send>;

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
enum Consumer {
    Unclaimed,
    Pull,
    Push,
}

/// Inbound delivery queue with single-consumer discipline.
///
/// Producers [`enqueue`](Inbound::enqueue) under their own ordering lock and
/// call [`flush`](Inbound::flush) once that lock is released. A push handler
/// may re-enter the producer; items enqueued while a handler runs are
/// delivered after it returns, never nested inside it.
///
/// The queue is settled once it is closed and either its consumer took the
/// last item or nobody claims it.
pub(crate) struct Inbound<T> {
    state: Mutex<InboundState<T>>,
    handler: Mutex<Option<PushHandler<T>>>,
    settled: watch::Sender<bool>,
}

struct InboundState<T> {
    queue: VecDeque<T>,
    closed: bool,
    consumer: Consumer,
    dispatching: bool,
    delivered: bool,
    waker: Option<Waker>,
}

impl<T> InboundState<T> {
    fn pop(&mut self) -> Option<T> {
        let item = self.queue.pop_front()?;
        if self.closed && self.queue.is_empty() {
            self.delivered = true;
        }
        Some(item)
    }

    fn is_settled(&self) -> bool {
        self.closed && (self.delivered || self.consumer == Consumer::Unclaimed)
    }
}

impl<T: Send + 'static> Inbound<T> {
    pub(crate) fn new() -> Self {
        Self {
            state: Mutex::new(InboundState {
                queue: VecDeque::new(),
                closed: false,
                consumer: Consumer::Unclaimed,
                dispatching: false,
                delivered: false,
                waker: None,
            }),
            handler: Mutex::new(None),
            settled: watch::channel(false).0,
        }
    }

    fn publish(&self, state: &InboundState<T>) {
        let settled = state.is_settled();
        self.settled.send_if_modified(|current| {
            let changed = *current != settled;
            *current = settled;
            changed
        });
    }

    /// Watch for the queue to settle.
    pub(crate) fn subscribe_settled(&self) -> watch::Receiver<bool> {
        self.settled.subscribe()
    }

    /// Append an item. Returns `false` if the queue was already closed.
    pub(crate) fn enqueue(&self, item: T) -> bool {
        let mut state = self.state.lock();
        if state.closed {
            return false;
        }
        state.queue.push_back(item);
        true
    }

    /// Stop accepting items. Buffered items remain deliverable.
    pub(crate) fn close(&self) {
        let mut state = self.state.lock();
        state.closed = true;
        if state.queue.is_empty() {
            state.delivered = true;
        }
        self.publish(&state);
    }

    /// Hand buffered items to the current consumer.
    pub(crate) fn flush(&self) {
        let mut state = self.state.lock();
        match state.consumer {
            Consumer::Unclaimed => {}
            Consumer::Pull => {
                let waker = state.waker.take();
                drop(state);
                if let Some(waker) = waker {
                    waker.wake();
                }
            }
            Consumer::Push => {
                if state.dispatching {
                    return;
                }
                state.dispatching = true;
                drop(state);
                self.dispatch();
            }
        }
    }

    fn dispatch(&self) {
        loop {
            let item = {
                let mut state = self.state.lock();
                let item = state.pop();
                self.publish(&state);
                match item {
                    Some(item) => item,
                    None => {
                        state.dispatching = false;
                        let finished = state.closed;
                        drop(state);
                        if finished {
                            // Nothing more can arrive; release what the handler captured.
                            let handler = self.handler.lock().take();
                            drop(handler);
                        }
                        return;
                    }
                }
            };
            let mut handler = self.handler.lock();
            if let Some(handler) = handler.as_mut() {
                handler(item);
            }
        }
    }

    pub(crate) fn claim_pull(&self) -> Result<(), ClientError> {
        let mut state = self.state.lock();
        if state.consumer != Consumer::Unclaimed {
            return Err(ClientError::AlreadyConsumed);
        }
        state.consumer = Consumer::Pull;
        self.publish(&state);
        Ok(())
    }

    fn release_pull(&self) {
        let mut state = self.state.lock();
        if state.consumer == Consumer::Pull {
            state.consumer = Consumer::Unclaimed;
            state.waker = None;
            self.publish(&state);
        }
    }

    /// Install a push handler and deliver everything buffered so far.
    ///
    /// `from_pull` is set when an existing pull consumer switches styles.
    pub(crate) fn claim_push(
        &self,
        handler: impl FnMut(T) + Send + 'static,
        from_pull: bool,
    ) -> Result<(), ClientError> {
        {
            let mut state = self.state.lock();
            let allowed = match state.consumer {
                Consumer::Unclaimed => true,
                Consumer::Pull => from_pull,
                Consumer::Push => false,
            };
            if !allowed {
                return Err(ClientError::AlreadyConsumed);
            }
            state.consumer = Consumer::Push;
            state.waker = None;
            state.dispatching = true;
            self.publish(&state);
        }
        *self.handler.lock() = Some(Box::new(handler));
        self.dispatch();
        Ok(())
    }

    fn poll_pull(&self, cx: &mut Context<'_>) -> Poll<Option<T>> {
        let mut state = self.state.lock();
        if let Some(item) = state.pop() {
            self.publish(&state);
            return Poll::Ready(Some(item));
        }
        if state.closed {
            return Poll::Ready(None);
        }
        state.waker = Some(cx.waker().clone());
        Poll::Pending
    }
}

/// Anything that owns an [`Inbound`] queue.
pub(crate) trait InboundSource<T>: Send + Sync + 'static {
    fn inbound(&self) -> &Inbound<T>;
}

/// Pull-style consumer of an inbound queue.
///
/// Ends (`None`) once the queue is closed and drained. Dropping the stream
/// releases the claim.
pub struct EventStream<T: Send + 'static> {
    source: Option<Arc<dyn InboundSource<T>>>,
}

impl<T: Send + 'static> EventStream<T> {
    pub(crate) fn claim(source: Arc<dyn InboundSource<T>>) -> Result<Self, ClientError> {
        source.inbound().claim_pull()?;
        Ok(Self {
            source: Some(source),
        })
    }

    /// Switch to push delivery. Items not yet pulled go to `handler` first.
    pub fn into_push(
        mut self,
        handler: impl FnMut(T) + Send + 'static,
    ) -> Result<(), ClientError> {
        match self.source.take() {
            Some(source) => source.inbound().claim_push(handler, true),
            None => Err(ClientError::AlreadyConsumed),
        }
    }
}

impl<T: Send + 'static> Stream for EventStream<T> {
    type Item = T;

    fn poll_next(self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<Option<T>> {
        match &self.source {
            Some(source) => source.inbound().poll_pull(cx),
            None => Poll::Ready(None),
        }
    }
}

impl<T: Send + 'static> Drop for EventStream<T> {
    fn drop(&mut self) {
        if let Some(source) = self.source.take() {
            source.inbound().release_pull();
        }
    }
}

impl<T: Send + 'static> std::fmt::Debug for EventStream<T> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("EventStream")
            .field("claimed", &self.source.is_some())
            .finish()
    }
}
