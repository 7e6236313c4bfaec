//! Typed response stream.
//!
//! This module provides [`Responses`], the lazy sequence of response
//! messages of a streaming call.
//!
//! # Cancellation
//!
//! Dropping a [`Responses`] only releases the claim on the response
//! sequence; the call continues. Call `cancel()` on the call to stop it, or
//! drop every handle to it.
//!
//! For a deadline, use [`CallOptions::timeout`].
//!
//! [`CallOptions::timeout`]: crate::CallOptions::timeout

use std::marker::PhantomData;
use std::pin::Pin;
use std::task::{Context, Poll, ready};

use duplex_rpc_core::{Metadata, Status};
use futures::Stream;
use prost::Message;
use serde::de::DeserializeOwned;

use crate::channel::EventStream;
use crate::codec::Encoding;
use crate::session::{CallEvent, CallSession};
use crate::ClientError;

/// Response messages of a streaming call.
///
/// Yields `Ok(message)` per response. On an OK termination the stream ends
/// cleanly; otherwise the last item is the `Err` the call failed with.
///
/// # Example
///
/// ```ignore
/// let call = client.server_stream::<Req, Res>(&method, &req)?;
/// let mut responses = call.responses()?;
///
/// while let Some(result) = responses.next().await {
///     match result {
///         Ok(msg) => println!("Got message: {:?}", msg),
///         Err(e) => eprintln!("Error: {:?}", e),
///     }
/// }
///
/// // Trailers resolve once the stream yielded its last item
/// let trailers = responses.trailers().await;
/// ```
pub struct Responses<Res> {
    events: EventStream<CallEvent>,
    session: CallSession,
    encoding: Encoding,
    finished: bool,
    // Set once the call failed; reported when the terminal status arrives.
    failed: Option<ClientError>,
    _marker: PhantomData<fn() -> Res>,
}

impl<Res> Responses<Res> {
    pub(crate) fn new(session: CallSession, encoding: Encoding) -> Result<Self, ClientError> {
        let events = session.events()?;
        Ok(Self {
            events,
            session,
            encoding,
            finished: false,
            failed: None,
            _marker: PhantomData,
        })
    }

    /// Check if the stream has finished.
    pub fn is_finished(&self) -> bool {
        self.finished
    }

    /// Terminal status. Resolves once this stream yielded its last item
    /// (or was switched to push delivery and delivered it).
    pub async fn status(&self) -> Status {
        self.session.settled().await.status().clone()
    }

    /// Trailer metadata. Resolves together with [`status`](Self::status).
    pub async fn trailers(&self) -> Metadata {
        self.session.settled().await.trailers().clone()
    }
}

impl<Res> Responses<Res>
where
    Res: Message + DeserializeOwned + Default + 'static,
{
    /// Switch to push delivery: `handler` receives every message not yet
    /// pulled, then each later one as it arrives.
    ///
    /// Failures reach the caller through the call's status.
    pub fn on_message(
        self,
        mut handler: impl FnMut(Res) + Send + 'static,
    ) -> Result<(), ClientError> {
        let encoding = self.encoding;
        let session = self.session.downgrade();
        self.events.into_push(move |event| {
            if let CallEvent::Message(payload) = event {
                match encoding.decode::<Res>(&payload) {
                    Ok(message) => handler(message),
                    Err(e) => {
                        if let Some(session) = session.upgrade() {
                            session.abort(e);
                        }
                    }
                }
            }
        })
    }

    /// Gracefully drain all remaining messages from the stream.
    ///
    /// Returns the number of messages that were drained (not including errors).
    pub async fn drain(&mut self) -> usize {
        use futures::StreamExt;
        let mut count = 0;
        while let Some(result) = self.next().await {
            if result.is_ok() {
                count += 1;
            }
        }
        count
    }

    /// Gracefully drain remaining messages with a timeout.
    ///
    /// Returns `Ok(count)` if the stream was fully drained, or `Err(count)`
    /// if the timeout expired first.
    pub async fn drain_timeout(&mut self, timeout: std::time::Duration) -> Result<usize, usize> {
        use futures::StreamExt;
        let mut count = 0;
        let deadline = tokio::time::Instant::now() + timeout;

        loop {
            tokio::select! {
                biased;

                _ = tokio::time::sleep_until(deadline) => {
                    return Err(count);
                }

                item = self.next() => {
                    match item {
                        Some(Ok(_)) => count += 1,
                        Some(Err(_)) => {}
                        None => return Ok(count),
                    }
                }
            }
        }
    }
}

impl<Res> Stream for Responses<Res>
where
    Res: Message + DeserializeOwned + Default + 'static,
{
    type Item = Result<Res, ClientError>;

    fn poll_next(mut self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<Option<Self::Item>> {
        let this = &mut *self;
        loop {
            if this.finished {
                return Poll::Ready(None);
            }
            let Some(event) = ready!(Pin::new(&mut this.events).poll_next(cx)) else {
                this.finished = true;
                return Poll::Ready(None);
            };
            // Error and Status are queued together, so after a failure the
            // status is already buffered and the loop does not suspend.
            match event {
                CallEvent::Message(_) if this.failed.is_some() => {}
                CallEvent::Message(payload) => match this.encoding.decode(&payload) {
                    Ok(message) => return Poll::Ready(Some(Ok(message))),
                    Err(e) => {
                        this.session.abort(e.clone());
                        this.failed = Some(e);
                    }
                },
                CallEvent::Error(e) => {
                    if this.failed.is_none() {
                        this.failed = Some(e);
                    }
                }
                CallEvent::Status { .. } => {
                    this.finished = true;
                    return Poll::Ready(this.failed.take().map(Err));
                }
                CallEvent::Headers(_) | CallEvent::End => {}
            }
        }
    }
}

impl<Res> std::fmt::Debug for Responses<Res> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Responses")
            .field("session", &self.session)
            .field("finished", &self.finished)
            .finish()
    }
}
