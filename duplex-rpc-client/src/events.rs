//! Event-driven rendering of a call.
//!
//! An [`EventCall`] turns the session's event sequence into named signals
//! dispatched to registered handlers:
//!
//! | Signal     | Fired                                        |
//! |------------|----------------------------------------------|
//! | `Metadata` | once, with header metadata                   |
//! | `Data`     | per response message                         |
//! | `End`      | once after the last message, OK calls only   |
//! | `Error`    | once, failed calls only                      |
//! | `Status`   | once, with status and trailers               |
//! | `Close`    | once, last; all handlers are removed after it |
//!
//! Delivery is at most once with no replay: a handler registered after its
//! signal fired misses it. Handlers may register or remove handlers, write,
//! or cancel from inside a callback; signals raised that way are delivered
//! after the current one.
//!
//! # Example
//!
//! ```ignore
//! let call = client.bidi_events::<Req, Res>(&method, CallOptions::new(), |call| {
//!     call.on_data(|msg| println!("data: {msg:?}"));
//!     call.on_status(|status, _trailers| println!("status: {status}"));
//! })?;
//! call.write(&request)?;
//! call.end()?;
//! ```

use std::collections::{HashMap, HashSet};
use std::marker::PhantomData;
use std::sync::Arc;

use duplex_rpc_core::{Metadata, Status};
use parking_lot::Mutex;
use prost::Message;
use serde::{Serialize, de::DeserializeOwned};

use crate::ClientError;
use crate::codec::Encoding;
use crate::response::Response;
use crate::session::{CallEvent, CallSession, WeakSession};

/// Signal names handlers subscribe to.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub enum Signal {
    Data,
    Metadata,
    Error,
    Status,
    Close,
    End,
}

/// A signal together with its payload.
#[derive(Debug)]
pub enum Emitted<'a, Res> {
    Data(&'a Res),
    Metadata(&'a Metadata),
    Error(&'a ClientError),
    Status {
        status: &'a Status,
        trailers: &'a Metadata,
    },
    Close,
    End,
}

impl<Res> Emitted<'_, Res> {
    pub fn signal(&self) -> Signal {
        match self {
            Emitted::Data(_) => Signal::Data,
            Emitted::Metadata(_) => Signal::Metadata,
            Emitted::Error(_) => Signal::Error,
            Emitted::Status { .. } => Signal::Status,
            Emitted::Close => Signal::Close,
            Emitted::End => Signal::End,
        }
    }
}

/// Identifies a registered handler, for [`EventCall::off`].
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub struct SubscriptionId(u64);

type Handler<Res> = Box<dyn for<'a> FnMut(&Emitted<'a, Res>) + Send>;
type Completion<Res> = Box<dyn FnOnce(Result<Response<Res>, ClientError>) + Send>;

struct Dispatch<Res> {
    next_id: u64,
    table: HashMap<Signal, Vec<(u64, Handler<Res>)>>,
    // Ids of the list currently checked out for emission.
    checked_out: HashSet<u64>,
    // Checked-out ids removed during emission.
    removed: HashSet<u64>,
    closed: bool,
    completion: Option<Completion<Res>>,
    headers: Metadata,
    message: Option<Res>,
    error: Option<ClientError>,
}

impl<Res> Dispatch<Res> {
    fn new() -> Self {
        Self {
            next_id: 1,
            table: HashMap::new(),
            checked_out: HashSet::new(),
            removed: HashSet::new(),
            closed: false,
            completion: None,
            headers: Metadata::empty(),
            message: None,
            error: None,
        }
    }
}

fn emit<Res>(dispatch: &Mutex<Dispatch<Res>>, event: &Emitted<'_, Res>) {
    let signal = event.signal();
    let mut handlers = {
        let mut d = dispatch.lock();
        if d.closed {
            return;
        }
        let handlers = d.table.remove(&signal).unwrap_or_default();
        d.checked_out = handlers.iter().map(|(id, _)| *id).collect();
        handlers
    };

    for (id, handler) in handlers.iter_mut() {
        if dispatch.lock().removed.contains(&*id) {
            continue;
        }
        handler(event);
    }

    let mut d = dispatch.lock();
    d.checked_out.clear();
    let removed = std::mem::take(&mut d.removed);
    handlers.retain(|(id, _)| !removed.contains(id));
    if d.closed {
        return;
    }
    // Handlers registered during emission go after the existing ones.
    if let Some(added) = d.table.remove(&signal) {
        handlers.extend(added);
    }
    if !handlers.is_empty() {
        d.table.insert(signal, handlers);
    }
}

/// Event-driven handle to one call.
pub struct EventCall<Req, Res> {
    session: CallSession,
    encoding: Encoding,
    dispatch: Arc<Mutex<Dispatch<Res>>>,
    _marker: PhantomData<fn(Req)>,
}

impl<Req, Res> EventCall<Req, Res>
where
    Req: Message + Serialize,
    Res: Message + DeserializeOwned + Default + 'static,
{
    /// Wrap a session. Signals are held back until [`attach`](Self::attach).
    pub(crate) fn new(session: CallSession, encoding: Encoding) -> Self {
        Self {
            session,
            encoding,
            dispatch: Arc::new(Mutex::new(Dispatch::new())),
            _marker: PhantomData,
        }
    }

    /// Start dispatching: everything the session buffered so far is
    /// delivered to the handlers registered until now.
    pub(crate) fn attach(&self) -> Result<(), ClientError> {
        let dispatch = self.dispatch.clone();
        let encoding = self.encoding;
        let session = self.session.downgrade();
        let single = !self.session.method().shape().streams_responses();
        self.session.on_event(move |event| {
            deliver(&dispatch, encoding, &session, single, event);
        })
    }

    /// Register `handler` for `signal`. Handlers run in registration order.
    pub fn on(
        &self,
        signal: Signal,
        handler: impl for<'a> FnMut(&Emitted<'a, Res>) + Send + 'static,
    ) -> SubscriptionId {
        let mut d = self.dispatch.lock();
        let id = d.next_id;
        d.next_id += 1;
        if !d.closed {
            d.table
                .entry(signal)
                .or_default()
                .push((id, Box::new(handler)));
        }
        SubscriptionId(id)
    }

    /// Remove a handler. Returns `false` if it was not registered.
    pub fn off(&self, id: SubscriptionId) -> bool {
        let mut d = self.dispatch.lock();
        for handlers in d.table.values_mut() {
            if let Some(pos) = handlers.iter().position(|(h, _)| *h == id.0) {
                drop(handlers.remove(pos));
                return true;
            }
        }
        if d.checked_out.contains(&id.0) {
            d.removed.insert(id.0)
        } else {
            false
        }
    }

    /// Per response message.
    pub fn on_data(&self, mut handler: impl FnMut(&Res) + Send + 'static) -> SubscriptionId {
        self.on(Signal::Data, move |event| {
            if let Emitted::Data(message) = event {
                handler(*message);
            }
        })
    }

    /// Once, with header metadata.
    pub fn on_metadata(
        &self,
        mut handler: impl FnMut(&Metadata) + Send + 'static,
    ) -> SubscriptionId {
        self.on(Signal::Metadata, move |event| {
            if let Emitted::Metadata(metadata) = event {
                handler(*metadata);
            }
        })
    }

    /// Once, if the call fails.
    pub fn on_error(
        &self,
        mut handler: impl FnMut(&ClientError) + Send + 'static,
    ) -> SubscriptionId {
        self.on(Signal::Error, move |event| {
            if let Emitted::Error(error) = event {
                handler(*error);
            }
        })
    }

    /// Once, with the terminal status and trailers.
    pub fn on_status(
        &self,
        mut handler: impl FnMut(&Status, &Metadata) + Send + 'static,
    ) -> SubscriptionId {
        self.on(Signal::Status, move |event| {
            if let Emitted::Status { status, trailers } = event {
                handler(*status, *trailers);
            }
        })
    }

    /// Once, after the last message of a successful call.
    pub fn on_end(&self, mut handler: impl FnMut() + Send + 'static) -> SubscriptionId {
        self.on(Signal::End, move |_| handler())
    }

    /// Once, after the status.
    pub fn on_close(&self, mut handler: impl FnMut() + Send + 'static) -> SubscriptionId {
        self.on(Signal::Close, move |_| handler())
    }

    /// Completion callback for unary and client-streaming calls, invoked once
    /// at termination with the response or the error.
    pub fn on_response(
        &self,
        callback: impl FnOnce(Result<Response<Res>, ClientError>) + Send + 'static,
    ) -> Result<(), ClientError> {
        if self.session.method().shape().streams_responses() {
            return Err(ClientError::InvalidCall(format!(
                "{} streams its responses; register a data handler instead",
                self.session.method()
            )));
        }
        let mut d = self.dispatch.lock();
        if d.closed {
            return Err(ClientError::ChannelClosed);
        }
        d.completion = Some(Box::new(callback));
        Ok(())
    }

    /// Send one request without waiting for the transport to accept it.
    pub fn write(&self, message: &Req) -> Result<(), ClientError> {
        let payload = self.encoding.encode(message)?;
        // Accepted frames stay queued; the acknowledgement is not needed.
        drop(self.session.send(payload)?);
        Ok(())
    }

    /// Half-close the request side.
    pub fn end(&self) -> Result<(), ClientError> {
        drop(self.session.complete()?);
        Ok(())
    }

    /// Cancel the call with `CANCELLED`. Idempotent.
    pub fn cancel(&self) {
        self.session.cancel()
    }

    /// Whether `close` has fired.
    pub fn is_closed(&self) -> bool {
        self.dispatch.lock().closed
    }

    /// The underlying session.
    pub fn session(&self) -> &CallSession {
        &self.session
    }
}

impl<Req, Res> std::fmt::Debug for EventCall<Req, Res> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("EventCall")
            .field("session", &self.session)
            .finish()
    }
}

fn deliver<Res>(
    dispatch: &Mutex<Dispatch<Res>>,
    encoding: Encoding,
    session: &WeakSession,
    single: bool,
    event: CallEvent,
) where
    Res: Message + DeserializeOwned + Default,
{
    match event {
        CallEvent::Headers(metadata) => {
            dispatch.lock().headers = metadata.clone();
            emit(dispatch, &Emitted::Metadata(&metadata));
        }
        CallEvent::Message(payload) => match encoding.decode::<Res>(&payload) {
            Ok(message) => {
                emit(dispatch, &Emitted::Data(&message));
                if single {
                    dispatch.lock().message = Some(message);
                }
            }
            Err(e) => {
                if let Some(session) = session.upgrade() {
                    session.abort(e);
                }
            }
        },
        CallEvent::End => emit(dispatch, &Emitted::End),
        CallEvent::Error(error) => {
            dispatch.lock().error = Some(error.clone());
            emit(dispatch, &Emitted::Error(&error));
        }
        CallEvent::Status { status, trailers } => {
            let completion = {
                let mut d = dispatch.lock();
                d.completion
                    .take()
                    .map(|cb| (cb, d.message.take(), d.error.take(), d.headers.clone()))
            };
            if let Some((callback, message, error, headers)) = completion {
                let result = match (error, message) {
                    (Some(error), _) => Err(error),
                    (None, Some(message)) => Ok(Response::new(
                        message,
                        headers,
                        trailers.clone(),
                        status.clone(),
                    )),
                    (None, None) => Err(ClientError::Protocol(
                        "call completed without a response message".into(),
                    )),
                };
                callback(result);
            }

            emit(
                dispatch,
                &Emitted::Status {
                    status: &status,
                    trailers: &trailers,
                },
            );
            emit(dispatch, &Emitted::Close);

            let handlers = {
                let mut d = dispatch.lock();
                d.closed = true;
                d.checked_out.clear();
                d.removed.clear();
                std::mem::take(&mut d.table)
            };
            drop(handlers);
        }
    }
}
