//! Future/stream rendering of a call.
//!
//! One type per call shape, each a thin adapter over a [`CallSession`]:
//!
//! | Shape            | Type                          | Requests          | Responses            |
//! |------------------|-------------------------------|-------------------|----------------------|
//! | unary            | [`UnaryCall`]                 | sent at open      | `response()` / await |
//! | server streaming | [`ServerStreamingCall`]       | sent at open      | [`Responses`]        |
//! | client streaming | [`ClientStreamingCall`]       | [`Requests`]      | `response()` / await |
//! | bidi streaming   | [`BidiStreamingCall`]         | [`Requests`]      | [`Responses`]        |
//!
//! Every call exposes `headers()`, `status()` and `trailers()`. `status()`
//! resolves once the call terminated and every response was consumed, and
//! may be awaited repeatedly.

use std::future::IntoFuture;
use std::marker::PhantomData;

use duplex_rpc_core::{Metadata, Status};
use futures::StreamExt;
use futures::future::BoxFuture;
use prost::Message;
use serde::{Serialize, de::DeserializeOwned};
use tokio::sync::OnceCell;

use crate::ClientError;
use crate::codec::Encoding;
use crate::response::Response;
use crate::session::{CallEvent, CallSession};
use crate::streaming::Responses;

macro_rules! call_accessors {
    () => {
        /// Header metadata. Resolves to empty metadata if the call ended
        /// without any.
        pub async fn headers(&self) -> Metadata {
            self.session.headers().await
        }

        /// Terminal status. Waits for the call to terminate and, while the
        /// responses are held by a consumer, for it to take the last one.
        pub async fn status(&self) -> Status {
            self.session.settled().await.status().clone()
        }

        /// Trailer metadata. Resolves together with `status()`.
        pub async fn trailers(&self) -> Metadata {
            self.session.settled().await.trailers().clone()
        }

        /// Cancel the call with `CANCELLED`. Idempotent.
        pub fn cancel(&self) {
            self.session.cancel()
        }

        /// The underlying session.
        pub fn session(&self) -> &CallSession {
            &self.session
        }
    };
}

macro_rules! call_debug {
    ($name:ident < $($param:ident),+ >) => {
        impl<$($param),+> std::fmt::Debug for $name<$($param),+> {
            fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
                f.debug_struct(stringify!($name))
                    .field("session", &self.session)
                    .field("encoding", &self.encoding)
                    .finish()
            }
        }
    };
}

call_debug!(UnaryCall<Res>);
call_debug!(ServerStreamingCall<Res>);
call_debug!(ClientStreamingCall<Req, Res>);
call_debug!(BidiStreamingCall<Req, Res>);

/// Request side of a client-streaming or bidi call.
///
/// Cheap to clone; all clones write to the same request channel.
pub struct Requests<Req> {
    session: CallSession,
    encoding: Encoding,
    _marker: PhantomData<fn(Req)>,
}

impl<Req> Clone for Requests<Req> {
    fn clone(&self) -> Self {
        Self {
            session: self.session.clone(),
            encoding: self.encoding,
            _marker: PhantomData,
        }
    }
}

impl<Req> Requests<Req>
where
    Req: Message + Serialize,
{
    fn new(session: CallSession, encoding: Encoding) -> Self {
        Self {
            session,
            encoding,
            _marker: PhantomData,
        }
    }

    /// Send one request. Resolves once the transport accepted it.
    ///
    /// Fails with [`ClientError::ChannelClosed`] after `complete()` or
    /// termination, and with the call's error if it terminates while the
    /// message is pending.
    pub async fn send(&self, message: &Req) -> Result<(), ClientError> {
        let payload = self.encoding.encode(message)?;
        self.session.send(payload)?.await
    }

    /// Signal that no further requests follow. Resolves once the transport
    /// accepted the half-close.
    pub async fn complete(&self) -> Result<(), ClientError> {
        self.session.complete()?.await
    }

    /// Whether `send` and `complete` are still accepted.
    pub fn is_open(&self) -> bool {
        self.session.requests_open()
    }
}

impl<Req> std::fmt::Debug for Requests<Req> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Requests")
            .field("session", &self.session)
            .finish()
    }
}

/// The single response of a unary or client-streaming call, resolved once.
struct SingleResponse<Res> {
    cell: OnceCell<Result<Res, ClientError>>,
}

impl<Res> SingleResponse<Res>
where
    Res: Message + DeserializeOwned + Default,
{
    fn new() -> Self {
        Self {
            cell: OnceCell::new(),
        }
    }

    async fn get(&self, session: &CallSession, encoding: Encoding) -> Result<&Res, ClientError> {
        self.cell
            .get_or_init(|| read_single(session, encoding))
            .await
            .as_ref()
            .map_err(Clone::clone)
    }

    async fn into_response(
        self,
        session: CallSession,
        encoding: Encoding,
    ) -> Result<Response<Res>, ClientError> {
        let message = match self.cell.into_inner() {
            Some(result) => result?,
            None => read_single(&session, encoding).await?,
        };
        let termination = session.terminated().await;
        let headers = session.headers().await;
        Ok(Response::new(
            message,
            headers,
            termination.trailers().clone(),
            termination.status().clone(),
        ))
    }
}

/// Read events up to the terminal status and return the one message.
async fn read_single<Res>(session: &CallSession, encoding: Encoding) -> Result<Res, ClientError>
where
    Res: Message + DeserializeOwned + Default,
{
    let mut events = session.events()?;
    let mut message = None;
    while let Some(event) = events.next().await {
        match event {
            CallEvent::Message(payload) => match encoding.decode(&payload) {
                Ok(decoded) => message = Some(decoded),
                Err(e) => {
                    session.abort(e.clone());
                    return Err(e);
                }
            },
            CallEvent::Error(e) => return Err(e),
            CallEvent::Status { .. } => break,
            CallEvent::Headers(_) | CallEvent::End => {}
        }
    }
    message.ok_or_else(|| ClientError::Protocol("call completed without a response message".into()))
}

/// A unary call.
///
/// Await it directly for the response message with its metadata, or use
/// [`response`](UnaryCall::response) to borrow the message.
///
/// # Example
///
/// ```ignore
/// let response = client.unary::<Req, Res>(&method, &request)?.await?;
/// println!("{:?} {:?}", response.get_ref(), response.trailers());
/// ```
pub struct UnaryCall<Res> {
    session: CallSession,
    encoding: Encoding,
    response: SingleResponse<Res>,
}

impl<Res> UnaryCall<Res>
where
    Res: Message + DeserializeOwned + Default,
{
    pub(crate) fn new(session: CallSession, encoding: Encoding) -> Self {
        Self {
            session,
            encoding,
            response: SingleResponse::new(),
        }
    }

    call_accessors!();

    /// The response message, or the error the call failed with.
    pub async fn response(&self) -> Result<&Res, ClientError> {
        self.response.get(&self.session, self.encoding).await
    }
}

impl<Res> IntoFuture for UnaryCall<Res>
where
    Res: Message + DeserializeOwned + Default + Send + 'static,
{
    type Output = Result<Response<Res>, ClientError>;
    type IntoFuture = BoxFuture<'static, Self::Output>;

    fn into_future(self) -> Self::IntoFuture {
        Box::pin(self.response.into_response(self.session, self.encoding))
    }
}

/// A server-streaming call.
pub struct ServerStreamingCall<Res> {
    session: CallSession,
    encoding: Encoding,
    _marker: PhantomData<fn() -> Res>,
}

impl<Res> ServerStreamingCall<Res>
where
    Res: Message + DeserializeOwned + Default,
{
    pub(crate) fn new(session: CallSession, encoding: Encoding) -> Self {
        Self {
            session,
            encoding,
            _marker: PhantomData,
        }
    }

    call_accessors!();

    /// The response sequence. Only one consumer may hold it at a time.
    pub fn responses(&self) -> Result<Responses<Res>, ClientError> {
        Responses::new(self.session.clone(), self.encoding)
    }
}

/// A client-streaming call.
///
/// Send requests through [`requests`](Self::requests), then `complete()`,
/// then read the single response.
pub struct ClientStreamingCall<Req, Res> {
    session: CallSession,
    encoding: Encoding,
    response: SingleResponse<Res>,
    _marker: PhantomData<fn(Req)>,
}

impl<Req, Res> ClientStreamingCall<Req, Res>
where
    Req: Message + Serialize,
    Res: Message + DeserializeOwned + Default,
{
    pub(crate) fn new(session: CallSession, encoding: Encoding) -> Self {
        Self {
            session,
            encoding,
            response: SingleResponse::new(),
            _marker: PhantomData,
        }
    }

    call_accessors!();

    /// The request side.
    pub fn requests(&self) -> Requests<Req> {
        Requests::new(self.session.clone(), self.encoding)
    }

    /// The response message, or the error the call failed with.
    pub async fn response(&self) -> Result<&Res, ClientError> {
        self.response.get(&self.session, self.encoding).await
    }
}

impl<Req, Res> IntoFuture for ClientStreamingCall<Req, Res>
where
    Req: Message + Serialize,
    Res: Message + DeserializeOwned + Default + Send + 'static,
{
    type Output = Result<Response<Res>, ClientError>;
    type IntoFuture = BoxFuture<'static, Self::Output>;

    fn into_future(self) -> Self::IntoFuture {
        Box::pin(self.response.into_response(self.session, self.encoding))
    }
}

/// A bidirectional-streaming call.
///
/// The call terminates only when the peer sends its status (or on failure
/// or cancellation), regardless of when the caller completes its requests.
pub struct BidiStreamingCall<Req, Res> {
    session: CallSession,
    encoding: Encoding,
    _marker: PhantomData<fn(Req) -> Res>,
}

impl<Req, Res> BidiStreamingCall<Req, Res>
where
    Req: Message + Serialize,
    Res: Message + DeserializeOwned + Default,
{
    pub(crate) fn new(session: CallSession, encoding: Encoding) -> Self {
        Self {
            session,
            encoding,
            _marker: PhantomData,
        }
    }

    call_accessors!();

    /// The request side.
    pub fn requests(&self) -> Requests<Req> {
        Requests::new(self.session.clone(), self.encoding)
    }

    /// The response sequence. Only one consumer may hold it at a time.
    pub fn responses(&self) -> Result<Responses<Res>, ClientError> {
        Responses::new(self.session.clone(), self.encoding)
    }
}
