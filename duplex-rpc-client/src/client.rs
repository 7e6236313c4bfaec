//! Client implementation.
//!
//! This module provides the main [`Client`] type for opening calls.

use std::sync::Arc;
use std::time::Duration;

use bytes::Bytes;
use duplex_rpc_core::{CallShape, MethodDescriptor};
use prost::Message;
use serde::{Serialize, de::DeserializeOwned};
use tracing::debug;

use crate::ClientError;
use crate::builder::ClientBuilder;
use crate::call::{BidiStreamingCall, ClientStreamingCall, ServerStreamingCall, UnaryCall};
use crate::codec::Encoding;
use crate::events::EventCall;
use crate::options::CallOptions;
use crate::session::CallSession;
use crate::transport::Transport;

/// RPC client.
///
/// Opens calls on a shared [`Transport`]. Every call shape is available in
/// two renderings:
///
/// - future/stream: [`unary`](Self::unary), [`server_stream`](Self::server_stream),
///   [`client_stream`](Self::client_stream), [`bidi`](Self::bidi)
/// - event-driven: [`unary_events`](Self::unary_events) and friends
///
/// Cheap to clone; clones share the transport.
///
/// # Example
///
/// ```ignore
/// use duplex_rpc_client::Client;
///
/// let client = Client::builder(transport).use_proto().build();
///
/// let response = client
///     .unary::<MyRequest, MyResponse>(&method, &request)?
///     .await?;
/// ```
#[derive(Clone)]
pub struct Client {
    /// Transport shared by every call.
    transport: Arc<dyn Transport>,
    /// Message encoding.
    encoding: Encoding,
    /// Default deadline for calls.
    default_timeout: Option<Duration>,
}

impl std::fmt::Debug for Client {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Client")
            .field("encoding", &self.encoding)
            .field("default_timeout", &self.default_timeout)
            .finish_non_exhaustive()
    }
}

impl Client {
    /// Create a new ClientBuilder over the given transport.
    ///
    /// This is a convenience method equivalent to `ClientBuilder::new(transport)`.
    pub fn builder<T: Transport>(transport: T) -> ClientBuilder {
        ClientBuilder::new(transport)
    }

    pub(crate) fn new(
        transport: Arc<dyn Transport>,
        encoding: Encoding,
        default_timeout: Option<Duration>,
    ) -> Self {
        Self {
            transport,
            encoding,
            default_timeout,
        }
    }

    /// The message encoding.
    pub fn encoding(&self) -> Encoding {
        self.encoding
    }

    /// The default deadline, if any.
    pub fn default_timeout(&self) -> Option<Duration> {
        self.default_timeout
    }

    /// Open a raw session against `method`. Payloads are exchanged as bytes.
    pub fn open(&self, method: &MethodDescriptor, options: CallOptions) -> CallSession {
        let head = options.into_head(self.default_timeout, self.encoding);
        let session = self.transport.open(method, head);
        session.span().in_scope(|| debug!(encoding = self.encoding.name(), "call opened"));
        session
    }

    /// Shut down the transport. Outstanding calls terminate with
    /// `UNAVAILABLE`, and calls opened afterwards fail the same way.
    pub fn close(&self) {
        self.transport.close()
    }

    fn start<Req>(
        &self,
        method: &MethodDescriptor,
        expected: CallShape,
        request: Option<&Req>,
        options: CallOptions,
    ) -> Result<CallSession, ClientError>
    where
        Req: Message + Serialize,
    {
        if method.shape() != expected {
            return Err(ClientError::InvalidCall(format!(
                "{method} is a {} method, not {expected}",
                method.shape()
            )));
        }
        let initial: Option<Bytes> = request.map(|r| self.encoding.encode(r)).transpose()?;

        let session = self.open(method, options);
        if let Some(payload) = initial {
            // A session that failed on open already carries the reason in its
            // status; the frames are simply not accepted.
            if let Ok(ack) = session.send(payload) {
                drop(ack);
            }
            if let Ok(ack) = session.complete() {
                drop(ack);
            }
        }
        Ok(session)
    }

    /// Make a unary call.
    ///
    /// The request is sent when the call opens. Await the returned call for
    /// the response together with its headers and trailers.
    ///
    /// # Errors
    ///
    /// Returns a [`ClientError`] if `method` is not unary or the request
    /// cannot be encoded. Call failures surface when the call is awaited.
    ///
    /// # Example
    ///
    /// ```ignore
    /// let response = client
    ///     .unary::<GetUserRequest, GetUserResponse>(&method, &request)?
    ///     .await?;
    ///
    /// println!("User: {:?}", response.into_inner());
    /// ```
    pub fn unary<Req, Res>(
        &self,
        method: &MethodDescriptor,
        request: &Req,
    ) -> Result<UnaryCall<Res>, ClientError>
    where
        Req: Message + Serialize,
        Res: Message + DeserializeOwned + Default,
    {
        self.unary_with_options(method, request, CallOptions::new())
    }

    /// Make a unary call with per-call options.
    pub fn unary_with_options<Req, Res>(
        &self,
        method: &MethodDescriptor,
        request: &Req,
        options: CallOptions,
    ) -> Result<UnaryCall<Res>, ClientError>
    where
        Req: Message + Serialize,
        Res: Message + DeserializeOwned + Default,
    {
        let session = self.start(method, CallShape::Unary, Some(request), options)?;
        Ok(UnaryCall::new(session, self.encoding))
    }

    /// Make a server-streaming call.
    ///
    /// # Example
    ///
    /// ```ignore
    /// let call = client.server_stream::<ListRequest, ListItem>(&method, &request)?;
    /// let mut responses = call.responses()?;
    /// while let Some(item) = responses.next().await {
    ///     println!("Got item: {:?}", item?);
    /// }
    /// ```
    pub fn server_stream<Req, Res>(
        &self,
        method: &MethodDescriptor,
        request: &Req,
    ) -> Result<ServerStreamingCall<Res>, ClientError>
    where
        Req: Message + Serialize,
        Res: Message + DeserializeOwned + Default,
    {
        self.server_stream_with_options(method, request, CallOptions::new())
    }

    /// Make a server-streaming call with per-call options.
    pub fn server_stream_with_options<Req, Res>(
        &self,
        method: &MethodDescriptor,
        request: &Req,
        options: CallOptions,
    ) -> Result<ServerStreamingCall<Res>, ClientError>
    where
        Req: Message + Serialize,
        Res: Message + DeserializeOwned + Default,
    {
        let session = self.start(method, CallShape::ServerStream, Some(request), options)?;
        Ok(ServerStreamingCall::new(session, self.encoding))
    }

    /// Make a client-streaming call.
    ///
    /// # Example
    ///
    /// ```ignore
    /// let call = client.client_stream::<Chunk, Summary>(&method)?;
    /// let requests = call.requests();
    /// for chunk in chunks {
    ///     requests.send(&chunk).await?;
    /// }
    /// requests.complete().await?;
    /// let summary = call.await?;
    /// ```
    pub fn client_stream<Req, Res>(
        &self,
        method: &MethodDescriptor,
    ) -> Result<ClientStreamingCall<Req, Res>, ClientError>
    where
        Req: Message + Serialize,
        Res: Message + DeserializeOwned + Default,
    {
        self.client_stream_with_options(method, CallOptions::new())
    }

    /// Make a client-streaming call with per-call options.
    pub fn client_stream_with_options<Req, Res>(
        &self,
        method: &MethodDescriptor,
        options: CallOptions,
    ) -> Result<ClientStreamingCall<Req, Res>, ClientError>
    where
        Req: Message + Serialize,
        Res: Message + DeserializeOwned + Default,
    {
        let session = self.start::<Req>(method, CallShape::ClientStream, None, options)?;
        Ok(ClientStreamingCall::new(session, self.encoding))
    }

    /// Make a bidirectional-streaming call.
    ///
    /// Requests and responses flow independently; the call ends when the
    /// peer sends its status.
    pub fn bidi<Req, Res>(
        &self,
        method: &MethodDescriptor,
    ) -> Result<BidiStreamingCall<Req, Res>, ClientError>
    where
        Req: Message + Serialize,
        Res: Message + DeserializeOwned + Default,
    {
        self.bidi_with_options(method, CallOptions::new())
    }

    /// Make a bidirectional-streaming call with per-call options.
    pub fn bidi_with_options<Req, Res>(
        &self,
        method: &MethodDescriptor,
        options: CallOptions,
    ) -> Result<BidiStreamingCall<Req, Res>, ClientError>
    where
        Req: Message + Serialize,
        Res: Message + DeserializeOwned + Default,
    {
        let session = self.start::<Req>(method, CallShape::Bidi, None, options)?;
        Ok(BidiStreamingCall::new(session, self.encoding))
    }

    fn start_events<Req, Res>(
        &self,
        method: &MethodDescriptor,
        expected: CallShape,
        request: Option<&Req>,
        options: CallOptions,
        setup: impl FnOnce(&EventCall<Req, Res>),
    ) -> Result<EventCall<Req, Res>, ClientError>
    where
        Req: Message + Serialize,
        Res: Message + DeserializeOwned + Default + 'static,
    {
        let session = self.start(method, expected, request, options)?;
        let call = EventCall::new(session, self.encoding);
        setup(&call);
        call.attach()?;
        Ok(call)
    }

    /// Make a unary call, event-driven.
    ///
    /// `setup` runs before any signal is dispatched; handlers registered
    /// there observe the whole call.
    ///
    /// # Example
    ///
    /// ```ignore
    /// client.unary_events::<Req, Res>(&method, &request, CallOptions::new(), |call| {
    ///     let _ = call.on_response(|result| match result {
    ///         Ok(response) => println!("answer: {:?}", response.get_ref()),
    ///         Err(e) => eprintln!("failed: {e}"),
    ///     });
    /// })?;
    /// ```
    pub fn unary_events<Req, Res>(
        &self,
        method: &MethodDescriptor,
        request: &Req,
        options: CallOptions,
        setup: impl FnOnce(&EventCall<Req, Res>),
    ) -> Result<EventCall<Req, Res>, ClientError>
    where
        Req: Message + Serialize,
        Res: Message + DeserializeOwned + Default + 'static,
    {
        self.start_events(method, CallShape::Unary, Some(request), options, setup)
    }

    /// Make a server-streaming call, event-driven.
    pub fn server_stream_events<Req, Res>(
        &self,
        method: &MethodDescriptor,
        request: &Req,
        options: CallOptions,
        setup: impl FnOnce(&EventCall<Req, Res>),
    ) -> Result<EventCall<Req, Res>, ClientError>
    where
        Req: Message + Serialize,
        Res: Message + DeserializeOwned + Default + 'static,
    {
        self.start_events(method, CallShape::ServerStream, Some(request), options, setup)
    }

    /// Make a client-streaming call, event-driven.
    pub fn client_stream_events<Req, Res>(
        &self,
        method: &MethodDescriptor,
        options: CallOptions,
        setup: impl FnOnce(&EventCall<Req, Res>),
    ) -> Result<EventCall<Req, Res>, ClientError>
    where
        Req: Message + Serialize,
        Res: Message + DeserializeOwned + Default + 'static,
    {
        self.start_events(method, CallShape::ClientStream, None, options, setup)
    }

    /// Make a bidirectional-streaming call, event-driven.
    pub fn bidi_events<Req, Res>(
        &self,
        method: &MethodDescriptor,
        options: CallOptions,
        setup: impl FnOnce(&EventCall<Req, Res>),
    ) -> Result<EventCall<Req, Res>, ClientError>
    where
        Req: Message + Serialize,
        Res: Message + DeserializeOwned + Default + 'static,
    {
        self.start_events(method, CallShape::Bidi, None, options, setup)
    }
}
