//! Transport-agnostic RPC call client.
//!
//! This crate turns a transport's per-call event flow into typed calls of the
//! four shapes: unary, server streaming, client streaming and bidirectional
//! streaming. Each call is backed by a [`CallSession`], the single source of
//! truth for its state, and can be consumed through either of two facades:
//!
//! - future/stream: awaitable responses and a [`Responses`] stream
//! - event-driven: named signals dispatched to handlers ([`EventCall`])
//!
//! ## Features
//!
//! - All four call shapes over any [`Transport`]
//! - JSON (default) or protobuf message encoding
//! - Per-call deadlines and request metadata ([`CallOptions`])
//! - Idempotent cancellation, safe from inside handlers
//! - An in-process [`MemoryTransport`]
//!
//! ## Example
//!
//! ```ignore
//! use duplex_rpc_client::{Client, MemoryTransport, MethodDescriptor};
//!
//! let client = Client::builder(MemoryTransport::new(serve)).build();
//! let method = MethodDescriptor::unary("example.ExampleService", "Unary");
//!
//! let response = client
//!     .unary::<ExampleRequest, ExampleResponse>(&method, &request)?
//!     .await?;
//!
//! println!("Response: {:?}", response.into_inner());
//! ```
//!
//! ## Server Streaming Example
//!
//! ```ignore
//! use futures::StreamExt;
//!
//! let call = client.server_stream::<ListRequest, ListItem>(&method, &request)?;
//! let mut responses = call.responses()?;
//! while let Some(result) = responses.next().await {
//!     match result {
//!         Ok(item) => println!("Got item: {:?}", item),
//!         Err(e) => eprintln!("Error: {:?}", e),
//!     }
//! }
//!
//! // Trailers once the last response was consumed
//! println!("Trailers: {:?}", call.trailers().await);
//! ```
//!
//! ## Bidirectional Streaming Example
//!
//! ```ignore
//! let call = client.bidi::<EchoRequest, EchoResponse>(&method)?;
//! call.responses()?.on_message(|msg| println!("Got: {:?}", msg))?;
//!
//! let requests = call.requests();
//! requests.send(&EchoRequest { message: "hello".into() }).await?;
//! requests.send(&EchoRequest { message: "world".into() }).await?;
//! requests.complete().await?;
//!
//! println!("Status: {}", call.status().await);
//! ```
//!
//! ## Event-Driven Example
//!
//! ```ignore
//! let call = client.bidi_events::<EchoRequest, EchoResponse>(
//!     &method,
//!     CallOptions::new(),
//!     |call| {
//!         call.on_data(|msg| println!("data: {:?}", msg));
//!         call.on_status(|status, _| println!("status: {status}"));
//!     },
//! )?;
//! call.write(&EchoRequest { message: "hello".into() })?;
//! call.end()?;
//! ```
//!
//! ## Cancellation
//!
//! `cancel()` terminates a call with `CANCELLED`; repeated calls are no-ops.
//! Dropping every handle to a call cancels it as well. Dropping only a
//! [`Responses`] does not.
//!
//! ### Timeouts
//!
//! Set a default deadline on the builder or per call:
//!
//! ```ignore
//! let client = Client::builder(transport)
//!     .timeout(Duration::from_secs(30))
//!     .build();
//!
//! let options = CallOptions::new().timeout(Duration::from_secs(5));
//! let call = client.server_stream_with_options::<Req, Res>(&method, &req, options)?;
//! ```
//!
//! A call still running when its deadline elapses terminates with
//! `DEADLINE_EXCEEDED`.

mod builder;
mod call;
mod channel;
mod client;
mod codec;
mod error;
pub mod events;
mod options;
mod response;
mod session;
mod streaming;
pub mod transport;

pub use builder::ClientBuilder;
pub use call::{BidiStreamingCall, ClientStreamingCall, Requests, ServerStreamingCall, UnaryCall};
pub use channel::{EventStream, RequestFrame, RequestReceiver};
pub use client::Client;
pub use codec::Encoding;
pub use error::ClientError;
pub use events::{Emitted, EventCall, Signal, SubscriptionId};
pub use options::{CallOptions, TIMEOUT_KEY, is_reserved_header};
pub use response::Response;
pub use session::{CallDriver, CallEvent, CallSession, Lifecycle, Termination};
pub use streaming::Responses;
pub use transport::{MemoryTransport, RequestHead, Transport, TransportCall};

// Re-export core types
pub use duplex_rpc_core::{
    CallShape, Cardinality, Code, ErrorDetail, Metadata, MetadataError, MethodDescriptor,
    ServiceDescriptor, Status,
};

// Re-export bytes for convenience
pub use bytes::Bytes;
