//! Client builder.
//!
//! Provides a fluent API for configuring and building a [`Client`].

use std::sync::Arc;
use std::time::Duration;

use crate::client::Client;
use crate::codec::Encoding;
use crate::transport::Transport;

/// Builder for creating a [`Client`].
///
/// # Example
///
/// ```ignore
/// use duplex_rpc_client::{ClientBuilder, MemoryTransport};
///
/// let client = ClientBuilder::new(MemoryTransport::new(handler))
///     .use_proto()  // Use protobuf encoding (default is JSON)
///     .timeout(Duration::from_secs(30))
///     .build();
/// ```
pub struct ClientBuilder {
    /// Transport every call is opened on.
    transport: Arc<dyn Transport>,
    /// Message encoding for requests and responses.
    encoding: Encoding,
    /// Default deadline for calls.
    default_timeout: Option<Duration>,
}

impl std::fmt::Debug for ClientBuilder {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ClientBuilder")
            .field("encoding", &self.encoding)
            .field("default_timeout", &self.default_timeout)
            .finish_non_exhaustive()
    }
}

impl ClientBuilder {
    /// Create a new ClientBuilder over the given transport.
    pub fn new<T: Transport>(transport: T) -> Self {
        Self::from_shared(Arc::new(transport))
    }

    /// Create a new ClientBuilder over a transport shared with other clients.
    pub fn from_shared(transport: Arc<dyn Transport>) -> Self {
        Self {
            transport,
            encoding: Encoding::default(),
            default_timeout: None,
        }
    }

    /// Set the message encoding.
    pub fn encoding(mut self, encoding: Encoding) -> Self {
        self.encoding = encoding;
        self
    }

    /// Use JSON encoding for requests and responses.
    ///
    /// This is the default encoding.
    pub fn use_json(self) -> Self {
        self.encoding(Encoding::Json)
    }

    /// Use protobuf encoding for requests and responses.
    pub fn use_proto(self) -> Self {
        self.encoding(Encoding::Proto)
    }

    /// Set the default deadline for calls.
    ///
    /// The deadline is propagated to the peer via the `grpc-timeout` request
    /// entry and enforced locally: a call still running when it elapses
    /// terminates with `DEADLINE_EXCEEDED`.
    ///
    /// Individual calls can override this timeout using [`CallOptions::timeout`].
    ///
    /// Durations too large for the `grpc-timeout` entry are enforced locally
    /// but not propagated.
    ///
    /// # Example
    ///
    /// ```ignore
    /// use std::time::Duration;
    ///
    /// let client = ClientBuilder::new(transport)
    ///     .timeout(Duration::from_secs(30))
    ///     .build();
    /// ```
    ///
    /// [`CallOptions::timeout`]: crate::CallOptions::timeout
    pub fn timeout(mut self, timeout: Duration) -> Self {
        self.default_timeout = Some(timeout);
        self
    }

    /// Build the client.
    pub fn build(self) -> Client {
        Client::new(self.transport, self.encoding, self.default_timeout)
    }
}
