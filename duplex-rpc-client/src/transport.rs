//! Transport boundary.
//!
//! A [`Transport`] opens calls and owns connection-level concerns. It hands
//! each call to its own machinery as a [`TransportCall`]: the request frames
//! to drain and a [`CallDriver`] to feed responses back.
//!
//! [`MemoryTransport`] serves calls in-process from an async handler.
//!
//! # Example
//!
//! ```ignore
//! use duplex_rpc_client::transport::MemoryTransport;
//! use duplex_rpc_core::{Metadata, Status};
//!
//! let transport = MemoryTransport::new(|mut call| async move {
//!     while let Some(frame) = call.requests().recv().await {
//!         // ...
//!     }
//!     call.driver().finish(Status::ok(), Metadata::empty());
//! });
//! ```

mod memory;

pub use memory::MemoryTransport;

use std::sync::Arc;
use std::time::Duration;

use duplex_rpc_core::{Metadata, MethodDescriptor};

use crate::channel::RequestReceiver;
use crate::session::{CallDriver, CallSession};

/// Opens calls. Shared across sessions.
pub trait Transport: Send + Sync + 'static {
    /// Open a call against `method`. Returns immediately; all network
    /// activity happens asynchronously.
    fn open(&self, method: &MethodDescriptor, head: RequestHead) -> CallSession;

    /// Shut down. Every outstanding call terminates with `UNAVAILABLE`, and
    /// calls opened afterwards are terminated the same way.
    fn close(&self);
}

impl<T: Transport + ?Sized> Transport for Arc<T> {
    fn open(&self, method: &MethodDescriptor, head: RequestHead) -> CallSession {
        (**self).open(method, head)
    }

    fn close(&self) {
        (**self).close()
    }
}

/// What the caller attaches when opening a call.
#[derive(Clone, Debug, Default)]
pub struct RequestHead {
    metadata: Metadata,
    timeout: Option<Duration>,
}

impl RequestHead {
    pub fn new(metadata: Metadata) -> Self {
        Self {
            metadata,
            timeout: None,
        }
    }

    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.timeout = Some(timeout);
        self
    }

    /// Request metadata, including the reserved entries set by the client
    /// (`content-type`, `grpc-timeout`).
    pub fn metadata(&self) -> &Metadata {
        &self.metadata
    }

    pub fn timeout(&self) -> Option<Duration> {
        self.timeout
    }
}

/// The transport's view of one call.
#[derive(Debug)]
pub struct TransportCall {
    method: MethodDescriptor,
    head: RequestHead,
    requests: RequestReceiver,
    driver: CallDriver,
}

impl TransportCall {
    pub(crate) fn new(
        method: MethodDescriptor,
        head: RequestHead,
        requests: RequestReceiver,
        driver: CallDriver,
    ) -> Self {
        Self {
            method,
            head,
            requests,
            driver,
        }
    }

    pub fn method(&self) -> &MethodDescriptor {
        &self.method
    }

    pub fn head(&self) -> &RequestHead {
        &self.head
    }

    /// Request frames, in the order the caller wrote them.
    pub fn requests(&mut self) -> &mut RequestReceiver {
        &mut self.requests
    }

    pub fn driver(&self) -> &CallDriver {
        &self.driver
    }

    pub fn into_parts(self) -> (MethodDescriptor, RequestHead, RequestReceiver, CallDriver) {
        (self.method, self.head, self.requests, self.driver)
    }
}
