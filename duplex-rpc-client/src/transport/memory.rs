use std::collections::HashMap;
use std::future::Future;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};

use duplex_rpc_core::MethodDescriptor;
use futures::future::BoxFuture;
use parking_lot::Mutex;

use super::{RequestHead, Transport, TransportCall};
use crate::session::{CallDriver, CallSession};

const CLOSED_MESSAGE: &str = "transport closed";

type Handler = dyn Fn(TransportCall) -> BoxFuture<'static, ()> + Send + Sync;

/// In-process transport.
///
/// Every opened call is admitted and handed to `handler` on its own tokio
/// task. The transport keeps a non-owning driver per outstanding call and
/// drops it when the call terminates.
///
/// Must be used from within a tokio runtime.
#[derive(Clone)]
pub struct MemoryTransport {
    inner: Arc<MemoryInner>,
}

struct MemoryInner {
    handler: Box<Handler>,
    calls: Mutex<HashMap<u64, CallDriver>>,
    next_id: AtomicU64,
    closed: AtomicBool,
}

impl MemoryTransport {
    pub fn new<F, Fut>(handler: F) -> Self
    where
        F: Fn(TransportCall) -> Fut + Send + Sync + 'static,
        Fut: Future<Output = ()> + Send + 'static,
    {
        Self {
            inner: Arc::new(MemoryInner {
                handler: Box::new(move |call| -> BoxFuture<'static, ()> {
                    Box::pin(handler(call))
                }),
                calls: Mutex::new(HashMap::new()),
                next_id: AtomicU64::new(1),
                closed: AtomicBool::new(false),
            }),
        }
    }

    /// Number of calls opened and not yet terminated.
    pub fn active_calls(&self) -> usize {
        self.inner.calls.lock().len()
    }

    pub fn is_closed(&self) -> bool {
        self.inner.closed.load(Ordering::Acquire)
    }
}

impl Transport for MemoryTransport {
    fn open(&self, method: &MethodDescriptor, head: RequestHead) -> CallSession {
        let id = self.inner.next_id.fetch_add(1, Ordering::Relaxed);
        let (session, call) = CallSession::pair(id, method.clone(), head);
        let driver = call.driver().clone();

        if self.is_closed() {
            tracing::debug!(call.id = id, method = %method, "open on closed transport");
            driver.fail(CLOSED_MESSAGE);
            return session;
        }

        self.inner.calls.lock().insert(id, driver.clone());
        let inner = Arc::downgrade(&self.inner);
        driver.on_release(move || {
            if let Some(inner) = inner.upgrade() {
                inner.calls.lock().remove(&id);
            }
        });

        // `close()` may have drained the map between the check and the insert.
        if self.is_closed() {
            driver.fail(CLOSED_MESSAGE);
            return session;
        }

        driver.admit();
        tokio::spawn((self.inner.handler)(call));
        session
    }

    fn close(&self) {
        if self.inner.closed.swap(true, Ordering::AcqRel) {
            return;
        }
        let outstanding: Vec<CallDriver> = self
            .inner
            .calls
            .lock()
            .drain()
            .map(|(_, driver)| driver)
            .collect();
        tracing::debug!(outstanding = outstanding.len(), "closing memory transport");
        for driver in outstanding {
            driver.fail(CLOSED_MESSAGE);
        }
    }
}

impl std::fmt::Debug for MemoryTransport {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("MemoryTransport")
            .field("active_calls", &self.active_calls())
            .field("closed", &self.is_closed())
            .finish()
    }
}
