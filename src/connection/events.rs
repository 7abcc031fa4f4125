//! Connectivity events reported by the transport and the fallback flag they drive.

use std::fmt;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};

use tokio::sync::broadcast;
use tracing::{debug, warn};

const EVENT_CHANNEL_CAPACITY: usize = 64;

/// Something the pooled transport observed about its connections.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ConnectivityEvent {
    /// A connection to the server was established.
    Connect,
    /// A connection was closed (including an orderly shutdown).
    Disconnect,
    /// Connecting or talking to the server failed.
    ConnectionError,
    /// The transport drained its queue under pressure.
    Drain,
}

impl ConnectivityEvent {
    /// Fallback-mode value after this event.
    #[must_use]
    pub fn fallback_after(self) -> bool {
        match self {
            ConnectivityEvent::Connect | ConnectivityEvent::Disconnect => false,
            ConnectivityEvent::ConnectionError | ConnectivityEvent::Drain => true,
        }
    }
}

impl fmt::Display for ConnectivityEvent {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            ConnectivityEvent::Connect => "connect",
            ConnectivityEvent::Disconnect => "disconnect",
            ConnectivityEvent::ConnectionError => "connectionError",
            ConnectivityEvent::Drain => "drain",
        })
    }
}

/// Single handler for connectivity events. Owns the fallback flag and fans
/// events out to subscribers. Cheap to clone; clones share state.
#[derive(Clone)]
pub struct ConnectivityMonitor {
    inner: Arc<MonitorInner>,
}

struct MonitorInner {
    fallback: AtomicBool,
    events: broadcast::Sender<ConnectivityEvent>,
}

impl Default for ConnectivityMonitor {
    fn default() -> Self {
        Self::new()
    }
}

impl ConnectivityMonitor {
    #[must_use]
    pub fn new() -> Self {
        let (events, _) = broadcast::channel(EVENT_CHANNEL_CAPACITY);
        Self {
            inner: Arc::new(MonitorInner {
                fallback: AtomicBool::new(false),
                events,
            }),
        }
    }

    /// Apply `event` to the fallback flag and notify subscribers.
    pub fn handle(&self, event: ConnectivityEvent) {
        let fallback = event.fallback_after();
        let previous = self.inner.fallback.swap(fallback, Ordering::AcqRel);
        if previous != fallback {
            if fallback {
                warn!(%event, "entering fallback mode");
            } else {
                debug!(%event, "leaving fallback mode");
            }
        }
        // No subscribers is fine.
        let _ = self.inner.events.send(event);
    }

    #[must_use]
    pub fn in_fallback_mode(&self) -> bool {
        self.inner.fallback.load(Ordering::Acquire)
    }

    #[must_use]
    pub fn subscribe(&self) -> broadcast::Receiver<ConnectivityEvent> {
        self.inner.events.subscribe()
    }
}

impl fmt::Debug for ConnectivityMonitor {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ConnectivityMonitor")
            .field("fallback", &self.in_fallback_mode())
            .finish()
    }
}
