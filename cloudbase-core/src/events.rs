//! Lifecycle notifications.
//!
//! [`EventBus`] is a synchronous observer registry. Listeners run on the
//! firing thread in subscription order; a listener that fails or panics is
//! logged and skipped without affecting the others. Nothing is persisted or
//! replayed: a listener only sees events fired after it subscribed.

use parking_lot::RwLock;
use std::fmt;
use std::panic::{AssertUnwindSafe, catch_unwind};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, OnceLock};

use crate::auth::LoginType;
use crate::config::Persistence;

/// Event names.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum EventKind {
    LoginStateChanged,
    LoginTypeChanged,
    LoginStateExpired,
    AccessTokenRefreshed,
}

impl EventKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::LoginStateChanged => "loginStateChanged",
            Self::LoginTypeChanged => "loginTypeChanged",
            Self::LoginStateExpired => "loginStateExpire",
            Self::AccessTokenRefreshed => "refreshAccessToken",
        }
    }
}

impl fmt::Display for EventKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// A lifecycle notification.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum AuthEvent {
    /// The session changed; listeners re-query the login state.
    LoginStateChanged,
    /// The credential mechanism of the session changed.
    LoginTypeChanged {
        env: String,
        login_type: LoginType,
        persistence: Persistence,
    },
    /// The backend refused the cached refresh token.
    LoginStateExpired { env: String },
    /// A new access token was minted from the refresh token.
    AccessTokenRefreshed { env: String },
}

impl AuthEvent {
    pub fn kind(&self) -> EventKind {
        match self {
            Self::LoginStateChanged => EventKind::LoginStateChanged,
            Self::LoginTypeChanged { .. } => EventKind::LoginTypeChanged,
            Self::LoginStateExpired { .. } => EventKind::LoginStateExpired,
            Self::AccessTokenRefreshed { .. } => EventKind::AccessTokenRefreshed,
        }
    }
}

/// Handle returned by [`EventBus::subscribe`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct ListenerId(u64);

type Listener = Arc<dyn Fn(&AuthEvent) -> anyhow::Result<()> + Send + Sync>;

struct Subscription {
    id: ListenerId,
    kind: EventKind,
    listener: Listener,
}

/// Process-wide publish/subscribe channel for lifecycle events.
pub struct EventBus {
    subscriptions: RwLock<Vec<Subscription>>,
    next_id: AtomicU64,
}

impl EventBus {
    pub fn new() -> Self {
        Self {
            subscriptions: RwLock::new(Vec::new()),
            next_id: AtomicU64::new(1),
        }
    }

    /// Process-scoped bus for the outermost composition point.
    pub fn global() -> Arc<EventBus> {
        static GLOBAL: OnceLock<Arc<EventBus>> = OnceLock::new();
        GLOBAL.get_or_init(|| Arc::new(EventBus::new())).clone()
    }

    /// Register a listener for one event kind.
    pub fn subscribe<F>(&self, kind: EventKind, listener: F) -> ListenerId
    where
        F: Fn(&AuthEvent) -> anyhow::Result<()> + Send + Sync + 'static,
    {
        let id = ListenerId(self.next_id.fetch_add(1, Ordering::Relaxed));
        self.subscriptions.write().push(Subscription {
            id,
            kind,
            listener: Arc::new(listener),
        });
        id
    }

    /// Remove a listener. Returns whether it was registered.
    pub fn unsubscribe(&self, id: ListenerId) -> bool {
        let mut subscriptions = self.subscriptions.write();
        let before = subscriptions.len();
        subscriptions.retain(|s| s.id != id);
        subscriptions.len() != before
    }

    /// Deliver an event to every listener of its kind, in subscription order.
    ///
    /// Listeners are invoked outside the registry lock, so they may subscribe
    /// or fire further events.
    pub fn fire(&self, event: AuthEvent) {
        let kind = event.kind();
        let listeners: Vec<(ListenerId, Listener)> = self
            .subscriptions
            .read()
            .iter()
            .filter(|s| s.kind == kind)
            .map(|s| (s.id, s.listener.clone()))
            .collect();

        tracing::debug!(event = %kind, listeners = listeners.len(), "firing event");
        for (id, listener) in listeners {
            match catch_unwind(AssertUnwindSafe(|| listener(&event))) {
                Ok(Ok(())) => {}
                Ok(Err(e)) => {
                    tracing::warn!(event = %kind, listener = id.0, "event listener failed: {:#}", e);
                }
                Err(_) => {
                    tracing::warn!(event = %kind, listener = id.0, "event listener panicked");
                }
            }
        }
    }

    /// Number of listeners registered for a kind.
    pub fn listener_count(&self, kind: EventKind) -> usize {
        self.subscriptions
            .read()
            .iter()
            .filter(|s| s.kind == kind)
            .count()
    }
}

impl Default for EventBus {
    fn default() -> Self {
        Self::new()
    }
}

impl fmt::Debug for EventBus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("EventBus")
            .field("listeners", &self.subscriptions.read().len())
            .finish()
    }
}
