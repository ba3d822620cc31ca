//! Event bus for lifecycle notifications.
//!
//! Listeners are invoked sequentially in registration order, each one
//! awaited before the next. A listener's error is caught and logged,
//! then forwarded as an `error` event; a failure while handling the
//! `error` event itself is only logged, never re-wrapped, which is the
//! termination condition that prevents an infinite forwarding cycle.

use reflex_core::events::{ErrorPayload, EventEnvelope, EventKind, EventPayload};
use reflex_core::Id;
use std::collections::HashMap;
use std::future::Future;
use std::pin::Pin;
use std::sync::Arc;
use tokio::sync::RwLock;
use tracing::{error, warn};

/// Boxed future returned by a listener.
pub type ListenerFuture =
    Pin<Box<dyn Future<Output = std::result::Result<(), String>> + Send>>;

/// A registered listener callback.
pub type Listener = Arc<dyn Fn(EventEnvelope) -> ListenerFuture + Send + Sync>;

/// Wrap a plain async closure as a [`Listener`].
pub fn listener_fn<F, Fut>(f: F) -> Listener
where
    F: Fn(EventEnvelope) -> Fut + Send + Sync + 'static,
    Fut: Future<Output = std::result::Result<(), String>> + Send + 'static,
{
    Arc::new(move |envelope| Box::pin(f(envelope)))
}

/// Publish/subscribe dispatch for the fixed set of lifecycle events.
pub struct EventBus {
    listeners: RwLock<HashMap<EventKind, Vec<(Id, Listener)>>>,
}

impl std::fmt::Debug for EventBus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("EventBus").finish_non_exhaustive()
    }
}

impl Default for EventBus {
    fn default() -> Self {
        Self::new()
    }
}

impl EventBus {
    pub fn new() -> Self {
        Self {
            listeners: RwLock::new(HashMap::new()),
        }
    }

    /// Register a listener for an event; returns its listener id.
    pub async fn register(&self, event: EventKind, listener: Listener) -> Id {
        let id = Id::new();
        let mut listeners = self.listeners.write().await;
        listeners
            .entry(event)
            .or_default()
            .push((id.clone(), listener));
        id
    }

    /// Remove a listener; returns whether it was registered.
    pub async fn unregister(&self, event: EventKind, id: &Id) -> bool {
        let mut listeners = self.listeners.write().await;
        let Some(registered) = listeners.get_mut(&event) else {
            return false;
        };
        let before = registered.len();
        registered.retain(|(listener_id, _)| listener_id != id);
        registered.len() < before
    }

    /// Number of listeners registered for an event.
    pub async fn listener_count(&self, event: EventKind) -> usize {
        let listeners = self.listeners.read().await;
        listeners.get(&event).map_or(0, Vec::len)
    }

    /// Emit an envelope to every listener of its event, in order.
    pub async fn emit(&self, envelope: EventEnvelope) {
        let failures = self.deliver(&envelope).await;

        // Forward listener failures as error events, except when the
        // failing delivery was itself the error event.
        if envelope.event == EventKind::Error {
            return;
        }
        for message in failures {
            let payload = EventPayload::Error(ErrorPayload {
                scope: "listener".to_string(),
                message,
            });
            let error_envelope = EventEnvelope::new(
                &payload,
                envelope.session_id.clone(),
                envelope.project_id.clone(),
            );
            // Failures here are logged inside deliver and go no further.
            self.deliver(&error_envelope).await;
        }
    }

    /// Deliver to each listener sequentially; collect failure messages.
    async fn deliver(&self, envelope: &EventEnvelope) -> Vec<String> {
        let registered: Vec<(Id, Listener)> = {
            let listeners = self.listeners.read().await;
            listeners
                .get(&envelope.event)
                .map(|v| v.iter().map(|(id, l)| (id.clone(), Arc::clone(l))).collect())
                .unwrap_or_default()
        };

        let mut failures = Vec::new();
        for (id, listener) in registered {
            if let Err(message) = listener(envelope.clone()).await {
                error!(
                    event = envelope.event.as_str(),
                    listener = %id,
                    error = %message,
                    "event listener failed"
                );
                failures.push(message);
            }
        }
        failures
    }

    /// Convenience: build an envelope from a typed payload and emit it.
    pub async fn publish(&self, payload: &EventPayload, session_id: Id, project_id: &str) {
        self.emit(EventEnvelope::new(payload, session_id, project_id))
            .await;
    }

    /// Log-and-publish helper for error payloads.
    pub async fn publish_error(
        &self,
        scope: &str,
        message: impl Into<String>,
        session_id: Id,
        project_id: &str,
    ) {
        let message = message.into();
        warn!(scope, error = %message, "orchestrator error");
        let payload = EventPayload::Error(ErrorPayload {
            scope: scope.to_string(),
            message,
        });
        self.publish(&payload, session_id, project_id).await;
    }
}
