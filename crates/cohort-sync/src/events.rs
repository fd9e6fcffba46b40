//! Event Router
//!
//! Workshop events are one-shot occurrences every viewer must observe
//! (a marker activated, a step advanced). Outbound they are wrapped in a
//! `{type, data}` envelope; inbound they are dispatched by type to
//! registered handlers and channel subscribers. Ordering holds within a
//! type only.

use std::collections::HashMap;

use cohort_core::{ConnectionId, RoomId};
use cohort_wire::{ClientMessage, EventEnvelope, ServerMessage};
use serde_json::Value;
use tokio::sync::mpsc;

/// Registration handle for [`EventRouter::off`]
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct HandlerId(u64);

/// Event delivered to handlers
#[derive(Debug, Clone, PartialEq)]
pub struct IncomingEvent {
    pub sender: ConnectionId,
    pub kind: String,
    pub data: Value,
}

type Handler = Box<dyn FnMut(&IncomingEvent) + Send>;

enum Route {
    Callback(Handler),
    Channel(mpsc::UnboundedSender<IncomingEvent>),
}

/// Typed event fan-in/fan-out for one room
pub struct EventRouter {
    self_id: ConnectionId,
    room: RoomId,
    routes: HashMap<String, Vec<(HandlerId, Route)>>,
    next_id: u64,
}

impl EventRouter {
    pub fn new(self_id: ConnectionId, room: RoomId) -> Self {
        Self {
            self_id,
            room,
            routes: HashMap::new(),
            next_id: 0,
        }
    }

    /// Envelope an event for broadcast
    pub fn emit(&self, kind: impl Into<String>, data: Value) -> ClientMessage {
        let event = EventEnvelope::new(kind, data);
        tracing::debug!(target: "events", kind = %event.kind, "emit");
        ClientMessage::WorkshopEvent {
            room_id: self.room.clone(),
            event,
        }
    }

    /// Register a callback for one event type
    pub fn on_event<F>(&mut self, kind: impl Into<String>, handler: F) -> HandlerId
    where
        F: FnMut(&IncomingEvent) + Send + 'static,
    {
        self.register(kind.into(), Route::Callback(Box::new(handler)))
    }

    /// Receive one event type over a channel
    ///
    /// The subscription ends when the receiver is dropped.
    pub fn subscribe(
        &mut self,
        kind: impl Into<String>,
    ) -> (HandlerId, mpsc::UnboundedReceiver<IncomingEvent>) {
        let (tx, rx) = mpsc::unbounded_channel();
        let id = self.register(kind.into(), Route::Channel(tx));
        (id, rx)
    }

    /// Remove a handler or subscription
    pub fn off(&mut self, id: HandlerId) -> bool {
        let mut removed = false;
        for routes in self.routes.values_mut() {
            let before = routes.len();
            routes.retain(|(rid, _)| *rid != id);
            removed |= routes.len() != before;
        }
        self.routes.retain(|_, routes| !routes.is_empty());
        removed
    }

    /// Dispatch an inbound workshop event; returns how many handlers it reached
    pub fn dispatch(&mut self, message: &ServerMessage) -> usize {
        let ServerMessage::WorkshopEvent {
            connection_id,
            event,
        } = message
        else {
            return 0;
        };
        if *connection_id == self.self_id {
            return 0;
        }
        let Some(routes) = self.routes.get_mut(&event.kind) else {
            tracing::trace!(target: "events", kind = %event.kind, "no handlers");
            return 0;
        };

        let incoming = IncomingEvent {
            sender: *connection_id,
            kind: event.kind.clone(),
            data: event.data.clone(),
        };

        let mut reached = 0;
        routes.retain_mut(|(_, route)| match route {
            Route::Callback(handler) => {
                handler(&incoming);
                reached += 1;
                true
            }
            Route::Channel(tx) => {
                let alive = tx.send(incoming.clone()).is_ok();
                if alive {
                    reached += 1;
                }
                alive
            }
        });
        reached
    }

    pub fn handler_count(&self, kind: &str) -> usize {
        self.routes.get(kind).map(Vec::len).unwrap_or(0)
    }

    fn register(&mut self, kind: String, route: Route) -> HandlerId {
        self.next_id += 1;
        let id = HandlerId(self.next_id);
        self.routes.entry(kind).or_default().push((id, route));
        id
    }
}

impl std::fmt::Debug for EventRouter {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("EventRouter")
            .field("room", &self.room)
            .field("kinds", &self.routes.keys().collect::<Vec<_>>())
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::sync::Arc;

    fn router() -> EventRouter {
        EventRouter::new(ConnectionId::new(1), RoomId::from("lab"))
    }

    fn incoming(kind: &str, data: Value) -> ServerMessage {
        ServerMessage::WorkshopEvent {
            connection_id: ConnectionId::new(2),
            event: EventEnvelope::new(kind, data),
        }
    }

    #[test]
    fn test_emit_wraps_envelope() {
        let msg = router().emit("hotspot-activated", json!({ "id": 4 }));
        let value = serde_json::to_value(&msg).unwrap();
        assert_eq!(value["event"], "workshop-event");
        assert_eq!(value["payload"]["event"]["type"], "hotspot-activated");
        assert_eq!(value["payload"]["event"]["data"]["id"], 4);
    }

    #[test]
    fn test_dispatch_by_type() {
        let mut router = router();
        let hits = Arc::new(AtomicUsize::new(0));
        let counter = hits.clone();
        router.on_event("step", move |event| {
            assert_eq!(event.sender, ConnectionId::new(2));
            counter.fetch_add(1, Ordering::SeqCst);
        });

        assert_eq!(router.dispatch(&incoming("step", json!(1))), 1);
        assert_eq!(router.dispatch(&incoming("other", json!(1))), 0);
        assert_eq!(hits.load(Ordering::SeqCst), 1);
    }

    #[test]
    fn test_off_deregisters() {
        let mut router = router();
        let id = router.on_event("step", |_| {});
        assert!(router.off(id));
        assert!(!router.off(id));
        assert_eq!(router.dispatch(&incoming("step", Value::Null)), 0);
    }

    #[test]
    fn test_subscription_preserves_order_and_prunes() {
        let mut router = router();
        let (_, mut rx) = router.subscribe("marker");
        router.dispatch(&incoming("marker", json!(1)));
        router.dispatch(&incoming("marker", json!(2)));
        assert_eq!(rx.try_recv().unwrap().data, json!(1));
        assert_eq!(rx.try_recv().unwrap().data, json!(2));

        drop(rx);
        assert_eq!(router.dispatch(&incoming("marker", json!(3))), 0);
        assert_eq!(router.handler_count("marker"), 0);
    }

    #[test]
    fn test_own_events_not_dispatched() {
        let mut router = router();
        router.on_event("step", |_| panic!("own event dispatched"));
        let own = ServerMessage::WorkshopEvent {
            connection_id: ConnectionId::new(1),
            event: EventEnvelope::new("step", Value::Null),
        };
        assert_eq!(router.dispatch(&own), 0);
    }
}
