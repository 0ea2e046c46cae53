//! Audit trail: drain session events from the bus into the log.

use std::thread::JoinHandle;

use tracing::{info, warn};

use sessionguard_events::{Event, EventBus, SessionEvent};

/// Subscribe to `bus` now and log every event on a dedicated thread.
///
/// The thread exits once the bus (and with it every sender) is dropped.
pub fn spawn_audit_log(bus: &dyn EventBus<SessionEvent>) -> std::io::Result<JoinHandle<()>> {
    let subscription = bus.subscribe();
    std::thread::Builder::new()
        .name("session-audit".to_string())
        .spawn(move || {
            while let Ok(event) = subscription.recv() {
                record(&event);
            }
        })
}

fn record(event: &SessionEvent) {
    let payload = serde_json::to_string(event).unwrap_or_default();
    if event.is_security_relevant() {
        warn!(
            event_type = event.event_type(),
            session_id = %event.session_id(),
            occurred_at = %event.occurred_at(),
            payload = %payload,
            "security event"
        );
    } else {
        info!(
            event_type = event.event_type(),
            session_id = %event.session_id(),
            occurred_at = %event.occurred_at(),
            payload = %payload,
            "session event"
        );
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Utc;
    use sessionguard_core::{IdentityId, SessionId};
    use sessionguard_events::InMemoryEventBus;

    #[test]
    fn drain_stops_when_bus_is_dropped() {
        let bus = InMemoryEventBus::<SessionEvent>::new();
        let handle = spawn_audit_log(&bus).unwrap();

        bus.publish(SessionEvent::Opened {
            session_id: SessionId::new(),
            identity_id: IdentityId::new(),
            occurred_at: Utc::now(),
        })
        .unwrap();
        drop(bus);

        handle.join().unwrap();
    }
}
