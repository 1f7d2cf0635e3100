use crate::events::{EventBus, MeshEvent};
use crate::session::SessionSupervisor;
use rocket::response::stream::{Event, EventStream};
use rocket::{get, State};
use tokio::time::{interval, Duration};

/// Session activity stream. One `initial_status` frame per tracked session
/// on connect, then `status_update` frames as sessions change, with a
/// heartbeat to keep intermediaries from closing the connection.
#[get("/api/status/stream")]
pub fn status_stream(
    events: &State<EventBus>,
    supervisor: &State<SessionSupervisor>,
) -> EventStream![] {
    let mut rx = events.sender.subscribe();

    let initial: Vec<serde_json::Value> = supervisor
        .tracked_sessions()
        .into_iter()
        .map(|name| {
            let (status, hook) = supervisor.activity_status(&name);
            serde_json::json!({
                "type": "initial_status",
                "sessionName": name,
                "status": status,
                "hookStatus": hook.as_ref().map(|h| h.status.clone()),
                "notificationType": hook.and_then(|h| h.notification_type),
                "timestamp": crate::store::now_rfc3339(),
            })
        })
        .collect();

    EventStream! {
        for frame in initial {
            yield Event::json(&frame).event("initial_status");
        }

        let mut heartbeat = interval(Duration::from_secs(15));

        loop {
            tokio::select! {
                event = rx.recv() => {
                    match event {
                        Ok(MeshEvent::StatusUpdate { session_name, status, hook_status, notification_type }) => {
                            yield Event::json(&serde_json::json!({
                                "type": "status_update",
                                "sessionName": session_name,
                                "status": status,
                                "hookStatus": hook_status,
                                "notificationType": notification_type,
                                "timestamp": crate::store::now_rfc3339(),
                            })).event("status_update");
                        }
                        Ok(MeshEvent::MessageDelivered { ref to, ref message }) => {
                            yield Event::json(&serde_json::json!({
                                "type": "message_delivered",
                                "to": to,
                                "id": message.id,
                                "timestamp": crate::store::now_rfc3339(),
                            })).event("message_delivered");
                        }
                        Err(tokio::sync::broadcast::error::RecvError::Closed) => break,
                        _ => {} // other events are not part of the status contract
                    }
                }
                _ = heartbeat.tick() => {
                    yield Event::json(&serde_json::json!({"time": crate::store::now_rfc3339()})).event("heartbeat");
                }
            }
        }
    }
}
