use crate::models::{Agent, Host, StoredMessage};
use tokio::sync::broadcast;

#[derive(Debug, Clone)]
pub enum MeshEvent {
    MessageDelivered {
        to: String,
        message: Box<StoredMessage>,
    },
    MessageQueued {
        agent_id: String,
        envelope_id: String,
    },
    AgentCreated(Box<Agent>),
    AgentDeleted {
        id: String,
        name: String,
    },
    PeerRegistered(Box<Host>),
    /// Session activity transition, fanned out to the status stream.
    StatusUpdate {
        session_name: String,
        status: String,
        hook_status: Option<String>,
        notification_type: Option<String>,
    },
}

pub struct EventBus {
    pub sender: broadcast::Sender<MeshEvent>,
}

impl Default for EventBus {
    fn default() -> Self {
        Self::new()
    }
}

impl EventBus {
    pub fn new() -> Self {
        let (sender, _) = broadcast::channel(1024);
        EventBus { sender }
    }

    pub fn publish(&self, event: MeshEvent) {
        // Ignore send errors (no subscribers)
        let _ = self.sender.send(event);
    }
}
