use crate::error::ApiError;
use crate::events::MeshEvent;
use crate::models::{CreateWebhook, Webhook};
use crate::store;
use hmac::{Hmac, Mac};
use sha2::Sha256;
use std::path::{Path, PathBuf};
use std::sync::{Arc, Mutex};
use tokio::sync::broadcast;

type HmacSha256 = Hmac<Sha256>;

/// Consecutive delivery failures before a webhook is flagged as failing.
/// Delivery keeps being attempted either way.
const FAILING_THRESHOLD: u32 = 10;

/// Host-level webhook registry (`webhooks.json`).
pub struct WebhookStore {
    path: PathBuf,
    cache: Mutex<Option<Vec<Webhook>>>,
}

impl WebhookStore {
    pub fn new(data_dir: &Path) -> Self {
        WebhookStore {
            path: data_dir.join("webhooks.json"),
            cache: Mutex::new(None),
        }
    }

    fn load_locked(&self, cache: &mut Option<Vec<Webhook>>) -> Vec<Webhook> {
        if cache.is_none() {
            *cache = Some(store::read_json(&self.path).unwrap_or_default());
        }
        cache.clone().unwrap_or_default()
    }

    fn save_locked(
        &self,
        cache: &mut Option<Vec<Webhook>>,
        webhooks: Vec<Webhook>,
    ) -> Result<(), ApiError> {
        store::write_json_atomic(&self.path, &webhooks)?;
        *cache = Some(webhooks);
        Ok(())
    }

    pub fn list(&self) -> Vec<Webhook> {
        let mut cache = self.cache.lock().unwrap_or_else(|e| e.into_inner());
        self.load_locked(&mut cache)
    }

    pub fn get(&self, id: &str) -> Option<Webhook> {
        self.list().into_iter().find(|w| w.id == id)
    }

    pub fn create(&self, req: CreateWebhook) -> Result<Webhook, ApiError> {
        if !req.url.starts_with("http://") && !req.url.starts_with("https://") {
            return Err(ApiError::invalid_field("url", "Webhook url must be an absolute URL"));
        }
        let webhook = Webhook {
            id: uuid::Uuid::new_v4().to_string(),
            url: req.url,
            events: req.events,
            secret: req.secret,
            status: "active".to_string(),
            failure_count: 0,
            last_delivery_at: None,
            last_delivery_status: None,
        };
        let mut cache = self.cache.lock().unwrap_or_else(|e| e.into_inner());
        let mut webhooks = self.load_locked(&mut cache);
        webhooks.push(webhook.clone());
        self.save_locked(&mut cache, webhooks)?;
        Ok(webhook)
    }

    pub fn delete(&self, id: &str) -> Result<(), ApiError> {
        let mut cache = self.cache.lock().unwrap_or_else(|e| e.into_inner());
        let mut webhooks = self.load_locked(&mut cache);
        let before = webhooks.len();
        webhooks.retain(|w| w.id != id);
        if webhooks.len() == before {
            return Err(ApiError::not_found(format!("Webhook {id} not found")));
        }
        self.save_locked(&mut cache, webhooks)
    }

    pub fn record_delivery(&self, id: &str, success: bool, status: &str) {
        let mut cache = self.cache.lock().unwrap_or_else(|e| e.into_inner());
        let mut webhooks = self.load_locked(&mut cache);
        if let Some(webhook) = webhooks.iter_mut().find(|w| w.id == id) {
            webhook.last_delivery_at = Some(store::now_rfc3339());
            webhook.last_delivery_status = Some(status.to_string());
            if success {
                webhook.failure_count = 0;
                webhook.status = "active".to_string();
            } else {
                webhook.failure_count += 1;
                if webhook.failure_count >= FAILING_THRESHOLD {
                    webhook.status = "failing".to_string();
                }
            }
            let _ = self.save_locked(&mut cache, webhooks);
        }
    }
}

/// Convert a MeshEvent to (event_name, data) for webhook delivery.
fn event_to_payload(event: &MeshEvent) -> Option<(String, serde_json::Value)> {
    match event {
        MeshEvent::MessageDelivered { to, message } => Some((
            "message.delivered".to_string(),
            serde_json::json!({ "to": to, "message": message }),
        )),
        MeshEvent::MessageQueued { agent_id, envelope_id } => Some((
            "message.queued".to_string(),
            serde_json::json!({ "agentId": agent_id, "envelopeId": envelope_id }),
        )),
        MeshEvent::AgentCreated(agent) => Some((
            "agent.created".to_string(),
            serde_json::to_value(agent).unwrap_or_default(),
        )),
        MeshEvent::AgentDeleted { id, name } => Some((
            "agent.deleted".to_string(),
            serde_json::json!({ "id": id, "name": name }),
        )),
        MeshEvent::PeerRegistered(host) => Some((
            "peer.registered".to_string(),
            serde_json::to_value(host).unwrap_or_default(),
        )),
        // Session status flaps are ephemeral: stream-only, no webhook fan-out.
        MeshEvent::StatusUpdate { .. } => None,
    }
}

/// Spawns a background task that subscribes to the EventBus and delivers
/// webhooks.
pub fn spawn_dispatcher(mut receiver: broadcast::Receiver<MeshEvent>, store: Arc<WebhookStore>) {
    tokio::spawn(async move {
        let client = reqwest::Client::builder()
            .timeout(std::time::Duration::from_secs(5))
            .build()
            .expect("Failed to create HTTP client");

        loop {
            match receiver.recv().await {
                Ok(event) => {
                    if let Some((event_name, data)) = event_to_payload(&event) {
                        deliver_webhooks(&store, &client, &event_name, data).await;
                    }
                }
                Err(broadcast::error::RecvError::Lagged(n)) => {
                    eprintln!("⚠️ Webhook dispatcher lagged, missed {} events", n);
                }
                Err(broadcast::error::RecvError::Closed) => {
                    eprintln!("Webhook dispatcher: channel closed, exiting");
                    break;
                }
            }
        }
    });
}

fn matches_filter(webhook: &Webhook, event_name: &str) -> bool {
    webhook
        .events
        .iter()
        .any(|e| e == "*" || e == event_name)
}

async fn deliver_webhooks(
    store: &Arc<WebhookStore>,
    client: &reqwest::Client,
    event_name: &str,
    data: serde_json::Value,
) {
    for webhook in store.list() {
        if !matches_filter(&webhook, event_name) {
            continue;
        }
        let outcome = deliver_one(client, &webhook, event_name, &data).await;
        match outcome {
            Ok(status) => store.record_delivery(&webhook.id, status < 400, &status.to_string()),
            Err(e) => {
                eprintln!("⚠️ Webhook {} delivery error: {e}", webhook.id);
                store.record_delivery(&webhook.id, false, "error");
            }
        }
    }
}

/// POST one event to one webhook. Returns the upstream HTTP status.
pub async fn deliver_one(
    client: &reqwest::Client,
    webhook: &Webhook,
    event_name: &str,
    data: &serde_json::Value,
) -> Result<u16, String> {
    let payload = serde_json::json!({
        "event": event_name,
        "data": data,
        "timestamp": store::now_rfc3339(),
    });
    let body = serde_json::to_string(&payload).unwrap_or_default();

    let mut request = client
        .post(&webhook.url)
        .header("Content-Type", "application/json")
        .header("X-Mesh-Event", event_name)
        .header("X-Mesh-Webhook-Id", &webhook.id);

    // HMAC-SHA256 signature if a secret is set
    if let Some(ref secret) = webhook.secret
        && let Ok(mut mac) = HmacSha256::new_from_slice(secret.as_bytes())
    {
        mac.update(body.as_bytes());
        let signature = hex::encode(mac.finalize().into_bytes());
        request = request.header("X-Mesh-Signature", format!("sha256={}", signature));
    }

    match request.body(body).send().await {
        Ok(resp) => Ok(resp.status().as_u16()),
        Err(e) => Err(e.to_string()),
    }
}
