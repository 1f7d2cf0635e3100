use crate::amp::{envelope, router::RouterCtx};
use crate::error::ApiError;
use crate::events::MeshEvent;
use crate::keys;
use crate::models::FederationDelivery;
use base64::engine::general_purpose::URL_SAFE_NO_PAD;
use base64::Engine;
use std::path::{Path, PathBuf};
use std::sync::Mutex;
use std::time::{Duration, Instant};

const DELIVERED_TTL: Duration = Duration::from_secs(24 * 3600);
const GC_INTERVAL: Duration = Duration::from_secs(3600);

/// Replay protection for in-bound federation: one marker file per delivered
/// envelope id under `federation/delivered/`, garbage-collected after 24 h.
pub struct FederationLog {
    dir: PathBuf,
    last_gc: Mutex<Option<Instant>>,
}

impl FederationLog {
    pub fn new(data_dir: &Path) -> Self {
        FederationLog {
            dir: data_dir.join("federation").join("delivered"),
            last_gc: Mutex::new(None),
        }
    }

    fn marker(&self, id: &str) -> PathBuf {
        self.dir.join(URL_SAFE_NO_PAD.encode(id))
    }

    /// Returns true when the id was already delivered; otherwise records it.
    pub fn seen_or_record(&self, id: &str) -> bool {
        self.maybe_gc();
        let path = self.marker(id);
        if path.exists() {
            return true;
        }
        if let Some(parent) = path.parent() {
            let _ = std::fs::create_dir_all(parent);
        }
        if let Err(e) = std::fs::write(&path, chrono::Utc::now().to_rfc3339()) {
            eprintln!("⚠️  Failed to record federation delivery marker: {e}");
        }
        false
    }

    fn maybe_gc(&self) {
        {
            let mut last = self.last_gc.lock().unwrap_or_else(|e| e.into_inner());
            if let Some(t) = *last
                && t.elapsed() < GC_INTERVAL
            {
                return;
            }
            *last = Some(Instant::now());
        }
        let Ok(entries) = std::fs::read_dir(&self.dir) else {
            return;
        };
        for entry in entries.filter_map(|e| e.ok()) {
            let stale = entry
                .metadata()
                .and_then(|m| m.modified())
                .map(|t| t.elapsed().map(|e| e > DELIVERED_TTL).unwrap_or(false))
                .unwrap_or(false);
            if stale {
                let _ = std::fs::remove_file(entry.path());
            }
        }
    }
}

/// In-bound delivery from a foreign provider. The provider identity comes
/// from the `X-AMP-Provider` header; rate limiting and replay checks happen
/// in the HTTP adapter and here respectively.
pub async fn deliver_federated(
    ctx: &RouterCtx<'_>,
    log: &FederationLog,
    provider: &str,
    body: FederationDelivery,
) -> Result<serde_json::Value, ApiError> {
    let env = body.envelope;
    let payload = body.payload;

    if env.id.is_empty() {
        return Err(ApiError::missing_field("envelope.id"));
    }
    if log.seen_or_record(&env.id) {
        return Err(ApiError::duplicate_message(format!(
            "Envelope {} was already delivered via federation",
            env.id
        )));
    }

    let (sender_public_key_hex, signature_verified) = match body.sender_public_key.as_deref() {
        Some(pem) if !env.signature.is_empty() => {
            let pub_hex = keys::extract_public_key_hex(pem)?;
            let ok = keys::verify(&pub_hex, &envelope::canonical_for(&env, &payload), &env.signature);
            if !ok {
                eprintln!(
                    "⚠️  Federation signature verification failed for {} via {provider}",
                    env.from
                );
            }
            (Some(pub_hex), Some(ok))
        }
        Some(pem) => (keys::extract_public_key_hex(pem).ok(), None),
        None => (None, None),
    };

    let name = env.to.split('@').next().unwrap_or_default().to_lowercase();
    let self_host = ctx
        .hosts
        .get_self_host()
        .ok_or_else(|| ApiError::internal("Self host is not configured"))?;

    if let Some(recipient) = ctx.registry.get_agent_by_name(&name, &self_host.id) {
        crate::amp::router::deliver_local(
            ctx,
            &recipient,
            &env,
            &payload,
            None,
            sender_public_key_hex,
            signature_verified,
            "federation",
        )
        .await?;
        return Ok(serde_json::json!({
            "status": "delivered",
            "method": "federation",
            "id": env.id,
        }));
    }

    if let Some(known) = ctx.registry.get_agent_by_name_any_host(&name) {
        let env_id = env.id.clone();
        ctx.relay
            .queue_message(&known.id, env, payload, sender_public_key_hex)?;
        ctx.events.publish(MeshEvent::MessageQueued {
            agent_id: known.id,
            envelope_id: env_id.clone(),
        });
        return Ok(serde_json::json!({
            "status": "queued",
            "method": "relay",
            "id": env_id,
        }));
    }

    Err(ApiError::not_found(format!("Agent '{name}' not found on this host")))
}
