use crate::amp::auth::AuthStore;
use crate::amp::federation::{self, FederationLog};
use crate::amp::register::{self, RegisterOutcome};
use crate::amp::router::{self, RouteAuth, RouterCtx, MAX_PAYLOAD_BYTES};
use crate::error::ApiError;
use crate::events::EventBus;
use crate::hosts::HostsStore;
use crate::keys::{self, KeyStore};
use crate::mailbox::Mailbox;
use crate::models::{
    Agent, AmpIdentity, BatchAckRequest, FederationDelivery, RouteOutcome, RouteRequest,
};
use crate::rate_limit::{RateLimitConfig, RateLimited, RateLimiter};
use crate::registry::Registry;
use crate::relay::RelayQueue;
use crate::session::SessionSupervisor;
use crate::store;
use crate::HttpClient;
use rocket::response::status::Created;
use rocket::serde::json::Json;
use rocket::{delete, get, patch, post, State};

use super::{authenticate_agent, authenticate_route, AmpHeaders, BearerToken};

// Rocket's State extractors make the router context assembly noisy but
// explicit: every handler names exactly the singletons it touches.
macro_rules! router_ctx {
    ($hosts:expr, $registry:expr, $keys:expr, $relay:expr, $mailbox:expr, $supervisor:expr, $events:expr, $client:expr) => {
        RouterCtx {
            hosts: $hosts,
            registry: $registry,
            key_store: $keys,
            relay: $relay,
            mailbox: $mailbox,
            supervisor: $supervisor,
            events: $events,
            client: &$client.0,
        }
    };
}

#[get("/v1/health")]
pub fn amp_health(hosts: &State<HostsStore>) -> Json<serde_json::Value> {
    Json(serde_json::json!({
        "status": "ok",
        "service": "ai-maestro",
        "protocol": crate::models::AMP_VERSION,
        "version": env!("CARGO_PKG_VERSION"),
        "organization_set": hosts.organization().is_some(),
    }))
}

#[get("/v1/info")]
pub fn amp_info(hosts: &State<HostsStore>, registry: &State<Registry>) -> Json<serde_json::Value> {
    let org = hosts.organization();
    let me = hosts.get_self_host();
    Json(serde_json::json!({
        "service": "ai-maestro",
        "protocol": crate::models::AMP_VERSION,
        "version": env!("CARGO_PKG_VERSION"),
        "provider_domain": crate::amp::address::provider_domain(
            org.as_ref().map(|o| o.organization.as_str())
        ),
        "organization": org.map(|o| o.organization),
        "host": me.map(|h| h.id),
        "agents": registry.amp_registered_agents().len(),
        "endpoints": {
            "register": "/v1/register",
            "route": "/v1/route",
            "pending": "/v1/messages/pending",
            "resolve": "/v1/agents/resolve/{address}",
            "federation": "/v1/federation/deliver",
        },
    }))
}

#[post("/v1/register", format = "json", data = "<body>")]
pub fn amp_register(
    hosts: &State<HostsStore>,
    registry: &State<Registry>,
    key_store: &State<KeyStore>,
    auth: &State<AuthStore>,
    token: Option<BearerToken>,
    body: Json<crate::models::RegisterRequest>,
) -> Result<Created<Json<RegisterOutcome>>, ApiError> {
    let created_by = token
        .map(|t| t.0)
        .filter(|t| t.starts_with("uk_"))
        .map(|t| format!("user:{}", crate::amp::auth::hash_key(&t)));
    let outcome =
        register::register_agent(body.into_inner(), created_by, hosts, registry, key_store, auth)?;
    Ok(Created::new("/v1/agents/me").body(Json(outcome)))
}

#[post("/v1/route", format = "json", data = "<body>")]
#[allow(clippy::too_many_arguments)]
pub async fn amp_route(
    hosts: &State<HostsStore>,
    registry: &State<Registry>,
    key_store: &State<KeyStore>,
    auth: &State<AuthStore>,
    relay: &State<RelayQueue>,
    mailbox: &State<Mailbox>,
    supervisor: &State<SessionSupervisor>,
    events: &State<EventBus>,
    client: &State<HttpClient>,
    limiter: &State<RateLimiter>,
    rates: &State<RateLimitConfig>,
    headers: AmpHeaders,
    token: Option<BearerToken>,
    body: Json<RouteRequest>,
) -> Result<RateLimited<RouteOutcome>, ApiError> {
    let route_auth = authenticate_route(
        auth,
        hosts,
        token.as_ref(),
        headers.forwarded_from.as_deref(),
    )?;

    let rl = limiter.check_with_info(
        &route_auth.rate_key(),
        rates.route_max,
        rates.route_window_secs,
    );
    if !rl.allowed {
        return Err(ApiError::rate_limited(format!(
            "Rate limited: max {} messages per minute",
            rl.limit
        ))
        .with_extra(serde_json::json!({ "retry_after_secs": rl.retry_after_secs }))
        .with_header("X-RateLimit-Limit", rl.limit.to_string())
        .with_header("X-RateLimit-Remaining", "0")
        .with_header("X-RateLimit-Reset", rl.retry_after_secs.to_string())
        .with_header("Retry-After", rl.retry_after_secs.to_string()));
    }

    // 1 MiB cap on the serialized payload; exactly at the boundary passes.
    if let Some(ref payload) = body.payload {
        let size = serde_json::to_vec(payload).map(|v| v.len()).unwrap_or(0);
        if size > MAX_PAYLOAD_BYTES {
            return Err(ApiError::payload_too_large(format!(
                "Payload is {size} bytes; the limit is {MAX_PAYLOAD_BYTES}"
            )));
        }
    }

    let ctx = router_ctx!(hosts, registry, key_store, relay, mailbox, supervisor, events, client);
    let outcome = router::route_message(
        &ctx,
        &route_auth,
        &body,
        headers.envelope_id.clone(),
        headers.signature.clone(),
    )
    .await?;
    Ok(RateLimited::new(Json(outcome), rl))
}

// --- Relay pickup ---

#[get("/v1/messages/pending?<limit>")]
pub fn list_pending(
    auth: &State<AuthStore>,
    relay: &State<RelayQueue>,
    token: Option<BearerToken>,
    limit: Option<usize>,
) -> Result<Json<serde_json::Value>, ApiError> {
    let record = authenticate_agent(auth, token.as_ref())?;
    let messages = relay.get_pending_messages(&record.agent_id, limit.unwrap_or(100));
    let count = messages.len();
    Ok(Json(serde_json::json!({ "messages": messages, "count": count })))
}

#[delete("/v1/messages/pending?<id>")]
pub fn delete_pending(
    auth: &State<AuthStore>,
    relay: &State<RelayQueue>,
    token: Option<BearerToken>,
    id: Option<&str>,
) -> Result<Json<serde_json::Value>, ApiError> {
    let record = authenticate_agent(auth, token.as_ref())?;
    let id = id.ok_or_else(|| ApiError::missing_field("id"))?;
    let acknowledged = relay.acknowledge_message(&record.agent_id, id);
    Ok(Json(serde_json::json!({ "acknowledged": acknowledged, "id": id })))
}

#[post("/v1/messages/pending", format = "json", data = "<body>")]
pub fn batch_ack_pending(
    auth: &State<AuthStore>,
    relay: &State<RelayQueue>,
    token: Option<BearerToken>,
    body: Json<BatchAckRequest>,
) -> Result<Json<serde_json::Value>, ApiError> {
    let record = authenticate_agent(auth, token.as_ref())?;
    if body.ids.len() > 100 {
        return Err(ApiError::invalid_field("ids", "At most 100 ids per batch"));
    }
    let acknowledged = relay.acknowledge_messages(&record.agent_id, &body.ids);
    Ok(Json(serde_json::json!({ "acknowledged": acknowledged })))
}

#[post("/v1/messages/<id>/read")]
#[allow(clippy::too_many_arguments)]
pub async fn read_receipt(
    hosts: &State<HostsStore>,
    registry: &State<Registry>,
    key_store: &State<KeyStore>,
    auth: &State<AuthStore>,
    relay: &State<RelayQueue>,
    mailbox: &State<Mailbox>,
    supervisor: &State<SessionSupervisor>,
    events: &State<EventBus>,
    client: &State<HttpClient>,
    token: Option<BearerToken>,
    id: &str,
) -> Result<Json<serde_json::Value>, ApiError> {
    let record = authenticate_agent(auth, token.as_ref())?;
    let ctx = router_ctx!(hosts, registry, key_store, relay, mailbox, supervisor, events, client);
    router::send_read_receipt(&ctx, &record, id).await.map(Json)
}

// --- Agent directory ---

#[get("/v1/agents")]
pub fn amp_list_agents(registry: &State<Registry>) -> Json<serde_json::Value> {
    let agents: Vec<serde_json::Value> = registry
        .amp_registered_agents()
        .iter()
        .map(|a| {
            let identity = a.amp_identity.as_ref();
            serde_json::json!({
                "name": a.name,
                "alias": a.alias,
                "address": identity.map(|i| i.amp_address.clone()),
                "fingerprint": identity.map(|i| i.fingerprint.clone()),
                "online": a.is_online(),
            })
        })
        .collect();
    let count = agents.len();
    Json(serde_json::json!({ "agents": agents, "count": count }))
}

#[get("/v1/agents/me")]
pub fn amp_me(
    registry: &State<Registry>,
    auth: &State<AuthStore>,
    token: Option<BearerToken>,
) -> Result<Json<Agent>, ApiError> {
    let record = authenticate_agent(auth, token.as_ref())?;
    registry
        .get_agent(&record.agent_id)
        .map(Json)
        .ok_or_else(|| ApiError::not_found("Agent not found"))
}

#[patch("/v1/agents/me", format = "json", data = "<body>")]
pub fn amp_me_update(
    registry: &State<Registry>,
    auth: &State<AuthStore>,
    token: Option<BearerToken>,
    body: Json<serde_json::Value>,
) -> Result<Json<Agent>, ApiError> {
    let record = authenticate_agent(auth, token.as_ref())?;
    registry.update_agent(&record.agent_id, &body.into_inner()).map(Json)
}

/// Self-deregistration: every key is revoked, the record is soft-deleted
/// with a backup snapshot.
#[delete("/v1/agents/me")]
pub fn amp_me_delete(
    registry: &State<Registry>,
    auth: &State<AuthStore>,
    events: &State<EventBus>,
    token: Option<BearerToken>,
) -> Result<Json<serde_json::Value>, ApiError> {
    let record = authenticate_agent(auth, token.as_ref())?;
    auth.revoke_all_for_agent(&record.agent_id);
    let agent = registry.delete_agent(&record.agent_id, true)?;
    auth.forget_agent(&record.agent_id);
    events.publish(crate::events::MeshEvent::AgentDeleted {
        id: agent.id.clone(),
        name: agent.name,
    });
    Ok(Json(serde_json::json!({ "deregistered": true, "id": agent.id })))
}

#[get("/v1/agents/resolve/<addr>")]
#[allow(clippy::too_many_arguments)]
pub fn amp_resolve(
    hosts: &State<HostsStore>,
    registry: &State<Registry>,
    key_store: &State<KeyStore>,
    relay: &State<RelayQueue>,
    mailbox: &State<Mailbox>,
    supervisor: &State<SessionSupervisor>,
    events: &State<EventBus>,
    client: &State<HttpClient>,
    addr: &str,
) -> Result<Json<serde_json::Value>, ApiError> {
    let ctx = router_ctx!(hosts, registry, key_store, relay, mailbox, supervisor, events, client);
    router::resolve_agent_address(&ctx, addr).map(Json)
}

// --- Key lifecycle ---

#[post("/v1/auth/revoke-key")]
pub fn revoke_key(
    auth: &State<AuthStore>,
    token: Option<BearerToken>,
) -> Result<Json<serde_json::Value>, ApiError> {
    let record = authenticate_agent(auth, token.as_ref())?;
    auth.revoke(&record.hash)?;
    Ok(Json(serde_json::json!({ "revoked": true })))
}

/// Swap the API key, keeping the same identity.
#[post("/v1/auth/rotate-key")]
pub fn rotate_key(
    auth: &State<AuthStore>,
    token: Option<BearerToken>,
) -> Result<Json<serde_json::Value>, ApiError> {
    let record = authenticate_agent(auth, token.as_ref())?;
    auth.revoke(&record.hash)?;
    let (api_key, _) = auth.issue(
        &record.agent_id,
        &record.tenant_id,
        &record.address,
        record.created_by.clone(),
    )?;
    Ok(Json(serde_json::json!({ "rotated": true, "api_key": api_key })))
}

/// Generate a fresh Ed25519 keypair for the agent and update its
/// fingerprint; the API key stays valid.
#[post("/v1/auth/rotate-keys")]
pub fn rotate_keys(
    registry: &State<Registry>,
    key_store: &State<KeyStore>,
    auth: &State<AuthStore>,
    token: Option<BearerToken>,
) -> Result<Json<serde_json::Value>, ApiError> {
    let record = authenticate_agent(auth, token.as_ref())?;
    let agent = registry
        .get_agent(&record.agent_id)
        .ok_or_else(|| ApiError::not_found("Agent not found"))?;

    let kp = keys::generate_key_pair();
    key_store.save_key_pair(&agent.id, &kp)?;
    let fingerprint = keys::fingerprint(&kp.public_hex)?;
    let identity = AmpIdentity {
        fingerprint: fingerprint.clone(),
        public_key_hex: kp.public_hex.clone(),
        key_algorithm: "Ed25519".to_string(),
        created_at: store::now_rfc3339(),
        amp_address: record.address.clone(),
        tenant: record.tenant_id.clone(),
    };
    registry.mark_amp_registered(&agent.id, identity)?;
    let public_key = keys::public_key_to_pem(&kp.public_hex)?;
    Ok(Json(serde_json::json!({
        "rotated": true,
        "fingerprint": fingerprint,
        "public_key": public_key,
    })))
}

// --- Federation ---

#[post("/v1/federation/deliver", format = "json", data = "<body>")]
#[allow(clippy::too_many_arguments)]
pub async fn federation_deliver(
    hosts: &State<HostsStore>,
    registry: &State<Registry>,
    key_store: &State<KeyStore>,
    relay: &State<RelayQueue>,
    mailbox: &State<Mailbox>,
    supervisor: &State<SessionSupervisor>,
    events: &State<EventBus>,
    client: &State<HttpClient>,
    limiter: &State<RateLimiter>,
    rates: &State<RateLimitConfig>,
    log: &State<FederationLog>,
    headers: AmpHeaders,
    body: Json<FederationDelivery>,
) -> Result<Json<serde_json::Value>, ApiError> {
    let provider = headers
        .provider
        .as_deref()
        .filter(|p| !p.is_empty())
        .ok_or_else(|| ApiError::missing_field("X-AMP-Provider"))?;

    let rl = limiter.check_with_info(
        &format!("federation:{provider}"),
        rates.federation_max,
        rates.federation_window_secs,
    );
    if !rl.allowed {
        return Err(ApiError::rate_limited(format!(
            "Rate limited: max {} federation deliveries per minute",
            rl.limit
        ))
        .with_header("X-RateLimit-Limit", rl.limit.to_string())
        .with_header("X-RateLimit-Remaining", "0")
        .with_header("X-RateLimit-Reset", rl.retry_after_secs.to_string())
        .with_header("Retry-After", rl.retry_after_secs.to_string()));
    }

    let ctx = router_ctx!(hosts, registry, key_store, relay, mailbox, supervisor, events, client);
    federation::deliver_federated(&ctx, log, provider, body.into_inner())
        .await
        .map(Json)
}
