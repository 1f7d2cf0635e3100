use crate::config::Config;
use crate::hosts::HostsStore;
use crate::registry::Registry;
use crate::session::SessionSupervisor;
use rocket::serde::json::Json;
use rocket::{catch, get, Request, State};

/// Service identity. Doubles as the mesh liveness probe target: a host is
/// considered alive when this endpoint answers.
#[get("/api/config")]
pub fn api_config(hosts: &State<HostsStore>, config: &State<Config>) -> Json<serde_json::Value> {
    let me = hosts.get_self_host();
    Json(serde_json::json!({
        "service": "ai-maestro",
        "version": env!("CARGO_PKG_VERSION"),
        "hostId": me.as_ref().map(|h| h.id.clone()),
        "hostName": me.as_ref().map(|h| h.name.clone()),
        "port": config.port,
        "organization": hosts.organization().map(|o| o.organization),
        "providerDomain": crate::amp::address::provider_domain(
            hosts.organization().map(|o| o.organization).as_deref()
        ),
        "capabilities": [
            "agents",
            "sessions",
            "messages",
            "meetings",
            "amp_routing",
            "relay_queue",
            "peer_mesh",
            "federation",
            "webhooks",
            "status_stream",
        ],
    }))
}

/// Coarse session counts, consumed by peer mesh status.
#[get("/api/sessions")]
pub fn api_sessions(
    registry: &State<Registry>,
    supervisor: &State<SessionSupervisor>,
) -> Json<serde_json::Value> {
    let agents = registry.list_agents();
    let with_sessions = agents.iter().filter(|a| !a.sessions.is_empty()).count();
    let online = agents.iter().filter(|a| a.is_online()).count();
    Json(serde_json::json!({
        "total": with_sessions,
        "online": online,
        "offline": with_sessions - online,
        "tracked": supervisor.tracked_sessions().len(),
    }))
}

#[catch(404)]
pub fn not_found(req: &Request<'_>) -> Json<serde_json::Value> {
    Json(serde_json::json!({
        "error": "not_found",
        "message": format!("No route for {} {}", req.method(), req.uri()),
    }))
}

#[catch(429)]
pub fn too_many_requests() -> Json<serde_json::Value> {
    Json(serde_json::json!({
        "error": "rate_limited",
        "message": "Too many requests",
    }))
}

#[catch(422)]
pub fn unprocessable() -> Json<serde_json::Value> {
    Json(serde_json::json!({
        "error": "invalid_request",
        "message": "Request body could not be parsed",
    }))
}

#[catch(400)]
pub fn bad_request() -> Json<serde_json::Value> {
    Json(serde_json::json!({
        "error": "invalid_request",
        "message": "Malformed request",
    }))
}
