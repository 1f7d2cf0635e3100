use crate::error::ApiError;
use crate::events::EventBus;
use crate::hosts::{AddHostOutcome, AdoptOutcome, HostsStore};
use crate::mesh::{self, PropagationSet};
use crate::models::{
    CreateHost, ExchangePeersRequest, Host, RegisterPeerRequest, UpdateHost,
};
use crate::store;
use crate::HttpClient;
use rocket::serde::json::Json;
use rocket::{delete, get, post, put, State};
use serde::Deserialize;

#[get("/api/hosts")]
pub fn list_hosts(hosts: &State<HostsStore>) -> Json<Vec<Host>> {
    Json(hosts.get_hosts())
}

#[post("/api/hosts", format = "json", data = "<body>")]
pub fn add_host(
    hosts: &State<HostsStore>,
    body: Json<CreateHost>,
) -> Result<Json<serde_json::Value>, ApiError> {
    let body = body.into_inner();
    let host = Host {
        id: body.id,
        name: body.name,
        url: body.url.trim_end_matches('/').to_string(),
        host_type: "remote".to_string(),
        aliases: body.aliases,
        enabled: body.enabled,
        description: body.description,
        synced_at: None,
        sync_source: Some("manual".to_string()),
        tailscale: None,
    };
    match hosts.add_host(host)? {
        AddHostOutcome::Added(host) => {
            Ok(Json(serde_json::json!({ "added": true, "alreadyKnown": false, "host": host })))
        }
        AddHostOutcome::AlreadyKnown(existing) => Ok(Json(serde_json::json!({
            "added": false,
            "alreadyKnown": true,
            "existingHostId": existing,
        }))),
    }
}

#[put("/api/hosts/<id>", format = "json", data = "<body>")]
pub fn update_host(
    hosts: &State<HostsStore>,
    id: &str,
    body: Json<UpdateHost>,
) -> Result<Json<Host>, ApiError> {
    hosts.update_host(id, body.into_inner()).map(Json)
}

#[delete("/api/hosts/<id>")]
pub fn delete_host(
    hosts: &State<HostsStore>,
    id: &str,
) -> Result<Json<serde_json::Value>, ApiError> {
    hosts.delete_host(id)?;
    Ok(Json(serde_json::json!({ "deleted": true, "id": id })))
}

/// Who this host is, as peers would see it.
#[get("/api/hosts/identity")]
pub fn hosts_identity(hosts: &State<HostsStore>) -> Result<Json<serde_json::Value>, ApiError> {
    let me = hosts
        .get_self_host()
        .ok_or_else(|| ApiError::internal("Self host is not configured"))?;
    Ok(Json(serde_json::json!({
        "host": mesh::peer_info(&me),
        "organization": hosts.organization(),
    })))
}

#[get("/api/hosts/health?<url>")]
pub async fn host_health(
    client: &State<HttpClient>,
    url: Option<&str>,
) -> Result<Json<serde_json::Value>, ApiError> {
    let url = url
        .map(str::trim)
        .filter(|s| !s.is_empty())
        .ok_or_else(|| ApiError::missing_field("url"))?;
    let reachable = mesh::health_probe(&client.0, url).await;
    Ok(Json(serde_json::json!({ "url": url, "reachable": reachable })))
}

/// Manual sync driver: offer ourselves to every enabled peer.
#[post("/api/hosts/sync")]
pub async fn sync_post(
    hosts: &State<HostsStore>,
    propagation: &State<PropagationSet>,
    client: &State<HttpClient>,
) -> Result<Json<serde_json::Value>, ApiError> {
    mesh::sync_all(hosts, propagation, &client.0).await.map(Json)
}

/// Mesh status: reachability and coarse session counts per peer.
#[get("/api/hosts/sync")]
pub async fn sync_get(
    hosts: &State<HostsStore>,
    client: &State<HttpClient>,
) -> Json<serde_json::Value> {
    Json(mesh::mesh_status(hosts, &client.0).await)
}

#[post("/api/hosts/register-peer", format = "json", data = "<body>")]
pub fn register_peer_route(
    hosts: &State<HostsStore>,
    propagation: &State<PropagationSet>,
    events: &State<EventBus>,
    body: Json<RegisterPeerRequest>,
) -> Result<Json<serde_json::Value>, ApiError> {
    mesh::register_peer(body.into_inner(), hosts, propagation, events).map(Json)
}

#[post("/api/hosts/exchange-peers", format = "json", data = "<body>")]
pub async fn exchange_peers_route(
    hosts: &State<HostsStore>,
    propagation: &State<PropagationSet>,
    client: &State<HttpClient>,
    body: Json<ExchangePeersRequest>,
) -> Result<Json<serde_json::Value>, ApiError> {
    mesh::exchange_peers(body.into_inner(), hosts, propagation, &client.0).await.map(Json)
}

#[derive(Debug, Deserialize)]
pub struct SetOrganization {
    pub organization: String,
}

/// Explicit user action: the `unset → set` transition. Anything else is a
/// mismatch.
#[post("/api/hosts/organization", format = "json", data = "<body>")]
pub fn set_organization(
    hosts: &State<HostsStore>,
    body: Json<SetOrganization>,
) -> Result<Json<serde_json::Value>, ApiError> {
    let name = body.organization.trim().to_lowercase();
    if name.is_empty() {
        return Err(ApiError::missing_field("organization"));
    }
    if !name.chars().all(|c| c.is_ascii_lowercase() || c.is_ascii_digit() || c == '-') {
        return Err(ApiError::invalid_field(
            "organization",
            "Organization must be lowercase letters, digits and dashes",
        ));
    }
    match hosts.adopt_organization(&name, &store::now_rfc3339(), "user") {
        AdoptOutcome::Adopted => Ok(Json(serde_json::json!({
            "adopted": true,
            "organization": hosts.organization(),
        }))),
        AdoptOutcome::AlreadySet => Ok(Json(serde_json::json!({
            "adopted": false,
            "organization": hosts.organization(),
        }))),
        AdoptOutcome::Mismatch => {
            let current = hosts.organization().map(|o| o.organization).unwrap_or_default();
            Err(ApiError::conflict(format!(
                "Organization is already set to '{current}' and cannot be renamed"
            )))
        }
    }
}
