// Route module decomposition — each domain area in its own file.
// Shared request guards live here; route functions in submodules.

mod agents;
mod amp_routes;
mod hosts_routes;
mod meetings_routes;
mod messages;
mod stream;
mod system;
mod webhook_routes;

// --- Re-exports (all route functions used by lib.rs mount) ---

pub use agents::{
    agent_lookup, create_agent, delete_agent, delete_session, get_agent, get_session_status,
    link_session, list_agents, search_agents, send_session_command, update_agent,
};
pub use amp_routes::{
    amp_health, amp_info, amp_list_agents, amp_me, amp_me_delete, amp_me_update, amp_register,
    amp_resolve, amp_route, batch_ack_pending, delete_pending, federation_deliver, list_pending,
    read_receipt, revoke_key, rotate_key, rotate_keys,
};
pub use hosts_routes::{
    add_host, delete_host, exchange_peers_route, host_health, hosts_identity, list_hosts,
    register_peer_route, set_organization, sync_get, sync_post, update_host,
};
pub use meetings_routes::{
    create_meeting, delete_meeting, get_meeting, list_meetings, update_meeting,
};
pub use messages::{
    compose_message, delete_message, forward_message, get_messages, meeting_messages,
    patch_message,
};
pub use stream::status_stream;
pub use system::{
    api_config, api_sessions, bad_request, not_found, too_many_requests, unprocessable,
};
pub use webhook_routes::{create_webhook, delete_webhook, get_webhook, list_webhooks, test_webhook};

// --- Shared request guards ---

use crate::amp::auth::AuthStore;
use crate::amp::router::RouteAuth;
use crate::error::ApiError;
use crate::hosts::HostsStore;
use rocket::request::{FromRequest, Outcome, Request};

/// `Authorization: Bearer <token>`
pub struct BearerToken(pub String);

#[rocket::async_trait]
impl<'r> FromRequest<'r> for BearerToken {
    type Error = ();

    async fn from_request(req: &'r Request<'_>) -> Outcome<Self, Self::Error> {
        if let Some(auth) = req.headers().get_one("Authorization")
            && let Some(token) = auth.strip_prefix("Bearer ")
        {
            return Outcome::Success(BearerToken(token.trim().to_string()));
        }
        Outcome::Forward(rocket::http::Status::Unauthorized)
    }
}

/// AMP routing headers carried alongside `/v1/route` bodies.
pub struct AmpHeaders {
    pub forwarded_from: Option<String>,
    pub envelope_id: Option<String>,
    pub signature: Option<String>,
    pub provider: Option<String>,
}

#[rocket::async_trait]
impl<'r> FromRequest<'r> for AmpHeaders {
    type Error = ();

    async fn from_request(req: &'r Request<'_>) -> Outcome<Self, Self::Error> {
        let get = |name: &str| req.headers().get_one(name).map(|s| s.trim().to_string());
        Outcome::Success(AmpHeaders {
            forwarded_from: get("X-Forwarded-From"),
            envelope_id: get("X-AMP-Envelope-Id"),
            signature: get("X-AMP-Signature").filter(|s| !s.is_empty()),
            provider: get("X-AMP-Provider"),
        })
    }
}

/// Resolve route-path identity: a configured mesh peer named by
/// `X-Forwarded-From`, or the bearer of a live API key.
pub fn authenticate_route(
    auth: &AuthStore,
    hosts: &HostsStore,
    token: Option<&BearerToken>,
    forwarded_from: Option<&str>,
) -> Result<RouteAuth, ApiError> {
    if let Some(fwd) = forwarded_from.filter(|s| !s.is_empty()) {
        let peer = hosts
            .find_host_by_any_identifier(fwd)
            .filter(|h| h.host_type == "remote")
            .ok_or_else(|| {
                ApiError::unauthorized(format!("'{fwd}' is not a configured mesh peer"))
            })?;
        return Ok(RouteAuth::MeshPeer(peer.id));
    }
    let token = token.ok_or_else(|| ApiError::unauthorized("Missing API key"))?;
    let record = auth
        .authenticate(&token.0)
        .ok_or_else(|| ApiError::unauthorized("Invalid or revoked API key"))?;
    Ok(RouteAuth::Agent(record))
}

/// API-key-only authentication for the agent-facing `/v1` endpoints.
pub fn authenticate_agent(
    auth: &AuthStore,
    token: Option<&BearerToken>,
) -> Result<crate::models::ApiKeyRecord, ApiError> {
    let token = token.ok_or_else(|| ApiError::unauthorized("Missing API key"))?;
    auth.authenticate(&token.0)
        .ok_or_else(|| ApiError::unauthorized("Invalid or revoked API key"))
}
