use crate::aggregator::Aggregator;
use crate::amp::auth::AuthStore;
use crate::error::ApiError;
use crate::events::{EventBus, MeshEvent};
use crate::hosts::HostsStore;
use crate::mailbox::Mailbox;
use crate::models::{Agent, CreateAgent, LinkSession, SendCommand};
use crate::registry::Registry;
use crate::session::SessionSupervisor;
use crate::HttpClient;
use rocket::http::Status;
use rocket::serde::json::Json;
use rocket::{delete, get, patch, post, State};

/// Aggregated fleet view by default; `?local=true` returns just this
/// host's registry (the form peers fetch during aggregation).
#[get("/api/agents?<local>")]
pub async fn list_agents(
    registry: &State<Registry>,
    hosts: &State<HostsStore>,
    aggregator: &State<Aggregator>,
    client: &State<HttpClient>,
    local: Option<bool>,
) -> Result<Json<serde_json::Value>, ApiError> {
    if local.unwrap_or(false) {
        let agents = registry.list_agents();
        return Ok(Json(serde_json::to_value(agents).unwrap_or_default()));
    }
    let view = aggregator.load_all_agents(hosts, registry, &client.0).await;
    Ok(Json(serde_json::to_value(view).unwrap_or_default()))
}

#[post("/api/agents", format = "json", data = "<body>")]
pub fn create_agent(
    registry: &State<Registry>,
    hosts: &State<HostsStore>,
    events: &State<EventBus>,
    body: Json<CreateAgent>,
) -> Result<Json<Agent>, ApiError> {
    let self_host = hosts
        .get_self_host()
        .ok_or_else(|| ApiError::internal("Self host is not configured"))?;
    let agent = registry.create_agent(body.into_inner(), &self_host.id)?;
    events.publish(MeshEvent::AgentCreated(Box::new(agent.clone())));
    Ok(Json(agent))
}

#[get("/api/agents/search?<q>")]
pub fn search_agents(registry: &State<Registry>, q: Option<&str>) -> Json<Vec<Agent>> {
    Json(registry.search_agents(q.unwrap_or_default()))
}

/// Mesh discovery target: peers ask whether this host serves `name`.
#[get("/api/agents/lookup?<name>")]
pub fn agent_lookup(
    registry: &State<Registry>,
    hosts: &State<HostsStore>,
    name: Option<&str>,
) -> Result<Json<serde_json::Value>, ApiError> {
    let name = name
        .map(str::trim)
        .filter(|s| !s.is_empty())
        .ok_or_else(|| ApiError::missing_field("name"))?;
    let self_id = hosts.get_self_host().map(|h| h.id).unwrap_or_default();
    match registry
        .get_agent_by_name(name, &self_id)
        .or_else(|| registry.find_by_identifier(name).filter(|a| a.host_id == self_id))
    {
        Some(agent) => Ok(Json(serde_json::json!({ "found": true, "agent": agent }))),
        None => Ok(Json(serde_json::json!({ "found": false }))),
    }
}

#[get("/api/agents/<id>")]
pub fn get_agent(registry: &State<Registry>, id: &str) -> Result<Json<Agent>, ApiError> {
    registry
        .get_agent(id)
        .map(Json)
        .ok_or_else(|| ApiError::not_found(format!("Agent {id} not found")))
}

#[patch("/api/agents/<id>", format = "json", data = "<body>")]
pub fn update_agent(
    registry: &State<Registry>,
    id: &str,
    body: Json<serde_json::Value>,
) -> Result<Json<Agent>, ApiError> {
    registry.update_agent(id, &body.into_inner()).map(Json)
}

/// Soft delete (with backup) by default. `?hard=true` also revokes every
/// API key and wipes the agent directory plus all three mailboxes.
#[delete("/api/agents/<id>?<hard>&<backup>")]
pub fn delete_agent(
    registry: &State<Registry>,
    auth: &State<AuthStore>,
    mailbox: &State<Mailbox>,
    events: &State<EventBus>,
    id: &str,
    hard: Option<bool>,
    backup: Option<bool>,
) -> Result<Json<serde_json::Value>, ApiError> {
    let hard = hard.unwrap_or(false);
    let agent = if hard {
        auth.revoke_all_for_agent(id);
        let agent = registry.delete_agent(id, false)?;
        auth.forget_agent(id);
        mailbox.wipe_agent(&agent.name);
        agent
    } else {
        registry.delete_agent(id, backup.unwrap_or(true))?
    };
    events.publish(MeshEvent::AgentDeleted {
        id: agent.id.clone(),
        name: agent.name.clone(),
    });
    Ok(Json(serde_json::json!({ "deleted": true, "id": agent.id, "hard": hard })))
}

// --- Session operations ---

#[post("/api/agents/<id>/session", format = "json", data = "<body>")]
pub async fn link_session(
    registry: &State<Registry>,
    supervisor: &State<SessionSupervisor>,
    id: &str,
    body: Json<LinkSession>,
) -> Result<Json<Agent>, ApiError> {
    let body = body.into_inner();
    let agent = registry.link_session(id, &body.tmux_session_name, body.working_directory.as_deref())?;

    if body.wake && !supervisor.session_exists(&body.tmux_session_name).await {
        let program = agent
            .program
            .clone()
            .ok_or_else(|| ApiError::invalid_request("Agent has no program configured to wake"))?;
        let workdir = body
            .working_directory
            .clone()
            .or_else(|| agent.working_directory.clone())
            .unwrap_or_else(|| "~".to_string());
        supervisor
            .wake(&body.tmux_session_name, &workdir, &program, &agent.program_args)
            .await?;
        return registry.set_session_status(id, "online").map(Json);
    }

    let status = if supervisor.session_exists(&body.tmux_session_name).await {
        "online"
    } else {
        "offline"
    };
    registry.set_session_status(id, status).map(Json)
}

#[get("/api/agents/<id>/session")]
pub async fn get_session_status(
    registry: &State<Registry>,
    supervisor: &State<SessionSupervisor>,
    id: &str,
) -> Result<Json<serde_json::Value>, ApiError> {
    let agent = registry
        .get_agent(id)
        .ok_or_else(|| ApiError::not_found(format!("Agent {id} not found")))?;
    let Some(session) = agent.canonical_session().cloned() else {
        return Ok(Json(serde_json::json!({ "linked": false })));
    };

    let exists = supervisor.session_exists(&session.tmux_session_name).await;
    let agent = registry.set_session_status(id, if exists { "online" } else { "offline" })?;
    let (activity, hook) = supervisor.activity_status(&session.tmux_session_name);
    Ok(Json(serde_json::json!({
        "linked": true,
        "exists": exists,
        "session": agent.canonical_session(),
        "activity": activity,
        "hookStatus": hook.as_ref().map(|h| h.status.clone()),
        "idle": supervisor.idle_info(&session.tmux_session_name),
    })))
}

/// Inject a command into the agent's terminal. Refuses with 409 and
/// idleness diagnostics when the session is busy and `requireIdle` is set.
#[patch("/api/agents/<id>/session", format = "json", data = "<body>")]
pub async fn send_session_command(
    registry: &State<Registry>,
    supervisor: &State<SessionSupervisor>,
    id: &str,
    body: Json<SendCommand>,
) -> Result<Json<serde_json::Value>, (Status, Json<serde_json::Value>)> {
    let not_found = |msg: String| {
        (
            Status::NotFound,
            Json(serde_json::json!({ "error": "not_found", "message": msg })),
        )
    };

    let agent = registry
        .get_agent(id)
        .ok_or_else(|| not_found(format!("Agent {id} not found")))?;
    let session = agent
        .canonical_session()
        .cloned()
        .ok_or_else(|| not_found(format!("Agent {} has no linked session", agent.name)))?;

    if !supervisor.session_exists(&session.tmux_session_name).await {
        return Err(not_found(format!(
            "tmux session '{}' does not exist",
            session.tmux_session_name
        )));
    }

    if body.require_idle && !supervisor.is_idle(&session.tmux_session_name) {
        let info = supervisor.idle_info(&session.tmux_session_name);
        return Err((
            Status::Conflict,
            Json(serde_json::json!({
                "error": "Session is not idle",
                "idle": false,
                "timeSinceActivity": info.time_since_activity,
                "idleThreshold": info.idle_threshold,
            })),
        ));
    }

    supervisor
        .send_keys(&session.tmux_session_name, &body.command, body.add_newline)
        .await
        .map_err(|e| {
            (
                Status::InternalServerError,
                Json(serde_json::json!({ "error": "internal_error", "message": e.message })),
            )
        })?;
    registry.touch_last_active(id);
    Ok(Json(serde_json::json!({ "sent": true })))
}

#[derive(rocket::FromForm)]
pub struct DeleteSessionQuery {
    pub kill: Option<bool>,
    #[field(name = "deleteAgent")]
    pub delete_agent: Option<bool>,
}

/// Unlink the session; `?kill=true` also terminates the tmux session
/// (hibernate), `?deleteAgent=true` removes the agent record afterwards.
#[delete("/api/agents/<id>/session?<q..>")]
pub async fn delete_session(
    registry: &State<Registry>,
    supervisor: &State<SessionSupervisor>,
    auth: &State<AuthStore>,
    mailbox: &State<Mailbox>,
    events: &State<EventBus>,
    id: &str,
    q: DeleteSessionQuery,
) -> Result<Json<serde_json::Value>, ApiError> {
    let agent = registry
        .get_agent(id)
        .ok_or_else(|| ApiError::not_found(format!("Agent {id} not found")))?;

    let mut killed = false;
    if let Some(session) = agent.canonical_session()
        && q.kill.unwrap_or(false)
    {
        killed = supervisor.hibernate(&session.tmux_session_name).await;
    }
    registry.set_session_status(id, "offline")?;

    if q.delete_agent.unwrap_or(false) {
        auth.revoke_all_for_agent(id);
        let removed = registry.delete_agent(id, true)?;
        auth.forget_agent(id);
        mailbox.wipe_agent(&removed.name);
        events.publish(MeshEvent::AgentDeleted {
            id: removed.id.clone(),
            name: removed.name,
        });
        return Ok(Json(serde_json::json!({ "killed": killed, "deleted": true })));
    }
    Ok(Json(serde_json::json!({ "killed": killed, "deleted": false })))
}
