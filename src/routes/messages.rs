use crate::amp::envelope;
use crate::error::ApiError;
use crate::events::{EventBus, MeshEvent};
use crate::mailbox::{ListQuery, Mailbox};
use crate::meetings::MeetingStore;
use crate::models::{
    ComposeMessage, ForwardMessage, PatchMessage, Payload, PayloadKind, Priority, StoredMessage,
};
use crate::registry::Registry;
use rocket::serde::json::Json;
use rocket::{delete, get, patch, post, State};

#[derive(rocket::FromForm)]
pub struct MessagesQuery {
    pub agent: Option<String>,
    #[field(name = "box")]
    pub box_name: Option<String>,
    pub action: Option<String>,
    pub q: Option<String>,
    pub identifier: Option<String>,
    pub status: Option<String>,
    pub priority: Option<String>,
    pub from: Option<String>,
    pub to: Option<String>,
    pub limit: Option<usize>,
    #[field(name = "previewLength")]
    pub preview_length: Option<usize>,
}

fn parse_priority(s: &str) -> Result<Priority, ApiError> {
    serde_json::from_value(serde_json::json!(s))
        .map_err(|_| ApiError::invalid_field("priority", "Priority must be low|normal|high|urgent"))
}

/// Canonical `{agentId, name}` for a name, alias or session name. Mailboxes
/// can also belong to pseudo-senders with no registry record.
fn resolve_name(registry: &Registry, identifier: &str) -> (Option<String>, String) {
    match registry.find_by_identifier(identifier) {
        Some(agent) => (Some(agent.id), agent.name),
        None => (None, identifier.to_string()),
    }
}

#[get("/api/messages?<query..>")]
pub fn get_messages(
    registry: &State<Registry>,
    mailbox: &State<Mailbox>,
    query: MessagesQuery,
) -> Result<Json<serde_json::Value>, ApiError> {
    match query.action.as_deref() {
        Some("resolve") => {
            let identifier = query
                .identifier
                .as_deref()
                .or(query.agent.as_deref())
                .ok_or_else(|| ApiError::missing_field("identifier"))?;
            let agent = registry
                .find_by_identifier(identifier)
                .ok_or_else(|| ApiError::not_found(format!("No agent matches '{identifier}'")))?;
            Ok(Json(serde_json::json!({ "agentId": agent.id, "name": agent.name })))
        }
        Some("search") => {
            let agent = query.agent.as_deref().ok_or_else(|| ApiError::missing_field("agent"))?;
            let q = query.q.as_deref().ok_or_else(|| ApiError::missing_field("q"))?;
            let (_, name) = resolve_name(registry, agent);
            let results = mailbox.search(&name, q, query.preview_length.unwrap_or(2000));
            let count = results.len();
            Ok(Json(serde_json::json!({ "results": results, "count": count })))
        }
        Some("unread-count") => {
            let agent = query.agent.as_deref().ok_or_else(|| ApiError::missing_field("agent"))?;
            let (_, name) = resolve_name(registry, agent);
            Ok(Json(serde_json::json!({ "agent": name, "unreadCount": mailbox.unread_count(&name) })))
        }
        Some("sent-count") => {
            let agent = query.agent.as_deref().ok_or_else(|| ApiError::missing_field("agent"))?;
            let (_, name) = resolve_name(registry, agent);
            Ok(Json(serde_json::json!({ "agent": name, "sentCount": mailbox.sent_count(&name) })))
        }
        Some("stats") => {
            let agent = query.agent.as_deref().ok_or_else(|| ApiError::missing_field("agent"))?;
            let (_, name) = resolve_name(registry, agent);
            Ok(Json(serde_json::to_value(mailbox.stats(&name)).unwrap_or_default()))
        }
        Some("agents") => {
            let names = mailbox.known_names();
            let entries: Vec<serde_json::Value> = names
                .into_iter()
                .map(|name| {
                    let agent_id = registry.get_agent_by_name_any_host(&name).map(|a| a.id);
                    serde_json::json!({ "name": name, "agentId": agent_id })
                })
                .collect();
            Ok(Json(serde_json::json!({ "agents": entries })))
        }
        Some(other) => Err(ApiError::invalid_field("action", format!("Unknown action '{other}'"))),
        None => {
            let agent = query.agent.as_deref().ok_or_else(|| ApiError::missing_field("agent"))?;
            let (_, name) = resolve_name(registry, agent);
            let box_name = query.box_name.as_deref().unwrap_or("inbox");
            if !crate::mailbox::BOXES.contains(&box_name) {
                return Err(ApiError::invalid_field("box", "Box must be inbox|sent|archived"));
            }
            let list_query = ListQuery {
                status: query.status.clone(),
                priority: query.priority.as_deref().map(parse_priority).transpose()?,
                from: query.from.clone(),
                to: query.to.clone(),
                limit: query.limit,
                preview_length: query.preview_length,
            };
            let messages = mailbox.list(&name, box_name, &list_query);
            let count = messages.len();
            Ok(Json(serde_json::json!({
                "agent": name,
                "box": box_name,
                "messages": messages,
                "count": count,
            })))
        }
    }
}

/// UI compose path: store straight into a local recipient's inbox. The
/// pseudo-sender `maestro` is the default author for operator messages.
#[post("/api/messages", format = "json", data = "<body>")]
pub fn compose_message(
    registry: &State<Registry>,
    mailbox: &State<Mailbox>,
    events: &State<EventBus>,
    body: Json<ComposeMessage>,
) -> Result<Json<StoredMessage>, ApiError> {
    let body = body.into_inner();
    if body.subject.trim().is_empty() {
        return Err(ApiError::missing_field("subject"));
    }
    if body.message.trim().is_empty() {
        return Err(ApiError::missing_field("message"));
    }
    let recipient = registry
        .find_by_identifier(&body.to)
        .ok_or_else(|| ApiError::not_found(format!("No agent matches '{}'", body.to)))?;

    let from = body
        .from
        .clone()
        .filter(|f| !f.trim().is_empty())
        .unwrap_or_else(|| "maestro".to_string());
    let id = envelope::new_envelope_id();
    let msg = StoredMessage {
        id: id.clone(),
        from: from.clone(),
        from_alias: None,
        from_label: None,
        to: recipient.name.clone(),
        to_alias: recipient.alias.clone(),
        subject: body.subject.trim().to_string(),
        content: Payload {
            kind: body.kind.unwrap_or(PayloadKind::Notification),
            message: body.message,
            context: body.context,
            attachments: None,
        },
        priority: body.priority.unwrap_or_default(),
        timestamp: crate::store::now_rfc3339(),
        status: "unread".to_string(),
        in_reply_to: body.in_reply_to.clone(),
        thread_id: Some(body.in_reply_to.unwrap_or_else(|| id.clone())),
        delivered_via: "local".to_string(),
        sender_public_key_hex: None,
        signature_verified: None,
    };

    mailbox.deliver(&recipient.name, &msg)?;
    mailbox.record_sent(&from, &msg)?;
    registry.touch_last_active(&recipient.id);
    events.publish(MeshEvent::MessageDelivered {
        to: recipient.name,
        message: Box::new(msg.clone()),
    });
    Ok(Json(msg))
}

#[patch("/api/messages", format = "json", data = "<body>")]
pub fn patch_message(
    registry: &State<Registry>,
    mailbox: &State<Mailbox>,
    body: Json<PatchMessage>,
) -> Result<Json<serde_json::Value>, ApiError> {
    let body = body.into_inner();
    let (_, name) = resolve_name(registry, &body.agent);
    match body.action.as_str() {
        "read" => mailbox.mark_message_as_read(&name, &body.id)?,
        "archive" => mailbox.archive_message(&name, &body.id)?,
        other => {
            return Err(ApiError::invalid_field("action", format!("Unknown action '{other}'")))
        }
    }
    Ok(Json(serde_json::json!({ "ok": true, "id": body.id, "action": body.action })))
}

#[delete("/api/messages?<agent>&<id>")]
pub fn delete_message(
    registry: &State<Registry>,
    mailbox: &State<Mailbox>,
    agent: Option<&str>,
    id: Option<&str>,
) -> Result<Json<serde_json::Value>, ApiError> {
    let agent = agent.ok_or_else(|| ApiError::missing_field("agent"))?;
    let id = id.ok_or_else(|| ApiError::missing_field("id"))?;
    let (_, name) = resolve_name(registry, agent);
    mailbox.delete_message(&name, id)?;
    Ok(Json(serde_json::json!({ "deleted": true, "id": id })))
}

#[post("/api/messages/forward", format = "json", data = "<body>")]
pub fn forward_message(
    registry: &State<Registry>,
    mailbox: &State<Mailbox>,
    events: &State<EventBus>,
    body: Json<ForwardMessage>,
) -> Result<Json<StoredMessage>, ApiError> {
    let (_, owner) = resolve_name(registry, &body.agent);
    let (_, original) = mailbox
        .find_message(&owner, &body.id)
        .ok_or_else(|| ApiError::not_found(format!("Message {} not found", body.id)))?;
    let recipient = registry
        .find_by_identifier(&body.to)
        .ok_or_else(|| ApiError::not_found(format!("No agent matches '{}'", body.to)))?;

    let subject = if original.subject.starts_with("Fwd:") {
        original.subject.clone()
    } else {
        format!("Fwd: {}", original.subject)
    };
    let msg = StoredMessage {
        id: envelope::new_envelope_id(),
        from: owner.clone(),
        from_alias: None,
        from_label: None,
        to: recipient.name.clone(),
        to_alias: recipient.alias.clone(),
        subject,
        content: original.content.clone(),
        priority: original.priority,
        timestamp: crate::store::now_rfc3339(),
        status: "unread".to_string(),
        in_reply_to: None,
        thread_id: original.thread_id.clone(),
        delivered_via: "local".to_string(),
        sender_public_key_hex: None,
        signature_verified: None,
    };

    mailbox.deliver(&recipient.name, &msg)?;
    mailbox.record_sent(&owner, &msg)?;
    registry.touch_last_active(&recipient.id);
    events.publish(MeshEvent::MessageDelivered {
        to: recipient.name,
        message: Box::new(msg.clone()),
    });
    Ok(Json(msg))
}

#[derive(rocket::FromForm)]
pub struct MeetingMessagesQuery {
    #[field(name = "meetingId")]
    pub meeting_id: Option<String>,
    /// Comma-separated agent names.
    pub participants: Option<String>,
    pub since: Option<String>,
}

#[get("/api/messages/meeting?<query..>")]
pub fn meeting_messages(
    registry: &State<Registry>,
    mailbox: &State<Mailbox>,
    meetings: &State<MeetingStore>,
    query: MeetingMessagesQuery,
) -> Result<Json<serde_json::Value>, ApiError> {
    let meeting_id = query
        .meeting_id
        .as_deref()
        .ok_or_else(|| ApiError::missing_field("meetingId"))?;

    let participants: Vec<String> = match query.participants.as_deref() {
        Some(csv) => csv
            .split(',')
            .map(str::trim)
            .filter(|s| !s.is_empty())
            .map(String::from)
            .collect(),
        None => {
            // Fall back to the stored meeting roster.
            let meeting = meetings
                .get(meeting_id)
                .ok_or_else(|| ApiError::not_found(format!("Meeting {meeting_id} not found")))?;
            meeting
                .agent_ids
                .iter()
                .filter_map(|id| registry.get_agent(id).map(|a| a.name))
                .collect()
        }
    };

    let messages = mailbox.meeting_messages(meeting_id, &participants, query.since.as_deref());
    let count = messages.len();
    Ok(Json(serde_json::json!({
        "meetingId": meeting_id,
        "messages": messages,
        "count": count,
    })))
}
