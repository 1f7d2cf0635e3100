use crate::amp::{address, envelope};
use crate::error::ApiError;
use crate::events::{EventBus, MeshEvent};
use crate::hosts::HostsStore;
use crate::keys::{self, KeyStore};
use crate::mailbox::Mailbox;
use crate::mesh;
use crate::models::{
    Agent, ApiKeyRecord, Envelope, Payload, Priority, RouteOutcome, RouteRequest, StoredMessage,
};
use crate::registry::Registry;
use crate::relay::RelayQueue;
use crate::session::SessionSupervisor;
use crate::store;

/// Maximum serialized payload size accepted on the route path.
pub const MAX_PAYLOAD_BYTES: usize = 1024 * 1024;

/// Who a route request came from: an authenticated agent on this host, or a
/// configured mesh peer forwarding on an agent's behalf.
#[derive(Debug, Clone)]
pub enum RouteAuth {
    Agent(ApiKeyRecord),
    MeshPeer(String),
}

impl RouteAuth {
    pub fn rate_key(&self) -> String {
        match self {
            RouteAuth::Agent(rec) => format!("route:{}", rec.agent_id),
            RouteAuth::MeshPeer(host_id) => format!("route:mesh-{host_id}"),
        }
    }
}

pub struct RouterCtx<'a> {
    pub hosts: &'a HostsStore,
    pub registry: &'a Registry,
    pub key_store: &'a KeyStore,
    pub relay: &'a RelayQueue,
    pub mailbox: &'a Mailbox,
    pub supervisor: &'a SessionSupervisor,
    pub events: &'a EventBus,
    pub client: &'a reqwest::Client,
}

fn validated_payload(req: &RouteRequest) -> Result<Payload, ApiError> {
    let payload_in = req
        .payload
        .as_ref()
        .ok_or_else(|| ApiError::missing_field("payload"))?;
    let kind = payload_in
        .kind
        .ok_or_else(|| ApiError::missing_field("payload.type"))?;
    let message = payload_in
        .message
        .clone()
        .filter(|m| !m.is_empty())
        .ok_or_else(|| ApiError::missing_field("payload.message"))?;
    Ok(Payload {
        kind,
        message,
        context: payload_in.context.clone(),
        attachments: payload_in.attachments.clone(),
    })
}

/// The central routing path: validate, build + sign-verify the envelope,
/// resolve the recipient locally or across the mesh, deliver or queue.
pub async fn route_message(
    ctx: &RouterCtx<'_>,
    auth: &RouteAuth,
    req: &RouteRequest,
    forwarded_envelope_id: Option<String>,
    signature_header: Option<String>,
) -> Result<RouteOutcome, ApiError> {
    let to = req
        .to
        .as_deref()
        .map(str::trim)
        .filter(|s| !s.is_empty())
        .ok_or_else(|| ApiError::missing_field("to"))?;
    let subject = req
        .subject
        .as_deref()
        .map(str::trim)
        .filter(|s| !s.is_empty())
        .ok_or_else(|| ApiError::missing_field("subject"))?;
    let payload = validated_payload(req)?;

    let sender_agent = match auth {
        RouteAuth::Agent(rec) => ctx.registry.get_agent(&rec.agent_id),
        RouteAuth::MeshPeer(_) => None,
    };
    let from = match auth {
        RouteAuth::Agent(rec) => rec.address.clone(),
        RouteAuth::MeshPeer(_) => req
            .from
            .clone()
            .filter(|f| !f.is_empty())
            .ok_or_else(|| ApiError::missing_field("from"))?,
    };

    let org = ctx.hosts.organization();
    let provider = address::provider_domain(org.as_ref().map(|o| o.organization.as_str()));
    let parsed = address::parse_address(to, &provider)?;

    let id = forwarded_envelope_id.unwrap_or_else(envelope::new_envelope_id);
    let mut signature = signature_header.unwrap_or_default();

    // A host that holds the sender's private key signs on the agent's
    // behalf when the client didn't.
    if signature.is_empty()
        && let RouteAuth::Agent(rec) = auth
        && let Some(kp) = ctx.key_store.load_key_pair(&rec.agent_id)
    {
        let env_preview = envelope::build_envelope(
            id.clone(),
            &from,
            to,
            subject,
            req.priority.unwrap_or_default(),
            req.in_reply_to.clone(),
            req.expires_at.clone(),
            String::new(),
        );
        signature = keys::sign(&kp.signing, &envelope::canonical_for(&env_preview, &payload));
    }

    let env = envelope::build_envelope(
        id,
        &from,
        to,
        subject,
        req.priority.unwrap_or_default(),
        req.in_reply_to.clone(),
        req.expires_at.clone(),
        signature,
    );

    // Trust-at-first-use: verification failure is logged, not fatal.
    // Mesh-forwarded envelopes carry their signature through unverified.
    let (sender_public_key_hex, signature_verified) = match auth {
        RouteAuth::Agent(rec) => {
            let pub_hex = sender_agent
                .as_ref()
                .and_then(|a| a.amp_identity.as_ref())
                .map(|i| i.public_key_hex.clone())
                .or_else(|| ctx.key_store.public_key_hex(&rec.agent_id));
            match pub_hex {
                Some(pk) if !env.signature.is_empty() => {
                    let ok = keys::verify(&pk, &envelope::canonical_for(&env, &payload), &env.signature);
                    if !ok {
                        eprintln!("⚠️  Signature verification failed for {from} (delivering anyway)");
                    }
                    (Some(pk), Some(ok))
                }
                other => (other, None),
            }
        }
        RouteAuth::MeshPeer(_) => (None, None),
    };

    let self_host = ctx
        .hosts
        .get_self_host()
        .ok_or_else(|| ApiError::internal("Self host is not configured"))?;

    // 1. Same-host recipient.
    let recipient = ctx
        .registry
        .get_agent_by_name(&parsed.name, &self_host.id)
        .or_else(|| {
            ctx.registry
                .find_by_identifier(&parsed.name)
                .filter(|a| a.host_id == self_host.id)
        });
    if let Some(recipient) = recipient {
        let delivered_via = match auth {
            RouteAuth::Agent(_) => "local",
            RouteAuth::MeshPeer(_) => "mesh",
        };
        deliver_local(
            ctx,
            &recipient,
            &env,
            &payload,
            sender_agent.as_ref(),
            sender_public_key_hex,
            signature_verified,
            delivered_via,
        )
        .await?;
        if let Some(sender) = sender_agent.as_ref() {
            record_sent(ctx, sender, &env, &payload);
        }
        return Ok(RouteOutcome {
            status: "delivered",
            method: "local",
            id: env.id,
            remote_host: None,
            error: None,
        });
    }

    // 2. Mesh discovery. Never re-forward an already-forwarded message;
    // a stale peer record must not bounce envelopes in a loop.
    if matches!(auth, RouteAuth::Agent(_)) {
        let peers = ctx.hosts.enabled_peers();
        if let Some(hit) = mesh::discover_agent(ctx.client, &peers, &parsed.name).await {
            match mesh::forward_route(ctx.client, &hit.host, &self_host.id, &env, &payload).await {
                Ok(_) => {
                    if let Some(sender) = sender_agent.as_ref() {
                        record_sent(ctx, sender, &env, &payload);
                    }
                    return Ok(RouteOutcome {
                        status: "delivered",
                        method: "mesh",
                        id: env.id,
                        remote_host: Some(hit.host.id),
                        error: None,
                    });
                }
                Err(err) => {
                    let Some(agent_id) = hit.agent_id else {
                        return Err(ApiError::internal(format!(
                            "Mesh delivery to {} failed: {err}",
                            hit.host.id
                        )));
                    };
                    let env_id = env.id.clone();
                    ctx.relay
                        .queue_message(&agent_id, env, payload, sender_public_key_hex)?;
                    ctx.events.publish(MeshEvent::MessageQueued {
                        agent_id,
                        envelope_id: env_id.clone(),
                    });
                    return Ok(RouteOutcome {
                        status: "queued",
                        method: "relay",
                        id: env_id,
                        remote_host: Some(hit.host.id.clone()),
                        error: Some(format!(
                            "Mesh delivery to {} failed: {err}; message queued for relay",
                            hit.host.id
                        )),
                    });
                }
            }
        }
    }

    // 3. Relay-by-name fallback: a known but unreachable agent queues.
    if let Some(known) = ctx.registry.get_agent_by_name_any_host(&parsed.name) {
        let env_id = env.id.clone();
        ctx.relay
            .queue_message(&known.id, env, payload, sender_public_key_hex)?;
        ctx.events.publish(MeshEvent::MessageQueued {
            agent_id: known.id.clone(),
            envelope_id: env_id.clone(),
        });
        return Ok(RouteOutcome {
            status: "queued",
            method: "relay",
            id: env_id,
            remote_host: None,
            error: Some(format!(
                "Agent '{}' is not reachable right now; message queued for relay",
                parsed.name
            )),
        });
    }

    Err(ApiError::not_found(format!(
        "Agent '{}' not found on this host or in the mesh",
        parsed.name
    )))
}

fn record_sent(ctx: &RouterCtx<'_>, sender: &Agent, env: &Envelope, payload: &Payload) {
    let msg = StoredMessage {
        id: env.id.clone(),
        from: env.from.clone(),
        from_alias: sender.alias.clone(),
        from_label: sender.label.clone(),
        to: env.to.clone(),
        to_alias: None,
        subject: env.subject.clone(),
        content: payload.clone(),
        priority: env.priority,
        timestamp: env.timestamp.clone(),
        status: "read".to_string(),
        in_reply_to: env.in_reply_to.clone(),
        thread_id: Some(env.thread_id.clone()),
        delivered_via: "local".to_string(),
        sender_public_key_hex: None,
        signature_verified: None,
    };
    if let Err(e) = ctx.mailbox.record_sent(&sender.name, &msg) {
        eprintln!("⚠️  Failed to record sent copy for {}: {}", sender.name, e.message);
    }
}

/// Store into the recipient's inbox and nudge the session supervisor.
#[allow(clippy::too_many_arguments)]
pub async fn deliver_local(
    ctx: &RouterCtx<'_>,
    recipient: &Agent,
    env: &Envelope,
    payload: &Payload,
    sender_agent: Option<&Agent>,
    sender_public_key_hex: Option<String>,
    signature_verified: Option<bool>,
    delivered_via: &str,
) -> Result<StoredMessage, ApiError> {
    let msg = StoredMessage {
        id: env.id.clone(),
        from: env.from.clone(),
        from_alias: sender_agent.and_then(|a| a.alias.clone()),
        from_label: sender_agent.and_then(|a| a.label.clone()),
        to: env.to.clone(),
        to_alias: recipient.alias.clone(),
        subject: env.subject.clone(),
        content: payload.clone(),
        priority: env.priority,
        timestamp: env.timestamp.clone(),
        status: "unread".to_string(),
        in_reply_to: env.in_reply_to.clone(),
        thread_id: Some(env.thread_id.clone()),
        delivered_via: delivered_via.to_string(),
        sender_public_key_hex,
        signature_verified,
    };
    ctx.mailbox.deliver(&recipient.name, &msg)?;
    ctx.registry.touch_last_active(&recipient.id);

    if let Some(session) = recipient.canonical_session() {
        let (status, hook) = ctx.supervisor.activity_status(&session.tmux_session_name);
        ctx.events.publish(MeshEvent::StatusUpdate {
            session_name: session.tmux_session_name.clone(),
            status,
            hook_status: hook.as_ref().map(|h| h.status.clone()),
            notification_type: hook.and_then(|h| h.notification_type),
        });
        // Opt-in terminal nudge for agents that want it.
        let notify = recipient
            .preferences
            .get("notifyOnMessage")
            .and_then(|v| v.as_bool())
            .unwrap_or(false);
        if notify {
            let line = format!(
                "[AMP] New {} message from {}: {}",
                env.priority.as_str(),
                env.from,
                env.subject
            );
            if let Err(e) = ctx
                .supervisor
                .send_keys(&session.tmux_session_name, &line, true)
                .await
            {
                eprintln!("⚠️  Terminal nudge for {} failed: {}", recipient.name, e.message);
            }
        }
    }

    ctx.events.publish(MeshEvent::MessageDelivered {
        to: recipient.name.clone(),
        message: Box::new(msg.clone()),
    });
    Ok(msg)
}

/// Mark a message read and thread an `ack` envelope back to the sender.
/// The ack is best-effort: a local sender gets an inbox copy, everyone gets
/// a status-stream push.
pub async fn send_read_receipt(
    ctx: &RouterCtx<'_>,
    record: &ApiKeyRecord,
    message_id: &str,
) -> Result<serde_json::Value, ApiError> {
    let agent = ctx
        .registry
        .get_agent(&record.agent_id)
        .ok_or_else(|| ApiError::not_found("Agent not found"))?;
    let msg = ctx
        .mailbox
        .get_message(&agent.name, "inbox", message_id)
        .ok_or_else(|| ApiError::not_found(format!("Message {message_id} not found")))?;
    ctx.mailbox.mark_message_as_read(&agent.name, message_id)?;

    let ack_env = envelope::build_envelope(
        envelope::new_envelope_id(),
        &record.address,
        &msg.from,
        &format!("Read: {}", msg.subject),
        Priority::Normal,
        Some(message_id.to_string()),
        None,
        String::new(),
    );
    let ack_payload = Payload {
        kind: crate::models::PayloadKind::Ack,
        message: "read".to_string(),
        context: Some(serde_json::json!({ "readAt": store::now_rfc3339() })),
        attachments: None,
    };

    // Deliver the ack to the original sender when they live on this host.
    let sender_name = msg.from.split('@').next().unwrap_or_default().to_string();
    if let Some(self_host) = ctx.hosts.get_self_host()
        && let Some(original_sender) = ctx.registry.get_agent_by_name(&sender_name, &self_host.id)
    {
        let _ = deliver_local(
            ctx,
            &original_sender,
            &ack_env,
            &ack_payload,
            Some(&agent),
            None,
            None,
            "local",
        )
        .await;
    }

    Ok(serde_json::json!({ "acknowledged": true, "id": message_id }))
}

/// Public identity of an address within this provider.
pub fn resolve_agent_address(
    ctx: &RouterCtx<'_>,
    addr: &str,
) -> Result<serde_json::Value, ApiError> {
    let org = ctx.hosts.organization();
    let provider = address::provider_domain(org.as_ref().map(|o| o.organization.as_str()));
    let parsed = address::parse_address(addr, &provider)?;
    let agent = ctx
        .registry
        .get_agent_by_name_any_host(&parsed.name)
        .ok_or_else(|| ApiError::not_found(format!("Agent '{}' not found", parsed.name)))?;

    let identity = agent.amp_identity.as_ref();
    let public_key_pem = identity
        .map(|i| i.public_key_hex.clone())
        .and_then(|hex| keys::public_key_to_pem(&hex).ok());
    Ok(serde_json::json!({
        "name": agent.name,
        "alias": agent.alias,
        "address": identity.map(|i| i.amp_address.clone()),
        "fingerprint": identity.map(|i| i.fingerprint.clone()),
        "public_key": public_key_pem,
        "online": agent.is_online(),
    }))
}
