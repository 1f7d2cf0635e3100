use crate::error::ApiError;
use crate::events::{EventBus, MeshEvent};
use crate::hosts::{host_identifiers, AddHostOutcome, AdoptOutcome, HostsStore};
use crate::models::{
    Envelope, ExchangePeersRequest, Host, Organization, OrganizationInfo, Payload, PeerHostInfo,
    RegisterPeerRequest,
};
use crate::store;
use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::sync::Mutex;
use std::time::Duration;
use tokio::task::JoinSet;

pub const MAX_PROPAGATION_DEPTH: u32 = 3;
const DISCOVERY_TIMEOUT: Duration = Duration::from_secs(3);
const FORWARD_TIMEOUT: Duration = Duration::from_secs(10);
const HEALTH_TIMEOUT: Duration = Duration::from_secs(5);
const SYNC_TIMEOUT: Duration = Duration::from_secs(10);

const PROPAGATION_TTL_SECS: i64 = 3600;
const PROPAGATION_CAP: usize = 1000;

/// Replay suppression for peer-register / peer-exchange. The map survives
/// restarts via `propagation/seen.json`, TTL-pruned and size-bounded.
pub struct PropagationSet {
    path: PathBuf,
    inner: Mutex<Option<HashMap<String, i64>>>,
}

impl PropagationSet {
    pub fn new(data_dir: &Path) -> Self {
        PropagationSet {
            path: data_dir.join("propagation").join("seen.json"),
            inner: Mutex::new(None),
        }
    }

    /// Returns true if the id was already processed; otherwise records it.
    pub fn seen_or_record(&self, id: &str) -> bool {
        let mut guard = self.inner.lock().unwrap_or_else(|e| e.into_inner());
        if guard.is_none() {
            *guard = Some(store::read_json(&self.path).unwrap_or_default());
        }
        let map = guard.as_mut().unwrap();

        let now = chrono::Utc::now().timestamp();
        map.retain(|_, at| now - *at < PROPAGATION_TTL_SECS);
        if map.contains_key(id) {
            return true;
        }
        if map.len() >= PROPAGATION_CAP {
            if let Some(oldest) = map.iter().min_by_key(|(_, at)| **at).map(|(k, _)| k.clone()) {
                map.remove(&oldest);
            }
        }
        map.insert(id.to_string(), now);
        if let Err(e) = store::write_json_atomic(&self.path, map) {
            eprintln!("⚠️  Failed to persist propagation set: {e}");
        }
        false
    }
}

pub fn peer_info(host: &Host) -> PeerHostInfo {
    PeerHostInfo {
        id: host.id.clone(),
        name: host.name.clone(),
        url: host.url.clone(),
        aliases: host.aliases.clone(),
        description: if host.description.is_empty() {
            None
        } else {
            Some(host.description.clone())
        },
    }
}

fn org_info(org: &Organization) -> OrganizationInfo {
    OrganizationInfo {
        value: org.organization.clone(),
        set_at: Some(org.set_at.clone()),
        set_by: Some(org.set_by.clone()),
    }
}

/// Adopt the peer's organization if this host has none. A different value
/// refuses the handshake.
fn adopt_or_refuse(hosts: &HostsStore, org: Option<&OrganizationInfo>, peer_id: &str) -> Result<(), ApiError> {
    let Some(org) = org else {
        return Ok(());
    };
    let set_at = org.set_at.clone().unwrap_or_else(store::now_rfc3339);
    let set_by = org
        .set_by
        .clone()
        .unwrap_or_else(|| format!("peer:{peer_id}"));
    match hosts.adopt_organization(&org.value, &set_at, &set_by) {
        AdoptOutcome::Adopted => {
            println!("🏷️  Adopted organization '{}' from peer {peer_id}", org.value);
            Ok(())
        }
        AdoptOutcome::AlreadySet => Ok(()),
        AdoptOutcome::Mismatch => {
            let local = hosts
                .organization()
                .map(|o| o.organization)
                .unwrap_or_default();
            Err(ApiError::conflict(format!(
                "Organization mismatch: this host belongs to '{local}', peer declares '{}'",
                org.value
            )))
        }
    }
}

/// Handle an in-bound register-peer handshake. Idempotent and
/// loop-suppressed.
pub fn register_peer(
    req: RegisterPeerRequest,
    hosts: &HostsStore,
    propagation: &PropagationSet,
    events: &EventBus,
) -> Result<serde_json::Value, ApiError> {
    if let Some(ref source) = req.source
        && source.propagation_depth > MAX_PROPAGATION_DEPTH
    {
        return Err(ApiError::invalid_request(format!(
            "Propagation depth {} exceeds the maximum of {MAX_PROPAGATION_DEPTH}",
            source.propagation_depth
        )));
    }

    let self_host = hosts
        .get_self_host()
        .ok_or_else(|| ApiError::internal("Self host is not configured"))?;

    if let Some(pid) = req.source.as_ref().and_then(|s| s.propagation_id.as_deref())
        && propagation.seen_or_record(pid)
    {
        return Ok(serde_json::json!({
            "registered": false,
            "alreadyKnown": true,
            "reason": "propagation_replay",
            "host": peer_info(&self_host),
        }));
    }

    let incoming = &req.host;
    let self_ids = host_identifiers(&self_host.id, &self_host.url, &self_host.aliases);
    let incoming_ids = host_identifiers(&incoming.id, &incoming.url, &incoming.aliases);
    if incoming.id == self_host.id || incoming_ids.iter().any(|i| self_ids.contains(i)) {
        return Err(ApiError::invalid_request(
            "Refusing to register this host as its own peer",
        ));
    }

    adopt_or_refuse(hosts, req.organization.as_ref(), &incoming.id)?;

    let sync_source = req
        .source
        .as_ref()
        .and_then(|s| s.initiator.clone())
        .unwrap_or_else(|| "peer-registration".to_string());

    let candidate = Host {
        id: incoming.id.clone(),
        name: incoming.name.clone(),
        url: incoming.url.trim_end_matches('/').to_string(),
        host_type: "remote".to_string(),
        aliases: incoming.aliases.clone(),
        enabled: true,
        description: incoming.description.clone().unwrap_or_default(),
        synced_at: Some(store::now_rfc3339()),
        sync_source: Some(sync_source),
        tailscale: None,
    };
    let already_known = match hosts.add_host(candidate.clone())? {
        AddHostOutcome::Added(host) => {
            println!("🤝 Registered peer {} ({})", host.id, host.url);
            events.publish(MeshEvent::PeerRegistered(Box::new(host)));
            false
        }
        AddHostOutcome::AlreadyKnown(existing) => {
            hosts.stamp_synced(&existing, "peer-registration");
            true
        }
    };

    let known_hosts: Vec<PeerHostInfo> = hosts
        .get_hosts()
        .iter()
        .filter(|h| h.host_type == "remote" && h.id != incoming.id)
        .map(peer_info)
        .collect();

    Ok(serde_json::json!({
        "registered": true,
        "alreadyKnown": already_known,
        "host": peer_info(&self_host),
        "knownHosts": known_hosts,
        "organization": hosts.organization().as_ref().map(org_info),
    }))
}

/// Handle a bulk peer exchange: dedup, health-probe survivors, add only
/// reachable hosts.
pub async fn exchange_peers(
    req: ExchangePeersRequest,
    hosts: &HostsStore,
    propagation: &PropagationSet,
    client: &reqwest::Client,
) -> Result<serde_json::Value, ApiError> {
    let self_host = hosts
        .get_self_host()
        .ok_or_else(|| ApiError::internal("Self host is not configured"))?;

    if let Some(ref pid) = req.propagation_id
        && propagation.seen_or_record(pid)
    {
        return Ok(serde_json::json!({
            "newlyAdded": [],
            "alreadyKnown": [],
            "unreachable": [],
            "reason": "propagation_replay",
        }));
    }

    adopt_or_refuse(hosts, req.organization.as_ref(), &req.from_host.id)?;

    let self_ids = host_identifiers(&self_host.id, &self_host.url, &self_host.aliases);
    let mut already_known: Vec<String> = Vec::new();
    let mut candidates: Vec<PeerHostInfo> = Vec::new();

    for incoming in req.known_hosts {
        let incoming_ids = host_identifiers(&incoming.id, &incoming.url, &incoming.aliases);
        if incoming.id == self_host.id
            || incoming.id == req.from_host.id
            || incoming_ids.iter().any(|i| self_ids.contains(i))
        {
            continue;
        }
        if hosts.get_host(&incoming.id).is_some()
            || hosts.find_host_by_any_identifier(&incoming.url).is_some()
        {
            already_known.push(incoming.id);
            continue;
        }
        candidates.push(incoming);
    }

    // Probe survivors concurrently; only reachable hosts join the mesh.
    let mut set = JoinSet::new();
    for candidate in candidates {
        let client = client.clone();
        set.spawn(async move {
            let alive = health_probe(&client, &candidate.url).await;
            (candidate, alive)
        });
    }

    let mut newly_added: Vec<String> = Vec::new();
    let mut unreachable: Vec<String> = Vec::new();
    while let Some(res) = set.join_next().await {
        let Ok((candidate, alive)) = res else {
            continue;
        };
        if !alive {
            unreachable.push(candidate.id);
            continue;
        }
        let host = Host {
            id: candidate.id.clone(),
            name: candidate.name.clone(),
            url: candidate.url.trim_end_matches('/').to_string(),
            host_type: "remote".to_string(),
            aliases: candidate.aliases.clone(),
            enabled: true,
            description: candidate.description.clone().unwrap_or_default(),
            synced_at: Some(store::now_rfc3339()),
            sync_source: Some(format!("peer-exchange:{}", req.from_host.id)),
            tailscale: None,
        };
        match hosts.add_host(host) {
            Ok(AddHostOutcome::Added(_)) => newly_added.push(candidate.id),
            Ok(AddHostOutcome::AlreadyKnown(_)) => already_known.push(candidate.id),
            Err(e) => {
                eprintln!("⚠️  Failed to add exchanged peer {}: {}", candidate.id, e.message);
                unreachable.push(candidate.id);
            }
        }
    }

    Ok(serde_json::json!({
        "newlyAdded": newly_added,
        "alreadyKnown": already_known,
        "unreachable": unreachable,
    }))
}

/// Liveness proxy: a host is alive when its config endpoint answers.
pub async fn health_probe(client: &reqwest::Client, url: &str) -> bool {
    let probe = format!("{}/api/config", url.trim_end_matches('/'));
    match tokio::time::timeout(HEALTH_TIMEOUT, client.get(&probe).send()).await {
        Ok(Ok(resp)) => resp.status().is_success(),
        _ => false,
    }
}

pub struct MeshHit {
    pub host: Host,
    pub agent_id: Option<String>,
}

/// Ask every peer whether it hosts `name`; first successful hit wins.
pub async fn discover_agent(
    client: &reqwest::Client,
    peers: &[Host],
    name: &str,
) -> Option<MeshHit> {
    let mut set = JoinSet::new();
    for peer in peers.iter().cloned() {
        let client = client.clone();
        let name = name.to_string();
        set.spawn(async move {
            let url = format!(
                "{}/api/agents/lookup?name={name}",
                peer.url.trim_end_matches('/')
            );
            let resp = tokio::time::timeout(DISCOVERY_TIMEOUT, client.get(&url).send())
                .await
                .ok()?
                .ok()?;
            if !resp.status().is_success() {
                return None;
            }
            let body: serde_json::Value = resp.json().await.ok()?;
            if !body.get("found").and_then(|v| v.as_bool()).unwrap_or(false) {
                return None;
            }
            let agent_id = body
                .pointer("/agent/id")
                .and_then(|v| v.as_str())
                .map(String::from);
            Some(MeshHit { host: peer, agent_id })
        });
    }
    while let Some(res) = set.join_next().await {
        if let Ok(Some(hit)) = res {
            set.abort_all();
            return Some(hit);
        }
    }
    None
}

/// Forward a validated envelope to the peer that hosts the recipient.
pub async fn forward_route(
    client: &reqwest::Client,
    peer: &Host,
    self_id: &str,
    env: &Envelope,
    payload: &Payload,
) -> Result<serde_json::Value, String> {
    let url = format!("{}/v1/route", peer.url.trim_end_matches('/'));
    let body = serde_json::json!({
        "to": env.to,
        "subject": env.subject,
        "priority": env.priority,
        "payload": payload,
        "in_reply_to": env.in_reply_to,
        "expires_at": env.expires_at,
        "from": env.from,
    });
    let request = client
        .post(&url)
        .header("X-Forwarded-From", self_id)
        .header("X-AMP-Envelope-Id", &env.id)
        .header("X-AMP-Signature", &env.signature)
        .json(&body);
    match tokio::time::timeout(FORWARD_TIMEOUT, request.send()).await {
        Ok(Ok(resp)) if resp.status().is_success() => {
            resp.json().await.map_err(|e| e.to_string())
        }
        Ok(Ok(resp)) => Err(format!("peer replied HTTP {}", resp.status().as_u16())),
        Ok(Err(e)) => Err(e.to_string()),
        Err(_) => Err("peer timed out".to_string()),
    }
}

/// Manual sync: offer ourselves to every enabled peer and merge back the
/// hosts each one knows about.
pub async fn sync_all(
    hosts: &HostsStore,
    propagation: &PropagationSet,
    client: &reqwest::Client,
) -> Result<serde_json::Value, ApiError> {
    let self_host = hosts
        .get_self_host()
        .ok_or_else(|| ApiError::internal("Self host is not configured"))?;
    let organization = hosts.organization();
    let peers = hosts.enabled_peers();

    let mut synced: Vec<String> = Vec::new();
    let mut failed: Vec<String> = Vec::new();

    for peer in peers {
        let url = format!("{}/api/hosts/register-peer", peer.url.trim_end_matches('/'));
        let body = serde_json::json!({
            "host": peer_info(&self_host),
            "organization": organization.as_ref().map(org_info),
            "source": {
                "initiator": self_host.id,
                "propagationDepth": 0,
                "propagationId": uuid::Uuid::new_v4().to_string(),
            },
        });
        let outcome = tokio::time::timeout(SYNC_TIMEOUT, client.post(&url).json(&body).send()).await;
        match outcome {
            Ok(Ok(resp)) if resp.status().is_success() => {
                hosts.stamp_synced(&peer.id, "manual-sync");
                synced.push(peer.id.clone());
                // Merge hosts the peer told us about, probing before adding.
                if let Ok(value) = resp.json::<serde_json::Value>().await
                    && let Some(known) = value.get("knownHosts").and_then(|v| v.as_array())
                {
                    let known_hosts: Vec<PeerHostInfo> = known
                        .iter()
                        .filter_map(|v| serde_json::from_value(v.clone()).ok())
                        .collect();
                    let exchange = ExchangePeersRequest {
                        from_host: peer_info(&peer),
                        known_hosts,
                        organization: None,
                        propagation_id: None,
                    };
                    let _ = exchange_peers(exchange, hosts, propagation, client).await;
                }
            }
            _ => failed.push(peer.id.clone()),
        }
    }

    Ok(serde_json::json!({ "synced": synced, "failed": failed }))
}

/// Coarse per-host mesh status: reachability plus session counts.
pub async fn mesh_status(hosts: &HostsStore, client: &reqwest::Client) -> serde_json::Value {
    let mut set = JoinSet::new();
    for host in hosts.get_hosts() {
        if host.host_type != "remote" {
            continue;
        }
        let client = client.clone();
        set.spawn(async move {
            let reachable = health_probe(&client, &host.url).await;
            let sessions = if reachable {
                let url = format!("{}/api/sessions", host.url.trim_end_matches('/'));
                match tokio::time::timeout(HEALTH_TIMEOUT, client.get(&url).send()).await {
                    Ok(Ok(resp)) if resp.status().is_success() => resp
                        .json::<serde_json::Value>()
                        .await
                        .ok()
                        .and_then(|v| v.get("total").and_then(|t| t.as_u64())),
                    _ => None,
                }
            } else {
                None
            };
            serde_json::json!({
                "id": host.id,
                "name": host.name,
                "url": host.url,
                "enabled": host.enabled,
                "reachable": reachable,
                "sessions": sessions,
            })
        });
    }

    let mut statuses = Vec::new();
    while let Some(res) = set.join_next().await {
        if let Ok(status) = res {
            statuses.push(status);
        }
    }
    serde_json::json!({ "hosts": statuses })
}
