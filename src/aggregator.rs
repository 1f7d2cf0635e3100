use crate::hosts::HostsStore;
use crate::models::{FleetStats, FleetView, Host};
use crate::registry::Registry;
use crate::store;
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicBool, Ordering};
use std::time::Duration;
use tokio::task::JoinSet;

const SELF_TIMEOUT: Duration = Duration::from_secs(8);
const PEER_TIMEOUT: Duration = Duration::from_secs(3);
/// Agents whose names carry this prefix are internal plumbing and stay out
/// of the public fleet list.
const SYSTEM_PREFIX: &str = "_aim-";
/// "Newly registered" means created within this window.
const NEW_WINDOW_MINUTES: i64 = 5;
/// Per-peer cache files are bounded to this many agents.
const CACHE_CAP: usize = 500;

/// Concurrent fan-out over self + peers with per-peer fallback caching.
pub struct Aggregator {
    cache_dir: PathBuf,
    first_load_done: AtomicBool,
}

fn stamp(mut agent: serde_json::Value, host_id: Option<&str>, host_name: &str, host_url: &str) -> serde_json::Value {
    if let Some(map) = agent.as_object_mut() {
        // Peer agents get the peer's id; local records keep their own
        // hostId so strays (agents pinned to a vanished host) stay visible.
        if let Some(host_id) = host_id {
            map.insert("hostId".to_string(), serde_json::json!(host_id));
        }
        map.insert("hostName".to_string(), serde_json::json!(host_name));
        // Empty for self so clients use relative URLs.
        map.insert("hostUrl".to_string(), serde_json::json!(host_url));
    }
    agent
}

fn agent_online(agent: &serde_json::Value) -> bool {
    agent
        .pointer("/sessions/0/status")
        .and_then(|v| v.as_str())
        .map(|s| s == "online")
        .unwrap_or(false)
}

fn agent_name(agent: &serde_json::Value) -> String {
    agent
        .get("name")
        .and_then(|v| v.as_str())
        .unwrap_or_default()
        .to_string()
}

async fn fetch_peer_agents(
    client: &reqwest::Client,
    peer: &Host,
) -> Result<Vec<serde_json::Value>, ()> {
    let url = format!("{}/api/agents?local=true", peer.url.trim_end_matches('/'));
    match tokio::time::timeout(PEER_TIMEOUT, client.get(&url).send()).await {
        Ok(Ok(resp)) if resp.status().is_success() => {
            resp.json::<Vec<serde_json::Value>>().await.map_err(|_| ())
        }
        _ => Err(()),
    }
}

impl Aggregator {
    pub fn new(data_dir: &Path) -> Self {
        Aggregator {
            cache_dir: data_dir.join("cache"),
            first_load_done: AtomicBool::new(false),
        }
    }

    fn cache_path(&self, host_id: &str) -> PathBuf {
        self.cache_dir.join(format!("agents-{host_id}.json"))
    }

    fn write_cache(&self, host_id: &str, agents: &[serde_json::Value]) {
        let bounded: Vec<&serde_json::Value> = agents.iter().take(CACHE_CAP).collect();
        if let Err(e) = store::write_json_atomic(&self.cache_path(host_id), &bounded) {
            eprintln!("⚠️  Failed to write agent cache for {host_id}: {e}");
        }
    }

    fn read_cache(&self, host_id: &str) -> Vec<serde_json::Value> {
        store::read_json(&self.cache_path(host_id)).unwrap_or_default()
    }

    /// Fan out to self and every enabled peer, substitute the last good
    /// cache for peers that fail, and roll the fleet stats up in one pass.
    ///
    /// The very first call returns right after the self fetch with
    /// `partial=true` while the peer fetches warm the caches in the
    /// background; every later call waits for all peers.
    pub async fn load_all_agents(
        &self,
        hosts: &HostsStore,
        registry: &Registry,
        client: &reqwest::Client,
    ) -> FleetView {
        let all_hosts = hosts.get_hosts();
        let self_host = all_hosts.iter().find(|h| h.host_type == "self").cloned();
        let peers: Vec<Host> = all_hosts
            .iter()
            .filter(|h| h.host_type == "remote" && h.enabled)
            .cloned()
            .collect();

        let mut agents: Vec<serde_json::Value> = Vec::new();
        let mut cached = 0usize;

        // Self fetch (local registry read, bounded all the same).
        if let Some(ref me) = self_host {
            let list = tokio::time::timeout(SELF_TIMEOUT, async {
                registry
                    .list_agents()
                    .iter()
                    .filter_map(|a| serde_json::to_value(a).ok())
                    .collect::<Vec<_>>()
            })
            .await
            .unwrap_or_default();
            agents.extend(list.into_iter().map(|a| stamp(a, None, &me.name, "")));
        }

        let first_call = !self.first_load_done.swap(true, Ordering::SeqCst);
        if first_call && !peers.is_empty() {
            // First paint: answer with local data now, warm peer caches
            // behind the response.
            let client = client.clone();
            let cache_dir = self.cache_dir.clone();
            let warm_peers = peers.clone();
            tokio::spawn(async move {
                for peer in warm_peers {
                    if let Ok(list) = fetch_peer_agents(&client, &peer).await {
                        let bounded: Vec<&serde_json::Value> = list.iter().take(CACHE_CAP).collect();
                        let path = cache_dir.join(format!("agents-{}.json", peer.id));
                        let _ = store::write_json_atomic(&path, &bounded);
                    }
                }
            });
            return self.finish(agents, &all_hosts, cached, true);
        }

        let mut set = JoinSet::new();
        for peer in peers {
            let client = client.clone();
            set.spawn(async move {
                let result = fetch_peer_agents(&client, &peer).await;
                (peer, result)
            });
        }
        while let Some(res) = set.join_next().await {
            let Ok((peer, result)) = res else {
                continue;
            };
            match result {
                Ok(list) => {
                    let stamped: Vec<serde_json::Value> = list
                        .into_iter()
                        .map(|a| stamp(a, Some(&peer.id), &peer.name, &peer.url))
                        .collect();
                    self.write_cache(&peer.id, &stamped);
                    agents.extend(stamped);
                }
                Err(()) => {
                    let mut fallback = self.read_cache(&peer.id);
                    for agent in &mut fallback {
                        if let Some(map) = agent.as_object_mut() {
                            map.insert("cached".to_string(), serde_json::json!(true));
                        }
                    }
                    cached += fallback.len();
                    agents.extend(fallback);
                }
            }
        }

        self.finish(agents, &all_hosts, cached, false)
    }

    fn finish(
        &self,
        mut agents: Vec<serde_json::Value>,
        all_hosts: &[Host],
        cached: usize,
        partial: bool,
    ) -> FleetView {
        agents.retain(|a| !agent_name(a).starts_with(SYSTEM_PREFIX));
        agents.sort_by_key(|a| (!agent_online(a), agent_name(a).to_lowercase()));

        let known_hosts: Vec<&str> = all_hosts.iter().map(|h| h.id.as_str()).collect();
        let new_cutoff =
            (chrono::Utc::now() - chrono::Duration::minutes(NEW_WINDOW_MINUTES)).to_rfc3339();
        let mut stats = FleetStats {
            total: agents.len(),
            cached,
            ..FleetStats::default()
        };
        for agent in &agents {
            if agent_online(agent) {
                stats.online += 1;
            } else {
                stats.offline += 1;
            }
            let host_id = agent.get("hostId").and_then(|v| v.as_str()).unwrap_or("");
            if !known_hosts.contains(&host_id) {
                stats.orphans += 1;
            }
            if agent
                .get("createdAt")
                .and_then(|v| v.as_str())
                .map(|c| c > new_cutoff.as_str())
                .unwrap_or(false)
            {
                stats.newly_registered += 1;
            }
        }

        FleetView {
            agents,
            stats,
            partial,
        }
    }
}
