use crate::error::ApiError;
use crate::models::{Agent, AgentSession, AgentTools, AmpIdentity, CreateAgent};
use crate::store;
use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::sync::Mutex;

/// Authoritative local store of agent records. Owns `agents/<uuid>/` on
/// disk; a coarse mutex serializes all writers, reads go through an
/// in-memory snapshot.
pub struct Registry {
    agents_dir: PathBuf,
    cache: Mutex<Option<HashMap<String, Agent>>>,
}

fn valid_agent_name(name: &str) -> bool {
    !name.is_empty()
        && name.len() <= 64
        && name
            .chars()
            .all(|c| c.is_ascii_alphanumeric() || c == '-' || c == '_')
}

fn deep_merge(base: &mut serde_json::Value, patch: &serde_json::Value) {
    if let (Some(base_map), Some(patch_map)) = (base.as_object_mut(), patch.as_object()) {
        for (k, v) in patch_map {
            match base_map.get_mut(k) {
                Some(existing) if existing.is_object() && v.is_object() => deep_merge(existing, v),
                _ => {
                    base_map.insert(k.clone(), v.clone());
                }
            }
        }
    } else {
        *base = patch.clone();
    }
}

impl Registry {
    pub fn new(data_dir: &Path) -> Self {
        Registry {
            agents_dir: data_dir.join("agents"),
            cache: Mutex::new(None),
        }
    }

    fn agent_path(&self, id: &str) -> PathBuf {
        self.agents_dir.join(id).join("agent.json")
    }

    fn load_locked<'a>(
        &self,
        cache: &'a mut Option<HashMap<String, Agent>>,
    ) -> &'a mut HashMap<String, Agent> {
        if cache.is_none() {
            let mut map = HashMap::new();
            for id in store::list_subdirs(&self.agents_dir) {
                if id == "deleted" {
                    continue;
                }
                if let Some(agent) = store::read_json::<Agent>(&self.agent_path(&id)) {
                    map.insert(agent.id.clone(), agent);
                }
            }
            *cache = Some(map);
        }
        cache.as_mut().unwrap()
    }

    fn save_locked(
        &self,
        cache: &mut HashMap<String, Agent>,
        agent: Agent,
    ) -> Result<Agent, ApiError> {
        store::write_json_atomic(&self.agent_path(&agent.id), &agent)?;
        cache.insert(agent.id.clone(), agent.clone());
        Ok(agent)
    }

    pub fn list_agents(&self) -> Vec<Agent> {
        let mut cache = self.cache.lock().unwrap_or_else(|e| e.into_inner());
        let mut agents: Vec<Agent> = self.load_locked(&mut cache).values().cloned().collect();
        agents.sort_by(|a, b| a.name.to_lowercase().cmp(&b.name.to_lowercase()));
        agents
    }

    pub fn get_agent(&self, id: &str) -> Option<Agent> {
        let mut cache = self.cache.lock().unwrap_or_else(|e| e.into_inner());
        self.load_locked(&mut cache).get(id).cloned()
    }

    pub fn get_agent_by_name(&self, name: &str, host_id: &str) -> Option<Agent> {
        let needle = name.to_lowercase();
        let mut cache = self.cache.lock().unwrap_or_else(|e| e.into_inner());
        self.load_locked(&mut cache)
            .values()
            .find(|a| a.host_id == host_id && a.name.to_lowercase() == needle)
            .cloned()
    }

    pub fn get_agent_by_name_any_host(&self, name: &str) -> Option<Agent> {
        let needle = name.to_lowercase();
        let mut cache = self.cache.lock().unwrap_or_else(|e| e.into_inner());
        self.load_locked(&mut cache)
            .values()
            .find(|a| a.name.to_lowercase() == needle)
            .cloned()
    }

    /// Canonical resolution for user-supplied identifiers: agent name,
    /// alias, or tmux session name.
    pub fn find_by_identifier(&self, identifier: &str) -> Option<Agent> {
        let needle = identifier.to_lowercase();
        let mut cache = self.cache.lock().unwrap_or_else(|e| e.into_inner());
        let agents = self.load_locked(&mut cache);
        agents
            .values()
            .find(|a| a.name.to_lowercase() == needle)
            .or_else(|| {
                agents.values().find(|a| {
                    a.alias.as_deref().map(|al| al.to_lowercase() == needle).unwrap_or(false)
                })
            })
            .or_else(|| {
                agents.values().find(|a| {
                    a.sessions
                        .iter()
                        .any(|s| s.tmux_session_name.to_lowercase() == needle)
                })
            })
            .cloned()
    }

    /// Case-insensitive substring search over name, alias and label.
    pub fn search_agents(&self, query: &str) -> Vec<Agent> {
        let needle = query.to_lowercase();
        if needle.is_empty() {
            return self.list_agents();
        }
        self.list_agents()
            .into_iter()
            .filter(|a| {
                a.name.to_lowercase().contains(&needle)
                    || a.alias.as_deref().map(|s| s.to_lowercase().contains(&needle)).unwrap_or(false)
                    || a.label.as_deref().map(|s| s.to_lowercase().contains(&needle)).unwrap_or(false)
            })
            .collect()
    }

    pub fn create_agent(&self, req: CreateAgent, default_host_id: &str) -> Result<Agent, ApiError> {
        let name = req.name.trim().to_string();
        if !valid_agent_name(&name) {
            return Err(ApiError::invalid_field(
                "name",
                "Agent name may only contain letters, digits, dashes and underscores",
            ));
        }
        let host_id = req
            .host_id
            .filter(|h| !h.trim().is_empty())
            .unwrap_or_else(|| default_host_id.to_string());

        let mut cache = self.cache.lock().unwrap_or_else(|e| e.into_inner());
        let agents = self.load_locked(&mut cache);
        if agents
            .values()
            .any(|a| a.host_id == host_id && a.name.to_lowercase() == name.to_lowercase())
        {
            return Err(ApiError::name_taken(format!(
                "An agent named '{name}' already exists on host {host_id}"
            )));
        }

        let now = store::now_rfc3339();
        let sessions = req
            .tmux_session_name
            .as_deref()
            .map(|tmux| {
                vec![AgentSession {
                    index: 0,
                    tmux_session_name: tmux.to_string(),
                    working_directory: req
                        .working_directory
                        .clone()
                        .unwrap_or_else(|| "~".to_string()),
                    status: "offline".to_string(),
                    started_at: None,
                }]
            })
            .unwrap_or_default();

        let agent = Agent {
            id: uuid::Uuid::new_v4().to_string(),
            name,
            label: req.label,
            alias: req.alias,
            host_id,
            created_at: now,
            last_active: None,
            avatar: req.avatar,
            tags: req.tags,
            owner: req.owner,
            team: req.team,
            program: req.program,
            model: req.model,
            working_directory: req.working_directory,
            program_args: req.program_args,
            sessions,
            tools: AgentTools::default(),
            hooks: serde_json::json!({}),
            metadata: serde_json::json!({}),
            preferences: serde_json::json!({}),
            amp_identity: None,
        };
        self.save_locked(agents, agent)
    }

    /// Apply a JSON patch to an agent. Top-level fields replace; only
    /// `metadata.amp` and `preferences` merge deeply. `id`, `createdAt`
    /// and `name` are immutable here.
    pub fn update_agent(&self, id: &str, patch: &serde_json::Value) -> Result<Agent, ApiError> {
        let patch_map = patch
            .as_object()
            .ok_or_else(|| ApiError::invalid_request("Patch body must be a JSON object"))?;

        let mut cache = self.cache.lock().unwrap_or_else(|e| e.into_inner());
        let agents = self.load_locked(&mut cache);
        let agent = agents
            .get(id)
            .cloned()
            .ok_or_else(|| ApiError::not_found(format!("Agent {id} not found")))?;

        let mut value = serde_json::to_value(&agent)
            .map_err(|e| ApiError::internal(e.to_string()))?;
        let obj = value.as_object_mut().unwrap();

        for (key, incoming) in patch_map {
            match key.as_str() {
                "id" | "createdAt" | "name" => continue,
                "preferences" => {
                    let slot = obj.entry("preferences").or_insert(serde_json::json!({}));
                    deep_merge(slot, incoming);
                }
                "metadata" => {
                    let slot = obj.entry("metadata").or_insert(serde_json::json!({}));
                    if let (Some(slot_map), Some(in_map)) = (slot.as_object_mut(), incoming.as_object()) {
                        for (mk, mv) in in_map {
                            if mk == "amp" {
                                let amp = slot_map.entry("amp").or_insert(serde_json::json!({}));
                                deep_merge(amp, mv);
                            } else {
                                slot_map.insert(mk.clone(), mv.clone());
                            }
                        }
                    } else {
                        *slot = incoming.clone();
                    }
                }
                _ => {
                    obj.insert(key.clone(), incoming.clone());
                }
            }
        }

        let updated: Agent = serde_json::from_value(value)
            .map_err(|e| ApiError::invalid_request(format!("Invalid agent patch: {e}")))?;
        self.save_locked(agents, updated)
    }

    pub fn touch_last_active(&self, id: &str) {
        let mut cache = self.cache.lock().unwrap_or_else(|e| e.into_inner());
        let agents = self.load_locked(&mut cache);
        if let Some(mut agent) = agents.get(id).cloned() {
            agent.last_active = Some(store::now_rfc3339());
            let _ = self.save_locked(agents, agent);
        }
    }

    /// Replace (or create) the canonical session entry.
    pub fn link_session(
        &self,
        id: &str,
        tmux_session_name: &str,
        working_directory: Option<&str>,
    ) -> Result<Agent, ApiError> {
        let mut cache = self.cache.lock().unwrap_or_else(|e| e.into_inner());
        let agents = self.load_locked(&mut cache);
        let mut agent = agents
            .get(id)
            .cloned()
            .ok_or_else(|| ApiError::not_found(format!("Agent {id} not found")))?;

        let session = AgentSession {
            index: 0,
            tmux_session_name: tmux_session_name.to_string(),
            working_directory: working_directory
                .map(String::from)
                .or_else(|| agent.working_directory.clone())
                .unwrap_or_else(|| "~".to_string()),
            status: "offline".to_string(),
            started_at: None,
        };
        if agent.sessions.is_empty() {
            agent.sessions.push(session);
        } else {
            agent.sessions[0] = session;
        }
        self.save_locked(agents, agent)
    }

    pub fn set_session_status(&self, id: &str, status: &str) -> Result<Agent, ApiError> {
        let mut cache = self.cache.lock().unwrap_or_else(|e| e.into_inner());
        let agents = self.load_locked(&mut cache);
        let mut agent = agents
            .get(id)
            .cloned()
            .ok_or_else(|| ApiError::not_found(format!("Agent {id} not found")))?;
        if let Some(session) = agent.sessions.first_mut() {
            session.status = status.to_string();
            session.started_at = if status == "online" {
                Some(store::now_rfc3339())
            } else {
                None
            };
        }
        self.save_locked(agents, agent)
    }

    pub fn mark_amp_registered(&self, id: &str, identity: AmpIdentity) -> Result<Agent, ApiError> {
        let mut cache = self.cache.lock().unwrap_or_else(|e| e.into_inner());
        let agents = self.load_locked(&mut cache);
        let mut agent = agents
            .get(id)
            .cloned()
            .ok_or_else(|| ApiError::not_found(format!("Agent {id} not found")))?;

        let amp_meta = serde_json::json!({
            "address": identity.amp_address,
            "fingerprint": identity.fingerprint,
            "tenant": identity.tenant,
            "registeredAt": identity.created_at,
        });
        if let Some(map) = agent.metadata.as_object_mut() {
            map.insert("amp".to_string(), amp_meta);
        } else {
            agent.metadata = serde_json::json!({ "amp": amp_meta });
        }
        agent.amp_identity = Some(identity);
        self.save_locked(agents, agent)
    }

    pub fn amp_registered_agents(&self) -> Vec<Agent> {
        self.list_agents()
            .into_iter()
            .filter(|a| a.metadata.get("amp").map(|v| v.is_object()).unwrap_or(false))
            .collect()
    }

    /// Remove the live record. With `backup`, the final `agent.json` is
    /// archived under `agents/deleted/` first.
    pub fn delete_agent(&self, id: &str, backup: bool) -> Result<Agent, ApiError> {
        let mut cache = self.cache.lock().unwrap_or_else(|e| e.into_inner());
        let agents = self.load_locked(&mut cache);
        let agent = agents
            .get(id)
            .cloned()
            .ok_or_else(|| ApiError::not_found(format!("Agent {id} not found")))?;

        if backup {
            let backup_path = self.agents_dir.join("deleted").join(format!("{id}.json"));
            store::write_json_atomic(&backup_path, &agent)?;
        }
        std::fs::remove_dir_all(self.agents_dir.join(id))?;
        agents.remove(id);
        Ok(agent)
    }
}
