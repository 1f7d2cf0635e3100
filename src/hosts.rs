use crate::config::Config;
use crate::error::ApiError;
use crate::models::{Host, Organization, UpdateHost};
use crate::store;
use std::path::{Path, PathBuf};
use std::sync::Mutex;

#[derive(Debug)]
pub enum AddHostOutcome {
    Added(Host),
    /// Some identifier of the incoming host already belongs to the returned
    /// stored host id.
    AlreadyKnown(String),
}

#[derive(Debug, PartialEq, Eq)]
pub enum AdoptOutcome {
    Adopted,
    AlreadySet,
    Mismatch,
}

#[derive(Default)]
struct HostsCache {
    hosts: Option<Vec<Host>>,
    // Outer None = not loaded yet; inner None = no organization set.
    organization: Option<Option<Organization>>,
}

/// Persistent list of self + peers (`hosts.json`) and the write-once
/// organization label (`organization.json`). A single process-wide mutex
/// wraps every read-modify-write.
pub struct HostsStore {
    hosts_path: PathBuf,
    org_path: PathBuf,
    cache: Mutex<HostsCache>,
}

fn normalize(s: &str) -> String {
    s.trim().trim_end_matches('/').to_ascii_lowercase()
}

/// id + url + aliases, normalized for overlap checks.
pub fn host_identifiers(id: &str, url: &str, aliases: &[String]) -> Vec<String> {
    let mut ids = vec![normalize(id), normalize(url)];
    ids.extend(aliases.iter().map(|a| normalize(a)));
    ids.retain(|s| !s.is_empty());
    ids.dedup();
    ids
}

fn overlaps(a: &[String], b: &[String]) -> bool {
    a.iter().any(|x| b.contains(x))
}

impl HostsStore {
    pub fn new(data_dir: &Path) -> Self {
        HostsStore {
            hosts_path: data_dir.join("hosts.json"),
            org_path: data_dir.join("organization.json"),
            cache: Mutex::new(HostsCache::default()),
        }
    }

    fn load_locked(&self, cache: &mut HostsCache) -> Vec<Host> {
        if cache.hosts.is_none() {
            cache.hosts = Some(store::read_json(&self.hosts_path).unwrap_or_default());
        }
        cache.hosts.clone().unwrap_or_default()
    }

    fn save_locked(&self, cache: &mut HostsCache, hosts: Vec<Host>) -> Result<(), ApiError> {
        store::write_json_atomic(&self.hosts_path, &hosts)?;
        cache.hosts = Some(hosts);
        Ok(())
    }

    /// Seed the unique `type=self` entry on first boot.
    pub fn seed_self(&self, config: &Config) {
        let mut cache = self.cache.lock().unwrap_or_else(|e| e.into_inner());
        let hosts = self.load_locked(&mut cache);
        if hosts.iter().any(|h| h.host_type == "self") {
            return;
        }

        let hostname = crate::config::os_hostname();
        let id: String = hostname
            .chars()
            .map(|c| if c.is_ascii_alphanumeric() || c == '_' || c == '-' { c } else { '-' })
            .collect();
        let ip = local_ip_address::local_ip().map(|ip| ip.to_string()).ok();
        let url = config
            .host_url
            .clone()
            .unwrap_or_else(|| {
                format!(
                    "http://{}:{}",
                    ip.clone().unwrap_or_else(|| "127.0.0.1".to_string()),
                    config.port
                )
            });

        let mut aliases = vec![hostname.clone(), format!("{hostname}.local")];
        if let Some(ip) = ip {
            aliases.push(ip);
        }
        aliases.retain(|a| normalize(a) != normalize(&id));

        let host = Host {
            id,
            name: config.host_name.clone(),
            url,
            host_type: "self".to_string(),
            aliases,
            enabled: true,
            description: String::new(),
            synced_at: None,
            sync_source: None,
            tailscale: None,
        };
        let mut hosts = hosts;
        hosts.insert(0, host);
        if let Err(e) = self.save_locked(&mut cache, hosts) {
            eprintln!("⚠️  Failed to seed self host: {}", e.message);
        }
    }

    pub fn get_hosts(&self) -> Vec<Host> {
        let mut cache = self.cache.lock().unwrap_or_else(|e| e.into_inner());
        self.load_locked(&mut cache)
    }

    pub fn get_self_host(&self) -> Option<Host> {
        self.get_hosts().into_iter().find(|h| h.host_type == "self")
    }

    pub fn get_host(&self, id: &str) -> Option<Host> {
        self.get_hosts().into_iter().find(|h| h.id == id)
    }

    /// Enabled remote peers.
    pub fn enabled_peers(&self) -> Vec<Host> {
        self.get_hosts()
            .into_iter()
            .filter(|h| h.host_type == "remote" && h.enabled)
            .collect()
    }

    /// Matches id, url, or any alias.
    pub fn find_host_by_any_identifier(&self, identifier: &str) -> Option<Host> {
        let needle = normalize(identifier);
        if needle.is_empty() {
            return None;
        }
        self.get_hosts()
            .into_iter()
            .find(|h| host_identifiers(&h.id, &h.url, &h.aliases).contains(&needle))
    }

    /// Add a host, refusing any identifier overlap with a stored host.
    /// Mesh convergence depends on `{id, url, aliases[]}` staying pairwise
    /// disjoint across entries.
    pub fn add_host(&self, host: Host) -> Result<AddHostOutcome, ApiError> {
        if host.id.is_empty()
            || !host
                .id
                .chars()
                .all(|c| c.is_ascii_alphanumeric() || c == '_' || c == '-')
        {
            return Err(ApiError::invalid_field(
                "id",
                "Host id may only contain letters, digits, dashes and underscores",
            ));
        }
        if !host.url.starts_with("http://") && !host.url.starts_with("https://") {
            return Err(ApiError::invalid_field("url", "Host url must be an absolute URL"));
        }

        let mut cache = self.cache.lock().unwrap_or_else(|e| e.into_inner());
        let mut hosts = self.load_locked(&mut cache);

        let incoming = host_identifiers(&host.id, &host.url, &host.aliases);
        if let Some(existing) = hosts
            .iter()
            .find(|h| overlaps(&host_identifiers(&h.id, &h.url, &h.aliases), &incoming))
        {
            return Ok(AddHostOutcome::AlreadyKnown(existing.id.clone()));
        }

        hosts.push(host.clone());
        self.save_locked(&mut cache, hosts)?;
        Ok(AddHostOutcome::Added(host))
    }

    pub fn update_host(&self, id: &str, patch: UpdateHost) -> Result<Host, ApiError> {
        let mut cache = self.cache.lock().unwrap_or_else(|e| e.into_inner());
        let mut hosts = self.load_locked(&mut cache);
        let idx = hosts
            .iter()
            .position(|h| h.id == id)
            .ok_or_else(|| ApiError::not_found(format!("Host {id} not found")))?;

        let mut updated = hosts[idx].clone();
        if let Some(name) = patch.name {
            updated.name = name;
        }
        if let Some(url) = patch.url {
            updated.url = url;
        }
        if let Some(aliases) = patch.aliases {
            updated.aliases = aliases;
        }
        if let Some(enabled) = patch.enabled {
            updated.enabled = enabled;
        }
        if let Some(description) = patch.description {
            updated.description = description;
        }

        let ids = host_identifiers(&updated.id, &updated.url, &updated.aliases);
        if hosts
            .iter()
            .enumerate()
            .any(|(i, h)| i != idx && overlaps(&host_identifiers(&h.id, &h.url, &h.aliases), &ids))
        {
            return Err(ApiError::conflict(
                "Update would make this host share an identifier with another host",
            ));
        }

        hosts[idx] = updated.clone();
        self.save_locked(&mut cache, hosts)?;
        Ok(updated)
    }

    pub fn delete_host(&self, id: &str) -> Result<(), ApiError> {
        let mut cache = self.cache.lock().unwrap_or_else(|e| e.into_inner());
        let mut hosts = self.load_locked(&mut cache);
        let idx = hosts
            .iter()
            .position(|h| h.id == id)
            .ok_or_else(|| ApiError::not_found(format!("Host {id} not found")))?;
        if hosts[idx].host_type == "self" {
            return Err(ApiError::invalid_request("Cannot delete the self host"));
        }
        hosts.remove(idx);
        self.save_locked(&mut cache, hosts)
    }

    pub fn stamp_synced(&self, id: &str, source: &str) {
        let mut cache = self.cache.lock().unwrap_or_else(|e| e.into_inner());
        let mut hosts = self.load_locked(&mut cache);
        if let Some(h) = hosts.iter_mut().find(|h| h.id == id) {
            h.synced_at = Some(store::now_rfc3339());
            h.sync_source = Some(source.to_string());
            let _ = self.save_locked(&mut cache, hosts);
        }
    }

    pub fn clear_cache(&self) {
        let mut cache = self.cache.lock().unwrap_or_else(|e| e.into_inner());
        cache.hosts = None;
        cache.organization = None;
    }

    // --- Organization ---

    pub fn organization(&self) -> Option<Organization> {
        let mut cache = self.cache.lock().unwrap_or_else(|e| e.into_inner());
        if cache.organization.is_none() {
            cache.organization = Some(store::read_json(&self.org_path));
        }
        cache.organization.clone().flatten()
    }

    /// The only allowed organization mutation: `unset → set`. Setting the
    /// same value again is a no-op; a different value is a mismatch.
    pub fn adopt_organization(&self, name: &str, set_at: &str, set_by: &str) -> AdoptOutcome {
        let mut cache = self.cache.lock().unwrap_or_else(|e| e.into_inner());
        if cache.organization.is_none() {
            cache.organization = Some(store::read_json(&self.org_path));
        }
        match cache.organization.clone().flatten() {
            Some(existing) if existing.organization == name => AdoptOutcome::AlreadySet,
            Some(_) => AdoptOutcome::Mismatch,
            None => {
                let org = Organization {
                    organization: name.to_string(),
                    set_at: set_at.to_string(),
                    set_by: set_by.to_string(),
                };
                if let Err(e) = store::write_json_atomic(&self.org_path, &org) {
                    eprintln!("⚠️  Failed to persist organization: {e}");
                }
                cache.organization = Some(Some(org));
                AdoptOutcome::Adopted
            }
        }
    }
}
