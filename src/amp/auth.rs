use crate::error::ApiError;
use crate::models::ApiKeyRecord;
use crate::store;
use sha2::{Digest, Sha256};
use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::sync::Mutex;

/// API-key registry. Tokens are opaque `ak_…` strings handed out exactly
/// once; only their SHA-256 hash is persisted, one record per file under
/// `agents/<uuid>/registrations/` (mode 0600). A mutex-guarded in-memory
/// index is the lookup path for authentication.
pub struct AuthStore {
    agents_dir: PathBuf,
    index: Mutex<Option<HashMap<String, ApiKeyRecord>>>,
}

pub fn generate_api_key() -> String {
    format!(
        "ak_{:032x}{:032x}",
        uuid::Uuid::new_v4().as_u128(),
        uuid::Uuid::new_v4().as_u128()
    )
}

pub fn hash_key(token: &str) -> String {
    hex::encode(Sha256::digest(token.as_bytes()))
}

impl AuthStore {
    pub fn new(data_dir: &Path) -> Self {
        AuthStore {
            agents_dir: data_dir.join("agents"),
            index: Mutex::new(None),
        }
    }

    fn record_path(&self, agent_id: &str, hash: &str) -> PathBuf {
        self.agents_dir
            .join(agent_id)
            .join("registrations")
            .join(format!("{hash}.json"))
    }

    fn load_locked<'a>(
        &self,
        index: &'a mut Option<HashMap<String, ApiKeyRecord>>,
    ) -> &'a mut HashMap<String, ApiKeyRecord> {
        if index.is_none() {
            let mut map = HashMap::new();
            for agent_id in store::list_subdirs(&self.agents_dir) {
                let dir = self.agents_dir.join(&agent_id).join("registrations");
                for path in store::list_json_files(&dir) {
                    if let Some(record) = store::read_json::<ApiKeyRecord>(&path) {
                        map.insert(record.hash.clone(), record);
                    }
                }
            }
            *index = Some(map);
        }
        index.as_mut().unwrap()
    }

    /// Mint a new key for an agent and persist its record. Returns the
    /// plaintext token (the only time it exists) and the stored record.
    pub fn issue(
        &self,
        agent_id: &str,
        tenant_id: &str,
        address: &str,
        created_by: Option<String>,
    ) -> Result<(String, ApiKeyRecord), ApiError> {
        let token = generate_api_key();
        let record = ApiKeyRecord {
            hash: hash_key(&token),
            agent_id: agent_id.to_string(),
            tenant_id: tenant_id.to_string(),
            address: address.to_string(),
            created_at: store::now_rfc3339(),
            revoked_at: None,
            created_by,
        };

        let mut index = self.index.lock().unwrap_or_else(|e| e.into_inner());
        let map = self.load_locked(&mut index);
        store::write_json_atomic_mode(
            &self.record_path(agent_id, &record.hash),
            &record,
            Some(0o600),
        )?;
        map.insert(record.hash.clone(), record.clone());
        Ok((token, record))
    }

    /// Resolve a bearer token to its live (non-revoked) record.
    pub fn authenticate(&self, token: &str) -> Option<ApiKeyRecord> {
        let hash = hash_key(token);
        let mut index = self.index.lock().unwrap_or_else(|e| e.into_inner());
        let map = self.load_locked(&mut index);
        map.get(&hash).filter(|r| r.revoked_at.is_none()).cloned()
    }

    pub fn revoke(&self, hash: &str) -> Result<ApiKeyRecord, ApiError> {
        let mut index = self.index.lock().unwrap_or_else(|e| e.into_inner());
        let map = self.load_locked(&mut index);
        let record = map
            .get_mut(hash)
            .ok_or_else(|| ApiError::not_found("API key not found"))?;
        if record.revoked_at.is_none() {
            record.revoked_at = Some(store::now_rfc3339());
            let record = record.clone();
            store::write_json_atomic_mode(
                &self.record_path(&record.agent_id, hash),
                &record,
                Some(0o600),
            )?;
        }
        Ok(map.get(hash).cloned().unwrap())
    }

    /// Revoke every live key for an agent (hard delete path).
    pub fn revoke_all_for_agent(&self, agent_id: &str) -> usize {
        let hashes: Vec<String> = {
            let mut index = self.index.lock().unwrap_or_else(|e| e.into_inner());
            let map = self.load_locked(&mut index);
            map.values()
                .filter(|r| r.agent_id == agent_id && r.revoked_at.is_none())
                .map(|r| r.hash.clone())
                .collect()
        };
        hashes.iter().filter(|h| self.revoke(h).is_ok()).count()
    }

    /// Drop an agent's records from the index after its directory is wiped.
    pub fn forget_agent(&self, agent_id: &str) {
        let mut index = self.index.lock().unwrap_or_else(|e| e.into_inner());
        if let Some(map) = index.as_mut() {
            map.retain(|_, r| r.agent_id != agent_id);
        }
    }
}
