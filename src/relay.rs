use crate::error::ApiError;
use crate::models::{Envelope, Payload, RelayEntry};
use crate::store;
use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::sync::{Arc, Mutex};
use std::time::{Duration, Instant};

const RELAY_TTL_DAYS: i64 = 7;
const PENDING_CAP: usize = 100;
const CLEANUP_INTERVAL: Duration = Duration::from_secs(3600);

/// Durable per-agent FIFO of envelopes awaiting pickup. At-least-once: an
/// entry only leaves the queue on acknowledgement.
pub struct RelayQueue {
    root: PathBuf,
    locks: Mutex<HashMap<String, Arc<Mutex<()>>>>,
    last_cleanup: Mutex<Option<Instant>>,
}

impl RelayQueue {
    pub fn new(data_dir: &Path) -> Self {
        RelayQueue {
            root: data_dir.join("relay"),
            locks: Mutex::new(HashMap::new()),
            last_cleanup: Mutex::new(None),
        }
    }

    fn agent_lock(&self, agent_id: &str) -> Arc<Mutex<()>> {
        let mut locks = self.locks.lock().unwrap_or_else(|e| e.into_inner());
        locks.entry(agent_id.to_string()).or_default().clone()
    }

    fn agent_dir(&self, agent_id: &str) -> PathBuf {
        self.root.join(agent_id)
    }

    pub fn queue_message(
        &self,
        agent_id: &str,
        envelope: Envelope,
        payload: Payload,
        sender_public_key_hex: Option<String>,
    ) -> Result<RelayEntry, ApiError> {
        let now = chrono::Utc::now();
        let entry = RelayEntry {
            agent_id: agent_id.to_string(),
            envelope,
            payload,
            sender_public_key_hex,
            queued_at: now.to_rfc3339(),
            expires_at: (now + chrono::Duration::days(RELAY_TTL_DAYS)).to_rfc3339(),
        };
        let lock = self.agent_lock(agent_id);
        let _guard = lock.lock().unwrap_or_else(|e| e.into_inner());
        let path = self.agent_dir(agent_id).join(format!("{}.json", entry.envelope.id));
        store::write_json_atomic(&path, &entry)?;
        Ok(entry)
    }

    /// Oldest-first pending entries, without removal. `limit == 0` returns
    /// everything; positive limits are capped at 100.
    pub fn get_pending_messages(&self, agent_id: &str, limit: usize) -> Vec<RelayEntry> {
        self.maybe_cleanup();

        let lock = self.agent_lock(agent_id);
        let _guard = lock.lock().unwrap_or_else(|e| e.into_inner());
        let now = store::now_rfc3339();
        let mut entries: Vec<RelayEntry> = store::list_json_files(&self.agent_dir(agent_id))
            .iter()
            .filter_map(|p| store::read_json::<RelayEntry>(p))
            .filter(|e| e.expires_at > now)
            .collect();
        entries.sort_by(|a, b| a.queued_at.cmp(&b.queued_at));
        if limit > 0 {
            entries.truncate(limit.min(PENDING_CAP));
        }
        entries
    }

    /// Remove an entry by envelope id. Acknowledging an unknown id is a
    /// no-op (duplicate acks are expected under at-least-once delivery).
    pub fn acknowledge_message(&self, agent_id: &str, id: &str) -> bool {
        let lock = self.agent_lock(agent_id);
        let _guard = lock.lock().unwrap_or_else(|e| e.into_inner());
        std::fs::remove_file(self.agent_dir(agent_id).join(format!("{id}.json"))).is_ok()
    }

    pub fn acknowledge_messages(&self, agent_id: &str, ids: &[String]) -> usize {
        let lock = self.agent_lock(agent_id);
        let _guard = lock.lock().unwrap_or_else(|e| e.into_inner());
        let dir = self.agent_dir(agent_id);
        ids.iter()
            .take(PENDING_CAP)
            .filter(|id| std::fs::remove_file(dir.join(format!("{id}.json"))).is_ok())
            .count()
    }

    /// Lazy expiry sweep across all agents, at most once per hour.
    fn maybe_cleanup(&self) {
        {
            let mut last = self.last_cleanup.lock().unwrap_or_else(|e| e.into_inner());
            if let Some(t) = *last
                && t.elapsed() < CLEANUP_INTERVAL
            {
                return;
            }
            *last = Some(Instant::now());
        }
        self.cleanup_all_expired_messages();
    }

    pub fn cleanup_all_expired_messages(&self) -> usize {
        let now = store::now_rfc3339();
        let mut removed = 0;
        for agent_id in store::list_subdirs(&self.root) {
            let lock = self.agent_lock(&agent_id);
            let _guard = lock.lock().unwrap_or_else(|e| e.into_inner());
            for path in store::list_json_files(&self.agent_dir(&agent_id)) {
                let expired = store::read_json::<RelayEntry>(&path)
                    .map(|e| e.expires_at <= now)
                    .unwrap_or(true);
                if expired && std::fs::remove_file(&path).is_ok() {
                    removed += 1;
                }
            }
        }
        removed
    }
}
