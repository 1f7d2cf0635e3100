use crate::error::ApiError;
use crate::models::{MessageSummary, Priority, StoredMessage};
use crate::store;
use std::collections::{HashMap, HashSet};
use std::path::{Path, PathBuf};
use std::sync::{Arc, Mutex};

pub const BOXES: [&str; 3] = ["inbox", "sent", "archived"];
const DEFAULT_LIMIT: usize = 25;
const DEFAULT_PREVIEW: usize = 2000;

#[derive(Debug, Default)]
pub struct ListQuery {
    pub status: Option<String>,
    pub priority: Option<Priority>,
    pub from: Option<String>,
    pub to: Option<String>,
    /// 0 = all. Default 25.
    pub limit: Option<usize>,
    pub preview_length: Option<usize>,
}

#[derive(Debug, serde::Serialize)]
pub struct MailboxStats {
    pub inbox: usize,
    pub unread: usize,
    pub sent: usize,
    pub archived: usize,
}

fn preview(text: &str, len: usize) -> String {
    if text.chars().count() <= len {
        text.to_string()
    } else {
        text.chars().take(len).collect()
    }
}

fn summarize(msg: &StoredMessage, preview_len: usize) -> MessageSummary {
    MessageSummary {
        id: msg.id.clone(),
        from: msg.from.clone(),
        to: msg.to.clone(),
        subject: msg.subject.clone(),
        preview: preview(&msg.content.message, preview_len),
        status: msg.status.clone(),
        priority: msg.priority,
        kind: msg.content.kind,
        timestamp: msg.timestamp.clone(),
        thread_id: msg.thread_id.clone(),
        in_reply_to: msg.in_reply_to.clone(),
        delivered_via: msg.delivered_via.clone(),
        sender_public_key_hex: msg.sender_public_key_hex.clone(),
        signature_verified: msg.signature_verified,
    }
}

/// Per-agent message boxes: one JSON file per message under
/// `messages/{inbox,sent,archived}/<name>/`. Writes to one recipient are
/// serialized by a per-name lock so concurrent routes cannot interleave.
pub struct Mailbox {
    root: PathBuf,
    locks: Mutex<HashMap<String, Arc<Mutex<()>>>>,
}

impl Mailbox {
    pub fn new(data_dir: &Path) -> Self {
        Mailbox {
            root: data_dir.join("messages"),
            locks: Mutex::new(HashMap::new()),
        }
    }

    fn name_lock(&self, name: &str) -> Arc<Mutex<()>> {
        let mut locks = self.locks.lock().unwrap_or_else(|e| e.into_inner());
        locks.entry(name.to_string()).or_default().clone()
    }

    fn box_dir(&self, box_name: &str, agent_name: &str) -> PathBuf {
        self.root.join(box_name).join(agent_name)
    }

    fn message_path(&self, box_name: &str, agent_name: &str, id: &str) -> PathBuf {
        self.box_dir(box_name, agent_name).join(format!("{id}.json"))
    }

    fn load_box(&self, box_name: &str, agent_name: &str) -> Vec<StoredMessage> {
        store::list_json_files(&self.box_dir(box_name, agent_name))
            .iter()
            .filter_map(|p| store::read_json::<StoredMessage>(p))
            .collect()
    }

    /// Store an inbound message in the recipient's inbox.
    pub fn deliver(&self, agent_name: &str, message: &StoredMessage) -> Result<(), ApiError> {
        let lock = self.name_lock(agent_name);
        let _guard = lock.lock().unwrap_or_else(|e| e.into_inner());
        store::write_json_atomic(&self.message_path("inbox", agent_name, &message.id), message)?;
        Ok(())
    }

    /// Record an outbound message in the sender's sent box.
    pub fn record_sent(&self, agent_name: &str, message: &StoredMessage) -> Result<(), ApiError> {
        let lock = self.name_lock(agent_name);
        let _guard = lock.lock().unwrap_or_else(|e| e.into_inner());
        let mut copy = message.clone();
        copy.status = "read".to_string();
        store::write_json_atomic(&self.message_path("sent", agent_name, &copy.id), &copy)?;
        Ok(())
    }

    /// Newest-first summaries from one box.
    pub fn list(&self, agent_name: &str, box_name: &str, query: &ListQuery) -> Vec<MessageSummary> {
        let preview_len = query.preview_length.unwrap_or(DEFAULT_PREVIEW);
        let mut messages = self.load_box(box_name, agent_name);

        if let Some(ref status) = query.status {
            messages.retain(|m| &m.status == status);
        }
        if let Some(priority) = query.priority {
            messages.retain(|m| m.priority == priority);
        }
        if let Some(ref from) = query.from {
            messages.retain(|m| m.from == *from || m.from.starts_with(&format!("{from}@")));
        }
        if let Some(ref to) = query.to {
            messages.retain(|m| m.to == *to || m.to.starts_with(&format!("{to}@")));
        }

        messages.sort_by(|a, b| b.timestamp.cmp(&a.timestamp));
        let limit = query.limit.unwrap_or(DEFAULT_LIMIT);
        if limit > 0 {
            messages.truncate(limit);
        }
        messages.iter().map(|m| summarize(m, preview_len)).collect()
    }

    pub fn get_message(&self, agent_name: &str, box_name: &str, id: &str) -> Option<StoredMessage> {
        store::read_json(&self.message_path(box_name, agent_name, id))
    }

    /// Locate a message in any box.
    pub fn find_message(&self, agent_name: &str, id: &str) -> Option<(String, StoredMessage)> {
        BOXES.iter().find_map(|b| {
            self.get_message(agent_name, b, id)
                .map(|m| (b.to_string(), m))
        })
    }

    /// Idempotent: marking an already-read message succeeds without change.
    pub fn mark_message_as_read(&self, agent_name: &str, id: &str) -> Result<(), ApiError> {
        let lock = self.name_lock(agent_name);
        let _guard = lock.lock().unwrap_or_else(|e| e.into_inner());
        let mut msg = self
            .get_message(agent_name, "inbox", id)
            .ok_or_else(|| ApiError::not_found(format!("Message {id} not found")))?;
        if msg.status == "unread" {
            msg.status = "read".to_string();
            store::write_json_atomic(&self.message_path("inbox", agent_name, id), &msg)?;
        }
        Ok(())
    }

    /// Move a message from inbox to archived. Archiving an already-archived
    /// message is a no-op.
    pub fn archive_message(&self, agent_name: &str, id: &str) -> Result<(), ApiError> {
        let lock = self.name_lock(agent_name);
        let _guard = lock.lock().unwrap_or_else(|e| e.into_inner());
        if self.get_message(agent_name, "archived", id).is_some() {
            return Ok(());
        }
        let mut msg = self
            .get_message(agent_name, "inbox", id)
            .ok_or_else(|| ApiError::not_found(format!("Message {id} not found")))?;
        msg.status = "archived".to_string();
        store::write_json_atomic(&self.message_path("archived", agent_name, id), &msg)?;
        std::fs::remove_file(self.message_path("inbox", agent_name, id))?;
        Ok(())
    }

    pub fn delete_message(&self, agent_name: &str, id: &str) -> Result<(), ApiError> {
        let lock = self.name_lock(agent_name);
        let _guard = lock.lock().unwrap_or_else(|e| e.into_inner());
        let (box_name, _) = self
            .find_message(agent_name, id)
            .ok_or_else(|| ApiError::not_found(format!("Message {id} not found")))?;
        std::fs::remove_file(self.message_path(&box_name, agent_name, id))?;
        Ok(())
    }

    pub fn unread_count(&self, agent_name: &str) -> usize {
        self.load_box("inbox", agent_name)
            .iter()
            .filter(|m| m.status == "unread")
            .count()
    }

    pub fn sent_count(&self, agent_name: &str) -> usize {
        store::list_json_files(&self.box_dir("sent", agent_name)).len()
    }

    pub fn stats(&self, agent_name: &str) -> MailboxStats {
        let inbox = self.load_box("inbox", agent_name);
        MailboxStats {
            unread: inbox.iter().filter(|m| m.status == "unread").count(),
            inbox: inbox.len(),
            sent: store::list_json_files(&self.box_dir("sent", agent_name)).len(),
            archived: store::list_json_files(&self.box_dir("archived", agent_name)).len(),
        }
    }

    /// Case-insensitive substring search over subject and body across all
    /// three boxes.
    pub fn search(&self, agent_name: &str, query: &str, preview_len: usize) -> Vec<MessageSummary> {
        let needle = query.to_lowercase();
        let mut results: Vec<MessageSummary> = BOXES
            .iter()
            .flat_map(|b| self.load_box(b, agent_name))
            .filter(|m| {
                m.subject.to_lowercase().contains(&needle)
                    || m.content.message.to_lowercase().contains(&needle)
            })
            .map(|m| summarize(&m, preview_len))
            .collect();
        results.sort_by(|a, b| b.timestamp.cmp(&a.timestamp));
        results.dedup_by(|a, b| a.id == b.id);
        results
    }

    /// Agent names that have at least one mailbox directory.
    pub fn known_names(&self) -> Vec<String> {
        let mut names: Vec<String> = BOXES
            .iter()
            .flat_map(|b| store::list_subdirs(&self.root.join(b)))
            .collect::<HashSet<_>>()
            .into_iter()
            .collect();
        names.sort();
        names
    }

    /// Collect a meeting's thread across participants. Broadcast fan-out
    /// writes one copy per recipient; de-duplicate by
    /// `(from, preview, timestamp-to-second)` and sort ascending.
    pub fn meeting_messages(
        &self,
        meeting_id: &str,
        participants: &[String],
        since: Option<&str>,
    ) -> Vec<MessageSummary> {
        let prefix = format!("[MEETING:{meeting_id}]");
        let mut scan_names: Vec<String> = participants.to_vec();
        scan_names.push("maestro".to_string());
        scan_names.dedup();

        let mut seen = HashSet::new();
        let mut results: Vec<MessageSummary> = Vec::new();
        for name in &scan_names {
            for box_name in ["inbox", "sent"] {
                for msg in self.load_box(box_name, name) {
                    if !msg.subject.starts_with(&prefix) {
                        continue;
                    }
                    if let Some(since) = since
                        && msg.timestamp.as_str() <= since
                    {
                        continue;
                    }
                    let summary = summarize(&msg, DEFAULT_PREVIEW);
                    let second = summary.timestamp.chars().take(19).collect::<String>();
                    let key = (summary.from.clone(), summary.preview.clone(), second);
                    if seen.insert(key) {
                        results.push(summary);
                    }
                }
            }
        }
        results.sort_by(|a, b| a.timestamp.cmp(&b.timestamp));
        results
    }

    /// Remove all three boxes for an agent name (hard delete).
    pub fn wipe_agent(&self, agent_name: &str) {
        for box_name in BOXES {
            let _ = std::fs::remove_dir_all(self.box_dir(box_name, agent_name));
        }
    }
}
