use crate::error::ApiError;
use crate::models::{CreateMeeting, Meeting, UpdateMeeting};
use crate::store;
use std::path::{Path, PathBuf};
use std::sync::Mutex;

/// Meeting catalog (`meetings.json`). Status strings are owned by the UI;
/// the store only persists them.
pub struct MeetingStore {
    path: PathBuf,
    cache: Mutex<Option<Vec<Meeting>>>,
}

impl MeetingStore {
    pub fn new(data_dir: &Path) -> Self {
        MeetingStore {
            path: data_dir.join("meetings.json"),
            cache: Mutex::new(None),
        }
    }

    fn load_locked(&self, cache: &mut Option<Vec<Meeting>>) -> Vec<Meeting> {
        if cache.is_none() {
            *cache = Some(store::read_json(&self.path).unwrap_or_default());
        }
        cache.clone().unwrap_or_default()
    }

    fn save_locked(
        &self,
        cache: &mut Option<Vec<Meeting>>,
        meetings: Vec<Meeting>,
    ) -> Result<(), ApiError> {
        store::write_json_atomic(&self.path, &meetings)?;
        *cache = Some(meetings);
        Ok(())
    }

    pub fn list(&self) -> Vec<Meeting> {
        let mut cache = self.cache.lock().unwrap_or_else(|e| e.into_inner());
        self.load_locked(&mut cache)
    }

    pub fn get(&self, id: &str) -> Option<Meeting> {
        self.list().into_iter().find(|m| m.id == id)
    }

    pub fn create(&self, req: CreateMeeting) -> Result<Meeting, ApiError> {
        if req.name.trim().is_empty() {
            return Err(ApiError::missing_field("name"));
        }
        let meeting = Meeting {
            id: uuid::Uuid::new_v4().to_string(),
            name: req.name.trim().to_string(),
            agent_ids: req.agent_ids,
            team_id: req.team_id,
            status: "active".to_string(),
            active_agent_id: None,
            sidebar_mode: req.sidebar_mode.unwrap_or_else(|| "grid".to_string()),
            created_at: store::now_rfc3339(),
            last_active_at: None,
            ended_at: None,
        };

        let mut cache = self.cache.lock().unwrap_or_else(|e| e.into_inner());
        let mut meetings = self.load_locked(&mut cache);
        meetings.push(meeting.clone());
        self.save_locked(&mut cache, meetings)?;
        Ok(meeting)
    }

    pub fn update(&self, id: &str, patch: UpdateMeeting) -> Result<Meeting, ApiError> {
        let mut cache = self.cache.lock().unwrap_or_else(|e| e.into_inner());
        let mut meetings = self.load_locked(&mut cache);
        let meeting = meetings
            .iter_mut()
            .find(|m| m.id == id)
            .ok_or_else(|| ApiError::not_found(format!("Meeting {id} not found")))?;

        if let Some(name) = patch.name {
            meeting.name = name;
        }
        if let Some(agent_ids) = patch.agent_ids {
            meeting.agent_ids = agent_ids;
        }
        if let Some(status) = patch.status {
            if status == "ended" && meeting.status != "ended" {
                meeting.ended_at = Some(store::now_rfc3339());
            }
            meeting.status = status;
        }
        if let Some(active) = patch.active_agent_id {
            meeting.active_agent_id = if active.is_empty() { None } else { Some(active) };
        }
        if let Some(mode) = patch.sidebar_mode {
            meeting.sidebar_mode = mode;
        }
        if let Some(at) = patch.last_active_at {
            meeting.last_active_at = Some(at);
        }

        let updated = meeting.clone();
        self.save_locked(&mut cache, meetings)?;
        Ok(updated)
    }

    pub fn delete(&self, id: &str) -> Result<Meeting, ApiError> {
        let mut cache = self.cache.lock().unwrap_or_else(|e| e.into_inner());
        let mut meetings = self.load_locked(&mut cache);
        let idx = meetings
            .iter()
            .position(|m| m.id == id)
            .ok_or_else(|| ApiError::not_found(format!("Meeting {id} not found")))?;
        let mut removed = meetings.remove(idx);
        removed.ended_at.get_or_insert_with(store::now_rfc3339);
        self.save_locked(&mut cache, meetings)?;
        Ok(removed)
    }
}
