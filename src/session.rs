use crate::error::ApiError;
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::sync::Mutex;
use std::time::{Duration, Instant};
use tokio::process::Command;

const TMUX_CALL_TIMEOUT: Duration = Duration::from_secs(5);

/// Status block dropped by the controlled process into `hooks/<session>.json`
/// when it needs operator input.
#[derive(Debug, Serialize, Deserialize, Clone)]
#[serde(rename_all = "camelCase")]
pub struct HookStatus {
    pub status: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub notification_type: Option<String>,
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct IdleInfo {
    pub idle: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub time_since_activity: Option<u64>,
    pub idle_threshold: u64,
}

/// Thin skin over an external tmux server. Sessions are observed, not
/// created beyond `wake`; every invocation is fixed-argv and bounded by a
/// per-call timeout.
pub struct SessionSupervisor {
    activity: Mutex<HashMap<String, Instant>>,
    hooks_dir: PathBuf,
    idle_threshold: Duration,
}

impl SessionSupervisor {
    pub fn new(data_dir: &Path, idle_threshold_secs: u64) -> Self {
        SessionSupervisor {
            activity: Mutex::new(HashMap::new()),
            hooks_dir: data_dir.join("hooks"),
            idle_threshold: Duration::from_secs(idle_threshold_secs),
        }
    }

    async fn tmux(&self, args: &[&str]) -> Option<std::process::Output> {
        let fut = Command::new("tmux").args(args).output();
        match tokio::time::timeout(TMUX_CALL_TIMEOUT, fut).await {
            Ok(Ok(output)) => Some(output),
            _ => None,
        }
    }

    pub async fn session_exists(&self, name: &str) -> bool {
        let target = format!("={name}");
        self.tmux(&["has-session", "-t", &target])
            .await
            .map(|o| o.status.success())
            .unwrap_or(false)
    }

    pub async fn in_copy_mode(&self, name: &str) -> bool {
        let target = format!("={name}");
        self.tmux(&["display-message", "-p", "-t", &target, "#{pane_in_mode}"])
            .await
            .map(|o| String::from_utf8_lossy(&o.stdout).trim() == "1")
            .unwrap_or(false)
    }

    /// Leave copy mode so injected keys reach the process instead of the
    /// scrollback. `q` exits copy mode; the short pause lets tmux settle.
    pub async fn cancel_copy_mode(&self, name: &str) {
        let target = format!("={name}");
        self.tmux(&["send-keys", "-t", &target, "q"]).await;
        tokio::time::sleep(Duration::from_millis(50)).await;
    }

    /// Inject text literally. The `-l` flag keeps tmux from interpreting the
    /// bytes as key names; text and Enter travel in one tmux invocation so
    /// concurrent senders cannot interleave between them.
    pub async fn send_keys(
        &self,
        name: &str,
        text: &str,
        add_newline: bool,
    ) -> Result<(), ApiError> {
        if self.in_copy_mode(name).await {
            self.cancel_copy_mode(name).await;
        }
        let target = format!("={name}");
        let mut args: Vec<&str> = vec!["send-keys", "-t", &target, "-l", "--", text];
        if add_newline {
            args.extend_from_slice(&[";", "send-keys", "-t", &target, "Enter"]);
        }
        let output = self
            .tmux(&args)
            .await
            .ok_or_else(|| ApiError::internal("tmux did not respond"))?;
        if !output.status.success() {
            return Err(ApiError::internal(format!(
                "tmux send-keys failed: {}",
                String::from_utf8_lossy(&output.stderr).trim()
            )));
        }
        self.record_activity(name);
        self.clear_hook(name);
        Ok(())
    }

    pub fn record_activity(&self, name: &str) {
        let mut map = self.activity.lock().unwrap_or_else(|e| e.into_inner());
        map.insert(name.to_string(), Instant::now());
    }

    pub fn time_since_activity(&self, name: &str) -> Option<Duration> {
        let map = self.activity.lock().unwrap_or_else(|e| e.into_inner());
        map.get(name).map(|t| t.elapsed())
    }

    /// Idle iff no recorded activity within the threshold window. Exactly
    /// at the threshold counts as idle.
    pub fn is_idle(&self, name: &str) -> bool {
        match self.time_since_activity(name) {
            Some(elapsed) => elapsed >= self.idle_threshold,
            None => true,
        }
    }

    pub fn idle_info(&self, name: &str) -> IdleInfo {
        IdleInfo {
            idle: self.is_idle(name),
            time_since_activity: self.time_since_activity(name).map(|d| d.as_millis() as u64),
            idle_threshold: self.idle_threshold.as_millis() as u64,
        }
    }

    pub async fn kill_session(&self, name: &str) -> bool {
        let target = format!("={name}");
        self.tmux(&["kill-session", "-t", &target])
            .await
            .map(|o| o.status.success())
            .unwrap_or(false)
    }

    /// Spawn a detached session running the agent's program.
    pub async fn wake(
        &self,
        name: &str,
        working_directory: &str,
        program: &str,
        program_args: &[String],
    ) -> Result<(), ApiError> {
        let mut args: Vec<&str> = vec![
            "new-session", "-d", "-s", name, "-c", working_directory, program,
        ];
        for a in program_args {
            args.push(a);
        }
        let output = self
            .tmux(&args)
            .await
            .ok_or_else(|| ApiError::internal("tmux did not respond"))?;
        if !output.status.success() {
            return Err(ApiError::internal(format!(
                "tmux new-session failed: {}",
                String::from_utf8_lossy(&output.stderr).trim()
            )));
        }
        self.record_activity(name);
        Ok(())
    }

    pub async fn hibernate(&self, name: &str) -> bool {
        let killed = self.kill_session(name).await;
        let mut map = self.activity.lock().unwrap_or_else(|e| e.into_inner());
        map.remove(name);
        killed
    }

    // --- Hook files ---

    pub fn hook_status(&self, name: &str) -> Option<HookStatus> {
        crate::store::read_json(&self.hooks_dir.join(format!("{name}.json")))
    }

    pub fn clear_hook(&self, name: &str) {
        let _ = std::fs::remove_file(self.hooks_dir.join(format!("{name}.json")));
    }

    /// Coarse activity status: `waiting` (process asked for input via hook
    /// file), `active` (recent activity), `idle`.
    pub fn activity_status(&self, name: &str) -> (String, Option<HookStatus>) {
        if let Some(hook) = self.hook_status(name)
            && hook.status == "waiting"
        {
            return ("waiting".to_string(), Some(hook));
        }
        if self.is_idle(name) {
            ("idle".to_string(), None)
        } else {
            ("active".to_string(), None)
        }
    }

    pub fn tracked_sessions(&self) -> Vec<String> {
        let map = self.activity.lock().unwrap_or_else(|e| e.into_inner());
        map.keys().cloned().collect()
    }
}
