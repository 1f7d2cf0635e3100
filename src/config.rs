use std::env;
use std::path::PathBuf;

/// Server-wide configuration. All values come from environment variables
/// with sensible defaults.
///
/// Environment variables:
/// - `AIM_DATA_DIR` — root of all persisted state (default: `data`)
/// - `ROCKET_PORT` — advertised port for self identity and mDNS (default: 8000)
/// - `AIM_HOST_NAME` — display name of this host (default: OS hostname)
/// - `AIM_HOST_URL` — URL peers reach this host at (default: `http://<local_ip>:<port>`)
/// - `AIM_IDLE_THRESHOLD_SECS` — session idle threshold (default: 30)
#[derive(Debug, Clone)]
pub struct Config {
    pub data_dir: PathBuf,
    pub port: u16,
    pub host_name: String,
    pub host_url: Option<String>,
    pub idle_threshold_secs: u64,
}

impl Default for Config {
    fn default() -> Self {
        Config {
            data_dir: PathBuf::from("data"),
            port: 8000,
            host_name: os_hostname(),
            host_url: None,
            idle_threshold_secs: 30,
        }
    }
}

impl Config {
    pub fn from_env() -> Self {
        let mut config = Self::default();

        if let Ok(dir) = env::var("AIM_DATA_DIR") {
            config.data_dir = PathBuf::from(dir);
        }
        if let Ok(val) = env::var("ROCKET_PORT")
            && let Ok(port) = val.parse::<u16>()
        {
            config.port = port;
        }
        if let Ok(name) = env::var("AIM_HOST_NAME")
            && !name.trim().is_empty()
        {
            config.host_name = name.trim().to_string();
        }
        if let Ok(url) = env::var("AIM_HOST_URL")
            && !url.trim().is_empty()
        {
            config.host_url = Some(url.trim().trim_end_matches('/').to_string());
        }
        if let Ok(val) = env::var("AIM_IDLE_THRESHOLD_SECS")
            && let Ok(secs) = val.parse::<u64>()
        {
            config.idle_threshold_secs = secs;
        }

        config
    }

    pub fn with_data_dir(dir: impl Into<PathBuf>) -> Self {
        Config {
            data_dir: dir.into(),
            ..Self::default()
        }
    }
}

pub fn os_hostname() -> String {
    hostname::get()
        .map(|h| h.to_string_lossy().into_owned())
        .unwrap_or_else(|_| "localhost".to_string())
}
