use std::env;
use std::path::PathBuf;
use std::time::Duration;

#[derive(Debug, Clone)]
pub struct Config {
    pub data_dir: PathBuf,
    pub api_host: String,
    pub api_port: u16,
    pub openai_api_key: String,
    pub openai_model: String,
    pub poller_concurrency: usize,
    pub per_user_timeout: Duration,
    /// Durable cursors survive restarts; in-memory cursors re-evaluate
    /// history after one.
    pub durable_cursors: bool,
    /// Completed/failed tasks older than this are purged nightly.
    pub task_retention_days: i64,
}

fn default_data_dir() -> PathBuf {
    dirs::data_dir()
        .unwrap_or_else(|| PathBuf::from("."))
        .join("steward")
}

impl Config {
    pub fn from_env() -> Self {
        let data_dir = env::var("STEWARD_DATA_DIR")
            .map(PathBuf::from)
            .unwrap_or_else(|_| default_data_dir());

        let api_host = env::var("STEWARD_API_HOST").unwrap_or_else(|_| "127.0.0.1".to_string());
        let api_port = env::var("STEWARD_API_PORT")
            .ok()
            .and_then(|value| value.parse::<u16>().ok())
            .unwrap_or(8787);

        let openai_api_key = env::var("OPENAI_API_KEY").unwrap_or_default();
        let openai_model =
            env::var("STEWARD_MODEL").unwrap_or_else(|_| "gpt-4o-mini".to_string());

        let poller_concurrency = env::var("STEWARD_POLL_CONCURRENCY")
            .ok()
            .and_then(|value| value.parse::<usize>().ok())
            .filter(|n| *n > 0)
            .unwrap_or(4);
        let per_user_timeout = env::var("STEWARD_POLL_USER_TIMEOUT_SECS")
            .ok()
            .and_then(|value| value.parse::<u64>().ok())
            .map(Duration::from_secs)
            .unwrap_or(Duration::from_secs(20));

        let durable_cursors = env::var("STEWARD_DURABLE_CURSORS")
            .map(|value| value != "false" && value != "0")
            .unwrap_or(true);

        let task_retention_days = env::var("STEWARD_TASK_RETENTION_DAYS")
            .ok()
            .and_then(|value| value.parse::<i64>().ok())
            .filter(|days| *days > 0)
            .unwrap_or(30);

        Self {
            data_dir,
            api_host,
            api_port,
            openai_api_key,
            openai_model,
            poller_concurrency,
            per_user_timeout,
            durable_cursors,
            task_retention_days,
        }
    }
}
