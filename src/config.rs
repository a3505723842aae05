//! Configuration types for sample-dl

use crate::error::{Error, Result};
use crate::types::CHUNK_CAPACITY;
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use std::time::Duration;

/// Transfer pipeline sizing and timing
///
/// The queue capacities and send timeouts together form the backpressure
/// contract between the fetch and write workers; the defaults match the
/// device firmware.
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct PipelineConfig {
    /// Pending download requests the URL queue can hold (default: 5)
    #[serde(default = "default_url_queue_capacity")]
    pub url_queue_capacity: usize,

    /// Longest accepted URL in bytes (default: 2048)
    #[serde(default = "default_url_max_len")]
    pub url_max_len: usize,

    /// Bytes read from the network per chunk (default: 1024, at most 1024)
    #[serde(default = "default_chunk_size")]
    pub chunk_size: usize,

    /// Chunks in flight between the workers (default: 2)
    #[serde(default = "default_chunk_queue_capacity")]
    pub chunk_queue_capacity: usize,

    /// How long `submit` waits for URL queue space (default: 100ms)
    #[serde(default = "default_submit_timeout", with = "duration_ms_serde")]
    pub submit_timeout: Duration,

    /// How long the fetch worker waits for chunk queue space (default: 5000ms)
    #[serde(default = "default_chunk_send_timeout", with = "duration_ms_serde")]
    pub chunk_send_timeout: Duration,

    /// Lower bound of the per-worker stack allowance in bytes (default: 6144)
    #[serde(default = "default_min_stack_size")]
    pub min_stack_size: usize,

    /// Upper bound of the per-worker stack allowance in bytes (default: 16384)
    #[serde(default = "default_max_stack_size")]
    pub max_stack_size: usize,

    /// How long shutdown waits for the workers to drain (default: 30000ms)
    #[serde(default = "default_shutdown_timeout", with = "duration_ms_serde")]
    pub shutdown_timeout: Duration,
}

impl Default for PipelineConfig {
    fn default() -> Self {
        Self {
            url_queue_capacity: default_url_queue_capacity(),
            url_max_len: default_url_max_len(),
            chunk_size: default_chunk_size(),
            chunk_queue_capacity: default_chunk_queue_capacity(),
            submit_timeout: default_submit_timeout(),
            chunk_send_timeout: default_chunk_send_timeout(),
            min_stack_size: default_min_stack_size(),
            max_stack_size: default_max_stack_size(),
            shutdown_timeout: default_shutdown_timeout(),
        }
    }
}

/// Removable storage layout
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct StorageConfig {
    /// Where the medium is mounted (default: "./sdcard")
    #[serde(default = "default_mount_point")]
    pub mount_point: PathBuf,

    /// Directory on the medium that receives every file (default: "ROLAND/SP-404SX/SMPL")
    #[serde(default = "default_base_dir")]
    pub base_dir: PathBuf,

    /// Pause after a reinitialization attempt before re-checking the medium (default: 500ms)
    #[serde(default = "default_reinit_settle_delay", with = "duration_ms_serde")]
    pub reinit_settle_delay: Duration,
}

impl Default for StorageConfig {
    fn default() -> Self {
        Self {
            mount_point: default_mount_point(),
            base_dir: default_base_dir(),
            reinit_settle_delay: default_reinit_settle_delay(),
        }
    }
}

/// HTTPS client settings
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct NetworkConfig {
    /// PEM file holding the deployment's trust anchor.
    ///
    /// When set, only this root is trusted; the built-in roots are disabled.
    #[serde(default)]
    pub trust_anchor: Option<PathBuf>,

    /// Refuse plain-HTTP URLs (default: true)
    #[serde(default = "default_true")]
    pub https_only: bool,

    /// TCP/TLS connect timeout (default: 10000ms)
    #[serde(default = "default_connect_timeout", with = "duration_ms_serde")]
    pub connect_timeout: Duration,

    /// Filename used when none can be derived from the URL (default: "unknown.dat")
    #[serde(default = "default_fallback_filename")]
    pub fallback_filename: String,
}

impl Default for NetworkConfig {
    fn default() -> Self {
        Self {
            trust_anchor: None,
            https_only: true,
            connect_timeout: default_connect_timeout(),
            fallback_filename: default_fallback_filename(),
        }
    }
}

/// Device identity and messaging topics
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct DeviceConfig {
    /// Device identifier, normally derived from the hardware address
    #[serde(default)]
    pub device_id: String,

    /// Topic carrying `{"registered": bool}` answers
    #[serde(default = "default_registration_status_topic")]
    pub registration_status_topic: String,

    /// Topic the device publishes its registration code on
    #[serde(default = "default_registration_topic")]
    pub registration_topic: String,

    /// Topic the device publishes storage capacity on
    #[serde(default = "default_storage_status_topic")]
    pub storage_status_topic: String,

    /// Prefix of the per-device topic carrying file batches; the device id is appended
    #[serde(default = "default_batch_topic_prefix")]
    pub batch_topic_prefix: String,

    /// HTTPS endpoint answering `{"isLinked": bool}` for `?deviceId=...`
    #[serde(default)]
    pub link_check_endpoint: Option<String>,
}

impl Default for DeviceConfig {
    fn default() -> Self {
        Self {
            device_id: String::new(),
            registration_status_topic: default_registration_status_topic(),
            registration_topic: default_registration_topic(),
            storage_status_topic: default_storage_status_topic(),
            batch_topic_prefix: default_batch_topic_prefix(),
            link_check_endpoint: None,
        }
    }
}

impl DeviceConfig {
    /// Full topic name carrying this device's file batches
    pub fn batch_topic(&self) -> String {
        format!("{}{}", self.batch_topic_prefix, self.device_id)
    }
}

/// Main configuration
#[derive(Clone, Debug, Default, Serialize, Deserialize)]
pub struct Config {
    /// Queue sizing and timeouts
    #[serde(default)]
    pub pipeline: PipelineConfig,

    /// Storage medium layout
    #[serde(default)]
    pub storage: StorageConfig,

    /// HTTPS client settings
    #[serde(default)]
    pub network: NetworkConfig,

    /// Device identity and topics
    #[serde(default)]
    pub device: DeviceConfig,
}

impl Config {
    /// Parse a JSON configuration document and validate it
    pub fn from_json_str(json: &str) -> Result<Self> {
        let config: Config = serde_json::from_str(json)?;
        config.validate()?;
        Ok(config)
    }

    /// Load and validate a JSON configuration file
    pub fn from_file(path: impl AsRef<Path>) -> Result<Self> {
        let json = std::fs::read_to_string(path)?;
        Self::from_json_str(&json)
    }

    /// Reject settings the pipeline cannot run with
    pub fn validate(&self) -> Result<()> {
        let p = &self.pipeline;
        if p.url_queue_capacity == 0 {
            return Err(Error::config("url_queue_capacity", "must be at least 1"));
        }
        if p.chunk_queue_capacity == 0 {
            return Err(Error::config("chunk_queue_capacity", "must be at least 1"));
        }
        if p.url_max_len == 0 {
            return Err(Error::config("url_max_len", "must be at least 1"));
        }
        if p.chunk_size == 0 || p.chunk_size > CHUNK_CAPACITY {
            return Err(Error::config(
                "chunk_size",
                format!("must be between 1 and {CHUNK_CAPACITY}"),
            ));
        }
        if p.min_stack_size > p.max_stack_size {
            return Err(Error::config(
                "min_stack_size",
                format!(
                    "{} exceeds max_stack_size {}",
                    p.min_stack_size, p.max_stack_size
                ),
            ));
        }
        if self.network.fallback_filename.is_empty()
            || self.network.fallback_filename.contains('/')
        {
            return Err(Error::config(
                "fallback_filename",
                "must be a non-empty name without path separators",
            ));
        }
        Ok(())
    }
}

fn default_url_queue_capacity() -> usize {
    5
}

fn default_url_max_len() -> usize {
    2048
}

fn default_chunk_size() -> usize {
    CHUNK_CAPACITY
}

fn default_chunk_queue_capacity() -> usize {
    2
}

fn default_submit_timeout() -> Duration {
    Duration::from_millis(100)
}

fn default_chunk_send_timeout() -> Duration {
    Duration::from_millis(5000)
}

fn default_min_stack_size() -> usize {
    6144
}

fn default_max_stack_size() -> usize {
    16384
}

fn default_shutdown_timeout() -> Duration {
    Duration::from_secs(30)
}

fn default_mount_point() -> PathBuf {
    PathBuf::from("./sdcard")
}

fn default_base_dir() -> PathBuf {
    PathBuf::from("ROLAND/SP-404SX/SMPL")
}

fn default_reinit_settle_delay() -> Duration {
    Duration::from_millis(500)
}

fn default_connect_timeout() -> Duration {
    Duration::from_secs(10)
}

fn default_fallback_filename() -> String {
    "unknown.dat".to_string()
}

fn default_registration_status_topic() -> String {
    "esp32/registration/status".to_string()
}

fn default_registration_topic() -> String {
    "devices/registration".to_string()
}

fn default_storage_status_topic() -> String {
    "esp32/sd_status".to_string()
}

fn default_batch_topic_prefix() -> String {
    "/presignedurls/".to_string()
}

fn default_true() -> bool {
    true
}

// Durations are written as whole milliseconds
mod duration_ms_serde {
    use serde::{Deserialize, Deserializer, Serializer};
    use std::time::Duration;

    pub fn serialize<S>(duration: &Duration, serializer: S) -> Result<S::Ok, S::Error>
    where
        S: Serializer,
    {
        serializer.serialize_u64(duration.as_millis() as u64)
    }

    pub fn deserialize<'de, D>(deserializer: D) -> Result<Duration, D::Error>
    where
        D: Deserializer<'de>,
    {
        let millis = u64::deserialize(deserializer)?;
        Ok(Duration::from_millis(millis))
    }
}
