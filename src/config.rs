use anyhow::{bail, Context, Result};
use serde::{Deserialize, Serialize};
use std::collections::BTreeSet;
use std::fs;
use std::path::PathBuf;

use crate::expand_tilde;
use crate::youtube::PrivacyStatus;

/// Upload chunks must be multiples of this many bytes.
pub const CHUNK_GRANULARITY: usize = 256 * 1024;

/// Highest accepted `max_retries`; the last backoff ceiling is 2^32 seconds.
pub const MAX_RETRIES_LIMIT: u32 = 32;

/// Everything the uploader used to hard-code, in one place.
///
/// Every field has a default, so an empty JSON object (or no file at all)
/// yields the stock configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct UploaderConfig {
    /// Backoff policy for transient upload failures
    pub retry: RetryPolicy,

    /// Bytes sent per resumable PUT request
    pub chunk_size: usize,

    /// Metadata used when the caller leaves a field out
    pub defaults: MetadataDefaults,

    /// Where OAuth tokens are cached between runs
    pub token_path: String,

    /// Daily schedule folders and log
    pub schedule: ScheduleConfig,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct RetryPolicy {
    /// Retries allowed after transient failures before giving up (1 to 32)
    pub max_retries: u32,

    /// Server status codes treated as transient
    pub retriable_status_codes: BTreeSet<u16>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct MetadataDefaults {
    pub title: String,
    pub description: String,
    /// Comma-separated keywords, split into tags
    pub keywords: String,
    /// Numeric YouTube category, "24" is Entertainment
    pub category: String,
    pub privacy_status: PrivacyStatus,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ScheduleConfig {
    /// Clips ready to be scheduled (.mp4 with a sibling .txt)
    pub clips_dir: PathBuf,
    /// Parent of the per-day folders
    pub scheduled_dir: PathBuf,
    /// JSON log of every planned day
    pub schedule_log: PathBuf,
    /// Publish slots, assigned to clips in order
    pub upload_times: Vec<String>,
    pub clips_per_day: usize,
    /// (from, to) pairs applied to every description
    pub description_replacements: Vec<(String, String)>,
    /// Prepended to descriptions that don't already ask viewers to follow
    pub follow_banner: String,
}

impl Default for UploaderConfig {
    fn default() -> Self {
        Self {
            retry: RetryPolicy::default(),
            chunk_size: 32 * CHUNK_GRANULARITY,
            defaults: MetadataDefaults::default(),
            token_path: "~/.youtube_tokens.json".to_string(),
            schedule: ScheduleConfig::default(),
        }
    }
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            max_retries: 10,
            retriable_status_codes: [500, 502, 503, 504].into_iter().collect(),
        }
    }
}

impl RetryPolicy {
    pub fn new(max_retries: u32, retriable_status_codes: impl IntoIterator<Item = u16>) -> Self {
        Self {
            max_retries,
            retriable_status_codes: retriable_status_codes.into_iter().collect(),
        }
    }

    pub fn is_retriable(&self, status: u16) -> bool {
        self.retriable_status_codes.contains(&status)
    }
}

impl Default for MetadataDefaults {
    fn default() -> Self {
        Self {
            title: "Your Video Title".to_string(),
            description: "Your video description".to_string(),
            keywords: "movie clip, cinema, popular".to_string(),
            category: "24".to_string(),
            privacy_status: PrivacyStatus::Private,
        }
    }
}

impl Default for ScheduleConfig {
    fn default() -> Self {
        Self {
            clips_dir: PathBuf::from("EXPORT/CLIPSIM/READY"),
            scheduled_dir: PathBuf::from("EXPORT/CLIPSIM/SCHEDULED"),
            schedule_log: PathBuf::from("EXPORT/CLIPSIM/00_schedule.json"),
            upload_times: [
                "6:00 AM", "8:00 AM", "10:00 AM", "12:00 PM", "2:00 PM", "4:00 PM", "6:00 PM",
                "8:00 PM",
            ]
            .iter()
            .map(|s| s.to_string())
            .collect(),
            clips_per_day: 8,
            description_replacements: vec![(
                "memezar".to_string(),
                "popcorn-clips-and-chill".to_string(),
            )],
            follow_banner: "🎬⭐Follow us for more Popcorn, Clips & Chill.".to_string(),
        }
    }
}

impl UploaderConfig {
    /// Load from a JSON file, or the defaults when no path is given.
    pub fn load(path: Option<&str>) -> Result<Self> {
        let config = match path {
            Some(path) => {
                let expanded_path = expand_tilde(path);
                let content = fs::read_to_string(&expanded_path)
                    .with_context(|| format!("Failed to read config from '{}'", expanded_path))?;
                serde_json::from_str(&content)
                    .with_context(|| format!("Failed to parse config '{}'", expanded_path))?
            }
            None => Self::default(),
        };
        config.validate()?;
        Ok(config)
    }

    pub fn validate(&self) -> Result<()> {
        if self.retry.max_retries == 0 || self.retry.max_retries > MAX_RETRIES_LIMIT {
            bail!(
                "retry.max_retries must be between 1 and {}, got {}",
                MAX_RETRIES_LIMIT,
                self.retry.max_retries
            );
        }
        if self.chunk_size == 0 || self.chunk_size % CHUNK_GRANULARITY != 0 {
            bail!(
                "chunk_size must be a positive multiple of {} bytes, got {}",
                CHUNK_GRANULARITY,
                self.chunk_size
            );
        }
        if self.schedule.upload_times.len() < self.schedule.clips_per_day {
            bail!(
                "schedule.upload_times has {} slots but clips_per_day is {}",
                self.schedule.upload_times.len(),
                self.schedule.clips_per_day
            );
        }
        Ok(())
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct OAuthConfig {
    pub client_id: String,
    pub client_secret: String,
    pub redirect_uri: String,
}

/// Google's downloadable client secrets wrap the fields under "installed" or "web".
#[derive(Debug, Deserialize)]
struct GoogleClientSecrets {
    #[serde(alias = "web")]
    installed: GoogleClient,
}

#[derive(Debug, Deserialize)]
struct GoogleClient {
    client_id: String,
    client_secret: String,
    #[serde(default)]
    redirect_uris: Vec<String>,
}

#[derive(Debug, Deserialize)]
#[serde(untagged)]
enum ClientSecretsFile {
    Flat(OAuthConfig),
    Google(GoogleClientSecrets),
}

impl OAuthConfig {
    pub fn from_json(content: &str) -> Result<Self> {
        let parsed: ClientSecretsFile =
            serde_json::from_str(content).context("Failed to parse OAuth config")?;
        match parsed {
            ClientSecretsFile::Flat(config) => Ok(config),
            ClientSecretsFile::Google(secrets) => {
                let client = secrets.installed;
                let redirect_uri = client
                    .redirect_uris
                    .into_iter()
                    .next()
                    .unwrap_or_else(|| "http://localhost".to_string());
                Ok(OAuthConfig {
                    client_id: client.client_id,
                    client_secret: client.client_secret,
                    redirect_uri,
                })
            }
        }
    }
}

pub fn load_oauth_config(config_path: &str) -> Result<OAuthConfig> {
    let expanded_path = expand_tilde(config_path);
    let content = fs::read_to_string(&expanded_path)
        .with_context(|| format!("Failed to read OAuth config from '{}'", expanded_path))?;
    OAuthConfig::from_json(&content)
}
