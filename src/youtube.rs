use anyhow::{anyhow, Context, Result};
use async_trait::async_trait;
use chrono::{DateTime, Duration, Utc};
use oauth2::basic::BasicClient;
use oauth2::reqwest::async_http_client;
use oauth2::{
    AuthUrl, AuthorizationCode, ClientId, ClientSecret, CsrfToken, PkceCodeChallenge, RedirectUrl,
    Scope, TokenResponse, TokenUrl,
};
use rand::seq::SliceRandom;
use reqwest::header::{CONTENT_RANGE, CONTENT_TYPE, LOCATION, RANGE};
use reqwest::{Client, StatusCode};
use serde::{Deserialize, Serialize};
use serde_json::{json, Value};
use std::fs;
use std::io::SeekFrom;
use std::path::Path;
use tokio::io::{AsyncReadExt, AsyncSeekExt};
use tracing::{debug, info, warn};
use url::Url;

use crate::config::{MetadataDefaults, OAuthConfig, UploaderConfig};
use crate::error::{ChunkError, UploadError};
use crate::expand_tilde;
use crate::upload::{ChunkStatus, ChunkedUpload, ResumableUploader};

const UPLOAD_SCOPE: &str = "https://www.googleapis.com/auth/youtube.upload";
const UPLOAD_ENDPOINT: &str = "https://www.googleapis.com/upload/youtube/v3/videos";
const TOKEN_ENDPOINT: &str = "https://oauth2.googleapis.com/token";

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize, clap::ValueEnum)]
#[serde(rename_all = "lowercase")]
pub enum PrivacyStatus {
    Public,
    #[default]
    Private,
    Unlisted,
}

impl PrivacyStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            PrivacyStatus::Public => "public",
            PrivacyStatus::Private => "private",
            PrivacyStatus::Unlisted => "unlisted",
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct VideoMetadata {
    pub title: String,
    pub description: String,
    #[serde(default)]
    pub tags: Vec<String>,
    pub category_id: String,
    #[serde(default)]
    pub privacy_status: PrivacyStatus,
    #[serde(default)]
    pub scheduled_start_time: Option<String>,
}

impl VideoMetadata {
    /// Request body for `videos.insert` with `part=snippet,status`.
    pub fn to_resource(&self) -> Value {
        let mut status = json!({ "privacyStatus": self.privacy_status.as_str() });
        if let Some(publish_at) = &self.scheduled_start_time {
            status["publishAt"] = json!(publish_at);
        }
        json!({
            "snippet": {
                "title": self.title,
                "description": self.description,
                "tags": self.tags,
                "categoryId": self.category_id
            },
            "status": status
        })
    }

    /// Private with a publish time, which is how YouTube schedules a video.
    pub fn schedule_at(&mut self, publish_at: DateTime<Utc>) {
        self.scheduled_start_time = Some(publish_at.to_rfc3339());
        self.privacy_status = PrivacyStatus::Private;
    }
}

pub fn split_keywords(keywords: &str) -> Vec<String> {
    keywords
        .split(',')
        .map(|k| k.trim())
        .filter(|k| !k.is_empty())
        .map(|k| k.to_string())
        .collect()
}

#[derive(Debug, Serialize, Deserialize)]
struct StoredTokens {
    access_token: String,
    refresh_token: Option<String>,
    expires_at: Option<DateTime<Utc>>,
}

pub struct YouTubeUploader {
    client: Client,
    access_token: String,
    oauth_client: BasicClient,
    client_id: String,
    client_secret: String,
    token_path: String,
    upload_endpoint: Url,
}

impl YouTubeUploader {
    pub fn new(oauth_config: &OAuthConfig, token_path: &str) -> Result<Self> {
        let oauth_client = BasicClient::new(
            ClientId::new(oauth_config.client_id.clone()),
            Some(ClientSecret::new(oauth_config.client_secret.clone())),
            AuthUrl::new("https://accounts.google.com/o/oauth2/v2/auth".to_string())?,
            Some(TokenUrl::new(TOKEN_ENDPOINT.to_string())?),
        )
        .set_redirect_uri(RedirectUrl::new(oauth_config.redirect_uri.clone())?);

        // Resumable sessions answer 308 without a Location; never follow it.
        let client = Client::builder()
            .redirect(reqwest::redirect::Policy::none())
            .build()?;

        Ok(Self {
            client,
            access_token: String::new(),
            oauth_client,
            client_id: oauth_config.client_id.clone(),
            client_secret: oauth_config.client_secret.clone(),
            token_path: expand_tilde(token_path),
            upload_endpoint: Url::parse(UPLOAD_ENDPOINT)?,
        })
    }

    pub async fn authenticate(&mut self) -> Result<()> {
        if let Ok(tokens) = self.load_tokens() {
            if let Some(expires_at) = tokens.expires_at {
                if expires_at > Utc::now() + Duration::minutes(5) {
                    self.access_token = tokens.access_token;
                    info!("Using existing valid token");
                    return Ok(());
                }
            }

            if let Some(refresh_token) = tokens.refresh_token {
                match self.refresh_token(&refresh_token).await {
                    Ok(new_tokens) => {
                        self.access_token = new_tokens.access_token.clone();
                        self.store_tokens(&new_tokens)?;
                        info!("Refreshed access token");
                        return Ok(());
                    }
                    Err(e) => warn!("Token refresh failed, starting a new OAuth flow: {}", e),
                }
            }
        }

        self.perform_oauth_flow().await
    }

    async fn perform_oauth_flow(&mut self) -> Result<()> {
        let (pkce_challenge, pkce_verifier) = PkceCodeChallenge::new_random_sha256();

        let (auth_url, _csrf_token) = self
            .oauth_client
            .authorize_url(CsrfToken::new_random)
            .add_scope(Scope::new(UPLOAD_SCOPE.to_string()))
            .set_pkce_challenge(pkce_challenge)
            .url();

        println!("Open this URL in your browser to authenticate:");
        println!("{}", auth_url);
        println!("\nAfter authorization, you'll be redirected to your redirect URI.");
        println!("Copy the 'code' parameter from the redirect URL and paste it here:");

        let mut auth_code = String::new();
        std::io::stdin().read_line(&mut auth_code)?;
        let auth_code = auth_code.trim();

        let token_result = self
            .oauth_client
            .exchange_code(AuthorizationCode::new(auth_code.to_string()))
            .set_pkce_verifier(pkce_verifier)
            .request_async(async_http_client)
            .await
            .context("Failed to exchange authorization code")?;

        let expires_at = token_result
            .expires_in()
            .map(|duration| Utc::now() + Duration::seconds(duration.as_secs() as i64));

        let tokens = StoredTokens {
            access_token: token_result.access_token().secret().clone(),
            refresh_token: token_result.refresh_token().map(|t| t.secret().clone()),
            expires_at,
        };

        self.access_token = tokens.access_token.clone();
        self.store_tokens(&tokens)?;

        info!("Authentication successful");
        Ok(())
    }

    async fn refresh_token(&self, refresh_token: &str) -> Result<StoredTokens> {
        let params = [
            ("grant_type", "refresh_token"),
            ("refresh_token", refresh_token),
            ("client_id", &self.client_id),
            ("client_secret", &self.client_secret),
        ];

        let response = self
            .client
            .post(TOKEN_ENDPOINT)
            .form(&params)
            .send()
            .await?
            .error_for_status()?;

        let token_data: Value = response.json().await?;

        let access_token = token_data["access_token"]
            .as_str()
            .ok_or_else(|| anyhow!("No access token in response"))?
            .to_string();

        let expires_in = token_data["expires_in"].as_u64().unwrap_or(3600);
        let expires_at = Some(Utc::now() + Duration::seconds(expires_in as i64));

        Ok(StoredTokens {
            access_token,
            refresh_token: Some(refresh_token.to_string()),
            expires_at,
        })
    }

    fn store_tokens(&self, tokens: &StoredTokens) -> Result<()> {
        let tokens_json = serde_json::to_string_pretty(tokens)?;
        fs::write(&self.token_path, tokens_json)
            .with_context(|| format!("Failed to store tokens at '{}'", self.token_path))?;
        Ok(())
    }

    fn load_tokens(&self) -> Result<StoredTokens> {
        let tokens_json = fs::read_to_string(&self.token_path)?;
        let tokens: StoredTokens = serde_json::from_str(&tokens_json)?;
        Ok(tokens)
    }

    /// Point uploads somewhere other than the YouTube upload endpoint.
    pub fn with_upload_endpoint(mut self, endpoint: Url) -> Self {
        self.upload_endpoint = endpoint;
        self
    }

    /// Prepare a resumable upload of `video_path`.
    ///
    /// Only the local file is touched here; the remote session is opened by
    /// the first `next_chunk` so that its failures are retried like any other.
    pub async fn begin_upload(
        &self,
        video_path: &Path,
        metadata: &VideoMetadata,
        chunk_size: usize,
    ) -> Result<ResumableRequest, UploadError> {
        let file = tokio::fs::File::open(video_path).await.map_err(|e| {
            UploadError::Session(format!("cannot open {}: {}", video_path.display(), e))
        })?;
        let total_size = file
            .metadata()
            .await
            .map_err(|e| {
                UploadError::Session(format!("cannot stat {}: {}", video_path.display(), e))
            })?
            .len();

        Ok(ResumableRequest {
            client: self.client.clone(),
            access_token: self.access_token.clone(),
            upload_endpoint: self.upload_endpoint.clone(),
            resource: metadata.to_resource(),
            session_uri: None,
            file,
            total_size,
            offset: 0,
            chunk_size: chunk_size.max(1),
        })
    }

    pub async fn upload_video(
        &self,
        video_path: &Path,
        metadata: &VideoMetadata,
        config: &UploaderConfig,
    ) -> Result<String, UploadError> {
        let mut request = self
            .begin_upload(video_path, metadata, config.chunk_size)
            .await?;
        ResumableUploader::with_policy(config.retry.clone())
            .upload(&mut request)
            .await
    }
}

/// One resumable upload, sending the file from `offset` onwards.
pub struct ResumableRequest {
    client: Client,
    access_token: String,
    upload_endpoint: Url,
    resource: Value,
    session_uri: Option<Url>,
    file: tokio::fs::File,
    total_size: u64,
    offset: u64,
    chunk_size: usize,
}

impl ResumableRequest {
    pub fn session_uri(&self) -> Option<&Url> {
        self.session_uri.as_ref()
    }

    async fn open_session(&self) -> Result<Url, ChunkError> {
        let response = self
            .client
            .post(self.upload_endpoint.clone())
            .query(&[("uploadType", "resumable"), ("part", "snippet,status")])
            .bearer_auth(&self.access_token)
            .header("X-Upload-Content-Length", self.total_size)
            .header("X-Upload-Content-Type", "video/*")
            .json(&self.resource)
            .send()
            .await?;

        let status = response.status();
        if !status.is_success() {
            let body = response.text().await.unwrap_or_default();
            return Err(ChunkError::Http {
                status: status.as_u16(),
                body,
            });
        }

        let location = response
            .headers()
            .get(LOCATION)
            .and_then(|v| v.to_str().ok())
            .ok_or_else(|| ChunkError::Protocol("no Location header in response".to_string()))?;
        let session_uri = Url::parse(location)
            .map_err(|e| ChunkError::Protocol(format!("bad Location '{}': {}", location, e)))?;
        debug!(%session_uri, total_size = self.total_size, "Opened resumable upload session");
        Ok(session_uri)
    }

    async fn read_chunk(&mut self) -> std::io::Result<Vec<u8>> {
        self.file.seek(SeekFrom::Start(self.offset)).await?;
        let remaining = self.total_size.saturating_sub(self.offset);
        let len = remaining.min(self.chunk_size as u64) as usize;
        let mut buf = vec![0u8; len];
        self.file.read_exact(&mut buf).await?;
        Ok(buf)
    }
}

#[async_trait]
impl ChunkedUpload for ResumableRequest {
    async fn next_chunk(&mut self) -> Result<ChunkStatus, ChunkError> {
        let session_uri = match self.session_uri.clone() {
            Some(uri) => uri,
            None => {
                let uri = self.open_session().await?;
                self.session_uri = Some(uri.clone());
                uri
            }
        };

        let chunk = self.read_chunk().await?;
        let content_range = if chunk.is_empty() {
            format!("bytes */{}", self.total_size)
        } else {
            format!(
                "bytes {}-{}/{}",
                self.offset,
                self.offset + chunk.len() as u64 - 1,
                self.total_size
            )
        };

        let response = self
            .client
            .put(session_uri)
            .bearer_auth(&self.access_token)
            .header(CONTENT_TYPE, "video/*")
            .header(CONTENT_RANGE, content_range)
            .body(chunk)
            .send()
            .await?;

        let status = response.status();
        if status == StatusCode::PERMANENT_REDIRECT {
            self.offset = response
                .headers()
                .get(RANGE)
                .and_then(|v| v.to_str().ok())
                .and_then(next_offset_from_range)
                .unwrap_or(0);
            debug!(offset = self.offset, total = self.total_size, "Chunk accepted");
            return Ok(ChunkStatus::InProgress {
                bytes_uploaded: self.offset,
            });
        }

        let body = response.text().await?;
        if status.is_success() {
            // A finished upload is never resent; an unreadable body is the
            // server's fault and surfaces as a response without an id.
            let parsed = serde_json::from_str(&body).unwrap_or(Value::String(body));
            return Ok(ChunkStatus::Complete(parsed));
        }

        Err(ChunkError::Http {
            status: status.as_u16(),
            body,
        })
    }
}

/// `bytes=0-N` means the server holds everything up to `N`, so resume at `N + 1`.
pub fn next_offset_from_range(range: &str) -> Option<u64> {
    let (_, end) = range.trim().strip_prefix("bytes=")?.split_once('-')?;
    end.trim().parse::<u64>().ok().map(|end| end + 1)
}

pub fn create_default_metadata(
    video_files: &[String],
    defaults: &MetadataDefaults,
    description_file: Option<&str>,
) -> Vec<VideoMetadata> {
    video_files
        .iter()
        .map(|file_path| {
            let filename = Path::new(file_path)
                .file_stem()
                .unwrap_or_default()
                .to_string_lossy()
                .to_string();

            let description = description_file
                .and_then(|path| get_random_line(path).ok())
                .unwrap_or_else(|| defaults.description.clone());

            VideoMetadata {
                title: filename,
                description,
                tags: split_keywords(&defaults.keywords),
                category_id: defaults.category.clone(),
                privacy_status: defaults.privacy_status,
                scheduled_start_time: None,
            }
        })
        .collect()
}

fn get_random_line(path: &str) -> Result<String> {
    let content = fs::read_to_string(expand_tilde(path))?;
    let lines: Vec<&str> = content.lines().filter(|l| !l.trim().is_empty()).collect();
    lines
        .choose(&mut rand::thread_rng())
        .map(|line| line.to_string())
        .ok_or_else(|| anyhow!("No lines found in '{}'", path))
}

pub fn load_video_metadata(metadata_path: &str) -> Result<Vec<VideoMetadata>> {
    let content = fs::read_to_string(expand_tilde(metadata_path))
        .with_context(|| format!("Failed to read metadata from '{}'", metadata_path))?;
    let metadata: Vec<VideoMetadata> =
        serde_json::from_str(&content).context("Failed to parse video metadata")?;
    Ok(metadata)
}
