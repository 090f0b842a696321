use async_trait::async_trait;
use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};
use serde_json::Value;
use std::time::Duration;
use tracing::{info, warn};

#[cfg(test)]
use mockall::automock;

use crate::config::RetryPolicy;
use crate::error::{ChunkError, UploadError};

/// What the remote end said after one chunk went out.
#[derive(Debug, Clone, PartialEq)]
pub enum ChunkStatus {
    /// Chunk accepted; the server holds this many bytes so far.
    InProgress { bytes_uploaded: u64 },
    /// Upload finished; the server returned its resource body.
    Complete(Value),
}

/// A resumable request that can be pushed forward one chunk at a time.
///
/// A failed call must leave the request able to resend the same chunk.
#[async_trait]
#[cfg_attr(test, automock)]
pub trait ChunkedUpload {
    async fn next_chunk(&mut self) -> Result<ChunkStatus, ChunkError>;
}

/// Suspends the uploader between retries.
#[async_trait]
pub trait Sleeper: Send + Sync {
    async fn sleep(&self, duration: Duration);
}

pub struct TokioSleeper;

#[async_trait]
impl Sleeper for TokioSleeper {
    async fn sleep(&self, duration: Duration) {
        tokio::time::sleep(duration).await;
    }
}

pub type UploadOutcome = Result<String, UploadError>;

/// State of one upload, owned by the loop that drives it.
#[derive(Debug, Default)]
pub struct UploadSession {
    total_bytes_uploaded: u64,
    retry_count: u32,
    terminal: Option<UploadOutcome>,
}

impl UploadSession {
    pub fn total_bytes_uploaded(&self) -> u64 {
        self.total_bytes_uploaded
    }

    pub fn retry_count(&self) -> u32 {
        self.retry_count
    }

    pub fn outcome(&self) -> Option<&UploadOutcome> {
        self.terminal.as_ref()
    }

    pub fn into_outcome(self) -> UploadOutcome {
        self.terminal.unwrap_or_else(|| {
            Err(UploadError::Session(
                "upload ended without a terminal result".to_string(),
            ))
        })
    }

    fn record_progress(&mut self, bytes_uploaded: u64) {
        self.total_bytes_uploaded = self.total_bytes_uploaded.max(bytes_uploaded);
    }

    fn finish(&mut self, outcome: UploadOutcome) {
        debug_assert!(self.terminal.is_none(), "terminal result set twice");
        if self.terminal.is_none() {
            self.terminal = Some(outcome);
        }
    }
}

/// Drives a [`ChunkedUpload`] to completion with jittered exponential backoff.
pub struct ResumableUploader<R, S> {
    policy: RetryPolicy,
    rng: R,
    sleeper: S,
}

impl ResumableUploader<StdRng, TokioSleeper> {
    pub fn with_policy(policy: RetryPolicy) -> Self {
        Self::new(policy, StdRng::from_entropy(), TokioSleeper)
    }
}

impl<R: Rng + Send, S: Sleeper> ResumableUploader<R, S> {
    pub fn new(policy: RetryPolicy, rng: R, sleeper: S) -> Self {
        Self {
            policy,
            rng,
            sleeper,
        }
    }

    /// Upload and return only the remote id or the terminal failure.
    pub async fn upload<U>(&mut self, request: &mut U) -> UploadOutcome
    where
        U: ChunkedUpload + ?Sized,
    {
        self.run(request).await.into_outcome()
    }

    /// Upload and hand back the finished session, counters included.
    pub async fn run<U>(&mut self, request: &mut U) -> UploadSession
    where
        U: ChunkedUpload + ?Sized,
    {
        let mut session = UploadSession::default();

        while session.terminal.is_none() {
            info!("Uploading file...");
            let error = match request.next_chunk().await {
                Ok(ChunkStatus::InProgress { bytes_uploaded }) => {
                    session.record_progress(bytes_uploaded);
                    continue;
                }
                Ok(ChunkStatus::Complete(response)) => {
                    match response.get("id").and_then(Value::as_str) {
                        Some(id) => {
                            info!(video_id = id, "Video was successfully uploaded");
                            session.finish(Ok(id.to_string()));
                        }
                        None => {
                            session.finish(Err(UploadError::MalformedResponse(
                                response.to_string(),
                            )));
                        }
                    }
                    continue;
                }
                Err(ChunkError::Protocol(detail)) => {
                    session.finish(Err(UploadError::MalformedResponse(detail)));
                    continue;
                }
                Err(ChunkError::Http { status, body }) if !self.policy.is_retriable(status) => {
                    session.finish(Err(UploadError::NonRetriable { status, body }));
                    continue;
                }
                Err(ChunkError::Http { status, body }) => {
                    format!("A retriable HTTP error {} occurred: {}", status, body)
                }
                Err(err) => format!("A retriable error occurred: {}", err),
            };

            warn!(retry = session.retry_count + 1, "{}", error);
            session.retry_count += 1;
            if session.retry_count > self.policy.max_retries {
                session.finish(Err(UploadError::RetriesExhausted {
                    retries: self.policy.max_retries,
                    last_error: error,
                }));
                continue;
            }

            let delay = self.backoff(session.retry_count);
            info!(
                seconds = delay.as_secs_f64(),
                "Sleeping and then retrying..."
            );
            self.sleeper.sleep(delay).await;
        }

        session
    }

    /// Uniform jitter in `[0, 2^retry)` seconds, saturating at `Duration::MAX`.
    fn backoff(&mut self, retry: u32) -> Duration {
        let max_sleep = 2f64.powi(retry.min(i32::MAX as u32) as i32);
        Duration::try_from_secs_f64(self.rng.gen::<f64>() * max_sleep).unwrap_or(Duration::MAX)
    }
}
