use anyhow::{anyhow, Context, Result};
use chrono::{DateTime, Duration, Utc};
use clap::{Parser, Subcommand};
use std::fs;
use std::path::PathBuf;

pub mod config;
pub mod error;
pub mod sanitize;
pub mod schedule;
pub mod upload;
pub mod youtube;

#[cfg(test)]
mod test;

use youtube::PrivacyStatus;

#[derive(Parser, Debug)]
#[command(author = "LinlyBoi",
          version,
          about = "Organize clips, plan upload days and upload videos to YouTube",
          long_about = None)]
pub struct Cli {
    #[arg(
        long,
        value_name = "CONFIG_FILE",
        help = "Uploader configuration (JSON); defaults are used when omitted",
        global = true
    )]
    pub config: Option<String>,

    #[arg(
        short = 'c',
        long = "oauth-config",
        value_name = "CLIENT_SECRETS",
        help = "OAuth client secrets file (JSON)",
        default_value = "~/.client_secrets.json",
        global = true
    )]
    pub oauth_config: String,

    #[arg(
        short = 'v',
        long,
        help = "Enable debug logging",
        action = clap::ArgAction::SetTrue,
        global = true
    )]
    pub verbose: bool,

    #[command(subcommand)]
    pub command: Commands,
}

#[derive(Subcommand, Debug)]
pub enum Commands {
    /// Upload a single video
    Upload {
        #[arg(long, value_name = "VIDEO_FILE", help = "Video file to upload")]
        file: PathBuf,

        #[arg(long, help = "Video title")]
        title: Option<String>,

        #[arg(long, help = "Video description")]
        description: Option<String>,

        #[arg(long, help = "Numeric video category")]
        category: Option<String>,

        #[arg(long, help = "Video keywords, comma separated")]
        keywords: Option<String>,

        #[arg(long = "privacy-status", value_enum, help = "Video privacy status")]
        privacy_status: Option<PrivacyStatus>,

        #[arg(
            long = "publish-at",
            value_name = "TIME",
            help = "Publish time (ISO 8601); forces private until then"
        )]
        publish_at: Option<String>,
    },

    /// Upload several videos spaced out by a fixed interval
    Batch {
        #[arg(
            long,
            value_name = "VIDEO_FILES",
            help = "Comma-separated list of video file paths",
            required = true
        )]
        videos: String,

        #[arg(
            short = 'i',
            long,
            value_name = "DURATION",
            help = "Time interval between uploads (e.g., 2h, 30m, 1d)",
            required = true
        )]
        interval: String,

        #[arg(
            short = 'm',
            long = "metadata",
            value_name = "METADATA_FILE",
            help = "JSON file containing video metadata"
        )]
        metadata: Option<String>,

        #[arg(
            long = "description-file",
            value_name = "FILE",
            help = "Pick each default description at random from the lines of this file"
        )]
        description_file: Option<String>,

        #[arg(
            short = 's',
            long = "start-time",
            value_name = "START_TIME",
            help = "Start time for first upload (ISO 8601 format)"
        )]
        start_time: Option<String>,

        #[arg(
            long = "timestamp-file",
            value_name = "FILE",
            help = "File containing unix timestamp for start time"
        )]
        timestamp_file: Option<String>,

        #[arg(
            long = "dry-run",
            help = "Show schedule without uploading",
            action = clap::ArgAction::SetTrue
        )]
        dry_run: bool,

        #[arg(
            short = 'y',
            long,
            help = "Skip the confirmation prompt",
            action = clap::ArgAction::SetTrue
        )]
        yes: bool,
    },

    /// Move the next day's clips into place and log them
    PlanDay,

    /// Upload every clip of a planned day at its slot time
    PublishDay {
        #[arg(long, value_name = "YYYYMMDD", help = "Day to publish (default: latest)")]
        date: Option<String>,
    },

    /// Clean up file names and extensions under a directory
    Sanitize {
        #[arg(value_name = "DIR")]
        dir: PathBuf,
    },
}

pub fn parse_duration(duration_str: &str) -> Result<Duration> {
    let duration_str = duration_str.trim().to_lowercase();
    let number = |s: &str| -> Result<i64> {
        s.parse()
            .with_context(|| format!("Invalid duration '{}'", duration_str))
    };

    if let Some(hours) = duration_str.strip_suffix('h') {
        Ok(Duration::hours(number(hours)?))
    } else if let Some(minutes) = duration_str.strip_suffix('m') {
        Ok(Duration::minutes(number(minutes)?))
    } else if let Some(days) = duration_str.strip_suffix('d') {
        Ok(Duration::days(number(days)?))
    } else {
        // Default to hours if no unit specified
        Ok(Duration::hours(number(&duration_str)?))
    }
}

pub fn generate_schedule(
    video_count: usize,
    interval: Duration,
    start_time: Option<DateTime<Utc>>,
    timestamp_file: Option<&str>,
) -> Result<Vec<DateTime<Utc>>> {
    let start = if let Some(file_path) = timestamp_file {
        let expanded_path = expand_tilde(file_path);
        let timestamp_str = fs::read_to_string(&expanded_path)
            .with_context(|| format!("Failed to read timestamp from '{}'", expanded_path))?;

        let timestamp: i64 = timestamp_str
            .trim()
            .parse()
            .with_context(|| format!("Invalid timestamp in file '{}'", expanded_path))?;

        DateTime::from_timestamp(timestamp, 0)
            .ok_or_else(|| anyhow!("Invalid unix timestamp: {}", timestamp))?
    } else if let Some(start_time) = start_time {
        start_time
    } else {
        Utc::now() + Duration::hours(1)
    };

    Ok((0..video_count)
        .map(|i| start + interval * i as i32)
        .collect())
}

pub fn expand_tilde(path: &str) -> String {
    if path.starts_with("~/") {
        if let Ok(home) = std::env::var("HOME") {
            path.replacen("~", &home, 1)
        } else {
            path.to_string()
        }
    } else {
        path.to_string()
    }
}
