//! Daily clip schedule.
//!
//! Ready clips live in one folder as `name.mp4` plus `name.txt` (title on the
//! first line, description below). Planning a day moves a random selection
//! into a dated folder and records titles, descriptions and publish slots in
//! a JSON log.

use chrono::{Duration, Local, NaiveDate, NaiveDateTime, NaiveTime, TimeZone, Utc};
use rand::seq::SliceRandom;
use rand::Rng;
use serde::{Deserialize, Serialize};
use std::fs;
use std::path::{Path, PathBuf};
use thiserror::Error;
use tracing::{debug, info, warn};

use crate::config::{ScheduleConfig, UploaderConfig};
use crate::youtube::{split_keywords, VideoMetadata};

pub const DATE_FORMAT: &str = "%Y%m%d";
pub const TIME_FORMAT: &str = "%I:%M %p";

#[derive(Error, Debug)]
pub enum ScheduleError {
    #[error("IO error on '{path}': {source}")]
    Io {
        path: PathBuf,
        source: std::io::Error,
    },

    #[error("Invalid schedule log: {0}")]
    Json(#[from] serde_json::Error),

    #[error("Schedule log has no scheduled days")]
    EmptyLog,

    #[error("Invalid date '{0}', expected YYYYMMDD")]
    InvalidDate(String),

    #[error("Invalid upload time '{0}', expected e.g. '6:00 AM'")]
    InvalidTime(String),

    #[error("No scheduled day '{0}' in the log")]
    UnknownDay(String),

    #[error(
        "There are only {available}/{required} clips available. Please add {} clips in order to schedule a new day.",
        .required - .available
    )]
    NotEnoughClips { available: usize, required: usize },

    #[error("More clips than upload times ({clips} clips, {slots} slots)")]
    NotEnoughSlots { clips: usize, slots: usize },
}

pub type Result<T> = std::result::Result<T, ScheduleError>;

fn io_err(path: &Path) -> impl FnOnce(std::io::Error) -> ScheduleError + '_ {
    move |source| ScheduleError::Io {
        path: path.to_path_buf(),
        source,
    }
}

#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq)]
pub struct ScheduleLog {
    pub scheduled_days: Vec<ScheduledDay>,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct ScheduledDay {
    pub date: String,
    pub clips: Vec<ClipInfo>,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct ClipInfo {
    pub time: String,
    pub title: String,
    pub description: String,
    /// Video file name inside the day's folder; older logs don't have it.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub file: Option<String>,
}

impl ScheduleLog {
    pub fn load(path: &Path) -> Result<Self> {
        let content = fs::read_to_string(path).map_err(io_err(path))?;
        Ok(serde_json::from_str(&content)?)
    }

    pub fn save(&self, path: &Path) -> Result<()> {
        let content = serde_json::to_string_pretty(self)?;
        fs::write(path, content).map_err(io_err(path))
    }

    /// The day after the last scheduled one.
    pub fn next_day(&self) -> Result<NaiveDate> {
        let last = self.scheduled_days.last().ok_or(ScheduleError::EmptyLog)?;
        Ok(parse_date(&last.date)? + Duration::days(1))
    }

    /// A day by date, or the most recent one.
    pub fn day(&self, date: Option<&str>) -> Result<&ScheduledDay> {
        match date {
            Some(date) => self
                .scheduled_days
                .iter()
                .find(|d| d.date == date)
                .ok_or_else(|| ScheduleError::UnknownDay(date.to_string())),
            None => self.scheduled_days.last().ok_or(ScheduleError::EmptyLog),
        }
    }
}

pub fn parse_date(date: &str) -> Result<NaiveDate> {
    NaiveDate::parse_from_str(date, DATE_FORMAT)
        .map_err(|_| ScheduleError::InvalidDate(date.to_string()))
}

pub fn parse_upload_time(time: &str) -> Result<NaiveTime> {
    NaiveTime::parse_from_str(time.trim(), TIME_FORMAT)
        .map_err(|_| ScheduleError::InvalidTime(time.to_string()))
}

impl ScheduledDay {
    /// Folder holding this day's clips.
    pub fn folder(&self, config: &ScheduleConfig) -> PathBuf {
        config.scheduled_dir.join(&self.date)
    }

    /// Naive publish time of every clip, in log order.
    pub fn publish_times(&self) -> Result<Vec<NaiveDateTime>> {
        let date = parse_date(&self.date)?;
        self.clips
            .iter()
            .map(|clip| Ok(date.and_time(parse_upload_time(&clip.time)?)))
            .collect()
    }
}

/// Interpret a slot in the machine's local time zone.
pub fn local_to_utc(time: NaiveDateTime) -> Result<chrono::DateTime<Utc>> {
    Local
        .from_local_datetime(&time)
        .earliest()
        .map(|t| t.with_timezone(&Utc))
        .ok_or_else(|| ScheduleError::InvalidTime(time.to_string()))
}

fn list_with_extension(dir: &Path, extension: &str) -> Result<Vec<PathBuf>> {
    let mut files = Vec::new();
    for entry in fs::read_dir(dir).map_err(io_err(dir))? {
        let path = entry.map_err(io_err(dir))?.path();
        if path.is_file() && path.extension().is_some_and(|ext| ext == extension) {
            files.push(path);
        }
    }
    files.sort();
    Ok(files)
}

/// Pick `count` distinct clips at random.
pub fn pick_clips<R: Rng + ?Sized>(
    clips_dir: &Path,
    count: usize,
    rng: &mut R,
) -> Result<Vec<PathBuf>> {
    let available = list_with_extension(clips_dir, "mp4")?;
    if available.len() < count {
        return Err(ScheduleError::NotEnoughClips {
            available: available.len(),
            required: count,
        });
    }
    Ok(available.choose_multiple(rng, count).cloned().collect())
}

/// Move each clip and its `.txt` companion into `folder`.
pub fn move_clips(clips: &[PathBuf], folder: &Path) -> Result<()> {
    fs::create_dir_all(folder).map_err(io_err(folder))?;
    for clip in clips {
        let txt = clip.with_extension("txt");
        for source in [clip, &txt] {
            if !source.exists() {
                continue;
            }
            let Some(name) = source.file_name() else {
                continue;
            };
            let target = folder.join(name);
            fs::rename(source, &target).map_err(io_err(source))?;
            debug!(from = %source.display(), to = %target.display(), "Moved");
        }
    }
    Ok(())
}

/// Apply replacements and make sure the description asks viewers to follow.
pub fn rewrite_description(description: &str, config: &ScheduleConfig) -> String {
    let mut description = description.to_string();
    for (from, to) in &config.description_replacements {
        description = description.replace(from.as_str(), to);
    }
    if !description.to_lowercase().contains("follow") {
        description = format!("{}\n\n{}", config.follow_banner, description);
    }
    description
}

/// Read title/description pairs from the `.txt` files in `folder`.
pub fn read_clip_info(folder: &Path, config: &ScheduleConfig) -> Result<Vec<ClipInfo>> {
    let texts = list_with_extension(folder, "txt")?;
    if texts.len() > config.upload_times.len() {
        return Err(ScheduleError::NotEnoughSlots {
            clips: texts.len(),
            slots: config.upload_times.len(),
        });
    }

    texts
        .iter()
        .zip(&config.upload_times)
        .map(|(txt, time)| {
            let content = fs::read_to_string(txt).map_err(io_err(txt))?;
            let (title, description) = content.split_once('\n').unwrap_or((content.as_str(), ""));
            let video = txt.with_extension("mp4");
            Ok(ClipInfo {
                time: time.clone(),
                title: title.trim().to_string(),
                description: rewrite_description(description.trim(), config),
                file: video
                    .exists()
                    .then(|| video.file_name().map(|n| n.to_string_lossy().to_string()))
                    .flatten(),
            })
        })
        .collect()
}

/// Plan the day after the last logged one and append it to the log.
pub fn plan_next_day<R: Rng + ?Sized>(config: &ScheduleConfig, rng: &mut R) -> Result<ScheduledDay> {
    let mut log = ScheduleLog::load(&config.schedule_log)?;
    let date = log.next_day()?.format(DATE_FORMAT).to_string();
    let folder = config.scheduled_dir.join(&date);

    // Stray clips already in the folder take slots too; check before moving anything.
    let existing = if folder.is_dir() {
        list_with_extension(&folder, "txt")?.len()
    } else {
        0
    };
    if existing + config.clips_per_day > config.upload_times.len() {
        return Err(ScheduleError::NotEnoughSlots {
            clips: existing + config.clips_per_day,
            slots: config.upload_times.len(),
        });
    }

    let clips = pick_clips(&config.clips_dir, config.clips_per_day, rng)?;
    move_clips(&clips, &folder)?;

    let day = ScheduledDay {
        date,
        clips: read_clip_info(&folder, config)?,
    };
    log.scheduled_days.push(day.clone());
    log.save(&config.schedule_log)?;

    info!(date = %day.date, clips = day.clips.len(), "Scheduled new day");
    Ok(day)
}

/// Video path and scheduled metadata for every clip of `day` that has a file.
pub fn day_uploads(
    day: &ScheduledDay,
    config: &UploaderConfig,
) -> Result<Vec<(PathBuf, VideoMetadata)>> {
    let folder = day.folder(&config.schedule);
    let defaults = &config.defaults;

    let mut uploads = Vec::new();
    for (clip, slot) in day.clips.iter().zip(day.publish_times()?) {
        let Some(file) = &clip.file else {
            warn!(title = %clip.title, "No video file recorded for clip, skipping");
            continue;
        };
        let mut metadata = VideoMetadata {
            title: clip.title.clone(),
            description: clip.description.clone(),
            tags: split_keywords(&defaults.keywords),
            category_id: defaults.category.clone(),
            privacy_status: defaults.privacy_status,
            scheduled_start_time: None,
        };
        metadata.schedule_at(local_to_utc(slot)?);
        uploads.push((folder.join(file), metadata));
    }
    Ok(uploads)
}
