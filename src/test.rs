use super::*;
use crate::config::{OAuthConfig, RetryPolicy, ScheduleConfig, UploaderConfig};
use crate::error::{ChunkError, UploadError};
use crate::sanitize::{infer_extension, sanitize_files, sanitize_filename, sanitized_name};
use crate::schedule::{
    day_uploads, local_to_utc, parse_upload_time, pick_clips, plan_next_day, rewrite_description,
    ClipInfo, ScheduleError, ScheduleLog, ScheduledDay,
};
use crate::upload::{ChunkStatus, MockChunkedUpload, ResumableUploader, Sleeper};
use crate::youtube::{next_offset_from_range, split_keywords, PrivacyStatus, VideoMetadata};
use async_trait::async_trait;
use chrono::{Local, NaiveDate, TimeZone};
use rand::rngs::StdRng;
use rand::SeedableRng;
use serde_json::json;
use std::sync::{Arc, Mutex};
use std::time::Duration as StdDuration;
use tempfile::TempDir;

#[test]
fn test_parse_duration() {
    assert_eq!(parse_duration("2h").unwrap(), Duration::hours(2));
    assert_eq!(parse_duration("30m").unwrap(), Duration::minutes(30));
    assert_eq!(parse_duration("1d").unwrap(), Duration::days(1));
    assert_eq!(parse_duration("3").unwrap(), Duration::hours(3));
    assert!(parse_duration("soon").is_err());
}

#[test]
fn test_generate_schedule() {
    let interval = Duration::hours(2);
    let start_time = DateTime::parse_from_rfc3339("2024-01-01T12:00:00Z")
        .unwrap()
        .with_timezone(&Utc);

    let schedule = generate_schedule(3, interval, Some(start_time), None).unwrap();

    assert_eq!(schedule.len(), 3);
    assert_eq!(schedule[0], start_time);
    assert_eq!(schedule[1], start_time + Duration::hours(2));
    assert_eq!(schedule[2], start_time + Duration::hours(4));
}

#[test]
fn test_generate_schedule_from_timestamp_file() {
    let dir = TempDir::new().unwrap();
    let path = dir.path().join("start");
    std::fs::write(&path, "1704110400\n").unwrap();

    let schedule =
        generate_schedule(2, Duration::minutes(30), None, Some(path.to_str().unwrap())).unwrap();

    let expected = DateTime::parse_from_rfc3339("2024-01-01T12:00:00Z")
        .unwrap()
        .with_timezone(&Utc);
    assert_eq!(schedule, vec![expected, expected + Duration::minutes(30)]);
}

// Uploader

#[derive(Clone, Default)]
struct RecordingSleeper {
    sleeps: Arc<Mutex<Vec<StdDuration>>>,
}

impl RecordingSleeper {
    fn recorded(&self) -> Vec<StdDuration> {
        self.sleeps.lock().unwrap().clone()
    }
}

#[async_trait]
impl Sleeper for RecordingSleeper {
    async fn sleep(&self, duration: StdDuration) {
        self.sleeps.lock().unwrap().push(duration);
    }
}

fn uploader(max_retries: u32) -> (ResumableUploader<StdRng, RecordingSleeper>, RecordingSleeper) {
    let sleeper = RecordingSleeper::default();
    let uploader = ResumableUploader::new(
        RetryPolicy::new(max_retries, [500, 502, 503, 504]),
        StdRng::seed_from_u64(7),
        sleeper.clone(),
    );
    (uploader, sleeper)
}

#[tokio::test]
async fn test_retriable_errors_then_success() {
    let (mut uploader, sleeper) = uploader(10);
    let mut mock = MockChunkedUpload::new();
    let mut calls = 0;
    mock.expect_next_chunk().times(3).returning(move || {
        calls += 1;
        let result = if calls <= 2 {
            Err(ChunkError::Http {
                status: 503,
                body: "backend unavailable".to_string(),
            })
        } else {
            Ok(ChunkStatus::Complete(json!({ "id": "abc" })))
        };
        Box::pin(async move { result })
    });

    let session = uploader.run(&mut mock).await;

    assert_eq!(session.retry_count(), 2);
    let sleeps = sleeper.recorded();
    assert_eq!(sleeps.len(), 2);
    assert!(sleeps[0] < StdDuration::from_secs(2));
    assert!(sleeps[1] < StdDuration::from_secs(4));
    assert_eq!(session.into_outcome().unwrap(), "abc");
}

#[tokio::test]
async fn test_non_retriable_status_fails_immediately() {
    let (mut uploader, sleeper) = uploader(10);
    let mut mock = MockChunkedUpload::new();
    mock.expect_next_chunk().times(1).returning(|| {
        Box::pin(async {
            Err(ChunkError::Http {
                status: 404,
                body: "not found".to_string(),
            })
        })
    });

    let result = uploader.upload(&mut mock).await;

    match result {
        Err(UploadError::NonRetriable { status, .. }) => assert_eq!(status, 404),
        other => panic!("expected non-retriable failure, got {:?}", other),
    }
    assert!(sleeper.recorded().is_empty());
}

#[tokio::test]
async fn test_missing_id_is_malformed_not_exhausted() {
    let (mut uploader, sleeper) = uploader(10);
    let mut mock = MockChunkedUpload::new();
    mock.expect_next_chunk().times(1).returning(|| {
        Box::pin(async { Ok(ChunkStatus::Complete(json!({ "kind": "youtube#video" }))) })
    });

    let err = uploader.upload(&mut mock).await.unwrap_err();

    assert!(matches!(err, UploadError::MalformedResponse(_)));
    assert!(!err.is_exhausted());
    assert!(sleeper.recorded().is_empty());
}

#[tokio::test]
async fn test_transport_errors_exhaust_retries() {
    let (mut uploader, sleeper) = uploader(3);
    let mut mock = MockChunkedUpload::new();
    mock.expect_next_chunk()
        .times(4)
        .returning(|| Box::pin(async { Err(ChunkError::Transport("connection reset".to_string())) }));

    let session = uploader.run(&mut mock).await;

    assert_eq!(session.retry_count(), 4);
    assert_eq!(sleeper.recorded().len(), 3);
    let err = session.into_outcome().unwrap_err();
    assert!(err.is_exhausted());
    assert!(err.to_string().contains("No longer attempting to retry"));
}

#[tokio::test]
async fn test_protocol_violation_is_malformed_without_retry() {
    let (mut uploader, sleeper) = uploader(10);
    let mut mock = MockChunkedUpload::new();
    mock.expect_next_chunk().times(1).returning(|| {
        Box::pin(async { Err(ChunkError::Protocol("no Location header in response".to_string())) })
    });

    let session = uploader.run(&mut mock).await;

    assert_eq!(session.retry_count(), 0);
    assert!(sleeper.recorded().is_empty());
    assert!(matches!(
        session.into_outcome(),
        Err(UploadError::MalformedResponse(detail)) if detail.contains("Location")
    ));
}

#[tokio::test]
async fn test_large_retry_ceiling_saturates_backoff() {
    let (mut uploader, sleeper) = uploader(100);
    let mut mock = MockChunkedUpload::new();
    mock.expect_next_chunk()
        .times(101)
        .returning(|| Box::pin(async { Err(ChunkError::Transport("timed out".to_string())) }));

    let session = uploader.run(&mut mock).await;

    let sleeps = sleeper.recorded();
    assert_eq!(sleeps.len(), 100);
    assert_eq!(sleeps[99], StdDuration::MAX);
    assert!(session.into_outcome().unwrap_err().is_exhausted());
}

#[tokio::test]
async fn test_progress_tracks_bytes_without_sleeping() {
    let (mut uploader, sleeper) = uploader(10);
    let mut mock = MockChunkedUpload::new();
    let mut sent = 0u64;
    mock.expect_next_chunk().times(5).returning(move || {
        sent += 1024;
        let result = if sent < 5 * 1024 {
            Ok(ChunkStatus::InProgress {
                bytes_uploaded: sent,
            })
        } else {
            Ok(ChunkStatus::Complete(json!({ "id": "done" })))
        };
        Box::pin(async move { result })
    });

    let session = uploader.run(&mut mock).await;

    assert_eq!(session.total_bytes_uploaded(), 4 * 1024);
    assert_eq!(session.retry_count(), 0);
    assert!(sleeper.recorded().is_empty());
    assert!(matches!(session.outcome(), Some(Ok(id)) if id == "done"));
}

// Config

#[test]
fn test_config_defaults_and_validation() {
    let config = UploaderConfig::default();
    assert_eq!(config.retry.max_retries, 10);
    assert!(config.retry.is_retriable(503));
    assert!(!config.retry.is_retriable(404));
    assert_eq!(config.defaults.category, "24");
    assert_eq!(config.defaults.privacy_status, PrivacyStatus::Private);
    assert!(config.validate().is_ok());

    let mut bad = UploaderConfig::default();
    bad.chunk_size = 1000;
    assert!(bad.validate().is_err());

    let mut bad = UploaderConfig::default();
    bad.retry.max_retries = 0;
    assert!(bad.validate().is_err());

    let mut bad = UploaderConfig::default();
    bad.retry.max_retries = 33;
    let err = bad.validate().unwrap_err();
    assert!(err.to_string().contains("between 1 and 32"));

    let mut edge = UploaderConfig::default();
    edge.retry.max_retries = 32;
    assert!(edge.validate().is_ok());
}

#[test]
fn test_partial_config_file_keeps_defaults() {
    let dir = TempDir::new().unwrap();
    let path = dir.path().join("config.json");
    std::fs::write(&path, r#"{ "retry": { "max_retries": 3 } }"#).unwrap();

    let config = UploaderConfig::load(path.to_str()).unwrap();

    assert_eq!(config.retry.max_retries, 3);
    assert_eq!(config.retry.retriable_status_codes.len(), 4);
    assert_eq!(config.schedule.clips_per_day, 8);
}

#[test]
fn test_oauth_config_shapes() {
    let flat = OAuthConfig::from_json(
        r#"{"client_id":"id","client_secret":"secret","redirect_uri":"http://localhost:8080"}"#,
    )
    .unwrap();
    assert_eq!(flat.redirect_uri, "http://localhost:8080");

    let google = OAuthConfig::from_json(
        r#"{"installed":{"client_id":"id","client_secret":"secret","redirect_uris":["urn:ietf:wg:oauth:2.0:oob"]}}"#,
    )
    .unwrap();
    assert_eq!(google.client_id, "id");
    assert_eq!(google.redirect_uri, "urn:ietf:wg:oauth:2.0:oob");
}

// YouTube

#[test]
fn test_video_resource_body() {
    let mut metadata = VideoMetadata {
        title: "Clip".to_string(),
        description: "A clip".to_string(),
        tags: split_keywords("movie clip, cinema,, popular "),
        category_id: "24".to_string(),
        privacy_status: PrivacyStatus::Public,
        scheduled_start_time: None,
    };
    assert_eq!(metadata.tags, vec!["movie clip", "cinema", "popular"]);
    assert!(metadata.to_resource()["status"].get("publishAt").is_none());

    let publish_at = DateTime::parse_from_rfc3339("2024-03-01T08:00:00Z")
        .unwrap()
        .with_timezone(&Utc);
    metadata.schedule_at(publish_at);
    let body = metadata.to_resource();

    assert_eq!(body["snippet"]["categoryId"], "24");
    assert_eq!(body["status"]["privacyStatus"], "private");
    assert_eq!(body["status"]["publishAt"], "2024-03-01T08:00:00+00:00");
}

#[test]
fn test_next_offset_from_range() {
    assert_eq!(next_offset_from_range("bytes=0-262143"), Some(262144));
    assert_eq!(next_offset_from_range("bytes=0-0"), Some(1));
    assert_eq!(next_offset_from_range("garbage"), None);
}

// Sanitize

#[test]
fn test_sanitize_filename() {
    assert_eq!(
        sanitize_filename("Movie: The \"Best\" Scene [HD] #1?"),
        "Movie_The_Best_Scene_HD_1_"
    );
    assert_eq!(sanitize_filename(&"a".repeat(100)).len(), 75);
}

#[test]
fn test_infer_extension() {
    assert_eq!(infer_extension("clip", 500 * 1024), ".mp4");
    assert_eq!(infer_extension("clip", 10), ".json");
    assert_eq!(infer_extension("clip.mkv", 10), ".mp4");
    assert_eq!(infer_extension("clip.mp4.part", 10), ".part");
    assert_eq!(infer_extension("clip.m4v", 10), ".mp4");
    assert_eq!(infer_extension("info.jsonl", 10), ".json");
    assert_eq!(infer_extension("notes.txt", 10), ".txt");
    assert_eq!(sanitized_name("my clip.mp4.mp4", 10), "my_clip.mp4");
}

#[test]
fn test_sanitize_files_renames_and_skips_existing() {
    let dir = TempDir::new().unwrap();
    let nested = dir.path().join("topic");
    std::fs::create_dir(&nested).unwrap();
    std::fs::write(nested.join("my clip.mp4"), b"video").unwrap();
    std::fs::write(nested.join("meta data"), b"{}").unwrap();
    std::fs::write(nested.join("taken name.txt"), b"a").unwrap();
    std::fs::write(nested.join("taken_name.txt"), b"b").unwrap();

    let renamed = sanitize_files(dir.path()).unwrap();

    assert_eq!(renamed.len(), 2);
    assert!(nested.join("my_clip.mp4").exists());
    assert!(nested.join("meta_data.json").exists());
    assert!(nested.join("taken name.txt").exists());
}

// Schedule

fn schedule_config(root: &std::path::Path, clips_per_day: usize) -> ScheduleConfig {
    ScheduleConfig {
        clips_dir: root.join("READY"),
        scheduled_dir: root.join("SCHEDULED"),
        schedule_log: root.join("00_schedule.json"),
        clips_per_day,
        ..ScheduleConfig::default()
    }
}

fn write_clip(dir: &std::path::Path, name: &str, text: &str) {
    std::fs::write(dir.join(format!("{}.mp4", name)), b"video").unwrap();
    std::fs::write(dir.join(format!("{}.txt", name)), text).unwrap();
}

fn seed_log(config: &ScheduleConfig, date: &str) {
    let log = ScheduleLog {
        scheduled_days: vec![ScheduledDay {
            date: date.to_string(),
            clips: vec![],
        }],
    };
    log.save(&config.schedule_log).unwrap();
}

#[test]
fn test_next_day_rolls_over_month() {
    let log = ScheduleLog {
        scheduled_days: vec![ScheduledDay {
            date: "20240131".to_string(),
            clips: vec![],
        }],
    };
    assert_eq!(
        log.next_day().unwrap(),
        NaiveDate::from_ymd_opt(2024, 2, 1).unwrap()
    );
    assert!(matches!(
        ScheduleLog::default().next_day(),
        Err(ScheduleError::EmptyLog)
    ));
}

#[test]
fn test_rewrite_description() {
    let config = ScheduleConfig::default();
    let rewritten = rewrite_description("Best of memezar", &config);
    assert!(rewritten.starts_with(&config.follow_banner));
    assert!(rewritten.ends_with("Best of popcorn-clips-and-chill"));

    let untouched = rewrite_description("Follow for more", &config);
    assert_eq!(untouched, "Follow for more");
}

#[test]
fn test_upload_time_format() {
    assert_eq!(
        parse_upload_time("6:00 PM").unwrap(),
        chrono::NaiveTime::from_hms_opt(18, 0, 0).unwrap()
    );
    assert!(parse_upload_time("18h").is_err());
}

#[test]
fn test_plan_next_day() {
    let dir = TempDir::new().unwrap();
    let config = schedule_config(dir.path(), 2);
    std::fs::create_dir_all(&config.clips_dir).unwrap();
    write_clip(&config.clips_dir, "a", "Title A\nFollow along");
    write_clip(&config.clips_dir, "b", "Title B\nmemezar classic");
    write_clip(&config.clips_dir, "c", "Title C\nthird");
    seed_log(&config, "20240101");

    let day = plan_next_day(&config, &mut StdRng::seed_from_u64(1)).unwrap();

    assert_eq!(day.date, "20240102");
    assert_eq!(day.clips.len(), 2);
    assert_eq!(day.clips[0].time, "6:00 AM");
    assert_eq!(day.clips[1].time, "8:00 AM");
    assert!(day.clips.iter().all(|c| c.file.is_some()));

    let folder = config.scheduled_dir.join("20240102");
    let moved = std::fs::read_dir(&folder).unwrap().count();
    assert_eq!(moved, 4);
    let remaining = std::fs::read_dir(&config.clips_dir).unwrap().count();
    assert_eq!(remaining, 2);

    let log = ScheduleLog::load(&config.schedule_log).unwrap();
    assert_eq!(log.scheduled_days.len(), 2);
    assert_eq!(log.scheduled_days[1], day);
    assert_eq!(day.publish_times().unwrap().len(), 2);
}

#[test]
fn test_plan_next_day_needs_enough_clips() {
    let dir = TempDir::new().unwrap();
    let config = schedule_config(dir.path(), 8);
    std::fs::create_dir_all(&config.clips_dir).unwrap();
    write_clip(&config.clips_dir, "only", "Only\none");
    seed_log(&config, "20240101");

    let err = plan_next_day(&config, &mut StdRng::seed_from_u64(1)).unwrap_err();

    match &err {
        ScheduleError::NotEnoughClips {
            available,
            required,
        } => {
            assert_eq!((*available, *required), (1, 8));
        }
        other => panic!("unexpected error: {}", other),
    }
    assert!(err.to_string().contains("Please add 7 clips"));
    assert!(config.clips_dir.join("only.mp4").exists());
    assert!(!config.scheduled_dir.join("20240102").exists());
}

#[test]
fn test_pick_clips_is_distinct() {
    let dir = TempDir::new().unwrap();
    for name in ["a", "b", "c", "d"] {
        write_clip(dir.path(), name, "t\nd");
    }
    let picked = pick_clips(dir.path(), 4, &mut StdRng::seed_from_u64(3)).unwrap();
    let mut names: Vec<_> = picked.iter().map(|p| p.file_name().unwrap().to_owned()).collect();
    names.sort();
    names.dedup();
    assert_eq!(names.len(), 4);
}

#[test]
fn test_clip_info_without_file_field() {
    let clip: ClipInfo =
        serde_json::from_str(r#"{"time":"6:00 AM","title":"t","description":"d"}"#).unwrap();
    assert!(clip.file.is_none());
}

#[test]
fn test_plan_next_day_counts_clips_already_in_folder() {
    let dir = TempDir::new().unwrap();
    let config = schedule_config(dir.path(), 2);
    std::fs::create_dir_all(&config.clips_dir).unwrap();
    write_clip(&config.clips_dir, "a", "Title A\none");
    write_clip(&config.clips_dir, "b", "Title B\ntwo");
    seed_log(&config, "20240101");
    let folder = config.scheduled_dir.join("20240102");
    std::fs::create_dir_all(&folder).unwrap();
    for i in 0..7 {
        std::fs::write(folder.join(format!("stray{}.txt", i)), "t\nd").unwrap();
    }

    let err = plan_next_day(&config, &mut StdRng::seed_from_u64(1)).unwrap_err();

    assert!(matches!(
        err,
        ScheduleError::NotEnoughSlots {
            clips: 9,
            slots: 8
        }
    ));
    assert!(config.clips_dir.join("a.mp4").exists());
    assert!(config.clips_dir.join("b.txt").exists());
    assert_eq!(std::fs::read_dir(&folder).unwrap().count(), 7);
    let log = ScheduleLog::load(&config.schedule_log).unwrap();
    assert_eq!(log.scheduled_days.len(), 1);
}

fn two_day_log() -> ScheduleLog {
    let clip = |time: &str, title: &str, file: Option<&str>| ClipInfo {
        time: time.to_string(),
        title: title.to_string(),
        description: format!("{} description", title),
        file: file.map(str::to_string),
    };
    ScheduleLog {
        scheduled_days: vec![
            ScheduledDay {
                date: "20240114".to_string(),
                clips: vec![clip("6:00 AM", "old", Some("old.mp4"))],
            },
            ScheduledDay {
                date: "20240115".to_string(),
                clips: vec![
                    clip("6:00 AM", "first", Some("first.mp4")),
                    clip("8:00 AM", "legacy", None),
                    clip("12:00 PM", "noon", Some("noon.mp4")),
                ],
            },
        ],
    }
}

#[test]
fn test_day_lookup() {
    let log = two_day_log();

    assert_eq!(log.day(Some("20240114")).unwrap().clips[0].title, "old");
    assert_eq!(log.day(None).unwrap().date, "20240115");
    assert!(matches!(
        log.day(Some("20240301")),
        Err(ScheduleError::UnknownDay(date)) if date == "20240301"
    ));
    assert!(matches!(
        ScheduleLog::default().day(None),
        Err(ScheduleError::EmptyLog)
    ));

    let config = ScheduleConfig::default();
    let day = log.day(None).unwrap();
    assert_eq!(day.folder(&config), config.scheduled_dir.join("20240115"));
}

#[test]
fn test_local_slot_converts_to_utc() {
    let slot = NaiveDate::from_ymd_opt(2024, 1, 15)
        .unwrap()
        .and_hms_opt(12, 0, 0)
        .unwrap();

    let utc = local_to_utc(slot).unwrap();

    assert_eq!(utc.with_timezone(&Local).naive_local(), slot);
    assert_eq!(
        utc,
        Local
            .from_local_datetime(&slot)
            .earliest()
            .unwrap()
            .with_timezone(&chrono::Utc)
    );
}

#[test]
fn test_day_uploads_skips_clips_without_file() {
    let log = two_day_log();
    let mut config = UploaderConfig::default();
    config.defaults.privacy_status = PrivacyStatus::Public;
    let day = log.day(None).unwrap();

    let uploads = day_uploads(day, &config).unwrap();

    assert_eq!(uploads.len(), 2);
    let folder = day.folder(&config.schedule);
    assert_eq!(uploads[0].0, folder.join("first.mp4"));
    assert_eq!(uploads[1].0, folder.join("noon.mp4"));

    let noon = NaiveDate::from_ymd_opt(2024, 1, 15)
        .unwrap()
        .and_hms_opt(12, 0, 0)
        .unwrap();
    let (_, metadata) = &uploads[1];
    assert_eq!(metadata.title, "noon");
    assert_eq!(metadata.privacy_status, PrivacyStatus::Private);
    assert_eq!(
        metadata.scheduled_start_time,
        Some(local_to_utc(noon).unwrap().to_rfc3339())
    );
    assert_eq!(metadata.tags, split_keywords(&config.defaults.keywords));

    let resource = metadata.to_resource();
    assert_eq!(resource["status"]["privacyStatus"], "private");
    assert!(resource["status"]["publishAt"].is_string());
}
