use anyhow::{bail, Context, Result};
use chrono::{DateTime, Utc};
use clap::Parser;
use clip_uploader::config::{load_oauth_config, UploaderConfig};
use clip_uploader::sanitize::sanitize_files;
use clip_uploader::schedule::{day_uploads, plan_next_day, ScheduleLog};
use clip_uploader::youtube::{
    create_default_metadata, load_video_metadata, split_keywords, VideoMetadata, YouTubeUploader,
};
use clip_uploader::*;
use std::path::PathBuf;
use tracing::{error, info, warn};
use tracing_subscriber::EnvFilter;

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();

    let default_filter = if cli.verbose {
        "clip_uploader=debug,info"
    } else {
        "clip_uploader=info,warn"
    };
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(default_filter)),
        )
        .init();

    let config = UploaderConfig::load(cli.config.as_deref())?;

    match cli.command {
        Commands::Upload {
            file,
            title,
            description,
            category,
            keywords,
            privacy_status,
            publish_at,
        } => {
            if !file.exists() {
                bail!("Please specify a valid file using the --file parameter.");
            }
            let defaults = &config.defaults;
            let mut metadata = VideoMetadata {
                title: title.unwrap_or_else(|| defaults.title.clone()),
                description: description.unwrap_or_else(|| defaults.description.clone()),
                tags: split_keywords(keywords.as_deref().unwrap_or(&defaults.keywords)),
                category_id: category.unwrap_or_else(|| defaults.category.clone()),
                privacy_status: privacy_status.unwrap_or(defaults.privacy_status),
                scheduled_start_time: None,
            };
            if let Some(publish_at) = publish_at {
                metadata.schedule_at(parse_time(&publish_at)?);
            }

            let uploader = connect(&cli.oauth_config, &config).await?;
            let video_id = uploader.upload_video(&file, &metadata, &config).await?;
            println!("Video id '{}' was successfully uploaded.", video_id);
        }

        Commands::Batch {
            videos,
            interval,
            metadata,
            description_file,
            start_time,
            timestamp_file,
            dry_run,
            yes,
        } => {
            let video_files: Vec<String> = videos
                .split(',')
                .map(|s| s.trim().to_string())
                .filter(|s| !s.is_empty())
                .collect();
            let interval = parse_duration(&interval)?;
            let start_time = start_time.as_deref().map(parse_time).transpose()?;

            let mut metadata = match metadata {
                Some(path) => load_video_metadata(&path)?,
                None => create_default_metadata(
                    &video_files,
                    &config.defaults,
                    description_file.as_deref(),
                ),
            };
            if metadata.len() < video_files.len() {
                warn!(
                    "Only {} metadata entries for {} videos; the rest will be skipped",
                    metadata.len(),
                    video_files.len()
                );
            }

            let schedule = generate_schedule(
                video_files.len(),
                interval,
                start_time,
                timestamp_file.as_deref(),
            )?;
            for (entry, scheduled_time) in metadata.iter_mut().zip(&schedule) {
                entry.schedule_at(*scheduled_time);
            }

            println!("Upload Schedule:");
            println!("================");
            for (i, (video_file, scheduled_time)) in video_files.iter().zip(&schedule).enumerate() {
                println!(
                    "{}. {} -> {}",
                    i + 1,
                    video_file,
                    scheduled_time.format("%Y-%m-%d %H:%M:%S UTC")
                );
            }

            if dry_run {
                println!("\nDry run complete. No videos were uploaded.");
                return Ok(());
            }
            if !yes && !confirm("\nProceed with upload? (y/N): ")? {
                println!("Upload cancelled.");
                return Ok(());
            }

            let uploader = connect(&cli.oauth_config, &config).await?;
            let jobs: Vec<(PathBuf, &VideoMetadata)> = video_files
                .iter()
                .map(PathBuf::from)
                .zip(metadata.iter())
                .collect();
            upload_all(&uploader, &jobs, &config).await;
        }

        Commands::PlanDay => {
            let day = plan_next_day(&config.schedule, &mut rand::thread_rng())?;
            println!("Scheduled {} ({} clips):", day.date, day.clips.len());
            for clip in &day.clips {
                println!("  {} {}", clip.time, clip.title);
            }
        }

        Commands::PublishDay { date } => {
            let log = ScheduleLog::load(&config.schedule.schedule_log)?;
            let day = log.day(date.as_deref())?;
            let metadata = day_uploads(day, &config)?;

            let uploader = connect(&cli.oauth_config, &config).await?;
            let jobs: Vec<(PathBuf, &VideoMetadata)> =
                metadata.iter().map(|(path, m)| (path.clone(), m)).collect();
            upload_all(&uploader, &jobs, &config).await;
        }

        Commands::Sanitize { dir } => {
            let renamed = sanitize_files(&dir)?;
            info!("Sanitized {} files under {}", renamed.len(), dir.display());
        }
    }

    Ok(())
}

fn parse_time(value: &str) -> Result<DateTime<Utc>> {
    Ok(DateTime::parse_from_rfc3339(value)
        .with_context(|| format!("Invalid time '{}', expected ISO 8601", value))?
        .with_timezone(&Utc))
}

fn confirm(prompt: &str) -> Result<bool> {
    println!("{}", prompt);
    let mut input = String::new();
    std::io::stdin().read_line(&mut input)?;
    Ok(input.trim().to_lowercase().starts_with('y'))
}

async fn connect(oauth_config_path: &str, config: &UploaderConfig) -> Result<YouTubeUploader> {
    let oauth_config = load_oauth_config(oauth_config_path)?;
    let mut uploader = YouTubeUploader::new(&oauth_config, &config.token_path)?;
    info!("Authenticating with YouTube...");
    uploader.authenticate().await?;
    Ok(uploader)
}

/// Upload one after another; a failed video doesn't stop the rest.
async fn upload_all(
    uploader: &YouTubeUploader,
    jobs: &[(PathBuf, &VideoMetadata)],
    config: &UploaderConfig,
) {
    info!("Uploading {} videos", jobs.len());
    for (i, (video_file, metadata)) in jobs.iter().enumerate() {
        info!("Uploading {} ({}/{})", video_file.display(), i + 1, jobs.len());
        match uploader.upload_video(video_file, metadata, config).await {
            Ok(video_id) => {
                println!(
                    "✓ Successfully uploaded: {} (ID: {})",
                    video_file.display(),
                    video_id
                );
            }
            Err(e) => {
                error!("✗ Failed to upload {}: {}", video_file.display(), e);
            }
        }
    }
    info!("Upload process completed!");
}
