use regex::Regex;
use std::fs;
use std::path::{Path, PathBuf};
use std::sync::OnceLock;
use tracing::{debug, info};
use walkdir::WalkDir;

pub const MAX_FILENAME_LENGTH: usize = 75;
/// Files without an extension above this size are assumed to be videos.
pub const MAX_JSON_SIZE: u64 = 400 * 1024;

fn unsafe_chars() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    RE.get_or_init(|| Regex::new(r#"[\\/:"*?<>|'\[\]# ]+"#).expect("valid regex"))
}

fn stray_extensions() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    RE.get_or_init(|| Regex::new(r"\.jso(n*)|\.mp(4*)").expect("valid regex"))
}

/// Replace runs of characters that trip up shells and filesystems, then cap the length.
pub fn sanitize_filename(filename: &str) -> String {
    unsafe_chars()
        .replace_all(filename, "_")
        .chars()
        .take(MAX_FILENAME_LENGTH)
        .collect()
}

/// Guess the real extension of a download, which often arrives mangled.
pub fn infer_extension(file_name: &str, size: u64) -> String {
    match file_name.rsplit_once('.') {
        None | Some(("", _)) => {
            if size > MAX_JSON_SIZE {
                ".mp4".to_string()
            } else {
                ".json".to_string()
            }
        }
        Some((_, ext)) if ext.starts_with('m') => ".mp4".to_string(),
        Some((_, ext)) if ext.starts_with('j') => ".json".to_string(),
        Some((_, ext)) => format!(".{}", ext),
    }
}

/// Sanitized file name with its inferred extension.
pub fn sanitized_name(file_name: &str, size: u64) -> String {
    let extension = infer_extension(file_name, size);
    let stem = match file_name.rsplit_once('.') {
        Some((stem, _)) if !stem.is_empty() => stem,
        _ => file_name,
    };
    let stem = sanitize_filename(stem);
    format!("{}{}", stray_extensions().replace_all(&stem, ""), extension)
}

#[derive(Debug, Clone, PartialEq)]
pub struct Renamed {
    pub from: PathBuf,
    pub to: PathBuf,
}

/// Rename every file under `dir` to its sanitized name.
///
/// A file whose target name already exists is left alone.
pub fn sanitize_files(dir: &Path) -> anyhow::Result<Vec<Renamed>> {
    let mut renamed = Vec::new();
    for entry in WalkDir::new(dir).sort_by_file_name() {
        let entry = entry?;
        if !entry.file_type().is_file() {
            continue;
        }
        let path = entry.path();
        let file_name = entry.file_name().to_string_lossy();
        let size = entry.metadata()?.len();

        let new_name = sanitized_name(&file_name, size);
        if new_name == file_name {
            continue;
        }
        let Some(parent) = path.parent() else {
            continue;
        };
        let target = parent.join(&new_name);
        if target.exists() {
            debug!(file = %path.display(), "Sanitized name already exists, skipping");
            continue;
        }

        fs::rename(path, &target)?;
        info!("File '{}' sanitized to '{}'", file_name, new_name);
        renamed.push(Renamed {
            from: path.to_path_buf(),
            to: target,
        });
    }
    Ok(renamed)
}
