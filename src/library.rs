//! Folder scanning: turn a directory into the session's video list.

use anyhow::{Context, Result};
use std::path::{Path, PathBuf};
use walkdir::WalkDir;

use crate::constants::constants;

/// One video file in the active folder.
///
/// `id` is unique within a folder listing and stable for the session; all
/// persisted progress and notes are keyed by it. `file_path` keys the
/// thumbnail cache. Replaced wholesale when a new folder is selected.
#[derive(Debug, Clone)]
pub struct VideoRef {
  pub id: u32,
  pub title: String,
  pub file_path: PathBuf,
  /// Base64-encoded JPEG once generated or pulled from the cache.
  pub thumbnail: Option<String>,
}

fn is_video(path: &Path) -> bool {
  let Some(ext) = path.extension().and_then(|e| e.to_str()) else { return false };
  let ext = ext.to_lowercase();
  constants().video_extensions.iter().any(|v| *v == ext)
}

/// List the video files directly inside `folder`, sorted by file name, with
/// 1-based ids assigned in listing order.
pub fn scan_folder(folder: &Path) -> Result<Vec<VideoRef>> {
  if !folder.is_dir() {
    anyhow::bail!("{} is not a directory", folder.display());
  }

  let mut paths: Vec<PathBuf> = WalkDir::new(folder)
    .min_depth(1)
    .max_depth(1)
    .into_iter()
    .filter_map(|entry| entry.ok())
    .filter(|entry| entry.file_type().is_file())
    .map(|entry| entry.into_path())
    .filter(|path| is_video(path))
    .collect();
  paths.sort();

  let videos = paths
    .into_iter()
    .enumerate()
    .map(|(i, path)| {
      let title = path.file_stem().map(|s| s.to_string_lossy().into_owned()).unwrap_or_else(|| "untitled".to_string());
      // Safety: a directory listing never comes close to u32::MAX entries.
      VideoRef { id: (i + 1) as u32, title, file_path: path, thumbnail: None }
    })
    .collect();

  Ok(videos)
}

/// Convenience wrapper that also rejects empty folders with a user-facing error.
pub fn scan_folder_nonempty(folder: &Path) -> Result<Vec<VideoRef>> {
  let videos = scan_folder(folder).with_context(|| format!("Failed to scan {}", folder.display()))?;
  if videos.is_empty() {
    anyhow::bail!("No video files found in {}", folder.display());
  }
  Ok(videos)
}

#[cfg(test)]
mod tests {
  use super::*;
  use std::fs::File;

  fn touch(dir: &Path, name: &str) {
    File::create(dir.join(name)).expect("create file");
  }

  #[test]
  fn scan_filters_and_sorts_and_numbers() {
    let dir = tempfile::tempdir().expect("tempdir");
    touch(dir.path(), "b-second.mkv");
    touch(dir.path(), "a-first.mp4");
    touch(dir.path(), "notes.txt");
    touch(dir.path(), "cover.jpg");

    let videos = scan_folder(dir.path()).expect("scan");
    assert_eq!(videos.len(), 2);
    assert_eq!(videos[0].id, 1);
    assert_eq!(videos[0].title, "a-first");
    assert_eq!(videos[1].id, 2);
    assert_eq!(videos[1].title, "b-second");
    assert!(videos.iter().all(|v| v.thumbnail.is_none()));
  }

  #[test]
  fn scan_is_case_insensitive_on_extensions() {
    let dir = tempfile::tempdir().expect("tempdir");
    touch(dir.path(), "upper.MP4");
    let videos = scan_folder(dir.path()).expect("scan");
    assert_eq!(videos.len(), 1);
  }

  #[test]
  fn scan_does_not_recurse() {
    let dir = tempfile::tempdir().expect("tempdir");
    std::fs::create_dir(dir.path().join("sub")).expect("mkdir");
    touch(&dir.path().join("sub"), "nested.mp4");
    touch(dir.path(), "top.mp4");
    let videos = scan_folder(dir.path()).expect("scan");
    assert_eq!(videos.len(), 1);
    assert_eq!(videos[0].title, "top");
  }

  #[test]
  fn nonempty_rejects_folder_without_videos() {
    let dir = tempfile::tempdir().expect("tempdir");
    touch(dir.path(), "readme.md");
    assert!(scan_folder_nonempty(dir.path()).is_err());
  }

  #[test]
  fn missing_directory_is_an_error() {
    assert!(scan_folder(Path::new("/definitely/not/here")).is_err());
  }
}
