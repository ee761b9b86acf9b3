//! Folder identity and the stale-event guard.
//!
//! Every asynchronous completion in this app (store loads, thumbnail
//! batches, playback time events) carries the `FolderContext` it was started
//! under. Receivers compare it against the currently active context and
//! silently drop mismatches — a folder switch invalidates in-flight work by
//! identity, not by cancellation.

use std::path::{Path, PathBuf};

/// Replace every non-ASCII-alphanumeric character with `_` to form a safe
/// storage key component.
pub fn sanitize_key(raw: &str) -> String {
  raw.chars().map(|c| if c.is_ascii_alphanumeric() { c } else { '_' }).collect()
}

/// Identity of the currently selected video folder. All persisted per-folder
/// state (progress, notes) is namespaced under a key derived from the path.
///
/// Cheap to clone; compared by equality at every async resumption point.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FolderContext {
  path: PathBuf,
  key: String,
}

impl FolderContext {
  pub fn new(path: &Path) -> Self {
    let key = sanitize_key(&path.to_string_lossy());
    Self { path: path.to_path_buf(), key }
  }

  pub fn path(&self) -> &Path {
    &self.path
  }

  /// Storage key for this folder's id → percentage map.
  pub fn progress_key(&self) -> String {
    format!("progress_{}", self.key)
  }

  /// Storage key for this folder's id → note-text map.
  pub fn notes_key(&self) -> String {
    format!("notes_{}", self.key)
  }

  /// Short name for display (last path component, or the whole path).
  pub fn display_name(&self) -> String {
    self.path.file_name().map(|n| n.to_string_lossy().into_owned()).unwrap_or_else(|| self.path.display().to_string())
  }
}
