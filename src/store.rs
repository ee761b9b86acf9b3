//! Durable key-value store backed by one file per key.
//!
//! Keys are sanitized into file names under a single root directory in the
//! platform data dir. Values are opaque bytes; JSON helpers cover the small
//! progress/notes maps. Failure policy: a read error or missing file is
//! "entry absent", malformed JSON is "entry absent" (the caller starts from
//! an empty map), and a write error is logged and not retried — the next
//! successful mutation rewrites the full value anyway.

use anyhow::{Context, Result};
use directories::ProjectDirs;
use serde::Serialize;
use serde::de::DeserializeOwned;
use std::path::{Path, PathBuf};
use tracing::warn;

use crate::session::sanitize_key;

pub struct KvStore {
  root: PathBuf,
}

impl KvStore {
  /// Open (creating if needed) a store rooted at `root`.
  pub fn open(root: &Path) -> Result<Self> {
    std::fs::create_dir_all(root).with_context(|| format!("Failed to create store directory {}", root.display()))?;
    Ok(Self { root: root.to_path_buf() })
  }

  /// The default store root under the platform data dir.
  pub fn default_root() -> Result<PathBuf> {
    let proj_dirs = ProjectDirs::from("", "", "reel").context("Could not determine platform data directory")?;
    Ok(proj_dirs.data_dir().join("store"))
  }

  fn entry_path(&self, key: &str) -> PathBuf {
    self.root.join(sanitize_key(key))
  }

  /// Read the raw value for `key`. I/O failure is treated as "absent" so a
  /// flaky disk degrades to missing data rather than an error in the UI.
  pub async fn get(&self, key: &str) -> Option<Vec<u8>> {
    let path = self.entry_path(key);
    match tokio::fs::read(&path).await {
      Ok(bytes) => Some(bytes),
      Err(e) if e.kind() == std::io::ErrorKind::NotFound => None,
      Err(e) => {
        warn!(key, err = %e, "store: read failed, treating entry as absent");
        None
      }
    }
  }

  /// Write `value` under `key`. Goes through a temp file and rename so a
  /// crash mid-write never leaves a truncated entry behind.
  pub async fn put(&self, key: &str, value: &[u8]) -> Result<()> {
    let path = self.entry_path(key);
    let tmp = path.with_extension("part");
    tokio::fs::write(&tmp, value).await.with_context(|| format!("Failed to write store entry {}", key))?;
    tokio::fs::rename(&tmp, &path).await.with_context(|| format!("Failed to finalize store entry {}", key))?;
    Ok(())
  }

  /// Read and parse a JSON value. Parse failure means the persisted data is
  /// unusable; log and start over from "absent" instead of propagating.
  pub async fn get_json<T: DeserializeOwned>(&self, key: &str) -> Option<T> {
    let bytes = self.get(key).await?;
    match serde_json::from_slice(&bytes) {
      Ok(value) => Some(value),
      Err(e) => {
        warn!(key, err = %e, "store: malformed JSON entry, resetting to empty");
        None
      }
    }
  }

  /// Serialize and write a JSON value.
  pub async fn put_json<T: Serialize>(&self, key: &str, value: &T) -> Result<()> {
    let bytes = serde_json::to_vec(value).with_context(|| format!("Failed to serialize store entry {}", key))?;
    self.put(key, &bytes).await
  }
}

#[cfg(test)]
mod tests {
  use super::*;
  use std::collections::HashMap;

  fn open_temp() -> (tempfile::TempDir, KvStore) {
    let dir = tempfile::tempdir().expect("tempdir");
    let store = KvStore::open(dir.path()).expect("open store");
    (dir, store)
  }

  #[tokio::test]
  async fn missing_key_is_absent() {
    let (_dir, store) = open_temp();
    assert_eq!(store.get("nope").await, None);
  }

  #[tokio::test]
  async fn put_then_get_roundtrips_bytes() {
    let (_dir, store) = open_temp();
    store.put("thumb_a", b"jpeg bytes").await.expect("put");
    assert_eq!(store.get("thumb_a").await.as_deref(), Some(b"jpeg bytes".as_slice()));
  }

  #[tokio::test]
  async fn json_roundtrip() {
    let (_dir, store) = open_temp();
    let mut map: HashMap<u32, f64> = HashMap::new();
    map.insert(1, 52.5);
    map.insert(2, 100.0);
    store.put_json("progress_x", &map).await.expect("put_json");
    let loaded: HashMap<u32, f64> = store.get_json("progress_x").await.expect("entry present");
    assert_eq!(loaded, map);
  }

  #[tokio::test]
  async fn malformed_json_reads_as_absent() {
    let (_dir, store) = open_temp();
    store.put("progress_x", b"{not json").await.expect("put");
    let loaded: Option<HashMap<u32, f64>> = store.get_json("progress_x").await;
    assert_eq!(loaded, None);
  }

  #[tokio::test]
  async fn keys_are_sanitized_to_file_names() {
    let (dir, store) = open_temp();
    store.put("thumb_/videos/a.mp4", b"x").await.expect("put");
    assert!(dir.path().join("thumb__videos_a_mp4").exists());
    // The same raw key reads back through the same sanitization.
    assert_eq!(store.get("thumb_/videos/a.mp4").await.as_deref(), Some(b"x".as_slice()));
  }

  #[tokio::test]
  async fn overwrite_replaces_value() {
    let (_dir, store) = open_temp();
    store.put("k", b"old").await.expect("put");
    store.put("k", b"new").await.expect("put");
    assert_eq!(store.get("k").await.as_deref(), Some(b"new".as_slice()));
  }
}
