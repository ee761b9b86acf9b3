//! Per-video free-text notes with debounced persistence.
//!
//! Edits land in the in-memory map immediately so the editor feels live; a
//! single pending flush task writes the whole folder map after a quiet
//! period. Each new edit cancels and reschedules the flush. The flush
//! captures its snapshot and storage key at schedule time, so switching
//! videos (or folders) never loses or misdirects a pending edit — the timer
//! simply fires for the state it was scheduled with.

use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;
use tokio::task::JoinHandle;
use tracing::warn;

use crate::constants::constants;
use crate::session::FolderContext;
use crate::store::KvStore;

pub struct NotesStore {
  store: Arc<KvStore>,
  ctx: Option<FolderContext>,
  map: HashMap<u32, String>,
  pending: Option<JoinHandle<()>>,
}

impl NotesStore {
  pub fn new(store: Arc<KvStore>) -> Self {
    Self { store, ctx: None, map: HashMap::new(), pending: None }
  }

  /// Switch folders: clear in-memory notes and install the new context
  /// synchronously. Any pending flush is left running — it targets the old
  /// folder's key with an old snapshot, which is exactly where that edit
  /// belongs.
  pub fn set_context(&mut self, ctx: Option<FolderContext>) {
    self.ctx = ctx;
    self.map.clear();
    self.pending = None;
  }

  /// Install notes loaded from the store, if they still belong to the
  /// active folder. In-memory edits that raced the load win.
  pub fn install_loaded(&mut self, ctx: &FolderContext, loaded: HashMap<u32, String>) {
    if self.ctx.as_ref() != Some(ctx) {
      return;
    }
    for (id, text) in loaded {
      self.map.entry(id).or_insert(text);
    }
  }

  pub fn note(&self, id: u32) -> &str {
    self.map.get(&id).map(String::as_str).unwrap_or("")
  }

  pub fn has_note(&self, id: u32) -> bool {
    self.map.get(&id).is_some_and(|t| !t.is_empty())
  }

  /// Record an edit and (re)schedule the debounced flush.
  pub fn update_note(&mut self, video_id: u32, text: String) {
    let Some(ctx) = self.ctx.clone() else { return };
    self.map.insert(video_id, text);

    // Cancel-and-reschedule: only the latest edit's timer survives.
    if let Some(handle) = self.pending.take() {
      handle.abort();
    }

    let store = Arc::clone(&self.store);
    let key = ctx.notes_key();
    let snapshot = self.map.clone();
    self.pending = Some(tokio::spawn(async move {
      tokio::time::sleep(Duration::from_millis(constants().notes_debounce_ms)).await;
      if let Err(e) = store.put_json(&key, &snapshot).await {
        warn!(key, err = %e, "notes: debounced flush failed");
      }
    }));
  }

  /// Force any pending edit to disk now. Called on shutdown so the debounce
  /// window can't swallow the last keystrokes.
  pub async fn flush(&mut self) {
    let Some(ref ctx) = self.ctx else { return };
    let Some(handle) = self.pending.take() else { return };
    handle.abort();
    let _ = handle.await;
    if let Err(e) = self.store.put_json(&ctx.notes_key(), &self.map).await {
      warn!(err = %e, "notes: final flush failed");
    }
  }
}

/// Read a folder's persisted notes map; absent or malformed becomes empty.
pub async fn load_map(store: &KvStore, ctx: &FolderContext) -> HashMap<u32, String> {
  store.get_json(&ctx.notes_key()).await.unwrap_or_default()
}

#[cfg(test)]
mod tests {
  use super::*;
  use std::path::Path;

  fn notes() -> (tempfile::TempDir, Arc<KvStore>, NotesStore) {
    let dir = tempfile::tempdir().expect("tempdir");
    let store = Arc::new(KvStore::open(dir.path()).expect("open store"));
    (dir, Arc::clone(&store), NotesStore::new(store))
  }

  fn ctx(name: &str) -> FolderContext {
    FolderContext::new(Path::new(name))
  }

  #[tokio::test]
  async fn rapid_edits_produce_one_write_with_last_text() {
    let (_dir, store, mut n) = notes();
    let c = ctx("/tmp/a");
    n.set_context(Some(c.clone()));

    n.update_note(1, "d".to_string());
    n.update_note(1, "dr".to_string());
    n.update_note(1, "draft".to_string());

    // Inside the quiet period nothing has been written yet — the first two
    // timers were cancelled and the third hasn't fired.
    tokio::time::sleep(Duration::from_millis(constants().notes_debounce_ms / 2)).await;
    let early: Option<HashMap<u32, String>> = store.get_json(&c.notes_key()).await;
    assert!(early.is_none());

    tokio::time::sleep(Duration::from_millis(constants().notes_debounce_ms)).await;
    let written: HashMap<u32, String> = store.get_json(&c.notes_key()).await.expect("flushed");
    assert_eq!(written.get(&1).map(String::as_str), Some("draft"));
  }

  #[tokio::test]
  async fn in_memory_update_is_immediate() {
    let (_dir, _store, mut n) = notes();
    let c = ctx("/tmp/a");
    n.set_context(Some(c));
    n.update_note(1, "hello".to_string());
    assert_eq!(n.note(1), "hello");
    assert!(n.has_note(1));
    assert!(!n.has_note(2));
  }

  #[tokio::test]
  async fn switching_video_keeps_pending_edit() {
    let (_dir, store, mut n) = notes();
    let c = ctx("/tmp/a");
    n.set_context(Some(c.clone()));

    n.update_note(1, "first video note".to_string());
    // The user moves on to another video and edits it within the window.
    n.update_note(2, "second video note".to_string());

    tokio::time::sleep(Duration::from_millis(constants().notes_debounce_ms * 2)).await;
    let written: HashMap<u32, String> = store.get_json(&c.notes_key()).await.expect("flushed");
    assert_eq!(written.get(&1).map(String::as_str), Some("first video note"));
    assert_eq!(written.get(&2).map(String::as_str), Some("second video note"));
  }

  #[tokio::test]
  async fn flush_writes_without_waiting_for_debounce() {
    let (_dir, store, mut n) = notes();
    let c = ctx("/tmp/a");
    n.set_context(Some(c.clone()));

    n.update_note(1, "unsaved".to_string());
    n.flush().await;
    let written: HashMap<u32, String> = store.get_json(&c.notes_key()).await.expect("flushed");
    assert_eq!(written.get(&1).map(String::as_str), Some("unsaved"));
  }

  #[tokio::test]
  async fn folder_switch_clears_memory_but_not_namespaces() {
    let (_dir, store, mut n) = notes();
    let a = ctx("/tmp/a");
    let b = ctx("/tmp/b");

    n.set_context(Some(a.clone()));
    n.update_note(1, "note in a".to_string());
    n.flush().await;

    n.set_context(Some(b.clone()));
    assert_eq!(n.note(1), "");
    n.update_note(1, "note in b".to_string());
    n.flush().await;

    let in_a: HashMap<u32, String> = store.get_json(&a.notes_key()).await.expect("a");
    let in_b: HashMap<u32, String> = store.get_json(&b.notes_key()).await.expect("b");
    assert_eq!(in_a.get(&1).map(String::as_str), Some("note in a"));
    assert_eq!(in_b.get(&1).map(String::as_str), Some("note in b"));
  }

  #[tokio::test]
  async fn install_loaded_respects_live_edits() {
    let (_dir, _store, mut n) = notes();
    let c = ctx("/tmp/a");
    n.set_context(Some(c.clone()));
    n.update_note(1, "live edit".to_string());

    let mut loaded = HashMap::new();
    loaded.insert(1, "persisted".to_string());
    loaded.insert(2, "other".to_string());
    n.install_loaded(&c, loaded);
    assert_eq!(n.note(1), "live edit");
    assert_eq!(n.note(2), "other");
  }
}
