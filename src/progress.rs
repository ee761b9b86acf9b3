//! Per-video watch progress: the completion-window percentage, the
//! never-regress merge, and per-folder persistence.
//!
//! All methods run on the app's single logical thread; the race windows are
//! the channel hops between mpv's monitor task and the app loop, which is
//! why every time event carries the `FolderContext` it originated under and
//! is checked against the active one before anything is committed.

use std::collections::HashMap;
use std::sync::Arc;
use tokio::sync::mpsc;
use tracing::{debug, warn};

use crate::constants::constants;
use crate::player::PlayerCommand;
use crate::session::FolderContext;
use crate::store::KvStore;

/// Map playback position to a completion percentage in [0, 100].
///
/// A naive `current/duration * 100` rarely lands on exactly 100 (metadata
/// and float imprecision), leaving videos forever "in progress". Instead the
/// final `completion_window_secs` are reserved as a linear ramp from 99 to
/// 100, and everything before maps linearly onto [0, 99). Clips shorter than
/// the window use the direct ratio.
pub fn completion_percent(current: f64, duration: f64) -> f64 {
  let window = constants().completion_window_secs;
  if duration <= window {
    return (current / duration * 100.0).clamp(0.0, 100.0);
  }
  let effective = duration - window;
  let pct = if current <= effective {
    current / effective * 99.0
  } else {
    99.0 + (current - effective) / window
  };
  pct.clamp(0.0, 100.0)
}

pub struct ProgressTracker {
  store: Arc<KvStore>,
  player_tx: mpsc::UnboundedSender<PlayerCommand>,
  ctx: Option<FolderContext>,
  map: HashMap<u32, f64>,
  active_video: Option<u32>,
}

impl ProgressTracker {
  pub fn new(store: Arc<KvStore>, player_tx: mpsc::UnboundedSender<PlayerCommand>) -> Self {
    Self { store, player_tx, ctx: None, map: HashMap::new(), active_video: None }
  }

  /// Switch folders. Clears in-memory state and installs the new context
  /// synchronously, before any async load of persisted state can resolve —
  /// late events from the old folder then have nothing matching to write to.
  pub fn set_context(&mut self, ctx: Option<FolderContext>) {
    self.ctx = ctx;
    self.map.clear();
    self.active_video = None;
  }

  /// Install a map loaded from the store, if it still belongs to the active
  /// folder. Merged by max: a time event that landed while the load was in
  /// flight must not be regressed by older persisted data.
  pub fn install_loaded(&mut self, ctx: &FolderContext, loaded: HashMap<u32, f64>) {
    if self.ctx.as_ref() != Some(ctx) {
      debug!(folder = %ctx.display_name(), "progress: discarding stale loaded state");
      return;
    }
    for (id, pct) in loaded {
      let entry = self.map.entry(id).or_insert(0.0);
      if pct > *entry {
        *entry = pct;
      }
    }
  }

  /// The video currently loaded in the player, used to gate the seek/pause
  /// side effect of `mark_not_started`.
  pub fn set_active_video(&mut self, id: Option<u32>) {
    self.active_video = id;
  }

  pub fn percent(&self, id: u32) -> f64 {
    self.map.get(&id).copied().unwrap_or(0.0)
  }

  /// Handle a time-advance notification from the playback engine.
  pub async fn on_time_advanced(&mut self, ctx: &FolderContext, video_id: u32, current: f64, duration: f64) {
    // Engine not ready yet: no usable duration.
    if duration <= 0.0 {
      return;
    }
    // Stale event from a superseded folder session.
    if self.ctx.as_ref() != Some(ctx) {
      debug!(video = video_id, "progress: dropping time event from stale folder context");
      return;
    }
    // The event stream intermixes residual timing from the just-closed
    // video while the new source attaches; sub-0.5s timestamps would
    // corrupt the new video's record.
    if current < constants().min_track_secs {
      return;
    }

    let computed = completion_percent(current, duration);
    let stored = self.percent(video_id);
    let merged = stored.max(computed);

    // Below the commit floor, skip sub-1-point changes to avoid hammering
    // the store; at or above it, every step matters so the final approach
    // to 100 is never dropped.
    if merged < constants().commit_floor_pct && (merged - stored).abs() < constants().min_commit_delta_pct {
      return;
    }

    // Event ordering may have raced with a folder switch; re-validate
    // immediately before committing.
    if self.ctx.as_ref() != Some(ctx) {
      return;
    }
    self.map.insert(video_id, merged);
    self.persist().await;
  }

  /// Direct user action: set exactly 100, regardless of prior value.
  pub async fn mark_completed(&mut self, video_id: u32) {
    if self.ctx.is_none() {
      return;
    }
    self.map.insert(video_id, 100.0);
    self.persist().await;
  }

  /// Direct user action: reset to 0 and, if this video is the loaded one,
  /// rewind and pause the player.
  pub async fn mark_not_started(&mut self, video_id: u32) {
    if self.ctx.is_none() {
      return;
    }
    self.map.insert(video_id, 0.0);
    self.persist().await;

    if self.active_video == Some(video_id) {
      let _ = self.player_tx.send(PlayerCommand::Seek(0.0));
      let _ = self.player_tx.send(PlayerCommand::Pause);
    }
  }

  /// Rewrite this folder's full map. Write failure is logged and not
  /// retried; the next successful mutation rewrites everything anyway.
  async fn persist(&self) {
    let Some(ref ctx) = self.ctx else { return };
    if let Err(e) = self.store.put_json(&ctx.progress_key(), &self.map).await {
      warn!(folder = %ctx.display_name(), err = %e, "progress: failed to persist map");
    }
  }
}

/// Read a folder's persisted progress map; absent or malformed becomes empty.
pub async fn load_map(store: &KvStore, ctx: &FolderContext) -> HashMap<u32, f64> {
  store.get_json(&ctx.progress_key()).await.unwrap_or_default()
}
