use anyhow::Result;
use image::DynamicImage;
use ratatui::{layout::Rect, widgets::ListState};
use std::collections::HashMap;
use std::path::PathBuf;
use std::sync::Arc;
use std::time::{Duration, Instant};
use tokio::sync::{mpsc, oneshot};
use tracing::{debug, info, warn};

use crate::config::Config;
use crate::constants::constants;
use crate::library::{self, VideoRef};
use crate::notes::{self, NotesStore};
use crate::player::{Player, PlayerCommand, PlayerEvent};
use crate::progress::{self, ProgressTracker};
use crate::session::FolderContext;
use crate::store::KvStore;
use crate::theme::THEMES;
use crate::thumbs::{FfmpegGrabber, ThumbUpdate, ThumbnailCache, merge_thumbnails};

// --- Types ---

/// Everything a folder open produces, tagged with the context it was
/// started under. Installed only if that context is still current.
pub struct LoadedFolder {
  pub ctx: FolderContext,
  pub videos: Vec<VideoRef>,
  pub progress: HashMap<u32, f64>,
  pub notes: HashMap<u32, String>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AppMode {
  FolderInput,
  Browse,
  Notes,
}

/// Terminal graphics protocol rendering state (Kitty/half-block).
#[derive(Default)]
pub struct GraphicsCache {
  pub thumb_area: Option<Rect>,
  pub last_sent: Option<(u32, Rect)>,
  pub resized_thumb: Option<(u32, u16, u16, DynamicImage)>,
  /// Decoded thumbnail for the selected video, keyed by id.
  pub decoded: Option<(u32, DynamicImage)>,
  /// Id whose cached entry failed to decode, so it is not retried every tick.
  pub decode_failed: Option<u32>,
}

/// In-flight async task receivers.
#[derive(Default)]
pub(crate) struct AsyncTasks {
  pub(crate) load_rx: Option<oneshot::Receiver<Result<LoadedFolder>>>,
}

// --- Helpers ---

/// Stored percentages strictly inside the resume band qualify for
/// pick-up-where-you-left-off. Below it the video is effectively untouched;
/// above it it is effectively finished, and both restart from zero.
pub fn should_resume(percent: f64) -> bool {
  percent > constants().resume_min_pct && percent < constants().resume_max_pct
}

/// Absolute seek target for a resumable percent, once the duration is known.
pub fn resume_position(percent: f64, duration: f64) -> Option<f64> {
  (should_resume(percent) && duration > 0.0).then(|| duration * percent / 100.0)
}

/// Id of the video following `after` in playlist order, if any.
pub fn next_video_id(videos: &[VideoRef], after: u32) -> Option<u32> {
  let pos = videos.iter().position(|v| v.id == after)?;
  videos.get(pos + 1).map(|v| v.id)
}

/// Expand a leading `~` to the user's home directory.
pub fn expand_tilde(raw: &str) -> PathBuf {
  if let Some(rest) = raw.strip_prefix("~")
    && (rest.is_empty() || rest.starts_with('/'))
    && let Some(base) = directories::BaseDirs::new()
  {
    return base.home_dir().join(rest.trim_start_matches('/'));
  }
  PathBuf::from(raw)
}

// --- App State ---

pub struct App {
  pub input: String,
  pub cursor_position: usize,
  pub input_scroll: usize,
  pub mode: AppMode,
  pub theme_index: usize,
  /// The folder whose videos are (being) displayed. Every async result is
  /// checked against this before it is allowed to touch app state.
  pub ctx: Option<FolderContext>,
  pub videos: Vec<VideoRef>,
  pub list_state: ListState,
  pub player: Player,
  pub tracker: ProgressTracker,
  pub notes: NotesStore,
  store: Arc<KvStore>,
  thumbs: ThumbnailCache<FfmpegGrabber>,
  thumb_tx: mpsc::UnboundedSender<ThumbUpdate>,
  thumb_rx: mpsc::UnboundedReceiver<ThumbUpdate>,
  events_rx: mpsc::UnboundedReceiver<PlayerEvent>,
  cmd_rx: mpsc::UnboundedReceiver<PlayerCommand>,
  pub(crate) tasks: AsyncTasks,
  /// Set when playback starts on a partially-watched video; the seek fires
  /// on the first time event that reports a usable duration.
  pending_resume: Option<(u32, f64)>,
  pub notes_input: String,
  pub notes_cursor: usize,
  notes_video: Option<u32>,
  pub last_error: Option<String>,
  pub status_message: Option<String>,
  pub should_quit: bool,
  pub gfx: GraphicsCache,
  /// When the last error was set, for auto-dismiss after 5 seconds.
  error_time: Option<Instant>,
}

impl App {
  pub fn new(store: Arc<KvStore>) -> Self {
    let config = Config::load();
    let theme_index =
      if let Some(ref name) = config.theme_name { THEMES.iter().position(|t| t.name == name).unwrap_or(0) } else { 0 };
    let input = config.last_folder.unwrap_or_default();
    let cursor_position = input.chars().count();

    let (events_tx, events_rx) = mpsc::unbounded_channel();
    let (cmd_tx, cmd_rx) = mpsc::unbounded_channel();
    let (thumb_tx, thumb_rx) = mpsc::unbounded_channel();

    Self {
      input,
      cursor_position,
      input_scroll: 0,
      mode: AppMode::FolderInput,
      theme_index,
      ctx: None,
      videos: Vec::new(),
      list_state: ListState::default(),
      player: Player::new(events_tx),
      tracker: ProgressTracker::new(Arc::clone(&store), cmd_tx),
      notes: NotesStore::new(Arc::clone(&store)),
      thumbs: ThumbnailCache::new(Arc::clone(&store), FfmpegGrabber),
      store,
      thumb_tx,
      thumb_rx,
      events_rx,
      cmd_rx,
      tasks: AsyncTasks::default(),
      pending_resume: None,
      notes_input: String::new(),
      notes_cursor: 0,
      notes_video: None,
      last_error: None,
      status_message: None,
      should_quit: false,
      gfx: GraphicsCache::default(),
      error_time: None,
    }
  }

  pub fn theme(&self) -> &'static crate::theme::Theme {
    &THEMES[self.theme_index]
  }

  pub fn next_theme(&mut self) {
    self.theme_index = (self.theme_index + 1) % THEMES.len();
    self.save_config();
  }

  /// Set an error message with auto-dismiss tracking.
  pub fn set_error(&mut self, msg: String) {
    self.last_error = Some(msg);
    self.error_time = Some(Instant::now());
  }

  pub fn clear_error(&mut self) {
    self.last_error = None;
    self.error_time = None;
  }

  /// Clear stale error messages after 5 seconds.
  pub fn expire_error(&mut self) {
    if let Some(t) = self.error_time
      && t.elapsed() >= Duration::from_secs(5)
    {
      self.last_error = None;
      self.error_time = None;
    }
  }

  fn save_config(&self) {
    let config = Config {
      theme_name: Some(self.theme().name.to_string()),
      last_folder: self.ctx.as_ref().map(|c| c.path().to_string_lossy().into_owned()),
    };
    config.save();
  }

  pub fn selected_video(&self) -> Option<&VideoRef> {
    self.videos.get(self.list_state.selected()?)
  }

  fn select_video(&mut self, id: u32) {
    if let Some(pos) = self.videos.iter().position(|v| v.id == id) {
      self.list_state.select(Some(pos));
    }
  }

  // --- Folder switching ---

  /// Switch to the folder named in the input field.
  ///
  /// The identity swap is synchronous: the context, the tracker and the
  /// notes store all change folder before the first await, so nothing
  /// queued for the old folder can be mistaken for the new one. The scan
  /// and persisted-state reads then run in the background.
  pub async fn open_folder(&mut self) {
    let raw = self.input.trim().to_string();
    if raw.is_empty() {
      self.set_error("Enter a folder path.".to_string());
      return;
    }
    let path = expand_tilde(&raw);
    let ctx = FolderContext::new(&path);
    info!(folder = %ctx.display_name(), "folder: opening");

    if let Err(e) = self.player.stop().await {
      warn!(err = %e, "folder: failed to stop playback on switch");
    }
    self.tracker.set_active_video(None);
    self.pending_resume = None;
    self.notes_video = None;

    self.tracker.set_context(Some(ctx.clone()));
    self.notes.set_context(Some(ctx.clone()));
    self.ctx = Some(ctx.clone());
    self.videos.clear();
    self.list_state.select(None);
    self.gfx = GraphicsCache::default();
    self.clear_error();
    self.status_message = Some(format!("Scanning {}…", ctx.display_name()));
    self.tasks.load_rx = None;

    let store = Arc::clone(&self.store);
    let (tx, rx) = oneshot::channel();
    tokio::spawn(async move {
      let result = async {
        let videos = library::scan_folder_nonempty(ctx.path())?;
        let progress = progress::load_map(&store, &ctx).await;
        let notes = notes::load_map(&store, &ctx).await;
        Ok(LoadedFolder { ctx, videos, progress, notes })
      }
      .await;
      let _ = tx.send(result);
    });
    self.tasks.load_rx = Some(rx);
  }

  fn install_folder(&mut self, loaded: LoadedFolder) {
    info!(folder = %loaded.ctx.display_name(), videos = loaded.videos.len(), "folder: loaded");
    self.tracker.install_loaded(&loaded.ctx, loaded.progress);
    self.notes.install_loaded(&loaded.ctx, loaded.notes);
    self.videos = loaded.videos;
    self.list_state.select(Some(0));
    self.mode = AppMode::Browse;
    self.save_config();

    // Thumbnails stream in batch by batch through thumb_rx. The spawned
    // task is not cancelled on folder switch; the context tag on each
    // batch keeps stale results out, and the cache entries it writes are
    // still useful next time the folder is opened.
    let cache = self.thumbs.clone();
    let ctx = loaded.ctx;
    let videos = self.videos.clone();
    let tx = self.thumb_tx.clone();
    tokio::spawn(async move {
      cache.ensure_thumbnails(&ctx, videos, &tx).await;
    });
  }

  // --- Event loop tick ---

  pub async fn check_pending(&mut self) -> Result<()> {
    if let Some(mut rx) = self.tasks.load_rx.take() {
      match rx.try_recv() {
        Ok(result) => {
          self.status_message = None;
          match result {
            Ok(loaded) => {
              if self.ctx.as_ref() == Some(&loaded.ctx) {
                self.install_folder(loaded);
              } else {
                debug!(folder = %loaded.ctx.display_name(), "folder: discarding superseded load result");
              }
            }
            Err(e) => {
              self.set_error(format!("Failed to open folder: {:#}", e));
            }
          }
        }
        Err(oneshot::error::TryRecvError::Empty) => {
          self.tasks.load_rx = Some(rx);
        }
        Err(oneshot::error::TryRecvError::Closed) => {
          self.status_message = None;
          self.set_error("Folder load task failed.".to_string());
        }
      }
    }

    // Thumbnail batches, possibly from a superseded folder
    let mut thumbs_merged = false;
    while let Ok(update) = self.thumb_rx.try_recv() {
      if self.ctx.as_ref() == Some(&update.ctx) {
        merge_thumbnails(&mut self.videos, &update.thumbs);
        thumbs_merged = true;
      } else {
        debug!(folder = %update.ctx.display_name(), "thumbs: discarding batch for superseded folder");
      }
    }
    if thumbs_merged {
      // Re-decode so a fresh thumbnail replaces the placeholder.
      self.gfx.decoded = None;
      self.gfx.resized_thumb = None;
      self.gfx.last_sent = None;
    }

    // Instructions the tracker issued (rewind + pause on reset)
    while let Ok(cmd) = self.cmd_rx.try_recv() {
      let result = match cmd {
        PlayerCommand::Seek(secs) => self.player.seek(secs).await,
        PlayerCommand::Pause => self.player.pause().await,
      };
      if let Err(e) = result {
        warn!(?cmd, err = %e, "player: command failed");
      }
    }

    while let Ok(event) = self.events_rx.try_recv() {
      self.handle_player_event(event).await;
    }

    self.expire_error();
    Ok(())
  }

  async fn handle_player_event(&mut self, event: PlayerEvent) {
    match event {
      PlayerEvent::Time { ctx, video_id, current, duration } => {
        if self.ctx.as_ref() != Some(&ctx) {
          debug!(video = video_id, "player: discarding time event for superseded folder");
          return;
        }
        if let Some((id, pct)) = self.pending_resume
          && id == video_id
          && let Some(target) = resume_position(pct, duration)
        {
          info!(video = video_id, target, "player: resuming at stored position");
          if let Err(e) = self.player.seek(target).await {
            warn!(err = %e, "player: resume seek failed");
          }
          self.pending_resume = None;
        }
        self.tracker.on_time_advanced(&ctx, video_id, current, duration).await;
      }
      PlayerEvent::Ended { ctx, video_id } => {
        if self.ctx.as_ref() != Some(&ctx) {
          debug!(video = video_id, "player: discarding end event for superseded folder");
          return;
        }
        info!(video = video_id, "player: playback finished");
        self.tracker.mark_completed(video_id).await;
        let _ = self.player.stop().await;
        self.tracker.set_active_video(None);
        self.pending_resume = None;
        if let Some(next) = next_video_id(&self.videos, video_id) {
          self.select_video(next);
          self.trigger_play().await;
        }
      }
      PlayerEvent::Stopped { ctx, video_id } => {
        if self.ctx.as_ref() != Some(&ctx) {
          debug!(video = video_id, "player: discarding stop event for superseded folder");
          return;
        }
        // Not a completion: the window was closed mid-video, or the file
        // never played at all. Progress stays whatever the time events
        // committed, and the playlist does not advance.
        info!(video = video_id, "player: playback stopped before the end");
        let _ = self.player.stop().await;
        self.tracker.set_active_video(None);
        self.pending_resume = None;
      }
    }
  }

  // --- Playback ---

  pub async fn trigger_play(&mut self) {
    let Some(ctx) = self.ctx.clone() else { return };
    let Some(video) = self.selected_video().cloned() else { return };
    self.clear_error();

    let pct = self.tracker.percent(video.id);
    self.pending_resume = should_resume(pct).then_some((video.id, pct));
    self.tracker.set_active_video(Some(video.id));

    if let Err(e) = self.player.load(&ctx, &video).await {
      self.set_error(format!("Playback error: {:#}", e));
      self.tracker.set_active_video(None);
      self.pending_resume = None;
      let _ = self.player.stop().await;
    }
  }

  pub async fn stop_playback(&mut self) -> Result<()> {
    self.player.stop().await?;
    self.tracker.set_active_video(None);
    self.pending_resume = None;
    Ok(())
  }

  /// Mark the selected video fully watched without playing it.
  pub async fn mark_selected_completed(&mut self) {
    if let Some(id) = self.selected_video().map(|v| v.id) {
      self.tracker.mark_completed(id).await;
    }
  }

  /// Reset the selected video to unwatched. If it is currently playing, the
  /// tracker also rewinds and pauses it (the commands land on the next tick).
  pub async fn mark_selected_not_started(&mut self) {
    if let Some(id) = self.selected_video().map(|v| v.id) {
      self.tracker.mark_not_started(id).await;
    }
  }

  // --- Notes ---

  pub fn open_notes(&mut self) {
    let Some(id) = self.selected_video().map(|v| v.id) else { return };
    self.notes_video = Some(id);
    self.notes_input = self.notes.note(id).to_string();
    self.notes_cursor = self.notes_input.chars().count();
    self.mode = AppMode::Notes;
  }

  /// Push the current editor buffer into the (debounced) notes store.
  pub fn notes_changed(&mut self) {
    if let Some(id) = self.notes_video {
      self.notes.update_note(id, self.notes_input.clone());
    }
  }

  pub fn close_notes(&mut self) {
    self.notes_video = None;
    self.mode = AppMode::Browse;
  }

  // --- Shutdown ---

  /// Flush debounced state and stop playback. Progress needs no flush; it
  /// is persisted as it changes.
  pub async fn shutdown(&mut self) {
    self.notes.flush().await;
    if let Err(e) = self.player.stop().await {
      warn!(err = %e, "shutdown: failed to stop playback");
    }
  }
}

#[cfg(test)]
mod tests {
  use super::*;
  use std::path::Path;

  // --- resume bounds ---

  #[test]
  fn resume_band_is_exclusive() {
    assert!(!should_resume(0.0));
    assert!(!should_resume(1.0));
    assert!(should_resume(1.1));
    assert!(should_resume(50.0));
    assert!(should_resume(98.9));
    assert!(!should_resume(99.0));
    assert!(!should_resume(100.0));
  }

  #[test]
  fn resume_position_scales_by_duration() {
    assert_eq!(resume_position(50.0, 200.0), Some(100.0));
    assert_eq!(resume_position(50.0, 0.0), None); // duration not yet known
    assert_eq!(resume_position(100.0, 200.0), None);
  }

  // --- next_video_id ---

  fn video(id: u32) -> VideoRef {
    VideoRef { id, title: format!("v{}", id), file_path: PathBuf::from(format!("/v/{}.mp4", id)), thumbnail: None }
  }

  #[test]
  fn next_video_follows_list_order() {
    let videos = vec![video(1), video(2), video(3)];
    assert_eq!(next_video_id(&videos, 1), Some(2));
    assert_eq!(next_video_id(&videos, 2), Some(3));
    assert_eq!(next_video_id(&videos, 3), None); // last video
    assert_eq!(next_video_id(&videos, 9), None); // unknown id
  }

  // --- expand_tilde ---

  #[test]
  fn expand_tilde_leaves_plain_paths() {
    assert_eq!(expand_tilde("/videos/rust"), PathBuf::from("/videos/rust"));
    assert_eq!(expand_tilde("relative/dir"), PathBuf::from("relative/dir"));
  }

  #[test]
  fn expand_tilde_only_expands_leading_component() {
    assert_eq!(expand_tilde("/videos/~backup"), PathBuf::from("/videos/~backup"));
    assert_eq!(expand_tilde("~user/x"), PathBuf::from("~user/x"));
  }

  // --- open_folder / check_pending ---

  async fn test_app(store_dir: &Path) -> App {
    let store = Arc::new(KvStore::open(store_dir).expect("open store"));
    App::new(store)
  }

  async fn settle(app: &mut App) {
    // Poll until the background folder load lands, as the run loop would.
    for _ in 0..100 {
      app.check_pending().await.expect("check_pending");
      if app.tasks.load_rx.is_none() {
        return;
      }
      tokio::time::sleep(Duration::from_millis(10)).await;
    }
    panic!("folder load did not complete");
  }

  #[tokio::test]
  async fn open_folder_installs_scanned_videos() {
    let store_dir = tempfile::tempdir().expect("tempdir");
    let folder = tempfile::tempdir().expect("tempdir");
    std::fs::write(folder.path().join("a.mp4"), b"x").expect("write");
    std::fs::write(folder.path().join("b.mkv"), b"x").expect("write");

    let mut app = test_app(store_dir.path()).await;
    app.input = folder.path().to_string_lossy().into_owned();
    app.open_folder().await;
    settle(&mut app).await;

    assert_eq!(app.mode, AppMode::Browse);
    assert_eq!(app.videos.len(), 2);
    assert_eq!(app.list_state.selected(), Some(0));
    assert!(app.status_message.is_none());
  }

  #[tokio::test]
  async fn open_folder_reports_empty_folder() {
    let store_dir = tempfile::tempdir().expect("tempdir");
    let folder = tempfile::tempdir().expect("tempdir");

    let mut app = test_app(store_dir.path()).await;
    app.input = folder.path().to_string_lossy().into_owned();
    app.open_folder().await;
    settle(&mut app).await;

    assert_eq!(app.mode, AppMode::FolderInput);
    assert!(app.videos.is_empty());
    assert!(app.last_error.is_some());
  }

  #[tokio::test]
  async fn rapid_folder_switch_keeps_only_latest() {
    let store_dir = tempfile::tempdir().expect("tempdir");
    let folder_a = tempfile::tempdir().expect("tempdir");
    std::fs::write(folder_a.path().join("a.mp4"), b"x").expect("write");
    let folder_b = tempfile::tempdir().expect("tempdir");
    std::fs::write(folder_b.path().join("b1.mp4"), b"x").expect("write");
    std::fs::write(folder_b.path().join("b2.mp4"), b"x").expect("write");

    let mut app = test_app(store_dir.path()).await;
    app.input = folder_a.path().to_string_lossy().into_owned();
    app.open_folder().await;
    // Switch again before the first load is drained.
    app.input = folder_b.path().to_string_lossy().into_owned();
    app.open_folder().await;
    settle(&mut app).await;

    assert_eq!(app.ctx.as_ref().map(|c| c.path().to_path_buf()), Some(folder_b.path().to_path_buf()));
    assert_eq!(app.videos.len(), 2);
    assert!(app.videos.iter().all(|v| v.title.starts_with("b")));
  }

  // --- player events ---

  async fn app_with_one_video(store_dir: &Path, folder: &Path) -> App {
    std::fs::write(folder.join("a.mp4"), b"x").expect("write");
    let mut app = test_app(store_dir).await;
    app.input = folder.to_string_lossy().into_owned();
    app.open_folder().await;
    settle(&mut app).await;
    app
  }

  #[tokio::test]
  async fn early_exit_does_not_fabricate_completion() {
    let store_dir = tempfile::tempdir().expect("tempdir");
    let folder = tempfile::tempdir().expect("tempdir");
    let mut app = app_with_one_video(store_dir.path(), folder.path()).await;

    // The mpv window was closed (or the file never decoded) with almost
    // nothing watched.
    let ctx = app.ctx.clone().expect("ctx");
    app.tracker.set_active_video(Some(1));
    app.handle_player_event(PlayerEvent::Stopped { ctx, video_id: 1 }).await;

    assert_eq!(app.tracker.percent(1), 0.0);
    assert_eq!(app.list_state.selected(), Some(0)); // no auto-advance
  }

  #[tokio::test]
  async fn finished_playback_persists_full_progress() {
    let store_dir = tempfile::tempdir().expect("tempdir");
    let folder = tempfile::tempdir().expect("tempdir");
    let mut app = app_with_one_video(store_dir.path(), folder.path()).await;

    let ctx = app.ctx.clone().expect("ctx");
    app.tracker.set_active_video(Some(1));
    app.handle_player_event(PlayerEvent::Ended { ctx, video_id: 1 }).await;

    assert_eq!(app.tracker.percent(1), 100.0);
  }

  #[tokio::test]
  async fn folder_progress_survives_reopen() {
    let store_dir = tempfile::tempdir().expect("tempdir");
    let folder = tempfile::tempdir().expect("tempdir");
    std::fs::write(folder.path().join("a.mp4"), b"x").expect("write");

    let mut app = test_app(store_dir.path()).await;
    app.input = folder.path().to_string_lossy().into_owned();
    app.open_folder().await;
    settle(&mut app).await;
    app.mark_selected_completed().await;
    assert_eq!(app.tracker.percent(1), 100.0);

    // Reopen the same folder in a fresh app backed by the same store.
    let mut app2 = test_app(store_dir.path()).await;
    app2.input = folder.path().to_string_lossy().into_owned();
    app2.open_folder().await;
    settle(&mut app2).await;
    assert_eq!(app2.tracker.percent(1), 100.0);
  }
}
