//! The playback engine: an mpv process per video, driven over its JSON IPC
//! socket, with a monitor task translating mpv's status line into typed
//! events.
//!
//! Every event carries the `FolderContext` and video id captured at load
//! time, so late events from a superseded session are identifiable (and
//! discarded) downstream.

use anyhow::{Context, Result, anyhow};
use std::process::Stdio;
use tokio::{
  io::BufReader as TokioBufReader,
  io::{AsyncBufReadExt, AsyncWriteExt},
  process::{Child as TokioChild, Command},
  sync::mpsc,
  task::JoinHandle,
};
use tracing::info;

use crate::constants::constants;
use crate::library::VideoRef;
use crate::session::FolderContext;

/// Instructions for the playback engine, sent by the progress tracker.
#[derive(Debug, Clone, Copy, PartialEq)]
pub enum PlayerCommand {
  Seek(f64),
  Pause,
}

/// Notifications from the playback engine.
pub enum PlayerEvent {
  /// Elapsed time advanced. `duration` may be 0 while mpv is still probing.
  Time { ctx: FolderContext, video_id: u32, current: f64, duration: f64 },
  /// Playback reached the end of the file.
  Ended { ctx: FolderContext, video_id: u32 },
  /// mpv exited before reaching the end (window closed, playback failed).
  Stopped { ctx: FolderContext, video_id: u32 },
}

/// Status line format requested from mpv: raw time-pos and duration,
/// tab-separated. `${=...}` yields unformatted numeric values.
const STATUS_MSG: &str = "--term-status-msg=${=time-pos}\t${=duration}";

/// Parse one mpv status line into (current, duration) seconds.
fn parse_status_line(line: &str) -> Option<(f64, f64)> {
  let mut parts = line.trim().split('\t');
  let current: f64 = parts.next()?.trim().parse().ok()?;
  let duration: f64 = parts.next()?.trim().parse().ok()?;
  if !current.is_finite() || !duration.is_finite() || current < 0.0 {
    return None;
  }
  Some((current, duration))
}

/// Whether the last observed position counts as the file having ended.
///
/// mpv's stdout closing only means the process exited; a window closed at
/// 10%, or an undecodable file with no status lines at all, must not be
/// reported as completion. Only an exit whose final position reached the
/// completion window is an end of file.
fn reached_end(last_status: Option<(f64, f64)>) -> bool {
  let Some((current, duration)) = last_status else { return false };
  duration > 0.0 && current >= duration - constants().completion_window_secs
}

pub struct Player {
  events_tx: mpsc::UnboundedSender<PlayerEvent>,
  current_process: Option<TokioChild>,
  monitor_handle: Option<JoinHandle<()>>,
  ipc_socket_path: Option<String>,
  current_video: Option<u32>,
  pub paused: bool,
}

impl Player {
  pub fn new(events_tx: mpsc::UnboundedSender<PlayerEvent>) -> Self {
    Self {
      events_tx,
      current_process: None,
      monitor_handle: None,
      ipc_socket_path: None,
      current_video: None,
      paused: false,
    }
  }

  pub fn is_playing(&self) -> bool {
    self.current_process.is_some()
  }

  /// Id of the video currently loaded, if any.
  pub fn current_video(&self) -> Option<u32> {
    self.current_video
  }

  /// Start playing `video`, replacing any previous playback.
  pub async fn load(&mut self, ctx: &FolderContext, video: &VideoRef) -> Result<()> {
    self.stop().await.context("Failed to stop previous playback")?;
    self.paused = false;
    self.current_video = Some(video.id);

    let socket_path = std::env::temp_dir().join(format!("reel-mpv-{}.sock", std::process::id()));
    let socket_path_str = socket_path.to_str().context("Temp dir path is not valid UTF-8")?.to_string();
    // Remove stale socket if it exists from a previous crash.
    let _ = std::fs::remove_file(&socket_path);

    let mut cmd = Command::new("mpv");
    cmd.arg(STATUS_MSG);
    cmd.arg(format!("--input-ipc-server={}", socket_path_str));
    cmd.arg("--force-window=yes");
    cmd.arg(&video.file_path);
    cmd.stdin(Stdio::null());
    cmd.stdout(Stdio::piped());
    // Send stderr to null — if piped but never drained, the pipe buffer
    // fills and mpv blocks.
    cmd.stderr(Stdio::null());

    let mut child = cmd.spawn().map_err(|e| {
      if e.kind() == std::io::ErrorKind::NotFound {
        anyhow!("mpv not found. Install it with: brew install mpv (macOS) or apt install mpv (Linux)")
      } else {
        anyhow!(e).context("Failed to spawn mpv process")
      }
    })?;

    let stdout = child.stdout.take().context("Failed to get mpv stdout")?;
    let tx = self.events_tx.clone();
    let event_ctx = ctx.clone();
    let video_id = video.id;

    let monitor_handle = tokio::spawn(async move {
      let reader = TokioBufReader::new(stdout);
      let mut lines = reader.lines();
      let mut last_status = None;
      while let Ok(Some(line)) = lines.next_line().await {
        if let Some((current, duration)) = parse_status_line(&line) {
          last_status = Some((current, duration));
          if tx.send(PlayerEvent::Time { ctx: event_ctx.clone(), video_id, current, duration }).is_err() {
            return;
          }
        }
      }
      // stdout closed: mpv exited on its own. A manual stop() aborts this
      // task first, so nothing is sent for superseded playback.
      let event = if reached_end(last_status) {
        PlayerEvent::Ended { ctx: event_ctx, video_id }
      } else {
        PlayerEvent::Stopped { ctx: event_ctx, video_id }
      };
      let _ = tx.send(event);
    });

    info!(video = video_id, file = %video.file_path.display(), "player: mpv started");
    self.current_process = Some(child);
    self.monitor_handle = Some(monitor_handle);
    self.ipc_socket_path = Some(socket_path_str);
    Ok(())
  }

  /// Send one JSON command line over the IPC socket.
  async fn send_ipc(&self, command: serde_json::Value) -> Result<()> {
    let Some(ref socket_path) = self.ipc_socket_path else {
      return Ok(());
    };
    let mut stream =
      tokio::net::UnixStream::connect(socket_path).await.context("Failed to connect to mpv IPC socket")?;
    let mut payload = serde_json::to_vec(&serde_json::json!({ "command": command }))
      .context("Failed to encode mpv IPC command")?;
    payload.push(b'\n');
    stream.write_all(&payload).await.context("Failed to send command to mpv IPC socket")?;
    Ok(())
  }

  /// Seek to an absolute position in seconds.
  pub async fn seek(&self, secs: f64) -> Result<()> {
    self.send_ipc(serde_json::json!(["seek", secs, "absolute"])).await
  }

  /// Pause playback (idempotent).
  pub async fn pause(&mut self) -> Result<()> {
    self.send_ipc(serde_json::json!(["set_property", "pause", true])).await?;
    self.paused = true;
    Ok(())
  }

  pub async fn toggle_pause(&mut self) -> Result<()> {
    self.send_ipc(serde_json::json!(["cycle", "pause"])).await?;
    self.paused = !self.paused;
    Ok(())
  }

  pub async fn stop(&mut self) -> Result<()> {
    if let Some(handle) = self.monitor_handle.take() {
      handle.abort();
      let _ = handle.await;
    }

    if let Some(mut child) = self.current_process.take() {
      child.kill().await.context("Failed to kill mpv process")?;
      let _ = child.wait().await;
    }

    self.current_video = None;
    self.paused = false;

    if let Some(path) = self.ipc_socket_path.take() {
      let _ = std::fs::remove_file(&path);
    }
    Ok(())
  }
}
