mod app;
mod config;
mod constants;
mod display;
mod graphics;
mod input;
mod library;
mod notes;
mod player;
mod progress;
mod session;
mod store;
mod theme;
mod thumbs;
mod ui;

use anyhow::{Context, Result};
use clap::Parser;
use ratatui::{
  DefaultTerminal,
  crossterm::event::{self, Event, KeyEventKind},
};
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;
use tracing::{info, warn};

use app::App;
use constants::constants;
use display::{CliDisplayMode, DisplayMode};
use graphics::{decode_thumbnail, kitty_delete_all, kitty_render_image};
use store::KvStore;

// --- CLI ---

#[derive(Parser, Debug)]
#[command(author, version = env!("CARGO_PKG_VERSION"), about, long_about = None)]
struct Args {
  /// Folder of videos to open on startup (otherwise the last opened folder is prefilled)
  folder: Option<PathBuf>,

  /// Display mode: 'auto', 'kitty', 'direct', or 'ascii' (default: auto-detect)
  #[arg(short, long, default_value = "auto")]
  display_mode: CliDisplayMode,

  /// Override the state directory (watch progress, notes, thumbnails)
  #[arg(long)]
  state_dir: Option<PathBuf>,
}

// --- Logging ---

/// File-based logging; stdout belongs to the TUI. The returned guard must
/// stay alive for the duration of the program or buffered lines are lost.
fn init_logging() -> Result<tracing_appender::non_blocking::WorkerGuard> {
  let proj_dirs = directories::ProjectDirs::from("", "", "reel").context("Could not determine home directory")?;
  let log_dir = proj_dirs.data_dir().join("logs");
  std::fs::create_dir_all(&log_dir).with_context(|| format!("Failed to create log dir {}", log_dir.display()))?;

  let file_appender = tracing_appender::rolling::daily(log_dir, "reel.log");
  let (non_blocking, guard) = tracing_appender::non_blocking(file_appender);
  tracing_subscriber::fmt()
    .with_env_filter(tracing_subscriber::EnvFilter::try_from_default_env().unwrap_or_else(|_| "reel=info".into()))
    .with_writer(non_blocking)
    .with_ansi(false)
    .init();
  Ok(guard)
}

// --- Main ---

#[tokio::main]
async fn main() -> Result<()> {
  let args = Args::parse();
  let _log_guard = init_logging()?;

  let default_hook = std::panic::take_hook();
  std::panic::set_hook(Box::new(move |info| {
    ratatui::restore();
    default_hook(info);
  }));

  let mut terminal = ratatui::init();
  let result = run(&mut terminal, args).await;
  ratatui::restore();
  result
}

async fn run(terminal: &mut DefaultTerminal, args: Args) -> Result<()> {
  let display_mode = display::resolve_display_mode(args.display_mode);
  let store_root = match args.state_dir {
    Some(dir) => dir,
    None => KvStore::default_root()?,
  };
  let store = Arc::new(KvStore::open(&store_root)?);
  info!(store = %store_root.display(), mode = ?display_mode, "reel starting");

  let mut app = App::new(store);
  if let Some(folder) = args.folder {
    app.input = folder.to_string_lossy().into_owned();
    app.cursor_position = app.input.chars().count();
    app.open_folder().await;
  }

  let poll_interval = Duration::from_millis(constants().poll_interval_ms);

  loop {
    app.check_pending().await?;
    refresh_decoded_thumb(&mut app);

    terminal.draw(|frame| ui::ui(frame, &mut app, display_mode))?;

    if display_mode == DisplayMode::Kitty {
      if let Some(area) = app.gfx.thumb_area {
        if let Some((id, ref image)) = app.gfx.decoded {
          let key = (id, area);
          if app.gfx.last_sent != Some(key) {
            kitty_delete_all()?;
            kitty_render_image(image, area)?;
            app.gfx.last_sent = Some(key);
          }
        }
      } else if app.gfx.last_sent.is_some() {
        kitty_delete_all()?;
        app.gfx.last_sent = None;
      }
    }

    if event::poll(poll_interval)? {
      match event::read()? {
        Event::Key(key) if key.kind == KeyEventKind::Press => {
          input::handle_key_event(&mut app, key).await?;
        }
        _ => {}
      }
    }

    if app.should_quit {
      break;
    }
  }

  if display_mode == DisplayMode::Kitty {
    kitty_delete_all()?;
  }
  app.shutdown().await;
  Ok(())
}

/// Keep `gfx.decoded` in sync with the selected video, decoding its cached
/// thumbnail at most once per id.
fn refresh_decoded_thumb(app: &mut App) {
  match app.selected_video().map(|v| (v.id, v.thumbnail.clone())) {
    Some((id, Some(data))) => {
      let already = app.gfx.decoded.as_ref().map(|(cid, _)| *cid) == Some(id);
      if !already && app.gfx.decode_failed != Some(id) {
        match decode_thumbnail(&data) {
          Ok(img) => {
            app.gfx.decoded = Some((id, img));
            app.gfx.decode_failed = None;
          }
          Err(e) => {
            warn!(video = id, err = %e, "thumbs: cached entry failed to decode");
            app.gfx.decoded = None;
            app.gfx.decode_failed = Some(id);
          }
        }
      }
    }
    _ => {
      app.gfx.decoded = None;
    }
  }
}
