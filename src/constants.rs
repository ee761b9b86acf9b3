//! Application constants loaded from `constants.ron` at compile time.
//!
//! The RON file is embedded via `include_str!` so it's always available —
//! no runtime file I/O. Parsed once on first access via `LazyLock`.

use serde::Deserialize;
use std::sync::LazyLock;

/// All tuneable application constants.
#[derive(Debug, Deserialize)]
pub struct Constants {
  // Progress tracking
  /// Final span of seconds reserved for the 99% → 100% ramp.
  pub completion_window_secs: f64,
  /// Time events below this many seconds are residue from the previous
  /// source and must not count as progress on the new one.
  pub min_track_secs: f64,
  /// Skip persisting changes smaller than this many percentage points…
  pub min_commit_delta_pct: f64,
  /// …unless the value has reached this floor, where every step counts.
  pub commit_floor_pct: f64,

  // Resume
  pub resume_min_pct: f64,
  pub resume_max_pct: f64,

  // Notes
  pub notes_debounce_ms: u64,

  // Thumbnails
  pub thumb_batch_size: usize,
  pub thumb_seek_cap_secs: f64,
  pub thumb_seek_fraction: f64,
  pub thumb_width: u32,

  // Folder scan
  pub video_extensions: Vec<String>,

  // Event loop
  pub poll_interval_ms: u64,
}

static CONSTANTS: LazyLock<Constants> = LazyLock::new(|| {
  // Safety: the RON file is embedded at compile time; if it's malformed this is a build-time error.
  ron::from_str(include_str!("../constants.ron")).expect("constants.ron must be valid RON (embedded at compile time)")
});

/// Returns a reference to the parsed application constants.
pub fn constants() -> &'static Constants {
  &CONSTANTS
}
