//! Thumbnail generation and caching.
//!
//! One cache entry per video file path, immutable once written, never
//! evicted (a rename orphans the old entry). Generation is batched to bound
//! concurrent ffmpeg work and de-duplicated through a shared in-flight set
//! so overlapping requests never decode the same file twice.

use anyhow::{Context, Result, anyhow};
use base64::{Engine as _, engine::general_purpose::STANDARD as BASE64};
use std::collections::HashSet;
use std::path::{Path, PathBuf};
use std::process::Stdio;
use std::sync::{Arc, Mutex as StdMutex};
use tokio::process::Command;
use tokio::sync::mpsc;
use tracing::{debug, warn};

use crate::constants::constants;
use crate::library::VideoRef;
use crate::session::{FolderContext, sanitize_key};
use crate::store::KvStore;

/// Storage key for a video file's thumbnail entry.
fn thumb_key(path: &Path) -> String {
  format!("thumb_{}", sanitize_key(&path.to_string_lossy()))
}

/// Where to grab the representative frame: two seconds in, or 15% of the
/// duration for clips too short for that.
pub fn seek_point(duration: f64) -> f64 {
  let cap = constants().thumb_seek_cap_secs;
  let fraction = duration * constants().thumb_seek_fraction;
  cap.min(fraction).max(0.0)
}

/// The frame-extraction seam. The production implementation shells out to
/// ffprobe/ffmpeg; tests substitute a counting fake.
pub trait FrameGrabber: Send + Sync + 'static {
  /// Produce an encoded JPEG for one frame of `path`.
  fn grab(&self, path: &Path) -> impl Future<Output = Result<Vec<u8>>> + Send;
}

/// ffmpeg-based extraction: probe the duration, seek, grab one frame,
/// encode JPEG to stdout. The process exits as soon as the frame is
/// written, so no decode pipeline outlives the probe.
#[derive(Clone)]
pub struct FfmpegGrabber;

async fn probe_duration(path: &Path) -> Result<f64> {
  let output = Command::new("ffprobe")
    .args(["-v", "error", "-show_entries", "format=duration", "-of", "csv=p=0"])
    .arg(path)
    .stdin(Stdio::null())
    .stdout(Stdio::piped())
    .stderr(Stdio::null())
    .output()
    .await
    .map_err(|e| {
      if e.kind() == std::io::ErrorKind::NotFound {
        anyhow!("ffprobe not found. Install it with: brew install ffmpeg (macOS) or apt install ffmpeg (Linux)")
      } else {
        anyhow!(e).context("Failed to run ffprobe")
      }
    })?;

  if !output.status.success() {
    anyhow::bail!("ffprobe failed with status {}", output.status);
  }
  let text = String::from_utf8(output.stdout).context("ffprobe output non-UTF8")?;
  text.trim().parse::<f64>().context("ffprobe returned an unparseable duration")
}

impl FrameGrabber for FfmpegGrabber {
  fn grab(&self, path: &Path) -> impl Future<Output = Result<Vec<u8>>> + Send {
    let path = path.to_path_buf();
    async move {
      let duration = probe_duration(&path).await?;
      let seek = seek_point(duration);

      let scale = format!("scale={}:-2", constants().thumb_width);
      let output = Command::new("ffmpeg")
        .args(["-ss", &format!("{:.3}", seek), "-i"])
        .arg(&path)
        .args(["-frames:v", "1", "-vf", &scale, "-f", "image2", "-c:v", "mjpeg", "pipe:1"])
        .stdin(Stdio::null())
        .stdout(Stdio::piped())
        .stderr(Stdio::null())
        .output()
        .await
        .map_err(|e| {
          if e.kind() == std::io::ErrorKind::NotFound {
            anyhow!("ffmpeg not found. Install it with: brew install ffmpeg (macOS) or apt install ffmpeg (Linux)")
          } else {
            anyhow!(e).context("Failed to run ffmpeg frame grab")
          }
        })?;

      if !output.status.success() {
        anyhow::bail!("ffmpeg frame grab failed with status {}", output.status);
      }
      if output.stdout.is_empty() {
        // Zero-size frame or a stream ffmpeg could decode nothing from.
        anyhow::bail!("ffmpeg produced no frame data for {}", path.display());
      }
      Ok(output.stdout)
    }
  }
}

/// A batch of freshly generated/loaded thumbnails, tagged with the folder
/// context the request was started under so stale batches can be discarded.
pub struct ThumbUpdate {
  pub ctx: FolderContext,
  /// (video id, base64 JPEG) pairs. Merge is keyed by id and idempotent.
  pub thumbs: Vec<(u32, String)>,
}

pub struct ThumbnailCache<G: FrameGrabber> {
  store: Arc<KvStore>,
  grabber: Arc<G>,
  in_flight: Arc<StdMutex<HashSet<PathBuf>>>,
}

impl<G: FrameGrabber> Clone for ThumbnailCache<G> {
  fn clone(&self) -> Self {
    Self {
      store: Arc::clone(&self.store),
      grabber: Arc::clone(&self.grabber),
      in_flight: Arc::clone(&self.in_flight),
    }
  }
}

impl<G: FrameGrabber> ThumbnailCache<G> {
  pub fn new(store: Arc<KvStore>, grabber: G) -> Self {
    Self { store, grabber: Arc::new(grabber), in_flight: Arc::new(StdMutex::new(HashSet::new())) }
  }

  /// Return `videos` with thumbnails populated where available.
  ///
  /// Entries already carrying a thumbnail pass through untouched; entries
  /// whose path another call is already processing are skipped (that call
  /// will produce the cache entry). The rest are processed in fixed-size
  /// batches; each batch's successes are merged into the returned list and
  /// also sent through `updates` so partial progress is visible before the
  /// whole set completes. Per-item failures are logged and leave that video
  /// without a thumbnail.
  pub async fn ensure_thumbnails(
    &self,
    ctx: &FolderContext,
    videos: Vec<VideoRef>,
    updates: &mpsc::UnboundedSender<ThumbUpdate>,
  ) -> Vec<VideoRef> {
    let mut out = videos;

    // Claim work under the in-flight set. The lock is never held across an
    // await; it only guards this membership test.
    let todo: Vec<(u32, PathBuf)> = {
      let mut in_flight = self.in_flight.lock().expect("in-flight set mutex poisoned");
      out
        .iter()
        .filter(|v| v.thumbnail.is_none())
        .filter(|v| in_flight.insert(v.file_path.clone()))
        .map(|v| (v.id, v.file_path.clone()))
        .collect()
    };

    if todo.is_empty() {
      return out;
    }
    debug!(folder = %ctx.display_name(), count = todo.len(), "thumbs: generating missing thumbnails");

    for batch in todo.chunks(constants().thumb_batch_size) {
      let results = futures::future::join_all(batch.iter().map(|(id, path)| {
        let cache = self.clone();
        async move {
          let result = cache.thumbnail_for(path).await;
          // Release the claim as soon as this item is done, hit or miss.
          cache.in_flight.lock().expect("in-flight set mutex poisoned").remove(path);
          match result {
            Ok(data) => Some((*id, data)),
            Err(e) => {
              warn!(path = %path.display(), err = %e, "thumbs: extraction failed, leaving video without thumbnail");
              None
            }
          }
        }
      }))
      .await;

      let produced: Vec<(u32, String)> = results.into_iter().flatten().collect();
      if produced.is_empty() {
        continue;
      }
      merge_thumbnails(&mut out, &produced);
      let _ = updates.send(ThumbUpdate { ctx: ctx.clone(), thumbs: produced });
    }

    out
  }

  /// Cache lookup, falling back to frame extraction on a miss. Store read
  /// failure counts as a miss; store write failure is logged and the
  /// freshly generated thumbnail is still returned.
  async fn thumbnail_for(&self, path: &Path) -> Result<String> {
    let key = thumb_key(path);
    if let Some(bytes) = self.store.get(&key).await {
      let cached = String::from_utf8(bytes).context("cached thumbnail is not valid base64 text")?;
      return Ok(cached);
    }

    let jpeg = self.grabber.grab(path).await?;
    let encoded = BASE64.encode(&jpeg);
    if let Err(e) = self.store.put(&key, encoded.as_bytes()).await {
      warn!(path = %path.display(), err = %e, "thumbs: cache write failed");
    }
    Ok(encoded)
  }
}

/// Merge generated thumbnails into a working list by video id. Idempotent
/// and independent of arrival order.
pub fn merge_thumbnails(videos: &mut [VideoRef], thumbs: &[(u32, String)]) {
  for (id, data) in thumbs {
    if let Some(video) = videos.iter_mut().find(|v| v.id == *id) {
      video.thumbnail = Some(data.clone());
    }
  }
}

#[cfg(test)]
mod tests {
  use super::*;
  use std::sync::atomic::{AtomicUsize, Ordering};
  use std::time::Duration;

  // --- seek_point ---

  #[test]
  fn seek_point_caps_at_two_seconds() {
    assert_eq!(seek_point(100.0), 2.0);
  }

  #[test]
  fn seek_point_uses_fraction_for_short_clips() {
    assert!((seek_point(10.0) - 1.5).abs() < 1e-9); // 15% of 10s
  }

  #[test]
  fn seek_point_never_negative() {
    assert_eq!(seek_point(0.0), 0.0);
  }

  // --- ThumbnailCache ---

  /// Fake extractor that counts invocations and tracks peak concurrency.
  struct FakeGrabber {
    calls: AtomicUsize,
    running: AtomicUsize,
    peak: AtomicUsize,
    delay: Duration,
  }

  impl FakeGrabber {
    fn new(delay: Duration) -> Self {
      Self { calls: AtomicUsize::new(0), running: AtomicUsize::new(0), peak: AtomicUsize::new(0), delay }
    }
  }

  impl FrameGrabber for Arc<FakeGrabber> {
    fn grab(&self, path: &Path) -> impl Future<Output = Result<Vec<u8>>> + Send {
      let this = Arc::clone(self);
      let name = path.display().to_string();
      async move {
        this.calls.fetch_add(1, Ordering::SeqCst);
        let now = this.running.fetch_add(1, Ordering::SeqCst) + 1;
        this.peak.fetch_max(now, Ordering::SeqCst);
        tokio::time::sleep(this.delay).await;
        this.running.fetch_sub(1, Ordering::SeqCst);
        Ok(format!("frame:{}", name).into_bytes())
      }
    }
  }

  fn video(id: u32, path: &str) -> VideoRef {
    VideoRef { id, title: format!("v{}", id), file_path: PathBuf::from(path), thumbnail: None }
  }

  fn cache_with(
    delay: Duration,
  ) -> (tempfile::TempDir, Arc<KvStore>, Arc<FakeGrabber>, ThumbnailCache<Arc<FakeGrabber>>) {
    let dir = tempfile::tempdir().expect("tempdir");
    let store = Arc::new(KvStore::open(dir.path()).expect("open store"));
    let grabber = Arc::new(FakeGrabber::new(delay));
    let cache = ThumbnailCache::new(Arc::clone(&store), Arc::clone(&grabber));
    (dir, store, grabber, cache)
  }

  fn ctx() -> FolderContext {
    FolderContext::new(Path::new("/tmp/videos"))
  }

  fn sink() -> (mpsc::UnboundedSender<ThumbUpdate>, mpsc::UnboundedReceiver<ThumbUpdate>) {
    mpsc::unbounded_channel()
  }

  #[tokio::test]
  async fn generates_and_fills_missing_thumbnails() {
    let (_dir, _store, grabber, cache) = cache_with(Duration::ZERO);
    let (tx, mut rx) = sink();
    let out = cache.ensure_thumbnails(&ctx(), vec![video(1, "/v/a.mp4"), video(2, "/v/b.mp4")], &tx).await;

    assert!(out.iter().all(|v| v.thumbnail.is_some()));
    assert_eq!(grabber.calls.load(Ordering::SeqCst), 2);
    let update = rx.try_recv().expect("one batch update");
    assert_eq!(update.thumbs.len(), 2);
  }

  #[tokio::test]
  async fn existing_thumbnails_pass_through_untouched() {
    let (_dir, _store, grabber, cache) = cache_with(Duration::ZERO);
    let (tx, _rx) = sink();
    let mut v = video(1, "/v/a.mp4");
    v.thumbnail = Some("already".to_string());

    let out = cache.ensure_thumbnails(&ctx(), vec![v], &tx).await;
    assert_eq!(out[0].thumbnail.as_deref(), Some("already"));
    assert_eq!(grabber.calls.load(Ordering::SeqCst), 0);
  }

  #[tokio::test]
  async fn cache_hit_skips_extraction() {
    let (_dir, store, grabber, cache) = cache_with(Duration::ZERO);
    let (tx, _rx) = sink();
    store.put(&thumb_key(Path::new("/v/a.mp4")), b"Y2FjaGVk").await.expect("seed cache");

    let out = cache.ensure_thumbnails(&ctx(), vec![video(1, "/v/a.mp4")], &tx).await;
    assert_eq!(out[0].thumbnail.as_deref(), Some("Y2FjaGVk"));
    assert_eq!(grabber.calls.load(Ordering::SeqCst), 0);
  }

  #[tokio::test]
  async fn second_run_hits_the_cache() {
    let (_dir, _store, grabber, cache) = cache_with(Duration::ZERO);
    let (tx, _rx) = sink();
    let first = cache.ensure_thumbnails(&ctx(), vec![video(1, "/v/a.mp4")], &tx).await;
    assert_eq!(grabber.calls.load(Ordering::SeqCst), 1);

    let second = cache.ensure_thumbnails(&ctx(), vec![video(1, "/v/a.mp4")], &tx).await;
    assert_eq!(grabber.calls.load(Ordering::SeqCst), 1); // no second extraction
    assert_eq!(first[0].thumbnail, second[0].thumbnail);
  }

  #[tokio::test]
  async fn concurrent_requests_for_same_path_extract_once() {
    let (_dir, _store, grabber, cache) = cache_with(Duration::from_millis(50));
    let (tx, _rx) = sink();
    let a = cache.clone();
    let b = cache.clone();
    let (ctx_a, ctx_b) = (ctx(), ctx());
    let (tx_a, tx_b) = (tx.clone(), tx);

    let (out_a, out_b) = tokio::join!(
      a.ensure_thumbnails(&ctx_a, vec![video(1, "/v/same.mp4")], &tx_a),
      b.ensure_thumbnails(&ctx_b, vec![video(1, "/v/same.mp4")], &tx_b),
    );

    assert_eq!(grabber.calls.load(Ordering::SeqCst), 1);
    // Exactly one of the two calls produced the thumbnail; the other
    // skipped the in-flight path and returned the video untouched.
    let produced =
      [&out_a, &out_b].iter().filter(|out| out[0].thumbnail.is_some()).count();
    assert_eq!(produced, 1);
  }

  #[tokio::test]
  async fn batches_bound_concurrent_extraction() {
    let (_dir, _store, grabber, cache) = cache_with(Duration::from_millis(20));
    let (tx, mut rx) = sink();
    let videos: Vec<VideoRef> = (1..=7).map(|i| video(i, &format!("/v/{}.mp4", i))).collect();

    let out = cache.ensure_thumbnails(&ctx(), videos, &tx).await;
    assert!(out.iter().all(|v| v.thumbnail.is_some()));
    assert_eq!(grabber.calls.load(Ordering::SeqCst), 7);
    assert!(grabber.peak.load(Ordering::SeqCst) <= constants().thumb_batch_size);

    // 7 videos in batches of 3 → three incremental updates.
    let mut batches = 0;
    while rx.try_recv().is_ok() {
      batches += 1;
    }
    assert_eq!(batches, 3);
  }

  #[tokio::test]
  async fn extraction_failure_is_per_item() {
    struct FlakyGrabber;
    impl FrameGrabber for FlakyGrabber {
      fn grab(&self, path: &Path) -> impl Future<Output = Result<Vec<u8>>> + Send {
        let fail = path.to_string_lossy().contains("bad");
        async move {
          if fail {
            anyhow::bail!("decode error");
          }
          Ok(b"ok".to_vec())
        }
      }
    }

    let dir = tempfile::tempdir().expect("tempdir");
    let store = Arc::new(KvStore::open(dir.path()).expect("open store"));
    let cache = ThumbnailCache::new(store, FlakyGrabber);
    let (tx, _rx) = sink();

    let out = cache.ensure_thumbnails(&ctx(), vec![video(1, "/v/bad.mp4"), video(2, "/v/good.mp4")], &tx).await;
    assert!(out[0].thumbnail.is_none());
    assert!(out[1].thumbnail.is_some());
  }

  #[tokio::test]
  async fn in_flight_entry_cleared_after_failure() {
    struct FailingGrabber {
      calls: AtomicUsize,
    }
    impl FrameGrabber for Arc<FailingGrabber> {
      fn grab(&self, _path: &Path) -> impl Future<Output = Result<Vec<u8>>> + Send {
        let this = Arc::clone(self);
        async move {
          this.calls.fetch_add(1, Ordering::SeqCst);
          anyhow::bail!("no codec")
        }
      }
    }

    let dir = tempfile::tempdir().expect("tempdir");
    let store = Arc::new(KvStore::open(dir.path()).expect("open store"));
    let grabber = Arc::new(FailingGrabber { calls: AtomicUsize::new(0) });
    let cache = ThumbnailCache::new(store, Arc::clone(&grabber));
    let (tx, _rx) = sink();

    cache.ensure_thumbnails(&ctx(), vec![video(1, "/v/a.mp4")], &tx).await;
    // A later call may retry: the failed path was released, not wedged.
    cache.ensure_thumbnails(&ctx(), vec![video(1, "/v/a.mp4")], &tx).await;
    assert_eq!(grabber.calls.load(Ordering::SeqCst), 2);
  }

  // --- merge_thumbnails ---

  #[test]
  fn merge_is_keyed_by_id_and_idempotent() {
    let mut videos = vec![video(1, "/v/a.mp4"), video(2, "/v/b.mp4")];
    let thumbs = vec![(2, "data2".to_string())];
    merge_thumbnails(&mut videos, &thumbs);
    merge_thumbnails(&mut videos, &thumbs); // second application is a no-op
    assert!(videos[0].thumbnail.is_none());
    assert_eq!(videos[1].thumbnail.as_deref(), Some("data2"));
  }

  #[test]
  fn merge_ignores_unknown_ids() {
    let mut videos = vec![video(1, "/v/a.mp4")];
    merge_thumbnails(&mut videos, &[(99, "ghost".to_string())]);
    assert!(videos[0].thumbnail.is_none());
  }
}
