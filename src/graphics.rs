use anyhow::{Context, Result};
use base64::{Engine as _, engine::general_purpose::STANDARD as BASE64};
use image::{DynamicImage, ImageFormat};
use ratatui::{
  buffer::Buffer,
  layout::Rect,
  style::{Color, Style},
  widgets::Widget,
};
use std::io::{Cursor, Write};

use crate::display::DisplayMode;

// --- Thumbnail decode ---

/// Decode a cached thumbnail entry (base64 JPEG) into an image.
pub fn decode_thumbnail(data: &str) -> Result<DynamicImage> {
  let bytes = BASE64.decode(data.trim()).context("Cached thumbnail is not valid base64")?;
  image::load_from_memory(&bytes).context("Failed to decode thumbnail image")
}

// --- Thumbnail Widget ---

pub struct ThumbnailWidget<'a> {
  pub image: &'a DynamicImage,
  pub display_mode: DisplayMode,
}

const ASCII_CHARS: [&str; 10] = [" ", ".", ":", "-", "=", "+", "*", "#", "%", "@"];

impl Widget for ThumbnailWidget<'_> {
  fn render(self, area: Rect, buf: &mut Buffer) {
    if area.is_empty() {
      return;
    }
    match self.display_mode {
      DisplayMode::Direct => render_direct(self.image, area, buf),
      DisplayMode::Ascii => render_ascii(self.image, area, buf),
      DisplayMode::Kitty => {}
    }
  }
}

fn render_direct(image: &DynamicImage, area: Rect, buf: &mut Buffer) {
  // Image is already resized by the caller; just convert to RGB8.
  let resized = image.to_rgb8();
  let img_w = resized.width().min(area.width as u32);
  let img_h = resized.height();
  let cell_h = img_h.div_ceil(2);
  let offset_x = (area.width as u32).saturating_sub(img_w) / 2;
  let offset_y = (area.height as u32).saturating_sub(cell_h) / 2;

  for y in 0..cell_h.min(area.height as u32) {
    for x in 0..img_w {
      let upper = resized.get_pixel(x, y * 2);
      let lower_y = y * 2 + 1;
      let fg = Color::Rgb(upper[0], upper[1], upper[2]);
      let bg = if lower_y < img_h {
        let lower = resized.get_pixel(x, lower_y);
        Color::Rgb(lower[0], lower[1], lower[2])
      } else {
        Color::Reset
      };
      buf.set_string(
        area.x.saturating_add((offset_x.min(u16::MAX as u32)) as u16).saturating_add((x.min(u16::MAX as u32)) as u16),
        area.y.saturating_add((offset_y.min(u16::MAX as u32)) as u16).saturating_add((y.min(u16::MAX as u32)) as u16),
        "▀",
        Style::default().fg(fg).bg(bg),
      );
    }
  }
}

fn render_ascii(image: &DynamicImage, area: Rect, buf: &mut Buffer) {
  // Image is already resized by the caller; just convert to grayscale.
  let resized = image.to_luma8();
  let img_w = resized.width().min(area.width as u32);
  let img_h = resized.height().min(area.height as u32);
  let offset_x = (area.width as u32).saturating_sub(img_w) / 2;
  let offset_y = (area.height as u32).saturating_sub(img_h) / 2;

  for y in 0..img_h {
    for x in 0..img_w {
      let pixel = resized.get_pixel(x, y)[0];
      let idx = ((pixel as f32 / 255.0) * (ASCII_CHARS.len() - 1) as f32).round() as usize;
      let idx = idx.min(ASCII_CHARS.len() - 1);
      buf.set_string(
        area.x.saturating_add((offset_x.min(u16::MAX as u32)) as u16).saturating_add((x.min(u16::MAX as u32)) as u16),
        area.y.saturating_add((offset_y.min(u16::MAX as u32)) as u16).saturating_add((y.min(u16::MAX as u32)) as u16),
        ASCII_CHARS[idx],
        Style::default(),
      );
    }
  }
}

// --- Kitty Graphics Protocol ---
//
// Sends an image to the terminal using the Kitty graphics protocol (OSC APC).
//
//   Transmit:  \x1B_G a=T,f=100,t=d,i=1,p=1,c=<cols>,r=<rows>,q=2,m=1;<base64 chunk>\x1B\\
//   Continue:  \x1B_G m=1;<base64 chunk>\x1B\\
//   Last:      \x1B_G m=0;<base64 chunk>\x1B\\
//   Delete all: \x1B_G a=d,d=a,q=2\x1B\\
//
// Using `i=1` (image ID) and `p=1` (placement ID) allows atomic replacement:
// re-sending with the same ID replaces the previous image without a visible gap.
//
// The image is encoded as PNG, base64'd, and sent in <=4096-byte chunks.
// `c` and `r` tell the terminal how many columns/rows to scale the image over.

const KITTY_CHUNK_SIZE: usize = 4096;

/// Delete all Kitty images currently displayed (used when the thumbnail
/// area goes away and on app exit).
pub fn kitty_delete_all() -> Result<()> {
  let mut stdout = std::io::stdout();
  write!(stdout, "\x1B_Ga=d,d=a,q=2\x1B\\").context("Failed to write kitty delete all")?;
  stdout.flush().context("Failed to flush kitty delete")?;
  Ok(())
}

/// Render an image at `area` using the Kitty graphics protocol.
pub fn kitty_render_image(image: &DynamicImage, area: Rect) -> Result<()> {
  if area.is_empty() {
    return Ok(());
  }

  // Encode the full-resolution image as PNG. The Kitty protocol's c/r
  // parameters tell the terminal how many columns/rows to scale into,
  // so sending the original avoids lossy double-resize and produces
  // the sharpest result at the terminal's native pixel density.
  let mut png_buf = Vec::new();
  image
    .write_to(&mut Cursor::new(&mut png_buf), ImageFormat::Png)
    .context("Failed to encode thumbnail as PNG for kitty")?;

  let b64 = BASE64.encode(&png_buf);
  let chunks: Vec<&[u8]> = b64.as_bytes().chunks(KITTY_CHUNK_SIZE).collect();
  let last = chunks.len().saturating_sub(1);

  let mut stdout = std::io::stdout();

  write!(stdout, "\x1B[{};{}H", area.y.saturating_add(1), area.x.saturating_add(1))
    .context("Failed to position cursor for kitty image")?;

  for (i, chunk) in chunks.iter().enumerate() {
    let data = std::str::from_utf8(chunk).context("base64 chunk was not valid UTF-8")?;
    let more = if i < last { 1 } else { 0 };

    if i == 0 {
      write!(stdout, "\x1B_Ga=T,f=100,t=d,i=1,p=1,c={},r={},q=2,m={};{}\x1B\\", area.width, area.height, more, data)
        .context("Failed to write kitty image header chunk")?;
    } else {
      write!(stdout, "\x1B_Gm={};{}\x1B\\", more, data).context("Failed to write kitty image continuation chunk")?;
    }
  }

  stdout.flush().context("Failed to flush kitty image")?;
  Ok(())
}

#[cfg(test)]
mod tests {
  use super::*;

  // --- decode_thumbnail ---

  #[test]
  fn decode_rejects_invalid_base64() {
    assert!(decode_thumbnail("not base64 at all!!!").is_err());
  }

  #[test]
  fn decode_round_trips_an_encoded_image() {
    let img = DynamicImage::new_rgb8(4, 4);
    let mut jpeg = Vec::new();
    img.write_to(&mut Cursor::new(&mut jpeg), ImageFormat::Jpeg).expect("encode");
    let data = BASE64.encode(&jpeg);

    let decoded = decode_thumbnail(&data).expect("decode");
    assert_eq!(decoded.width(), 4);
    assert_eq!(decoded.height(), 4);
  }
}
