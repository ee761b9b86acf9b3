use image::imageops::FilterType;
use ratatui::{
  Frame,
  layout::{Alignment, Constraint, Layout, Rect},
  style::{Modifier, Style, Stylize},
  text::{Line, Span},
  widgets::{Block, List, ListItem, Padding, Paragraph, Wrap},
};

use crate::app::{App, AppMode};
use crate::display::DisplayMode;
use crate::graphics::ThumbnailWidget;
use crate::theme::Theme;

// --- Helpers ---

/// Compute the display width of the first `n` chars (accounting for double-width CJK).
pub fn display_width(s: &str, n: usize) -> usize {
  use unicode_width::UnicodeWidthChar;
  s.chars().take(n).map(|c| c.width().unwrap_or(0)).sum()
}

/// Cell position of a char cursor inside a wrapped multiline editor.
///
/// Rows advance on explicit newlines and whenever a line's display width
/// exceeds `inner_w`; the column is the width accumulated since the last
/// break.
fn editor_cursor_cell(text: &str, cursor: usize, inner_w: usize) -> (usize, usize) {
  use unicode_width::UnicodeWidthChar;
  let inner_w = inner_w.max(1);
  let mut row = 0;
  let mut col = 0;
  for ch in text.chars().take(cursor) {
    if ch == '\n' {
      row += 1;
      col = 0;
      continue;
    }
    let w = ch.width().unwrap_or(0);
    if col + w > inner_w {
      row += 1;
      col = 0;
    }
    col += w;
  }
  (row, col)
}

/// Truncate a string to `max_width` characters, appending "…" if truncated.
fn truncate_str(s: &str, max_width: usize) -> String {
  if s.chars().count() <= max_width {
    s.to_string()
  } else {
    let truncated: String = s.chars().take(max_width.saturating_sub(1)).collect();
    format!("{}…", truncated)
  }
}

/// Watch-state marker shown next to each video: untouched, in progress
/// with a rounded percent, or done.
fn progress_label(percent: f64) -> String {
  if percent <= 0.0 {
    "·".to_string()
  } else if percent >= 100.0 {
    "✓".to_string()
  } else {
    format!("{}%", percent.round() as u32)
  }
}

// --- UI Rendering ---

pub fn ui(frame: &mut Frame, app: &mut App, display_mode: DisplayMode) {
  let theme = app.theme();
  app.gfx.thumb_area = None;

  frame.render_widget(Block::default().style(Style::default().bg(theme.bg)), frame.area());

  let [header_area, main_area, status_area, input_area, footer_area] = Layout::vertical([
    Constraint::Length(1),
    Constraint::Min(3),
    Constraint::Length(1),
    Constraint::Length(3),
    Constraint::Length(1),
  ])
  .areas(frame.area());

  render_header(frame, theme, header_area);
  render_main(frame, app, main_area, display_mode);
  render_status(frame, app, status_area);
  render_input(frame, app, input_area);
  render_footer(frame, app, footer_area);
}

fn render_header(frame: &mut Frame, theme: &Theme, area: Rect) {
  let left = Line::from(Span::styled(" ▶ reel ", Style::default().fg(theme.accent).add_modifier(Modifier::BOLD)));
  frame.render_widget(left, area);

  let version = format!("v{} ", env!("CARGO_PKG_VERSION"));
  let right = Line::from(Span::styled(&version, Style::default().fg(theme.muted)));
  let right_area =
    Rect { x: area.x + area.width.saturating_sub(version.len() as u16), width: version.len() as u16, ..area };
  frame.render_widget(right, right_area);
}

fn render_main(frame: &mut Frame, app: &mut App, area: Rect, display_mode: DisplayMode) {
  if app.videos.is_empty() {
    render_welcome(frame, app.theme(), area);
    return;
  }
  let [list_area, detail_area] = Layout::horizontal([Constraint::Percentage(55), Constraint::Percentage(45)]).areas(area);
  render_library(frame, app, list_area);
  if app.mode == AppMode::Notes {
    render_notes_editor(frame, app, detail_area);
  } else {
    render_detail(frame, app, detail_area, display_mode);
  }
}

fn render_welcome(frame: &mut Frame, theme: &Theme, area: Rect) {
  let text = vec![
    Line::from(""),
    Line::from(Span::styled("▶  Welcome to reel", Style::default().fg(theme.accent).add_modifier(Modifier::BOLD))),
    Line::from(""),
    Line::from(Span::styled("Watch a folder of videos. Keep your place.", Style::default().fg(theme.fg))),
    Line::from(""),
    Line::from(Span::styled("Type a folder path below and press Enter.", Style::default().fg(theme.muted))),
  ];
  let paragraph = Paragraph::new(text).alignment(Alignment::Center).block(
    Block::bordered()
      .border_type(ratatui::widgets::BorderType::Rounded)
      .border_style(Style::default().fg(theme.border)),
  );
  frame.render_widget(paragraph, area);
}

fn render_library(frame: &mut Frame, app: &mut App, area: Rect) {
  let theme = app.theme();

  // Inner width: area minus 2 borders minus 2 chars for highlight symbol ("▶ ")
  let inner_w = area.width.saturating_sub(4) as usize;

  let items: Vec<ListItem> = app
    .videos
    .iter()
    .enumerate()
    .map(|(i, video)| {
      let is_selected = Some(i) == app.list_state.selected();
      let fg = if is_selected { theme.highlight_fg } else { theme.fg };
      let bg = if is_selected {
        theme.highlight_bg
      } else if i % 2 == 1 {
        theme.stripe_bg
      } else {
        theme.bg
      };

      let percent = app.tracker.percent(video.id);
      let mut right = progress_label(percent);
      if app.notes.has_note(video.id) {
        right = format!("✎ {}", right);
      }

      let right_w = right.chars().count();
      let title_max = inner_w.saturating_sub(right_w + 2);
      let title = truncate_str(&video.title, title_max);
      let title_w = title.chars().count();
      let gap = inner_w.saturating_sub(title_w + right_w);

      let right_fg = if percent >= 100.0 { theme.status } else { theme.muted };
      let line = Line::from(vec![
        Span::styled(title, Style::default().fg(fg)),
        Span::raw(" ".repeat(gap)),
        Span::styled(right, Style::default().fg(right_fg)),
      ]);

      ListItem::new(line).bg(bg)
    })
    .collect();

  let title = app
    .ctx
    .as_ref()
    .map(|c| format!(" {} — {} videos ", c.display_name(), app.videos.len()))
    .unwrap_or_else(|| " Videos ".to_string());

  let list = List::new(items)
    .block(
      Block::bordered()
        .title(title)
        .title_style(Style::default().fg(theme.accent).add_modifier(Modifier::BOLD))
        .border_type(ratatui::widgets::BorderType::Rounded)
        .border_style(Style::default().fg(theme.border)),
    )
    .highlight_symbol("▶ ")
    .highlight_style(Style::default().fg(theme.highlight_fg).bg(theme.highlight_bg).add_modifier(Modifier::BOLD));

  frame.render_stateful_widget(list, area, &mut app.list_state);
}

fn render_detail(frame: &mut Frame, app: &mut App, area: Rect, display_mode: DisplayMode) {
  let Some(video) = app.selected_video().cloned() else {
    return;
  };

  let [mut thumb_area, info_area] =
    Layout::vertical([Constraint::Percentage(55), Constraint::Percentage(45)]).areas(area);

  // Pad and center vertically to maintain 16:9 if possible
  thumb_area = Rect { y: thumb_area.y + 1, height: thumb_area.height.saturating_sub(2), ..thumb_area };
  let ideal_h = (thumb_area.width as f32 * 9.0 / 32.0).round() as u16;
  if ideal_h < thumb_area.height {
    let diff = thumb_area.height - ideal_h;
    thumb_area.y += diff / 2;
    thumb_area.height = ideal_h;
  }

  if let Some((id, ref image)) = app.gfx.decoded
    && id == video.id
  {
    let needs_resize = match &app.gfx.resized_thumb {
      Some((rid, w, h, _)) => *rid != id || *w != thumb_area.width || *h != thumb_area.height,
      None => true,
    };
    if needs_resize {
      let target_w = thumb_area.width as u32;
      let target_h = match display_mode {
        DisplayMode::Direct => (target_w as f32 * 9.0 / 16.0) as u32,
        _ => (target_w as f32 * 9.0 / 32.0) as u32,
      };
      let resized = image.resize_to_fill(target_w, target_h.max(1), FilterType::Lanczos3);
      app.gfx.resized_thumb = Some((id, thumb_area.width, thumb_area.height, resized));
    }

    if let Some((_, _, _, ref resized)) = app.gfx.resized_thumb {
      let widget = ThumbnailWidget { image: resized, display_mode };
      frame.render_widget(widget, thumb_area);
    }

    if display_mode == DisplayMode::Kitty {
      app.gfx.thumb_area = Some(thumb_area);
    }
  }

  let theme = app.theme();
  let percent = app.tracker.percent(video.id);
  let playing = app.player.current_video() == Some(video.id);

  let info_block = Block::bordered()
    .title(Line::from(Span::styled(
      if playing { " Now Playing " } else { " Details " },
      Style::default().fg(theme.accent).add_modifier(Modifier::BOLD),
    )))
    .border_type(ratatui::widgets::BorderType::Rounded)
    .border_style(Style::default().fg(theme.border))
    .padding(Padding::horizontal(1));

  let inner_w = info_area.width.saturating_sub(4) as usize;
  let mut lines = vec![
    Line::from(""),
    Line::from(Span::styled(
      truncate_str(&video.title, inner_w),
      Style::default().fg(theme.fg).add_modifier(Modifier::BOLD),
    )),
    Line::from(""),
    progress_bar_line(theme, percent, inner_w),
    Line::from(""),
  ];

  let note = app.notes.note(video.id);
  if note.is_empty() {
    lines.push(Line::from(Span::styled("No notes. Press n to add one.", Style::default().fg(theme.muted))));
  } else {
    lines.push(Line::from(Span::styled("Notes", Style::default().fg(theme.muted))));
    for note_line in note.lines() {
      lines.push(Line::from(Span::styled(note_line.to_string(), Style::default().fg(theme.fg))));
    }
  }

  let paragraph = Paragraph::new(lines).wrap(Wrap { trim: false }).block(info_block);
  frame.render_widget(paragraph, info_area);
}

/// A one-line watch progress bar with a trailing percent.
fn progress_bar_line(theme: &Theme, percent: f64, width: usize) -> Line<'static> {
  let label = progress_label(percent);
  let bar_w = width.saturating_sub(label.chars().count() + 1);
  let filled = ((percent / 100.0) * bar_w as f64).round() as usize;
  let filled = filled.min(bar_w);
  Line::from(vec![
    Span::styled("█".repeat(filled), Style::default().fg(theme.accent)),
    Span::styled("░".repeat(bar_w - filled), Style::default().fg(theme.border)),
    Span::raw(" "),
    Span::styled(label, Style::default().fg(theme.muted)),
  ])
}

fn render_notes_editor(frame: &mut Frame, app: &mut App, area: Rect) {
  let theme = app.theme();
  let title = app.selected_video().map(|v| format!(" Notes — {} ", v.title)).unwrap_or_else(|| " Notes ".to_string());
  let block = Block::bordered()
    .title(title)
    .title_style(Style::default().fg(theme.accent).add_modifier(Modifier::BOLD))
    .border_type(ratatui::widgets::BorderType::Rounded)
    .border_style(Style::default().fg(theme.accent))
    .padding(Padding::horizontal(1));

  let paragraph =
    Paragraph::new(app.notes_input.as_str()).style(Style::default().fg(theme.fg)).wrap(Wrap { trim: false }).block(block);
  frame.render_widget(paragraph, area);

  // Cursor position within the wrapped editor area.
  let inner_w = area.width.saturating_sub(4).max(1) as usize;
  let (row, col) = editor_cursor_cell(&app.notes_input, app.notes_cursor, inner_w);
  let cursor_x = area.x + 2 + col as u16;
  let cursor_y = area.y + 1 + row as u16;
  frame.set_cursor_position((cursor_x.min(area.right().saturating_sub(1)), cursor_y.min(area.bottom().saturating_sub(1))));
}

fn render_status(frame: &mut Frame, app: &App, area: Rect) {
  let theme = app.theme();
  let (text, style) = if let Some(msg) = &app.status_message {
    (format!(" ⏳ {}", msg), Style::default().fg(theme.status))
  } else if let Some(err) = &app.last_error {
    (format!(" ⚠  {}", err), Style::default().fg(theme.error))
  } else if let Some(id) = app.player.current_video() {
    let label = if app.player.paused { "paused" } else { "playing" };
    let title = app.videos.iter().find(|v| v.id == id).map(|v| v.title.as_str()).unwrap_or("?");
    (format!(" ♪ {} ({})", title, label), Style::default().fg(theme.status))
  } else {
    (" Ready".to_string(), Style::default().fg(theme.muted))
  };
  frame.render_widget(Paragraph::new(text).style(style), area);
}

fn render_input(frame: &mut Frame, app: &mut App, area: Rect) {
  let theme = app.theme();
  let border_color = if app.mode == AppMode::FolderInput { theme.accent } else { theme.border };
  let input_block = Block::bordered()
    .title(" Open folder ")
    .title_style(Style::default().fg(border_color))
    .border_type(ratatui::widgets::BorderType::Rounded)
    .border_style(Style::default().fg(border_color))
    .padding(Padding::horizontal(1));

  let inner_w = area.width.saturating_sub(4) as usize;
  let cursor_col = display_width(&app.input, app.cursor_position);

  if cursor_col < app.input_scroll {
    app.input_scroll = cursor_col;
  } else if cursor_col >= app.input_scroll + inner_w {
    app.input_scroll = cursor_col.saturating_sub(inner_w) + 1;
  }

  let visible: String = app
    .input
    .chars()
    .scan(0usize, |col, c| {
      let w = unicode_width::UnicodeWidthChar::width(c).unwrap_or(0);
      let start = *col;
      *col += w;
      Some((start, *col, c))
    })
    .skip_while(|(_, end, _)| *end <= app.input_scroll)
    .take_while(|(start, _, _)| *start < app.input_scroll + inner_w)
    .map(|(_, _, c)| c)
    .collect();

  let paragraph = Paragraph::new(visible).style(Style::default().fg(theme.fg)).block(input_block);
  frame.render_widget(paragraph, area);

  if app.mode == AppMode::FolderInput {
    let cursor_x = area.x + 2 + (cursor_col - app.input_scroll) as u16;
    frame.set_cursor_position((cursor_x, area.y + 1));
  }
}

fn render_footer(frame: &mut Frame, app: &App, area: Rect) {
  let theme = app.theme();
  let has_videos = !app.videos.is_empty();
  let is_playing = app.player.is_playing();
  let keys: Vec<(&str, &str)> = match app.mode {
    AppMode::FolderInput => {
      let mut k = vec![("Enter", "Open"), ("^t", "Theme")];
      if is_playing {
        k.push(("^s", "Stop"));
      }
      if has_videos {
        k.push(("↓", "Videos"));
        k.push(("Esc", "Videos"));
      } else {
        k.push(("Esc", "Quit"));
      }
      k
    }
    AppMode::Browse => {
      let mut k = vec![("Enter", "Play"), ("j/k", "Navigate"), ("n", "Notes"), ("c", "Done"), ("r", "Reset")];
      if is_playing {
        let pause_label = if app.player.paused { "Resume" } else { "Pause" };
        k.push(("Space", pause_label));
        k.push(("^s", "Stop"));
      }
      k.push(("Esc", "Folder"));
      k
    }
    AppMode::Notes => vec![("Esc", "Done"), ("Type", "Edit note")],
  };

  let spans: Vec<Span> = keys
    .iter()
    .enumerate()
    .flat_map(|(i, (key, action))| {
      let mut s = vec![
        Span::styled(format!(" {} ", key), Style::default().fg(theme.key_fg).bg(theme.key_bg)),
        Span::styled(format!(" {} ", action), Style::default().fg(theme.muted)),
      ];
      if i < keys.len() - 1 {
        s.push(Span::raw("  "));
      }
      s
    })
    .collect();

  frame.render_widget(Line::from(spans), area);

  let theme_label = format!("{} ", theme.name);
  let right = Line::from(Span::styled(&theme_label, Style::default().fg(theme.muted)));
  let right_area =
    Rect { x: area.x + area.width.saturating_sub(theme_label.len() as u16), width: theme_label.len() as u16, ..area };
  frame.render_widget(right, right_area);
}

#[cfg(test)]
mod tests {
  use super::*;

  // --- progress_label ---

  #[test]
  fn progress_label_states() {
    assert_eq!(progress_label(0.0), "·");
    assert_eq!(progress_label(42.4), "42%");
    assert_eq!(progress_label(99.5), "100%"); // rounds, still in progress
    assert_eq!(progress_label(100.0), "✓");
  }

  // --- editor_cursor_cell ---

  #[test]
  fn editor_cursor_newlines_start_fresh_rows() {
    let text = "abc\nde\nf";
    assert_eq!(editor_cursor_cell(text, 2, 20), (0, 2));
    assert_eq!(editor_cursor_cell(text, 4, 20), (1, 0)); // just past the first newline
    assert_eq!(editor_cursor_cell(text, 6, 20), (1, 2));
    assert_eq!(editor_cursor_cell(text, 8, 20), (2, 1));
  }

  #[test]
  fn editor_cursor_wraps_long_lines() {
    // Width 4: "abcdef" renders as "abcd" / "ef".
    assert_eq!(editor_cursor_cell("abcdef", 6, 4), (1, 2));
    assert_eq!(editor_cursor_cell("abcdef\ng", 8, 4), (2, 1));
  }

  // --- truncate_str ---

  #[test]
  fn truncate_str_short_passthrough() {
    assert_eq!(truncate_str("abc", 5), "abc");
  }

  #[test]
  fn truncate_str_appends_ellipsis() {
    assert_eq!(truncate_str("abcdef", 4), "abc…");
  }
}
