use anyhow::{Context, Result};
use ratatui::crossterm::event::{self, KeyCode, KeyModifiers};

use crate::app::{App, AppMode};

// --- Helpers ---

/// Convert a char index to a byte offset within the string.
pub fn char_to_byte_index(s: &str, char_idx: usize) -> usize {
  s.char_indices().nth(char_idx).map_or(s.len(), |(i, _)| i)
}

// --- Event Handling ---

pub async fn handle_key_event(app: &mut App, key: event::KeyEvent) -> Result<()> {
  if key.modifiers.contains(KeyModifiers::CONTROL) && key.code == KeyCode::Char('c') {
    app.should_quit = true;
    return Ok(());
  }

  if key.modifiers.contains(KeyModifiers::CONTROL) && key.code == KeyCode::Char('t') {
    app.next_theme();
    return Ok(());
  }

  if key.modifiers.contains(KeyModifiers::CONTROL) && key.code == KeyCode::Char('s') {
    if app.player.is_playing() {
      app.stop_playback().await.context("Failed to stop playback")?;
    }
    return Ok(());
  }

  match app.mode {
    AppMode::FolderInput => handle_folder_input_key(app, key).await,
    AppMode::Browse => handle_browse_key(app, key).await.context("Failed to handle browse key event")?,
    AppMode::Notes => handle_notes_key(app, key),
  }
  Ok(())
}

async fn handle_folder_input_key(app: &mut App, key: event::KeyEvent) {
  app.clear_error();
  match key.code {
    KeyCode::Enter => {
      app.open_folder().await;
    }
    KeyCode::Char(c) => {
      let byte_idx = char_to_byte_index(&app.input, app.cursor_position);
      app.input.insert(byte_idx, c);
      app.cursor_position += 1;
    }
    KeyCode::Backspace => {
      if app.cursor_position > 0 {
        app.cursor_position -= 1;
        let byte_idx = char_to_byte_index(&app.input, app.cursor_position);
        app.input.remove(byte_idx);
      }
    }
    KeyCode::Delete => {
      if app.cursor_position < app.input.chars().count() {
        let byte_idx = char_to_byte_index(&app.input, app.cursor_position);
        app.input.remove(byte_idx);
      }
    }
    KeyCode::Left => {
      app.cursor_position = app.cursor_position.saturating_sub(1);
    }
    KeyCode::Right => {
      if app.cursor_position < app.input.chars().count() {
        app.cursor_position += 1;
      }
    }
    KeyCode::Home => {
      app.cursor_position = 0;
    }
    KeyCode::End => {
      app.cursor_position = app.input.chars().count();
    }
    KeyCode::Esc => {
      if !app.input.is_empty() {
        app.input.clear();
        app.cursor_position = 0;
        app.input_scroll = 0;
      } else if !app.videos.is_empty() {
        app.mode = AppMode::Browse;
      } else {
        app.should_quit = true;
      }
    }
    KeyCode::Down => {
      if !app.videos.is_empty() {
        app.mode = AppMode::Browse;
      }
    }
    _ => {}
  }
}

async fn handle_browse_key(app: &mut App, key: event::KeyEvent) -> Result<()> {
  match key.code {
    KeyCode::Enter => {
      app.trigger_play().await;
    }
    KeyCode::Char(' ') => {
      if app.player.is_playing()
        && let Err(e) = app.player.toggle_pause().await
      {
        app.set_error(format!("Pause error: {}", e));
      }
    }
    KeyCode::Char('n') => {
      app.open_notes();
    }
    KeyCode::Char('c') => {
      app.mark_selected_completed().await;
    }
    KeyCode::Char('r') => {
      app.mark_selected_not_started().await;
    }
    KeyCode::Down | KeyCode::Char('j') => {
      let count = app.videos.len();
      if count > 0 {
        let i = app.list_state.selected().map_or(0, |i| (i + 1) % count);
        app.list_state.select(Some(i));
      }
    }
    KeyCode::Up | KeyCode::Char('k') => {
      let count = app.videos.len();
      if count > 0 {
        let i = app.list_state.selected().map_or(0, |i| if i == 0 { count - 1 } else { i - 1 });
        app.list_state.select(Some(i));
      }
    }
    KeyCode::Esc => {
      app.mode = AppMode::FolderInput;
    }
    _ => {}
  }
  Ok(())
}

fn handle_notes_key(app: &mut App, key: event::KeyEvent) {
  match key.code {
    KeyCode::Char(c) => {
      let byte_idx = char_to_byte_index(&app.notes_input, app.notes_cursor);
      app.notes_input.insert(byte_idx, c);
      app.notes_cursor += 1;
      app.notes_changed();
    }
    KeyCode::Enter => {
      let byte_idx = char_to_byte_index(&app.notes_input, app.notes_cursor);
      app.notes_input.insert(byte_idx, '\n');
      app.notes_cursor += 1;
      app.notes_changed();
    }
    KeyCode::Backspace => {
      if app.notes_cursor > 0 {
        app.notes_cursor -= 1;
        let byte_idx = char_to_byte_index(&app.notes_input, app.notes_cursor);
        app.notes_input.remove(byte_idx);
        app.notes_changed();
      }
    }
    KeyCode::Delete => {
      if app.notes_cursor < app.notes_input.chars().count() {
        let byte_idx = char_to_byte_index(&app.notes_input, app.notes_cursor);
        app.notes_input.remove(byte_idx);
        app.notes_changed();
      }
    }
    KeyCode::Left => {
      app.notes_cursor = app.notes_cursor.saturating_sub(1);
    }
    KeyCode::Right => {
      if app.notes_cursor < app.notes_input.chars().count() {
        app.notes_cursor += 1;
      }
    }
    KeyCode::Home => {
      app.notes_cursor = 0;
    }
    KeyCode::End => {
      app.notes_cursor = app.notes_input.chars().count();
    }
    KeyCode::Esc => {
      app.close_notes();
    }
    _ => {}
  }
}
