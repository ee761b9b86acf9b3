use ratatui::style::Color;

/// A color palette. Cycled at runtime with Ctrl+T; the chosen name is
/// persisted to the prefs file.
pub struct Theme {
  pub name: &'static str,
  pub bg: Color,
  pub fg: Color,
  pub muted: Color,
  pub accent: Color,
  pub border: Color,
  pub status: Color,
  pub error: Color,
  pub highlight_fg: Color,
  pub highlight_bg: Color,
  pub stripe_bg: Color,
  pub key_fg: Color,
  pub key_bg: Color,
}

pub static THEMES: [Theme; 3] = [
  Theme {
    name: "lavender",
    bg: Color::Rgb(24, 22, 33),
    fg: Color::Rgb(222, 218, 235),
    muted: Color::Rgb(130, 123, 160),
    accent: Color::Rgb(183, 150, 255),
    border: Color::Rgb(62, 56, 88),
    status: Color::Rgb(148, 226, 178),
    error: Color::Rgb(243, 139, 168),
    highlight_fg: Color::Rgb(24, 22, 33),
    highlight_bg: Color::Rgb(183, 150, 255),
    stripe_bg: Color::Rgb(30, 28, 42),
    key_fg: Color::Rgb(24, 22, 33),
    key_bg: Color::Rgb(130, 123, 160),
  },
  Theme {
    name: "seafoam",
    bg: Color::Rgb(20, 28, 28),
    fg: Color::Rgb(214, 230, 225),
    muted: Color::Rgb(110, 140, 132),
    accent: Color::Rgb(134, 222, 196),
    border: Color::Rgb(48, 70, 64),
    status: Color::Rgb(166, 227, 161),
    error: Color::Rgb(235, 130, 135),
    highlight_fg: Color::Rgb(20, 28, 28),
    highlight_bg: Color::Rgb(134, 222, 196),
    stripe_bg: Color::Rgb(25, 35, 35),
    key_fg: Color::Rgb(20, 28, 28),
    key_bg: Color::Rgb(110, 140, 132),
  },
  Theme {
    name: "peach",
    bg: Color::Rgb(32, 25, 23),
    fg: Color::Rgb(238, 224, 218),
    muted: Color::Rgb(158, 132, 120),
    accent: Color::Rgb(250, 179, 135),
    border: Color::Rgb(82, 64, 56),
    status: Color::Rgb(214, 222, 150),
    error: Color::Rgb(240, 120, 120),
    highlight_fg: Color::Rgb(32, 25, 23),
    highlight_bg: Color::Rgb(250, 179, 135),
    stripe_bg: Color::Rgb(40, 31, 28),
    key_fg: Color::Rgb(32, 25, 23),
    key_bg: Color::Rgb(158, 132, 120),
  },
];
