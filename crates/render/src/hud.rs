use serde::{Deserialize, Serialize};

/// Window-space position of the primary HUD line.
pub const HUD_ORIGIN: (i32, i32) = (15, 15);
/// Window-space position of the secondary HUD line.
pub const HUD2_ORIGIN: (i32, i32) = (500, 15);

/// One overlay string in window pixels, bottom-left origin.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct HudText {
    pub text: String,
    pub x: i32,
    pub y: i32,
    pub size: f32,
}

impl HudText {
    pub const DEFAULT_SIZE: f32 = 24.0;

    pub fn new(text: impl Into<String>, x: i32, y: i32) -> Self {
        Self {
            text: text.into(),
            x,
            y,
            size: Self::DEFAULT_SIZE,
        }
    }
}

/// Text drawn over the finished frame: two fixed slots plus any number of
/// extra strings.
#[derive(Debug, Clone, Default)]
pub struct HudOverlay {
    primary: Option<HudText>,
    secondary: Option<HudText>,
    extra: Vec<HudText>,
}

impl HudOverlay {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn set_primary(&mut self, text: impl Into<String>, x: i32, y: i32) {
        self.primary = Some(HudText::new(text, x, y));
    }

    pub fn set_secondary(&mut self, text: impl Into<String>, x: i32, y: i32) {
        self.secondary = Some(HudText::new(text, x, y));
    }

    pub fn push(&mut self, text: HudText) {
        self.extra.push(text);
    }

    pub fn clear_extra(&mut self) {
        self.extra.clear();
    }

    pub fn clear(&mut self) {
        self.primary = None;
        self.secondary = None;
        self.extra.clear();
    }

    /// Non-empty strings in draw order.
    pub fn iter(&self) -> impl Iterator<Item = &HudText> {
        self.primary
            .iter()
            .chain(self.secondary.iter())
            .chain(self.extra.iter())
            .filter(|t| !t.text.is_empty())
    }
}
