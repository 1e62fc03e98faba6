//! # Render Pipeline
//!
//! Turns status HTML containing emoji into HTML with `<img>` elements for
//! the emoji the current display mode wants replaced.
//!
//! ## Flow
//!
//! ```text
//! ┌─────────────────────────────────────────────────────────────────────────┐
//! │                            render_html()                                │
//! ├─────────────────────────────────────────────────────────────────────────┤
//! │                                                                         │
//! │  (html, AppState, ExtraEmojis, lookup locale) ──► output LRU ──► hit    │
//! │                          │ miss                                         │
//! │                          ▼                                              │
//! │  has_emoji_like? ── no ──► None                                         │
//! │                          │ yes                                          │
//! │                          ▼                                              │
//! │  html5ever ─► decoded text nodes (BFS, skips script/style/textarea) ─►  │
//! │  tokenize                                                               │
//! │                          │                                              │
//! │                          ▼                                              │
//! │  distinct codes ─► ResolutionCache ─► misses ─► 1 locale query          │
//! │                                               └► 1 custom query         │
//! │                          │                                              │
//! │                          ▼                                              │
//! │  splice text / <img> runs ─► serialize ─► output LRU                    │
//! │                                                                         │
//! └─────────────────────────────────────────────────────────────────────────┘
//! ```
//!
//! `None` from the pipeline means the input is returned unchanged.

mod html;
mod pipeline;

pub use html::{Attribute, Element, Fragment, Node, SKIPPED_ELEMENTS};
pub use pipeline::EmojiRenderer;

use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};

/// How Unicode emoji are displayed
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum EmojiMode {
    /// Platform glyphs, never replaced
    Native,
    /// Platform glyphs except flags, which many platforms lack
    NativeFlags,
    /// Every emoji replaced by its image
    #[default]
    Twemoji,
}

impl EmojiMode {
    /// Whether a Unicode emoji with this code is replaced by an image
    pub fn substitutes(&self, code: &str) -> bool {
        match self {
            EmojiMode::Native => false,
            EmojiMode::NativeFlags => crate::tokenizer::is_flag(code),
            EmojiMode::Twemoji => true,
        }
    }
}

/// Display settings the host application passes with every render
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct AppState {
    /// The user's interface locale
    pub current_locale: String,
    /// Other locales the user reads, in preference order
    #[serde(default)]
    pub locales: Vec<String>,
    /// Emoji display mode
    #[serde(default)]
    pub mode: EmojiMode,
    /// Dark theme active
    #[serde(default)]
    pub dark_theme: bool,
    /// Play animated custom emoji
    #[serde(default = "default_autoplay")]
    pub autoplay_gifs: bool,
}

fn default_autoplay() -> bool {
    true
}

impl Default for AppState {
    fn default() -> Self {
        Self {
            current_locale: crate::locale::DEFAULT_LOCALE.as_str().to_string(),
            locales: Vec::new(),
            mode: EmojiMode::default(),
            dark_theme: false,
            autoplay_gifs: default_autoplay(),
        }
    }
}

/// A custom emoji supplied with the render call, not read from the store
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ExtraEmoji {
    /// Shortcode without colons
    pub shortcode: String,
    /// Animated image URL
    pub url: String,
    /// Still image URL
    pub static_url: String,
}

/// Extra custom emoji by shortcode
pub type ExtraEmojis = BTreeMap<String, ExtraEmoji>;
