//! # Code Normalizer
//!
//! Converts emoji glyphs and hexcodes between the forms used by the dataset
//! (upper-case, zero-padded hexcodes) and the forms used by the static image
//! assets (lower-case, unpadded ids), and answers theme questions about an
//! emoji: does it need a border, does it need to be inverted.
//!
//! ```text
//!   glyph "1️⃣"          hexcode "0031-FE0F-20E3"        image id "31-20e3"
//!   ───────────   ──►   ────────────────────────   ──►   ─────────────────
//!   emoji_to_hexcode()                         to_canonical_image_id()
//! ```

use std::collections::{HashMap, HashSet};

use once_cell::sync::Lazy;

/// Variation selector 16 (emoji presentation)
pub const VARIATION_SELECTOR: u32 = 0xFE0F;
/// Combining enclosing keycap
pub const KEYCAP: u32 = 0x20E3;
/// 👁 eye
pub const EYE: u32 = 0x1F441;
/// 🗨 left speech bubble
pub const SPEECH_BUBBLE: u32 = 0x1F5E8;
/// Skin tone modifiers, light to dark
pub const SKIN_TONES: [u32; 5] = [0x1F3FB, 0x1F3FC, 0x1F3FD, 0x1F3FE, 0x1F3FF];

/// Emoji that need a border when shown on a dark theme
const EMOJIS_WITH_DARK_BORDER: &[&str] = &[
    "🎱", "🐜", "⚫", "🖤", "⬛", "◼️", "◾", "✒️", "▪️", "💣", "🎳", "📷", "📸", "♣️", "🕶️",
    "✴️", "🔌", "💂‍♀️", "📽️", "🍳", "🦍", "💂", "🔪", "🕳️", "🕹️", "🕋", "🖊️", "🖋️", "💂‍♂️",
    "🎤", "🎓", "🎥", "🎼", "♠️", "🎩", "🦃", "📼", "📹", "🎮", "🐃", "🏴", "🐞", "🕺", "📱",
    "📲", "🚲", "🪮", "🐦‍⬛",
];

/// Emoji that need a border when shown on a light theme
const EMOJIS_WITH_LIGHT_BORDER: &[&str] = &[
    "👽", "⚾", "🐔", "☁️", "💨", "🕊️", "👀", "🍥", "👻", "🐐", "❕", "❔", "⛸️", "🌩️", "🔊",
    "🔇", "📃", "🌧️", "🐏", "🍚", "🍙", "🐓", "🐑", "💀", "☠️", "🌨️", "🔉", "🔈", "💬", "💭",
    "🏐", "🏳️", "⚪", "⬜", "◽", "◻️", "▫️", "🪽", "🪿",
];

/// Glyphs drawn in a single dark colour, unreadable on dark backgrounds
const EMOJIS_INVERT_ON_DARK: &[&str] = &[
    "™", "™️", "©", "©️", "®", "®️", "〰", "〰️", "➰", "➿", "✔", "✔️", "✖", "✖️", "➕", "➖",
    "➗", "💲", "💱", "🔚", "🔙", "🔛", "🔝", "🔜", "↩", "↩️", "↪", "↪️", "⤴", "⤴️", "⤵", "⤵️",
    "↔", "↔️", "↕", "↕️", "⬅", "⬅️", "⬆", "⬆️", "⬇", "⬇️", "➡", "➡️", "↖", "↖️", "↗", "↗️",
    "↘", "↘️", "↙", "↙️", "🕷", "🕷️", "🕸", "🕸️",
];

/// Glyphs drawn in a single light colour, unreadable on light backgrounds
const EMOJIS_INVERT_ON_LIGHT: &[&str] = &["🔗"];

static DARK_BORDER_IDS: Lazy<HashSet<String>> = Lazy::new(|| {
    EMOJIS_WITH_DARK_BORDER
        .iter()
        .map(|glyph| to_canonical_image_id(&emoji_to_hexcode(glyph)))
        .collect()
});

static LIGHT_BORDER_IDS: Lazy<HashSet<String>> = Lazy::new(|| {
    EMOJIS_WITH_LIGHT_BORDER
        .iter()
        .map(|glyph| to_canonical_image_id(&emoji_to_hexcode(glyph)))
        .collect()
});

static INVERSIONS: Lazy<HashMap<&'static str, InversionClass>> = Lazy::new(|| {
    EMOJIS_INVERT_ON_DARK
        .iter()
        .map(|glyph| (*glyph, InversionClass::InvertOnDark))
        .chain(
            EMOJIS_INVERT_ON_LIGHT
                .iter()
                .map(|glyph| (*glyph, InversionClass::InvertOnLight)),
        )
        .collect()
});

/// Which themes an emoji image needs an outline in
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct BorderInfo {
    /// Needs a border on a light background
    pub has_light_border: bool,
    /// Needs a border on a dark background
    pub has_dark_border: bool,
}

impl BorderInfo {
    /// Whether a border applies under the given theme
    pub fn applies(&self, dark_theme: bool) -> bool {
        if dark_theme {
            self.has_dark_border
        } else {
            self.has_light_border
        }
    }
}

/// CSS class inverting a glyph's colours under one theme
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum InversionClass {
    /// Invert when the dark theme is active
    InvertOnDark,
    /// Invert when the light theme is active
    InvertOnLight,
}

impl InversionClass {
    /// The CSS class name
    pub fn as_str(&self) -> &'static str {
        match self {
            InversionClass::InvertOnDark => "invert-on-dark",
            InversionClass::InvertOnLight => "invert-on-light",
        }
    }
}

/// Code points of `input`, read as a dash-joined hexcode when it looks like one
/// and as a glyph otherwise.
fn code_points(input: &str) -> Vec<u32> {
    let looks_hex = !input.is_empty()
        && input.chars().all(|c| c.is_ascii_hexdigit() || c == '-')
        && input.split('-').all(|part| !part.is_empty() && part.len() <= 6);

    if looks_hex {
        input
            .split('-')
            .filter_map(|part| u32::from_str_radix(part, 16).ok())
            .collect()
    } else {
        input.chars().map(|c| c as u32).collect()
    }
}

/// Drop the variation selector of a single-code-point emoji; the dataset keys
/// those without it.
fn drop_lone_variation_selector(codes: &mut Vec<u32>) {
    if codes.len() == 2 && codes[1] == VARIATION_SELECTOR {
        codes.pop();
    }
}

/// Dataset hexcode for a glyph: upper-case, zero-padded to four digits,
/// dash-joined.
pub fn emoji_to_hexcode(glyph: &str) -> String {
    let mut codes: Vec<u32> = glyph.chars().map(|c| c as u32).collect();
    drop_lone_variation_selector(&mut codes);
    codes
        .iter()
        .map(|code| format!("{:04X}", code))
        .collect::<Vec<_>>()
        .join("-")
}

/// Identifier of the static image asset for a hexcode or glyph.
///
/// Lower-case unpadded hex, dash-joined. Keycaps lose the VS16 between digit
/// and keycap, and the eye-in-speech-bubble sequence loses its VS16s.
pub fn to_canonical_image_id(hexcode_or_glyph: &str) -> String {
    let codes = code_points(hexcode_or_glyph);

    let is_keycap = codes.last() == Some(&KEYCAP);
    let is_eye_bubble = codes.first() == Some(&EYE)
        && codes.len() >= 2
        && codes[codes.len() - 2] == SPEECH_BUBBLE;

    codes
        .iter()
        .enumerate()
        .filter(|(i, code)| {
            if **code != VARIATION_SELECTOR {
                return true;
            }
            !((*i == 1 && is_keycap) || is_eye_bubble)
        })
        .map(|(_, code)| format!("{:x}", code))
        .collect::<Vec<_>>()
        .join("-")
}

/// Border requirements for an image id
pub fn border_info(image_id: &str) -> BorderInfo {
    BorderInfo {
        has_light_border: LIGHT_BORDER_IDS.contains(image_id),
        has_dark_border: DARK_BORDER_IDS.contains(image_id),
    }
}

/// Theme inversion class for a glyph, exact match only
pub fn inversion_class(glyph: &str) -> Option<InversionClass> {
    INVERSIONS.get(glyph).copied()
}

/// Whether a hexcode carries a skin tone modifier
pub fn has_skin_tone(hexcode: &str) -> bool {
    code_points(hexcode)
        .iter()
        .any(|code| SKIN_TONES.contains(code))
}

// ============================================================================
// TESTS
// ============================================================================
