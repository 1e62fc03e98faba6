//! # Tokenizer
//!
//! Splits a run of text into plain segments and emoji tokens.
//!
//! ```text
//! "Hi :wave: 👋🏽 there"
//!      │       │
//!      ▼       ▼
//! [Text("Hi "), Custom("wave"), Text(" "), Unicode("👋🏽"), Text(" there")]
//! ```
//!
//! One combined pattern matches either a Unicode emoji sequence (skin tone
//! modifiers, ZWJ sequences, regional-indicator flags, tag-sequence flags,
//! variation selectors, keycaps) or a custom shortcode `:[A-Za-z0-9_]+:`.

use once_cell::sync::Lazy;
use regex::Regex;
use serde::{Deserialize, Serialize};

/// Keycap: digit, `#` or `*`, optional VS16, combining enclosing keycap
const KEYCAP_PATTERN: &str = r"[0-9#*]\x{FE0F}?\x{20E3}";

/// Tag-sequence flag (England, Scotland, Wales, ...)
const TAG_FLAG_PATTERN: &str = r"\x{1F3F4}[\x{E0020}-\x{E007E}]+\x{E007F}";

/// Pair of regional indicators
const REGIONAL_FLAG_PATTERN: &str = r"[\x{1F1E6}-\x{1F1FF}]{2}";

/// Pictograph with optional VS16 / skin tone, ZWJ-joined to more of the same
const PICTOGRAPH_SEQUENCE_PATTERN: &str = r"\p{Extended_Pictographic}\x{FE0F}?[\x{1F3FB}-\x{1F3FF}]?(?:\x{200D}\p{Extended_Pictographic}\x{FE0F}?[\x{1F3FB}-\x{1F3FF}]?)*";

/// Custom emoji shortcode, colons included
const CUSTOM_PATTERN: &str = r":[A-Za-z0-9_]+:";

fn unicode_alternation() -> String {
    // Order matters: the tag flag starts with a pictograph (🏴) and must win.
    format!(
        "{}|{}|{}|{}",
        TAG_FLAG_PATTERN, KEYCAP_PATTERN, REGIONAL_FLAG_PATTERN, PICTOGRAPH_SEQUENCE_PATTERN
    )
}

static TOKENIZE_REGEX: Lazy<Regex> = Lazy::new(|| {
    Regex::new(&format!("{}|{}", unicode_alternation(), CUSTOM_PATTERN))
        .expect("tokenizer regex should compile")
});

static UNICODE_REGEX: Lazy<Regex> =
    Lazy::new(|| Regex::new(&unicode_alternation()).expect("unicode emoji regex should compile"));

static CUSTOM_REGEX: Lazy<Regex> =
    Lazy::new(|| Regex::new(CUSTOM_PATTERN).expect("custom emoji regex should compile"));

static FLAG_REGEX: Lazy<Regex> = Lazy::new(|| {
    Regex::new(&format!("^(?:{}|{})$", REGIONAL_FLAG_PATTERN, TAG_FLAG_PATTERN))
        .expect("flag regex should compile")
});

/// Kind of emoji a token refers to
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum EmojiKind {
    /// A Unicode glyph sequence
    Unicode,
    /// A server-defined `:shortcode:` emoji
    Custom,
}

/// An emoji found in text
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub enum EmojiToken {
    /// The exact matched glyph sequence, variation selectors included
    Unicode(String),
    /// The shortcode without its colons
    Custom(String),
}

impl EmojiToken {
    /// Which kind of emoji this is
    pub fn kind(&self) -> EmojiKind {
        match self {
            EmojiToken::Unicode(_) => EmojiKind::Unicode,
            EmojiToken::Custom(_) => EmojiKind::Custom,
        }
    }

    /// The matched code
    pub fn code(&self) -> &str {
        match self {
            EmojiToken::Unicode(code) | EmojiToken::Custom(code) => code,
        }
    }

    /// The token as it appeared in the source text
    pub fn source_text(&self) -> String {
        match self {
            EmojiToken::Unicode(code) => code.clone(),
            EmojiToken::Custom(code) => format!(":{}:", code),
        }
    }
}

/// A piece of tokenized text
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum TextToken {
    /// Plain text between emoji
    Text(String),
    /// An emoji
    Emoji(EmojiToken),
}

/// Tokenize `text` into plain segments and emoji tokens.
///
/// Returns an empty vector for blank input and a single [`TextToken::Text`]
/// holding the whole input when nothing matched.
pub fn tokenize(text: &str) -> Vec<TextToken> {
    if text.trim().is_empty() {
        return Vec::new();
    }

    let mut tokens = Vec::new();
    let mut last = 0;

    for found in TOKENIZE_REGEX.find_iter(text) {
        if found.start() > last {
            tokens.push(TextToken::Text(text[last..found.start()].to_string()));
        }

        let code = found.as_str();
        let token = match code.strip_prefix(':').and_then(|c| c.strip_suffix(':')) {
            Some(shortcode) if !shortcode.is_empty() => EmojiToken::Custom(shortcode.to_string()),
            _ => EmojiToken::Unicode(code.to_string()),
        };
        tokens.push(TextToken::Emoji(token));
        last = found.end();
    }

    if last < text.len() {
        tokens.push(TextToken::Text(text[last..].to_string()));
    }

    tokens
}

/// Cheap single-scan test for anything emoji-like
pub fn has_emoji_like(text: &str) -> bool {
    TOKENIZE_REGEX.is_match(text)
}

/// Whether `text` contains a Unicode emoji sequence
pub fn has_unicode_emoji(text: &str) -> bool {
    UNICODE_REGEX.is_match(text)
}

/// Whether `text` contains a `:shortcode:`
pub fn has_custom_emoji(text: &str) -> bool {
    CUSTOM_REGEX.is_match(text)
}

/// Whether `code` is exactly one flag sequence
pub fn is_flag(code: &str) -> bool {
    FLAG_REGEX.is_match(code)
}

// ============================================================================
// TESTS
// ============================================================================
