//! Record types stored in the emoji database, plus the wire shapes they are
//! imported from.

use std::collections::{BTreeMap, HashSet};

use serde::{Deserialize, Serialize};

/// A Unicode emoji in one locale
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct UnicodeEmojiRecord {
    /// Dash-joined upper-case hex code points
    pub hexcode: String,
    /// The glyph
    pub unicode: String,
    /// Locale-specific display name
    pub label: String,
    /// Shortcodes, locale dataset and supplemental set merged
    #[serde(default)]
    pub shortcodes: Vec<String>,
    /// Locale-specific keywords
    #[serde(default)]
    pub tags: Vec<String>,
    /// Category
    pub group: Option<i64>,
    /// Position within the category
    pub order: Option<i64>,
    /// Hexcodes of the skin tone variants
    #[serde(default)]
    pub skin_hexcodes: Vec<String>,
    /// Lower-cased search keywords derived from label, shortcodes and tags
    #[serde(default)]
    pub tokens: Vec<String>,
}

impl UnicodeEmojiRecord {
    /// Recompute [`tokens`](Self::tokens) from the other fields
    pub fn with_tokens(mut self) -> Self {
        self.tokens = derive_tokens(&self.label, &self.shortcodes, &self.tags);
        self
    }
}

/// A server-defined custom emoji
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CustomEmojiRecord {
    /// Code without colons
    pub shortcode: String,
    /// Image URL, possibly animated
    pub url: String,
    /// Non-animated image URL
    pub static_url: String,
    /// Picker category
    #[serde(default)]
    pub category: Option<String>,
    /// Whether the picker lists it
    #[serde(default = "default_visible")]
    pub visible_in_picker: bool,
}

fn default_visible() -> bool {
    true
}

/// Legacy shortcode aliases of one hexcode
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct LegacyShortcodeRecord {
    /// Dash-joined upper-case hex code points
    pub hexcode: String,
    /// Alias shortcodes
    pub shortcodes: Vec<String>,
}

/// Search keywords: words of the label, shortcodes and tags, lower-cased and
/// de-duplicated in first-seen order.
pub fn derive_tokens(label: &str, shortcodes: &[String], tags: &[String]) -> Vec<String> {
    let mut seen = HashSet::new();
    let words = label
        .split(|c: char| c.is_whitespace() || c == ':' || c == ',')
        .filter(|word| !word.is_empty())
        .map(str::to_string);

    words
        .chain(shortcodes.iter().cloned())
        .chain(tags.iter().cloned())
        .map(|token| token.to_lowercase())
        .filter(|token| seen.insert(token.clone()))
        .collect()
}

// ============================================================================
// WIRE FORMATS
// ============================================================================

/// One entry of a compact locale dataset
#[derive(Debug, Clone, Deserialize)]
pub struct CompactEmoji {
    /// Hexcode
    pub hexcode: String,
    /// Glyph
    pub unicode: String,
    /// Display name
    #[serde(alias = "annotation")]
    pub label: String,
    /// Category
    #[serde(default)]
    pub group: Option<i64>,
    /// Position within the category
    #[serde(default)]
    pub order: Option<i64>,
    /// Shortcodes bundled with the dataset
    #[serde(default)]
    pub shortcodes: Vec<String>,
    /// Keywords
    #[serde(default)]
    pub tags: Vec<String>,
    /// Skin tone variants
    #[serde(default)]
    pub skins: Vec<CompactEmoji>,
}

/// Shortcode dataset value: one shortcode or several
#[derive(Debug, Clone, Deserialize)]
#[serde(untagged)]
pub enum ShortcodeList {
    /// A single shortcode
    One(String),
    /// Several shortcodes
    Many(Vec<String>),
}

impl ShortcodeList {
    /// Flatten into a vector
    pub fn into_vec(self) -> Vec<String> {
        match self {
            ShortcodeList::One(code) => vec![code],
            ShortcodeList::Many(codes) => codes,
        }
    }
}

/// Shortcode dataset: hexcode to shortcodes
pub type ShortcodeMap = BTreeMap<String, ShortcodeList>;

impl CompactEmoji {
    /// Flatten into records: the base emoji first, then one record per skin
    /// tone variant. Supplemental shortcodes for each hexcode are appended.
    pub fn into_records(self, supplemental: &ShortcodeMap) -> Vec<UnicodeEmojiRecord> {
        let mut records = Vec::with_capacity(1 + self.skins.len());
        let skin_hexcodes = self.skins.iter().map(|s| s.hexcode.clone()).collect();

        let group = self.group;
        let order = self.order;
        let mut base = UnicodeEmojiRecord {
            shortcodes: merge_shortcodes(self.shortcodes, &self.hexcode, supplemental),
            hexcode: self.hexcode,
            unicode: self.unicode,
            label: self.label,
            tags: self.tags,
            group,
            order,
            skin_hexcodes,
            tokens: Vec::new(),
        };
        base = base.with_tokens();

        for skin in self.skins {
            let tags = if skin.tags.is_empty() {
                base.tags.clone()
            } else {
                skin.tags
            };
            let record = UnicodeEmojiRecord {
                shortcodes: merge_shortcodes(skin.shortcodes, &skin.hexcode, supplemental),
                hexcode: skin.hexcode,
                unicode: skin.unicode,
                label: skin.label,
                tags,
                group: skin.group.or(group),
                order: skin.order.or(order),
                skin_hexcodes: Vec::new(),
                tokens: Vec::new(),
            };
            records.push(record.with_tokens());
        }

        records.insert(0, base);
        records
    }
}

fn merge_shortcodes(
    mut shortcodes: Vec<String>,
    hexcode: &str,
    supplemental: &ShortcodeMap,
) -> Vec<String> {
    if let Some(extra) = supplemental.get(hexcode) {
        for code in extra.clone().into_vec() {
            if !shortcodes.contains(&code) {
                shortcodes.push(code);
            }
        }
    }
    shortcodes
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_derive_tokens() {
        let tokens = derive_tokens(
            "Smiling Face",
            &["smile".to_string(), "Smiling".to_string()],
            &["happy".to_string(), "face".to_string()],
        );
        assert_eq!(tokens, vec!["smiling", "face", "smile", "happy"]);
    }

    #[test]
    fn test_compact_flattening_with_skins() {
        let json = r#"{
            "hexcode": "1F44B", "unicode": "👋", "label": "waving hand",
            "group": 1, "order": 150, "tags": ["wave"],
            "skins": [
                {"hexcode": "1F44B-1F3FB", "unicode": "👋🏻", "label": "waving hand: light skin tone"}
            ]
        }"#;
        let emoji: CompactEmoji = serde_json::from_str(json).unwrap();

        let mut supplemental = ShortcodeMap::new();
        supplemental.insert("1F44B".into(), ShortcodeList::One("wave".into()));

        let records = emoji.into_records(&supplemental);
        assert_eq!(records.len(), 2);
        assert_eq!(records[0].shortcodes, vec!["wave"]);
        assert_eq!(records[0].skin_hexcodes, vec!["1F44B-1F3FB"]);
        assert!(records[0].tokens.contains(&"waving".to_string()));
        assert_eq!(records[1].group, Some(1));
        assert_eq!(records[1].tags, vec!["wave"]);
    }

    #[test]
    fn test_shortcode_list_shapes() {
        let map: ShortcodeMap =
            serde_json::from_str(r#"{"1F600": "grinning", "1F603": ["smiley", "happy"]}"#).unwrap();
        assert_eq!(map["1F600"].clone().into_vec(), vec!["grinning"]);
        assert_eq!(map["1F603"].clone().into_vec().len(), 2);
    }

    #[test]
    fn test_custom_record_defaults() {
        let record: CustomEmojiRecord = serde_json::from_str(
            r#"{"shortcode": "blobcat", "url": "https://x/a.gif", "static_url": "https://x/a.png"}"#,
        )
        .unwrap();
        assert!(record.visible_in_picker);
        assert_eq!(record.category, None);
    }
}
