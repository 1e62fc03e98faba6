//! # Locales
//!
//! The set of locales emoji data exists for, and the process-wide record of
//! which of them have rows in the database.
//!
//! ## Loaded-Locale Lifecycle
//!
//! ```text
//! ┌─────────────────────────────────────────────────────────────────────────┐
//! │                       LOADED LOCALES                                    │
//! ├─────────────────────────────────────────────────────────────────────────┤
//! │                                                                         │
//! │  EmojiDatabase::open()                                                 │
//! │     │  count rows per locale table                                     │
//! │     ▼                                                                   │
//! │  LoadedLocales::sync_from_counts()   ◄── rebuilt at open time          │
//! │     │                                                                   │
//! │     ▼                                                                   │
//! │  Loader::import_locale()                                               │
//! │     │  begin_import() ──► reads don't cache "missing" meanwhile        │
//! │     │  bulk write                                                      │
//! │     ▼                                                                   │
//! │  mark_loaded()                      ◄── incremental                    │
//! │                                                                         │
//! └─────────────────────────────────────────────────────────────────────────┘
//! ```

use std::collections::{HashMap, HashSet};
use std::fmt;
use std::sync::Arc;

use parking_lot::RwLock;
use serde::{Deserialize, Serialize};

/// Every locale the emoji dataset is published for.
pub const SUPPORTED_LOCALES: &[&str] = &[
    "bn", "da", "de", "en", "en-gb", "es", "es-mx", "et", "fi", "fr", "hi", "hu", "it", "ja",
    "ko", "lt", "ms", "nb", "nl", "pl", "pt", "ru", "sv", "th", "uk", "vi", "zh", "zh-hant",
];

/// Locale every lookup falls back to
pub const DEFAULT_LOCALE: Locale = Locale("en");

/// Key used for the custom emoji partition (ETags, in-flight imports)
pub const CUSTOM_KEY: &str = "custom";

/// A locale from [`SUPPORTED_LOCALES`]
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct Locale(&'static str);

impl Locale {
    /// Look up a supported locale (case-insensitive, exact match)
    pub fn parse(value: &str) -> Option<Self> {
        let wanted = value.trim().to_ascii_lowercase();
        SUPPORTED_LOCALES
            .iter()
            .find(|locale| **locale == wanted)
            .map(|locale| Locale(*locale))
    }

    /// All supported locales
    pub fn all() -> impl Iterator<Item = Locale> {
        SUPPORTED_LOCALES.iter().map(|locale| Locale(*locale))
    }

    /// The locale code, e.g. `en-gb`
    pub fn as_str(&self) -> &'static str {
        self.0
    }

    /// Name of the database table holding this locale's emoji
    pub fn table_name(&self) -> String {
        format!("locale_{}", self.0.replace('-', "_"))
    }
}

impl fmt::Display for Locale {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.0)
    }
}

impl Serialize for Locale {
    fn serialize<S>(&self, serializer: S) -> std::result::Result<S::Ok, S::Error>
    where
        S: serde::Serializer,
    {
        serializer.serialize_str(self.0)
    }
}

impl<'de> Deserialize<'de> for Locale {
    fn deserialize<D>(deserializer: D) -> std::result::Result<Self, D::Error>
    where
        D: serde::Deserializer<'de>,
    {
        let s = String::deserialize(deserializer)?;
        Locale::parse(&s)
            .ok_or_else(|| serde::de::Error::custom(format!("unsupported locale: {}", s)))
    }
}

/// Map any locale string onto a supported one, falling back to English.
///
/// Region variants that are not themselves published (e.g. `fr-CA`) fall back
/// to `en` rather than to their base language.
pub fn to_supported_locale(value: &str) -> Locale {
    Locale::parse(value).unwrap_or(DEFAULT_LOCALE)
}

/// Either a supported locale or the custom emoji partition
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum LocaleOrCustom {
    /// A locale dataset
    Locale(Locale),
    /// The server's custom emoji set
    Custom,
}

impl LocaleOrCustom {
    /// Parse `custom` or a locale string (unsupported locales map to `en`)
    pub fn parse(value: &str) -> Self {
        if value.eq_ignore_ascii_case(CUSTOM_KEY) {
            LocaleOrCustom::Custom
        } else {
            LocaleOrCustom::Locale(to_supported_locale(value))
        }
    }

    /// Storage key
    pub fn as_str(&self) -> &'static str {
        match self {
            LocaleOrCustom::Locale(locale) => locale.as_str(),
            LocaleOrCustom::Custom => CUSTOM_KEY,
        }
    }
}

impl From<Locale> for LocaleOrCustom {
    fn from(locale: Locale) -> Self {
        LocaleOrCustom::Locale(locale)
    }
}

impl fmt::Display for LocaleOrCustom {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

// ============================================================================
// LOADED LOCALES SERVICE
// ============================================================================

#[derive(Debug, Default)]
struct LoadedState {
    loaded: HashSet<Locale>,
    importing: HashMap<LocaleOrCustom, usize>,
}

/// Process-scoped record of which locales have rows in the database.
///
/// Cheap to clone; clones share state. The database and the loader each hold
/// a handle, the background worker gets its own private instance.
#[derive(Debug, Clone, Default)]
pub struct LoadedLocales {
    inner: Arc<RwLock<LoadedState>>,
}

impl LoadedLocales {
    /// Create an empty set
    pub fn new() -> Self {
        Self::default()
    }

    /// Whether `locale` has been confirmed present
    pub fn contains(&self, locale: Locale) -> bool {
        self.inner.read().loaded.contains(&locale)
    }

    /// Record a locale as loaded
    pub fn mark_loaded(&self, locale: Locale) {
        if self.inner.write().loaded.insert(locale) {
            tracing::debug!("Locale {} marked as loaded", locale);
        }
    }

    /// Forget every loaded locale (test reset / database wipe)
    pub fn clear(&self) {
        self.inner.write().loaded.clear();
    }

    /// Rebuild the set from per-locale row counts
    pub fn sync_from_counts<I>(&self, counts: I)
    where
        I: IntoIterator<Item = (Locale, usize)>,
    {
        let mut state = self.inner.write();
        state.loaded = counts
            .into_iter()
            .filter(|(_, count)| *count > 0)
            .map(|(locale, _)| locale)
            .collect();
        tracing::debug!("Loaded locales synced: {} present", state.loaded.len());
    }

    /// Loaded locales, sorted
    pub fn snapshot(&self) -> Vec<Locale> {
        let mut locales: Vec<Locale> = self.inner.read().loaded.iter().copied().collect();
        locales.sort();
        locales
    }

    /// The supported forms of `requested` that are not loaded yet, de-duplicated
    pub fn find_missing<S: AsRef<str>>(&self, requested: &[S]) -> Vec<Locale> {
        let state = self.inner.read();
        let mut missing = Vec::new();
        for value in requested {
            let locale = to_supported_locale(value.as_ref());
            if !state.loaded.contains(&locale) && !missing.contains(&locale) {
                missing.push(locale);
            }
        }
        missing
    }

    /// Mark an import as in flight until the returned guard is dropped
    pub fn begin_import(&self, key: LocaleOrCustom) -> ImportGuard {
        *self.inner.write().importing.entry(key).or_insert(0) += 1;
        ImportGuard {
            owner: self.clone(),
            key,
        }
    }

    /// Whether an import of `key` is currently running
    pub fn is_importing(&self, key: LocaleOrCustom) -> bool {
        self.inner
            .read()
            .importing
            .get(&key)
            .map_or(false, |count| *count > 0)
    }
}

/// Keeps an import marked as in flight while alive
#[derive(Debug)]
pub struct ImportGuard {
    owner: LoadedLocales,
    key: LocaleOrCustom,
}

impl Drop for ImportGuard {
    fn drop(&mut self) {
        let mut state = self.owner.inner.write();
        if let Some(count) = state.importing.get_mut(&self.key) {
            *count = count.saturating_sub(1);
            if *count == 0 {
                state.importing.remove(&self.key);
            }
        }
    }
}

// ============================================================================
// TESTS
// ============================================================================
