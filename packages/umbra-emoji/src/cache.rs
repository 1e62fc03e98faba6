//! # Resolution Cache
//!
//! Bounded in-memory memo of store lookups: one LRU per locale plus one for
//! custom emoji. A confirmed miss is stored as [`Resolution::Missing`] so an
//! unknown code is queried once, not on every render.

use std::collections::HashMap;
use std::num::NonZeroUsize;

use lru::LruCache;
use parking_lot::Mutex;

use crate::locale::{LoadedLocales, Locale, LocaleOrCustom};
use crate::storage::{CustomEmojiRecord, UnicodeEmojiRecord};
use crate::tokenizer::EmojiKind;

/// Record backing a resolved emoji
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum EmojiData {
    /// A Unicode emoji from a locale table
    Unicode(UnicodeEmojiRecord),
    /// A custom emoji
    Custom(CustomEmojiRecord),
}

/// Outcome of looking a code up in the store
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Resolution {
    /// The store has a record
    Found(EmojiData),
    /// The store confirmed there is no record
    Missing,
}

impl Resolution {
    /// The record, if found
    pub fn data(&self) -> Option<&EmojiData> {
        match self {
            Resolution::Found(data) => Some(data),
            Resolution::Missing => None,
        }
    }
}

/// An emoji token together with what is known about it
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct EmojiState {
    /// Unicode or custom
    pub kind: EmojiKind,
    /// Glyph or shortcode
    pub code: String,
    /// `None` until looked up
    pub data: Option<Resolution>,
}

/// Per-locale and custom LRU caches of lookup results
pub struct ResolutionCache {
    capacity: NonZeroUsize,
    locales: Mutex<HashMap<Locale, LruCache<String, Resolution>>>,
    custom: Mutex<LruCache<String, Resolution>>,
    loaded: LoadedLocales,
}

impl ResolutionCache {
    /// Create caches holding at most `capacity` entries each
    ///
    /// `loaded` is consulted so that misses are not remembered while an
    /// import of the same locale is still writing.
    pub fn new(capacity: usize, loaded: LoadedLocales) -> Self {
        let capacity = NonZeroUsize::new(capacity).unwrap_or(NonZeroUsize::MIN);
        Self {
            capacity,
            locales: Mutex::new(HashMap::new()),
            custom: Mutex::new(LruCache::new(capacity)),
            loaded,
        }
    }

    /// Entries kept per partition
    pub fn capacity(&self) -> usize {
        self.capacity.get()
    }

    /// Cached resolution of `code`; `None` means never looked up
    pub fn get(&self, key: LocaleOrCustom, code: &str) -> Option<Resolution> {
        match key {
            LocaleOrCustom::Custom => self.custom.lock().get(code).cloned(),
            LocaleOrCustom::Locale(locale) => self
                .locales
                .lock()
                .get_mut(&locale)
                .and_then(|cache| cache.get(code).cloned()),
        }
    }

    /// Remember the resolution of `code`.
    ///
    /// Returns false when a `Missing` was not stored because an import of
    /// that partition is in flight.
    pub fn set(&self, key: LocaleOrCustom, code: &str, resolution: Resolution) -> bool {
        if resolution == Resolution::Missing && self.loaded.is_importing(key) {
            tracing::trace!("Not caching miss for {} during {} import", code, key);
            return false;
        }

        match key {
            LocaleOrCustom::Custom => {
                self.custom.lock().put(code.to_string(), resolution);
            }
            LocaleOrCustom::Locale(locale) => {
                let capacity = self.capacity;
                self.locales
                    .lock()
                    .entry(locale)
                    .or_insert_with(|| LruCache::new(capacity))
                    .put(code.to_string(), resolution);
            }
        }
        true
    }

    /// Number of entries cached for a partition
    pub fn len(&self, key: LocaleOrCustom) -> usize {
        match key {
            LocaleOrCustom::Custom => self.custom.lock().len(),
            LocaleOrCustom::Locale(locale) => {
                self.locales.lock().get(&locale).map_or(0, |cache| cache.len())
            }
        }
    }

    /// Whether a partition holds no entries
    pub fn is_empty(&self, key: LocaleOrCustom) -> bool {
        self.len(key) == 0
    }

    /// Drop everything cached for a partition
    pub fn clear(&self, key: LocaleOrCustom) {
        match key {
            LocaleOrCustom::Custom => self.custom.lock().clear(),
            LocaleOrCustom::Locale(locale) => {
                self.locales.lock().remove(&locale);
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::locale::DEFAULT_LOCALE;

    fn custom(shortcode: &str) -> Resolution {
        Resolution::Found(EmojiData::Custom(CustomEmojiRecord {
            shortcode: shortcode.to_string(),
            url: String::new(),
            static_url: String::new(),
            category: None,
            visible_in_picker: true,
        }))
    }

    #[test]
    fn test_get_after_set() {
        let cache = ResolutionCache::new(4, LoadedLocales::new());
        assert_eq!(cache.get(LocaleOrCustom::Custom, "blobcat"), None);

        cache.set(LocaleOrCustom::Custom, "blobcat", custom("blobcat"));
        assert_eq!(cache.get(LocaleOrCustom::Custom, "blobcat"), Some(custom("blobcat")));

        cache.set(DEFAULT_LOCALE.into(), "FFFF", Resolution::Missing);
        assert_eq!(cache.get(DEFAULT_LOCALE.into(), "FFFF"), Some(Resolution::Missing));
    }

    #[test]
    fn test_bound_is_never_exceeded() {
        let cache = ResolutionCache::new(3, LoadedLocales::new());
        for i in 0..10 {
            cache.set(DEFAULT_LOCALE.into(), &format!("code{}", i), Resolution::Missing);
            assert!(cache.len(DEFAULT_LOCALE.into()) <= 3);
        }
        // The most recent entry survives
        assert!(cache.get(DEFAULT_LOCALE.into(), "code9").is_some());
        assert!(cache.get(DEFAULT_LOCALE.into(), "code0").is_none());
    }

    #[test]
    fn test_partitions_are_independent() {
        let cache = ResolutionCache::new(2, LoadedLocales::new());
        let de: LocaleOrCustom = Locale::parse("de").unwrap().into();
        cache.set(DEFAULT_LOCALE.into(), "1F600", Resolution::Missing);
        assert!(cache.get(de, "1F600").is_none());
        assert!(cache.get(LocaleOrCustom::Custom, "1F600").is_none());
    }

    #[test]
    fn test_missing_not_cached_during_import() {
        let loaded = LoadedLocales::new();
        let cache = ResolutionCache::new(4, loaded.clone());
        let guard = loaded.begin_import(LocaleOrCustom::Custom);

        assert!(!cache.set(LocaleOrCustom::Custom, "soon", Resolution::Missing));
        assert!(cache.get(LocaleOrCustom::Custom, "soon").is_none());
        // Found values are still cached
        assert!(cache.set(LocaleOrCustom::Custom, "here", custom("here")));

        drop(guard);
        assert!(cache.set(LocaleOrCustom::Custom, "soon", Resolution::Missing));
    }

    #[test]
    fn test_zero_capacity_is_clamped() {
        let cache = ResolutionCache::new(0, LoadedLocales::new());
        assert_eq!(cache.capacity(), 1);
    }

    #[test]
    fn test_clear() {
        let cache = ResolutionCache::new(4, LoadedLocales::new());
        cache.set(LocaleOrCustom::Custom, "a", Resolution::Missing);
        cache.clear(LocaleOrCustom::Custom);
        assert!(cache.is_empty(LocaleOrCustom::Custom));
    }
}
