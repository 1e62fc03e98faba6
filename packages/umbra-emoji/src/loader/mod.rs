//! # Loader
//!
//! Fetches locale datasets, custom emoji and legacy shortcodes from the
//! server and writes them into the [`EmojiDatabase`].
//!
//! ## Import Flow
//!
//! ```text
//! ┌─────────────────────────────────────────────────────────────────────────┐
//! │                           IMPORT FLOW                                   │
//! ├─────────────────────────────────────────────────────────────────────────┤
//! │                                                                         │
//! │  import_locale(en)                                                     │
//! │     │                                                                   │
//! │     ├── cache_values has sentinel for URL? ──yes──► Skipped           │
//! │     │                                                                   │
//! │     ├── GET compact.json  (If-None-Match: stored ETag)                 │
//! │     │        │                                                          │
//! │     │        ├── 304, rows stored ────────────────► NotModified       │
//! │     │        ├── 304, table empty ──► clear ETag, GET again             │
//! │     │        ├── 4xx/5xx ─────────────────────────► Err(HttpStatus)   │
//! │     │        └── 200                                                    │
//! │     │             │                                                     │
//! │     ├── GET shortcodes.json (optional), merge                          │
//! │     ├── bulk write (one transaction)                                   │
//! │     ├── store ETag + sentinel                                          │
//! │     └── mark locale loaded ───────────────────────► Imported(n)       │
//! │                                                                         │
//! └─────────────────────────────────────────────────────────────────────────┘
//! ```
//!
//! Failures are returned to the caller; nothing is retried here.

mod http;

pub use http::{EmojiFetcher, FetchOutcome, HttpFetcher};

use std::sync::Arc;

use serde::de::DeserializeOwned;

use crate::error::{Error, Result};
use crate::locale::{Locale, LocaleOrCustom};
use crate::storage::{
    CompactEmoji, CustomEmojiRecord, EmojiDatabase, LegacyShortcodeRecord, ShortcodeMap,
    UnicodeEmojiRecord,
};

/// Value stored under a resource URL once it has been fetched
const FETCHED_SENTINEL: &str = "fetched";

/// What an import did
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ImportOutcome {
    /// The resource had already been fetched, no request was made
    Skipped,
    /// The server answered 304
    NotModified,
    /// This many records were written
    Imported(usize),
}

/// Imports emoji datasets into the database
#[derive(Clone)]
pub struct Loader {
    db: EmojiDatabase,
    fetcher: Arc<dyn EmojiFetcher>,
    base_url: String,
}

impl Loader {
    /// Create a loader writing to `db` and fetching from `base_url`
    pub fn new(db: EmojiDatabase, fetcher: Arc<dyn EmojiFetcher>, base_url: impl Into<String>) -> Self {
        let base_url = base_url.into().trim_end_matches('/').to_string();
        Self {
            db,
            fetcher,
            base_url,
        }
    }

    /// Same fetcher and server, different database handle
    pub fn with_database(&self, db: EmojiDatabase) -> Self {
        Self {
            db,
            fetcher: self.fetcher.clone(),
            base_url: self.base_url.clone(),
        }
    }

    /// The database written to
    pub fn database(&self) -> &EmojiDatabase {
        &self.db
    }

    /// URL of a locale's emoji dataset
    pub fn locale_url(&self, locale: Locale) -> String {
        format!("{}/emoji/{}/compact.json", self.base_url, locale)
    }

    /// URL of a locale's supplemental shortcodes
    pub fn shortcodes_url(&self, locale: Locale) -> String {
        format!("{}/emoji/{}/shortcodes.json", self.base_url, locale)
    }

    /// URL of the legacy shortcode aliases
    pub fn legacy_shortcodes_url(&self) -> String {
        format!("{}/emoji/shortcodes/legacy.json", self.base_url)
    }

    /// URL of the server's custom emoji
    pub fn custom_emoji_url(&self) -> String {
        format!("{}/api/v1/custom_emojis", self.base_url)
    }

    /// Import a locale or the custom set
    pub async fn load(&self, key: LocaleOrCustom) -> Result<ImportOutcome> {
        match key {
            LocaleOrCustom::Locale(locale) => self.import_locale(locale, true).await,
            LocaleOrCustom::Custom => self.import_custom_emoji().await,
        }
    }

    /// Import a locale's emoji, merged with its supplemental shortcodes when
    /// `include_shortcodes` is set.
    pub async fn import_locale(&self, locale: Locale, include_shortcodes: bool) -> Result<ImportOutcome> {
        let url = self.locale_url(locale);
        let loaded = self.db.loaded().clone();

        if self.db.get_cache_value(&url)?.is_some() {
            tracing::debug!("Locale {} already fetched, skipping", locale);
            self.mark_if_present(locale)?;
            return Ok(ImportOutcome::Skipped);
        }

        let _importing = loaded.begin_import(locale.into());
        let etag = self.db.load_etag(locale.into())?;

        tracing::info!("Importing emoji for locale {}", locale);
        let (body, new_etag) = match self.fetcher.fetch(&url, etag.as_deref()).await? {
            FetchOutcome::Fetched { body, etag } => (body, etag),
            FetchOutcome::NotModified if self.db.count_rows(locale)? > 0 => {
                tracing::info!("Emoji for locale {} not modified", locale);
                self.db.put_cache_value(&url, FETCHED_SENTINEL)?;
                loaded.mark_loaded(locale);
                return Ok(ImportOutcome::NotModified);
            }
            FetchOutcome::NotModified => {
                // The ETag outlived the rows it was stored for
                tracing::warn!(
                    "Emoji for locale {} not modified but none are stored, refetching",
                    locale
                );
                self.db.clear_etag(locale.into())?;
                match self.fetcher.fetch(&url, None).await? {
                    FetchOutcome::Fetched { body, etag } => (body, etag),
                    FetchOutcome::NotModified => {
                        return Err(Error::DataFormat(format!(
                            "{} answered 304 to an unconditional request",
                            url
                        )));
                    }
                }
            }
        };

        let emojis: Vec<CompactEmoji> = parse_array(body, &url)?;
        let shortcodes = if include_shortcodes {
            self.fetch_shortcodes(&self.shortcodes_url(locale)).await?
        } else {
            ShortcodeMap::new()
        };

        let records: Vec<UnicodeEmojiRecord> = emojis
            .into_iter()
            .flat_map(|emoji| emoji.into_records(&shortcodes))
            .collect();

        let written = self.db.put_locale_emojis(locale, &records)?;
        if let Some(etag) = new_etag {
            self.db.put_etag(locale.into(), &etag)?;
        }
        self.db.put_cache_value(&url, FETCHED_SENTINEL)?;
        loaded.mark_loaded(locale);

        tracing::info!("Imported {} emoji for locale {}", written, locale);
        Ok(ImportOutcome::Imported(written))
    }

    /// Replace the stored custom emoji with the server's current set.
    ///
    /// Only the ETag deduplicates this one: the set changes server-side, so
    /// no fetched-resource sentinel is kept.
    pub async fn import_custom_emoji(&self) -> Result<ImportOutcome> {
        let url = self.custom_emoji_url();
        let _importing = self.db.loaded().begin_import(LocaleOrCustom::Custom);
        let etag = self.db.load_etag(LocaleOrCustom::Custom)?;

        tracing::info!("Importing custom emoji");
        let (body, new_etag) = match self.fetcher.fetch(&url, etag.as_deref()).await? {
            FetchOutcome::NotModified => {
                tracing::info!("Custom emoji not modified");
                return Ok(ImportOutcome::NotModified);
            }
            FetchOutcome::Fetched { body, etag } => (body, etag),
        };

        let records: Vec<CustomEmojiRecord> = parse_array(body, &url)?;
        let written = self.db.put_custom_emojis(&records, true)?;
        if let Some(etag) = new_etag {
            self.db.put_etag(LocaleOrCustom::Custom, &etag)?;
        }

        tracing::info!("Imported {} custom emoji", written);
        Ok(ImportOutcome::Imported(written))
    }

    /// Import the legacy shortcode aliases
    pub async fn import_legacy_shortcodes(&self) -> Result<ImportOutcome> {
        let url = self.legacy_shortcodes_url();
        if self.db.get_cache_value(&url)?.is_some() {
            tracing::debug!("Legacy shortcodes already fetched, skipping");
            return Ok(ImportOutcome::Skipped);
        }

        let map = self.fetch_shortcodes(&url).await?;
        let records: Vec<LegacyShortcodeRecord> = map
            .into_iter()
            .map(|(hexcode, shortcodes)| LegacyShortcodeRecord {
                hexcode,
                shortcodes: shortcodes.into_vec(),
            })
            .collect();

        let written = self.db.put_legacy_shortcodes(&records)?;
        self.db.put_cache_value(&url, FETCHED_SENTINEL)?;

        tracing::info!("Imported {} legacy shortcode entries", written);
        Ok(ImportOutcome::Imported(written))
    }

    async fn fetch_shortcodes(&self, url: &str) -> Result<ShortcodeMap> {
        match self.fetcher.fetch(url, None).await? {
            FetchOutcome::NotModified => Ok(ShortcodeMap::new()),
            FetchOutcome::Fetched { body, .. } => {
                if !body.is_object() {
                    return Err(Error::DataFormat(format!("{} is not an object", url)));
                }
                Ok(serde_json::from_value(body)?)
            }
        }
    }

    fn mark_if_present(&self, locale: Locale) -> Result<()> {
        if self.db.count_rows(locale)? > 0 {
            self.db.loaded().mark_loaded(locale);
        }
        Ok(())
    }
}

fn parse_array<T: DeserializeOwned>(body: serde_json::Value, url: &str) -> Result<Vec<T>> {
    if !body.is_array() {
        return Err(Error::DataFormat(format!("{} is not an array", url)));
    }
    Ok(serde_json::from_value(body)?)
}

// ============================================================================
// TESTS
// ============================================================================

#[cfg(test)]
pub(crate) mod tests {
    use super::*;
    use crate::locale::{LoadedLocales, DEFAULT_LOCALE};
    use async_trait::async_trait;
    use parking_lot::Mutex;
    use serde_json::json;
    use std::collections::HashMap;
    use std::sync::atomic::{AtomicUsize, Ordering};

    /// Fetcher answering from a fixed URL table, 404 for anything else
    #[derive(Default)]
    pub(crate) struct MockFetcher {
        responses: Mutex<HashMap<String, std::result::Result<FetchOutcome, u16>>>,
        calls: AtomicUsize,
        seen_etags: Mutex<Vec<(String, Option<String>)>>,
        current_etags: Mutex<HashMap<String, String>>,
    }

    impl MockFetcher {
        pub(crate) fn respond(&self, url: &str, body: serde_json::Value, etag: Option<&str>) {
            self.responses.lock().insert(
                url.to_string(),
                Ok(FetchOutcome::Fetched {
                    body,
                    etag: etag.map(str::to_string),
                }),
            );
        }

        pub(crate) fn not_modified(&self, url: &str) {
            self.responses
                .lock()
                .insert(url.to_string(), Ok(FetchOutcome::NotModified));
        }

        /// Answer 304 whenever the request carries `etag`
        pub(crate) fn not_modified_for(&self, url: &str, etag: &str) {
            self.current_etags
                .lock()
                .insert(url.to_string(), etag.to_string());
        }

        pub(crate) fn fail(&self, url: &str, status: u16) {
            self.responses.lock().insert(url.to_string(), Err(status));
        }

        pub(crate) fn calls(&self) -> usize {
            self.calls.load(Ordering::SeqCst)
        }

        pub(crate) fn etag_sent(&self, url: &str) -> Option<String> {
            self.seen_etags
                .lock()
                .iter()
                .rev()
                .find(|(seen, _)| seen == url)
                .and_then(|(_, etag)| etag.clone())
        }
    }

    #[async_trait]
    impl EmojiFetcher for MockFetcher {
        async fn fetch(&self, url: &str, etag: Option<&str>) -> Result<FetchOutcome> {
            self.calls.fetch_add(1, Ordering::SeqCst);
            self.seen_etags
                .lock()
                .push((url.to_string(), etag.map(str::to_string)));

            if etag.is_some() && self.current_etags.lock().get(url).map(String::as_str) == etag {
                return Ok(FetchOutcome::NotModified);
            }
            match self.responses.lock().get(url) {
                Some(Ok(outcome)) => Ok(outcome.clone()),
                Some(Err(status)) => Err(Error::HttpStatus {
                    url: url.to_string(),
                    status: *status,
                }),
                None => Err(Error::HttpStatus {
                    url: url.to_string(),
                    status: 404,
                }),
            }
        }
    }

    pub(crate) const BASE: &str = "http://emoji.test";

    pub(crate) fn english_dataset() -> serde_json::Value {
        json!([
            {"hexcode": "1F60A", "unicode": "😊", "label": "smiling face with smiling eyes",
             "group": 0, "order": 10, "tags": ["blush", "smile"]},
            {"hexcode": "1F1EA-1F1FA", "unicode": "🇪🇺", "label": "flag: European Union",
             "group": 9, "order": 1, "tags": ["flag"]},
            {"hexcode": "1F44B", "unicode": "👋", "label": "waving hand", "group": 1, "order": 150,
             "skins": [{"hexcode": "1F44B-1F3FD", "unicode": "👋🏽", "label": "waving hand: medium skin tone"}]}
        ])
    }

    pub(crate) fn loader_with(fetcher: Arc<MockFetcher>) -> Loader {
        let db = EmojiDatabase::open(None, LoadedLocales::new()).unwrap();
        Loader::new(db, fetcher, BASE)
    }

    #[tokio::test]
    async fn test_import_locale_writes_and_marks_loaded() {
        let fetcher = Arc::new(MockFetcher::default());
        let loader = loader_with(fetcher.clone());
        fetcher.respond(&loader.locale_url(DEFAULT_LOCALE), english_dataset(), Some("\"v1\""));
        fetcher.respond(
            &loader.shortcodes_url(DEFAULT_LOCALE),
            json!({"1F60A": ["blush"], "1F44B": "wave"}),
            None,
        );

        let outcome = loader.import_locale(DEFAULT_LOCALE, true).await.unwrap();
        assert_eq!(outcome, ImportOutcome::Imported(4));

        let db = loader.database();
        assert!(db.loaded().contains(DEFAULT_LOCALE));
        assert_eq!(db.load_etag(DEFAULT_LOCALE.into()).unwrap().as_deref(), Some("\"v1\""));

        let wave = db.get_by_hexcode(DEFAULT_LOCALE, "1F44B").unwrap().unwrap();
        assert_eq!(wave.shortcodes, vec!["wave"]);
        assert_eq!(wave.skin_hexcodes, vec!["1F44B-1F3FD"]);
        assert!(db.get_by_hexcode(DEFAULT_LOCALE, "1F44B-1F3FD").unwrap().is_some());
    }

    #[tokio::test]
    async fn test_repeat_import_is_deduplicated() {
        let fetcher = Arc::new(MockFetcher::default());
        let loader = loader_with(fetcher.clone());
        fetcher.respond(&loader.locale_url(DEFAULT_LOCALE), english_dataset(), None);

        loader.import_locale(DEFAULT_LOCALE, false).await.unwrap();
        let second = loader.import_locale(DEFAULT_LOCALE, false).await.unwrap();

        assert_eq!(second, ImportOutcome::Skipped);
        assert_eq!(fetcher.calls(), 1);
    }

    #[tokio::test]
    async fn test_not_modified_keeps_stored_rows() {
        let fetcher = Arc::new(MockFetcher::default());
        let loader = loader_with(fetcher.clone());
        let url = loader.locale_url(DEFAULT_LOCALE);
        let db = loader.database();
        db.put_locale_emojis(
            DEFAULT_LOCALE,
            &parse_array::<CompactEmoji>(english_dataset(), &url)
                .unwrap()
                .into_iter()
                .flat_map(|emoji| emoji.into_records(&ShortcodeMap::new()))
                .collect::<Vec<_>>(),
        )
        .unwrap();
        db.loaded().clear();
        db.put_etag(DEFAULT_LOCALE.into(), "\"v7\"").unwrap();
        fetcher.not_modified(&url);

        let outcome = loader.import_locale(DEFAULT_LOCALE, true).await.unwrap();
        assert_eq!(outcome, ImportOutcome::NotModified);
        assert_eq!(fetcher.etag_sent(&url).as_deref(), Some("\"v7\""));
        assert!(db.loaded().contains(DEFAULT_LOCALE));
        // Shortcodes were never requested
        assert_eq!(fetcher.calls(), 1);

        let again = loader.import_locale(DEFAULT_LOCALE, true).await.unwrap();
        assert_eq!(again, ImportOutcome::Skipped);
    }

    #[tokio::test]
    async fn test_not_modified_without_rows_refetches() {
        let fetcher = Arc::new(MockFetcher::default());
        let loader = loader_with(fetcher.clone());
        let url = loader.locale_url(DEFAULT_LOCALE);
        let db = loader.database();
        db.put_etag(DEFAULT_LOCALE.into(), "\"v1\"").unwrap();
        fetcher.respond(&url, english_dataset(), Some("\"v2\""));
        fetcher.not_modified_for(&url, "\"v1\"");

        let outcome = loader.import_locale(DEFAULT_LOCALE, false).await.unwrap();
        assert_eq!(outcome, ImportOutcome::Imported(4));
        assert_eq!(fetcher.calls(), 2);
        assert_eq!(fetcher.etag_sent(&url), None);
        assert!(db.loaded().contains(DEFAULT_LOCALE));
        assert_eq!(db.count_rows(DEFAULT_LOCALE).unwrap(), 4);
        assert_eq!(db.load_etag(DEFAULT_LOCALE.into()).unwrap().as_deref(), Some("\"v2\""));

        let again = loader.import_locale(DEFAULT_LOCALE, false).await.unwrap();
        assert_eq!(again, ImportOutcome::Skipped);
    }

    #[tokio::test]
    async fn test_unconditional_not_modified_is_data_error() {
        let fetcher = Arc::new(MockFetcher::default());
        let loader = loader_with(fetcher.clone());
        let url = loader.locale_url(DEFAULT_LOCALE);
        loader.database().put_etag(DEFAULT_LOCALE.into(), "\"v1\"").unwrap();
        fetcher.not_modified(&url);

        let err = loader.import_locale(DEFAULT_LOCALE, false).await.unwrap_err();
        assert!(matches!(err, Error::DataFormat(_)));
        assert_eq!(loader.database().load_etag(DEFAULT_LOCALE.into()).unwrap(), None);
        assert!(loader.database().get_cache_value(&url).unwrap().is_none());
        assert!(!loader.database().loaded().contains(DEFAULT_LOCALE));
    }

    #[tokio::test]
    async fn test_http_failure_is_hard_error() {
        let fetcher = Arc::new(MockFetcher::default());
        let loader = loader_with(fetcher.clone());
        fetcher.fail(&loader.locale_url(DEFAULT_LOCALE), 500);

        let err = loader.import_locale(DEFAULT_LOCALE, true).await.unwrap_err();
        assert!(matches!(err, Error::HttpStatus { status: 500, .. }));

        let loaded = loader.database().loaded();
        assert!(!loaded.contains(DEFAULT_LOCALE));
        assert!(!loaded.is_importing(DEFAULT_LOCALE.into()));
        // No sentinel, so a retry hits the network again
        let _ = loader.import_locale(DEFAULT_LOCALE, true).await;
        assert_eq!(fetcher.calls(), 2);
    }

    #[tokio::test]
    async fn test_non_array_payload_is_data_error() {
        let fetcher = Arc::new(MockFetcher::default());
        let loader = loader_with(fetcher.clone());
        fetcher.respond(&loader.locale_url(DEFAULT_LOCALE), json!({"error": "nope"}), None);

        let err = loader.import_locale(DEFAULT_LOCALE, false).await.unwrap_err();
        assert!(matches!(err, Error::DataFormat(_)));
    }

    #[tokio::test]
    async fn test_custom_import_replaces_stale_emoji() {
        let fetcher = Arc::new(MockFetcher::default());
        let loader = loader_with(fetcher.clone());
        loader
            .database()
            .put_custom_emoji(&CustomEmojiRecord {
                shortcode: "deleted".into(),
                url: "https://x/deleted.png".into(),
                static_url: "https://x/deleted.png".into(),
                category: None,
                visible_in_picker: true,
            })
            .unwrap();
        fetcher.respond(
            &loader.custom_emoji_url(),
            json!([{"shortcode": "blobcat", "url": "https://x/blobcat.gif",
                    "static_url": "https://x/blobcat.png", "visible_in_picker": true}]),
            Some("\"c1\""),
        );

        let outcome = loader.import_custom_emoji().await.unwrap();
        assert_eq!(outcome, ImportOutcome::Imported(1));

        let db = loader.database();
        assert!(db.get_custom("deleted").unwrap().is_none());
        assert!(db.get_custom("blobcat").unwrap().is_some());
        assert_eq!(db.load_etag(LocaleOrCustom::Custom).unwrap().as_deref(), Some("\"c1\""));

        // Custom emoji are re-requested with the stored ETag
        fetcher.not_modified(&loader.custom_emoji_url());
        assert_eq!(loader.import_custom_emoji().await.unwrap(), ImportOutcome::NotModified);
        assert_eq!(fetcher.etag_sent(&loader.custom_emoji_url()).as_deref(), Some("\"c1\""));
    }

    #[tokio::test]
    async fn test_import_legacy_shortcodes() {
        let fetcher = Arc::new(MockFetcher::default());
        let loader = loader_with(fetcher.clone());
        fetcher.respond(
            &loader.legacy_shortcodes_url(),
            json!({"1F44D": ["+1", "thumbsup"], "1F44E": "-1"}),
            None,
        );

        assert_eq!(
            loader.import_legacy_shortcodes().await.unwrap(),
            ImportOutcome::Imported(2)
        );
        assert_eq!(
            loader.database().find_hexcodes_by_legacy_shortcode("+1").unwrap(),
            vec!["1F44D"]
        );
        assert_eq!(
            loader.import_legacy_shortcodes().await.unwrap(),
            ImportOutcome::Skipped
        );
    }

    #[tokio::test]
    async fn test_urls() {
        let loader = loader_with(Arc::new(MockFetcher::default()));
        let en_gb = Locale::parse("en-gb").unwrap();
        assert_eq!(loader.locale_url(en_gb), "http://emoji.test/emoji/en-gb/compact.json");
        assert_eq!(loader.custom_emoji_url(), "http://emoji.test/api/v1/custom_emojis");
    }
}
