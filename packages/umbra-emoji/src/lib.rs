//! # Umbra Emoji
//!
//! Emoji resolution, caching and rendering for Umbra clients: finds Unicode
//! and `:shortcode:` emoji in message HTML and replaces them with image tags
//! according to the user's display settings.
//!
//! ## Architecture Overview
//!
//! ```text
//! ┌─────────────────────────────────────────────────────────────────────────┐
//! │                         UMBRA EMOJI MODULES                             │
//! ├─────────────────────────────────────────────────────────────────────────┤
//! │                                                                         │
//! │  ┌─────────────┐  ┌─────────────┐  ┌─────────────┐  ┌──────────────┐   │
//! │  │  Tokenizer  │  │  Normalize  │  │    Cache    │  │    Render    │   │
//! │  │             │  │             │  │             │  │              │   │
//! │  │ - Unicode   │  │ - Hexcodes  │  │ - Per-locale│  │ - HTML walk  │   │
//! │  │ - :custom:  │  │ - Image ids │  │   LRUs      │  │ - Batching   │   │
//! │  │ - Flags     │  │ - Borders   │  │ - Misses    │  │ - <img> tags │   │
//! │  └──────┬──────┘  └──────┬──────┘  └──────┬──────┘  └──────┬───────┘   │
//! │         │                │                │                │           │
//! │         └────────────────┴────────────────┴────────────────┘           │
//! │                                   │                                     │
//! │  ┌─────────────┐  ┌─────────────┐ │ ┌─────────────────────────────────┐│
//! │  │   Worker    │  │   Storage   │ │ │            Loader               ││
//! │  │             │  │             │ │ │                                 ││
//! │  │ - Spawn     │  │ - SQLite    │◄┘ │ - Locale datasets              ││
//! │  │ - Timeout   │  │ - Indices   │   │ - Custom emoji                 ││
//! │  │ - Degrade   │  │ - Migration │   │ - ETags, fetched markers       ││
//! │  └─────────────┘  └─────────────┘   └─────────────────────────────────┘│
//! │                                                                         │
//! └─────────────────────────────────────────────────────────────────────────┘
//! ```
//!
//! ## Module Hierarchy
//!
//! - [`error`] - Error types for the entire library
//! - [`config`] - Pipeline configuration
//! - [`locale`] - Supported locales and the loaded-locale set
//! - [`tokenizer`] - Splits text into plain runs and emoji tokens
//! - [`normalize`] - Hexcodes, image ids, theme tables
//! - [`storage`] - SQLite emoji store
//! - [`loader`] - Dataset imports over HTTP
//! - [`worker`] - Background loading coordinator
//! - [`cache`] - Bounded lookup cache
//! - [`render`] - The HTML render pipeline

#![warn(missing_docs)]
#![warn(rustdoc::missing_crate_level_docs)]
#![cfg_attr(docsrs, feature(doc_cfg))]

// ============================================================================
// MODULE DECLARATIONS
// ============================================================================

pub mod cache;
pub mod config;
pub mod error;
pub mod loader;
pub mod locale;
pub mod normalize;
pub mod render;
pub mod storage;
pub mod tokenizer;
pub mod worker;

// ============================================================================
// RE-EXPORTS
// ============================================================================

pub use cache::{EmojiData, EmojiState, Resolution, ResolutionCache};
pub use config::EmojiConfig;
pub use error::{Error, Result};
pub use loader::{EmojiFetcher, HttpFetcher, Loader};
pub use locale::{LoadedLocales, Locale, LocaleOrCustom};
pub use render::{AppState, EmojiMode, EmojiRenderer, ExtraEmoji, ExtraEmojis, Fragment};
pub use storage::EmojiDatabase;
pub use worker::{CoordinatorState, LoadCoordinator};

// ============================================================================
// CORE INSTANCE
// ============================================================================

use once_cell::sync::OnceCell;
use parking_lot::RwLock;
use std::sync::Arc;

use storage::StorageConfig;
use worker::{TokioWorkerSpawner, WorkerSpawner};

/// Global emoji core instance
static CORE_INSTANCE: OnceCell<Arc<RwLock<EmojiCore>>> = OnceCell::new();

/// Everything the emoji pipeline needs, wired together
///
/// ## Lifecycle
///
/// ```text
/// ┌─────────────────────────────────────────────────────────────────────────┐
/// │                        EMOJI CORE LIFECYCLE                             │
/// ├─────────────────────────────────────────────────────────────────────────┤
/// │                                                                         │
/// │  1. Initialize                                                          │
/// │     ┌─────────────┐                                                    │
/// │     │ EmojiCore:: │──► Open (or migrate) the database                  │
/// │     │ initialize()│──► Rebuild the loaded-locale set                   │
/// │     └─────────────┘──► Spawn the loading worker                        │
/// │            │                                                           │
/// │            ▼                                                           │
/// │  2. Initial imports                                                    │
/// │     custom emoji, current locale, en                                   │
/// │            │                                                           │
/// │            ▼                                                           │
/// │  3. Ready for Operations                                               │
/// │     ┌─────────────┐                                                    │
/// │     │  Active     │◄─► render_html()                                   │
/// │     │  State      │◄─► load_locale()                                   │
/// │     └─────────────┘                                                    │
/// │            │                                                           │
/// │            ▼                                                           │
/// │  4. Shutdown                                                           │
/// │     ┌─────────────┐                                                    │
/// │     │ shutdown()  │──► Stop the worker                                 │
/// │     └─────────────┘                                                    │
/// │                                                                         │
/// └─────────────────────────────────────────────────────────────────────────┘
/// ```
pub struct EmojiCore {
    config: EmojiConfig,
    db: EmojiDatabase,
    renderer: Arc<EmojiRenderer>,
    coordinator: Arc<LoadCoordinator>,
    initialized: bool,
}

impl EmojiCore {
    /// Wire up a core on an open database without touching the global
    /// instance. Call [`start`](Self::start) to begin loading.
    ///
    /// Every finished import drops the cached lookups of its partition and
    /// all rendered outputs, so earlier misses do not outlive the data.
    pub fn new(
        config: EmojiConfig,
        db: EmojiDatabase,
        fetcher: Arc<dyn EmojiFetcher>,
        spawner: Arc<dyn WorkerSpawner>,
    ) -> Self {
        let cache = Arc::new(ResolutionCache::new(
            config.resolution_cache_capacity,
            db.loaded().clone(),
        ));
        let renderer = Arc::new(EmojiRenderer::new(
            db.clone(),
            cache,
            config.render_cache_capacity,
            config.asset_host(),
        ));

        let on_loaded = {
            let renderer = renderer.clone();
            Arc::new(move |key: LocaleOrCustom| {
                tracing::debug!("{} loaded, dropping cached lookups and renders", key);
                renderer.resolution_cache().clear(key);
                renderer.clear_output_cache();
            })
        };

        let loader = Loader::new(db.clone(), fetcher, config.base_url());
        let coordinator = Arc::new(
            LoadCoordinator::new(loader, spawner, config.worker_timeout).on_loaded(on_loaded),
        );

        Self {
            config,
            db,
            renderer,
            coordinator,
            initialized: true,
        }
    }

    /// Spawn the worker and queue the initial imports for `current_locale`
    pub async fn start(&self, current_locale: &str) -> CoordinatorState {
        self.coordinator
            .initialize(locale::to_supported_locale(current_locale))
            .await
    }

    /// Initialize the global emoji core
    ///
    /// This should be called once at application startup, from within a
    /// Tokio runtime.
    ///
    /// ## Example
    ///
    /// ```ignore
    /// use umbra_emoji::{EmojiConfig, EmojiCore};
    ///
    /// EmojiCore::initialize(EmojiConfig::from_env(), "de").await?;
    /// ```
    pub async fn initialize(config: EmojiConfig, current_locale: &str) -> Result<CoordinatorState> {
        tracing::info!("Initializing Umbra Emoji v{}", env!("CARGO_PKG_VERSION"));

        if Self::is_initialized() {
            return Err(Error::AlreadyInitialized);
        }

        let storage = StorageConfig {
            database_path: config.database_path.clone(),
        };
        let db = storage::shared(&storage, &LoadedLocales::new())?;
        let core = Self::new(
            config,
            db,
            Arc::new(HttpFetcher::new()),
            Arc::new(TokioWorkerSpawner),
        );
        let coordinator = core.coordinator.clone();

        CORE_INSTANCE
            .set(Arc::new(RwLock::new(core)))
            .map_err(|_| Error::AlreadyInitialized)?;

        let state = coordinator
            .initialize(locale::to_supported_locale(current_locale))
            .await;
        tracing::info!("Umbra Emoji initialized ({:?})", state);
        Ok(state)
    }

    /// Get the global core instance
    ///
    /// Returns an error if the core hasn't been initialized.
    pub fn instance() -> Result<Arc<RwLock<EmojiCore>>> {
        CORE_INSTANCE.get().cloned().ok_or(Error::NotInitialized)
    }

    /// Check if the core is initialized
    pub fn is_initialized() -> bool {
        CORE_INSTANCE.get().is_some()
    }

    /// Stop the global core's worker
    pub async fn shutdown() -> Result<()> {
        tracing::info!("Shutting down Umbra Emoji");

        if let Some(core) = CORE_INSTANCE.get() {
            let mut core = core.write();
            core.coordinator.shutdown();
            core.initialized = false;
        }

        tracing::info!("Umbra Emoji shutdown complete");
        Ok(())
    }

    /// Load another locale through the global core
    pub async fn load_locale(locale: &str) -> Result<()> {
        let coordinator = Self::instance()?.read().coordinator();
        coordinator
            .load_locale(locale::to_supported_locale(locale))
            .await
    }

    /// Render emoji in `html` through the global core. `None` means
    /// unchanged.
    pub fn render_html(
        html: &str,
        state: &AppState,
        extra: &ExtraEmojis,
    ) -> Result<Option<String>> {
        let core = Self::instance()?;
        let core = core.read();
        if !core.initialized {
            return Err(Error::NotInitialized);
        }
        core.renderer.render_html(html, state, extra)
    }

    /// Configuration the core was built with
    pub fn config(&self) -> &EmojiConfig {
        &self.config
    }

    /// The emoji store
    pub fn database(&self) -> &EmojiDatabase {
        &self.db
    }

    /// The render pipeline
    pub fn renderer(&self) -> Arc<EmojiRenderer> {
        self.renderer.clone()
    }

    /// The loading coordinator
    pub fn coordinator(&self) -> Arc<LoadCoordinator> {
        self.coordinator.clone()
    }
}

// ============================================================================
// VERSION INFO
// ============================================================================

/// Returns the version of Umbra Emoji
pub fn version() -> &'static str {
    env!("CARGO_PKG_VERSION")
}

// ============================================================================
// TESTS
// ============================================================================

#[cfg(test)]
mod tests {
    use super::*;
    use crate::loader::tests::{english_dataset, MockFetcher, BASE};
    use serde_json::json;
    use std::time::Duration;

    fn core_with(fetcher: Arc<MockFetcher>) -> (EmojiCore, Loader) {
        let db = EmojiDatabase::open(None, LoadedLocales::new()).unwrap();
        let config = EmojiConfig {
            base_url: BASE.to_string(),
            asset_host: "https://cdn.test/".to_string(),
            ..EmojiConfig::default()
        };
        let urls = Loader::new(db.clone(), fetcher.clone(), BASE);
        let core = EmojiCore::new(config, db, fetcher, Arc::new(TokioWorkerSpawner));
        (core, urls)
    }

    async fn eventually<F: Fn() -> bool>(check: F) -> bool {
        for _ in 0..100 {
            if check() {
                return true;
            }
            tokio::time::sleep(Duration::from_millis(10)).await;
        }
        false
    }

    #[test]
    fn test_version() {
        assert!(!version().is_empty());
    }

    #[test]
    fn test_global_requires_initialize() {
        let err = EmojiCore::render_html("😊", &AppState::default(), &ExtraEmojis::new())
            .unwrap_err();
        assert!(matches!(err, Error::NotInitialized));
    }

    #[tokio::test]
    async fn test_start_loads_and_renders() {
        let fetcher = Arc::new(MockFetcher::default());
        let (core, urls) = core_with(fetcher.clone());
        fetcher.respond(&urls.locale_url(locale::DEFAULT_LOCALE), english_dataset(), None);
        fetcher.respond(&urls.shortcodes_url(locale::DEFAULT_LOCALE), json!({}), None);
        fetcher.respond(&urls.custom_emoji_url(), json!([]), None);

        assert_eq!(core.start("en").await, CoordinatorState::Ready);
        let loaded = core.database().loaded().clone();
        assert!(eventually(|| loaded.contains(locale::DEFAULT_LOCALE)).await);

        let html = core
            .renderer()
            .render_html("😊", &AppState::default(), &ExtraEmojis::new())
            .unwrap();
        assert_eq!(
            html.as_deref(),
            Some(concat!(
                "<img draggable=\"false\" class=\"emojione\" alt=\"😊\" ",
                "title=\"smiling face with smiling eyes\" ",
                "src=\"https://cdn.test/emoji/1f60a.svg\">"
            ))
        );
    }

    #[tokio::test]
    async fn test_custom_import_clears_earlier_miss() {
        let fetcher = Arc::new(MockFetcher::default());
        let (core, urls) = core_with(fetcher.clone());
        let renderer = core.renderer();
        let state = AppState::default();
        let extra = ExtraEmojis::new();

        // Before any import the shortcode is unknown
        assert_eq!(renderer.render_html(":blobcat:", &state, &extra).unwrap(), None);

        fetcher.respond(&urls.locale_url(locale::DEFAULT_LOCALE), english_dataset(), None);
        fetcher.respond(&urls.shortcodes_url(locale::DEFAULT_LOCALE), json!({}), None);
        fetcher.respond(
            &urls.custom_emoji_url(),
            json!([{
                "shortcode": "blobcat",
                "url": "https://x.test/blobcat.gif",
                "static_url": "https://x.test/blobcat.png"
            }]),
            None,
        );
        core.start("en").await;

        assert!(
            eventually(|| renderer
                .render_html(":blobcat:", &state, &extra)
                .unwrap()
                .is_some())
            .await
        );
    }
}
