//! # Storage Module
//!
//! Persistent emoji store on SQLite.
//!
//! ## Storage Architecture
//!
//! ```text
//! ┌─────────────────────────────────────────────────────────────────────────┐
//! │                         STORAGE SYSTEM                                  │
//! ├─────────────────────────────────────────────────────────────────────────┤
//! │                                                                         │
//! │  ┌─────────────────────────────────────────────────────────────────┐   │
//! │  │  SQLite Database                                                │   │
//! │  │  ───────────────                                                │   │
//! │  │                                                                 │   │
//! │  │  Tables:                                                       │   │
//! │  │  • locale_<code> - one per supported locale, hexcode keyed     │   │
//! │  │  • custom - server custom emoji, shortcode keyed               │   │
//! │  │  • shortcodes - legacy shortcode aliases                       │   │
//! │  │  • etags - dataset ETags                                       │   │
//! │  │  • cache_values - fetched-resource sentinels                   │   │
//! │  │                                                                 │   │
//! │  │  Opened once per process (memoized), migrated on version bump  │   │
//! │  └─────────────────────────────────────────────────────────────────┘   │
//! │                                                                         │
//! └─────────────────────────────────────────────────────────────────────────┘
//! ```

mod database;
mod records;
mod schema;

pub use database::{EmojiDatabase, IndexChanges};
pub use records::{
    derive_tokens, CompactEmoji, CustomEmojiRecord, LegacyShortcodeRecord, ShortcodeList,
    ShortcodeMap, UnicodeEmojiRecord,
};
pub use schema::SCHEMA_VERSION;

use once_cell::sync::OnceCell;

use crate::error::Result;
use crate::locale::LoadedLocales;

/// Process-wide database handle
static SHARED_DATABASE: OnceCell<EmojiDatabase> = OnceCell::new();

/// Storage configuration
#[derive(Debug, Clone, Default)]
pub struct StorageConfig {
    /// Path to the database file (None for in-memory)
    pub database_path: Option<String>,
}

/// Open the process-wide database, or return the one already open.
///
/// The first call decides the path and the loaded-locale set; later calls get
/// the memoized handle.
pub fn shared(config: &StorageConfig, loaded: &LoadedLocales) -> Result<EmojiDatabase> {
    SHARED_DATABASE
        .get_or_try_init(|| {
            tracing::info!("Opening emoji database");
            EmojiDatabase::open(config.database_path.as_deref(), loaded.clone())
        })
        .cloned()
}
