//! # Database
//!
//! SQLite wrapper holding per-locale emoji tables, custom emoji, legacy
//! shortcodes, ETags and fetched-resource sentinels.
//!
//! ## Database Operations
//!
//! ```text
//! ┌─────────────────────────────────────────────────────────────────────────┐
//! │                      DATABASE OPERATIONS                                │
//! ├─────────────────────────────────────────────────────────────────────────┤
//! │                                                                         │
//! │  ┌─────────────────┐        ┌─────────────────┐                        │
//! │  │ Render pipeline │        │     Loader      │                        │
//! │  └────────┬────────┘        └────────┬────────┘                        │
//! │           │ reads                     │ bulk writes                     │
//! │           ▼                           ▼                                 │
//! │  ┌───────────────────────────────────────────────┐                     │
//! │  │  EmojiDatabase (this file)                    │                     │
//! │  │  - LocaleNotLoaded guard on locale reads      │                     │
//! │  │  - range-scan batch lookups                   │                     │
//! │  │  - side-table multi-valued indices            │                     │
//! │  └────────┬──────────────────────────────────────┘                     │
//! │           │                                                             │
//! │           ▼                                                             │
//! │  ┌─────────────────┐                                                   │
//! │  │   SQLite DB     │  - In-memory for tests                            │
//! │  │                 │  - File for production                            │
//! │  └─────────────────┘                                                   │
//! │                                                                         │
//! └─────────────────────────────────────────────────────────────────────────┘
//! ```

use std::collections::HashSet;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;

use parking_lot::Mutex;
use rusqlite::types::Type;
use rusqlite::{params, Connection, OptionalExtension, Row};

use super::records::{CustomEmojiRecord, LegacyShortcodeRecord, UnicodeEmojiRecord};
use super::schema::{self, IndexSpec, TableSpec};
use crate::error::{Error, Result};
use crate::locale::{Locale, LoadedLocales, LocaleOrCustom};
use crate::normalize::has_skin_tone;

/// Columns of a locale table, aliased as `t`
const LOCALE_COLUMNS: &str =
    "t.hexcode, t.unicode, t.label, t.shortcodes, t.tags, t.grp, t.ord, t.skin_hexcodes, t.tokens";

/// Columns of the custom table
const CUSTOM_COLUMNS: &str = "shortcode, url, static_url, category, visible_in_picker";

/// Upper bound appended to a prefix for range scans
const PREFIX_UPPER_BOUND: char = char::MAX;

/// Indices created and dropped while reconciling one table
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct IndexChanges {
    /// Indices that were missing and got created
    pub created: Vec<String>,
    /// Indices no longer declared that got dropped
    pub dropped: Vec<String>,
}

impl IndexChanges {
    /// Whether nothing changed
    pub fn is_empty(&self) -> bool {
        self.created.is_empty() && self.dropped.is_empty()
    }
}

/// The emoji database handle
///
/// Clones share the connection and the loaded-locale set.
#[derive(Clone)]
pub struct EmojiDatabase {
    /// The underlying SQLite connection
    conn: Arc<Mutex<Connection>>,
    /// Locales confirmed present
    loaded: LoadedLocales,
    /// Read queries issued
    queries: Arc<AtomicUsize>,
}

impl std::fmt::Debug for EmojiDatabase {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("EmojiDatabase")
            .field("loaded", &self.loaded.snapshot())
            .field("queries", &self.query_count())
            .finish()
    }
}

impl EmojiDatabase {
    /// Open or create a database
    ///
    /// If path is None, creates an in-memory database (useful for testing).
    /// The loaded-locale set is rebuilt from row counts once the schema is
    /// up to date.
    pub fn open(path: Option<&str>, loaded: LoadedLocales) -> Result<Self> {
        let conn = match path {
            Some(p) => Connection::open(p)
                .map_err(|e| Error::DatabaseError(format!("Failed to open database: {}", e)))?,
            None => Connection::open_in_memory().map_err(|e| {
                Error::DatabaseError(format!("Failed to create in-memory database: {}", e))
            })?,
        };

        let db = Self {
            conn: Arc::new(Mutex::new(conn)),
            loaded,
            queries: Arc::new(AtomicUsize::new(0)),
        };

        db.init_schema()?;
        db.sync_loaded_locales()?;

        Ok(db)
    }

    /// Same connection, different loaded-locale set
    pub fn with_loaded(&self, loaded: LoadedLocales) -> Self {
        Self {
            conn: self.conn.clone(),
            loaded,
            queries: self.queries.clone(),
        }
    }

    /// The loaded-locale set this handle checks reads against
    pub fn loaded(&self) -> &LoadedLocales {
        &self.loaded
    }

    /// Number of read queries issued through this connection
    pub fn query_count(&self) -> usize {
        self.queries.load(Ordering::Relaxed)
    }

    fn count_query(&self) {
        self.queries.fetch_add(1, Ordering::Relaxed);
    }

    /// Initialize the database schema
    fn init_schema(&self) -> Result<()> {
        let mut conn = self.conn.lock();

        // Check current schema version
        let version: Option<i32> = conn
            .query_row("SELECT version FROM schema_version LIMIT 1", [], |row| {
                row.get(0)
            })
            .ok();

        let tx = conn.transaction()?;

        match version {
            None => {
                // Fresh database, create all tables
                tx.execute_batch(schema::CREATE_TABLES)
                    .map_err(|e| Error::DatabaseError(format!("Failed to create tables: {}", e)))?;
                for locale in Locale::all() {
                    tx.execute_batch(&schema::create_locale_table(locale)).map_err(|e| {
                        Error::DatabaseError(format!("Failed to create {} table: {}", locale, e))
                    })?;
                }
                for table in schema::all_tables() {
                    reconcile_indices(&tx, &table)?;
                }

                tx.execute(
                    "INSERT INTO schema_version (version) VALUES (?)",
                    params![schema::SCHEMA_VERSION],
                )
                .map_err(|e| Error::DatabaseError(format!("Failed to set schema version: {}", e)))?;

                tracing::info!("Emoji database schema created (version {})", schema::SCHEMA_VERSION);
            }
            Some(v) if v < schema::SCHEMA_VERSION => {
                tracing::info!(
                    "Emoji database schema version {} is older than current {}, running migrations",
                    v,
                    schema::SCHEMA_VERSION
                );

                for (table, changes) in migrate(&tx, v)? {
                    if !changes.is_empty() {
                        tracing::info!(
                            "Reconciled indices on {}: created {:?}, dropped {:?}",
                            table,
                            changes.created,
                            changes.dropped
                        );
                    }
                }

                tx.execute(
                    "UPDATE schema_version SET version = ?",
                    params![schema::SCHEMA_VERSION],
                )
                .map_err(|e| Error::DatabaseError(format!("Failed to set schema version: {}", e)))?;

                tracing::info!("All migrations complete (now at version {})", schema::SCHEMA_VERSION);
            }
            Some(v) => {
                tracing::debug!("Emoji database schema version: {}", v);
            }
        }

        tx.commit()?;
        Ok(())
    }

    /// Rebuild the loaded-locale set from per-locale row counts
    pub fn sync_loaded_locales(&self) -> Result<()> {
        let mut counts = Vec::new();
        for locale in Locale::all() {
            counts.push((locale, self.count_rows(locale)?));
        }
        self.loaded.sync_from_counts(counts);
        Ok(())
    }

    fn ensure_loaded(&self, locale: Locale) -> Result<()> {
        if self.loaded.contains(locale) {
            Ok(())
        } else {
            Err(Error::LocaleNotLoaded(locale.to_string()))
        }
    }

    // ========================================================================
    // LOCALE READS
    // ========================================================================

    /// Number of emoji stored for a locale
    pub fn count_rows(&self, locale: Locale) -> Result<usize> {
        let conn = self.conn.lock();
        let count: i64 = conn
            .query_row(
                &format!("SELECT COUNT(*) FROM {}", locale.table_name()),
                [],
                |row| row.get(0),
            )
            .map_err(|e| Error::DatabaseError(format!("Failed to count {} rows: {}", locale, e)))?;
        Ok(count as usize)
    }

    /// Get one emoji by hexcode
    pub fn get_by_hexcode(&self, locale: Locale, hexcode: &str) -> Result<Option<UnicodeEmojiRecord>> {
        self.ensure_loaded(locale)?;
        self.count_query();

        let conn = self.conn.lock();
        conn.query_row(
            &format!(
                "SELECT {} FROM {} t WHERE t.hexcode = ?",
                LOCALE_COLUMNS,
                locale.table_name()
            ),
            params![hexcode],
            unicode_from_row,
        )
        .optional()
        .map_err(|e| Error::DatabaseError(format!("Failed to get emoji: {}", e)))
    }

    /// Get every stored emoji among `hexcodes`
    ///
    /// Issues a single range scan from the smallest to the largest requested
    /// hexcode and keeps the exact matches. Unknown hexcodes are simply absent
    /// from the result.
    pub fn get_many_by_hexcodes<S: AsRef<str>>(
        &self,
        locale: Locale,
        hexcodes: &[S],
    ) -> Result<Vec<UnicodeEmojiRecord>> {
        self.ensure_loaded(locale)?;

        let wanted: HashSet<&str> = hexcodes.iter().map(|h| h.as_ref()).collect();
        let (Some(min), Some(max)) = (wanted.iter().min(), wanted.iter().max()) else {
            return Ok(Vec::new());
        };

        self.count_query();
        let conn = self.conn.lock();
        let mut stmt = conn
            .prepare(&format!(
                "SELECT {} FROM {} t WHERE t.hexcode BETWEEN ?1 AND ?2",
                LOCALE_COLUMNS,
                locale.table_name()
            ))
            .map_err(|e| Error::DatabaseError(format!("Failed to prepare query: {}", e)))?;

        let rows = stmt
            .query_map(params![min, max], unicode_from_row)
            .map_err(|e| Error::DatabaseError(format!("Failed to query emoji: {}", e)))?;

        let mut records = Vec::new();
        for row in rows {
            let record =
                row.map_err(|e| Error::DatabaseError(format!("Failed to read emoji: {}", e)))?;
            if wanted.contains(record.hexcode.as_str()) {
                records.push(record);
            }
        }

        Ok(records)
    }

    /// Emoji with a search token starting with `tag`, case-insensitive
    pub fn search_by_tag(&self, locale: Locale, tag: &str) -> Result<Vec<UnicodeEmojiRecord>> {
        self.ensure_loaded(locale)?;

        let prefix = tag.trim().to_lowercase();
        if prefix.is_empty() {
            return Ok(Vec::new());
        }
        let upper = format!("{}{}", prefix, PREFIX_UPPER_BOUND);

        self.count_query();
        let conn = self.conn.lock();
        let mut stmt = conn
            .prepare(&format!(
                "SELECT DISTINCT {} FROM {} s JOIN {} t ON t.hexcode = s.key
                 WHERE s.value >= ?1 AND s.value < ?2
                 ORDER BY t.grp, t.ord",
                LOCALE_COLUMNS,
                schema::token_index(locale),
                locale.table_name()
            ))
            .map_err(|e| Error::DatabaseError(format!("Failed to prepare query: {}", e)))?;

        collect_rows(&mut stmt, params![prefix, upper], unicode_from_row, "emoji")
    }

    /// The base emoji owning a skin tone variant
    pub fn get_by_skin_hexcode(
        &self,
        locale: Locale,
        skin_hexcode: &str,
    ) -> Result<Option<UnicodeEmojiRecord>> {
        self.ensure_loaded(locale)?;
        if !has_skin_tone(skin_hexcode) {
            return Ok(None);
        }
        self.count_query();

        let conn = self.conn.lock();
        conn.query_row(
            &format!(
                "SELECT {} FROM {} s JOIN {} t ON t.hexcode = s.key WHERE s.value = ? LIMIT 1",
                LOCALE_COLUMNS,
                schema::skin_index(locale),
                locale.table_name()
            ),
            params![skin_hexcode],
            unicode_from_row,
        )
        .optional()
        .map_err(|e| Error::DatabaseError(format!("Failed to get emoji by skin: {}", e)))
    }

    /// Emoji of one category, in display order
    pub fn get_group(&self, locale: Locale, group: i64) -> Result<Vec<UnicodeEmojiRecord>> {
        self.ensure_loaded(locale)?;
        self.count_query();

        let conn = self.conn.lock();
        let mut stmt = conn
            .prepare(&format!(
                "SELECT {} FROM {} t WHERE t.grp = ? ORDER BY t.ord",
                LOCALE_COLUMNS,
                locale.table_name()
            ))
            .map_err(|e| Error::DatabaseError(format!("Failed to prepare query: {}", e)))?;

        collect_rows(&mut stmt, params![group], unicode_from_row, "emoji")
    }

    // ========================================================================
    // LOCALE WRITES
    // ========================================================================

    /// Insert or replace one emoji
    pub fn put_locale_emoji(&self, locale: Locale, record: &UnicodeEmojiRecord) -> Result<()> {
        self.put_locale_emojis(locale, std::slice::from_ref(record))
            .map(|_| ())
    }

    /// Insert or replace many emoji in one transaction
    pub fn put_locale_emojis(&self, locale: Locale, records: &[UnicodeEmojiRecord]) -> Result<usize> {
        let mut conn = self.conn.lock();
        let tx = conn.transaction()?;

        let table = locale.table_name();
        let token_index = schema::token_index(locale);
        let skin_index = schema::skin_index(locale);
        {
            let mut upsert = tx.prepare_cached(&format!(
                "INSERT OR REPLACE INTO {}
                 (hexcode, unicode, label, shortcodes, tags, grp, ord, skin_hexcodes, tokens)
                 VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9)",
                table
            ))?;

            for record in records {
                upsert
                    .execute(params![
                        record.hexcode,
                        record.unicode,
                        record.label,
                        serde_json::to_string(&record.shortcodes)?,
                        serde_json::to_string(&record.tags)?,
                        record.group,
                        record.order,
                        serde_json::to_string(&record.skin_hexcodes)?,
                        serde_json::to_string(&record.tokens)?,
                    ])
                    .map_err(|e| Error::DatabaseError(format!("Failed to store emoji: {}", e)))?;

                replace_side_rows(&tx, &token_index, &record.hexcode, &record.tokens, true)?;
                replace_side_rows(&tx, &skin_index, &record.hexcode, &record.skin_hexcodes, false)?;
            }
        }

        tx.commit()?;
        tracing::debug!("Stored {} emoji for {}", records.len(), locale);
        Ok(records.len())
    }

    // ========================================================================
    // CUSTOM EMOJI
    // ========================================================================

    /// Get one custom emoji
    pub fn get_custom(&self, shortcode: &str) -> Result<Option<CustomEmojiRecord>> {
        self.count_query();
        let conn = self.conn.lock();
        conn.query_row(
            &format!("SELECT {} FROM custom WHERE shortcode = ?", CUSTOM_COLUMNS),
            params![shortcode],
            custom_from_row,
        )
        .optional()
        .map_err(|e| Error::DatabaseError(format!("Failed to get custom emoji: {}", e)))
    }

    /// Get every stored custom emoji among `shortcodes` with one range scan
    pub fn get_many_custom<S: AsRef<str>>(&self, shortcodes: &[S]) -> Result<Vec<CustomEmojiRecord>> {
        let wanted: HashSet<&str> = shortcodes.iter().map(|s| s.as_ref()).collect();
        let (Some(min), Some(max)) = (wanted.iter().min(), wanted.iter().max()) else {
            return Ok(Vec::new());
        };

        self.count_query();
        let conn = self.conn.lock();
        let mut stmt = conn
            .prepare(&format!(
                "SELECT {} FROM custom WHERE shortcode BETWEEN ?1 AND ?2",
                CUSTOM_COLUMNS
            ))
            .map_err(|e| Error::DatabaseError(format!("Failed to prepare query: {}", e)))?;

        let records = collect_rows(&mut stmt, params![min, max], custom_from_row, "custom emoji")?;
        Ok(records
            .into_iter()
            .filter(|record| wanted.contains(record.shortcode.as_str()))
            .collect())
    }

    /// Custom emoji in one picker category
    pub fn get_custom_by_category(&self, category: &str) -> Result<Vec<CustomEmojiRecord>> {
        self.count_query();
        let conn = self.conn.lock();
        let mut stmt = conn
            .prepare(&format!(
                "SELECT {} FROM custom WHERE category = ? ORDER BY shortcode",
                CUSTOM_COLUMNS
            ))
            .map_err(|e| Error::DatabaseError(format!("Failed to prepare query: {}", e)))?;

        collect_rows(&mut stmt, params![category], custom_from_row, "custom emoji")
    }

    /// Insert or replace one custom emoji
    pub fn put_custom_emoji(&self, record: &CustomEmojiRecord) -> Result<()> {
        self.put_custom_emojis(std::slice::from_ref(record), false)
            .map(|_| ())
    }

    /// Insert or replace custom emoji in one transaction, optionally clearing
    /// the table first
    pub fn put_custom_emojis(&self, records: &[CustomEmojiRecord], clear: bool) -> Result<usize> {
        let mut conn = self.conn.lock();
        let tx = conn.transaction()?;

        if clear {
            tx.execute("DELETE FROM custom", [])
                .map_err(|e| Error::DatabaseError(format!("Failed to clear custom emoji: {}", e)))?;
        }

        {
            let mut upsert = tx.prepare_cached(
                "INSERT OR REPLACE INTO custom (shortcode, url, static_url, category, visible_in_picker)
                 VALUES (?1, ?2, ?3, ?4, ?5)",
            )?;
            for record in records {
                upsert
                    .execute(params![
                        record.shortcode,
                        record.url,
                        record.static_url,
                        record.category,
                        record.visible_in_picker,
                    ])
                    .map_err(|e| {
                        Error::DatabaseError(format!("Failed to store custom emoji: {}", e))
                    })?;
            }
        }

        tx.commit()?;
        Ok(records.len())
    }

    // ========================================================================
    // LEGACY SHORTCODES
    // ========================================================================

    /// Legacy aliases of a hexcode
    pub fn get_legacy_shortcodes(&self, hexcode: &str) -> Result<Option<LegacyShortcodeRecord>> {
        self.count_query();
        let conn = self.conn.lock();
        conn.query_row(
            "SELECT hexcode, shortcodes FROM shortcodes WHERE hexcode = ?",
            params![hexcode],
            |row| {
                Ok(LegacyShortcodeRecord {
                    hexcode: row.get(0)?,
                    shortcodes: json_list(row, 1)?,
                })
            },
        )
        .optional()
        .map_err(|e| Error::DatabaseError(format!("Failed to get legacy shortcodes: {}", e)))
    }

    /// Hexcodes carrying a legacy alias, case-insensitive
    pub fn find_hexcodes_by_legacy_shortcode(&self, shortcode: &str) -> Result<Vec<String>> {
        self.count_query();
        let conn = self.conn.lock();
        let mut stmt = conn
            .prepare(&format!(
                "SELECT key FROM {} WHERE value = ? ORDER BY key",
                schema::legacy_shortcode_index()
            ))
            .map_err(|e| Error::DatabaseError(format!("Failed to prepare query: {}", e)))?;

        collect_rows(
            &mut stmt,
            params![shortcode.to_lowercase()],
            |row| row.get(0),
            "legacy shortcode",
        )
    }

    /// Insert or replace legacy aliases in one transaction
    pub fn put_legacy_shortcodes(&self, records: &[LegacyShortcodeRecord]) -> Result<usize> {
        let mut conn = self.conn.lock();
        let tx = conn.transaction()?;
        let index = schema::legacy_shortcode_index();

        {
            let mut upsert = tx.prepare_cached(
                "INSERT OR REPLACE INTO shortcodes (hexcode, shortcodes) VALUES (?1, ?2)",
            )?;
            for record in records {
                upsert
                    .execute(params![record.hexcode, serde_json::to_string(&record.shortcodes)?])
                    .map_err(|e| {
                        Error::DatabaseError(format!("Failed to store legacy shortcodes: {}", e))
                    })?;
                replace_side_rows(&tx, &index, &record.hexcode, &record.shortcodes, true)?;
            }
        }

        tx.commit()?;
        Ok(records.len())
    }

    // ========================================================================
    // ETAGS & CACHE VALUES
    // ========================================================================

    /// Stored ETag of a dataset
    pub fn load_etag(&self, key: LocaleOrCustom) -> Result<Option<String>> {
        self.count_query();
        let conn = self.conn.lock();
        conn.query_row(
            "SELECT etag FROM etags WHERE key = ?",
            params![key.as_str()],
            |row| row.get(0),
        )
        .optional()
        .map_err(|e| Error::DatabaseError(format!("Failed to load etag: {}", e)))
    }

    /// Store the ETag of a dataset
    pub fn put_etag(&self, key: LocaleOrCustom, etag: &str) -> Result<()> {
        let conn = self.conn.lock();
        conn.execute(
            "INSERT OR REPLACE INTO etags (key, etag) VALUES (?, ?)",
            params![key.as_str(), etag],
        )
        .map_err(|e| Error::DatabaseError(format!("Failed to store etag: {}", e)))?;
        Ok(())
    }

    /// Forget the ETag of a dataset
    pub fn clear_etag(&self, key: LocaleOrCustom) -> Result<()> {
        let conn = self.conn.lock();
        conn.execute("DELETE FROM etags WHERE key = ?", params![key.as_str()])
            .map_err(|e| Error::DatabaseError(format!("Failed to clear etag: {}", e)))?;
        Ok(())
    }

    /// Read an opaque cache value
    pub fn get_cache_value(&self, key: &str) -> Result<Option<String>> {
        self.count_query();
        let conn = self.conn.lock();
        conn.query_row(
            "SELECT value FROM cache_values WHERE key = ?",
            params![key],
            |row| row.get(0),
        )
        .optional()
        .map_err(|e| Error::DatabaseError(format!("Failed to get cache value: {}", e)))
    }

    /// Write an opaque cache value
    pub fn put_cache_value(&self, key: &str, value: &str) -> Result<()> {
        let conn = self.conn.lock();
        conn.execute(
            "INSERT OR REPLACE INTO cache_values (key, value) VALUES (?, ?)",
            params![key, value],
        )
        .map_err(|e| Error::DatabaseError(format!("Failed to store cache value: {}", e)))?;
        Ok(())
    }
}

// ============================================================================
// MIGRATIONS
// ============================================================================

/// Bring a database at version `from` up to the current schema.
///
/// Locale tables are never dropped. Returns the index changes made per table.
pub(crate) fn migrate(conn: &Connection, from: i32) -> Result<Vec<(String, IndexChanges)>> {
    if from < 2 {
        tracing::info!("Running migration v1 → v2 (legacy shortcodes, cache values)");
        conn.execute_batch(schema::MIGRATE_V1_TO_V2)
            .map_err(|e| Error::DatabaseError(format!("Migration v1→v2 failed: {}", e)))?;
    }
    if from < 3 {
        tracing::info!("Running migration v2 → v3 (search tokens, skin tones)");
        for locale in Locale::all() {
            let table = locale.table_name();
            conn.execute_batch(&schema::create_locale_table(locale))
                .map_err(|e| Error::DatabaseError(format!("Migration v2→v3 failed: {}", e)))?;

            let added = add_missing_columns(conn, &table, schema::V3_LOCALE_COLUMNS)?;
            if added.contains(&"tokens") {
                backfill_tokens(conn, &table)?;
            }
        }
    }

    let mut report = Vec::new();
    for table in schema::all_tables() {
        let changes = reconcile_indices(conn, &table)?;
        report.push((table.table, changes));
    }
    Ok(report)
}

fn add_missing_columns(
    conn: &Connection,
    table: &str,
    columns: &[(&'static str, &str)],
) -> Result<Vec<&'static str>> {
    let mut stmt = conn.prepare(&format!("PRAGMA table_info({})", table))?;
    let existing: HashSet<String> = stmt
        .query_map([], |row| row.get::<_, String>(1))?
        .collect::<rusqlite::Result<_>>()?;

    let mut added = Vec::new();
    for (name, definition) in columns {
        if !existing.contains(*name) {
            conn.execute_batch(&format!("ALTER TABLE {} ADD COLUMN {} {}", table, name, definition))
                .map_err(|e| Error::DatabaseError(format!("Failed to add {}.{}: {}", table, name, e)))?;
            added.push(*name);
        }
    }
    Ok(added)
}

fn backfill_tokens(conn: &Connection, table: &str) -> Result<()> {
    let rows: Vec<(String, String, String, String)> = {
        let mut stmt = conn.prepare(&format!(
            "SELECT hexcode, label, shortcodes, tags FROM {}",
            table
        ))?;
        let rows = stmt
            .query_map([], |row| Ok((row.get(0)?, row.get(1)?, row.get(2)?, row.get(3)?)))?
            .collect::<rusqlite::Result<_>>()?;
        rows
    };

    let mut update = conn.prepare(&format!("UPDATE {} SET tokens = ? WHERE hexcode = ?", table))?;
    for (hexcode, label, shortcodes, tags) in rows {
        let shortcodes: Vec<String> = serde_json::from_str(&shortcodes)?;
        let tags: Vec<String> = serde_json::from_str(&tags)?;
        let tokens = super::records::derive_tokens(&label, &shortcodes, &tags);
        update.execute(params![serde_json::to_string(&tokens)?, hexcode])?;
    }
    Ok(())
}

/// Make the indices on `spec.table` match its declaration.
///
/// Indices are identified by name: declared ones that are missing get
/// created (side tables back-filled from stored rows), present ones that are
/// no longer declared get dropped, the rest are left alone.
pub(crate) fn reconcile_indices(conn: &Connection, spec: &TableSpec) -> Result<IndexChanges> {
    let existing_indices: HashSet<String> = {
        let mut stmt = conn.prepare(
            "SELECT name FROM sqlite_master
             WHERE type = 'index' AND tbl_name = ? AND name NOT LIKE 'sqlite_autoindex%'",
        )?;
        let names = stmt
            .query_map(params![spec.table], |row| row.get(0))?
            .collect::<rusqlite::Result<_>>()?;
        names
    };

    let prefix = schema::side_table_prefix(&spec.table);
    let existing_sides: HashSet<String> = {
        let mut stmt = conn.prepare("SELECT name FROM sqlite_master WHERE type = 'table'")?;
        let names: Vec<String> = stmt
            .query_map([], |row| row.get(0))?
            .collect::<rusqlite::Result<_>>()?;
        names.into_iter().filter(|name| name.starts_with(&prefix)).collect()
    };

    let declared: HashSet<&str> = spec.indices.iter().map(|index| index.name()).collect();
    let mut changes = IndexChanges::default();

    for stale in existing_indices.iter().filter(|name| !declared.contains(name.as_str())) {
        conn.execute_batch(&format!("DROP INDEX IF EXISTS {}", stale))?;
        changes.dropped.push(stale.clone());
    }
    for stale in existing_sides.iter().filter(|name| !declared.contains(name.as_str())) {
        conn.execute_batch(&format!("DROP TABLE IF EXISTS {}", stale))?;
        changes.dropped.push(stale.clone());
    }

    for index in &spec.indices {
        match index {
            IndexSpec::Columns { name, columns } if !existing_indices.contains(name) => {
                conn.execute_batch(&format!(
                    "CREATE INDEX IF NOT EXISTS {} ON {}({})",
                    name, spec.table, columns
                ))?;
                changes.created.push(name.clone());
            }
            IndexSpec::MultiValued { name, column, fold_case } if !existing_sides.contains(name) => {
                conn.execute_batch(&schema::create_side_table(name))?;
                conn.execute(
                    &schema::backfill_side_table(name, &spec.table, spec.key, column, *fold_case),
                    [],
                )?;
                changes.created.push(name.clone());
            }
            _ => {}
        }
    }

    changes.dropped.sort();
    Ok(changes)
}

// ============================================================================
// ROW HELPERS
// ============================================================================

fn replace_side_rows(
    conn: &Connection,
    side: &str,
    key: &str,
    values: &[String],
    fold_case: bool,
) -> Result<()> {
    conn.prepare_cached(&format!("DELETE FROM {} WHERE key = ?", side))?
        .execute(params![key])?;

    let mut insert =
        conn.prepare_cached(&format!("INSERT OR IGNORE INTO {} (value, key) VALUES (?, ?)", side))?;
    for value in values {
        let value = if fold_case { value.to_lowercase() } else { value.clone() };
        insert.execute(params![value, key])?;
    }
    Ok(())
}

fn json_list(row: &Row<'_>, idx: usize) -> rusqlite::Result<Vec<String>> {
    let raw: String = row.get(idx)?;
    serde_json::from_str(&raw)
        .map_err(|e| rusqlite::Error::FromSqlConversionFailure(idx, Type::Text, Box::new(e)))
}

fn unicode_from_row(row: &Row<'_>) -> rusqlite::Result<UnicodeEmojiRecord> {
    Ok(UnicodeEmojiRecord {
        hexcode: row.get(0)?,
        unicode: row.get(1)?,
        label: row.get(2)?,
        shortcodes: json_list(row, 3)?,
        tags: json_list(row, 4)?,
        group: row.get(5)?,
        order: row.get(6)?,
        skin_hexcodes: json_list(row, 7)?,
        tokens: json_list(row, 8)?,
    })
}

fn custom_from_row(row: &Row<'_>) -> rusqlite::Result<CustomEmojiRecord> {
    Ok(CustomEmojiRecord {
        shortcode: row.get(0)?,
        url: row.get(1)?,
        static_url: row.get(2)?,
        category: row.get(3)?,
        visible_in_picker: row.get(4)?,
    })
}

fn collect_rows<T, P, F>(
    stmt: &mut rusqlite::Statement<'_>,
    params: P,
    map: F,
    what: &str,
) -> Result<Vec<T>>
where
    P: rusqlite::Params,
    F: FnMut(&Row<'_>) -> rusqlite::Result<T>,
{
    let rows = stmt
        .query_map(params, map)
        .map_err(|e| Error::DatabaseError(format!("Failed to query {}: {}", what, e)))?;

    let mut items = Vec::new();
    for row in rows {
        items.push(row.map_err(|e| Error::DatabaseError(format!("Failed to read {}: {}", what, e)))?);
    }
    Ok(items)
}

// ============================================================================
// TESTS
// ============================================================================
