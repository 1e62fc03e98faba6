//! # Database Schema
//!
//! SQL schema definitions for the emoji database.
//!
//! ## Schema Overview
//!
//! ```text
//! ┌─────────────────────────────────────────────────────────────────────────┐
//! │                         DATABASE SCHEMA                                 │
//! ├─────────────────────────────────────────────────────────────────────────┤
//! │                                                                         │
//! │  ┌─────────────────┐    ┌──────────────────────┐                        │
//! │  │ locale_<code>   │    │ locale_<code>_by_*   │  one per multi-valued  │
//! │  ├─────────────────┤    ├──────────────────────┤  index (token, skin)   │
//! │  │ hexcode (PK)    │◄───│ key                  │                        │
//! │  │ unicode         │    │ value                │                        │
//! │  │ label           │    └──────────────────────┘                        │
//! │  │ shortcodes      │                                                    │
//! │  │ tags            │    ┌─────────────────┐      ┌─────────────────┐    │
//! │  │ grp, ord        │    │     custom      │      │   shortcodes    │    │
//! │  │ skin_hexcodes   │    ├─────────────────┤      ├─────────────────┤    │
//! │  │ tokens          │    │ shortcode (PK)  │      │ hexcode (PK)    │    │
//! │  └─────────────────┘    │ url             │      │ shortcodes      │    │
//! │                         │ static_url      │      └─────────────────┘    │
//! │  ┌─────────────────┐    │ category        │                             │
//! │  │     etags       │    │ visible_in_...  │      ┌─────────────────┐    │
//! │  ├─────────────────┤    └─────────────────┘      │  cache_values   │    │
//! │  │ key (PK)        │                             ├─────────────────┤    │
//! │  │ etag            │                             │ key (PK)        │    │
//! │  └─────────────────┘                             │ value           │    │
//! │                                                  └─────────────────┘    │
//! │                                                                         │
//! └─────────────────────────────────────────────────────────────────────────┘
//! ```
//!
//! List-valued columns (`shortcodes`, `tags`, `skin_hexcodes`, `tokens`) hold
//! JSON arrays. A multi-valued index over one of them is a side table
//! `<table>_by_<index>(value, key)` with its own SQL index.

use crate::locale::Locale;

/// Current schema version
pub const SCHEMA_VERSION: i32 = 3;

/// SQL to create the tables that are not per-locale
pub const CREATE_TABLES: &str = r#"
-- Schema version tracking
CREATE TABLE IF NOT EXISTS schema_version (
    version INTEGER PRIMARY KEY
);

-- Custom emoji defined by the server
CREATE TABLE IF NOT EXISTS custom (
    shortcode TEXT PRIMARY KEY,
    url TEXT NOT NULL,
    static_url TEXT NOT NULL,
    category TEXT,
    visible_in_picker INTEGER NOT NULL DEFAULT 1
);

-- Legacy shortcode aliases, global across locales
CREATE TABLE IF NOT EXISTS shortcodes (
    hexcode TEXT PRIMARY KEY,
    -- JSON array of shortcodes
    shortcodes TEXT NOT NULL DEFAULT '[]'
);

-- ETags of fetched datasets, keyed by locale or 'custom'
CREATE TABLE IF NOT EXISTS etags (
    key TEXT PRIMARY KEY,
    etag TEXT NOT NULL
);

-- Opaque key/value store (fetched-resource sentinels)
CREATE TABLE IF NOT EXISTS cache_values (
    key TEXT PRIMARY KEY,
    value TEXT NOT NULL
);
"#;

/// Version 1 created the locale tables, `custom` and `etags` only.
/// Version 2 adds the legacy shortcode table and the key/value cache.
pub const MIGRATE_V1_TO_V2: &str = r#"
CREATE TABLE IF NOT EXISTS shortcodes (
    hexcode TEXT PRIMARY KEY,
    shortcodes TEXT NOT NULL DEFAULT '[]'
);

CREATE TABLE IF NOT EXISTS cache_values (
    key TEXT PRIMARY KEY,
    value TEXT NOT NULL
);
"#;

/// Version 3 adds derived search tokens and skin tone variants to every
/// locale table; the tag index is replaced by a token index.
pub const V3_LOCALE_COLUMNS: &[(&str, &str)] = &[
    ("skin_hexcodes", "TEXT NOT NULL DEFAULT '[]'"),
    ("tokens", "TEXT NOT NULL DEFAULT '[]'"),
];

/// SQL creating one locale table at the current version
pub fn create_locale_table(locale: Locale) -> String {
    format!(
        r#"
CREATE TABLE IF NOT EXISTS {table} (
    -- Dash-joined upper-case hex code points
    hexcode TEXT PRIMARY KEY,
    unicode TEXT NOT NULL,
    label TEXT NOT NULL,
    shortcodes TEXT NOT NULL DEFAULT '[]',
    tags TEXT NOT NULL DEFAULT '[]',
    grp INTEGER,
    ord INTEGER,
    skin_hexcodes TEXT NOT NULL DEFAULT '[]',
    tokens TEXT NOT NULL DEFAULT '[]'
);
"#,
        table = locale.table_name()
    )
}

// ============================================================================
// INDEX DECLARATIONS
// ============================================================================

/// An index a table is expected to carry
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum IndexSpec {
    /// Plain SQL index over one or more columns
    Columns {
        /// Index name
        name: String,
        /// Indexed columns, comma-separated
        columns: &'static str,
    },
    /// Side table holding one row per element of a JSON array column
    MultiValued {
        /// Side table name
        name: String,
        /// Source JSON array column
        column: &'static str,
        /// Store values lower-cased
        fold_case: bool,
    },
}

impl IndexSpec {
    /// Index (or side table) name, the identity used for reconciliation
    pub fn name(&self) -> &str {
        match self {
            IndexSpec::Columns { name, .. } | IndexSpec::MultiValued { name, .. } => name,
        }
    }
}

/// A table together with its primary key column and expected indices
#[derive(Debug, Clone)]
pub struct TableSpec {
    /// Table name
    pub table: String,
    /// Primary key column
    pub key: &'static str,
    /// Indices expected at the current version
    pub indices: Vec<IndexSpec>,
}

impl TableSpec {
    /// Side tables among the expected indices
    pub fn multi_valued(&self) -> impl Iterator<Item = &IndexSpec> {
        self.indices
            .iter()
            .filter(|index| matches!(index, IndexSpec::MultiValued { .. }))
    }
}

/// Name of a multi-valued index side table
pub fn side_table(table: &str, index: &str) -> String {
    format!("{}_by_{}", table, index)
}

/// Prefix shared by every side table of `table`
pub fn side_table_prefix(table: &str) -> String {
    format!("{}_by_", table)
}

/// Name of the token index side table of a locale
pub fn token_index(locale: Locale) -> String {
    side_table(&locale.table_name(), "token")
}

/// Name of the skin tone index side table of a locale
pub fn skin_index(locale: Locale) -> String {
    side_table(&locale.table_name(), "skin")
}

/// Name of the legacy shortcode index side table
pub fn legacy_shortcode_index() -> String {
    side_table("shortcodes", "shortcode")
}

/// Expected layout of a locale table
pub fn locale_table(locale: Locale) -> TableSpec {
    let table = locale.table_name();
    TableSpec {
        indices: vec![
            IndexSpec::Columns {
                name: format!("idx_{}_group_order", table),
                columns: "grp, ord",
            },
            IndexSpec::MultiValued {
                name: token_index(locale),
                column: "tokens",
                fold_case: true,
            },
            IndexSpec::MultiValued {
                name: skin_index(locale),
                column: "skin_hexcodes",
                fold_case: false,
            },
        ],
        table,
        key: "hexcode",
    }
}

/// Expected layout of the custom emoji table
pub fn custom_table() -> TableSpec {
    TableSpec {
        table: "custom".to_string(),
        key: "shortcode",
        indices: vec![IndexSpec::Columns {
            name: "idx_custom_category".to_string(),
            columns: "category",
        }],
    }
}

/// Expected layout of the legacy shortcode table
pub fn legacy_shortcodes_table() -> TableSpec {
    TableSpec {
        table: "shortcodes".to_string(),
        key: "hexcode",
        indices: vec![IndexSpec::MultiValued {
            name: legacy_shortcode_index(),
            column: "shortcodes",
            fold_case: true,
        }],
    }
}

/// Every table with declared indices, at the current version
pub fn all_tables() -> Vec<TableSpec> {
    let mut tables: Vec<TableSpec> = Locale::all().map(locale_table).collect();
    tables.push(custom_table());
    tables.push(legacy_shortcodes_table());
    tables
}

/// SQL creating a side table and its lookup indices
pub fn create_side_table(name: &str) -> String {
    format!(
        r#"
CREATE TABLE IF NOT EXISTS {name} (
    value TEXT NOT NULL,
    key TEXT NOT NULL,
    PRIMARY KEY (value, key)
) WITHOUT ROWID;
CREATE INDEX IF NOT EXISTS idx_{name}_key ON {name}(key);
"#,
        name = name
    )
}

/// SQL back-filling a side table from the rows already stored
pub fn backfill_side_table(
    name: &str,
    table: &str,
    key: &str,
    column: &str,
    fold_case: bool,
) -> String {
    let value = if fold_case { "lower(j.value)" } else { "j.value" };
    format!(
        "INSERT OR IGNORE INTO {name} (value, key)
         SELECT {value}, t.{key} FROM {table} t, json_each(t.{column}) j",
        name = name,
        value = value,
        key = key,
        table = table,
        column = column,
    )
}
