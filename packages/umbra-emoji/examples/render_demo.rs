//! # Render Example
//!
//! Imports a tiny English dataset from an in-process fetcher and renders a
//! message in each display mode.
//!
//! ## Run
//!
//! ```bash
//! cargo run --example render_demo
//! ```

use std::sync::Arc;

use async_trait::async_trait;
use serde_json::json;
use umbra_emoji::loader::FetchOutcome;
use umbra_emoji::locale::DEFAULT_LOCALE;
use umbra_emoji::{
    AppState, EmojiDatabase, EmojiFetcher, EmojiMode, EmojiRenderer, ExtraEmoji, ExtraEmojis,
    LoadedLocales, Loader, ResolutionCache, Result,
};

/// Serves a fixed dataset for every URL
struct FixtureFetcher;

#[async_trait]
impl EmojiFetcher for FixtureFetcher {
    async fn fetch(&self, url: &str, _etag: Option<&str>) -> Result<FetchOutcome> {
        let body = if url.ends_with("compact.json") {
            json!([
                {"hexcode": "1F44B", "unicode": "👋", "label": "waving hand", "group": 1, "order": 150},
                {"hexcode": "1F1EA-1F1FA", "unicode": "🇪🇺", "label": "flag: European Union", "group": 9, "order": 1},
                {"hexcode": "1F517", "unicode": "🔗", "label": "link", "group": 7, "order": 80}
            ])
        } else {
            json!([])
        };
        Ok(FetchOutcome::Fetched { body, etag: None })
    }
}

#[tokio::main]
async fn main() -> Result<()> {
    println!("=== Umbra Emoji: Render Example ===\n");

    // Step 1: Open an in-memory store and import English
    println!("Step 1: Importing English dataset...");
    let db = EmojiDatabase::open(None, LoadedLocales::new())?;
    let loader = Loader::new(db.clone(), Arc::new(FixtureFetcher), "http://localhost:8080");
    let outcome = loader.import_locale(DEFAULT_LOCALE, false).await?;
    println!("  {:?}", outcome);
    println!();

    // Step 2: Build the renderer
    let cache = Arc::new(ResolutionCache::new(1000, db.loaded().clone()));
    let renderer = EmojiRenderer::new(db.clone(), cache, 200, "https://cdn.example");

    let mut extra = ExtraEmojis::new();
    extra.insert(
        "partyblob".to_string(),
        ExtraEmoji {
            shortcode: "partyblob".to_string(),
            url: "https://cdn.example/partyblob.gif".to_string(),
            static_url: "https://cdn.example/partyblob.png".to_string(),
        },
    );

    let html = "<p>Hi 👋 from 🇪🇺 :partyblob: 🔗</p>";
    println!("Step 2: Rendering {}", html);
    for mode in [EmojiMode::Native, EmojiMode::NativeFlags, EmojiMode::Twemoji] {
        let state = AppState {
            mode,
            ..AppState::default()
        };
        let rendered = renderer.render_html(html, &state, &extra)?;
        println!("  {:?}:", mode);
        println!("    {}", rendered.as_deref().unwrap_or("(unchanged)"));
    }
    println!();

    println!("  Store queries issued: {}", db.query_count());
    Ok(())
}
