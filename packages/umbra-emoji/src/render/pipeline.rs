//! The emoji renderer.

use std::collections::{BTreeSet, HashMap};
use std::num::NonZeroUsize;
use std::sync::Arc;

use lru::LruCache;
use parking_lot::Mutex;

use super::html::{Element, Fragment, Node};
use super::{AppState, EmojiMode, ExtraEmojis};
use crate::cache::{EmojiData, Resolution, ResolutionCache};
use crate::error::Result;
use crate::locale::{to_supported_locale, Locale, LocaleOrCustom, DEFAULT_LOCALE};
use crate::normalize::{border_info, emoji_to_hexcode, inversion_class, to_canonical_image_id};
use crate::storage::{CustomEmojiRecord, EmojiDatabase, UnicodeEmojiRecord};
use crate::tokenizer::{
    has_custom_emoji, has_emoji_like, has_unicode_emoji, tokenize, EmojiToken, TextToken,
};

/// Class on every generated emoji image
const EMOJI_CLASS: &str = "emojione";
/// Extra class on custom emoji images
const CUSTOM_EMOJI_CLASS: &str = "custom-emoji";
/// Suffix of the outlined image variant
const BORDER_SUFFIX: &str = "_border";

/// Renders emoji in HTML, memoizing both lookups and final output.
pub struct EmojiRenderer {
    db: EmojiDatabase,
    cache: Arc<ResolutionCache>,
    output: Mutex<LruCache<String, Option<String>>>,
    asset_host: String,
}

impl EmojiRenderer {
    /// Create a renderer keeping at most `output_capacity` rendered outputs.
    ///
    /// Image URLs are `{asset_host}/emoji/{id}.svg`.
    pub fn new(
        db: EmojiDatabase,
        cache: Arc<ResolutionCache>,
        output_capacity: usize,
        asset_host: impl Into<String>,
    ) -> Self {
        let capacity = NonZeroUsize::new(output_capacity).unwrap_or(NonZeroUsize::MIN);
        Self {
            db,
            cache,
            output: Mutex::new(LruCache::new(capacity)),
            asset_host: asset_host.into(),
        }
    }

    /// The lookup cache shared with the rest of the core
    pub fn resolution_cache(&self) -> &Arc<ResolutionCache> {
        &self.cache
    }

    /// Forget all rendered outputs
    pub fn clear_output_cache(&self) {
        self.output.lock().clear();
    }

    /// Number of rendered outputs held
    pub fn output_cache_len(&self) -> usize {
        self.output.lock().len()
    }

    /// Locale whose table emoji are looked up in: the current locale, else the
    /// first loaded of the user's other locales, else English. `None` while
    /// none of them is loaded.
    pub fn lookup_locale(&self, state: &AppState) -> Option<Locale> {
        let loaded = self.db.loaded();
        std::iter::once(state.current_locale.as_str())
            .chain(state.locales.iter().map(String::as_str))
            .map(to_supported_locale)
            .chain(std::iter::once(DEFAULT_LOCALE))
            .find(|locale| loaded.contains(*locale))
    }

    /// Render emoji in `html`. `None` means nothing changed.
    pub fn render_html(
        &self,
        html: &str,
        state: &AppState,
        extra: &ExtraEmojis,
    ) -> Result<Option<String>> {
        let locale = self.lookup_locale(state);
        let key = serde_json::to_string(&(html, state, extra, locale.map(|l| l.as_str())))?;

        if let Some(cached) = self.output.lock().get(&key) {
            return Ok(cached.clone());
        }

        // An output computed while an import is writing may miss its rows
        let loaded = self.db.loaded();
        let cacheable = !loaded.is_importing(LocaleOrCustom::Custom)
            && locale.map_or(true, |locale| !loaded.is_importing(locale.into()));

        // Emoji may be written as character references
        let decoded = html_escape::decode_html_entities(html);
        let wants_unicode = state.mode != EmojiMode::Native && has_unicode_emoji(&decoded);
        let rendered = if wants_unicode || has_custom_emoji(&decoded) {
            let mut fragment = Fragment::parse(html);
            if self.substitute(&mut fragment, state, extra, locale)? {
                Some(fragment.to_string())
            } else {
                None
            }
        } else {
            None
        };

        if cacheable {
            self.output.lock().put(key, rendered.clone());
        }
        Ok(rendered)
    }

    /// Render emoji in an already parsed fragment. `None` means nothing
    /// changed.
    pub fn render_fragment(
        &self,
        fragment: &Fragment,
        state: &AppState,
        extra: &ExtraEmojis,
    ) -> Result<Option<Fragment>> {
        Ok(self
            .render_html(&fragment.to_string(), state, extra)?
            .map(|html| Fragment::parse(&html)))
    }

    /// Replace emoji in every text node of `fragment`. Returns whether
    /// anything was replaced.
    fn substitute(
        &self,
        fragment: &mut Fragment,
        state: &AppState,
        extra: &ExtraEmojis,
        locale: Option<Locale>,
    ) -> Result<bool> {
        let tokenized: Vec<(Vec<usize>, Vec<TextToken>)> = fragment
            .text_nodes()
            .into_iter()
            .filter(|(_, text)| has_emoji_like(text))
            .map(|(path, text)| (path, tokenize(text)))
            .collect();

        let mut glyphs = BTreeSet::new();
        let mut shortcodes = BTreeSet::new();
        for token in tokenized.iter().flat_map(|(_, tokens)| tokens) {
            match token {
                TextToken::Emoji(EmojiToken::Unicode(glyph)) if state.mode.substitutes(glyph) => {
                    glyphs.insert(glyph.clone());
                }
                TextToken::Emoji(EmojiToken::Custom(code)) if !extra.contains_key(code) => {
                    shortcodes.insert(code.clone());
                }
                _ => {}
            }
        }

        let unicode = match locale {
            Some(locale) if !glyphs.is_empty() => self.resolve_unicode(locale, &glyphs)?,
            _ => HashMap::new(),
        };
        let custom = self.resolve_custom(&shortcodes)?;

        let mut replacements: Vec<(Vec<usize>, Vec<Node>)> = tokenized
            .into_iter()
            .filter_map(|(path, tokens)| {
                self.replace_tokens(tokens, state, extra, &unicode, &custom)
                    .map(|nodes| (path, nodes))
            })
            .collect();

        // Later siblings first so earlier paths stay valid
        replacements.sort_by(|a, b| b.0.cmp(&a.0));
        let replaced = !replacements.is_empty();
        for (path, nodes) in replacements {
            fragment.splice(&path, nodes);
        }

        Ok(replaced)
    }

    /// Records for `glyphs`, keyed by glyph. Cache misses are fetched with one
    /// batched query.
    fn resolve_unicode(
        &self,
        locale: Locale,
        glyphs: &BTreeSet<String>,
    ) -> Result<HashMap<String, UnicodeEmojiRecord>> {
        let key = LocaleOrCustom::Locale(locale);
        let mut found = HashMap::new();
        let mut misses = Vec::new();

        for glyph in glyphs {
            let hexcode = emoji_to_hexcode(glyph);
            match self.cache.get(key, &hexcode) {
                Some(Resolution::Found(EmojiData::Unicode(record))) => {
                    found.insert(glyph.clone(), record);
                }
                Some(_) => {}
                None => misses.push((glyph, hexcode)),
            }
        }

        if misses.is_empty() {
            return Ok(found);
        }

        let hexcodes: Vec<&str> = misses.iter().map(|(_, hexcode)| hexcode.as_str()).collect();
        let mut by_hexcode: HashMap<String, UnicodeEmojiRecord> = self
            .db
            .get_many_by_hexcodes(locale, &hexcodes)?
            .into_iter()
            .map(|record| (record.hexcode.clone(), record))
            .collect();
        tracing::trace!(
            "Resolved {}/{} emoji in {}",
            by_hexcode.len(),
            misses.len(),
            locale
        );

        for (glyph, hexcode) in misses {
            match by_hexcode.remove(&hexcode) {
                Some(record) => {
                    self.cache.set(
                        key,
                        &hexcode,
                        Resolution::Found(EmojiData::Unicode(record.clone())),
                    );
                    found.insert(glyph.clone(), record);
                }
                None => {
                    self.cache.set(key, &hexcode, Resolution::Missing);
                }
            }
        }

        Ok(found)
    }

    /// Stored custom emoji for `shortcodes`, cache misses fetched with one
    /// batched query.
    fn resolve_custom(
        &self,
        shortcodes: &BTreeSet<String>,
    ) -> Result<HashMap<String, CustomEmojiRecord>> {
        let key = LocaleOrCustom::Custom;
        let mut found = HashMap::new();
        let mut misses = Vec::new();

        for shortcode in shortcodes {
            match self.cache.get(key, shortcode) {
                Some(Resolution::Found(EmojiData::Custom(record))) => {
                    found.insert(shortcode.clone(), record);
                }
                Some(_) => {}
                None => misses.push(shortcode.as_str()),
            }
        }

        if misses.is_empty() {
            return Ok(found);
        }

        let mut by_shortcode: HashMap<String, CustomEmojiRecord> = self
            .db
            .get_many_custom(&misses)?
            .into_iter()
            .map(|record| (record.shortcode.clone(), record))
            .collect();

        for shortcode in misses {
            match by_shortcode.remove(shortcode) {
                Some(record) => {
                    self.cache.set(
                        key,
                        shortcode,
                        Resolution::Found(EmojiData::Custom(record.clone())),
                    );
                    found.insert(shortcode.to_string(), record);
                }
                None => {
                    self.cache.set(key, shortcode, Resolution::Missing);
                }
            }
        }

        Ok(found)
    }

    /// Text and image nodes for one text node, `None` if no token was replaced
    fn replace_tokens(
        &self,
        tokens: Vec<TextToken>,
        state: &AppState,
        extra: &ExtraEmojis,
        unicode: &HashMap<String, UnicodeEmojiRecord>,
        custom: &HashMap<String, CustomEmojiRecord>,
    ) -> Option<Vec<Node>> {
        let mut nodes = Vec::new();
        let mut text = String::new();
        let mut replaced = false;

        for token in tokens {
            let emoji = match token {
                TextToken::Text(plain) => {
                    text.push_str(&plain);
                    continue;
                }
                TextToken::Emoji(emoji) => emoji,
            };

            let image = match &emoji {
                EmojiToken::Unicode(glyph) => unicode
                    .get(glyph)
                    .map(|record| self.unicode_image(glyph, record, state.dark_theme)),
                EmojiToken::Custom(code) => extra
                    .get(code)
                    .map(|emoji| (emoji.url.as_str(), emoji.static_url.as_str()))
                    .or_else(|| {
                        custom
                            .get(code)
                            .map(|record| (record.url.as_str(), record.static_url.as_str()))
                    })
                    .map(|(url, static_url)| {
                        custom_image(code, url, static_url, state.autoplay_gifs)
                    }),
            };

            match image {
                Some(image) => {
                    if !text.is_empty() {
                        nodes.push(Node::Text(std::mem::take(&mut text)));
                    }
                    nodes.push(Node::Element(image));
                    replaced = true;
                }
                None => text.push_str(&emoji.source_text()),
            }
        }

        if !replaced {
            return None;
        }
        if !text.is_empty() {
            nodes.push(Node::Text(text));
        }
        Some(nodes)
    }

    fn unicode_image(&self, glyph: &str, record: &UnicodeEmojiRecord, dark_theme: bool) -> Element {
        let id = to_canonical_image_id(&record.hexcode);
        let suffix = if border_info(&id).applies(dark_theme) {
            BORDER_SUFFIX
        } else {
            ""
        };
        let class = match inversion_class(glyph) {
            Some(inversion) => format!("{} {}", EMOJI_CLASS, inversion.as_str()),
            None => EMOJI_CLASS.to_string(),
        };

        Element::new("img")
            .with_attr("draggable", "false")
            .with_attr("class", &class)
            .with_attr("alt", glyph)
            .with_attr("title", &record.label)
            .with_attr("src", &format!("{}/emoji/{}{}.svg", self.asset_host, id, suffix))
    }
}

fn custom_image(shortcode: &str, url: &str, static_url: &str, autoplay: bool) -> Element {
    let code = format!(":{}:", shortcode);
    Element::new("img")
        .with_attr("draggable", "false")
        .with_attr("class", &format!("{} {}", EMOJI_CLASS, CUSTOM_EMOJI_CLASS))
        .with_attr("alt", &code)
        .with_attr("title", &code)
        .with_attr("src", if autoplay { url } else { static_url })
        .with_attr("data-original", url)
        .with_attr("data-static", static_url)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::Error;
    use crate::loader::tests::{english_dataset, loader_with, MockFetcher};
    use crate::render::ExtraEmoji;

    async fn setup() -> (EmojiRenderer, EmojiDatabase) {
        let fetcher = Arc::new(MockFetcher::default());
        let loader = loader_with(fetcher.clone());
        fetcher.respond(&loader.locale_url(DEFAULT_LOCALE), english_dataset(), None);
        loader.import_locale(DEFAULT_LOCALE, false).await.unwrap();

        let db = loader.database().clone();
        db.put_custom_emojis(
            &[CustomEmojiRecord {
                shortcode: "blobcat".to_string(),
                url: "https://x.test/blobcat.gif".to_string(),
                static_url: "https://x.test/blobcat.png".to_string(),
                category: None,
                visible_in_picker: true,
            }],
            true,
        )
        .unwrap();

        let cache = Arc::new(ResolutionCache::new(100, db.loaded().clone()));
        (EmojiRenderer::new(db.clone(), cache, 10, ""), db)
    }

    fn record(hexcode: &str, glyph: &str, label: &str) -> UnicodeEmojiRecord {
        UnicodeEmojiRecord {
            hexcode: hexcode.to_string(),
            unicode: glyph.to_string(),
            label: label.to_string(),
            shortcodes: Vec::new(),
            tags: Vec::new(),
            group: Some(0),
            order: Some(1),
            skin_hexcodes: Vec::new(),
            tokens: Vec::new(),
        }
        .with_tokens()
    }

    fn state(mode: EmojiMode) -> AppState {
        AppState {
            mode,
            ..AppState::default()
        }
    }

    #[tokio::test]
    async fn test_renders_unicode_images() {
        let (renderer, _) = setup().await;
        let html = renderer
            .render_html("Hello 😊🇪🇺!", &AppState::default(), &ExtraEmojis::new())
            .unwrap();

        assert_eq!(
            html.as_deref(),
            Some(concat!(
                "Hello ",
                "<img draggable=\"false\" class=\"emojione\" alt=\"😊\" ",
                "title=\"smiling face with smiling eyes\" src=\"/emoji/1f60a.svg\">",
                "<img draggable=\"false\" class=\"emojione\" alt=\"🇪🇺\" ",
                "title=\"flag: European Union\" src=\"/emoji/1f1ea-1f1fa.svg\">",
                "!"
            ))
        );
    }

    #[tokio::test]
    async fn test_plain_text_is_unchanged() {
        let (renderer, db) = setup().await;
        let before = db.query_count();
        let html = renderer
            .render_html("<p>nothing here</p>", &AppState::default(), &ExtraEmojis::new())
            .unwrap();
        assert_eq!(html, None);
        assert_eq!(db.query_count(), before);
    }

    #[tokio::test]
    async fn test_repeat_render_hits_output_cache() {
        let (renderer, db) = setup().await;
        let state = AppState::default();
        let extra = ExtraEmojis::new();

        let before = db.query_count();
        let first = renderer.render_html("<p>Hi 😊</p>", &state, &extra).unwrap();
        assert_eq!(db.query_count(), before + 1);

        let second = renderer.render_html("<p>Hi 😊</p>", &state, &extra).unwrap();
        assert_eq!(second, first);
        assert_eq!(db.query_count(), before + 1);
        assert_eq!(renderer.output_cache_len(), 1);
    }

    #[tokio::test]
    async fn test_lookups_are_batched() {
        let (renderer, db) = setup().await;
        let before = db.query_count();

        let html = renderer
            .render_html(
                "<p>😊 👋 <b>👋🏽 😊</b> 🇪🇺 :blobcat: :nope: :blobcat:</p>",
                &AppState::default(),
                &ExtraEmojis::new(),
            )
            .unwrap()
            .unwrap();
        // One locale query and one custom query
        assert_eq!(db.query_count(), before + 2);
        assert!(html.contains("title=\"waving hand: medium skin tone\""));
        assert!(html.contains("src=\"https://x.test/blobcat.gif\""));
        assert!(html.contains(":nope:"));

        // Same emoji in new markup resolve from the lookup cache
        renderer
            .render_html("<i>😊 :blobcat: :nope:</i>", &AppState::default(), &ExtraEmojis::new())
            .unwrap();
        assert_eq!(db.query_count(), before + 2);
    }

    #[tokio::test]
    async fn test_extra_emoji() {
        let (renderer, db) = setup().await;
        let mut extra = ExtraEmojis::new();
        extra.insert(
            "partyblob".to_string(),
            ExtraEmoji {
                shortcode: "partyblob".to_string(),
                url: "https://x.test/p.gif".to_string(),
                static_url: "https://x.test/p.png".to_string(),
            },
        );

        let before = db.query_count();
        let html = renderer
            .render_html(":partyblob:", &AppState::default(), &extra)
            .unwrap();
        assert_eq!(
            html.as_deref(),
            Some(concat!(
                "<img draggable=\"false\" class=\"emojione custom-emoji\" alt=\":partyblob:\" ",
                "title=\":partyblob:\" src=\"https://x.test/p.gif\" ",
                "data-original=\"https://x.test/p.gif\" data-static=\"https://x.test/p.png\">"
            ))
        );
        assert_eq!(db.query_count(), before);
        assert!(renderer
            .resolution_cache()
            .get(LocaleOrCustom::Custom, "partyblob")
            .is_none());
    }

    #[tokio::test]
    async fn test_static_url_without_autoplay() {
        let (renderer, _) = setup().await;
        let state = AppState {
            autoplay_gifs: false,
            ..AppState::default()
        };
        let html = renderer
            .render_html(":blobcat:", &state, &ExtraEmojis::new())
            .unwrap()
            .unwrap();
        assert!(html.contains("src=\"https://x.test/blobcat.png\""));
        assert!(html.contains("data-original=\"https://x.test/blobcat.gif\""));
    }

    #[tokio::test]
    async fn test_unknown_custom_stays_literal() {
        let (renderer, _) = setup().await;
        let html = renderer
            .render_html("hi :nope:", &AppState::default(), &ExtraEmojis::new())
            .unwrap();
        assert_eq!(html, None);
        assert_eq!(
            renderer.resolution_cache().get(LocaleOrCustom::Custom, "nope"),
            Some(Resolution::Missing)
        );
    }

    #[tokio::test]
    async fn test_extra_emoji_after_custom_miss() {
        let (renderer, _) = setup().await;
        let state = AppState::default();

        let html = renderer.render_html("x :soon:", &state, &ExtraEmojis::new()).unwrap();
        assert_eq!(html, None);
        assert_eq!(
            renderer.resolution_cache().get(LocaleOrCustom::Custom, "soon"),
            Some(Resolution::Missing)
        );

        let mut extra = ExtraEmojis::new();
        extra.insert(
            "soon".to_string(),
            ExtraEmoji {
                shortcode: "soon".to_string(),
                url: "https://x.test/u.gif".to_string(),
                static_url: "https://x.test/u.png".to_string(),
            },
        );
        let html = renderer.render_html("x :soon:", &state, &extra).unwrap().unwrap();
        assert!(html.starts_with("x <img"));
        assert!(html.contains("src=\"https://x.test/u.gif\""));
    }

    #[tokio::test]
    async fn test_character_references_render() {
        let (renderer, _) = setup().await;
        for html in ["<p>&#x1F60A; hi</p>", "<p>&#128522;</p>"] {
            let rendered = renderer
                .render_html(html, &AppState::default(), &ExtraEmojis::new())
                .unwrap()
                .unwrap();
            assert!(rendered.starts_with("<p><img"), "{}", rendered);
            assert!(rendered.contains("src=\"/emoji/1f60a.svg\""));
        }
    }

    #[tokio::test]
    async fn test_escaped_markup_stays_escaped() {
        let (renderer, _) = setup().await;
        let html = renderer
            .render_html("<p>&lt;b&gt; 😊 &amp;</p>", &AppState::default(), &ExtraEmojis::new())
            .unwrap()
            .unwrap();
        assert!(html.starts_with("<p>&lt;b&gt; <img"));
        assert!(html.ends_with("> &amp;</p>"));
    }

    #[tokio::test]
    async fn test_textarea_and_title_untouched() {
        let (renderer, _) = setup().await;
        let html = renderer
            .render_html(
                "<textarea>😊 :blobcat:</textarea><title>😊</title>",
                &AppState::default(),
                &ExtraEmojis::new(),
            )
            .unwrap();
        assert_eq!(html, None);
    }

    #[tokio::test]
    async fn test_script_and_style_untouched() {
        let (renderer, _) = setup().await;
        let html = renderer
            .render_html(
                "<script>let a = '😊';</script><style>p::after { content: '😊' }</style>",
                &AppState::default(),
                &ExtraEmojis::new(),
            )
            .unwrap();
        assert_eq!(html, None);
    }

    #[tokio::test]
    async fn test_native_mode_never_substitutes() {
        let (renderer, db) = setup().await;
        let before = db.query_count();
        let html = renderer
            .render_html("😊🇪🇺", &state(EmojiMode::Native), &ExtraEmojis::new())
            .unwrap();
        assert_eq!(html, None);
        assert_eq!(db.query_count(), before);
    }

    #[tokio::test]
    async fn test_native_flags_mode_replaces_only_flags() {
        let (renderer, _) = setup().await;
        let html = renderer
            .render_html("😊🇪🇺", &state(EmojiMode::NativeFlags), &ExtraEmojis::new())
            .unwrap()
            .unwrap();
        assert!(html.starts_with("😊<img"));
        assert!(html.contains("alt=\"🇪🇺\""));
        assert!(!html.contains("alt=\"😊\""));
    }

    #[tokio::test]
    async fn test_border_and_inversion() {
        let (renderer, db) = setup().await;
        db.put_locale_emojis(
            DEFAULT_LOCALE,
            &[record("1F480", "💀", "skull"), record("1F517", "🔗", "link")],
        )
        .unwrap();

        let light = renderer
            .render_html("💀🔗", &AppState::default(), &ExtraEmojis::new())
            .unwrap()
            .unwrap();
        assert!(light.contains("src=\"/emoji/1f480_border.svg\""));
        assert!(light.contains("class=\"emojione invert-on-light\""));

        let dark_state = AppState {
            dark_theme: true,
            ..AppState::default()
        };
        let dark = renderer
            .render_html("💀🔗", &dark_state, &ExtraEmojis::new())
            .unwrap()
            .unwrap();
        assert!(dark.contains("src=\"/emoji/1f480.svg\""));
    }

    #[tokio::test]
    async fn test_unloaded_locale_leaves_unicode_literal() {
        let (renderer, db) = setup().await;
        db.loaded().clear();

        let html = renderer
            .render_html("😊 :blobcat:", &AppState::default(), &ExtraEmojis::new())
            .unwrap()
            .unwrap();
        assert!(html.starts_with("😊 <img"));
    }

    #[tokio::test]
    async fn test_falls_back_to_loaded_locale() {
        let (renderer, _) = setup().await;
        let state = AppState {
            current_locale: "de".to_string(),
            locales: vec!["fr".to_string()],
            ..AppState::default()
        };
        assert_eq!(renderer.lookup_locale(&state), Some(DEFAULT_LOCALE));
    }

    #[tokio::test]
    async fn test_store_rejects_unloaded_locale() {
        let (_, db) = setup().await;
        let de = Locale::parse("de").unwrap();
        let err = db.get_many_by_hexcodes(de, &["1F60A"]).unwrap_err();
        assert!(matches!(err, Error::LocaleNotLoaded(_)));
    }

    #[tokio::test]
    async fn test_render_fragment() {
        let (renderer, _) = setup().await;
        let fragment = Fragment::parse("<p>👋</p>");
        let rendered = renderer
            .render_fragment(&fragment, &AppState::default(), &ExtraEmojis::new())
            .unwrap()
            .unwrap();
        assert!(rendered.to_string().contains("title=\"waving hand\""));
    }
}
