//! Message body normalization.
//!
//! Server payloads arrive in one of several shapes: rendered HTML, rendered
//! HTML that was escaped in transit, raw text carrying markup, or plain
//! text. [`classify`] names the shape once and [`ContentNormalizer`] turns
//! every shape into the same contract: sanitized markup with absolute asset
//! URLs. The normalizer is a pure function of its input and the server
//! origin, and its output is a fixed point.

use std::{
    borrow::Cow,
    collections::{HashMap, HashSet},
    sync::LazyLock,
};

use ammonia::Builder;
use regex::{Captures, Regex};
use url::Url;

use crate::error::{ClientError, ClientResult};

const ALLOWED_TAGS: &[&str] = &[
    "p", "div", "span", "a", "br", "strong", "b", "em", "i", "ul", "ol", "li", "blockquote",
    "pre", "code", "table", "thead", "tbody", "tr", "td", "th", "hr", "img", "h1", "h2", "h3",
    "h4", "h5", "h6",
];

const STRIPPED_WITH_CONTENT: &[&str] = &["script", "style", "iframe", "object", "embed"];

const GENERIC_ATTRIBUTES: &[&str] = &["class", "title", "role", "aria-label"];

const URL_SCHEMES: &[&str] = &["http", "https", "mailto"];

pub const PLAIN_TEXT_CLASS: &str = "plain-text";

/// Output for markup that sanitizes to nothing. Blank output would be read
/// back as an empty plain-text payload.
pub const EMPTY_MARKUP: &str = "<span></span>";

const MAX_CLEAN_PASSES: usize = 4;

static ESCAPED_TAG: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(
        r"(?i)&lt;/?(p|div|span|a|br|strong|em|ul|ol|li|blockquote|pre|code|table|tr|td|th|img|h[1-6])\b",
    )
    .expect("escaped tag pattern")
});

static LITERAL_TAG: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"(?i)</?[a-z][^>]*>").expect("literal tag pattern"));

static ENTITY: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"&(#[0-9]{1,7}|#[xX][0-9a-fA-F]{1,6}|[a-zA-Z]+);").expect("entity pattern")
});

static PRE_LEADING_NEWLINE: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"(<pre(?:\s[^>]*)?>)\n").expect("pre newline pattern"));

static THUMBNAIL: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"^(?P<base>.*)/user_uploads/thumbnail/(?P<path>.+?\.[A-Za-z0-9]+)/[^/]+$")
        .expect("thumbnail pattern")
});

/// The shape a message payload was transmitted in.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PayloadShape<'a> {
    /// Markup to sanitize; `escaped` means entities must be decoded first.
    Markup { source: &'a str, escaped: bool },
    PlainText(&'a str),
}

pub fn classify<'a>(rendered: Option<&'a str>, raw: Option<&'a str>) -> PayloadShape<'a> {
    if let Some(html) = rendered.filter(|html| !html.trim().is_empty()) {
        return PayloadShape::Markup {
            source: html,
            escaped: looks_escaped(html),
        };
    }
    if let Some(text) = raw.filter(|text| !text.trim().is_empty()) {
        if looks_escaped(text) {
            return PayloadShape::Markup {
                source: text,
                escaped: true,
            };
        }
        if LITERAL_TAG.is_match(text) {
            return PayloadShape::Markup {
                source: text,
                escaped: false,
            };
        }
    }
    PayloadShape::PlainText(raw.unwrap_or_default())
}

/// Escaped tag markers from the allow-list, and no literal markup of its own.
pub fn looks_escaped(text: &str) -> bool {
    ESCAPED_TAG.is_match(text) && !LITERAL_TAG.is_match(text)
}

pub fn decode_entities(text: &str) -> Cow<'_, str> {
    ENTITY.replace_all(text, |caps: &Captures<'_>| {
        let entity = &caps[1];
        let decoded = match entity {
            "lt" => Some('<'),
            "gt" => Some('>'),
            "amp" => Some('&'),
            "quot" => Some('"'),
            "apos" => Some('\''),
            "nbsp" => Some('\u{a0}'),
            _ => numeric_entity(entity),
        };
        match decoded {
            Some(ch) => ch.to_string(),
            None => caps[0].to_string(),
        }
    })
}

fn numeric_entity(entity: &str) -> Option<char> {
    let digits = entity.strip_prefix('#')?;
    let code = match digits.strip_prefix(['x', 'X']) {
        Some(hex) => u32::from_str_radix(hex, 16).ok()?,
        None => digits.parse::<u32>().ok()?,
    };
    char::from_u32(code).filter(|ch| *ch != '\0')
}

/// Escapes text exactly the way the sanitizer serializes text nodes, so
/// plain-text output survives a second pass unchanged.
pub fn escape_text(text: &str) -> String {
    let mut escaped = String::with_capacity(text.len());
    for ch in text.chars() {
        match ch {
            '&' => escaped.push_str("&amp;"),
            '<' => escaped.push_str("&lt;"),
            '>' => escaped.push_str("&gt;"),
            '\u{a0}' => escaped.push_str("&nbsp;"),
            '\0' => {}
            other => escaped.push(other),
        }
    }
    escaped
}

/// Maps a thumbnail URL to its full-resolution upload, if it is one.
pub fn full_size_url(src: &str) -> Option<String> {
    let caps = THUMBNAIL.captures(src)?;
    Some(format!("{}/user_uploads/{}", &caps["base"], &caps["path"]))
}

pub struct ContentNormalizer {
    origin: Url,
    sanitizer: Builder<'static>,
}

impl ContentNormalizer {
    pub fn new(origin: &str) -> ClientResult<Self> {
        let origin = Url::parse(origin.trim())
            .map_err(|err| ClientError::Decode(format!("invalid server origin '{origin}': {err}")))?;
        let sanitizer = build_sanitizer(origin.clone());
        Ok(Self { origin, sanitizer })
    }

    pub fn origin(&self) -> &Url {
        &self.origin
    }

    pub fn normalize(&self, rendered: Option<&str>, raw: Option<&str>) -> String {
        match classify(rendered, raw) {
            PayloadShape::Markup { source, escaped } => {
                let html = if escaped {
                    decode_entities(source)
                } else {
                    Cow::Borrowed(source)
                };
                self.sanitize(&html)
            }
            PayloadShape::PlainText(text) => plain_text_block(text),
        }
    }

    /// Sanitizes markup and rewrites its asset URLs.
    pub fn sanitize(&self, html: &str) -> String {
        let cleaned = self.clean_stable(html);
        if cleaned.trim().is_empty() {
            return EMPTY_MARKUP.to_string();
        }
        if looks_escaped(&cleaned) {
            // Would be read back as escaped markup on a second pass.
            return format!("<span>{cleaned}</span>");
        }
        cleaned
    }

    /// One sanitizer pass whose output parses back to itself.
    ///
    /// The parser drops the first newline after `<pre>` and the serializer
    /// does not write it back, so that newline is doubled before the result
    /// is checked against a second pass.
    fn clean_stable(&self, html: &str) -> String {
        let mut current = self.sanitizer.clean(html).to_string();
        for _ in 0..MAX_CLEAN_PASSES {
            let restored = PRE_LEADING_NEWLINE
                .replace_all(&current, "${1}\n\n")
                .into_owned();
            let reparsed = self.sanitizer.clean(&restored).to_string();
            if reparsed == current {
                return restored;
            }
            current = reparsed;
        }
        current
    }

    /// Absolute, canonical form of an asset reference such as an avatar.
    pub fn resolve_asset_url(&self, url: &str) -> String {
        rewrite_url(&self.origin, url.trim()).into_owned()
    }
}

fn plain_text_block(text: &str) -> String {
    let text = text.replace("\r\n", "\n").replace('\r', "\n");
    let text = text.trim_start_matches('\n');
    format!(
        "<pre class=\"{PLAIN_TEXT_CLASS}\">{}</pre>",
        escape_text(text)
    )
}

fn build_sanitizer(origin: Url) -> Builder<'static> {
    let mut builder = Builder::new();
    builder
        .tags(ALLOWED_TAGS.iter().copied().collect::<HashSet<_>>())
        .clean_content_tags(STRIPPED_WITH_CONTENT.iter().copied().collect::<HashSet<_>>())
        .generic_attributes(GENERIC_ATTRIBUTES.iter().copied().collect::<HashSet<_>>())
        .tag_attributes(HashMap::new())
        .add_tag_attributes("a", &["href", "target"])
        .add_tag_attributes("img", &["src", "alt", "width", "height"])
        .add_tag_attributes("td", &["colspan", "rowspan"])
        .add_tag_attributes("th", &["colspan", "rowspan"])
        .url_schemes(URL_SCHEMES.iter().copied().collect::<HashSet<_>>())
        .link_rel(Some("noopener noreferrer"))
        .set_tag_attribute_value("img", "loading", "lazy")
        .set_tag_attribute_value("img", "decoding", "async")
        .attribute_filter(move |_element, attribute, value| match attribute {
            "src" | "href" => Some(rewrite_url(&origin, value)),
            _ => Some(Cow::Borrowed(value)),
        });
    builder
}

fn rewrite_url<'u>(origin: &Url, value: &'u str) -> Cow<'u, str> {
    let absolute = match Url::parse(value) {
        Ok(_) => Cow::Borrowed(value),
        Err(url::ParseError::RelativeUrlWithoutBase) => match origin.join(value) {
            Ok(joined) => Cow::Owned(joined.to_string()),
            Err(_) => return Cow::Borrowed(value),
        },
        Err(_) => return Cow::Borrowed(value),
    };
    if !absolute.starts_with(origin.as_str().trim_end_matches('/')) {
        return absolute;
    }
    match full_size_url(&absolute) {
        Some(full) => Cow::Owned(full),
        None => absolute,
    }
}

#[cfg(test)]
#[path = "tests/content_tests.rs"]
mod tests;
