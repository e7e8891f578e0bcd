//! Display-name extraction from profile pages and channel feeds.

use std::sync::LazyLock;

use regex::Regex;

use crate::{ResolveError, ResolveKey};

/// Trailing site marker appended to page titles.
pub const SITE_SUFFIX: &str = "YouTube";

static RE_OG_PROPERTY_FIRST: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(
        r#"(?is)<meta\s[^>]*?property\s*=\s*["']og:title["'][^>]*?content\s*=\s*(?:"([^"]*)"|'([^']*)')"#,
    )
    .unwrap()
});
static RE_OG_CONTENT_FIRST: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(
        r#"(?is)<meta\s[^>]*?content\s*=\s*(?:"([^"]*)"|'([^']*)')[^>]*?property\s*=\s*["']og:title["']"#,
    )
    .unwrap()
});
static RE_TITLE: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"(?is)<title[^>]*>([^<]+)</title>").unwrap());

/// Raw `og:title` content, attribute order and quote style tolerant.
pub fn extract_og_title(html: &str) -> Option<&str> {
    [&*RE_OG_PROPERTY_FIRST, &*RE_OG_CONTENT_FIRST]
        .iter()
        .find_map(|re| {
            let caps = re.captures(html)?;
            caps.get(1).or_else(|| caps.get(2)).map(|m| m.as_str())
        })
}

/// Raw text of the first `<title>` element.
pub fn extract_html_title(html: &str) -> Option<&str> {
    RE_TITLE
        .captures(html)
        .and_then(|c| c.get(1))
        .map(|m| m.as_str())
}

/// Channel title of an Atom feed: its first `<title>` element.
pub fn extract_feed_title(xml: &str) -> Option<&str> {
    extract_html_title(xml)
}

/// Remove a trailing `" - <suffix>"` (case-insensitive) from a title.
pub fn strip_site_suffix<'a>(title: &'a str, suffix: &str) -> &'a str {
    let t = title.trim_end();
    let Some(idx) = t.len().checked_sub(suffix.len()) else {
        return t;
    };
    if !t.is_char_boundary(idx) || !t[idx..].eq_ignore_ascii_case(suffix) {
        return t;
    }
    match t[..idx].trim_end().strip_suffix('-') {
        Some(rest) => rest.trim_end(),
        None => t,
    }
}

/// Decode named and numeric character references.
///
/// Unknown or malformed references are kept verbatim.
pub fn decode_entities(text: &str) -> String {
    let mut out = String::with_capacity(text.len());
    let mut rest = text;
    while let Some(amp) = rest.find('&') {
        out.push_str(&rest[..amp]);
        let tail = &rest[amp..];
        let decoded = tail[1..]
            .find(';')
            .filter(|&end| (1..=10).contains(&end))
            .map(|end| &tail[1..1 + end])
            .filter(|e| e.chars().all(|c| c.is_ascii_alphanumeric() || c == '#'))
            .and_then(|e| decode_entity(e).map(|c| (c, e.len())));
        match decoded {
            Some((c, len)) => {
                out.push(c);
                rest = &tail[len + 2..];
            }
            None => {
                out.push('&');
                rest = &tail[1..];
            }
        }
    }
    out.push_str(rest);
    out
}

fn decode_entity(entity: &str) -> Option<char> {
    if let Some(num) = entity.strip_prefix('#') {
        let code = match num.strip_prefix(['x', 'X']) {
            Some(hex) => u32::from_str_radix(hex, 16).ok()?,
            None => num.parse::<u32>().ok()?,
        };
        return char::from_u32(code);
    }
    let c = match entity {
        "amp" => '&',
        "lt" => '<',
        "gt" => '>',
        "quot" => '"',
        "apos" => '\'',
        "nbsp" => '\u{a0}',
        "copy" => '©',
        "reg" => '®',
        "trade" => '™',
        "hellip" => '…',
        "mdash" => '—',
        "ndash" => '–',
        "lsquo" => '‘',
        "rsquo" => '’',
        "ldquo" => '“',
        "rdquo" => '”',
        _ => return None,
    };
    Some(c)
}

/// Pull the display name out of a fetched body.
///
/// Profile pages prefer `og:title` over `<title>`; channel feeds use the
/// feed title. The result is decoded, stripped of the site suffix and
/// trimmed. Empty names and placeholder titles count as not found.
pub fn extract_display_name(
    body: &str,
    key: &ResolveKey,
    is_placeholder: impl Fn(&str) -> bool,
) -> Result<String, ResolveError> {
    let raw = match key {
        ResolveKey::Handle(_) => extract_og_title(body).or_else(|| extract_html_title(body)),
        ResolveKey::ChannelId(_) => extract_feed_title(body),
    }
    .ok_or_else(|| ResolveError::ParseFailure(format!("no title field for {key}")))?;

    let decoded = decode_entities(raw);
    let name = strip_site_suffix(decoded.trim(), SITE_SUFFIX).trim();
    if name.is_empty() || is_placeholder(name) {
        return Err(ResolveError::NotFound);
    }
    Ok(name.to_string())
}

/// Decides when enough of a streamed body has arrived to extract the name.
#[derive(Debug)]
pub struct FieldProbe {
    kind: ProbeKind,
}

#[derive(Debug, Clone, Copy)]
enum ProbeKind {
    Page,
    Feed,
}

impl FieldProbe {
    pub fn for_key(key: &ResolveKey) -> Self {
        let kind = match key {
            ResolveKey::Handle(_) => ProbeKind::Page,
            ResolveKey::ChannelId(_) => ProbeKind::Feed,
        };
        Self { kind }
    }

    /// Whether `buffered` already holds everything the extractor needs.
    pub fn is_complete(&self, buffered: &str) -> bool {
        match self.kind {
            ProbeKind::Page => {
                extract_og_title(buffered).is_some() || contains_ci(buffered, "</head>")
            }
            ProbeKind::Feed => contains_ci(buffered, "</title>"),
        }
    }
}

fn contains_ci(haystack: &str, needle: &str) -> bool {
    haystack
        .as_bytes()
        .windows(needle.len())
        .any(|w| w.eq_ignore_ascii_case(needle.as_bytes()))
}
