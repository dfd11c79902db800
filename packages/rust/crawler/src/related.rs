//! "Related searches" expansion links from scholar result pages.

use std::sync::LazyLock;

use regex::Regex;
use url::Url;

static RELATED_HEADING: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"(?im)^#{1,6}\s*related searches\s*$").expect("valid regex")
});

static BULLET_LINK: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"^\s*[*+-]\s+\[[^\]]*\]\(([^)\s]+)\)").expect("valid regex")
});

/// Links listed under the "Related searches" heading, each with its
/// `as_ylo` (earliest year) parameter set to `year`. The block ends at the
/// first non-blank line that is not a bullet link. Relative links are
/// resolved against `page_url`.
pub fn extract_related_searches(markdown: &str, page_url: &str, year: i32) -> Vec<String> {
    let Some(heading) = RELATED_HEADING.find(markdown) else {
        return Vec::new();
    };
    let base = Url::parse(page_url).ok();

    let mut links = Vec::new();
    for line in markdown[heading.end()..].lines() {
        if line.trim().is_empty() {
            if links.is_empty() {
                continue;
            }
            break;
        }
        let Some(caps) = BULLET_LINK.captures(line) else {
            break;
        };
        let raw = &caps[1];
        let resolved = match (&base, Url::parse(raw)) {
            (_, Ok(url)) => Some(url),
            (Some(base), Err(url::ParseError::RelativeUrlWithoutBase)) => base.join(raw).ok(),
            _ => None,
        };
        if let Some(url) = resolved {
            links.push(with_year_filter(url.as_str(), year));
        }
    }
    links
}

/// Set (or replace) the `as_ylo` query parameter. Unparsable URLs are
/// returned unchanged.
pub fn with_year_filter(url: &str, year: i32) -> String {
    let Ok(mut parsed) = Url::parse(url) else {
        return url.to_string();
    };
    let pairs: Vec<(String, String)> = parsed
        .query_pairs()
        .filter(|(k, _)| k != "as_ylo")
        .map(|(k, v)| (k.into_owned(), v.into_owned()))
        .collect();
    parsed
        .query_pairs_mut()
        .clear()
        .extend_pairs(pairs)
        .append_pair("as_ylo", &year.to_string());
    parsed.to_string()
}

/// First value of query parameter `name`, if present and non-empty.
pub fn query_param(url: &str, name: &str) -> Option<String> {
    let parsed = Url::parse(url).ok()?;
    parsed
        .query_pairs()
        .find(|(k, _)| k == name)
        .map(|(_, v)| v.into_owned())
        .filter(|v| !v.is_empty())
}
