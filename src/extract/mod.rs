//! Page fetching and readability extraction.
//!
//! Fetches a URL with a short deadline, rejects non-HTML responses, strips
//! page chrome down to title/body/excerpt, and recovers a publication date
//! from common meta tags or the search backend's age hint. Any failure drops
//! the URL: the caller filters failed extractions and the pipeline proceeds
//! with whatever succeeded.

use std::time::Duration;

use async_trait::async_trait;
use chrono::{DateTime, NaiveDate, TimeZone, Utc};
use scraper::{ElementRef, Html, Selector};
use thiserror::Error;
use tracing::debug;

use crate::models::PageExtract;

/// Deadline for one page fetch.
const FETCH_TIMEOUT: Duration = Duration::from_secs(8);

/// Excerpt length target, in characters.
const EXCERPT_MAX: usize = 300;

/// Below this much paragraph text, fall back to the container's full text.
const MIN_PARAGRAPH_TEXT: usize = 200;

/// Errors that can occur while extracting a page.
#[derive(Debug, Error)]
pub enum ExtractError {
    /// Network or HTTP error.
    #[error("Fetch failed: {0}")]
    Fetch(String),

    /// The response was not an HTML document.
    #[error("Not an HTML page: {0}")]
    NotHtml(String),

    /// The page yielded no usable text.
    #[error("No readable content: {0}")]
    Empty(String),
}

/// Result type for extraction operations.
pub type ExtractResult<T> = Result<T, ExtractError>;

/// Trait for page-content sources, so the pipeline can run against a
/// pinned extraction set in tests.
#[async_trait]
pub trait Extractor: Send + Sync {
    /// Fetch and extract one page.
    async fn extract(&self, url: &str, published_hint: Option<&str>)
        -> ExtractResult<PageExtract>;
}

/// Readability-style page extractor.
#[derive(Debug, Clone)]
pub struct PageExtractor {
    client: reqwest::Client,
}

impl PageExtractor {
    /// Create an extractor with its own HTTP client.
    pub fn new() -> Self {
        Self {
            client: reqwest::Client::builder()
                .user_agent(
                    "Mozilla/5.0 (Windows NT 10.0; Win64; x64) AppleWebKit/537.36",
                )
                .timeout(FETCH_TIMEOUT)
                .connect_timeout(Duration::from_secs(5))
                .build()
                .unwrap_or_default(),
        }
    }

}

impl Default for PageExtractor {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl Extractor for PageExtractor {
    /// Fetch and extract one page. `published_hint` is the search backend's
    /// age string, used when the page itself carries no date.
    async fn extract(
        &self,
        url: &str,
        published_hint: Option<&str>,
    ) -> ExtractResult<PageExtract> {
        let response = self
            .client
            .get(url)
            .send()
            .await
            .map_err(|e| ExtractError::Fetch(format!("{}: {}", url, e)))?;

        if !response.status().is_success() {
            return Err(ExtractError::Fetch(format!("{}: HTTP {}", url, response.status())));
        }

        let content_type = response
            .headers()
            .get(reqwest::header::CONTENT_TYPE)
            .and_then(|v| v.to_str().ok())
            .unwrap_or("")
            .to_string();
        if !content_type.contains("text/html") && !content_type.contains("application/xhtml") {
            return Err(ExtractError::NotHtml(format!("{}: {}", url, content_type)));
        }

        let html = response
            .text()
            .await
            .map_err(|e| ExtractError::Fetch(format!("{}: {}", url, e)))?;

        let extract = extract_from_html(url, &html, published_hint, Utc::now())?;
        debug!(
            "extracted {} chars from {} (date: {:?})",
            extract.body.len(),
            url,
            extract.published_date
        );
        Ok(extract)
    }
}

/// Pure extraction over already-fetched HTML. `now` anchors relative age
/// hints so tests can pin it.
pub fn extract_from_html(
    url: &str,
    html: &str,
    published_hint: Option<&str>,
    now: DateTime<Utc>,
) -> ExtractResult<PageExtract> {
    let document = Html::parse_document(html);

    let title = find_title(&document).unwrap_or_else(|| url.to_string());
    let body = find_body_text(&document);
    if body.is_empty() {
        return Err(ExtractError::Empty(url.to_string()));
    }

    let published_date = find_published_date(&document)
        .or_else(|| published_hint.and_then(|hint| parse_published(hint, now)));

    let excerpt = find_description(&document).unwrap_or_else(|| leading_excerpt(&body));

    Ok(PageExtract {
        url: url.to_string(),
        title,
        body,
        excerpt,
        published_date,
        features: None,
    })
}

fn select_first<'a>(document: &'a Html, css: &str) -> Option<ElementRef<'a>> {
    let sel = Selector::parse(css).ok()?;
    document.select(&sel).next()
}

fn find_title(document: &Html) -> Option<String> {
    for css in ["meta[property=\"og:title\"]", "meta[name=\"twitter:title\"]"] {
        if let Some(el) = select_first(document, css) {
            if let Some(content) = el.value().attr("content") {
                let content = collapse_whitespace(content);
                if !content.is_empty() {
                    return Some(content);
                }
            }
        }
    }
    for css in ["title", "h1"] {
        if let Some(el) = select_first(document, css) {
            let text = collapse_whitespace(&el.text().collect::<String>());
            if !text.is_empty() {
                return Some(text);
            }
        }
    }
    None
}

fn find_description(document: &Html) -> Option<String> {
    for css in [
        "meta[name=\"description\"]",
        "meta[property=\"og:description\"]",
    ] {
        if let Some(el) = select_first(document, css) {
            if let Some(content) = el.value().attr("content") {
                let content = collapse_whitespace(content);
                if !content.is_empty() {
                    return Some(content);
                }
            }
        }
    }
    None
}

/// Pick the main content container and collect its paragraph text.
fn find_body_text(document: &Html) -> String {
    let candidates = [
        "article",
        "main",
        "[role=\"main\"]",
        "#content",
        ".post-content",
        ".article-body",
        "body",
    ];
    for css in candidates {
        if let Some(container) = select_first(document, css) {
            let text = paragraph_text(container);
            if !text.is_empty() {
                return text;
            }
        }
    }
    String::new()
}

fn paragraph_text(container: ElementRef<'_>) -> String {
    let Ok(p_selector) = Selector::parse("p") else {
        return String::new();
    };
    let paragraphs: Vec<String> = container
        .select(&p_selector)
        .map(|p| collapse_whitespace(&p.text().collect::<String>()))
        .filter(|t| !t.is_empty())
        .collect();
    let joined = paragraphs.join("\n\n");
    if joined.len() >= MIN_PARAGRAPH_TEXT {
        return joined;
    }
    // Sparse markup: fall back to the container's full text, which at least
    // skips script/style bodies living outside it.
    let fallback = collapse_whitespace(&container.text().collect::<String>());
    if fallback.len() > joined.len() {
        fallback
    } else {
        joined
    }
}

/// Look for a publication timestamp in the usual meta tags.
fn find_published_date(document: &Html) -> Option<DateTime<Utc>> {
    let meta_selectors = [
        "meta[property=\"article:published_time\"]",
        "meta[property=\"og:published_time\"]",
        "meta[name=\"article:published_time\"]",
        "meta[itemprop=\"datePublished\"]",
        "meta[name=\"date\"]",
    ];
    for css in meta_selectors {
        if let Some(el) = select_first(document, css) {
            if let Some(date) = el.value().attr("content").and_then(parse_date) {
                return Some(date);
            }
        }
    }
    if let Some(el) = select_first(document, "time[datetime]") {
        if let Some(date) = el.value().attr("datetime").and_then(parse_date) {
            return Some(date);
        }
    }
    None
}

/// Parse an absolute date string: RFC 3339 / ISO, `YYYY-MM-DD`, or
/// `Month D, YYYY` (full or abbreviated month).
pub fn parse_date(s: &str) -> Option<DateTime<Utc>> {
    let s = s.trim();
    if s.is_empty() {
        return None;
    }
    if let Ok(dt) = DateTime::parse_from_rfc3339(s) {
        return Some(dt.with_timezone(&Utc));
    }
    for format in ["%Y-%m-%dT%H:%M:%S", "%Y-%m-%d %H:%M:%S"] {
        if let Ok(naive) = chrono::NaiveDateTime::parse_from_str(s, format) {
            return Some(Utc.from_utc_datetime(&naive));
        }
    }
    for format in ["%Y-%m-%d", "%B %d, %Y", "%b %d, %Y", "%B %e, %Y"] {
        if let Ok(date) = NaiveDate::parse_from_str(s, format) {
            return date
                .and_hms_opt(0, 0, 0)
                .map(|naive| Utc.from_utc_datetime(&naive));
        }
    }
    None
}

/// Parse a relative age hint like `"3 days ago"` against `now`.
pub fn parse_age_hint(s: &str, now: DateTime<Utc>) -> Option<DateTime<Utc>> {
    let lowered = s.trim().to_lowercase();
    let parts: Vec<&str> = lowered.split_whitespace().collect();
    if parts.len() != 3 || parts[2] != "ago" {
        return None;
    }
    let count: i64 = parts[0].parse().ok()?;
    let unit = parts[1].trim_end_matches('s');
    let delta = match unit {
        "hour" => chrono::Duration::hours(count),
        "day" => chrono::Duration::days(count),
        "week" => chrono::Duration::weeks(count),
        "month" => chrono::Duration::days(count * 30),
        "year" => chrono::Duration::days(count * 365),
        _ => return None,
    };
    Some(now - delta)
}

/// Parse a backend-supplied hint: absolute formats first, then relative.
pub fn parse_published(hint: &str, now: DateTime<Utc>) -> Option<DateTime<Utc>> {
    parse_date(hint).or_else(|| parse_age_hint(hint, now))
}

fn collapse_whitespace(s: &str) -> String {
    s.split_whitespace().collect::<Vec<_>>().join(" ")
}

fn leading_excerpt(body: &str) -> String {
    if body.len() <= EXCERPT_MAX {
        return body.to_string();
    }
    let cut = (0..=EXCERPT_MAX)
        .rev()
        .find(|&i| body.is_char_boundary(i))
        .unwrap_or(0);
    let mut excerpt = body[..cut].to_string();
    // Trim back to the last word boundary so the excerpt doesn't end
    // mid-word.
    if let Some(space) = excerpt.rfind(' ') {
        excerpt.truncate(space);
    }
    excerpt
}
