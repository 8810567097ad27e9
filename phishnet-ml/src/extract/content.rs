use std::time::Duration;

use log::debug;
use once_cell::sync::Lazy;
use scraper::{Html, Selector};

use crate::schema::{FeatureId, FeatureValue, FeatureVector};

static ANCHORS: Lazy<Selector> =
    Lazy::new(|| Selector::parse("a[href]").expect("valid anchor selector"));
static FORMS: Lazy<Selector> = Lazy::new(|| Selector::parse("form").expect("valid form selector"));
static IFRAMES: Lazy<Selector> =
    Lazy::new(|| Selector::parse("iframe").expect("valid iframe selector"));

#[derive(Debug, thiserror::Error)]
pub enum FetchError {
    #[error("HTTP client setup failed: {0}")]
    Client(#[source] reqwest::Error),
    #[error("request to {url} failed: {source}")]
    Request {
        url: String,
        #[source]
        source: reqwest::Error,
    },
    #[error("{0}")]
    Other(String),
}

/// Retrieves the markup behind a URL.
pub trait PageFetcher: Send + Sync {
    fn fetch(&self, url: &str) -> Result<String, FetchError>;
}

/// Blocking HTTP fetcher with a browser-like `User-Agent` and a hard timeout.
///
/// The body is returned whatever the status code; error pages still carry
/// the markup we count.
#[derive(Debug, Clone)]
pub struct HttpFetcher {
    client: reqwest::blocking::Client,
}

impl HttpFetcher {
    pub fn new(user_agent: &str, timeout: Duration) -> Result<Self, FetchError> {
        let client = reqwest::blocking::Client::builder()
            .user_agent(user_agent)
            .timeout(timeout)
            .build()
            .map_err(FetchError::Client)?;
        Ok(Self { client })
    }
}

impl PageFetcher for HttpFetcher {
    fn fetch(&self, url: &str) -> Result<String, FetchError> {
        let request_error = |source| FetchError::Request {
            url: url.to_string(),
            source,
        };
        let response = self.client.get(url).send().map_err(request_error)?;
        response.text().map_err(request_error)
    }
}

/// Page statistics the content features are built from.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct PageSummary {
    pub external_links: usize,
    pub has_form: bool,
    pub iframes: usize,
}

/// Counts external links, forms and iframes in `markup` served from `page_url`.
pub fn summarize(page_url: &str, markup: &str) -> PageSummary {
    let document = Html::parse_document(markup);
    let own_authority = netloc(page_url);
    let external_links = document
        .select(&ANCHORS)
        .filter_map(|anchor| anchor.value().attr("href"))
        .filter(|href| {
            let authority = netloc(href);
            !authority.is_empty() && authority != own_authority
        })
        .count();

    PageSummary {
        external_links,
        has_form: document.select(&FORMS).next().is_some(),
        iframes: document.select(&IFRAMES).count(),
    }
}

/// Fills link, form and iframe features. Any fetch failure leaves all three
/// unavailable.
pub fn extract_into(url: &str, fetcher: &dyn PageFetcher, vector: &mut FeatureVector) {
    let markup = match fetcher.fetch(url) {
        Ok(markup) => markup,
        Err(err) => {
            debug!(target: "phishnet_ml::extract", "content features unavailable for {url}: {err}");
            return;
        }
    };

    let summary = summarize(url, &markup);
    vector.set(
        FeatureId::NumExternalLinks,
        FeatureValue::count(summary.external_links),
    );
    vector.set(FeatureId::HasForm, FeatureValue::flag(summary.has_form));
    vector.set(FeatureId::NumIframes, FeatureValue::count(summary.iframes));
}

/// Network location of a URL reference: the text between `//` and the next
/// `/`, `?` or `#`. Relative references have none.
pub fn netloc(reference: &str) -> &str {
    let rest = match reference.find(':') {
        Some(colon) if is_scheme(&reference[..colon]) => &reference[colon + 1..],
        _ => reference,
    };
    let Some(authority) = rest.strip_prefix("//") else {
        return "";
    };
    let end = authority
        .find(|c| matches!(c, '/' | '?' | '#'))
        .unwrap_or(authority.len());
    &authority[..end]
}

fn is_scheme(candidate: &str) -> bool {
    let mut chars = candidate.chars();
    chars.next().is_some_and(|c| c.is_ascii_alphabetic())
        && chars.all(|c| c.is_ascii_alphanumeric() || matches!(c, '+' | '-' | '.'))
}
