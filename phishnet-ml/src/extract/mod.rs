//! URL → [`FeatureVector`] conversion shared by training and inference.
//!
//! Extraction is split into lexical, domain and content passes. Each pass is
//! fault-isolated: a failure leaves only its own features unavailable. The
//! top-level call never fails; if something unexpected escapes the passes the
//! whole vector is reported as unavailable.

pub mod content;
pub mod domain;
pub mod lexical;

use std::panic::{self, AssertUnwindSafe};
use std::time::Duration;

use log::{trace, warn};
use time::OffsetDateTime;

use crate::schema::FeatureVector;
use crate::whois::{WhoisClient, DEFAULT_WHOIS_SERVER, WHOIS_PORT};

pub use content::{FetchError, HttpFetcher, PageFetcher};
pub use domain::RegistrationLookup;

pub const DEFAULT_USER_AGENT: &str =
    "Mozilla/5.0 (Windows NT 10.0; Win64; x64) AppleWebKit/537.36";

#[derive(Clone, Debug)]
pub struct ExtractorSettings {
    /// Bound on the page fetch, connect through body.
    pub http_timeout: Duration,
    /// Bound on the whole registration lookup, referrals included.
    pub whois_timeout: Duration,
    pub user_agent: String,
    pub whois_server: String,
    pub whois_port: u16,
}

impl Default for ExtractorSettings {
    fn default() -> Self {
        Self {
            http_timeout: Duration::from_secs(5),
            whois_timeout: Duration::from_secs(10),
            user_agent: DEFAULT_USER_AGENT.to_string(),
            whois_server: DEFAULT_WHOIS_SERVER.to_string(),
            whois_port: WHOIS_PORT,
        }
    }
}

/// Computes the twelve URL features.
///
/// Holds no per-call state, so one instance can serve many threads.
pub struct UrlFeatureExtractor {
    fetcher: Box<dyn PageFetcher>,
    registry: Box<dyn RegistrationLookup>,
}

impl UrlFeatureExtractor {
    /// Extractor backed by live HTTP and WHOIS.
    pub fn new(settings: &ExtractorSettings) -> Result<Self, FetchError> {
        let fetcher = HttpFetcher::new(&settings.user_agent, settings.http_timeout)?;
        let registry = WhoisClient::new(settings.whois_server.clone(), settings.whois_timeout)
            .with_port(settings.whois_port);
        Ok(Self::with_backends(fetcher, registry))
    }

    /// Extractor with caller-supplied network backends.
    pub fn with_backends(
        fetcher: impl PageFetcher + 'static,
        registry: impl RegistrationLookup + 'static,
    ) -> Self {
        Self {
            fetcher: Box::new(fetcher),
            registry: Box::new(registry),
        }
    }

    /// Returns a complete vector for any input; unavailable signals are
    /// marked rather than reported as errors.
    pub fn extract(&self, url: &str) -> FeatureVector {
        self.extract_at(url, OffsetDateTime::now_utc())
    }

    /// Like [`extract`](Self::extract) with an explicit clock for domain age.
    pub fn extract_at(&self, url: &str, now: OffsetDateTime) -> FeatureVector {
        let outcome = panic::catch_unwind(AssertUnwindSafe(|| {
            let mut vector = FeatureVector::unavailable();
            lexical::extract_into(url, &mut vector);
            domain::extract_into(url, self.registry.as_ref(), now, &mut vector);
            content::extract_into(url, self.fetcher.as_ref(), &mut vector);
            vector
        }));

        match outcome {
            Ok(vector) => {
                trace!(
                    target: "phishnet_ml::extract",
                    "{url}: {:?}",
                    vector.encode()
                );
                vector
            }
            Err(_) => {
                warn!(
                    target: "phishnet_ml::extract",
                    "feature extraction aborted for {url}; reporting every feature as unavailable"
                );
                FeatureVector::unavailable()
            }
        }
    }
}

impl std::fmt::Debug for UrlFeatureExtractor {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("UrlFeatureExtractor").finish_non_exhaustive()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::schema::{FeatureId, FeatureValue, FEATURE_COUNT};
    use crate::whois::WhoisError;
    use time::macros::datetime;

    struct Page(&'static str);

    impl PageFetcher for Page {
        fn fetch(&self, _url: &str) -> Result<String, FetchError> {
            Ok(self.0.to_string())
        }
    }

    struct Registry;

    impl RegistrationLookup for Registry {
        fn creation_dates(&self, _domain: &str) -> Result<Vec<OffsetDateTime>, WhoisError> {
            Ok(vec![datetime!(2020-01-01 0:00 UTC)])
        }
    }

    struct Offline;

    impl PageFetcher for Offline {
        fn fetch(&self, url: &str) -> Result<String, FetchError> {
            Err(FetchError::Other(format!("{url}: offline")))
        }
    }

    impl RegistrationLookup for Offline {
        fn creation_dates(&self, domain: &str) -> Result<Vec<OffsetDateTime>, WhoisError> {
            Err(WhoisError::NoReferral(domain.to_string()))
        }
    }

    struct Exploding;

    impl PageFetcher for Exploding {
        fn fetch(&self, _url: &str) -> Result<String, FetchError> {
            panic!("parser bug");
        }
    }

    const NOW: OffsetDateTime = datetime!(2020-01-31 0:00 UTC);

    #[test]
    fn working_backends_yield_non_negative_features() {
        let extractor = UrlFeatureExtractor::with_backends(
            Page(r#"<a href="https://elsewhere.org">x</a><form></form>"#),
            Registry,
        );
        let vector = extractor.extract_at("https://www.example.com/login", NOW);
        assert!(vector.is_complete());
        assert!(vector.encode().iter().all(|value| *value >= 0.0));
        assert_eq!(vector.get(FeatureId::DomainAge), FeatureValue::Measured(30.0));
        assert_eq!(vector.get(FeatureId::NumExternalLinks), FeatureValue::Measured(1.0));
    }

    #[test]
    fn offline_extraction_keeps_lexical_and_parsed_domain_features() {
        let extractor = UrlFeatureExtractor::with_backends(Offline, Offline);
        let vector = extractor.extract_at("http://user@evil.com", NOW);
        assert_eq!(vector.encode().len(), FEATURE_COUNT);
        assert_eq!(vector.get(FeatureId::HasAtSymbol), FeatureValue::Measured(1.0));
        assert_eq!(vector.get(FeatureId::DomainLength), FeatureValue::Measured(4.0));
        assert_eq!(
            vector.unavailable_features(),
            vec![
                FeatureId::DomainAge,
                FeatureId::NumExternalLinks,
                FeatureId::HasForm,
                FeatureId::NumIframes
            ]
        );
    }

    #[test]
    fn garbage_input_still_yields_a_full_vector() {
        let extractor = UrlFeatureExtractor::with_backends(Offline, Offline);
        for url in ["", "not a url", "http://", "://::", "http://[::1]/"] {
            let vector = extractor.extract_at(url, NOW);
            assert_eq!(vector.encode().len(), FEATURE_COUNT);
            assert!(vector.get(FeatureId::UrlLength).is_available());
        }
    }

    #[test]
    fn panicking_backend_degrades_to_all_unavailable() {
        let extractor = UrlFeatureExtractor::with_backends(Exploding, Registry);
        let vector = extractor.extract_at("https://example.com", NOW);
        assert_eq!(vector, FeatureVector::unavailable());
    }
}
