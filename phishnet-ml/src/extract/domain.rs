use log::debug;
use time::OffsetDateTime;
use url::{Host, Url};

use crate::schema::{FeatureId, FeatureValue, FeatureVector};
use crate::whois::WhoisError;

/// Source of domain registration dates (WHOIS or an equivalent registry).
pub trait RegistrationLookup: Send + Sync {
    /// Returns every creation date the registry reports for `domain`.
    fn creation_dates(&self, domain: &str) -> Result<Vec<OffsetDateTime>, WhoisError>;
}

/// Public-suffix-aware split of a URL host.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct DomainParts {
    /// Registrable domain, e.g. `example.co.uk`.
    pub registrable: String,
    /// Label left of the public suffix, e.g. `example`, in Unicode form for
    /// internationalised names.
    pub label: String,
    /// Labels left of the registrable domain, e.g. `www.mail`; empty if none.
    pub subdomain: String,
}

#[derive(Debug, thiserror::Error, PartialEq, Eq)]
pub enum DomainParseError {
    #[error("invalid URL: {0}")]
    InvalidUrl(#[from] url::ParseError),
    #[error("URL has no host")]
    MissingHost,
    #[error("host `{0}` is an IP literal")]
    IpHost(String),
    #[error("host `{0}` has no registrable domain under a known public suffix")]
    UnknownSuffix(String),
}

/// Splits the host of `url` into registrable domain and subdomain.
pub fn parse_domain(url: &str) -> Result<DomainParts, DomainParseError> {
    let parsed = Url::parse(url)?;
    let host = match parsed.host() {
        Some(Host::Domain(host)) => host.trim_end_matches('.').to_ascii_lowercase(),
        Some(Host::Ipv4(addr)) => return Err(DomainParseError::IpHost(addr.to_string())),
        Some(Host::Ipv6(addr)) => return Err(DomainParseError::IpHost(addr.to_string())),
        None => return Err(DomainParseError::MissingHost),
    };

    let unknown = || DomainParseError::UnknownSuffix(host.clone());
    let domain = psl::domain(host.as_bytes()).ok_or_else(unknown)?;
    let suffix = domain.suffix();
    if !suffix.is_known() {
        return Err(unknown());
    }
    let registrable = std::str::from_utf8(domain.as_bytes()).map_err(|_| unknown())?;
    let suffix = std::str::from_utf8(suffix.as_bytes()).map_err(|_| unknown())?;

    let label = registrable
        .strip_suffix(suffix)
        .and_then(|rest| rest.strip_suffix('.'))
        .ok_or_else(unknown)?;
    let subdomain = host
        .strip_suffix(registrable)
        .map(|rest| rest.trim_end_matches('.'))
        .unwrap_or_default();

    // The parser hands back punycode; count the label as the user sees it.
    let (label, _) = idna::domain_to_unicode(label);

    Ok(DomainParts {
        registrable: registrable.to_string(),
        label,
        subdomain: subdomain.to_string(),
    })
}

/// Fills domain length, subdomain flag and domain age.
///
/// A parse failure leaves all three unavailable; a lookup failure only
/// affects the age.
pub fn extract_into(
    url: &str,
    lookup: &dyn RegistrationLookup,
    now: OffsetDateTime,
    vector: &mut FeatureVector,
) {
    let parts = match parse_domain(url) {
        Ok(parts) => parts,
        Err(err) => {
            debug!(target: "phishnet_ml::extract", "domain features unavailable for {url}: {err}");
            return;
        }
    };

    vector.set(
        FeatureId::DomainLength,
        FeatureValue::count(parts.label.chars().count()),
    );
    vector.set(
        FeatureId::IsSubdomain,
        FeatureValue::flag(!parts.subdomain.is_empty()),
    );

    match lookup.creation_dates(&parts.registrable) {
        Ok(dates) => match domain_age_days(&dates, now) {
            Some(age) => vector.set(FeatureId::DomainAge, FeatureValue::Measured(age)),
            None => debug!(
                target: "phishnet_ml::extract",
                "no usable creation date on record for {}",
                parts.registrable
            ),
        },
        Err(err) => debug!(
            target: "phishnet_ml::extract",
            "registration lookup failed for {}: {err}",
            parts.registrable
        ),
    }
}

/// Whole days since the earliest creation date. A creation date later than
/// `now` yields no age.
pub fn domain_age_days(dates: &[OffsetDateTime], now: OffsetDateTime) -> Option<f64> {
    let earliest = dates.iter().min()?;
    (*earliest <= now).then(|| (now - *earliest).whole_days() as f64)
}
