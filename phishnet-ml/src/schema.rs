use std::fmt;
use std::str::FromStr;

use serde::{Deserialize, Serialize};

pub const FEATURE_COUNT: usize = 12;

/// Machine names in model order. Derived from [`FeatureId::ALL`].
pub const FEATURE_NAMES: [&str; FEATURE_COUNT] = {
    let mut names = [""; FEATURE_COUNT];
    let mut index = 0;
    while index < FEATURE_COUNT {
        names[index] = FeatureId::ALL[index].name();
        index += 1;
    }
    names
};

/// Numeric encoding of [`FeatureValue::Unavailable`] at the model boundary.
pub const UNAVAILABLE_SENTINEL: f64 = -1.0;

/// Named position in the feature vector shared by extraction, training and
/// inference.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum FeatureId {
    UrlLength,
    NumDigits,
    NumSpecialChars,
    HasIpAddress,
    HasAtSymbol,
    HasDoubleSlash,
    DomainLength,
    IsSubdomain,
    DomainAge,
    NumExternalLinks,
    HasForm,
    NumIframes,
}

/// Sub-extraction that produces a feature.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum FeatureGroup {
    Lexical,
    Domain,
    Content,
}

impl FeatureId {
    /// Every feature, in model order. Position in this array is the column
    /// index of the feature in every vector and training matrix.
    pub const ALL: [FeatureId; FEATURE_COUNT] = [
        FeatureId::UrlLength,
        FeatureId::NumDigits,
        FeatureId::NumSpecialChars,
        FeatureId::HasIpAddress,
        FeatureId::HasAtSymbol,
        FeatureId::HasDoubleSlash,
        FeatureId::DomainLength,
        FeatureId::IsSubdomain,
        FeatureId::DomainAge,
        FeatureId::NumExternalLinks,
        FeatureId::HasForm,
        FeatureId::NumIframes,
    ];

    pub const fn index(self) -> usize {
        self as usize
    }

    pub const fn name(self) -> &'static str {
        match self {
            FeatureId::UrlLength => "url_length",
            FeatureId::NumDigits => "num_digits",
            FeatureId::NumSpecialChars => "num_special_chars",
            FeatureId::HasIpAddress => "has_ip_address",
            FeatureId::HasAtSymbol => "has_at_symbol",
            FeatureId::HasDoubleSlash => "has_double_slash",
            FeatureId::DomainLength => "domain_length",
            FeatureId::IsSubdomain => "is_subdomain",
            FeatureId::DomainAge => "domain_age",
            FeatureId::NumExternalLinks => "num_external_links",
            FeatureId::HasForm => "has_form",
            FeatureId::NumIframes => "num_iframes",
        }
    }

    /// Human-readable label used in prediction output.
    pub const fn label(self) -> &'static str {
        match self {
            FeatureId::UrlLength => "URL Length",
            FeatureId::NumDigits => "Number of Digits",
            FeatureId::NumSpecialChars => "Special Characters",
            FeatureId::HasIpAddress => "Has IP Address",
            FeatureId::HasAtSymbol => "Has @ Symbol",
            FeatureId::HasDoubleSlash => "Has Double Slash",
            FeatureId::DomainLength => "Domain Length",
            FeatureId::IsSubdomain => "Is Subdomain",
            FeatureId::DomainAge => "Domain Age",
            FeatureId::NumExternalLinks => "External Links",
            FeatureId::HasForm => "Has Form",
            FeatureId::NumIframes => "Number of iframes",
        }
    }

    pub const fn group(self) -> FeatureGroup {
        match self {
            FeatureId::UrlLength
            | FeatureId::NumDigits
            | FeatureId::NumSpecialChars
            | FeatureId::HasIpAddress
            | FeatureId::HasAtSymbol
            | FeatureId::HasDoubleSlash => FeatureGroup::Lexical,
            FeatureId::DomainLength | FeatureId::IsSubdomain | FeatureId::DomainAge => {
                FeatureGroup::Domain
            }
            FeatureId::NumExternalLinks | FeatureId::HasForm | FeatureId::NumIframes => {
                FeatureGroup::Content
            }
        }
    }
}

impl fmt::Display for FeatureId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

impl FromStr for FeatureId {
    type Err = String;

    /// Accepts either the machine name or the human-readable label.
    fn from_str(value: &str) -> Result<Self, Self::Err> {
        FeatureId::ALL
            .into_iter()
            .find(|id| id.name() == value || id.label().eq_ignore_ascii_case(value))
            .ok_or_else(|| format!("unknown feature `{value}`"))
    }
}

/// Value of a single feature. A signal that could not be computed is
/// `Unavailable`, never a magic number.
#[derive(Clone, Copy, Debug, PartialEq, Default)]
pub enum FeatureValue {
    Measured(f64),
    #[default]
    Unavailable,
}

impl FeatureValue {
    pub fn flag(present: bool) -> Self {
        FeatureValue::Measured(if present { 1.0 } else { 0.0 })
    }

    pub fn count(count: usize) -> Self {
        FeatureValue::Measured(count as f64)
    }

    pub fn is_available(self) -> bool {
        matches!(self, FeatureValue::Measured(_))
    }

    /// Number fed to the classifier; `Unavailable` becomes the sentinel.
    pub fn encode(self) -> f64 {
        match self {
            FeatureValue::Measured(value) => value,
            FeatureValue::Unavailable => UNAVAILABLE_SENTINEL,
        }
    }

    pub fn decode(value: f64) -> Self {
        if value == UNAVAILABLE_SENTINEL {
            FeatureValue::Unavailable
        } else {
            FeatureValue::Measured(value)
        }
    }
}

impl From<Option<f64>> for FeatureValue {
    fn from(value: Option<f64>) -> Self {
        value.map_or(FeatureValue::Unavailable, FeatureValue::Measured)
    }
}

/// The twelve features of one URL, in [`FeatureId::ALL`] order.
#[derive(Clone, Copy, Debug, PartialEq, Default)]
pub struct FeatureVector {
    values: [FeatureValue; FEATURE_COUNT],
}

impl FeatureVector {
    /// A vector in which no signal could be determined.
    pub fn unavailable() -> Self {
        Self::default()
    }

    /// Rebuilds a vector from model input, mapping the sentinel back to
    /// `Unavailable`. Returns the received length on mismatch.
    pub fn from_encoded(values: &[f64]) -> Result<Self, usize> {
        if values.len() != FEATURE_COUNT {
            return Err(values.len());
        }
        let mut vector = Self::default();
        for (slot, value) in vector.values.iter_mut().zip(values) {
            *slot = FeatureValue::decode(*value);
        }
        Ok(vector)
    }

    pub fn get(&self, id: FeatureId) -> FeatureValue {
        self.values[id.index()]
    }

    pub fn set(&mut self, id: FeatureId, value: FeatureValue) {
        self.values[id.index()] = value;
    }

    pub fn iter(&self) -> impl Iterator<Item = (FeatureId, FeatureValue)> + '_ {
        FeatureId::ALL.into_iter().zip(self.values.iter().copied())
    }

    pub fn encode(&self) -> [f64; FEATURE_COUNT] {
        self.values.map(FeatureValue::encode)
    }

    /// True when every signal was determined.
    pub fn is_complete(&self) -> bool {
        self.values.iter().all(|value| value.is_available())
    }

    pub fn unavailable_features(&self) -> Vec<FeatureId> {
        self.iter()
            .filter(|(_, value)| !value.is_available())
            .map(|(id, _)| id)
            .collect()
    }
}
