use once_cell::sync::Lazy;
use regex::Regex;

use crate::schema::{FeatureId, FeatureValue, FeatureVector};

static IPV4_LITERAL: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"(?:\d{1,3}\.){3}\d{1,3}").expect("valid IPv4 pattern"));

/// `//` at or beyond this character position is a redirection trick rather
/// than the scheme separator.
const DOUBLE_SLASH_OFFSET: usize = 7;

/// Fills the string-only features. These never fail.
pub fn extract_into(url: &str, vector: &mut FeatureVector) {
    vector.set(FeatureId::UrlLength, FeatureValue::count(url.chars().count()));
    vector.set(
        FeatureId::NumDigits,
        FeatureValue::count(url.chars().filter(char::is_ascii_digit).count()),
    );
    vector.set(
        FeatureId::NumSpecialChars,
        FeatureValue::count(url.chars().filter(|c| !c.is_ascii_alphanumeric()).count()),
    );
    vector.set(
        FeatureId::HasIpAddress,
        FeatureValue::flag(IPV4_LITERAL.is_match(url)),
    );
    vector.set(FeatureId::HasAtSymbol, FeatureValue::flag(url.contains('@')));
    vector.set(
        FeatureId::HasDoubleSlash,
        FeatureValue::flag(has_late_double_slash(url)),
    );
}

fn has_late_double_slash(url: &str) -> bool {
    url.char_indices()
        .nth(DOUBLE_SLASH_OFFSET)
        .is_some_and(|(offset, _)| url[offset..].contains("//"))
}
