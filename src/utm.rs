//! UTM attribution parameters and their composite string key.

use serde::{Deserialize, Serialize};

/// Urchin Tracking Module parameters. Every field is independently optional.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct Utm {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub source: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub medium: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub campaign: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub term: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub content: Option<String>,
}

impl Utm {
    /// True when every field is missing or empty.
    pub fn is_empty(&self) -> bool {
        [
            &self.source,
            &self.medium,
            &self.campaign,
            &self.term,
            &self.content,
        ]
        .iter()
        .all(|f| f.as_deref().unwrap_or("").is_empty())
    }
}

fn segment(field: &Option<String>) -> &str {
    field.as_deref().unwrap_or("")
}

/// Deterministic composite key, `campaign-source-medium-term-content`.
/// Missing fields serialize as empty placeholders so the key always has five
/// positions. Returns `None` when there is nothing to key on.
///
/// Values containing `-` make the key ambiguous on the way back; see
/// [`parse_utm_key`].
pub fn utm_key(utm: &Utm) -> Option<String> {
    if utm.is_empty() {
        return None;
    }
    Some(format!(
        "{}-{}-{}-{}-{}",
        segment(&utm.campaign),
        segment(&utm.source),
        segment(&utm.medium),
        segment(&utm.term),
        segment(&utm.content),
    ))
}

/// Positional inverse of [`utm_key`]. Splits on `-`, so a field value that
/// itself contains a hyphen cannot be reconstructed faithfully; for keys
/// produced from hyphen-free values this is an exact round trip.
pub fn parse_utm_key(key: &str) -> Utm {
    let mut parts = key.split('-');
    let mut next = || {
        parts
            .next()
            .filter(|p| !p.is_empty())
            .map(|p| p.to_string())
    };
    let campaign = next();
    let source = next();
    let medium = next();
    let term = next();
    let content = next();
    Utm {
        source,
        medium,
        campaign,
        term,
        content,
    }
}

/// Legacy values serialized through loosely-typed layers sometimes carry the
/// literal strings `"false"`, `"null"` or `"undefined"`; treat those as
/// absent.
pub fn falsy_string(value: Option<String>) -> Option<String> {
    value.filter(|v| !matches!(v.as_str(), "false" | "null" | "undefined"))
}

#[cfg(test)]
mod tests {
    use super::*;

    fn full_utm() -> Utm {
        Utm {
            source: Some("twitter".into()),
            medium: Some("social".into()),
            campaign: Some("summer_sale".into()),
            term: Some("shoes".into()),
            content: Some("banner".into()),
        }
    }

    #[test]
    fn key_orders_fields_positionally() {
        assert_eq!(
            utm_key(&full_utm()).unwrap(),
            "summer_sale-twitter-social-shoes-banner"
        );
    }

    #[test]
    fn empty_utm_has_no_key() {
        assert_eq!(utm_key(&Utm::default()), None);
        let blank = Utm {
            source: Some(String::new()),
            ..Utm::default()
        };
        assert_eq!(utm_key(&blank), None);
    }

    #[test]
    fn round_trips_when_values_are_hyphen_free() {
        let utm = full_utm();
        let parsed = parse_utm_key(&utm_key(&utm).unwrap());
        assert_eq!(parsed, utm);

        let partial = Utm {
            source: Some("newsletter".into()),
            campaign: Some("winter_promo".into()),
            ..Utm::default()
        };
        let parsed = parse_utm_key(&utm_key(&partial).unwrap());
        assert_eq!(parsed, partial);
    }

    #[test]
    fn missing_positions_parse_as_none() {
        let parsed = parse_utm_key("camp--med--");
        assert_eq!(parsed.campaign.as_deref(), Some("camp"));
        assert_eq!(parsed.source, None);
        assert_eq!(parsed.medium.as_deref(), Some("med"));
        assert_eq!(parsed.term, None);
        assert_eq!(parsed.content, None);
    }

    #[test]
    fn falsy_strings_are_nulled() {
        assert_eq!(falsy_string(Some("undefined".into())), None);
        assert_eq!(falsy_string(Some("null".into())), None);
        assert_eq!(falsy_string(Some("false".into())), None);
        assert_eq!(
            falsy_string(Some("google".into())),
            Some("google".to_string())
        );
        assert_eq!(falsy_string(None), None);
    }
}
