//! Email address value object.

use serde::{Deserialize, Serialize};

/// A syntactically valid email address.
///
/// Only the shape is checked: one `@`, a non-empty local part, a
/// dotted domain and no whitespace. Deliverability is the verification job's
/// concern.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct Email(String);

impl Email {
    /// Parse and normalise an address (trimmed, lower-cased).
    ///
    /// The whole address is folded so uniqueness ignores case.
    pub fn parse(raw: &str) -> Result<Self, &'static str> {
        let raw = raw.trim();
        if raw.is_empty() {
            return Err("must not be empty");
        }
        if raw.chars().any(char::is_whitespace) {
            return Err("must not contain whitespace");
        }

        let (local, domain) = raw.split_once('@').ok_or("must contain '@'")?;
        if local.is_empty() || domain.contains('@') {
            return Err("must be a valid email address");
        }

        let labels: Vec<&str> = domain.split('.').collect();
        if labels.len() < 2 || labels.iter().any(|l| l.is_empty()) {
            return Err("must be a valid email address");
        }
        if labels
            .iter()
            .any(|l| l.starts_with('-') || l.ends_with('-') || !l.chars().all(|c| c.is_ascii_alphanumeric() || c == '-'))
        {
            return Err("must be a valid email address");
        }

        Ok(Self(raw.to_lowercase()))
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }

    pub fn into_string(self) -> String {
        self.0
    }
}

impl core::fmt::Display for Email {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        f.write_str(&self.0)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn accepts_ordinary_addresses() {
        let email = Email::parse("  Jane.Doe+tag@Example.COM ").unwrap();
        assert_eq!(email.as_str(), "jane.doe+tag@example.com");
    }

    #[test]
    fn case_variants_normalise_to_the_same_address() {
        assert_eq!(Email::parse("Ada@X.com"), Email::parse("ada@x.com"));
    }

    #[test]
    fn rejects_malformed_addresses() {
        for raw in ["", "plain", "@example.com", "a@b", "a@@b.com", "a b@c.com", "a@b..com", "a@-b.com"] {
            assert!(Email::parse(raw).is_err(), "{raw:?} should be rejected");
        }
    }
}
