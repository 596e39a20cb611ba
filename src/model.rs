use std::collections::HashMap;
use std::sync::OnceLock;

use chrono::{DateTime, Utc};
use regex::Regex;
use serde::{Deserialize, Serialize};

/// Link is the record stored for each go short link.
///
/// Serialized field names and RFC3339 timestamps are shared by the per-link
/// file documents and the snapshot interchange format.
#[derive(Clone, Debug, Deserialize, Eq, PartialEq, Serialize)]
#[serde(rename_all = "PascalCase")]
pub struct Link {
    pub short: String, // the user-provided "foo" part of "http://go/foo"
    pub long: String,  // the target URL or template pattern to expand
    pub created: DateTime<Utc>,
    pub last_edit: DateTime<Utc>,
    #[serde(default)]
    pub owner: String, // user@domain; empty means unowned
}

impl std::fmt::Display for Link {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "go/{} -> {}", self.short, self.long)?;
        if !self.owner.is_empty() {
            write!(f, " (owner: {})", self.owner)?;
        }
        Ok(())
    }
}

/// ClickStats maps a short name to the number of times it has been visited.
pub type ClickStats = HashMap<String, i64>;

/// Returns the normalized identity for a link short name: lowercased,
/// percent-escaped, dashes stripped. Two short names that normalize
/// identically refer to the same stored link.
pub fn normalized_id(short: &str) -> String {
    urlencoding::encode(&short.to_lowercase()).replace('-', "")
}

static RE_SHORT_NAME: OnceLock<Regex> = OnceLock::new();

/// Reports whether short is an acceptable link name: a word character
/// followed by word characters, dashes, and periods.
pub fn valid_short_name(short: &str) -> bool {
    let re = RE_SHORT_NAME.get_or_init(|| Regex::new(r"^\w[\w\-\.]*$").unwrap());
    re.is_match(short)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_normalized_id_simple() {
        assert_eq!(normalized_id("hello"), "hello");
    }

    #[test]
    fn test_normalized_id_lowercases() {
        assert_eq!(normalized_id("Meet"), "meet");
        assert_eq!(normalized_id("MEET"), "meet");
    }

    #[test]
    fn test_normalized_id_strips_dashes() {
        assert_eq!(normalized_id("foo-bar"), "foobar");
        assert_eq!(normalized_id("a-b-c"), "abc");
    }

    #[test]
    fn test_normalized_id_case_and_dash_variants_collide() {
        assert_eq!(normalized_id("Foo-Bar"), normalized_id("foobar"));
        assert_eq!(normalized_id("B-c"), normalized_id("bc"));
    }

    #[test]
    fn test_normalized_id_keeps_periods() {
        assert_eq!(normalized_id("Foo.Bar"), "foo.bar");
    }

    #[test]
    fn test_normalized_id_escapes() {
        assert_eq!(normalized_id("hello world"), "hello%20world");
        assert_eq!(normalized_id("a/b"), "a%2Fb");
    }

    #[test]
    fn test_normalized_id_empty() {
        assert_eq!(normalized_id(""), "");
    }

    #[test]
    fn test_valid_short_name() {
        assert!(valid_short_name("who"));
        assert!(valid_short_name("Foo.Bar"));
        assert!(valid_short_name("a-b-c"));
        assert!(valid_short_name("x1"));
        assert!(!valid_short_name(""));
        assert!(!valid_short_name("-leading-dash"));
        assert!(!valid_short_name(".leading-period"));
        assert!(!valid_short_name("has space"));
        assert!(!valid_short_name("slash/name"));
    }
}
