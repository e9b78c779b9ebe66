//! Case-insensitive identifier names.
//!
//! Every symbol in the expression language (variables, functions, loop
//! variables, document properties) is keyed by a [`Name`]. Names compare,
//! hash and order ASCII-case-insensitively while preserving the spelling
//! they were created with.

use std::cmp::Ordering;
use std::fmt;
use std::hash::{Hash, Hasher};

use lazy_static::lazy_static;
use regex::Regex;
use serde::de::{Deserializer, Error as DeError};
use serde::ser::Serializer;
use serde::{Deserialize, Serialize};

use crate::error::{Error, ParseResult};

lazy_static! {
    /// Identifier validity pattern, applied case-insensitively.
    static ref NAME_PATTERN: Regex = Regex::new(r"^(?i)[a-z][a-z0-9]*$").unwrap();
}

/// A validated, case-insensitive identifier.
#[derive(Debug, Clone)]
pub struct Name {
    text: String,
}

impl Name {
    /// Create a name, rejecting text that does not match `[a-z][a-z0-9]*`
    /// (case-insensitively).
    pub fn new(text: impl Into<String>) -> ParseResult<Name> {
        let text = text.into();
        if NAME_PATTERN.is_match(&text) {
            Ok(Name { text })
        } else {
            Err(Error::syntax(format!("invalid identifier `{}`", text)))
        }
    }

    /// The spelling this name was created with.
    pub fn as_str(&self) -> &str {
        &self.text
    }

    /// Case-insensitive comparison against a raw string.
    pub fn matches(&self, other: &str) -> bool {
        self.text.eq_ignore_ascii_case(other)
    }
}

impl fmt::Display for Name {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.text)
    }
}

impl PartialEq for Name {
    fn eq(&self, other: &Self) -> bool {
        self.text.eq_ignore_ascii_case(&other.text)
    }
}

impl Eq for Name {}

impl Hash for Name {
    fn hash<H: Hasher>(&self, state: &mut H) {
        for b in self.text.bytes() {
            state.write_u8(b.to_ascii_lowercase());
        }
    }
}

impl PartialOrd for Name {
    fn partial_cmp(&self, other: &Self) -> Option<Ordering> {
        Some(self.cmp(other))
    }
}

impl Ord for Name {
    fn cmp(&self, other: &Self) -> Ordering {
        self.text
            .bytes()
            .map(|b| b.to_ascii_lowercase())
            .cmp(other.text.bytes().map(|b| b.to_ascii_lowercase()))
    }
}

impl Serialize for Name {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.serialize_str(&self.text)
    }
}

impl<'de> Deserialize<'de> for Name {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        let text = String::deserialize(deserializer)?;
        Name::new(text).map_err(D::Error::custom)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_valid_names() {
        assert!(Name::new("x").is_ok());
        assert!(Name::new("foo2").is_ok());
        assert!(Name::new("Width").is_ok());
    }

    #[test]
    fn test_invalid_names() {
        assert!(Name::new("").is_err());
        assert!(Name::new("2x").is_err());
        assert!(Name::new("foo_bar").is_err());
        assert!(Name::new("foo-bar").is_err());
        assert!(Name::new("a b").is_err());
    }

    #[test]
    fn test_case_insensitive_equality() {
        let a = Name::new("Width").unwrap();
        let b = Name::new("width").unwrap();
        assert_eq!(a, b);
        assert_eq!(a.as_str(), "Width");
    }

    #[test]
    fn test_case_insensitive_hash() {
        use std::collections::HashMap;
        let mut map = HashMap::new();
        map.insert(Name::new("Foo").unwrap(), 1);
        assert_eq!(map.get(&Name::new("FOO").unwrap()), Some(&1));
    }

    #[test]
    fn test_ordering() {
        let mut names = vec![
            Name::new("beta").unwrap(),
            Name::new("Alpha").unwrap(),
            Name::new("gamma").unwrap(),
        ];
        names.sort();
        assert_eq!(names[0].as_str(), "Alpha");
        assert_eq!(names[1].as_str(), "beta");
    }
}
