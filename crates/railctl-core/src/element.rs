//! Track element identifiers.
//!
//! An element id is a one-letter namespace prefix followed by a decimal
//! suffix: `B001` is a block, `W01` a switch (turnout). Layout sections use
//! disjoint numeric ranges, so ids are unique across the whole layout.

use crate::error::{ProtocolError, ProtocolResult};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;

/// Kind of track element, derived from the id prefix.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ElementKind {
    /// Power/occupancy segment, active or inactive.
    Block,
    /// Two-position turnout, straight or curved.
    Switch,
}

impl ElementKind {
    /// Namespace prefix used on the wire.
    pub fn prefix(&self) -> char {
        match self {
            Self::Block => 'B',
            Self::Switch => 'W',
        }
    }

    /// Resolve a namespace prefix.
    pub fn from_prefix(prefix: char) -> Option<Self> {
        match prefix {
            'B' => Some(Self::Block),
            'W' => Some(Self::Switch),
            _ => None,
        }
    }
}

impl fmt::Display for ElementKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Block => write!(f, "block"),
            Self::Switch => write!(f, "switch"),
        }
    }
}

/// Validated element identifier (e.g. `B101`, `W005`).
///
/// The suffix is kept verbatim: `W01` and `W001` are different elements.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(try_from = "String", into = "String")]
pub struct ElementId(String);

impl ElementId {
    /// Parse and validate an element id.
    pub fn parse(raw: &str) -> ProtocolResult<Self> {
        let mut chars = raw.chars();
        let prefix = chars.next().ok_or_else(|| ProtocolError::MalformedCommand {
            raw: raw.to_string(),
            reason: "empty element id",
        })?;

        if ElementKind::from_prefix(prefix).is_none() {
            return Err(ProtocolError::UnknownElementNamespace {
                prefix,
                raw: raw.to_string(),
            });
        }

        let suffix = chars.as_str();
        if suffix.is_empty() {
            return Err(ProtocolError::MalformedCommand {
                raw: raw.to_string(),
                reason: "missing numeric suffix",
            });
        }
        if !suffix.bytes().all(|b| b.is_ascii_digit()) {
            return Err(ProtocolError::MalformedCommand {
                raw: raw.to_string(),
                reason: "non-numeric suffix",
            });
        }

        Ok(Self(raw.to_string()))
    }

    /// Element kind. Infallible after validation.
    pub fn kind(&self) -> ElementKind {
        match self.0.as_bytes().first() {
            Some(b'W') => ElementKind::Switch,
            _ => ElementKind::Block,
        }
    }

    pub fn is_block(&self) -> bool {
        self.kind() == ElementKind::Block
    }

    pub fn is_switch(&self) -> bool {
        self.kind() == ElementKind::Switch
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for ElementId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl FromStr for ElementId {
    type Err = ProtocolError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Self::parse(s)
    }
}

impl TryFrom<String> for ElementId {
    type Error = ProtocolError;

    fn try_from(value: String) -> Result<Self, Self::Error> {
        Self::parse(&value)
    }
}

impl From<ElementId> for String {
    fn from(id: ElementId) -> Self {
        id.0
    }
}

impl AsRef<str> for ElementId {
    fn as_ref(&self) -> &str {
        &self.0
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_block_and_switch() {
        let block = ElementId::parse("B101").unwrap();
        assert_eq!(block.kind(), ElementKind::Block);
        assert!(block.is_block());

        let switch = ElementId::parse("W05").unwrap();
        assert_eq!(switch.kind(), ElementKind::Switch);
        assert!(switch.is_switch());
    }

    #[test]
    fn test_suffix_width_is_significant() {
        let short = ElementId::parse("W01").unwrap();
        let long = ElementId::parse("W001").unwrap();
        assert_ne!(short, long);
    }

    #[test]
    fn test_unknown_namespace() {
        let err = ElementId::parse("X001").unwrap_err();
        assert!(matches!(
            err,
            ProtocolError::UnknownElementNamespace { prefix: 'X', .. }
        ));
    }

    #[test]
    fn test_lowercase_prefix_is_unknown() {
        assert!(matches!(
            ElementId::parse("b001"),
            Err(ProtocolError::UnknownElementNamespace { .. })
        ));
    }

    #[test]
    fn test_malformed_ids() {
        assert!(matches!(
            ElementId::parse(""),
            Err(ProtocolError::MalformedCommand { .. })
        ));
        assert!(matches!(
            ElementId::parse("B"),
            Err(ProtocolError::MalformedCommand { .. })
        ));
        assert!(matches!(
            ElementId::parse("B0A1"),
            Err(ProtocolError::MalformedCommand { .. })
        ));
    }

    #[test]
    fn test_serde_validates() {
        let id: ElementId = serde_json::from_str("\"B007\"").unwrap();
        assert_eq!(id.as_str(), "B007");
        assert!(serde_json::from_str::<ElementId>("\"Q007\"").is_err());
    }

    #[test]
    fn test_ordering_is_lexicographic() {
        let mut ids = vec![
            ElementId::parse("B101").unwrap(),
            ElementId::parse("B002").unwrap(),
            ElementId::parse("B001").unwrap(),
        ];
        ids.sort();
        let names: Vec<&str> = ids.iter().map(ElementId::as_str).collect();
        assert_eq!(names, vec!["B001", "B002", "B101"]);
    }
}
