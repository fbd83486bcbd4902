//! Core identifier types for mail-service entities.
//!
//! These newtype wrappers keep provider identifiers for messages, labels and
//! filters from being mixed up with each other or with plain strings.

use serde::{Deserialize, Serialize};
use std::fmt;

/// Provider-assigned identifier of a single message.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct MessageId(pub String);

impl fmt::Display for MessageId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl From<String> for MessageId {
    fn from(s: String) -> Self {
        Self(s)
    }
}

impl From<&str> for MessageId {
    fn from(s: &str) -> Self {
        Self(s.to_owned())
    }
}

/// Identifier of a label, either a system label (`INBOX`, `TRASH`, ...) or a
/// user label created through the API.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct LabelId(pub String);

impl fmt::Display for LabelId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl From<String> for LabelId {
    fn from(s: String) -> Self {
        Self(s)
    }
}

impl From<&str> for LabelId {
    fn from(s: &str) -> Self {
        Self(s.to_owned())
    }
}

/// Identifier of a server-side mail filter.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct FilterId(pub String);

impl fmt::Display for FilterId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl From<String> for FilterId {
    fn from(s: String) -> Self {
        Self(s)
    }
}

impl From<&str> for FilterId {
    fn from(s: &str) -> Self {
        Self(s.to_owned())
    }
}

/// Well-known system label IDs.
pub mod system_labels {
    use super::LabelId;

    /// Returns the inbox label ID.
    pub fn inbox() -> LabelId {
        LabelId::from("INBOX")
    }

    /// Returns the unread marker label ID.
    pub fn unread() -> LabelId {
        LabelId::from("UNREAD")
    }

    /// Returns the trash label ID.
    pub fn trash() -> LabelId {
        LabelId::from("TRASH")
    }

    /// Returns the spam label ID.
    pub fn spam() -> LabelId {
        LabelId::from("SPAM")
    }
}
