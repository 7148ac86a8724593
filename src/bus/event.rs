use std::fmt;

use serde::{Deserialize, Serialize};

use crate::util::time::unix_millis;

/// What an invalidation event addresses.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum EventType {
    Key,
    Tag,
    Pattern,
}

impl EventType {
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Key => "key",
            Self::Tag => "tag",
            Self::Pattern => "pattern",
        }
    }
}

impl fmt::Display for EventType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum Priority {
    High,
    Medium,
    Low,
}

impl Priority {
    pub fn as_str(self) -> &'static str {
        match self {
            Self::High => "HIGH",
            Self::Medium => "MEDIUM",
            Self::Low => "LOW",
        }
    }
}

/// A request to invalidate cached state in every region.
///
/// Immutable once published. The wire form is
/// `{"type","target","version"?,"timestamp","priority"}` with `timestamp` in
/// epoch milliseconds.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct InvalidationEvent {
    #[serde(rename = "type")]
    pub kind: EventType,
    pub target: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub version: Option<i64>,
    pub timestamp: i64,
    pub priority: Priority,
}

impl InvalidationEvent {
    pub fn new(kind: EventType, target: impl Into<String>, priority: Priority) -> Self {
        Self {
            kind,
            target: target.into(),
            version: None,
            timestamp: unix_millis(),
            priority,
        }
    }

    /// Invalidate a single cache key.
    pub fn key(target: impl Into<String>) -> Self {
        Self::new(EventType::Key, target, Priority::High)
    }

    pub fn tag(tag: impl Into<String>) -> Self {
        Self::new(EventType::Tag, tag, Priority::Medium)
    }

    pub fn pattern(pattern: impl Into<String>) -> Self {
        Self::new(EventType::Pattern, pattern, Priority::Low)
    }

    pub fn with_version(mut self, version: i64) -> Self {
        self.version = Some(version);
        self
    }

    pub fn with_priority(mut self, priority: Priority) -> Self {
        self.priority = priority;
        self
    }
}
