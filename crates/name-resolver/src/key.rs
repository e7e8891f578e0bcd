use std::fmt;
use std::str::FromStr;
use std::sync::LazyLock;

use regex::Regex;
use serde::{Deserialize, Deserializer, Serialize, Serializer};

static RE_CHANNEL_ID: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"^UC[A-Za-z0-9_-]{20,}$").unwrap());

const HANDLE_PREFIX: &str = "h:";
const CHANNEL_PREFIX: &str = "cid:";

/// Canonical identifier a display name is resolved for.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub enum ResolveKey {
    /// `@name` style public handle, marker included.
    Handle(String),
    /// `UC…` channel id.
    ChannelId(String),
}

impl ResolveKey {
    /// Build a handle key from visible or link-derived text.
    ///
    /// Only the first whitespace-delimited token counts, and it must start
    /// with `@` and carry at least one character after it.
    pub fn handle(text: &str) -> Option<Self> {
        let token = text.split_whitespace().next()?;
        if token.starts_with('@') && token.chars().count() >= 2 {
            Some(Self::Handle(token.to_string()))
        } else {
            None
        }
    }

    pub fn channel_id(id: &str) -> Option<Self> {
        let id = id.trim();
        if RE_CHANNEL_ID.is_match(id) {
            Some(Self::ChannelId(id.to_string()))
        } else {
            None
        }
    }

    /// The raw identifier without the kind prefix.
    pub fn as_str(&self) -> &str {
        match self {
            Self::Handle(h) => h,
            Self::ChannelId(c) => c,
        }
    }
}

impl fmt::Display for ResolveKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Handle(h) => write!(f, "{HANDLE_PREFIX}{h}"),
            Self::ChannelId(c) => write!(f, "{CHANNEL_PREFIX}{c}"),
        }
    }
}

#[derive(Debug, thiserror::Error)]
#[error("not a resolve key: {0}")]
pub struct InvalidKey(String);

impl FromStr for ResolveKey {
    type Err = InvalidKey;

    /// Accepts the prefixed cache form (`h:@x`, `cid:UC…`) as well as a
    /// bare handle or channel id.
    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let parsed = if let Some(rest) = s.strip_prefix(HANDLE_PREFIX) {
            Self::handle(rest)
        } else if let Some(rest) = s.strip_prefix(CHANNEL_PREFIX) {
            Self::channel_id(rest)
        } else {
            Self::handle(s).or_else(|| Self::channel_id(s))
        };
        parsed.ok_or_else(|| InvalidKey(s.to_string()))
    }
}

impl Serialize for ResolveKey {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.collect_str(self)
    }
}

impl<'de> Deserialize<'de> for ResolveKey {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        let s = String::deserialize(deserializer)?;
        s.parse().map_err(serde::de::Error::custom)
    }
}
