//! NIP-01 subscription filters.

use nostr::Event;
use serde::{Deserialize, Serialize};

/// REQ filter. Empty lists and unset bounds match everything.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct Filter {
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub kinds: Vec<u16>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub authors: Vec<String>,
    #[serde(rename = "#p", default, skip_serializing_if = "Vec::is_empty")]
    pub p_tags: Vec<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub since: Option<u64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub limit: Option<usize>,
}

impl Filter {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn kind(mut self, kind: u16) -> Self {
        self.kinds.push(kind);
        self
    }

    pub fn author(mut self, pubkey: impl Into<String>) -> Self {
        self.authors.push(pubkey.into());
        self
    }

    /// Match events carrying a `p` tag for `pubkey`.
    pub fn pubkey(mut self, pubkey: impl Into<String>) -> Self {
        self.p_tags.push(pubkey.into());
        self
    }

    pub fn since(mut self, timestamp: u64) -> Self {
        self.since = Some(timestamp);
        self
    }

    pub fn limit(mut self, limit: usize) -> Self {
        self.limit = Some(limit);
        self
    }

    /// Apply the filter to a live event. `limit` only bounds stored results, so it is ignored.
    pub fn matches(&self, event: &Event) -> bool {
        if !self.kinds.is_empty() && !self.kinds.contains(&event.kind) {
            return false;
        }
        if !self.authors.is_empty() && !self.authors.iter().any(|author| *author == event.pubkey) {
            return false;
        }
        if !self.p_tags.is_empty()
            && !event
                .p_tags()
                .any(|tagged| self.p_tags.iter().any(|wanted| wanted == tagged))
        {
            return false;
        }
        self.since.is_none_or(|since| event.created_at >= since)
    }
}
