use echolock_core::XOnlyPublicKey;
use serde::{Deserialize, Serialize};

/// A subscription filter: matches events by kind, author, `d`/`p`
/// tags, and a lower bound on `created_at`.
#[derive(Clone, Debug, Default, Serialize, Deserialize)]
pub struct Filter {
    pub kinds: Vec<u32>,
    pub authors: Vec<XOnlyPublicKey>,
    pub d_tag: Option<String>,
    pub p_tag: Option<XOnlyPublicKey>,
    pub since: Option<i64>,
    pub limit: Option<usize>,
}

impl Filter {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn kind(mut self, kind: u32) -> Self {
        self.kinds.push(kind);
        self
    }

    pub fn author(mut self, pubkey: XOnlyPublicKey) -> Self {
        self.authors.push(pubkey);
        self
    }

    pub fn d_tag(mut self, value: impl Into<String>) -> Self {
        self.d_tag = Some(value.into());
        self
    }

    pub fn p_tag(mut self, pubkey: XOnlyPublicKey) -> Self {
        self.p_tag = Some(pubkey);
        self
    }

    pub fn since(mut self, ts: i64) -> Self {
        self.since = Some(ts);
        self
    }

    /// Whether `event` satisfies this filter.
    pub fn matches(&self, event: &crate::event::Event) -> bool {
        if !self.kinds.is_empty() && !self.kinds.contains(&event.kind) {
            return false;
        }
        if !self.authors.is_empty() && !self.authors.contains(&event.pubkey) {
            return false;
        }
        if let Some(since) = self.since {
            if event.created_at < since {
                return false;
            }
        }
        if let Some(d) = &self.d_tag {
            if event.d_tag() != Some(d.as_str()) {
                return false;
            }
        }
        if let Some(p) = &self.p_tag {
            if !event.p_tags().iter().any(|t| *t == p.to_hex()) {
                return false;
            }
        }
        true
    }
}
