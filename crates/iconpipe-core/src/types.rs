//! Shared types used across iconpipe crates.

use std::fmt;

use serde::{Deserialize, Serialize};

/// Numeric key of one item icon. Always positive.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(try_from = "u32", into = "u32")]
pub struct ItemId(u32);

impl ItemId {
    /// Wrap a raw identifier. Returns `None` for zero.
    pub fn new(raw: u32) -> Option<Self> {
        (raw > 0).then_some(Self(raw))
    }

    pub fn get(self) -> u32 {
        self.0
    }
}

impl fmt::Display for ItemId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        self.0.fmt(f)
    }
}

impl TryFrom<u32> for ItemId {
    type Error = String;

    fn try_from(raw: u32) -> Result<Self, Self::Error> {
        ItemId::new(raw).ok_or_else(|| "item id must be positive".to_string())
    }
}

impl From<ItemId> for u32 {
    fn from(id: ItemId) -> Self {
        id.0
    }
}

/// Result of one attempt to resolve an identifier to an icon URL.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "kind", content = "detail", rename_all = "snake_case")]
pub enum ResolutionOutcome {
    /// The service returned an icon; carries the absolute URL.
    Found(String),
    /// The service authoritatively has no icon for this identifier.
    NotFound,
    /// Timeout, network error, unexpected status or malformed body.
    Transient(String),
    /// The service rejected the call because the request budget is spent.
    QuotaExceeded,
    /// The caller lost interest before a result was delivered.
    Cancelled,
}

impl ResolutionOutcome {
    /// Short label for logs.
    pub fn label(&self) -> &'static str {
        match self {
            ResolutionOutcome::Found(_) => "found",
            ResolutionOutcome::NotFound => "not_found",
            ResolutionOutcome::Transient(_) => "transient",
            ResolutionOutcome::QuotaExceeded => "quota_exceeded",
            ResolutionOutcome::Cancelled => "cancelled",
        }
    }
}

/// An authoritative, permanently cached resolution.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub enum CacheEntry {
    Found(String),
    NotFound,
}

impl CacheEntry {
    /// Convert a cacheable outcome. Non-authoritative outcomes yield `None`.
    pub fn from_outcome(outcome: &ResolutionOutcome) -> Option<Self> {
        match outcome {
            ResolutionOutcome::Found(url) => Some(CacheEntry::Found(url.clone())),
            ResolutionOutcome::NotFound => Some(CacheEntry::NotFound),
            _ => None,
        }
    }

    pub fn into_outcome(self) -> ResolutionOutcome {
        match self {
            CacheEntry::Found(url) => ResolutionOutcome::Found(url),
            CacheEntry::NotFound => ResolutionOutcome::NotFound,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn item_id_rejects_zero() {
        assert!(ItemId::new(0).is_none());
        assert_eq!(ItemId::new(42).map(ItemId::get), Some(42));
    }

    #[test]
    fn item_id_serde_rejects_zero() {
        let id: ItemId = serde_json::from_str("500").unwrap();
        assert_eq!(id.get(), 500);
        assert!(serde_json::from_str::<ItemId>("0").is_err());
    }

    #[test]
    fn only_authoritative_outcomes_are_cacheable() {
        assert!(CacheEntry::from_outcome(&ResolutionOutcome::Found("u".into())).is_some());
        assert_eq!(
            CacheEntry::from_outcome(&ResolutionOutcome::NotFound),
            Some(CacheEntry::NotFound)
        );
        assert!(CacheEntry::from_outcome(&ResolutionOutcome::Transient("timeout".into())).is_none());
        assert!(CacheEntry::from_outcome(&ResolutionOutcome::Cancelled).is_none());
    }

    #[test]
    fn cache_entry_conversion() {
        let found = ResolutionOutcome::Found("https://cdn/i/1.png".into());
        let entry = CacheEntry::from_outcome(&found).unwrap();
        assert_eq!(entry.clone().into_outcome(), found);
        assert_eq!(CacheEntry::from_outcome(&ResolutionOutcome::QuotaExceeded), None);
    }

    #[test]
    fn outcome_serializes_tagged() {
        let json = serde_json::to_string(&ResolutionOutcome::Found("x".into())).unwrap();
        assert_eq!(json, r#"{"kind":"found","detail":"x"}"#);
        let json = serde_json::to_string(&ResolutionOutcome::NotFound).unwrap();
        assert_eq!(json, r#"{"kind":"not_found"}"#);
    }
}
