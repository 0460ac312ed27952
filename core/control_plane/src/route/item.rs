//! Route entries
//!
//! An [`Item`] is one `CIDR<TAB>COMMENT` record. Items are only built from a
//! successfully parsed network, so every `Item` in a table is valid.

use std::time::{Duration, Instant};

use ipnet::IpNet;

use super::cidr::{format_cidr, overlaps, parse_cidr};
use super::RouteError;

// ============================================================================
// Persistent Item
// ============================================================================

/// A persistent route entry
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Item {
    /// Canonical CIDR string (network address, masked)
    cidr: String,
    /// Parsed network
    net: IpNet,
    /// Free-form comment saved alongside the CIDR
    comment: String,
}

impl Item {
    /// Build an item from a parsed network.
    ///
    /// The comment must fit on one route-file field: tabs and line breaks
    /// are rejected.
    pub fn new(net: IpNet, comment: impl Into<String>) -> Result<Self, RouteError> {
        let comment = comment.into();
        if comment.contains(['\t', '\n', '\r']) {
            return Err(RouteError::InvalidComment(comment));
        }

        let net = net.trunc();
        Ok(Item {
            cidr: net.to_string(),
            net,
            comment,
        })
    }

    /// Parse a CIDR string (bare addresses become host routes)
    pub fn parse(cidr: &str, comment: impl Into<String>) -> Result<Self, RouteError> {
        let net = parse_cidr(&format_cidr(cidr))?;
        Item::new(net, comment)
    }

    pub fn cidr(&self) -> &str {
        &self.cidr
    }

    pub fn net(&self) -> &IpNet {
        &self.net
    }

    pub fn comment(&self) -> &str {
        &self.comment
    }

    /// Whether `target` is contained by, contains, or equals this entry
    pub fn matches(&self, target: &IpNet) -> bool {
        overlaps(&self.net, target)
    }
}

impl std::fmt::Display for Item {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}\t{}", self.cidr, self.comment)
    }
}

// ============================================================================
// Ephemeral Item
// ============================================================================

/// A route entry removed automatically once `expires_at` passes
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct EphemeralItem {
    pub item: Item,
    pub expires_at: Instant,
}

impl EphemeralItem {
    /// Expire `ttl` from now
    pub fn new(item: Item, ttl: Duration) -> Self {
        Self::with_expiry(item, Instant::now() + ttl)
    }

    pub fn with_expiry(item: Item, expires_at: Instant) -> Self {
        EphemeralItem { item, expires_at }
    }

    pub fn cidr(&self) -> &str {
        self.item.cidr()
    }

    pub fn is_expired(&self, now: Instant) -> bool {
        now >= self.expires_at
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_canonicalises() {
        let item = Item::parse("10.1.2.3/16", "office").unwrap();
        assert_eq!(item.cidr(), "10.1.0.0/16");
        assert_eq!(item.comment(), "office");
        assert_eq!(item.to_string(), "10.1.0.0/16\toffice");
    }

    #[test]
    fn test_parse_bare_address() {
        let item = Item::parse("8.8.8.8", "").unwrap();
        assert_eq!(item.cidr(), "8.8.8.8/32");

        let item = Item::parse("2001:db8::1", "").unwrap();
        assert_eq!(item.cidr(), "2001:db8::1/128");
        assert!(!item.matches(&"2001:db8::2/128".parse().unwrap()));
    }

    #[test]
    fn test_parse_invalid() {
        assert!(matches!(
            Item::parse("10.0.0.0/33", ""),
            Err(RouteError::InvalidCidr { .. })
        ));
        assert!(Item::parse("", "").is_err());
    }

    #[test]
    fn test_comment_with_separators_rejected() {
        for comment in ["a\n0.0.0.0/0\tinjected", "tab\there", "cr\r"] {
            assert!(matches!(
                Item::parse("10.0.0.0/8", comment),
                Err(RouteError::InvalidComment(_))
            ));
        }
        // Other whitespace is kept as is
        assert_eq!(Item::parse("10.0.0.0/8", " corp ").unwrap().comment(), " corp ");
    }

    #[test]
    fn test_matches_containment_both_ways() {
        let item = Item::parse("10.0.0.0/8", "").unwrap();
        assert!(item.matches(&"10.2.0.0/16".parse().unwrap()));
        assert!(item.matches(&"0.0.0.0/0".parse().unwrap()));
        assert!(!item.matches(&"192.168.0.0/16".parse().unwrap()));
    }

    #[test]
    fn test_ephemeral_expiry() {
        let item = Item::parse("1.2.3.4", "").unwrap();
        let now = Instant::now();
        let e = EphemeralItem::with_expiry(item, now + Duration::from_secs(1));

        assert!(!e.is_expired(now));
        assert!(e.is_expired(now + Duration::from_secs(1)));
    }
}
