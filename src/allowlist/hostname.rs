//! Normalized hostnames and the suffix chain used for policy lookup.

use std::fmt;

use tracing::warn;
use url::{Host, Url};

/// A lower-cased hostname without a trailing dot.
///
/// Used as the key for every per-session cache in the decision engine and
/// the matchers, so `Example.COM.` and `example.com` share one entry.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct Hostname(String);

impl Hostname {
    #[must_use]
    pub fn new(raw: &str) -> Self {
        Self(raw.trim_end_matches('.').to_ascii_lowercase())
    }

    #[must_use]
    pub fn as_str(&self) -> &str {
        &self.0
    }

    /// Drops the leftmost label, returning `None` when fewer than two labels would remain.
    #[must_use]
    pub fn parent(&self) -> Option<Self> {
        let (_, rest) = self.0.split_once('.')?;
        rest.contains('.').then(|| Self(rest.to_string()))
    }
}

impl fmt::Display for Hostname {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl AsRef<str> for Hostname {
    fn as_ref(&self) -> &str {
        &self.0
    }
}

/// Returns the hostname of `url` followed by its ancestor domains.
///
/// The chain runs most specific first: `a.b.example.com`, `b.example.com`,
/// `example.com`. Labels are dropped until fewer than two would remain, so a
/// bare TLD is never part of the chain. IP literals yield a single element.
/// A URL without a host yields an empty chain.
#[must_use]
pub fn hostname_chain(url: &Url) -> Vec<Hostname> {
    match url.host() {
        None => {
            warn!(url = %url, "URL has no hostname");
            Vec::new()
        }
        Some(Host::Ipv4(addr)) => vec![Hostname(addr.to_string())],
        Some(Host::Ipv6(addr)) => vec![Hostname(addr.to_string())],
        Some(Host::Domain(domain)) => {
            let mut chain = vec![Hostname::new(domain)];
            while let Some(parent) = chain.last().and_then(Hostname::parent) {
                chain.push(parent);
            }
            chain
        }
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use super::*;

    fn chain(raw: &str) -> Vec<String> {
        hostname_chain(&Url::parse(raw).unwrap())
            .into_iter()
            .map(|h| h.as_str().to_string())
            .collect()
    }

    #[test]
    fn test_chain_drops_labels_until_two_remain() {
        assert_eq!(
            chain("https://a.b.example.com/x"),
            vec!["a.b.example.com", "b.example.com", "example.com"]
        );
    }

    #[test]
    fn test_chain_for_registrable_domain_is_single() {
        assert_eq!(chain("https://example.com/"), vec!["example.com"]);
    }

    #[test]
    fn test_chain_single_label_host() {
        assert_eq!(chain("http://localhost:8080/"), vec!["localhost"]);
    }

    #[test]
    fn test_chain_ipv4_literal_is_not_split() {
        assert_eq!(chain("http://192.168.1.20/admin"), vec!["192.168.1.20"]);
    }

    #[test]
    fn test_chain_ipv6_literal_is_not_split() {
        assert_eq!(chain("http://[2001:db8::1]/"), vec!["2001:db8::1"]);
    }

    #[test]
    fn test_chain_without_host_is_empty() {
        assert!(chain("data:text/plain,hello").is_empty());
    }

    #[test]
    fn test_hostname_normalizes_case_and_trailing_dot() {
        assert_eq!(Hostname::new("Example.COM."), Hostname::new("example.com"));
        assert_eq!(Hostname::new("Example.COM.").as_str(), "example.com");
    }
}
