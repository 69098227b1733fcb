use std::fmt;

use url::Host;

/// A domain taken from the input table.
///
/// `raw` is kept exactly as written so result rows stay readable; `key` is
/// the identity used by the skip-set.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Candidate {
    raw: String,
    key: String,
    valid: bool,
}

impl Candidate {
    pub fn new(raw: impl Into<String>) -> Self {
        let raw = raw.into();
        let (key, valid) = match normalize(&raw) {
            Some(key) => (key, true),
            None => (raw.trim().to_lowercase(), false),
        };
        Self { raw, key, valid }
    }

    pub fn raw(&self) -> &str {
        &self.raw
    }

    pub fn key(&self) -> &str {
        &self.key
    }

    /// False when the host could not be IDNA-mapped. Such candidates are
    /// still recorded, as `unknown`.
    pub fn is_valid(&self) -> bool {
        self.valid
    }
}

impl fmt::Display for Candidate {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.raw)
    }
}

/// Normalize a domain to its ASCII-compatible (punycode, lower-case) form.
///
/// Accepts a bare host or something URL-shaped: a leading `http(s)://` and
/// anything after the host are dropped, a trailing root dot is removed and an
/// explicit port is kept. Returns `None` when the host is not a valid domain.
pub fn normalize(domain: &str) -> Option<String> {
    let mut s = domain.trim();
    for scheme in ["https://", "http://"] {
        if s
            .get(..scheme.len())
            .is_some_and(|p| p.eq_ignore_ascii_case(scheme))
        {
            s = &s[scheme.len()..];
            break;
        }
    }
    let s = s.split(['/', '?', '#']).next().unwrap_or("");

    let (host, port) = match s.rsplit_once(':') {
        Some((h, p)) if !p.is_empty() && p.bytes().all(|b| b.is_ascii_digit()) => (h, Some(p)),
        _ => (s, None),
    };
    let host = host.strip_suffix('.').unwrap_or(host);
    if host.is_empty() {
        return None;
    }

    let mut key = Host::parse(host).ok()?.to_string();
    if let Some(port) = port {
        key.push(':');
        key.push_str(port);
    }
    Some(key)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn unicode_and_punycode_share_a_key() {
        let a = Candidate::new("Bücher.Example");
        let b = Candidate::new("xn--bcher-kva.example");
        let c = Candidate::new("https://bücher.example/shop?x=1");
        assert_eq!(a.key(), "xn--bcher-kva.example");
        assert_eq!(a.key(), b.key());
        assert_eq!(a.key(), c.key());
        assert_eq!(a.raw(), "Bücher.Example");
    }

    #[test]
    fn strips_case_trailing_dot_and_whitespace() {
        assert_eq!(normalize("  Example.COM. ").as_deref(), Some("example.com"));
        assert_eq!(normalize("HTTP://www.Example.org/").as_deref(), Some("www.example.org"));
    }

    #[test]
    fn keeps_explicit_port() {
        assert_eq!(normalize("127.0.0.1:8080").as_deref(), Some("127.0.0.1:8080"));
        assert_eq!(normalize("LocalHost:3000/x").as_deref(), Some("localhost:3000"));
    }

    #[test]
    fn invalid_hosts_fall_back_to_lowercase_key() {
        assert_eq!(normalize(""), None);
        assert_eq!(normalize("https:///"), None);
        assert_eq!(normalize("exa mple.com"), None);

        let c = Candidate::new(" Exa Mple.com ");
        assert!(!c.is_valid());
        assert_eq!(c.key(), "exa mple.com");
    }
}
