//! Core HTTP protocol types: method, version, status, and the header map.

use crate::errors::ProxyError;

// METHOD

/// HTTP request method.
///
/// The pipeline only forwards `GET`; every other method is rejected at the
/// header-line parse step (spec.md §4.3's capture grammar fixes the method
/// token to the literal `GET`).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Method {
    Get,
}

impl Method {
    #[inline]
    pub(crate) fn parse(token: &str) -> Result<Self, ProxyError> {
        match token {
            "GET" => Ok(Method::Get),
            other => Err(ProxyError::ParseError(format!(
                "unsupported method: {other}"
            ))),
        }
    }

    #[inline]
    pub(crate) fn as_str(&self) -> &'static str {
        match self {
            Method::Get => "GET",
        }
    }
}

// VERSION

/// HTTP version, kept as the literal token off the wire (`HTTP/1.1`,
/// `HTTP/1.0`) rather than a closed enum, since spec.md §3 calls this field
/// a "version literal" and the status-line grammar in §4.4 only requires it
/// to match `HTTP/digits.digits`, not one of a fixed set.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct Version(String);

impl Version {
    pub(crate) const HTTP_11: &'static str = "HTTP/1.1";

    #[inline]
    pub(crate) fn parse(token: &str) -> Result<Self, ProxyError> {
        let ok = token.strip_prefix("HTTP/").is_some_and(|rest| {
            let mut parts = rest.splitn(2, '.');
            let major = parts.next().unwrap_or_default();
            let minor = parts.next();
            !major.is_empty()
                && major.bytes().all(|b| b.is_ascii_digit())
                && minor.is_none_or(|m| !m.is_empty() && m.bytes().all(|b| b.is_ascii_digit()))
        });
        if ok {
            Ok(Version(token.to_string()))
        } else {
            Err(ProxyError::ParseError(format!(
                "malformed HTTP version: {token}"
            )))
        }
    }

    #[inline]
    pub(crate) fn as_str(&self) -> &str {
        &self.0
    }
}

impl Default for Version {
    fn default() -> Self {
        Version(Self::HTTP_11.to_string())
    }
}

impl std::fmt::Display for Version {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(&self.0)
    }
}

// HEADER MAP

/// Result of comparing a header's stored value against a candidate.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) enum Compare {
    Equal,
    NotEqual,
    Absent,
}

/// Insertion-ordered header map.
///
/// Lookups are case-sensitive on the header name (spec.md §3), matching the
/// hand-rolled vector-of-pairs the teacher uses for its own `HeaderMap`
/// (`crate::http::types::HeaderMap` in the teacher), generalized here from
/// borrowed `&'static [u8]` slices to owned `String`s because a forwarded
/// message outlives the connection it was read from.
#[derive(Debug, Clone, Default, PartialEq)]
pub(crate) struct HeaderMap {
    entries: Vec<(String, String)>,
}

impl HeaderMap {
    #[inline]
    pub(crate) fn new() -> Self {
        Self {
            entries: Vec::new(),
        }
    }

    #[inline]
    pub(crate) fn with_capacity(cap: usize) -> Self {
        Self {
            entries: Vec::with_capacity(cap),
        }
    }

    #[inline]
    pub(crate) fn get(&self, name: &str) -> Option<&str> {
        self.entries
            .iter()
            .find(|(k, _)| k == name)
            .map(|(_, v)| v.as_str())
    }

    /// Replaces the value of an existing entry, or appends a new one. Never
    /// produces a duplicate name.
    #[inline]
    pub(crate) fn set(&mut self, name: impl Into<String>, value: impl Into<String>) {
        let name = name.into();
        let value = value.into();
        match self.entries.iter_mut().find(|(k, _)| *k == name) {
            Some((_, v)) => *v = value,
            None => self.entries.push((name, value)),
        }
    }

    /// Removes an entry, shifting later entries down to preserve order.
    #[inline]
    pub(crate) fn remove(&mut self, name: &str) {
        self.entries.retain(|(k, _)| k != name);
    }

    #[inline]
    pub(crate) fn compare(&self, name: &str, value: &str) -> Compare {
        match self.get(name) {
            Some(v) if v == value => Compare::Equal,
            Some(_) => Compare::NotEqual,
            None => Compare::Absent,
        }
    }

    #[inline]
    pub(crate) fn iter(&self) -> impl Iterator<Item = (&str, &str)> {
        self.entries.iter().map(|(k, v)| (k.as_str(), v.as_str()))
    }
}
