//! Absolute-form/origin-form request-line parsing, cacheability, cache-key
//! derivation, and the mandatory proxy header rewrites.
//!
//! Grounded on the teacher's `parse_method`/`parse_url`/`check_version`
//! pipeline shape in `src/http/request.rs` (generalized from zero-copy
//! `&'static` slices to owned `String`s) and on
//! `other_examples/…httproxy…build_target_url`/`is_hop_by_hop_header` for
//! the absolute-form-vs-`Host`-header precedence and the hop-by-hop header
//! set, narrowed to spec.md §4.3's exact list.

use crate::errors::ProxyError;
use crate::http::message::RawMessage;
use crate::http::types::{Compare, HeaderMap, Method, Version};
use crate::limits::Limits;

#[derive(Debug, Clone)]
pub(crate) struct Request {
    pub method: Method,
    pub scheme: Option<String>,
    pub host: Option<String>,
    pub port: Option<u16>,
    pub path: String,
    pub query: Option<String>,
    pub version: Version,
    pub headers: HeaderMap,
    pub body: Vec<u8>,
}

impl Request {
    /// Parses a `RawMessage` read off a client connection into a `Request`.
    pub(crate) fn from_raw(raw: RawMessage) -> Result<Self, ProxyError> {
        let line = raw.header_line.trim_end();
        let mut parts = line.splitn(3, ' ').filter(|s| !s.is_empty());
        let method_tok = parts
            .next()
            .ok_or_else(|| ProxyError::ParseError("missing method".into()))?;
        let target = parts
            .next()
            .ok_or_else(|| ProxyError::ParseError("missing request target".into()))?;
        let version_tok = parts
            .next()
            .ok_or_else(|| ProxyError::ParseError("missing HTTP version".into()))?;

        let method = Method::parse(method_tok)?;
        let version = Version::parse(version_tok)?;
        let (scheme, host, port, path, query) = parse_target(target);

        let mut req = Request {
            method,
            scheme,
            host,
            port,
            path,
            query,
            version,
            headers: raw.headers,
            body: raw.body,
        };
        req.apply_host_header_precedence();
        Ok(req)
    }

    /// When both the absolute-form URI and the `Host` header are present
    /// and disagree, the `Host` header wins (spec.md §9 Open Question,
    /// resolved for byte-compatibility with the source).
    fn apply_host_header_precedence(&mut self) {
        let Some(host_header) = self.headers.get("Host").map(str::to_string) else {
            return;
        };
        let (host, port) = match host_header.split_once(':') {
            Some((h, p)) => (h.to_string(), p.parse::<u16>().ok()),
            None => (host_header.clone(), None),
        };
        if let Some(existing) = &self.host {
            if existing != &host {
                tracing::warn!(uri_host = %existing, host_header = %host, "Host header overrides absolute-form URI host");
            }
        }
        self.host = Some(host);
        if port.is_some() {
            self.port = port;
        }
    }

    /// True iff the method is `GET` and host/path/version are all set
    /// (path always defaults to `/`, version is always set once parsed, so
    /// the only variable is whether a host could be determined).
    pub(crate) fn is_cacheable(&self, limits: &Limits) -> bool {
        if limits.honor_no_cache && self.headers.compare("Cache-Control", "no-cache") == Compare::Equal
        {
            return false;
        }
        matches!(self.method, Method::Get) && self.host.is_some()
    }

    /// Bare `host || path` concatenation (no separator, preserved for
    /// wire-format compatibility per spec.md §4.3); empty string signals
    /// "do not cache."
    pub(crate) fn cache_key(&self, limits: &Limits) -> String {
        if !self.is_cacheable(limits) {
            return String::new();
        }
        format!("{}{}", self.host.as_deref().unwrap_or_default(), self.path)
    }

    /// Port to connect to at origin: explicit port, else 80.
    pub(crate) fn origin_port(&self) -> u16 {
        self.port.unwrap_or(80)
    }

    /// Applies the mandatory proxy rewrites before forwarding upstream.
    pub(crate) fn rewrite_for_upstream(&mut self, client_ip: &str, proxy_ident: &str) {
        self.headers.set("Connection", "close");
        self.headers.set("Forwarded", client_ip);
        self.headers.set("Via", format!("1.1 {proxy_ident}"));
        self.headers.remove("Proxy-Connection");
        self.headers.remove("Proxy-Authorization");
        self.headers.remove("Proxy-Authenticate");

        let host = self.host.as_deref().unwrap_or_default();
        let host_header = match self.port {
            Some(port) if port != 80 => format!("{host}:{port}"),
            _ => host.to_string(),
        };
        self.headers.set("Host", host_header);
    }

    /// Rebuilds the wire target (`path[?query]`) and header line to send
    /// upstream, using origin-form (absolute-form is only needed when
    /// talking to a further proxy, which this system never does).
    pub(crate) fn header_line(&self) -> String {
        let target = match &self.query {
            Some(q) => format!("{}?{q}", self.path),
            None => self.path.clone(),
        };
        format!("{} {} {}", self.method.as_str(), target, self.version)
    }
}

/// Splits a request-target into `(scheme, host, port, path, query)`.
///
/// Grammar (spec.md §4.3):
/// `(scheme "://")? ([^/:?]+)? (":" port)? path ("?" query)?`
fn parse_target(target: &str) -> (Option<String>, Option<String>, Option<u16>, String, Option<String>) {
    let mut rest = target;
    let mut scheme = None;

    if let Some(pos) = rest.find("://") {
        let candidate = &rest[..pos];
        if !candidate.is_empty() && (candidate.eq_ignore_ascii_case("http") || candidate.eq_ignore_ascii_case("https"))
        {
            scheme = Some(candidate.to_ascii_lowercase());
            rest = &rest[pos + 3..];
        }
    }

    let host_end = rest.find(['/', ':', '?']).unwrap_or(rest.len());
    let (host_part, remainder) = rest.split_at(host_end);
    let host = if host_part.is_empty() {
        None
    } else {
        Some(host_part.to_string())
    };
    rest = remainder;

    let mut port = None;
    if let Some(stripped) = rest.strip_prefix(':') {
        let digits_end = stripped.find(['/', '?']).unwrap_or(stripped.len());
        let (digits, remainder) = stripped.split_at(digits_end);
        port = digits.parse::<u16>().ok();
        rest = remainder;
    }

    let query_start = rest.find('?');
    let (path_part, query) = match query_start {
        Some(pos) => (&rest[..pos], Some(rest[pos + 1..].to_string())),
        None => (rest, None),
    };
    let path = if path_part.is_empty() {
        "/".to_string()
    } else {
        path_part.to_string()
    };

    (scheme, host, port, path, query)
}
