//! Proxy URL rewriting
//!
//! A supported target URL `U` is requested through the proxy as
//! `{origin}/{U}` with the full original URL, scheme included,
//! concatenated verbatim after a single slash. Stripping that exact
//! prefix recovers `U` unchanged, so rewrite and restore round-trip.
//!
//! Unsupported targets (malformed, local, internal, or the proxy
//! itself) pass through untouched; that is a normal outcome, never an
//! error.

use std::net::{Ipv4Addr, Ipv6Addr};
use tracing::debug;
use url::{Host, Url};

use crate::types::{ArchwayError, Result};

/// Rewrites target URLs into proxy form and back
#[derive(Debug, Clone)]
pub struct UrlRewriter {
    origin: String,
    origin_host: Option<String>,
}

impl UrlRewriter {
    /// Build a rewriter for a proxy origin like `https://proxy.example.com`
    pub fn new(origin: &str) -> Result<Self> {
        let trimmed = origin.trim_end_matches('/');
        let parsed = Url::parse(trimmed)
            .map_err(|e| ArchwayError::Config(format!("invalid proxy origin {trimmed:?}: {e}")))?;
        if !matches!(parsed.scheme(), "http" | "https") {
            return Err(ArchwayError::Config(format!(
                "proxy origin must be http(s), got {:?}",
                parsed.scheme()
            )));
        }
        Ok(Self {
            origin: trimmed.to_string(),
            origin_host: parsed.host_str().map(|h| h.to_ascii_lowercase()),
        })
    }

    pub fn origin(&self) -> &str {
        &self.origin
    }

    /// Whether a target URL is eligible for proxying
    ///
    /// Requires a well-formed absolute http(s) URL with a public,
    /// non-local hostname that is not the proxy origin itself.
    pub fn is_supported(&self, target: &str) -> bool {
        let Ok(parsed) = Url::parse(target) else {
            return false;
        };
        if !matches!(parsed.scheme(), "http" | "https") {
            return false;
        }
        let Some(host) = parsed.host() else {
            return false;
        };
        if host_is_internal(&host) {
            return false;
        }
        if let Some(origin_host) = &self.origin_host {
            if parsed
                .host_str()
                .map(|h| h.eq_ignore_ascii_case(origin_host))
                .unwrap_or(false)
            {
                return false;
            }
        }
        true
    }

    /// Rewrite a target into proxy form; unsupported targets come back
    /// unchanged
    pub fn rewrite(&self, target: &str) -> String {
        if self.is_supported(target) {
            format!("{}/{}", self.origin, target)
        } else {
            debug!(url = target, "Target not proxyable, passing through");
            target.to_string()
        }
    }

    /// Invert [`rewrite`](Self::rewrite): strip the proxy prefix and
    /// recover the original URL
    pub fn restore(&self, proxied: &str) -> Option<String> {
        proxied
            .strip_prefix(&format!("{}/", self.origin))
            .map(|original| original.to_string())
    }
}

/// Hosts that must never be routed through a remote proxy
fn host_is_internal(host: &Host<&str>) -> bool {
    match host {
        Host::Domain(domain) => {
            let domain = domain.to_ascii_lowercase();
            domain == "localhost"
                || domain.ends_with(".localhost")
                || domain.ends_with(".local")
                || domain.ends_with(".internal")
                || domain.ends_with(".lan")
                || domain.ends_with(".home.arpa")
                // Single-label names resolve only on the local network
                || !domain.contains('.')
        }
        Host::Ipv4(ip) => ipv4_is_internal(*ip),
        Host::Ipv6(ip) => ipv6_is_internal(*ip),
    }
}

fn ipv4_is_internal(ip: Ipv4Addr) -> bool {
    ip.is_loopback() || ip.is_private() || ip.is_link_local() || ip.is_unspecified()
}

fn ipv6_is_internal(ip: Ipv6Addr) -> bool {
    // fc00::/7 unique-local and fe80::/10 link-local, checked on the raw
    // segments to avoid unstable std helpers
    let first = ip.segments()[0];
    ip.is_loopback() || ip.is_unspecified() || (first & 0xfe00) == 0xfc00 || (first & 0xffc0) == 0xfe80
}
