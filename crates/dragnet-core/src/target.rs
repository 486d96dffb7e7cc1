//! Target parsing, expansion and batching.
//!
//! A scan request carries a multi-line target string mixing URLs, CIDR
//! blocks, IP ranges, `host:port` pairs, bare IPs and domains. This module
//! classifies each line, expands it to concrete hosts, deduplicates the
//! result preserving insertion order, and chunks it into newline-joined
//! batches for sub-task configs.
//!
//! Parsing is total: a line that fails to parse is kept verbatim and treated
//! as a bare host. Lines that are empty after trimming or start with `#` are
//! skipped.

use std::collections::HashSet;
use std::net::{IpAddr, Ipv4Addr};
use std::str::FromStr;

use ipnet::IpNet;

/// Upper bound on addresses expanded from a single CIDR or range line.
/// A block larger than this is kept as a raw host instead of enumerated.
const MAX_EXPANSION: usize = 65_536;

/// Classification of a single target line.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TargetKind {
    Ipv4,
    Ipv6,
    Cidr,
    Range,
    Domain,
    Url,
}

/// One parsed target line.
#[derive(Debug, Clone)]
pub struct Target {
    /// Original input line, trimmed.
    pub raw: String,
    pub kind: TargetKind,
    /// Host (IP or domain). Empty when `ips` carries the expansion.
    pub host: String,
    pub port: Option<u16>,
    /// Expanded address list for CIDR and range targets.
    pub ips: Vec<String>,
    /// `http` or `https` for URL targets.
    pub scheme: Option<String>,
}

impl Target {
    fn bare(raw: &str, host: &str) -> Self {
        Target {
            raw: raw.to_string(),
            kind: detect_host_kind(host),
            host: host.to_string(),
            port: None,
            ips: Vec::new(),
            scheme: None,
        }
    }

    /// Expand this target to its concrete host list.
    ///
    /// CIDR/range targets yield their address list; everything else yields a
    /// single `host` or `host:port` entry.
    pub fn expand(&self) -> Vec<String> {
        if !self.ips.is_empty() {
            return self.ips.clone();
        }
        if self.host.is_empty() {
            return Vec::new();
        }
        match self.port {
            Some(port) => vec![format_authority(&self.host, port)],
            None => vec![self.host.clone()],
        }
    }
}

/// Render a `host:port` authority, bracketing IPv6 hosts.
pub fn format_authority(host: &str, port: u16) -> String {
    if host.contains(':') {
        format!("[{host}]:{port}")
    } else {
        format!("{host}:{port}")
    }
}

/// Parser for heterogeneous scan-target lines.
#[derive(Debug, Default)]
pub struct TargetParser;

impl TargetParser {
    pub fn new() -> Self {
        TargetParser
    }

    /// Parse a single line. Returns `None` for blank lines and comments.
    pub fn parse(&self, raw: &str) -> Option<Target> {
        let raw = raw.trim();
        if raw.is_empty() || raw.starts_with('#') {
            return None;
        }

        if raw.starts_with("http://") || raw.starts_with("https://") {
            return Some(self.parse_url(raw));
        }

        if raw.contains('/') {
            return Some(self.parse_cidr(raw));
        }

        if raw.contains('-') && looks_like_ip_range(raw) {
            return Some(self.parse_range(raw));
        }

        // A line that is wholly an IP literal is a bare target even when it
        // contains colons (IPv6).
        if let Ok(ip) = IpAddr::from_str(raw) {
            let mut t = Target::bare(raw, raw);
            t.kind = if ip.is_ipv4() {
                TargetKind::Ipv4
            } else {
                TargetKind::Ipv6
            };
            return Some(t);
        }

        if let Some((host, port)) = split_host_port(raw) {
            let mut t = Target::bare(raw, &host);
            t.port = Some(port);
            return Some(t);
        }

        Some(Target::bare(raw, raw))
    }

    /// Parse every line of a multi-line target string.
    pub fn parse_multiple(&self, input: &str) -> Vec<Target> {
        input.lines().filter_map(|line| self.parse(line)).collect()
    }

    /// Expand all lines into a flat host list, deduplicated across lines
    /// with insertion order preserved.
    pub fn expand_all(&self, input: &str) -> Vec<String> {
        let mut seen = HashSet::new();
        let mut out = Vec::new();
        for target in self.parse_multiple(input) {
            for host in target.expand() {
                if seen.insert(host.clone()) {
                    out.push(host);
                }
            }
        }
        out
    }

    fn parse_url(&self, raw: &str) -> Target {
        let (scheme, rest) = match raw.strip_prefix("https://") {
            Some(rest) => ("https", rest),
            None => ("http", raw.trim_start_matches("http://")),
        };

        // Drop the path component.
        let authority = match rest.find('/') {
            Some(idx) if idx > 0 => &rest[..idx],
            _ => rest,
        };

        let (host, port) = match split_host_port(authority) {
            Some((host, port)) => (host, port),
            None => {
                let default = if scheme == "https" { 443 } else { 80 };
                (authority.to_string(), default)
            }
        };

        Target {
            raw: raw.to_string(),
            kind: TargetKind::Url,
            host,
            port: Some(port),
            ips: Vec::new(),
            scheme: Some(scheme.to_string()),
        }
    }

    fn parse_cidr(&self, raw: &str) -> Target {
        let net = match IpNet::from_str(raw) {
            Ok(net) => net,
            Err(_) => return Target::bare(raw, raw),
        };

        if block_size(&net) > MAX_EXPANSION {
            return Target::bare(raw, raw);
        }

        // `hosts()` skips the network and broadcast addresses for IPv4
        // prefixes shorter than /31, which is exactly the drop rule here.
        let ips: Vec<String> = net.hosts().map(|ip| ip.to_string()).collect();

        Target {
            raw: raw.to_string(),
            kind: TargetKind::Cidr,
            host: String::new(),
            port: None,
            ips,
            scheme: None,
        }
    }

    fn parse_range(&self, raw: &str) -> Target {
        let Some((start_str, end_str)) = raw.split_once('-') else {
            return Target::bare(raw, raw);
        };
        let start_str = start_str.trim();
        let end_str = end_str.trim();

        let Ok(start) = Ipv4Addr::from_str(start_str) else {
            return Target::bare(raw, raw);
        };

        // Either a full end address (10.0.0.1-10.0.0.20) or just the final
        // octet (10.0.0.1-20).
        let end = match Ipv4Addr::from_str(end_str) {
            Ok(end) => end,
            Err(_) => {
                let Ok(last) = end_str.parse::<u8>() else {
                    return Target::bare(raw, raw);
                };
                let o = start.octets();
                Ipv4Addr::new(o[0], o[1], o[2], last)
            }
        };

        let start_n = u32::from(start);
        let end_n = u32::from(end);
        if end_n < start_n || (end_n - start_n) as usize + 1 > MAX_EXPANSION {
            return Target::bare(raw, raw);
        }

        let ips = (start_n..=end_n)
            .map(|n| Ipv4Addr::from(n).to_string())
            .collect();

        Target {
            raw: raw.to_string(),
            kind: TargetKind::Range,
            host: String::new(),
            port: None,
            ips,
            scheme: None,
        }
    }
}

/// Splits targets into newline-joined batches of at most `batch_size` hosts.
#[derive(Debug, Clone, Copy)]
pub struct TargetSplitter {
    batch_size: usize,
}

impl TargetSplitter {
    /// Default hosts-per-batch when a request does not override it.
    pub const DEFAULT_BATCH_SIZE: usize = 50;

    pub fn new(batch_size: usize) -> Self {
        let batch_size = if batch_size == 0 {
            Self::DEFAULT_BATCH_SIZE
        } else {
            batch_size
        };
        TargetSplitter { batch_size }
    }

    pub fn batch_size(&self) -> usize {
        self.batch_size
    }

    /// Expand, dedup and chunk a multi-line target string. Every batch holds
    /// at most `batch_size` hosts; only the final batch may be smaller.
    pub fn split(&self, input: &str) -> Vec<String> {
        let hosts = TargetParser::new().expand_all(input);
        hosts
            .chunks(self.batch_size)
            .map(|chunk| chunk.join("\n"))
            .collect()
    }
}

impl Default for TargetSplitter {
    fn default() -> Self {
        TargetSplitter::new(Self::DEFAULT_BATCH_SIZE)
    }
}

fn block_size(net: &IpNet) -> usize {
    let free_bits = u32::from(net.max_prefix_len() - net.prefix_len());
    if free_bits >= usize::BITS {
        usize::MAX
    } else {
        1usize << free_bits
    }
}

fn detect_host_kind(host: &str) -> TargetKind {
    match IpAddr::from_str(host) {
        Ok(IpAddr::V4(_)) => TargetKind::Ipv4,
        Ok(IpAddr::V6(_)) => TargetKind::Ipv6,
        Err(_) => TargetKind::Domain,
    }
}

/// Parse `host:port`, including the bracketed IPv6 form `[addr]:port`.
fn split_host_port(raw: &str) -> Option<(String, u16)> {
    if let Some(rest) = raw.strip_prefix('[') {
        let (host, port_str) = rest.split_once("]:")?;
        let port = port_str.parse().ok()?;
        if host.is_empty() {
            return None;
        }
        return Some((host.to_string(), port));
    }

    let (host, port_str) = raw.rsplit_once(':')?;
    // A second colon means an unbracketed IPv6 literal, not host:port.
    if host.is_empty() || host.contains(':') {
        return None;
    }
    let port = port_str.parse().ok()?;
    Some((host.to_string(), port))
}

/// First part parses as an IPv4 address, so `a-b` is a range rather than a
/// hyphenated domain.
fn looks_like_ip_range(raw: &str) -> bool {
    match raw.split_once('-') {
        Some((first, _)) => Ipv4Addr::from_str(first.trim()).is_ok(),
        None => false,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn comments_and_blanks_are_skipped() {
        let parser = TargetParser::new();
        assert!(parser.parse("").is_none());
        assert!(parser.parse("   ").is_none());
        assert!(parser.parse("# 10.0.0.1").is_none());
    }

    #[test]
    fn classifies_bare_hosts() {
        let parser = TargetParser::new();
        assert_eq!(parser.parse("10.0.0.1").unwrap().kind, TargetKind::Ipv4);
        assert_eq!(parser.parse("::1").unwrap().kind, TargetKind::Ipv6);
        assert_eq!(
            parser.parse("example.com").unwrap().kind,
            TargetKind::Domain
        );
    }

    #[test]
    fn host_port_forms() {
        let parser = TargetParser::new();

        let t = parser.parse("example.com:8443").unwrap();
        assert_eq!(t.host, "example.com");
        assert_eq!(t.port, Some(8443));
        assert_eq!(t.expand(), vec!["example.com:8443"]);

        let t = parser.parse("[::1]:8080").unwrap();
        assert_eq!(t.host, "::1");
        assert_eq!(t.port, Some(8080));
        assert_eq!(t.expand(), vec!["[::1]:8080"]);
    }

    #[test]
    fn url_extracts_host_and_defaults_port_by_scheme() {
        let parser = TargetParser::new();

        let t = parser.parse("https://example.com/login").unwrap();
        assert_eq!(t.kind, TargetKind::Url);
        assert_eq!(t.scheme.as_deref(), Some("https"));
        assert_eq!(t.expand(), vec!["example.com:443"]);

        let t = parser.parse("http://example.com:8080/x/y").unwrap();
        assert_eq!(t.expand(), vec!["example.com:8080"]);

        let t = parser.parse("http://example.com").unwrap();
        assert_eq!(t.expand(), vec!["example.com:80"]);
    }

    #[test]
    fn cidr_drops_network_and_broadcast() {
        let parser = TargetParser::new();
        let t = parser.parse("10.0.0.0/30").unwrap();
        assert_eq!(t.kind, TargetKind::Cidr);
        assert_eq!(t.ips, vec!["10.0.0.1", "10.0.0.2"]);
    }

    #[test]
    fn tiny_cidr_keeps_all_addresses() {
        let parser = TargetParser::new();
        let t = parser.parse("10.0.0.4/31").unwrap();
        assert_eq!(t.ips, vec!["10.0.0.4", "10.0.0.5"]);
        let t = parser.parse("10.0.0.9/32").unwrap();
        assert_eq!(t.ips, vec!["10.0.0.9"]);
    }

    #[test]
    fn invalid_cidr_falls_back_to_bare_host() {
        let parser = TargetParser::new();
        let t = parser.parse("not/a/net").unwrap();
        assert_eq!(t.host, "not/a/net");
        assert!(t.ips.is_empty());
    }

    #[test]
    fn oversized_cidr_is_kept_as_raw_line() {
        let parser = TargetParser::new();
        let t = parser.parse("10.0.0.0/8").unwrap();
        assert!(t.ips.is_empty());
        assert_eq!(t.host, "10.0.0.0/8");
    }

    #[test]
    fn range_full_and_short_forms() {
        let parser = TargetParser::new();

        let t = parser.parse("192.168.1.1-192.168.1.3").unwrap();
        assert_eq!(t.kind, TargetKind::Range);
        assert_eq!(t.ips, vec!["192.168.1.1", "192.168.1.2", "192.168.1.3"]);

        let t = parser.parse("192.168.1.250-253").unwrap();
        assert_eq!(
            t.ips,
            vec!["192.168.1.250", "192.168.1.251", "192.168.1.252", "192.168.1.253"]
        );
    }

    #[test]
    fn hyphenated_domain_is_not_a_range() {
        let parser = TargetParser::new();
        let t = parser.parse("my-site.example.com").unwrap();
        assert_eq!(t.kind, TargetKind::Domain);
        assert_eq!(t.host, "my-site.example.com");
    }

    #[test]
    fn inverted_range_falls_back_to_bare_host() {
        let parser = TargetParser::new();
        let t = parser.parse("192.168.1.10-5").unwrap();
        assert!(t.ips.is_empty());
        assert_eq!(t.host, "192.168.1.10-5");
    }

    #[test]
    fn expand_all_dedups_across_lines_preserving_order() {
        let parser = TargetParser::new();
        let hosts = parser.expand_all("b.com\na.com\nb.com\n10.0.0.4/31\n10.0.0.5");
        assert_eq!(hosts, vec!["b.com", "a.com", "10.0.0.4", "10.0.0.5"]);
    }

    #[test]
    fn split_expands_dedups_and_batches() {
        let splitter = TargetSplitter::new(2);
        let batches = splitter.split("10.0.0.0/30\nexample.com\n# comment\nexample.com");
        assert_eq!(batches, vec!["10.0.0.1\n10.0.0.2", "example.com"]);
    }

    #[test]
    fn every_batch_is_bounded_and_at_most_one_is_smaller() {
        let input = (0..23)
            .map(|i| format!("host{i}.example.com"))
            .collect::<Vec<_>>()
            .join("\n");
        let splitter = TargetSplitter::new(5);
        let batches = splitter.split(&input);
        assert_eq!(batches.len(), 5);
        let sizes: Vec<usize> = batches.iter().map(|b| b.lines().count()).collect();
        assert!(sizes.iter().all(|&s| s <= 5));
        assert_eq!(sizes.iter().filter(|&&s| s < 5).count(), 1);
    }

    #[test]
    fn zero_batch_size_uses_default() {
        let splitter = TargetSplitter::new(0);
        assert_eq!(splitter.batch_size(), TargetSplitter::DEFAULT_BATCH_SIZE);
    }
}
