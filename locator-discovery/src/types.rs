//! Core types for locator references.
//!
//! This module provides the addressing vocabulary shared by every other module:
//! - [`Identity`]: the `category/name` pair naming an object
//! - [`Endpoint`]: transport + host + port (+ optional multicast interface)
//! - [`ObjectRef`]: identity plus the endpoints it can be reached on
//!
//! A locator reference is an [`ObjectRef`] whose identity category is the
//! locator's instance name. Replies from several replicas of one instance are
//! combined with [`merge_endpoints`].

use std::fmt;
use std::net::{IpAddr, Ipv4Addr, Ipv6Addr, SocketAddr};

use serde::{Deserialize, Serialize};

/// Name of an object: a `category` and a `name`.
///
/// # Examples
///
/// ```
/// use locator_discovery::Identity;
///
/// let id = Identity::new("Locator", "DemoGrid");
/// assert_eq!(id.to_string(), "DemoGrid/Locator");
/// ```
#[derive(Debug, Clone, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
pub struct Identity {
    /// Object name.
    pub name: String,
    /// Object category. For locators this is the instance name.
    pub category: String,
}

impl Identity {
    /// Create an identity from a name and a category.
    pub fn new(name: impl Into<String>, category: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            category: category.into(),
        }
    }

    /// Parse the `category/name` form. A missing slash yields an empty category.
    pub fn parse(s: &str) -> Self {
        match s.split_once('/') {
            Some((category, name)) => Self::new(name, category),
            None => Self::new(s, ""),
        }
    }
}

impl fmt::Display for Identity {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        if self.category.is_empty() {
            write!(f, "{}", self.name)
        } else {
            write!(f, "{}/{}", self.category, self.name)
        }
    }
}

/// Transport protocol of an [`Endpoint`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Transport {
    /// Stream transport.
    Tcp,
    /// Datagram transport, used for multicast lookups.
    Udp,
    /// Secure stream transport.
    Ssl,
}

impl Transport {
    fn as_str(&self) -> &'static str {
        match self {
            Transport::Tcp => "tcp",
            Transport::Udp => "udp",
            Transport::Ssl => "ssl",
        }
    }
}

/// A network endpoint.
///
/// Two endpoints are the same endpoint when every field matches; this is the
/// identity used to deduplicate replica endpoints.
///
/// # Examples
///
/// ```
/// use locator_discovery::{Endpoint, Transport};
///
/// let ep = Endpoint::parse("tcp -h 10.0.0.5 -p 4061").unwrap();
/// assert_eq!(ep.transport, Transport::Tcp);
/// assert_eq!(ep.port, 4061);
/// assert_eq!(ep.to_string(), "tcp -h 10.0.0.5 -p 4061");
/// ```
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct Endpoint {
    /// Transport protocol.
    pub transport: Transport,
    /// Host name or IP address. `*` stands for every local address.
    pub host: String,
    /// Port number.
    pub port: u16,
    /// Local interface used to send multicast datagrams, if pinned.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub interface: Option<String>,
}

impl Endpoint {
    /// Create an endpoint without an interface.
    pub fn new(transport: Transport, host: impl Into<String>, port: u16) -> Self {
        Self {
            transport,
            host: host.into(),
            port,
            interface: None,
        }
    }

    /// Create a TCP endpoint.
    pub fn tcp(host: impl Into<String>, port: u16) -> Self {
        Self::new(Transport::Tcp, host, port)
    }

    /// Create a UDP endpoint.
    pub fn udp(host: impl Into<String>, port: u16) -> Self {
        Self::new(Transport::Udp, host, port)
    }

    /// Pin this endpoint to a local interface.
    pub fn with_interface(mut self, interface: impl Into<String>) -> Self {
        self.interface = Some(interface.into());
        self
    }

    /// Parse the `<transport> -h <host> -p <port> [--interface <intf>]` form.
    ///
    /// Hosts and interfaces may be double-quoted.
    ///
    /// # Errors
    ///
    /// Returns an error for unknown transports, unknown options, a missing
    /// host or port, or an unparsable port.
    pub fn parse(s: &str) -> Result<Self, EndpointParseError> {
        let mut tokens = s.split_whitespace();
        let transport = match tokens.next() {
            Some("tcp") => Transport::Tcp,
            Some("udp") => Transport::Udp,
            Some("ssl") => Transport::Ssl,
            Some(other) => return Err(EndpointParseError::UnknownTransport(other.to_string())),
            None => return Err(EndpointParseError::Empty),
        };

        let mut host = None;
        let mut port = None;
        let mut interface = None;
        while let Some(option) = tokens.next() {
            let value = tokens
                .next()
                .map(unquote)
                .ok_or_else(|| EndpointParseError::MissingValue(option.to_string()))?;
            match option {
                "-h" => host = Some(value),
                "-p" => {
                    port = Some(
                        value
                            .parse::<u16>()
                            .map_err(|_| EndpointParseError::InvalidPort(value.clone()))?,
                    )
                }
                "--interface" => interface = Some(value),
                other => return Err(EndpointParseError::UnknownOption(other.to_string())),
            }
        }

        Ok(Self {
            transport,
            host: host.ok_or(EndpointParseError::MissingHost)?,
            port: port.ok_or(EndpointParseError::MissingPort)?,
            interface,
        })
    }

    /// Parse a `:`-separated endpoint list. Colons inside quotes are kept,
    /// so IPv6 hosts must be quoted.
    pub fn parse_list(s: &str) -> Result<Vec<Self>, EndpointParseError> {
        let mut endpoints = Vec::new();
        let mut quoted = false;
        let mut start = 0;
        for (i, c) in s.char_indices() {
            match c {
                '"' => quoted = !quoted,
                ':' if !quoted => {
                    endpoints.push(Self::parse(&s[start..i])?);
                    start = i + 1;
                }
                _ => {}
            }
        }
        endpoints.push(Self::parse(&s[start..])?);
        Ok(endpoints)
    }

    /// Socket address of this endpoint, when the host is a literal IP address.
    ///
    /// `*` maps to the IPv4 unspecified address.
    pub fn socket_addr(&self) -> Option<SocketAddr> {
        self.socket_addr_in(false)
    }

    /// Like [`socket_addr`](Self::socket_addr), with `*` mapped to the
    /// unspecified address of the requested family.
    pub fn socket_addr_in(&self, ipv6: bool) -> Option<SocketAddr> {
        let ip = match (self.host.as_str(), ipv6) {
            ("*", false) => IpAddr::V4(Ipv4Addr::UNSPECIFIED),
            ("*", true) => IpAddr::V6(Ipv6Addr::UNSPECIFIED),
            (host, _) => host.parse::<IpAddr>().ok()?,
        };
        Some(SocketAddr::new(ip, self.port))
    }

    /// Whether the host is a multicast group address.
    pub fn is_multicast(&self) -> bool {
        self.socket_addr()
            .map(|addr| addr.ip().is_multicast())
            .unwrap_or(false)
    }
}

impl fmt::Display for Endpoint {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        if self.host.contains(':') {
            write!(f, "{} -h \"{}\" -p {}", self.transport.as_str(), self.host, self.port)?;
        } else {
            write!(f, "{} -h {} -p {}", self.transport.as_str(), self.host, self.port)?;
        }
        if let Some(interface) = &self.interface {
            write!(f, " --interface \"{}\"", interface)?;
        }
        Ok(())
    }
}

fn unquote(s: &str) -> String {
    s.trim_matches('"').to_string()
}

/// Error parsing an [`Endpoint`] from string.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum EndpointParseError {
    /// Nothing to parse.
    #[error("empty endpoint")]
    Empty,
    /// The transport keyword is not recognized.
    #[error("unknown transport `{0}`")]
    UnknownTransport(String),
    /// An option is not recognized.
    #[error("unknown endpoint option `{0}`")]
    UnknownOption(String),
    /// An option has no value.
    #[error("missing value for option `{0}`")]
    MissingValue(String),
    /// No `-h` option.
    #[error("missing host")]
    MissingHost,
    /// No `-p` option.
    #[error("missing port")]
    MissingPort,
    /// The port is not a valid number.
    #[error("invalid port `{0}`")]
    InvalidPort(String),
}

/// Reference to a remote object: identity plus endpoints.
///
/// Equality covers the identity, adapter id and the full endpoint list, so a
/// locator reference whose endpoint set grew is a different reference.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ObjectRef {
    /// Object identity.
    pub identity: Identity,
    /// Indirect adapter id, when the object is reached through an adapter.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub adapter_id: Option<String>,
    /// Endpoints the object is reachable on.
    pub endpoints: Vec<Endpoint>,
}

impl ObjectRef {
    /// Create a direct reference.
    pub fn new(identity: Identity, endpoints: Vec<Endpoint>) -> Self {
        Self {
            identity,
            adapter_id: None,
            endpoints,
        }
    }

    /// Create an indirect reference through an adapter id.
    pub fn indirect(identity: Identity, adapter_id: impl Into<String>) -> Self {
        Self {
            identity,
            adapter_id: Some(adapter_id.into()),
            endpoints: Vec::new(),
        }
    }

    /// Instance name of a locator reference (the identity category).
    pub fn instance_name(&self) -> &str {
        &self.identity.category
    }

    /// Same reference with a different endpoint list.
    pub fn with_endpoints(&self, endpoints: Vec<Endpoint>) -> Self {
        Self {
            identity: self.identity.clone(),
            adapter_id: self.adapter_id.clone(),
            endpoints,
        }
    }

    /// Same reference extended with the endpoints of `other` that it does not
    /// already have.
    pub fn merged_with(&self, other: &ObjectRef) -> Self {
        self.with_endpoints(merge_endpoints(&self.endpoints, &other.endpoints))
    }
}

impl fmt::Display for ObjectRef {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.identity)?;
        if let Some(adapter_id) = &self.adapter_id {
            write!(f, " @ {}", adapter_id)?;
        }
        for endpoint in &self.endpoints {
            write!(f, ":{}", endpoint)?;
        }
        Ok(())
    }
}

/// Union of two endpoint lists: `current` followed by every endpoint of
/// `extra` not already present, in order of first appearance.
pub fn merge_endpoints(current: &[Endpoint], extra: &[Endpoint]) -> Vec<Endpoint> {
    let mut merged: Vec<Endpoint> = Vec::with_capacity(current.len() + extra.len());
    for endpoint in current.iter().chain(extra) {
        if !merged.contains(endpoint) {
            merged.push(endpoint.clone());
        }
    }
    merged
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_identity_parse_and_display() {
        let id = Identity::parse("DemoGrid/Locator");
        assert_eq!(id.category, "DemoGrid");
        assert_eq!(id.name, "Locator");
        assert_eq!(id.to_string(), "DemoGrid/Locator");

        let bare = Identity::parse("hello");
        assert_eq!(bare.category, "");
        assert_eq!(bare.to_string(), "hello");
    }

    #[test]
    fn test_endpoint_parse() {
        let ep = Endpoint::parse("udp -h 239.255.0.1 -p 4061 --interface \"10.0.0.7\"")
            .expect("parse");
        assert_eq!(ep.transport, Transport::Udp);
        assert_eq!(ep.host, "239.255.0.1");
        assert_eq!(ep.port, 4061);
        assert_eq!(ep.interface.as_deref(), Some("10.0.0.7"));
        assert!(ep.is_multicast());
    }

    #[test]
    fn test_endpoint_display_quotes_ipv6() {
        let ep = Endpoint::udp("ff15::1", 4061);
        assert_eq!(ep.to_string(), "udp -h \"ff15::1\" -p 4061");
        assert_eq!(Endpoint::parse(&ep.to_string()).expect("parse"), ep);
    }

    #[test]
    fn test_endpoint_parse_errors() {
        assert_eq!(Endpoint::parse(""), Err(EndpointParseError::Empty));
        assert!(matches!(
            Endpoint::parse("quic -h a -p 1"),
            Err(EndpointParseError::UnknownTransport(_))
        ));
        assert_eq!(
            Endpoint::parse("tcp -p 1"),
            Err(EndpointParseError::MissingHost)
        );
        assert_eq!(
            Endpoint::parse("tcp -h a"),
            Err(EndpointParseError::MissingPort)
        );
        assert!(matches!(
            Endpoint::parse("tcp -h a -p nope"),
            Err(EndpointParseError::InvalidPort(_))
        ));
        assert!(matches!(
            Endpoint::parse("tcp -h a -p 1 -z 3"),
            Err(EndpointParseError::UnknownOption(_))
        ));
    }

    #[test]
    fn test_endpoint_parse_list_keeps_quoted_colons() {
        let list = Endpoint::parse_list("udp -h \"ff15::1\" -p 4061:tcp -h 10.0.0.1 -p 12000")
            .expect("parse");
        assert_eq!(list.len(), 2);
        assert_eq!(list[0].host, "ff15::1");
        assert_eq!(list[1], Endpoint::tcp("10.0.0.1", 12000));
    }

    #[test]
    fn test_endpoint_socket_addr() {
        let any = Endpoint::udp("*", 0);
        assert_eq!(
            any.socket_addr(),
            Some(SocketAddr::new(IpAddr::V4(Ipv4Addr::UNSPECIFIED), 0))
        );
        assert_eq!(Endpoint::tcp("locator.local", 1).socket_addr(), None);
        assert!(!Endpoint::udp("127.0.0.1", 4061).is_multicast());
    }

    #[test]
    fn test_wildcard_follows_requested_family() {
        let any = Endpoint::udp("*", 0);
        assert_eq!(
            any.socket_addr_in(true),
            Some(SocketAddr::new(IpAddr::V6(Ipv6Addr::UNSPECIFIED), 0))
        );
        assert_eq!(any.socket_addr_in(false), any.socket_addr());
        // Literal hosts keep their own family.
        assert_eq!(
            Endpoint::udp("10.0.0.1", 5000).socket_addr_in(true),
            Some(SocketAddr::new(IpAddr::V4(Ipv4Addr::new(10, 0, 0, 1)), 5000))
        );
    }

    #[test]
    fn test_merge_endpoints_preserves_first_appearance() {
        let e1 = Endpoint::tcp("10.0.0.1", 1);
        let e2 = Endpoint::tcp("10.0.0.2", 1);
        let e3 = Endpoint::tcp("10.0.0.3", 1);

        let merged = merge_endpoints(&[e1.clone(), e2.clone()], &[e2.clone(), e3.clone()]);
        assert_eq!(merged, vec![e1, e2, e3]);
    }

    #[test]
    fn test_merge_endpoints_distinguishes_full_address() {
        let tcp = Endpoint::tcp("10.0.0.1", 4061);
        let ssl = Endpoint::new(Transport::Ssl, "10.0.0.1", 4061);
        let merged = merge_endpoints(&[tcp.clone()], &[ssl.clone(), tcp.clone()]);
        assert_eq!(merged, vec![tcp, ssl]);
    }

    #[test]
    fn test_object_ref_merge_keeps_identity() {
        let id = Identity::new("Locator", "DemoGrid");
        let a = ObjectRef::new(id.clone(), vec![Endpoint::tcp("10.0.0.1", 1)]);
        let b = ObjectRef::new(id.clone(), vec![Endpoint::tcp("10.0.0.2", 1)]);

        let merged = a.merged_with(&b);
        assert_eq!(merged.identity, id);
        assert_eq!(merged.instance_name(), "DemoGrid");
        assert_eq!(merged.endpoints.len(), 2);
        assert_ne!(merged, a);
    }

    #[test]
    fn test_object_ref_serde_roundtrip() {
        let locator = ObjectRef::new(
            Identity::new("Locator", "DemoGrid"),
            vec![Endpoint::tcp("10.0.0.1", 4061)],
        );
        let json = serde_json::to_string(&locator).expect("serialize");
        let decoded: ObjectRef = serde_json::from_str(&json).expect("deserialize");
        assert_eq!(locator, decoded);
    }
}
