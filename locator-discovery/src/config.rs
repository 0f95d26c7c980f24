//! Configuration for locator discovery.
//!
//! [`DiscoveryConfig`] can be built programmatically with
//! [`DiscoveryConfig::builder`] or read from a flat property map with
//! [`DiscoveryConfig::from_properties`], using the property names of the
//! lookup plugin:
//!
//! | Property | Default | Meaning |
//! |---|---|---|
//! | `<prefix>.Timeout` | `300` | probe timeout, milliseconds |
//! | `<prefix>.RetryCount` | `3` | probe resends after the first one |
//! | `<prefix>.RetryDelay` | `2000` | cooldown after a failed lookup, milliseconds |
//! | `<prefix>.Trace.Lookup` | `0` | protocol trace level (0-3) |
//! | `<prefix>.InstanceName` | empty | only accept locators of this instance |
//! | `<prefix>.PreferIPv6` | `0` | use the IPv6 default group |
//! | `<prefix>.Address` | `239.255.0.1` / `ff15::1` | multicast group |
//! | `<prefix>.Port` | `4061` | multicast port |
//! | `<prefix>.Interface` | every local interface | interface(s) to probe on, comma separated |
//! | `<prefix>.Lookup` | derived | explicit lookup endpoints |
//! | `<prefix>.Reply.Endpoints` | derived | reply endpoints |
//!
//! Every invalid value is a [`ConfigError`]; nothing is silently clamped.
//!
//! Interfaces are IP addresses of the interface, or interface indexes when
//! the group is IPv6. Without a configured interface, the lookup endpoint is
//! split per local interface at startup, see
//! [`DiscoveryConfig::expand_lookup`].

use std::collections::HashMap;
use std::net::{IpAddr, Ipv4Addr, Ipv6Addr};
use std::time::Duration;

use crate::error::ConfigError;
use crate::types::{Endpoint, merge_endpoints};

/// Default property prefix.
pub const DEFAULT_PREFIX: &str = "IceLocatorDiscovery";

/// Default IPv4 multicast group.
pub const DEFAULT_IPV4_GROUP: Ipv4Addr = Ipv4Addr::new(239, 255, 0, 1);

/// Default IPv6 multicast group (`ff15::1`).
pub const DEFAULT_IPV6_GROUP: Ipv6Addr = Ipv6Addr::new(0xff15, 0, 0, 0, 0, 0, 0, 1);

/// Default multicast port.
pub const DEFAULT_PORT: u16 = 4061;

/// Locator discovery settings.
///
/// # Example
///
/// ```rust
/// use std::time::Duration;
/// use locator_discovery::DiscoveryConfig;
///
/// let config = DiscoveryConfig::builder()
///     .timeout(Duration::from_millis(500))
///     .retry_count(1)
///     .instance_name("DemoGrid")
///     .build()
///     .unwrap();
/// assert_eq!(config.lookup().len(), 1);
/// ```
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DiscoveryConfig {
    timeout: Duration,
    retry_count: u32,
    cooldown: Duration,
    trace_level: u32,
    instance_name: Option<String>,
    lookup: Vec<Endpoint>,
    reply: Vec<Endpoint>,
    per_local_interface: bool,
}

impl DiscoveryConfig {
    /// Start building a configuration.
    pub fn builder() -> DiscoveryConfigBuilder {
        DiscoveryConfigBuilder::default()
    }

    /// Read the configuration from `<prefix>.*` properties.
    ///
    /// # Errors
    ///
    /// Returns a [`ConfigError`] for any malformed or negative value.
    pub fn from_properties(
        prefix: &str,
        properties: &HashMap<String, String>,
    ) -> Result<Self, ConfigError> {
        let props = Properties { prefix, properties };
        let mut builder = DiscoveryConfig::builder();

        if let Some(ms) = props.non_negative("Timeout")? {
            builder = builder.timeout(Duration::from_millis(ms));
        }
        if let Some(count) = props.non_negative("RetryCount")? {
            builder = builder.retry_count(saturating_u32(count));
        }
        if let Some(ms) = props.non_negative("RetryDelay")? {
            builder = builder.cooldown(Duration::from_millis(ms));
        }
        if let Some(level) = props.non_negative("Trace.Lookup")? {
            builder = builder.trace_level(saturating_u32(level));
        }
        if let Some(name) = props.get("InstanceName") {
            builder = builder.instance_name(name);
        }
        let mut ipv6 = false;
        if let Some(prefer) = props.non_negative("PreferIPv6")? {
            ipv6 = prefer > 0;
            builder = builder.prefer_ipv6(ipv6);
        }
        if let Some(address) = props.get("Address") {
            let ip = address
                .parse::<IpAddr>()
                .map_err(|_| props.invalid_address("Address", address))?;
            ipv6 = ip.is_ipv6();
            builder = builder.address(ip);
        }
        if let Some(port) = props.integer("Port")? {
            let port = u16::try_from(port)
                .ok()
                .filter(|p| *p != 0)
                .ok_or(ConfigError::InvalidPort(port))?;
            builder = builder.port(port);
        }
        if let Some(interfaces) = props.get("Interface") {
            let interfaces: Vec<String> = interfaces
                .split(',')
                .map(str::trim)
                .filter(|s| !s.is_empty())
                .map(str::to_string)
                .collect();
            for interface in &interfaces {
                let valid = match interface.parse::<IpAddr>() {
                    Ok(ip) => ip.is_ipv6() == ipv6,
                    Err(_) => ipv6 && interface.parse::<u32>().is_ok(),
                };
                if !valid {
                    return Err(props.invalid_address("Interface", interface));
                }
            }
            builder = builder.interfaces(interfaces);
        }
        if let Some(lookup) = props.endpoints("Lookup")? {
            builder = builder.lookup(lookup);
        }
        if let Some(reply) = props.endpoints("Reply.Endpoints")? {
            builder = builder.reply(reply);
        }

        builder.build()
    }

    /// Time to wait for a reply before resending a probe.
    pub fn timeout(&self) -> Duration {
        self.timeout
    }

    /// Number of resends after the first probe. Zero when the timeout is zero.
    pub fn retry_count(&self) -> u32 {
        if self.timeout.is_zero() {
            0
        } else {
            self.retry_count
        }
    }

    /// Minimum time between a failed lookup and the next one.
    pub fn cooldown(&self) -> Duration {
        self.cooldown
    }

    /// Protocol trace level.
    pub fn trace_level(&self) -> u32 {
        self.trace_level
    }

    /// Instance-name filter, if configured.
    pub fn instance_name(&self) -> Option<&str> {
        self.instance_name.as_deref()
    }

    /// One lookup endpoint per probe channel.
    pub fn lookup(&self) -> &[Endpoint] {
        &self.lookup
    }

    /// Endpoints replies are sent back to.
    pub fn reply(&self) -> &[Endpoint] {
        &self.reply
    }

    /// Whether lookups go to an IPv6 group. Wildcard reply endpoints are
    /// bound in the same family.
    pub fn ipv6(&self) -> bool {
        self.lookup
            .first()
            .and_then(Endpoint::socket_addr)
            .is_some_and(|addr| addr.is_ipv6())
    }

    /// Split the derived lookup endpoint into one endpoint per local
    /// interface.
    ///
    /// `local_interfaces` lists the interfaces of one address family (`true`
    /// for IPv6) in the form accepted by the `Interface` property. Explicit
    /// lookup endpoints and configured interfaces are kept as they are, and
    /// an empty list keeps the single default-interface channel.
    pub fn expand_lookup<F>(mut self, local_interfaces: F) -> Self
    where
        F: Fn(bool) -> Vec<String>,
    {
        if !self.per_local_interface {
            return self;
        }
        let mut lookup = Vec::with_capacity(self.lookup.len());
        for endpoint in &self.lookup {
            let interfaces = match endpoint.socket_addr() {
                Some(addr) if addr.ip().is_multicast() => local_interfaces(addr.is_ipv6()),
                _ => Vec::new(),
            };
            if interfaces.is_empty() {
                lookup.push(endpoint.clone());
            } else {
                lookup.extend(
                    interfaces
                        .iter()
                        .map(|intf| endpoint.clone().with_interface(intf.clone())),
                );
            }
        }
        tracing::debug!(channels = lookup.len(), "lookup endpoints per local interface");
        self.lookup = lookup;
        self.per_local_interface = false;
        self
    }
}

impl Default for DiscoveryConfig {
    fn default() -> Self {
        Self {
            timeout: Duration::from_millis(300),
            retry_count: 3,
            cooldown: Duration::from_millis(2000),
            trace_level: 0,
            instance_name: None,
            lookup: vec![Endpoint::udp(DEFAULT_IPV4_GROUP.to_string(), DEFAULT_PORT)],
            reply: vec![Endpoint::udp("*", 0)],
            per_local_interface: true,
        }
    }
}

/// Builder for [`DiscoveryConfig`].
#[derive(Debug, Clone, Default)]
pub struct DiscoveryConfigBuilder {
    timeout: Option<Duration>,
    retry_count: Option<u32>,
    cooldown: Option<Duration>,
    trace_level: Option<u32>,
    instance_name: Option<String>,
    prefer_ipv6: bool,
    address: Option<IpAddr>,
    port: Option<u16>,
    interfaces: Vec<String>,
    lookup: Vec<Endpoint>,
    reply: Vec<Endpoint>,
}

impl DiscoveryConfigBuilder {
    /// Set the probe timeout.
    pub fn timeout(mut self, timeout: Duration) -> Self {
        self.timeout = Some(timeout);
        self
    }

    /// Set the number of resends after the first probe.
    pub fn retry_count(mut self, retry_count: u32) -> Self {
        self.retry_count = Some(retry_count);
        self
    }

    /// Set the cooldown after a failed lookup.
    pub fn cooldown(mut self, cooldown: Duration) -> Self {
        self.cooldown = Some(cooldown);
        self
    }

    /// Set the protocol trace level.
    pub fn trace_level(mut self, level: u32) -> Self {
        self.trace_level = Some(level);
        self
    }

    /// Only accept locators with this instance name. Empty means no filter.
    pub fn instance_name(mut self, name: impl Into<String>) -> Self {
        let name = name.into();
        self.instance_name = if name.is_empty() { None } else { Some(name) };
        self
    }

    /// Use the IPv6 default group when no address is set.
    pub fn prefer_ipv6(mut self, prefer: bool) -> Self {
        self.prefer_ipv6 = prefer;
        self
    }

    /// Set the multicast group address.
    pub fn address(mut self, address: IpAddr) -> Self {
        self.address = Some(address);
        self
    }

    /// Set the multicast port.
    pub fn port(mut self, port: u16) -> Self {
        self.port = Some(port);
        self
    }

    /// Probe on each of these local interfaces: interface addresses, or
    /// interface indexes for an IPv6 group.
    pub fn interfaces(mut self, interfaces: Vec<String>) -> Self {
        self.interfaces = interfaces;
        self
    }

    /// Use these lookup endpoints instead of deriving them.
    pub fn lookup(mut self, lookup: Vec<Endpoint>) -> Self {
        self.lookup = lookup;
        self
    }

    /// Use these reply endpoints instead of deriving them.
    pub fn reply(mut self, reply: Vec<Endpoint>) -> Self {
        self.reply = reply;
        self
    }

    /// Validate and build the configuration.
    ///
    /// # Errors
    ///
    /// Returns [`ConfigError::InvalidPort`] for port zero and
    /// [`ConfigError::NoLookupChannels`] if no lookup endpoint results.
    pub fn build(self) -> Result<DiscoveryConfig, ConfigError> {
        let defaults = DiscoveryConfig::default();
        let per_local_interface = self.lookup.is_empty() && self.interfaces.is_empty();

        let lookup = if self.lookup.is_empty() {
            let address = self.address.unwrap_or(if self.prefer_ipv6 {
                IpAddr::V6(DEFAULT_IPV6_GROUP)
            } else {
                IpAddr::V4(DEFAULT_IPV4_GROUP)
            });
            let port = self.port.unwrap_or(DEFAULT_PORT);
            if port == 0 {
                return Err(ConfigError::InvalidPort(0));
            }
            if self.interfaces.is_empty() {
                vec![Endpoint::udp(address.to_string(), port)]
            } else {
                self.interfaces
                    .iter()
                    .map(|intf| Endpoint::udp(address.to_string(), port).with_interface(intf))
                    .collect()
            }
        } else {
            self.lookup
        };
        if lookup.is_empty() {
            return Err(ConfigError::NoLookupChannels);
        }

        let reply = if self.reply.is_empty() {
            // An interface given by index has no address to bind; it listens
            // on the wildcard.
            let derived: Vec<Endpoint> = self
                .interfaces
                .iter()
                .map(|intf| match intf.parse::<IpAddr>() {
                    Ok(_) => Endpoint::udp(intf.clone(), 0),
                    Err(_) => Endpoint::udp("*", 0),
                })
                .collect();
            if derived.is_empty() {
                vec![Endpoint::udp("*", 0)]
            } else {
                merge_endpoints(&[], &derived)
            }
        } else {
            self.reply
        };

        Ok(DiscoveryConfig {
            timeout: self.timeout.unwrap_or(defaults.timeout),
            retry_count: self.retry_count.unwrap_or(defaults.retry_count),
            cooldown: self.cooldown.unwrap_or(defaults.cooldown),
            trace_level: self.trace_level.unwrap_or(defaults.trace_level),
            instance_name: self.instance_name,
            lookup,
            reply,
            per_local_interface,
        })
    }
}

struct Properties<'a> {
    prefix: &'a str,
    properties: &'a HashMap<String, String>,
}

impl Properties<'_> {
    fn key(&self, name: &str) -> String {
        format!("{}.{}", self.prefix, name)
    }

    fn get(&self, name: &str) -> Option<&str> {
        self.properties.get(&self.key(name)).map(|v| v.trim())
    }

    fn integer(&self, name: &str) -> Result<Option<i64>, ConfigError> {
        match self.get(name) {
            None => Ok(None),
            Some(value) => value
                .parse::<i64>()
                .map(Some)
                .map_err(|_| ConfigError::InvalidNumber {
                    property: self.key(name),
                    value: value.to_string(),
                }),
        }
    }

    fn non_negative(&self, name: &str) -> Result<Option<u64>, ConfigError> {
        match self.integer(name)? {
            None => Ok(None),
            Some(value) if value < 0 => Err(ConfigError::Negative {
                property: self.key(name),
                value,
            }),
            Some(value) => Ok(Some(value.unsigned_abs())),
        }
    }

    fn endpoints(&self, name: &str) -> Result<Option<Vec<Endpoint>>, ConfigError> {
        match self.get(name) {
            None | Some("") => Ok(None),
            Some(value) => Endpoint::parse_list(value)
                .map(Some)
                .map_err(|source| ConfigError::Endpoint {
                    property: self.key(name),
                    source,
                }),
        }
    }

    fn invalid_address(&self, name: &str, value: &str) -> ConfigError {
        ConfigError::InvalidAddress {
            property: self.key(name),
            value: value.to_string(),
        }
    }
}

fn saturating_u32(value: u64) -> u32 {
    u32::try_from(value).unwrap_or(u32::MAX)
}
