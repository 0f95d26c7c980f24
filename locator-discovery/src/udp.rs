//! UDP lookup: probes go out as multicast datagrams, replies come back as
//! unicast datagrams on the reply endpoints.
//!
//! Datagrams are JSON-encoded [`LookupDatagram`] values:
//!
//! ```text
//! {"FindLocator":{"instance_name":"DemoGrid","reply":[...]}}
//! {"FoundLocator":{"locator":{"identity":...,"endpoints":[...]}}}
//! ```

use std::collections::HashMap;
use std::io;
use std::net::{IpAddr, Ipv4Addr, Ipv6Addr, SocketAddr};
use std::sync::Arc;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use socket2::{Domain, Protocol, Socket, Type};
use tokio::net::UdpSocket;
use tokio::sync::Mutex;
use tokio::task::JoinHandle;

use crate::channel::{ProbeRequest, ProbeTransport};
use crate::correlator::ReplyListener;
use crate::types::{Endpoint, ObjectRef};

const MAX_DATAGRAM: usize = 65_507;

/// A lookup datagram.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub enum LookupDatagram {
    /// Probe: ask locators of `instance_name` (any, if empty) to answer on
    /// `reply`.
    FindLocator {
        instance_name: String,
        reply: Vec<Endpoint>,
    },
    /// Probe reply.
    FoundLocator { locator: ObjectRef },
}

impl LookupDatagram {
    /// Encode as a JSON datagram.
    pub fn encode(&self) -> io::Result<Vec<u8>> {
        serde_json::to_vec(self).map_err(|e| io::Error::new(io::ErrorKind::InvalidData, e))
    }

    /// Decode a JSON datagram.
    pub fn decode(buf: &[u8]) -> io::Result<Self> {
        serde_json::from_slice(buf).map_err(|e| io::Error::new(io::ErrorKind::InvalidData, e))
    }
}

/// Sends probes over UDP, one socket per lookup endpoint.
///
/// Sockets are opened on first use and reused for every later round.
#[derive(Debug, Default)]
pub struct UdpProbeTransport {
    sockets: Mutex<HashMap<Endpoint, Arc<UdpSocket>>>,
}

impl UdpProbeTransport {
    pub fn new() -> Self {
        Self::default()
    }

    async fn socket_for(&self, lookup: &Endpoint) -> io::Result<Arc<UdpSocket>> {
        let mut sockets = self.sockets.lock().await;
        if let Some(socket) = sockets.get(lookup) {
            return Ok(Arc::clone(socket));
        }
        let socket = Arc::new(open_sender(lookup)?);
        sockets.insert(lookup.clone(), Arc::clone(&socket));
        Ok(socket)
    }
}

#[async_trait]
impl ProbeTransport for UdpProbeTransport {
    async fn send_probe(&self, lookup: &Endpoint, request: &ProbeRequest) -> io::Result<()> {
        let target = target_addr(lookup)?;
        let datagram = LookupDatagram::FindLocator {
            instance_name: request.instance_name.clone(),
            reply: request.reply.clone(),
        }
        .encode()?;

        let socket = self.socket_for(lookup).await?;
        socket.send_to(&datagram, target).await?;
        Ok(())
    }
}

fn target_addr(endpoint: &Endpoint) -> io::Result<SocketAddr> {
    endpoint.socket_addr().ok_or_else(|| {
        io::Error::new(
            io::ErrorKind::InvalidInput,
            format!("not an IP endpoint: {}", endpoint),
        )
    })
}

/// Open a sending socket for `lookup`, pinned to its multicast interface.
fn open_sender(lookup: &Endpoint) -> io::Result<UdpSocket> {
    let target = target_addr(lookup)?;
    let socket = Socket::new(Domain::for_address(target), Type::DGRAM, Some(Protocol::UDP))?;
    let interface = lookup.interface.as_deref().filter(|intf| !intf.is_empty());

    let bind: SocketAddr = match target.ip() {
        IpAddr::V4(group) => {
            if group.is_multicast() {
                socket.set_multicast_loop_v4(true)?;
                if let Some(intf) = interface {
                    let addr: Ipv4Addr = intf.parse().map_err(|_| {
                        io::Error::new(
                            io::ErrorKind::InvalidInput,
                            format!("invalid IPv4 interface `{}`", intf),
                        )
                    })?;
                    socket.set_multicast_if_v4(&addr)?;
                }
            }
            (Ipv4Addr::UNSPECIFIED, 0).into()
        }
        IpAddr::V6(group) => {
            if group.is_multicast() {
                socket.set_multicast_loop_v6(true)?;
                if let Some(intf) = interface {
                    socket.set_multicast_if_v6(ipv6_interface_index(intf)?)?;
                }
            }
            (Ipv6Addr::UNSPECIFIED, 0).into()
        }
    };

    socket.bind(&bind.into())?;
    socket.set_nonblocking(true)?;
    UdpSocket::from_std(socket.into())
}

/// Resolve an IPv6 multicast interface, given as an index or as one of the
/// interface's addresses, to its index.
fn ipv6_interface_index(intf: &str) -> io::Result<u32> {
    if let Ok(index) = intf.parse::<u32>() {
        return Ok(index);
    }
    let addr: Ipv6Addr = intf.parse().map_err(|_| {
        io::Error::new(
            io::ErrorKind::InvalidInput,
            format!("invalid IPv6 interface `{}`", intf),
        )
    })?;
    if_addrs::get_if_addrs()?
        .into_iter()
        .find(|local| local.ip() == IpAddr::V6(addr))
        .and_then(|local| local.index)
        .ok_or_else(|| {
            io::Error::new(
                io::ErrorKind::NotFound,
                format!("no local interface with address {}", addr),
            )
        })
}

/// Local interfaces lookups can be sent on, in the form the `Interface`
/// property takes: IPv4 addresses, or IPv6 interface indexes.
///
/// Loopback interfaces are skipped. An enumeration failure is logged and
/// yields no interface.
pub fn local_multicast_interfaces(ipv6: bool) -> Vec<String> {
    let locals = match if_addrs::get_if_addrs() {
        Ok(locals) => locals,
        Err(err) => {
            tracing::warn!(error = %err, "cannot enumerate local interfaces");
            return Vec::new();
        }
    };
    let mut interfaces: Vec<String> = Vec::new();
    for local in locals.iter().filter(|local| !local.is_loopback()) {
        let interface = match local.ip() {
            IpAddr::V4(addr) if !ipv6 => addr.to_string(),
            IpAddr::V6(_) if ipv6 => match local.index {
                Some(index) => index.to_string(),
                None => continue,
            },
            _ => continue,
        };
        if !interfaces.contains(&interface) {
            interfaces.push(interface);
        }
    }
    interfaces
}

/// Receives probe replies on one reply endpoint.
#[derive(Debug)]
pub struct UdpReplyListener {
    socket: Arc<UdpSocket>,
    endpoint: Endpoint,
}

impl UdpReplyListener {
    /// Bind to `endpoint`. Port zero picks an ephemeral port, and host `*`
    /// the wildcard address of the IPv6 family when `ipv6` is set.
    pub async fn bind(endpoint: &Endpoint, ipv6: bool) -> io::Result<Self> {
        let addr = endpoint.socket_addr_in(ipv6).ok_or_else(|| {
            io::Error::new(
                io::ErrorKind::InvalidInput,
                format!("not an IP endpoint: {}", endpoint),
            )
        })?;
        let socket = UdpSocket::bind(addr).await?;
        let local = socket.local_addr()?;
        let mut endpoint = endpoint.clone();
        endpoint.port = local.port();
        tracing::debug!(endpoint = %endpoint, "locator reply listener bound");
        Ok(Self {
            socket: Arc::new(socket),
            endpoint,
        })
    }

    /// The endpoint replies should be sent to, with the bound port.
    pub fn endpoint(&self) -> &Endpoint {
        &self.endpoint
    }

    /// Hand every decoded reply to `listener` until the task is aborted.
    pub fn spawn(&self, listener: Arc<dyn ReplyListener>) -> JoinHandle<()> {
        let socket = Arc::clone(&self.socket);
        let endpoint = self.endpoint.clone();
        tokio::spawn(async move {
            let mut buf = vec![0u8; MAX_DATAGRAM];
            loop {
                let (len, from) = match socket.recv_from(&mut buf).await {
                    Ok(received) => received,
                    Err(err) => {
                        tracing::warn!(
                            endpoint = %endpoint,
                            error = %err,
                            "locator reply listener stopped"
                        );
                        return;
                    }
                };
                match LookupDatagram::decode(&buf[..len]) {
                    Ok(LookupDatagram::FoundLocator { locator }) => {
                        listener.found_locator(Some(locator));
                    }
                    Ok(LookupDatagram::FindLocator { .. }) => {
                        tracing::debug!(%from, "ignoring probe received on reply endpoint");
                    }
                    Err(err) => {
                        tracing::debug!(%from, error = %err, "ignoring malformed locator reply");
                    }
                }
            }
        })
    }
}
