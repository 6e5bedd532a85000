//! Concurrent lease negotiation
//!
//! One task per candidate interface and protocol, all reporting into
//! a single mpsc channel and sharing a watch channel as the
//! cancellation scope. Whoever accepts a lease flips the watch value;
//! tasks notice between rounds and abandon their remaining retries.

use crate::error::{DhcpError, Result};
use crate::lease::{Lease, Lease4, Lease6};
use crate::link::Link;
use dhcproto::v4;
use dhcproto::v6;
use dhcproto::{Decodable, Encodable};
use std::net::{Ipv4Addr, SocketAddr, SocketAddrV4, SocketAddrV6};
use std::time::Duration;
use tokio::net::UdpSocket;
use tokio::sync::{mpsc, watch};
use tracing::{debug, warn};

/// Which DHCP protocol versions to attempt per interface
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Protocols {
    pub ipv4: bool,
    pub ipv6: bool,
}

impl Default for Protocols {
    fn default() -> Self {
        Self {
            ipv4: true,
            ipv6: true,
        }
    }
}

/// One negotiation outcome, tagged with its interface
#[derive(Debug)]
pub struct LeaseResult {
    pub link: Link,
    pub result: Result<Lease>,
}

/// Start concurrent negotiation across `links`.
///
/// Each interface attempts up to `tries` rounds per enabled protocol,
/// each round bounded by `timeout`. Results arrive on the returned
/// channel in completion order; the channel closes once every task
/// has reported. Setting the `cancel` watch value to true abandons
/// all further rounds.
pub fn send_requests(
    links: Vec<Link>,
    timeout: Duration,
    tries: u32,
    protocols: Protocols,
    cancel: watch::Receiver<bool>,
) -> mpsc::Receiver<LeaseResult> {
    let capacity = (links.len() * 2).max(1);
    let (tx, rx) = mpsc::channel(capacity);

    for link in links {
        if protocols.ipv4 {
            spawn_negotiation(link.clone(), Proto::V4, timeout, tries, cancel.clone(), tx.clone());
        }
        if protocols.ipv6 {
            spawn_negotiation(link.clone(), Proto::V6, timeout, tries, cancel.clone(), tx.clone());
        }
    }

    // The channel closes when the last task drops its sender.
    rx
}

#[derive(Debug, Clone, Copy)]
enum Proto {
    V4,
    V6,
}

fn spawn_negotiation(
    link: Link,
    proto: Proto,
    timeout: Duration,
    tries: u32,
    cancel: watch::Receiver<bool>,
    tx: mpsc::Sender<LeaseResult>,
) {
    tokio::spawn(async move {
        let result = negotiate(&link, proto, timeout, tries, cancel).await;
        // The orchestrator may have stopped listening; nothing to do then.
        let _ = tx
            .send(LeaseResult {
                link: link.clone(),
                result,
            })
            .await;
    });
}

async fn negotiate(
    link: &Link,
    proto: Proto,
    per_try: Duration,
    tries: u32,
    mut cancel: watch::Receiver<bool>,
) -> Result<Lease> {
    let mut last_err = None;

    for attempt in 1..=tries {
        if *cancel.borrow() {
            return Err(DhcpError::Cancelled {
                link: link.name.clone(),
            });
        }

        debug!(link = %link.name, proto = ?proto, attempt, "starting negotiation round");

        let round = async {
            match proto {
                Proto::V4 => v4_round(link).await,
                Proto::V6 => v6_round(link).await,
            }
        };

        tokio::select! {
            _ = cancel.changed() => {
                return Err(DhcpError::Cancelled {
                    link: link.name.clone(),
                });
            }
            outcome = tokio::time::timeout(per_try, round) => match outcome {
                Ok(Ok(lease)) => return Ok(lease),
                Ok(Err(e)) => {
                    warn!(link = %link.name, attempt, error = %e, "negotiation round failed");
                    last_err = Some(e);
                }
                Err(_) => {
                    debug!(link = %link.name, attempt, "negotiation round timed out");
                    last_err = None;
                }
            }
        }
    }

    Err(last_err.unwrap_or(DhcpError::Timeout {
        link: link.name.clone(),
        tries,
    }))
}

// --- DHCPv4 ---

async fn v4_round(link: &Link) -> Result<Lease> {
    let socket = v4_socket(link)?;
    let chaddr = link.mac_bytes()?;
    let xid: u32 = rand::random();

    let discover = build_discover(&chaddr, xid)?;
    send_v4(&socket, link, &discover).await?;
    let offer = recv_v4(&socket, link, xid, v4::MessageType::Offer).await?;

    let server_id = v4_server_id(&offer);
    let request = build_request(&chaddr, xid, offer.yiaddr(), server_id)?;
    send_v4(&socket, link, &request).await?;
    let ack = recv_v4(&socket, link, xid, v4::MessageType::Ack).await?;

    Ok(Lease::V4(lease_from_ack(link.clone(), &ack)))
}

/// Broadcast-capable socket bound to the interface, client port 68
fn v4_socket(link: &Link) -> Result<UdpSocket> {
    let setup = |e: std::io::Error| DhcpError::SocketSetup {
        link: link.name.clone(),
        source: e,
    };

    let socket = socket2::Socket::new(
        socket2::Domain::IPV4,
        socket2::Type::DGRAM,
        Some(socket2::Protocol::UDP),
    )
    .map_err(setup)?;

    socket.set_reuse_address(true).map_err(setup)?;
    socket.set_broadcast(true).map_err(setup)?;
    socket
        .bind_device(Some(link.name.as_bytes()))
        .map_err(setup)?;

    let bind_addr = SocketAddrV4::new(Ipv4Addr::UNSPECIFIED, 68);
    socket.bind(&bind_addr.into()).map_err(setup)?;
    socket.set_nonblocking(true).map_err(setup)?;

    let std_socket: std::net::UdpSocket = socket.into();
    UdpSocket::from_std(std_socket).map_err(setup)
}

async fn send_v4(socket: &UdpSocket, link: &Link, bytes: &[u8]) -> Result<()> {
    let dest = SocketAddrV4::new(Ipv4Addr::BROADCAST, 67);
    socket
        .send_to(bytes, SocketAddr::from(dest))
        .await
        .map_err(|e| DhcpError::Io {
            link: link.name.clone(),
            source: e,
        })?;
    Ok(())
}

fn build_discover(chaddr: &[u8; 6], xid: u32) -> Result<Vec<u8>> {
    let mut msg = v4::Message::default();
    msg.set_opcode(v4::Opcode::BootRequest);
    msg.set_xid(xid);
    msg.set_flags(v4::Flags::default().set_broadcast());
    msg.set_chaddr(chaddr);

    msg.opts_mut()
        .insert(v4::DhcpOption::MessageType(v4::MessageType::Discover));
    msg.opts_mut()
        .insert(v4::DhcpOption::ClassIdentifier(b"PXEClient".to_vec()));
    msg.opts_mut()
        .insert(v4::DhcpOption::ParameterRequestList(vec![
            v4::OptionCode::SubnetMask,
            v4::OptionCode::Router,
            v4::OptionCode::DomainNameServer,
            v4::OptionCode::TFTPServerName,
            v4::OptionCode::BootfileName,
        ]));

    msg.to_vec().map_err(|e| DhcpError::Codec(e.to_string()))
}

fn build_request(
    chaddr: &[u8; 6],
    xid: u32,
    requested: Ipv4Addr,
    server_id: Option<Ipv4Addr>,
) -> Result<Vec<u8>> {
    let mut msg = v4::Message::default();
    msg.set_opcode(v4::Opcode::BootRequest);
    msg.set_xid(xid);
    msg.set_flags(v4::Flags::default().set_broadcast());
    msg.set_chaddr(chaddr);

    msg.opts_mut()
        .insert(v4::DhcpOption::MessageType(v4::MessageType::Request));
    msg.opts_mut()
        .insert(v4::DhcpOption::RequestedIpAddress(requested));
    if let Some(server) = server_id {
        msg.opts_mut()
            .insert(v4::DhcpOption::ServerIdentifier(server));
    }
    msg.opts_mut()
        .insert(v4::DhcpOption::ClassIdentifier(b"PXEClient".to_vec()));
    msg.opts_mut()
        .insert(v4::DhcpOption::ParameterRequestList(vec![
            v4::OptionCode::SubnetMask,
            v4::OptionCode::Router,
            v4::OptionCode::DomainNameServer,
            v4::OptionCode::TFTPServerName,
            v4::OptionCode::BootfileName,
        ]));

    msg.to_vec().map_err(|e| DhcpError::Codec(e.to_string()))
}

/// Wait for a reply with our transaction id and the wanted type.
/// A NAK terminates the round; anything else is drained and ignored.
async fn recv_v4(
    socket: &UdpSocket,
    link: &Link,
    xid: u32,
    wanted: v4::MessageType,
) -> Result<v4::Message> {
    let mut buf = vec![0u8; 1500];
    loop {
        let (len, _src) = socket.recv_from(&mut buf).await.map_err(|e| DhcpError::Io {
            link: link.name.clone(),
            source: e,
        })?;

        let msg = match v4::Message::from_bytes(&buf[..len]) {
            Ok(msg) => msg,
            Err(e) => {
                debug!(link = %link.name, error = %e, "ignoring unparseable DHCP packet");
                continue;
            }
        };
        if msg.xid() != xid {
            continue;
        }

        match v4_message_type(&msg) {
            Some(t) if t == wanted => return Ok(msg),
            Some(v4::MessageType::Nak) => {
                return Err(DhcpError::Nacked {
                    link: link.name.clone(),
                })
            }
            _ => continue,
        }
    }
}

fn v4_message_type(msg: &v4::Message) -> Option<v4::MessageType> {
    msg.opts().get(v4::OptionCode::MessageType).and_then(|opt| {
        if let v4::DhcpOption::MessageType(t) = opt {
            Some(*t)
        } else {
            None
        }
    })
}

fn v4_server_id(msg: &v4::Message) -> Option<Ipv4Addr> {
    let from_opt = msg
        .opts()
        .get(v4::OptionCode::ServerIdentifier)
        .and_then(|opt| {
            if let v4::DhcpOption::ServerIdentifier(ip) = opt {
                Some(*ip)
            } else {
                None
            }
        });
    from_opt.or_else(|| {
        let siaddr = msg.siaddr();
        (siaddr != Ipv4Addr::UNSPECIFIED).then_some(siaddr)
    })
}

fn lease_from_ack(link: Link, ack: &v4::Message) -> Lease4 {
    let subnet_mask = ack.opts().get(v4::OptionCode::SubnetMask).and_then(|opt| {
        if let v4::DhcpOption::SubnetMask(mask) = opt {
            Some(*mask)
        } else {
            None
        }
    });
    let routers = ack
        .opts()
        .get(v4::OptionCode::Router)
        .and_then(|opt| {
            if let v4::DhcpOption::Router(routers) = opt {
                Some(routers.clone())
            } else {
                None
            }
        })
        .unwrap_or_default();
    let boot_file = ack
        .opts()
        .get(v4::OptionCode::BootfileName)
        .and_then(|opt| {
            if let v4::DhcpOption::BootfileName(name) = opt {
                Some(String::from_utf8_lossy(name).trim_end_matches('\0').to_string())
            } else {
                None
            }
        });
    let lease_time = ack
        .opts()
        .get(v4::OptionCode::AddressLeaseTime)
        .and_then(|opt| {
            if let v4::DhcpOption::AddressLeaseTime(secs) = opt {
                Some(*secs)
            } else {
                None
            }
        });

    Lease4 {
        link,
        ip: ack.yiaddr(),
        subnet_mask,
        routers,
        server_ip: v4_server_id(ack),
        boot_file,
        lease_time,
    }
}

// --- DHCPv6 ---

/// Stateless boot-parameter exchange: Information-Request asking for
/// the bootfile URL, answered by a Reply. Address assignment is left
/// to router advertisements.
async fn v6_round(link: &Link) -> Result<Lease> {
    let socket = v6_socket(link)?;
    let mac = link.mac_bytes()?;

    let mut msg = v6::Message::new(v6::MessageType::InformationRequest);
    // DUID-LL: type 3, hardware type 1 (ethernet)
    let mut duid = vec![0x00, 0x03, 0x00, 0x01];
    duid.extend_from_slice(&mac);
    msg.opts_mut().insert(v6::DhcpOption::ClientId(duid));
    msg.opts_mut().insert(v6::DhcpOption::ElapsedTime(0));
    msg.opts_mut().insert(v6::DhcpOption::ORO(v6::ORO {
        opts: vec![v6::OptionCode::OptBootfileUrl],
    }));
    let xid = msg.xid();

    let bytes = msg.to_vec().map_err(|e| DhcpError::Codec(e.to_string()))?;

    // All_DHCP_Relay_Agents_and_Servers, scoped to this link
    let dest = SocketAddrV6::new(
        "ff02::1:2".parse().expect("valid multicast address"),
        547,
        0,
        link.index,
    );
    socket
        .send_to(&bytes, SocketAddr::from(dest))
        .await
        .map_err(|e| DhcpError::Io {
            link: link.name.clone(),
            source: e,
        })?;

    let mut buf = vec![0u8; 1500];
    loop {
        let (len, _src) = socket.recv_from(&mut buf).await.map_err(|e| DhcpError::Io {
            link: link.name.clone(),
            source: e,
        })?;

        let reply = match v6::Message::from_bytes(&buf[..len]) {
            Ok(reply) => reply,
            Err(e) => {
                debug!(link = %link.name, error = %e, "ignoring unparseable DHCPv6 packet");
                continue;
            }
        };
        if reply.xid() != xid || reply.msg_type() != v6::MessageType::Reply {
            continue;
        }

        return Ok(Lease::V6(Lease6 {
            link: link.clone(),
            boot_url: v6_boot_url(&reply),
        }));
    }
}

/// OPT_BOOTFILE_URL (option 59) has no typed representation in
/// dhcproto; it decodes as an unknown option whose data is the URL.
fn v6_boot_url(reply: &v6::Message) -> Option<String> {
    reply
        .opts()
        .get(v6::OptionCode::OptBootfileUrl)
        .and_then(|opt| {
            if let v6::DhcpOption::Unknown(opt) = opt {
                Some(String::from_utf8_lossy(opt.data()).to_string())
            } else {
                None
            }
        })
}

fn v6_socket(link: &Link) -> Result<UdpSocket> {
    let setup = |e: std::io::Error| DhcpError::SocketSetup {
        link: link.name.clone(),
        source: e,
    };

    let socket = socket2::Socket::new(
        socket2::Domain::IPV6,
        socket2::Type::DGRAM,
        Some(socket2::Protocol::UDP),
    )
    .map_err(setup)?;

    socket.set_reuse_address(true).map_err(setup)?;
    socket
        .bind_device(Some(link.name.as_bytes()))
        .map_err(setup)?;

    let bind_addr = SocketAddrV6::new(std::net::Ipv6Addr::UNSPECIFIED, 546, 0, 0);
    socket.bind(&bind_addr.into()).map_err(setup)?;
    socket.set_nonblocking(true).map_err(setup)?;

    let std_socket: std::net::UdpSocket = socket.into();
    UdpSocket::from_std(std_socket).map_err(setup)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn test_link(name: &str) -> Link {
        Link {
            name: name.to_string(),
            index: 2,
            mac: "52:54:00:12:34:56".to_string(),
        }
    }

    fn ack_message(xid: u32) -> v4::Message {
        let mut msg = v4::Message::default();
        msg.set_opcode(v4::Opcode::BootReply);
        msg.set_xid(xid);
        msg.set_yiaddr(Ipv4Addr::new(192, 168, 0, 50));
        msg.set_siaddr(Ipv4Addr::new(192, 168, 0, 2));
        msg.opts_mut()
            .insert(v4::DhcpOption::MessageType(v4::MessageType::Ack));
        msg.opts_mut()
            .insert(v4::DhcpOption::SubnetMask(Ipv4Addr::new(255, 255, 255, 0)));
        msg.opts_mut()
            .insert(v4::DhcpOption::Router(vec![Ipv4Addr::new(192, 168, 0, 1)]));
        msg.opts_mut()
            .insert(v4::DhcpOption::BootfileName(b"pxelinux.0".to_vec()));
        msg.opts_mut()
            .insert(v4::DhcpOption::AddressLeaseTime(7200));
        msg
    }

    #[test]
    fn test_lease_from_ack() {
        let ack = ack_message(0xDEADBEEF);
        let lease = lease_from_ack(test_link("eth0"), &ack);

        assert_eq!(lease.ip, Ipv4Addr::new(192, 168, 0, 50));
        assert_eq!(lease.subnet_mask, Some(Ipv4Addr::new(255, 255, 255, 0)));
        assert_eq!(lease.routers, vec![Ipv4Addr::new(192, 168, 0, 1)]);
        assert_eq!(lease.server_ip, Some(Ipv4Addr::new(192, 168, 0, 2)));
        assert_eq!(lease.boot_file.as_deref(), Some("pxelinux.0"));
        assert_eq!(lease.lease_time, Some(7200));
    }

    #[test]
    fn test_server_id_prefers_option_over_siaddr() {
        let mut ack = ack_message(1);
        ack.opts_mut()
            .insert(v4::DhcpOption::ServerIdentifier(Ipv4Addr::new(10, 0, 0, 1)));
        assert_eq!(v4_server_id(&ack), Some(Ipv4Addr::new(10, 0, 0, 1)));

        let plain = ack_message(1);
        assert_eq!(v4_server_id(&plain), Some(Ipv4Addr::new(192, 168, 0, 2)));
    }

    #[test]
    fn test_discover_roundtrip() {
        let chaddr = [0x52, 0x54, 0x00, 0x12, 0x34, 0x56];
        let bytes = build_discover(&chaddr, 0x1234).unwrap();
        let msg = v4::Message::from_bytes(&bytes).unwrap();

        assert_eq!(msg.xid(), 0x1234);
        assert_eq!(v4_message_type(&msg), Some(v4::MessageType::Discover));
        assert_eq!(&msg.chaddr()[..6], &chaddr[..]);
    }

    #[test]
    fn test_request_carries_requested_ip() {
        let chaddr = [0x52, 0x54, 0x00, 0x12, 0x34, 0x56];
        let bytes = build_request(
            &chaddr,
            0x1234,
            Ipv4Addr::new(192, 168, 0, 50),
            Some(Ipv4Addr::new(192, 168, 0, 2)),
        )
        .unwrap();
        let msg = v4::Message::from_bytes(&bytes).unwrap();

        assert_eq!(v4_message_type(&msg), Some(v4::MessageType::Request));
        let requested = msg
            .opts()
            .get(v4::OptionCode::RequestedIpAddress)
            .and_then(|opt| {
                if let v4::DhcpOption::RequestedIpAddress(ip) = opt {
                    Some(*ip)
                } else {
                    None
                }
            });
        assert_eq!(requested, Some(Ipv4Addr::new(192, 168, 0, 50)));
    }

    #[test]
    fn test_v6_boot_url_from_reply() {
        let url = b"tftp://[2001:db8::1]/boot/pxelinux.0";
        // Reply (7), transaction id, then option 59 with the URL
        let mut bytes = vec![0x07, 0xAA, 0xBB, 0xCC];
        bytes.extend_from_slice(&[0x00, 0x3B]);
        bytes.extend_from_slice(&(url.len() as u16).to_be_bytes());
        bytes.extend_from_slice(url);

        let reply = v6::Message::from_bytes(&bytes).unwrap();
        assert_eq!(reply.msg_type(), v6::MessageType::Reply);
        assert_eq!(
            v6_boot_url(&reply).as_deref(),
            Some("tftp://[2001:db8::1]/boot/pxelinux.0")
        );
    }

    #[test]
    fn test_v6_boot_url_absent() {
        let bytes = vec![0x07, 0x01, 0x02, 0x03];
        let reply = v6::Message::from_bytes(&bytes).unwrap();
        assert_eq!(v6_boot_url(&reply), None);
    }

    #[tokio::test]
    async fn test_send_requests_empty_set_closes_channel() {
        let (_cancel_tx, cancel_rx) = watch::channel(false);
        let mut rx = send_requests(
            Vec::new(),
            Duration::from_millis(10),
            1,
            Protocols::default(),
            cancel_rx,
        );
        assert!(rx.recv().await.is_none());
    }

    #[tokio::test]
    async fn test_send_requests_cancelled_before_start() {
        let (cancel_tx, cancel_rx) = watch::channel(false);
        cancel_tx.send(true).unwrap();

        let links = vec![test_link("fake0"), test_link("fake1")];
        let mut rx = send_requests(
            links,
            Duration::from_millis(10),
            3,
            Protocols {
                ipv4: true,
                ipv6: false,
            },
            cancel_rx,
        );

        // Every spawned task reports exactly once, then the channel closes
        let mut results = Vec::new();
        while let Some(result) = rx.recv().await {
            results.push(result);
        }
        assert_eq!(results.len(), 2);
        for result in results {
            assert!(matches!(
                result.result,
                Err(DhcpError::Cancelled { .. })
            ));
        }
    }
}
