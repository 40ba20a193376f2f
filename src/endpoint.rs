use std::net::{SocketAddr, UdpSocket};
use std::time::Duration;

use rand::Rng;

use crate::error::Error;
use crate::packet::{Packet, MAX_PACKET_SIZE};

/// Upper bound (exclusive) for the initial sequence number draw, per
/// `spec.md` §3.
const ISN_MAX: u32 = 100_000;

/// Shared sender/receiver plumbing: the owned UDP socket, the peer address
/// once known, and initial-sequence-number selection. Per `spec.md` §9 this
/// is composed into `Sender`/`Receiver` rather than expressed as a base
/// class. RTT estimation and congestion control live on `SendWindow`
/// instead of here, since the transport is simplex — only the sender ever
/// needs them (see `DESIGN.md`).
#[derive(Debug)]
pub struct Endpoint {
    socket: UdpSocket,
    peer: Option<SocketAddr>,
}

impl Endpoint {
    pub fn bind(addr: SocketAddr) -> Result<Self, Error> {
        let socket = UdpSocket::bind(addr)?;
        Ok(Endpoint { socket, peer: None })
    }

    pub fn connect(peer: SocketAddr) -> Result<Self, Error> {
        let socket = UdpSocket::bind((std::net::Ipv4Addr::UNSPECIFIED, 0))?;
        Ok(Endpoint {
            socket,
            peer: Some(peer),
        })
    }

    pub fn local_addr(&self) -> Result<SocketAddr, Error> {
        Ok(self.socket.local_addr()?)
    }

    pub fn peer(&self) -> Option<SocketAddr> {
        self.peer
    }

    pub fn set_peer(&mut self, peer: SocketAddr) {
        self.peer = Some(peer);
    }

    /// Draws a uniform initial sequence number in `[0, 100000]`, per
    /// `spec.md` §3. Accepts an injectable RNG so tests can make it
    /// deterministic.
    pub fn random_isn<R: Rng + ?Sized>(rng: &mut R) -> u32 {
        rng.gen_range(0..=ISN_MAX)
    }

    pub fn send_to(&self, packet: &Packet, addr: SocketAddr) -> Result<(), Error> {
        self.socket.send_to(&packet.to_bytes(), addr)?;
        Ok(())
    }

    /// Sends to the connected peer. Panics (programmer error) if called
    /// before a peer address is known.
    pub fn send(&self, packet: &Packet) -> Result<(), Error> {
        let peer = self.peer.expect("send() called before peer address is known");
        self.send_to(packet, peer)
    }

    /// Blocks indefinitely for the next well-formed datagram, used only
    /// while a receiver is listening for an initial SYN (no peer, no
    /// deadline applies yet).
    pub fn recv_blocking(&self) -> Result<(Packet, SocketAddr), Error> {
        self.socket.set_read_timeout(None)?;
        let mut buf = [0u8; MAX_PACKET_SIZE];
        loop {
            let (n, addr) = self.socket.recv_from(&mut buf)?;
            if let Some(packet) = Packet::from_bytes(&buf[..n]) {
                return Ok((packet, addr));
            }
            log::debug!("dropped malformed datagram from {addr} ({n} bytes)");
        }
    }

    /// Bounded receive: the only place the core ever blocks, per `spec.md`
    /// §5. Returns `Ok(None)` on timeout, a decoded packet and its sender
    /// address otherwise. Malformed datagrams are dropped silently and the
    /// call keeps waiting out the remainder of `timeout`.
    pub fn recv_timeout(&self, timeout: Duration) -> Result<Option<(Packet, SocketAddr)>, Error> {
        self.socket.set_read_timeout(Some(timeout))?;
        let mut buf = [0u8; MAX_PACKET_SIZE];

        loop {
            match self.socket.recv_from(&mut buf) {
                Ok((n, addr)) => {
                    if let Some(packet) = Packet::from_bytes(&buf[..n]) {
                        return Ok(Some((packet, addr)));
                    }
                    log::debug!("dropped malformed datagram from {addr} ({n} bytes)");
                    continue;
                }
                Err(e)
                    if e.kind() == std::io::ErrorKind::WouldBlock
                        || e.kind() == std::io::ErrorKind::TimedOut =>
                {
                    return Ok(None);
                }
                Err(e) => return Err(e.into()),
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn isn_is_within_spec_bounds() {
        let mut rng = rand::thread_rng();
        for _ in 0..1000 {
            let isn = Endpoint::random_isn(&mut rng);
            assert!(isn <= ISN_MAX);
        }
    }

    #[test]
    fn recv_timeout_returns_none_when_nothing_arrives() {
        let ep = Endpoint::bind("127.0.0.1:0".parse().unwrap()).unwrap();
        let result = ep.recv_timeout(Duration::from_millis(20)).unwrap();
        assert!(result.is_none());
    }

    #[test]
    fn send_and_recv_round_trip_over_loopback() {
        use crate::packet::PacketType;

        let a = Endpoint::bind("127.0.0.1:0".parse().unwrap()).unwrap();
        let b = Endpoint::bind("127.0.0.1:0".parse().unwrap()).unwrap();
        let b_addr = b.local_addr().unwrap();

        let packet = Packet::new(1, 0, PacketType::Syn, 10, vec![]);
        a.send_to(&packet, b_addr).unwrap();

        let (received, _) = b.recv_timeout(Duration::from_millis(200)).unwrap().unwrap();
        assert_eq!(received.seq_num, 1);
        assert_eq!(received.kind, PacketType::Syn);
    }
}
