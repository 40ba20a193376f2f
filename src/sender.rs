use std::io::Read;
use std::net::SocketAddr;
use std::time::{Duration, Instant};

use crate::connection::{ConnectionState, HANDSHAKE_TIMEOUT};
use crate::endpoint::Endpoint;
use crate::error::Error;
use crate::packet::{Packet, PacketType, MAX_PAYLOAD_SIZE};
use crate::window::SendWindow;

const STATS_LOG_INTERVAL: Duration = Duration::from_secs(2);

/// Client side of the connection lifecycle: three-way handshake, the
/// steady-state send loop, and best-effort FIN teardown. Owns an `Endpoint`
/// and a `SendWindow`, per the composition note in `SPEC_FULL.md` §9.
#[derive(Debug)]
pub struct Sender {
    endpoint: Endpoint,
    peer: SocketAddr,
    window: SendWindow,
    state: ConnectionState,
    advertised_window: u16,
    bytes_sent: u64,
    started_at: Instant,
}

impl Sender {
    /// Performs the client side of the three-way handshake against `peer`.
    /// A single SYN is sent; any reply that isn't a SYN-typed "SYN-ACK" is
    /// ignored and the client keeps listening out the remainder of the
    /// handshake window (`spec.md` §7's "unexpected type during handshake").
    /// No reply inside `HANDSHAKE_TIMEOUT` surfaces `Error::HandshakeFailed`.
    pub fn connect(peer: SocketAddr, advertised_window: u16) -> Result<Self, Error> {
        let mut rng = rand::thread_rng();
        let isn = Endpoint::random_isn(&mut rng);
        let endpoint = Endpoint::connect(peer)?;

        let syn = Packet::new(isn, 0, PacketType::Syn, advertised_window, vec![]);
        log::info!("sending SYN to {peer} (isn={isn})");
        endpoint.send(&syn)?;

        let deadline = Instant::now() + HANDSHAKE_TIMEOUT;
        loop {
            let remaining = deadline.saturating_duration_since(Instant::now());
            if remaining.is_zero() {
                return Err(Error::HandshakeFailed {
                    addr: peer,
                    reason: "no reply to SYN within timeout".to_string(),
                });
            }

            let reply = endpoint.recv_timeout(remaining)?;
            let Some((packet, from)) = reply else {
                return Err(Error::HandshakeFailed {
                    addr: peer,
                    reason: "no reply to SYN within timeout".to_string(),
                });
            };

            if from != peer {
                log::debug!("ignoring handshake reply from unexpected peer {from}");
                continue;
            }

            if packet.kind != PacketType::Syn || packet.ack_num == 0 {
                log::debug!("ignoring unexpected segment during handshake: {packet}");
                continue;
            }

            let expected_seq = packet.seq_num.wrapping_add(1);
            let seq_after_handshake = isn.wrapping_add(1);

            let ack = Packet::new(seq_after_handshake, expected_seq, PacketType::Ack, advertised_window, vec![]);
            endpoint.send(&ack)?;

            log::info!("handshake complete with {peer}");

            return Ok(Sender {
                endpoint,
                peer,
                window: SendWindow::new(seq_after_handshake, packet.window),
                state: ConnectionState::Established,
                advertised_window,
                bytes_sent: 0,
                started_at: Instant::now(),
            });
        }
    }

    pub fn state(&self) -> ConnectionState {
        self.state
    }

    /// Drives `source` to completion: fills the window whenever there is
    /// room, processes ACKs, retransmits on timeout or fast retransmit, and
    /// returns once every byte has been cumulatively acknowledged.
    pub fn send_all<R: Read>(&mut self, mut source: R) -> Result<(), Error> {
        let mut eof = false;
        let mut last_stats_log = Instant::now();

        loop {
            while !eof && self.window.has_room() {
                let chunk = read_chunk(&mut source)?;
                if chunk.is_empty() {
                    eof = true;
                    break;
                }
                self.bytes_sent += chunk.len() as u64;
                let packet = self.window.fill_window(chunk, 0, self.advertised_window);
                self.endpoint.send(&packet)?;
            }

            if eof && self.window.is_fully_acked() {
                break;
            }

            if last_stats_log.elapsed() >= STATS_LOG_INTERVAL {
                self.log_stats();
                last_stats_log = Instant::now();
            }

            match self.endpoint.recv_timeout(self.window.recv_timeout())? {
                Some((packet, from)) if from == self.peer && packet.kind == PacketType::Ack => {
                    let outcome = self.window.on_ack(packet.ack_num, packet.window);
                    if outcome.fast_retransmit {
                        if let Some(p) = self.window.fast_retransmit(packet.ack_num, self.advertised_window) {
                            log::info!("fast retransmit seq={}", p.seq_num);
                            self.endpoint.send(&p)?;
                        }
                    }
                }
                Some((packet, _)) => {
                    log::debug!("ignoring unexpected segment in steady state: {packet}");
                }
                None => match self.window.on_timeout(0, self.advertised_window) {
                    Some(p) => {
                        log::warn!("timeout, retransmitting seq={}", p.seq_num);
                        self.endpoint.send(&p)?;
                    }
                    None => {
                        self.state = ConnectionState::Broken;
                        return Err(Error::ConnectionBroken(self.window.retransmissions()));
                    }
                },
            }
        }

        Ok(())
    }

    /// Best-effort FIN teardown: sends FIN, waits up to `HANDSHAKE_TIMEOUT`
    /// for a FIN reply, and closes regardless of whether one arrives.
    pub fn close(&mut self) -> Result<(), Error> {
        let fin = Packet::new(self.window.next_seq_to_send(), 0, PacketType::Fin, self.advertised_window, vec![]);
        self.endpoint.send(&fin)?;
        self.state = ConnectionState::FinSent;

        let deadline = Instant::now() + HANDSHAKE_TIMEOUT;
        loop {
            let remaining = deadline.saturating_duration_since(Instant::now());
            if remaining.is_zero() {
                log::warn!("no FIN reply from {}, closing anyway", self.peer);
                break;
            }
            match self.endpoint.recv_timeout(remaining)? {
                Some((packet, from)) if from == self.peer && packet.kind == PacketType::Fin => {
                    log::info!("received FIN-ACK from {}", self.peer);
                    break;
                }
                Some(_) => continue,
                None => {
                    log::warn!("no FIN reply from {}, closing anyway", self.peer);
                    break;
                }
            }
        }

        self.state = ConnectionState::Closed;
        self.log_stats();
        Ok(())
    }

    fn log_stats(&self) {
        log::info!(
            "bytes_sent={} packets_sent={} retransmissions={} cwnd={:.2} ssthresh={:.2} rto={:.3}s elapsed={:.1}s",
            self.bytes_sent,
            self.window.total_packets_sent(),
            self.window.retransmissions(),
            self.window.congestion().cwnd(),
            self.window.congestion().ssthresh(),
            self.window.recv_timeout().as_secs_f64(),
            self.started_at.elapsed().as_secs_f64(),
        );
    }
}

fn read_chunk<R: Read>(source: &mut R) -> Result<Vec<u8>, Error> {
    let mut buf = vec![0u8; MAX_PAYLOAD_SIZE];
    let mut filled = 0;

    while filled < buf.len() {
        match source.read(&mut buf[filled..])? {
            0 => break,
            n => filled += n,
        }
    }

    buf.truncate(filled);
    Ok(buf)
}

/// Draws a uniform loss/jitter-free synthetic payload of `len` bytes,
/// matching the original client's `--synthetic` mode used for throughput
/// testing without a source file.
pub fn synthetic_payload(len: usize) -> Vec<u8> {
    (0..len).map(|i| (i % 256) as u8).collect()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn read_chunk_stops_at_eof_with_partial_buffer() {
        let data = b"hello world";
        let mut cursor = std::io::Cursor::new(data);
        let chunk = read_chunk(&mut cursor).unwrap();
        assert_eq!(chunk, data);
    }

    #[test]
    fn read_chunk_returns_empty_at_eof() {
        let mut cursor = std::io::Cursor::new(&[][..]);
        let chunk = read_chunk(&mut cursor).unwrap();
        assert!(chunk.is_empty());
    }

    #[test]
    fn read_chunk_caps_at_max_payload_size() {
        let data = vec![7u8; MAX_PAYLOAD_SIZE + 500];
        let mut cursor = std::io::Cursor::new(&data[..]);
        let chunk = read_chunk(&mut cursor).unwrap();
        assert_eq!(chunk.len(), MAX_PAYLOAD_SIZE);
    }

    #[test]
    fn synthetic_payload_has_requested_length() {
        assert_eq!(synthetic_payload(2500).len(), 2500);
    }
}
