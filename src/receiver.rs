use std::io::Write;
use std::net::SocketAddr;
use std::time::Instant;

use rand::RngCore;

use crate::connection::{ConnectionState, HANDSHAKE_TIMEOUT, IDLE_TIMEOUT};
use crate::endpoint::Endpoint;
use crate::error::Error;
use crate::packet::{Packet, PacketType};
use crate::window::ReceiveWindow;

/// Server side of the connection lifecycle: passive handshake, the
/// steady-state receive loop with reassembly and flow control, and passive
/// FIN teardown. Owns an `Endpoint` and a `ReceiveWindow`.
pub struct Receiver {
    endpoint: Endpoint,
    peer: SocketAddr,
    window: ReceiveWindow,
    state: ConnectionState,
    advertised_window: u16,
    rng: Box<dyn RngCore>,
}

impl Receiver {
    /// Binds `listen_addr` and blocks until a client completes the
    /// three-way handshake. `packet_loss_rate` is the constructor-injected
    /// drop probability resolved per `spec.md` §9 Open Question 4.
    pub fn accept(listen_addr: SocketAddr, packet_loss_rate: f64) -> Result<Self, Error> {
        Self::accept_with_rng(listen_addr, packet_loss_rate, Box::new(rand::thread_rng()))
    }

    /// Same as [`Receiver::accept`] but with an injectable RNG, for
    /// deterministic tests of the loss-simulation hook.
    pub fn accept_with_rng(
        listen_addr: SocketAddr,
        packet_loss_rate: f64,
        rng: Box<dyn RngCore>,
    ) -> Result<Self, Error> {
        Self::accept_inner(listen_addr, packet_loss_rate, rng, None)
    }

    /// Same as [`Receiver::accept`] but constrains the reassembly buffer to
    /// `max_window_size` maximum-sized segments, for exercising flow-control
    /// pressure in tests.
    pub fn accept_with_max_window(
        listen_addr: SocketAddr,
        packet_loss_rate: f64,
        max_window_size: u32,
    ) -> Result<Self, Error> {
        Self::accept_inner(listen_addr, packet_loss_rate, Box::new(rand::thread_rng()), Some(max_window_size))
    }

    fn accept_inner(
        listen_addr: SocketAddr,
        packet_loss_rate: f64,
        mut rng: Box<dyn RngCore>,
        max_window_size: Option<u32>,
    ) -> Result<Self, Error> {
        let mut endpoint = Endpoint::bind(listen_addr)?;
        let make_window = |expected_seq: u32| {
            let w = ReceiveWindow::new(expected_seq, packet_loss_rate);
            match max_window_size {
                Some(segments) => w.with_max_window_size(segments),
                None => w,
            }
        };

        loop {
            let (packet, from) = endpoint.recv_blocking()?;

            if packet.kind != PacketType::Syn || packet.ack_num != 0 {
                log::debug!("ignoring unexpected segment while listening: {packet}");
                continue;
            }

            let expected_seq = packet.seq_num.wrapping_add(1);
            let isn_s = Endpoint::random_isn(&mut *rng);
            let advertised_window = make_window(expected_seq).advertised_window();

            endpoint.set_peer(from);
            let syn_ack = Packet::new(isn_s, expected_seq, PacketType::Syn, advertised_window, vec![]);
            log::info!("received SYN from {from}, replying with SYN-ACK");
            endpoint.send(&syn_ack)?;

            let deadline = Instant::now() + HANDSHAKE_TIMEOUT;
            let established = loop {
                let remaining = deadline.saturating_duration_since(Instant::now());
                if remaining.is_zero() {
                    break false;
                }
                match endpoint.recv_timeout(remaining)? {
                    Some((reply, reply_from))
                        if reply_from == from
                            && reply.kind == PacketType::Ack
                            && reply.ack_num == isn_s.wrapping_add(1) =>
                    {
                        break true;
                    }
                    Some((other, _)) => {
                        log::debug!("ignoring unexpected segment during handshake: {other}");
                        continue;
                    }
                    None => break false,
                }
            };

            if !established {
                log::warn!("handshake with {from} timed out waiting for ACK, returning to listen");
                continue;
            }

            log::info!("handshake complete with {from}");

            return Ok(Receiver {
                endpoint,
                peer: from,
                window: make_window(expected_seq),
                state: ConnectionState::Established,
                advertised_window,
                rng,
            });
        }
    }

    pub fn state(&self) -> ConnectionState {
        self.state
    }

    /// Drives the steady-state receive loop, writing delivered bytes to
    /// `sink` and flushing after every delivered segment so partial results
    /// survive a crash. A FIN from the peer or a 30 s idle period both end
    /// the loop successfully; the latter is treated as an implicit FIN per
    /// `spec.md` §7.
    pub fn receive_all<W: Write>(&mut self, mut sink: W) -> Result<(), Error> {
        let started_at = Instant::now();

        loop {
            match self.endpoint.recv_timeout(IDLE_TIMEOUT)? {
                None => {
                    log::info!("idle for {IDLE_TIMEOUT:?}, closing as implicit FIN");
                    self.state = ConnectionState::Closed;
                    break;
                }
                Some((_packet, from)) if from != self.peer => {
                    log::debug!("dropping datagram from unexpected peer {from}");
                }
                Some((packet, _)) => match packet.kind {
                    PacketType::Data => {
                        if let Some(drop_outcome) = self.window.maybe_drop(&mut *self.rng) {
                            log::debug!("simulated loss of seq={}", packet.seq_num);
                            let ack = Packet::new(0, drop_outcome.ack_num, PacketType::Ack, drop_outcome.window, vec![]);
                            self.endpoint.send(&ack)?;
                            continue;
                        }

                        let outcome = self.window.on_data(&packet);
                        if !outcome.delivered.is_empty() {
                            sink.write_all(&outcome.delivered)?;
                            sink.flush()?;
                        }

                        let ack = Packet::new(0, outcome.ack_num, PacketType::Ack, outcome.window, vec![]);
                        self.endpoint.send(&ack)?;
                    }
                    PacketType::Fin => {
                        log::info!("received FIN from {}", self.peer);
                        let ack = Packet::new(
                            self.window.expected_seq_num(),
                            packet.seq_num.wrapping_add(1),
                            PacketType::Fin,
                            self.advertised_window,
                            vec![],
                        );
                        self.endpoint.send(&ack)?;
                        self.state = ConnectionState::Closed;
                        break;
                    }
                    _ => {
                        log::debug!("ignoring unexpected segment in steady state: {packet}");
                    }
                },
            }
        }

        log::info!(
            "transfer complete: bytes={} packets={} dropped={} out_of_order={} elapsed={:.1}s",
            self.window.total_bytes(),
            self.window.received_packets(),
            self.window.dropped_packets(),
            self.window.out_of_order_packets(),
            started_at.elapsed().as_secs_f64(),
        );

        Ok(())
    }
}
