use std::collections::BTreeMap;

use rand::Rng;

use crate::packet::{Packet, PacketType, MAX_PAYLOAD_SIZE};

/// Receiver's default flow-control buffer, in maximum-sized segments.
pub const DEFAULT_MAX_WINDOW_SIZE: u32 = 64;

/// Outcome of feeding a DATA packet to the window: bytes newly delivered to
/// the application (in order) and the cumulative ACK to send back.
#[derive(Debug, Default)]
pub struct DeliverOutcome {
    pub delivered: Vec<u8>,
    pub ack_num: u32,
    pub window: u16,
}

/// The receiver's out-of-order reassembly buffer plus in-order delivery
/// state. See `spec.md` §3 for the buffer invariants.
pub struct ReceiveWindow {
    expected_seq_num: u32,
    buffer: BTreeMap<u32, Vec<u8>>,
    max_window_size: u32,
    pending_handoff: usize,
    packet_loss_rate: f64,
    received_packets: u32,
    dropped_packets: u32,
    out_of_order_packets: u32,
    total_bytes: u64,
}

impl ReceiveWindow {
    pub fn new(expected_seq_num: u32, packet_loss_rate: f64) -> Self {
        ReceiveWindow {
            expected_seq_num,
            buffer: BTreeMap::new(),
            max_window_size: DEFAULT_MAX_WINDOW_SIZE,
            pending_handoff: 0,
            packet_loss_rate,
            received_packets: 0,
            dropped_packets: 0,
            out_of_order_packets: 0,
            total_bytes: 0,
        }
    }

    pub fn with_max_window_size(mut self, segments: u32) -> Self {
        self.max_window_size = segments;
        self
    }

    pub fn expected_seq_num(&self) -> u32 {
        self.expected_seq_num
    }

    pub fn received_packets(&self) -> u32 {
        self.received_packets
    }

    pub fn dropped_packets(&self) -> u32 {
        self.dropped_packets
    }

    pub fn out_of_order_packets(&self) -> u32 {
        self.out_of_order_packets
    }

    pub fn total_bytes(&self) -> u64 {
        self.total_bytes
    }

    fn buffer_usage(&self) -> usize {
        self.buffer.values().map(|v| v.len()).sum::<usize>() + self.pending_handoff
    }

    /// Advertised window in segments: `max(1, floor((capacity - usage) / MAX_PAYLOAD_SIZE))`.
    pub fn advertised_window(&self) -> u16 {
        let capacity = self.max_window_size as usize * MAX_PAYLOAD_SIZE;
        let usage = self.buffer_usage();
        let available = capacity.saturating_sub(usage);
        (available / MAX_PAYLOAD_SIZE).max(1) as u16
    }

    /// Draws the loss-simulation probability and, if the packet is to be
    /// dropped, returns the duplicate-ACK response the caller should send
    /// instead of processing it.
    pub fn maybe_drop<R: Rng + ?Sized>(&mut self, rng: &mut R) -> Option<DeliverOutcome> {
        if self.packet_loss_rate > 0.0 && rng.gen::<f64>() < self.packet_loss_rate {
            self.dropped_packets += 1;
            Some(DeliverOutcome {
                delivered: Vec::new(),
                ack_num: self.expected_seq_num,
                window: self.advertised_window(),
            })
        } else {
            None
        }
    }

    /// Processes one DATA packet per §4.5: delivers in-order bytes
    /// (draining any now-contiguous buffered segments), buffers
    /// out-of-order arrivals, or discards stale retransmissions. Always
    /// returns the cumulative ACK to send.
    pub fn on_data(&mut self, packet: &Packet) -> DeliverOutcome {
        debug_assert_eq!(packet.kind, PacketType::Data);
        self.received_packets += 1;

        let mut delivered = Vec::new();

        if packet.seq_num == self.expected_seq_num {
            delivered.extend_from_slice(&packet.payload);
            self.total_bytes += packet.payload.len() as u64;
            self.expected_seq_num = self.expected_seq_num.wrapping_add(packet.payload.len() as u32);

            while let Some(buffered) = self.buffer.remove(&self.expected_seq_num) {
                self.total_bytes += buffered.len() as u64;
                self.expected_seq_num = self.expected_seq_num.wrapping_add(buffered.len() as u32);
                delivered.extend_from_slice(&buffered);
            }
        } else if wrapping_gt(packet.seq_num, self.expected_seq_num) {
            self.out_of_order_packets += 1;
            self.buffer.entry(packet.seq_num).or_insert_with(|| packet.payload.clone());
        }
        // seq < expected: stale retransmission, discarded silently.

        DeliverOutcome {
            delivered,
            ack_num: self.expected_seq_num,
            window: self.advertised_window(),
        }
    }
}

fn wrapping_lt(lhs: u32, rhs: u32) -> bool {
    lhs.wrapping_sub(rhs) > (1 << 31)
}

fn wrapping_gt(lhs: u32, rhs: u32) -> bool {
    wrapping_lt(rhs, lhs)
}
