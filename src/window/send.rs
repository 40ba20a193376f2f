use std::collections::BTreeMap;
use std::time::{Duration, Instant};

use crate::congestion::CongestionController;
use crate::packet::{Packet, PacketType, MAX_PAYLOAD_SIZE};
use crate::rtt::RttEstimator;

pub const MAX_RETRIES: u32 = 10;

/// One in-flight segment: enough to reconstruct the wire packet at
/// retransmit time without mutating the original in place, plus the
/// bookkeeping needed for RTT sampling and the retry count.
#[derive(Debug, Clone)]
struct SendEntry {
    seq_num: u32,
    kind: PacketType,
    payload: Vec<u8>,
    retries: u32,
    sent_at: Instant,
    /// Cleared on retransmission so a retransmitted segment's eventual ACK
    /// is never used as an RTT sample (Karn's rule).
    sample_eligible: bool,
}

/// Result of feeding an acknowledgment to the window.
#[derive(Debug, Default)]
pub struct AckOutcome {
    pub advanced: bool,
    pub fast_retransmit: bool,
}

/// The sender's cumulative-ACK sliding window: `base` is the oldest
/// unacknowledged byte, `next_seq_to_send` the next byte to assign. See
/// `spec.md` §3 for the buffer invariants this type must uphold at every
/// suspension point.
#[derive(Debug)]
pub struct SendWindow {
    base: u32,
    next_seq_to_send: u32,
    buffer: BTreeMap<u32, SendEntry>,
    receiver_window: u16,
    congestion: CongestionController,
    rtt: RttEstimator,
    deadline: Option<Instant>,
    retransmissions: u32,
    total_packets_sent: u32,
}

impl SendWindow {
    pub fn new(initial_seq: u32, initial_receiver_window: u16) -> Self {
        SendWindow {
            base: initial_seq,
            next_seq_to_send: initial_seq,
            buffer: BTreeMap::new(),
            receiver_window: initial_receiver_window,
            congestion: CongestionController::new(),
            rtt: RttEstimator::new(),
            deadline: None,
            retransmissions: 0,
            total_packets_sent: 0,
        }
    }

    pub fn base(&self) -> u32 {
        self.base
    }

    pub fn next_seq_to_send(&self) -> u32 {
        self.next_seq_to_send
    }

    pub fn is_fully_acked(&self) -> bool {
        self.base == self.next_seq_to_send
    }

    pub fn congestion(&self) -> &CongestionController {
        &self.congestion
    }

    pub fn rtt(&self) -> &RttEstimator {
        &self.rtt
    }

    pub fn retransmissions(&self) -> u32 {
        self.retransmissions
    }

    pub fn total_packets_sent(&self) -> u32 {
        self.total_packets_sent
    }

    pub fn packets_in_flight(&self) -> u32 {
        (self.next_seq_to_send.wrapping_sub(self.base)) / MAX_PAYLOAD_SIZE as u32
    }

    fn effective_window(&self) -> u32 {
        self.congestion.effective_window(self.receiver_window)
    }

    pub fn has_room(&self) -> bool {
        self.packets_in_flight() < self.effective_window()
    }

    pub fn recv_timeout(&self) -> Duration {
        self.rtt.timeout()
    }

    /// Next deadline at which the base segment should be retransmitted, or
    /// `None` if nothing is outstanding. This is the "timer" of §5: an
    /// emergent property of the bounded receive, not a scheduled callback.
    pub fn deadline(&self) -> Option<Instant> {
        self.deadline
    }

    /// Reads one MAX_PAYLOAD_SIZE chunk worth of data from `source` (if the
    /// window has room and bytes remain) and returns the packet to
    /// transmit. Arms the timer if this segment sits at `base`.
    pub fn fill_window(&mut self, chunk: Vec<u8>, ack_num: u32, window: u16) -> Packet {
        let seq_num = self.next_seq_to_send;
        let len = chunk.len() as u32;

        let now = Instant::now();
        self.buffer.insert(
            seq_num,
            SendEntry {
                seq_num,
                kind: PacketType::Data,
                payload: chunk.clone(),
                retries: 0,
                sent_at: now,
                sample_eligible: true,
            },
        );
        self.total_packets_sent += 1;
        self.next_seq_to_send = self.next_seq_to_send.wrapping_add(len);

        if self.base == seq_num {
            self.deadline = Some(now + self.rtt.timeout());
        }

        Packet::new(seq_num, ack_num, PacketType::Data, window, chunk)
    }

    /// Feeds a received ACK into the window: advances `base`, samples RTT
    /// from the segment that used to sit there, updates the congestion
    /// controller, and rearms or disarms the timer.
    pub fn on_ack(&mut self, ack_num: u32, receiver_window: u16) -> AckOutcome {
        self.receiver_window = receiver_window;

        if wrapping_gt(ack_num, self.base) {
            if let Some(oldest) = self.buffer.get(&self.base) {
                if oldest.sample_eligible {
                    let sample = Instant::now().duration_since(oldest.sent_at);
                    self.rtt.update(sample);
                }
            }

            self.buffer.retain(|&seq, _| !wrapping_lt(seq, ack_num));
            self.base = ack_num;

            let fast_retransmit = self.congestion.on_ack_received(ack_num);
            self.rearm_or_disarm();

            AckOutcome {
                advanced: true,
                fast_retransmit,
            }
        } else {
            let fast_retransmit = self.congestion.on_ack_received(ack_num);
            AckOutcome {
                advanced: false,
                fast_retransmit,
            }
        }
    }

    fn rearm_or_disarm(&mut self) {
        self.deadline = if self.base == self.next_seq_to_send {
            None
        } else {
            Some(Instant::now() + self.rtt.timeout())
        };
    }

    /// Refreshes the timestamp of the base segment, bumps its retry count,
    /// and returns the packet to retransmit with the caller's current
    /// advertised window written in. Returns `None` once MAX_RETRIES is
    /// exceeded (the caller should then declare the connection broken).
    pub fn on_timeout(&mut self, ack_num: u32, window: u16) -> Option<Packet> {
        self.congestion.on_timeout();

        let entry = self.buffer.get_mut(&self.base)?;

        if entry.retries >= MAX_RETRIES {
            return None;
        }

        entry.retries += 1;
        entry.sent_at = Instant::now();
        entry.sample_eligible = false;
        self.retransmissions += 1;

        let packet = Packet::new(entry.seq_num, ack_num, entry.kind, window, entry.payload.clone());

        self.deadline = Some(entry.sent_at + self.rtt.timeout());

        Some(packet)
    }

    /// Retransmits the base segment immediately (fast retransmit), without
    /// touching the retry counter or congestion state — the congestion
    /// controller was already updated by the triggering `on_ack`.
    pub fn fast_retransmit(&mut self, ack_num: u32, window: u16) -> Option<Packet> {
        let entry = self.buffer.get_mut(&self.base)?;
        entry.sample_eligible = false;
        self.retransmissions += 1;
        Some(Packet::new(entry.seq_num, ack_num, entry.kind, window, entry.payload.clone()))
    }
}

fn wrapping_lt(lhs: u32, rhs: u32) -> bool {
    lhs.wrapping_sub(rhs) > (1 << 31)
}

fn wrapping_gt(lhs: u32, rhs: u32) -> bool {
    wrapping_lt(rhs, lhs)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn invariant_base_le_every_key_lt_next_seq() {
        let mut w = SendWindow::new(100, 64);
        w.fill_window(vec![1; 10], 0, 64);
        w.fill_window(vec![2; 10], 0, 64);

        for &k in w.buffer.keys() {
            assert!(w.base() <= k);
            assert!(k < w.next_seq_to_send());
        }
    }

    #[test]
    fn fill_window_arms_timer_only_for_base_segment() {
        let mut w = SendWindow::new(0, 64);
        assert!(w.deadline().is_none());
        w.fill_window(vec![1; 5], 0, 64);
        assert!(w.deadline().is_some());
    }

    #[test]
    fn ack_advancing_base_frees_buffer_and_disarms_when_empty() {
        let mut w = SendWindow::new(0, 64);
        w.fill_window(vec![1; 5], 0, 64);
        let outcome = w.on_ack(5, 64);
        assert!(outcome.advanced);
        assert_eq!(w.base(), 5);
        assert!(w.is_fully_acked());
        assert!(w.deadline().is_none());
    }

    #[test]
    fn ack_rearms_timer_when_segments_remain() {
        let mut w = SendWindow::new(0, 64);
        w.fill_window(vec![1; 5], 0, 64);
        w.fill_window(vec![2; 5], 0, 64);
        w.on_ack(5, 64);
        assert!(w.deadline().is_some());
        assert_eq!(w.base(), 5);
    }

    #[test]
    fn duplicate_ack_does_not_move_base() {
        let mut w = SendWindow::new(0, 64);
        w.fill_window(vec![1; 5], 0, 64);
        w.on_ack(0, 64); // a==last_ack(0) initially is not > base unless base<ack
        assert_eq!(w.base(), 0);
    }

    #[test]
    fn third_duplicate_ack_signals_fast_retransmit() {
        let mut w = SendWindow::new(0, 64);
        w.fill_window(vec![1; 5], 0, 64);
        w.fill_window(vec![2; 5], 0, 64);
        w.on_ack(5, 64); // advances base to 5, last_ack becomes 5
        assert!(!w.on_ack(5, 64).fast_retransmit);
        assert!(!w.on_ack(5, 64).fast_retransmit);
        assert!(w.on_ack(5, 64).fast_retransmit);
    }

    #[test]
    fn timeout_retransmits_base_and_increments_retry_count() {
        let mut w = SendWindow::new(0, 64);
        w.fill_window(vec![1; 5], 0, 64);
        let p = w.on_timeout(0, 64).unwrap();
        assert_eq!(p.seq_num, 0);
        assert_eq!(p.payload, vec![1; 5]);
        assert_eq!(w.buffer[&0].retries, 1);
    }

    #[test]
    fn timeout_preserves_seq_and_payload_but_refreshes_window() {
        let mut w = SendWindow::new(0, 64);
        w.fill_window(vec![9; 3], 0, 1);
        let p = w.on_timeout(0, 42).unwrap();
        assert_eq!(p.window, 42);
        assert_eq!(p.seq_num, 0);
        assert_eq!(p.payload, vec![9; 3]);
    }

    #[test]
    fn exceeding_max_retries_returns_none() {
        let mut w = SendWindow::new(0, 64);
        w.fill_window(vec![1; 5], 0, 64);
        for _ in 0..MAX_RETRIES {
            assert!(w.on_timeout(0, 64).is_some());
        }
        assert!(w.on_timeout(0, 64).is_none());
    }

    #[test]
    fn retransmitted_segment_is_not_rtt_sample_eligible() {
        let mut w = SendWindow::new(0, 64);
        w.fill_window(vec![1; 5], 0, 64);
        w.on_timeout(0, 64);
        assert!(!w.buffer[&0].sample_eligible);
    }

    #[test]
    fn packets_in_flight_uses_floor_division() {
        let mut w = SendWindow::new(0, 64);
        w.fill_window(vec![1; MAX_PAYLOAD_SIZE], 0, 64);
        w.fill_window(vec![1; 30], 0, 64); // short tail segment
        // (MAX_PAYLOAD_SIZE + 30) / MAX_PAYLOAD_SIZE == 1, undercounts the tail by design.
        assert_eq!(w.packets_in_flight(), 1);
    }
}
