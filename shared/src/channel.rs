//! Per-connection delivery-class state machines.
//!
//! These are pure sequencing layers with no socket attached: the network
//! code on either side feeds inbound frames in and pulls outbound frames
//! out once per tick. Keeping them free of I/O makes the delivery
//! guarantees testable without touching the network.

use std::collections::{BTreeMap, VecDeque};
use std::time::{Duration, Instant};

/// Unreliable-sequenced class: frames may be lost, but a frame older than
/// one already accepted is never delivered.
#[derive(Debug, Default)]
pub struct SequencedChannel {
    next_out: u32,
    highest_in: Option<u32>,
}

impl SequencedChannel {
    pub fn new() -> Self {
        Self::default()
    }

    /// Stamps the next outbound frame. Strictly increasing.
    pub fn stamp(&mut self) -> u32 {
        let seq = self.next_out;
        self.next_out += 1;
        seq
    }

    /// Returns true if a frame with this sequence number should be applied,
    /// advancing the high-water mark. Stale or duplicate frames return false.
    pub fn accept(&mut self, seq: u32) -> bool {
        match self.highest_in {
            Some(highest) if seq <= highest => false,
            _ => {
                self.highest_in = Some(seq);
                true
            }
        }
    }
}

#[derive(Debug)]
struct PendingFrame {
    seq: u32,
    body: Vec<u8>,
    last_sent: Option<Instant>,
}

/// Reliable-ordered class: every frame is retransmitted until cumulatively
/// acknowledged and released to the application exactly once, in send order.
#[derive(Debug)]
pub struct ReliableChannel {
    next_out: u32,
    unacked: VecDeque<PendingFrame>,
    resend_interval: Duration,

    next_expected: u32,
    held: BTreeMap<u32, Vec<u8>>,
    ack_dirty: bool,
}

impl ReliableChannel {
    pub fn new(resend_interval: Duration) -> Self {
        Self {
            next_out: 0,
            unacked: VecDeque::new(),
            resend_interval,
            next_expected: 0,
            held: BTreeMap::new(),
            ack_dirty: false,
        }
    }

    /// Queues a frame for delivery and returns its sequence number. The
    /// frame goes on the wire at the next [`frames_to_send`] flush.
    ///
    /// [`frames_to_send`]: ReliableChannel::frames_to_send
    pub fn push(&mut self, body: Vec<u8>) -> u32 {
        let seq = self.next_out;
        self.next_out += 1;
        self.unacked.push_back(PendingFrame {
            seq,
            body,
            last_sent: None,
        });
        seq
    }

    /// Frames due for (re)transmission: anything never sent, plus anything
    /// unacknowledged for longer than the resend interval.
    pub fn frames_to_send(&mut self, now: Instant) -> Vec<(u32, Vec<u8>)> {
        let interval = self.resend_interval;
        self.unacked
            .iter_mut()
            .filter(|frame| match frame.last_sent {
                None => true,
                Some(sent) => now.duration_since(sent) >= interval,
            })
            .map(|frame| {
                frame.last_sent = Some(now);
                (frame.seq, frame.body.clone())
            })
            .collect()
    }

    /// Applies a cumulative acknowledgement covering every frame up to and
    /// including `upto`.
    pub fn on_ack(&mut self, upto: u32) {
        while let Some(front) = self.unacked.front() {
            if front.seq <= upto {
                self.unacked.pop_front();
            } else {
                break;
            }
        }
    }

    /// Accepts an inbound frame and returns every frame now deliverable to
    /// the application, in order. Duplicates deliver nothing but still mark
    /// an ack as pending so the peer stops retransmitting.
    pub fn on_frame(&mut self, seq: u32, body: Vec<u8>) -> Vec<Vec<u8>> {
        self.ack_dirty = true;

        if seq < self.next_expected {
            return Vec::new();
        }
        self.held.entry(seq).or_insert(body);

        let mut released = Vec::new();
        while let Some(body) = self.held.remove(&self.next_expected) {
            released.push(body);
            self.next_expected += 1;
        }
        released
    }

    /// Marks `seq` and everything before it as already delivered, owing the
    /// peer an ack. Used when a frame had to be consumed before this channel
    /// existed, so a retransmission of it is not re-released.
    pub fn mark_delivered(&mut self, seq: u32) {
        self.next_expected = self.next_expected.max(seq + 1);
        self.ack_dirty = true;
    }

    /// Takes the pending cumulative ack value, if an ack is owed and any
    /// frame has been released in order.
    pub fn take_ack(&mut self) -> Option<u32> {
        if self.ack_dirty && self.next_expected > 0 {
            self.ack_dirty = false;
            Some(self.next_expected - 1)
        } else {
            self.ack_dirty = false;
            None
        }
    }

    pub fn has_unacked(&self) -> bool {
        !self.unacked.is_empty()
    }
}
