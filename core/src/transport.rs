//! Stop-and-wait ARQ over a half-duplex audio link.
//!
//! The transport owns the 8-bit send sequence counter and drives two
//! callables the session wires up: one that modulates and plays a frame,
//! one that captures and demodulates the next frame within a deadline.
//! Every data frame is retried on timeout or NACK up to the retry budget,
//! then the last cause surfaces as `RetriesExhausted`.

use crate::error::{ModemError, Result};
use crate::framing::{Frame, FrameType};
use crate::host::Clock;
use std::fmt;
use std::time::Duration;
use tracing::{debug, warn};

/// How long the sender waits for an ACK before retransmitting.
pub const ACK_TIMEOUT: Duration = Duration::from_millis(500);
/// Retransmissions after the first attempt.
pub const MAX_RETRIES: u32 = 3;
/// Half-duplex turnaround: the gap between finishing a receive and keying
/// the transmitter.
pub const TURNAROUND: Duration = Duration::from_millis(50);

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum TransportState {
    Idle,
    Sending,
    WaitingAck,
    Receiving,
}

impl fmt::Display for TransportState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            TransportState::Idle => write!(f, "IDLE"),
            TransportState::Sending => write!(f, "SENDING"),
            TransportState::WaitingAck => write!(f, "WAITING_ACK"),
            TransportState::Receiving => write!(f, "RECEIVING"),
        }
    }
}

/// Delivery counters for diagnostics.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub struct TransportStats {
    pub frames_sent: u64,
    pub frames_received: u64,
    pub retries: u64,
    pub errors: u64,
}

pub struct Transport<S, R, C> {
    send_frame: S,
    recv_frame: R,
    clock: C,
    state: TransportState,
    seq: u8,
    stats: TransportStats,
    on_state_change: Option<Box<dyn FnMut(TransportState)>>,
}

impl<S, R, C> Transport<S, R, C>
where
    S: FnMut(&Frame) -> Result<()>,
    R: FnMut(Duration) -> Result<Frame>,
    C: Clock,
{
    pub fn new(send_frame: S, recv_frame: R, clock: C) -> Self {
        Self {
            send_frame,
            recv_frame,
            clock,
            state: TransportState::Idle,
            seq: 0,
            stats: TransportStats::default(),
            on_state_change: None,
        }
    }

    /// Observe state transitions (UI progress, tests).
    pub fn set_state_observer(&mut self, observer: Box<dyn FnMut(TransportState)>) {
        self.on_state_change = Some(observer);
    }

    pub fn state(&self) -> TransportState {
        self.state
    }

    pub fn stats(&self) -> TransportStats {
        self.stats
    }

    /// Send one frame reliably: transmit, wait for a matching ACK, retry on
    /// timeout or NACK. The frame goes out with the transport's current
    /// sequence number regardless of what the caller put in `seq`.
    pub fn send(&mut self, frame: Frame) -> Result<()> {
        let frame = Frame {
            seq: self.seq,
            ..frame
        };

        let mut last_cause = ModemError::Timeout;

        for attempt in 0..=MAX_RETRIES {
            if attempt > 0 {
                warn!(
                    attempt,
                    max = MAX_RETRIES,
                    seq = frame.seq,
                    frame_type = %frame.frame_type,
                    "retransmitting"
                );
                self.stats.retries += 1;
            }

            self.set_state(TransportState::Sending);
            (self.send_frame)(&frame)?;
            self.stats.frames_sent += 1;

            self.clock.sleep(TURNAROUND);
            self.set_state(TransportState::WaitingAck);

            match (self.recv_frame)(ACK_TIMEOUT) {
                Ok(reply) if reply.frame_type == FrameType::Ack && reply.seq == frame.seq => {
                    self.seq = self.seq.wrapping_add(1);
                    self.set_state(TransportState::Idle);
                    return Ok(());
                }
                Ok(reply) if reply.frame_type == FrameType::Nack => {
                    debug!(seq = frame.seq, "NACK received");
                    last_cause = ModemError::CrcMismatch;
                }
                Ok(reply) => {
                    debug!(
                        got = %reply.frame_type,
                        got_seq = reply.seq,
                        want_seq = frame.seq,
                        "unexpected reply while waiting for ACK"
                    );
                    last_cause = ModemError::Timeout;
                }
                Err(e) => {
                    debug!(seq = frame.seq, error = %e, "no ACK");
                    last_cause = e;
                }
            }
        }

        self.stats.errors += 1;
        self.set_state(TransportState::Idle);
        Err(ModemError::RetriesExhausted {
            last: Box::new(last_cause),
        })
    }

    /// Wait for one frame, acknowledge it after the turnaround gap, and
    /// hand it to the caller.
    pub fn receive(&mut self, timeout: Duration) -> Result<Frame> {
        self.set_state(TransportState::Receiving);

        let frame = match (self.recv_frame)(timeout) {
            Ok(frame) => frame,
            Err(e) => {
                self.set_state(TransportState::Idle);
                return Err(e);
            }
        };
        self.stats.frames_received += 1;

        self.clock.sleep(TURNAROUND);
        self.set_state(TransportState::Sending);

        let ack = Frame::ack(frame.seq);
        if let Err(e) = (self.send_frame)(&ack) {
            warn!(seq = frame.seq, error = %e, "failed to send ACK");
        }

        self.set_state(TransportState::Idle);
        Ok(frame)
    }

    /// Fire-and-forget send without ARQ, for simple control exchanges.
    pub fn send_unacknowledged(&mut self, frame: &Frame) -> Result<()> {
        self.set_state(TransportState::Sending);
        let result = (self.send_frame)(frame);
        if result.is_ok() {
            self.stats.frames_sent += 1;
        }
        self.set_state(TransportState::Idle);
        result
    }

    /// Initiator half of connectivity verification: PING out, PONG back
    /// within twice the ACK timeout.
    pub fn handshake(&mut self) -> Result<()> {
        (self.send_frame)(&Frame::ping())?;
        self.stats.frames_sent += 1;

        self.clock.sleep(TURNAROUND);

        let reply = (self.recv_frame)(2 * ACK_TIMEOUT)?;
        if reply.frame_type != FrameType::Pong {
            return Err(ModemError::Format(format!(
                "expected PONG, got {}",
                reply.frame_type
            )));
        }
        debug!("handshake complete");
        Ok(())
    }

    /// Responder half: wait for a PING within the caller's deadline, reply
    /// PONG after the turnaround gap.
    pub fn wait_for_handshake(&mut self, timeout: Duration) -> Result<()> {
        let frame = (self.recv_frame)(timeout)?;
        if frame.frame_type != FrameType::Ping {
            return Err(ModemError::Format(format!(
                "expected PING, got {}",
                frame.frame_type
            )));
        }
        self.stats.frames_received += 1;

        self.clock.sleep(TURNAROUND);
        (self.send_frame)(&Frame::pong())?;
        self.stats.frames_sent += 1;
        debug!("handshake answered");
        Ok(())
    }

    /// Drop all progress: state, sequence number and counters.
    pub fn reset(&mut self) {
        self.state = TransportState::Idle;
        self.seq = 0;
        self.stats = TransportStats::default();
    }

    fn set_state(&mut self, state: TransportState) {
        self.state = state;
        if let Some(observer) = self.on_state_change.as_mut() {
            observer(state);
        }
    }
}
