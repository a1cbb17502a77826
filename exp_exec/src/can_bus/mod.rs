//! # CAN Bus
//!
//! One bidirectional link shared by both motor controllers. The bus is owned by the motor worker,
//! the only thread which ever issues CAN traffic, so no locking is needed.
//!
//! Before every request the inbound queue is drained of stale command responses so that a late
//! reply from one motor is never mistaken for the reply of another. Telemetry found while draining
//! is kept as the latest telemetry of its motor rather than thrown away.

// ---------------------------------------------------------------------------
// MODULES
// ---------------------------------------------------------------------------

mod params;
#[cfg(target_os = "linux")]
mod socket;

// ---------------------------------------------------------------------------
// IMPORTS
// ---------------------------------------------------------------------------

use log::{trace, warn};
use serde::Serialize;
use std::collections::HashMap;
use std::time::{Duration, Instant};
use comms_if::eqpt::cybergear::{Frame, FrameError, Telemetry};

pub use params::*;
#[cfg(target_os = "linux")]
pub use socket::SocketCanInterface;

// ---------------------------------------------------------------------------
// TRAITS
// ---------------------------------------------------------------------------

/// A raw link to the bus.
pub trait CanInterface: Send {
    /// Write a frame, blocking for at most `timeout`.
    ///
    /// Fails with `CanError::TransportBusy` if the frame could not be queued in time.
    fn write_frame(&mut self, frame: &Frame, timeout: Duration) -> Result<(), CanError>;

    /// Read a frame, blocking for at most `timeout`. `Ok(None)` if nothing arrived.
    fn read_frame(&mut self, timeout: Duration) -> Result<Option<Frame>, CanError>;
}

// ---------------------------------------------------------------------------
// DATA STRUCTURES
// ---------------------------------------------------------------------------

/// The shared motor bus.
pub struct CanBus {
    iface: Box<dyn CanInterface>,

    params: Params,

    stats: BusStats,

    /// Most recent telemetry received from each motor
    latest: HashMap<u8, Telemetry>
}

/// Traffic counters for the bus.
#[derive(Debug, Default, Clone, Copy, Serialize)]
pub struct BusStats {
    pub frames_sent: u64,

    pub frames_received: u64,

    pub telemetry_frames: u64,

    /// Stale command responses removed by draining
    pub drained_frames: u64,

    /// Frames rejected for a payload too short to decode
    pub rejected_frames: u64,

    /// Sends which timed out
    pub busy_sends: u64
}

// ---------------------------------------------------------------------------
// ENUMERATIONS
// ---------------------------------------------------------------------------

#[derive(Debug, thiserror::Error)]
pub enum CanError {
    #[error("The bus did not accept the frame within the send timeout")]
    TransportBusy,

    #[error("No telemetry from motor {0} within the receive timeout")]
    NoResponse(u8),

    #[error("Cannot open CAN interface {0}: {1}")]
    InterfaceOpen(String, std::io::Error),

    #[error("ID {0:#x} is not a valid extended CAN ID")]
    InvalidId(u32),

    #[error("Bad frame: {0}")]
    BadFrame(FrameError),

    #[error("CAN I/O error: {0}")]
    Io(std::io::Error)
}

// ---------------------------------------------------------------------------
// IMPLEMENTATIONS
// ---------------------------------------------------------------------------

impl CanBus {
    pub fn new(iface: Box<dyn CanInterface>, params: Params) -> Self {
        Self {
            iface,
            params,
            stats: BusStats::default(),
            latest: HashMap::new()
        }
    }

    /// CAN ID of this computer.
    pub fn host_id(&self) -> u8 {
        self.params.host_id
    }

    pub fn stats(&self) -> BusStats {
        self.stats
    }

    /// Most recent telemetry seen from the given motor, from any exchange.
    pub fn latest_telemetry(&self, motor_id: u8) -> Option<&Telemetry> {
        self.latest.get(&motor_id)
    }

    /// Send a single frame, never blocking longer than the send timeout.
    ///
    /// The bus does not retry, a `TransportBusy` error is for the caller to handle.
    pub fn send_frame(&mut self, frame: &Frame) -> Result<(), CanError> {
        match self.iface.write_frame(frame, self.params.send_timeout()) {
            Ok(()) => {
                self.stats.frames_sent += 1;
                trace!("CAN tx {:#010x} {:02x?}", frame.id.to_raw(), frame.payload());
                Ok(())
            },
            Err(CanError::TransportBusy) => {
                self.stats.busy_sends += 1;
                Err(CanError::TransportBusy)
            },
            Err(e) => Err(e)
        }
    }

    /// Receive the next well formed frame, waiting for at most `timeout`.
    ///
    /// Telemetry frames with a short payload are rejected and counted, telemetry which decodes
    /// updates the latest telemetry of its motor.
    pub fn recv_frame(&mut self, timeout: Duration) -> Result<Option<Frame>, CanError> {
        let deadline = Instant::now() + timeout;

        loop {
            let remaining = deadline.saturating_duration_since(Instant::now());
            if remaining == Duration::from_secs(0) {
                return Ok(None)
            }

            let frame = match self.iface.read_frame(remaining)? {
                Some(f) => f,
                None => return Ok(None)
            };
            self.stats.frames_received += 1;

            if frame.id.is_telemetry() {
                match Telemetry::from_frame(&frame) {
                    Ok(tm) => {
                        self.stats.telemetry_frames += 1;
                        self.latest.insert(tm.motor_id, tm);
                    },
                    Err(e) => {
                        self.stats.rejected_frames += 1;
                        trace!("Rejected CAN frame {:#010x}: {}", frame.id.to_raw(), e);
                        continue
                    }
                }
            }

            return Ok(Some(frame))
        }
    }

    /// Remove everything currently waiting in the inbound queue.
    ///
    /// Returns the number of stale command responses removed. Telemetry is kept as the latest
    /// telemetry of its motor and is not counted as drained.
    pub fn drain(&mut self) -> Result<usize, CanError> {
        let mut drained = 0;

        for _ in 0..self.params.max_drain_frames {
            match self.recv_frame(self.params.drain_timeout())? {
                Some(f) if !f.id.is_telemetry() => {
                    drained += 1;
                    self.stats.drained_frames += 1;
                },
                Some(_) => (),
                None => return Ok(drained)
            }
        }

        warn!(
            "CAN inbound queue still not empty after {} frames",
            self.params.max_drain_frames
        );
        Ok(drained)
    }

    /// Send a request to a motor and wait for its telemetry reply.
    ///
    /// Telemetry from other motors received while waiting is kept, not returned.
    pub fn request(&mut self, frame: &Frame, motor_id: u8) -> Result<Telemetry, CanError> {
        self.drain()?;
        self.send_frame(frame)?;

        let deadline = Instant::now() + self.params.recv_timeout();

        loop {
            let remaining = deadline.saturating_duration_since(Instant::now());

            match self.recv_frame(remaining)? {
                Some(f) if f.id.is_telemetry() && f.id.source_motor() == motor_id => {
                    return Telemetry::from_frame(&f).map_err(CanError::BadFrame)
                },
                Some(_) => continue,
                None => return Err(CanError::NoResponse(motor_id))
            }
        }
    }
}

// ---------------------------------------------------------------------------
// TESTS
// ---------------------------------------------------------------------------

#[cfg(test)]
mod test {
    use super::*;
    use comms_if::eqpt::cybergear::{ArbitrationId, CmdMode, HOST_ID};
    use std::collections::VecDeque;
    use std::sync::{Arc, Mutex};

    /// An interface replaying a fixed queue of inbound frames, recording everything sent.
    #[derive(Clone, Default)]
    struct Scripted {
        inbound: Arc<Mutex<VecDeque<Frame>>>,
        sent: Arc<Mutex<Vec<Frame>>>,
        busy: bool,
        // Frames pushed to inbound after each send
        replies: Arc<Mutex<VecDeque<Frame>>>
    }

    impl CanInterface for Scripted {
        fn write_frame(&mut self, frame: &Frame, _: Duration) -> Result<(), CanError> {
            if self.busy {
                return Err(CanError::TransportBusy)
            }
            self.sent.lock().unwrap().push(*frame);
            if let Some(r) = self.replies.lock().unwrap().pop_front() {
                self.inbound.lock().unwrap().push_back(r);
            }
            Ok(())
        }

        fn read_frame(&mut self, _: Duration) -> Result<Option<Frame>, CanError> {
            Ok(self.inbound.lock().unwrap().pop_front())
        }
    }

    fn telemetry(motor_id: u8, position_rad: f64) -> Frame {
        Telemetry {
            motor_id,
            position_rad,
            velocity_rads: 0.0,
            torque_nm: 0.0,
            temperature_c: 30.0,
            faults: 0
        }.to_frame(HOST_ID)
    }

    #[test]
    fn test_request_skips_stale_and_foreign_frames() {
        let iface = Scripted::default();

        // A stale parameter response and a telemetry frame from motor 2 are waiting
        iface.inbound.lock().unwrap().push_back(Frame::new(
            ArbitrationId::new(CmdMode::ParamRead, 1, HOST_ID), &[0; 8]
        ));
        iface.inbound.lock().unwrap().push_back(telemetry(2, -0.5));

        // Motor 1 replies to the request
        iface.replies.lock().unwrap().push_back(telemetry(1, 0.25));

        let mut bus = CanBus::new(Box::new(iface.clone()), Params::default());
        let tm = bus.request(&Frame::feedback_request(1, HOST_ID), 1).unwrap();

        assert_eq!(tm.motor_id, 1);
        assert!((tm.position_rad - 0.25).abs() < 1e-3);

        // Stale response drained, motor 2 telemetry kept
        let stats = bus.stats();
        assert_eq!(stats.drained_frames, 1);
        assert_eq!(stats.telemetry_frames, 2);
        assert!((bus.latest_telemetry(2).unwrap().position_rad + 0.5).abs() < 1e-3);
        assert_eq!(iface.sent.lock().unwrap().len(), 1);
    }

    #[test]
    fn test_short_frames_rejected() {
        let iface = Scripted::default();
        iface.replies.lock().unwrap().push_back(Frame::from_raw(
            (2 << 24) | (1 << 8) | HOST_ID as u32, &[0x80, 0x00]
        ));

        let mut bus = CanBus::new(Box::new(iface), Params::default());

        assert!(matches!(
            bus.request(&Frame::feedback_request(1, HOST_ID), 1),
            Err(CanError::NoResponse(1))
        ));
        assert_eq!(bus.stats().rejected_frames, 1);
        assert!(bus.latest_telemetry(1).is_none());
    }

    #[test]
    fn test_busy_send() {
        let iface = Scripted {
            busy: true,
            ..Default::default()
        };
        let mut bus = CanBus::new(Box::new(iface), Params::default());

        assert!(matches!(
            bus.send_frame(&Frame::enable(1, HOST_ID)),
            Err(CanError::TransportBusy)
        ));
        assert_eq!(bus.stats().busy_sends, 1);
        assert_eq!(bus.stats().frames_sent, 0);
    }
}
