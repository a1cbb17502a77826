//! SocketCAN implementation of the CAN interface

// ---------------------------------------------------------------------------
// IMPORTS
// ---------------------------------------------------------------------------

use socketcan::{CanFrame, CanId, CanSocket, EmbeddedFrame, Socket};
use std::io;
use std::time::Duration;
use comms_if::eqpt::cybergear::Frame;

use super::{CanError, CanInterface};

// ---------------------------------------------------------------------------
// DATA STRUCTURES
// ---------------------------------------------------------------------------

/// A raw SocketCAN socket bound to one interface.
pub struct SocketCanInterface {
    socket: CanSocket,

    // Last timeouts set on the socket, to avoid a syscall per frame
    read_timeout: Option<Duration>,
    write_timeout: Option<Duration>
}

// ---------------------------------------------------------------------------
// IMPLEMENTATIONS
// ---------------------------------------------------------------------------

impl SocketCanInterface {
    /// Open the named interface, which must already be up at the bus bitrate.
    pub fn open(interface: &str) -> Result<Self, CanError> {
        let socket = CanSocket::open(interface)
            .map_err(|e| CanError::InterfaceOpen(interface.into(), e))?;

        Ok(Self {
            socket,
            read_timeout: None,
            write_timeout: None
        })
    }
}

impl CanInterface for SocketCanInterface {
    fn write_frame(&mut self, frame: &Frame, timeout: Duration) -> Result<(), CanError> {
        if self.write_timeout != Some(timeout) {
            self.socket.set_write_timeout(timeout).map_err(CanError::Io)?;
            self.write_timeout = Some(timeout);
        }

        let raw_id = frame.id.to_raw();
        let id = CanId::extended(raw_id).ok_or(CanError::InvalidId(raw_id))?;
        let can_frame = CanFrame::new(id, frame.payload())
            .ok_or(CanError::InvalidId(raw_id))?;

        self.socket.write_frame(&can_frame).map_err(|e| match e.kind() {
            io::ErrorKind::WouldBlock | io::ErrorKind::TimedOut => CanError::TransportBusy,
            _ => CanError::Io(e)
        })
    }

    fn read_frame(&mut self, timeout: Duration) -> Result<Option<Frame>, CanError> {
        if self.read_timeout != Some(timeout) {
            self.socket.set_read_timeout(timeout).map_err(CanError::Io)?;
            self.read_timeout = Some(timeout);
        }

        match self.socket.read_frame() {
            Ok(f) => match f.id() {
                socketcan::Id::Extended(id) => Ok(Some(Frame::from_raw(id.as_raw(), f.data()))),
                // The motor controllers only use extended IDs
                socketcan::Id::Standard(_) => Ok(None)
            },
            Err(e) => match e.kind() {
                io::ErrorKind::WouldBlock | io::ErrorKind::TimedOut => Ok(None),
                _ => Err(CanError::Io(e))
            }
        }
    }
}
