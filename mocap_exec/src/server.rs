//! # Motion Capture Server
//!
//! Serves one client at a time. Each client drives captures with `setup`, `start` and `get_data`
//! requests, every request getting a status in reply. A status starting with `error` reports a
//! rejected request, the connection stays open.

// ------------------------------------------------------------------------------------------------
// IMPORTS
// ------------------------------------------------------------------------------------------------

use comms_if::{
    eqpt::mocap::{self, FramingError, MocapRequest, MocapStatus},
    net::{self, NetError, StreamOptions}
};
use log::{info, warn};
use std::net::{SocketAddr, TcpListener, TcpStream};

use crate::capture::{Capture, CaptureError, CaptureSource};
use crate::params::MocapExecParams;

// ------------------------------------------------------------------------------------------------
// STRUCTS
// ------------------------------------------------------------------------------------------------

pub struct MocapServer {
    listener: TcpListener,

    params: MocapExecParams
}

/// What happened while serving one client.
#[derive(Debug, Default, Clone, Copy, PartialEq, Eq)]
pub struct ClientStats {
    pub requests: usize,

    pub captures: usize,

    pub rejected: usize
}

/// Progress of the current capture.
enum Session {
    Idle,
    SetUp(Capture),
    Recorded(Capture)
}

// ------------------------------------------------------------------------------------------------
// ENUMS
// ------------------------------------------------------------------------------------------------

#[derive(Debug, thiserror::Error)]
pub enum MocapServerError {
    #[error("Network error: {0}")]
    Net(NetError),

    #[error("Cannot accept a client: {0}")]
    Accept(std::io::Error),

    #[error("Protocol error: {0}")]
    Protocol(FramingError),

    #[error("Capture failed: {0}")]
    Capture(CaptureError)
}

// ------------------------------------------------------------------------------------------------
// IMPLS
// ------------------------------------------------------------------------------------------------

impl MocapServer {
    /// Bind the server, clients are accepted by `serve_client`.
    pub fn new(params: &MocapExecParams) -> Result<Self, MocapServerError> {
        let listener = net::bind(&params.endpoint).map_err(MocapServerError::Net)?;

        Ok(Self {
            listener,
            params: params.clone()
        })
    }

    pub fn local_addr(&self) -> Result<SocketAddr, MocapServerError> {
        self.listener.local_addr().map_err(MocapServerError::Accept)
    }

    /// Wait for a client and serve it until it disconnects.
    pub fn serve_client<S: CaptureSource + ?Sized>(
        &mut self,
        source: &mut S
    ) -> Result<ClientStats, MocapServerError> {
        let (mut stream, addr) = self.listener.accept().map_err(MocapServerError::Accept)?;
        info!("Client connected: {}", addr);

        // The client may idle for as long as the operator takes between requests
        StreamOptions {
            recv_timeout: None,
            send_timeout: Some(self.params.send_timeout()),
            ..Default::default()
        }.set(&stream).map_err(MocapServerError::Net)?;

        let mut stats = ClientStats::default();
        let mut session = Session::Idle;

        loop {
            let request = match mocap::read_request(&mut stream) {
                Ok(r) => r,
                Err(FramingError::Truncated { received: 0, .. }) => {
                    info!("Client {} disconnected", addr);
                    return Ok(stats)
                },
                Err(FramingError::Json(e)) => {
                    // The rest of the stream cannot be trusted
                    warn!("Invalid request from {}: {}", addr, e);
                    send_status(&mut stream, &format!("error: invalid request: {}", e))?;
                    return Ok(stats)
                },
                Err(e) => return Err(MocapServerError::Protocol(e))
            };
            stats.requests += 1;

            session = match self.handle(request, session, source, &mut stream, &mut stats) {
                Ok(s) => s,
                Err(MocapServerError::Capture(e)) => {
                    // A failed capture leaves the client without its data, it must set up again
                    warn!("Capture failed: {}", e);
                    send_status(&mut stream, &format!("error: {}", e))?;
                    stats.rejected += 1;
                    Session::Idle
                },
                Err(e) => return Err(e)
            };
        }
    }

    /// Run one request, returning the new state of the capture.
    fn handle<S: CaptureSource + ?Sized>(
        &self,
        request: MocapRequest,
        session: Session,
        source: &mut S,
        stream: &mut TcpStream,
        stats: &mut ClientStats
    ) -> Result<Session, MocapServerError> {
        match (request, session) {
            (MocapRequest::Setup { duration }, _) => {
                info!("Setup for {:.2} s", duration);
                let capture = Capture::setup(&*source, duration, self.params.buffer_margin)
                    .map_err(MocapServerError::Capture)?;

                send_status(stream, "Memory allocated")?;
                Ok(Session::SetUp(capture))
            },
            (MocapRequest::Start, Session::SetUp(mut capture)) => {
                // The reply goes out before capturing so the client can start its own clocks
                send_status(stream, "Recording started")?;
                capture.acquire(source).map_err(MocapServerError::Capture)?;
                stats.captures += 1;
                Ok(Session::Recorded(capture))
            },
            (MocapRequest::GetData, Session::Recorded(capture)) => {
                let matrix = capture.matrix().map_err(MocapServerError::Capture)?;

                send_status(stream, "Sending data")?;
                mocap::write_data(stream, &matrix).map_err(MocapServerError::Protocol)?;
                info!("Sent {} rows x {} columns", matrix.rows(), matrix.cols());

                Ok(Session::Recorded(capture))
            },
            (request, session) => {
                let expected = match session {
                    Session::Idle => "setup",
                    Session::SetUp(_) => "start",
                    Session::Recorded(_) => "get_data or setup"
                };
                warn!("Rejected {:?}, expected {}", request, expected);

                send_status(stream, &format!("error: expected {}", expected))?;
                stats.rejected += 1;
                Ok(session)
            }
        }
    }
}

// ------------------------------------------------------------------------------------------------
// PRIVATE FUNCTIONS
// ------------------------------------------------------------------------------------------------

fn send_status(stream: &mut TcpStream, status: &str) -> Result<(), MocapServerError> {
    mocap::write_status(stream, &MocapStatus::new(status)).map_err(MocapServerError::Protocol)
}

// ------------------------------------------------------------------------------------------------
// TESTS
// ------------------------------------------------------------------------------------------------

#[cfg(test)]
mod test {
    use super::*;
    use crate::capture::SimCapture;
    use crate::params::SimParams;
    use std::thread;

    fn server() -> (MocapServer, String) {
        let params: MocapExecParams = util::params::from_str("endpoint = \"127.0.0.1:0\"").unwrap();
        let server = MocapServer::new(&params).unwrap();
        let endpoint = server.local_addr().unwrap().to_string();
        (server, endpoint)
    }

    fn request(stream: &mut TcpStream, request: &MocapRequest) -> MocapStatus {
        mocap::write_request(stream, request).unwrap();
        mocap::read_status(stream).unwrap()
    }

    #[test]
    fn test_capture_session() {
        let (mut server, endpoint) = server();
        let handle = thread::spawn(move || {
            let mut source = SimCapture::new(SimParams {
                frame_rate_hz: 200.0,
                occlusion_period: 3,
                ..SimParams::default()
            });
            server.serve_client(&mut source).unwrap()
        });

        let mut s = net::connect(&endpoint, &StreamOptions::default()).unwrap();

        let status = request(&mut s, &MocapRequest::Setup { duration: 0.1 });
        assert_eq!(status.status, "Memory allocated");
        assert_eq!(status.version, Some(mocap::WIRE_VERSION));

        assert_eq!(request(&mut s, &MocapRequest::Start).status, "Recording started");

        let status = request(&mut s, &MocapRequest::GetData);
        assert!(!status.status.starts_with("error"));
        let m = mocap::read_data(&mut s).unwrap();

        assert_eq!(m.cols(), 7);
        assert_eq!(m.columns()[1], "arm_pos_X");
        assert!(m.rows() >= 15 && m.rows() <= 26, "{} rows", m.rows());
        // Third frame occluded
        assert!(m.row(2).unwrap()[1..].iter().all(|v| *v == 0.0));
        assert!(m.row(0).unwrap()[0] > 1.6e9);

        drop(s);
        let stats = handle.join().unwrap();
        assert_eq!(stats, ClientStats { requests: 3, captures: 1, rejected: 0 });
    }

    #[test]
    fn test_requests_out_of_order() {
        let (mut server, endpoint) = server();
        let handle = thread::spawn(move || {
            let mut source = SimCapture::new(SimParams::default());
            server.serve_client(&mut source).unwrap()
        });

        let mut s = net::connect(&endpoint, &StreamOptions::default()).unwrap();

        assert_eq!(request(&mut s, &MocapRequest::GetData).status, "error: expected setup");
        assert_eq!(request(&mut s, &MocapRequest::Start).status, "error: expected setup");
        assert!(request(&mut s, &MocapRequest::Setup { duration: -1.0 }).status.starts_with("error"));
        assert_eq!(request(&mut s, &MocapRequest::Setup { duration: 0.05 }).status, "Memory allocated");
        assert_eq!(request(&mut s, &MocapRequest::GetData).status, "error: expected start");

        drop(s);
        let stats = handle.join().unwrap();
        assert_eq!(stats.requests, 5);
        assert_eq!(stats.rejected, 4);
        assert_eq!(stats.captures, 0);
    }
}
