//! # Network Module
//!
//! This module provides the stream socket abstractions used by the equipment clients and
//! servers. Every connection is a plain TCP stream with bounded connect, read and write timeouts
//! so that a dead peer can never hang a worker forever.

// ------------------------------------------------------------------------------------------------
// IMPORTS
// ------------------------------------------------------------------------------------------------

use std::net::{SocketAddr, TcpListener, TcpStream, ToSocketAddrs};
use std::time::Duration;
use log::debug;

// ------------------------------------------------------------------------------------------------
// MACROS
// ------------------------------------------------------------------------------------------------

macro_rules! set_sockopts {
    ($socket:expr, $(($opt:ident, $val:expr)),+) => {
        $(
            $socket.$opt($val)
                .map_err(|e| NetError::SocketOptionError(stringify!($opt).into(), e))?;
        )+
    };
}

// ------------------------------------------------------------------------------------------------
// STRUCTS
// ------------------------------------------------------------------------------------------------

/// Represents options which can be set on a stream.
#[derive(Debug, Clone)]
pub struct StreamOptions {
    /// Maximum time to wait for the connection to be established.
    ///
    /// The default value is 5 seconds.
    pub connect_timeout: Duration,

    /// Maximum time a read may block, `None` blocks forever.
    ///
    /// The default value is 5 seconds.
    pub recv_timeout: Option<Duration>,

    /// Maximum time a write may block, `None` blocks forever.
    ///
    /// The default value is 5 seconds.
    pub send_timeout: Option<Duration>,

    /// `TCP_NODELAY`: disable Nagle's algorithm, requests are small and latency sensitive.
    ///
    /// The default value is `true`.
    pub nodelay: bool
}

// ------------------------------------------------------------------------------------------------
// ENUMS
// ------------------------------------------------------------------------------------------------

#[derive(thiserror::Error, Debug)]
pub enum NetError {
    #[error("Could not resolve the endpoint {0}: {1}")]
    ResolveError(String, std::io::Error),

    #[error("The endpoint {0} did not resolve to any address")]
    NoAddress(String),

    #[error("Could not connect to {0}: {1}")]
    CouldNotConnect(String, std::io::Error),

    #[error("Could not bind to {0}: {1}")]
    CouldNotBind(String, std::io::Error),

    #[error("Could not set the {0} socket option: {1}")]
    SocketOptionError(String, std::io::Error)
}

// ------------------------------------------------------------------------------------------------
// IMPLS
// ------------------------------------------------------------------------------------------------

impl StreamOptions {
    /// Set these options on the given stream.
    pub fn set(&self, stream: &TcpStream) -> Result<(), NetError> {
        set_sockopts!(
            stream,
            (set_read_timeout, self.recv_timeout),
            (set_write_timeout, self.send_timeout),
            (set_nodelay, self.nodelay)
        );

        Ok(())
    }
}

impl Default for StreamOptions {
    fn default() -> Self {
        Self {
            connect_timeout: Duration::from_secs(5),
            recv_timeout: Some(Duration::from_secs(5)),
            send_timeout: Some(Duration::from_secs(5)),
            nodelay: true
        }
    }
}

// ------------------------------------------------------------------------------------------------
// PUBLIC FUNCTIONS
// ------------------------------------------------------------------------------------------------

/// Connect to an endpoint such as `"192.168.1.10:8080"`, trying every resolved address in turn.
pub fn connect(endpoint: &str, options: &StreamOptions) -> Result<TcpStream, NetError> {
    let addrs: Vec<SocketAddr> = endpoint.to_socket_addrs()
        .map_err(|e| NetError::ResolveError(endpoint.into(), e))?
        .collect();

    let mut last_err = None;

    for addr in addrs.iter() {
        match TcpStream::connect_timeout(addr, options.connect_timeout) {
            Ok(stream) => {
                options.set(&stream)?;
                debug!("Connected to {} ({})", endpoint, addr);
                return Ok(stream)
            },
            Err(e) => {
                debug!("Could not connect to {}: {}", addr, e);
                last_err = Some(e)
            }
        }
    }

    match last_err {
        Some(e) => Err(NetError::CouldNotConnect(endpoint.into(), e)),
        None => Err(NetError::NoAddress(endpoint.into()))
    }
}

/// Bind a listening socket for a server.
pub fn bind(endpoint: &str) -> Result<TcpListener, NetError> {
    TcpListener::bind(endpoint)
        .map_err(|e| NetError::CouldNotBind(endpoint.into(), e))
}

// ------------------------------------------------------------------------------------------------
// TESTS
// ------------------------------------------------------------------------------------------------

#[cfg(test)]
mod test {
    use super::*;
    use std::io::{Read, Write};

    #[test]
    fn test_connect_and_options() {
        let listener = bind("127.0.0.1:0").unwrap();
        let endpoint = listener.local_addr().unwrap().to_string();

        let opts = StreamOptions {
            recv_timeout: Some(Duration::from_millis(250)),
            ..Default::default()
        };
        let mut client = connect(&endpoint, &opts).unwrap();
        let (mut server, _) = listener.accept().unwrap();

        // The kernel rounds timeouts up to its tick
        let timeout = client.read_timeout().unwrap().unwrap();
        assert!(
            timeout >= Duration::from_millis(250) && timeout < Duration::from_millis(300),
            "{:?}", timeout
        );
        assert!(client.nodelay().unwrap());

        server.write_all(b"ok").unwrap();
        let mut buf = [0u8; 2];
        client.read_exact(&mut buf).unwrap();
        assert_eq!(&buf, b"ok");
    }

    #[test]
    fn test_connect_refused() {
        // Bind then drop to find a port with nothing listening
        let endpoint = {
            let listener = bind("127.0.0.1:0").unwrap();
            listener.local_addr().unwrap().to_string()
        };

        assert!(matches!(
            connect(&endpoint, &StreamOptions::default()),
            Err(NetError::CouldNotConnect(_, _))
        ));
        assert!(matches!(
            connect("not an endpoint", &StreamOptions::default()),
            Err(NetError::ResolveError(_, _))
        ));
    }
}
