//! # Motion Capture Executable
//!
//! Runs the motion capture server for the experiment executable:
//! - Allocates a capture buffer on `setup`
//! - Records for the set up duration on `start`
//! - Sends the capture matrix on `get_data`
//!
//! Clients are served one at a time, a new client is accepted when the current one disconnects.

// ------------------------------------------------------------------------------------------------
// MODULES
// ------------------------------------------------------------------------------------------------

/// Capture sources and the capture buffer.
mod capture;

/// Parameters for the motion capture executable.
mod params;

/// Motion capture server abstraction.
mod server;

// ------------------------------------------------------------------------------------------------
// IMPORTS
// ------------------------------------------------------------------------------------------------

// External
use color_eyre::{Result, eyre::WrapErr};
use log::{info, warn};
use std::path::PathBuf;
use structopt::StructOpt;

// Internal
use capture::SimCapture;
use params::MocapExecParams;
use server::MocapServer;
use util::{
    logger::{logger_init, LevelFilter},
    session::Session,
};

// ------------------------------------------------------------------------------------------------
// STRUCTS
// ------------------------------------------------------------------------------------------------

#[derive(Debug, StructOpt)]
#[structopt(name = "mocap_exec", about = "Motion capture server")]
struct Opt {
    /// Server parameter file
    #[structopt(parse(from_os_str), default_value = "params/mocap_exec.toml")]
    params: PathBuf,

    /// Minimum log level: info, debug or trace
    #[structopt(long, default_value = "info")]
    log_level: LevelFilter
}

// ------------------------------------------------------------------------------------------------
// MAIN
// ------------------------------------------------------------------------------------------------

fn main() -> Result<()> {
    let opt = Opt::from_args();

    // ---- EARLY INITIALISATION ----

    // Initialise session
    let session = Session::new(
        "mocap_exec",
        "sessions"
    ).wrap_err("Failed to create the session")?;

    // Initialise logger
    logger_init(opt.log_level, &session)
        .wrap_err("Failed to initialise logging")?;

    info!("Motion Capture Executable\n");
    info!("Session directory: {:?}\n", session.session_root);

    // ---- LOAD PARAMETERS ----

    let params: MocapExecParams = util::params::load(&opt.params)
        .wrap_err("Could not load parameters")?;

    info!("Parameters loaded");

    // ---- SERVER INITIALISATION ----

    warn!(
        "Capturing from the SIMULATED capture system at {:.1} Hz",
        params.sim.frame_rate_hz
    );
    let mut source = SimCapture::new(params.sim.clone());

    let mut server = MocapServer::new(&params)
        .wrap_err("Failed to initialise server")?;

    info!("Server listening on {}", server.local_addr()?);

    // ---- MAIN LOOP ----

    loop {
        match server.serve_client(&mut source) {
            Ok(stats) => info!(
                "Client done: {} requests, {} captures, {} rejected",
                stats.requests, stats.captures, stats.rejected
            ),
            Err(e) => warn!("Client dropped: {}", e)
        }
    }
}
