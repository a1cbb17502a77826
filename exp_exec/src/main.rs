//! # Experiment Executable
//!
//! Runs one cable rig experiment:
//!
//!     - Load and validate the experiment parameters
//!     - Start a session, the session directory is the experiment directory
//!     - Run the acquisition, on the lab hardware or on the simulated rig
//!     - Save the parameters and the experiment report next to the CSVs
//!
//! The process exits with the experiment's exit code: 0 on success, 1 when aborted by the operator,
//! 2 when pretensioning failed, 3 when a worker failed and 4 when a required device could not be
//! started.

// ---------------------------------------------------------------------------
// IMPORTS
// ---------------------------------------------------------------------------

// External
use color_eyre::{Result, eyre::WrapErr};
use log::{info, warn};
use std::path::PathBuf;
use structopt::StructOpt;

// Internal
use exp_lib::{
    acquisition::{self, AutoOperator, ConsoleOperator, DeviceFactory, HardwareFactory, Operator, SimFactory},
    params::ExpParams,
    sim::SimConfig
};
use util::{
    logger::{logger_init, LevelFilter},
    session::Session
};

// ---------------------------------------------------------------------------
// CONSTANTS
// ---------------------------------------------------------------------------

/// Times `--yes` extends the pretension cap before giving up.
const AUTO_CAP_RETRIES: usize = 1;

// ---------------------------------------------------------------------------
// DATA STRUCTURES
// ---------------------------------------------------------------------------

#[derive(Debug, StructOpt)]
#[structopt(name = "exp_exec", about = "Cable rig experiment executable")]
struct Opt {
    /// Experiment parameter file
    #[structopt(parse(from_os_str), default_value = "params/exp_exec.toml")]
    params: PathBuf,

    /// Name of the experiment, prefixes the experiment directory
    #[structopt(short, long, default_value = "exp")]
    name: String,

    /// Directory the experiment directory is created in, overriding `output_dir`
    #[structopt(short, long, parse(from_os_str))]
    output: Option<PathBuf>,

    /// Run against the simulated rig instead of the hardware
    #[structopt(long)]
    sim: bool,

    /// Answer yes to every prompt
    #[structopt(short, long)]
    yes: bool,

    /// Minimum log level: info, debug or trace
    #[structopt(long, default_value = "info")]
    log_level: LevelFilter
}

// ---------------------------------------------------------------------------
// MAIN
// ---------------------------------------------------------------------------

fn main() -> Result<()> {
    color_eyre::install()?;

    let opt = Opt::from_args();

    // ---- LOAD PARAMETERS ----

    // Loaded before the session so a bad file leaves no empty experiment directory
    let params: ExpParams = util::params::load(&opt.params)
        .wrap_err_with(|| format!("Could not load parameters from {:?}", opt.params))?;
    params.are_valid().wrap_err("Invalid parameters")?;

    // ---- EARLY INITIALISATION ----

    let output_dir = opt.output.clone().unwrap_or_else(|| PathBuf::from(&params.output_dir));
    let session = Session::new(&opt.name, &output_dir)
        .wrap_err("Failed to create the session")?;

    logger_init(opt.log_level, &session)
        .wrap_err("Failed to initialise logging")?;

    info!("Cable Rig Experiment Executable\n");
    info!("Experiment directory: {:?}", session.session_root);
    info!("Parameters loaded from {:?}", opt.params);
    if opt.sim {
        warn!("Running on the SIMULATED rig");
    }

    session.save("params.json", params.clone());

    // ---- ACQUISITION ----

    let mut factory: Box<dyn DeviceFactory> = match opt.sim {
        true => Box::new(SimFactory::from_params(&params, SimConfig::realistic())),
        false => Box::new(HardwareFactory::default())
    };
    let mut operator: Box<dyn Operator> = match opt.yes {
        true => Box::new(AutoOperator::new(AUTO_CAP_RETRIES)),
        false => Box::new(ConsoleOperator::new())
    };

    let summary = acquisition::run(
        &params,
        &session.session_root,
        factory.as_mut(),
        operator.as_mut()
    );

    summary.log();
    session.save("report.json", summary.clone());

    // ---- SHUTDOWN ----

    let code = summary.exit_code.code();
    session.exit();

    if code == 0 {
        info!("Experiment complete");
        Ok(())
    }
    else {
        warn!("Experiment ended with {:?}", summary.exit_code);
        std::process::exit(code)
    }
}
