//! # Experiment library.
//!
//! This library allows other crates in the workspace to access items defined inside the
//! experiment crate, and is where the device drivers, control loops and the acquisition
//! orchestrator live.

// ------------------------------------------------------------------------------------------------
// MODULES
// ------------------------------------------------------------------------------------------------

/// Acquisition orchestrator - instantiates devices, runs the workers and tears everything down
pub mod acquisition;

/// Cable rig - the bus, both motors and their gauges as one unit
pub mod cable_rig;

/// CAN bus - the one link shared by both motor controllers
pub mod can_bus;

/// Force/torque transducer - bias removal and calibration of the DAQ voltages
pub mod ft_sensor;

/// Tension gauge - request/response force readings over a serial port
pub mod gauge;

/// Motion capture client - arms, triggers and retrieves captures from the mocap server
pub mod mocap_client;

/// Motor driver - per-motor commands and run mode tracking
pub mod motor;

/// Experiment parameters
pub mod params;

/// Pretensioner - brings both cables to the target tension before motion starts
pub mod pretension;

/// Simulated rig - stands in for the hardware in dry runs and tests
pub mod sim;

/// Trajectories - parametric setpoint generation and the fixed rate executor
pub mod traj;
