//! # Communications interface crate.
//!
//! Provides the wire-level interfaces shared by the experiment executables: the motor controller
//! CAN frames and the motion capture request/response protocol.

// ------------------------------------------------------------------------------------------------
// MODULES
// ------------------------------------------------------------------------------------------------

/// Command and response definitions for equipment (motors, motion capture)
pub mod eqpt;

/// Network module
pub mod net;
