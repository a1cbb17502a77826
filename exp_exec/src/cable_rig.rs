//! # Cable Rig
//!
//! The two antagonistic motors, the gauges on their cables and the bus they share. The rig is
//! owned by the motor worker, which makes the pretensioner and the trajectory executor the only
//! users of the motors during their phases. Gauge `n` sits on the cable of motor `n`.

// ---------------------------------------------------------------------------
// IMPORTS
// ---------------------------------------------------------------------------

use log::{debug, info, warn};
use comms_if::eqpt::cybergear::RunMode;

use crate::can_bus::{CanBus, CanError};
use crate::gauge::TensionGauge;
use crate::motor::{Motor, MotorError, MotorStatus};

// ---------------------------------------------------------------------------
// CONSTANTS
// ---------------------------------------------------------------------------

/// Number of cables (and so motors) on the rig.
pub const NUM_CABLES: usize = 2;

// ---------------------------------------------------------------------------
// DATA STRUCTURES
// ---------------------------------------------------------------------------

pub struct CableRig {
    pub bus: CanBus,

    pub motors: [Motor; NUM_CABLES],

    /// `None` for a gauge which could not be opened.
    pub gauges: [Option<TensionGauge>; NUM_CABLES]
}

// ---------------------------------------------------------------------------
// IMPLEMENTATIONS
// ---------------------------------------------------------------------------

impl CableRig {
    pub fn new(
        bus: CanBus,
        motors: [Motor; NUM_CABLES],
        gauges: [Option<TensionGauge>; NUM_CABLES]
    ) -> Self {
        Self {
            bus,
            motors,
            gauges
        }
    }

    /// True if every cable has a gauge.
    pub fn has_gauges(&self) -> bool {
        self.gauges.iter().all(|g| g.is_some())
    }

    /// Put both motors in position mode and enable them, returning their angles.
    pub fn prepare(&mut self) -> Result<[f64; NUM_CABLES], MotorError> {
        let mut angles = [0f64; NUM_CABLES];

        for (motor, angle) in self.motors.iter_mut().zip(angles.iter_mut()) {
            motor.disable(&mut self.bus)?;
            motor.set_run_mode(&mut self.bus, RunMode::Position)?;
            motor.enable(&mut self.bus)?;
            *angle = motor.read_status_with_retry(&mut self.bus)?.angle_rad;

            info!("[{}] Enabled in position mode at {:.4} rad", motor.tag(), angle);
        }

        Ok(angles)
    }

    /// Command an absolute angle on one motor. A send which finds the bus busy is retried once.
    pub fn command(
        &mut self,
        cable: usize,
        speed_limit_rads: f64,
        angle_rad: f64
    ) -> Result<MotorStatus, MotorError> {
        let motor = &mut self.motors[cable];

        match motor.set_position_target(&mut self.bus, speed_limit_rads, angle_rad) {
            Err(MotorError::Bus(CanError::TransportBusy)) => {
                debug!("[{}] Bus busy, retrying position command", motor.tag());
                motor.set_position_target(&mut self.bus, speed_limit_rads, angle_rad)
            },
            r => r
        }
    }

    /// Read one motor's status, `None` if it did not answer.
    pub fn read_status(&mut self, cable: usize) -> Option<MotorStatus> {
        self.motors[cable].read_status_with_retry(&mut self.bus).ok()
    }

    /// Read the tension on one cable. `None` if there is no gauge, `NaN` on a bad read.
    ///
    /// Units: Newtons
    pub fn read_tension(&mut self, cable: usize) -> Option<f64> {
        self.gauges[cable].as_mut().map(|g| g.read_tension())
    }

    /// Last angle successfully commanded to each motor.
    pub fn commanded(&self) -> [Option<f64>; NUM_CABLES] {
        [self.motors[0].last_cmd_rad(), self.motors[1].last_cmd_rad()]
    }

    /// Disable the motors, then close the gauges, each in reverse order. The gauges are opened
    /// before the motors. Errors are logged, not returned.
    pub fn shutdown(&mut self) {
        for motor in self.motors.iter_mut().rev() {
            match motor.disable(&mut self.bus) {
                Ok(_) => info!("[{}] Disabled", motor.tag()),
                Err(e) => warn!("[{}] Could not disable: {}", motor.tag(), e)
            }
        }

        for gauge in self.gauges.iter_mut().rev().flatten() {
            let stats = gauge.stats();
            if stats.bad_reads > 0 {
                warn!(
                    "[{}] {} of {} reads were bad",
                    gauge.tag(), stats.bad_reads, stats.reads
                );
            }
            gauge.close();
        }

        let stats = self.bus.stats();
        info!(
            "CAN bus: {} sent, {} received, {} drained, {} rejected, {} busy",
            stats.frames_sent, stats.frames_received, stats.drained_frames,
            stats.rejected_frames, stats.busy_sends
        );
    }
}

// ---------------------------------------------------------------------------
// TESTS
// ---------------------------------------------------------------------------

#[cfg(test)]
mod test {
    use super::*;
    use crate::sim::{GaugeModel, SimConfig, SimRig};

    #[test]
    fn test_prepare_and_shutdown() {
        let rig = SimRig::new(SimConfig::instant());
        rig.add_motor(1, 0.3);
        rig.add_motor(2, -0.2);
        rig.add_gauge(GaugeModel::linear(1, 2.0, 1.0));

        let mut cables = rig.cable_rig();
        assert!(!cables.has_gauges());

        let angles = cables.prepare().unwrap();
        assert!((angles[0] - 0.3).abs() < 1e-3);
        assert!((angles[1] + 0.2).abs() < 1e-3);
        assert!(rig.motor(1).unwrap().enabled);

        cables.command(0, 1.0, 0.5).unwrap();
        assert_eq!(cables.commanded(), [Some(0.5), None]);

        // Gauge 1 is 2 N/rad past its zero at 0.3 rad
        let t = cables.read_tension(0).unwrap();
        assert!((t - 0.4).abs() < 1e-2);
        assert_eq!(cables.read_tension(1), None);

        cables.shutdown();
        assert!(!rig.motor(1).unwrap().enabled);
        assert!(!rig.motor(2).unwrap().enabled);
    }
}
