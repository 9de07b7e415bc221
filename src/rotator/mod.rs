//! Rotator subsystem (spec §4.I): coordinate geometry and the hardware
//! controller, control loop, and RPC surface built on top of it.

pub mod controller;
pub mod geometry;
pub mod worker;

pub use controller::{
    angle_between_el_az_deg, closest_valid_position, position_valid, sun_angle_deg, DummyRotator, HorizonMap,
    RotatorConfig, RotatorController, RotatorError, RotatorLimits, RotatorModule, RotatorStatus, TrackingMode,
};
pub use geometry::{wrapdeg, AzElRotator};
pub use worker::RotatorWorker;
