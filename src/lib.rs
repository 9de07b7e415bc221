//! Porthouse: a distributed ground-station and mission-control framework.
//!
//! A single broker-mediated process mesh (spec §1-2): a packet/event/RPC
//! bus ([`broker`]), a declarative module runtime ([`module_runtime`]) that
//! every long-running component builds on, a pass-prediction core
//! ([`pass_prediction`]) and orbit tracker ([`tracker`]) for satellite
//! visibility, a scheduling layer ([`scheduler`]) for conflict-free rotator
//! time allocation, a rotator controller ([`rotator`]), and a packet router
//! ([`router`]) bridging the bus to external sockets. [`launcher`] ties a
//! YAML launch specification to a set of supervised worker processes.

#![warn(missing_docs)]

pub mod broker;
pub mod config;
pub mod domain_types;
pub mod error;
pub mod launcher;
pub mod module_runtime;
pub mod observability;
pub mod pass_prediction;
pub mod rest_api;
pub mod rotator;
pub mod router;
pub mod rpc;
pub mod scheduler;
pub mod storage;
pub mod tracker;

pub use error::PorthouseError;
