//! Drover - Monitored Task Dispatch
//!
//! The master node of a distributed task-dispatch engine: a monitored
//! queue broker with a durable cache and a built-in lockstep driver.

pub mod broker;
pub mod cache;
pub mod config;
pub mod context;
pub mod driver;
pub mod monitor;
pub mod runtime;
pub mod socket;
pub mod utils;
pub mod wire;
