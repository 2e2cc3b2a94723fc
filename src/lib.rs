//! Synthesizes a realistic, internally consistent order-status history
//! (status lifecycle events plus refund/return events) into a relational
//! store. Supports a one-time historical backfill and repeated incremental
//! daily runs that stay consistent with previously generated data.

pub mod config;
pub mod domain;
pub mod error;
pub mod models;
pub mod rng;
pub mod sim;
pub mod store;
