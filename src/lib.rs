//! Peg bridge relayer: observes bridge events on one chain and drives the
//! corresponding mint/release on the other, exactly once per event.

pub mod api;
pub mod config;
pub mod contracts;
pub mod db;
pub mod decoder;
pub mod dispatcher;
pub mod error;
pub mod metrics;
pub mod reader;
pub mod reconcile;
pub mod tracker;
pub mod types;
pub mod worker;
