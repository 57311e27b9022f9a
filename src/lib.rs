//! Channel relay: watches source channels and forwards keyword matches.

pub mod commands;
pub mod config;
pub mod context;
pub mod error;
pub mod pipeline;
pub mod store;
pub mod upstream;
