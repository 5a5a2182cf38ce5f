//! Command implementations for the Strata CLI.

pub mod cache;
pub mod config;
