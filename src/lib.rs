//! vlotto-buyer — automated lottery ticket purchases on a Verus node
//!
//! Library crate exposing all modules for use by integration tests
//! and the binary entry point.

pub mod config;
pub mod types;
pub mod rpc;
pub mod poll;
pub mod market;
pub mod wallet;
pub mod convert;
pub mod purchase;
