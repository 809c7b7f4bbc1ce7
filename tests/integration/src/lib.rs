//! Integration test utilities for the cord SDK
//!
//! This crate provides mock gateway and REST servers that the SDK talks to
//! over real sockets.

pub mod helpers;

pub use helpers::*;
