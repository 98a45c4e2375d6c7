//! # Notelock Testkit
//!
//! Test utilities for the Notelock crates.
//!
//! This crate provides:
//! - Deterministic crypto provider and manual clock
//! - Fixtures: derived test keys, item and record builders
//! - A scripted in-memory sync server implementing `HttpClient`
//! - Property-based generators

#![deny(unsafe_code)]
#![warn(missing_docs)]

pub mod fixtures;
pub mod generators;
pub mod server;

pub use fixtures::*;
pub use server::*;
