//! Shared test utilities for the chat load-test workspace.
//!
//! This crate provides:
//! - A stub chat service speaking the real WebSocket protocol
//! - Common message fixtures
//!
//! # Usage
//!
//! Add to your crate's `Cargo.toml`:
//!
//! ```toml
//! [dev-dependencies]
//! test-utils = { path = "../../crates/test-utils" }
//! ```
//!
//! Then start a service in an async test:
//!
//! ```ignore
//! use test_utils::{Behavior, StubService};
//!
//! let service = StubService::spawn(Behavior::echo_after_ms(10)).await?;
//! let address = service.address();
//! ```

pub mod fixtures;
pub mod stub;

pub use fixtures::*;
pub use stub::{unused_address, Behavior, StubService};
