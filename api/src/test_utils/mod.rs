//! Test utilities
//!
//! Manual mock implementations of the port traits.
//!
//! Why manual mocks instead of mockall?
//! - mockall has lifetime issues with traits containing `&str` parameters
//! - Manual mocks are more explicit and easier to debug
//! - The directory mock can mirror real cascade semantics, which a
//!   per-method expectation mock cannot express naturally

pub mod mocks;

pub use mocks::{InMemoryCluster, InMemoryDirectory, InMemoryGitea, TestDirectoryBuilder};
