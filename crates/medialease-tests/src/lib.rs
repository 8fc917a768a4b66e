//! Integration test crate for medialease.
//!
//! This crate exists solely to hold cross-crate integration tests.
//! It wires the handle table, stores and media services together the way
//! an application does and checks the lifecycle guarantees end to end.

#[cfg(test)]
mod handles;

#[cfg(test)]
mod loader;



#[cfg(test)]
mod properties;
