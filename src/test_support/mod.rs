//! Shared helpers for unit tests.

pub mod scripted_transport;
