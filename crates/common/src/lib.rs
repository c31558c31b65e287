//! Common utilities shared across Presence Controller components.

#![warn(clippy::pedantic)]

/// Module for secret types that prevent accidental logging
pub mod secret;
