//! This crate provides domain types and the envelope/wire model shared
//! between courier services and callers.

pub mod codec;
pub mod domain;
pub mod entry_point;
pub mod envelope;
pub mod error;
pub mod macros;
