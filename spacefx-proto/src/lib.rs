//! Shared message formats exchanged between SpaceFx applications.
//!
//! Everything lives in the `spacefx.v1` protobuf package; the generated code is
//! re-exported at the crate root.

pub mod v1 {
    include!(concat!(env!("OUT_DIR"), "/spacefx.v1.rs"));
}

pub use v1::*;

/// Protobuf package shared by every message in this crate.
pub const PACKAGE: &str = "spacefx.v1";
