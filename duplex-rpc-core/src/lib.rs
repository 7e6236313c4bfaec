//! Core call types for duplex-rpc.
//!
//! This crate provides the vocabulary shared by the call machinery in
//! `duplex-rpc-client` and by transport implementations.
//!
//! ## Modules
//!
//! - [`error`]: Status codes and the terminal status record
//! - [`metadata`]: Header and trailer metadata
//! - [`method`]: Method and service descriptors, call shapes

mod error;
mod metadata;
mod method;

pub use error::*;
pub use metadata::*;
pub use method::*;
