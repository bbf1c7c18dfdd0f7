//! Test support for `RankCore`
//!
//! - [`chaos`]: wrappers injecting latency and failures into any collaborator
//! - [`fixtures`]: engines over in-memory collaborators, identities and wire
//!   payloads

#![forbid(unsafe_code)]
#![deny(
    rust_2018_idioms,
    unused_imports,
    unused_must_use,
    unused_mut,
    unused_variables
)]

pub mod chaos;
pub mod fixtures;

pub use chaos::{Chaos, ChaosConfig, ChaosExt, Probability};
