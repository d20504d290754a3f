//! Core types, constants, errors, and layer seams.

pub mod constants;
mod error;
mod traits;

pub use constants::{Address, BROADCAST_ADDRESS, MAX_ADDRESS};
pub use error::*;
pub use traits::*;
