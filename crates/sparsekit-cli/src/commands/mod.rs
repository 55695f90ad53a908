//! CLI Command Implementations
//!
//! - `inspect`: Checkpoint summary
//! - `build`: Checkpoint construction from a key list

mod build;
mod inspect;

pub use build::{BuildCommand, BuildReport};
pub use inspect::{InspectCommand, InspectReport};
