//! Type definitions for the managed resource and its status

mod config_types;
mod resource_types;
mod status_types;

pub use config_types::*;
pub use resource_types::*;
pub use status_types::*;
