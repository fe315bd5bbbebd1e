//! mcpmux Shared Types
//!
//! Backend descriptors and the validation that turns raw backend records into
//! them. Shared by the gateway runtime and its configuration layer.

pub mod descriptor;
pub mod error;

pub use descriptor::*;
pub use error::*;
