//! Job supervision: process lifecycle, polling and callbacks.

mod error;
mod state;
mod supervisor;
mod timer;

pub use error::*;
pub use state::*;
pub use supervisor::*;
pub use timer::*;
