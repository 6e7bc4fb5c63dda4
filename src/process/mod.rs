//! Process spawning capability and its vocabulary types.

mod flags;
mod spawn;

pub use flags::*;
pub use spawn::*;
