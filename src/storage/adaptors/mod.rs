//! Built-in backends, one sub-module per URI scheme.

mod file;
mod mem;
mod sled;

pub use file::*;
pub use mem::*;

pub use self::sled::*;
