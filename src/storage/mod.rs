/// Image-file-backed storage.
mod file;
/// In-memory storage.
mod memory;
/// The sector I/O abstraction.
mod sector_device;

pub use file::*;
pub use memory::*;
pub use sector_device::*;
