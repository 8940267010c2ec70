pub mod disk_format;
mod error;
pub mod fs;
pub mod service;
pub mod storage;

pub use error::{FsError, Result};
