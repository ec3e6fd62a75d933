//! A miniature single-volume file system backed by a plain host file standing
//! in for a block device: format/mount/unmount, a free-space bitmap
//! allocator, and a file engine (open/write/read/seek/delete/rename/readdir).

pub mod bitmap;
pub mod block;
pub mod directory;
pub mod error;
pub mod file;
pub mod layout;
pub mod volume;

pub use error::{Result, TfsError};
pub use file::{FileDescriptor, FileInfo};
pub use volume::{TinyFs, BLOCK_SIZE, DEFAULT_DISK_NAME, DEFAULT_DISK_SIZE};
