//! The error taxonomy returned at every fallible boundary of the crate.

use thiserror::Error;

/// Everything that can go wrong while formatting, mounting, or operating on a
/// volume.
///
/// Every variant carries a [`TfsError::code`] matching the legacy fixed-code
/// ABI of the system this crate supersedes, for callers bridging off it.
#[derive(Debug, Error)]
pub enum TfsError {
	/// `n_bytes` does not describe a usable volume (too small, or implies a
	/// bitmap/block count beyond the fixed-width fields that carry them).
	#[error("invalid block size: {0}")]
	InvalidBlockSize(String),
	/// The underlying host file could not be opened or created.
	#[error("disk error: {0}")]
	DiskError(String),
	/// A block-level read failed (short read, or the underlying I/O failed).
	#[error("disk read error: {0}")]
	DiskReadError(String),
	/// A block-level write failed (short write, or the underlying I/O failed).
	#[error("write error: {0}")]
	WriteError(String),
	/// A seek on the host file failed.
	#[error("seek error: {0}")]
	SeekError(String),
	/// `mount` was called on an already-mounted volume, or an operation
	/// requiring a mounted volume was attempted on one that is not mounted.
	#[error("mounted error: {0}")]
	MountedError(String),
	/// Block 1 of the two header bytes did not match [`crate::layout::MAGIC`].
	#[error("magic number error: expected {expected:#x}, found {found:#x}")]
	MagicNumberError {
		/// The magic byte that was expected.
		expected: u8,
		/// The magic byte that was actually read.
		found: u8,
	},
	/// The bitmap computed for the requested volume size does not fit in the
	/// superblock's 248-byte bitmap field.
	#[error("bitmap size error: {0} bytes exceeds the 248-byte superblock budget")]
	BitmapSizeError(usize),
	/// No contiguous run of free blocks of the requested length exists.
	#[error("free block error: no run of {0} free block(s) available")]
	FreeBlockError(u16),
	/// The given file descriptor or file name has no open-file entry.
	#[error("file not found error: {0}")]
	FileNotFoundError(String),
	/// A `read_byte` was attempted at or past the file's declared size.
	#[error("end of file error: offset {offset} at size {size}")]
	EndOfFileError {
		/// The offset the read was attempted at.
		offset: u32,
		/// The file's declared size.
		size: u16,
	},
	/// A block-level read returned fewer bytes than requested.
	#[error("read error: {0}")]
	ReadError(String),
	/// A file name exceeded the 8-byte limit imposed by the inode layout.
	#[error("name length error: {len} bytes ({name:?}) exceeds the 8-byte limit")]
	NameLengthError {
		/// The name that was rejected.
		name: String,
		/// Its encoded length in bytes.
		len: usize,
	},
	/// The root directory has no free slot for a new entry.
	#[error("directory full error: all {0} slots are in use")]
	DirectoryFullError(usize),
}

impl TfsError {
	/// The legacy negative integer code for this error, matching the fixed
	/// boundary ABI of the system this crate supersedes.
	pub fn code(&self) -> i32 {
		match self {
			Self::InvalidBlockSize(_) => -1,
			Self::DiskError(_) => -2,
			Self::DiskReadError(_) => -3,
			Self::MountedError(_) => -4,
			Self::MagicNumberError { .. } => -5,
			Self::WriteError(_) => -6,
			Self::SeekError(_) => -7,
			Self::BitmapSizeError(_) => -8,
			Self::FreeBlockError(_) => -10,
			Self::FileNotFoundError(_) => -11,
			Self::EndOfFileError { .. } => -12,
			Self::ReadError(_) => -13,
			Self::NameLengthError { .. } => -14,
			Self::DirectoryFullError(_) => -15,
		}
	}
}

/// Shorthand used throughout the crate.
pub type Result<T> = std::result::Result<T, TfsError>;
