//! The block-device adapter: a thin shim over a host file standing in for an
//! emulated block device. Nothing here knows about superblocks, inodes, or
//! bitmaps: it only moves fixed-size blocks in and out of a file.

use std::fs::{File, OpenOptions};
use std::io::{Read, Seek, SeekFrom, Write};
use std::path::Path;

use crate::error::{Result, TfsError};
use crate::layout::BLOCK_SIZE;

/// One 256-byte block, read or written whole.
pub type Block = [u8; BLOCK_SIZE];

/// Returns a block of all zero bytes.
pub fn zero_block() -> Block {
	[0u8; BLOCK_SIZE]
}

/// A host file opened in place of a real block device.
pub struct BlockDevice {
	file: Option<File>,
	num_blocks: u16,
}

impl BlockDevice {
	/// Opens the device backing `path`.
	///
	/// If `n_bytes` is `0`, an existing image is opened read/write without
	/// truncation and `num_blocks` is derived from its current length.
	/// Otherwise the file is created (or truncated) to
	/// `floor(n_bytes / BLOCK_SIZE) * BLOCK_SIZE` bytes, with a floor of one
	/// block.
	pub fn open(path: &Path, n_bytes: u64) -> Result<Self> {
		if n_bytes == 0 {
			let file = OpenOptions::new()
				.read(true)
				.write(true)
				.open(path)
				.map_err(|e| TfsError::DiskError(e.to_string()))?;
			let len = file
				.metadata()
				.map_err(|e| TfsError::DiskError(e.to_string()))?
				.len();
			let num_blocks = (len / BLOCK_SIZE as u64) as u16;
			return Ok(Self {
				file: Some(file),
				num_blocks,
			});
		}

		let block_count = (n_bytes / BLOCK_SIZE as u64).max(1);
		let len = block_count * BLOCK_SIZE as u64;
		let file = OpenOptions::new()
			.read(true)
			.write(true)
			.create(true)
			.truncate(true)
			.open(path)
			.map_err(|e| TfsError::DiskError(e.to_string()))?;
		file.set_len(len)
			.map_err(|e| TfsError::DiskError(e.to_string()))?;

		log::debug!(
			"opened block device {} ({} blocks)",
			path.display(),
			block_count
		);

		Ok(Self {
			file: Some(file),
			num_blocks: block_count as u16,
		})
	}

	/// The number of blocks the device was opened with.
	pub fn num_blocks(&self) -> u16 {
		self.num_blocks
	}

	fn file_mut(&mut self) -> Result<&mut File> {
		self.file
			.as_mut()
			.ok_or_else(|| TfsError::DiskError("device is closed".to_owned()))
	}

	/// Reads block `n` in full.
	pub fn read_block(&mut self, n: u16) -> Result<Block> {
		let mut buf = zero_block();
		let file = self.file_mut()?;
		file.seek(SeekFrom::Start(n as u64 * BLOCK_SIZE as u64))
			.map_err(|e| TfsError::SeekError(e.to_string()))?;
		file.read_exact(&mut buf)
			.map_err(|e| TfsError::DiskReadError(e.to_string()))?;
		Ok(buf)
	}

	/// Writes block `n` in full.
	pub fn write_block(&mut self, n: u16, buf: &Block) -> Result<()> {
		let file = self.file_mut()?;
		file.seek(SeekFrom::Start(n as u64 * BLOCK_SIZE as u64))
			.map_err(|e| TfsError::SeekError(e.to_string()))?;
		file.write_all(buf)
			.map_err(|e| TfsError::WriteError(e.to_string()))?;
		Ok(())
	}

	/// Closes the device. Idempotent: calling this more than once is a no-op
	/// after the first call.
	pub fn close(&mut self) {
		self.file = None;
	}
}

#[cfg(test)]
mod test {
	use super::*;
	use tempfile::NamedTempFile;

	#[test]
	fn open_creates_truncated_image() {
		let tmp = NamedTempFile::new().unwrap();
		let dev = BlockDevice::open(tmp.path(), 10240).unwrap();
		assert_eq!(dev.num_blocks(), 40);
		assert_eq!(tmp.path().metadata().unwrap().len(), 10240);
	}

	#[test]
	fn open_rounds_down_to_block_multiple() {
		let tmp = NamedTempFile::new().unwrap();
		let dev = BlockDevice::open(tmp.path(), 300).unwrap();
		assert_eq!(dev.num_blocks(), 1);
		assert_eq!(tmp.path().metadata().unwrap().len(), BLOCK_SIZE as u64);
	}

	#[test]
	fn write_then_read_roundtrips() {
		let tmp = NamedTempFile::new().unwrap();
		let mut dev = BlockDevice::open(tmp.path(), 2560).unwrap();
		let mut buf = zero_block();
		buf[0] = 3;
		buf[4] = b'h';
		dev.write_block(2, &buf).unwrap();
		let read_back = dev.read_block(2).unwrap();
		assert_eq!(read_back, buf);
	}

	#[test]
	fn closed_device_rejects_io() {
		let tmp = NamedTempFile::new().unwrap();
		let mut dev = BlockDevice::open(tmp.path(), 2560).unwrap();
		dev.close();
		dev.close(); // idempotent
		assert!(dev.read_block(0).is_err());
	}

	#[test]
	fn reopen_existing_image_without_truncation() {
		let tmp = NamedTempFile::new().unwrap();
		{
			let mut dev = BlockDevice::open(tmp.path(), 2560).unwrap();
			let mut buf = zero_block();
			buf[0] = 4;
			dev.write_block(3, &buf).unwrap();
		}
		let mut dev = BlockDevice::open(tmp.path(), 0).unwrap();
		assert_eq!(dev.num_blocks(), 10);
		assert_eq!(dev.read_block(3).unwrap()[0], 4);
	}
}
