//! Mount state and the format (`mkfs`) operation: component D and G of the
//! design. [`TinyFs`] is the single owning value that replaces the
//! scattered globals (`mounted`, `currMountedFS`, `disk`, `mountedBitmap`,
//! `openFileTable`) of the system this crate supersedes.

use std::collections::BTreeMap;
use std::path::Path;

use crate::bitmap::Bitmap;
use crate::block::BlockDevice;
use crate::directory::RootDir;
use crate::error::{Result, TfsError};
use crate::file::{FileDescriptor, OpenFileEntry};
use crate::layout::{self, Extent, Inode, Superblock, ROOT_DIR_BLOCK, SUPERBLOCK_BLOCK};

/// The default block size, in bytes, of every block on an image.
pub const BLOCK_SIZE: usize = layout::BLOCK_SIZE;
/// The default size, in bytes, of a freshly formatted image (40 blocks).
pub const DEFAULT_DISK_SIZE: u64 = 10240;
/// The default name used for an emulated-disk image file.
pub const DEFAULT_DISK_NAME: &str = "tinyFSDisk";

/// A mounted (or not-yet-mounted) volume and its open-file table.
///
/// A `TinyFs` value owns everything the file engine needs: the device
/// handle, the loaded bitmap and root directory, and the table of files
/// currently open against it. Exactly one volume can be mounted at a time
/// per value: `mount` rejects a second call on an already-mounted
/// `TinyFs`, not via a process-wide flag.
#[derive(Default)]
pub struct TinyFs {
	pub(crate) device: Option<BlockDevice>,
	pub(crate) mounted: bool,
	pub(crate) bitmap: Option<Bitmap>,
	pub(crate) root: Option<RootDir>,
	pub(crate) open_files: BTreeMap<FileDescriptor, OpenFileEntry>,
	pub(crate) next_fd: u16,
}

impl TinyFs {
	/// Builds an unmounted `TinyFs` value.
	pub fn new() -> Self {
		Self {
			next_fd: 1,
			..Default::default()
		}
	}

	/// Whether this value currently has a volume mounted.
	pub fn is_mounted(&self) -> bool {
		self.mounted
	}

	/// Initializes a fresh image at `path`, sized to `n_bytes` (rounded down
	/// to a block multiple).
	///
	/// Rejects `n_bytes` smaller than one block (but nonzero: zero is
	/// simply invalid), a block count beyond 65535, or a resulting bitmap
	/// larger than the superblock's 248-byte budget.
	pub fn format(path: &Path, n_bytes: u64) -> Result<()> {
		if n_bytes < BLOCK_SIZE as u64 {
			return Err(TfsError::InvalidBlockSize(format!(
				"{n_bytes} bytes is smaller than one {BLOCK_SIZE}-byte block"
			)));
		}
		let num_blocks_u64 = n_bytes / BLOCK_SIZE as u64;
		if num_blocks_u64 > u16::MAX as u64 {
			return Err(TfsError::InvalidBlockSize(format!(
				"{num_blocks_u64} blocks exceeds the 16-bit block count field"
			)));
		}
		let num_blocks = num_blocks_u64 as u16;
		if num_blocks < 2 {
			return Err(TfsError::InvalidBlockSize(
				"a volume needs at least 2 blocks for the superblock and root directory"
					.to_owned(),
			));
		}
		let bitmap_size = Bitmap::bitmap_size_bytes(num_blocks);
		if bitmap_size > layout::MAX_BITMAP_BYTES {
			return Err(TfsError::BitmapSizeError(bitmap_size));
		}

		let mut device = BlockDevice::open(path, n_bytes)?;

		let mut bitmap = Bitmap::init_all_free(num_blocks);
		bitmap.allocate(SUPERBLOCK_BLOCK);
		bitmap.allocate(ROOT_DIR_BLOCK);

		for block in 2..num_blocks {
			device.write_block(block, &layout::free_block())?;
		}

		let root = RootDir::empty();
		device.write_block(ROOT_DIR_BLOCK, &root.encode())?;

		let superblock = Superblock {
			num_blocks,
			bitmap: bitmap.as_bytes().to_vec(),
		};
		device.write_block(SUPERBLOCK_BLOCK, &superblock.encode()?)?;

		device.close();
		log::info!("formatted {} ({} blocks)", path.display(), num_blocks);
		Ok(())
	}

	/// Convenience wrapper around [`TinyFs::format`] using
	/// [`DEFAULT_DISK_SIZE`].
	pub fn format_default(path: &Path) -> Result<()> {
		Self::format(path, DEFAULT_DISK_SIZE)
	}

	/// Mounts the image at `path` as the active volume.
	///
	/// Fails with [`TfsError::MountedError`] if this `TinyFs` is already
	/// mounted, or if the superblock's magic byte doesn't match.
	pub fn mount(&mut self, path: &Path) -> Result<()> {
		if self.mounted {
			return Err(TfsError::MountedError(
				"a volume is already mounted".to_owned(),
			));
		}

		let mut device = BlockDevice::open(path, 0)?;
		let sb_buf = device.read_block(SUPERBLOCK_BLOCK)?;
		let superblock = Superblock::decode(&sb_buf)?;
		let bitmap = Bitmap::from_bytes(&superblock.bitmap, superblock.num_blocks);

		let root_buf = device.read_block(ROOT_DIR_BLOCK)?;
		let root = RootDir::decode(&root_buf)?;

		self.device = Some(device);
		self.bitmap = Some(bitmap);
		self.root = Some(root);
		self.open_files.clear();
		self.next_fd = 1;
		self.mounted = true;

		log::info!(
			"mounted {} ({} blocks)",
			path.display(),
			superblock.num_blocks
		);
		Ok(())
	}

	/// Unmounts the active volume, flushing the bitmap one last time and
	/// releasing all in-memory state.
	///
	/// Fails with [`TfsError::MountedError`] if nothing is mounted.
	pub fn unmount(&mut self) -> Result<()> {
		if !self.mounted {
			return Err(TfsError::MountedError("no volume is mounted".to_owned()));
		}

		self.flush_bitmap()?;
		if let Some(device) = self.device.as_mut() {
			device.close();
		}

		self.device = None;
		self.bitmap = None;
		self.root = None;
		self.open_files.clear();
		self.mounted = false;

		log::info!("unmounted volume");
		Ok(())
	}

	pub(crate) fn require_mounted(&self) -> Result<()> {
		if !self.mounted {
			return Err(TfsError::MountedError(
				"operation requires a mounted volume".to_owned(),
			));
		}
		Ok(())
	}

	pub(crate) fn device_mut(&mut self) -> Result<&mut BlockDevice> {
		self.require_mounted()?;
		self.device.as_mut().ok_or_else(|| {
			TfsError::MountedError("volume marked mounted but device is absent".to_owned())
		})
	}

	pub(crate) fn bitmap_mut(&mut self) -> Result<&mut Bitmap> {
		self.require_mounted()?;
		self.bitmap.as_mut().ok_or_else(|| {
			TfsError::MountedError("volume marked mounted but bitmap is absent".to_owned())
		})
	}

	pub(crate) fn root_mut(&mut self) -> Result<&mut RootDir> {
		self.require_mounted()?;
		self.root.as_mut().ok_or_else(|| {
			TfsError::MountedError("volume marked mounted but root directory is absent".to_owned())
		})
	}

	/// Persists the bitmap to the superblock. Every mutating allocator call
	/// is followed by a call to this method, so state survives unmount
	/// without relying solely on a flush at unmount time.
	pub(crate) fn flush_bitmap(&mut self) -> Result<()> {
		self.require_mounted()?;
		let bitmap = self.bitmap.as_ref().unwrap();
		let superblock = Superblock {
			num_blocks: bitmap.num_blocks(),
			bitmap: bitmap.as_bytes().to_vec(),
		};
		let buf = superblock.encode()?;
		self.device_mut()?.write_block(SUPERBLOCK_BLOCK, &buf)
	}

	pub(crate) fn flush_root(&mut self) -> Result<()> {
		let buf = self.root_mut()?.encode();
		self.device_mut()?.write_block(ROOT_DIR_BLOCK, &buf)
	}

	/// Reads and decodes the inode at `block`.
	pub(crate) fn read_inode(&mut self, block: u16) -> Result<Inode> {
		let buf = self.device_mut()?.read_block(block)?;
		Inode::decode(&buf)
	}

	/// Encodes and writes `inode` at `block`.
	pub(crate) fn write_inode(&mut self, block: u16, inode: &Inode) -> Result<()> {
		let buf = inode.encode()?;
		self.device_mut()?.write_block(block, &buf)
	}

	/// Reads and decodes the extent at `block`.
	pub(crate) fn read_extent(&mut self, block: u16) -> Result<Extent> {
		let buf = self.device_mut()?.read_block(block)?;
		Extent::decode(&buf)
	}

	/// Encodes and writes `extent` at `block`.
	pub(crate) fn write_extent(&mut self, block: u16, extent: &Extent) -> Result<()> {
		let buf = extent.encode();
		self.device_mut()?.write_block(block, &buf)
	}

	/// Frees a chain of blocks allocated contiguously starting at `start`,
	/// overwriting each with a free-block image and clearing its bitmap bit.
	pub(crate) fn release_contiguous(&mut self, start: u16, count: u16) -> Result<()> {
		for offset in 0..count {
			let block = start + offset;
			self.device_mut()?.write_block(block, &layout::free_block())?;
			self.bitmap_mut()?.free_one(block);
		}
		self.flush_bitmap()
	}

	/// Frees a single block (used for inode blocks, which aren't
	/// necessarily contiguous with anything).
	pub(crate) fn release_one(&mut self, block: u16) -> Result<()> {
		self.device_mut()?.write_block(block, &layout::free_block())?;
		self.bitmap_mut()?.free_one(block);
		self.flush_bitmap()
	}

	pub(crate) fn fresh_fd(&mut self) -> FileDescriptor {
		let fd = FileDescriptor(self.next_fd);
		self.next_fd += 1;
		fd
	}
}
