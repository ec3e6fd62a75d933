//! The file engine: open/write/read-byte/seek/delete/rename/readdir and
//! read-file-info, built on top of the volume, bitmap, directory, and codec
//! layers. This is the largest component (component F) and the one most
//! directly descended from the authoritative draft of the original
//! `libTinyFS.c` and its open-file table (`fdLL.c`).

use std::fmt;
use std::time::{SystemTime, UNIX_EPOCH};

use crate::error::{Result, TfsError};
use crate::layout::{Inode, NAME_MAX_LEN};
use crate::volume::TinyFs;

/// `EXTENT_PAYLOAD_LEN`, local alias kept short for the chunking arithmetic
/// below.
const PAYLOAD: u32 = crate::layout::EXTENT_PAYLOAD_LEN as u32;

/// A handle to an open file, returned by [`TinyFs::open`].
///
/// Unlike the original fixed ABI, a `FileDescriptor` can never be confused
/// with an error code: fallibility is carried by `Result`, not by sign.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct FileDescriptor(pub(crate) u16);

impl fmt::Display for FileDescriptor {
	fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
		write!(f, "{}", self.0)
	}
}

/// An open file's transient, in-memory state.
#[derive(Debug, Clone)]
pub(crate) struct OpenFileEntry {
	pub(crate) name: String,
	pub(crate) inode_block: u16,
	pub(crate) first_extent: Option<u16>,
	pub(crate) size: u16,
	pub(crate) offset: u32,
}

/// Metadata returned by [`TinyFs::read_file_info`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FileInfo {
	/// The file's name.
	pub name: String,
	/// The file's size in bytes.
	pub size: u16,
	/// Creation hour.
	pub hour: u32,
	/// Creation minute.
	pub minute: u32,
	/// Creation second.
	pub second: u32,
}

fn ceil_div(a: u32, b: u32) -> u32 {
	(a + b - 1) / b
}

/// Returns the current wall-clock hour/minute/second, used to stamp a new
/// inode's creation time. Computed directly off `SystemTime` (the same
/// primitive the teacher's `get_timestamp` uses) rather than pulling in a
/// calendar crate just to recover three small integers.
fn now_hms() -> (u32, u32, u32) {
	let secs = SystemTime::now()
		.duration_since(UNIX_EPOCH)
		.unwrap_or_default()
		.as_secs();
	let secs_of_day = (secs % 86_400) as u32;
	(secs_of_day / 3600, (secs_of_day / 60) % 60, secs_of_day % 60)
}

fn check_name_len(name: &str) -> Result<()> {
	let len = name.as_bytes().len();
	if len > NAME_MAX_LEN {
		return Err(TfsError::NameLengthError {
			name: name.to_owned(),
			len,
		});
	}
	Ok(())
}

impl TinyFs {
	/// Opens `name`, creating it if it doesn't already exist.
	///
	/// If a file with this name is already open, returns its existing
	/// descriptor instead of creating a second one.
	pub fn open(&mut self, name: &str) -> Result<FileDescriptor> {
		self.require_mounted()?;
		check_name_len(name)?;

		if let Some((&fd, _)) = self.open_files.iter().find(|(_, e)| e.name == name) {
			return Ok(fd);
		}

		let inode_block = self
			.bitmap_mut()?
			.find_free_run(1)
			.ok_or(TfsError::FreeBlockError(1))?;
		self.bitmap_mut()?.allocate(inode_block);
		self.flush_bitmap()?;

		let (hour, minute, second) = now_hms();
		let inode = Inode {
			first_extent: 0,
			name: name.to_owned(),
			size: 0,
			hour,
			minute,
			second,
		};
		self.write_inode(inode_block, &inode)?;

		self.root_mut()?.insert(inode_block)?;
		self.flush_root()?;

		let fd = self.fresh_fd();
		self.open_files.insert(
			fd,
			OpenFileEntry {
				name: name.to_owned(),
				inode_block,
				first_extent: None,
				size: 0,
				offset: 0,
			},
		);
		log::debug!("opened {name:?} as fd {fd} (inode block {inode_block})");
		Ok(fd)
	}

	/// Closes `fd`, dropping its open-file entry. The underlying file is
	/// untouched on disk.
	pub fn close(&mut self, fd: FileDescriptor) -> Result<()> {
		self.open_files
			.remove(&fd)
			.map(|_| ())
			.ok_or_else(|| TfsError::FileNotFoundError(format!("fd {fd}")))
	}

	fn entry(&self, fd: FileDescriptor) -> Result<OpenFileEntry> {
		self.open_files
			.get(&fd)
			.cloned()
			.ok_or_else(|| TfsError::FileNotFoundError(format!("fd {fd}")))
	}

	/// Replaces the entire contents of `fd` with `data`.
	///
	/// Any extents from a previous write are released first, then a fresh
	/// contiguous run is allocated for the new content. This is a whole-file
	/// replacement, not an in-place patch; sparse files are not supported.
	pub fn write(&mut self, fd: FileDescriptor, data: &[u8]) -> Result<()> {
		self.require_mounted()?;
		if data.len() > u16::MAX as usize {
			return Err(TfsError::WriteError(format!(
				"{} bytes exceeds the 16-bit size field",
				data.len()
			)));
		}
		let entry = self.entry(fd)?;

		if entry.size > 0 {
			if let Some(first) = entry.first_extent {
				let prev_blocks = ceil_div(entry.size as u32, PAYLOAD) as u16;
				self.release_contiguous(first, prev_blocks)?;
			}
		}

		let size = data.len();
		let new_blocks = if size == 0 {
			0
		} else {
			ceil_div(size as u32, PAYLOAD) as u16
		};

		let (first_extent, new_size) = if new_blocks == 0 {
			(None, 0u16)
		} else {
			let start = self
				.bitmap_mut()?
				.find_free_run(new_blocks)
				.ok_or(TfsError::FreeBlockError(new_blocks))?;
			if start as u32 + new_blocks as u32 - 1 > u8::MAX as u32 {
				// Extent pointers are single bytes, so a run landing past
				// block 255 can't be chained.
				return Err(TfsError::FreeBlockError(new_blocks));
			}
			for off in 0..new_blocks {
				self.bitmap_mut()?.allocate(start + off);
			}
			self.flush_bitmap()?;

			for k in 0..new_blocks {
				let block = start + k;
				let chunk_start = k as usize * PAYLOAD as usize;
				let chunk_end = usize::min(chunk_start + PAYLOAD as usize, size);
				let mut payload = [0u8; crate::layout::EXTENT_PAYLOAD_LEN];
				payload[..chunk_end - chunk_start].copy_from_slice(&data[chunk_start..chunk_end]);
				let next = if k + 1 < new_blocks { start + k + 1 } else { 0 };
				self.write_extent(
					block,
					&crate::layout::Extent {
						next: next as u8,
						payload,
					},
				)?;
			}
			(Some(start), size as u16)
		};

		let mut inode = self.read_inode(entry.inode_block)?;
		inode.first_extent = first_extent.map(|b| b as u8).unwrap_or(0);
		inode.size = new_size;
		self.write_inode(entry.inode_block, &inode)?;

		let open_entry = self.open_files.get_mut(&fd).expect("checked by entry()");
		open_entry.first_extent = first_extent;
		open_entry.size = new_size;
		open_entry.offset = 0;

		log::debug!("wrote {new_size} bytes to fd {fd}");
		Ok(())
	}

	/// Reads a single byte at the file's current offset and advances the
	/// offset by one.
	pub fn read_byte(&mut self, fd: FileDescriptor) -> Result<u8> {
		self.require_mounted()?;
		let entry = self.entry(fd)?;
		if entry.offset >= entry.size as u32 {
			return Err(TfsError::EndOfFileError {
				offset: entry.offset,
				size: entry.size,
			});
		}

		let extents_to_skip = entry.offset / PAYLOAD;
		let in_extent_offset = (entry.offset % PAYLOAD) as usize;

		let mut block = entry.first_extent.expect("size > 0 implies an extent chain");
		for _ in 0..extents_to_skip {
			let extent = self
				.read_extent(block)
				.map_err(|e| TfsError::ReadError(e.to_string()))?;
			block = extent.next as u16;
		}
		let extent = self
			.read_extent(block)
			.map_err(|e| TfsError::ReadError(e.to_string()))?;
		let byte = extent.payload[in_extent_offset];

		self.open_files.get_mut(&fd).expect("checked by entry()").offset += 1;
		Ok(byte)
	}

	/// Sets `fd`'s offset to `offset`, absolute. Always succeeds as long as
	/// `fd` is open; a subsequent [`TinyFs::read_byte`] at or past the
	/// file's size will fail with [`TfsError::EndOfFileError`].
	pub fn seek(&mut self, fd: FileDescriptor, offset: u32) -> Result<()> {
		self.require_mounted()?;
		self.open_files
			.get_mut(&fd)
			.map(|e| e.offset = offset)
			.ok_or_else(|| TfsError::FileNotFoundError(format!("fd {fd}")))
	}

	/// Deletes the file behind `fd`: releases its inode and every extent in
	/// its chain, removes it from the root directory, and closes `fd`.
	pub fn delete(&mut self, fd: FileDescriptor) -> Result<()> {
		self.require_mounted()?;
		let entry = self.entry(fd)?;

		let inode = self.read_inode(entry.inode_block)?;
		if inode.first_extent != 0 {
			let mut block = inode.first_extent as u16;
			loop {
				let extent = self.read_extent(block)?;
				let next = extent.next;
				self.release_one(block)?;
				if next == 0 {
					break;
				}
				block = next as u16;
			}
		}
		self.release_one(entry.inode_block)?;

		self.root_mut()?.remove(entry.inode_block);
		self.flush_root()?;

		self.open_files.remove(&fd);
		log::debug!("deleted {:?} (fd {fd})", entry.name);
		Ok(())
	}

	/// Renames the file behind `fd`, both in the open-file table and in the
	/// on-disk inode, so the rename survives an unmount and remount.
	pub fn rename(&mut self, fd: FileDescriptor, new_name: &str) -> Result<()> {
		self.require_mounted()?;
		check_name_len(new_name)?;
		let entry = self.entry(fd)?;

		let mut inode = self.read_inode(entry.inode_block)?;
		inode.name = new_name.to_owned();
		self.write_inode(entry.inode_block, &inode)?;

		self.open_files.get_mut(&fd).expect("checked by entry()").name = new_name.to_owned();
		Ok(())
	}

	/// Lists every file name currently in the root directory, in directory
	/// order.
	pub fn readdir(&mut self) -> Result<Vec<String>> {
		self.require_mounted()?;
		let blocks: Vec<u16> = self.root_mut()?.iter().collect();
		let mut names = Vec::with_capacity(blocks.len());
		for block in blocks {
			names.push(self.read_inode(block)?.name);
		}
		log::debug!("readdir: {} entries", names.len());
		Ok(names)
	}

	/// Reads the inode behind `fd` and returns its metadata.
	pub fn read_file_info(&mut self, fd: FileDescriptor) -> Result<FileInfo> {
		self.require_mounted()?;
		let entry = self.entry(fd)?;
		let inode = self.read_inode(entry.inode_block)?;
		Ok(FileInfo {
			name: inode.name,
			size: inode.size,
			hour: inode.hour,
			minute: inode.minute,
			second: inode.second,
		})
	}
}

#[cfg(test)]
mod test {
	use super::*;
	use crate::volume::{TinyFs, DEFAULT_DISK_SIZE};
	use tempfile::NamedTempFile;

	fn mounted() -> (NamedTempFile, TinyFs) {
		let tmp = NamedTempFile::new().unwrap();
		TinyFs::format(tmp.path(), DEFAULT_DISK_SIZE).unwrap();
		let mut fs = TinyFs::new();
		fs.mount(tmp.path()).unwrap();
		(tmp, fs)
	}

	#[test]
	fn fresh_mount_has_empty_readdir() {
		let (_tmp, mut fs) = mounted();
		assert!(fs.readdir().unwrap().is_empty());
	}

	#[test]
	fn open_assigns_sequential_fds_in_insertion_order() {
		let (_tmp, mut fs) = mounted();
		let fd1 = fs.open("alpha").unwrap();
		let fd2 = fs.open("beta").unwrap();
		assert_eq!(fd1, FileDescriptor(1));
		assert_eq!(fd2, FileDescriptor(2));
		assert_eq!(fs.readdir().unwrap(), vec!["alpha", "beta"]);
	}

	#[test]
	fn reopening_same_name_returns_same_fd() {
		let (_tmp, mut fs) = mounted();
		let fd1 = fs.open("alpha").unwrap();
		let fd2 = fs.open("alpha").unwrap();
		assert_eq!(fd1, fd2);
	}

	#[test]
	fn write_then_read_byte_then_eof() {
		let (_tmp, mut fs) = mounted();
		let fd = fs.open("alpha").unwrap();
		fs.write(fd, b"Hello").unwrap();

		let mut out = Vec::new();
		for _ in 0..5 {
			out.push(fs.read_byte(fd).unwrap());
		}
		assert_eq!(out, b"Hello");
		assert!(matches!(
			fs.read_byte(fd),
			Err(TfsError::EndOfFileError { .. })
		));
	}

	#[test]
	fn write_then_read_roundtrips_across_multiple_extents() {
		let (_tmp, mut fs) = mounted();
		let fd = fs.open("big").unwrap();
		let data: Vec<u8> = (0..600u32).map(|i| (i % 256) as u8).collect();
		fs.write(fd, &data).unwrap();

		let mut out = Vec::with_capacity(data.len());
		for _ in 0..data.len() {
			out.push(fs.read_byte(fd).unwrap());
		}
		assert_eq!(out, data);
	}

	#[test]
	fn extent_chain_length_matches_payload_boundary() {
		let (_tmp, mut fs) = mounted();
		let fd = fs.open("f1").unwrap();
		fs.write(fd, &vec![1u8; crate::layout::EXTENT_PAYLOAD_LEN]).unwrap();
		let info_block = fs.entry(fd).unwrap().inode_block;
		let inode = fs.read_inode(info_block).unwrap();
		let first = inode.first_extent as u16;
		let extent = fs.read_extent(first).unwrap();
		assert_eq!(extent.next, 0);

		let fd2 = fs.open("f2").unwrap();
		fs.write(fd2, &vec![2u8; crate::layout::EXTENT_PAYLOAD_LEN + 1])
			.unwrap();
		let block2 = fs.entry(fd2).unwrap().inode_block;
		let inode2 = fs.read_inode(block2).unwrap();
		let first2 = inode2.first_extent as u16;
		let extent2 = fs.read_extent(first2).unwrap();
		assert_eq!(extent2.next, first2 + 1);
		let extent3 = fs.read_extent(extent2.next as u16).unwrap();
		assert_eq!(extent3.next, 0);
	}

	#[test]
	fn overwrite_releases_old_extents_and_hides_old_data() {
		let (_tmp, mut fs) = mounted();
		let fd = fs.open("alpha").unwrap();

		let free_before = count_free(&fs);
		fs.write(fd, &vec![b'X'; 504]).unwrap();
		let free_after_first = count_free(&fs);
		assert_eq!(free_before - free_after_first, 2);

		fs.write(fd, &vec![b'Y'; 100]).unwrap();
		let free_after_second = count_free(&fs);
		assert_eq!(free_before - free_after_second, 1);

		let mut out = Vec::new();
		for _ in 0..100 {
			out.push(fs.read_byte(fd).unwrap());
		}
		assert_eq!(out, vec![b'Y'; 100]);
	}

	fn count_free(fs: &TinyFs) -> u32 {
		let bm = fs.bitmap.as_ref().unwrap();
		(0..bm.num_blocks()).filter(|&i| bm.is_free(i)).count() as u32
	}

	#[test]
	fn seek_to_size_then_read_is_eof() {
		let (_tmp, mut fs) = mounted();
		let fd = fs.open("alpha").unwrap();
		fs.write(fd, b"Hello").unwrap();
		fs.seek(fd, 5).unwrap();
		assert!(matches!(
			fs.read_byte(fd),
			Err(TfsError::EndOfFileError { .. })
		));
	}

	#[test]
	fn delete_then_reopen_same_name_is_fresh() {
		let (_tmp, mut fs) = mounted();
		let fd1 = fs.open("alpha").unwrap();
		fs.open("beta").unwrap();
		fs.write(fd1, b"data").unwrap();

		fs.delete(fd1).unwrap();
		assert_eq!(fs.readdir().unwrap(), vec!["beta"]);

		let fd_new = fs.open("alpha").unwrap();
		let info = fs.read_file_info(fd_new).unwrap();
		assert_eq!(info.size, 0);
	}

	#[test]
	fn rename_persists_across_remount() {
		let tmp = NamedTempFile::new().unwrap();
		TinyFs::format(tmp.path(), DEFAULT_DISK_SIZE).unwrap();
		let mut fs = TinyFs::new();
		fs.mount(tmp.path()).unwrap();
		let fd = fs.open("old").unwrap();
		fs.rename(fd, "new").unwrap();
		fs.unmount().unwrap();

		fs.mount(tmp.path()).unwrap();
		assert_eq!(fs.readdir().unwrap(), vec!["new"]);
	}

	#[test]
	fn name_too_long_is_rejected() {
		let (_tmp, mut fs) = mounted();
		assert!(matches!(
			fs.open("toolongname"),
			Err(TfsError::NameLengthError { .. })
		));
	}

	#[test]
	fn directory_full_once_every_slot_is_taken() {
		let tmp = NamedTempFile::new().unwrap();
		// One inode block per file plus superblock/root-dir: give enough
		// blocks for every directory slot to be filled.
		TinyFs::format(tmp.path(), 256 * 130).unwrap();
		let mut fs = TinyFs::new();
		fs.mount(tmp.path()).unwrap();
		for i in 0..crate::directory::ROOT_DIR_CAPACITY {
			fs.open(&format!("f{i}")).unwrap();
		}
		assert!(matches!(
			fs.open("overflow"),
			Err(TfsError::DirectoryFullError(_))
		));
	}

	#[test]
	fn operations_require_mount() {
		let mut fs = TinyFs::new();
		assert!(matches!(fs.open("x"), Err(TfsError::MountedError(_))));
		assert!(matches!(fs.readdir(), Err(TfsError::MountedError(_))));
	}

	#[test]
	fn unknown_fd_is_file_not_found() {
		let (_tmp, mut fs) = mounted();
		assert!(matches!(
			fs.close(FileDescriptor(999)),
			Err(TfsError::FileNotFoundError(_))
		));
	}
}
