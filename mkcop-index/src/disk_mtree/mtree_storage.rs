//! Disk storage layer for tree pages.
//!
//! Pages are fixed-size slots in a single file. Page 0 holds the
//! [`FileHeader`]; every other slot holds one checksummed node. Each
//! `read_page` call is exactly one seek and one read.

use std::fs::{File, OpenOptions};
use std::io::{self, Read, Seek, SeekFrom, Write};
use std::path::{Path, PathBuf};

use parking_lot::RwLock;

use super::mtree_types::{FileHeader, MTreeError, MTreeResult, Node, PageId, PageWithChecksum};

/// Reads and writes individual pages of a tree file.
pub struct Storage {
    file: RwLock<File>,
    path: PathBuf,
    page_size: usize,
}

impl Storage {
    /// Create a new storage file, truncating an existing one
    pub fn create(path: &Path, page_size: usize) -> MTreeResult<Self> {
        let file = OpenOptions::new()
            .read(true)
            .write(true)
            .create(true)
            .truncate(true)
            .open(path)?;

        Ok(Self {
            file: RwLock::new(file),
            path: path.to_path_buf(),
            page_size,
        })
    }

    /// Open an existing storage file. The page size is taken from its header,
    /// which is validated but not returned; see [`Storage::read_header`].
    pub fn open(path: &Path) -> MTreeResult<Self> {
        let mut file = OpenOptions::new().read(true).write(true).open(path)?;
        let header = Self::decode_header(&mut file)?;
        header.validate()?;

        Ok(Self {
            file: RwLock::new(file),
            path: path.to_path_buf(),
            page_size: header.page_size as usize,
        })
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    pub fn page_size(&self) -> usize {
        self.page_size
    }

    /// Re-read the header persisted in page 0.
    pub fn read_header(&self) -> MTreeResult<FileHeader> {
        Self::decode_header(&mut self.file.write())
    }

    // The header is a prefix of page 0 whatever the page size.
    fn decode_header(file: &mut File) -> MTreeResult<FileHeader> {
        let mut buffer = Vec::new();
        file.seek(SeekFrom::Start(0))?;
        Read::by_ref(file).take(1024).read_to_end(&mut buffer)?;
        bincode::serde::decode_from_slice(&buffer, bincode::config::legacy())
            .map(|(header, _)| header)
            .map_err(|e| MTreeError::Serialization(e.to_string()))
    }

    pub fn write_header(&self, header: &FileHeader) -> MTreeResult<()> {
        let bytes = bincode::serde::encode_to_vec(header, bincode::config::legacy())
            .map_err(|e| MTreeError::Serialization(e.to_string()))?;
        self.write_slot(0, bytes)
    }

    /// Read a single node from disk and verify its checksum.
    pub fn read_page(&self, page_id: PageId) -> MTreeResult<Node> {
        if page_id == 0 {
            return Err(MTreeError::Io(io::Error::new(
                io::ErrorKind::InvalidInput,
                "Cannot read page 0 (reserved for header)",
            )));
        }

        let offset = page_id * self.page_size as u64;
        let mut file = self.file.write();
        if offset + self.page_size as u64 > file.metadata()?.len() {
            return Err(MTreeError::PageNotFound(page_id));
        }
        file.seek(SeekFrom::Start(offset))?;
        let mut buffer = vec![0u8; self.page_size];
        file.read_exact(&mut buffer)?;

        let page: PageWithChecksum =
            bincode::serde::decode_from_slice(&buffer, bincode::config::legacy())
                .map(|(page, _)| page)
                .map_err(|e| MTreeError::Serialization(e.to_string()))?;
        page.into_node()
    }

    /// Write a single node to disk with checksum
    pub fn write_page(&self, page_id: PageId, node: &Node) -> MTreeResult<()> {
        if page_id == 0 {
            return Err(MTreeError::Io(io::Error::new(
                io::ErrorKind::InvalidInput,
                "Cannot write to page 0 (reserved for header)",
            )));
        }

        let page = PageWithChecksum::new(node.clone())?;
        let bytes = bincode::serde::encode_to_vec(&page, bincode::config::legacy())
            .map_err(|e| MTreeError::Serialization(e.to_string()))?;
        self.write_slot(page_id, bytes)
    }

    fn write_slot(&self, page_id: PageId, mut bytes: Vec<u8>) -> MTreeResult<()> {
        if bytes.len() > self.page_size {
            return Err(MTreeError::Io(io::Error::new(
                io::ErrorKind::InvalidData,
                format!(
                    "Page {} too large: {} bytes (max {})",
                    page_id,
                    bytes.len(),
                    self.page_size
                ),
            )));
        }
        bytes.resize(self.page_size, 0);

        let mut file = self.file.write();
        file.seek(SeekFrom::Start(page_id * self.page_size as u64))?;
        file.write_all(&bytes)?;
        Ok(())
    }

    /// Sync file to disk
    pub fn sync(&self) -> MTreeResult<()> {
        self.file.write().sync_all()?;
        Ok(())
    }
}
