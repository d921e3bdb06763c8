//! Sequential ustar writer over an async file.
//!
//! Entry names are written into the header verbatim, so a directory keeps its
//! trailing `/`. Timestamps and ownership are zeroed.

use std::io::SeekFrom;

use tar::{EntryType, Header};
use tokio::fs::File;
use tokio::io::{AsyncSeekExt, AsyncWriteExt, BufWriter};

use crate::error::ImageError;

const BLOCK: u64 = 512;
const NAME_LEN: usize = 100;
const ZEROS: [u8; BLOCK as usize] = [0; BLOCK as usize];

#[derive(Debug)]
struct OpenEntry {
    name: String,
    size: u64,
}

/// Appends entries in call order; one file body may be open at a time.
#[derive(Debug)]
pub struct ArchiveWriter {
    out: BufWriter<File>,
    open: Option<OpenEntry>,
    entries: usize,
}

impl ArchiveWriter {
    pub fn new(file: File) -> Self {
        Self {
            out: BufWriter::new(file),
            open: None,
            entries: 0,
        }
    }

    /// Number of headers written so far.
    pub fn entries(&self) -> usize {
        self.entries
    }

    pub async fn append_directory(&mut self, name: &str) -> Result<(), ImageError> {
        self.write_header(name, 0, EntryType::Directory, 0o755).await
    }

    /// Write the header for a regular file of `size` bytes. The body goes through
    /// [`ArchiveWriter::body`] and is closed with [`ArchiveWriter::end_file`].
    pub async fn begin_file(&mut self, name: &str, size: u64) -> Result<(), ImageError> {
        self.write_header(name, size, EntryType::Regular, 0o644).await?;
        self.open = Some(OpenEntry {
            name: name.to_string(),
            size,
        });
        Ok(())
    }

    /// Sink for the open file's body.
    pub fn body(&mut self) -> &mut BufWriter<File> {
        &mut self.out
    }

    /// Close the open file after `written` body bytes and pad it to a block boundary.
    pub async fn end_file(&mut self, written: u64) -> Result<(), ImageError> {
        let Some(entry) = self.open.take() else {
            return Ok(());
        };
        if written != entry.size {
            return Err(ImageError::SizeMismatch {
                name: entry.name,
                declared: entry.size,
                actual: written,
            });
        }
        self.pad(written).await
    }

    /// Append a regular file held in memory.
    pub async fn append_bytes(&mut self, name: &str, data: &[u8]) -> Result<(), ImageError> {
        self.begin_file(name, data.len() as u64).await?;
        self.out.write_all(data).await?;
        self.end_file(data.len() as u64).await
    }

    /// Write the end-of-archive marker, flush, and return the file rewound to 0.
    pub async fn finish(mut self) -> Result<File, ImageError> {
        self.out.write_all(&ZEROS).await?;
        self.out.write_all(&ZEROS).await?;
        self.out.flush().await?;

        let mut file = self.out.into_inner();
        file.sync_all().await?;
        file.seek(SeekFrom::Start(0)).await?;
        Ok(file)
    }

    async fn write_header(
        &mut self,
        name: &str,
        size: u64,
        entry_type: EntryType,
        mode: u32,
    ) -> Result<(), ImageError> {
        let header = header(name, size, entry_type, mode)?;
        self.out.write_all(header.as_bytes()).await?;
        self.entries += 1;
        Ok(())
    }

    async fn pad(&mut self, size: u64) -> Result<(), ImageError> {
        let remainder = size % BLOCK;
        if remainder != 0 {
            self.out
                .write_all(&ZEROS[..(BLOCK - remainder) as usize])
                .await?;
        }
        Ok(())
    }
}

fn header(name: &str, size: u64, entry_type: EntryType, mode: u32) -> Result<Header, ImageError> {
    let bytes = name.as_bytes();
    if bytes.is_empty() || bytes.len() > NAME_LEN {
        return Err(ImageError::EntryName(name.to_string()));
    }

    let mut header = Header::new_ustar();
    header.as_old_mut().name[..bytes.len()].copy_from_slice(bytes);
    header.set_entry_type(entry_type);
    header.set_size(size);
    header.set_mode(mode);
    header.set_uid(0);
    header.set_gid(0);
    header.set_mtime(0);
    header.set_cksum();
    Ok(header)
}
