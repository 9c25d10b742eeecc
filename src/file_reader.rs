//! Bounded-chunk reads of a whole local file into memory.

use crate::error::TransferError;
use std::fs::File;
use std::io::{self, Read};
use std::path::Path;
use tracing::debug;

pub const READ_CHUNK_SIZE: usize = 1024;

/// Reads the whole file, 1 KiB at a time.
pub fn read_local_file(path: impl AsRef<Path>) -> Result<Vec<u8>, TransferError> {
    read_local_file_chunked(path, READ_CHUNK_SIZE)
}

/// Reads the whole file without asking for more than `chunk_size` bytes per call.
///
/// The returned buffer is exactly as long as the file was when opened. A file
/// that shrinks mid-read fails with `UnexpectedEof` rather than looping.
pub fn read_local_file_chunked(
    path: impl AsRef<Path>,
    chunk_size: usize,
) -> Result<Vec<u8>, TransferError> {
    let path = path.as_ref();
    let mut file = File::open(path).map_err(|e| TransferError::file(path, e))?;
    let len = file.metadata().map_err(|e| TransferError::file(path, e))?.len();
    let len = buffer_len(path, len)?;

    let mut data = vec![0u8; len];
    let mut offset = 0usize;
    let mut chunk = len.min(chunk_size.max(1));

    while offset < len {
        let read = file
            .read(&mut data[offset..offset + chunk])
            .map_err(|e| TransferError::file(path, e))?;
        if read == 0 {
            return Err(TransferError::file(
                path,
                io::Error::new(
                    io::ErrorKind::UnexpectedEof,
                    format!("file ended at {offset} of {len} bytes"),
                ),
            ));
        }
        offset += read;
        chunk = chunk.min(len - offset);
    }

    debug!(path = %path.display(), bytes = len, "read local file");
    Ok(data)
}

/// The in-memory size for a file of `len` bytes, if one buffer can hold it.
fn buffer_len(path: &Path, len: u64) -> Result<usize, TransferError> {
    usize::try_from(len)
        .ok()
        .filter(|&n| n <= isize::MAX as usize)
        .ok_or_else(|| {
            TransferError::file(
                path,
                io::Error::new(
                    io::ErrorKind::FileTooLarge,
                    format!("{len} bytes do not fit in memory on this platform"),
                ),
            )
        })
}
