//! Dispatches an open archive member to the raw or piped read path based on
//! the flags the prober set when it was cataloged.

use std::sync::Arc;
use std::time::Duration;

use crate::archive::decoder::Decoder;
use crate::cache::{FileEntry, FileFlags};
use crate::error::RarfsError;
use crate::io::piped::PipedHandle;
use crate::io::raw::RawHandle;

pub enum IoHandle {
    Raw(RawHandle),
    Piped(PipedHandle),
}

impl IoHandle {
    /// Opens a handle for `entry`, choosing the raw path when its geometry
    /// was fully resolved to a stored payload (whether or not it spans more
    /// than one volume), and falling back to the decoder otherwise.
    pub fn open<D: Decoder + 'static>(
        rt: &tokio::runtime::Handle,
        decoder: Arc<D>,
        entry: Arc<FileEntry>,
        password: Option<String>,
        decoder_timeout: Duration,
        seek_length: u64,
        save_eof: bool,
    ) -> Result<Self, RarfsError> {
        if entry.flags.contains(FileFlags::RAW) {
            Ok(IoHandle::Raw(RawHandle::new(entry)))
        } else {
            PipedHandle::open(rt, decoder, &entry, password, decoder_timeout, seek_length, save_eof)
                .map(IoHandle::Piped)
        }
    }

    pub fn read(&self, offset: u64, size: u32) -> Result<Vec<u8>, RarfsError> {
        match self {
            IoHandle::Raw(h) => h.read(offset, size),
            IoHandle::Piped(h) => Ok(h.read(offset, size)),
        }
    }
}
