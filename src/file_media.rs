//! FileMedia trait - random-access byte source for CHD payloads.

use std::fs::File;
use std::io::{self, Read, Seek, SeekFrom};
use std::path::{Path, PathBuf};
use std::sync::Mutex;

/// Abstract byte source that compressed blocks are read from.
///
/// Implementations are shared between worker threads, so reads take
/// `&self`. The library provides [`LocalFileMedia`] for files on disk and
/// [`StreamMedia`] for any seekable reader.
pub trait FileMedia: Send + Sync {
    /// Total length of the source in bytes.
    fn len(&self) -> u64;

    fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Fill `buf` with the bytes starting at `offset`.
    fn read_exact_at(&self, offset: u64, buf: &mut [u8]) -> io::Result<()>;
}

/// Local file implementation.
#[derive(Debug)]
pub struct LocalFileMedia {
    path: PathBuf,
    length: u64,
    file: Mutex<File>,
}

impl LocalFileMedia {
    pub fn open(path: impl AsRef<Path>) -> io::Result<Self> {
        let path = path.as_ref().to_path_buf();
        let file = File::open(&path)?;
        let length = file.metadata()?.len();
        Ok(Self {
            path,
            length,
            file: Mutex::new(file),
        })
    }

    pub fn path(&self) -> &Path {
        &self.path
    }
}

impl FileMedia for LocalFileMedia {
    fn len(&self) -> u64 {
        self.length
    }

    fn read_exact_at(&self, offset: u64, buf: &mut [u8]) -> io::Result<()> {
        let mut file = self
            .file
            .lock()
            .map_err(|_| io::Error::other("file lock poisoned"))?;
        file.seek(SeekFrom::Start(offset))?;
        file.read_exact(buf)
    }
}

/// Any `Read + Seek` source, serialized behind a mutex.
pub struct StreamMedia<R> {
    inner: Mutex<R>,
    length: u64,
}

impl<R: Read + Seek> StreamMedia<R> {
    pub fn new(mut reader: R) -> io::Result<Self> {
        let length = reader.seek(SeekFrom::End(0))?;
        Ok(Self {
            inner: Mutex::new(reader),
            length,
        })
    }

    pub fn into_inner(self) -> R {
        match self.inner.into_inner() {
            Ok(reader) => reader,
            Err(poisoned) => poisoned.into_inner(),
        }
    }
}

impl<R: Read + Seek + Send> FileMedia for StreamMedia<R> {
    fn len(&self) -> u64 {
        self.length
    }

    fn read_exact_at(&self, offset: u64, buf: &mut [u8]) -> io::Result<()> {
        let mut reader = self
            .inner
            .lock()
            .map_err(|_| io::Error::other("reader lock poisoned"))?;
        reader.seek(SeekFrom::Start(offset))?;
        reader.read_exact(buf)
    }
}

impl FileMedia for [u8] {
    fn len(&self) -> u64 {
        <[u8]>::len(self) as u64
    }

    fn read_exact_at(&self, offset: u64, buf: &mut [u8]) -> io::Result<()> {
        let start = usize::try_from(offset)
            .ok()
            .filter(|&start| start <= <[u8]>::len(self))
            .ok_or_else(|| io::Error::from(io::ErrorKind::UnexpectedEof))?;
        let src = self[start..]
            .get(..buf.len())
            .ok_or_else(|| io::Error::from(io::ErrorKind::UnexpectedEof))?;
        buf.copy_from_slice(src);
        Ok(())
    }
}

impl FileMedia for Vec<u8> {
    fn len(&self) -> u64 {
        self.as_slice().len() as u64
    }

    fn read_exact_at(&self, offset: u64, buf: &mut [u8]) -> io::Result<()> {
        self.as_slice().read_exact_at(offset, buf)
    }
}
