//! File access for clips split across several chunk files.
//!
//! A recording is stored as `clip.MLV` followed by optional `clip.M00`,
//! `clip.M01`, ... continuation chunks. Frames are read through the
//! [`FrameSource`] trait, either from one set of handles shared behind a
//! lock or from a private set opened per worker.

use std::fs::File;
use std::io::{Read, Seek, SeekFrom};
use std::path::{Path, PathBuf};
use std::sync::Arc;

use parking_lot::Mutex;
use rawclip_core::{RawClipError, Result};
use smallvec::SmallVec;
use tracing::debug;

/// Most continuation chunks a clip may have (`.M00` to `.M99`).
pub const MAX_CONTINUATION_CHUNKS: usize = 100;

/// Positioned reads from a clip's chunk files.
///
/// A seek is never interleaved with another reader's read on the same
/// handle: implementations either own their handles or serialize the
/// seek and read pair.
pub trait FrameSource {
    /// Fill `buf` from `offset` in chunk `chunk`. A short read is an I/O error.
    fn read_exact_at(&mut self, chunk: u32, offset: u64, buf: &mut [u8]) -> Result<()>;

    /// Number of chunk files behind this source.
    fn chunk_count(&self) -> usize;
}

fn read_at<R: Read + Seek>(reader: &mut R, offset: u64, buf: &mut [u8]) -> Result<()> {
    reader.seek(SeekFrom::Start(offset))?;
    reader.read_exact(buf)?;
    Ok(())
}

fn no_such_chunk(chunk: u32, count: usize) -> RawClipError {
    RawClipError::InvalidParameter(format!("chunk {chunk} requested, clip has {count}"))
}

/// In-memory or test readers, one per chunk.
impl<R: Read + Seek> FrameSource for Vec<R> {
    fn read_exact_at(&mut self, chunk: u32, offset: u64, buf: &mut [u8]) -> Result<()> {
        let count = self.len();
        let reader = self
            .get_mut(chunk as usize)
            .ok_or_else(|| no_such_chunk(chunk, count))?;
        read_at(reader, offset, buf)
    }

    fn chunk_count(&self) -> usize {
        self.len()
    }
}

/// Paths and sizes of the chunk files that make up one clip.
#[derive(Debug, Clone)]
pub struct ChunkSet {
    paths: SmallVec<[PathBuf; 4]>,
    lengths: SmallVec<[u64; 4]>,
}

impl ChunkSet {
    /// Find the chunks of the clip whose first file is `path`.
    ///
    /// Continuation chunks are picked up in order until the first missing
    /// number. The extension case of the first file is kept, so `clip.mlv`
    /// looks for `clip.m00`.
    pub fn discover<P: AsRef<Path>>(path: P) -> Result<Self> {
        let first = path.as_ref().to_path_buf();
        let len = std::fs::metadata(&first)?.len();

        let mut paths: SmallVec<[PathBuf; 4]> = SmallVec::new();
        let mut lengths: SmallVec<[u64; 4]> = SmallVec::new();
        paths.push(first.clone());
        lengths.push(len);

        let lowercase = first
            .extension()
            .and_then(|ext| ext.to_str())
            .is_some_and(|ext| ext.chars().any(|c| c.is_ascii_lowercase()));

        for n in 0..MAX_CONTINUATION_CHUNKS {
            let ext = if lowercase {
                format!("m{n:02}")
            } else {
                format!("M{n:02}")
            };
            let candidate = first.with_extension(ext);
            match std::fs::metadata(&candidate) {
                Ok(meta) if meta.is_file() => {
                    debug!(path = %candidate.display(), "Found continuation chunk");
                    paths.push(candidate);
                    lengths.push(meta.len());
                }
                _ => break,
            }
        }

        Ok(Self { paths, lengths })
    }

    pub fn len(&self) -> usize {
        self.paths.len()
    }

    pub fn is_empty(&self) -> bool {
        self.paths.is_empty()
    }

    pub fn paths(&self) -> &[PathBuf] {
        &self.paths
    }

    /// Total size of all chunks in bytes.
    pub fn total_bytes(&self) -> u64 {
        self.lengths.iter().sum()
    }

    /// Open a fresh handle on every chunk.
    pub fn open(&self) -> Result<ChunkHandles> {
        let files = self
            .paths
            .iter()
            .map(File::open)
            .collect::<std::io::Result<Vec<_>>>()?;
        Ok(ChunkHandles { files })
    }
}

/// One open handle per chunk, owned by a single reader.
#[derive(Debug)]
pub struct ChunkHandles {
    files: Vec<File>,
}

impl ChunkHandles {
    /// Handles in chunk order, for scanning and indexing.
    pub fn files_mut(&mut self) -> &mut [File] {
        &mut self.files
    }
}

impl FrameSource for ChunkHandles {
    fn read_exact_at(&mut self, chunk: u32, offset: u64, buf: &mut [u8]) -> Result<()> {
        let count = self.files.len();
        let file = self
            .files
            .get_mut(chunk as usize)
            .ok_or_else(|| no_such_chunk(chunk, count))?;
        read_at(file, offset, buf)
    }

    fn chunk_count(&self) -> usize {
        self.files.len()
    }
}

/// One set of handles shared by every reader; each seek and read pair runs
/// under the lock.
#[derive(Debug, Clone)]
pub struct SharedChunks {
    inner: Arc<Mutex<ChunkHandles>>,
    count: usize,
}

impl SharedChunks {
    pub fn new(handles: ChunkHandles) -> Self {
        let count = handles.files.len();
        Self {
            inner: Arc::new(Mutex::new(handles)),
            count,
        }
    }
}

impl FrameSource for SharedChunks {
    fn read_exact_at(&mut self, chunk: u32, offset: u64, buf: &mut [u8]) -> Result<()> {
        self.inner.lock().read_exact_at(chunk, offset, buf)
    }

    fn chunk_count(&self) -> usize {
        self.count
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::{Cursor, Write};

    fn write_file(dir: &Path, name: &str, bytes: &[u8]) -> PathBuf {
        let path = dir.join(name);
        let mut f = File::create(&path).unwrap();
        f.write_all(bytes).unwrap();
        path
    }

    #[test]
    fn test_discover_continuation_chunks() {
        let dir = tempfile::tempdir().unwrap();
        let first = write_file(dir.path(), "clip.MLV", &[0u8; 10]);
        write_file(dir.path(), "clip.M00", &[1u8; 20]);
        write_file(dir.path(), "clip.M01", &[2u8; 30]);
        // gap at M02 ends discovery
        write_file(dir.path(), "clip.M03", &[3u8; 40]);

        let set = ChunkSet::discover(&first).unwrap();
        assert_eq!(set.len(), 3);
        assert_eq!(set.total_bytes(), 60);
        assert!(set.paths()[2].ends_with("clip.M01"));
    }

    #[test]
    fn test_discover_keeps_extension_case() {
        let dir = tempfile::tempdir().unwrap();
        let first = write_file(dir.path(), "take.mlv", &[0u8; 4]);
        write_file(dir.path(), "take.m00", &[0u8; 4]);
        assert_eq!(ChunkSet::discover(&first).unwrap().len(), 2);
    }

    #[test]
    fn test_discover_missing_file() {
        let dir = tempfile::tempdir().unwrap();
        let err = ChunkSet::discover(dir.path().join("absent.MLV")).unwrap_err();
        assert!(matches!(err, RawClipError::Io(_)));
    }

    #[test]
    fn test_shared_and_private_reads_agree() {
        let dir = tempfile::tempdir().unwrap();
        let first = write_file(dir.path(), "clip.MLV", b"0123456789");
        write_file(dir.path(), "clip.M00", b"abcdefghij");
        let set = ChunkSet::discover(&first).unwrap();

        let mut private = set.open().unwrap();
        let mut shared = SharedChunks::new(set.open().unwrap());
        let mut other = shared.clone();

        let mut a = [0u8; 4];
        let mut b = [0u8; 4];
        private.read_exact_at(1, 3, &mut a).unwrap();
        shared.read_exact_at(1, 3, &mut b).unwrap();
        assert_eq!(&a, b"defg");
        assert_eq!(a, b);

        other.read_exact_at(0, 6, &mut b).unwrap();
        assert_eq!(&b, b"6789");
        assert_eq!(other.chunk_count(), 2);
    }

    #[test]
    fn test_short_read_is_io_error() {
        let mut source = vec![Cursor::new(vec![0u8; 8])];
        let mut buf = [0u8; 4];
        let err = source.read_exact_at(0, 6, &mut buf).unwrap_err();
        assert!(matches!(err, RawClipError::Io(_)));
        let err = source.read_exact_at(2, 0, &mut buf).unwrap_err();
        assert!(matches!(err, RawClipError::InvalidParameter(_)));
    }
}
