//! Append only file.
//!
//! Every command that mutates the store is appended to the file in the exact wire format it was
//! received in. On startup the file is read back with the same codec used for client connections
//! and each record is dispatched again, rebuilding the store.

use bytes::BytesMut;
use futures::StreamExt;
use std::io;
use std::path::{Path, PathBuf};
use strum_macros::{Display, EnumString};
use thiserror::Error as ThisError;
use tokio::fs::{File, OpenOptions};
use tokio::io::AsyncWriteExt;
use tokio::sync::Mutex;
use tokio_util::codec::{Decoder, FramedRead};
use tracing::{debug, error, info};

use crate::codec::FrameCodec;
use crate::frame::Frame;

#[derive(Debug, ThisError)]
pub enum Error {
    #[error("append only file I/O error: {0}")]
    Io(#[from] io::Error),
    /// A record could not be decoded. Records before it were dispatched, they end at byte
    /// `offset`.
    #[error("append only file is corrupted at record {record} (byte {offset}): {cause}")]
    Corrupted {
        record: usize,
        offset: u64,
        cause: String,
    },
    /// The file ends in the middle of a record, as left by an interrupted append. Everything
    /// before byte `offset` was dispatched.
    #[error("append only file is truncated at record {record} (byte {offset})")]
    Truncated { record: usize, offset: u64 },
    #[error("append only file is closed")]
    Closed,
}

/// When appended data is forced to disk.
///
/// Ref: <https://redis.io/docs/latest/operate/oss_and_stack/management/persistence/>
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Display, EnumString)]
#[strum(serialize_all = "lowercase", ascii_case_insensitive)]
pub enum FsyncPolicy {
    /// After every append, before the command is applied.
    Always,
    /// Once per second, from a background task.
    #[default]
    Everysec,
    /// Never explicitly, the operating system decides.
    No,
}

pub struct Aof {
    path: PathBuf,
    fsync: FsyncPolicy,
    // Appends hold the lock for the whole record so records never interleave.
    file: Mutex<Option<File>>,
}

impl Aof {
    /// Opens the file at `path` for appending, creating it if it doesn't exist.
    pub async fn open(path: impl AsRef<Path>, fsync: FsyncPolicy) -> Result<Aof, Error> {
        let path = path.as_ref().to_path_buf();
        let file = OpenOptions::new()
            .create(true)
            .append(true)
            .open(&path)
            .await?;

        info!(path = %path.display(), %fsync, "append only file opened");

        Ok(Aof {
            path,
            fsync,
            file: Mutex::new(Some(file)),
        })
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    pub fn fsync(&self) -> FsyncPolicy {
        self.fsync
    }

    /// Appends a request to the file. When this returns `Ok` the record has been handed to the
    /// operating system, and with `FsyncPolicy::Always` it is also on disk.
    pub async fn append(&self, request: &Frame) -> Result<(), Error> {
        self.append_with(request, || ()).await
    }

    /// Appends a request and, only once it is logged, runs `apply` before any other append can
    /// start. Records are therefore applied in the same order they are replayed.
    ///
    /// A failed write is rolled back so the file keeps ending on a record boundary. If even that
    /// fails the file is closed and every later append fails with `Error::Closed`.
    pub async fn append_with<T, F>(&self, request: &Frame, apply: F) -> Result<T, Error>
    where
        F: FnOnce() -> T,
    {
        let bytes = request.serialize();

        let mut guard = self.file.lock().await;
        let file = guard.as_mut().ok_or(Error::Closed)?;
        let len = file.metadata().await?.len();

        if let Err(err) = write_record(file, &bytes, self.fsync).await {
            if let Err(rollback_err) = file.set_len(len).await {
                error!(
                    %rollback_err,
                    path = %self.path.display(),
                    "failed to roll back partial record, closing append only file"
                );
                guard.take();
            }
            return Err(err.into());
        }

        debug!(bytes = bytes.len(), "appended record");

        Ok(apply())
    }

    /// Forces every appended record to disk.
    pub async fn sync(&self) -> Result<(), Error> {
        let mut file = self.file.lock().await;
        let file = file.as_mut().ok_or(Error::Closed)?;

        file.flush().await?;
        file.sync_data().await?;

        Ok(())
    }

    /// Flushes and releases the file. Appending afterwards fails with `Error::Closed`.
    pub async fn close(&self) -> Result<(), Error> {
        let file = self.file.lock().await.take();

        if let Some(mut file) = file {
            file.flush().await?;
            file.sync_all().await?;
            info!(path = %self.path.display(), "append only file closed");
        }

        Ok(())
    }
}

async fn write_record(file: &mut File, bytes: &[u8], fsync: FsyncPolicy) -> io::Result<()> {
    file.write_all(bytes).await?;
    file.flush().await?;

    if fsync == FsyncPolicy::Always {
        file.sync_data().await?;
    }

    Ok(())
}

/// Decodes records with `FrameCodec`, keeping track of where the last complete one ends.
#[derive(Debug, Default)]
struct RecordCodec {
    records: usize,
    offset: u64,
}

impl Decoder for RecordCodec {
    type Item = Frame;
    type Error = Error;

    fn decode(&mut self, src: &mut BytesMut) -> Result<Option<Frame>, Error> {
        let buffered = src.len();

        match FrameCodec.decode(src) {
            Ok(Some(frame)) => {
                self.records += 1;
                self.offset += (buffered - src.len()) as u64;
                Ok(Some(frame))
            }
            Ok(None) => Ok(None),
            Err(err) => Err(Error::Corrupted {
                record: self.records,
                offset: self.offset,
                cause: err.to_string(),
            }),
        }
    }

    fn decode_eof(&mut self, src: &mut BytesMut) -> Result<Option<Frame>, Error> {
        match self.decode(src)? {
            None if !src.is_empty() => Err(Error::Truncated {
                record: self.records,
                offset: self.offset,
            }),
            frame => Ok(frame),
        }
    }
}

/// Reads the file at `path` from the start and hands every record to `dispatch`, in order.
/// Returns the number of records dispatched; a missing file has none.
///
/// A file that ends in the middle of a record is reported as `Error::Truncated`, and a record
/// that doesn't decode as `Error::Corrupted`. Neither is treated as a clean end of file.
pub async fn replay<F>(path: impl AsRef<Path>, mut dispatch: F) -> Result<usize, Error>
where
    F: FnMut(Frame),
{
    let file = match File::open(path.as_ref()).await {
        Ok(file) => file,
        Err(err) if err.kind() == io::ErrorKind::NotFound => return Ok(0),
        Err(err) => return Err(err.into()),
    };

    let mut frames = FramedRead::new(file, RecordCodec::default());

    while let Some(frame) = frames.next().await {
        dispatch(frame?);
    }

    Ok(frames.decoder().records)
}

/// Cuts the file at `path` down to `len` bytes, dropping a damaged tail found by `replay`.
pub async fn truncate(path: impl AsRef<Path>, len: u64) -> Result<(), Error> {
    let file = OpenOptions::new().write(true).open(path.as_ref()).await?;
    file.set_len(len).await?;
    file.sync_all().await?;

    info!(path = %path.as_ref().display(), len, "append only file truncated");

    Ok(())
}
