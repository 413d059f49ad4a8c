//! Bounded in-memory pipe connecting a document generator with an uploader.
//!
//! The generator runs on its own scoped thread and writes into a
//! [`PipeWriter`]; the uploader consumes the matching [`PipeReader`]. Generator
//! failures travel through the channel, so the reading side sees an error
//! instead of a silently truncated document.

use std::io::{self, Read, Write};
use std::sync::mpsc::{self, Receiver, SyncSender};
use std::thread;

use tokio_util::sync::CancellationToken;
use tracing::warn;

use crate::error::Wf2RoError;

pub const DEFAULT_CAPACITY: usize = 16;
const CHUNK_SIZE: usize = 8 * 1024;

type Chunk = Result<Vec<u8>, String>;

pub fn channel(capacity: usize) -> (PipeWriter, PipeReader) {
    let (tx, rx) = mpsc::sync_channel(capacity.max(1));
    (
        PipeWriter {
            tx: Some(tx),
            buf: Vec::with_capacity(CHUNK_SIZE),
        },
        PipeReader {
            rx,
            current: Vec::new(),
            pos: 0,
            cancel: None,
        },
    )
}

pub struct PipeWriter {
    tx: Option<SyncSender<Chunk>>,
    buf: Vec<u8>,
}

impl PipeWriter {
    fn send(&mut self, chunk: Chunk) -> io::Result<()> {
        let tx = self
            .tx
            .as_ref()
            .ok_or_else(|| io::Error::new(io::ErrorKind::BrokenPipe, "pipe already closed"))?;
        tx.send(chunk)
            .map_err(|_| io::Error::new(io::ErrorKind::BrokenPipe, "pipe reader dropped"))
    }

    /// Flushes buffered bytes and closes the pipe; the reader sees end of stream.
    pub fn finish(mut self) -> io::Result<()> {
        self.flush()?;
        self.tx.take();
        Ok(())
    }

    /// Closes the pipe with an error delivered to the reader.
    pub fn fail(mut self, message: impl Into<String>) {
        self.buf.clear();
        // A dropped reader has already stopped caring about the outcome.
        let _ = self.send(Err(message.into()));
        self.tx.take();
    }
}

impl Write for PipeWriter {
    fn write(&mut self, data: &[u8]) -> io::Result<usize> {
        self.buf.extend_from_slice(data);
        if self.buf.len() >= CHUNK_SIZE {
            self.flush()?;
        }
        Ok(data.len())
    }

    fn flush(&mut self) -> io::Result<()> {
        if self.buf.is_empty() {
            return Ok(());
        }
        let chunk = std::mem::replace(&mut self.buf, Vec::with_capacity(CHUNK_SIZE));
        self.send(Ok(chunk))
    }
}

pub struct PipeReader {
    rx: Receiver<Chunk>,
    current: Vec<u8>,
    pos: usize,
    cancel: Option<CancellationToken>,
}

impl PipeReader {
    pub fn with_cancellation(mut self, cancel: CancellationToken) -> Self {
        self.cancel = Some(cancel);
        self
    }
}

impl Read for PipeReader {
    fn read(&mut self, out: &mut [u8]) -> io::Result<usize> {
        if self.cancel.as_ref().is_some_and(|c| c.is_cancelled()) {
            // Not `Interrupted`: std read loops retry that kind forever.
            return Err(io::Error::other("upload cancelled"));
        }
        while self.pos >= self.current.len() {
            match self.rx.recv() {
                Ok(Ok(chunk)) => {
                    self.current = chunk;
                    self.pos = 0;
                }
                Ok(Err(message)) => return Err(io::Error::other(message)),
                Err(_) => return Ok(0),
            }
        }
        let n = out.len().min(self.current.len() - self.pos);
        out[..n].copy_from_slice(&self.current[self.pos..self.pos + n]);
        self.pos += n;
        Ok(n)
    }
}

/// Runs `generate` on a scoped thread writing into a pipe while `upload`
/// consumes the reading end. A generator error takes precedence over the
/// uploader's, since the upload failure is usually its consequence.
pub fn stream_document<G, U, T>(
    capacity: usize,
    cancel: Option<CancellationToken>,
    generate: G,
    upload: U,
) -> Result<T, Wf2RoError>
where
    G: FnOnce(&mut PipeWriter) -> Result<(), Wf2RoError> + Send,
    U: FnOnce(PipeReader) -> Result<T, Wf2RoError>,
{
    let (mut writer, reader) = channel(capacity);
    let reader = match cancel {
        Some(cancel) => reader.with_cancellation(cancel),
        None => reader,
    };

    thread::scope(|scope| {
        let producer = scope.spawn(move || match generate(&mut writer) {
            Ok(()) => writer.finish().map_err(Wf2RoError::from),
            Err(err) => {
                writer.fail(err.to_string());
                Err(err)
            }
        });

        let uploaded = upload(reader);
        let generated = producer.join().unwrap_or_else(|_| {
            warn!("document generator panicked");
            Err(Wf2RoError::Serialization(
                "document generator panicked".to_string(),
            ))
        });

        match generated {
            Err(err) if !is_broken_pipe(&err) => Err(err),
            _ => uploaded,
        }
    })
}

fn is_broken_pipe(err: &Wf2RoError) -> bool {
    matches!(err, Wf2RoError::Io(io) if io.kind() == io::ErrorKind::BrokenPipe)
}
