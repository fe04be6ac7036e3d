use std::fmt::Display;

use log::debug;
use tokio::io::{AsyncRead, AsyncWriteExt, DuplexStream};

const PIPE_CAPACITY: usize = 64 * 1024;

/// Read side of a live output stream. Reaches EOF once every writer is gone.
pub type OutputReader = DuplexStream;

/// Write side of a live output stream.
///
/// The stream closes when this value is dropped, so whoever owns it closes the stream on
/// every exit path just by returning.
pub struct Output {
    inner: DuplexStream,
}

/// Create a connected (reader, writer) pair.
pub fn pipe() -> (OutputReader, Output) {
    let (reader, writer) = tokio::io::duplex(PIPE_CAPACITY);
    (reader, Output { inner: writer })
}

impl Output {
    /// Write a line for humans. A reader that went away is not an error for the producer.
    pub async fn line(&mut self, msg: impl Display) {
        let line = format!("{}\n", msg);
        if let Err(err) = self.inner.write_all(line.as_bytes()).await {
            debug!("Dropping output line, reader is gone: {}", err);
        }
    }

    pub async fn write(&mut self, buf: &[u8]) -> std::io::Result<()> {
        self.inner.write_all(buf).await
    }

    /// Copy `reader` until it ends, returning the number of bytes copied.
    pub async fn copy_from<R>(&mut self, reader: &mut R) -> std::io::Result<u64>
    where
        R: AsyncRead + Unpin + ?Sized,
    {
        tokio::io::copy(reader, &mut self.inner).await
    }
}
