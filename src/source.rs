use std::{io, path::PathBuf, process::Stdio};

use bytes::{Bytes, BytesMut};
use tokio::{
    fs::File,
    io::{AsyncRead, AsyncReadExt},
    process::{Child, Command},
};

/// 20ms of 48kHz stereo s16le: 960 samples * 2 channels * 2 bytes.
pub const FRAME_BYTES: usize = 960 * 2 * 2;

type Reader = Box<dyn AsyncRead + Send + Unpin>;

/// Playable handle. Opening it produces a fresh [`SourceStream`]; the handle
/// itself holds no live resources.
#[derive(Debug, Clone)]
pub enum Source {
    File(PathBuf),
    Process { program: String, args: Vec<String> },
    Memory(Bytes),
}

impl Source {
    pub async fn open(&self) -> io::Result<SourceStream> {
        let (reader, child) = match self {
            Source::File(path) => (Box::new(File::open(path).await?) as Reader, None),
            Source::Process { program, args } => {
                let mut child = Command::new(program)
                    .args(args)
                    .stdin(Stdio::null())
                    .stdout(Stdio::piped())
                    .stderr(Stdio::null())
                    .kill_on_drop(true)
                    .spawn()?;
                let stdout = child
                    .stdout
                    .take()
                    .ok_or_else(|| io::Error::other("subprocess stdout is not piped"))?;
                (Box::new(stdout) as Reader, Some(child))
            }
            Source::Memory(bytes) => (Box::new(io::Cursor::new(bytes.clone())) as Reader, None),
        };

        Ok(SourceStream {
            reader,
            child,
            buf: BytesMut::with_capacity(FRAME_BYTES),
            pending: None,
            eof: false,
        })
    }
}

/// A live, readable audio stream opened from a [`Source`].
pub struct SourceStream {
    reader: Reader,
    child: Option<Child>,
    buf: BytesMut,
    pending: Option<Bytes>,
    eof: bool,
}

impl SourceStream {
    /// Reads the next frame. A short final frame is returned as is, then `None`.
    ///
    /// Cancel safe: bytes read before cancellation stay buffered for the next call.
    pub async fn next_frame(&mut self) -> io::Result<Option<Bytes>> {
        if let Some(frame) = &self.pending {
            return Ok(Some(frame.clone()));
        }

        while !self.eof && self.buf.len() < FRAME_BYTES {
            self.buf.reserve(FRAME_BYTES - self.buf.len());
            if self.reader.read_buf(&mut self.buf).await? == 0 {
                self.eof = true;
            }
        }

        if self.buf.is_empty() {
            return Ok(None);
        }
        let take = self.buf.len().min(FRAME_BYTES);
        let frame = self.buf.split_to(take).freeze();
        self.pending = Some(frame.clone());
        Ok(Some(frame))
    }

    /// Marks the last frame returned by `next_frame` as delivered. Until then the
    /// same frame is handed out again.
    pub fn commit(&mut self) {
        self.pending = None;
    }

    /// Releases the stream, killing and reaping the subprocess if there is one.
    pub async fn stop(mut self) {
        if let Some(mut child) = self.child.take() {
            if let Err(err) = child.kill().await {
                tracing::warn!("failed to kill source subprocess: {err}");
            }
        }
    }
}
