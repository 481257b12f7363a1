use std::time::Duration;

use bytes::Bytes;
use tokio::{
    io::{AsyncWrite, AsyncWriteExt},
    sync::mpsc,
    time::{Interval, MissedTickBehavior},
};

use crate::actor::{Actor, ActorError};

#[derive(Debug, PartialEq, Eq)]
pub enum SinkMessage {
    Frame(Bytes),
    Speaking(bool),
}

#[derive(thiserror::Error, Debug)]
#[error("audio sink is closed")]
pub struct SinkClosed;

/// Writes frames into the live output. Frames arriving while the writer fails
/// are dropped with a warning rather than stalling the player.
pub struct SinkActor<W> {
    writer: W,
    receiver: mpsc::Receiver<SinkMessage>,
    pace: Option<Interval>,
    frames_written: u64,
}

impl<W> SinkActor<W> {
    /// Writes at most one frame per `interval`, so the player is held back to
    /// playback speed by backpressure.
    pub fn paced(mut self, interval: Duration) -> Self {
        let mut pace = tokio::time::interval(interval);
        pace.set_missed_tick_behavior(MissedTickBehavior::Delay);
        self.pace = Some(pace);
        self
    }
}

impl<W> Actor for SinkActor<W>
where
    W: AsyncWrite + Send + Unpin,
{
    type ID = &'static str;

    fn kind(&self) -> &'static str {
        "sink"
    }

    fn id(&self) -> Self::ID {
        "output"
    }

    async fn run(&mut self) -> Result<(), ActorError> {
        let mut buf = Vec::with_capacity(64);
        loop {
            let size = self.receiver.recv_many(&mut buf, 64).await;
            if size == 0 {
                break;
            }

            for msg in buf.drain(..) {
                match msg {
                    SinkMessage::Frame(frame) => {
                        if let Some(pace) = &mut self.pace {
                            pace.tick().await;
                        }
                        if let Err(err) = self.writer.write_all(&frame).await {
                            tracing::warn!("dropped an audio frame: {err}");
                            continue;
                        }
                        self.frames_written += 1;
                    }
                    SinkMessage::Speaking(speaking) => {
                        tracing::debug!(speaking, "speaking state changed");
                        if !speaking {
                            if let Err(err) = self.writer.flush().await {
                                tracing::warn!("failed to flush sink: {err}");
                            }
                        }
                    }
                }
            }
        }
        Ok(())
    }

    async fn post_stop(&mut self) -> Result<(), ActorError> {
        tracing::info!(frames = self.frames_written, "sink closed");
        self.writer
            .shutdown()
            .await
            .map_err(|err| ActorError::PostStopFailed(err.to_string()))
    }
}

#[derive(Clone, Debug)]
pub struct SinkHandle {
    sender: mpsc::Sender<SinkMessage>,
}

impl SinkHandle {
    const CAPACITY: usize = 16;

    pub fn new<W: AsyncWrite + Send + Unpin>(writer: W) -> (Self, SinkActor<W>) {
        let (sender, receiver) = mpsc::channel(Self::CAPACITY);
        let handle = Self { sender };
        let actor = SinkActor {
            writer,
            receiver,
            pace: None,
            frames_written: 0,
        };
        (handle, actor)
    }

    /// A sink whose frames are consumed directly from the returned receiver.
    pub fn channel(capacity: usize) -> (Self, mpsc::Receiver<SinkMessage>) {
        let (sender, receiver) = mpsc::channel(capacity);
        (Self { sender }, receiver)
    }

    /// Waits for room in the sink. Cancel safe: a cancelled call sends nothing.
    pub async fn write_frame(&self, frame: Bytes) -> Result<(), SinkClosed> {
        self.sender
            .send(SinkMessage::Frame(frame))
            .await
            .map_err(|_| SinkClosed)
    }

    pub async fn set_speaking(&self, speaking: bool) -> Result<(), SinkClosed> {
        self.sender
            .send(SinkMessage::Speaking(speaking))
            .await
            .map_err(|_| SinkClosed)
    }

    pub fn is_closed(&self) -> bool {
        self.sender.is_closed()
    }
}
