use std::{io, path::PathBuf, time::Duration};

use futures::future::BoxFuture;
use tokio::{
    io::{AsyncBufReadExt, AsyncWriteExt, BufReader},
    sync::mpsc,
    task::JoinHandle,
};

use crate::{
    actor::{self, ActorStatus},
    entity::{ChannelId, MessageId, UserId},
    sink::SinkHandle,
};

#[derive(thiserror::Error, Debug)]
pub enum TransportError {
    #[error("IO error: {0}")]
    Io(#[from] io::Error),

    #[error("you are not in a voice channel")]
    NoVoiceChannel,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Author {
    pub id: UserId,
    pub name: String,
}

#[derive(Debug, Clone)]
pub struct InboundMessage {
    pub id: MessageId,
    pub channel_id: ChannelId,
    pub author: Author,
    pub content: String,
    /// User ids mentioned in the message, in order of appearance.
    pub mentions: Vec<UserId>,
    pub is_private: bool,
}

/// The chat platform as seen by the bot.
pub trait ChatTransport: Send + Sync + 'static {
    fn send_message<'a>(
        &'a self,
        channel: &'a str,
        text: &'a str,
    ) -> BoxFuture<'a, Result<(), TransportError>>;

    fn delete_message<'a>(
        &'a self,
        channel: &'a str,
        message: &'a str,
    ) -> BoxFuture<'a, Result<(), TransportError>>;

    /// Voice channel the user currently sits in, if any.
    fn voice_channel_of<'a>(
        &'a self,
        user: &'a str,
    ) -> BoxFuture<'a, Result<Option<ChannelId>, TransportError>>;

    fn join_voice<'a>(&'a self, channel: &'a str)
    -> BoxFuture<'a, Result<SinkHandle, TransportError>>;

    /// Called after the player released its sink.
    fn leave_voice(&self) -> BoxFuture<'_, Result<(), TransportError>>;

    fn set_now_playing<'a>(
        &'a self,
        title: Option<&'a str>,
    ) -> BoxFuture<'a, Result<(), TransportError>>;
}

/// Chat over stdin/stdout. Every line typed is a message from one local user
/// in `channel`; `@name` tokens count as mentions. Joining voice writes raw
/// frames into a file.
pub struct ConsoleTransport {
    channel: ChannelId,
    author: Author,
    output: PathBuf,
    frame_interval: Option<Duration>,
    stdout: tokio::sync::Mutex<tokio::io::Stdout>,
    sink_task: parking_lot::Mutex<Option<JoinHandle<ActorStatus>>>,
}

impl ConsoleTransport {
    pub fn new(channel: impl Into<ChannelId>, author: Author, output: impl Into<PathBuf>) -> Self {
        Self {
            channel: channel.into(),
            author,
            output: output.into(),
            frame_interval: None,
            stdout: tokio::sync::Mutex::new(tokio::io::stdout()),
            sink_task: parking_lot::Mutex::new(None),
        }
    }

    /// Paces frames written to the output file to real time.
    pub fn with_frame_interval(mut self, interval: Duration) -> Self {
        self.frame_interval = Some(interval);
        self
    }

    /// Starts reading stdin. The receiver ends at EOF.
    pub fn incoming(&self) -> mpsc::Receiver<InboundMessage> {
        let (tx, rx) = mpsc::channel(16);
        let channel = self.channel.clone();
        let author = self.author.clone();

        tokio::spawn(async move {
            let mut seq = 0u64;
            let mut lines = BufReader::new(tokio::io::stdin()).lines();
            loop {
                let line = match lines.next_line().await {
                    Ok(Some(line)) => line,
                    Ok(None) => break,
                    Err(err) => {
                        tracing::warn!("failed to read stdin: {err}");
                        break;
                    }
                };
                if line.trim().is_empty() {
                    continue;
                }

                let msg = parse_line(&line, &channel, &author, seq);
                seq += 1;
                if tx.send(msg).await.is_err() {
                    break;
                }
            }
            tracing::debug!("stdin closed");
        });

        rx
    }

    async fn print(&self, line: String) -> Result<(), TransportError> {
        let mut stdout = self.stdout.lock().await;
        stdout.write_all(line.as_bytes()).await?;
        stdout.write_all(b"\n").await?;
        stdout.flush().await?;
        Ok(())
    }
}

fn parse_line(line: &str, channel: &str, author: &Author, seq: u64) -> InboundMessage {
    let mentions = line
        .split_whitespace()
        .filter_map(|token| token.strip_prefix('@'))
        .filter(|name| !name.is_empty())
        .map(str::to_string)
        .collect();

    InboundMessage {
        id: format!("msg-{seq}"),
        channel_id: channel.to_string(),
        author: author.clone(),
        content: line.to_string(),
        mentions,
        is_private: false,
    }
}

impl ChatTransport for ConsoleTransport {
    fn send_message<'a>(
        &'a self,
        channel: &'a str,
        text: &'a str,
    ) -> BoxFuture<'a, Result<(), TransportError>> {
        Box::pin(self.print(format!("[#{channel}] {text}")))
    }

    fn delete_message<'a>(
        &'a self,
        _channel: &'a str,
        message: &'a str,
    ) -> BoxFuture<'a, Result<(), TransportError>> {
        Box::pin(async move {
            tracing::debug!(message, "message deleted");
            Ok(())
        })
    }

    fn voice_channel_of<'a>(
        &'a self,
        _user: &'a str,
    ) -> BoxFuture<'a, Result<Option<ChannelId>, TransportError>> {
        Box::pin(async move { Ok(Some(format!("{}-voice", self.channel))) })
    }

    fn join_voice<'a>(
        &'a self,
        channel: &'a str,
    ) -> BoxFuture<'a, Result<SinkHandle, TransportError>> {
        Box::pin(async move {
            let file = tokio::fs::File::create(&self.output).await?;
            let (handle, mut sink) = SinkHandle::new(file);
            if let Some(interval) = self.frame_interval {
                sink = sink.paced(interval);
            }

            let task = tokio::spawn(actor::run(sink));
            if let Some(previous) = self.sink_task.lock().replace(task) {
                previous.abort();
            }
            tracing::info!(channel, output = %self.output.display(), "voice connected");
            Ok(handle)
        })
    }

    fn leave_voice(&self) -> BoxFuture<'_, Result<(), TransportError>> {
        Box::pin(async move {
            let task = self.sink_task.lock().take();
            if let Some(task) = task {
                // the sink flushes and exits once the player dropped its handle
                match task.await {
                    Ok(status) => tracing::info!(%status, "voice disconnected"),
                    Err(err) => tracing::warn!("sink task failed: {err}"),
                }
            }
            Ok(())
        })
    }

    fn set_now_playing<'a>(
        &'a self,
        title: Option<&'a str>,
    ) -> BoxFuture<'a, Result<(), TransportError>> {
        let line = match title {
            Some(title) => format!("* now playing: {title}"),
            None => "* now playing: nothing".to_string(),
        };
        Box::pin(self.print(line))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn me() -> Author {
        Author {
            id: "local".to_string(),
            name: "local".to_string(),
        }
    }

    #[test]
    fn mentions_are_collected_in_order() {
        let msg = parse_line("!setperm @bob queue false @alice @", "general", &me(), 3);
        assert_eq!(msg.mentions, ["bob", "alice"]);
        assert_eq!(msg.id, "msg-3");
        assert_eq!(msg.channel_id, "general");
        assert!(!msg.is_private);
    }

    #[tokio::test]
    async fn joining_voice_writes_frames_to_output() {
        let path = std::env::temp_dir().join(format!("tanuki-console-{}.pcm", std::process::id()));
        let transport = ConsoleTransport::new("general", me(), &path);

        let sink = transport.join_voice("general-voice").await.unwrap();
        sink.write_frame(bytes::Bytes::from_static(b"pcm")).await.unwrap();
        drop(sink);
        transport.leave_voice().await.unwrap();

        assert_eq!(tokio::fs::read(&path).await.unwrap(), b"pcm");
        tokio::fs::remove_file(&path).await.unwrap();
    }
}
