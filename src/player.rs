use std::{fmt, sync::Arc};

use tokio::sync::{mpsc, oneshot, watch};

use crate::{
    actor::{Actor, ActorError},
    queue::{PlaybackQueue, QueueItem},
    sink::{SinkClosed, SinkHandle},
    source::SourceStream,
};

#[derive(thiserror::Error, Debug, Clone, PartialEq, Eq)]
pub enum PlayerError {
    #[error("not connected to a voice channel")]
    NotConnected,

    #[error("already connected to a voice channel")]
    AlreadyConnected,
}

#[derive(Debug, Clone)]
pub enum PlayerState {
    Idle,
    ConnectedEmpty,
    Streaming(Arc<QueueItem>),
    Paused(Arc<QueueItem>),
    ShuttingDown,
}

impl PlayerState {
    pub fn active(&self) -> Option<&Arc<QueueItem>> {
        match self {
            PlayerState::Streaming(item) | PlayerState::Paused(item) => Some(item),
            _ => None,
        }
    }

    /// True while an item holds the sink, paused or not.
    pub fn is_streaming(&self) -> bool {
        self.active().is_some()
    }
}

impl fmt::Display for PlayerState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            PlayerState::Idle => f.write_str("idle"),
            PlayerState::ConnectedEmpty => f.write_str("connected_empty"),
            PlayerState::Streaming(item) => write!(f, "streaming {item}"),
            PlayerState::Paused(item) => write!(f, "paused {item}"),
            PlayerState::ShuttingDown => f.write_str("shutting_down"),
        }
    }
}

#[derive(Debug)]
pub enum PlayerMessage {
    /// The queue went from empty to non-empty while nothing was streaming.
    Play,
    Skip,
    /// Toggles between streaming and paused.
    Pause,
    /// Purge the queue and abort the active stream; acked once released.
    Stop(oneshot::Sender<()>),
    Quit,
}

#[derive(Debug)]
enum Outcome {
    Completed,
    Skipped,
    Stopped(oneshot::Sender<()>),
    Quit,
}

impl Outcome {
    fn label(&self) -> &'static str {
        match self {
            Outcome::Completed => "completed",
            Outcome::Skipped => "skipped",
            Outcome::Stopped(_) => "stopped",
            Outcome::Quit => "quit",
        }
    }
}

/// Failure inside the source-to-sink pipeline. Never leaves the worker: it is
/// logged and the item counts as completed.
#[derive(thiserror::Error, Debug)]
enum PipelineError {
    #[error("source failed: {0}")]
    Source(#[from] std::io::Error),

    #[error(transparent)]
    Sink(#[from] SinkClosed),
}

/// Reponsibilities:
/// * Own the single output sink of a voice connection
/// * Pull the queue head and stream it, one item at a time
/// * React to skip/pause/stop/quit while streaming
/// * Publish its state; it is the only writer of that state
pub struct PlayerActor {
    id: Arc<String>,
    queue: Arc<PlaybackQueue>,
    sink: SinkHandle,
    receiver: mpsc::Receiver<PlayerMessage>,
    state: watch::Sender<PlayerState>,
}

impl Actor for PlayerActor {
    type ID = Arc<String>;

    fn kind(&self) -> &'static str {
        "player"
    }

    fn id(&self) -> Self::ID {
        self.id.clone()
    }

    async fn run(&mut self) -> Result<(), ActorError> {
        while let Some(msg) = self.receiver.recv().await {
            match msg {
                PlayerMessage::Play => {
                    if !self.play_queue().await {
                        break;
                    }
                }
                PlayerMessage::Skip | PlayerMessage::Pause => {
                    tracing::debug!(?msg, "nothing is streaming, ignoring");
                }
                PlayerMessage::Stop(ack) => {
                    self.queue.purge();
                    let _ = ack.send(());
                }
                PlayerMessage::Quit => break,
            }
        }
        Ok(())
    }

    async fn post_stop(&mut self) -> Result<(), ActorError> {
        self.publish(PlayerState::ShuttingDown);
        self.queue.purge();
        self.publish(PlayerState::Idle);
        Ok(())
    }
}

impl PlayerActor {
    fn publish(&self, state: PlayerState) {
        tracing::debug!(%state, "player state changed");
        self.state.send_replace(state);
    }

    /// Streams queue items until the queue runs dry. Returns false when the
    /// player has to shut down.
    async fn play_queue(&mut self) -> bool {
        loop {
            let item = match self.queue.get_first() {
                Ok(item) => item,
                Err(_) => {
                    self.publish(PlayerState::ConnectedEmpty);
                    // an add that saw us streaming did not signal; catch it here
                    match self.queue.get_first() {
                        Ok(item) => item,
                        Err(_) => return true,
                    }
                }
            };

            let outcome = self.stream(item.clone()).await;
            metrics::counter!("tanuki_playback_total", "outcome" => outcome.label()).increment(1);
            match outcome {
                Outcome::Completed | Outcome::Skipped => {
                    self.queue.remove_item(&item.id);
                }
                Outcome::Stopped(ack) => {
                    self.queue.purge();
                    self.publish(PlayerState::ConnectedEmpty);
                    let _ = ack.send(());
                }
                Outcome::Quit => return false,
            }
        }
    }

    #[tracing::instrument(skip_all, fields(item = %item))]
    async fn stream(&mut self, item: Arc<QueueItem>) -> Outcome {
        self.publish(PlayerState::Streaming(item.clone()));

        let mut stream = match item.source.open().await {
            Ok(stream) => stream,
            Err(err) => {
                tracing::warn!("failed to open source, moving on: {err}");
                return Outcome::Completed;
            }
        };

        if let Err(err) = self.sink.set_speaking(true).await {
            tracing::warn!("{err}, moving on");
            stream.stop().await;
            return Outcome::Completed;
        }

        tracing::info!("playing");
        let mut paused = false;
        let outcome = loop {
            tokio::select! {
                biased;

                msg = self.receiver.recv() => match msg {
                    Some(PlayerMessage::Skip) => {
                        tracing::info!("skip received");
                        break Outcome::Skipped;
                    }
                    Some(PlayerMessage::Pause) => {
                        paused = !paused;
                        self.publish(if paused {
                            PlayerState::Paused(item.clone())
                        } else {
                            PlayerState::Streaming(item.clone())
                        });
                    }
                    Some(PlayerMessage::Play) => {}
                    Some(PlayerMessage::Stop(ack)) => break Outcome::Stopped(ack),
                    Some(PlayerMessage::Quit) | None => break Outcome::Quit,
                },

                res = pump(&mut stream, &self.sink), if !paused => match res {
                    Ok(true) => {}
                    Ok(false) => {
                        tracing::info!("stream ended");
                        break Outcome::Completed;
                    }
                    Err(err) => {
                        tracing::warn!(error = %err, "pipeline failed mid-stream, moving on");
                        break Outcome::Completed;
                    }
                },
            }
        };

        // the next item may only start once this stream is released
        stream.stop().await;
        let _ = self.sink.set_speaking(false).await;
        outcome
    }
}

async fn pump(stream: &mut SourceStream, sink: &SinkHandle) -> Result<bool, PipelineError> {
    let Some(frame) = stream.next_frame().await? else {
        return Ok(false);
    };
    sink.write_frame(frame).await?;
    stream.commit();
    Ok(true)
}

#[derive(Clone)]
pub struct PlayerHandle {
    sender: mpsc::Sender<PlayerMessage>,
    queue: Arc<PlaybackQueue>,
    state: watch::Receiver<PlayerState>,
    id: Arc<String>,
}

impl PlayerHandle {
    pub fn new(id: impl Into<String>, sink: SinkHandle) -> (Self, PlayerActor) {
        let id = Arc::new(id.into());
        let (sender, receiver) = mpsc::channel(8);
        let (state_tx, state_rx) = watch::channel(PlayerState::ConnectedEmpty);
        let queue = Arc::new(PlaybackQueue::new());

        let handle = Self {
            sender,
            queue: queue.clone(),
            state: state_rx,
            id: id.clone(),
        };
        let actor = PlayerActor {
            id,
            queue,
            sink,
            receiver,
            state: state_tx,
        };
        (handle, actor)
    }

    pub fn id(&self) -> &str {
        &self.id
    }

    pub fn queue(&self) -> &Arc<PlaybackQueue> {
        &self.queue
    }

    /// Appends items. The worker is only woken when the queue was empty and
    /// nothing was streaming; otherwise it reaches the new items on its own.
    pub async fn add<I>(&self, items: I) -> Result<(), PlayerError>
    where
        I: IntoIterator<Item = Arc<QueueItem>>,
    {
        if self.sender.is_closed() {
            return Err(PlayerError::NotConnected);
        }

        let before = self.queue.add(items);
        if before == 0 && !self.is_streaming() {
            self.send(PlayerMessage::Play).await?;
        }
        Ok(())
    }

    pub async fn skip(&self) -> Result<(), PlayerError> {
        self.send(PlayerMessage::Skip).await
    }

    pub async fn pause(&self) -> Result<(), PlayerError> {
        self.send(PlayerMessage::Pause).await
    }

    /// Purges the queue and aborts the active stream. Resolves once the worker
    /// has released the stream.
    pub async fn stop(&self) -> Result<(), PlayerError> {
        let (tx, rx) = oneshot::channel();
        self.send(PlayerMessage::Stop(tx)).await?;
        rx.await.map_err(|_| PlayerError::NotConnected)
    }

    pub async fn quit(&self) -> Result<(), PlayerError> {
        self.send(PlayerMessage::Quit).await
    }

    pub fn state(&self) -> PlayerState {
        self.state.borrow().clone()
    }

    pub fn is_streaming(&self) -> bool {
        self.state.borrow().is_streaming()
    }

    pub fn subscribe(&self) -> watch::Receiver<PlayerState> {
        self.state.clone()
    }

    /// Waits until the published state satisfies `f`.
    pub async fn wait_for(
        &self,
        f: impl FnMut(&PlayerState) -> bool,
    ) -> Result<PlayerState, PlayerError> {
        let mut state = self.state.clone();
        let res = state.wait_for(f).await;
        res.map(|s| s.clone()).map_err(|_| PlayerError::NotConnected)
    }

    async fn send(&self, msg: PlayerMessage) -> Result<(), PlayerError> {
        self.sender
            .send(msg)
            .await
            .map_err(|_| PlayerError::NotConnected)
    }
}

impl fmt::Display for PlayerHandle {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.id)
    }
}
