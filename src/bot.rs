use std::sync::Arc;

use tokio::{sync::Mutex, task::JoinHandle};

use crate::{
    actor::{self, ActorStatus},
    command::{Dispatch, Router},
    commands::{self, CommandError},
    config::BotConfig,
    permission::{NoopPersister, PermissionPersister, PermissionStore},
    player::{PlayerError, PlayerHandle, PlayerState},
    resolver::Resolver,
    transport::{ChatTransport, InboundMessage},
};

struct Session {
    player: PlayerHandle,
    worker: JoinHandle<ActorStatus>,
    now_playing: JoinHandle<()>,
}

/// Everything a command handler can reach: configuration, the chat
/// transport, the resolver, permissions and the live player, if any.
pub struct Bot {
    config: BotConfig,
    transport: Arc<dyn ChatTransport>,
    resolver: Arc<dyn Resolver>,
    router: Router,
    permissions: PermissionStore,
    session: Mutex<Option<Session>>,
}

pub struct BotBuilder {
    config: BotConfig,
    transport: Arc<dyn ChatTransport>,
    resolver: Arc<dyn Resolver>,
    router: Option<Router>,
    persister: Option<Box<dyn PermissionPersister>>,
    permissions: Option<Vec<u8>>,
}

impl BotBuilder {
    /// Replaces the built-in command set.
    pub fn router(mut self, router: Router) -> Self {
        self.router = Some(router);
        self
    }

    pub fn persister(mut self, persister: Box<dyn PermissionPersister>) -> Self {
        self.persister = Some(persister);
        self
    }

    /// Initial serialized permission mapping.
    pub fn permissions(mut self, blob: Option<Vec<u8>>) -> Self {
        self.permissions = blob;
        self
    }

    pub fn build(self) -> Arc<Bot> {
        let router = self.router.unwrap_or_else(commands::router);
        let persister = self.persister.unwrap_or_else(|| Box::new(NoopPersister));
        let permissions = PermissionStore::new(
            router.capability_defaults(),
            self.permissions.as_deref(),
            persister,
        );

        Arc::new(Bot {
            config: self.config,
            transport: self.transport,
            resolver: self.resolver,
            router,
            permissions,
            session: Mutex::new(None),
        })
    }
}

impl Bot {
    pub fn builder(
        config: BotConfig,
        transport: Arc<dyn ChatTransport>,
        resolver: Arc<dyn Resolver>,
    ) -> BotBuilder {
        BotBuilder {
            config,
            transport,
            resolver,
            router: None,
            persister: None,
            permissions: None,
        }
    }

    pub fn config(&self) -> &BotConfig {
        &self.config
    }

    pub fn transport(&self) -> &Arc<dyn ChatTransport> {
        &self.transport
    }

    pub fn resolver(&self) -> &Arc<dyn Resolver> {
        &self.resolver
    }

    pub fn permissions(&self) -> &PermissionStore {
        &self.permissions
    }

    pub async fn handle_message(self: &Arc<Self>, message: InboundMessage) -> Dispatch {
        self.router.dispatch(self, message).await
    }

    /// The live player, `NotConnected` before `join` or after `quit`.
    pub async fn player(&self) -> Result<PlayerHandle, PlayerError> {
        self.session
            .lock()
            .await
            .as_ref()
            .map(|session| session.player.clone())
            .ok_or(PlayerError::NotConnected)
    }

    /// Connects to `channel` and starts a player on it.
    pub async fn join(&self, channel: &str) -> Result<PlayerHandle, CommandError> {
        let mut session = self.session.lock().await;
        if session.is_some() {
            return Err(PlayerError::AlreadyConnected.into());
        }

        let sink = self.transport.join_voice(channel).await?;
        let (player, actor) = PlayerHandle::new(channel, sink);
        let worker = tokio::spawn(actor::run(actor));
        let now_playing = tokio::spawn(forward_now_playing(
            self.transport.clone(),
            player.clone(),
        ));

        tracing::info!(channel, "player started");
        *session = Some(Session {
            player: player.clone(),
            worker,
            now_playing,
        });
        Ok(player)
    }

    /// Shuts the player down and leaves voice once the sink is released.
    pub async fn quit(&self) -> Result<(), CommandError> {
        let session = self
            .session
            .lock()
            .await
            .take()
            .ok_or(PlayerError::NotConnected)?;

        // a worker that already exited has nothing left to stop
        let _ = session.player.quit().await;
        match session.worker.await {
            Ok(status) => tracing::info!(%status, "player stopped"),
            Err(err) => tracing::warn!("player task failed: {err}"),
        }
        if let Err(err) = session.now_playing.await {
            tracing::warn!("now playing task failed: {err}");
        }

        self.transport.leave_voice().await?;
        Ok(())
    }

    /// Quits the player if one is live.
    pub async fn shutdown(&self) {
        match self.quit().await {
            Ok(()) | Err(CommandError::Player(PlayerError::NotConnected)) => {}
            Err(err) => tracing::warn!("shutdown failed: {err}"),
        }
    }

    pub async fn say(&self, channel: &str, text: &str) {
        if let Err(err) = self.transport.send_message(channel, text).await {
            tracing::warn!(channel, "failed to send message: {err}");
        }
    }

    pub async fn reply(&self, message: &InboundMessage, text: &str) {
        self.say(&message.channel_id, text).await;
    }

    /// Deletes the message after the configured delay.
    pub fn schedule_delete(&self, message: &InboundMessage) {
        let transport = self.transport.clone();
        let delay = self.config.delete_after();
        let channel = message.channel_id.clone();
        let id = message.id.clone();

        tokio::spawn(async move {
            tokio::time::sleep(delay).await;
            if let Err(err) = transport.delete_message(&channel, &id).await {
                tracing::debug!(message = %id, "failed to delete message: {err}");
            }
        });
    }
}

/// Mirrors the active item's title into the transport's status until the
/// player goes away.
async fn forward_now_playing(transport: Arc<dyn ChatTransport>, player: PlayerHandle) {
    let mut state = player.subscribe();
    drop(player);

    let mut current: Option<String> = None;
    loop {
        let title = {
            let state = state.borrow_and_update();
            if matches!(*state, PlayerState::Idle) {
                break;
            }
            state.active().map(|item| item.info.title.clone())
        };

        if title != current {
            if let Err(err) = transport.set_now_playing(title.as_deref()).await {
                tracing::warn!("failed to update now playing: {err}");
            }
            current = title;
        }

        if state.changed().await.is_err() {
            break;
        }
    }

    if current.is_some() {
        if let Err(err) = transport.set_now_playing(None).await {
            tracing::warn!("failed to clear now playing: {err}");
        }
    }
}
