#![allow(dead_code)]

use std::{
    collections::HashMap,
    sync::{
        Arc,
        atomic::{AtomicU64, Ordering},
    },
    time::Duration,
};

use bytes::Bytes;
use futures::{StreamExt, future::BoxFuture, stream};
use parking_lot::Mutex;
use tanuki::{
    actor,
    bot::Bot,
    command::Dispatch,
    config::BotConfig,
    entity::ChannelId,
    queue::{ItemInfo, QueueItem},
    resolver::{ResolveError, Resolved, ResolvedStream, Resolver},
    sink::SinkHandle,
    source::{FRAME_BYTES, Source},
    transport::{Author, ChatTransport, InboundMessage, TransportError},
};

pub const TEXT_CHANNEL: &str = "music";
pub const OWNER: &str = "owner";

/// A clip of `frames` frames, every byte set to `tag`.
pub fn clip(tag: u8, title: &str, frames: usize) -> Resolved {
    Resolved {
        source: Source::Memory(Bytes::from(vec![tag; frames * FRAME_BYTES])),
        info: ItemInfo {
            title: title.to_string(),
            duration: None,
            link: format!("mock://{title}"),
        },
    }
}

pub fn item(tag: u8, frames: usize) -> Arc<QueueItem> {
    clip(tag, &format!("clip {tag}"), frames).into_item("tester")
}

#[derive(Default)]
pub struct MockTransport {
    sent: Mutex<Vec<(ChannelId, String)>>,
    deleted: Mutex<Vec<String>>,
    now_playing: Mutex<Vec<Option<String>>>,
    left: Mutex<usize>,
    no_voice: Mutex<bool>,
}

impl MockTransport {
    pub fn replies(&self) -> Vec<String> {
        self.sent.lock().iter().map(|(_, text)| text.clone()).collect()
    }

    pub fn last_reply(&self) -> Option<String> {
        self.sent.lock().last().map(|(_, text)| text.clone())
    }

    pub fn deleted(&self) -> Vec<String> {
        self.deleted.lock().clone()
    }

    pub fn now_playing(&self) -> Vec<Option<String>> {
        self.now_playing.lock().clone()
    }

    pub fn left(&self) -> usize {
        *self.left.lock()
    }

    pub fn set_no_voice(&self) {
        *self.no_voice.lock() = true;
    }
}

impl ChatTransport for MockTransport {
    fn send_message<'a>(
        &'a self,
        channel: &'a str,
        text: &'a str,
    ) -> BoxFuture<'a, Result<(), TransportError>> {
        self.sent.lock().push((channel.to_string(), text.to_string()));
        Box::pin(async { Ok(()) })
    }

    fn delete_message<'a>(
        &'a self,
        _channel: &'a str,
        message: &'a str,
    ) -> BoxFuture<'a, Result<(), TransportError>> {
        self.deleted.lock().push(message.to_string());
        Box::pin(async { Ok(()) })
    }

    fn voice_channel_of<'a>(
        &'a self,
        _user: &'a str,
    ) -> BoxFuture<'a, Result<Option<ChannelId>, TransportError>> {
        let channel = (!*self.no_voice.lock()).then(|| "voice".to_string());
        Box::pin(async move { Ok(channel) })
    }

    fn join_voice<'a>(
        &'a self,
        _channel: &'a str,
    ) -> BoxFuture<'a, Result<SinkHandle, TransportError>> {
        Box::pin(async move {
            // paced so a long clip stays on air for the whole test
            let (handle, sink) = SinkHandle::new(tokio::io::sink());
            tokio::spawn(actor::run(sink.paced(Duration::from_millis(20))));
            Ok(handle)
        })
    }

    fn leave_voice(&self) -> BoxFuture<'_, Result<(), TransportError>> {
        *self.left.lock() += 1;
        Box::pin(async { Ok(()) })
    }

    fn set_now_playing<'a>(
        &'a self,
        title: Option<&'a str>,
    ) -> BoxFuture<'a, Result<(), TransportError>> {
        self.now_playing.lock().push(title.map(str::to_string));
        Box::pin(async { Ok(()) })
    }
}

#[derive(Default)]
pub struct MockResolver {
    links: HashMap<String, Resolved>,
    playlists: HashMap<String, Vec<Option<Resolved>>>,
}

impl MockResolver {
    pub fn with_link(mut self, link: &str, frames: usize) -> Self {
        let tag = self.links.len() as u8 + 1;
        self.links.insert(link.to_string(), clip(tag, link, frames));
        self
    }

    /// `None` entries fail to resolve.
    pub fn with_playlist(mut self, name: &str, entries: &[Option<&str>]) -> Self {
        let entries = entries
            .iter()
            .map(|entry| entry.map(|title| clip(0, title, 1)))
            .collect();
        self.playlists.insert(name.to_string(), entries);
        self
    }
}

impl Resolver for MockResolver {
    fn resolve<'a>(&'a self, link: &'a str) -> BoxFuture<'a, Result<Resolved, ResolveError>> {
        let res = self
            .links
            .get(link)
            .cloned()
            .ok_or_else(|| ResolveError::NoMatch(link.to_string()));
        Box::pin(async move { res })
    }

    fn search<'a>(&'a self, query: &'a str) -> BoxFuture<'a, Result<Resolved, ResolveError>> {
        let mut hits: Vec<_> = self
            .links
            .iter()
            .filter(|(link, _)| link.contains(query))
            .collect();
        hits.sort_by(|a, b| a.0.cmp(b.0));
        let res = hits
            .first()
            .map(|(_, resolved)| (*resolved).clone())
            .ok_or_else(|| ResolveError::NoMatch(query.to_string()));
        Box::pin(async move { res })
    }

    fn playlist<'a>(
        &'a self,
        reference: &'a str,
    ) -> BoxFuture<'a, Result<ResolvedStream, ResolveError>> {
        let res = match self.playlists.get(reference) {
            Some(entries) => {
                let entries: Vec<_> = entries
                    .iter()
                    .map(|entry| {
                        entry
                            .clone()
                            .ok_or_else(|| ResolveError::ResolutionFailed("unavailable".to_string()))
                    })
                    .collect();
                Ok(stream::iter(entries).boxed())
            }
            None => Err(ResolveError::NoMatch(reference.to_string())),
        };
        Box::pin(async move { res })
    }
}

pub fn config() -> BotConfig {
    BotConfig {
        text_channel: TEXT_CHANNEL.to_string(),
        owner: Some(OWNER.to_string()),
        ..Default::default()
    }
}

pub fn bot(resolver: MockResolver) -> (Arc<Bot>, Arc<MockTransport>) {
    let transport = Arc::new(MockTransport::default());
    let bot = Bot::builder(config(), transport.clone(), Arc::new(resolver)).build();
    (bot, transport)
}

static MESSAGE_IDS: AtomicU64 = AtomicU64::new(0);

pub fn message(user: &str, content: &str) -> InboundMessage {
    let mentions = content
        .split_whitespace()
        .filter_map(|token| token.strip_prefix('@'))
        .map(str::to_string)
        .collect();

    InboundMessage {
        id: format!("m{}", MESSAGE_IDS.fetch_add(1, Ordering::Relaxed)),
        channel_id: TEXT_CHANNEL.to_string(),
        author: Author {
            id: user.to_string(),
            name: user.to_string(),
        },
        content: content.to_string(),
        mentions,
        is_private: false,
    }
}

pub async fn send(bot: &Arc<Bot>, user: &str, content: &str) -> Dispatch {
    bot.handle_message(message(user, content)).await
}

/// Polls `cond` until it holds, panicking after a few seconds.
pub async fn eventually(mut cond: impl FnMut() -> bool) {
    tokio::time::timeout(Duration::from_secs(5), async {
        while !cond() {
            tokio::time::sleep(Duration::from_millis(5)).await;
        }
    })
    .await
    .expect("condition not met in time");
}
