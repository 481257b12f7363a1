//! Ordered playback queue shared between command handlers and the player.
//!
//! Index 0 is the active (or next-to-play) item. Every operation takes the
//! lock once, so readers never observe a half-applied write, and snapshots are
//! copies of the item list rather than views into it.

use std::{fmt, sync::Arc, time::Duration};

use parking_lot::RwLock;

use crate::{entity::ItemId, source::Source};

#[derive(thiserror::Error, Debug, Clone, PartialEq, Eq)]
pub enum QueueError {
    #[error("queue is empty")]
    EmptyQueue,

    // positions are shown 1-based, the way users type them
    #[error("item number {} not found", .0 + 1)]
    ItemNotFound(usize),
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ItemInfo {
    pub title: String,
    pub duration: Option<Duration>,
    pub link: String,
}

impl ItemInfo {
    pub fn display_duration(&self) -> String {
        match self.duration {
            Some(d) => {
                let secs = d.as_secs();
                if secs >= 3600 {
                    format!("{}:{:02}:{:02}", secs / 3600, secs / 60 % 60, secs % 60)
                } else {
                    format!("{}:{:02}", secs / 60, secs % 60)
                }
            }
            None => "unknown".to_string(),
        }
    }
}

#[derive(Debug)]
pub struct QueueItem {
    pub id: ItemId,
    pub source: Source,
    pub info: ItemInfo,
    pub requested_by: String,
}

impl QueueItem {
    pub fn new(source: Source, info: ItemInfo, requested_by: impl Into<String>) -> Arc<Self> {
        Arc::new(Self {
            id: ItemId::new(),
            source,
            info,
            requested_by: requested_by.into(),
        })
    }
}

impl fmt::Display for QueueItem {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{} ({})", self.info.title, self.id)
    }
}

#[derive(Default)]
pub struct PlaybackQueue {
    items: RwLock<Vec<Arc<QueueItem>>>,
}

impl PlaybackQueue {
    pub fn new() -> Self {
        Self::default()
    }

    /// Appends items in order and returns the queue length before the append.
    pub fn add<I>(&self, items: I) -> usize
    where
        I: IntoIterator<Item = Arc<QueueItem>>,
    {
        let mut queue = self.items.write();
        let before = queue.len();
        queue.extend(items);
        before
    }

    pub fn get(&self, i: usize) -> Result<Arc<QueueItem>, QueueError> {
        self.items
            .read()
            .get(i)
            .cloned()
            .ok_or(QueueError::ItemNotFound(i))
    }

    pub fn get_first(&self) -> Result<Arc<QueueItem>, QueueError> {
        self.items
            .read()
            .first()
            .cloned()
            .ok_or(QueueError::EmptyQueue)
    }

    /// Returns a copy of up to `n` leading items and how many items follow them.
    pub fn get_first_n(&self, n: usize) -> Result<(Vec<Arc<QueueItem>>, usize), QueueError> {
        let queue = self.items.read();
        if queue.is_empty() {
            return Err(QueueError::EmptyQueue);
        }

        let take = n.min(queue.len());
        Ok((queue[..take].to_vec(), queue.len() - take))
    }

    pub fn remove(&self, i: usize) -> Result<Arc<QueueItem>, QueueError> {
        let mut queue = self.items.write();
        if queue.is_empty() {
            return Err(QueueError::EmptyQueue);
        }
        if i >= queue.len() {
            return Err(QueueError::ItemNotFound(i));
        }
        Ok(queue.remove(i))
    }

    /// Removes the item with the given id wherever it currently sits.
    pub fn remove_item(&self, id: &ItemId) -> bool {
        let mut queue = self.items.write();
        match queue.iter().position(|item| &item.id == id) {
            Some(pos) => {
                queue.remove(pos);
                true
            }
            None => false,
        }
    }

    /// Moves the item at `from` to `to`. A `to` past the end appends.
    pub fn move_item(&self, from: usize, to: usize) -> Result<(), QueueError> {
        let mut queue = self.items.write();
        if queue.is_empty() {
            return Err(QueueError::EmptyQueue);
        }
        if from >= queue.len() {
            return Err(QueueError::ItemNotFound(from));
        }
        if from == to {
            return Ok(());
        }

        let item = queue.remove(from);
        let to = to.min(queue.len());
        queue.insert(to, item);
        Ok(())
    }

    pub fn purge(&self) {
        self.items.write().clear();
    }

    pub fn len(&self) -> usize {
        self.items.read().len()
    }

    pub fn is_empty(&self) -> bool {
        self.items.read().is_empty()
    }
}
