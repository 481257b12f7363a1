use std::fmt;

use rand::RngCore;

pub type UserId = String;
pub type ChannelId = String;
pub type MessageId = String;

pub const E_ITEM_ID: &str = "itm";
const ITEM_ID_LENGTH: usize = 8;

/// Identity of a queued item. Stable for the lifetime of the item, so the
/// player can pop exactly the item it played even if the queue was reordered.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct ItemId(String);

impl ItemId {
    pub fn new() -> Self {
        Self(new_random_id(E_ITEM_ID, ITEM_ID_LENGTH))
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl Default for ItemId {
    fn default() -> Self {
        Self::new()
    }
}

impl fmt::Display for ItemId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

/// Generates a new random id with the given prefix and length (in bytes).
pub fn new_random_id(prefix: &str, length: usize) -> String {
    let mut bytes = vec![0u8; length];
    rand::rng().fill_bytes(&mut bytes);
    format!("{}_{}", prefix, bs58::encode(bytes).into_string())
}
