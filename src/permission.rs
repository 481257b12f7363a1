//! Per-user capability overrides.
//!
//! A stored flag always means "differs from the capability's default": for an
//! allow-by-default capability `true` denies, for a deny-by-default one `true`
//! grants. [`to_stored`] and [`from_stored`] are the only places that know this.

use std::{
    collections::HashMap,
    io,
    path::{Path, PathBuf},
};

use parking_lot::RwLock;

use crate::entity::UserId;

pub type UserPermissions = HashMap<String, bool>;
pub type Permissions = HashMap<UserId, UserPermissions>;

#[derive(thiserror::Error, Debug, Clone, PartialEq, Eq)]
pub enum PermissionError {
    #[error("no such permission: {0}")]
    UnknownCapability(String),
}

/// Receives the full serialized mapping after every change.
pub trait PermissionPersister: Send + Sync + 'static {
    fn save(&self, blob: &[u8]) -> io::Result<()>;
}

impl<F> PermissionPersister for F
where
    F: Fn(&[u8]) -> io::Result<()> + Send + Sync + 'static,
{
    fn save(&self, blob: &[u8]) -> io::Result<()> {
        self(blob)
    }
}

pub struct FilePersister {
    path: PathBuf,
}

impl FilePersister {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self { path: path.into() }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Reads the current blob, `None` when the file does not exist yet.
    pub fn load(&self) -> io::Result<Option<Vec<u8>>> {
        match std::fs::read(&self.path) {
            Ok(blob) => Ok(Some(blob)),
            Err(err) if err.kind() == io::ErrorKind::NotFound => Ok(None),
            Err(err) => Err(err),
        }
    }
}

impl PermissionPersister for FilePersister {
    fn save(&self, blob: &[u8]) -> io::Result<()> {
        std::fs::write(&self.path, blob)
    }
}

pub struct NoopPersister;

impl PermissionPersister for NoopPersister {
    fn save(&self, _blob: &[u8]) -> io::Result<()> {
        Ok(())
    }
}

fn to_stored(value: bool, default: bool) -> bool {
    value != default
}

fn from_stored(stored: bool, default: bool) -> bool {
    stored != default
}

pub struct PermissionStore {
    permissions: RwLock<Permissions>,
    // lowercased capability -> (registered name, default)
    capabilities: HashMap<String, (String, bool)>,
    persister: Box<dyn PermissionPersister>,
}

impl PermissionStore {
    /// Builds the store from the capability-default table and an optional
    /// initial blob. A missing or malformed blob starts empty.
    pub fn new<I>(capabilities: I, initial: Option<&[u8]>, persister: Box<dyn PermissionPersister>) -> Self
    where
        I: IntoIterator<Item = (String, bool)>,
    {
        let capabilities: HashMap<String, (String, bool)> = capabilities
            .into_iter()
            .map(|(name, default)| (name.to_lowercase(), (name, default)))
            .collect();

        Self {
            permissions: RwLock::new(Self::load(initial, &capabilities)),
            capabilities,
            persister,
        }
    }

    /// Parses the blob, filing every override under the registered spelling of
    /// its capability. Keys naming no registered capability are kept verbatim.
    fn load(blob: Option<&[u8]>, capabilities: &HashMap<String, (String, bool)>) -> Permissions {
        let Some(blob) = blob.filter(|b| !b.is_empty()) else {
            return Permissions::new();
        };

        let permissions: Permissions = match serde_json::from_slice(blob) {
            Ok(permissions) => permissions,
            Err(err) => {
                tracing::warn!("ignoring malformed permission data: {err}");
                return Permissions::new();
            }
        };

        permissions
            .into_iter()
            .map(|(user, perms)| {
                let perms = perms
                    .into_iter()
                    .map(|(key, stored)| match capabilities.get(&key.to_lowercase()) {
                        Some((name, _)) => (name.clone(), stored),
                        None => (key, stored),
                    })
                    .collect();
                (user, perms)
            })
            .collect()
    }

    fn registered_name<'a>(&'a self, capability: &'a str) -> &'a str {
        self.capabilities
            .get(&capability.to_lowercase())
            .map_or(capability, |(name, _)| name.as_str())
    }

    pub fn get(&self, user: &str, capability: &str, default: bool) -> bool {
        let capability = self.registered_name(capability);
        let stored = self
            .permissions
            .read()
            .get(user)
            .and_then(|perms| perms.get(capability))
            .copied()
            .unwrap_or(false);
        from_stored(stored, default)
    }

    pub fn set(&self, user: &str, capability: &str, value: bool) -> Result<(), PermissionError> {
        let (name, default) = self
            .capabilities
            .get(&capability.to_lowercase())
            .ok_or_else(|| PermissionError::UnknownCapability(capability.to_string()))?;

        let mut permissions = self.permissions.write();
        permissions
            .entry(user.to_string())
            .or_default()
            .insert(name.clone(), to_stored(value, *default));

        // persisted under the write lock so concurrent sets reach storage in order
        match serde_json::to_vec(&*permissions) {
            Ok(blob) => {
                if let Err(err) = self.persister.save(&blob) {
                    tracing::warn!("failed to persist permissions: {err}");
                }
            }
            Err(err) => tracing::warn!("failed to serialize permissions: {err}"),
        }

        tracing::info!(user, capability = %name, value, "permission updated");
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::{Arc, Mutex};

    fn table() -> Vec<(String, bool)> {
        vec![
            ("queue".to_string(), true),
            ("setPermissions".to_string(), false),
        ]
    }

    fn recording() -> (Box<dyn PermissionPersister>, Arc<Mutex<Vec<Vec<u8>>>>) {
        let saved = Arc::new(Mutex::new(Vec::new()));
        let sink = saved.clone();
        let persister = move |blob: &[u8]| -> io::Result<()> {
            sink.lock().unwrap().push(blob.to_vec());
            Ok(())
        };
        (Box::new(persister), saved)
    }

    #[test]
    fn absent_override_uses_default() {
        let store = PermissionStore::new(table(), None, Box::new(NoopPersister));
        assert!(store.get("u1", "queue", true));
        assert!(!store.get("u1", "setPermissions", false));
    }

    #[test]
    fn stored_flag_is_read_against_the_passed_default() {
        let store = PermissionStore::new(table(), None, Box::new(NoopPersister));
        store.set("u1", "setPermissions", true).unwrap();

        assert!(!store.get("u1", "setPermissions", true));
        assert!(store.get("u1", "setPermissions", false));
    }

    #[test]
    fn deny_allowed_by_default() {
        let store = PermissionStore::new(table(), None, Box::new(NoopPersister));
        store.set("u1", "queue", false).unwrap();
        assert!(!store.get("u1", "queue", true));
        assert!(store.get("u2", "queue", true));

        store.set("u1", "queue", true).unwrap();
        assert!(store.get("u1", "queue", true));
    }

    #[test]
    fn unknown_capability_is_rejected() {
        let (persister, saved) = recording();
        let store = PermissionStore::new(table(), None, persister);
        assert_eq!(
            store.set("u1", "launchRockets", true).unwrap_err(),
            PermissionError::UnknownCapability("launchRockets".to_string())
        );
        assert!(saved.lock().unwrap().is_empty());
    }

    #[test]
    fn capability_lookup_ignores_case() {
        let store = PermissionStore::new(table(), None, Box::new(NoopPersister));
        store.set("u1", "SETPERMISSIONS", true).unwrap();
        assert!(store.get("u1", "setPermissions", false));
        assert!(store.get("u1", "SetPermissions", false));
    }

    #[test]
    fn loaded_keys_match_registered_names_case_insensitively() {
        let blob = br#"{"u1":{"setpermissions":true,"QUEUE":true,"legacy":true}}"#;
        let (persister, saved) = recording();
        let store = PermissionStore::new(table(), Some(&blob[..]), persister);

        assert!(store.get("u1", "setPermissions", false));
        assert!(!store.get("u1", "queue", true));

        store.set("u1", "queue", true).unwrap();
        let saved = saved.lock().unwrap();
        let last: Permissions = serde_json::from_slice(&saved[0]).unwrap();
        assert_eq!(last["u1"]["queue"], false);
        assert_eq!(last["u1"]["setPermissions"], true);
        assert_eq!(last["u1"]["legacy"], true);
        assert!(!last["u1"].contains_key("QUEUE"));
    }

    #[test]
    fn every_set_is_persisted() {
        let (persister, saved) = recording();
        let store = PermissionStore::new(table(), None, persister);
        store.set("u1", "queue", false).unwrap();
        store.set("u2", "setPermissions", true).unwrap();

        let saved = saved.lock().unwrap();
        assert_eq!(saved.len(), 2);
        let last: Permissions = serde_json::from_slice(&saved[1]).unwrap();
        assert_eq!(last["u1"]["queue"], true);
        assert_eq!(last["u2"]["setPermissions"], true);
    }

    #[test]
    fn persistence_failure_keeps_update() {
        let failing = |_: &[u8]| -> io::Result<()> { Err(io::Error::other("disk full")) };
        let store = PermissionStore::new(table(), None, Box::new(failing));
        store.set("u1", "queue", false).unwrap();
        assert!(!store.get("u1", "queue", true));
    }

    #[test]
    fn loads_initial_blob() {
        let blob: &[u8] = br#"{"u1":{"queue":true}}"#;
        let store = PermissionStore::new(table(), Some(blob), Box::new(NoopPersister));
        assert!(!store.get("u1", "queue", true));
    }

    #[test]
    fn malformed_blob_starts_empty() {
        let store = PermissionStore::new(table(), Some(&b"{not json"[..]), Box::new(NoopPersister));
        assert!(store.get("u1", "queue", true));
        let store = PermissionStore::new(table(), Some(&b""[..]), Box::new(NoopPersister));
        assert!(store.get("u1", "queue", true));
    }

    #[test]
    fn file_persister_round_trip() {
        let path = std::env::temp_dir().join(format!("tanuki-perm-{}.json", std::process::id()));
        let persister = FilePersister::new(&path);
        let _ = std::fs::remove_file(&path);
        assert!(persister.load().unwrap().is_none());

        persister.save(b"{}").unwrap();
        assert_eq!(persister.load().unwrap().as_deref(), Some(&b"{}"[..]));
        std::fs::remove_file(&path).unwrap();
    }
}
