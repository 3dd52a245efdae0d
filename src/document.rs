//! Single JSON document on disk, guarded by a sibling lock file.
//!
//! Every item operation is one open → read-modify-write → close cycle. The lock
//! file holds the id of the client that owns it; each client also registers a
//! directory under `clients/` while its session is live.

use crate::error::{Error, Result};
use crate::ids::unique_basename;
use fs_err as fs;
use serde_json::{Map, Value};
use std::io::ErrorKind;
use std::path::{Path, PathBuf};
use std::sync::{Mutex, MutexGuard};
use std::time::{Duration, Instant};
use tracing::{debug, warn};

pub const DOCUMENT_FILE: &str = "store.json";
pub const LOCK_FILE: &str = "store.lock";
pub const CLIENTS_DIR: &str = "clients";

const DEFAULT_POLL: Duration = Duration::from_millis(100);
const DEFAULT_LOCK_TIMEOUT: Duration = Duration::from_secs(60);
const MAX_POLL: Duration = Duration::from_secs(1);

pub struct KeyValueDocument {
    dir: PathBuf,
    poll: Duration,
    lock_timeout: Duration,
    /// `None` until `init()` and again after `destroy_session()`.
    client_id: Mutex<Option<String>>,
}

impl KeyValueDocument {
    pub fn new(dir: impl Into<PathBuf>) -> Self {
        Self {
            dir: dir.into(),
            poll: DEFAULT_POLL,
            lock_timeout: DEFAULT_LOCK_TIMEOUT,
            client_id: Mutex::new(None),
        }
    }

    pub fn with_lock_timing(mut self, poll: Duration, lock_timeout: Duration) -> Self {
        self.poll = poll.max(Duration::from_millis(1));
        self.lock_timeout = lock_timeout;
        self
    }

    pub fn dir(&self) -> &Path {
        &self.dir
    }

    pub fn document_path(&self) -> PathBuf {
        self.dir.join(DOCUMENT_FILE)
    }

    pub fn lock_path(&self) -> PathBuf {
        self.dir.join(LOCK_FILE)
    }

    pub fn clients_dir(&self) -> PathBuf {
        self.dir.join(CLIENTS_DIR)
    }

    fn lock_client(&self) -> Result<MutexGuard<'_, Option<String>>> {
        self.client_id.lock().map_err(|_| Error::LockPoisoned)
    }

    pub fn client_id(&self) -> Result<Option<String>> {
        Ok(self.lock_client()?.clone())
    }

    fn active_client(&self) -> Result<String> {
        self.lock_client()?.clone().ok_or(Error::SessionDestroyed)
    }

    /// Creates the document if needed and registers a client.
    ///
    /// Calling it again while a client is registered keeps that registration.
    pub fn init(&self) -> Result<()> {
        let mut client = self.lock_client()?;
        if let Some(id) = client.as_deref() {
            debug!("document client {id} already registered");
            return Ok(());
        }
        if !self.document_path().exists() {
            self.create_document()?;
        }
        let clients = self.clients_dir();
        fs::create_dir_all(&clients)?;
        let id = unique_basename(&clients, "client_", None)?;
        fs::create_dir_all(clients.join(&id))?;
        debug!("registered document client {id}");
        *client = Some(id);
        Ok(())
    }

    /// Unregisters this client; a no-op when already unregistered.
    pub fn destroy_session(&self) -> Result<()> {
        let Some(id) = self.lock_client()?.take() else {
            return Ok(());
        };
        let path = self.clients_dir().join(&id);
        if path.exists() {
            fs::remove_dir_all(&path)?;
        }
        debug!("unregistered document client {id}");
        Ok(())
    }

    fn create_document(&self) -> Result<()> {
        fs::create_dir_all(&self.dir)?;
        let created = fs::OpenOptions::new()
            .write(true)
            .create_new(true)
            .open(self.document_path());
        match created {
            Ok(_) => {
                debug!("created document {:?}", self.document_path());
                Ok(())
            }
            Err(e) if e.kind() == ErrorKind::AlreadyExists => Ok(()),
            Err(e) => Err(e.into()),
        }
    }

    /// Owner recorded in the lock file, `None` when unlocked.
    pub fn lock_owner(&self) -> Result<Option<String>> {
        match fs::read_to_string(self.lock_path()) {
            Ok(owner) => Ok(Some(owner)),
            Err(e) if e.kind() == ErrorKind::NotFound => Ok(None),
            Err(e) => Err(e.into()),
        }
    }

    /// Waits for the lock file to disappear, then claims it for this client.
    pub fn open_document(&self) -> Result<()> {
        let id = self.active_client()?;
        let lock = self.lock_path();
        let started = Instant::now();
        let mut tick = self.poll;
        while lock.exists() {
            let waited = started.elapsed();
            if waited >= self.lock_timeout {
                return Err(Error::LockTimeout { path: lock, waited });
            }
            std::thread::sleep(tick);
            tick = (tick * 2).min(MAX_POLL);
        }
        self.lock_document(&id)
    }

    /// Claims the lock file in one step: the owner id is staged in a private
    /// file and hard-linked into place, so the lock never exists without it.
    fn lock_document(&self, id: &str) -> Result<()> {
        let staged = self.dir.join(format!("{LOCK_FILE}.{id}"));
        fs::write(&staged, id)?;
        let claimed = fs::hard_link(&staged, self.lock_path());
        if let Err(e) = fs::remove_file(&staged) {
            warn!("removing staged lock {staged:?} failed: {e}");
        }
        match claimed {
            Ok(()) => {
                debug!("document locked by {id}");
                Ok(())
            }
            Err(e) if e.kind() == ErrorKind::AlreadyExists => {
                let owner = self.lock_owner()?.unwrap_or_default();
                Err(Error::DocumentLocked(owner))
            }
            Err(e) => Err(e.into()),
        }
    }

    /// Releases the lock only when this client owns it. Returns whether it did.
    pub fn close_document(&self) -> Result<bool> {
        let id = self.active_client()?;
        match self.lock_owner()? {
            Some(owner) if owner == id => {
                fs::remove_file(self.lock_path())?;
                debug!("document unlocked by {id}");
                Ok(true)
            }
            _ => Ok(false),
        }
    }

    /// Runs `body` between `open_document` and `close_document`; the lock is
    /// released on every exit path.
    fn transact<T>(&self, body: impl FnOnce() -> Result<T>) -> Result<T> {
        self.open_document()?;
        let outcome = body();
        match self.close_document() {
            Ok(true) => {}
            Ok(false) => warn!("document lock no longer owned by this client"),
            Err(e) if outcome.is_ok() => return Err(e),
            Err(e) => warn!("releasing document lock failed: {e}"),
        }
        outcome
    }

    fn read_document(&self) -> Result<Map<String, Value>> {
        let path = self.document_path();
        let raw = match fs::read_to_string(&path) {
            Ok(raw) => raw,
            Err(e) if e.kind() == ErrorKind::NotFound => return Err(Error::DocumentMissing(path)),
            Err(e) => return Err(e.into()),
        };
        match decode_data(&raw)? {
            Value::Object(map) => Ok(map),
            _ => Ok(Map::new()),
        }
    }

    fn write_document(&self, data: Map<String, Value>) -> Result<()> {
        let path = self.document_path();
        let tmp = path.with_extension("json.tmp");
        fs::write(&tmp, encode_data(&Value::Object(data))?)?;
        fs::rename(&tmp, &path)?;
        Ok(())
    }

    pub fn get_item(&self, key: &str) -> Result<Option<Value>> {
        self.transact(|| Ok(self.read_document()?.remove(key)))
    }

    pub fn set_item(&self, key: &str, value: Value) -> Result<()> {
        self.transact(|| {
            let mut data = self.read_document()?;
            data.insert(key.to_string(), value);
            self.write_document(data)
        })
    }

    /// Read-modify-write of one item under a single lock. `update` sees the
    /// current value (`None` when absent); whatever it leaves is written back,
    /// and nothing is written when it fails.
    pub fn update_item<T>(&self, key: &str, update: impl FnOnce(&mut Option<Value>) -> Result<T>) -> Result<T> {
        self.transact(|| {
            let mut data = self.read_document()?;
            let mut item = data.remove(key);
            let output = update(&mut item)?;
            if let Some(value) = item {
                data.insert(key.to_string(), value);
            }
            self.write_document(data)?;
            Ok(output)
        })
    }

    pub fn remove_item(&self, key: &str) -> Result<()> {
        self.transact(|| {
            let mut data = self.read_document()?;
            data.remove(key);
            self.write_document(data)
        })
    }
}

/// JSON encoding, except that the empty string stays empty.
pub fn encode_data(value: &Value) -> Result<String> {
    match value {
        Value::String(s) if s.is_empty() => Ok(String::new()),
        other => Ok(serde_json::to_string(other)?),
    }
}

pub fn decode_data(data: &str) -> Result<Value> {
    if data.is_empty() {
        return Ok(Value::String(String::new()));
    }
    Ok(serde_json::from_str(data)?)
}

#[cfg(test)]
mod tests {
    use super::*;
    use rstest::rstest;
    use serde_json::json;
    use std::thread;
    use tempfile::TempDir;

    fn quick(dir: &Path) -> KeyValueDocument {
        KeyValueDocument::new(dir).with_lock_timing(Duration::from_millis(10), Duration::from_secs(10))
    }

    #[rstest]
    #[case(json!(""), "")]
    #[case(json!("abc"), "\"abc\"")]
    #[case(json!(12), "12")]
    #[case(json!(null), "null")]
    #[case(json!({"a": [1, true]}), "{\"a\":[1,true]}")]
    fn encode_data_contract(#[case] value: Value, #[case] encoded: &str) {
        assert_eq!(encode_data(&value).unwrap(), encoded);
        assert_eq!(decode_data(encoded).unwrap(), value);
    }

    #[test]
    fn init_creates_document_and_client_dir_once() {
        let dir = TempDir::new().unwrap();
        let doc = quick(dir.path());
        doc.init().unwrap();
        let id = doc.client_id().unwrap().unwrap();
        assert!(id.starts_with("client_"));
        assert!(doc.document_path().exists());
        assert!(doc.clients_dir().join(&id).is_dir());

        doc.init().unwrap();
        assert_eq!(doc.client_id().unwrap().as_deref(), Some(id.as_str()));
        assert_eq!(std::fs::read_dir(doc.clients_dir()).unwrap().count(), 1);
    }

    #[test]
    fn items_round_trip_through_the_file() {
        let dir = TempDir::new().unwrap();
        let doc = quick(dir.path());
        doc.init().unwrap();

        assert_eq!(doc.get_item("k").unwrap(), None);
        doc.set_item("k", json!({"x": 1})).unwrap();
        doc.set_item("other", json!("v")).unwrap();
        assert_eq!(doc.get_item("k").unwrap(), Some(json!({"x": 1})));

        let raw = std::fs::read_to_string(doc.document_path()).unwrap();
        assert_eq!(
            serde_json::from_str::<Value>(&raw).unwrap(),
            json!({"k": {"x": 1}, "other": "v"})
        );

        doc.remove_item("k").unwrap();
        assert_eq!(doc.get_item("k").unwrap(), None);
        assert_eq!(doc.get_item("other").unwrap(), Some(json!("v")));
        assert!(!doc.lock_path().exists());
    }

    #[test]
    fn operations_require_an_active_client() {
        let dir = TempDir::new().unwrap();
        let doc = quick(dir.path());
        assert!(matches!(doc.get_item("k"), Err(Error::SessionDestroyed)));

        doc.init().unwrap();
        let id = doc.client_id().unwrap().unwrap();
        doc.destroy_session().unwrap();
        assert!(!doc.clients_dir().join(id).exists());
        assert!(matches!(doc.set_item("k", json!(1)), Err(Error::SessionDestroyed)));
        doc.destroy_session().unwrap();

        doc.init().unwrap();
        doc.set_item("k", json!(1)).unwrap();
    }

    #[test]
    fn close_by_non_owner_leaves_lock_untouched() {
        let dir = TempDir::new().unwrap();
        let a = quick(dir.path());
        let b = quick(dir.path());
        a.init().unwrap();
        b.init().unwrap();

        a.open_document().unwrap();
        assert!(!b.close_document().unwrap());
        assert_eq!(a.lock_owner().unwrap(), a.client_id().unwrap());

        assert!(a.close_document().unwrap());
        assert!(!a.lock_path().exists());
    }

    #[test]
    fn lock_already_claimed_reports_owner() {
        let dir = TempDir::new().unwrap();
        let a = quick(dir.path());
        let b = quick(dir.path());
        a.init().unwrap();
        b.init().unwrap();
        a.open_document().unwrap();

        let owner = a.client_id().unwrap().unwrap();
        match b.lock_document(&b.client_id().unwrap().unwrap()) {
            Err(Error::DocumentLocked(by)) => assert_eq!(by, owner),
            other => panic!("expected DocumentLocked, got {other:?}"),
        }
    }

    #[test]
    fn waiting_for_a_held_lock_times_out() {
        let dir = TempDir::new().unwrap();
        let a = quick(dir.path());
        let b = KeyValueDocument::new(dir.path())
            .with_lock_timing(Duration::from_millis(5), Duration::from_millis(50));
        a.init().unwrap();
        b.init().unwrap();
        a.open_document().unwrap();

        assert!(matches!(b.get_item("k"), Err(Error::LockTimeout { .. })));
    }

    #[test]
    fn writer_waits_until_owner_closes() {
        let dir = TempDir::new().unwrap();
        let a = quick(dir.path());
        a.init().unwrap();
        a.set_item("k", json!("a")).unwrap();
        a.open_document().unwrap();

        let path = dir.path().to_path_buf();
        let writer = thread::spawn(move || {
            let b = quick(&path);
            b.init().unwrap();
            b.set_item("k", json!("b")).unwrap();
        });

        thread::sleep(Duration::from_millis(200));
        let raw = std::fs::read_to_string(a.document_path()).unwrap();
        assert_eq!(serde_json::from_str::<Value>(&raw).unwrap(), json!({"k": "a"}));

        assert!(a.close_document().unwrap());
        writer.join().unwrap();
        assert_eq!(a.get_item("k").unwrap(), Some(json!("b")));
    }

    #[test]
    fn lock_claim_leaves_only_the_owned_lock() {
        let dir = TempDir::new().unwrap();
        let doc = quick(dir.path());
        doc.init().unwrap();
        let id = doc.client_id().unwrap().unwrap();
        // leftover from a claim interrupted before cleanup
        std::fs::write(dir.path().join(format!("{LOCK_FILE}.{id}")), "").unwrap();

        doc.open_document().unwrap();
        assert_eq!(doc.lock_owner().unwrap().as_deref(), Some(id.as_str()));
        let mut names: Vec<String> = std::fs::read_dir(dir.path())
            .unwrap()
            .map(|e| e.unwrap().file_name().to_string_lossy().into_owned())
            .collect();
        names.sort();
        assert_eq!(names, [CLIENTS_DIR, DOCUMENT_FILE, LOCK_FILE]);
        assert!(doc.close_document().unwrap());
    }

    #[test]
    fn update_item_sees_and_replaces_current_value() {
        let dir = TempDir::new().unwrap();
        let doc = quick(dir.path());
        doc.init().unwrap();
        doc.set_item("n", json!(1)).unwrap();

        let previous = doc
            .update_item("n", |item| {
                let n = item.as_ref().and_then(Value::as_i64).unwrap_or(0);
                *item = Some(json!(n + 1));
                Ok(n)
            })
            .unwrap();
        assert_eq!(previous, 1);
        assert_eq!(doc.get_item("n").unwrap(), Some(json!(2)));

        doc.update_item("n", |item| Ok(item.take())).unwrap();
        assert_eq!(doc.get_item("n").unwrap(), None);

        let failed = doc.update_item("other", |item| {
            *item = Some(json!("lost"));
            Err::<(), _>(Error::NoStore)
        });
        assert!(matches!(failed, Err(Error::NoStore)));
        assert_eq!(doc.get_item("other").unwrap(), None);
        assert!(!doc.lock_path().exists());
    }

    #[test]
    fn lock_is_released_when_the_body_fails() {
        let dir = TempDir::new().unwrap();
        let doc = quick(dir.path());
        doc.init().unwrap();

        std::fs::write(doc.document_path(), "{not json").unwrap();
        assert!(matches!(doc.get_item("k"), Err(Error::Json(_))));
        assert!(!doc.lock_path().exists());

        std::fs::remove_file(doc.document_path()).unwrap();
        assert!(matches!(doc.set_item("k", json!(1)), Err(Error::DocumentMissing(_))));
        assert!(!doc.lock_path().exists());
    }
}
