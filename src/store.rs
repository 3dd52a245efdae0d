//! `{persistent, session}` key/value store kept under one name inside a
//! [`KeyValueDocument`].

use crate::document::KeyValueDocument;
use crate::error::{Error, Result};
use crate::ids::random_id;
use chrono::Utc;
use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use std::path::PathBuf;
use std::sync::{Mutex, MutexGuard};
use std::time::Duration;
use tracing::debug;

pub const DEFAULT_STORE_NAME: &str = "tvm";
const SESSION_ID_LEN: usize = 32;
const CREATED_AT: &str = "_createdAt";

#[derive(Debug, Default, Serialize, Deserialize)]
struct StoreData {
    persistent: Map<String, Value>,
    session: Map<String, Value>,
}

struct StoreState {
    name: String,
    session_id: Option<String>,
}

pub struct Store {
    document: KeyValueDocument,
    state: Mutex<StoreState>,
}

impl Store {
    pub fn new(dir: impl Into<PathBuf>) -> Self {
        Self::from_document(KeyValueDocument::new(dir))
    }

    pub fn with_lock_timing(dir: impl Into<PathBuf>, poll: Duration, timeout: Duration) -> Self {
        Self::from_document(KeyValueDocument::new(dir).with_lock_timing(poll, timeout))
    }

    pub fn from_document(document: KeyValueDocument) -> Self {
        Self {
            document,
            state: Mutex::new(StoreState {
                name: DEFAULT_STORE_NAME.to_string(),
                session_id: None,
            }),
        }
    }

    pub fn document(&self) -> &KeyValueDocument {
        &self.document
    }

    fn lock_state(&self) -> Result<MutexGuard<'_, StoreState>> {
        self.state.lock().map_err(|_| Error::LockPoisoned)
    }

    fn name(&self) -> Result<String> {
        Ok(self.lock_state()?.name.clone())
    }

    pub fn session_id(&self) -> Result<Option<String>> {
        Ok(self.lock_state()?.session_id.clone())
    }

    /// Opens the document, repairs the store structure and starts a session.
    ///
    /// A second call while a session is active keeps that session.
    pub fn init(&self, name: &str) -> Result<()> {
        self.document.init()?;
        self.lock_state()?.name = name.to_string();
        let active = self.session_id()?;

        let id = self.document.update_item(name, |item| {
            let mut store = match item.take().map(serde_json::from_value::<StoreData>) {
                Some(Ok(store)) => store,
                _ => {
                    debug!("store {name} missing or invalid, resetting");
                    StoreData::default()
                }
            };
            let id = active.unwrap_or_else(|| loop {
                let candidate = random_id(SESSION_ID_LEN);
                if !store.session.contains_key(&candidate) {
                    break candidate;
                }
            });
            let mut session = take_session(&mut store, &id);
            session
                .entry("_id")
                .or_insert_with(|| Value::String(id.clone()));
            store.session.insert(id.clone(), Value::Object(session));
            stamp_creation(&mut store, Some(id.as_str()));
            *item = Some(serde_json::to_value(&store)?);
            Ok(id)
        })?;

        debug!("store {name} session {id} active");
        self.lock_state()?.session_id = Some(id);
        Ok(())
    }

    fn current_session(&self) -> Result<String> {
        self.session_id()?.ok_or(Error::SessionDestroyed)
    }

    fn get_store(&self) -> Result<StoreData> {
        match self.document.get_item(&self.name()?)? {
            None | Some(Value::Null) => Err(Error::NoStore),
            Some(value) => serde_json::from_value(value).map_err(|_| Error::InvalidStore),
        }
    }

    /// Applies `change` to the stored data and writes it back under one document lock.
    fn modify_store<T>(&self, change: impl FnOnce(&mut StoreData) -> Result<T>) -> Result<T> {
        self.document.update_item(&self.name()?, |item| {
            let mut store: StoreData = match item.take() {
                None | Some(Value::Null) => return Err(Error::NoStore),
                Some(value) => serde_json::from_value(value).map_err(|_| Error::InvalidStore)?,
            };
            let output = change(&mut store)?;
            *item = Some(serde_json::to_value(&store)?);
            Ok(output)
        })
    }

    /// Applies `change` to this session's partition.
    fn modify_session<T>(&self, change: impl FnOnce(&mut Map<String, Value>) -> T) -> Result<T> {
        let id = self.current_session()?;
        self.modify_store(|store| {
            let mut session = take_session(store, &id);
            let output = change(&mut session);
            store.session.insert(id, Value::Object(session));
            Ok(output)
        })
    }

    /// Drops this session's partition and unregisters the document client.
    pub fn destroy_session(&self) -> Result<()> {
        if let Some(id) = self.session_id()? {
            self.modify_store(|store| {
                store.session.remove(&id);
                Ok(())
            })?;
            self.lock_state()?.session_id = None;
            debug!("store session {id} destroyed");
        } else {
            self.get_store()?;
        }
        self.document.destroy_session()
    }

    pub fn clear_persistent(&self) -> Result<()> {
        let id = self.session_id()?;
        self.modify_store(|store| {
            store.persistent = Map::new();
            stamp_creation(store, id.as_deref());
            Ok(())
        })
    }

    /// Removes every persistent key starting with `prefix`; returns how many went.
    pub fn remove_persistent_prefixed(&self, prefix: &str) -> Result<usize> {
        self.modify_store(|store| {
            let before = store.persistent.len();
            store.persistent.retain(|key, _| !key.starts_with(prefix));
            Ok(before - store.persistent.len())
        })
    }

    /// Removes the whole store entry; later accessors fail with `NoStore`.
    pub fn delete_all(&self) -> Result<()> {
        self.document.remove_item(&self.name()?)
    }

    /// One session key, or the whole session object when `key` is `None`.
    pub fn get_session_value(&self, key: Option<&str>) -> Result<Option<Value>> {
        let mut store = self.get_store()?;
        let id = self.session_id()?.unwrap_or_default();
        let session = store.session.remove(&id);
        let output = match key {
            Some(key) => session.and_then(|mut s| s.as_object_mut().and_then(|m| m.remove(key))),
            None => session,
        };
        debug!("get session value {key:?}: {output:?}");
        Ok(output)
    }

    pub fn set_session_value(&self, key: &str, value: Value) -> Result<()> {
        debug!("set session value {key}: {value}");
        self.modify_session(|session| {
            session.insert(key.to_string(), value);
        })
    }

    pub fn remove_session_key(&self, key: &str) -> Result<()> {
        debug!("remove session key {key}");
        self.modify_session(|session| {
            session.remove(key);
        })
    }

    /// One persistent key, or the whole persistent object when `key` is `None`.
    pub fn get_persistent_value(&self, key: Option<&str>) -> Result<Option<Value>> {
        let mut store = self.get_store()?;
        let output = match key {
            Some(key) => store.persistent.remove(key),
            None => Some(Value::Object(store.persistent)),
        };
        debug!("get persistent value {key:?}: {output:?}");
        Ok(output)
    }

    pub fn set_persistent_value(&self, key: &str, value: Value) -> Result<()> {
        debug!("set persistent value {key}: {value}");
        self.modify_store(|store| {
            store.persistent.insert(key.to_string(), value);
            Ok(())
        })
    }

    pub fn remove_persistent_key(&self, key: &str) -> Result<()> {
        debug!("remove persistent key {key}");
        self.modify_store(|store| {
            store.persistent.remove(key);
            Ok(())
        })
    }

    pub fn get_persistent<T: DeserializeOwned>(&self, key: &str) -> Result<Option<T>> {
        self.get_persistent_value(Some(key))?
            .map(serde_json::from_value)
            .transpose()
            .map_err(Error::from)
    }

    pub fn set_persistent<T: Serialize>(&self, key: &str, value: &T) -> Result<()> {
        self.set_persistent_value(key, serde_json::to_value(value)?)
    }
}

/// Sets `_createdAt` on the persistent partition and the given session, once.
fn stamp_creation(store: &mut StoreData, session_id: Option<&str>) {
    let now = Value::from(Utc::now().timestamp_millis());
    store
        .persistent
        .entry(CREATED_AT)
        .or_insert_with(|| now.clone());
    if let Some(id) = session_id {
        let mut session = take_session(store, id);
        session.entry(CREATED_AT).or_insert(now);
        store.session.insert(id.to_string(), Value::Object(session));
    }
}

fn take_session(store: &mut StoreData, id: &str) -> Map<String, Value> {
    match store.session.remove(id) {
        Some(Value::Object(session)) => session,
        _ => Map::new(),
    }
}
