//! One CLI run: a store session plus a private scratch directory.

use crate::error::Result;
use crate::ids::unique_basename;
use crate::store::Store;
use fs_err as fs;
use serde_json::Value;
use std::path::PathBuf;
use std::sync::Arc;
use tracing::{debug, warn};

const TMP_DIR_KEY: &str = "tmpDir";

pub struct Session {
    store: Arc<Store>,
    name: String,
    tmp_root: PathBuf,
}

impl Session {
    pub fn new(store: Arc<Store>, name: impl Into<String>, tmp_root: impl Into<PathBuf>) -> Self {
        Self {
            store,
            name: name.into(),
            tmp_root: tmp_root.into(),
        }
    }

    pub fn store(&self) -> &Arc<Store> {
        &self.store
    }

    pub fn init(&self) -> Result<()> {
        self.store.init(&self.name)?;
        self.mk_tmp_dir()
    }

    /// Removes the temp dir and ends the store session. Both steps always
    /// run; the first failure is returned.
    pub fn destroy(&self) -> Result<()> {
        let removed = self.rm_tmp_dir();
        if let Err(e) = &removed {
            warn!("removing session tmp dir failed: {e}");
        }
        let destroyed = self.store.destroy_session();
        removed.and(destroyed)
    }

    pub fn get_tmp_dir(&self) -> Result<Option<PathBuf>> {
        Ok(self
            .store
            .get_session_value(Some(TMP_DIR_KEY))?
            .and_then(|v| v.as_str().map(PathBuf::from))
            .filter(|p| !p.as_os_str().is_empty()))
    }

    fn mk_tmp_dir(&self) -> Result<()> {
        if let Some(existing) = self.get_tmp_dir()? {
            debug!("session tmp dir already exists {existing:?}");
            return Ok(());
        }
        fs::create_dir_all(&self.tmp_root)?;
        let dir = self.tmp_root.join(unique_basename(&self.tmp_root, "", None)?);
        debug!("creating session tmp dir {dir:?}");
        fs::create_dir_all(&dir)?;
        self.store
            .set_session_value(TMP_DIR_KEY, Value::String(dir.to_string_lossy().into_owned()))
    }

    fn rm_tmp_dir(&self) -> Result<()> {
        let Some(dir) = self.get_tmp_dir()? else {
            debug!("session tmp dir already removed");
            return Ok(());
        };
        if dir.exists() {
            debug!("removing session tmp dir {dir:?}");
            fs::remove_dir_all(&dir)?;
        }
        self.store.remove_session_key(TMP_DIR_KEY)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    #[test]
    fn init_creates_and_destroy_removes_tmp_dir() {
        let root = TempDir::new().unwrap();
        let store = Arc::new(Store::new(root.path().join("localStorage")));
        let session = Session::new(store.clone(), "tvm", root.path().join("tmp"));

        assert_eq!(session.get_tmp_dir().unwrap_or(None), None);
        session.init().unwrap();
        let tmp = session.get_tmp_dir().unwrap().unwrap();
        assert!(tmp.is_dir());
        assert!(tmp.starts_with(root.path().join("tmp")));

        session.init().unwrap();
        assert_eq!(session.get_tmp_dir().unwrap(), Some(tmp.clone()));

        session.destroy().unwrap();
        assert!(!tmp.exists());
        assert_eq!(store.session_id().unwrap(), None);
    }

    #[test]
    fn failed_tmp_dir_removal_still_ends_session() {
        let root = TempDir::new().unwrap();
        let store = Arc::new(Store::new(root.path().join("localStorage")));
        let session = Session::new(store.clone(), "tvm", root.path().join("tmp"));
        session.init().unwrap();
        let client = store.document().client_id().unwrap().unwrap();
        // a plain file where the dir was makes remove_dir_all fail
        let tmp = session.get_tmp_dir().unwrap().unwrap();
        std::fs::remove_dir(&tmp).unwrap();
        std::fs::write(&tmp, "not a dir").unwrap();

        assert!(session.destroy().is_err());
        assert_eq!(store.session_id().unwrap(), None);
        assert!(!store.document().clients_dir().join(client).exists());
    }

    #[test]
    fn two_sessions_get_private_tmp_dirs() {
        let root = TempDir::new().unwrap();
        let storage = root.path().join("localStorage");
        let a = Session::new(Arc::new(Store::new(&storage)), "tvm", root.path().join("tmp"));
        let b = Session::new(Arc::new(Store::new(&storage)), "tvm", root.path().join("tmp"));
        a.init().unwrap();
        b.init().unwrap();

        let a_tmp = a.get_tmp_dir().unwrap().unwrap();
        let b_tmp = b.get_tmp_dir().unwrap().unwrap();
        assert_ne!(a_tmp, b_tmp);

        a.destroy().unwrap();
        assert!(b_tmp.is_dir());
        b.destroy().unwrap();
    }
}
