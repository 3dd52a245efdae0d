//! Runs one CLI invocation: opens the session, decides on dispatch and
//! either re-executes the pinned version or runs the local command.

use crate::config::DISPATCHED_ENV;
use crate::error::{Error, Result};
use crate::platform::platform;
use crate::session::Session;
use crate::version_manager::VersionManager;
use std::ffi::OsString;
use std::path::Path;
use std::process::Command;
use std::sync::Arc;
use tracing::{debug, info, warn};

pub struct Engine {
    session: Arc<Session>,
    version_manager: VersionManager,
}

impl Engine {
    pub fn new(session: Arc<Session>, version_manager: VersionManager) -> Self {
        Self {
            session,
            version_manager,
        }
    }

    pub fn version_manager(&self) -> &VersionManager {
        &self.version_manager
    }

    /// Executes the invocation with `args` (program name excluded).
    ///
    /// When another version is required its executable receives `args` unchanged
    /// and its exit code is returned; otherwise `local` runs. The session is torn
    /// down on every path.
    pub fn exec<F, E>(&mut self, args: &[OsString], preferred: Option<&str>, local: F) -> std::result::Result<i32, E>
    where
        F: FnOnce(&VersionManager) -> std::result::Result<i32, E>,
        E: From<Error>,
    {
        self.scoped(|engine| {
            engine.version_manager.init(preferred)?;
            let dispatch = engine
                .version_manager
                .dispatch_state()
                .filter(|s| s.should_dispatch)
                .and_then(|s| Some((s.dispatch_target.as_deref()?, s.required_version.as_deref()?)));
            match dispatch {
                Some((target, tag)) => Ok(spawn(target, tag, args)?),
                None => local(&engine.version_manager),
            }
        })
    }

    /// Runs `local` inside a session without making the dispatch decision.
    pub fn exec_local<F, E>(&mut self, local: F) -> std::result::Result<i32, E>
    where
        F: FnOnce(&VersionManager) -> std::result::Result<i32, E>,
        E: From<Error>,
    {
        self.scoped(|engine| local(&engine.version_manager))
    }

    fn scoped<T, E>(&mut self, body: impl FnOnce(&mut Self) -> std::result::Result<T, E>) -> std::result::Result<T, E>
    where
        E: From<Error>,
    {
        if let Err(e) = self.session.init() {
            self.teardown();
            return Err(e.into());
        }
        let outcome = body(self);
        match (outcome, self.session.destroy()) {
            (Ok(value), Ok(())) => Ok(value),
            (Ok(_), Err(e)) => Err(e.into()),
            (Err(e), Ok(())) => Err(e),
            (Err(e), Err(destroy_err)) => {
                warn!("session teardown failed: {destroy_err}");
                Err(e)
            }
        }
    }

    fn teardown(&self) {
        if let Err(e) = self.session.destroy() {
            warn!("session teardown failed: {e}");
        }
    }
}

fn spawn(target: &Path, tag: &str, args: &[OsString]) -> Result<i32> {
    if !target.is_file() {
        return Err(Error::DispatchTargetMissing(target.to_path_buf()));
    }
    if platform().ensure_executable(target)? {
        debug!("added execute permission to {target:?}");
    }
    info!("dispatching to {target:?}");
    let status = Command::new(target)
        .args(args)
        .env(DISPATCHED_ENV, tag)
        .status()?;
    debug!("{target:?} exited with {status}");
    Ok(status.code().unwrap_or(1))
}
