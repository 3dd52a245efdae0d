mod cli;
mod command_handlers;

use anyhow::{Context, Result};
use clap::Parser;
use std::ffi::OsString;
use std::sync::Arc;
use tracing_subscriber::EnvFilter;
use tvm::config::{self, CliDirs, TvmConfig, CONFIG_FILE, LOG_ENV};
use tvm::engine::Engine;
use tvm::github::ReleaseCache;
use tvm::session::Session;
use tvm::store::Store;
use tvm::version_manager::VersionManager;

use crate::cli::Cli;

fn init_tracing() {
    let filter = EnvFilter::try_from_env(LOG_ENV).unwrap_or_else(|_| EnvFilter::new("warn"));
    let _ = tracing_subscriber::fmt()
        .with_writer(std::io::stderr)
        .with_target(false)
        .with_env_filter(filter)
        .try_init();
}

fn main() -> Result<()> {
    init_tracing();

    let home = config::home_dir();
    let config_path = home.join(CONFIG_FILE);
    let cfg = TvmConfig::load(&config_path)
        .with_context(|| format!("loading {}", config_path.display()))?;
    let dirs = CliDirs::new(&home);

    let store = Arc::new(Store::with_lock_timing(
        &dirs.local_storage,
        cfg.lock_poll(),
        cfg.lock_timeout(),
    ));
    let session = Arc::new(Session::new(store.clone(), &cfg.store_name, &dirs.tmp));
    let releases = ReleaseCache::new(cfg.github.clone(), store.clone()).with_ttl(cfg.cache_ttl());
    let work_dir = std::env::current_dir().context("reading current directory")?;
    let vm = VersionManager::new(dirs, releases, session.clone(), &cfg.executable_name, work_dir)
        .with_dispatch_guard(config::dispatched_tag_from_env());
    let mut engine = Engine::new(session, vm);

    let args: Vec<OsString> = std::env::args_os().skip(1).collect();
    let preferred = config::preferred_version_from_env();
    let preferred = preferred.as_deref();
    // `which` reports the decision instead of following it
    let code = if args.first().is_some_and(|a| a.as_os_str() == "which") {
        engine.exec_local(|vm| run_local(&args, vm, preferred))?
    } else {
        engine.exec(&args, preferred, |vm| run_local(&args, vm, preferred))?
    };
    std::process::exit(code);
}

// Parsed only after the dispatch decision so a pinned version sees its own arguments.
fn run_local(args: &[OsString], vm: &VersionManager, preferred: Option<&str>) -> Result<i32> {
    let argv = std::iter::once(OsString::from("tvm")).chain(args.iter().cloned());
    let cli = match Cli::try_parse_from(argv) {
        Ok(cli) => cli,
        Err(e) => {
            e.print()?;
            return Ok(e.exit_code());
        }
    };
    command_handlers::dispatch::dispatch(cli.command, vm, preferred)?;
    Ok(0)
}
