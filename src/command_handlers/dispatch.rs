use crate::cli::{CacheAction, Commands};
use crate::command_handlers::{cache, install, versions};
use anyhow::Result;
use tvm::version_manager::VersionManager;

pub fn dispatch(cmd: Commands, vm: &VersionManager, preferred: Option<&str>) -> Result<()> {
    match cmd {
        Commands::Versions => versions::list_versions(vm),
        Commands::Install { tag } => install::install_version(vm, &tag),
        Commands::UseLatest => install::use_latest(vm),
        Commands::SetDefault { tag } => install::set_default(vm, &tag),
        Commands::Which => versions::which(vm, preferred),
        Commands::Cache { action } => match action {
            CacheAction::Clear => cache::clear(vm),
        },
    }
}
