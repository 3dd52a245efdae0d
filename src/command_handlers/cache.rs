use anyhow::{Context, Result};
use tvm::version_manager::VersionManager;

pub fn clear(vm: &VersionManager) -> Result<()> {
    let removed = vm.releases().clear_cache().context("clearing cache")?;
    println!("Cache cleared ({removed} entries)");
    Ok(())
}
