use anyhow::{Context, Result};
use tvm::version_manager::VersionManager;

pub fn install_version(vm: &VersionManager, tag: &str) -> Result<()> {
    let exe = vm.executable_path(tag)?;
    if exe.is_file() {
        println!("{tag} already installed ({})", exe.display());
        return Ok(());
    }
    vm.ensure_version(tag)
        .with_context(|| format!("installing {tag}"))?;
    println!("Installed {tag} ({})", exe.display());
    Ok(())
}

pub fn use_latest(vm: &VersionManager) -> Result<()> {
    let tag = vm.use_latest().context("installing latest version")?;
    println!("Installed {tag} ({})", vm.executable_path(&tag)?.display());
    println!("Run 'tvm set-default {tag}' to use it outside pinned projects");
    Ok(())
}

pub fn set_default(vm: &VersionManager, tag: &str) -> Result<()> {
    vm.set_default_version(tag)
        .with_context(|| format!("setting default version {tag}"))?;
    println!("Default version set to {tag}");
    Ok(())
}
