use anyhow::Result;
use chrono::{TimeZone, Utc};
use tvm::project::versions_match;
use tvm::version_manager::{VersionManager, VersionSource};

pub fn list_versions(vm: &VersionManager) -> Result<()> {
    let records = vm.get_versions_list()?;
    if records.is_empty() {
        println!("No published versions");
        return Ok(());
    }
    let default = vm.default_version()?;
    for r in records {
        let marker = if versions_match(&r.tag_name, vm.current_version()) {
            "*"
        } else {
            " "
        };
        let date = r
            .published_date
            .and_then(|ms| Utc.timestamp_millis_opt(ms).single())
            .map(|d| d.format("%Y-%m-%d").to_string())
            .unwrap_or_else(|| "-".to_string());
        let installed = if vm.executable_path(&r.tag_name).is_ok_and(|p| p.is_file()) {
            " (installed)"
        } else {
            ""
        };
        let is_default = if default.as_deref() == Some(r.tag_name.as_str()) {
            " (default)"
        } else {
            ""
        };
        println!("{marker} {:<16} {date}{installed}{is_default}", r.tag_name);
    }
    Ok(())
}

/// Reports the decision a run in this directory would make, without installing.
pub fn which(vm: &VersionManager, preferred: Option<&str>) -> Result<()> {
    let plan = vm.plan(preferred)?;
    println!("running {}", vm.current_version());
    match (&plan.required_version, plan.source) {
        (Some(tag), Some(source)) => println!("required {tag} ({})", source_label(source)),
        _ => println!("no required version"),
    }
    match plan.dispatch_target {
        Some(target) if plan.should_dispatch => {
            let state = if target.is_file() { "installed" } else { "not installed" };
            println!("dispatching to {} ({state})", target.display());
        }
        _ => println!("no dispatch"),
    }
    Ok(())
}

fn source_label(source: VersionSource) -> &'static str {
    match source {
        VersionSource::Preferred => "TVM_VERSION",
        VersionSource::Project => "project pin",
        VersionSource::Default => "default version",
    }
}
