use clap::{Parser, Subcommand};

#[derive(Parser, Debug)]
#[command(
    version,
    name = "tvm",
    about = "Tool Version Manager: runs the tool version pinned by the current project",
    arg_required_else_help = true
)]
pub struct Cli {
    #[command(subcommand)]
    pub command: Commands,
}

#[derive(Subcommand, Debug)]
pub enum Commands {
    /// List published versions, newest first
    Versions,
    /// Download and install a version (no-op when already installed)
    Install {
        /// Release tag, e.g. 0.4.1
        #[arg(value_name = "TAG")]
        tag: String,
    },
    /// Install the most recently published version
    UseLatest,
    /// Use a published version outside pinned projects
    SetDefault {
        /// Release tag, e.g. 0.4.1
        #[arg(value_name = "TAG")]
        tag: String,
    },
    /// Show which version would run in the current directory
    Which,
    /// Manage the GitHub API response cache
    Cache {
        #[command(subcommand)]
        action: CacheAction,
    },
}

#[derive(Subcommand, Debug)]
pub enum CacheAction {
    /// Drop every cached API response
    Clear,
}
