//! Tool version manager: keeps several released versions of a CLI side by
//! side and re-executes the one a project pins.

pub mod config;
pub mod document;
pub mod download;
pub mod engine;
pub mod error;
pub mod github;
pub mod ids;
pub mod platform;
pub mod project;
pub mod session;
pub mod store;
pub mod version_manager;

pub use error::{Error, Result};
