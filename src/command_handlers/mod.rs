pub mod cache;
pub mod dispatch;
pub mod install;
pub mod versions;
