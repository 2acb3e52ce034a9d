pub mod config;
pub mod core;
pub mod error;
pub mod logging;
pub mod storage;

pub use config::{AppConfig, Cli, Filters, ListFormat};
pub use crate::core::{SyncEngine, SyncReport, WalkOptions, Walker};
pub use error::{Result, SyncError};
pub use storage::{create_backend, Backend, FileInfo, FolderInfo, Listing};
