// Tagfilter library exports

pub mod cli;
pub mod config;
pub mod file_manager;

pub use cli::{filter_document, Args, FilteredDocument};
pub use config::Config;
pub use file_manager::FileManager;
