//! Database layer for notesync

mod connection;
mod migrations;
mod repository;
mod settings_repository;

pub use connection::Database;
pub use repository::{EntryFilter, LibSqlStore, LocalStore};
pub use settings_repository::SettingsRepository;
