//! User-facing services shared across clients

mod entries;

pub use entries::EntryService;
