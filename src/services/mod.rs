//! Adapters to the outside world and the engine that drives them.

pub mod entry_store;
pub mod lifecycle;
pub mod mediainfo;
pub mod migration;
pub mod object_storage;
pub mod recording_source;
pub mod report;
pub mod verification;
