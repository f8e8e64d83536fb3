//! Core data models for the recording archive.
//!
//! An [`entry::Entry`] is the only record persisted; the status enums in
//! [`status`] carry the transition rules every mutation goes through.

pub mod entry;
pub mod status;
