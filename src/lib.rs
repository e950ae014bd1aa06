//! Offline-first persistence and sync layer.
//!
//! Business code reads and writes records through the [`offline`] manager,
//! which always answers from the local store and queues every mutation.
//! The [`sync`] engine drains that queue to a remote datastore and pulls
//! remote changes back; [`autosync`] decides when passes run.
//!
//! # Architecture
//!
//! - [`mapper`] - Identifiers and local ↔ remote schema mapping
//! - [`model`] - Data types (Record, SyncQueueItem, SyncStatus)
//! - [`storage`] - Local store (SQLite, in-memory fallback)
//! - [`offline`] - Offline CRUD facade
//! - [`sync`] - Push/pull engine, remote stores, conflict resolution
//! - [`autosync`] - Connectivity and background orchestration
//! - [`config`] - Configuration management
//! - [`cli`] - Command-line interface using clap
//! - [`error`] - Error types and handling

#![forbid(unsafe_code)]
#![warn(clippy::pedantic)]
#![allow(clippy::module_name_repetitions)]

pub mod autosync;
pub mod cli;
pub mod config;
pub mod error;
pub mod mapper;
pub mod model;
pub mod offline;
pub mod storage;
pub mod sync;

pub use error::{Error, Result};
