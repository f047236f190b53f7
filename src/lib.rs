//! `mboxfilter` — filter, sort and deduplicate mails from MBOX files.
//!
//! This crate provides the core library for streaming messages out of
//! MBOX containers, admitting them through header filter criteria,
//! fanning accepted messages out to per-key result mailboxes, exporting
//! or stripping attachments, and recording each message once in a
//! deduplicating index.

pub mod config;
pub mod engine;
pub mod error;
pub mod export;
pub mod filter;
pub mod index;
pub mod model;
pub mod parser;
pub mod sink;
