//! Gauntlet - profile-driven web vulnerability scanner
//!
//! Takes captured requests, discovers their injectable locations, replays
//! them with payloads from attack profiles and greps the responses (and
//! out-of-band interactions) for evidence of vulnerabilities. Scans are
//! resumable: progress is checkpointed per template.

pub mod config;
pub mod context;
pub mod entrypoint;
pub mod error;
pub mod http;
pub mod matcher;
pub mod models;
pub mod modifier;
pub mod oob;
pub mod profile;
pub mod scan;
