//! histmine - incremental version-control history mining
//!
//! Mines commits into an append-only CSV log of file change events and
//! keeps track of which days the log covers, so repeated grabs only fetch
//! what is missing.
//!
//! - [`date_range`]: closed ranges of UTC days and gap arithmetic
//! - [`storage`]: the event log ([`storage::EventStorage`])
//! - [`vcs`]: commit mining over git roots ([`vcs::VcsAccess`])
//! - [`grabber`]: the grab orchestrator ([`grabber::HistoryGrabber`])
//! - [`config`]: per-repository settings

pub mod config;
pub mod date_range;
pub mod grabber;
pub mod models;
pub mod storage;
pub mod vcs;
