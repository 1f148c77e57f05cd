//! Incremental partitioned aggregation of stored log events
//!
//! A background job counts events per time partition for every configured
//! (parser, interval) permutation, merges the counts into a score-ordered
//! index and records a cursor so each run only reads new events.

pub mod aggregate;
pub mod cli;
pub mod config;
pub mod context;
pub mod cursor;
pub mod error;
pub mod event;
pub mod graph;
pub mod id;
pub mod index;
pub mod job;
pub mod keys;
pub mod parser;
pub mod partition;
pub mod scheduler;
pub mod sqlite_pragma;
