//! Durable relational persistence for videos, analysis jobs, risk items,
//! edit sessions, edit actions, and export jobs.

pub mod db;

pub use db::{DbHandle, JobStore};
