//! # auto-assign
//!
//! Automatic task assignment for a work marketplace.
//!
//! Workers apply to open tasks during a timed application window. When the
//! window closes, a periodic sweep scores the applicants on skill overlap,
//! rating, and how early they applied, hands the task to the best one, and
//! notifies everyone involved. Windows with no applicants are extended a
//! bounded number of times before auto-assignment is abandoned.
//!
//! State lives behind [`store::AssignmentStore`]: in memory for tests and
//! embedding, or in Postgres via [`db::Db`].

pub mod clock;
pub mod config;
pub mod db;
pub mod engine;
pub mod error;
pub mod model;
pub mod notify;
pub mod scoring;
pub mod store;
pub mod telemetry;
