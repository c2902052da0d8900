//! Student attendance tracking against a course calendar, with a gate deciding when
//! a low-attendance warning may be sent.
//!
//! Snapshots flow through [`import::ImportBatchProcessor`], which validates each
//! row and hands it to [`reconcile::RecordReconciler`]. Eligibility is evaluated on
//! read from the stored percentage and medical flag.

pub mod attendance;
pub mod calendar;
pub mod config;
pub mod db;
pub mod error;
pub mod import;
pub mod models;
pub mod notify;
pub mod reconcile;
pub mod report;
pub mod service;
pub mod snapshot;
pub mod store;
