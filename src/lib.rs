//! Keep a fleet of GPU hosts busy: poll their GPUs, decide which hosts sit
//! idle, and start or stop a guard workload on them.

pub mod app;
pub mod config;
pub mod error;
pub mod fleet;
pub mod guard;
pub mod history;
pub mod logging;
pub mod models;
pub mod node;
pub mod nvidia;
pub mod runner;
pub mod theme;
pub mod ui;
