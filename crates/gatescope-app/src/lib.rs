//! Gatescope - proxy catalog and usage metrics runner.
//!
//! This crate wires the library crates together for the `gatescope` binary:
//!
//! - [`settings`] resolves every environment variable up front
//! - [`run`] builds the catalog and/or monthly metrics and persists them
//!
//! # Usage
//!
//! ```no_run
//! use gatescope_app::run::{execute, Job};
//! use gatescope_app::settings::Settings;
//!
//! let settings = Settings::from_env().unwrap();
//! let summary = execute(Job::Both, &settings).unwrap();
//! println!("{:?}", summary);
//! ```

pub mod run;
pub mod settings;
