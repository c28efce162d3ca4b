//! Glue for running cloud-weather-report acceptance tests.
//!
//! Two entry points share this library:
//!
//! - `build-cloud` prepares a disposable copy of a juju credentials home,
//!   bootstraps the requested environments, runs `cwr` inside the
//!   `seman/cwrbox` container and always tears the environments down again.
//! - `schedule-cwr-jobs` turns a directory of YAML test plans into one
//!   `cwr-test` Jenkins job per plan.

pub mod build_cloud;
pub mod container;
pub mod error;
pub mod fsutil;
pub mod jenkins;
pub mod juju;
pub mod logging;
pub mod plan;
pub mod process;
pub mod schedule;
pub mod workspace;

pub use error::{Error, Result};
