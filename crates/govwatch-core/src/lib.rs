//! # govwatch
//!
//! Governor limit monitoring for Salesforce-style orgs.
//!
//! govwatch samples the org's limits API, classifies every limit against
//! warning and critical thresholds, and alerts through console, email, Slack
//! and generic webhooks. It can also wrap a deployment command and report how
//! the limits move while the deployment runs.
//!
//! ## Architecture
//!
//! - **Monitor**: classification, baselines, deltas and the interval poller
//! - **Deployment**: runs or attaches to a deployment and correlates it with limit usage
//! - **Alerting**: concurrent multi-channel delivery with per-channel cooldown
//! - **Platform**: the REST client and process launcher the engine is handed
//!
//! ## Quick Start
//!
//! ```bash
//! # One-off check
//! govwatch status
//!
//! # Check every minute and alert
//! govwatch monitor --interval 1m
//!
//! # Deploy and watch the limits move
//! govwatch deploy -- sf project deploy start --source-dir force-app
//! ```

#![warn(missing_docs)]
#![warn(clippy::all)]
#![warn(clippy::pedantic)]
#![allow(clippy::module_name_repetitions)]
#![allow(clippy::missing_errors_doc)]
#![allow(clippy::missing_panics_doc)]

pub mod alerting;
pub mod config;
pub mod deployment;
pub mod error;
pub mod models;
pub mod monitor;
pub mod platform;

pub use config::Config;
pub use error::{Error, Result};

/// Re-exports for convenience
pub mod prelude {
    pub use crate::alerting::{AlertDispatcher, Notifier};
    pub use crate::config::Config;
    pub use crate::deployment::{DeploymentCorrelator, DeploymentEvent};
    pub use crate::error::{Error, Result};
    pub use crate::models::*;
    pub use crate::monitor::{LimitsMonitor, MonitorEvent};
    pub use crate::platform::{
        DeployStatusSource, LimitSource, ProcessLauncher, RestClient, SpawnSpec,
        TokioProcessLauncher,
    };
}
