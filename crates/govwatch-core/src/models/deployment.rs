//! Deployment status models

use serde::{Deserialize, Serialize};

/// State reported when no status source could answer
pub const UNKNOWN_STATE: &str = "Unknown";

/// State reported by a failed deployment
pub const FAILED_STATE: &str = "Failed";

/// Progress of a metadata deployment
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct DeployStatus {
    /// Deployment identifier
    pub id: String,
    /// Whether the deployment finished (successfully or not)
    pub done: bool,
    /// Whether the deployment succeeded
    pub success: bool,
    /// Platform state (`Queued`, `InProgress`, `Succeeded`, `Failed`, ...)
    pub state: String,
    /// Components deployed so far
    pub number_components_deployed: u32,
    /// Components in the deployment
    pub number_components_total: u32,
    /// Tests run so far
    pub number_tests_completed: u32,
    /// Tests to run
    pub number_tests_total: u32,
    /// Error reported by the platform or by the status lookup itself
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error_message: Option<String>,
}

impl DeployStatus {
    /// Minimal status returned when every lookup failed
    pub fn unknown(id: impl Into<String>, error: impl Into<String>) -> Self {
        Self {
            id: id.into(),
            done: false,
            success: false,
            state: UNKNOWN_STATE.to_string(),
            error_message: Some(error.into()),
            ..Self::default()
        }
    }

    /// Whether polling should stop on this status
    pub fn is_terminal(&self) -> bool {
        self.done || self.state == FAILED_STATE
    }
}

/// A `DeployRequest` row from the record-based fallback lookup
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "PascalCase")]
pub struct DeployRequestRecord {
    /// Record id
    pub id: String,
    /// Raw status text
    pub status: String,
    /// Failure text, if any
    #[serde(default)]
    pub error_message: Option<String>,
}

impl DeployRequestRecord {
    /// Convert the record into a status
    pub fn into_status(self, id: &str) -> DeployStatus {
        let done = self.status == "Completed" || self.status == FAILED_STATE;
        DeployStatus {
            id: id.to_string(),
            done,
            success: self.status == "Completed",
            state: self.status,
            error_message: self.error_message,
            ..DeployStatus::default()
        }
    }
}
