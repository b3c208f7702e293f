//! Deployment status lookup with fallback

use std::sync::Arc;

use tracing::{debug, warn};

use crate::models::DeployStatus;
use crate::platform::DeployStatusSource;

/// Resolves the status of a deployment without ever failing.
///
/// The structured lookup is tried first. When it errors, the record-based
/// lookup is tried. When that also errors or finds nothing, an `Unknown`
/// status carrying the first error is returned.
#[derive(Clone)]
pub struct StatusResolver {
    source: Arc<dyn DeployStatusSource>,
}

impl StatusResolver {
    /// Create a resolver over a status source
    pub fn new(source: Arc<dyn DeployStatusSource>) -> Self {
        Self { source }
    }

    /// Current status of deployment `id`
    pub async fn resolve(&self, id: &str) -> DeployStatus {
        let primary_err = match self.source.check_deploy_status(id).await {
            Ok(mut status) => {
                if status.id.is_empty() {
                    status.id = id.to_string();
                }
                return status;
            }
            Err(e) => e,
        };
        debug!(deploy_id = id, error = %primary_err, "Deploy status lookup failed, trying record query");

        match self.source.query_deploy_request(id).await {
            Ok(Some(record)) => record.into_status(id),
            Ok(None) => {
                warn!(deploy_id = id, "No deploy request record found");
                DeployStatus::unknown(id, primary_err.to_string())
            }
            Err(e) => {
                warn!(deploy_id = id, error = %e, "Deploy request query failed");
                DeployStatus::unknown(id, primary_err.to_string())
            }
        }
    }
}

impl std::fmt::Debug for StatusResolver {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("StatusResolver").finish_non_exhaustive()
    }
}
