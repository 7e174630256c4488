// Capture-service control endpoint.
//
// The platform runs a background capture process per organization and
// location, independent of any client's lifetime. These calls only
// query and toggle it; retry policy lives in vigil-core.

use tracing::debug;

use crate::client::ApiClient;
use crate::error::Error;
use crate::models::{ControlAction, ControlRequest, ControlResponse, ServiceStatusEntry, StatusEnvelope};

const CONTROL_PATH: &str = "capture-service";

impl ApiClient {
    /// Current status of the capture process.
    pub async fn service_status(&self) -> Result<ServiceStatusEntry, Error> {
        let url = self.endpoint(&[CONTROL_PATH])?;
        let envelope: StatusEnvelope = self.get_json(url).await?;
        Ok(envelope.status)
    }

    /// Ask the platform to start the capture process for `location_id`.
    pub async fn start_service(&self, location_id: &str) -> Result<ControlResponse, Error> {
        self.control(ControlAction::Start, location_id).await
    }

    /// Ask the platform to stop the capture process for `location_id`.
    pub async fn stop_service(&self, location_id: &str) -> Result<ControlResponse, Error> {
        self.control(ControlAction::Stop, location_id).await
    }

    async fn control(
        &self,
        action: ControlAction,
        location_id: &str,
    ) -> Result<ControlResponse, Error> {
        let url = self.endpoint(&[CONTROL_PATH])?;
        let body = ControlRequest {
            action,
            organization_id: self.organization_id(),
            location_id,
        };
        let resp: ControlResponse = self.post_json(url, &body).await?;
        debug!(?action, success = resp.success, "control response");

        if resp.success {
            Ok(resp)
        } else {
            Err(Error::Rejected {
                message: resp
                    .error
                    .or(resp.message)
                    .unwrap_or_else(|| format!("{action:?} not accepted")),
            })
        }
    }
}
