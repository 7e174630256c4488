// Per-location resource collections and mutations.
//
// Collections are plain reads; callers cache them. Mutations return only
// an acknowledgement: the caller must invalidate its cached view of the
// affected resource before the next read.

use crate::client::ApiClient;
use crate::error::Error;
use crate::models::{
    ArmMode, ArmRequest, Collection, DeviceCommandRequest, DeviceEntry, Single, SpaceEntry,
    ZoneEntry,
};

impl ApiClient {
    // ── Collections ──────────────────────────────────────────────────

    pub async fn list_zones(&self, location_id: &str) -> Result<Vec<ZoneEntry>, Error> {
        let url = self.location_endpoint(location_id, &["zones"])?;
        let zones: Collection<ZoneEntry> = self.get_json(url).await?;
        Ok(zones.into_vec())
    }

    pub async fn list_devices(&self, location_id: &str) -> Result<Vec<DeviceEntry>, Error> {
        let url = self.location_endpoint(location_id, &["devices"])?;
        let devices: Collection<DeviceEntry> = self.get_json(url).await?;
        Ok(devices.into_vec())
    }

    pub async fn list_spaces(&self, location_id: &str) -> Result<Vec<SpaceEntry>, Error> {
        let url = self.location_endpoint(location_id, &["spaces"])?;
        let spaces: Collection<SpaceEntry> = self.get_json(url).await?;
        Ok(spaces.into_vec())
    }

    pub async fn get_zone(&self, location_id: &str, zone_id: &str) -> Result<ZoneEntry, Error> {
        let url = self.location_endpoint(location_id, &["zones", zone_id])?;
        let zone: Single<ZoneEntry> = self.get_json(url).await?;
        Ok(zone.into_inner())
    }

    // ── Mutations ────────────────────────────────────────────────────

    pub async fn arm_zone(
        &self,
        location_id: &str,
        zone_id: &str,
        mode: ArmMode,
    ) -> Result<(), Error> {
        let url = self.location_endpoint(location_id, &["zones", zone_id, "arm"])?;
        self.post_ack(url, &ArmRequest { mode }).await
    }

    pub async fn disarm_zone(&self, location_id: &str, zone_id: &str) -> Result<(), Error> {
        let url = self.location_endpoint(location_id, &["zones", zone_id, "disarm"])?;
        self.post_ack(url, &serde_json::json!({})).await
    }

    pub async fn send_device_command(
        &self,
        location_id: &str,
        device_id: &str,
        command: &str,
    ) -> Result<(), Error> {
        let url = self.location_endpoint(location_id, &["devices", device_id, "commands"])?;
        self.post_ack(url, &DeviceCommandRequest { command }).await
    }
}
