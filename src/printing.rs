//! Print dispatch and device management.
//!
//! Print agents are external: they heartbeat into the device registry and
//! consume the print queue. From here a job is fire-and-forget. Success
//! means the queue acknowledged the write, not that anything was printed.

use chrono::{DateTime, Utc};
use tracing::info;

use cloudvault_core::liveness::LivenessPolicy;
use cloudvault_core::models::{Device, PrintJob, PrintStatus};
use cloudvault_core::store::{DeviceRegistry, PrintQueue};

use crate::errors::VaultError;

/// Registered devices with derived status, online devices first.
pub async fn online_devices(
    registry: &dyn DeviceRegistry,
    policy: &LivenessPolicy,
    now: DateTime<Utc>,
) -> anyhow::Result<Vec<Device>> {
    let records = registry.list().await?;
    Ok(policy.evaluate(records, now))
}

/// The devices a print job may be sent to.
pub struct PrintTargets {
    devices: Vec<Device>,
}

impl PrintTargets {
    pub fn new(devices: Vec<Device>) -> Self {
        Self { devices }
    }

    pub fn devices(&self) -> &[Device] {
        &self.devices
    }

    /// Only an online device and one of its own printers can be selected.
    pub fn select<'a>(&'a self, device_id: &str, printer: &str) -> Result<&'a Device, VaultError> {
        let device = self
            .devices
            .iter()
            .find(|d| d.id == device_id)
            .ok_or_else(|| VaultError::not_found("device", device_id))?;

        if !device.is_online() {
            return Err(VaultError::DeviceOffline(device_id.to_string()));
        }
        if !device.printers.iter().any(|p| p == printer) {
            return Err(VaultError::UnknownPrinter {
                device_id: device_id.to_string(),
                printer: printer.to_string(),
            });
        }
        Ok(device)
    }
}

/// Write exactly one pending job. Returns the queue's job id.
pub async fn send_print_job(
    queue: &dyn PrintQueue,
    file_url: &str,
    device_id: &str,
    printer: &str,
) -> Result<String, VaultError> {
    if file_url.trim().is_empty() {
        return Err(VaultError::InvalidInput("file URL must not be empty".to_string()));
    }

    let job = PrintJob {
        target_device_id: device_id.to_string(),
        target_printer_name: printer.to_string(),
        file_url: file_url.to_string(),
        status: PrintStatus::Pending,
        created_at: Utc::now(),
    };

    let job_id = queue
        .enqueue(&job)
        .await
        .map_err(|e| VaultError::Print(format!("{:#}", e)))?;
    info!(job_id = %job_id, device_id, printer, "print job queued");
    Ok(job_id)
}

/// Remove a device from the registry. Queued jobs for it are left alone.
pub async fn delete_device(registry: &dyn DeviceRegistry, device_id: &str) -> anyhow::Result<()> {
    registry.remove(device_id).await?;
    info!(device_id, "device removed");
    Ok(())
}
