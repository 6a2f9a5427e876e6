// ── File-backed device directory ──
//
// Host records are maintained by whatever tracks DHCP leases and
// monitoring state on the gateway; we only read them. The file is
// re-read on every fetch so reconciliation sees drift immediately.

use std::path::PathBuf;

use async_trait::async_trait;

use super::DeviceDirectory;
use crate::error::CoreError;
use crate::model::{DeviceRecord, MacAddress};

/// [`DeviceDirectory`] reading a JSON array of host records.
///
/// ```json
/// [{ "mac": "aa:bb:cc:dd:ee:ff", "ip": "192.168.218.20", "monitored": true }]
/// ```
#[derive(Debug, Clone)]
pub struct HostFileDirectory {
    path: PathBuf,
}

impl HostFileDirectory {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self { path: path.into() }
    }

    async fn load(&self) -> Result<Vec<DeviceRecord>, CoreError> {
        let raw = tokio::fs::read_to_string(&self.path)
            .await
            .map_err(|e| CoreError::Directory {
                message: format!("cannot read {}: {e}", self.path.display()),
            })?;
        serde_json::from_str(&raw).map_err(|e| CoreError::Directory {
            message: format!("invalid host file {}: {e}", self.path.display()),
        })
    }
}

#[async_trait]
impl DeviceDirectory for HostFileDirectory {
    async fn fetch(&self, mac: &MacAddress) -> Result<DeviceRecord, CoreError> {
        self.load()
            .await?
            .into_iter()
            .find(|record| record.mac == *mac)
            .ok_or_else(|| CoreError::DeviceNotFound {
                mac: mac.to_string(),
            })
    }
}
