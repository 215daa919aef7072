//! Management labels, the only state sandboxer persists
//!
//! Everything the tool knows about a sandbox after creation is read back from
//! these labels; there is no local database.

use crate::error::{Result, SandboxError};
use sandboxer_net::{NetworkMode, NetworkPolicy};
use std::collections::BTreeMap;
use std::path::PathBuf;

pub const MANAGED: &str = "com.sandboxer.managed";
pub const MOUNTED_PATH: &str = "com.sandboxer.mounted-path";
pub const NETWORK_MODE: &str = "com.sandboxer.network-mode";
pub const IMAGE: &str = "com.sandboxer.image";
pub const VERSION: &str = "com.sandboxer.version";
pub const POLICY: &str = "com.sandboxer.policy";

/// Label filter selecting containers created by this tool
pub fn managed_filter() -> String {
    format!("label={}=true", MANAGED)
}

/// Whether a raw label set marks a container as ours
pub fn is_managed(labels: &BTreeMap<String, String>) -> bool {
    labels.get(MANAGED).map(String::as_str) == Some("true")
}

#[derive(Debug, Clone, PartialEq)]
pub struct ManagementLabels {
    pub mounted_path: PathBuf,
    pub network_mode: NetworkMode,
    pub image: String,
    pub version: String,
    /// Frozen policy for restricted modes, absent for `open`
    pub policy: Option<NetworkPolicy>,
}

impl ManagementLabels {
    pub fn new(
        mounted_path: PathBuf,
        network_mode: NetworkMode,
        image: impl Into<String>,
        policy: Option<NetworkPolicy>,
    ) -> Self {
        Self {
            mounted_path,
            network_mode,
            image: image.into(),
            version: env!("CARGO_PKG_VERSION").to_string(),
            policy,
        }
    }

    /// Encode as runtime labels
    pub fn to_map(&self) -> Result<BTreeMap<String, String>> {
        let mut labels = BTreeMap::new();
        labels.insert(MANAGED.to_string(), "true".to_string());
        labels.insert(
            MOUNTED_PATH.to_string(),
            self.mounted_path.to_string_lossy().into_owned(),
        );
        labels.insert(NETWORK_MODE.to_string(), self.network_mode.to_string());
        labels.insert(IMAGE.to_string(), self.image.clone());
        labels.insert(VERSION.to_string(), self.version.clone());
        if let Some(policy) = &self.policy {
            let encoded = serde_json::to_string(policy).map_err(|e| SandboxError::InvalidLabels {
                name: self.mounted_path.display().to_string(),
                reason: format!("cannot encode policy: {}", e),
            })?;
            labels.insert(POLICY.to_string(), encoded);
        }
        Ok(labels)
    }

    /// Decode the labels of container `name`
    ///
    /// Fails with `InvalidLabels` when the management marker is present but
    /// the rest of the set is missing or malformed.
    pub fn from_map(name: &str, labels: &BTreeMap<String, String>) -> Result<Self> {
        let invalid = |reason: String| SandboxError::InvalidLabels {
            name: name.to_string(),
            reason,
        };
        let required = |key: &str| {
            labels
                .get(key)
                .cloned()
                .ok_or_else(|| invalid(format!("missing label {}", key)))
        };

        if !is_managed(labels) {
            return Err(invalid(format!("{} is not set", MANAGED)));
        }

        let network_mode: NetworkMode = required(NETWORK_MODE)?
            .parse()
            .map_err(|e| invalid(format!("{}", e)))?;

        let policy = match labels.get(POLICY) {
            Some(raw) => Some(
                serde_json::from_str::<NetworkPolicy>(raw)
                    .map_err(|e| invalid(format!("unreadable policy: {}", e)))?,
            ),
            None => None,
        };

        if network_mode != NetworkMode::Open && policy.is_none() {
            return Err(invalid(format!(
                "network mode {} has no recorded policy",
                network_mode
            )));
        }

        Ok(Self {
            mounted_path: PathBuf::from(required(MOUNTED_PATH)?),
            network_mode,
            image: required(IMAGE)?,
            // Older sandboxes may predate the version label
            version: labels.get(VERSION).cloned().unwrap_or_default(),
            policy,
        })
    }
}
