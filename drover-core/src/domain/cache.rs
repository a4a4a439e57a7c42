//! Build cache configuration

use serde::{Deserialize, Serialize};

/// Storage medium backing a cluster's build cache
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum CacheMedium {
    Object,
    Nfs,
}

/// Where the cache is mounted inside the build container
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum CacheDirType {
    #[default]
    Workspace,
    UserDefined,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct ObjectProperties {
    #[serde(default)]
    pub id: String,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct NfsProperties {
    #[serde(default)]
    pub provision_type: String,
    #[serde(default)]
    pub storage_class: String,
    #[serde(default)]
    pub storage_size_in_gib: i64,
    #[serde(default)]
    pub pvc: String,
}

/// Cache medium configured on a cluster
///
/// A cluster without a medium has no cache at all.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct Cache {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub medium_type: Option<CacheMedium>,
    #[serde(default)]
    pub object_properties: ObjectProperties,
    #[serde(default)]
    pub nfs_properties: NfsProperties,
}

impl Cache {
    pub fn is_configured(&self) -> bool {
        self.medium_type.is_some()
    }

    pub fn is_nfs(&self) -> bool {
        self.medium_type == Some(CacheMedium::Nfs)
    }
}
