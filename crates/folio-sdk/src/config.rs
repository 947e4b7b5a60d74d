use std::path::Path;

use serde::{Deserialize, Serialize};

use folio_access::AccessConfig;
use folio_events::NotifierConfig;
use folio_record::RecordConfig;
use folio_schema::ConverterConfig;

use crate::error::{SdkError, SdkResult};

/// Settings for every service a [`Collection`](crate::Collection) wires.
/// Missing sections take their defaults.
#[derive(Clone, Debug, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct CollectionConfig {
    pub converter: ConverterConfig,
    pub access: AccessConfig,
    pub notifier: NotifierConfig,
    pub record: RecordConfig,
}

impl CollectionConfig {
    pub fn from_toml_str(text: &str) -> SdkResult<Self> {
        toml::from_str(text).map_err(|e| SdkError::Config(e.to_string()))
    }

    pub fn load(path: &Path) -> SdkResult<Self> {
        let text = std::fs::read_to_string(path)?;
        Self::from_toml_str(&text)
    }

    pub fn to_toml_string(&self) -> SdkResult<String> {
        toml::to_string(self).map_err(|e| SdkError::Config(e.to_string()))
    }
}
