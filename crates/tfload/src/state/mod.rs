//! normalized state model
//!
//! The model follows the legacy (`version` <= 3) state layout:
//!
//! ```json
//! {
//!   "version": 3,
//!   "modules": [
//!     {
//!       "path": ["root"],
//!       "resources": {
//!         "aws_db_parameter_group.production": {
//!           "type": "aws_db_parameter_group",
//!           "depends_on": [],
//!           "primary": {
//!             "id": "production",
//!             "attributes": { "parameter.#": "0", "tags.%": "0" }
//!           }
//!         }
//!       }
//!     }
//!   ]
//! }
//! ```
//!
//! Attributes are flattened strings. `#` (list length) and `%` (map length) markers are kept verbatim.
//! `version` 4 documents are converted into this layout when parsed.
mod backend;
mod v4;

use crate::config::LoaderConfig;
use indexmap::IndexMap;
use serde::{Deserialize, Serialize};
use std::path::PathBuf;

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct StateModel {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub version: Option<u64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub terraform_version: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub serial: Option<u64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub lineage: Option<String>,
    #[serde(default)]
    pub modules: Vec<ModuleState>,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct ModuleState {
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub path: Vec<String>,
    #[serde(default, skip_serializing_if = "IndexMap::is_empty")]
    pub outputs: IndexMap<String, serde_json::Value>,
    /// keyed by address (`type.name`)
    #[serde(default)]
    pub resources: IndexMap<String, Resource>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Resource {
    #[serde(rename = "type")]
    pub kind: String,
    #[serde(rename = "depends_on", default)]
    pub dependencies: Vec<String>,
    /// `None` for resources without a live instance
    #[serde(default)]
    pub primary: Option<Instance>,
    #[serde(default, skip_serializing_if = "String::is_empty")]
    pub provider: String,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Instance {
    pub id: String,
    #[serde(default)]
    pub attributes: IndexMap<String, String>,
    #[serde(default, skip_serializing_if = "std::ops::Not::not")]
    pub tainted: bool,
}

impl StateModel {
    /// Parses a serialized state document
    ///
    /// `origin` names where the payload came from and is only used in errors.
    pub fn parse(payload: &str, origin: &str) -> Result<Self, StateError> {
        #[derive(Deserialize)]
        struct Header {
            #[serde(default)]
            version: Option<u64>,
        }

        let parse_error = |source| StateError::Parse {
            origin: origin.to_string(),
            source,
        };

        let header: Header = serde_json::from_str(payload).map_err(parse_error)?;
        match header.version {
            Some(4) => {
                let state: v4::StateV4 = serde_json::from_str(payload).map_err(parse_error)?;
                Ok(state.normalize())
            }
            Some(version) if version > 4 => Err(StateError::UnsupportedVersion {
                origin: origin.to_string(),
                version,
            }),
            _ => serde_json::from_str(payload).map_err(parse_error),
        }
    }

    pub fn is_empty(&self) -> bool {
        self.modules.is_empty()
    }

    /// Looks up a resource by address across all modules
    pub fn resource(&self, address: &str) -> Option<&Resource> {
        self.modules
            .iter()
            .find_map(|module| module.resources.get(address))
    }
}

#[derive(thiserror::Error, Debug)]
pub enum StateError {
    #[error("Unable to parse state from {origin}")]
    Parse {
        origin: String,
        #[source]
        source: serde_json::Error,
    },
    #[error("Unsupported state version {version} in {origin}")]
    UnsupportedVersion { origin: String, version: u64 },
    #[error("Unsupported state backend \"{0}\"")]
    UnsupportedBackend(String),
    #[error("Invalid \"{kind}\" backend configuration: {reason}")]
    InvalidBackend { kind: String, reason: String },
    #[error("Unable to retrieve remote state from {address}")]
    Backend {
        address: String,
        #[source]
        source: reqwest::Error,
    },
    #[error("Unable to read state file {}", path.display())]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },
}

/// Finds, retrieves and parses the state for `config.working_dir`
///
/// No state at all is not an error and yields an empty model.
pub(crate) async fn load(config: &LoaderConfig) -> Result<StateModel, StateError> {
    let Some(payload) = backend::retrieve(config).await? else {
        tracing::info!(directory=%config.working_dir.display(), "no state found");
        return Ok(StateModel::default());
    };

    tracing::info!(origin=%payload.origin, "loading state");
    StateModel::parse(&payload.contents, &payload.origin)
}
