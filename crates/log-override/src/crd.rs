//! The `LoggingOverride` custom resource.
//!
//! A cluster-scoped object naming a Deployment and the log levels to force
//! on it, for example:
//!
//! ```yaml
//! apiVersion: logoverride.io/v1alpha1
//! kind: LoggingOverride
//! metadata:
//!   name: checkout-debug
//! spec:
//!   deployment: checkout
//!   namespace: shop
//!   logLevels:
//!     Default: Debug
//!     Microsoft.AspNetCore: Warning
//! ```

use std::collections::BTreeMap;

use kube::{CustomResource, CustomResourceExt};
use schemars::JsonSchema;
use serde::{Deserialize, Serialize};

/// Log levels an override can set, in their canonical spelling
pub const LOG_LEVELS: [&str; 7] = [
    "Trace",
    "Debug",
    "Information",
    "Warning",
    "Error",
    "Critical",
    "None",
];

#[derive(CustomResource, Clone, Debug, Deserialize, Serialize, JsonSchema, PartialEq)]
#[kube(
    group = "logoverride.io",
    version = "v1alpha1",
    kind = "LoggingOverride",
    shortname = "lo",
    printcolumn = r#"{"name":"Deployment","type":"string","jsonPath":".spec.deployment"}"#,
    printcolumn = r#"{"name":"Namespace","type":"string","jsonPath":".spec.namespace"}"#,
    printcolumn = r#"{"name":"Age","type":"date","jsonPath":".metadata.creationTimestamp"}"#
)]
#[serde(rename_all = "camelCase")]
pub struct LoggingOverrideSpec {
    /// Name of the target Deployment
    pub deployment: String,

    /// Namespace of the target Deployment
    pub namespace: String,

    /// Log category to level, e.g. `Default: Debug`
    #[serde(default)]
    pub log_levels: BTreeMap<String, String>,
}

/// Returns the canonical spelling of a log level, `None` when the level is
/// unknown. The comparison ignores ASCII case.
pub fn canonical_level(level: &str) -> Option<&'static str> {
    LOG_LEVELS
        .iter()
        .find(|known| known.eq_ignore_ascii_case(level))
        .copied()
}

/// The CustomResourceDefinition of `LoggingOverride`, as a YAML document
pub fn crd_manifest() -> Result<String, serde_yaml::Error> {
    serde_yaml::to_string(&LoggingOverride::crd())
}
