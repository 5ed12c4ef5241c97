use json_patch::{AddOperation, PatchOperation, jsonptr::PointerBuf};
use k8s_openapi::api::apps::v1::Deployment;
use serde_json::{Value, json};
use tracing::{debug, info};

use crate::errors::InjectionError;

pub const DEFAULT_ANNOTATION: &str = "logoverride.io/enabled";
pub const DEFAULT_VOLUME_NAME: &str = "log-override";
pub const DEFAULT_CONFIG_MAP_NAME: &str = "log-override";
pub const DEFAULT_MOUNT_PATH: &str = "/var/run/log-override";
pub const DEFAULT_FILE_NAME: &str = "config.json";

const VOLUMES_PATH: &str = "/spec/template/spec/volumes";

/// The well-known names used when injecting the override volume
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct InjectionSettings {
    /// Pod template annotation that opts a Deployment in
    pub annotation: String,
    pub volume_name: String,
    /// ConfigMap holding one `<deployment>.json` key per Deployment
    pub config_map_name: String,
    /// Directory where the volume is mounted inside of every container
    pub mount_path: String,
    /// Name of the file the Deployment key is projected to
    pub file_name: String,
}

impl Default for InjectionSettings {
    fn default() -> Self {
        InjectionSettings {
            annotation: DEFAULT_ANNOTATION.to_owned(),
            volume_name: DEFAULT_VOLUME_NAME.to_owned(),
            config_map_name: DEFAULT_CONFIG_MAP_NAME.to_owned(),
            mount_path: DEFAULT_MOUNT_PATH.to_owned(),
            file_name: DEFAULT_FILE_NAME.to_owned(),
        }
    }
}

/// Key of the ConfigMap entry holding the overrides of the given Deployment
pub fn config_map_key(deployment_name: &str) -> String {
    format!("{deployment_name}.json")
}

/// Returns true when the pod template carries the enabling annotation with a
/// value of `true`, compared ignoring ASCII case.
pub fn is_enabled(deployment: &Deployment, settings: &InjectionSettings) -> bool {
    deployment
        .spec
        .as_ref()
        .and_then(|spec| spec.template.metadata.as_ref())
        .and_then(|metadata| metadata.annotations.as_ref())
        .and_then(|annotations| annotations.get(&settings.annotation))
        .is_some_and(|value| value.eq_ignore_ascii_case("true"))
}

/// Compute the JSON patch operations required to mount the override
/// ConfigMap into every container of the Deployment.
///
/// The returned operations are ordered: whenever a list does not exist yet,
/// the operation creating it comes before the one appending to it.
/// Running this against a Deployment that has already been patched returns
/// an empty list.
pub fn build_patches(
    deployment: &Deployment,
    settings: &InjectionSettings,
) -> Result<Vec<PatchOperation>, InjectionError> {
    let enabled = is_enabled(deployment, settings);
    debug!(
        deployment = deployment.metadata.name.as_deref().unwrap_or_default(),
        namespace = deployment.metadata.namespace.as_deref().unwrap_or("default"),
        annotation = settings.annotation.as_str(),
        enabled,
        "inspected pod template annotations"
    );
    if !enabled {
        return Ok(Vec::new());
    }

    let name = deployment
        .metadata
        .name
        .as_deref()
        .filter(|name| !name.is_empty())
        .ok_or(InjectionError::MissingDeploymentName)?;
    let pod_spec = deployment
        .spec
        .as_ref()
        .and_then(|spec| spec.template.spec.as_ref())
        .ok_or_else(|| InjectionError::MissingPodSpec(name.to_owned()))?;

    let mut patches = Vec::new();

    let volumes = pod_spec.volumes.as_deref().unwrap_or_default();
    if volumes
        .iter()
        .any(|volume| volume.name == settings.volume_name)
    {
        debug!(
            deployment = name,
            volume = settings.volume_name.as_str(),
            "volume already present"
        );
    } else {
        info!(
            deployment = name,
            volume = settings.volume_name.as_str(),
            "adding volume"
        );
        if volumes.is_empty() {
            patches.push(add(VOLUMES_PATH, json!([]))?);
        }
        patches.push(add(&format!("{VOLUMES_PATH}/-"), volume(name, settings))?);
    }

    for (container_index, container) in pod_spec.containers.iter().enumerate() {
        let mounts = container.volume_mounts.as_deref().unwrap_or_default();
        if mounts.iter().any(|mount| mount.name == settings.volume_name) {
            debug!(
                deployment = name,
                container = container.name.as_str(),
                "volume mount already present"
            );
            continue;
        }

        info!(
            deployment = name,
            container = container.name.as_str(),
            volume = settings.volume_name.as_str(),
            "adding volume mount"
        );
        let mounts_path = format!("/spec/template/spec/containers/{container_index}/volumeMounts");
        if mounts.is_empty() {
            patches.push(add(&mounts_path, json!([]))?);
        }
        patches.push(add(&format!("{mounts_path}/-"), volume_mount(settings))?);
    }

    Ok(patches)
}

fn volume(deployment_name: &str, settings: &InjectionSettings) -> Value {
    json!({
        "name": settings.volume_name,
        "configMap": {
            "name": settings.config_map_name,
            "optional": true,
            "items": [
                {
                    "key": config_map_key(deployment_name),
                    "path": settings.file_name,
                }
            ]
        }
    })
}

fn volume_mount(settings: &InjectionSettings) -> Value {
    json!({
        "name": settings.volume_name,
        "mountPath": settings.mount_path,
        "readOnly": true,
    })
}

fn add(path: &str, value: Value) -> Result<PatchOperation, InjectionError> {
    let path =
        PointerBuf::parse(path).map_err(|_| InjectionError::InvalidPointer(path.to_owned()))?;
    Ok(PatchOperation::Add(AddOperation { path, value }))
}
