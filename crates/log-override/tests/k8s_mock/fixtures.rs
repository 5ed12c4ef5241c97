use serde_json::{Value, json};

pub(crate) fn logging_override(resource_version: &str, levels: Value) -> Value {
    json!({
        "apiVersion": "logoverride.io/v1alpha1",
        "kind": "LoggingOverride",
        "metadata": {
            "name": "checkout-debug",
            "resourceVersion": resource_version,
            "uid": "2d0f6c1e-8e0b-4d1c-9a55-51a9a1c4f0e7"
        },
        "spec": {
            "deployment": "checkout",
            "namespace": "shop",
            "logLevels": levels
        }
    })
}

pub(crate) fn retargeted(mut logging_override: Value, deployment: &str) -> Value {
    logging_override["spec"]["deployment"] = Value::from(deployment);
    logging_override
}

pub(crate) fn expired() -> Value {
    json!({
        "type": "ERROR",
        "object": {
            "kind": "Status",
            "apiVersion": "v1",
            "metadata": {},
            "status": "Failure",
            "message": "too old resource version",
            "reason": "Expired",
            "code": 410
        }
    })
}

pub(crate) fn logging_overrides(resource_version: &str, items: Vec<Value>) -> Value {
    json!({
        "apiVersion": "logoverride.io/v1alpha1",
        "kind": "LoggingOverrideList",
        "metadata": {"resourceVersion": resource_version},
        "items": items
    })
}

pub(crate) fn not_found(name: &str) -> Value {
    json!({
        "kind": "Status",
        "apiVersion": "v1",
        "metadata": {},
        "status": "Failure",
        "message": format!("configmaps \"{name}\" not found"),
        "reason": "NotFound",
        "details": {"name": name, "kind": "configmaps"},
        "code": 404
    })
}
