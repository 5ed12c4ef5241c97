pub(crate) mod fixtures;

use std::sync::{Arc, Mutex};

use http::{Method, Request, Response};
use http_body_util::BodyExt;
use kube::client::Body;
use serde::Serialize;
use serde_json::Value;
use tower_test::mock::{Handle, SendResponse};

const LOGGING_OVERRIDES_PATH: &str = "/apis/logoverride.io/v1alpha1/loggingoverrides";
const CONFIG_MAPS_PATH: &str = "/api/v1/namespaces/shop/configmaps";
const CONFIG_MAP_PATH: &str = "/api/v1/namespaces/shop/configmaps/log-override";

/// Serves a cluster without the ConfigMap yet. The n-th list returns
/// `lists[n]`, or the last entry once they are exhausted. The n-th watch
/// delivers `watches[n]` and is then closed by the server, later watches
/// stay open without events.
/// Returns the ConfigMap as written by the operator.
pub(crate) fn operator_scenario(
    handle: Handle<Request<Body>, Response<Body>>,
    lists: Vec<Vec<Value>>,
    watches: Vec<Vec<Value>>,
) -> Arc<Mutex<Option<Value>>> {
    let config_map: Arc<Mutex<Option<Value>>> = Arc::new(Mutex::new(None));
    let stored = config_map.clone();

    tokio::spawn(async move {
        let mut handle = handle;
        let mut listed = 0;
        let mut watched = 0;
        let mut open_watches = Vec::new();

        while let Some((request, send)) = handle.next_request().await {
            let is_watch = request
                .uri()
                .query()
                .is_some_and(|query| query.contains("watch=true"));

            match (request.method(), request.uri().path()) {
                (&Method::GET, LOGGING_OVERRIDES_PATH) if is_watch => {
                    let Some(events) = watches.get(watched) else {
                        open_watches.push(send);
                        continue;
                    };
                    watched += 1;
                    let mut body = Vec::new();
                    for event in events {
                        body.extend(serde_json::to_vec(event).unwrap());
                        body.push(b'\n');
                    }
                    send_bytes(send, 200, body);
                }
                (&Method::GET, LOGGING_OVERRIDES_PATH) => {
                    let items = lists
                        .get(listed)
                        .or(lists.last())
                        .cloned()
                        .unwrap_or_default();
                    listed += 1;
                    let version = (listed * 10).to_string();
                    send_response(send, 200, fixtures::logging_overrides(&version, items));
                }
                (&Method::GET, CONFIG_MAP_PATH) => {
                    let current = stored.lock().unwrap().clone();
                    match current {
                        Some(config_map) => send_response(send, 200, config_map),
                        None => send_response(send, 404, fixtures::not_found("log-override")),
                    }
                }
                (&Method::POST, CONFIG_MAPS_PATH) => {
                    let created = body_json(request).await;
                    *stored.lock().unwrap() = Some(created.clone());
                    send_response(send, 201, created);
                }
                (&Method::PATCH, CONFIG_MAP_PATH) => {
                    let patch = body_json(request).await;
                    let mut guard = stored.lock().unwrap();
                    let config_map = guard.as_mut().expect("patching a missing ConfigMap");
                    merge(config_map, &patch);
                    let patched = config_map.clone();
                    drop(guard);
                    send_response(send, 200, patched);
                }
                _ => {
                    panic!("unexpected request: {:?}", request);
                }
            }
        }
    });

    config_map
}

/// JSON merge patch (RFC 7386)
fn merge(target: &mut Value, patch: &Value) {
    let Value::Object(patch) = patch else {
        *target = patch.clone();
        return;
    };
    if !target.is_object() {
        *target = Value::Object(Default::default());
    }
    if let Value::Object(target) = target {
        for (key, value) in patch {
            if value.is_null() {
                target.remove(key);
            } else {
                merge(target.entry(key.clone()).or_insert(Value::Null), value);
            }
        }
    }
}

async fn body_json(request: Request<Body>) -> Value {
    let bytes = request.into_body().collect().await.unwrap().to_bytes();
    serde_json::from_slice(&bytes).unwrap()
}

fn send_response<T: Serialize>(send: SendResponse<Response<Body>>, status: u16, response: T) {
    let response = serde_json::to_vec(&response).unwrap();
    send_bytes(send, status, response);
}

fn send_bytes(send: SendResponse<Response<Body>>, status: u16, body: Vec<u8>) {
    send.send_response(
        Response::builder()
            .status(status)
            .body(Body::from(body))
            .unwrap(),
    );
}
