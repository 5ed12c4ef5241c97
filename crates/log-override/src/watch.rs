//! List and watch a single Kubernetes resource type, pushing the changes into
//! an [`EventPublisher`].
//!
//! The items returned by the initial list are delivered as
//! [`WatchEvent::Added`], then a watch is opened from the resourceVersion of
//! the list. Delivery is at least once: after a reconnection the same object
//! can be delivered again. Objects that disappeared while a new list was
//! needed are reported as [`WatchEvent::Deleted`], carrying their last known
//! state.

use std::{collections::BTreeMap, fmt::Debug, time::Duration};

use backon::{BackoffBuilder, ExponentialBackoff, ExponentialBuilder};
use futures::{StreamExt, TryStreamExt};
use kube::{
    Api, Resource, ResourceExt,
    api::{ListParams, WatchEvent as ApiWatchEvent, WatchParams},
};
use serde::de::DeserializeOwned;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, warn};

use crate::{
    errors::{QueueError, WatchError, WatchErrorKind},
    queue::EventPublisher,
};

/// A change observed on the watched resource type
#[derive(Debug)]
pub enum WatchEvent<K> {
    Added(K),
    Modified(K),
    Deleted(K),
    /// Progress notification, carries the new resourceVersion
    Bookmark(String),
    Error(WatchError),
}

/// How the watch is restored after a failure
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ReconnectPolicy {
    /// Log the error and stop watching. The queue is left open, the
    /// process keeps running until shutdown. A stream closed by the API
    /// server completes the queue.
    Disabled,
    /// Retry forever with an exponential delay. Transient failures re-open
    /// the watch from the last seen resourceVersion, terminal ones start
    /// over with a new list.
    Backoff {
        min_delay: Duration,
        max_delay: Duration,
    },
}

impl Default for ReconnectPolicy {
    fn default() -> Self {
        ReconnectPolicy::Backoff {
            min_delay: Duration::from_millis(500),
            max_delay: Duration::from_secs(30),
        }
    }
}

/// Delays between reconnection attempts
struct Reconnect {
    policy: ReconnectPolicy,
    delays: Option<ExponentialBackoff>,
}

impl Reconnect {
    fn new(policy: ReconnectPolicy) -> Self {
        let mut reconnect = Reconnect {
            policy,
            delays: None,
        };
        reconnect.reset();
        reconnect
    }

    fn reset(&mut self) {
        self.delays = match self.policy {
            ReconnectPolicy::Disabled => None,
            ReconnectPolicy::Backoff {
                min_delay,
                max_delay,
            } => Some(
                ExponentialBuilder::default()
                    .with_min_delay(min_delay)
                    .with_max_delay(max_delay)
                    .without_max_times()
                    .build(),
            ),
        };
    }

    /// `None` when reconnecting is disabled
    fn next_delay(&mut self) -> Option<Duration> {
        let max_delay = match self.policy {
            ReconnectPolicy::Disabled => return None,
            ReconnectPolicy::Backoff { max_delay, .. } => max_delay,
        };
        Some(
            self.delays
                .as_mut()
                .and_then(Iterator::next)
                .unwrap_or(max_delay),
        )
    }
}

/// What a new session needs from the previous ones
struct Progress<K> {
    /// Where to resume the watch from, `None` forces a new list
    resource_version: Option<String>,
    /// Last known state of every object, keyed by `namespace/name`
    known: BTreeMap<String, K>,
}

impl<K: Resource + Clone> Progress<K> {
    fn remember(&mut self, object: &K) {
        if let Some(version) = object.resource_version() {
            self.resource_version = Some(version);
        }
        self.known.insert(object_key(object), object.clone());
    }

    fn forget(&mut self, object: &K) {
        if let Some(version) = object.resource_version() {
            self.resource_version = Some(version);
        }
        self.known.remove(&object_key(object));
    }
}

fn object_key<K: Resource>(object: &K) -> String {
    match object.namespace() {
        Some(namespace) => format!("{namespace}/{}", object.name_any()),
        None => object.name_any(),
    }
}

/// How a watch session ended
enum SessionEnd {
    /// The API server closed the stream
    Closed,
    /// The consumer side is gone, there's no point in watching anymore
    QueueClosed,
}

pub struct WatchClient<K> {
    api: Api<K>,
    resource: String,
    watch_params: WatchParams,
    policy: ReconnectPolicy,
}

impl<K> WatchClient<K>
where
    K: Resource + Clone + DeserializeOwned + Debug + Send + 'static,
    K::DynamicType: Default,
{
    pub fn new(api: Api<K>, policy: ReconnectPolicy) -> Self {
        WatchClient {
            api,
            resource: K::plural(&K::DynamicType::default()).to_string(),
            watch_params: WatchParams::default(),
            policy,
        }
    }

    /// Watch until cancelled, or until the stream is over. The queue is
    /// always completed before returning, so the consumer can exit too.
    pub async fn run(self, publisher: EventPublisher<WatchEvent<K>>, cancel: CancellationToken) {
        let mut reconnect = Reconnect::new(self.policy);
        let mut progress = Progress {
            resource_version: None,
            known: BTreeMap::new(),
        };

        info!(resource = self.resource.as_str(), "starting watch");
        loop {
            let session = tokio::select! {
                _ = cancel.cancelled() => break,
                session = self.session(&publisher, &mut progress, &mut reconnect) => session,
            };

            let error = match session {
                Ok(SessionEnd::QueueClosed) => {
                    info!(
                        resource = self.resource.as_str(),
                        "event queue completed, stopping watch"
                    );
                    break;
                }
                Ok(SessionEnd::Closed) => {
                    info!(
                        resource = self.resource.as_str(),
                        "watch stream closed by the API server"
                    );
                    if self.policy == ReconnectPolicy::Disabled {
                        break;
                    }
                    // a routine close, not a failure
                    reconnect.reset();
                    None
                }
                Err(error) => Some(error),
            };

            if let Some(error) = error {
                let kind = error.kind();
                error!(
                    resource = self.resource.as_str(),
                    error = %error,
                    kind = ?kind,
                    "watch failed"
                );
                if kind == WatchErrorKind::Terminal {
                    progress.resource_version = None;
                }
                if let Err(QueueError::Closed) = publisher.publish(WatchEvent::Error(error)).await
                {
                    break;
                }
            }

            let Some(delay) = reconnect.next_delay() else {
                warn!(
                    resource = self.resource.as_str(),
                    "reconnection disabled, waiting for shutdown"
                );
                cancel.cancelled().await;
                break;
            };

            debug!(
                resource = self.resource.as_str(),
                delay_ms = delay.as_millis() as u64,
                relist = progress.resource_version.is_none(),
                "reconnecting watch"
            );
            tokio::select! {
                _ = cancel.cancelled() => break,
                _ = tokio::time::sleep(delay) => {}
            }
        }

        publisher.complete();
        info!(resource = self.resource.as_str(), "watch stopped");
    }

    /// Connecting and streaming. When there's no resourceVersion to resume
    /// from a full list is performed first.
    async fn session(
        &self,
        publisher: &EventPublisher<WatchEvent<K>>,
        progress: &mut Progress<K>,
        reconnect: &mut Reconnect,
    ) -> Result<SessionEnd, WatchError> {
        let version = match progress.resource_version.clone() {
            Some(version) => version,
            None => {
                let list = self
                    .api
                    .list(&ListParams::default())
                    .await
                    .map_err(|source| WatchError::List {
                        resource: self.resource.clone(),
                        source,
                    })?;
                let version = list.metadata.resource_version.clone().unwrap_or_default();
                debug!(
                    resource = self.resource.as_str(),
                    items = list.items.len(),
                    known = progress.known.len(),
                    resource_version = version.as_str(),
                    "initial list"
                );

                let listed: BTreeMap<String, K> = list
                    .items
                    .into_iter()
                    .map(|item| (object_key(&item), item))
                    .collect();
                let vanished: Vec<K> = progress
                    .known
                    .iter()
                    .filter(|(key, _)| !listed.contains_key(*key))
                    .map(|(_, object)| object.clone())
                    .collect();
                progress.known.clear();

                for object in vanished {
                    debug!(
                        resource = self.resource.as_str(),
                        object = object_key(&object).as_str(),
                        "object deleted while relisting"
                    );
                    if self.publish(publisher, WatchEvent::Deleted(object)).await? {
                        return Ok(SessionEnd::QueueClosed);
                    }
                }
                for (key, item) in listed {
                    progress.known.insert(key, item.clone());
                    if self.publish(publisher, WatchEvent::Added(item)).await? {
                        return Ok(SessionEnd::QueueClosed);
                    }
                }
                progress.resource_version = Some(version.clone());
                version
            }
        };

        let mut stream = self
            .api
            .watch(&self.watch_params, &version)
            .await
            .map_err(|source| WatchError::Open {
                resource: self.resource.clone(),
                source,
            })?
            .boxed();
        debug!(
            resource = self.resource.as_str(),
            resource_version = version.as_str(),
            "watch opened"
        );

        let mut delivered = false;
        while let Some(event) = stream
            .try_next()
            .await
            .map_err(|source| WatchError::Stream {
                resource: self.resource.clone(),
                source,
            })?
        {
            let event = match event {
                ApiWatchEvent::Added(object) => {
                    progress.remember(&object);
                    WatchEvent::Added(object)
                }
                ApiWatchEvent::Modified(object) => {
                    progress.remember(&object);
                    WatchEvent::Modified(object)
                }
                ApiWatchEvent::Deleted(object) => {
                    progress.forget(&object);
                    WatchEvent::Deleted(object)
                }
                ApiWatchEvent::Bookmark(bookmark) => {
                    let version = bookmark.metadata.resource_version;
                    progress.resource_version = Some(version.clone());
                    WatchEvent::Bookmark(version)
                }
                ApiWatchEvent::Error(status) => {
                    return Err(WatchError::Server {
                        resource: self.resource.clone(),
                        code: status.code,
                        reason: status.reason.clone(),
                        message: status.message.clone(),
                    });
                }
            };

            if !delivered {
                delivered = true;
                reconnect.reset();
            }
            if self.publish(publisher, event).await? {
                return Ok(SessionEnd::QueueClosed);
            }
        }

        Ok(SessionEnd::Closed)
    }

    /// Returns `true` when the queue has been completed
    async fn publish(
        &self,
        publisher: &EventPublisher<WatchEvent<K>>,
        event: WatchEvent<K>,
    ) -> Result<bool, WatchError> {
        match publisher.publish(event).await {
            Ok(()) => Ok(false),
            Err(QueueError::Closed) => Ok(true),
            Err(QueueError::Full(capacity)) => {
                warn!(
                    resource = self.resource.as_str(),
                    capacity, "event queue full, event discarded"
                );
                Ok(false)
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::{
        crd::LoggingOverride,
        queue::{QueueConfig, event_queue},
    };
    use http::{Request, Response};
    use kube::client::Body;
    use serde_json::{Value, json};
    use tokio::sync::mpsc;
    use tower_test::mock::{Handle, SendResponse};

    const PATH: &str = "/apis/logoverride.io/v1alpha1/loggingoverrides";

    fn logging_override(name: &str, resource_version: &str, level: &str) -> Value {
        json!({
            "apiVersion": "logoverride.io/v1alpha1",
            "kind": "LoggingOverride",
            "metadata": {"name": name, "resourceVersion": resource_version},
            "spec": {
                "deployment": name,
                "namespace": "shop",
                "logLevels": {"Default": level}
            }
        })
    }

    fn list(resource_version: &str, items: Vec<Value>) -> Value {
        json!({
            "apiVersion": "logoverride.io/v1alpha1",
            "kind": "LoggingOverrideList",
            "metadata": {"resourceVersion": resource_version},
            "items": items
        })
    }

    fn watch_body(events: &[Value]) -> Vec<u8> {
        let mut body = Vec::new();
        for event in events {
            body.extend(serde_json::to_vec(event).unwrap());
            body.push(b'\n');
        }
        body
    }

    fn send_json(send: SendResponse<Response<Body>>, value: &Value) {
        let body = serde_json::to_vec(value).unwrap();
        send.send_response(Response::builder().body(Body::from(body)).unwrap());
    }

    fn send_raw(send: SendResponse<Response<Body>>, body: Vec<u8>) {
        send.send_response(Response::builder().body(Body::from(body)).unwrap());
    }

    fn is_watch(request: &Request<Body>) -> bool {
        request
            .uri()
            .query()
            .is_some_and(|query| query.contains("watch=true"))
    }

    fn watch_client(
        mocksvc: tower_test::mock::Mock<Request<Body>, Response<Body>>,
        policy: ReconnectPolicy,
    ) -> WatchClient<LoggingOverride> {
        let client = kube::Client::new(mocksvc, "default");
        WatchClient::new(Api::all(client), policy)
    }

    async fn next_event(
        consumer: &mut crate::queue::EventConsumer<WatchEvent<LoggingOverride>>,
    ) -> Option<WatchEvent<LoggingOverride>> {
        tokio::time::timeout(Duration::from_secs(5), consumer.consume())
            .await
            .expect("timed out waiting for a watch event")
    }

    fn name_of(event: &WatchEvent<LoggingOverride>) -> String {
        match event {
            WatchEvent::Added(o) | WatchEvent::Modified(o) | WatchEvent::Deleted(o) => {
                o.name_any()
            }
            other => panic!("unexpected event {other:?}"),
        }
    }

    fn single_session_scenario(mut handle: Handle<Request<Body>, Response<Body>>) {
        tokio::spawn(async move {
            while let Some((request, send)) = handle.next_request().await {
                assert_eq!(request.uri().path(), PATH);
                if is_watch(&request) {
                    let query = request.uri().query().unwrap_or_default().to_owned();
                    assert!(query.contains("resourceVersion=100"), "query: {query}");
                    send_raw(
                        send,
                        watch_body(&[
                            json!({"type": "ADDED", "object": logging_override("orders", "101", "Debug")}),
                            json!({"type": "MODIFIED", "object": logging_override("checkout", "102", "Trace")}),
                            json!({"type": "DELETED", "object": logging_override("orders", "103", "Debug")}),
                        ]),
                    );
                } else {
                    send_json(
                        send,
                        &list("100", vec![logging_override("checkout", "99", "Warning")]),
                    );
                }
            }
        });
    }

    #[tokio::test]
    async fn listed_items_then_stream_then_completion() {
        let (mocksvc, handle) = tower_test::mock::pair::<Request<Body>, Response<Body>>();
        single_session_scenario(handle);

        let (publisher, mut consumer) = event_queue(QueueConfig::default());
        let watch = watch_client(mocksvc, ReconnectPolicy::Disabled);
        let task = tokio::spawn(watch.run(publisher, CancellationToken::new()));

        let added = next_event(&mut consumer).await.unwrap();
        assert!(matches!(added, WatchEvent::Added(_)));
        assert_eq!(name_of(&added), "checkout");

        let added = next_event(&mut consumer).await.unwrap();
        assert!(matches!(added, WatchEvent::Added(_)));
        assert_eq!(name_of(&added), "orders");

        let modified = next_event(&mut consumer).await.unwrap();
        match &modified {
            WatchEvent::Modified(o) => {
                assert_eq!(o.spec.log_levels.get("Default").unwrap(), "Trace")
            }
            other => panic!("unexpected event {other:?}"),
        }

        let deleted = next_event(&mut consumer).await.unwrap();
        assert!(matches!(deleted, WatchEvent::Deleted(_)));
        assert_eq!(name_of(&deleted), "orders");

        assert!(next_event(&mut consumer).await.is_none());
        task.await.unwrap();
    }

    #[tokio::test]
    async fn terminal_errors_relist_and_bookmarks_move_the_resume_point() {
        let (mocksvc, mut handle) = tower_test::mock::pair::<Request<Body>, Response<Body>>();
        let (watch_queries_tx, mut watch_queries_rx) = mpsc::unbounded_channel::<String>();

        tokio::spawn(async move {
            let mut lists = 0;
            let mut watches = 0;
            let mut pending = Vec::new();
            while let Some((request, send)) = handle.next_request().await {
                if !is_watch(&request) {
                    lists += 1;
                    let (version, items) = if lists == 1 {
                        ("100", vec![logging_override("checkout", "99", "Debug")])
                    } else {
                        ("200", vec![])
                    };
                    send_json(send, &list(version, items));
                    continue;
                }

                watches += 1;
                let query = request.uri().query().unwrap_or_default().to_owned();
                watch_queries_tx.send(query).unwrap();
                match watches {
                    1 => send_raw(
                        send,
                        watch_body(&[json!({
                            "type": "ERROR",
                            "object": {
                                "kind": "Status",
                                "apiVersion": "v1",
                                "metadata": {},
                                "status": "Failure",
                                "message": "too old resource version: 100 (150)",
                                "reason": "Expired",
                                "code": 410
                            }
                        })]),
                    ),
                    2 => send_raw(
                        send,
                        watch_body(&[json!({
                            "type": "BOOKMARK",
                            "object": {
                                "apiVersion": "logoverride.io/v1alpha1",
                                "kind": "LoggingOverride",
                                "metadata": {"resourceVersion": "300"}
                            }
                        })]),
                    ),
                    // keep the last watch open until the test cancels it
                    _ => pending.push(send),
                }
            }
        });

        let (publisher, mut consumer) = event_queue(QueueConfig::default());
        let watch = watch_client(
            mocksvc,
            ReconnectPolicy::Backoff {
                min_delay: Duration::from_millis(10),
                max_delay: Duration::from_millis(50),
            },
        );
        let cancel = CancellationToken::new();
        let task = tokio::spawn(watch.run(publisher, cancel.clone()));

        let added = next_event(&mut consumer).await.unwrap();
        assert_eq!(name_of(&added), "checkout");

        match next_event(&mut consumer).await.unwrap() {
            WatchEvent::Error(error) => {
                assert_eq!(error.kind(), WatchErrorKind::Terminal);
                assert!(matches!(error, WatchError::Server { code: 410, .. }));
            }
            other => panic!("unexpected event {other:?}"),
        }

        // gone from the second list
        let deleted = next_event(&mut consumer).await.unwrap();
        assert!(matches!(deleted, WatchEvent::Deleted(_)));
        assert_eq!(name_of(&deleted), "checkout");

        match next_event(&mut consumer).await.unwrap() {
            WatchEvent::Bookmark(version) => assert_eq!(version, "300"),
            other => panic!("unexpected event {other:?}"),
        }

        let first = watch_queries_rx.recv().await.unwrap();
        assert!(first.contains("resourceVersion=100"), "query: {first}");
        let second = watch_queries_rx.recv().await.unwrap();
        assert!(second.contains("resourceVersion=200"), "query: {second}");
        let third = tokio::time::timeout(Duration::from_secs(5), watch_queries_rx.recv())
            .await
            .expect("the watch was not re-opened")
            .unwrap();
        assert!(third.contains("resourceVersion=300"), "query: {third}");

        cancel.cancel();
        assert!(next_event(&mut consumer).await.is_none());
        task.await.unwrap();
    }

    fn expired() -> Value {
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

    #[tokio::test]
    async fn objects_missing_from_a_relist_are_deleted() {
        let (mocksvc, mut handle) = tower_test::mock::pair::<Request<Body>, Response<Body>>();
        tokio::spawn(async move {
            let mut lists = 0;
            let mut watches = 0;
            let mut pending = Vec::new();
            while let Some((request, send)) = handle.next_request().await {
                if !is_watch(&request) {
                    lists += 1;
                    let items = if lists == 1 {
                        vec![
                            logging_override("checkout", "9", "Debug"),
                            logging_override("orders", "8", "Error"),
                        ]
                    } else {
                        vec![logging_override("orders", "8", "Error")]
                    };
                    send_json(send, &list(&(lists * 10).to_string(), items));
                    continue;
                }
                watches += 1;
                if watches == 1 {
                    send_raw(send, watch_body(&[expired()]));
                } else {
                    pending.push(send);
                }
            }
        });

        let (publisher, mut consumer) = event_queue(QueueConfig::default());
        let watch = watch_client(
            mocksvc,
            ReconnectPolicy::Backoff {
                min_delay: Duration::from_millis(10),
                max_delay: Duration::from_millis(50),
            },
        );
        let cancel = CancellationToken::new();
        let task = tokio::spawn(watch.run(publisher, cancel.clone()));

        let mut first_list: Vec<_> = vec![
            name_of(&next_event(&mut consumer).await.unwrap()),
            name_of(&next_event(&mut consumer).await.unwrap()),
        ];
        first_list.sort();
        assert_eq!(first_list, vec!["checkout", "orders"]);

        assert!(matches!(
            next_event(&mut consumer).await.unwrap(),
            WatchEvent::Error(WatchError::Server { code: 410, .. })
        ));

        match next_event(&mut consumer).await.unwrap() {
            WatchEvent::Deleted(o) => {
                assert_eq!(o.name_any(), "checkout");
                assert_eq!(o.spec.log_levels.get("Default").unwrap(), "Debug");
            }
            other => panic!("unexpected event {other:?}"),
        }
        match next_event(&mut consumer).await.unwrap() {
            WatchEvent::Added(o) => assert_eq!(o.name_any(), "orders"),
            other => panic!("unexpected event {other:?}"),
        }

        cancel.cancel();
        assert!(next_event(&mut consumer).await.is_none());
        task.await.unwrap();
    }

    #[tokio::test]
    async fn objects_deleted_by_the_stream_are_not_deleted_again() {
        let (mocksvc, mut handle) = tower_test::mock::pair::<Request<Body>, Response<Body>>();
        tokio::spawn(async move {
            let mut lists = 0;
            let mut watches = 0;
            let mut pending = Vec::new();
            while let Some((request, send)) = handle.next_request().await {
                if !is_watch(&request) {
                    lists += 1;
                    let items = if lists == 1 {
                        vec![logging_override("checkout", "9", "Debug")]
                    } else {
                        vec![]
                    };
                    send_json(send, &list(&(lists * 10).to_string(), items));
                    continue;
                }
                watches += 1;
                if watches == 1 {
                    send_raw(
                        send,
                        watch_body(&[
                            json!({"type": "DELETED", "object": logging_override("checkout", "11", "Debug")}),
                            expired(),
                        ]),
                    );
                } else {
                    pending.push(send);
                }
            }
        });

        let (publisher, mut consumer) = event_queue(QueueConfig::default());
        let watch = watch_client(
            mocksvc,
            ReconnectPolicy::Backoff {
                min_delay: Duration::from_millis(10),
                max_delay: Duration::from_millis(50),
            },
        );
        let cancel = CancellationToken::new();
        let task = tokio::spawn(watch.run(publisher, cancel.clone()));

        assert!(matches!(next_event(&mut consumer).await.unwrap(), WatchEvent::Added(_)));
        assert!(matches!(next_event(&mut consumer).await.unwrap(), WatchEvent::Deleted(_)));
        assert!(matches!(next_event(&mut consumer).await.unwrap(), WatchEvent::Error(_)));
        assert!(
            tokio::time::timeout(Duration::from_millis(300), consumer.consume())
                .await
                .is_err(),
            "the relist should not report the deletion twice"
        );

        cancel.cancel();
        assert!(next_event(&mut consumer).await.is_none());
        task.await.unwrap();
    }

    #[tokio::test]
    async fn routine_stream_closes_do_not_grow_the_backoff() {
        let (mocksvc, mut handle) = tower_test::mock::pair::<Request<Body>, Response<Body>>();
        let (watch_tx, mut watch_rx) = mpsc::unbounded_channel::<()>();
        tokio::spawn(async move {
            while let Some((request, send)) = handle.next_request().await {
                if is_watch(&request) {
                    watch_tx.send(()).unwrap();
                    // an empty body: the API server closed the watch
                    send_raw(send, Vec::new());
                } else {
                    send_json(send, &list("10", vec![]));
                }
            }
        });

        let (publisher, _consumer) = event_queue(QueueConfig::default());
        let watch = watch_client(
            mocksvc,
            ReconnectPolicy::Backoff {
                min_delay: Duration::from_millis(200),
                max_delay: Duration::from_secs(10),
            },
        );
        let cancel = CancellationToken::new();
        let task = tokio::spawn(watch.run(publisher, cancel.clone()));

        // a growing backoff would wait 200 + 400 + 800 + 1600ms before the
        // fifth watch
        tokio::time::timeout(Duration::from_secs(2), async {
            for _ in 0..5 {
                watch_rx.recv().await.unwrap();
            }
        })
        .await
        .expect("the watch should be re-opened after the minimum delay");

        cancel.cancel();
        task.await.unwrap();
    }

    #[tokio::test]
    async fn disabled_reconnection_keeps_the_queue_open_until_shutdown() {
        let (mocksvc, mut handle) = tower_test::mock::pair::<Request<Body>, Response<Body>>();
        tokio::spawn(async move {
            while let Some((_request, send)) = handle.next_request().await {
                send.send_response(
                    Response::builder()
                        .status(403)
                        .body(Body::from(
                            serde_json::to_vec(&json!({
                                "kind": "Status",
                                "apiVersion": "v1",
                                "metadata": {},
                                "status": "Failure",
                                "message": "loggingoverrides is forbidden",
                                "reason": "Forbidden",
                                "code": 403
                            }))
                            .unwrap(),
                        ))
                        .unwrap(),
                );
            }
        });

        let (publisher, mut consumer) = event_queue(QueueConfig::default());
        let watch = watch_client(mocksvc, ReconnectPolicy::Disabled);
        let cancel = CancellationToken::new();
        let task = tokio::spawn(watch.run(publisher.clone(), cancel.clone()));

        match next_event(&mut consumer).await.unwrap() {
            WatchEvent::Error(error) => {
                assert!(matches!(error, WatchError::List { .. }));
                assert_eq!(error.kind(), WatchErrorKind::Terminal);
            }
            other => panic!("unexpected event {other:?}"),
        }

        tokio::time::sleep(Duration::from_millis(50)).await;
        assert!(!publisher.is_completed());
        assert!(!task.is_finished());

        cancel.cancel();
        assert!(next_event(&mut consumer).await.is_none());
        task.await.unwrap();
    }

    #[test]
    fn backoff_delays_grow_up_to_the_maximum() {
        let mut reconnect = Reconnect::new(ReconnectPolicy::Backoff {
            min_delay: Duration::from_millis(10),
            max_delay: Duration::from_millis(40),
        });
        let delays: Vec<_> = (0..6).filter_map(|_| reconnect.next_delay()).collect();
        assert_eq!(delays.len(), 6);
        assert_eq!(delays[0], Duration::from_millis(10));
        assert!(delays.iter().all(|d| *d <= Duration::from_millis(40)));
        assert_eq!(delays[5], Duration::from_millis(40));

        reconnect.reset();
        assert_eq!(reconnect.next_delay(), Some(Duration::from_millis(10)));

        assert_eq!(Reconnect::new(ReconnectPolicy::Disabled).next_delay(), None);
    }
}
