use std::{
    collections::{BTreeMap, HashMap},
    future::Future,
    sync::{Mutex, MutexGuard, PoisonError},
};

use k8s_openapi::{api::core::v1::ConfigMap, apimachinery::pkg::apis::meta::v1::ObjectMeta};
use kube::{
    Api, Client, ResourceExt,
    api::{Patch, PatchParams, PostParams},
};
use serde_json::json;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, warn};

use crate::{
    crd::{LoggingOverride, LoggingOverrideSpec, canonical_level},
    errors::ReconcileError,
    injector,
    queue::EventConsumer,
    watch::WatchEvent,
};

const MANAGED_BY_LABEL: &str = "app.kubernetes.io/managed-by";

/// Applies the effect of a `LoggingOverride` to the cluster
pub trait OverrideHandler {
    /// Called when an override is created or changed
    fn apply(
        &self,
        logging_override: &LoggingOverride,
    ) -> impl Future<Output = Result<(), ReconcileError>> + Send;

    /// Called when an override is deleted
    fn remove(
        &self,
        logging_override: &LoggingOverride,
    ) -> impl Future<Output = Result<(), ReconcileError>> + Send;
}

/// Drains the event queue, one event at a time, in delivery order
pub struct Reconciler<H> {
    handler: H,
}

impl<H: OverrideHandler> Reconciler<H> {
    pub fn new(handler: H) -> Self {
        Reconciler { handler }
    }

    /// Runs until the queue is completed or the token is cancelled.
    /// Handler failures are logged, they never stop the loop.
    pub async fn run(
        &self,
        mut consumer: EventConsumer<WatchEvent<LoggingOverride>>,
        cancel: CancellationToken,
    ) {
        info!("reconciliation loop started");
        loop {
            let event = tokio::select! {
                biased;
                _ = cancel.cancelled() => {
                    info!("reconciliation loop cancelled");
                    break;
                }
                event = consumer.consume() => event,
            };
            let Some(event) = event else {
                info!("event queue completed, reconciliation loop done");
                break;
            };
            self.dispatch(event).await;
        }
    }

    async fn dispatch(&self, event: WatchEvent<LoggingOverride>) {
        let (action, logging_override, result) = match event {
            WatchEvent::Added(o) | WatchEvent::Modified(o) => {
                let result = self.handler.apply(&o).await;
                ("apply", o, result)
            }
            WatchEvent::Deleted(o) => {
                let result = self.handler.remove(&o).await;
                ("remove", o, result)
            }
            WatchEvent::Bookmark(resource_version) => {
                debug!(resource_version = resource_version.as_str(), "bookmark");
                return;
            }
            WatchEvent::Error(watch_error) => {
                warn!(error = %watch_error, "watch reported an error");
                return;
            }
        };

        match result {
            Ok(()) => debug!(
                action,
                logging_override = logging_override.name_any().as_str(),
                "reconciled"
            ),
            Err(e) => error!(
                action,
                logging_override = logging_override.name_any().as_str(),
                error = %e,
                "reconciliation failed"
            ),
        }
    }
}

/// Deployment whose ConfigMap key an override writes
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
struct Target {
    namespace: String,
    deployment: String,
}

impl Target {
    fn of(spec: &LoggingOverrideSpec) -> Self {
        Target {
            namespace: spec.namespace.clone(),
            deployment: spec.deployment.clone(),
        }
    }

    fn key(&self) -> String {
        injector::config_map_key(&self.deployment)
    }
}

/// Which override wrote which ConfigMap key
#[derive(Default)]
struct Ownership {
    /// Last successfully applied version of every override, by name
    applied: HashMap<String, LoggingOverride>,
    /// Override whose levels are currently written for each target
    owners: HashMap<Target, String>,
}

impl Ownership {
    /// Another applied override aiming at `target`, able to take it over
    fn successor(&self, target: &Target, released_by: &str) -> Option<LoggingOverride> {
        self.applied
            .iter()
            .filter(|(name, o)| name.as_str() != released_by && Target::of(&o.spec) == *target)
            .map(|(_, o)| o.clone())
            .min_by_key(|o| o.name_any())
    }
}

/// Writes the log levels of every override into the ConfigMap mounted by the
/// webhook, under the `<deployment>.json` key of the target namespace's
/// ConfigMap.
///
/// Each key has a single owner, the override applied last. A retargeted
/// override releases its previous key, and a released key goes to another
/// override aiming at the same Deployment or is removed.
pub struct ConfigMapOverrideHandler {
    client: Client,
    config_map_name: String,
    ownership: Mutex<Ownership>,
}

impl ConfigMapOverrideHandler {
    pub fn new(client: Client, config_map_name: String) -> Self {
        ConfigMapOverrideHandler {
            client,
            config_map_name,
            ownership: Mutex::new(Ownership::default()),
        }
    }

    fn config_maps(&self, namespace: &str) -> Api<ConfigMap> {
        Api::namespaced(self.client.clone(), namespace)
    }

    fn ownership(&self) -> MutexGuard<'_, Ownership> {
        self.ownership.lock().unwrap_or_else(PoisonError::into_inner)
    }

    async fn write_levels(
        &self,
        name: &str,
        target: &Target,
        document: String,
    ) -> Result<(), ReconcileError> {
        let key = target.key();
        let api = self.config_maps(&target.namespace);
        let kube_error = |source| ReconcileError::Kube {
            name: name.to_owned(),
            source,
        };

        let existing = api.get_opt(&self.config_map_name).await.map_err(kube_error)?;
        match existing {
            Some(config_map) => {
                let current = config_map.data.as_ref().and_then(|data| data.get(&key));
                if current == Some(&document) {
                    debug!(
                        config_map = self.config_map_name.as_str(),
                        namespace = target.namespace.as_str(),
                        key = key.as_str(),
                        "ConfigMap already up to date"
                    );
                    return Ok(());
                }
                let patch = json!({ "data": { key.as_str(): document } });
                api.patch(
                    &self.config_map_name,
                    &PatchParams::default(),
                    &Patch::Merge(&patch),
                )
                .await
                .map_err(kube_error)?;
                info!(
                    config_map = self.config_map_name.as_str(),
                    namespace = target.namespace.as_str(),
                    key = key.as_str(),
                    "log levels updated"
                );
            }
            None => {
                let config_map = ConfigMap {
                    metadata: ObjectMeta {
                        name: Some(self.config_map_name.clone()),
                        namespace: Some(target.namespace.clone()),
                        labels: Some(BTreeMap::from([(
                            MANAGED_BY_LABEL.to_owned(),
                            crate::config::SERVICE_NAME.to_owned(),
                        )])),
                        ..Default::default()
                    },
                    data: Some(BTreeMap::from([(key.clone(), document)])),
                    ..Default::default()
                };
                api.create(&PostParams::default(), &config_map)
                    .await
                    .map_err(kube_error)?;
                info!(
                    config_map = self.config_map_name.as_str(),
                    namespace = target.namespace.as_str(),
                    key = key.as_str(),
                    "ConfigMap created"
                );
            }
        }

        Ok(())
    }

    async fn delete_key(&self, name: &str, target: &Target) -> Result<(), ReconcileError> {
        let key = target.key();
        let api = self.config_maps(&target.namespace);
        let kube_error = |source| ReconcileError::Kube {
            name: name.to_owned(),
            source,
        };

        let existing = api.get_opt(&self.config_map_name).await.map_err(kube_error)?;
        let has_key = existing
            .as_ref()
            .and_then(|config_map| config_map.data.as_ref())
            .is_some_and(|data| data.contains_key(&key));
        if !has_key {
            debug!(
                config_map = self.config_map_name.as_str(),
                namespace = target.namespace.as_str(),
                key = key.as_str(),
                "nothing to remove"
            );
            return Ok(());
        }

        // a null value removes the key with a merge patch
        let patch = json!({ "data": { key.as_str(): null } });
        api.patch(
            &self.config_map_name,
            &PatchParams::default(),
            &Patch::Merge(&patch),
        )
        .await
        .map_err(kube_error)?;
        info!(
            config_map = self.config_map_name.as_str(),
            namespace = target.namespace.as_str(),
            key = key.as_str(),
            "log levels removed"
        );

        Ok(())
    }

    /// Hand a key no longer owned by `released_by` to the next override
    /// aiming at the same Deployment, or delete it when there's none
    async fn release(&self, released_by: &str, target: &Target) -> Result<(), ReconcileError> {
        let successor = self.ownership().successor(target, released_by);
        let Some(successor) = successor else {
            return self.delete_key(released_by, target).await;
        };

        let name = successor.name_any();
        let document = render_log_levels(&name, &successor.spec)?;
        self.write_levels(&name, target, document).await?;
        self.ownership().owners.insert(target.clone(), name.clone());
        info!(
            key = target.key().as_str(),
            namespace = target.namespace.as_str(),
            from = released_by,
            to = name.as_str(),
            "log levels handed over"
        );
        Ok(())
    }
}

impl OverrideHandler for ConfigMapOverrideHandler {
    async fn apply(&self, logging_override: &LoggingOverride) -> Result<(), ReconcileError> {
        let name = logging_override.name_any();
        let spec = &logging_override.spec;
        check_target(&name, spec)?;
        let document = render_log_levels(&name, spec)?;
        let target = Target::of(spec);

        self.write_levels(&name, &target, document).await?;

        let stale = {
            let mut ownership = self.ownership();
            let previous = ownership
                .applied
                .insert(name.clone(), logging_override.clone())
                .map(|previous| Target::of(&previous.spec));
            ownership.owners.insert(target.clone(), name.clone());
            match previous {
                Some(previous)
                    if previous != target
                        && ownership.owners.get(&previous) == Some(&name) =>
                {
                    ownership.owners.remove(&previous);
                    Some(previous)
                }
                _ => None,
            }
        };

        if let Some(stale) = stale {
            debug!(
                logging_override = name.as_str(),
                key = stale.key().as_str(),
                namespace = stale.namespace.as_str(),
                "override retargeted, releasing the previous key"
            );
            self.release(&name, &stale).await?;
        }
        Ok(())
    }

    async fn remove(&self, logging_override: &LoggingOverride) -> Result<(), ReconcileError> {
        let name = logging_override.name_any();

        let (target, owned) = {
            let mut ownership = self.ownership();
            let target = match ownership.applied.remove(&name) {
                Some(applied) => Target::of(&applied.spec),
                None => {
                    check_target(&name, &logging_override.spec)?;
                    Target::of(&logging_override.spec)
                }
            };
            let owned = match ownership.owners.get(&target) {
                Some(owner) if *owner != name => false,
                Some(_) => {
                    ownership.owners.remove(&target);
                    true
                }
                None => true,
            };
            (target, owned)
        };

        if !owned {
            debug!(
                logging_override = name.as_str(),
                key = target.key().as_str(),
                namespace = target.namespace.as_str(),
                "key owned by another override, leaving it"
            );
            return Ok(());
        }
        self.release(&name, &target).await
    }
}

fn check_target(name: &str, spec: &LoggingOverrideSpec) -> Result<(), ReconcileError> {
    if spec.deployment.is_empty() || spec.namespace.is_empty() {
        return Err(ReconcileError::MissingTarget(name.to_owned()));
    }
    Ok(())
}

/// Render the document read by the workload: `{"logLevels": {...}}`, with
/// every level in its canonical spelling
pub fn render_log_levels(name: &str, spec: &LoggingOverrideSpec) -> Result<String, ReconcileError> {
    let mut levels = BTreeMap::new();
    for (category, level) in &spec.log_levels {
        let canonical = canonical_level(level).ok_or_else(|| ReconcileError::InvalidLevel {
            name: name.to_owned(),
            category: category.clone(),
            level: level.clone(),
        })?;
        levels.insert(category.as_str(), canonical);
    }

    serde_json::to_string(&json!({ "logLevels": levels })).map_err(|source| {
        ReconcileError::Render {
            name: name.to_owned(),
            source,
        }
    })
}
