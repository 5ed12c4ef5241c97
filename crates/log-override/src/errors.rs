use thiserror::Error;

#[derive(Error, Debug)]
pub enum InjectionError {
    #[error("deployment has no name, cannot compute the configuration key")]
    MissingDeploymentName,

    #[error("deployment {0} has no pod template spec")]
    MissingPodSpec(String),

    #[error("invalid JSON pointer {0}")]
    InvalidPointer(String),
}

#[derive(Error, Debug)]
pub enum PatchError {
    #[error("cannot serialize patch: {0}")]
    Serialize(#[source] serde_json::Error),

    #[error("cannot deserialize patch: {0}")]
    Deserialize(#[source] serde_json::Error),

    #[error("patch is not valid base64: {0}")]
    Base64(#[from] base64::DecodeError),
}

#[derive(Error, Debug)]
pub enum AdmissionError {
    #[error("unsupported content type {0:?}, expected application/json")]
    UnsupportedContentType(String),

    #[error("body is not a valid AdmissionReview: {0}")]
    MalformedReview(#[source] serde_json::Error),

    #[error("unexpected kind {0:?}, expected AdmissionReview")]
    UnexpectedKind(String),

    #[error("unsupported admission API version {found:?}, expected {expected:?}")]
    UnsupportedApiVersion { found: String, expected: String },

    #[error("AdmissionReview does not contain a request")]
    MissingRequest,

    #[error("unexpected resource kind {0:?}, only Deployment objects are handled")]
    UnexpectedResource(String),

    #[error("AdmissionReview request does not contain an object")]
    MissingObject,

    #[error("cannot decode Deployment: {0}")]
    MalformedDeployment(#[source] serde_json::Error),

    #[error(transparent)]
    Injection(#[from] InjectionError),

    #[error(transparent)]
    Patch(#[from] PatchError),
}

#[derive(Error, Debug, PartialEq, Eq)]
pub enum QueueError {
    #[error("event queue has been completed")]
    Closed,

    #[error("event queue is full (capacity {0})")]
    Full(usize),
}

/// How a watch failure should be handled by the reconnect policy
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum WatchErrorKind {
    /// The same watch can be re-opened from the last seen resource version
    Transient,
    /// The watch session is unusable, a new list is required
    Terminal,
}

#[derive(Error, Debug)]
pub enum WatchError {
    #[error("cannot list {resource}: {source}")]
    List {
        resource: String,
        #[source]
        source: kube::Error,
    },

    #[error("cannot open watch on {resource}: {source}")]
    Open {
        resource: String,
        #[source]
        source: kube::Error,
    },

    #[error("watch stream on {resource} failed: {source}")]
    Stream {
        resource: String,
        #[source]
        source: kube::Error,
    },

    #[error("API server reported an error on the {resource} watch: {code} {reason}: {message}")]
    Server {
        resource: String,
        code: u16,
        reason: String,
        message: String,
    },
}

impl WatchError {
    pub fn kind(&self) -> WatchErrorKind {
        match self {
            WatchError::List { source, .. }
            | WatchError::Open { source, .. }
            | WatchError::Stream { source, .. } => classify_kube_error(source),
            WatchError::Server { code, .. } => classify_status_code(*code),
        }
    }
}

fn classify_kube_error(error: &kube::Error) -> WatchErrorKind {
    match error {
        kube::Error::Api(response) => classify_status_code(response.code),
        kube::Error::SerdeError(_) => WatchErrorKind::Terminal,
        _ => WatchErrorKind::Transient,
    }
}

/// 410 Gone means the resource version is too old, the stream must restart
/// from a fresh list. Authorization and not-found failures cannot heal by
/// re-opening the same watch either.
pub(crate) fn classify_status_code(code: u16) -> WatchErrorKind {
    match code {
        401 | 403 | 404 | 410 => WatchErrorKind::Terminal,
        _ => WatchErrorKind::Transient,
    }
}

#[derive(Error, Debug)]
pub enum ReconcileError {
    #[error("LoggingOverride {name}: invalid log level {level:?} for category {category:?}")]
    InvalidLevel {
        name: String,
        category: String,
        level: String,
    },

    #[error("LoggingOverride {0} must set both the deployment and the namespace")]
    MissingTarget(String),

    #[error("cannot render log levels for {name}: {source}")]
    Render {
        name: String,
        #[source]
        source: serde_json::Error,
    },

    #[error("Kubernetes API error while reconciling {name}: {source}")]
    Kube {
        name: String,
        #[source]
        source: kube::Error,
    },
}
