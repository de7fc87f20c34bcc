use std::time::Duration;
use thiserror::Error;

pub type Result<T> = std::result::Result<T, Error>;

/// API status reasons the apiserver uses for conditions that clear up on their own.
const TRANSIENT_REASONS: [&str; 4] = ["Timeout", "ServerTimeout", "TooManyRequests", "InternalError"];

#[derive(Error, Debug)]
pub enum Error {
    #[error("Kubernetes API error: {0}")]
    KubeError(#[from] kube::Error),

    #[error("Serialization error: {0}")]
    SerializationError(#[from] serde_json::Error),

    #[error("YAML serialization error: {0}")]
    YamlError(#[from] serde_yaml::Error),

    #[error("Template error: {0}")]
    TemplateError(#[from] minijinja::Error),

    #[error("Dex gRPC error: {0}")]
    DexError(#[from] tonic::Status),

    #[error("Dex transport error: {0}")]
    DexTransportError(#[from] tonic::transport::Error),

    #[error("IO error: {0}")]
    IoError(#[from] std::io::Error),

    #[error("OIDC client already exists: {id}")]
    ClientAlreadyExists { id: String },

    #[error("OIDC client not found: {id}")]
    ClientNotFound { id: String },

    #[error("Service not found: {namespace}/{name}")]
    ServiceNotFound { namespace: String, name: String },

    #[error("Ingress not found: {namespace}/{name}")]
    IngressNotFound { namespace: String, name: String },

    #[error("No ingress hosts found for {namespace}/{name}")]
    NoIngressHosts { namespace: String, name: String },

    #[error("No cluster role binding found for cluster role '{0}', make sure one exists when deploying the operator")]
    ClusterRoleBindingNotFound(String),

    #[error("Invalid proxy configuration: {0}")]
    ProxyConfig(String),

    #[error("Timed out after {timeout:?} waiting for {what}")]
    Timeout { what: String, timeout: Duration },

    #[error("{what} failed: {reason}")]
    WaitFailed { what: String, reason: String },

    #[error("Operator secret error: {0}")]
    OperatorSecret(String),

    #[error("Invalid configuration: {0}")]
    ConfigError(String),

    #[error("Resource {0} has no namespace")]
    MissingNamespace(String),

    #[error("Failed {step} for SSO {namespace}/{name}: {source}")]
    PipelineError {
        step: &'static str,
        namespace: String,
        name: String,
        #[source]
        source: Box<Error>,
    },
}

impl Error {
    /// Wrap an error with the provisioning step and resource it failed on
    pub fn pipeline(step: &'static str, namespace: &str, name: &str, source: Error) -> Self {
        Error::PipelineError {
            step,
            namespace: namespace.to_string(),
            name: name.to_string(),
            source: Box::new(source),
        }
    }

    /// Determine if this error is retryable
    pub fn is_retryable(&self) -> bool {
        match self {
            Error::PipelineError { source, .. } => source.is_retryable(),
            Error::KubeError(_)
            | Error::DexError(_)
            | Error::DexTransportError(_)
            | Error::Timeout { .. }
            | Error::ServiceNotFound { .. }
            | Error::IngressNotFound { .. }
            | Error::NoIngressHosts { .. } => true,
            _ => false,
        }
    }

    /// Whether a lookup failure is expected to clear up without intervention
    pub fn is_transient(&self) -> bool {
        match self {
            Error::KubeError(kube::Error::Api(ae)) => {
                matches!(ae.code, 429 | 500 | 504) || TRANSIENT_REASONS.contains(&ae.reason.as_str())
            }
            _ => false,
        }
    }

    pub fn is_not_found(&self) -> bool {
        matches!(self, Error::KubeError(kube::Error::Api(ae)) if ae.code == 404)
    }

    pub fn is_conflict(&self) -> bool {
        matches!(self, Error::KubeError(kube::Error::Api(ae)) if ae.code == 409)
    }
}

#[cfg(test)]
pub(crate) fn api_error(code: u16, reason: &str) -> Error {
    Error::KubeError(kube::Error::Api(kube::core::ErrorResponse {
        status: "Failure".to_string(),
        message: format!("{} ({})", reason, code),
        reason: reason.to_string(),
        code,
    }))
}
