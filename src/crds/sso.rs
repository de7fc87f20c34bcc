use crate::error::{Error, Result};
use kube::{CustomResource, ResourceExt};
use schemars::JsonSchema;
use serde::{Deserialize, Serialize};

/// SSO protects an upstream service with an oauth2_proxy backed by a Dex OIDC client
#[derive(CustomResource, Serialize, Deserialize, Clone, Debug, Default, JsonSchema)]
#[kube(
    group = "jenkins.io",
    version = "v1",
    kind = "SSO",
    plural = "ssos",
    singular = "sso",
    namespaced,
    status = "SSOStatus",
    printcolumn = r#"{"name":"Upstream", "type":"string", "jsonPath":".spec.upstreamService"}"#,
    printcolumn = r#"{"name":"Initialized", "type":"boolean", "jsonPath":".status.initialized"}"#,
    printcolumn = r#"{"name":"Age", "type":"date", "jsonPath":".metadata.creationTimestamp"}"#
)]
#[serde(rename_all = "camelCase")]
pub struct SSOSpec {
    /// Issuer of the OIDC provider, must be an https URL
    #[schemars(regex(pattern = r"^https://"))]
    pub oidc_issuer_url: String,

    /// Service in the same namespace to put behind the proxy
    pub upstream_service: String,

    /// Domain the proxy is exposed on, also used as cookie domain
    #[serde(default)]
    pub domain: String,

    /// cert-manager issuer used for the proxy ingress
    #[serde(default)]
    pub cert_issuer_name: String,

    pub proxy_image: String,
    pub proxy_image_tag: String,

    #[serde(default)]
    pub proxy_resources: ProxyResources,

    /// Forward the OIDC access token to the upstream
    #[serde(default)]
    pub forward_token: bool,

    #[serde(default)]
    pub cookie_spec: CookieSpec,

    /// Do not run the exposecontroller for the proxy service
    #[serde(default)]
    pub skip_expose_service: bool,

    /// URL template handed to the exposecontroller
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub url_template: Option<String>,
}

#[derive(Serialize, Deserialize, Clone, Debug, Default, JsonSchema, PartialEq)]
pub struct ProxyResources {
    pub limits: Option<ResourceSpec>,
    pub requests: Option<ResourceSpec>,
}

#[derive(Serialize, Deserialize, Clone, Debug, Default, JsonSchema, PartialEq)]
pub struct ResourceSpec {
    pub cpu: Option<String>,
    pub memory: Option<String>,
}

#[derive(Serialize, Deserialize, Clone, Debug, Default, JsonSchema, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct CookieSpec {
    #[serde(default)]
    pub name: String,
    /// Cookie lifetime, e.g. "168h0m0s"
    #[serde(default)]
    pub expire: String,
    /// Refresh interval, e.g. "60m"
    #[serde(default)]
    pub refresh: String,
    #[serde(default)]
    pub secure: bool,
    #[serde(default)]
    pub http_only: bool,
}

#[derive(Serialize, Deserialize, Clone, Debug, Default, JsonSchema, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct SSOStatus {
    /// Id of the OIDC client registered for this resource
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub client_id: Option<String>,

    #[serde(default)]
    pub initialized: bool,
}

impl SSO {
    pub fn is_initialized(&self) -> bool {
        self.status.as_ref().is_some_and(|s| s.initialized)
    }

    pub fn client_id(&self) -> Option<&str> {
        self.status.as_ref().and_then(|s| s.client_id.as_deref())
    }

    /// Namespace of the resource, which the apiserver always sets for stored SSOs
    pub fn require_namespace(&self) -> Result<String> {
        self.namespace()
            .ok_or_else(|| Error::MissingNamespace(self.name_any()))
    }
}
