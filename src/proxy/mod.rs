use crate::{
    crds::{ProxyResources, ResourceSpec, SSO},
    dex::OidcClient,
    error::{Error, Result},
    reconciler::Context,
    resources::labels::{self, APP_LABEL, RELEASE_LABEL},
    utils, wait,
};
use k8s_openapi::{
    api::{
        apps::v1::{Deployment, DeploymentSpec, DeploymentStrategy, RollingUpdateDeployment},
        core::v1::{
            Container, ContainerPort, EnvVar, HTTPGetAction, Pod, PodSpec, PodTemplateSpec, Probe,
            ResourceRequirements, Secret, SecretVolumeSource, Service, ServicePort, ServiceSpec,
            Volume, VolumeMount,
        },
    },
    apimachinery::pkg::{
        api::resource::Quantity, apis::meta::v1::LabelSelector, util::intstr::IntOrString,
    },
    ByteString,
};
use kube::{api::ObjectMeta, Resource, ResourceExt};
use std::collections::BTreeMap;
use tracing::info;

pub mod config;

/// Env var carrying the config fingerprint; changing it rolls the proxy pods
pub const CONFIG_FINGERPRINT_ENV: &str = "SECRET_VERSION";
pub const PROXY_PORT: i32 = 4180;

const CONFIG_MOUNT_PATH: &str = "/config";
const CONFIG_VOLUME_NAME: &str = "proxy-config";
const PORT_NAME: &str = "proxy-port";
const HEALTH_PATH: &str = "/ping";
const REPLICAS: i32 = 1;
const PUBLIC_PORT: i32 = 80;
const PLACEHOLDER_URL: &str = "https://fake-oauth2-proxy";

/// The Kubernetes objects making up the proxy of one SSO
#[derive(Clone, Debug)]
pub struct ProxyBundle {
    pub app_name: String,
    pub upstream_url: String,
    pub secret: Secret,
    pub deployment: Deployment,
    pub service: Service,
}

/// OAuth2 callback URL of a proxy reachable at `base`
pub fn redirect_url(base: &str) -> String {
    format!("{}/oauth2/callback", base.trim_end_matches('/'))
}

/// Callback URL used until the proxy's real hosts are known
pub fn placeholder_redirect_url() -> String {
    redirect_url(PLACEHOLDER_URL)
}

pub fn host_redirect_urls(hosts: &[String]) -> Vec<String> {
    hosts
        .iter()
        .map(|host| redirect_url(&format!("https://{}", host)))
        .collect()
}

/// Application name of an upstream service.
///
/// Taken from the `app` label, else the service name without its helm release prefix.
pub fn app_name(service: &Service) -> String {
    let name = service.name_any();
    let labels = service.labels();

    if let Some(app) = labels.get(APP_LABEL).filter(|app| !app.is_empty()) {
        return app.clone();
    }
    match labels.get(RELEASE_LABEL).filter(|release| !release.is_empty()) {
        Some(release) => name.replacen(&format!("{}-", release), "", 1),
        None => name,
    }
}

/// In-cluster URL of the first port of an upstream service
pub fn upstream_url(service: &Service) -> Result<String> {
    let port = service
        .spec
        .as_ref()
        .and_then(|spec| spec.ports.as_ref())
        .and_then(|ports| ports.first())
        .ok_or_else(|| {
            Error::ProxyConfig(format!("upstream service {} exposes no ports", service.name_any()))
        })?;
    Ok(format!("http://{}:{}", service.name_any(), port.port))
}

pub fn secret_name(sso: &SSO) -> String {
    utils::build_name(&sso.name_any(), "proxy-config")
}

pub fn deployment_name(sso: &SSO, namespace: &str) -> String {
    utils::build_name(&sso.name_any(), namespace)
}

fn metadata(sso: &SSO, name: String, namespace: &str, app_name: &str) -> ObjectMeta {
    ObjectMeta {
        name: Some(name),
        namespace: Some(namespace.to_string()),
        labels: Some(labels::proxy_labels(&sso.name_any(), app_name)),
        owner_references: sso.controller_owner_ref(&()).map(|owner| vec![owner]),
        ..Default::default()
    }
}

/// Build every proxy object from the rendered configuration
pub fn build_bundle(
    sso: &SSO,
    app_name: &str,
    upstream_url: &str,
    data: BTreeMap<String, String>,
) -> Result<ProxyBundle> {
    let namespace = sso.require_namespace()?;
    let fingerprint = config::fingerprint(&data);

    let secret = Secret {
        metadata: metadata(sso, secret_name(sso), &namespace, app_name),
        data: Some(
            data.into_iter()
                .map(|(key, value)| (key, ByteString(value.into_bytes())))
                .collect(),
        ),
        ..Default::default()
    };

    Ok(ProxyBundle {
        app_name: app_name.to_string(),
        upstream_url: upstream_url.to_string(),
        deployment: build_deployment(sso, &namespace, app_name, &fingerprint),
        service: build_service(sso, &namespace, app_name),
        secret,
    })
}

fn quantities(spec: Option<&ResourceSpec>) -> Option<BTreeMap<String, Quantity>> {
    let spec = spec?;
    let quantities: BTreeMap<_, _> = [("cpu", &spec.cpu), ("memory", &spec.memory)]
        .into_iter()
        .filter_map(|(name, value)| Some((name.to_string(), Quantity(value.clone()?))))
        .collect();
    (!quantities.is_empty()).then_some(quantities)
}

fn resource_requirements(resources: &ProxyResources) -> ResourceRequirements {
    ResourceRequirements {
        limits: quantities(resources.limits.as_ref()),
        requests: quantities(resources.requests.as_ref()),
        ..Default::default()
    }
}

fn http_check(initial_delay: i32, timeout: i32, period: i32, failure_threshold: i32) -> Probe {
    Probe {
        http_get: Some(HTTPGetAction {
            path: Some(HEALTH_PATH.to_string()),
            port: IntOrString::Int(PROXY_PORT),
            scheme: Some("HTTP".to_string()),
            ..Default::default()
        }),
        initial_delay_seconds: Some(initial_delay),
        timeout_seconds: Some(timeout),
        period_seconds: Some(period),
        failure_threshold: Some(failure_threshold),
        ..Default::default()
    }
}

fn build_deployment(sso: &SSO, namespace: &str, app_name: &str, fingerprint: &str) -> Deployment {
    let sso_name = sso.name_any();
    let selector = labels::proxy_selector_labels(&sso_name, app_name);

    let container = Container {
        name: sso_name.clone(),
        image: Some(format!("{}:{}", sso.spec.proxy_image, sso.spec.proxy_image_tag)),
        image_pull_policy: Some("IfNotPresent".to_string()),
        args: Some(vec![format!(
            "--config={}/{}",
            CONFIG_MOUNT_PATH,
            config::CONFIG_FILE
        )]),
        ports: Some(vec![ContainerPort {
            name: Some(PORT_NAME.to_string()),
            container_port: PROXY_PORT,
            protocol: Some("TCP".to_string()),
            ..Default::default()
        }]),
        env: Some(vec![EnvVar {
            name: CONFIG_FINGERPRINT_ENV.to_string(),
            value: Some(fingerprint.to_string()),
            ..Default::default()
        }]),
        resources: Some(resource_requirements(&sso.spec.proxy_resources)),
        volume_mounts: Some(vec![VolumeMount {
            name: CONFIG_VOLUME_NAME.to_string(),
            mount_path: CONFIG_MOUNT_PATH.to_string(),
            read_only: Some(true),
            ..Default::default()
        }]),
        liveness_probe: Some(http_check(60, 10, 60, 3)),
        readiness_probe: Some(http_check(30, 10, 10, 3)),
        ..Default::default()
    };

    Deployment {
        metadata: metadata(sso, deployment_name(sso, namespace), namespace, app_name),
        spec: Some(DeploymentSpec {
            replicas: Some(REPLICAS),
            selector: LabelSelector {
                match_labels: Some(selector.clone()),
                ..Default::default()
            },
            strategy: Some(DeploymentStrategy {
                type_: Some("RollingUpdate".to_string()),
                rolling_update: Some(RollingUpdateDeployment {
                    max_surge: Some(IntOrString::Int(1)),
                    max_unavailable: Some(IntOrString::Int(1)),
                }),
            }),
            template: PodTemplateSpec {
                metadata: Some(ObjectMeta {
                    labels: Some(labels::proxy_labels(&sso_name, app_name)),
                    ..Default::default()
                }),
                spec: Some(PodSpec {
                    containers: vec![container],
                    volumes: Some(vec![Volume {
                        name: CONFIG_VOLUME_NAME.to_string(),
                        secret: Some(SecretVolumeSource {
                            secret_name: Some(secret_name(sso)),
                            ..Default::default()
                        }),
                        ..Default::default()
                    }]),
                    ..Default::default()
                }),
            },
            ..Default::default()
        }),
        ..Default::default()
    }
}

fn service_annotations(sso: &SSO, app_name: &str) -> BTreeMap<String, String> {
    BTreeMap::from([
        ("fabric8.io/expose".to_string(), "true".to_string()),
        ("fabric8.io/ingress.name".to_string(), app_name.to_string()),
        (
            "fabric8.io/ingress.annotations".to_string(),
            format!(
                "kubernetes.io/ingress.class: nginx\ncertmanager.k8s.io/issuer: {}",
                sso.spec.cert_issuer_name
            ),
        ),
    ])
}

fn build_service(sso: &SSO, namespace: &str, app_name: &str) -> Service {
    let mut metadata = metadata(sso, sso.name_any(), namespace, app_name);
    metadata.annotations = Some(service_annotations(sso, app_name));

    Service {
        metadata,
        spec: Some(ServiceSpec {
            selector: Some(labels::proxy_selector_labels(&sso.name_any(), app_name)),
            ports: Some(vec![ServicePort {
                name: Some(PORT_NAME.to_string()),
                port: PUBLIC_PORT,
                protocol: Some("TCP".to_string()),
                target_port: Some(IntOrString::Int(PROXY_PORT)),
                ..Default::default()
            }]),
            ..Default::default()
        }),
        ..Default::default()
    }
}

async fn apply_and_wait(bundle: &ProxyBundle, sso: &SSO, namespace: &str, ctx: &Context) -> Result<()> {
    let resources = ctx.resources.as_ref();
    let timeouts = &ctx.config.timeouts;

    resources.apply_secret(&bundle.secret).await?;
    resources.apply_deployment(&bundle.deployment).await?;
    resources.apply_service(&bundle.service).await?;

    wait::wait_for_service(resources, namespace, &bundle.service.name_any(), true, timeouts.service)
        .await?;
    wait::wait_for_pods_with_label_running(
        resources,
        namespace,
        &labels::proxy_pod_selector(&sso.name_any()),
        timeouts.pods,
    )
    .await
}

/// Stand up the proxy for `sso` using `client` and wait until it is running
pub async fn deploy(
    sso: &SSO,
    client: &OidcClient,
    cookie_secret: &str,
    ctx: &Context,
) -> Result<ProxyBundle> {
    let namespace = sso.require_namespace()?;
    let upstream = ctx
        .resources
        .get_service(&namespace, &sso.spec.upstream_service)
        .await?
        .ok_or_else(|| Error::ServiceNotFound {
            namespace: namespace.clone(),
            name: sso.spec.upstream_service.clone(),
        })?;

    let app_name = app_name(&upstream);
    let upstream_url = upstream_url(&upstream)?;
    let rendered = config::render(sso, client, cookie_secret, &upstream_url, PROXY_PORT)?;
    let bundle = build_bundle(sso, &app_name, &upstream_url, config::secret_data(rendered))?;

    apply_and_wait(&bundle, sso, &namespace, ctx).await?;
    info!("Deployed proxy {} for {} in {}", bundle.deployment.name_any(), app_name, namespace);
    Ok(bundle)
}

/// Rewrite the proxy configuration for `client` and roll the proxy pods
pub async fn update(
    bundle: &ProxyBundle,
    sso: &SSO,
    client: &OidcClient,
    cookie_secret: &str,
    ctx: &Context,
) -> Result<ProxyBundle> {
    let namespace = sso.require_namespace()?;
    let rendered = config::render(sso, client, cookie_secret, &bundle.upstream_url, PROXY_PORT)?;
    let updated = build_bundle(
        sso,
        &bundle.app_name,
        &bundle.upstream_url,
        config::secret_data(rendered),
    )?;

    let resources = ctx.resources.as_ref();
    resources.apply_secret(&updated.secret).await?;
    resources.apply_deployment(&updated.deployment).await?;

    let deployment_name = updated.deployment.name_any();
    wait::wait_for_deployment_stable(resources, &namespace, &deployment_name, ctx.config.timeouts.deployment)
        .await?;
    let fingerprint = deployed_fingerprint(&updated.deployment).map(str::to_string);
    wait::wait_for_current_pods_running(
        resources,
        &namespace,
        &labels::proxy_pod_selector(&sso.name_any()),
        |pod| pod_fingerprint(pod) == fingerprint.as_deref(),
        ctx.config.timeouts.pods,
    )
    .await?;

    info!("Updated proxy {} in {}", deployment_name, namespace);
    Ok(updated)
}

fn container_fingerprint(spec: &PodSpec) -> Option<&str> {
    spec.containers
        .iter()
        .flat_map(|c| c.env.iter().flatten())
        .find(|env| env.name == CONFIG_FINGERPRINT_ENV)
        .and_then(|env| env.value.as_deref())
}

/// Fingerprint a proxy deployment was rolled out with
pub fn deployed_fingerprint(deployment: &Deployment) -> Option<&str> {
    container_fingerprint(deployment.spec.as_ref()?.template.spec.as_ref()?)
}

/// Fingerprint of the configuration a proxy pod was started with
pub fn pod_fingerprint(pod: &Pod) -> Option<&str> {
    container_fingerprint(pod.spec.as_ref()?)
}
