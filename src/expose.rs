use crate::{
    config::Polling,
    crds::SSO,
    error::Result,
    reconciler::Context,
    resources::labels,
    utils, wait,
};
use k8s_openapi::api::{
    batch::v1::{Job, JobSpec},
    core::v1::{
        ConfigMap, ConfigMapVolumeSource, Container, EnvVar, PodSpec, PodTemplateSpec, Volume,
        VolumeMount,
    },
};
use kube::{api::ObjectMeta, Resource, ResourceExt};
use serde::Serialize;
use std::collections::BTreeMap;
use tracing::{info, warn};

const IMAGE: &str = "jenkinsxio/exposecontroller:latest";
const COMMAND: &str = "/exposecontroller";
const CONFIG_DIR: &str = "/etc/exposecontroller";
const CONFIG_FILE: &str = "config.yml";
const CONFIG_VOLUME_NAME: &str = "expose-config";
const EXPOSER: &str = "Ingress";

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum ExposeMode {
    Expose,
    Cleanup,
}

impl ExposeMode {
    fn as_str(self) -> &'static str {
        match self {
            ExposeMode::Expose => "expose",
            ExposeMode::Cleanup => "cleanup",
        }
    }

    fn args(self, service: &str) -> Vec<String> {
        let config = format!("--config={}/{}", CONFIG_DIR, CONFIG_FILE);
        match self {
            ExposeMode::Expose => vec![config, "--v".to_string(), "4".to_string()],
            ExposeMode::Cleanup => vec![
                config,
                "--cleanup".to_string(),
                format!("--filter={}", service),
            ],
        }
    }

    fn polling(self, ctx: &Context) -> Polling {
        match self {
            ExposeMode::Expose => ctx.config.timeouts.expose,
            ExposeMode::Cleanup => ctx.config.timeouts.cleanup,
        }
    }
}

/// Configuration file read by the exposecontroller
#[derive(Serialize, Debug, Default, PartialEq)]
pub struct ExposeConfig {
    #[serde(skip_serializing_if = "String::is_empty")]
    pub domain: String,
    pub exposer: String,
    #[serde(rename = "path-mode")]
    pub path_mode: String,
    pub http: bool,
    #[serde(rename = "tls-acme")]
    pub tls_acme: bool,
    #[serde(skip_serializing_if = "Vec::is_empty")]
    pub services: Vec<String>,
    #[serde(rename = "urltemplate", skip_serializing_if = "Option::is_none")]
    pub url_template: Option<String>,
}

impl ExposeConfig {
    pub fn for_service(sso: &SSO, service: &str) -> Self {
        Self {
            domain: sso.spec.domain.clone(),
            exposer: EXPOSER.to_string(),
            path_mode: String::new(),
            http: false,
            tls_acme: true,
            services: vec![service.to_string()],
            url_template: sso.spec.url_template.clone(),
        }
    }
}

pub fn config_map_name(sso: &SSO) -> String {
    utils::build_name(&sso.name_any(), "expose-config")
}

pub fn job_name(sso: &SSO, namespace: &str, mode: ExposeMode) -> String {
    utils::build_name(&utils::build_name(&sso.name_any(), namespace), mode.as_str())
}

fn metadata(sso: &SSO, name: String, namespace: &str) -> ObjectMeta {
    ObjectMeta {
        name: Some(name),
        namespace: Some(namespace.to_string()),
        labels: Some(labels::common_labels()),
        owner_references: sso.controller_owner_ref(&()).map(|owner| vec![owner]),
        ..Default::default()
    }
}

pub fn build_config_map(sso: &SSO, namespace: &str, service: &str) -> Result<ConfigMap> {
    let config = serde_yaml::to_string(&ExposeConfig::for_service(sso, service))?;
    Ok(ConfigMap {
        metadata: metadata(sso, config_map_name(sso), namespace),
        data: Some(BTreeMap::from([(CONFIG_FILE.to_string(), config)])),
        ..Default::default()
    })
}

pub fn build_job(
    sso: &SSO,
    namespace: &str,
    service: &str,
    service_account: &str,
    mode: ExposeMode,
) -> Job {
    let container = Container {
        name: utils::build_name(&sso.name_any(), mode.as_str()),
        image: Some(IMAGE.to_string()),
        image_pull_policy: Some("IfNotPresent".to_string()),
        command: Some(vec![COMMAND.to_string()]),
        args: Some(mode.args(service)),
        env: Some(vec![EnvVar {
            name: "KUBERNETES_NAMESPACE".to_string(),
            value: Some(namespace.to_string()),
            ..Default::default()
        }]),
        volume_mounts: Some(vec![VolumeMount {
            name: CONFIG_VOLUME_NAME.to_string(),
            mount_path: CONFIG_DIR.to_string(),
            read_only: Some(true),
            ..Default::default()
        }]),
        ..Default::default()
    };

    Job {
        metadata: metadata(sso, job_name(sso, namespace, mode), namespace),
        spec: Some(JobSpec {
            template: PodTemplateSpec {
                metadata: Some(ObjectMeta {
                    labels: Some(labels::common_labels()),
                    ..Default::default()
                }),
                spec: Some(PodSpec {
                    service_account_name: Some(service_account.to_string()),
                    restart_policy: Some("Never".to_string()),
                    containers: vec![container],
                    volumes: Some(vec![Volume {
                        name: CONFIG_VOLUME_NAME.to_string(),
                        config_map: Some(ConfigMapVolumeSource {
                            name: config_map_name(sso),
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

async fn run(
    sso: &SSO,
    service: &str,
    service_account: &str,
    mode: ExposeMode,
    ctx: &Context,
) -> Result<()> {
    let namespace = sso.require_namespace()?;
    let resources = ctx.resources.as_ref();

    let config_map = build_config_map(sso, &namespace, service)?;
    resources.apply_config_map(&config_map).await?;

    let job = build_job(sso, &namespace, service, service_account, mode);
    let job_name = job.name_any();
    if let Err(err) = resources.create_job(&job).await {
        if err.is_conflict() {
            // a previous attempt left its job behind; clear it for the next one
            warn!("Job {}/{} already exists, deleting it", namespace, job_name);
            resources.delete_job(&namespace, &job_name).await?;
        }
        return Err(err);
    }

    wait::wait_for_job_complete(resources, &namespace, &job_name, mode.polling(ctx)).await?;

    resources.delete_job(&namespace, &job_name).await?;
    resources
        .delete_config_map(&namespace, &config_map.name_any())
        .await?;

    info!("Finished {} of service {}/{}", mode.as_str(), namespace, service);
    Ok(())
}

/// Create an ingress for `service`
pub async fn expose(sso: &SSO, service: &str, service_account: &str, ctx: &Context) -> Result<()> {
    run(sso, service, service_account, ExposeMode::Expose, ctx).await
}

/// Remove the ingress of `service`
pub async fn cleanup(sso: &SSO, service: &str, service_account: &str, ctx: &Context) -> Result<()> {
    run(sso, service, service_account, ExposeMode::Cleanup, ctx).await
}
