use futures::StreamExt;
use k8s_openapi::api::{
    apps::v1::Deployment,
    core::v1::{Secret, Service},
};
use kube::{
    runtime::{controller::Controller, watcher::Config as WatcherConfig},
    Api, Client,
};
use sso_operator::{
    config::ControllerConfig,
    crds::SSO,
    dex::DexClient,
    health,
    reconciler::{self, Context},
    resources::KubeResources,
    telemetry::{self, Metrics},
};
use std::sync::Arc;
use tracing::{debug, error, info};

/// Namespaced API when a watch namespace is configured, cluster wide otherwise
fn scoped_api<K>(client: &Client, namespace: Option<&str>) -> Api<K>
where
    K: kube::Resource<Scope = k8s_openapi::NamespaceResourceScope>,
    <K as kube::Resource>::DynamicType: Default,
{
    match namespace {
        Some(ns) => Api::namespaced(client.clone(), ns),
        None => Api::all(client.clone()),
    }
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    telemetry::init();
    let metrics = Arc::new(Metrics::default());

    info!("Starting SSO operator");
    let config = Arc::new(ControllerConfig::from_env()?);
    info!("Configuration loaded");

    let dex = DexClient::connect(&config.dex).await?;
    info!("Connected to Dex at {}", config.dex.host_and_port);

    let client = Client::try_default().await?;
    info!("Connected to Kubernetes cluster");

    let health_port = config.health_port;
    tokio::spawn(async move {
        if let Err(e) = health::serve(health_port).await {
            error!("Liveness endpoint failed: {}", e);
        }
    });

    let watch_namespace = config.watch_namespace.clone();
    match &watch_namespace {
        Some(ns) => info!("Watching SSO resources in namespace {}", ns),
        None => info!("Watching SSO resources in all namespaces"),
    }

    let ctx = Arc::new(Context::new(
        Arc::new(KubeResources::new(client.clone())),
        Arc::new(dex),
        config,
        metrics,
    ));

    let ns = watch_namespace.as_deref();
    let ssos = scoped_api::<SSO>(&client, ns);

    // proxy objects carry an owner reference to their SSO
    let deployments = scoped_api::<Deployment>(&client, ns);
    let services = scoped_api::<Service>(&client, ns);
    let secrets = scoped_api::<Secret>(&client, ns);

    info!("Starting controller loop");
    Controller::new(ssos, WatcherConfig::default())
        .owns(deployments, WatcherConfig::default())
        .owns(services, WatcherConfig::default())
        .owns(secrets, WatcherConfig::default())
        .shutdown_on_signal()
        .run(reconciler::reconcile, reconciler::error_policy, ctx)
        .for_each(|res| async move {
            match res {
                Ok(o) => debug!("Reconciled: {:?}", o),
                // the SSO was likely deleted while queued
                Err(kube::runtime::controller::Error::ObjectNotFound(_)) => {}
                Err(e) => tracing::warn!("[!] Reconciliation error: {:?}", e),
            }
        })
        .await;

    Ok(())
}
