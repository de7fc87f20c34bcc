use crate::{
    crds::{SSOStatus, SSO},
    error::{Error, Result},
};
use async_trait::async_trait;
use k8s_openapi::{
    api::{
        apps::v1::Deployment,
        batch::v1::Job,
        core::v1::{ConfigMap, Pod, Secret, Service},
    },
    NamespaceResourceScope,
};
use kube::{
    api::{Api, DeleteParams, ListParams, Patch, PatchParams, PostParams},
    Client, Resource, ResourceExt,
};
use serde::{de::DeserializeOwned, Serialize};
use std::fmt::Debug;
use tracing::{debug, info};

#[cfg(test)]
use mockall::automock;

pub mod ingress;
pub mod labels;
pub mod rbac;

/// Server-side apply field manager for everything the operator writes
pub const FIELD_MANAGER: &str = "sso-operator";

/// Kubernetes operations the reconciler needs.
///
/// Keeps the provisioning pipeline testable without a cluster.
#[cfg_attr(test, automock)]
#[async_trait]
pub trait ResourceProvisioner: Send + Sync {
    /// Fresh read of an SSO, bypassing any watch cache
    async fn get_sso(&self, namespace: &str, name: &str) -> Result<Option<SSO>>;

    async fn patch_sso_status(&self, namespace: &str, name: &str, status: &SSOStatus) -> Result<()>;

    async fn patch_sso_finalizers(
        &self,
        namespace: &str,
        name: &str,
        finalizers: Vec<String>,
    ) -> Result<()>;

    /// Bind a service account of `namespace` to `cluster_role`, returning its name
    async fn ensure_cluster_role_binding(&self, cluster_role: &str, namespace: &str) -> Result<String>;

    async fn get_service(&self, namespace: &str, name: &str) -> Result<Option<Service>>;

    async fn apply_service(&self, service: &Service) -> Result<()>;

    async fn get_secret(&self, namespace: &str, name: &str) -> Result<Option<Secret>>;

    async fn apply_secret(&self, secret: &Secret) -> Result<()>;

    async fn create_secret(&self, secret: &Secret) -> Result<()>;

    async fn get_deployment(&self, namespace: &str, name: &str) -> Result<Option<Deployment>>;

    async fn apply_deployment(&self, deployment: &Deployment) -> Result<()>;

    async fn list_pods(&self, namespace: &str, label_selector: &str) -> Result<Vec<Pod>>;

    async fn apply_config_map(&self, config_map: &ConfigMap) -> Result<()>;

    async fn delete_config_map(&self, namespace: &str, name: &str) -> Result<()>;

    /// Create a job, failing with a conflict if one of the same name exists
    async fn create_job(&self, job: &Job) -> Result<()>;

    async fn get_job(&self, namespace: &str, name: &str) -> Result<Option<Job>>;

    /// Delete a job and let the garbage collector remove its pods
    async fn delete_job(&self, namespace: &str, name: &str) -> Result<()>;

    /// Hosts of the ingress `name`
    async fn ingress_hosts(&self, namespace: &str, name: &str) -> Result<Vec<String>>;
}

/// [`ResourceProvisioner`] backed by the Kubernetes API
#[derive(Clone)]
pub struct KubeResources {
    client: Client,
}

impl KubeResources {
    pub fn new(client: Client) -> Self {
        Self { client }
    }

    fn api<K>(&self, namespace: &str) -> Api<K>
    where
        K: Resource<Scope = NamespaceResourceScope>,
        <K as Resource>::DynamicType: Default,
    {
        Api::namespaced(self.client.clone(), namespace)
    }

    fn api_for<K>(&self, obj: &K) -> Result<Api<K>>
    where
        K: Resource<Scope = NamespaceResourceScope>,
        <K as Resource>::DynamicType: Default,
    {
        let namespace = obj
            .meta()
            .namespace
            .as_deref()
            .ok_or_else(|| Error::MissingNamespace(obj.name_any()))?;
        Ok(self.api(namespace))
    }

    async fn apply<K>(&self, obj: &K) -> Result<()>
    where
        K: Resource<Scope = NamespaceResourceScope, DynamicType = ()>
            + Clone
            + Debug
            + Serialize
            + DeserializeOwned,
    {
        let api = self.api_for(obj)?;
        let name = obj.name_any();
        api.patch(
            &name,
            &PatchParams::apply(FIELD_MANAGER).force(),
            &Patch::Apply(obj),
        )
        .await?;
        info!("Applied {} {}/{}", K::kind(&()), obj.namespace().unwrap_or_default(), name);
        Ok(())
    }

    async fn delete<K>(&self, namespace: &str, name: &str, params: &DeleteParams) -> Result<()>
    where
        K: Resource<Scope = NamespaceResourceScope, DynamicType = ()>
            + Clone
            + Debug
            + DeserializeOwned,
    {
        match self.api::<K>(namespace).delete(name, params).await {
            Ok(_) => {
                info!("Deleted {} {}/{}", K::kind(&()), namespace, name);
                Ok(())
            }
            Err(kube::Error::Api(ae)) if ae.code == 404 => {
                debug!("{} {}/{} already deleted", K::kind(&()), namespace, name);
                Ok(())
            }
            Err(e) => Err(e.into()),
        }
    }
}

#[async_trait]
impl ResourceProvisioner for KubeResources {
    async fn get_sso(&self, namespace: &str, name: &str) -> Result<Option<SSO>> {
        Ok(self.api::<SSO>(namespace).get_opt(name).await?)
    }

    async fn patch_sso_status(&self, namespace: &str, name: &str, status: &SSOStatus) -> Result<()> {
        let patch = serde_json::json!({ "status": status });
        self.api::<SSO>(namespace)
            .patch_status(name, &PatchParams::default(), &Patch::Merge(&patch))
            .await?;
        Ok(())
    }

    async fn patch_sso_finalizers(
        &self,
        namespace: &str,
        name: &str,
        finalizers: Vec<String>,
    ) -> Result<()> {
        let patch = serde_json::json!({
            "metadata": {
                "finalizers": finalizers
            }
        });
        self.api::<SSO>(namespace)
            .patch(name, &PatchParams::default(), &Patch::Merge(&patch))
            .await?;
        Ok(())
    }

    async fn ensure_cluster_role_binding(&self, cluster_role: &str, namespace: &str) -> Result<String> {
        rbac::ensure_binding(&self.client, cluster_role, namespace).await
    }

    async fn get_service(&self, namespace: &str, name: &str) -> Result<Option<Service>> {
        Ok(self.api::<Service>(namespace).get_opt(name).await?)
    }

    async fn apply_service(&self, service: &Service) -> Result<()> {
        self.apply(service).await
    }

    async fn get_secret(&self, namespace: &str, name: &str) -> Result<Option<Secret>> {
        Ok(self.api::<Secret>(namespace).get_opt(name).await?)
    }

    async fn apply_secret(&self, secret: &Secret) -> Result<()> {
        self.apply(secret).await
    }

    async fn create_secret(&self, secret: &Secret) -> Result<()> {
        self.api_for(secret)?
            .create(&PostParams::default(), secret)
            .await?;
        info!("Created secret {}", secret.name_any());
        Ok(())
    }

    async fn get_deployment(&self, namespace: &str, name: &str) -> Result<Option<Deployment>> {
        Ok(self.api::<Deployment>(namespace).get_opt(name).await?)
    }

    async fn apply_deployment(&self, deployment: &Deployment) -> Result<()> {
        self.apply(deployment).await
    }

    async fn list_pods(&self, namespace: &str, label_selector: &str) -> Result<Vec<Pod>> {
        let pods = self
            .api::<Pod>(namespace)
            .list(&ListParams::default().labels(label_selector))
            .await?;
        Ok(pods.items)
    }

    async fn apply_config_map(&self, config_map: &ConfigMap) -> Result<()> {
        self.apply(config_map).await
    }

    async fn delete_config_map(&self, namespace: &str, name: &str) -> Result<()> {
        self.delete::<ConfigMap>(namespace, name, &DeleteParams::default())
            .await
    }

    async fn create_job(&self, job: &Job) -> Result<()> {
        self.api_for(job)?.create(&PostParams::default(), job).await?;
        info!("Created job {}/{}", job.namespace().unwrap_or_default(), job.name_any());
        Ok(())
    }

    async fn get_job(&self, namespace: &str, name: &str) -> Result<Option<Job>> {
        Ok(self.api::<Job>(namespace).get_opt(name).await?)
    }

    async fn delete_job(&self, namespace: &str, name: &str) -> Result<()> {
        self.delete::<Job>(namespace, name, &DeleteParams::background())
            .await
    }

    async fn ingress_hosts(&self, namespace: &str, name: &str) -> Result<Vec<String>> {
        ingress::hosts(&self.client, namespace, name).await
    }
}
