use crate::{
    error::{Error, Result},
    resources::labels,
};
use k8s_openapi::api::{
    core::v1::ServiceAccount,
    rbac::v1::{ClusterRoleBinding, Subject},
};
use kube::{
    api::{Api, ListParams, ObjectMeta, PostParams},
    Client, ResourceExt,
};
use tracing::{debug, info};

/// Service account created in namespaces that have none bound yet
pub const SERVICE_ACCOUNT_NAME: &str = "sso-operator-sa";

const SUBJECT_KIND: &str = "ServiceAccount";
const ROLE_KIND: &str = "ClusterRole";

pub fn binds_cluster_role(binding: &ClusterRoleBinding, cluster_role: &str) -> bool {
    binding.role_ref.kind == ROLE_KIND && binding.role_ref.name == cluster_role
}

/// Name of a service account from `namespace` already bound by `binding`
pub fn bound_service_account(binding: &ClusterRoleBinding, namespace: &str) -> Option<String> {
    binding
        .subjects
        .iter()
        .flatten()
        .find(|s| s.kind == SUBJECT_KIND && s.namespace.as_deref() == Some(namespace))
        .map(|s| s.name.clone())
}

fn service_account_subject(namespace: &str) -> Subject {
    Subject {
        kind: SUBJECT_KIND.to_string(),
        name: SERVICE_ACCOUNT_NAME.to_string(),
        namespace: Some(namespace.to_string()),
        ..Default::default()
    }
}

/// Make sure a service account of `namespace` is bound to `cluster_role` and return its name.
///
/// The binding itself is installed together with the operator; only subjects are added here.
pub async fn ensure_binding(client: &Client, cluster_role: &str, namespace: &str) -> Result<String> {
    let bindings: Api<ClusterRoleBinding> = Api::all(client.clone());

    let mut binding = bindings
        .list(&ListParams::default())
        .await?
        .items
        .into_iter()
        .find(|b| binds_cluster_role(b, cluster_role))
        .ok_or_else(|| Error::ClusterRoleBindingNotFound(cluster_role.to_string()))?;

    if let Some(name) = bound_service_account(&binding, namespace) {
        debug!("Service account {}/{} already bound to {}", namespace, name, cluster_role);
        return Ok(name);
    }

    ensure_service_account(client, namespace).await?;

    binding
        .subjects
        .get_or_insert_with(Vec::new)
        .push(service_account_subject(namespace));
    bindings
        .replace(&binding.name_any(), &PostParams::default(), &binding)
        .await?;

    info!(
        "Bound service account {}/{} to cluster role {}",
        namespace, SERVICE_ACCOUNT_NAME, cluster_role
    );
    Ok(SERVICE_ACCOUNT_NAME.to_string())
}

async fn ensure_service_account(client: &Client, namespace: &str) -> Result<()> {
    let api: Api<ServiceAccount> = Api::namespaced(client.clone(), namespace);

    let sa = ServiceAccount {
        metadata: ObjectMeta {
            name: Some(SERVICE_ACCOUNT_NAME.to_string()),
            namespace: Some(namespace.to_string()),
            labels: Some(labels::common_labels()),
            ..Default::default()
        },
        ..Default::default()
    };

    match api.create(&PostParams::default(), &sa).await {
        Ok(_) => {
            info!("Created service account {} in {}", SERVICE_ACCOUNT_NAME, namespace);
            Ok(())
        }
        Err(kube::Error::Api(ae)) if ae.code == 409 => {
            info!("Service account {} already exists", SERVICE_ACCOUNT_NAME);
            Ok(())
        }
        Err(e) => Err(e.into()),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use k8s_openapi::api::rbac::v1::RoleRef;

    fn binding(role_kind: &str, role: &str, subjects: Vec<Subject>) -> ClusterRoleBinding {
        ClusterRoleBinding {
            metadata: ObjectMeta {
                name: Some("sso-operator".to_string()),
                ..Default::default()
            },
            role_ref: RoleRef {
                api_group: "rbac.authorization.k8s.io".to_string(),
                kind: role_kind.to_string(),
                name: role.to_string(),
            },
            subjects: Some(subjects),
        }
    }

    #[test]
    fn test_binds_cluster_role() {
        assert!(binds_cluster_role(&binding("ClusterRole", "sso", vec![]), "sso"));
        assert!(!binds_cluster_role(&binding("ClusterRole", "other", vec![]), "sso"));
        assert!(!binds_cluster_role(&binding("Role", "sso", vec![]), "sso"));
    }

    #[test]
    fn test_bound_service_account_matches_namespace() {
        let b = binding(
            "ClusterRole",
            "sso",
            vec![
                Subject {
                    kind: "User".to_string(),
                    name: "admin".to_string(),
                    namespace: Some("jx".to_string()),
                    ..Default::default()
                },
                Subject {
                    kind: "ServiceAccount".to_string(),
                    name: "existing-sa".to_string(),
                    namespace: Some("jx".to_string()),
                    ..Default::default()
                },
            ],
        );
        assert_eq!(bound_service_account(&b, "jx").as_deref(), Some("existing-sa"));
        assert_eq!(bound_service_account(&b, "staging"), None);
    }

    #[test]
    fn test_service_account_subject() {
        let subject = service_account_subject("staging");
        assert_eq!(subject.kind, "ServiceAccount");
        assert_eq!(subject.name, SERVICE_ACCOUNT_NAME);
        assert_eq!(subject.namespace.as_deref(), Some("staging"));
    }
}
