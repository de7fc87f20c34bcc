use super::{Context, FINALIZER};
use crate::{
    crds::SSO,
    error::{Error, Result},
    expose,
};
use kube::{runtime::controller::Action, ResourceExt};
use tracing::{debug, error, info, warn};

pub fn has_finalizer(sso: &SSO) -> bool {
    sso.finalizers().iter().any(|f| f == FINALIZER)
}

/// Add the operator finalizer so deletions wait for the cleanup pipeline
pub async fn ensure(sso: &SSO, ctx: &Context) -> Result<()> {
    if has_finalizer(sso) {
        return Ok(());
    }

    let mut finalizers = sso.finalizers().to_vec();
    finalizers.push(FINALIZER.to_string());

    ctx.resources
        .patch_sso_finalizers(&sso.require_namespace()?, &sso.name_any(), finalizers)
        .await
}

async fn remove(sso: &SSO, ctx: &Context) -> Result<()> {
    let mut finalizers = sso.finalizers().to_vec();
    finalizers.retain(|f| f != FINALIZER);

    ctx.resources
        .patch_sso_finalizers(&sso.require_namespace()?, &sso.name_any(), finalizers)
        .await
}

/// Undo what provisioning set up outside of the cluster's garbage collection.
///
/// Both steps are attempted; the first failure is returned.
async fn teardown(sso: &SSO, namespace: &str, ctx: &Context) -> Result<()> {
    let name = sso.name_any();
    let mut first_error = None;

    if !sso.spec.skip_expose_service {
        let cleaned = async {
            let service_account = ctx
                .resources
                .ensure_cluster_role_binding(&ctx.config.cluster_role_name, namespace)
                .await?;
            expose::cleanup(sso, &name, &service_account, ctx).await
        }
        .await;

        if let Err(err) = cleaned {
            warn!("Failed to clean up exposure of SSO {}/{}: {}", namespace, name, err);
            first_error = Some(Error::pipeline(
                "cleaning up the proxy exposure",
                namespace,
                &name,
                err,
            ));
        }
    }

    match sso.client_id() {
        Some(client_id) => {
            if let Err(err) = ctx.identity.delete_client(client_id).await {
                warn!("Failed to delete OIDC client {} of SSO {}/{}: {}", client_id, namespace, name, err);
                if first_error.is_none() {
                    first_error = Some(Error::pipeline(
                        "deleting the OIDC client",
                        namespace,
                        &name,
                        err,
                    ));
                }
            }
        }
        None => warn!("SSO {}/{} is initialized without a client id", namespace, name),
    }

    first_error.map_or(Ok(()), Err)
}

/// Run the cleanup pipeline of a deleted SSO and release it
pub async fn cleanup(sso: &SSO, ctx: &Context) -> Result<Action> {
    if !has_finalizer(sso) {
        debug!("SSO {} has no finalizer, nothing to clean up", sso.name_any());
        return Ok(Action::await_change());
    }

    let namespace = sso.require_namespace()?;
    info!("Cleaning up SSO {}/{}", namespace, sso.name_any());

    let result = if sso.is_initialized() {
        teardown(sso, &namespace, ctx).await
    } else {
        debug!("SSO {}/{} was never initialized", namespace, sso.name_any());
        Ok(())
    };

    // the resource is released even if cleanup failed
    remove(sso, ctx).await?;

    match result {
        Ok(()) => {
            ctx.metrics.record_cleanup();
            Ok(Action::await_change())
        }
        Err(err) => {
            error!("Cleanup of SSO {}/{} incomplete: {}", namespace, sso.name_any(), err);
            Err(err)
        }
    }
}
