use super::{operator_config, Context};
use crate::{
    crds::{SSOStatus, SSO},
    dex::OidcClient,
    error::{Error, Result},
    expose, proxy,
};
use kube::ResourceExt;
use tracing::{error, info, warn};

fn failed<'a>(
    step: &'static str,
    namespace: &'a str,
    name: &'a str,
) -> impl FnOnce(Error) -> Error + 'a {
    move |source| Error::pipeline(step, namespace, name, source)
}

/// Provision the OIDC client, proxy and exposure of `sso` and mark it initialized.
///
/// Once the OIDC client exists, any later failure deletes it again before the error
/// is returned, so a retry starts from a clean identity provider state.
pub async fn provision(sso: &SSO, ctx: &Context) -> Result<()> {
    let namespace = sso.require_namespace()?;
    let name = sso.name_any();
    info!("Provisioning SSO {}/{}", namespace, name);

    let service_account = ctx
        .resources
        .ensure_cluster_role_binding(&ctx.config.cluster_role_name, &namespace)
        .await
        .map_err(failed("binding the operator cluster role", &namespace, &name))?;

    let cookie_secret = operator_config::cookie_secret(ctx)
        .await
        .map_err(failed("loading the cookie secret", &namespace, &name))?;

    let client = ctx
        .identity
        .create_client(vec![proxy::placeholder_redirect_url()], vec![], false, &name, "")
        .await
        .map_err(failed("creating the OIDC client", &namespace, &name))?;

    let client_id = client.id.clone();
    match configure(sso, &namespace, &service_account, &cookie_secret, client, ctx).await {
        Ok(()) => {
            info!("SSO {}/{} initialized with OIDC client {}", namespace, name, client_id);
            Ok(())
        }
        Err(err) => {
            ctx.metrics.record_compensation();
            warn!("Provisioning SSO {}/{} failed, deleting OIDC client {}", namespace, name, client_id);
            if let Err(delete_err) = ctx.identity.delete_client(&client_id).await {
                error!("Failed to delete OIDC client {}: {}", client_id, delete_err);
            }
            Err(err)
        }
    }
}

async fn configure(
    sso: &SSO,
    namespace: &str,
    service_account: &str,
    cookie_secret: &str,
    mut client: OidcClient,
    ctx: &Context,
) -> Result<()> {
    let name = sso.name_any();

    let bundle = proxy::deploy(sso, &client, cookie_secret, ctx)
        .await
        .map_err(failed("deploying the proxy", namespace, &name))?;

    if sso.spec.skip_expose_service {
        info!("Not exposing proxy service of SSO {}/{}", namespace, name);
    } else {
        expose::expose(sso, &bundle.service.name_any(), service_account, ctx)
            .await
            .map_err(failed("exposing the proxy service", namespace, &name))?;
    }

    let hosts = ctx
        .resources
        .ingress_hosts(namespace, &bundle.app_name)
        .await
        .map_err(failed("resolving ingress hosts", namespace, &name))?;
    if hosts.is_empty() {
        return Err(failed("resolving ingress hosts", namespace, &name)(
            Error::NoIngressHosts {
                namespace: namespace.to_string(),
                name: bundle.app_name.clone(),
            },
        ));
    }

    client.redirect_uris = proxy::host_redirect_urls(&hosts);
    ctx.identity
        .update_client(
            &client.id,
            client.redirect_uris.clone(),
            client.trusted_peers.clone(),
            &name,
            &client.logo_url,
        )
        .await
        .map_err(failed("updating the OIDC client", namespace, &name))?;

    proxy::update(&bundle, sso, &client, cookie_secret, ctx)
        .await
        .map_err(failed("updating the proxy", namespace, &name))?;

    let status = SSOStatus {
        client_id: Some(client.id.clone()),
        initialized: true,
    };
    ctx.resources
        .patch_sso_status(namespace, &name, &status)
        .await
        .map_err(failed("updating the SSO status", namespace, &name))
}
