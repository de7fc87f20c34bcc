use crate::{
    config::ControllerConfig,
    crds::SSO,
    dex::IdentityProvider,
    error::{Error, Result},
    resources::ResourceProvisioner,
    telemetry::Metrics,
};
use kube::{runtime::controller::Action, Resource, ResourceExt};
use std::{sync::Arc, time::Duration};
use tokio::sync::OnceCell;
use tracing::{debug, error, info, instrument};

pub mod finalizer;
pub mod guard;
pub mod operator_config;
pub mod provision;

pub use guard::{InFlight, SsoKey};

pub const FINALIZER: &str = "sso.jenkins.io/finalizer";

#[derive(Clone)]
pub struct Context {
    pub resources: Arc<dyn ResourceProvisioner>,
    pub identity: Arc<dyn IdentityProvider>,
    pub config: Arc<ControllerConfig>,
    pub metrics: Arc<Metrics>,
    pub in_flight: Arc<InFlight>,
    /// Cookie signing secret, loaded on first use
    pub cookie_secret: Arc<OnceCell<String>>,
}

impl Context {
    pub fn new(
        resources: Arc<dyn ResourceProvisioner>,
        identity: Arc<dyn IdentityProvider>,
        config: Arc<ControllerConfig>,
        metrics: Arc<Metrics>,
    ) -> Self {
        Self {
            resources,
            identity,
            config,
            metrics,
            in_flight: Arc::new(InFlight::new()),
            cookie_secret: Arc::new(OnceCell::new()),
        }
    }
}

/// What a change to an SSO asks of the operator
#[derive(Debug)]
pub enum SsoEvent {
    /// Created or updated
    Apply(SSO),
    /// Marked for deletion
    Cleanup(SSO),
}

impl From<SSO> for SsoEvent {
    fn from(sso: SSO) -> Self {
        if sso.meta().deletion_timestamp.is_some() {
            SsoEvent::Cleanup(sso)
        } else {
            SsoEvent::Apply(sso)
        }
    }
}

#[instrument(skip(sso, ctx), fields(sso = %sso.name_any(), namespace = %sso.namespace().unwrap_or_default()))]
pub async fn reconcile(sso: Arc<SSO>, ctx: Arc<Context>) -> Result<Action> {
    ctx.metrics.record_reconcile();
    let key = SsoKey::from_resource(&sso)?;

    let Some(_guard) = ctx.in_flight.try_acquire(key.clone()) else {
        debug!("SSO {} is already being reconciled, dropping event", key);
        ctx.metrics.record_duplicate();
        return Ok(Action::await_change());
    };

    info!("Reconciling SSO {}", key);

    // Decide on a fresh copy; the watch cache may predate a finished provisioning
    let Some(current) = ctx.resources.get_sso(&key.namespace, &key.name).await? else {
        debug!("SSO {} no longer exists", key);
        return Ok(Action::await_change());
    };

    match SsoEvent::from(current) {
        SsoEvent::Cleanup(sso) => finalizer::cleanup(&sso, &ctx).await,
        SsoEvent::Apply(sso) => apply(&sso, &ctx).await,
    }
}

async fn apply(sso: &SSO, ctx: &Context) -> Result<Action> {
    if sso.is_initialized() {
        debug!("SSO {} is already initialized", sso.name_any());
        return Ok(Action::await_change());
    }

    finalizer::ensure(sso, ctx).await?;
    provision::provision(sso, ctx).await?;

    ctx.metrics.record_provisioned();
    Ok(Action::await_change())
}

/// Error handling for reconciliation
pub fn error_policy(_sso: Arc<SSO>, error: &Error, ctx: Arc<Context>) -> Action {
    error!("[*] Reconciliation error: {:?}", error);
    ctx.metrics.record_error();

    if error.is_retryable() {
        Action::requeue(Duration::from_secs(10))
    } else {
        Action::requeue(Duration::from_secs(300))
    }
}
