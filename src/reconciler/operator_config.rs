use super::Context;
use crate::{
    error::{Error, Result},
    resources::labels,
};
use k8s_openapi::{api::core::v1::Secret, ByteString};
use kube::api::ObjectMeta;
use rand::{distributions::Alphanumeric, Rng};
use std::collections::BTreeMap;
use tracing::info;

pub const OPERATOR_SECRET_NAME: &str = "operator-secret";
pub const COOKIE_KEY: &str = "ssoCookieKey";
const COOKIE_SECRET_LEN: usize = 32;

pub fn generate_cookie_secret() -> String {
    rand::thread_rng()
        .sample_iter(&Alphanumeric)
        .take(COOKIE_SECRET_LEN)
        .map(char::from)
        .collect()
}

fn stored_cookie_secret(secret: &Secret) -> Result<Option<String>> {
    if let Some(value) = secret.data.as_ref().and_then(|d| d.get(COOKIE_KEY)) {
        return String::from_utf8(value.0.clone())
            .map(Some)
            .map_err(|_| Error::OperatorSecret(format!("{} is not valid UTF-8", COOKIE_KEY)));
    }
    Ok(secret
        .string_data
        .as_ref()
        .and_then(|d| d.get(COOKIE_KEY))
        .cloned())
}

fn require_cookie_secret(secret: &Secret, namespace: &str) -> Result<String> {
    stored_cookie_secret(secret)?.ok_or_else(|| {
        Error::OperatorSecret(format!(
            "secret {}/{} has no {} key",
            namespace, OPERATOR_SECRET_NAME, COOKIE_KEY
        ))
    })
}

fn build_secret(namespace: &str, cookie_secret: &str) -> Secret {
    Secret {
        metadata: ObjectMeta {
            name: Some(OPERATOR_SECRET_NAME.to_string()),
            namespace: Some(namespace.to_string()),
            labels: Some(labels::common_labels()),
            ..Default::default()
        },
        data: Some(BTreeMap::from([(
            COOKIE_KEY.to_string(),
            ByteString(cookie_secret.as_bytes().to_vec()),
        )])),
        ..Default::default()
    }
}

async fn load_or_create(ctx: &Context) -> Result<String> {
    let namespace = &ctx.config.operator_namespace;
    let resources = ctx.resources.as_ref();

    if let Some(secret) = resources.get_secret(namespace, OPERATOR_SECRET_NAME).await? {
        return require_cookie_secret(&secret, namespace);
    }

    let cookie_secret = generate_cookie_secret();
    match resources
        .create_secret(&build_secret(namespace, &cookie_secret))
        .await
    {
        Ok(()) => {
            info!("Generated cookie secret in {}/{}", namespace, OPERATOR_SECRET_NAME);
            Ok(cookie_secret)
        }
        Err(err) if err.is_conflict() => {
            // another operator instance won the race, use its value
            let secret = resources
                .get_secret(namespace, OPERATOR_SECRET_NAME)
                .await?
                .ok_or_else(|| {
                    Error::OperatorSecret(format!(
                        "secret {}/{} disappeared after creation",
                        namespace, OPERATOR_SECRET_NAME
                    ))
                })?;
            require_cookie_secret(&secret, namespace)
        }
        Err(err) => Err(err),
    }
}

/// Cookie signing secret shared by all proxies, generated on first use
pub async fn cookie_secret(ctx: &Context) -> Result<String> {
    ctx.cookie_secret
        .get_or_try_init(|| load_or_create(ctx))
        .await
        .cloned()
}
