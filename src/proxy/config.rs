use crate::{
    crds::SSO,
    dex::OidcClient,
    error::{Error, Result},
};
use minijinja::{context, Environment};
use sha2::{Digest, Sha256};
use std::collections::BTreeMap;

/// Key of the rendered configuration inside the proxy secret
pub const CONFIG_FILE: &str = "oauth2_proxy.cfg";

const FINGERPRINT_LEN: usize = 16;

const TEMPLATE: &str = r#"http_address = ":{{ port }}"
redirect_url = "{{ redirect_url }}"
login_url = "{{ login_url }}"
redeem_url = "{{ redeem_url }}"
upstreams = [
  "{{ upstream_url }}"
]
request_logging = true

client_id = "{{ client_id }}"
client_secret = "{{ client_secret }}"

pass_basic_auth = false
pass_host_header = false
pass_access_token = {{ forward_token }}

email_domains = [
  "*"
]

cookie_name = "{{ cookie_name }}"
cookie_secret = "{{ cookie_secret }}"
cookie_domain = "{{ cookie_domain }}"
cookie_expire = "{{ cookie_expire }}"
cookie_refresh = "{{ cookie_refresh }}"
cookie_secure = {{ cookie_secure }}
cookie_httponly = {{ cookie_httponly }}

provider = "oidc"
oidc_issuer_url = "{{ issuer_url }}"
scope = "openid email profile"
skip_provider_button = true
"#;

/// Render the oauth2_proxy configuration file for an SSO and its OIDC client
pub fn render(
    sso: &SSO,
    client: &OidcClient,
    cookie_secret: &str,
    upstream_url: &str,
    port: i32,
) -> Result<String> {
    let issuer = sso.spec.oidc_issuer_url.trim_end_matches('/');
    if !issuer.starts_with("https://") {
        return Err(Error::ProxyConfig(format!(
            "OIDC issuer URL '{}' must use https",
            sso.spec.oidc_issuer_url
        )));
    }

    let redirect_url = client
        .redirect_uris
        .first()
        .ok_or_else(|| Error::ProxyConfig("no redirect URL provided".to_string()))?;

    let mut env = Environment::new();
    env.add_template(CONFIG_FILE, TEMPLATE)?;
    let rendered = env.get_template(CONFIG_FILE)?.render(context! {
        port => port,
        redirect_url => redirect_url,
        login_url => format!("{}/auth", issuer),
        redeem_url => format!("{}/token", issuer),
        upstream_url => upstream_url,
        client_id => client.id,
        client_secret => client.secret,
        forward_token => sso.spec.forward_token,
        cookie_name => sso.spec.cookie_spec.name,
        cookie_secret => cookie_secret,
        cookie_domain => sso.spec.domain,
        cookie_expire => sso.spec.cookie_spec.expire,
        cookie_refresh => sso.spec.cookie_spec.refresh,
        cookie_secure => sso.spec.cookie_spec.secure,
        cookie_httponly => sso.spec.cookie_spec.http_only,
        issuer_url => sso.spec.oidc_issuer_url,
    })?;

    Ok(rendered)
}

/// Secret data holding the rendered configuration
pub fn secret_data(rendered: String) -> BTreeMap<String, String> {
    BTreeMap::from([(CONFIG_FILE.to_string(), rendered)])
}

/// SHA-256 over the sorted key/value pairs, hex encoded and shortened to 16 characters.
///
/// Changes whenever any configuration value changes, which is what the proxy
/// deployment keys its restart on.
pub fn fingerprint(data: &BTreeMap<String, String>) -> String {
    let mut hasher = Sha256::new();
    for (key, value) in data {
        hasher.update(key.as_bytes());
        hasher.update([0]);
        hasher.update(value.as_bytes());
        hasher.update([0]);
    }
    let hash = hex::encode(hasher.finalize());
    hash[..FINGERPRINT_LEN].to_string()
}
