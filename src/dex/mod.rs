use crate::{
    config::DexConfig,
    error::{Error, Result},
};
use async_trait::async_trait;
use tonic::transport::{Certificate, Channel, ClientTlsConfig, Identity};
use tracing::{debug, info};

#[cfg(test)]
use mockall::automock;

/// Types and client generated from Dex's `api.proto`
pub mod api {
    tonic::include_proto!("api");
}

use api::dex_client::DexClient as DexApiClient;

/// An OIDC client registered with the identity provider
#[derive(Clone, Debug, Default, PartialEq)]
pub struct OidcClient {
    pub id: String,
    pub secret: String,
    pub redirect_uris: Vec<String>,
    pub trusted_peers: Vec<String>,
    pub public: bool,
    pub name: String,
    pub logo_url: String,
}

impl From<api::Client> for OidcClient {
    fn from(client: api::Client) -> Self {
        Self {
            id: client.id,
            secret: client.secret,
            redirect_uris: client.redirect_uris,
            trusted_peers: client.trusted_peers,
            public: client.public,
            name: client.name,
            logo_url: client.logo_url,
        }
    }
}

/// Manages OIDC client registrations of the identity provider
#[cfg_attr(test, automock)]
#[async_trait]
pub trait IdentityProvider: Send + Sync {
    /// Register a new client; fails if the provider reports it already exists
    async fn create_client(
        &self,
        redirect_uris: Vec<String>,
        trusted_peers: Vec<String>,
        public: bool,
        name: &str,
        logo_url: &str,
    ) -> Result<OidcClient>;

    /// Replace the mutable fields of an existing client
    async fn update_client(
        &self,
        id: &str,
        redirect_uris: Vec<String>,
        trusted_peers: Vec<String>,
        name: &str,
        logo_url: &str,
    ) -> Result<()>;

    async fn delete_client(&self, id: &str) -> Result<()>;
}

/// [`IdentityProvider`] talking to the Dex gRPC API over mutual TLS
#[derive(Clone, Debug)]
pub struct DexClient {
    api: DexApiClient<Channel>,
}

impl DexClient {
    pub fn new(channel: Channel) -> Self {
        Self {
            api: DexApiClient::new(channel),
        }
    }

    /// Connect to Dex using the configured client certificate, key and CA
    pub async fn connect(config: &DexConfig) -> Result<Self> {
        let ca = tokio::fs::read(&config.client_ca).await?;
        let cert = tokio::fs::read(&config.client_crt).await?;
        let key = tokio::fs::read(&config.client_key).await?;

        let host = config
            .host_and_port
            .rsplit_once(':')
            .map(|(host, _)| host)
            .unwrap_or(&config.host_and_port);

        let tls = ClientTlsConfig::new()
            .ca_certificate(Certificate::from_pem(ca))
            .identity(Identity::from_pem(cert, key))
            .domain_name(host);

        let channel = Channel::from_shared(format!("https://{}", config.host_and_port))
            .map_err(|e| {
                Error::ConfigError(format!(
                    "invalid Dex address '{}': {}",
                    config.host_and_port, e
                ))
            })?
            .tls_config(tls)?
            .connect()
            .await?;

        Ok(Self::new(channel))
    }
}

#[async_trait]
impl IdentityProvider for DexClient {
    async fn create_client(
        &self,
        redirect_uris: Vec<String>,
        trusted_peers: Vec<String>,
        public: bool,
        name: &str,
        logo_url: &str,
    ) -> Result<OidcClient> {
        let request = api::CreateClientReq {
            client: Some(api::Client {
                redirect_uris,
                trusted_peers,
                public,
                name: name.to_string(),
                logo_url: logo_url.to_string(),
                ..Default::default()
            }),
        };

        let resp = self.api.clone().create_client(request).await?.into_inner();
        let client = resp.client.unwrap_or_default();
        if resp.already_exists {
            return Err(Error::ClientAlreadyExists { id: client.id });
        }

        info!("Created OIDC client {} ({})", client.id, name);
        Ok(client.into())
    }

    async fn update_client(
        &self,
        id: &str,
        redirect_uris: Vec<String>,
        trusted_peers: Vec<String>,
        name: &str,
        logo_url: &str,
    ) -> Result<()> {
        let request = api::UpdateClientReq {
            id: id.to_string(),
            redirect_uris,
            trusted_peers,
            name: name.to_string(),
            logo_url: logo_url.to_string(),
        };

        let resp = self.api.clone().update_client(request).await?.into_inner();
        if resp.not_found {
            return Err(Error::ClientNotFound { id: id.to_string() });
        }

        debug!("Updated OIDC client {}", id);
        Ok(())
    }

    async fn delete_client(&self, id: &str) -> Result<()> {
        let request = api::DeleteClientReq { id: id.to_string() };

        let resp = self.api.clone().delete_client(request).await?.into_inner();
        if resp.not_found {
            return Err(Error::ClientNotFound { id: id.to_string() });
        }

        info!("Deleted OIDC client {}", id);
        Ok(())
    }
}
