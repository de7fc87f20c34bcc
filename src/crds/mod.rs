pub mod sso;

// Re-export types
pub use sso::{CookieSpec, ProxyResources, ResourceSpec, SSOSpec, SSOStatus, SSO};
