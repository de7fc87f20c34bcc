use crate::{crds::SSO, error::Result};
use dashmap::DashSet;
use kube::ResourceExt;
use std::fmt;

/// Identity of an SSO resource
#[derive(Clone, Debug, PartialEq, Eq, Hash)]
pub struct SsoKey {
    pub namespace: String,
    pub name: String,
}

impl SsoKey {
    pub fn new(namespace: impl Into<String>, name: impl Into<String>) -> Self {
        Self {
            namespace: namespace.into(),
            name: name.into(),
        }
    }

    pub fn from_resource(sso: &SSO) -> Result<Self> {
        Ok(Self::new(sso.require_namespace()?, sso.name_any()))
    }
}

impl fmt::Display for SsoKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}/{}", self.namespace, self.name)
    }
}

/// Keys of the SSOs currently being reconciled
#[derive(Debug, Default)]
pub struct InFlight {
    keys: DashSet<SsoKey>,
}

impl InFlight {
    pub fn new() -> Self {
        Self::default()
    }

    /// Claim `key`, or `None` if a reconciliation of it is already running.
    ///
    /// The claim is released when the returned guard is dropped.
    pub fn try_acquire(&self, key: SsoKey) -> Option<InFlightGuard<'_>> {
        if self.keys.insert(key.clone()) {
            Some(InFlightGuard {
                in_flight: self,
                key,
            })
        } else {
            None
        }
    }

    pub fn contains(&self, key: &SsoKey) -> bool {
        self.keys.contains(key)
    }

    pub fn is_empty(&self) -> bool {
        self.keys.is_empty()
    }
}

/// Claim on an [`SsoKey`] held for the duration of one reconciliation
#[derive(Debug)]
pub struct InFlightGuard<'a> {
    in_flight: &'a InFlight,
    key: SsoKey,
}

impl Drop for InFlightGuard<'_> {
    fn drop(&mut self) {
        self.in_flight.keys.remove(&self.key);
    }
}
