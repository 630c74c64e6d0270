//! Explicit server registry
//!
//! Injected into the client rather than living in module-global state, so
//! independent client instances (and tests) never share registrations.

use crate::config::{validate_endpoint, ServerEndpoint};
use crate::utils::errors::{ToolGateError, ToolGateResult};
use dashmap::DashMap;
use std::sync::Arc;
use tracing::info;

#[derive(Default)]
pub struct ServerRegistry {
    servers: DashMap<String, Arc<ServerEndpoint>>,
}

impl ServerRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Register an endpoint, replacing any previous registration under the
    /// same name. Malformed specs fail here, never at invoke time.
    pub fn register(&self, endpoint: ServerEndpoint) -> ToolGateResult<()> {
        validate_endpoint(&endpoint).map_err(|errors| {
            let details: Vec<String> = errors.iter().map(|e| e.to_string()).collect();
            ToolGateError::Config(details.join("; "))
        })?;

        info!(
            "registered server '{}' ({}, service_type={})",
            endpoint.name, endpoint.address, endpoint.service_type
        );
        self.servers
            .insert(endpoint.name.clone(), Arc::new(endpoint));
        Ok(())
    }

    pub fn unregister(&self, name: &str) -> bool {
        self.servers.remove(name).is_some()
    }

    pub fn get(&self, name: &str) -> ToolGateResult<Arc<ServerEndpoint>> {
        self.servers
            .get(name)
            .map(|entry| Arc::clone(entry.value()))
            .ok_or_else(|| ToolGateError::ServerNotRegistered(name.to_string()))
    }

    pub fn contains(&self, name: &str) -> bool {
        self.servers.contains_key(name)
    }

    pub fn list(&self) -> Vec<Arc<ServerEndpoint>> {
        self.servers
            .iter()
            .map(|entry| Arc::clone(entry.value()))
            .collect()
    }

    /// Enabled endpoints providing a service type, ordered by ascending
    /// priority value (lower value first).
    pub fn by_service_type(&self, service_type: &str) -> Vec<Arc<ServerEndpoint>> {
        let mut matches: Vec<_> = self
            .servers
            .iter()
            .filter(|entry| entry.enabled && entry.service_type == service_type)
            .map(|entry| Arc::clone(entry.value()))
            .collect();
        matches.sort_by_key(|endpoint| endpoint.priority);
        matches
    }

    pub fn len(&self) -> usize {
        self.servers.len()
    }

    pub fn is_empty(&self) -> bool {
        self.servers.is_empty()
    }
}
