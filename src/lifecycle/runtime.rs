//! ProxyRuntime: every configured module, started and stopped together.
//!
//! # Responsibilities
//! - Build one module per config declaration, injecting its bridge variant
//! - Bind every module in declaration order, then start accepting on all of them
//! - Roll back already bound modules when a later one fails
//! - Stop disposes everything, in reverse order
//!
//! # Design Decisions
//! - Fail fast: the first bind error aborts startup
//! - Modules are named `<Kind>-<name>` for logs

use async_trait::async_trait;
use std::net::SocketAddr;
use std::sync::Arc;
use thiserror::Error;

use crate::bridge::{BridgeFactory, LocalBridgeFactory, RemoteBridgeFactory};
use crate::config::ProxyConfig;
use crate::net::client::ConnectionSettings;
use crate::net::handler::{ConnectionHandler, HttpProxyHandler};
use crate::net::listener::{ListenerError, ListenerModule};
use crate::net::portmap::PortMapHandler;
use crate::service::registry::RemoteConnectionRegistry;
use crate::service::server::{BridgeService, ServiceState};

/// A startable, disposable unit of the runtime.
#[async_trait]
pub trait ProxyModule: Send {
    fn name(&self) -> &str;

    /// Claim the listen address without serving.
    async fn bind(&mut self) -> Result<SocketAddr, ListenerError>;

    /// Begin serving; binds first if needed.
    async fn start(&mut self) -> Result<SocketAddr, ListenerError>;

    async fn dispose(&mut self);

    fn local_addr(&self) -> Option<SocketAddr>;
}

#[async_trait]
impl ProxyModule for ListenerModule {
    fn name(&self) -> &str {
        ListenerModule::name(self)
    }

    async fn bind(&mut self) -> Result<SocketAddr, ListenerError> {
        ListenerModule::bind(self).await
    }

    async fn start(&mut self) -> Result<SocketAddr, ListenerError> {
        ListenerModule::start(self).await
    }

    async fn dispose(&mut self) {
        ListenerModule::dispose(self).await
    }

    fn local_addr(&self) -> Option<SocketAddr> {
        ListenerModule::local_addr(self)
    }
}

#[async_trait]
impl ProxyModule for BridgeService {
    fn name(&self) -> &str {
        BridgeService::name(self)
    }

    async fn bind(&mut self) -> Result<SocketAddr, ListenerError> {
        BridgeService::bind(self).await
    }

    async fn start(&mut self) -> Result<SocketAddr, ListenerError> {
        BridgeService::start(self).await
    }

    async fn dispose(&mut self) {
        BridgeService::dispose(self).await
    }

    fn local_addr(&self) -> Option<SocketAddr> {
        BridgeService::local_addr(self)
    }
}

#[derive(Debug, Error)]
pub enum RuntimeError {
    #[error("module {module} failed to start: {source}")]
    Start {
        module: String,
        #[source]
        source: ListenerError,
    },
}

#[derive(Default)]
pub struct ProxyRuntime {
    modules: Vec<Box<dyn ProxyModule>>,
}

impl ProxyRuntime {
    pub fn new() -> Self {
        Self::default()
    }

    /// Build every module the configuration declares. Nothing is bound yet.
    pub fn from_config(config: &ProxyConfig) -> Self {
        let mut runtime = Self::new();
        let settings = ConnectionSettings {
            max_request_bytes: config.limits.max_request_bytes,
            read_chunk_size: config.limits.read_chunk_size,
            agent_name: Arc::from(config.agent_name.as_str()),
        };
        let connect_timeout = config.timeouts.connect();
        let chunk = config.limits.read_chunk_size;

        for module in &config.http {
            let factory: Arc<dyn BridgeFactory> = Arc::new(LocalBridgeFactory::new(connect_timeout, chunk));
            let handler: Arc<dyn ConnectionHandler> = Arc::new(HttpProxyHandler::new(factory, settings.clone()));
            runtime.push(ListenerModule::new(
                format!("Http-{}", module.name),
                module.host.clone(),
                module.port,
                module.max_connections,
                handler,
            ));
        }

        for module in &config.http_agent {
            let factory: Arc<dyn BridgeFactory> = Arc::new(RemoteBridgeFactory::new(
                &module.bridge_url,
                &module.prefix,
                Some(module.password.clone()),
                config.timeouts.bridge_request(),
                chunk,
            ));
            let handler: Arc<dyn ConnectionHandler> = Arc::new(HttpProxyHandler::new(factory, settings.clone()));
            runtime.push(ListenerModule::new(
                format!("HttpAgent-{}", module.name),
                module.host.clone(),
                module.port,
                module.max_connections,
                handler,
            ));
        }

        for module in &config.bridge_service {
            let registry = Arc::new(RemoteConnectionRegistry::new(
                config.registry.max_entries,
                config.registry.idle_timeout(),
                connect_timeout,
                chunk,
            ));
            runtime.push(BridgeService::new(
                format!("BridgeService-{}", module.name),
                module.host.clone(),
                module.port,
                module.prefixes.clone(),
                config.limits.max_request_bytes.max(chunk),
                ServiceState::new(registry, Some(module.password.clone())),
            ));
        }

        for module in &config.port_map {
            let handler: Arc<dyn ConnectionHandler> = Arc::new(PortMapHandler::new(
                module.target_host.clone(),
                module.target_port,
                connect_timeout,
            ));
            runtime.push(ListenerModule::new(
                format!("PortMap-{}", module.name),
                module.host.clone(),
                module.port,
                module.max_connections,
                handler,
            ));
        }

        runtime
    }

    pub fn push(&mut self, module: impl ProxyModule + 'static) {
        self.modules.push(Box::new(module));
    }

    pub fn len(&self) -> usize {
        self.modules.len()
    }

    pub fn is_empty(&self) -> bool {
        self.modules.is_empty()
    }

    /// Bind every module in order, then start them all. On failure the
    /// modules already bound are disposed.
    pub async fn start(&mut self) -> Result<(), RuntimeError> {
        for i in 0..self.modules.len() {
            if let Err(source) = self.modules[i].bind().await {
                return Err(self.roll_back(i, i, source).await);
            }
        }
        for i in 0..self.modules.len() {
            match self.modules[i].start().await {
                Ok(addr) => {
                    tracing::info!(module = %self.modules[i].name(), address = %addr, "Module started");
                }
                Err(source) => return Err(self.roll_back(i, self.modules.len(), source).await),
            }
        }
        Ok(())
    }

    /// Dispose the first `bound` modules after module `failed` could not come up.
    async fn roll_back(&mut self, failed: usize, bound: usize, source: ListenerError) -> RuntimeError {
        let module = self.modules[failed].name().to_string();
        tracing::error!(module = %module, error = %source, "Module failed to start; rolling back");
        for started in self.modules[..bound].iter_mut().rev() {
            started.dispose().await;
        }
        RuntimeError::Start { module, source }
    }

    /// Dispose every module, last started first.
    pub async fn stop(&mut self) {
        for module in self.modules.iter_mut().rev() {
            module.dispose().await;
            tracing::info!(module = %module.name(), "Module stopped");
        }
    }

    /// Bound address of every running module.
    pub fn addresses(&self) -> Vec<(String, SocketAddr)> {
        self.modules
            .iter()
            .filter_map(|m| m.local_addr().map(|addr| (m.name().to_string(), addr)))
            .collect()
    }

    /// Bound address of the module called `name` (e.g. `Http-main`).
    pub fn local_addr(&self, name: &str) -> Option<SocketAddr> {
        self.modules
            .iter()
            .find(|m| m.name() == name)
            .and_then(|m| m.local_addr())
    }
}
