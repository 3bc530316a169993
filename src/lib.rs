pub mod assistant;
pub mod backend;
pub mod builder;
pub mod cache;
pub mod config;
pub mod error;
pub mod events;
pub mod host;
pub mod logging;
pub mod map;
pub mod names;
pub mod network;
pub mod settings;
pub mod utils;

pub use assistant::FormulaAssistant;
pub use backend::{BackendClient, FormulaRequest, ProbeStatus};
pub use builder::{MapLimits, SemanticMapBuilder};
pub use cache::{RefreshOutcome, SemanticMapCache};
pub use config::{AppConfig, CliArgs, Command, ConfigArgs};
pub use error::{BuildError, GenerateError, HostError, NetworkError};
pub use events::{AppEvent, EventBus};
pub use host::{MemoryWorkbook, WorkbookHost, XlsxWorkbook};
pub use logging::{LoggingConfig, init_logging};
pub use map::{ColumnDescriptor, SemanticMap};
pub use network::{Connectivity, HttpTransport, ResilientClient, ReqwestTransport};

use anyhow::{Context, Result};
use std::path::Path;
use std::sync::Arc;
use tokio::task::JoinHandle;

/// Wired-up components for one workbook session.
pub struct App {
    config: AppConfig,
    events: EventBus,
    cache: Arc<SemanticMapCache>,
    assistant: Arc<FormulaAssistant>,
    watcher: Option<JoinHandle<()>>,
}

impl App {
    pub fn new(
        config: AppConfig,
        host: Arc<dyn WorkbookHost>,
        transport: Arc<dyn HttpTransport>,
    ) -> Self {
        let events = EventBus::new();
        let cache = Arc::new(SemanticMapCache::new(
            host,
            SemanticMapBuilder::new(config.limits),
            config.cache_ttl,
            events.clone(),
        ));

        let api_base = settings::resolve_api_base(
            config.api_base_override.as_deref(),
            &config.settings_store(),
        );
        let client = ResilientClient::new(transport, Connectivity::default(), config.retry);
        let backend = BackendClient::new(client, api_base, config.probe, events.clone());
        let assistant = Arc::new(FormulaAssistant::new(cache.clone(), backend));

        Self {
            config,
            events,
            cache,
            assistant,
            watcher: None,
        }
    }

    /// Builds an app over a real HTTP transport.
    pub fn with_host(config: AppConfig, host: Arc<dyn WorkbookHost>) -> Result<Self> {
        let transport = ReqwestTransport::new().context("failed to create HTTP transport")?;
        Ok(Self::new(config, host, Arc::new(transport)))
    }

    pub fn config(&self) -> &AppConfig {
        &self.config
    }

    pub fn events(&self) -> &EventBus {
        &self.events
    }

    pub fn cache(&self) -> &Arc<SemanticMapCache> {
        &self.cache
    }

    pub fn assistant(&self) -> &Arc<FormulaAssistant> {
        &self.assistant
    }

    pub fn backend(&self) -> &BackendClient {
        self.assistant.backend()
    }

    /// Subscribes to host changes and builds the first map.
    pub async fn start(&mut self) -> RefreshOutcome {
        if self.watcher.is_none() {
            self.watcher = self.cache.watch_host_changes();
            if self.watcher.is_none() {
                tracing::warn!("host has no change notifications; cache relies on TTL only");
            }
        }
        self.cache.refresh(true).await
    }
}

impl Drop for App {
    fn drop(&mut self) {
        if let Some(watcher) = self.watcher.take() {
            watcher.abort();
        }
    }
}

/// Opens a workbook host for `path`: `.xlsx` through the spreadsheet reader,
/// `.json`/`.yaml` as an in-memory description.
pub fn open_workbook(path: &Path) -> Result<Arc<dyn WorkbookHost>> {
    let ext = path
        .extension()
        .and_then(|os| os.to_str())
        .unwrap_or("")
        .to_ascii_lowercase();
    match ext.as_str() {
        "xlsx" | "xlsm" => Ok(Arc::new(XlsxWorkbook::open(path)?)),
        "json" | "yaml" | "yml" => Ok(Arc::new(MemoryWorkbook::from_fixture(path)?)),
        other => anyhow::bail!("unsupported workbook extension: {other}"),
    }
}
