//! Formula generation session: composes the request from the cached map and
//! the caller's query, and remembers the last formula produced.

use crate::backend::{BackendClient, FormulaRequest};
use crate::cache::SemanticMapCache;
use crate::error::GenerateError;
use parking_lot::Mutex;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use tracing::{error, info};

struct GeneratingGuard<'a>(&'a AtomicBool);

impl Drop for GeneratingGuard<'_> {
    fn drop(&mut self) {
        self.0.store(false, Ordering::Release);
    }
}

pub struct FormulaAssistant {
    cache: Arc<SemanticMapCache>,
    backend: BackendClient,
    generating: AtomicBool,
    last_formula: Mutex<Option<String>>,
}

impl FormulaAssistant {
    pub fn new(cache: Arc<SemanticMapCache>, backend: BackendClient) -> Self {
        Self {
            cache,
            backend,
            generating: AtomicBool::new(false),
            last_formula: Mutex::new(None),
        }
    }

    pub fn cache(&self) -> &Arc<SemanticMapCache> {
        &self.cache
    }

    pub fn backend(&self) -> &BackendClient {
        &self.backend
    }

    pub fn is_generating(&self) -> bool {
        self.generating.load(Ordering::Acquire)
    }

    pub fn last_formula(&self) -> Option<String> {
        self.last_formula.lock().clone()
    }

    /// Assembles the payload for `query` against `main_sheet`, refreshing the
    /// semantic map first when it is stale or missing.
    pub async fn compose_request(&self, query: &str, main_sheet: &str) -> FormulaRequest {
        self.cache.refresh(false).await;
        if self.cache.current().is_none() {
            self.cache.refresh(true).await;
        }

        FormulaRequest {
            query: query.to_string(),
            column_map: self.cache.current_text(),
            excel_version: self.cache.host().diagnostics().version,
            main_sheet: main_sheet.to_string(),
        }
    }

    pub async fn generate(&self, query: &str, main_sheet: &str) -> Result<String, GenerateError> {
        let query = query.trim();
        if query.is_empty() {
            return Err(GenerateError::EmptyQuery);
        }
        if !self.backend.client().connectivity().is_online() {
            return Err(GenerateError::Offline);
        }
        if self
            .generating
            .compare_exchange(false, true, Ordering::AcqRel, Ordering::Acquire)
            .is_err()
        {
            return Err(GenerateError::Busy);
        }
        let _guard = GeneratingGuard(&self.generating);

        let payload = self.compose_request(query, main_sheet).await;
        match self.backend.generate_formula(&payload).await {
            Ok(formula) => {
                info!(main_sheet, "formula ready");
                *self.last_formula.lock() = Some(formula.clone());
                Ok(formula)
            }
            Err(err) => {
                error!(error = %err, code = err.last_error().code(), "generation failed");
                Err(GenerateError::Network(err))
            }
        }
    }
}
