//! Client for the formula generation service.

use crate::error::NetworkError;
use crate::events::{AppEvent, EventBus};
use crate::network::{HttpRequest, ResilientClient};
use serde::{Deserialize, Serialize};
use std::time::Duration;
use tracing::{debug, info, warn};

pub const NO_FORMULA_FALLBACK: &str = "=ERROR(\"No formula returned\")";
pub const DEFAULT_PROBE_ATTEMPTS: u32 = 5;
pub const DEFAULT_PROBE_TIMEOUT: Duration = Duration::from_secs(4);

/// Payload of `POST <base>/generate`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct FormulaRequest {
    pub query: String,
    pub column_map: String,
    pub excel_version: String,
    pub main_sheet: String,
}

#[derive(Debug, Default, Deserialize)]
struct FormulaResponse {
    #[serde(default)]
    formula: Option<String>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ProbeConfig {
    pub attempts: u32,
    pub timeout: Duration,
}

impl Default for ProbeConfig {
    fn default() -> Self {
        Self {
            attempts: DEFAULT_PROBE_ATTEMPTS,
            timeout: DEFAULT_PROBE_TIMEOUT,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ProbeStatus {
    Ready,
    Unreachable,
}

#[derive(Clone)]
pub struct BackendClient {
    client: ResilientClient,
    api_base: String,
    probe: ProbeConfig,
    events: EventBus,
}

impl BackendClient {
    pub fn new(
        client: ResilientClient,
        api_base: impl Into<String>,
        probe: ProbeConfig,
        events: EventBus,
    ) -> Self {
        Self {
            client,
            api_base: api_base.into().trim_end_matches('/').to_string(),
            probe,
            events,
        }
    }

    pub fn api_base(&self) -> &str {
        &self.api_base
    }

    pub fn client(&self) -> &ResilientClient {
        &self.client
    }

    /// Best-effort readiness probe; failures become a status and events.
    pub async fn warm_up(&self) -> ProbeStatus {
        let url = format!("{}/health", self.api_base);
        let request = HttpRequest::get(&url).with_timeout(self.probe.timeout);
        let max_attempts = self.probe.attempts.max(1);

        for attempt in 1..=max_attempts {
            match self.client.send(&request).await {
                Ok(_) => {
                    info!(api_base = %self.api_base, attempt, "backend ready");
                    self.events.emit(AppEvent::BackendReady);
                    return ProbeStatus::Ready;
                }
                Err(error) => {
                    debug!(attempt, max_attempts, %error, "backend not ready yet");
                    self.events.emit(AppEvent::BackendWaking {
                        attempt,
                        max_attempts,
                    });
                }
            }
        }

        warn!(api_base = %self.api_base, "backend unreachable");
        self.events.emit(AppEvent::BackendUnreachable);
        ProbeStatus::Unreachable
    }

    /// Sends the payload and returns the formula text, or the fallback formula
    /// when the service answers without one.
    pub async fn generate_formula(&self, payload: &FormulaRequest) -> Result<String, NetworkError> {
        let url = format!("{}/generate", self.api_base);
        let body = serde_json::to_value(payload).map_err(|e| NetworkError::Decode(e.to_string()))?;
        let response = self.client.send(&HttpRequest::post_json(url, body)).await?;
        let parsed: FormulaResponse = response.json()?;

        Ok(parsed
            .formula
            .filter(|formula| !formula.is_empty())
            .unwrap_or_else(|| NO_FORMULA_FALLBACK.to_string()))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn payload_uses_camel_case_keys() {
        let payload = FormulaRequest {
            query: "sum units".to_string(),
            column_map: "Sheet: Sales".to_string(),
            excel_version: "16.0".to_string(),
            main_sheet: "Sales".to_string(),
        };
        let json = serde_json::to_value(&payload).expect("serialize");
        assert_eq!(json["columnMap"], "Sheet: Sales");
        assert_eq!(json["excelVersion"], "16.0");
        assert_eq!(json["mainSheet"], "Sales");
        assert_eq!(json["query"], "sum units");
    }

    #[test]
    fn response_formula_is_optional() {
        let parsed: FormulaResponse = serde_json::from_str("{}").expect("parse");
        assert!(parsed.formula.is_none());
    }
}
