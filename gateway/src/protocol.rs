//! Wire types for the broadcast endpoint and the per-partner outcome
//! records the orchestrator aggregates.

use bytes::Bytes;
use serde::{Deserialize, Serialize};

/// Synthetic status for transport-level failures.
pub const STATUS_ERROR: &str = "ERROR";
/// Synthetic status when the partner's breaker rejects the call.
pub const STATUS_CIRCUIT_BREAKER_OPEN: &str = "CIRCUIT_BREAKER_OPEN";
/// Sentinel for a status/message path that does not resolve.
pub const VALUE_NOT_AVAILABLE: &str = "N/A";
/// Sentinel for a value that resolved but could not be rendered.
pub const VALUE_EXTRACTION_ERROR: &str = "EXTRACTION_ERROR";

#[derive(Debug, Clone, Deserialize)]
pub struct BroadcastRequest {
    pub uid: String,
}

impl BroadcastRequest {
    pub fn from_bytes(bytes: &Bytes) -> Result<Self, serde_json::Error> {
        serde_json::from_slice(bytes)
    }
}

/// Outcome of one attempt against one partner. Created once, never mutated.
#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct PartnerResponse {
    pub partner_id: String,
    pub success: bool,
    pub status: String,
    pub message: String,
    pub response_time_ms: u64,
    pub timeout: bool,
    pub circuit_breaker_open: bool,
}

impl PartnerResponse {
    /// Fallback emitted without wire I/O when the partner's breaker is open.
    pub fn circuit_breaker_open(partner_id: &str) -> Self {
        PartnerResponse {
            partner_id: partner_id.to_string(),
            success: false,
            status: STATUS_CIRCUIT_BREAKER_OPEN.to_string(),
            message: "Service temporarily unavailable - circuit breaker open".to_string(),
            response_time_ms: 0,
            timeout: false,
            circuit_breaker_open: true,
        }
    }
}

/// Aggregated result of one broadcast.
#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct BroadcastReport {
    pub success: bool,
    pub message: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub responding_partner: Option<String>,
    pub partner_responses: Vec<PartnerResponse>,
    pub total_time_ms: u64,
}

impl BroadcastReport {
    pub fn no_active_partners(total_time_ms: u64) -> Self {
        BroadcastReport {
            success: false,
            message: "No active partners available".to_string(),
            responding_partner: None,
            partner_responses: Vec::new(),
            total_time_ms,
        }
    }

    /// Builds the final report from whatever the completion loop collected.
    pub fn from_collected(
        responses: Vec<PartnerResponse>,
        first_success: Option<String>,
        total_time_ms: u64,
    ) -> Self {
        match first_success {
            Some(partner_id) => BroadcastReport {
                success: true,
                message: format!("Charging started successfully with partner {partner_id}"),
                responding_partner: Some(partner_id),
                partner_responses: responses,
                total_time_ms,
            },
            None => {
                let success_count = responses.iter().filter(|r| r.success).count();
                let timeout_count = responses.iter().filter(|r| r.timeout).count();
                let error_count = responses
                    .iter()
                    .filter(|r| !r.success && !r.timeout)
                    .count();

                BroadcastReport {
                    success: false,
                    message: format!(
                        "No partner accepted the charging request. {} partners responded \
                         ({} success, {} timeouts, {} errors)",
                        responses.len(),
                        success_count,
                        timeout_count,
                        error_count
                    ),
                    responding_partner: None,
                    partner_responses: responses,
                    total_time_ms,
                }
            }
        }
    }

    pub fn to_bytes(&self) -> Result<Bytes, serde_json::Error> {
        serde_json::to_vec(self).map(Bytes::from)
    }
}
