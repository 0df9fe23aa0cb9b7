//! Broadcast orchestration.
//!
//! One broadcast fans a single UID out to every active partner, observes
//! completions strictly in arrival order under a global deadline, and stops
//! as soon as any partner reports business success. Everything still in
//! flight at that point is cancelled and never contributes to the report.

use crate::cache::PartnerCache;
use crate::client::PartnerHttpClient;
use crate::config::BroadcastConfig;
use crate::errors::GatewayError;
use crate::metrics_defs::{
    BROADCAST_DURATION, BROADCAST_EARLY_TERMINATION, BROADCAST_FAILURE, BROADCAST_SUCCESS,
};
use crate::protocol::{BroadcastReport, BroadcastRequest, PartnerResponse};
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::time::{Duration, Instant};
use tokio::sync::Semaphore;
use tokio::task::JoinSet;

pub struct BroadcastOrchestrator {
    partners: Arc<PartnerCache>,
    client: Arc<PartnerHttpClient>,
    // Shared across all broadcasts; bounds concurrent partner sends.
    limiter: Arc<Semaphore>,
    config: BroadcastConfig,
    accepting: AtomicBool,
    in_flight: AtomicUsize,
}

impl BroadcastOrchestrator {
    pub fn new(
        partners: Arc<PartnerCache>,
        client: Arc<PartnerHttpClient>,
        config: BroadcastConfig,
    ) -> Self {
        let limiter = Arc::new(Semaphore::new(config.max_concurrent_sends));
        BroadcastOrchestrator {
            partners,
            client,
            limiter,
            config,
            accepting: AtomicBool::new(true),
            in_flight: AtomicUsize::new(0),
        }
    }

    /// Runs one broadcast. Partner-level failures never surface here; the
    /// only error is the shutdown gate.
    pub async fn broadcast_start_charging(
        &self,
        request: &BroadcastRequest,
    ) -> Result<BroadcastReport, GatewayError> {
        if !self.accepting.load(Ordering::Acquire) {
            return Err(GatewayError::ShuttingDown);
        }

        self.in_flight.fetch_add(1, Ordering::AcqRel);
        let report = self.execute(&request.uid).await;
        self.in_flight.fetch_sub(1, Ordering::AcqRel);

        if report.success {
            metrics::counter!(BROADCAST_SUCCESS.name).increment(1);
            tracing::info!(
                uid = %request.uid,
                responding_partner = report.responding_partner.as_deref().unwrap_or(""),
                total_time_ms = report.total_time_ms,
                "Broadcast completed successfully"
            );
        } else {
            metrics::counter!(BROADCAST_FAILURE.name).increment(1);
            tracing::warn!(
                uid = %request.uid,
                total_time_ms = report.total_time_ms,
                "Broadcast failed"
            );
        }

        Ok(report)
    }

    /// Stops accepting broadcasts and waits out the grace period for the
    /// ones already running. Their own deadlines bound how long that takes.
    pub async fn shutdown(&self) {
        self.accepting.store(false, Ordering::Release);
        tracing::info!("Broadcast orchestrator shutting down");

        let deadline = Instant::now() + Duration::from_millis(self.config.shutdown_grace_ms);
        while self.in_flight.load(Ordering::Acquire) > 0 && Instant::now() < deadline {
            tokio::time::sleep(Duration::from_millis(50)).await;
        }

        let remaining = self.in_flight.load(Ordering::Acquire);
        if remaining > 0 {
            tracing::warn!(
                remaining = remaining,
                "Broadcasts still in flight after grace period"
            );
        }
    }

    async fn execute(&self, uid: &str) -> BroadcastReport {
        let start = Instant::now();
        let snapshot = self.partners.active_partners();
        let total_partners = snapshot.len();

        tracing::info!(partner_count = total_partners, uid = uid, "Starting broadcast");

        if snapshot.is_empty() {
            tracing::warn!(uid = uid, "No active partners available for broadcast");
            return BroadcastReport::no_active_partners(elapsed_ms(start));
        }

        let mut join_set = JoinSet::new();
        for partner in snapshot {
            let client = self.client.clone();
            let limiter = self.limiter.clone();
            let uid = uid.to_string();
            join_set.spawn(async move {
                // Queue on the shared worker bound. A task cancelled while
                // waiting here never performs any I/O.
                let _permit = limiter.acquire_owned().await;
                client.send_start_charging(&partner, &uid).await
            });
        }

        let mut collected: Vec<PartnerResponse> = Vec::with_capacity(total_partners);
        let mut first_success: Option<String> = None;

        let deadline = tokio::time::sleep(Duration::from_millis(self.config.deadline_ms));
        tokio::pin!(deadline);

        loop {
            tokio::select! {
                join_result = join_set.join_next() => {
                    match join_result {
                        Some(Ok(response)) => {
                            let succeeded = response.success;
                            let partner_id = response.partner_id.clone();
                            collected.push(response);

                            // First business success wins, decided purely by
                            // arrival order at this loop.
                            if succeeded && first_success.is_none() {
                                first_success = Some(partner_id.clone());
                                metrics::counter!(BROADCAST_EARLY_TERMINATION.name).increment(1);
                                tracing::info!(
                                    partner_id = %partner_id,
                                    uid = uid,
                                    "Early termination - first success"
                                );
                                break;
                            }
                        }
                        // Bookkeeping fault in the worker, not a partner
                        // failure; that partner's entry is simply absent.
                        Some(Err(e)) => {
                            tracing::error!(error = %e, uid = uid, "Partner send task failed");
                        }
                        // All tasks have completed
                        None => break,
                    }
                }
                _ = &mut deadline => {
                    tracing::warn!(
                        uid = uid,
                        outstanding = join_set.len(),
                        "Broadcast deadline reached"
                    );
                    break;
                }
            }
        }

        // Cancel the still-outstanding sends and wait for them to unwind so
        // their connections are released. Responses landing after the break
        // above are intentionally not observed.
        join_set.abort_all();
        while join_set.join_next().await.is_some() {}

        let total_time_ms = elapsed_ms(start);
        let report = BroadcastReport::from_collected(collected, first_success, total_time_ms);

        metrics::histogram!(
            BROADCAST_DURATION.name,
            "outcome" => if report.success { "success" } else { "failure" },
        )
        .record(Duration::from_millis(total_time_ms).as_secs_f64());

        tracing::info!(
            uid = uid,
            responded = report.partner_responses.len(),
            partners = total_partners,
            total_time_ms = total_time_ms,
            "Broadcast summary"
        );

        report
    }
}

fn elapsed_ms(start: Instant) -> u64 {
    start.elapsed().as_millis() as u64
}
