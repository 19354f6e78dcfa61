// Copyright 2025-Present Datadog, Inc. https://www.datadoghq.com/
// SPDX-License-Identifier: Apache-2.0

use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use tokio::sync::{mpsc::Receiver, Mutex};
use tracing::{debug, error};

use crate::codec::CollectorSpan;
use crate::config::Config;
use crate::http_utils::build_client;
use crate::trace_aggregator::TraceAggregator;
use crate::trace_assembler::FinishedTrace;

const CLIENT_TIMEOUT: Duration = Duration::from_secs(30);

#[derive(Debug, thiserror::Error)]
pub enum FlushError {
    #[error("failed to encode trace payload: {0}")]
    Encode(#[from] rmp_serde::encode::Error),
    #[error("failed to send trace payload: {0}")]
    Send(#[from] reqwest::Error),
    #[error("trace intake responded with {0}")]
    Intake(reqwest::StatusCode),
}

#[async_trait]
pub trait TraceFlusher {
    fn new(aggregator: Arc<Mutex<TraceAggregator>>, config: Arc<Config>) -> Self
    where
        Self: Sized;
    /// Starts a trace flusher that queues finished traces sent to the tokio mpsc Receiver and
    /// flushes on the configured interval, or early once the queued span count reaches the
    /// flush limit.
    async fn start_trace_flusher(&self, rx: Receiver<FinishedTrace>);

    /// Flushes traces by getting every available batch on the aggregator.
    /// If `failed_traces` is provided, it will attempt to send those first.
    /// Returns any traces that failed to send and should be retried.
    async fn flush(&self, failed_traces: Option<Vec<FinishedTrace>>) -> Option<Vec<FinishedTrace>>;

    /// Given a batch of finished traces, sends them to the trace intake.
    /// Returns the traces back if there was an error sending them.
    async fn send(&self, traces: Vec<FinishedTrace>) -> Option<Vec<FinishedTrace>>;
}

#[derive(Clone)]
pub struct ProxyTraceFlusher {
    pub aggregator: Arc<Mutex<TraceAggregator>>,
    pub config: Arc<Config>,
    client: reqwest::Client,
}

#[async_trait]
impl TraceFlusher for ProxyTraceFlusher {
    fn new(aggregator: Arc<Mutex<TraceAggregator>>, config: Arc<Config>) -> Self {
        let client = build_client(config.proxy_url.as_deref(), CLIENT_TIMEOUT).unwrap_or_else(
            |err| {
                error!("Unable to parse proxy configuration: {err}, no proxy will be used");
                reqwest::Client::new()
            },
        );
        ProxyTraceFlusher {
            aggregator,
            config,
            client,
        }
    }

    async fn start_trace_flusher(&self, mut rx: Receiver<FinishedTrace>) {
        let mut ticker = tokio::time::interval(Duration::from_secs(
            self.config.trace_flush_interval_secs,
        ));
        let mut failed: Option<Vec<FinishedTrace>> = None;

        loop {
            let flush_now = tokio::select! {
                received = rx.recv() => match received {
                    Some(finished) => {
                        let mut guard = self.aggregator.lock().await;
                        guard.add(finished);
                        guard.span_count() >= self.config.flush_span_limit
                    }
                    None => {
                        debug!("Channel closed, flushing remaining traces and stopping");
                        self.flush(failed.take()).await;
                        return;
                    }
                },
                _ = ticker.tick() => true,
            };

            if flush_now {
                failed = self.flush(failed.take()).await;
            }
        }
    }

    async fn flush(&self, failed_traces: Option<Vec<FinishedTrace>>) -> Option<Vec<FinishedTrace>> {
        let mut failed_batch: Option<Vec<FinishedTrace>> = None;

        if let Some(traces) = failed_traces {
            // If we have traces from a previous failed attempt, try to send those first
            if !traces.is_empty() {
                debug!("Retrying to send {} previously failed traces", traces.len());
                let retry_result = self.send(traces).await;
                if retry_result.is_some() {
                    // Still failed, return to retry later
                    return retry_result;
                }
            }
        }

        // Process new traces from the aggregator
        let mut guard = self.aggregator.lock().await;
        let mut traces = guard.get_batch();

        while !traces.is_empty() {
            if let Some(failed) = self.send(traces).await {
                // Keep track of the failed batch
                failed_batch = Some(failed);
                // Stop processing more batches if we have a failure
                break;
            }

            traces = guard.get_batch();
        }

        failed_batch
    }

    async fn send(&self, traces: Vec<FinishedTrace>) -> Option<Vec<FinishedTrace>> {
        if traces.is_empty() {
            return None;
        }
        debug!("Flushing {} traces", traces.len());

        match self.send_payload(&traces).await {
            Ok(()) => {
                debug!("Successfully flushed traces");
                None
            }
            Err(err) => {
                error!("Error sending traces to the intake: {err}");
                // Return the original traces for retry
                Some(traces)
            }
        }
    }
}

impl ProxyTraceFlusher {
    /// The intake expects a list of lists, where each sub-list contains only
    /// spans of the same trace. Proxy-level tags are stamped on every span,
    /// span-level tags winning a collision.
    fn build_payload(&self, traces: &[FinishedTrace]) -> Vec<Vec<CollectorSpan>> {
        traces
            .iter()
            .map(|finished| {
                finished
                    .spans
                    .iter()
                    .map(|span| {
                        let mut collector_span = CollectorSpan::from_span(finished.trace, span);
                        for (key, value) in self.config.tags.tags() {
                            collector_span
                                .meta
                                .entry(key.clone())
                                .or_insert_with(|| value.clone());
                        }
                        collector_span
                    })
                    .collect()
            })
            .collect()
    }

    async fn send_payload(&self, traces: &[FinishedTrace]) -> Result<(), FlushError> {
        let payload = rmp_serde::to_vec_named(&self.build_payload(traces))?;

        let mut request = self
            .client
            .post(self.config.trace_intake.url.to_string())
            .header("Content-Type", "application/msgpack")
            .body(payload);
        if let Some(api_key) = &self.config.trace_intake.api_key {
            request = request.header("DD-API-KEY", api_key);
        }

        let response = request.send().await?;
        let status = response.status();
        if !status.is_success() {
            return Err(FlushError::Intake(status));
        }
        Ok(())
    }
}
