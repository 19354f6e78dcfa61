// Copyright 2025-Present Datadog, Inc. https://www.datadoghq.com/
// SPDX-License-Identifier: Apache-2.0

//! Per-trace accumulation ahead of the correction pass.
//!
//! Spans for one trace arrive interleaved with other traces and in arbitrary
//! order within a trace. The assembler owns one [`TraceTree`] per in-flight
//! trace id, so every insert for a trace happens on a single task, and runs
//! the clock-skew correction exactly once, when a trace has been idle for the
//! completion window.

use std::collections::HashMap;
use std::sync::Arc;
use std::time::{Duration, Instant};

use tokio::sync::mpsc::{Receiver, Sender};
use tracing::{debug, warn};

use zipkin_proxy_core::{correct_timings, Span, TraceId, TraceTree};

use crate::config::Config;

/// How often the assembler sweeps for completed traces.
const SWEEP_INTERVAL: Duration = Duration::from_secs(1);

/// A corrected trace ready for the flusher.
#[derive(Debug)]
pub struct FinishedTrace {
    pub trace: TraceId,
    pub spans: Vec<Span>,
}

impl FinishedTrace {
    pub fn span_count(&self) -> usize {
        self.spans.len()
    }
}

struct PendingTrace {
    tree: TraceTree,
    last_update: Instant,
}

pub struct TraceAssembler {
    completion_window: Duration,
    pending: HashMap<TraceId, PendingTrace>,
}

impl TraceAssembler {
    pub fn new(config: &Config) -> TraceAssembler {
        TraceAssembler {
            completion_window: Duration::from_secs(config.trace_completion_window_secs),
            pending: HashMap::new(),
        }
    }

    /// Inserts one span into its trace's tree, creating the tree on first
    /// sight of the trace id.
    pub fn add_span(&mut self, trace: TraceId, span: Span, now: Instant) {
        let pending = self.pending.entry(trace).or_insert_with(|| PendingTrace {
            tree: TraceTree::new(),
            last_update: now,
        });
        pending.tree.add_span(span);
        pending.last_update = now;
    }

    /// Finishes every trace that has been idle for the completion window.
    pub fn take_expired(&mut self, now: Instant) -> Vec<FinishedTrace> {
        let expired: Vec<TraceId> = self
            .pending
            .iter()
            .filter(|(_, pending)| {
                now.duration_since(pending.last_update) >= self.completion_window
            })
            .map(|(trace, _)| *trace)
            .collect();

        expired
            .into_iter()
            .filter_map(|trace| self.finish(trace))
            .collect()
    }

    /// Finishes every in-flight trace regardless of idleness (shutdown path).
    pub fn drain(&mut self) -> Vec<FinishedTrace> {
        let in_flight: Vec<TraceId> = self.pending.keys().copied().collect();
        in_flight
            .into_iter()
            .filter_map(|trace| self.finish(trace))
            .collect()
    }

    pub fn in_flight(&self) -> usize {
        self.pending.len()
    }

    fn finish(&mut self, trace: TraceId) -> Option<FinishedTrace> {
        let mut pending = self.pending.remove(&trace)?;
        pending.tree.debug_print();
        correct_timings(&mut pending.tree, 0);
        debug!(trace = %trace, spans = pending.tree.len(), "trace complete, corrected timings");
        Some(FinishedTrace {
            trace,
            spans: pending.tree.into_spans().collect(),
        })
    }
}

/// Pumps the span channel into the assembler and sweeps for completed traces,
/// forwarding them to the flusher. Returns once the span channel closes and
/// the remaining traces have been drained.
pub async fn start_trace_assembler(
    config: Arc<Config>,
    mut rx: Receiver<(TraceId, Span)>,
    tx: Sender<FinishedTrace>,
) {
    let mut assembler = TraceAssembler::new(&config);
    let mut sweep = tokio::time::interval(SWEEP_INTERVAL);

    loop {
        tokio::select! {
            received = rx.recv() => match received {
                Some((trace, span)) => assembler.add_span(trace, span, Instant::now()),
                None => break,
            },
            _ = sweep.tick() => {
                for finished in assembler.take_expired(Instant::now()) {
                    if tx.send(finished).await.is_err() {
                        warn!("Trace flusher channel closed, stopping assembler");
                        return;
                    }
                }
            },
        }
    }

    // channel closed: finish whatever is still in flight before shutting down
    debug!("Span channel closed, draining {} in-flight traces", assembler.in_flight());
    for finished in assembler.drain() {
        if tx.send(finished).await.is_err() {
            break;
        }
    }
}

#[cfg(test)]
mod tests {
    use std::time::{Duration, Instant};

    use zipkin_proxy_core::{Span, SpanId, Timestamp, TraceId};

    use super::TraceAssembler;
    use crate::config::{Config, Endpoint, Tags};

    fn create_test_config() -> Config {
        Config {
            receiver_port: 9411,
            max_request_content_length: 10 * 1024 * 1024,
            trace_flush_interval_secs: 2,
            flush_span_limit: 10_000,
            trace_completion_window_secs: 10,
            trace_intake: Endpoint {
                url: hyper::Uri::from_static("https://trace.agent.notdog.com/api/v0.2/traces"),
                api_key: Some("dummy_api_key".to_string()),
            },
            tags: Tags::new(),
            proxy_url: None,
        }
    }

    fn ts(nanos: i64) -> Timestamp {
        Timestamp::from_nanos(nanos)
    }

    fn skewed_trace(trace: u64) -> Vec<Span> {
        let mut root = Span {
            trace: TraceId(trace),
            id: SpanId(1),
            timestamp: ts(100),
            duration_ns: 100,
            ..Span::default()
        };
        root.add_timing("cs", ts(100));
        root.add_timing("cr", ts(200));

        let mut shared = root.clone();
        shared.id = SpanId(2);
        shared.parent = Some(SpanId(1));

        let mut shared_server = Span {
            trace: TraceId(trace),
            id: SpanId(2),
            timestamp: ts(1_110),
            duration_ns: 80,
            ..Span::default()
        };
        shared_server.add_timing("sr", ts(1_110));
        shared_server.add_timing("ss", ts(1_190));

        let mut leaf = Span {
            trace: TraceId(trace),
            id: SpanId(3),
            parent: Some(SpanId(2)),
            timestamp: ts(1_110),
            duration_ns: 80,
            ..Span::default()
        };
        leaf.add_timing("sr", ts(1_110));
        leaf.add_timing("ss", ts(1_190));

        vec![root, shared, shared_server, leaf]
    }

    #[test]
    fn test_trace_is_finished_after_completion_window() {
        let mut assembler = TraceAssembler::new(&create_test_config());
        let start = Instant::now();

        for span in skewed_trace(7) {
            assembler.add_span(TraceId(7), span, start);
        }

        // still in flight while the window has not elapsed
        assert!(assembler
            .take_expired(start + Duration::from_secs(9))
            .is_empty());
        assert_eq!(assembler.in_flight(), 1);

        let finished = assembler.take_expired(start + Duration::from_secs(10));
        assert_eq!(finished.len(), 1);
        assert_eq!(finished[0].trace, TraceId(7));
        assert_eq!(finished[0].span_count(), 3);
        assert_eq!(assembler.in_flight(), 0);

        // corrected: the leaf was measured on a clock running 1000ns ahead
        let leaf = finished[0]
            .spans
            .iter()
            .find(|span| span.id == SpanId(3))
            .unwrap();
        assert_eq!(leaf.timestamp, ts(110));

        // a finished trace is gone, correction cannot run twice on it
        assert!(assembler
            .take_expired(start + Duration::from_secs(60))
            .is_empty());
    }

    #[test]
    fn test_late_span_extends_the_window() {
        let mut assembler = TraceAssembler::new(&create_test_config());
        let start = Instant::now();

        let spans = skewed_trace(7);
        assembler.add_span(TraceId(7), spans[0].clone(), start);
        assembler.add_span(
            TraceId(7),
            spans[1].clone(),
            start + Duration::from_secs(8),
        );

        assert!(assembler
            .take_expired(start + Duration::from_secs(12))
            .is_empty());
        assert_eq!(
            assembler
                .take_expired(start + Duration::from_secs(18))
                .len(),
            1
        );
    }

    #[test]
    fn test_drain_finishes_all_traces() {
        let mut assembler = TraceAssembler::new(&create_test_config());
        let now = Instant::now();

        for span in skewed_trace(1) {
            assembler.add_span(TraceId(1), span, now);
        }
        for span in skewed_trace(2) {
            assembler.add_span(TraceId(2), span, now);
        }
        assert_eq!(assembler.in_flight(), 2);

        let mut finished = assembler.drain();
        finished.sort_by_key(|trace| trace.trace);
        assert_eq!(finished.len(), 2);
        assert_eq!(finished[0].trace, TraceId(1));
        assert_eq!(finished[1].trace, TraceId(2));
        assert_eq!(assembler.in_flight(), 0);
    }
}
