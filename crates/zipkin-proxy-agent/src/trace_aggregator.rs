use std::collections::VecDeque;

use crate::trace_assembler::FinishedTrace;

/// Spans per batch handed to the flusher. Matches the flush limit the
/// upstream intake is sized for.
pub(crate) const MAX_BATCH_SPANS: usize = 10_000;

/// Takes in corrected traces and aggregates them into batches to be flushed
/// to the trace intake.
pub struct TraceAggregator {
    queue: VecDeque<FinishedTrace>,
    span_count: usize,
    max_batch_spans: usize,
}

impl Default for TraceAggregator {
    fn default() -> Self {
        TraceAggregator {
            queue: VecDeque::with_capacity(128), // arbitrary capacity for trace queue
            span_count: 0,
            max_batch_spans: MAX_BATCH_SPANS,
        }
    }
}

impl TraceAggregator {
    /// Takes in an individual finished trace.
    pub fn add(&mut self, trace: FinishedTrace) {
        self.span_count += trace.span_count();
        self.queue.push_back(trace);
    }

    /// Returns a batch of traces, bounded by the batch span limit. Traces are
    /// never split across batches.
    pub fn get_batch(&mut self) -> Vec<FinishedTrace> {
        let mut batch = Vec::new();
        let mut batch_spans = 0;

        while let Some(next) = self.queue.front() {
            let next_spans = next.span_count();
            if !batch.is_empty() && batch_spans + next_spans > self.max_batch_spans {
                break;
            }
            batch_spans += next_spans;
            if let Some(trace) = self.queue.pop_front() {
                batch.push(trace);
            }
        }

        self.span_count = self.span_count.saturating_sub(batch_spans);
        batch
    }

    /// Number of spans currently queued across all traces.
    pub fn span_count(&self) -> usize {
        self.span_count
    }

    /// Flush the queue.
    pub fn clear(&mut self) {
        self.queue.clear();
        self.span_count = 0;
    }
}

#[cfg(test)]
mod tests {
    use zipkin_proxy_core::{Span, TraceId};

    use super::TraceAggregator;
    use crate::trace_assembler::FinishedTrace;

    fn finished(trace: u64, spans: usize) -> FinishedTrace {
        FinishedTrace {
            trace: TraceId(trace),
            spans: vec![Span::default(); spans],
        }
    }

    #[test]
    fn test_add_and_get_batch() {
        let mut aggregator = TraceAggregator::default();
        aggregator.add(finished(1, 2));
        aggregator.add(finished(2, 3));
        assert_eq!(aggregator.span_count(), 5);

        let batch = aggregator.get_batch();
        assert_eq!(batch.len(), 2);
        assert_eq!(aggregator.span_count(), 0);
        assert!(aggregator.get_batch().is_empty());
    }

    #[test]
    fn test_batch_respects_span_limit_without_splitting_traces() {
        let mut aggregator = TraceAggregator {
            max_batch_spans: 5,
            ..TraceAggregator::default()
        };
        aggregator.add(finished(1, 3));
        aggregator.add(finished(2, 3));
        aggregator.add(finished(3, 1));

        let batch = aggregator.get_batch();
        assert_eq!(batch.len(), 1);
        assert_eq!(batch[0].trace, TraceId(1));

        let batch = aggregator.get_batch();
        assert_eq!(batch.len(), 2);
        assert_eq!(aggregator.span_count(), 0);
    }

    #[test]
    fn test_oversized_trace_still_ships_alone() {
        let mut aggregator = TraceAggregator {
            max_batch_spans: 5,
            ..TraceAggregator::default()
        };
        aggregator.add(finished(1, 9));

        let batch = aggregator.get_batch();
        assert_eq!(batch.len(), 1);
        assert_eq!(batch[0].span_count(), 9);
    }

    #[test]
    fn test_clear() {
        let mut aggregator = TraceAggregator::default();
        aggregator.add(finished(1, 2));
        aggregator.clear();
        assert_eq!(aggregator.span_count(), 0);
        assert!(aggregator.get_batch().is_empty());
    }
}
