// Copyright 2025-Present Datadog, Inc. https://www.datadoghq.com/
// SPDX-License-Identifier: Apache-2.0

use std::collections::hash_map::Entry;
use std::collections::{HashMap, HashSet};

use tracing::debug;

use crate::merge::merge_spans_in_place;
use crate::span::{Span, SpanId};

/// Index of all spans belonging to one trace.
///
/// Spans are stored in an arena keyed by identity, with a separate
/// parent-to-children index, so traversal never follows raw links and a
/// malformed parent chain cannot produce a pointer cycle. The tree is
/// write-once per identity: a duplicate id is merged into the record that
/// arrived first, there is no deletion, and readers consume it by traversal.
///
/// Not internally synchronized. One trace has one logical owner that performs
/// all inserts, then runs the correction pass exactly once.
#[derive(Debug, Default)]
pub struct TraceTree {
    spans: HashMap<SpanId, Span>,
    children: HashMap<SpanId, Vec<SpanId>>,
}

impl TraceTree {
    pub fn new() -> TraceTree {
        TraceTree::default()
    }

    /// Inserts a span, merging it into an existing record with the same id.
    ///
    /// The recorded parent link is the first resolved one: a half-record
    /// reported without a parent adopts the link when the other half supplies
    /// it, and a later conflicting link never overrides the recorded one, so
    /// both halves of an RPC always hang off the same parent.
    pub fn add_span(&mut self, span: Span) {
        match self.spans.entry(span.id) {
            Entry::Occupied(mut entry) => {
                let existing = entry.get_mut();
                if existing.parent.is_none() {
                    if let Some(parent) = span.parent {
                        existing.parent = Some(parent);
                        self.children.entry(parent).or_default().push(span.id);
                    }
                }
                merge_spans_in_place(existing, span);
            }
            Entry::Vacant(entry) => {
                if let Some(parent) = span.parent {
                    self.children.entry(parent).or_default().push(span.id);
                }
                entry.insert(span);
            }
        }
    }

    /// Spans whose parent is `id`, in the order their links were recorded.
    pub fn children_of(&self, id: SpanId) -> Vec<&Span> {
        self.child_ids(id)
            .iter()
            .filter_map(|child| self.spans.get(child))
            .collect()
    }

    pub(crate) fn child_ids(&self, id: SpanId) -> &[SpanId] {
        self.children.get(&id).map(Vec::as_slice).unwrap_or(&[])
    }

    /// The span whose parent does not resolve within this tree.
    ///
    /// Covers both an absent parent and a parent that was never received. A
    /// complete trace has exactly one candidate; among several (disconnected
    /// fragments share one trace id) the lowest span id wins, which keeps the
    /// choice stable under insertion order.
    pub fn root(&self) -> Option<&Span> {
        self.spans
            .values()
            .filter(|span| match span.parent {
                None => true,
                Some(parent) => !self.spans.contains_key(&parent),
            })
            .min_by_key(|span| span.id)
    }

    /// The merged record for `id`. Absence is a normal outcome.
    pub fn get_span(&self, id: SpanId) -> Option<&Span> {
        self.spans.get(&id)
    }

    pub(crate) fn get_span_mut(&mut self, id: SpanId) -> Option<&mut Span> {
        self.spans.get_mut(&id)
    }

    pub fn len(&self) -> usize {
        self.spans.len()
    }

    pub fn is_empty(&self) -> bool {
        self.spans.is_empty()
    }

    /// All spans, in no particular order.
    pub fn spans(&self) -> impl Iterator<Item = &Span> {
        self.spans.values()
    }

    /// Consumes the tree, yielding all spans for hand-off to a reporter.
    pub fn into_spans(self) -> impl Iterator<Item = Span> {
        self.spans.into_values()
    }

    /// Writes the tree shape to the debug log, one line per span.
    pub fn debug_print(&self) {
        if !tracing::enabled!(tracing::Level::DEBUG) {
            return;
        }
        match self.root() {
            Some(root) => self.debug_print_from(root.id, 0, &mut HashSet::new()),
            None => debug!(spans = self.len(), "trace tree has no root"),
        }
    }

    fn debug_print_from(&self, id: SpanId, depth: usize, visited: &mut HashSet<SpanId>) {
        if !visited.insert(id) {
            return;
        }
        if let Some(span) = self.spans.get(&id) {
            let mut labels: Vec<&str> = span.timings.keys().map(String::as_str).collect();
            labels.sort_unstable();
            debug!(
                "{:indent$}span {} name={:?} timings=[{}]",
                "",
                span.id,
                span.name,
                labels.join(","),
                indent = depth * 2
            );
        }
        for child in self.child_ids(id) {
            self.debug_print_from(*child, depth + 1, visited);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::TraceTree;
    use crate::span::{Span, SpanId};
    use crate::timestamp::Timestamp;

    fn span(id: u64, parent: Option<u64>) -> Span {
        Span {
            id: SpanId(id),
            parent: parent.map(SpanId),
            ..Span::default()
        }
    }

    #[test]
    fn test_tree() {
        let first_span = span(1, None);
        let second_span = span(2, Some(1));

        let mut tree = TraceTree::new();
        tree.add_span(first_span.clone());
        tree.add_span(second_span.clone());

        let children = tree.children_of(SpanId(1));
        assert_eq!(children.len(), 1);
        assert_eq!(*children[0], second_span);

        assert_eq!(tree.root(), Some(&first_span));
    }

    #[test]
    fn test_duplicate_identity_merges_into_first() {
        let mut first = span(7, Some(1));
        first.add_timing("cs", Timestamp::from_nanos(100));

        let mut second = span(7, Some(1));
        second.add_timing("sr", Timestamp::from_nanos(1_110));

        let mut tree = TraceTree::new();
        tree.add_span(span(1, None));
        tree.add_span(first);
        tree.add_span(second);

        assert_eq!(tree.len(), 2);
        let merged = tree.get_span(SpanId(7)).unwrap();
        assert_eq!(merged.timings.len(), 2);
        // both halves produce a single child link
        assert_eq!(tree.children_of(SpanId(1)).len(), 1);
    }

    #[test]
    fn test_merge_by_identity_is_order_independent_for_labels() {
        let mut client_half = span(7, Some(1));
        client_half.add_timing("cs", Timestamp::from_nanos(100));
        let mut server_half = span(7, Some(1));
        server_half.add_timing("sr", Timestamp::from_nanos(1_110));

        for (first, second) in [
            (client_half.clone(), server_half.clone()),
            (server_half, client_half),
        ] {
            let mut tree = TraceTree::new();
            tree.add_span(first);
            tree.add_span(second);

            assert_eq!(tree.len(), 1);
            let merged = tree.get_span(SpanId(7)).unwrap();
            assert!(merged.timings.contains_key("cs"));
            assert!(merged.timings.contains_key("sr"));
        }
    }

    #[test]
    fn test_late_parent_is_adopted() {
        // the server half arrives first and does not know its parent
        let mut server_half = span(2, None);
        server_half.add_timing("sr", Timestamp::from_nanos(1_110));

        let mut client_half = span(2, Some(1));
        client_half.add_timing("cs", Timestamp::from_nanos(100));

        let mut tree = TraceTree::new();
        tree.add_span(span(1, None));
        tree.add_span(server_half);
        tree.add_span(client_half);

        assert_eq!(tree.get_span(SpanId(2)).unwrap().parent, Some(SpanId(1)));
        assert_eq!(tree.children_of(SpanId(1)).len(), 1);
        assert_eq!(tree.root().unwrap().id, SpanId(1));
    }

    #[test]
    fn test_conflicting_parent_is_ignored() {
        let mut tree = TraceTree::new();
        tree.add_span(span(1, None));
        tree.add_span(span(9, None));
        tree.add_span(span(2, Some(1)));
        tree.add_span(span(2, Some(9)));

        assert_eq!(tree.get_span(SpanId(2)).unwrap().parent, Some(SpanId(1)));
        assert_eq!(tree.children_of(SpanId(1)).len(), 1);
        assert!(tree.children_of(SpanId(9)).is_empty());
    }

    #[test]
    fn test_unresolved_parent_marks_root_candidate() {
        let mut tree = TraceTree::new();
        tree.add_span(span(5, Some(99)));

        assert_eq!(tree.root().unwrap().id, SpanId(5));
    }

    #[test]
    fn test_root_tie_break_is_lowest_id() {
        let mut tree = TraceTree::new();
        tree.add_span(span(8, None));
        tree.add_span(span(3, Some(77)));
        tree.add_span(span(4, Some(3)));

        assert_eq!(tree.root().unwrap().id, SpanId(3));
    }

    #[test]
    fn test_get_span_not_found_is_none() {
        let tree = TraceTree::new();
        assert!(tree.get_span(SpanId(1)).is_none());
        assert!(tree.root().is_none());
        assert!(tree.children_of(SpanId(1)).is_empty());
    }

    #[test]
    fn test_children_keep_insertion_order() {
        let mut tree = TraceTree::new();
        tree.add_span(span(1, None));
        tree.add_span(span(4, Some(1)));
        tree.add_span(span(2, Some(1)));
        tree.add_span(span(3, Some(1)));

        let ids: Vec<SpanId> = tree.children_of(SpanId(1)).iter().map(|s| s.id).collect();
        assert_eq!(ids, vec![SpanId(4), SpanId(2), SpanId(3)]);
    }
}
