// Copyright 2025-Present Datadog, Inc. https://www.datadoghq.com/
// SPDX-License-Identifier: Apache-2.0

//! Clock-skew correction.
//!
//! One RPC is measured twice: the caller records `cs`/`cr` on its own clock,
//! the callee records `sr`/`ss` on an independently drifted one. After merge
//! a span can carry both pairs, and the difference between the midpoints of
//! the two pairs estimates the skew between the two clocks — the network
//! latency cancels out as long as it is symmetric in both directions.
//!
//! The walk starts at the root, whose clock is the reference and is never
//! adjusted, and pushes a running offset down the tree: every instant a
//! process recorded is shifted by the offset computed for that process, so
//! the whole trace ends up on the root's timeline.

use std::collections::HashSet;

use tracing::{debug, warn};

use crate::span::{SpanId, CLIENT_RECV, CLIENT_SEND, SERVER_RECV, SERVER_SEND};
use crate::timestamp::Timestamp;
use crate::tree::TraceTree;

/// Rewrites every span's start time into the root span's clock domain.
///
/// `base_offset_ns` is added to every corrected instant and is normally zero;
/// a nonzero value shifts the whole trace uniformly. Spans with missing
/// timing pairs are corrected as far as their data permits and left untouched
/// otherwise. Must run at most once per tree: a second pass would reinterpret
/// already-corrected values.
pub fn correct_timings(tree: &mut TraceTree, base_offset_ns: i64) {
    let Some(root) = tree.root().map(|span| span.id) else {
        return;
    };
    let mut visited = HashSet::with_capacity(tree.len());
    correct_subtree(tree, root, base_offset_ns, &mut visited);
}

fn correct_subtree(
    tree: &mut TraceTree,
    id: SpanId,
    offset_ns: i64,
    visited: &mut HashSet<SpanId>,
) {
    if !visited.insert(id) {
        warn!(span = %id, "parent loop in trace, abandoning branch");
        return;
    }

    let child_offset_ns = match tree.get_span_mut(id) {
        Some(span) => {
            let client = span.timing(CLIENT_SEND).zip(span.timing(CLIENT_RECV));
            let server = span.timing(SERVER_RECV).zip(span.timing(SERVER_SEND));

            match client {
                Some((cs, cr)) => {
                    // cs/cr were measured by the parent's process, whose
                    // clock the inherited offset already maps into the root
                    // domain.
                    span.timestamp = cs.shift(offset_ns);
                    span.duration_ns = cr - cs;

                    match server {
                        Some((sr, ss)) => {
                            let skew_ns =
                                Timestamp::midpoint(sr, ss) - Timestamp::midpoint(cs, cr);
                            debug!(span = %id, skew_ns, "estimated clock skew");
                            // children were measured on this span's own
                            // clock, which runs `skew_ns` ahead of the
                            // trusted domain
                            offset_ns - skew_ns
                        }
                        None => offset_ns,
                    }
                }
                None => {
                    // no caller-side measurement: keep the recorded values,
                    // expressed in the inherited clock domain
                    if offset_ns != 0 {
                        span.timestamp = span.timestamp.shift(offset_ns);
                    }
                    offset_ns
                }
            }
        }
        None => offset_ns,
    };

    for child in tree.child_ids(id).to_vec() {
        correct_subtree(tree, child, child_offset_ns, visited);
    }
}
