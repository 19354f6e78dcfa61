// Copyright 2025-Present Datadog, Inc. https://www.datadoghq.com/
// SPDX-License-Identifier: Apache-2.0

use std::collections::HashMap;
use std::fmt;

use serde::{Deserialize, Serialize};

use crate::timestamp::Timestamp;

/// Identifier shared by all spans of one trace.
#[derive(
    Debug, Clone, Copy, Default, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize,
)]
#[serde(transparent)]
pub struct TraceId(pub u64);

/// Identifier of one span, unique per logical RPC within a trace.
#[derive(
    Debug, Clone, Copy, Default, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize,
)]
#[serde(transparent)]
pub struct SpanId(pub u64);

impl fmt::Display for TraceId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{:016x}", self.0)
    }
}

impl fmt::Display for SpanId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{:016x}", self.0)
    }
}

/// Instant recorded by the caller when it issued the request.
pub const CLIENT_SEND: &str = "cs";
/// Instant recorded by the caller when the response arrived.
pub const CLIENT_RECV: &str = "cr";
/// Instant recorded by the callee when the request arrived.
pub const SERVER_RECV: &str = "sr";
/// Instant recorded by the callee when it sent the response.
pub const SERVER_SEND: &str = "ss";

/// One record of a single unit of work within a trace.
///
/// An RPC produces two half-records sharing the same id, one measured by the
/// caller and one by the callee. `TraceTree::add_span` merges them into one
/// record carrying both timing pairs.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct Span {
    pub trace: TraceId,
    pub id: SpanId,
    /// Span that initiated this one; `None` marks a root candidate.
    pub parent: Option<SpanId>,
    pub name: String,
    pub service: String,
    /// Nominal start instant, rewritten by the correction pass.
    pub timestamp: Timestamp,
    /// Nominal elapsed nanoseconds.
    pub duration_ns: i64,
    /// Named instants, keyed by event label. Any label is accepted; only the
    /// four canonical RPC lifecycle labels are interpreted.
    pub timings: HashMap<String, Timestamp>,
    pub tags: HashMap<String, String>,
}

impl Span {
    /// Inserts or overwrites the instant recorded for `label`.
    pub fn add_timing(&mut self, label: impl Into<String>, instant: Timestamp) {
        self.timings.insert(label.into(), instant);
    }

    /// Inserts or overwrites the tag.
    pub fn add_tag(&mut self, key: impl Into<String>, value: impl Into<String>) {
        self.tags.insert(key.into(), value.into());
    }

    pub fn timing(&self, label: &str) -> Option<Timestamp> {
        self.timings.get(label).copied()
    }

    /// True if this record carries the callee's own measurement.
    pub fn is_server_side(&self) -> bool {
        self.timings.contains_key(SERVER_RECV)
    }
}
