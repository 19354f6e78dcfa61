// Copyright 2025-Present Datadog, Inc. https://www.datadoghq.com/
// SPDX-License-Identifier: Apache-2.0

//! Trace reconstruction and clock-skew correction for the Zipkin proxy.
//!
//! Spans arrive in arbitrary order, one record per RPC half: the caller and
//! the callee each report their own view of the same operation, measured on
//! independent clocks. This crate indexes the records into a per-trace tree,
//! merges the two halves that share an identity, and rewrites every span's
//! start time into the clock domain of the root span, so that the forwarded
//! trace never shows a child starting before its parent or negative latency.
//!
//! Everything here is pure in-memory computation. The surrounding agent owns
//! grouping spans by trace, deciding when a trace is complete, and handing
//! each finished tree to [`correct_timings`] exactly once.

#![cfg_attr(not(test), deny(clippy::panic))]
#![cfg_attr(not(test), deny(clippy::unwrap_used))]
#![cfg_attr(not(test), deny(clippy::expect_used))]
#![cfg_attr(not(test), deny(clippy::todo))]
#![cfg_attr(not(test), deny(clippy::unimplemented))]

pub mod correct;
pub mod merge;
pub mod span;
pub mod timestamp;
pub mod tree;

pub use correct::correct_timings;
pub use merge::merge_spans_in_place;
pub use span::{Span, SpanId, TraceId};
pub use timestamp::Timestamp;
pub use tree::TraceTree;
