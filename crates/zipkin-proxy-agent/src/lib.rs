// Copyright 2025-Present Datadog, Inc. https://www.datadoghq.com/
// SPDX-License-Identifier: Apache-2.0

//! The proxy around the reconstruction core: an HTTP receiver for Zipkin v1
//! JSON spans, per-trace assembly with a completeness window, and an
//! outbound flusher that forwards corrected traces to the trace intake.

#![cfg_attr(not(test), deny(clippy::panic))]
#![cfg_attr(not(test), deny(clippy::unwrap_used))]
#![cfg_attr(not(test), deny(clippy::expect_used))]
#![cfg_attr(not(test), deny(clippy::todo))]
#![cfg_attr(not(test), deny(clippy::unimplemented))]

pub mod codec;
pub mod config;
pub mod http_utils;
pub mod receiver;
pub mod span_processor;
pub mod trace_aggregator;
pub mod trace_assembler;
pub mod trace_flusher;
