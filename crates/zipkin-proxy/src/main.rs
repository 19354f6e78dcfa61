// Copyright 2025-Present Datadog, Inc. https://www.datadoghq.com/
// SPDX-License-Identifier: Apache-2.0

#![cfg_attr(not(test), deny(clippy::panic))]
#![cfg_attr(not(test), deny(clippy::unwrap_used))]
#![cfg_attr(not(test), deny(clippy::expect_used))]
#![cfg_attr(not(test), deny(clippy::todo))]
#![cfg_attr(not(test), deny(clippy::unimplemented))]

use std::{env, sync::Arc};

use tokio::sync::{mpsc, Mutex};
use tracing::{debug, error};
use tracing_subscriber::EnvFilter;

use zipkin_proxy_agent::{
    config::Config,
    receiver::SpanReceiver,
    span_processor::ZipkinSpanProcessor,
    trace_aggregator::TraceAggregator,
    trace_assembler::{self, FinishedTrace},
    trace_flusher::{ProxyTraceFlusher, TraceFlusher},
};
use zipkin_proxy_core::{Span, TraceId};

const SPAN_CHANNEL_BUFFER_SIZE: usize = 1000;
const FINISHED_TRACE_CHANNEL_BUFFER_SIZE: usize = 10;

#[tokio::main]
pub async fn main() {
    let log_level = env::var("DD_LOG_LEVEL")
        .map(|val| val.to_lowercase())
        .unwrap_or("info".to_string());

    let env_filter = format!("h2=off,hyper=off,rustls=off,{}", log_level);

    #[allow(clippy::expect_used)]
    let subscriber = tracing_subscriber::fmt::Subscriber::builder()
        .with_env_filter(
            EnvFilter::try_new(env_filter).expect("could not parse log level in configuration"),
        )
        .with_level(true)
        .with_thread_names(false)
        .with_thread_ids(false)
        .finish();

    #[allow(clippy::expect_used)]
    tracing::subscriber::set_global_default(subscriber)
        .expect("setting default tracing subscriber failed");

    debug!("Starting zipkin span proxy");

    let config = match Config::new() {
        Ok(config) => Arc::new(config),
        Err(err) => {
            error!("Error creating config on proxy startup: {err}");
            return;
        }
    };

    // decoded spans flow from the receiver's span processor to the trace
    // assembler, corrected traces from the assembler to the trace flusher
    let (span_tx, span_rx): (
        mpsc::Sender<(TraceId, Span)>,
        mpsc::Receiver<(TraceId, Span)>,
    ) = mpsc::channel(SPAN_CHANNEL_BUFFER_SIZE);
    let (trace_tx, trace_rx): (
        mpsc::Sender<FinishedTrace>,
        mpsc::Receiver<FinishedTrace>,
    ) = mpsc::channel(FINISHED_TRACE_CHANNEL_BUFFER_SIZE);

    let assembler_config = config.clone();
    let assembler_handle = tokio::spawn(async move {
        trace_assembler::start_trace_assembler(assembler_config, span_rx, trace_tx).await;
    });

    let aggregator = Arc::new(Mutex::new(TraceAggregator::default()));
    let trace_flusher = ProxyTraceFlusher::new(aggregator, config.clone());
    let flusher_handle = tokio::spawn(async move {
        trace_flusher.start_trace_flusher(trace_rx).await;
    });

    let receiver = SpanReceiver {
        config: config.clone(),
        span_processor: Arc::new(ZipkinSpanProcessor {}),
    };

    if let Err(err) = receiver
        .start_receiver(span_tx, assembler_handle, flusher_handle)
        .await
    {
        error!("Error running span receiver: {err}");
    }
}
