// Copyright 2025-Present Datadog, Inc. https://www.datadoghq.com/
// SPDX-License-Identifier: Apache-2.0

use std::sync::Arc;

use async_trait::async_trait;
use http_body_util::BodyExt;
use hyper::{http, StatusCode};
use tokio::sync::mpsc::Sender;
use tracing::debug;

use zipkin_proxy_core::{Span, TraceId};

use crate::codec::WireSpan;
use crate::config::Config;
use crate::http_utils::{self, log_and_create_http_response, HttpRequest, HttpResponse};

#[async_trait]
pub trait SpanProcessor {
    /// Deserializes Zipkin spans from a hyper request body and sends them through the provided
    /// tokio mpsc Sender to the trace assembler.
    async fn process_spans(
        &self,
        config: Arc<Config>,
        req: HttpRequest,
        tx: Sender<(TraceId, Span)>,
    ) -> http::Result<HttpResponse>;
}

#[derive(Clone)]
pub struct ZipkinSpanProcessor {}

#[async_trait]
impl SpanProcessor for ZipkinSpanProcessor {
    async fn process_spans(
        &self,
        config: Arc<Config>,
        req: HttpRequest,
        tx: Sender<(TraceId, Span)>,
    ) -> http::Result<HttpResponse> {
        debug!("Received spans to process");
        let (parts, body) = req.into_parts();

        if let Some(response) = http_utils::verify_request_content_length(
            &parts.headers,
            config.max_request_content_length,
            "Error processing spans",
        ) {
            return response;
        }

        let body = match body.collect().await {
            Ok(collected) => collected.to_bytes(),
            Err(err) => {
                return log_and_create_http_response(
                    &format!("Error reading span request body: {err}"),
                    StatusCode::BAD_REQUEST,
                );
            }
        };

        // double check body size is < max request content length in case transfer encoding is used
        if body.len() > config.max_request_content_length {
            return log_and_create_http_response(
                "Error processing spans: Payload too large",
                StatusCode::PAYLOAD_TOO_LARGE,
            );
        }

        let wire_spans: Vec<WireSpan> = match serde_json::from_slice(&body) {
            Ok(spans) => spans,
            Err(err) => {
                return log_and_create_http_response(
                    &format!("Error deserializing spans from request body: {err}"),
                    StatusCode::BAD_REQUEST,
                );
            }
        };

        debug!("Deserialized {} spans", wire_spans.len());

        for wire_span in wire_spans {
            let (trace, span) = wire_span.into_span();
            if tx.send((trace, span)).await.is_err() {
                return log_and_create_http_response(
                    "Error sending spans to the trace assembler: channel closed",
                    StatusCode::INTERNAL_SERVER_ERROR,
                );
            }
        }

        log_and_create_http_response(
            "Successfully buffered spans to be assembled.",
            StatusCode::OK,
        )
    }
}
