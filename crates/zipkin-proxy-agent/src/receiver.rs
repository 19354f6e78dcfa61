// Copyright 2025-Present Datadog, Inc. https://www.datadoghq.com/
// SPDX-License-Identifier: Apache-2.0

use std::io;
use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Instant;

use bytes::Bytes;
use http_body_util::Full;
use hyper::service::service_fn;
use hyper::{http, Method, Response, StatusCode};
use serde_json::json;
use tokio::sync::mpsc::Sender;
use tokio::task::JoinHandle;
use tracing::{debug, error};

use zipkin_proxy_core::{Span, TraceId};

use crate::config::Config;
use crate::http_utils::{self, log_and_create_http_response, HttpRequest, HttpResponse};
use crate::span_processor::SpanProcessor;

const SPANS_ENDPOINT_PATH: &str = "/api/v1/spans";
const INFO_ENDPOINT_PATH: &str = "/info";

pub struct SpanReceiver {
    pub config: Arc<Config>,
    pub span_processor: Arc<dyn SpanProcessor + Send + Sync>,
}

impl SpanReceiver {
    /// Binds the receiver port and serves until a fatal error, watching the
    /// assembler and flusher tasks: the proxy cannot do useful work without
    /// them, so either one dying takes the server down.
    pub async fn start_receiver(
        &self,
        span_tx: Sender<(TraceId, Span)>,
        assembler_handle: JoinHandle<()>,
        flusher_handle: JoinHandle<()>,
    ) -> Result<(), Box<dyn std::error::Error>> {
        let now = Instant::now();

        // the endpoint_handler is called for each http request and hands span
        // payloads to the span processor, which forwards the decoded spans to
        // the trace assembler through span_tx
        let span_processor = self.span_processor.clone();
        let endpoint_config = self.config.clone();

        let service = service_fn(move |req| {
            let span_processor = span_processor.clone();
            let span_tx = span_tx.clone();
            let endpoint_config = endpoint_config.clone();

            SpanReceiver::endpoint_handler(
                endpoint_config,
                req.map(http_utils::incoming_body),
                span_processor,
                span_tx,
            )
        });

        let addr = SocketAddr::from(([127, 0, 0, 1], self.config.receiver_port));
        let listener = tokio::net::TcpListener::bind(&addr).await?;

        debug!(
            "Span receiver started: listening on port {}",
            self.config.receiver_port
        );
        debug!(
            "Time taken to start the span receiver: {} ms",
            now.elapsed().as_millis()
        );

        Self::serve_tcp(listener, service, assembler_handle, flusher_handle).await
    }

    async fn serve_tcp<S>(
        listener: tokio::net::TcpListener,
        service: S,
        mut assembler_handle: JoinHandle<()>,
        mut flusher_handle: JoinHandle<()>,
    ) -> Result<(), Box<dyn std::error::Error>>
    where
        S: hyper::service::Service<
                hyper::Request<hyper::body::Incoming>,
                Response = HttpResponse,
            > + Clone
            + Send
            + 'static,
        S::Future: Send,
        S::Error: std::error::Error + Send + Sync + 'static,
    {
        let server = hyper::server::conn::http1::Builder::new();
        let mut joinset = tokio::task::JoinSet::new();

        loop {
            let conn = tokio::select! {
                con_res = listener.accept() => match con_res {
                    Err(e)
                        if matches!(
                            e.kind(),
                            io::ErrorKind::ConnectionAborted
                                | io::ErrorKind::ConnectionReset
                                | io::ErrorKind::ConnectionRefused
                        ) =>
                    {
                        continue;
                    }
                    Err(e) => {
                        error!("Server error: {e}");
                        return Err(e.into());
                    }
                    Ok((conn, _)) => conn,
                },
                finished = async {
                    match joinset.join_next().await {
                        Some(finished) => finished,
                        None => std::future::pending().await,
                    }
                } => match finished {
                    Err(e) if e.is_panic() => {
                        // Don't kill server on panic - log and continue
                        error!("Connection handler panicked: {:?}", e);
                        continue;
                    },
                    Ok(()) | Err(_) => continue,
                },
                result = &mut assembler_handle => {
                    error!("Trace assembler task died: {:?}", result);
                    return Err("Trace assembler task terminated unexpectedly".into());
                },
                result = &mut flusher_handle => {
                    error!("Trace flusher task died: {:?}", result);
                    return Err("Trace flusher task terminated unexpectedly".into());
                },
            };
            let conn = hyper_util::rt::TokioIo::new(conn);
            let server = server.clone();
            let service = service.clone();
            joinset.spawn(async move {
                if let Err(e) = server.serve_connection(conn, service).await {
                    error!("Connection error: {e}");
                }
            });
        }
    }

    async fn endpoint_handler(
        config: Arc<Config>,
        req: HttpRequest,
        span_processor: Arc<dyn SpanProcessor + Send + Sync>,
        span_tx: Sender<(TraceId, Span)>,
    ) -> http::Result<HttpResponse> {
        match (req.method(), req.uri().path()) {
            (&Method::PUT | &Method::POST, SPANS_ENDPOINT_PATH) => {
                match span_processor.process_spans(config, req, span_tx).await {
                    Ok(res) => Ok(res),
                    Err(err) => log_and_create_http_response(
                        &format!("Error processing spans: {err}"),
                        StatusCode::INTERNAL_SERVER_ERROR,
                    ),
                }
            }
            (_, INFO_ENDPOINT_PATH) => match Self::info_handler(config.receiver_port) {
                Ok(res) => Ok(res),
                Err(err) => log_and_create_http_response(
                    &format!("Info endpoint error: {err}"),
                    StatusCode::INTERNAL_SERVER_ERROR,
                ),
            },
            _ => {
                let mut not_found = Response::default();
                *not_found.status_mut() = StatusCode::NOT_FOUND;
                Ok(not_found)
            }
        }
    }

    fn info_handler(receiver_port: u16) -> http::Result<HttpResponse> {
        let response_json = json!(
            {
                "endpoints": [
                    SPANS_ENDPOINT_PATH,
                    INFO_ENDPOINT_PATH
                ],
                "config": {
                    "receiver_port": receiver_port
                }
            }
        );
        Response::builder()
            .status(200)
            .body(Full::new(Bytes::from(response_json.to_string())))
    }
}
