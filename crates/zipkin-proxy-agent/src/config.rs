// Copyright 2025-Present Datadog, Inc. https://www.datadoghq.com/
// SPDX-License-Identifier: Apache-2.0

use std::collections::HashMap;
use std::env;
use std::str::FromStr;

const DEFAULT_RECEIVER_PORT: u16 = 9411;
const DEFAULT_TRACE_FLUSH_INTERVAL_SECS: u64 = 2;
const DEFAULT_TRACE_COMPLETION_WINDOW_SECS: u64 = 10;
const DEFAULT_FLUSH_SPAN_LIMIT: usize = 10_000;

/// Downstream intake endpoint.
#[derive(Debug, Clone)]
pub struct Endpoint {
    pub url: hyper::Uri,
    pub api_key: Option<String>,
}

#[derive(Debug, Default)]
pub struct Tags {
    tags: HashMap<String, String>,
}

impl Tags {
    pub fn from_env_string(env_tags: &str) -> Self {
        let mut tags = HashMap::new();

        // Space-separated key:value tags are the standard for tagging. For compatibility reasons
        // we also support comma-separated key:value tags as well.
        let normalized = env_tags.replace(',', " ");

        for kv in normalized.split_whitespace() {
            let parts = kv.split(':').collect::<Vec<&str>>();
            if parts.len() == 2 {
                tags.insert(parts[0].to_string(), parts[1].to_string());
            }
        }
        Self { tags }
    }

    pub fn new() -> Self {
        Self::default()
    }

    pub fn tags(&self) -> &HashMap<String, String> {
        &self.tags
    }

    pub fn is_empty(&self) -> bool {
        self.tags.is_empty()
    }
}

#[derive(Debug)]
pub struct Config {
    pub receiver_port: u16,
    pub max_request_content_length: usize,
    /// how often to flush buffered traces, in seconds
    pub trace_flush_interval_secs: u64,
    /// buffered span count that forces a flush before the interval elapses
    pub flush_span_limit: usize,
    /// how long a trace must be idle before it is considered complete,
    /// corrected and forwarded, in seconds
    pub trace_completion_window_secs: u64,
    pub trace_intake: Endpoint,
    /// proxy-level tags stamped on every forwarded span
    pub tags: Tags,
    pub proxy_url: Option<String>,
}

fn trace_intake_url(site: &str) -> String {
    format!("https://trace.agent.{site}/api/v0.2/traces")
}

fn trace_intake_url_prefixed(prefix: &str) -> String {
    format!("{prefix}/api/v0.2/traces")
}

fn env_u64(key: &str, default: u64) -> u64 {
    env::var(key)
        .ok()
        .and_then(|value| value.parse::<u64>().ok())
        .unwrap_or(default)
}

impl Config {
    pub fn new() -> Result<Config, Box<dyn std::error::Error>> {
        let api_key = env::var("DD_API_KEY")
            .map_err(|_| anyhow::anyhow!("DD_API_KEY environment variable is not set"))?;

        let dd_site = env::var("DD_SITE").unwrap_or_else(|_| "datadoghq.com".to_string());

        // construct the trace intake url based on DD_SITE (to flush corrected
        // traces to)
        let mut intake_url = trace_intake_url(&dd_site);

        // DD_APM_DD_URL env var will primarily be used for integration tests
        // overrides the entire trace intake url prefix
        if let Ok(endpoint_prefix) = env::var("DD_APM_DD_URL") {
            intake_url = trace_intake_url_prefixed(&endpoint_prefix);
        };

        let receiver_port: u16 = env::var("DD_ZIPKIN_RECEIVER_PORT")
            .ok()
            .and_then(|port| port.parse::<u16>().ok())
            .unwrap_or(DEFAULT_RECEIVER_PORT);

        let tags = if let Ok(env_tags) = env::var("DD_TAGS") {
            Tags::from_env_string(&env_tags)
        } else {
            Tags::new()
        };

        Ok(Config {
            receiver_port,
            max_request_content_length: 10 * 1024 * 1024, // 10MB in Bytes
            trace_flush_interval_secs: env_u64(
                "DD_TRACE_FLUSH_INTERVAL",
                DEFAULT_TRACE_FLUSH_INTERVAL_SECS,
            ),
            flush_span_limit: DEFAULT_FLUSH_SPAN_LIMIT,
            trace_completion_window_secs: env_u64(
                "DD_TRACE_COMPLETION_WINDOW",
                DEFAULT_TRACE_COMPLETION_WINDOW_SECS,
            ),
            trace_intake: Endpoint {
                url: hyper::Uri::from_str(&intake_url)
                    .map_err(|err| anyhow::anyhow!("Invalid trace intake url: {err}"))?,
                api_key: Some(api_key),
            },
            tags,
            proxy_url: env::var("DD_PROXY_HTTPS")
                .or_else(|_| env::var("HTTPS_PROXY"))
                .ok(),
        })
    }
}
