// Copyright 2025-Present Datadog, Inc. https://www.datadoghq.com/
// SPDX-License-Identifier: Apache-2.0

//! Wire formats at the proxy boundary.
//!
//! Inbound, the receiver accepts Zipkin v1 JSON spans: hex-encoded ids,
//! annotations (timed events) and binary annotations (key/value tags), both
//! optionally carrying the reporting endpoint. Outbound, corrected traces
//! are flattened into [`CollectorSpan`]s, grouped per trace and encoded as
//! msgpack for the trace intake.

use std::collections::HashMap;
use std::fmt;
use std::net::{Ipv4Addr, Ipv6Addr};

use serde::de::{self, Visitor};
use serde::{Deserialize, Deserializer, Serialize, Serializer};

use zipkin_proxy_core::{Span, SpanId, Timestamp, TraceId};

/// 64-bit identifier, hex-encoded on the wire.
///
/// Up to 32 hex characters are accepted and the low 64 bits kept, so 128-bit
/// trace ids from newer instrumentation truncate instead of failing.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash)]
pub struct WireId(pub u64);

impl WireId {
    fn parse(text: &str) -> Result<WireId, String> {
        if text.len() > 32 {
            return Err("hex value too large".to_string());
        }
        let mut value: u64 = 0;
        for c in text.bytes() {
            let digit = match c {
                b'0'..=b'9' => c - b'0',
                b'a'..=b'f' => c - b'a' + 10,
                b'A'..=b'F' => c - b'A' + 10,
                _ => {
                    return Err(format!(
                        "hex value must only contain [0-9a-f], got '{}'",
                        c as char
                    ));
                }
            };
            value = (value << 4) | u64::from(digit);
        }
        Ok(WireId(value))
    }
}

impl fmt::Display for WireId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{:016x}", self.0)
    }
}

impl Serialize for WireId {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.serialize_str(&self.to_string())
    }
}

struct WireIdVisitor;

impl Visitor<'_> for WireIdVisitor {
    type Value = WireId;

    fn expecting(&self, formatter: &mut fmt::Formatter<'_>) -> fmt::Result {
        formatter.write_str("a hex encoded id string")
    }

    fn visit_str<E: de::Error>(self, text: &str) -> Result<WireId, E> {
        WireId::parse(text).map_err(de::Error::custom)
    }
}

impl<'de> Deserialize<'de> for WireId {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> Result<WireId, D::Error> {
        deserializer.deserialize_str(WireIdVisitor)
    }
}

/// The process that reported an annotation.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct WireEndpoint {
    #[serde(default)]
    pub service_name: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub ipv4: Option<Ipv4Addr>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub ipv6: Option<Ipv6Addr>,
    #[serde(default)]
    pub port: u16,
}

/// A timed event: the annotation value is the event label, the timestamp is
/// in epoch microseconds.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct WireAnnotation {
    pub timestamp: i64,
    pub value: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub endpoint: Option<WireEndpoint>,
}

/// A key/value tag. The value may be any JSON scalar; non-strings are
/// stringified on conversion.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct WireBinaryAnnotation {
    pub key: String,
    pub value: serde_json::Value,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub endpoint: Option<WireEndpoint>,
}

/// One span as submitted to `POST /api/v1/spans`. Timestamps and durations
/// are in microseconds, per the Zipkin v1 JSON format.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct WireSpan {
    pub trace_id: WireId,
    pub id: WireId,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub parent_id: Option<WireId>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub annotations: Vec<WireAnnotation>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub binary_annotations: Vec<WireBinaryAnnotation>,
    #[serde(default)]
    pub name: String,
    #[serde(default)]
    pub debug: bool,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub timestamp: Option<i64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub duration: Option<i64>,
}

impl WireSpan {
    /// Converts the wire representation into the in-memory span record.
    ///
    /// Annotations become timings, binary annotations become tags, and the
    /// first endpoint seen names the service. A span reported without an
    /// explicit start falls back to its earliest annotation instant.
    pub fn into_span(self) -> (TraceId, Span) {
        let WireSpan {
            trace_id,
            id,
            parent_id,
            annotations,
            binary_annotations,
            name,
            debug: _,
            timestamp,
            duration,
        } = self;

        let mut span = Span {
            trace: TraceId(trace_id.0),
            id: SpanId(id.0),
            parent: parent_id.filter(|parent| parent.0 != 0).map(|parent| SpanId(parent.0)),
            name,
            ..Span::default()
        };

        for annotation in annotations {
            if span.service.is_empty() {
                if let Some(endpoint) = &annotation.endpoint {
                    span.service = endpoint.service_name.clone();
                }
            }
            span.add_timing(annotation.value, Timestamp::from_micros(annotation.timestamp));
        }

        for annotation in binary_annotations {
            if span.service.is_empty() {
                if let Some(endpoint) = &annotation.endpoint {
                    span.service = endpoint.service_name.clone();
                }
            }
            span.add_tag(annotation.key, stringify_tag_value(annotation.value));
        }

        let start = timestamp
            .map(Timestamp::from_micros)
            .or_else(|| span.timings.values().copied().min());
        if let Some(start) = start {
            span.timestamp = start;
        }
        span.duration_ns = duration.map(|micros| micros.saturating_mul(1_000)).unwrap_or(0);

        (span.trace, span)
    }
}

fn stringify_tag_value(value: serde_json::Value) -> String {
    match value {
        serde_json::Value::String(text) => text,
        other => other.to_string(),
    }
}

/// Span representation accepted by the trace intake.
///
/// The intake payload is a list of lists, each inner list holding the spans
/// of exactly one trace; see the trace flusher.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CollectorSpan {
    pub trace_id: u64,
    pub span_id: u64,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub parent_id: Option<u64>,
    pub name: String,
    pub service: String,
    /// Corrected start instant in epoch nanoseconds.
    pub start: i64,
    /// Duration in nanoseconds.
    pub duration: i64,
    pub meta: HashMap<String, String>,
}

impl CollectorSpan {
    pub fn from_span(trace: TraceId, span: &Span) -> CollectorSpan {
        CollectorSpan {
            trace_id: trace.0,
            span_id: span.id.0,
            parent_id: span.parent.map(|parent| parent.0),
            name: span.name.clone(),
            service: span.service.clone(),
            start: span.timestamp.as_nanos(),
            duration: span.duration_ns,
            meta: span.tags.clone(),
        }
    }
}
