// Copyright 2025-Present Datadog, Inc. https://www.datadoghq.com/
// SPDX-License-Identifier: Apache-2.0

use crate::span::Span;

/// Folds `secondary` into `primary`, the two half-records of one RPC.
///
/// Timings are unioned per label; a label already present on `primary` keeps
/// its value. For tags the record carrying a server-receive timing is
/// authoritative, since it is the callee's own view of the operation.
/// `timestamp` and `duration_ns` are left alone: merge cannot know which
/// side's clock to trust, the correction pass recomputes them.
pub fn merge_spans_in_place(primary: &mut Span, secondary: Span) {
    // Tag authority must be decided before the timing union, otherwise a
    // server-receive imported from `secondary` makes `primary` look like the
    // server side.
    let primary_is_server = primary.is_server_side();
    let secondary_is_server = secondary.is_server_side();

    for (label, instant) in secondary.timings {
        primary.timings.entry(label).or_insert(instant);
    }

    if secondary_is_server && !primary_is_server {
        primary.tags.extend(secondary.tags);
    } else {
        for (key, value) in secondary.tags {
            primary.tags.entry(key).or_insert(value);
        }
    }

    if primary.name.is_empty() {
        primary.name = secondary.name;
    }
    if primary.service.is_empty() {
        primary.service = secondary.service;
    }
}
