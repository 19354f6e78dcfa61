// Copyright 2025-Present Datadog, Inc. https://www.datadoghq.com/
// SPDX-License-Identifier: Apache-2.0

use std::ops::Sub;

use serde::{Deserialize, Serialize};

/// An instant with nanosecond resolution.
///
/// Clock offsets and skews are signed, so arithmetic is done on `i64` nanos
/// rather than `std::time::Duration`.
#[derive(
    Debug, Clone, Copy, Default, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize,
)]
#[serde(transparent)]
pub struct Timestamp(i64);

impl Timestamp {
    pub const fn from_nanos(nanos: i64) -> Timestamp {
        Timestamp(nanos)
    }

    pub fn from_micros(micros: i64) -> Timestamp {
        Timestamp(micros.saturating_mul(1_000))
    }

    pub fn from_millis(millis: i64) -> Timestamp {
        Timestamp(millis.saturating_mul(1_000_000))
    }

    pub const fn as_nanos(self) -> i64 {
        self.0
    }

    pub const fn to_micros(self) -> i64 {
        self.0 / 1_000
    }

    pub const fn to_millis(self) -> i64 {
        self.0 / 1_000_000
    }

    /// Shifts this instant by a signed nanosecond offset.
    pub fn shift(self, offset_ns: i64) -> Timestamp {
        Timestamp(self.0.saturating_add(offset_ns))
    }

    /// Midpoint between two instants, used by the skew estimation.
    pub fn midpoint(a: Timestamp, b: Timestamp) -> Timestamp {
        Timestamp(((i128::from(a.0) + i128::from(b.0)) / 2) as i64)
    }
}

impl Sub for Timestamp {
    type Output = i64;

    /// Signed nanoseconds from `rhs` to `self`.
    fn sub(self, rhs: Timestamp) -> i64 {
        self.0.saturating_sub(rhs.0)
    }
}
