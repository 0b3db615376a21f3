//! Raw-row parsing and velocity-series construction.
//!
//! Turns `H:MM:SS.mmm` timestamps and `<int>cm` positions into aligned numeric
//! series, trims the unreliable tail, and differentiates position into
//! velocity over the actual (possibly non-uniform) millisecond axis.

use crate::{RawSample, VeloError, TAIL_TRIM};

const ROW_DELIMITER: &str = " -> ";

/// Split raw log text into tabular rows, one per line.
///
/// Each line must contain the literal ` -> ` separating the timestamp from
/// the position field. Anything else, including a blank line, is rejected
/// with the zero-based row index.
pub fn split_rows(text: &str) -> Result<Vec<RawSample>, VeloError> {
    let mut rows = Vec::new();
    for (row, line) in text.lines().enumerate() {
        let (timestamp, position) =
            line.split_once(ROW_DELIMITER)
                .ok_or_else(|| VeloError::MalformedRow {
                    row,
                    line: line.to_string(),
                })?;
        rows.push(RawSample::new(timestamp, position.trim_end()));
    }
    Ok(rows)
}

/// Parse tabular rows into a zero-based millisecond time axis and an integer
/// centimeter position axis.
///
/// Parsing is all-or-nothing: the first malformed field aborts the batch.
/// Duplicate timestamps are legal and preserved, so the returned time axis is
/// non-decreasing rather than strictly increasing.
pub fn parse_series(rows: &[RawSample]) -> Result<(Vec<i64>, Vec<i64>), VeloError> {
    let mut times = Vec::with_capacity(rows.len());
    let mut positions = Vec::with_capacity(rows.len());

    for (row, sample) in rows.iter().enumerate() {
        times.push(parse_timestamp_ms(row, &sample.timestamp)?);
        positions.push(parse_position_cm(row, &sample.position)?);
    }

    // Re-base on the first sample so the series starts at zero.
    if let Some(&start) = times.first() {
        for t in &mut times {
            *t -= start;
        }
    }

    Ok((times, positions))
}

fn parse_timestamp_ms(row: usize, value: &str) -> Result<i64, VeloError> {
    let err = || VeloError::Timestamp {
        row,
        value: value.to_string(),
    };

    let mut fields = value.split(':');
    let (h, m, rest) = match (fields.next(), fields.next(), fields.next(), fields.next()) {
        (Some(h), Some(m), Some(rest), None) => (h, m, rest),
        _ => return Err(err()),
    };
    let (s, ms) = rest.split_once('.').ok_or_else(err)?;
    if ms.contains('.') {
        return Err(err());
    }

    let h: i64 = h.parse().map_err(|_| err())?;
    let m: i64 = m.parse().map_err(|_| err())?;
    let s: i64 = s.parse().map_err(|_| err())?;
    // The sub-second field is an integer count of milliseconds, whatever its
    // digit width; it is never rescaled as a decimal fraction.
    let ms: i64 = ms.parse().map_err(|_| err())?;
    if h < 0 || m < 0 || s < 0 || ms < 0 {
        return Err(err());
    }

    Ok(h * 3_600_000 + m * 60_000 + s * 1_000 + ms)
}

fn parse_position_cm(row: usize, value: &str) -> Result<i64, VeloError> {
    let err = || VeloError::Position {
        row,
        value: value.to_string(),
    };

    let digits = value.strip_suffix("cm").ok_or_else(err)?;
    digits.parse().map_err(|_| err())
}

/// Drop the last [`TAIL_TRIM`] samples from both series.
///
/// The trim is applied to times and positions identically so the two stay
/// index-aligned. A series too short to survive the trim is an error, never
/// an empty result.
pub fn trim_tail(times: &[i64], positions: &[i64]) -> Result<(Vec<i64>, Vec<i64>), VeloError> {
    if times.len() != positions.len() {
        return Err(VeloError::LengthMismatch {
            times: times.len(),
            positions: positions.len(),
        });
    }
    if times.len() < TAIL_TRIM + 1 {
        return Err(VeloError::InsufficientData {
            min: TAIL_TRIM + 1,
            actual: times.len(),
        });
    }

    let keep = times.len() - TAIL_TRIM;
    Ok((times[..keep].to_vec(), positions[..keep].to_vec()))
}

/// Differentiate a position series into a velocity series of the same length.
///
/// Interior points use the central difference over the surrounding time span;
/// the endpoints fall back to one-sided differences. Units are cm/ms. A zero
/// time span anywhere is reported rather than propagated as inf.
pub fn differentiate(times: &[i64], positions: &[i64]) -> Result<Vec<f64>, VeloError> {
    if times.len() != positions.len() {
        return Err(VeloError::LengthMismatch {
            times: times.len(),
            positions: positions.len(),
        });
    }
    let n = times.len();
    if n < 2 {
        return Err(VeloError::InsufficientData { min: 2, actual: n });
    }

    let slope_between = |lo: usize, hi: usize| -> Result<f64, VeloError> {
        let dt = times[hi] - times[lo];
        if dt == 0 {
            return Err(VeloError::ZeroTimeSpan { index: lo });
        }
        Ok((positions[hi] - positions[lo]) as f64 / dt as f64)
    };

    let mut velocity = Vec::with_capacity(n);
    velocity.push(slope_between(0, 1)?);
    for i in 1..n - 1 {
        velocity.push(slope_between(i - 1, i + 1)?);
    }
    velocity.push(slope_between(n - 2, n - 1)?);

    Ok(velocity)
}
