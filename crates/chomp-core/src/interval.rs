//! Clock & Interval Registry (component A).
//!
//! Parses human interval specs (`s5`, `m1`, `h1`, `d1`, `w1`, or a bare
//! integer meaning seconds) into a duration in seconds, and computes the
//! next wall-clock-aligned tick boundary. Alignment is what lets every
//! fleet member agree on tick epochs without coordination: two processes
//! that parse the same interval independently arrive at the same epoch for
//! the same wall-clock second.

use crate::error::{ChompError, Result};

/// Parse an interval spec into its length in seconds.
///
/// Grammar: a single unit character `s|m|h|d|w` followed by a positive
/// integer multiplier, or a bare positive integer meaning seconds.
///
/// # Errors
/// Returns [`ChompError::InvalidInterval`] if the spec does not match the
/// grammar or the multiplier is zero.
pub fn parse(spec: &str) -> Result<i64> {
    let spec = spec.trim();
    if spec.is_empty() {
        return Err(ChompError::InvalidInterval {
            spec: spec.to_string(),
            reason: "empty interval spec".to_string(),
        });
    }

    let (unit_seconds, digits) = match spec.as_bytes()[0] {
        b's' => (1i64, &spec[1..]),
        b'm' => (60, &spec[1..]),
        b'h' => (3600, &spec[1..]),
        b'd' => (86_400, &spec[1..]),
        b'w' => (604_800, &spec[1..]),
        b'0'..=b'9' => (1, spec),
        _ => {
            return Err(ChompError::InvalidInterval {
                spec: spec.to_string(),
                reason: format!("unrecognized unit character {:?}", spec.chars().next()),
            });
        }
    };

    let multiplier: i64 = digits.parse().map_err(|_| ChompError::InvalidInterval {
        spec: spec.to_string(),
        reason: format!("{digits:?} is not a positive integer"),
    })?;

    if multiplier <= 0 {
        return Err(ChompError::InvalidInterval {
            spec: spec.to_string(),
            reason: "multiplier must be positive".to_string(),
        });
    }

    Ok(unit_seconds * multiplier)
}

/// Compute the next wall-clock boundary `t > now_ts` such that
/// `t mod interval_sec == 0`, given the interval spec and current Unix
/// timestamp in seconds.
///
/// # Errors
/// Propagates [`parse`]'s errors.
pub fn next_tick(spec: &str, now_ts: i64) -> Result<i64> {
    let interval_sec = parse(spec)?;
    Ok(tick_epoch(now_ts, interval_sec) * interval_sec + interval_sec)
}

/// The integer tick epoch `floor(ts / interval_sec)` a given timestamp
/// falls into. The claim-lock key is `(ingester.name, tick_epoch)`.
#[must_use]
pub const fn tick_epoch(ts: i64, interval_sec: i64) -> i64 {
    ts.div_euclid(interval_sec)
}

#[cfg(test)]
mod tests {
    use super::*;
    use proptest::prelude::*;

    #[test]
    fn seconds_unit() {
        assert_eq!(parse("s5").unwrap(), 5);
    }

    #[test]
    fn minutes_unit() {
        assert_eq!(parse("m1").unwrap(), 60);
    }

    #[test]
    fn hours_unit() {
        assert_eq!(parse("h1").unwrap(), 3600);
    }

    #[test]
    fn days_unit() {
        assert_eq!(parse("d1").unwrap(), 86_400);
    }

    #[test]
    fn weeks_unit() {
        assert_eq!(parse("w2").unwrap(), 1_209_600);
    }

    #[test]
    fn bare_integer_means_seconds() {
        assert_eq!(parse("30").unwrap(), 30);
    }

    #[test]
    fn rejects_zero_multiplier() {
        assert!(parse("s0").is_err());
    }

    #[test]
    fn rejects_unknown_unit() {
        assert!(parse("x5").is_err());
    }

    #[test]
    fn rejects_garbage() {
        assert!(parse("not-an-interval").is_err());
        assert!(parse("").is_err());
    }

    #[test]
    fn tick_epoch_is_floor_division() {
        assert_eq!(tick_epoch(95, 10), 9);
        assert_eq!(tick_epoch(100, 10), 10);
        assert_eq!(tick_epoch(0, 10), 0);
    }

    #[test]
    fn next_tick_is_the_next_multiple() {
        // now=95, interval=10 -> next boundary strictly after 95 that's a multiple of 10
        assert_eq!(next_tick("s10", 95).unwrap(), 100);
        assert_eq!(next_tick("s10", 100).unwrap(), 110);
    }

    proptest! {
        #[test]
        fn next_tick_always_a_multiple_and_in_future(now in 0i64..10_000_000, n in 1i64..1000) {
            let spec = format!("s{n}");
            let t = next_tick(&spec, now).unwrap();
            prop_assert!(t > now);
            prop_assert_eq!(t % n, 0);
        }
    }
}
