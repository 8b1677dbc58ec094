//! Round-trip and clock-skew estimation from a PING/PONG exchange.

/// One PING/PONG measurement, in whole seconds.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct LatencySample {
    /// Round trip: `now - sent`.
    pub elapsed: i64,
    /// Estimated offset of the local clock relative to the remote one,
    /// assuming both legs take the same time.
    pub time_diff: i64,
}

impl LatencySample {
    /// `sent` is the PING time on the local clock, `arrived` the PING arrival
    /// on the remote clock, `now` the PONG arrival on the local clock.
    ///
    /// `time_diff = round(now - arrived - elapsed / 2)`, rounding halves up.
    ///
    /// Timestamps come off the wire, so the arithmetic saturates instead of
    /// overflowing on forged values.
    pub fn measure(sent: i64, arrived: i64, now: i64) -> Self {
        let elapsed = i128::from(now) - i128::from(sent);
        let skew = (i128::from(now) - i128::from(arrived)) as f64 - elapsed as f64 / 2.0;
        Self {
            elapsed: saturate(elapsed),
            // `as` saturates float to int conversions.
            time_diff: (skew + 0.5).floor() as i64,
        }
    }
}

fn saturate(value: i128) -> i64 {
    i64::try_from(value).unwrap_or(if value < 0 { i64::MIN } else { i64::MAX })
}
