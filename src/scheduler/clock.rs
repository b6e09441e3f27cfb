//! Server clock and client-time reconciliation.
//!
//! The temporal resolver interprets phrases like "in 10 minutes" relative to
//! whatever "now" the client reported. Client and server clocks may disagree,
//! so the resolved instant is re-based onto the server clock by keeping the
//! offset the user meant and discarding the client's absolute value.

use chrono::{DateTime, Local, NaiveDateTime, TimeDelta};
use std::sync::{Arc, Mutex};
use tracing::{debug, warn};

/// Source of "now" for the scheduler.
pub trait Clock: Send + Sync + 'static {
    /// Current wall-clock instant on the server.
    fn now(&self) -> NaiveDateTime;
}

/// The process's local wall clock.
#[derive(Debug, Clone, Copy, Default)]
pub struct SystemClock;

impl Clock for SystemClock {
    fn now(&self) -> NaiveDateTime {
        Local::now().naive_local()
    }
}

/// Manually driven clock for tests and simulations.
#[derive(Debug, Clone)]
pub struct ManualClock {
    now: Arc<Mutex<NaiveDateTime>>,
}

impl ManualClock {
    pub fn new(start: NaiveDateTime) -> Self {
        Self {
            now: Arc::new(Mutex::new(start)),
        }
    }

    pub fn set(&self, at: NaiveDateTime) {
        if let Ok(mut now) = self.now.lock() {
            *now = at;
        }
    }

    pub fn advance(&self, by: TimeDelta) {
        if let Ok(mut now) = self.now.lock() {
            *now += by;
        }
    }
}

impl Clock for ManualClock {
    fn now(&self) -> NaiveDateTime {
        match self.now.lock() {
            Ok(now) => *now,
            Err(poisoned) => *poisoned.into_inner(),
        }
    }
}

/// Outcome of reconciling a resolved instant onto the server clock.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Reconciled {
    /// Instant to schedule on the server clock.
    pub server_target: NaiveDateTime,
    /// Offset between the client's "now" and the resolved target, when a
    /// usable client time was supplied.
    pub delta: Option<TimeDelta>,
}

/// Re-base `resolved_target` onto the server clock.
///
/// `server_target = server_now + (resolved_target - client_now)`. When the
/// hint is missing or unparseable, or the shifted instant would leave the
/// calendar, `resolved_target` is returned unchanged.
/// Negative deltas are passed through as-is.
pub fn reconcile(
    client_now_hint: Option<&str>,
    resolved_target: NaiveDateTime,
    server_now: NaiveDateTime,
) -> Reconciled {
    let unchanged = Reconciled {
        server_target: resolved_target,
        delta: None,
    };

    let Some(hint) = client_now_hint.map(str::trim).filter(|h| !h.is_empty()) else {
        return unchanged;
    };

    let Some(client_now) = parse_client_time(hint) else {
        warn!(hint, "cannot parse client time, scheduling resolver time unadjusted");
        return unchanged;
    };

    let delta = resolved_target - client_now;
    let Some(server_target) = server_now.checked_add_signed(delta) else {
        warn!(
            %client_now,
            %resolved_target,
            "client offset puts target outside the calendar, scheduling resolver time unadjusted"
        );
        return unchanged;
    };
    debug!(
        %client_now,
        %resolved_target,
        delta_secs = delta.num_seconds(),
        %server_target,
        "reconciled client time onto server clock"
    );

    Reconciled {
        server_target,
        delta: Some(delta),
    }
}

/// Parse a client-reported "now" into a naive wall-clock value.
///
/// Any UTC offset is dropped rather than applied: the resolver computed its
/// target in the same local frame, so only the difference matters.
pub fn parse_client_time(raw: &str) -> Option<NaiveDateTime> {
    let raw = raw.trim();
    if let Ok(with_offset) = DateTime::parse_from_rfc3339(raw) {
        return Some(with_offset.naive_local());
    }

    const NAIVE_FORMATS: &[&str] = &[
        "%Y-%m-%dT%H:%M:%S%.f",
        "%Y-%m-%d %H:%M:%S%.f",
        "%Y-%m-%dT%H:%M",
        "%Y-%m-%d %H:%M",
    ];
    if let Some(parsed) = NAIVE_FORMATS
        .iter()
        .find_map(|fmt| NaiveDateTime::parse_from_str(raw, fmt).ok())
    {
        return Some(parsed);
    }

    // Offset suffixes without a colon (e.g. `+0200`) or a trailing `Z` on a
    // minute-precision string.
    DateTime::parse_from_str(raw, "%Y-%m-%dT%H:%M:%S%.f%z")
        .ok()
        .map(|dt| dt.naive_local())
}

#[cfg(test)]
mod tests {
    #![allow(clippy::unwrap_used, clippy::expect_used)]

    use super::*;
    use chrono::NaiveDate;

    fn at(h: u32, m: u32, s: u32) -> NaiveDateTime {
        NaiveDate::from_ymd_opt(2024, 1, 1)
            .unwrap()
            .and_hms_opt(h, m, s)
            .unwrap()
    }

    #[test]
    fn reconcile_preserves_offset_on_skewed_server() {
        let out = reconcile(Some("2024-01-01T10:00:00"), at(10, 10, 0), at(10, 0, 5));
        assert_eq!(out.server_target, at(10, 10, 5));
        assert_eq!(out.delta, Some(TimeDelta::minutes(10)));
    }

    #[test]
    fn reconcile_without_hint_is_identity() {
        let out = reconcile(None, at(10, 10, 0), at(3, 0, 0));
        assert_eq!(out.server_target, at(10, 10, 0));
        assert!(out.delta.is_none());

        let blank = reconcile(Some("   "), at(10, 10, 0), at(3, 0, 0));
        assert_eq!(blank.server_target, at(10, 10, 0));
    }

    #[test]
    fn reconcile_with_garbage_hint_falls_back() {
        let out = reconcile(Some("not a time"), at(10, 10, 0), at(3, 0, 0));
        assert_eq!(out.server_target, at(10, 10, 0));
        assert!(out.delta.is_none());
    }

    #[test]
    fn reconcile_out_of_calendar_falls_back() {
        let server_now = NaiveDate::MAX.and_hms_opt(0, 0, 0).unwrap();
        let out = reconcile(Some("2024-01-01T10:00:00"), at(12, 0, 0), server_now);
        assert_eq!(out.server_target, at(12, 0, 0));
        assert!(out.delta.is_none());
    }

    #[test]
    fn reconcile_ignores_client_timezone() {
        // Client in UTC+5:30 reports its local time; the server runs in a
        // different zone entirely. Only the ten-minute gap survives.
        let out = reconcile(
            Some("2024-01-01T10:00:00+05:30"),
            at(10, 10, 0),
            at(4, 30, 0),
        );
        assert_eq!(out.server_target, at(4, 40, 0));
    }

    #[test]
    fn negative_delta_passes_through() {
        let out = reconcile(Some("2024-01-01 10:05:00"), at(10, 0, 0), at(12, 0, 0));
        assert_eq!(out.server_target, at(11, 55, 0));
        assert_eq!(out.delta, Some(TimeDelta::minutes(-5)));
    }

    #[test]
    fn parse_client_time_accepts_common_shapes() {
        let expected = at(10, 0, 0);
        for raw in [
            "2024-01-01T10:00:00",
            "2024-01-01 10:00:00",
            "2024-01-01T10:00:00.250",
            "2024-01-01T10:00",
            "2024-01-01 10:00",
            "2024-01-01T10:00:00Z",
            "2024-01-01T10:00:00-08:00",
        ] {
            let parsed = parse_client_time(raw).unwrap_or_else(|| panic!("parse {raw}"));
            assert_eq!(parsed.date(), expected.date(), "{raw}");
            assert_eq!(parsed.time().format("%H:%M:%S").to_string(), "10:00:00", "{raw}");
        }
        assert!(parse_client_time("10am").is_none());
    }

    #[test]
    fn manual_clock_advances() {
        let clock = ManualClock::new(at(9, 0, 0));
        clock.advance(TimeDelta::seconds(90));
        assert_eq!(clock.now(), at(9, 1, 30));
        clock.set(at(8, 0, 0));
        assert_eq!(clock.now(), at(8, 0, 0));
    }
}
