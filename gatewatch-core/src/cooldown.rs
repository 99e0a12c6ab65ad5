use crate::config::CooldownConfig;
use crate::matcher::UNKNOWN_LABEL;
use chrono::{DateTime, Duration, Local};
use std::collections::HashMap;

/// Per-label rate limit on outbound events.
///
/// Unknown faces use a short cooldown so intruder alerts stay responsive;
/// known labels use a long one so attendance isn't logged every cycle.
/// State lives only as long as the process.
#[derive(Debug, Clone)]
pub struct CooldownGate {
    unknown: Duration,
    known: Duration,
    last_emitted: HashMap<String, DateTime<Local>>,
}

impl CooldownGate {
    pub fn new(unknown: Duration, known: Duration) -> Self {
        Self {
            unknown,
            known,
            last_emitted: HashMap::new(),
        }
    }

    /// Out-of-range values saturate to the longest representable cooldown.
    pub fn from_config(config: &CooldownConfig) -> Self {
        Self::new(seconds(config.unknown_secs), seconds(config.known_secs))
    }

    pub fn cooldown(&self, label: &str) -> Duration {
        if label == UNKNOWN_LABEL {
            self.unknown
        } else {
            self.known
        }
    }

    /// True when `label` has never been emitted or its last emission is
    /// strictly more than its cooldown before `now`.
    pub fn should_emit(&self, label: &str, now: DateTime<Local>) -> bool {
        match self.last_emitted.get(label) {
            Some(&last) => now - last > self.cooldown(label),
            None => true,
        }
    }

    pub fn record_emission(&mut self, label: &str, now: DateTime<Local>) {
        self.last_emitted.insert(label.to_string(), now);
    }

    pub fn last_emission(&self, label: &str) -> Option<DateTime<Local>> {
        self.last_emitted.get(label).copied()
    }
}

fn seconds(secs: u64) -> Duration {
    i64::try_from(secs)
        .ok()
        .and_then(Duration::try_seconds)
        .unwrap_or(Duration::MAX)
}

impl Default for CooldownGate {
    fn default() -> Self {
        Self::from_config(&CooldownConfig::default())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;

    fn t0() -> DateTime<Local> {
        Local.with_ymd_and_hms(2025, 3, 14, 9, 0, 0).unwrap()
    }

    #[test]
    fn test_unknown_cooldown() {
        let mut gate = CooldownGate::default();
        assert!(gate.should_emit(UNKNOWN_LABEL, t0()));

        gate.record_emission(UNKNOWN_LABEL, t0());
        assert!(!gate.should_emit(UNKNOWN_LABEL, t0() + Duration::seconds(5)));
        assert!(gate.should_emit(UNKNOWN_LABEL, t0() + Duration::seconds(11)));
    }

    #[test]
    fn test_boundary_is_exclusive() {
        let mut gate = CooldownGate::default();
        gate.record_emission(UNKNOWN_LABEL, t0());

        assert!(!gate.should_emit(UNKNOWN_LABEL, t0() + Duration::seconds(10)));
        assert!(gate.should_emit(
            UNKNOWN_LABEL,
            t0() + Duration::seconds(10) + Duration::milliseconds(1)
        ));
    }

    #[test]
    fn test_known_labels_use_long_cooldown() {
        let mut gate = CooldownGate::default();
        gate.record_emission("Alice", t0());

        assert!(!gate.should_emit("Alice", t0() + Duration::seconds(30)));
        assert!(!gate.should_emit("Alice", t0() + Duration::seconds(60)));
        assert!(gate.should_emit("Alice", t0() + Duration::seconds(61)));
    }

    #[test]
    fn test_labels_are_independent() {
        let mut gate = CooldownGate::default();
        gate.record_emission("Alice", t0());

        assert!(gate.should_emit("Bob", t0()));
        assert!(gate.should_emit(UNKNOWN_LABEL, t0()));
        assert_eq!(gate.last_emission("Bob"), None);
        assert_eq!(gate.last_emission("Alice"), Some(t0()));
    }

    #[test]
    fn test_huge_cooldown_saturates() {
        let mut gate = CooldownGate::from_config(&CooldownConfig {
            unknown_secs: 10_000_000_000_000_000,
            known_secs: u64::MAX,
        });
        assert_eq!(gate.cooldown("Alice"), Duration::MAX);
        assert_eq!(gate.cooldown(UNKNOWN_LABEL), Duration::MAX);

        gate.record_emission("Alice", t0());
        assert!(!gate.should_emit("Alice", t0() + Duration::days(365)));
    }

    #[test]
    fn test_configured_durations() {
        let gate = CooldownGate::from_config(&CooldownConfig {
            unknown_secs: 3,
            known_secs: 120,
        });
        assert_eq!(gate.cooldown(UNKNOWN_LABEL), Duration::seconds(3));
        assert_eq!(gate.cooldown("Carol"), Duration::seconds(120));
    }
}
