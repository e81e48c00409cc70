//! Device liveness from heartbeat age.
//!
//! A device is online iff the age of its last heartbeat is strictly below
//! the policy threshold. A device that never reported is treated as having
//! reported at the Unix epoch.

use chrono::{DateTime, Duration, Utc};

use crate::models::{Device, DeviceRecord, DeviceStatus};

/// Display name for devices whose agent did not report one.
pub const UNNAMED_DEVICE: &str = "Unnamed PC";

/// Staleness policy for agent heartbeats.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct LivenessPolicy {
    /// Maximum heartbeat age for a device to count as online.
    pub online_threshold: Duration,
    /// Expected agent heartbeat cadence.
    pub heartbeat_interval: Duration,
}

impl Default for LivenessPolicy {
    /// 2.5 minutes against a 1 minute heartbeat: one missed beat is tolerated.
    fn default() -> Self {
        Self {
            online_threshold: Duration::seconds(150),
            heartbeat_interval: Duration::seconds(60),
        }
    }
}

impl LivenessPolicy {
    pub fn new(online_threshold: Duration, heartbeat_interval: Duration) -> Self {
        Self {
            online_threshold,
            heartbeat_interval,
        }
    }

    /// Number of consecutive heartbeats that may be missed before offline.
    pub fn tolerated_missed_beats(&self) -> i64 {
        let interval = self.heartbeat_interval.num_milliseconds();
        if interval <= 0 {
            return 0;
        }
        (self.online_threshold.num_milliseconds() / interval - 1).max(0)
    }

    pub fn status(&self, last_heartbeat: Option<DateTime<Utc>>, now: DateTime<Utc>) -> DeviceStatus {
        let last = last_heartbeat.unwrap_or(DateTime::<Utc>::UNIX_EPOCH);
        if now.signed_duration_since(last) < self.online_threshold {
            DeviceStatus::Online
        } else {
            DeviceStatus::Offline
        }
    }

    /// Evaluate registry records into display devices, online first.
    ///
    /// The sort is stable, so registry order is kept within each group.
    pub fn evaluate(&self, records: Vec<DeviceRecord>, now: DateTime<Utc>) -> Vec<Device> {
        let mut devices: Vec<Device> = records
            .into_iter()
            .map(|r| {
                let status = self.status(r.last_heartbeat, now);
                Device {
                    name: r
                        .name
                        .filter(|n| !n.trim().is_empty())
                        .unwrap_or_else(|| UNNAMED_DEVICE.to_string()),
                    id: r.id,
                    printers: r.printers,
                    last_heartbeat: r.last_heartbeat.unwrap_or(DateTime::<Utc>::UNIX_EPOCH),
                    status,
                }
            })
            .collect();
        devices.sort_by_key(|d| match d.status {
            DeviceStatus::Online => 0,
            DeviceStatus::Offline => 1,
        });
        devices
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn record(id: &str, last: Option<DateTime<Utc>>) -> DeviceRecord {
        DeviceRecord {
            id: id.to_string(),
            name: Some(format!("PC {}", id)),
            printers: vec!["Printer".to_string()],
            last_heartbeat: last,
        }
    }

    #[test]
    fn test_online_within_threshold() {
        let policy = LivenessPolicy::default();
        let t = Utc::now();
        assert_eq!(policy.status(Some(t), t + Duration::minutes(2)), DeviceStatus::Online);
        assert_eq!(policy.status(Some(t), t + Duration::minutes(3)), DeviceStatus::Offline);
        assert_eq!(
            policy.status(Some(t), t + Duration::seconds(150)),
            DeviceStatus::Offline
        );
    }

    #[test]
    fn test_missing_heartbeat_is_offline() {
        let policy = LivenessPolicy::default();
        assert_eq!(policy.status(None, Utc::now()), DeviceStatus::Offline);
    }

    #[test]
    fn test_evaluate_sorts_online_first_stably() {
        let policy = LivenessPolicy::default();
        let now = Utc::now();
        let devices = policy.evaluate(
            vec![
                record("a", None),
                record("b", Some(now - Duration::seconds(10))),
                record("c", Some(now - Duration::seconds(180))),
                record("d", Some(now - Duration::seconds(30))),
            ],
            now,
        );
        let ids: Vec<&str> = devices.iter().map(|d| d.id.as_str()).collect();
        assert_eq!(ids, vec!["b", "d", "a", "c"]);
        assert_eq!(devices[2].last_heartbeat, DateTime::<Utc>::UNIX_EPOCH);
    }

    #[test]
    fn test_unnamed_device() {
        let policy = LivenessPolicy::default();
        let mut r = record("x", None);
        r.name = None;
        let devices = policy.evaluate(vec![r], Utc::now());
        assert_eq!(devices[0].name, UNNAMED_DEVICE);
    }

    #[test]
    fn test_tolerated_missed_beats() {
        assert_eq!(LivenessPolicy::default().tolerated_missed_beats(), 1);
        let strict = LivenessPolicy::new(Duration::seconds(60), Duration::seconds(60));
        assert_eq!(strict.tolerated_missed_beats(), 0);
    }
}
