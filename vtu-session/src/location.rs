//! Location feed plumbing and reference position sources.
//!
//! Sources publish into a watch channel and the session samples the latest
//! value whenever a report is due. A source that stops publishing leaves
//! the last fix in place; the session keeps reporting it with its original
//! timestamp until something fresher arrives.

use std::path::Path;
use std::time::Duration;

use chrono::Utc;
use tokio::sync::watch;
use tracing::{debug, info, warn};
use vtu_protocol::LocationFix;

use crate::error::SessionError;

pub type LocationSender = watch::Sender<Option<LocationFix>>;
pub type LocationReceiver = watch::Receiver<Option<LocationFix>>;

/// Creates the channel a position source publishes into and the session
/// samples from. Starts empty; the session skips location reports until
/// the first fix arrives.
pub fn location_channel() -> (LocationSender, LocationReceiver) {
    watch::channel(None)
}

/// Publishes a single fixed position, re-stamped at a steady cadence so
/// reports carry a current timestamp.
#[derive(Debug, Clone)]
pub struct FixedPosition {
    fix: LocationFix,
    refresh: Duration,
}

impl FixedPosition {
    pub fn new(latitude: f64, longitude: f64) -> Self {
        Self {
            fix: LocationFix {
                latitude,
                longitude,
                speed_kmh: 0.0,
                course_deg: 0.0,
                accuracy_m: None,
                satellites: 10,
                timestamp: Utc::now(),
                valid: true,
            },
            refresh: Duration::from_secs(5),
        }
    }

    /// Replaces the whole fix, keeping the refresh cadence.
    pub fn with_fix(mut self, fix: LocationFix) -> Self {
        self.fix = fix;
        self
    }

    pub fn with_refresh(mut self, refresh: Duration) -> Self {
        self.refresh = refresh;
        self
    }

    /// Runs until every receiver of the channel is gone.
    pub async fn run(self, tx: LocationSender) {
        debug!(
            latitude = self.fix.latitude,
            longitude = self.fix.longitude,
            "fixed position source started"
        );
        loop {
            let mut fix = self.fix.clone();
            fix.timestamp = Utc::now();
            if tx.send(Some(fix)).is_err() {
                return;
            }
            tokio::time::sleep(self.refresh).await;
        }
    }
}

/// Replays a recorded route, one fix per step interval.
#[derive(Debug, Clone)]
pub struct RoutePlayer {
    fixes: Vec<LocationFix>,
    step: Duration,
    repeat: bool,
}

impl RoutePlayer {
    pub fn new(fixes: Vec<LocationFix>, step: Duration) -> Self {
        Self {
            fixes,
            step,
            repeat: true,
        }
    }

    /// Loads a route from a JSON file containing an array of fixes.
    /// Missing `timestamp` and `valid` fields take their defaults.
    pub fn from_file(path: impl AsRef<Path>, step: Duration) -> Result<Self, SessionError> {
        let path = path.as_ref();
        let content = std::fs::read_to_string(path)
            .map_err(|e| SessionError::RouteFile(format!("{}: {}", path.display(), e)))?;
        let fixes: Vec<LocationFix> = serde_json::from_str(&content)
            .map_err(|e| SessionError::RouteFile(format!("{}: {}", path.display(), e)))?;
        Ok(Self::new(fixes, step))
    }

    /// Whether to restart from the first fix after the last (default true).
    pub fn with_repeat(mut self, repeat: bool) -> Self {
        self.repeat = repeat;
        self
    }

    pub fn len(&self) -> usize {
        self.fixes.len()
    }

    pub fn is_empty(&self) -> bool {
        self.fixes.is_empty()
    }

    /// Runs until the route ends (when not repeating) or until every
    /// receiver of the channel is gone.
    pub async fn run(self, tx: LocationSender) {
        if self.fixes.is_empty() {
            warn!("route player started with an empty route");
            return;
        }
        info!(
            fixes = self.fixes.len(),
            step_ms = self.step.as_millis() as u64,
            repeat = self.repeat,
            "route player started"
        );
        loop {
            for fix in &self.fixes {
                let mut fix = fix.clone();
                fix.timestamp = Utc::now();
                if tx.send(Some(fix)).is_err() {
                    return;
                }
                tokio::time::sleep(self.step).await;
            }
            if !self.repeat {
                break;
            }
        }
        debug!("route complete");
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;

    fn fix(latitude: f64, longitude: f64) -> LocationFix {
        LocationFix {
            latitude,
            longitude,
            speed_kmh: 40.0,
            course_deg: 90.0,
            accuracy_m: None,
            satellites: 8,
            timestamp: Utc::now(),
            valid: true,
        }
    }

    #[tokio::test]
    async fn test_channel_starts_empty() {
        let (_tx, rx) = location_channel();
        assert!(rx.borrow().is_none());
    }

    #[tokio::test]
    async fn test_fixed_position_publishes_and_restamps() {
        let (tx, mut rx) = location_channel();
        let source = FixedPosition::new(-23.55, -46.63).with_refresh(Duration::from_millis(5));
        let handle = tokio::spawn(source.run(tx));

        rx.changed().await.unwrap();
        let first = rx.borrow_and_update().clone().unwrap();
        assert_eq!(first.latitude, -23.55);
        assert_eq!(first.longitude, -46.63);

        rx.changed().await.unwrap();
        let second = rx.borrow_and_update().clone().unwrap();
        assert!(second.timestamp >= first.timestamp);

        drop(rx);
        tokio::time::timeout(Duration::from_secs(1), handle)
            .await
            .unwrap()
            .unwrap();
    }

    #[tokio::test]
    async fn test_route_player_publishes_in_order() {
        let (tx, mut rx) = location_channel();
        let route = vec![fix(1.0, 1.0), fix(2.0, 2.0), fix(3.0, 3.0)];
        let player = RoutePlayer::new(route, Duration::from_millis(1)).with_repeat(false);
        let handle = tokio::spawn(player.run(tx));

        let mut seen = Vec::new();
        while rx.changed().await.is_ok() {
            if let Some(fix) = rx.borrow_and_update().clone() {
                seen.push(fix.latitude);
            }
        }
        handle.await.unwrap();
        assert_eq!(seen, vec![1.0, 2.0, 3.0]);
    }

    #[tokio::test]
    async fn test_route_player_stops_when_receiver_dropped() {
        let (tx, rx) = location_channel();
        let route = vec![fix(1.0, 1.0), fix(2.0, 2.0)];
        let player = RoutePlayer::new(route, Duration::from_millis(1));
        let handle = tokio::spawn(player.run(tx));

        drop(rx);
        tokio::time::timeout(Duration::from_secs(1), handle)
            .await
            .unwrap()
            .unwrap();
    }

    #[test]
    fn test_route_from_file() {
        let mut file = tempfile::NamedTempFile::new().unwrap();
        write!(
            file,
            r#"[
                {{"latitude": -23.55, "longitude": -46.63, "speed_kmh": 35.0, "course_deg": 180.0, "satellites": 9}},
                {{"latitude": -23.56, "longitude": -46.64, "course_deg": 181.0, "satellites": 9}}
            ]"#
        )
        .unwrap();

        let player = RoutePlayer::from_file(file.path(), Duration::from_secs(1)).unwrap();
        assert_eq!(player.len(), 2);
        assert!(!player.is_empty());
    }

    #[test]
    fn test_route_from_missing_file() {
        let err = RoutePlayer::from_file("/nonexistent/route.json", Duration::from_secs(1))
            .unwrap_err();
        assert!(matches!(err, SessionError::RouteFile(_)));
    }

    #[test]
    fn test_route_from_malformed_file() {
        let mut file = tempfile::NamedTempFile::new().unwrap();
        write!(file, "not json").unwrap();
        let err = RoutePlayer::from_file(file.path(), Duration::from_secs(1)).unwrap_err();
        assert!(matches!(err, SessionError::RouteFile(_)));
    }
}
