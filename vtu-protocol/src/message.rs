//! Input types the packet builders consume.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// A resolved GPS fix supplied by the embedding application.
///
/// The protocol engine never produces fixes itself; position sources feed
/// them in already resolved.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct LocationFix {
    pub latitude: f64,
    pub longitude: f64,
    /// Ground speed in km/h.
    #[serde(default)]
    pub speed_kmh: f64,
    /// Heading in degrees clockwise from north.
    #[serde(default)]
    pub course_deg: f64,
    /// Horizontal accuracy in meters, if the source reports one.
    #[serde(default)]
    pub accuracy_m: Option<f64>,
    /// Satellites used for the fix.
    #[serde(default)]
    pub satellites: u8,
    #[serde(default = "Utc::now")]
    pub timestamp: DateTime<Utc>,
    #[serde(default = "default_valid")]
    pub valid: bool,
}

fn default_valid() -> bool {
    true
}

impl LocationFix {
    /// Whether this fix may be reported upstream. Invalid fixes and the
    /// `(0, 0)` null island placeholder are skipped, never transmitted.
    pub fn is_reportable(&self) -> bool {
        self.valid && !(self.latitude == 0.0 && self.longitude == 0.0)
    }
}

/// Device health snapshot carried in heartbeat frames.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct DeviceStatus {
    /// Ignition sense line.
    pub acc_on: bool,
    /// Whether the GPS currently has a fix.
    pub gps_positioned: bool,
    /// Battery voltage level, 0..=6.
    pub voltage_level: u8,
    /// GSM signal strength, 0..=4.
    pub gsm_signal: u8,
    /// Active alarm condition, `AlarmType::Normal` when none.
    pub alarm: AlarmType,
}

impl DeviceStatus {
    /// Packs the flag bits of the heartbeat status byte: bit 0 ACC, bit 1
    /// GPS fix, bit 6 always set.
    pub fn status_byte(&self) -> u8 {
        let mut b = 1 << 6;
        if self.acc_on {
            b |= 1;
        }
        if self.gps_positioned {
            b |= 1 << 1;
        }
        b
    }
}

impl Default for DeviceStatus {
    fn default() -> Self {
        Self {
            acc_on: false,
            gps_positioned: false,
            voltage_level: 6,
            gsm_signal: 4,
            alarm: AlarmType::Normal,
        }
    }
}

/// Alarm condition codes carried in heartbeat and alarm frames.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum AlarmType {
    Normal,
    Sos,
    PowerCut,
    Vibration,
    GeofenceIn,
    GeofenceOut,
    Overspeed,
    AccOn,
    AccOff,
    LowBattery,
}

impl AlarmType {
    /// Wire code for this alarm.
    pub fn code(self) -> u8 {
        match self {
            AlarmType::Normal => 0x00,
            AlarmType::Sos => 0x01,
            AlarmType::PowerCut => 0x02,
            AlarmType::Vibration => 0x03,
            AlarmType::GeofenceIn => 0x04,
            AlarmType::GeofenceOut => 0x05,
            AlarmType::Overspeed => 0x06,
            AlarmType::AccOn => 0x09,
            AlarmType::AccOff => 0x0A,
            AlarmType::LowBattery => 0x0E,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;

    fn fix(lat: f64, lon: f64) -> LocationFix {
        LocationFix {
            latitude: lat,
            longitude: lon,
            speed_kmh: 0.0,
            course_deg: 0.0,
            accuracy_m: None,
            satellites: 8,
            timestamp: Utc.with_ymd_and_hms(2024, 1, 1, 0, 0, 0).unwrap(),
            valid: true,
        }
    }

    #[test]
    fn test_fix_reportable() {
        assert!(fix(52.5, 13.4).is_reportable());
        assert!(fix(0.0, 13.4).is_reportable());
        assert!(!fix(0.0, 0.0).is_reportable());

        let mut invalid = fix(52.5, 13.4);
        invalid.valid = false;
        assert!(!invalid.is_reportable());
    }

    #[test]
    fn test_status_byte_bits() {
        let mut status = DeviceStatus::default();
        assert_eq!(status.status_byte(), 0b0100_0000);

        status.acc_on = true;
        assert_eq!(status.status_byte(), 0b0100_0001);

        status.gps_positioned = true;
        assert_eq!(status.status_byte(), 0b0100_0011);
    }

    #[test]
    fn test_alarm_codes() {
        assert_eq!(AlarmType::Normal.code(), 0x00);
        assert_eq!(AlarmType::Sos.code(), 0x01);
        assert_eq!(AlarmType::PowerCut.code(), 0x02);
        assert_eq!(AlarmType::Overspeed.code(), 0x06);
        assert_eq!(AlarmType::AccOn.code(), 0x09);
        assert_eq!(AlarmType::AccOff.code(), 0x0A);
        assert_eq!(AlarmType::LowBattery.code(), 0x0E);
    }

    #[test]
    fn test_fix_deserializes_with_defaults() {
        let fix: LocationFix =
            serde_json::from_str(r#"{"latitude": 52.5, "longitude": 13.4}"#).unwrap();
        assert_eq!(fix.latitude, 52.5);
        assert_eq!(fix.speed_kmh, 0.0);
        assert_eq!(fix.satellites, 0);
        assert!(fix.valid);
    }
}
