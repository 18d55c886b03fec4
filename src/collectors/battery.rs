use super::sysfs::read_trimmed;
use super::SourceError;
use crate::info::{
    BatteryHealth, BatteryInfo, BatteryStatus, PowerSource, UNDEFINED, UNKNOWN_LEVEL,
};
use std::collections::HashMap;
use std::fs;
use std::path::{Path, PathBuf};
use std::sync::{Arc, PoisonError, RwLock};
use std::time::Duration;
use tokio::sync::watch;
use tokio::time::MissedTickBehavior;
use tracing::{debug, info, warn};

#[derive(Debug, Clone, Default, PartialEq)]
pub struct BatteryPayload {
    pub level: Option<i32>,
    pub scale: Option<i32>,
    pub status: Option<String>,
    pub health: Option<String>,
    pub plugged: Option<String>,
    pub technology: Option<String>,
    /// Tenths of a degree Celsius.
    pub temperature_tenths: Option<i32>,
    pub voltage_millivolts: Option<i32>,
}

impl BatteryPayload {
    fn level_percent(&self) -> i32 {
        let percent = match (self.level, self.scale) {
            (Some(level), Some(scale)) if level >= 0 && scale > 0 => i64::from(level)
                .checked_mul(100)
                .map(|scaled| scaled / i64::from(scale)),
            (Some(level), None) if level >= 0 => Some(i64::from(level)),
            _ => None,
        };
        percent
            .map(|p| p.clamp(0, 100) as i32)
            .unwrap_or(UNKNOWN_LEVEL)
    }

    pub fn decode(&self) -> BatteryInfo {
        BatteryInfo {
            level: self.level_percent(),
            status: self
                .status
                .as_deref()
                .map(BatteryStatus::from_platform)
                .unwrap_or_default(),
            health: self
                .health
                .as_deref()
                .map(BatteryHealth::from_platform)
                .unwrap_or_default(),
            plugged: self
                .plugged
                .as_deref()
                .map(PowerSource::from_platform)
                .unwrap_or_default(),
            technology: self
                .technology
                .as_deref()
                .map(str::trim)
                .filter(|t| !t.is_empty() && !t.eq_ignore_ascii_case("unknown"))
                .unwrap_or(UNDEFINED)
                .to_string(),
            temperature_celsius: self
                .temperature_tenths
                .map(|t| f64::from(t) / 10.0)
                .unwrap_or(0.0),
            voltage_volts: self
                .voltage_millivolts
                .map(|mv| f64::from(mv) / 1000.0)
                .unwrap_or(0.0),
        }
    }
}

#[derive(Debug, Clone, Default)]
pub struct BatteryState {
    latest: Arc<RwLock<Option<BatteryPayload>>>,
}

impl BatteryState {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn deliver(&self, payload: BatteryPayload) -> bool {
        let mut guard = self.latest.write().unwrap_or_else(PoisonError::into_inner);
        if guard.as_ref() == Some(&payload) {
            return false;
        }
        *guard = Some(payload);
        true
    }

    pub fn latest(&self) -> Option<BatteryPayload> {
        self.latest
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .clone()
    }
}

fn parse_uevent(text: &str) -> HashMap<String, String> {
    text.lines()
        .filter_map(|line| {
            let (key, value) = line.split_once('=')?;
            let key = key.trim().strip_prefix("POWER_SUPPLY_").unwrap_or(key.trim());
            Some((key.to_string(), value.trim().to_string()))
        })
        .collect()
}

/// Builds a payload from `/sys/class/power_supply`. `Ok(None)` means the
/// machine has no battery.
pub fn read_power_supply(dir: &Path) -> Result<Option<BatteryPayload>, SourceError> {
    let entries = fs::read_dir(dir).map_err(|err| SourceError::io(dir, err))?;
    let mut supplies: Vec<PathBuf> = entries.flatten().map(|e| e.path()).collect();
    supplies.sort();

    let mut battery: Option<HashMap<String, String>> = None;
    let mut online_source: Option<String> = None;

    for supply in supplies {
        let Some(text) = read_trimmed(&supply.join("uevent")) else {
            continue;
        };
        let props = parse_uevent(&text);
        let kind = props
            .get("TYPE")
            .cloned()
            .or_else(|| read_trimmed(&supply.join("type")))
            .unwrap_or_default();
        if kind.eq_ignore_ascii_case("battery") {
            if props.get("SCOPE").is_some_and(|s| s == "Device") {
                // Peripheral batteries (mice, headsets) are not the system battery.
                continue;
            }
            if battery.is_none() {
                battery = Some(props);
            }
        } else if props.get("ONLINE").is_some_and(|v| v == "1") && online_source.is_none() {
            online_source = Some(kind);
        }
    }

    let Some(props) = battery else {
        return Ok(None);
    };
    let int = |key: &str| props.get(key).and_then(|v| v.parse::<i64>().ok());
    let int32 = |v: i64| i32::try_from(v).ok();
    let text = |key: &str| props.get(key).cloned();

    Ok(Some(BatteryPayload {
        level: int("CAPACITY").and_then(int32),
        scale: Some(100),
        status: text("STATUS"),
        health: text("HEALTH"),
        plugged: Some(online_source.unwrap_or_else(|| "Battery".to_string())),
        technology: text("TECHNOLOGY"),
        temperature_tenths: int("TEMP").and_then(int32),
        voltage_millivolts: int("VOLTAGE_NOW").and_then(|uv| int32(uv / 1000)),
    }))
}

pub async fn run_battery_poller(
    state: BatteryState,
    dir: PathBuf,
    interval: Duration,
    mut shutdown: watch::Receiver<bool>,
) {
    let mut ticker = tokio::time::interval(interval);
    ticker.set_missed_tick_behavior(MissedTickBehavior::Skip);
    let mut warned = false;

    loop {
        tokio::select! {
            _ = shutdown.changed() => {
                debug!("остановка опроса батареи");
                break;
            }
            _ = ticker.tick() => {
                let dir = dir.clone();
                let result = tokio::task::spawn_blocking(move || read_power_supply(&dir)).await;
                match result {
                    Ok(Ok(Some(payload))) => {
                        if state.deliver(payload) {
                            debug!("получено новое состояние батареи");
                        }
                    }
                    Ok(Ok(None)) => {
                        if !warned {
                            info!("батарея не обнаружена");
                            warned = true;
                        }
                    }
                    Ok(Err(err)) => {
                        if !warned {
                            warn!(error = %err, "не удалось прочитать состояние питания");
                            warned = true;
                        }
                    }
                    Err(err) => warn!(error = %err, "задача чтения батареи завершилась с ошибкой"),
                }
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    fn full_payload() -> BatteryPayload {
        BatteryPayload {
            level: Some(95),
            scale: Some(100),
            status: Some("Charging".to_string()),
            health: Some("Good".to_string()),
            plugged: Some("Mains".to_string()),
            technology: Some("Li-ion".to_string()),
            temperature_tenths: Some(355),
            voltage_millivolts: Some(4200),
        }
    }

    #[test]
    fn decodes_every_field() {
        let info = full_payload().decode();
        assert_eq!(info.level, 95);
        assert_eq!(info.status, BatteryStatus::Charging);
        assert_eq!(info.health, BatteryHealth::Good);
        assert_eq!(info.plugged, PowerSource::Mains);
        assert_eq!(info.technology, "Li-ion");
        assert!((info.temperature_celsius - 35.5).abs() < 1e-9);
        assert!((info.voltage_volts - 4.2).abs() < 1e-9);
    }

    #[test]
    fn empty_payload_decodes_to_sentinels() {
        let info = BatteryPayload::default().decode();
        assert_eq!(info.level, UNKNOWN_LEVEL);
        assert_eq!(info.status.to_string(), UNDEFINED);
        assert_eq!(info.health.to_string(), UNDEFINED);
        assert_eq!(info.plugged.to_string(), UNDEFINED);
        assert_eq!(info.technology, UNDEFINED);
        assert_eq!(info.temperature_celsius, 0.0);
        assert_eq!(info.voltage_volts, 0.0);
    }

    #[test]
    fn level_is_scaled_and_negative_is_unknown() {
        let payload = BatteryPayload {
            level: Some(50),
            scale: Some(200),
            ..BatteryPayload::default()
        };
        assert_eq!(payload.decode().level, 25);
        let payload = BatteryPayload {
            level: Some(-1),
            ..BatteryPayload::default()
        };
        assert_eq!(payload.decode().level, UNKNOWN_LEVEL);
    }

    #[test]
    fn oversized_level_is_clamped_not_overflowed() {
        let payload = BatteryPayload {
            level: Some(30_000_000),
            scale: Some(100),
            ..BatteryPayload::default()
        };
        assert_eq!(payload.decode().level, 100);
        let payload = BatteryPayload {
            level: Some(i32::MAX),
            scale: Some(1),
            ..BatteryPayload::default()
        };
        assert_eq!(payload.decode().level, 100);
        let payload = BatteryPayload {
            level: Some(i32::MAX),
            ..BatteryPayload::default()
        };
        assert_eq!(payload.decode().level, 100);
    }

    #[test]
    fn out_of_range_uevent_values_are_dropped() {
        let tmp = TempDir::new().unwrap();
        let bat = tmp.path().join("BAT0");
        fs::create_dir_all(&bat).unwrap();
        fs::write(
            bat.join("uevent"),
            "POWER_SUPPLY_TYPE=Battery\nPOWER_SUPPLY_CAPACITY=99999999999\nPOWER_SUPPLY_TEMP=301\n",
        )
        .unwrap();
        let payload = read_power_supply(tmp.path()).unwrap().unwrap();
        assert_eq!(payload.level, None);
        assert_eq!(payload.temperature_tenths, Some(301));
        assert_eq!(payload.decode().level, UNKNOWN_LEVEL);
    }

    #[test]
    fn state_distinguishes_no_payload_from_sentinel_payload() {
        let state = BatteryState::new();
        assert!(state.latest().is_none());

        assert!(state.deliver(BatteryPayload::default()));
        assert_eq!(state.latest(), Some(BatteryPayload::default()));
        assert!(!state.deliver(BatteryPayload::default()));
        assert!(state.deliver(full_payload()));
    }

    #[test]
    fn reads_battery_and_adapter_from_sysfs() {
        let tmp = TempDir::new().unwrap();
        let bat = tmp.path().join("BAT0");
        let ac = tmp.path().join("AC");
        let mouse = tmp.path().join("hidpp_battery_0");
        fs::create_dir_all(&bat).unwrap();
        fs::create_dir_all(&ac).unwrap();
        fs::create_dir_all(&mouse).unwrap();
        fs::write(
            bat.join("uevent"),
            "POWER_SUPPLY_NAME=BAT0\nPOWER_SUPPLY_TYPE=Battery\nPOWER_SUPPLY_STATUS=Charging\n\
             POWER_SUPPLY_TECHNOLOGY=Li-ion\nPOWER_SUPPLY_VOLTAGE_NOW=12450000\n\
             POWER_SUPPLY_CAPACITY=81\n",
        )
        .unwrap();
        fs::write(
            ac.join("uevent"),
            "POWER_SUPPLY_NAME=AC\nPOWER_SUPPLY_TYPE=Mains\nPOWER_SUPPLY_ONLINE=1\n",
        )
        .unwrap();
        fs::write(
            mouse.join("uevent"),
            "POWER_SUPPLY_TYPE=Battery\nPOWER_SUPPLY_SCOPE=Device\nPOWER_SUPPLY_CAPACITY=5\n",
        )
        .unwrap();

        let payload = read_power_supply(tmp.path()).unwrap().unwrap();
        assert_eq!(payload.level, Some(81));
        assert_eq!(payload.voltage_millivolts, Some(12450));
        assert_eq!(payload.plugged.as_deref(), Some("Mains"));
        assert_eq!(payload.health, None);

        let info = payload.decode();
        assert_eq!(info.level, 81);
        assert_eq!(info.health, BatteryHealth::Unknown);
        assert!((info.voltage_volts - 12.45).abs() < 1e-9);
    }

    #[test]
    fn desktop_without_battery() {
        let tmp = TempDir::new().unwrap();
        let ac = tmp.path().join("AC");
        fs::create_dir_all(&ac).unwrap();
        fs::write(ac.join("uevent"), "POWER_SUPPLY_TYPE=Mains\nPOWER_SUPPLY_ONLINE=1\n").unwrap();
        assert_eq!(read_power_supply(tmp.path()).unwrap(), None);
    }

    #[tokio::test]
    async fn poller_delivers_then_stops() {
        let tmp = TempDir::new().unwrap();
        let bat = tmp.path().join("BAT1");
        fs::create_dir_all(&bat).unwrap();
        fs::write(
            bat.join("uevent"),
            "POWER_SUPPLY_TYPE=Battery\nPOWER_SUPPLY_CAPACITY=64\nPOWER_SUPPLY_STATUS=Discharging\n",
        )
        .unwrap();

        let state = BatteryState::new();
        let (tx, rx) = watch::channel(false);
        let task = tokio::spawn(run_battery_poller(
            state.clone(),
            tmp.path().to_path_buf(),
            Duration::from_millis(10),
            rx,
        ));

        for _ in 0..100 {
            if state.latest().is_some() {
                break;
            }
            tokio::time::sleep(Duration::from_millis(10)).await;
        }
        let info = state.latest().unwrap().decode();
        assert_eq!(info.level, 64);
        assert_eq!(info.status, BatteryStatus::Discharging);

        tx.send(true).unwrap();
        tokio::time::timeout(Duration::from_secs(2), task)
            .await
            .unwrap()
            .unwrap();
    }
}
