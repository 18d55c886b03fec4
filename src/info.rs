use serde::Serialize;
use std::fmt;

pub const UNDEFINED: &str = "undefined";

/// Sentinel battery level for "not reported", distinct from an empty battery.
pub const UNKNOWN_LEVEL: i32 = -1;

#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct DeviceInfo {
    pub collected_at_unix: i64,
    pub cpu: CpuInfo,
    pub gpu: GpuInfo,
    pub ram: RamInfo,
    pub storage: StorageInfo,
    pub display: DisplayInfo,
    pub system: SystemInfo,
    pub network: NetworkInfo,
    pub thermal: Vec<ThermalInfo>,
    pub sensors: Vec<SensorInfo>,
    pub cameras: Vec<CameraInfo>,
    pub sims: Vec<SimInfo>,
    pub apps: Vec<AppInfo>,
    pub battery: Option<BatteryInfo>,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct CpuInfo {
    pub brand: String,
    pub vendor: String,
    pub architecture: String,
    pub physical_cores: u32,
    pub logical_cores: u32,
    pub usage_percent: f64,
    pub cores: Vec<CoreInfo>,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct CoreInfo {
    pub index: u32,
    pub current_mhz: u64,
    pub min_mhz: Option<u64>,
    pub max_mhz: Option<u64>,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct GpuInfo {
    pub vendor: String,
    pub renderer: String,
    pub driver_version: String,
    pub memory_total_bytes: u64,
    pub load_percent: Option<u8>,
    pub temperature_celsius: Option<f64>,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct RamInfo {
    pub total_bytes: u64,
    pub available_bytes: u64,
    pub used_bytes: u64,
    pub swap_total_bytes: u64,
    pub swap_used_bytes: u64,
}

impl RamInfo {
    pub fn usage_percent(&self) -> f64 {
        if self.total_bytes > 0 {
            (self.used_bytes as f64 / self.total_bytes as f64) * 100.0
        } else {
            0.0
        }
    }
}

#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct StorageInfo {
    pub total_bytes: u64,
    pub available_bytes: u64,
    pub volumes: Vec<VolumeInfo>,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct VolumeInfo {
    pub name: String,
    pub mount_point: String,
    pub file_system: String,
    pub total_bytes: u64,
    pub available_bytes: u64,
    pub removable: bool,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct DisplayInfo {
    pub connector: String,
    pub width: u32,
    pub height: u32,
    pub refresh_rate_hz: f64,
    pub modes: Vec<String>,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct SystemInfo {
    pub host_name: String,
    pub os_name: String,
    pub os_version: String,
    pub kernel_version: String,
    pub distribution_id: String,
    pub uptime_seconds: u64,
    pub boot_time: String,
    pub process_count: u64,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct NetworkInfo {
    pub default_interface: Option<String>,
    pub interfaces: Vec<InterfaceInfo>,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct InterfaceInfo {
    pub name: String,
    pub received_bytes: u64,
    pub transmitted_bytes: u64,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct ThermalInfo {
    pub zone: String,
    pub temperature_celsius: f64,
    pub critical_celsius: Option<f64>,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct SensorInfo {
    pub name: String,
    pub kind: String,
    pub parent: String,
    pub value: f64,
    pub unit: String,
    pub min: Option<f64>,
    pub max: Option<f64>,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct CameraInfo {
    pub id: String,
    pub name: String,
    pub device_path: String,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct SimInfo {
    pub slot: u32,
    pub operator: String,
    pub state: String,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct AppInfo {
    pub name: String,
    pub package_id: String,
    pub exec: String,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct BatteryInfo {
    pub level: i32,
    pub status: BatteryStatus,
    pub health: BatteryHealth,
    pub plugged: PowerSource,
    pub technology: String,
    pub temperature_celsius: f64,
    pub voltage_volts: f64,
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum BatteryStatus {
    #[default]
    Unknown,
    Charging,
    Discharging,
    NotCharging,
    Full,
}

impl BatteryStatus {
    pub fn from_platform(raw: &str) -> Self {
        match raw.trim().to_ascii_lowercase().as_str() {
            "charging" => Self::Charging,
            "discharging" => Self::Discharging,
            "not charging" | "not_charging" => Self::NotCharging,
            "full" => Self::Full,
            _ => Self::Unknown,
        }
    }
}

impl fmt::Display for BatteryStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            Self::Unknown => UNDEFINED,
            Self::Charging => "Charging",
            Self::Discharging => "Discharging",
            Self::NotCharging => "Not charging",
            Self::Full => "Full",
        };
        f.write_str(s)
    }
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum BatteryHealth {
    #[default]
    Unknown,
    Good,
    Overheat,
    Dead,
    OverVoltage,
    Cold,
    Failure,
}

impl BatteryHealth {
    pub fn from_platform(raw: &str) -> Self {
        match raw.trim().to_ascii_lowercase().as_str() {
            "good" => Self::Good,
            "overheat" => Self::Overheat,
            "dead" => Self::Dead,
            "over voltage" | "over_voltage" | "overvoltage" => Self::OverVoltage,
            "cold" => Self::Cold,
            "unspecified failure" | "failure" => Self::Failure,
            _ => Self::Unknown,
        }
    }
}

impl fmt::Display for BatteryHealth {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            Self::Unknown => UNDEFINED,
            Self::Good => "Good",
            Self::Overheat => "Overheat",
            Self::Dead => "Dead",
            Self::OverVoltage => "Over voltage",
            Self::Cold => "Cold",
            Self::Failure => "Failure",
        };
        f.write_str(s)
    }
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum PowerSource {
    #[default]
    Unknown,
    Battery,
    Mains,
    Usb,
    Wireless,
}

impl PowerSource {
    pub fn from_platform(raw: &str) -> Self {
        match raw.trim().to_ascii_lowercase().as_str() {
            "battery" => Self::Battery,
            "mains" | "ac" => Self::Mains,
            "usb" | "usb_pd" | "usb_c" => Self::Usb,
            "wireless" => Self::Wireless,
            _ => Self::Unknown,
        }
    }
}

impl fmt::Display for PowerSource {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            Self::Unknown => UNDEFINED,
            Self::Battery => "Battery",
            Self::Mains => "AC",
            Self::Usb => "USB",
            Self::Wireless => "Wireless",
        };
        f.write_str(s)
    }
}
