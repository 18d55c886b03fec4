use super::SourceError;
use crate::info::{CameraInfo, CoreInfo, GpuInfo, SensorInfo, ThermalInfo};
use std::fs;
use std::path::{Path, PathBuf};
use std::str::FromStr;

pub fn read_trimmed(path: &Path) -> Option<String> {
    fs::read_to_string(path).ok().map(|s| s.trim().to_string())
}

fn read_number<T: FromStr>(path: &Path) -> Option<T> {
    read_trimmed(path)?.parse().ok()
}

fn list_dir(dir: &Path) -> Result<Vec<PathBuf>, SourceError> {
    let entries = fs::read_dir(dir).map_err(|err| {
        if err.kind() == std::io::ErrorKind::NotFound {
            SourceError::Unavailable(dir.display().to_string())
        } else {
            SourceError::io(dir, err)
        }
    })?;
    let mut out: Vec<PathBuf> = entries.flatten().map(|e| e.path()).collect();
    out.sort();
    Ok(out)
}

fn numbered_suffix(path: &Path, prefix: &str) -> Option<u32> {
    path.file_name()?
        .to_str()?
        .strip_prefix(prefix)?
        .parse()
        .ok()
}

pub fn cpu_frequencies(sys: &Path) -> Result<Vec<CoreInfo>, SourceError> {
    let mut cores: Vec<CoreInfo> = list_dir(&sys.join("devices/system/cpu"))?
        .into_iter()
        .filter_map(|dir| {
            let index = numbered_suffix(&dir, "cpu")?;
            let freq = dir.join("cpufreq");
            let current_khz: u64 = read_number(&freq.join("scaling_cur_freq"))?;
            Some(CoreInfo {
                index,
                current_mhz: current_khz / 1000,
                min_mhz: read_number::<u64>(&freq.join("cpuinfo_min_freq")).map(|v| v / 1000),
                max_mhz: read_number::<u64>(&freq.join("cpuinfo_max_freq")).map(|v| v / 1000),
            })
        })
        .collect();
    if cores.is_empty() {
        return Err(SourceError::Unavailable("cpufreq".to_string()));
    }
    cores.sort_by_key(|c| c.index);
    Ok(cores)
}

pub fn thermal_zones(sys: &Path) -> Result<Vec<ThermalInfo>, SourceError> {
    let mut out = Vec::new();
    for path in list_dir(&sys.join("class/thermal"))? {
        let Some(name) = path.file_name().and_then(|v| v.to_str()) else {
            continue;
        };
        if !name.starts_with("thermal_zone") {
            continue;
        }

        let zone = read_trimmed(&path.join("type")).unwrap_or_else(|| name.to_string());
        let Some(raw) = read_number::<f64>(&path.join("temp")) else {
            continue;
        };
        let celsius = millidegrees(raw);
        // Disabled zones report values below absolute zero.
        if celsius < ABSOLUTE_ZERO_CELSIUS {
            continue;
        }
        out.push(ThermalInfo {
            zone,
            temperature_celsius: celsius,
            critical_celsius: critical_trip_point(&path),
        });
    }
    Ok(out)
}

fn critical_trip_point(zone: &Path) -> Option<f64> {
    (0..16)
        .map_while(|i| {
            let kind = read_trimmed(&zone.join(format!("trip_point_{i}_type")))?;
            Some((i, kind))
        })
        .find(|(_, kind)| kind == "critical")
        .and_then(|(i, _)| read_number::<f64>(&zone.join(format!("trip_point_{i}_temp"))))
        .map(millidegrees)
}

const ABSOLUTE_ZERO_CELSIUS: f64 = -273.15;

fn millidegrees(v: f64) -> f64 {
    v / 1000.0
}

fn drm_cards(sys: &Path) -> Result<Vec<PathBuf>, SourceError> {
    Ok(list_dir(&sys.join("class/drm"))?
        .into_iter()
        .filter(|p| numbered_suffix(p, "card").is_some())
        .collect())
}

pub fn gpu_busy_percent(sys: &Path) -> Result<Option<u8>, SourceError> {
    for card in drm_cards(sys)? {
        if let Some(v) = read_number::<u32>(&card.join("device/gpu_busy_percent")) {
            return Ok(Some(v.min(100) as u8));
        }
    }
    Ok(None)
}

pub fn drm_gpu(sys: &Path) -> Result<GpuInfo, SourceError> {
    let cards = drm_cards(sys)?;
    let card = cards
        .iter()
        .find(|c| c.join("device/vendor").exists())
        .ok_or_else(|| SourceError::Unavailable("drm".to_string()))?;
    let device = card.join("device");
    let vendor = read_trimmed(&device.join("vendor"))
        .map(|id| pci_vendor_name(&id).to_string())
        .unwrap_or_default();
    let driver_version = fs::read_link(device.join("driver"))
        .ok()
        .and_then(|p| p.file_name().map(|n| n.to_string_lossy().to_string()))
        .unwrap_or_default();
    Ok(GpuInfo {
        vendor,
        driver_version,
        memory_total_bytes: read_number(&device.join("mem_info_vram_total")).unwrap_or(0),
        load_percent: read_number::<u32>(&device.join("gpu_busy_percent")).map(|v| v.min(100) as u8),
        ..GpuInfo::default()
    })
}

pub fn pci_vendor_name(id: &str) -> &str {
    match id.trim().to_ascii_lowercase().as_str() {
        "0x10de" => "NVIDIA",
        "0x1002" => "AMD",
        "0x8086" => "Intel",
        "0x5143" => "Qualcomm",
        "0x1af4" => "Virtio",
        _ => "Unknown",
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct DrmConnector {
    pub name: String,
    pub modes: Vec<String>,
}

pub fn drm_connectors(sys: &Path) -> Result<Vec<DrmConnector>, SourceError> {
    let mut out = Vec::new();
    for path in list_dir(&sys.join("class/drm"))? {
        let Some(name) = path.file_name().and_then(|v| v.to_str()) else {
            continue;
        };
        let Some((_, connector)) = name.split_once('-') else {
            continue;
        };
        if read_trimmed(&path.join("status")).as_deref() != Some("connected") {
            continue;
        }
        let modes = read_trimmed(&path.join("modes"))
            .map(|text| {
                let mut seen: Vec<String> = Vec::new();
                for line in text.lines().map(str::trim).filter(|l| !l.is_empty()) {
                    if !seen.iter().any(|m| m == line) {
                        seen.push(line.to_string());
                    }
                }
                seen
            })
            .unwrap_or_default();
        out.push(DrmConnector {
            name: connector.to_string(),
            modes,
        });
    }
    Ok(out)
}

pub fn hwmon_sensors(sys: &Path) -> Result<Vec<SensorInfo>, SourceError> {
    let mut out = Vec::new();
    for dir in list_dir(&sys.join("class/hwmon"))? {
        let chip = read_trimmed(&dir.join("name")).unwrap_or_else(|| {
            dir.file_name()
                .map(|n| n.to_string_lossy().to_string())
                .unwrap_or_default()
        });
        let Ok(entries) = fs::read_dir(&dir) else {
            continue;
        };
        let mut inputs: Vec<String> = entries
            .flatten()
            .filter_map(|e| e.file_name().to_str().map(str::to_string))
            .filter(|n| n.ends_with("_input"))
            .collect();
        inputs.sort();

        for input in inputs {
            let Some(channel) = input.strip_suffix("_input") else {
                continue;
            };
            let Some((kind, unit, scale)) = hwmon_channel_kind(channel) else {
                continue;
            };
            let Some(raw) = read_number::<f64>(&dir.join(&input)) else {
                continue;
            };
            let name = read_trimmed(&dir.join(format!("{channel}_label")))
                .unwrap_or_else(|| channel.to_string());
            let scaled = |suffix: &str| {
                read_number::<f64>(&dir.join(format!("{channel}_{suffix}"))).map(|v| v / scale)
            };
            out.push(SensorInfo {
                name,
                kind: kind.to_string(),
                parent: chip.clone(),
                value: raw / scale,
                unit: unit.to_string(),
                min: scaled("min"),
                max: scaled("max").or_else(|| scaled("crit")),
            });
        }
    }
    Ok(out)
}

fn hwmon_channel_kind(channel: &str) -> Option<(&'static str, &'static str, f64)> {
    let prefix: String = channel.chars().take_while(|c| c.is_ascii_alphabetic()).collect();
    match prefix.as_str() {
        "temp" => Some(("temperature", "°C", 1000.0)),
        "fan" => Some(("fan", "RPM", 1.0)),
        "in" => Some(("voltage", "V", 1000.0)),
        "curr" => Some(("current", "A", 1000.0)),
        "power" => Some(("power", "W", 1_000_000.0)),
        _ => None,
    }
}

pub fn video_devices(sys: &Path) -> Result<Vec<CameraInfo>, SourceError> {
    let mut out = Vec::new();
    for dir in list_dir(&sys.join("class/video4linux"))? {
        let Some(node) = dir.file_name().and_then(|n| n.to_str()).map(str::to_string) else {
            continue;
        };
        if numbered_suffix(&dir, "video").is_none() {
            continue;
        }
        if read_number::<u32>(&dir.join("index")).unwrap_or(0) != 0 {
            continue;
        }
        out.push(CameraInfo {
            name: read_trimmed(&dir.join("name")).unwrap_or_else(|| node.clone()),
            device_path: format!("/dev/{node}"),
            id: node,
        });
    }
    Ok(out)
}

pub fn default_interface(proc_root: &Path) -> Option<String> {
    let text = fs::read_to_string(proc_root.join("net/route")).ok()?;
    parse_default_route(&text)
}

fn parse_default_route(text: &str) -> Option<String> {
    text.lines().skip(1).find_map(|line| {
        let mut cols = line.split_whitespace();
        let iface = cols.next()?;
        let destination = cols.next()?;
        (destination == "00000000").then(|| iface.to_string())
    })
}
