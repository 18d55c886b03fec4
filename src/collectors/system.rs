use super::apps::{default_app_dirs, installed_apps};
use super::display::collect_display;
use super::gpu::{parse_f64_loose, probe_gpu};
use super::sysfs;
use super::{run_with_deadline, ExecutionContext, InfoSource, SourceError};
use crate::info::{
    AppInfo, CameraInfo, CoreInfo, CpuInfo, DisplayInfo, GpuInfo, InterfaceInfo, NetworkInfo,
    RamInfo, SensorInfo, SimInfo, StorageInfo, SystemInfo, ThermalInfo, VolumeInfo,
};
use async_trait::async_trait;
use std::collections::HashSet;
use std::path::PathBuf;
use std::process::Command;
use std::sync::{Mutex, MutexGuard, PoisonError};
use std::time::{Duration, UNIX_EPOCH};
use sysinfo::{ComponentExt, CpuExt, DiskExt, NetworkExt, NetworksExt, System, SystemExt};
use tracing::debug;

#[derive(Debug, Clone)]
pub struct SourcePaths {
    pub sys_root: PathBuf,
    pub proc_root: PathBuf,
    pub app_dirs: Vec<PathBuf>,
}

impl Default for SourcePaths {
    fn default() -> Self {
        Self {
            sys_root: PathBuf::from("/sys"),
            proc_root: PathBuf::from("/proc"),
            app_dirs: default_app_dirs(),
        }
    }
}

const DEFAULT_COMMAND_TIMEOUT: Duration = Duration::from_secs(3);

pub struct SysinfoSource {
    system: Mutex<System>,
    paths: SourcePaths,
    command_timeout: Duration,
}

impl SysinfoSource {
    pub fn new(paths: SourcePaths) -> Self {
        Self {
            system: Mutex::new(System::new_all()),
            paths,
            command_timeout: DEFAULT_COMMAND_TIMEOUT,
        }
    }

    pub fn with_command_timeout(mut self, timeout: Duration) -> Self {
        self.command_timeout = timeout;
        self
    }

    fn lock_system(&self) -> MutexGuard<'_, System> {
        self.system.lock().unwrap_or_else(PoisonError::into_inner)
    }
}

#[async_trait]
impl InfoSource for SysinfoSource {
    fn cpu(&self) -> Result<CpuInfo, SourceError> {
        let mut system = self.lock_system();
        system.refresh_cpu();
        let cpus = system.cpus();
        if cpus.is_empty() {
            return Err(SourceError::Unavailable("cpu".to_string()));
        }

        let cores = match sysfs::cpu_frequencies(&self.paths.sys_root) {
            Ok(cores) => cores,
            Err(err) => {
                debug!(error = %err, "cpufreq недоступен, частоты из sysinfo");
                cpus.iter()
                    .enumerate()
                    .map(|(i, c)| CoreInfo {
                        index: i as u32,
                        current_mhz: c.frequency(),
                        min_mhz: None,
                        max_mhz: None,
                    })
                    .collect()
            }
        };

        Ok(CpuInfo {
            brand: cpus[0].brand().trim().to_string(),
            vendor: cpus[0].vendor_id().to_string(),
            architecture: std::env::consts::ARCH.to_string(),
            physical_cores: system.physical_core_count().unwrap_or(0) as u32,
            logical_cores: cpus.len() as u32,
            usage_percent: system.global_cpu_info().cpu_usage() as f64,
            cores,
        })
    }

    fn live_cpu_frequencies(&self) -> Result<Vec<u64>, SourceError> {
        match sysfs::cpu_frequencies(&self.paths.sys_root) {
            Ok(cores) => Ok(cores.into_iter().map(|c| c.current_mhz).collect()),
            Err(err) => {
                debug!(error = %err, "cpufreq недоступен, частоты из sysinfo");
                let mut system = self.lock_system();
                system.refresh_cpu();
                let freqs: Vec<u64> = system.cpus().iter().map(|c| c.frequency()).collect();
                if freqs.is_empty() || freqs.iter().all(|f| *f == 0) {
                    return Err(err);
                }
                Ok(freqs)
            }
        }
    }

    fn gpu_load(&self) -> Result<Option<u8>, SourceError> {
        if let Ok(Some(load)) = sysfs::gpu_busy_percent(&self.paths.sys_root) {
            return Ok(Some(load));
        }
        nvidia_smi_load(self.command_timeout)
    }

    fn ram(&self) -> Result<RamInfo, SourceError> {
        let mut system = self.lock_system();
        system.refresh_memory();
        let total = system.total_memory();
        if total == 0 {
            return Err(SourceError::Unavailable("memory".to_string()));
        }
        Ok(RamInfo {
            total_bytes: total,
            available_bytes: system.available_memory(),
            used_bytes: system.used_memory(),
            swap_total_bytes: system.total_swap(),
            swap_used_bytes: system.used_swap(),
        })
    }

    fn storage(&self) -> Result<StorageInfo, SourceError> {
        let mut system = self.lock_system();
        system.refresh_disks_list();
        system.refresh_disks();

        let volumes: Vec<VolumeInfo> = system
            .disks()
            .iter()
            .map(|d| VolumeInfo {
                name: d.name().to_string_lossy().to_string(),
                mount_point: d.mount_point().to_string_lossy().to_string(),
                file_system: String::from_utf8_lossy(d.file_system()).to_string(),
                total_bytes: d.total_space(),
                available_bytes: d.available_space(),
                removable: d.is_removable(),
            })
            .collect();
        if volumes.is_empty() {
            return Err(SourceError::Unavailable("disks".to_string()));
        }

        // Bind mounts show the same device several times.
        let mut counted = HashSet::new();
        let (total_bytes, available_bytes) = volumes
            .iter()
            .filter(|v| counted.insert(v.name.clone()))
            .fold((0_u64, 0_u64), |(t, a), v| {
                (t.saturating_add(v.total_bytes), a.saturating_add(v.available_bytes))
            });

        Ok(StorageInfo {
            total_bytes,
            available_bytes,
            volumes,
        })
    }

    fn system(&self) -> Result<SystemInfo, SourceError> {
        let mut system = self.lock_system();
        system.refresh_processes();
        let boot = system.boot_time();
        Ok(SystemInfo {
            host_name: system.host_name().unwrap_or_default(),
            os_name: system.name().unwrap_or_default(),
            os_version: system.os_version().unwrap_or_default(),
            kernel_version: system.kernel_version().unwrap_or_default(),
            distribution_id: system.distribution_id(),
            uptime_seconds: system.uptime(),
            boot_time: if boot > 0 {
                humantime::format_rfc3339_seconds(UNIX_EPOCH + Duration::from_secs(boot))
                    .to_string()
            } else {
                String::new()
            },
            process_count: system.processes().len() as u64,
        })
    }

    fn network(&self) -> Result<NetworkInfo, SourceError> {
        let mut system = self.lock_system();
        system.refresh_networks_list();
        let mut interfaces: Vec<InterfaceInfo> = system
            .networks()
            .iter()
            .map(|(name, data)| InterfaceInfo {
                name: name.clone(),
                received_bytes: data.total_received(),
                transmitted_bytes: data.total_transmitted(),
            })
            .collect();
        interfaces.sort_by(|a, b| a.name.cmp(&b.name));
        Ok(NetworkInfo {
            default_interface: sysfs::default_interface(&self.paths.proc_root),
            interfaces,
        })
    }

    fn thermal(&self) -> Result<Vec<ThermalInfo>, SourceError> {
        match sysfs::thermal_zones(&self.paths.sys_root) {
            Ok(zones) if !zones.is_empty() => Ok(zones),
            other => {
                if let Err(err) = other {
                    debug!(error = %err, "thermal zones недоступны, датчики sysinfo");
                }
                let mut system = self.lock_system();
                system.refresh_components_list();
                system.refresh_components();
                Ok(system
                    .components()
                    .iter()
                    .filter(|c| c.temperature() > 0.0)
                    .map(|c| ThermalInfo {
                        zone: c.label().to_string(),
                        temperature_celsius: c.temperature() as f64,
                        critical_celsius: c.critical().map(|v| v as f64),
                    })
                    .collect())
            }
        }
    }

    fn display(&self, ctx: &ExecutionContext) -> Result<DisplayInfo, SourceError> {
        collect_display(&self.paths.sys_root, ctx, self.command_timeout)
    }

    fn sensors(&self, _ctx: &ExecutionContext) -> Result<Vec<SensorInfo>, SourceError> {
        match sysfs::hwmon_sensors(&self.paths.sys_root) {
            Ok(sensors) if !sensors.is_empty() => Ok(sensors),
            _ => {
                let mut system = self.lock_system();
                system.refresh_components_list();
                system.refresh_components();
                let sensors: Vec<SensorInfo> = system
                    .components()
                    .iter()
                    .map(|c| SensorInfo {
                        name: c.label().to_string(),
                        kind: "temperature".to_string(),
                        parent: String::new(),
                        value: c.temperature() as f64,
                        unit: "°C".to_string(),
                        min: None,
                        max: c.critical().or(Some(c.max())).map(|v| v as f64),
                    })
                    .collect();
                if sensors.is_empty() {
                    Err(SourceError::Unavailable("sensors".to_string()))
                } else {
                    Ok(sensors)
                }
            }
        }
    }

    async fn gpu(&self, ctx: &ExecutionContext) -> Result<GpuInfo, SourceError> {
        probe_gpu(&self.paths.sys_root, ctx).await
    }

    fn cameras(&self) -> Result<Vec<CameraInfo>, SourceError> {
        sysfs::video_devices(&self.paths.sys_root)
    }

    fn sims(&self) -> Result<Vec<SimInfo>, SourceError> {
        Err(SourceError::Unsupported)
    }

    fn apps(&self) -> Result<Vec<AppInfo>, SourceError> {
        installed_apps(&self.paths.app_dirs)
    }
}

fn nvidia_smi_load(timeout: Duration) -> Result<Option<u8>, SourceError> {
    let text = run_with_deadline(
        "nvidia-smi",
        Command::new("nvidia-smi")
            .args(["--query-gpu=utilization.gpu", "--format=csv,noheader,nounits"]),
        timeout,
    )?;
    Ok(text
        .lines()
        .find_map(parse_f64_loose)
        .map(|v| v.clamp(0.0, 100.0) as u8))
}
