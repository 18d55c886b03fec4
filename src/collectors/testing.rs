use super::{ExecutionContext, InfoSource, SourceError};
use crate::info::{
    AppInfo, CameraInfo, CpuInfo, DisplayInfo, GpuInfo, NetworkInfo, RamInfo, SensorInfo, SimInfo,
    StorageInfo, SystemInfo, ThermalInfo,
};
use async_trait::async_trait;

pub struct DeadSource;

#[async_trait]
impl InfoSource for DeadSource {
    fn cpu(&self) -> Result<CpuInfo, SourceError> {
        Err(SourceError::PermissionDenied("/proc/cpuinfo".to_string()))
    }
    fn live_cpu_frequencies(&self) -> Result<Vec<u64>, SourceError> {
        Err(SourceError::Unavailable("cpufreq".to_string()))
    }
    fn gpu_load(&self) -> Result<Option<u8>, SourceError> {
        Err(SourceError::Unsupported)
    }
    fn ram(&self) -> Result<RamInfo, SourceError> {
        Err(SourceError::Unsupported)
    }
    fn storage(&self) -> Result<StorageInfo, SourceError> {
        Err(SourceError::Unsupported)
    }
    fn system(&self) -> Result<SystemInfo, SourceError> {
        Err(SourceError::Unsupported)
    }
    fn network(&self) -> Result<NetworkInfo, SourceError> {
        Err(SourceError::Unsupported)
    }
    fn thermal(&self) -> Result<Vec<ThermalInfo>, SourceError> {
        Err(SourceError::Unavailable("thermal".to_string()))
    }
    fn display(&self, _ctx: &ExecutionContext) -> Result<DisplayInfo, SourceError> {
        Err(SourceError::Unsupported)
    }
    fn sensors(&self, _ctx: &ExecutionContext) -> Result<Vec<SensorInfo>, SourceError> {
        Err(SourceError::Unsupported)
    }
    async fn gpu(&self, _ctx: &ExecutionContext) -> Result<GpuInfo, SourceError> {
        Err(SourceError::Unavailable("gpu".to_string()))
    }
    fn cameras(&self) -> Result<Vec<CameraInfo>, SourceError> {
        Err(SourceError::Unsupported)
    }
    fn sims(&self) -> Result<Vec<SimInfo>, SourceError> {
        Err(SourceError::Unsupported)
    }
    fn apps(&self) -> Result<Vec<AppInfo>, SourceError> {
        Err(SourceError::Unsupported)
    }
}
