use crate::collectors::battery::{BatteryPayload, BatteryState};
use crate::collectors::{ExecutionContext, InfoSource, SourceError};
use crate::info::{
    AppInfo, BatteryInfo, CameraInfo, CpuInfo, DeviceInfo, DisplayInfo, GpuInfo, NetworkInfo,
    RamInfo, SensorInfo, SimInfo, StorageInfo, SystemInfo, ThermalInfo,
};
use crate::metrics::{now_unix, Metrics};
use std::sync::Arc;
use std::time::{Duration, Instant};
use thiserror::Error;
use tracing::{debug, error, warn};

#[derive(Debug, Error, PartialEq, Eq)]
pub enum AggregateError {
    #[error("для запроса нужен контекст графического сеанса")]
    ContextRequired,
    #[error("контекст сеанса недействителен: '{0}'")]
    ContextInvalid(String),
}

#[derive(Clone)]
pub struct Aggregator {
    source: Arc<dyn InfoSource>,
    battery: BatteryState,
    gpu_probe_timeout: Duration,
    metrics: Option<Arc<Metrics>>,
}

impl Aggregator {
    pub fn new(
        source: Arc<dyn InfoSource>,
        battery: BatteryState,
        gpu_probe_timeout: Duration,
    ) -> Self {
        Self {
            source,
            battery,
            gpu_probe_timeout,
            metrics: None,
        }
    }

    pub fn with_metrics(mut self, metrics: Arc<Metrics>) -> Self {
        self.metrics = Some(metrics);
        self
    }

    fn degrade<T: Default>(&self, source: &'static str, result: Result<T, SourceError>) -> T {
        match result {
            Ok(value) => value,
            Err(err) => {
                debug!(source, error = %err, "источник не ответил, используется пустое значение");
                if let Some(metrics) = &self.metrics {
                    metrics.inc_collect_error(source);
                }
                T::default()
            }
        }
    }

    pub fn cpu_info(&self) -> CpuInfo {
        self.degrade("cpu", self.source.cpu())
    }

    pub fn live_cpu_frequencies(&self) -> Vec<String> {
        self.degrade("cpu_frequency", self.source.live_cpu_frequencies())
            .into_iter()
            .map(|mhz| format!("{mhz} MHz"))
            .collect()
    }

    pub fn gpu_load_percentage(&self) -> Option<u8> {
        self.degrade("gpu_load", self.source.gpu_load())
    }

    pub fn ram_info(&self) -> RamInfo {
        self.degrade("ram", self.source.ram())
    }

    pub fn storage_info(&self) -> StorageInfo {
        self.degrade("storage", self.source.storage())
    }

    pub fn system_info(&self) -> SystemInfo {
        self.degrade("system", self.source.system())
    }

    pub fn network_info(&self) -> NetworkInfo {
        self.degrade("network", self.source.network())
    }

    pub fn thermal_info(&self) -> Vec<ThermalInfo> {
        self.degrade("thermal", self.source.thermal())
    }

    pub fn camera_info(&self) -> Vec<CameraInfo> {
        self.degrade("camera", self.source.cameras())
    }

    pub fn sim_info(&self) -> Vec<SimInfo> {
        self.degrade("sim", self.source.sims())
    }

    pub fn app_info(&self) -> Vec<AppInfo> {
        self.degrade("apps", self.source.apps())
    }

    pub fn battery_info(&self, payload: &BatteryPayload) -> BatteryInfo {
        payload.decode()
    }

    /// Decodes the most recently delivered battery event. `None` until the
    /// first delivery, which is distinct from a payload full of unknowns.
    pub fn initial_battery_info(&self) -> Option<BatteryInfo> {
        self.battery.latest().map(|payload| self.battery_info(&payload))
    }

    pub fn display_info(
        &self,
        ctx: Option<&ExecutionContext>,
    ) -> Result<DisplayInfo, AggregateError> {
        let ctx = require_context(ctx)?;
        Ok(self.degrade("display", self.source.display(ctx)))
    }

    pub fn sensor_info(
        &self,
        ctx: Option<&ExecutionContext>,
    ) -> Result<Vec<SensorInfo>, AggregateError> {
        let ctx = require_context(ctx)?;
        Ok(self.degrade("sensors", self.source.sensors(ctx)))
    }

    /// Runs the GPU capability probe. Not bounded in time; drop the future to
    /// cancel it.
    pub async fn gpu_info(
        &self,
        ctx: Option<&ExecutionContext>,
    ) -> Result<GpuInfo, AggregateError> {
        let ctx = require_context(ctx)?;
        let result = self.source.gpu(ctx).await;
        Ok(self.degrade("gpu", result))
    }

    pub async fn snapshot(&self, ctx: Option<&ExecutionContext>) -> DeviceInfo {
        let started = Instant::now();
        let ctx = match ctx {
            Some(ctx) if ctx.is_valid() => Some(ctx.clone()),
            Some(ctx) => {
                warn!(session = ctx.display(), "контекст сеанса недействителен, часть полей пропущена");
                None
            }
            None => {
                debug!("нет контекста сеанса, дисплей, датчики и GPU пропущены");
                None
            }
        };

        let blocking = {
            let this = self.clone();
            let ctx = ctx.clone();
            tokio::task::spawn_blocking(move || this.collect_blocking(ctx.as_ref()))
        };
        let gpu = async {
            let mut gpu = self.bounded_gpu_probe(ctx.as_ref()).await;
            if gpu.load_percent.is_none() {
                gpu.load_percent = self.bounded_gpu_load().await;
            }
            gpu
        };
        let (collected, gpu) = tokio::join!(blocking, gpu);

        let mut info = match collected {
            Ok(info) => info,
            Err(err) => {
                error!(error = %err, "сбор снимка завершился аварийно");
                DeviceInfo::default()
            }
        };
        info.gpu = gpu;
        info.collected_at_unix = now_unix();

        debug!(
            elapsed_ms = started.elapsed().as_millis() as u64,
            thermal = info.thermal.len(),
            sensors = info.sensors.len(),
            apps = info.apps.len(),
            "снимок собран"
        );
        info
    }

    fn collect_blocking(&self, ctx: Option<&ExecutionContext>) -> DeviceInfo {
        let (display, sensors) = match ctx {
            Some(ctx) => (
                self.degrade("display", self.source.display(ctx)),
                self.degrade("sensors", self.source.sensors(ctx)),
            ),
            None => (DisplayInfo::default(), Vec::new()),
        };
        DeviceInfo {
            collected_at_unix: 0,
            cpu: self.cpu_info(),
            gpu: GpuInfo::default(),
            ram: self.ram_info(),
            storage: self.storage_info(),
            display,
            system: self.system_info(),
            network: self.network_info(),
            thermal: self.thermal_info(),
            sensors,
            cameras: self.camera_info(),
            sims: self.sim_info(),
            apps: self.app_info(),
            battery: self.initial_battery_info(),
        }
    }

    async fn bounded_gpu_probe(&self, ctx: Option<&ExecutionContext>) -> GpuInfo {
        let Some(ctx) = ctx else {
            return GpuInfo::default();
        };
        match tokio::time::timeout(self.gpu_probe_timeout, self.source.gpu(ctx)).await {
            Ok(result) => self.degrade("gpu", result),
            Err(_elapsed) => {
                warn!(
                    timeout_ms = self.gpu_probe_timeout.as_millis() as u64,
                    "проба GPU не уложилась в таймаут"
                );
                if let Some(metrics) = &self.metrics {
                    metrics.inc_collect_error("gpu_timeout");
                }
                GpuInfo::default()
            }
        }
    }

    // Fallback load reader may shell out synchronously; it gets its own budget
    // on the blocking pool.
    async fn bounded_gpu_load(&self) -> Option<u8> {
        let this = self.clone();
        let read = tokio::task::spawn_blocking(move || this.gpu_load_percentage());
        match tokio::time::timeout(self.gpu_probe_timeout, read).await {
            Ok(Ok(load)) => load,
            Ok(Err(err)) => {
                error!(error = %err, "чтение загрузки GPU завершилось аварийно");
                None
            }
            Err(_elapsed) => {
                warn!(
                    timeout_ms = self.gpu_probe_timeout.as_millis() as u64,
                    "загрузка GPU не получена за отведённое время"
                );
                if let Some(metrics) = &self.metrics {
                    metrics.inc_collect_error("gpu_load_timeout");
                }
                None
            }
        }
    }
}

fn require_context(ctx: Option<&ExecutionContext>) -> Result<&ExecutionContext, AggregateError> {
    let ctx = ctx.ok_or(AggregateError::ContextRequired)?;
    if !ctx.is_valid() {
        return Err(AggregateError::ContextInvalid(ctx.display().to_string()));
    }
    Ok(ctx)
}
