use crate::info::DeviceInfo;
use prometheus::core::Collector;
use prometheus::{opts, Counter, CounterVec, Encoder, Gauge, GaugeVec, Registry, TextEncoder};
use std::sync::Arc;
use std::time::{SystemTime, UNIX_EPOCH};

#[derive(Clone)]
pub struct Metrics {
    registry: Registry,
    started_at_unix: i64,
    pub devinfo_cpu_usage_percent: Gauge,
    pub devinfo_cpu_logical_cores: Gauge,
    pub devinfo_cpu_core_frequency_mhz: GaugeVec,
    pub devinfo_ram_total_bytes: Gauge,
    pub devinfo_ram_used_bytes: Gauge,
    pub devinfo_ram_usage_percent: Gauge,
    pub devinfo_volume_total_bytes: GaugeVec,
    pub devinfo_volume_available_bytes: GaugeVec,
    pub devinfo_net_received_bytes: GaugeVec,
    pub devinfo_net_transmitted_bytes: GaugeVec,
    pub devinfo_thermal_celsius: GaugeVec,
    pub devinfo_sensor_value: GaugeVec,
    pub devinfo_gpu_load_percent: Gauge,
    pub devinfo_battery_level_percent: Gauge,
    pub devinfo_battery_temperature_celsius: Gauge,
    pub devinfo_stress_workers_active: Gauge,
    pub devinfo_stress_sessions_total: Counter,
    pub devinfo_uptime_seconds: Gauge,
    pub devinfo_scrape_count_total: Counter,
    pub devinfo_collect_errors_total: CounterVec,
    pub devinfo_last_collect_timestamp_seconds: Gauge,
}

impl Metrics {
    pub fn new() -> Result<Arc<Self>, prometheus::Error> {
        let registry = Registry::new();

        let devinfo_cpu_usage_percent = Gauge::with_opts(opts!(
            "devinfo_cpu_usage_percent",
            "Average CPU usage across cores in percent (0..100)"
        ))?;
        let devinfo_cpu_logical_cores =
            Gauge::with_opts(opts!("devinfo_cpu_logical_cores", "Number of logical CPUs"))?;
        let devinfo_cpu_core_frequency_mhz = GaugeVec::new(
            opts!(
                "devinfo_cpu_core_frequency_mhz",
                "Current frequency per logical core in MHz"
            ),
            &["core"],
        )?;
        let devinfo_ram_total_bytes =
            Gauge::with_opts(opts!("devinfo_ram_total_bytes", "Total RAM in bytes"))?;
        let devinfo_ram_used_bytes =
            Gauge::with_opts(opts!("devinfo_ram_used_bytes", "Used RAM in bytes"))?;
        let devinfo_ram_usage_percent =
            Gauge::with_opts(opts!("devinfo_ram_usage_percent", "RAM usage in percent"))?;
        let devinfo_volume_total_bytes = GaugeVec::new(
            opts!("devinfo_volume_total_bytes", "Volume size in bytes by mount"),
            &["mount"],
        )?;
        let devinfo_volume_available_bytes = GaugeVec::new(
            opts!(
                "devinfo_volume_available_bytes",
                "Volume free space in bytes by mount"
            ),
            &["mount"],
        )?;
        let devinfo_net_received_bytes = GaugeVec::new(
            opts!(
                "devinfo_net_received_bytes",
                "Total received bytes per interface"
            ),
            &["iface"],
        )?;
        let devinfo_net_transmitted_bytes = GaugeVec::new(
            opts!(
                "devinfo_net_transmitted_bytes",
                "Total transmitted bytes per interface"
            ),
            &["iface"],
        )?;
        let devinfo_thermal_celsius = GaugeVec::new(
            opts!("devinfo_thermal_celsius", "Temperature by thermal zone"),
            &["zone"],
        )?;
        let devinfo_sensor_value = GaugeVec::new(
            opts!("devinfo_sensor_value", "Raw hardware sensor value"),
            &["kind", "name", "parent"],
        )?;
        let devinfo_gpu_load_percent = Gauge::with_opts(opts!(
            "devinfo_gpu_load_percent",
            "GPU load in percent (if available)"
        ))?;
        let devinfo_battery_level_percent = Gauge::with_opts(opts!(
            "devinfo_battery_level_percent",
            "Battery level in percent, -1 when unknown"
        ))?;
        let devinfo_battery_temperature_celsius = Gauge::with_opts(opts!(
            "devinfo_battery_temperature_celsius",
            "Battery temperature in Celsius"
        ))?;
        let devinfo_stress_workers_active = Gauge::with_opts(opts!(
            "devinfo_stress_workers_active",
            "Stress worker threads currently running"
        ))?;
        let devinfo_stress_sessions_total = Counter::with_opts(opts!(
            "devinfo_stress_sessions_total",
            "Stress sessions started"
        ))?;
        let devinfo_uptime_seconds =
            Gauge::with_opts(opts!("devinfo_uptime_seconds", "Daemon uptime in seconds"))?;
        let devinfo_scrape_count_total = Counter::with_opts(opts!(
            "devinfo_scrape_count_total",
            "Number of /metrics scrapes"
        ))?;
        let devinfo_collect_errors_total = CounterVec::new(
            opts!(
                "devinfo_collect_errors_total",
                "Sources that could not answer, by source"
            ),
            &["source"],
        )?;
        let devinfo_last_collect_timestamp_seconds = Gauge::with_opts(opts!(
            "devinfo_last_collect_timestamp_seconds",
            "Unix time of the last snapshot"
        ))?;

        register(&registry, &devinfo_cpu_usage_percent)?;
        register(&registry, &devinfo_cpu_logical_cores)?;
        register(&registry, &devinfo_cpu_core_frequency_mhz)?;
        register(&registry, &devinfo_ram_total_bytes)?;
        register(&registry, &devinfo_ram_used_bytes)?;
        register(&registry, &devinfo_ram_usage_percent)?;
        register(&registry, &devinfo_volume_total_bytes)?;
        register(&registry, &devinfo_volume_available_bytes)?;
        register(&registry, &devinfo_net_received_bytes)?;
        register(&registry, &devinfo_net_transmitted_bytes)?;
        register(&registry, &devinfo_thermal_celsius)?;
        register(&registry, &devinfo_sensor_value)?;
        register(&registry, &devinfo_gpu_load_percent)?;
        register(&registry, &devinfo_battery_level_percent)?;
        register(&registry, &devinfo_battery_temperature_celsius)?;
        register(&registry, &devinfo_stress_workers_active)?;
        register(&registry, &devinfo_stress_sessions_total)?;
        register(&registry, &devinfo_uptime_seconds)?;
        register(&registry, &devinfo_scrape_count_total)?;
        register(&registry, &devinfo_collect_errors_total)?;
        register(&registry, &devinfo_last_collect_timestamp_seconds)?;

        Ok(Arc::new(Self {
            registry,
            started_at_unix: now_unix(),
            devinfo_cpu_usage_percent,
            devinfo_cpu_logical_cores,
            devinfo_cpu_core_frequency_mhz,
            devinfo_ram_total_bytes,
            devinfo_ram_used_bytes,
            devinfo_ram_usage_percent,
            devinfo_volume_total_bytes,
            devinfo_volume_available_bytes,
            devinfo_net_received_bytes,
            devinfo_net_transmitted_bytes,
            devinfo_thermal_celsius,
            devinfo_sensor_value,
            devinfo_gpu_load_percent,
            devinfo_battery_level_percent,
            devinfo_battery_temperature_celsius,
            devinfo_stress_workers_active,
            devinfo_stress_sessions_total,
            devinfo_uptime_seconds,
            devinfo_scrape_count_total,
            devinfo_collect_errors_total,
            devinfo_last_collect_timestamp_seconds,
        }))
    }

    pub fn update_from_snapshot(&self, info: &DeviceInfo) {
        self.devinfo_cpu_usage_percent.set(info.cpu.usage_percent);
        self.devinfo_cpu_logical_cores
            .set(info.cpu.logical_cores as f64);
        self.devinfo_ram_total_bytes.set(info.ram.total_bytes as f64);
        self.devinfo_ram_used_bytes.set(info.ram.used_bytes as f64);
        self.devinfo_ram_usage_percent.set(info.ram.usage_percent());
        self.devinfo_last_collect_timestamp_seconds
            .set(info.collected_at_unix as f64);

        self.devinfo_cpu_core_frequency_mhz.reset();
        self.devinfo_volume_total_bytes.reset();
        self.devinfo_volume_available_bytes.reset();
        self.devinfo_net_received_bytes.reset();
        self.devinfo_net_transmitted_bytes.reset();
        self.devinfo_thermal_celsius.reset();
        self.devinfo_sensor_value.reset();

        for core in &info.cpu.cores {
            self.devinfo_cpu_core_frequency_mhz
                .with_label_values(&[&core.index.to_string()])
                .set(core.current_mhz as f64);
        }
        for v in &info.storage.volumes {
            self.devinfo_volume_total_bytes
                .with_label_values(&[&v.mount_point])
                .set(v.total_bytes as f64);
            self.devinfo_volume_available_bytes
                .with_label_values(&[&v.mount_point])
                .set(v.available_bytes as f64);
        }
        for iface in &info.network.interfaces {
            self.devinfo_net_received_bytes
                .with_label_values(&[&iface.name])
                .set(iface.received_bytes as f64);
            self.devinfo_net_transmitted_bytes
                .with_label_values(&[&iface.name])
                .set(iface.transmitted_bytes as f64);
        }
        for t in &info.thermal {
            self.devinfo_thermal_celsius
                .with_label_values(&[&t.zone])
                .set(t.temperature_celsius);
        }
        for s in &info.sensors {
            self.devinfo_sensor_value
                .with_label_values(&[&s.kind, &s.name, &s.parent])
                .set(s.value);
        }

        self.devinfo_gpu_load_percent
            .set(info.gpu.load_percent.map(f64::from).unwrap_or(0.0));
        match &info.battery {
            Some(b) => {
                self.devinfo_battery_level_percent.set(b.level as f64);
                self.devinfo_battery_temperature_celsius
                    .set(b.temperature_celsius);
            }
            None => {
                self.devinfo_battery_level_percent.set(-1.0);
                self.devinfo_battery_temperature_celsius.set(0.0);
            }
        }
    }

    pub fn set_stress_workers(&self, active: usize) {
        self.devinfo_stress_workers_active.set(active as f64);
    }

    pub fn inc_stress_session(&self) {
        self.devinfo_stress_sessions_total.inc();
    }

    pub fn inc_scrape_count(&self) {
        self.devinfo_scrape_count_total.inc();
    }

    pub fn inc_collect_error(&self, source: &str) {
        self.devinfo_collect_errors_total
            .with_label_values(&[source])
            .inc();
    }

    pub fn encode_metrics(&self) -> Result<Vec<u8>, prometheus::Error> {
        self.devinfo_uptime_seconds
            .set(now_unix().saturating_sub(self.started_at_unix) as f64);
        let mut buf = Vec::new();
        let encoder = TextEncoder::new();
        let mf = self.registry.gather();
        encoder.encode(&mf, &mut buf)?;
        Ok(buf)
    }
}

fn register<T: Collector + Clone + 'static>(
    registry: &Registry,
    collector: &T,
) -> Result<(), prometheus::Error> {
    registry.register(Box::new(collector.clone()))
}

pub fn now_unix() -> i64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map(|d| d.as_secs() as i64)
        .unwrap_or(0)
}
