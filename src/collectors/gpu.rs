use super::sysfs::drm_gpu;
use super::{ExecutionContext, SourceError};
use crate::info::GpuInfo;
use std::path::Path;
use tokio::process::Command;
use tracing::debug;

/// Child processes are killed if the returned future is dropped.
pub async fn probe_gpu(sys: &Path, ctx: &ExecutionContext) -> Result<GpuInfo, SourceError> {
    let mut info = GpuInfo::default();
    let mut found = false;

    match run_probe(
        "nvidia-smi",
        &[
            "--query-gpu=name,driver_version,memory.total,utilization.gpu,temperature.gpu",
            "--format=csv,noheader,nounits",
        ],
        None,
    )
    .await
    {
        Ok(text) => {
            if let Some(nvidia) = parse_nvidia_smi(&text) {
                info = nvidia;
                found = true;
            }
        }
        Err(err) => debug!(error = %err, "nvidia-smi недоступен"),
    }

    if info.renderer.is_empty() {
        if let Some(x_display) = ctx.x_display() {
            match run_probe("glxinfo", &["-B"], Some(x_display)).await {
                Ok(text) => {
                    if let Some(gl) = parse_glxinfo(&text) {
                        merge_gpu(&mut info, gl);
                        found = true;
                    }
                }
                Err(err) => debug!(x_display = %x_display, error = %err, "glxinfo недоступен"),
            }
        }
    }

    match drm_gpu(sys) {
        Ok(drm) => {
            merge_gpu(&mut info, drm);
            found = true;
        }
        Err(err) => debug!(error = %err, "DRM не сообщил о GPU"),
    }

    if found {
        Ok(info)
    } else {
        Err(SourceError::Unavailable("gpu".to_string()))
    }
}

async fn run_probe(
    program: &str,
    args: &[&str],
    display: Option<&str>,
) -> Result<String, SourceError> {
    let mut cmd = Command::new(program);
    cmd.args(args).kill_on_drop(true);
    if let Some(display) = display {
        cmd.env("DISPLAY", display);
    }
    let output = cmd.output().await.map_err(|err| SourceError::Command {
        program: program.to_string(),
        message: err.to_string(),
    })?;
    if !output.status.success() {
        return Err(SourceError::Command {
            program: program.to_string(),
            message: format!("exit status {}", output.status),
        });
    }
    Ok(String::from_utf8_lossy(&output.stdout).to_string())
}

fn merge_gpu(base: &mut GpuInfo, extra: GpuInfo) {
    if base.vendor.is_empty() {
        base.vendor = extra.vendor;
    }
    if base.renderer.is_empty() {
        base.renderer = extra.renderer;
    }
    if base.driver_version.is_empty() {
        base.driver_version = extra.driver_version;
    }
    if base.memory_total_bytes == 0 {
        base.memory_total_bytes = extra.memory_total_bytes;
    }
    if base.load_percent.is_none() {
        base.load_percent = extra.load_percent;
    }
    if base.temperature_celsius.is_none() {
        base.temperature_celsius = extra.temperature_celsius;
    }
}

pub fn parse_nvidia_smi(text: &str) -> Option<GpuInfo> {
    let line = text.lines().map(str::trim).find(|l| !l.is_empty())?;
    let parts: Vec<&str> = line.split(',').map(str::trim).collect();
    if parts.len() < 5 {
        return None;
    }
    Some(GpuInfo {
        vendor: "NVIDIA".to_string(),
        renderer: parts[0].to_string(),
        driver_version: parts[1].to_string(),
        memory_total_bytes: parse_f64_loose(parts[2])
            .map(|mib| (mib.max(0.0) as u64).saturating_mul(1024 * 1024))
            .unwrap_or(0),
        load_percent: parse_f64_loose(parts[3]).map(|v| v.clamp(0.0, 100.0) as u8),
        temperature_celsius: parse_f64_loose(parts[4]).filter(|v| *v > 0.0),
    })
}

pub fn parse_glxinfo(text: &str) -> Option<GpuInfo> {
    let mut info = GpuInfo::default();
    for line in text.lines() {
        let Some((key, value)) = line.split_once(':') else {
            continue;
        };
        let value = value.trim();
        match key.trim() {
            "OpenGL vendor string" => info.vendor = value.to_string(),
            "OpenGL renderer string" => info.renderer = value.to_string(),
            "OpenGL version string" => {
                // "4.6 (Compatibility Profile) Mesa 24.0.5": keep the driver part.
                info.driver_version = value
                    .rsplit_once(") ")
                    .map(|(_, driver)| driver.to_string())
                    .unwrap_or_else(|| value.to_string());
            }
            "Video memory" | "Dedicated video memory" => {
                if let Some(mb) = parse_f64_loose(value.trim_end_matches("MB")) {
                    info.memory_total_bytes = (mb.max(0.0) as u64).saturating_mul(1024 * 1024);
                }
            }
            _ => {}
        }
    }
    if info.renderer.is_empty() {
        None
    } else {
        Some(info)
    }
}

pub fn parse_f64_loose(input: &str) -> Option<f64> {
    let trimmed = input.trim();
    if let Ok(v) = trimmed.parse::<f64>() {
        return Some(v);
    }

    if let Ok(v) = trimmed.replace(',', ".").parse::<f64>() {
        return Some(v);
    }

    let filtered: String = trimmed
        .chars()
        .filter(|c| c.is_ascii_digit() || matches!(c, '.' | ',' | 'e' | 'E' | '-' | '+'))
        .collect();
    if filtered.is_empty() {
        return None;
    }

    filtered.replace(',', ".").parse::<f64>().ok()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::collectors::SessionKind;

    #[test]
    fn nvidia_smi_line() {
        let gpu = parse_nvidia_smi("NVIDIA GeForce RTX 3060, 550.54.14, 12288, 7, 41\n").unwrap();
        assert_eq!(gpu.vendor, "NVIDIA");
        assert_eq!(gpu.renderer, "NVIDIA GeForce RTX 3060");
        assert_eq!(gpu.driver_version, "550.54.14");
        assert_eq!(gpu.memory_total_bytes, 12288 * 1024 * 1024);
        assert_eq!(gpu.load_percent, Some(7));
        assert_eq!(gpu.temperature_celsius, Some(41.0));
    }

    #[test]
    fn nvidia_smi_not_supported_fields() {
        let gpu = parse_nvidia_smi("Tesla T4, 535.1, 15360, [N/A], [N/A]").unwrap();
        assert_eq!(gpu.load_percent, None);
        assert_eq!(gpu.temperature_celsius, None);
        assert!(parse_nvidia_smi("garbage").is_none());
    }

    #[test]
    fn glxinfo_block() {
        let text = "name of display: :0
display: :0  screen: 0
Extended renderer info (GLX_MESA_query_renderer):
    Vendor: AMD (0x1002)
    Video memory: 8192MB
OpenGL vendor string: AMD
OpenGL renderer string: AMD Radeon RX 6600 (radeonsi, navi23, LLVM 17.0.6, DRM 3.57)
OpenGL version string: 4.6 (Compatibility Profile) Mesa 24.0.5
";
        let gpu = parse_glxinfo(text).unwrap();
        assert_eq!(gpu.vendor, "AMD");
        assert!(gpu.renderer.starts_with("AMD Radeon RX 6600"));
        assert_eq!(gpu.driver_version, "Mesa 24.0.5");
        assert_eq!(gpu.memory_total_bytes, 8192 * 1024 * 1024);
    }

    #[test]
    fn merge_keeps_existing_fields() {
        let mut base = GpuInfo {
            renderer: "RTX".to_string(),
            ..GpuInfo::default()
        };
        merge_gpu(
            &mut base,
            GpuInfo {
                vendor: "NVIDIA".to_string(),
                renderer: "other".to_string(),
                load_percent: Some(3),
                ..GpuInfo::default()
            },
        );
        assert_eq!(base.renderer, "RTX");
        assert_eq!(base.vendor, "NVIDIA");
        assert_eq!(base.load_percent, Some(3));
    }

    #[tokio::test]
    async fn probe_without_any_source_is_unavailable() {
        let tmp = tempfile::TempDir::new().unwrap();
        let ctx = ExecutionContext::new(SessionKind::Wayland, "wayland-0");
        // nvidia-smi may exist on the test host; only assert when it does not.
        if let Err(err) = probe_gpu(tmp.path(), &ctx).await {
            assert!(matches!(err, SourceError::Unavailable(_)));
        }
    }

    #[test]
    fn loose_numbers() {
        assert_eq!(parse_f64_loose("12,5"), Some(12.5));
        assert_eq!(parse_f64_loose(" 41 C"), Some(41.0));
        assert_eq!(parse_f64_loose("[N/A]"), None);
    }
}
