use super::sysfs::{drm_connectors, DrmConnector};
use super::{run_with_deadline, ExecutionContext, SourceError};
use crate::info::DisplayInfo;
use std::path::Path;
use std::process::Command;
use std::time::Duration;
use tracing::debug;

pub fn collect_display(
    sys: &Path,
    ctx: &ExecutionContext,
    timeout: Duration,
) -> Result<DisplayInfo, SourceError> {
    if let Some(x_display) = ctx.x_display() {
        match run_with_deadline(
            "xrandr",
            Command::new("xrandr").arg("--current").env("DISPLAY", x_display),
            timeout,
        ) {
            Ok(text) => {
                if let Some(info) = parse_xrandr(&text) {
                    return Ok(info);
                }
                debug!(x_display = %x_display, "xrandr не сообщил активный выход");
            }
            Err(err) => debug!(x_display = %x_display, error = %err, "xrandr недоступен"),
        }
    }

    let connectors = drm_connectors(sys)?;
    connectors
        .into_iter()
        .next()
        .map(display_from_connector)
        .ok_or_else(|| SourceError::Unavailable("нет подключённых дисплеев".to_string()))
}

fn display_from_connector(connector: DrmConnector) -> DisplayInfo {
    let (width, height) = connector
        .modes
        .first()
        .and_then(|m| parse_resolution(m))
        .unwrap_or((0, 0));
    DisplayInfo {
        connector: connector.name,
        width,
        height,
        refresh_rate_hz: 0.0,
        modes: connector.modes,
    }
}

fn parse_resolution(mode: &str) -> Option<(u32, u32)> {
    let (w, h) = mode.split_once('x')?;
    let h: String = h.chars().take_while(|c| c.is_ascii_digit()).collect();
    Some((w.trim().parse().ok()?, h.parse().ok()?))
}

pub fn parse_xrandr(text: &str) -> Option<DisplayInfo> {
    let mut outputs: Vec<(bool, DisplayInfo)> = Vec::new();

    for line in text.lines() {
        if line.starts_with("Screen ") {
            continue;
        }
        if !line.starts_with(char::is_whitespace) {
            let mut cols = line.split_whitespace();
            let (Some(name), Some(state)) = (cols.next(), cols.next()) else {
                continue;
            };
            if state == "connected" {
                let primary = line.contains(" primary ");
                outputs.push((
                    primary,
                    DisplayInfo {
                        connector: name.to_string(),
                        ..DisplayInfo::default()
                    },
                ));
            } else {
                outputs.push((false, DisplayInfo::default()));
            }
            continue;
        }

        let Some((_, current)) = outputs.last_mut() else {
            continue;
        };
        if current.connector.is_empty() {
            continue;
        }
        let mut cols = line.split_whitespace();
        let Some(mode) = cols.next() else {
            continue;
        };
        let Some((width, height)) = parse_resolution(mode) else {
            continue;
        };
        current.modes.push(mode.to_string());
        for rate in cols {
            if rate.contains('*') {
                let value = rate.trim_end_matches(['*', '+']).parse().unwrap_or(0.0);
                current.width = width;
                current.height = height;
                current.refresh_rate_hz = value;
            }
        }
    }

    outputs.retain(|(_, info)| !info.connector.is_empty());
    let idx = outputs.iter().position(|(primary, _)| *primary).unwrap_or(0);
    if idx < outputs.len() {
        Some(outputs.swap_remove(idx).1)
    } else {
        None
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const XRANDR: &str = "Screen 0: minimum 320 x 200, current 3840 x 1080, maximum 16384 x 16384
HDMI-1 connected 1920x1080+1920+0 (normal left inverted right x axis y axis) 527mm x 296mm
   1920x1080     60.00 +  50.00    59.94*
   1280x720      60.00
eDP-1 connected primary 1920x1080+0+0 (normal left inverted right x axis y axis) 344mm x 193mm
   1920x1080     60.02*+  59.93    48.00
   1680x1050     59.88
DP-1 disconnected (normal left inverted right x axis y axis)
   1024x768      60.00
";

    #[test]
    fn primary_output_wins() {
        let info = parse_xrandr(XRANDR).unwrap();
        assert_eq!(info.connector, "eDP-1");
        assert_eq!((info.width, info.height), (1920, 1080));
        assert!((info.refresh_rate_hz - 60.02).abs() < 1e-9);
        assert_eq!(info.modes, vec!["1920x1080", "1680x1050"]);
    }

    #[test]
    fn first_connected_when_no_primary() {
        let text = XRANDR.replace(" primary", "");
        let info = parse_xrandr(&text).unwrap();
        assert_eq!(info.connector, "HDMI-1");
        assert!((info.refresh_rate_hz - 59.94).abs() < 1e-9);
    }

    #[test]
    fn nothing_connected() {
        assert!(parse_xrandr("Screen 0: minimum 8 x 8\nVIRTUAL1 disconnected\n").is_none());
    }

    #[test]
    fn connector_fallback_uses_preferred_mode() {
        let info = display_from_connector(DrmConnector {
            name: "eDP-1".to_string(),
            modes: vec!["2560x1600".to_string()],
        });
        assert_eq!((info.width, info.height), (2560, 1600));
        assert_eq!(info.refresh_rate_hz, 0.0);
    }
}
