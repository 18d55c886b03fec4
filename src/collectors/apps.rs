use super::SourceError;
use crate::info::AppInfo;
use std::collections::HashSet;
use std::fs;
use std::path::{Path, PathBuf};

pub fn default_app_dirs() -> Vec<PathBuf> {
    let mut dirs = Vec::new();
    if let Some(home) = std::env::var_os("HOME") {
        dirs.push(PathBuf::from(home).join(".local/share/applications"));
    }
    dirs.push(PathBuf::from("/usr/local/share/applications"));
    dirs.push(PathBuf::from("/usr/share/applications"));
    dirs
}

pub fn installed_apps(dirs: &[PathBuf]) -> Result<Vec<AppInfo>, SourceError> {
    let mut seen = HashSet::new();
    let mut out = Vec::new();
    let mut any_dir = false;

    for dir in dirs {
        let Ok(entries) = fs::read_dir(dir) else {
            continue;
        };
        any_dir = true;
        let mut files: Vec<PathBuf> = entries
            .flatten()
            .map(|e| e.path())
            .filter(|p| p.extension().is_some_and(|e| e == "desktop"))
            .collect();
        files.sort();

        for path in files {
            let Some(id) = desktop_id(&path) else {
                continue;
            };
            if !seen.insert(id.clone()) {
                continue;
            }
            let Ok(text) = fs::read_to_string(&path) else {
                continue;
            };
            if let Some(app) = parse_desktop_entry(&id, &text) {
                out.push(app);
            }
        }
    }

    if !any_dir {
        return Err(SourceError::Unavailable("applications".to_string()));
    }
    out.sort_by(|a, b| a.name.to_lowercase().cmp(&b.name.to_lowercase()));
    Ok(out)
}

fn desktop_id(path: &Path) -> Option<String> {
    path.file_stem()
        .and_then(|s| s.to_str())
        .map(str::to_string)
}

pub fn parse_desktop_entry(id: &str, text: &str) -> Option<AppInfo> {
    let mut in_entry = false;
    let mut name = None;
    let mut exec = String::new();
    let mut is_app = false;

    for line in text.lines().map(str::trim) {
        if line.starts_with('[') {
            in_entry = line == "[Desktop Entry]";
            continue;
        }
        if !in_entry || line.starts_with('#') {
            continue;
        }
        let Some((key, value)) = line.split_once('=') else {
            continue;
        };
        match key.trim() {
            "Name" => name = Some(value.trim().to_string()),
            "Exec" => exec = value.trim().to_string(),
            "Type" => is_app = value.trim() == "Application",
            "NoDisplay" | "Hidden" if value.trim().eq_ignore_ascii_case("true") => return None,
            _ => {}
        }
    }

    if !is_app {
        return None;
    }
    Some(AppInfo {
        name: name.filter(|n| !n.is_empty())?,
        package_id: id.to_string(),
        exec,
    })
}
