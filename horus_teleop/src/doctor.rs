//! `horus-teleop doctor`: validates device config, device permissions, and
//! (for cloud/edge modes) connectivity, without starting a recording
//! session. Mirrors the node runtime manager's existing doctor command:
//! one function per check, a shared pass/warn/error summary line.

use colored::Colorize;
use horus_core::config::DeviceConfig;
use horus_core::error::HorusResult;
use horus_core::offload::{OffloadMode, OffloadOrchestrator};
use std::path::Path;

#[derive(Debug)]
pub enum CheckStatus {
    Ok,
    Warning,
    Error,
}

pub fn run_doctor(config_path: Option<&Path>) -> HorusResult<bool> {
    println!("{}", "horus-teleop diagnostics".green().bold());
    println!();

    let mut warnings = 0;
    let mut errors = 0;

    let config = match DeviceConfig::load(config_path) {
        Ok(c) => {
            print_check("device config", CheckStatus::Ok, "loaded", &mut warnings, &mut errors);
            Some(c)
        }
        Err(e) => {
            print_check("device config", CheckStatus::Error, &e.to_string(), &mut warnings, &mut errors);
            None
        }
    };

    if let Some(config) = &config {
        for (label, path) in [
            ("leader arm port", &config.arm_leader_port),
            ("follower arm port", &config.arm_follower_port),
        ] {
            let (status, msg) = check_device_permission(path);
            print_check(label, status, &msg, &mut warnings, &mut errors);
        }

        for (label, path) in [
            ("top camera", &config.camera_top_path),
            ("wrist camera", &config.camera_wrist_path),
        ] {
            let (status, msg) = check_path_exists(path);
            print_check(label, status, &msg, &mut warnings, &mut errors);
        }

        let (status, msg) = check_memory_limit(config.memory_limit_gb);
        print_check("memory limit", status, &msg, &mut warnings, &mut errors);

        let (status, msg) = check_connectivity(config);
        print_check("cloud/edge connectivity", status, &msg, &mut warnings, &mut errors);
    }

    println!();
    if errors > 0 {
        println!("{} {} error(s), {} warning(s)", "x".red(), errors, warnings);
    } else if warnings > 0 {
        println!("{} {} warning(s), no errors", "!".yellow(), warnings);
    } else {
        println!("{} all checks passed", "ok".green());
    }

    Ok(errors == 0)
}

fn print_check(name: &str, status: CheckStatus, msg: &str, warnings: &mut i32, errors: &mut i32) {
    let (icon, colored_msg) = match status {
        CheckStatus::Ok => ("[OK]".green(), msg.normal()),
        CheckStatus::Warning => {
            *warnings += 1;
            ("[WARN]".yellow(), msg.yellow())
        }
        CheckStatus::Error => {
            *errors += 1;
            ("[ERR]".red(), msg.red())
        }
    };
    println!("  {} {} {}", icon, format!("{:22}", name).cyan(), colored_msg);
}

/// Device files are expected to be operator-writable; this is the same gate
/// the lifecycle supervisor enforces at startup (and again after settling).
fn check_device_permission(path: &str) -> (CheckStatus, String) {
    let p = Path::new(path);
    if !p.exists() {
        return (CheckStatus::Warning, format!("'{}' not present (ok if running in simulation)", path));
    }
    match std::fs::metadata(p) {
        Ok(meta) => {
            use std::os::unix::fs::PermissionsExt;
            let mode = meta.permissions().mode();
            if mode & 0o200 != 0 {
                (CheckStatus::Ok, path.to_string())
            } else {
                (
                    CheckStatus::Error,
                    format!("'{}' is not writable (fix: sudo chmod a+rw {})", path, path),
                )
            }
        }
        Err(e) => (CheckStatus::Error, format!("cannot stat '{}': {}", path, e)),
    }
}

fn check_path_exists(path: &str) -> (CheckStatus, String) {
    if Path::new(path).exists() {
        (CheckStatus::Ok, path.to_string())
    } else {
        (CheckStatus::Warning, format!("'{}' not present (ok if running in simulation)", path))
    }
}

fn check_memory_limit(limit_gb: f64) -> (CheckStatus, String) {
    if limit_gb <= 0.0 {
        (CheckStatus::Error, format!("MEMORY_LIMIT_GB={} must be positive", limit_gb))
    } else if limit_gb < 2.0 {
        (CheckStatus::Warning, format!("{} GiB is unusually low", limit_gb))
    } else {
        (CheckStatus::Ok, format!("{} GiB", limit_gb))
    }
}

fn check_connectivity(config: &DeviceConfig) -> (CheckStatus, String) {
    let mode = match OffloadMode::from_cloud_value(config.cloud_mode) {
        Ok(m) => m,
        Err(e) => return (CheckStatus::Error, e.to_string()),
    };
    if !mode.uploads_anywhere() {
        return (CheckStatus::Ok, "local mode, no network required".to_string());
    }
    let offload_config = horus_core::offload::orchestrator::OffloadConfig {
        mode,
        repo_id: config.repo_id.clone(),
        api_base_url: config.api_base_url.clone(),
        api_username: config.api_username.clone(),
        api_password: config.api_password.clone(),
        dataset_root: std::env::current_dir().unwrap_or_default(),
        local_output: std::env::current_dir().unwrap_or_default(),
        edge: if matches!(mode, OffloadMode::Edge) {
            Some(horus_core::offload::orchestrator::EdgeConfig {
                host: config.edge_server_host.clone(),
                user: config.edge_server_user.clone(),
                password: config.edge_server_password.clone(),
                port: config.edge_server_port,
                remote_path: config.edge_server_path.clone(),
            })
        } else {
            None
        },
        skip_upload: true,
        download_only: false,
    };
    let orchestrator = match OffloadOrchestrator::new(offload_config) {
        Ok(o) => o,
        Err(e) => return (CheckStatus::Error, e.to_string()),
    };
    match orchestrator.probe(true) {
        Ok(()) => (CheckStatus::Ok, format!("{:?} mode reachable", mode)),
        Err(e) => (CheckStatus::Warning, e.to_string()),
    }
}
