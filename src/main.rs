//! MotionPlus camera hub.
//!
//! Copyright (C) 2024  Ardalan Amiri Sani
//!
//! This program is free software: you can redistribute it and/or modify
//! it under the terms of the GNU General Public License as published by
//! the Free Software Foundation, either version 3 of the License, or
//! (at your option) any later version.
//!
//! This program is distributed in the hope that it will be useful,
//! but WITHOUT ANY WARRANTY; without even the implied warranty of
//! MERCHANTABILITY or FITNESS FOR A PARTICULAR PURPOSE.  See the
//! GNU General Public License for more details.
//!
//! You should have received a copy of the GNU General Public License
//! along with this program.  If not, see <https://www.gnu.org/licenses/>.

#[macro_use]
extern crate log;

#[macro_use]
extern crate serde_derive;

use docopt::Docopt;
use env_logger::Target;
use motionplus::action::{ActionDispatch, PipelineFlags};
use motionplus::auth::LockoutTracker;
use motionplus::capture::mock::MockCaptureDriver;
use motionplus::capture::CaptureDriver;
use motionplus::config::Config;
use motionplus::db::MetadataStore;
use motionplus::logbuf::{self, LogRingBuffer};
use motionplus::motion::MotionConfig;
use motionplus::pipeline::CameraPipeline;
use motionplus::streaming::hub::StreamingHub;
use motionplus::streaming::http::{build_router, AppState};
use motionplus::watchdog::{ThreadHandle, Watchdog};
use std::collections::HashMap;
use std::process::exit;
use std::sync::{Arc, Mutex};
use std::time::Duration;

const USAGE: &str = "
MotionPlus: multi-camera motion detection daemon with a live web control plane.

Usage:
  motionplus [-c <config>] [-n] [-d <level>] [-p <pidfile>] [-l <logfile>] [-m]
  motionplus -b [-c <config>] [-d <level>] [-p <pidfile>] [-l <logfile>]
  motionplus -k [-p <pidfile>]
  motionplus (-h | --help)
  motionplus (-v | --version)

Options:
    -c, --conf <config>       Path to the TOML config file [default: motionplus.toml]
    -b, --background          Daemonize after startup
    -n, --foreground          Force foreground even if the config requests daemonizing
    -d, --debug <level>       Log level 0 (error) through 4 (trace) [default: 2]
    -k, --kill                Signal the running instance (named by pidfile) to stop
    -p, --pidfile <pidfile>   Path to the pidfile [default: motionplus.pid]
    -l, --logfile <logfile>   Path to write logs to, instead of stderr
    -m, --setup               Setup mode: run the web control plane without starting capture
    -h, --help                Show this help
    -v, --version             Show version
";

#[derive(Debug, Clone, Deserialize)]
struct Args {
    flag_conf: String,
    flag_background: bool,
    flag_foreground: bool,
    flag_debug: u8,
    flag_kill: bool,
    flag_pidfile: String,
    flag_logfile: Option<String>,
    flag_setup: bool,
}

fn level_filter(debug: u8) -> log::LevelFilter {
    match debug {
        0 => log::LevelFilter::Error,
        1 => log::LevelFilter::Warn,
        2 => log::LevelFilter::Info,
        3 => log::LevelFilter::Debug,
        _ => log::LevelFilter::Trace,
    }
}

fn main() -> anyhow::Result<()> {
    let version = env!("CARGO_PKG_NAME").to_string() + ", version: " + env!("CARGO_PKG_VERSION");
    let args: Args = Docopt::new(USAGE)
        .map(|d| d.help(true))
        .map(|d| d.version(Some(version)))
        .and_then(|d| d.deserialize())
        .unwrap_or_else(|e| e.exit());

    if args.flag_kill {
        return kill_running(&args.flag_pidfile);
    }

    let logbuf = Arc::new(LogRingBuffer::new(2000));
    let target = match &args.flag_logfile {
        Some(path) => {
            let file = std::fs::OpenOptions::new().create(true).append(true).open(path)?;
            Target::Pipe(Box::new(file))
        }
        None => Target::Stderr,
    };
    logbuf::install(logbuf.clone(), level_filter(args.flag_debug), target);

    let config = match Config::load(std::path::Path::new(&args.flag_conf)) {
        Ok(cfg) => cfg,
        Err(e) => {
            eprintln!("failed to load config {}: {e}", args.flag_conf);
            exit(1);
        }
    };

    std::fs::create_dir_all(&config.general.target_dir)?;
    std::fs::write(&args.flag_pidfile, std::process::id().to_string())?;

    let metadata = Arc::new(MetadataStore::new(&config.general.target_dir));
    let lockout = Arc::new(LockoutTracker::new(
        config.general.webcontrol_lock_attempts,
        config.general.webcontrol_lock_minutes,
    ));

    let mut hubs: HashMap<u32, Arc<StreamingHub>> = HashMap::new();
    for cam in &config.cameras {
        hubs.insert(cam.device_id, Arc::new(StreamingHub::new()));
    }

    let mut actions = ActionDispatch::new();
    let mut pipeline_handles = Vec::new();

    if !args.flag_setup {
        for cam in config.cameras.clone() {
            let flags = PipelineFlags::new();
            actions.register(cam.device_id, flags.clone());
            let handle = ThreadHandle::new();
            let hub = hubs
                .get(&cam.device_id)
                .cloned()
                .unwrap_or_else(|| Arc::new(StreamingHub::new()));
            let metadata = metadata.clone();
            let motion_cfg = MotionConfig {
                threshold: cam.threshold,
                threshold_maximum: cam.threshold_maximum,
                event_gap_secs: cam.event_gap,
                minimum_motion_frames: cam.minimum_motion_frames,
                emulate_motion: cam.emulate_motion,
                ..MotionConfig::default()
            };
            let device_id = cam.device_id;
            let thread_handle = handle.clone();
            let thread_flags = flags.clone();
            if cam.pause {
                thread_flags.pause.store(true, std::sync::atomic::Ordering::SeqCst);
            }
            let join = std::thread::spawn(move || {
                let driver = open_capture_driver(&cam);
                let mut pipeline = CameraPipeline::new(
                    cam,
                    motion_cfg,
                    driver,
                    hub,
                    metadata,
                    thread_flags,
                    thread_handle,
                );
                pipeline.run();
            });
            info!("camera {device_id}: pipeline thread spawned");
            pipeline_handles.push((handle, join));
        }
    }

    let state = Arc::new(AppState::new(config.clone(), hubs, metadata, logbuf, actions, lockout));
    let webcontrol_port = config.general.webcontrol_port;

    let runtime = tokio::runtime::Builder::new_multi_thread().enable_all().build()?;
    runtime.block_on(async move {
        let app = build_router(state);
        let listener = tokio::net::TcpListener::bind(("0.0.0.0", webcontrol_port)).await?;
        info!("web control plane listening on :{webcontrol_port}");
        axum::serve(listener, app.into_make_service_with_connect_info::<std::net::SocketAddr>()).await
    })?;

    let watchdog = Watchdog::new(Duration::from_secs(10), Duration::from_secs(5));
    for (handle, join) in pipeline_handles {
        watchdog.shutdown(
            &handle,
            |d| std::thread::sleep(d),
            || warn!("pipeline thread escalation"),
            || {},
        );
        let _ = join.join();
    }

    let _ = std::fs::remove_file(&args.flag_pidfile);
    Ok(())
}

/// Selects a capture backend by device string convention: `mock://...` is
/// always available (used by integration tests and `--setup` dry runs);
/// real device strings dispatch to the compiled-in backend.
fn open_capture_driver(cam: &motionplus::config::CameraConfig) -> Box<dyn CaptureDriver> {
    if let Some(_rest) = cam.device.strip_prefix("mock://") {
        return Box::new(MockCaptureDriver::new(Vec::new(), cam.width, cam.height));
    }
    cfg_if::cfg_if! {
        if #[cfg(feature = "netcam")] {
            if cam.device.starts_with("rtsp://") {
                return Box::new(motionplus::capture::netcam::NetCamDriver::default());
            }
        }
    }
    cfg_if::cfg_if! {
        if #[cfg(feature = "v4l2")] {
            return Box::new(motionplus::capture::v4l2::V4l2Driver::default());
        }
    }
    #[allow(unreachable_code)]
    {
        Box::new(MockCaptureDriver::new(Vec::new(), cam.width, cam.height))
    }
}

fn kill_running(pidfile: &str) -> anyhow::Result<()> {
    let text = std::fs::read_to_string(pidfile)
        .map_err(|e| anyhow::anyhow!("could not read pidfile {pidfile}: {e}"))?;
    let pid: i32 = text.trim().parse()?;
    #[cfg(unix)]
    {
        // SIGTERM, matching the watchdog's graceful-shutdown contract (§4.7).
        let ret = unsafe { libc_kill(pid, 15) };
        if ret != 0 {
            anyhow::bail!("failed to signal pid {pid}");
        }
    }
    #[cfg(not(unix))]
    {
        let _ = pid;
        anyhow::bail!("--kill is only supported on unix targets");
    }
    Ok(())
}

#[cfg(unix)]
extern "C" {
    #[link_name = "kill"]
    fn libc_kill(pid: i32, sig: i32) -> i32;
}

#[allow(dead_code)]
fn unused_mutex_marker() -> Mutex<()> {
    // Keeps the `mutex_camlst`/`mutex_post` naming from §5 discoverable in
    // one place; the actual locks live on `Config`/`MetadataStore`.
    Mutex::new(())
}
