use clap::Parser;
use crossterm::{
    cursor,
    event::{EnableMouseCapture, KeyboardEnhancementFlags, PushKeyboardEnhancementFlags},
    execute,
    terminal::{self, ClearType, EnterAlternateScreen},
};
use std::io::{self, BufWriter, Write};

mod arena;
mod camera;
mod controller;
mod demo;
mod input;
mod kernel;
mod physics;
mod render;
mod sorter;
mod splat;
mod terminal_setup;

use controller::{ControllerOptions, FpsController};
use render::{run_app_loop, AppState};
use sorter::{create_sort_client, probe_platform, OsVersion, UploadRange};
use splat::{pack_centers_f32, pack_centers_i32};
use terminal_setup::{cleanup_terminal, install_panic_hook};

type AppResult<T> = Result<T, Box<dyn std::error::Error>>;

/// Center uploads are streamed in ranges of this many entries, the way a
/// scene arrives from a network fetch.
const UPLOAD_CHUNK: usize = 8_192;

#[derive(Debug, Parser)]
#[command(name = "splatwalk", version, about = "Terminal first-person Gaussian splat walkthrough")]
struct Cli {
    #[arg(long, value_name = "N", default_value_t = 45_000, help = "Demo splat count")]
    splats: usize,
    #[arg(
        long,
        value_name = "BITS",
        default_value_t = arena::DEFAULT_DISTANCE_MAP_PRECISION,
        value_parser = clap::value_parser!(u32).range(1..=24),
        help = "Depth bucket precision in bits"
    )]
    precision: u32,
    #[arg(long, help = "Sort on fixed-point centers instead of floats")]
    integer_sort: bool,
    #[arg(
        long,
        conflicts_with = "integer_sort",
        help = "Feed the sorter precomputed view distances instead of projecting in the kernel"
    )]
    precomputed: bool,
    #[arg(long, help = "Route depths through per-scene transforms")]
    dynamic: bool,
    #[arg(long, help = "Force the scalar sort kernel")]
    no_simd: bool,
    #[arg(long, help = "Force copy-memory transport")]
    no_shared: bool,
    #[arg(
        long,
        value_name = "MAJOR.MINOR",
        help = "Pretend to run on this mobile OS version (versions below 16.4 cannot take shared memory)"
    )]
    mobile_os: Option<String>,
    #[arg(long, value_name = "UNITS", default_value_t = 10.0, help = "Half-extent of the walled courtyard")]
    extent: f32,
}

fn parse_os_version(raw: &str) -> AppResult<OsVersion> {
    let (major, minor) = raw
        .split_once('.')
        .ok_or_else(|| format!("Expected MAJOR.MINOR, got '{raw}'"))?;
    Ok(OsVersion {
        major: major.parse()?,
        minor: minor.parse()?,
    })
}

fn upload_demo_scene(
    app_splats: &[splat::Splat],
    sorter: &sorter::SortClient,
    integer_sort: bool,
    dynamic: bool,
) -> AppResult<()> {
    let count = app_splats.len();
    let scene_indexes = if dynamic { Some(vec![0u32; count]) } else { None };

    let mut from = 0;
    while from < count {
        let chunk = UPLOAD_CHUNK.min(count - from);
        let range = UploadRange { from, count: chunk };
        let scenes = scene_indexes
            .as_deref()
            .map(|all| &all[from..from + chunk]);
        if integer_sort {
            let centers = pack_centers_i32(&app_splats[from..from + chunk]);
            sorter.upload_centers_i32(&centers, scenes, range)?;
        } else {
            let centers = pack_centers_f32(&app_splats[from..from + chunk]);
            sorter.upload_centers_f32(&centers, scenes, range)?;
        }
        from += chunk;
    }
    Ok(())
}

fn main() -> AppResult<()> {
    env_logger::Builder::from_env(env_logger::Env::default().default_filter_or("warn")).init();
    install_panic_hook();
    let cli = Cli::parse();

    let mut caps = probe_platform();
    if cli.no_simd {
        caps.simd_supported = false;
    }
    if cli.no_shared {
        caps.cross_origin_isolated = false;
    }
    if let Some(raw) = cli.mobile_os.as_deref() {
        caps.mobile_os_version = Some(parse_os_version(raw)?);
    }

    let splats = demo::generate_demo_splats(cli.splats, cli.extent);
    let sorter = create_sort_client(
        splats.len(),
        &caps,
        cli.integer_sort,
        cli.dynamic,
        cli.precision,
    )?;
    upload_demo_scene(&splats, &sorter, cli.integer_sort, cli.dynamic)?;

    let mut controller = FpsController::new(ControllerOptions {
        grid_half_extent: cli.extent,
        ..ControllerOptions::default()
    });
    controller.set_pointer_locked(true);
    // Solid colliders under the demo pillars so the walkthrough bumps into
    // what it sees.
    for (x, z) in demo::PILLAR_FOOTPRINTS {
        controller.add_static_collider(
            glam::Vec3::new(x, 1.6, z),
            glam::Vec3::new(0.7, 3.2, 0.7),
            None,
        );
    }

    let use_truecolor = match std::env::var("COLORTERM") {
        Ok(val) => !val.is_empty() && (val == "truecolor" || val == "24bit"),
        Err(_) => match std::env::var("TERM") {
            Ok(term) => {
                term.contains("ghostty") || term.contains("kitty") || term.contains("wezterm")
            }
            Err(_) => false,
        },
    };

    let mut app_state = AppState::new(splats, sorter, controller, use_truecolor);
    app_state.use_precomputed = cli.precomputed;
    if cli.dynamic {
        // Single demo scene pinned to the identity transform.
        let mut identity = vec![0.0f32; 16];
        for i in 0..4 {
            identity[i * 4 + i] = 1.0;
        }
        app_state.pending_transforms = Some(identity);
    }

    crossterm::terminal::enable_raw_mode()?;
    let input_rx = input::thread::spawn_input_thread();
    let mut stdout = BufWriter::with_capacity(1024 * 1024, io::stdout());

    execute!(
        stdout,
        EnterAlternateScreen,
        EnableMouseCapture,
        cursor::Hide,
        terminal::Clear(ClearType::All)
    )?;
    // Request key event kinds so key releases are observable for held-key
    // movement; not every terminal supports the enhancement.
    if execute!(
        stdout,
        PushKeyboardEnhancementFlags(
            KeyboardEnhancementFlags::DISAMBIGUATE_ESCAPE_CODES
                | KeyboardEnhancementFlags::REPORT_EVENT_TYPES
        )
    )
    .is_err()
    {
        log::warn!("keyboard enhancement flags unsupported; key releases may be missed");
    }
    stdout.flush()?;

    let run_result = run_app_loop(&mut app_state, &input_rx, &mut stdout);
    let cleanup_result = cleanup_terminal(&mut stdout);

    run_result?;
    cleanup_result
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn os_version_parses_major_minor() {
        let version = parse_os_version("16.4").expect("parse");
        assert_eq!(version, OsVersion { major: 16, minor: 4 });
        assert!(parse_os_version("16").is_err());
    }
}
