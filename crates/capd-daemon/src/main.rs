//! Capture + GPU-preprocess daemon core.

// BEGIN - lints v0.6
// do not change or add/remove here, but one can add exceptions after this section
#![deny(unsafe_code)]
#![warn(future_incompatible, nonstandard_style, rust_2018_idioms)]
#![warn(
    rustdoc::broken_intra_doc_links,
    rustdoc::missing_crate_level_docs,
    rustdoc::private_intra_doc_links
)]
#![warn(clippy::pedantic)]
#![allow(
    clippy::cast_possible_truncation,
    clippy::missing_panics_doc,
    clippy::module_name_repetitions,
    clippy::must_use_candidate
)]
// END - lints v0.6
// crate-specific exceptions:
#![allow(clippy::exit)]

use std::sync::mpsc;
use std::time::Duration;

use capd_config::Config;
use capd_core::{HelperConfig, ProjectionParams};
use capd_gpu::GpuContext;
use capd_resolver::{trampoline::CreateDisplayParams, PlatformVersion, ResolverCatalog};
use clap::{Parser, Subcommand};

/// Capture daemon core CLI.
#[derive(Parser, Debug)]
#[clap(name = "capd")]
#[clap(about = "Capture + GPU-preprocess pipeline core", version, author)]
struct Cli {
    #[clap(subcommand)]
    command: Commands,
}

#[derive(Subcommand, Debug)]
enum Commands {
    /// Resolves every entry point against a compositor library and
    /// prints the platform capability and ABI variants selected.
    Probe {
        /// Library name to scan, e.g. `libsurfaceflinger_client.so`.
        library: String,
        /// Platform version ordinal.
        #[clap(long, default_value_t = PlatformVersion::NEWEST_SUPPORTED.0)]
        platform: u32,
    },
    /// Starts the capture pipeline and logs rolling statistics until
    /// interrupted.
    Run {
        /// Library name to scan.
        library: String,
        #[clap(long, default_value_t = PlatformVersion::NEWEST_SUPPORTED.0)]
        platform: u32,
        /// Display name requested of the compositor.
        #[clap(long, default_value = "capd-virtual-display")]
        display_name: String,
        /// Privileged helper executable for the `fallback` capture mode
        /// (spec &4.7). Omit to leave `fallback` unavailable.
        #[clap(long)]
        helper_path: Option<String>,
        /// How long to wait for the helper's display-token response.
        #[clap(long, default_value_t = 2000)]
        helper_timeout_ms: u64,
    },
}

fn init_tracing() {
    tracing_subscriber::fmt()
        .with_env_filter(tracing_subscriber::EnvFilter::from_default_env())
        .init();
}

fn main() -> anyhow::Result<()> {
    init_tracing();
    let args = Cli::parse();

    match args.command {
        Commands::Probe { library, platform } => {
            let catalog = ResolverCatalog::init(&library, PlatformVersion(platform))?;
            tracing::info!(
                platform = catalog.platform().0,
                image = %catalog.image().path.display(),
                "resolved catalog"
            );
            println!(
                "create_display -> {:?}",
                catalog.resolve("create_display")
            );
            println!(
                "create_buffer_queue -> {:?}",
                catalog.resolve("create_buffer_queue")
            );
            Ok(())
        }
        Commands::Run { library, platform, display_name, helper_path, helper_timeout_ms } => {
            run(&library, platform, &display_name, helper_path.as_deref(), helper_timeout_ms)
        }
    }
}

fn run(
    library: &str,
    platform: u32,
    display_name: &str,
    helper_path: Option<&str>,
    helper_timeout_ms: u64,
) -> anyhow::Result<()> {
    let cfg = Config::load().unwrap_or_else(|e| {
        tracing::warn!(error = %e, "failed to load pipeline config, using defaults");
        Config::from_toml("")
    });
    let pipeline_cfg = cfg.pipeline()?;

    let catalog = ResolverCatalog::init(library, PlatformVersion(platform))?;

    let display_params = CreateDisplayParams { name: display_name.to_string(), ..CreateDisplayParams::default() };
    // No live compositor to query on this offline core; the physical size
    // is the platform's documented default until a real query path exists.
    let physical_size = (1080u32, 2400u32);
    let projection = ProjectionParams {
        source_rect: capd_compositor::Rect {
            left: 0,
            top: 0,
            right: physical_size.0 as i32,
            bottom: physical_size.1 as i32,
        },
        dest_rect: capd_compositor::Rect {
            left: 0,
            top: 0,
            right: physical_size.0 as i32,
            bottom: physical_size.1 as i32,
        },
        orientation: capd_compositor::Orientation::Deg0,
    };

    let (_helper_token_tx, helper_token_rx) = mpsc::channel();
    let helper_cfg = helper_path.map(|path| HelperConfig {
        helper_path: path,
        args: &[],
        env_vars: &[],
        timeout: Duration::from_millis(helper_timeout_ms),
        token_rx: &helper_token_rx,
    });

    let (consumer, backend, physical_size) = capd_core::init_capture(
        catalog,
        &display_params,
        &projection,
        1,
        pipeline_cfg.mode,
        physical_size,
        helper_cfg.as_ref(),
    )?;
    tracing::info!(backend = ?backend, "capture backend selected");

    let gpu_ctx = GpuContext::new()?;
    let target_fps = pipeline_cfg.target_fps.max(1);

    let controller = capd_core::FrameController::new(consumer, gpu_ctx, pipeline_cfg, physical_size)?;

    tracing::info!("pipeline initialized, entering capture loop");
    let frame_interval = Duration::from_millis(1000 / u64::from(target_fps));
    loop {
        match controller.acquire_frame() {
            Ok(frame) => {
                controller.release_frame(frame.buffer_id)?;
            }
            Err(e) => {
                tracing::warn!(error = %e, code = e.code(), "acquire_frame failed");
            }
        }

        let stats = controller.stats().snapshot();
        tracing::debug!(fps = stats.fps, total = stats.total_frames, "status");
        std::thread::sleep(frame_interval);
    }
}
