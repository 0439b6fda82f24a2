use anyhow::{Context, Result};
use clap::{Parser, Subcommand};
use facefile_core::{
    CameraDevice, CaptureController, DirGallery, Identity, ScanMatcher, Session,
};
use facefile_hw::{StillImage, V4lCamera};
use std::path::PathBuf;
use tracing_subscriber::EnvFilter;

mod config;
mod report;
mod session;

use config::Config;

#[derive(Parser)]
#[command(name = "facefile", about = "Capture webcam faces and file them into per-person folders")]
struct Cli {
    /// Config file (default: $XDG_CONFIG_HOME/facefile/config.toml)
    #[arg(long, global = true)]
    config: Option<PathBuf>,
    /// Gallery root directory
    #[arg(long, global = true)]
    gallery: Option<PathBuf>,
    /// Match distance threshold (a match must be strictly below it)
    #[arg(long, global = true)]
    threshold: Option<f32>,
    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Interactive session: verify, save, connect, disconnect
    Session {
        /// Use this image file instead of the webcam
        #[arg(long)]
        image: Option<PathBuf>,
    },
    /// Capture once, match against the gallery, file the image
    Verify {
        /// Use this image file instead of the webcam
        #[arg(long)]
        image: Option<PathBuf>,
    },
    /// Capture once and save it compressed under an existing identity
    Save {
        /// Identity number (the n in user_<n>)
        #[arg(short, long)]
        identity: u32,
        /// Use this image file instead of the webcam
        #[arg(long)]
        image: Option<PathBuf>,
    },
    /// List identities in the gallery
    List {
        /// Print JSON instead of a table
        #[arg(long)]
        json: bool,
    },
    /// List V4L2 capture devices
    Devices,
}

fn main() -> Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::from_default_env())
        .with_writer(std::io::stderr)
        .init();

    let cli = Cli::parse();

    let mut config = Config::load(cli.config.as_deref())?;
    if let Some(gallery) = cli.gallery {
        config.gallery_root = gallery;
    }
    if let Some(threshold) = cli.threshold {
        config.match_threshold = threshold;
    }

    match cli.command {
        Commands::Session { image } => {
            let controller = build_controller(&config)?;
            let camera = camera(&config, image);
            println!("facefile session: gallery {}", config.gallery_root.display());
            println!("type `help` for commands");
            let stdin = std::io::stdin();
            let mut stdout = std::io::stdout();
            session::run(&controller, camera.as_ref(), stdin.lock(), &mut stdout)?;
        }
        Commands::Verify { image } => {
            let controller = build_controller(&config)?;
            let camera = camera(&config, image);
            let mut session = Session::new();
            let outcome = controller.capture_and_verify(&mut session, camera.as_ref())?;
            println!("{}", report::describe(&outcome));
        }
        Commands::Save { identity, image } => {
            let identity = Identity::new(identity).context("identity numbers start at 1")?;
            let controller = build_controller(&config)?;
            let camera = camera(&config, image);
            let mut session = Session::new();
            controller.connect(&mut session, identity)?;
            let outcome = controller.capture_and_save(&session, camera.as_ref())?;
            println!("{}", report::describe(&outcome));
        }
        Commands::List { json } => {
            let gallery = DirGallery::open(&config.gallery_root)?;
            let rows = report::summarize(&gallery)?;
            if json {
                println!("{}", serde_json::to_string_pretty(&rows)?);
            } else {
                print!("{}", report::render_table(&rows));
            }
        }
        Commands::Devices => {
            let devices = V4lCamera::list_devices();
            if devices.is_empty() {
                println!("No V4L2 capture devices found");
            }
            for d in devices {
                println!("{}  {} ({}, {})", d.path, d.name, d.driver, d.bus);
            }
        }
    }

    Ok(())
}

type Controller = CaptureController<DirGallery, ScanMatcher<Box<dyn facefile_core::Verifier>>>;

fn build_controller(config: &Config) -> Result<Controller> {
    let gallery = DirGallery::open(&config.gallery_root)
        .with_context(|| format!("opening gallery {}", config.gallery_root.display()))?;
    let verifier = config.build_verifier()?;
    tracing::info!(
        gallery = %config.gallery_root.display(),
        backend = ?config.verifier,
        threshold = config.match_threshold,
        "controller ready"
    );
    Ok(CaptureController::new(
        gallery,
        ScanMatcher::new(verifier),
        config.capture_settings(),
    ))
}

fn camera(config: &Config, image: Option<PathBuf>) -> Box<dyn CameraDevice> {
    match image {
        Some(path) => Box::new(StillImage::new(path)),
        None => Box::new(V4lCamera::new(
            config.camera_device.clone(),
            config.frame_width,
            config.frame_height,
            config.warmup_frames,
        )),
    }
}
