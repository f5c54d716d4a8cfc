use anyhow::{Context, Result};
use clap::Parser;
use std::path::{Path, PathBuf};
use std::process::{Command, ExitStatus};
use tracing::{error, info};
use tracing_subscriber::EnvFilter;

const MODEL_REPO_ID: &str = "Avencast/EveNet";
const MODEL_FILENAME: &str = "checkpoints.20M.a4.last.ckpt";

const DEMO_REPO_ID: &str = "Avencast/EveNet";
const DEMO_FILES: [&str; 2] = ["evenet_demo_train.h5", "evenet_demo_val.h5"];
const DEMO_DATA_DIR: &str = "cache/data";

const DEFAULT_CONFIG: &str = "share/finetune-example.yaml";

#[cfg(not(target_os = "windows"))]
const TRAINER_BIN: &str = "evenet-train";
#[cfg(target_os = "windows")]
const TRAINER_BIN: &str = "evenet-train.exe";

#[derive(Parser, Debug)]
#[command(
    name = "evenet-launch",
    version,
    about = "Download the pretrained EveNet model and launch fine-tuning"
)]
struct Args {
    /// Path to the training config YAML file.
    #[clap(default_value = DEFAULT_CONFIG)]
    config: PathBuf,

    /// Ray results directory, passed through to the trainer verbatim.
    #[clap(long = "ray_dir", default_value = "~/ray_results")]
    ray_dir: String,

    /// Download the demo dataset and run with the default config.
    #[clap(long, default_value_t = false)]
    demo: bool,

    /// HF access token for hub downloads (falls back to cached creds).
    #[clap(long, env = "HF_TOKEN", hide_env_values = true)]
    token: Option<String>,

    /// Override the model cache directory.
    #[clap(long, env = "EVENET_MODEL_PATH")]
    model_cache: Option<PathBuf>,

    /// Disable the hub download progress bars.
    #[clap(long, default_value_t = false)]
    no_progress: bool,
}

fn main() -> Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")))
        .init();

    let args = Args::parse();
    let progress_bar = !args.no_progress;

    if args.demo {
        info!("Demo mode: downloading dataset and launching with default config");
        let files = evenet_artifacts::download_dataset_files_sync(
            DEMO_REPO_ID,
            &DEMO_FILES,
            Path::new(DEMO_DATA_DIR),
            args.token.clone(),
            progress_bar,
        )
        .context("failed to download demo dataset")?;
        info!(files = files.len(), "Demo dataset ready");
    }
    let config_path = effective_config_path(args.demo, &args.config);

    info!("Checking for pretrained model...");
    let ckpt_path = evenet_artifacts::download_model_file_sync(
        MODEL_REPO_ID,
        MODEL_FILENAME,
        args.model_cache.clone(),
        args.token.clone(),
        progress_bar,
    )
    .context("failed to download pretrained model")?;
    info!(path = %ckpt_path.display(), "Model ready");

    let updated_config = evenet_config::materialize(&config_path, &ckpt_path)
        .context("failed to prepare training configuration")?;
    info!(config = %updated_config.display(), "Using updated config");

    info!("Launching fine-tuning...");
    let status = trainer_command(&updated_config, &args.ray_dir)
        .status()
        .with_context(|| format!("failed to launch {TRAINER_BIN}"))?;
    match launch_exit_code(status) {
        0 => Ok(()),
        code => {
            error!("Training failed: {status}");
            std::process::exit(code);
        }
    }
}

/// Any trainer failure maps to exit status 1, whatever code the trainer
/// itself exited with.
fn launch_exit_code(status: ExitStatus) -> i32 {
    if status.success() {
        0
    } else {
        1
    }
}

/// Demo mode always runs against the bundled example config, whatever the
/// user passed positionally.
fn effective_config_path(demo: bool, user_config: &Path) -> PathBuf {
    if demo {
        PathBuf::from(DEFAULT_CONFIG)
    } else {
        user_config.to_path_buf()
    }
}

fn trainer_command(config: &Path, ray_dir: &str) -> Command {
    let mut cmd = Command::new(TRAINER_BIN);
    cmd.arg(config).arg("--ray_dir").arg(ray_dir);
    cmd
}
