//! CLI for dimshift - send a photo through the Upside Down.

use clap::{Args, Parser, Subcommand, ValueEnum};
use dimshift::session::CredentialState;
use dimshift::{
    AspectRatio, Config, CredentialStore, FileCredentialStore, GeminiModel, GeminiProvider,
    ImageProvider, ImageSize, JoinPolicy, Session, MAX_COUNT,
};
use std::io::BufRead;
use std::path::PathBuf;
use tracing_subscriber::EnvFilter;

#[derive(Parser)]
#[command(name = "dimshift")]
#[command(about = "Re-imagine a photo inside the Upside Down via Gemini image generation")]
#[command(version)]
struct Cli {
    #[command(subcommand)]
    command: Commands,

    /// Output as JSON
    #[arg(long, global = true)]
    json: bool,

    /// Increase log verbosity (-v info, -vv debug)
    #[arg(short, long, global = true, action = clap::ArgAction::Count)]
    verbose: u8,

    /// Credential file (defaults to the config directory)
    #[arg(long, global = true, env = "DIMSHIFT_CREDENTIALS")]
    credentials: Option<PathBuf>,
}

#[derive(Subcommand)]
enum Commands {
    /// Manage the stored API key
    #[command(subcommand)]
    Key(KeyCommand),

    /// Generate images from a source photo
    Generate(GenerateArgs),
}

#[derive(Subcommand)]
enum KeyCommand {
    /// Store an API key (read from stdin when omitted)
    Set { key: Option<String> },
    /// Remove the stored API key
    Clear,
    /// Show whether an API key is stored
    Status,
    /// Verify the API key against the service
    Check {
        #[arg(long, value_enum)]
        model: Option<ModelArg>,
    },
}

#[derive(Args)]
struct GenerateArgs {
    /// Source photo (PNG, JPEG or WebP)
    image: PathBuf,

    /// Number of images to generate (1-4)
    #[arg(short = 'n', long)]
    count: Option<u32>,

    /// Optional scenario for the subject
    #[arg(short, long, default_value = "")]
    prompt: String,

    /// Directory to write generated images into
    #[arg(short, long)]
    output: Option<PathBuf>,

    /// Keep successful images when some requests fail
    #[arg(long)]
    settled: bool,

    /// Model variant
    #[arg(long, value_enum)]
    model: Option<ModelArg>,

    /// Aspect ratio
    #[arg(long, value_enum, default_value = "1:1")]
    aspect_ratio: AspectRatioArg,

    /// Output resolution tier
    #[arg(long, value_enum, default_value = "1k")]
    size: SizeArg,
}

#[derive(Debug, Clone, Copy, ValueEnum)]
enum ModelArg {
    Pro,
    Flash,
}

impl From<ModelArg> for GeminiModel {
    fn from(arg: ModelArg) -> Self {
        match arg {
            ModelArg::Pro => GeminiModel::Pro,
            ModelArg::Flash => GeminiModel::Flash,
        }
    }
}

#[derive(Debug, Clone, Copy, ValueEnum)]
enum AspectRatioArg {
    #[value(name = "1:1")]
    Square,
    #[value(name = "16:9")]
    Landscape,
    #[value(name = "9:16")]
    Portrait,
    #[value(name = "4:3")]
    Standard,
    #[value(name = "3:4")]
    StandardPortrait,
    #[value(name = "21:9")]
    Ultrawide,
}

impl From<AspectRatioArg> for AspectRatio {
    fn from(arg: AspectRatioArg) -> Self {
        match arg {
            AspectRatioArg::Square => AspectRatio::Square,
            AspectRatioArg::Landscape => AspectRatio::Landscape,
            AspectRatioArg::Portrait => AspectRatio::Portrait,
            AspectRatioArg::Standard => AspectRatio::Standard,
            AspectRatioArg::StandardPortrait => AspectRatio::StandardPortrait,
            AspectRatioArg::Ultrawide => AspectRatio::Ultrawide,
        }
    }
}

#[derive(Debug, Clone, Copy, ValueEnum)]
enum SizeArg {
    #[value(name = "1k")]
    OneK,
    #[value(name = "2k")]
    TwoK,
    #[value(name = "4k")]
    FourK,
}

impl From<SizeArg> for ImageSize {
    fn from(arg: SizeArg) -> Self {
        match arg {
            SizeArg::OneK => ImageSize::OneK,
            SizeArg::TwoK => ImageSize::TwoK,
            SizeArg::FourK => ImageSize::FourK,
        }
    }
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();
    init_tracing(cli.verbose);

    let config = Config::load();
    let store = cli
        .credentials
        .clone()
        .map(FileCredentialStore::new)
        .unwrap_or_else(FileCredentialStore::default_location);

    match cli.command {
        Commands::Key(cmd) => run_key(cmd, store, &config, cli.json).await,
        Commands::Generate(args) => generate(args, store, &config, cli.json).await,
    }
}

fn init_tracing(verbose: u8) {
    let default_level = match verbose {
        0 => "warn",
        1 => "info",
        _ => "debug",
    };
    let filter = EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| EnvFilter::new(format!("dimshift={default_level}")));
    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(std::io::stderr)
        .init();
}

fn build_provider(key: &str, model: GeminiModel, config: &Config) -> dimshift::Result<GeminiProvider> {
    let mut builder = GeminiProvider::builder().api_key(key).model(model);
    if let Some(ref url) = config.base_url {
        builder = builder.base_url(url);
    }
    builder.build()
}

async fn run_key(
    cmd: KeyCommand,
    store: FileCredentialStore,
    config: &Config,
    json_output: bool,
) -> anyhow::Result<()> {
    let mut session = Session::load(store)?;

    match cmd {
        KeyCommand::Set { key } => {
            let key = match key {
                Some(k) => k,
                None => {
                    eprintln!("Paste your Gemini API key and press Enter:");
                    let mut line = String::new();
                    std::io::stdin().lock().read_line(&mut line)?;
                    line
                }
            };
            session.save_credential(&key)?;
            report(
                json_output,
                serde_json::json!({ "credential": "set", "path": session.store().path().display().to_string() }),
                &format!("API key saved to {}", session.store().path().display()),
            )?;
        }
        KeyCommand::Clear => {
            session.clear_credential()?;
            report(
                json_output,
                serde_json::json!({ "credential": "unset" }),
                "API key removed",
            )?;
        }
        KeyCommand::Status => {
            let set = session.state().credential == CredentialState::Set;
            report(
                json_output,
                serde_json::json!({
                    "credential": if set { "set" } else { "unset" },
                    "path": session.store().path().display().to_string(),
                }),
                if set { "API key is set" } else { "No API key stored" },
            )?;
        }
        KeyCommand::Check { model } => {
            let key = session
                .store()
                .get()?
                .or_else(|| std::env::var("GOOGLE_API_KEY").ok())
                .ok_or_else(|| anyhow::anyhow!("no API key stored; run `dimshift key set`"))?;
            let model: GeminiModel = model.map(Into::into).unwrap_or(config.model);
            let provider = build_provider(&key, model, config)?;
            match provider.health_check().await {
                Ok(()) => report(
                    json_output,
                    serde_json::json!({ "credential": "valid", "model": model.as_str() }),
                    &format!("API key accepted by {} ({})", provider.name(), model),
                )?,
                Err(e) if e.invalidates_credential() => {
                    session.clear_credential()?;
                    anyhow::bail!("API key rejected and removed: {e}");
                }
                Err(e) => return Err(e.into()),
            }
        }
    }

    Ok(())
}

async fn generate(
    args: GenerateArgs,
    store: FileCredentialStore,
    config: &Config,
    json_output: bool,
) -> anyhow::Result<()> {
    let policy = if args.settled {
        JoinPolicy::Settled
    } else {
        config.join_policy
    };
    let model: GeminiModel = args.model.map(Into::into).unwrap_or(config.model);
    let count = args.count.unwrap_or(config.image_count);
    if !(1..=MAX_COUNT).contains(&count) {
        anyhow::bail!("--count must be between 1 and {MAX_COUNT}");
    }
    let output_dir = args.output.unwrap_or_else(|| config.output_dir.clone());

    let mut session = Session::load(store)?
        .with_policy(policy)
        .with_ephemeral_credential(std::env::var("GOOGLE_API_KEY").ok());

    if session.state().credential == CredentialState::Unset {
        anyhow::bail!("no API key set; run `dimshift key set` or export GOOGLE_API_KEY");
    }

    session.select_image(&args.image)?;
    session.set_image_count(count)?;
    session.set_user_prompt(args.prompt);
    session.set_aspect_ratio(args.aspect_ratio.into());
    session.set_image_size(args.size.into());

    let summary = match session
        .generate(|key| build_provider(key, model, config))
        .await
    {
        Ok(summary) => summary,
        Err(e) => {
            let message = session.state().error.clone().unwrap_or_default();
            if e.is_transient() {
                anyhow::bail!("{message} ({e}); this looks temporary, try again shortly");
            }
            anyhow::bail!("{message} ({e})");
        }
    };
    if let Some(message) = &session.state().error {
        eprintln!("warning: {message}");
    }

    let gallery = &session.state().gallery;
    let saved = gallery.save_latest(summary.added, &output_dir)?;
    let new_artifacts: Vec<_> = gallery.iter().take(summary.added).collect();

    let failures: Vec<String> = summary.failures.iter().map(|e| e.to_string()).collect();

    if json_output {
        let images: Vec<_> = new_artifacts
            .iter()
            .zip(&saved)
            .map(|(artifact, path)| {
                serde_json::json!({
                    "id": artifact.id,
                    "batch": artifact.batch,
                    "output": path.display().to_string(),
                    "size_bytes": artifact.image.size(),
                    "format": artifact.image.format.extension(),
                    "created_at": artifact.created_at.to_rfc3339(),
                    "duration_ms": artifact.image.metadata.duration_ms,
                })
            })
            .collect();
        let result = serde_json::json!({
            "success": true,
            "requested": count,
            "succeeded": saved.len(),
            "failed": failures.len(),
            "model": model.as_str(),
            "policy": policy.to_string(),
            "images": images,
            "errors": if failures.is_empty() { None } else { Some(&failures) },
        });
        println!("{}", serde_json::to_string_pretty(&result)?);
    } else {
        println!(
            "Generated {} of {} image(s) via {}",
            saved.len(),
            count,
            model
        );
        for path in &saved {
            println!("  {}", path.display());
        }
        for failure in &failures {
            println!("  failed: {failure}");
        }
    }

    Ok(())
}

fn report(json_output: bool, value: serde_json::Value, text: &str) -> anyhow::Result<()> {
    if json_output {
        println!("{}", serde_json::to_string_pretty(&value)?);
    } else {
        println!("{text}");
    }
    Ok(())
}
