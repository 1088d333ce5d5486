//! CLI for turnaround - multi-view image generation with a credit quota.

use clap::{Args, Parser, Subcommand, ValueEnum};
use std::path::PathBuf;
use turnaround::{
    FileStore, GeminiProvider, Orchestrator, QuotaStore, RenderMode, RunEvent, SourceImage,
    ViewProvider,
};

#[derive(Parser)]
#[command(name = "turnaround")]
#[command(about = "Generate multiple camera-angle views of an image's subject via Gemini")]
#[command(version)]
struct Cli {
    #[command(subcommand)]
    command: Commands,

    /// Output as JSON
    #[arg(long, global = true)]
    json: bool,

    /// Directory holding persisted state (credit counters)
    #[arg(long, global = true, env = "TURNAROUND_DATA_DIR")]
    data_dir: Option<PathBuf>,
}

#[derive(Subcommand)]
enum Commands {
    /// Analyze an image and render each view of its subject
    Generate(GenerateArgs),

    /// Only describe the main subject of an image (no credit involved)
    Describe {
        /// Path to the source image (png, jpeg, webp)
        image: PathBuf,
    },

    /// Show or change the generation credit quota
    Quota {
        #[command(subcommand)]
        command: QuotaCommand,
    },

    /// Check that the provider is reachable and the API key is valid
    Check,
}

#[derive(Args)]
struct GenerateArgs {
    /// Path to the source image (png, jpeg, webp)
    image: PathBuf,

    /// How views are produced: re-render the source image, or synthesize
    /// from the description alone
    #[arg(short, long, value_enum, default_value = "edit")]
    mode: ModeArg,

    /// Comma-separated view labels, replacing the default list
    #[arg(long, value_delimiter = ',')]
    views: Option<Vec<String>>,

    /// Seed for deterministic generation
    #[arg(long)]
    seed: Option<u64>,

    /// Directory the rendered views are written to
    #[arg(short, long, default_value = ".")]
    out_dir: PathBuf,
}

#[derive(Subcommand)]
enum QuotaCommand {
    /// Print the current credit balance
    Show,
    /// Set a new total credit balance (resets usage)
    Set {
        /// New total; must be non-negative
        #[arg(allow_negative_numbers = true)]
        total: i64,
    },
    /// Reset the used-credit counter to zero
    Reset,
}

#[derive(Debug, Clone, Copy, ValueEnum)]
enum ModeArg {
    Edit,
    Generate,
}

impl From<ModeArg> for RenderMode {
    fn from(arg: ModeArg) -> Self {
        match arg {
            ModeArg::Edit => RenderMode::Edit,
            ModeArg::Generate => RenderMode::Generate,
        }
    }
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(tracing_subscriber::EnvFilter::from_default_env())
        .with_writer(std::io::stderr)
        .init();

    let cli = Cli::parse();
    let data_dir = resolve_data_dir(cli.data_dir)?;

    match cli.command {
        Commands::Generate(args) => generate(args, cli.json, &data_dir).await,
        Commands::Describe { image } => describe(&image, cli.json).await,
        Commands::Quota { command } => quota(command, cli.json, &data_dir),
        Commands::Check => check(cli.json).await,
    }
}

fn resolve_data_dir(flag: Option<PathBuf>) -> anyhow::Result<PathBuf> {
    if let Some(dir) = flag {
        return Ok(dir);
    }
    dirs::data_dir()
        .map(|d| d.join("turnaround"))
        .ok_or_else(|| anyhow::anyhow!("no data directory available; pass --data-dir"))
}

fn open_quota(data_dir: &PathBuf) -> anyhow::Result<QuotaStore<FileStore>> {
    Ok(QuotaStore::load(FileStore::open(data_dir)?)?)
}

async fn generate(args: GenerateArgs, json_output: bool, data_dir: &PathBuf) -> anyhow::Result<()> {
    let source = SourceImage::from_path(&args.image)?;
    let provider = GeminiProvider::builder().build()?;
    let quota = open_quota(data_dir)?;

    let mut orchestrator = Orchestrator::new(Box::new(provider), quota);
    orchestrator.upload(source);
    orchestrator.set_mode(args.mode.into());
    orchestrator.set_seed(args.seed);
    if let Some(views) = args.views {
        orchestrator.set_views(views);
    }

    std::fs::create_dir_all(&args.out_dir)?;

    // Print progress as it happens; the receiver stops at the terminal event.
    let printer = if json_output {
        None
    } else {
        let mut rx = orchestrator.subscribe();
        Some(tokio::spawn(async move {
            while let Some(event) = rx.recv().await {
                match event {
                    RunEvent::Analyzing => println!("Analyzing image..."),
                    RunEvent::Described { description } => {
                        println!("Base prompt: \"{description}\"");
                    }
                    RunEvent::GeneratingView { view, index, total } => {
                        println!("[{}/{}] Generating: {}", index + 1, total, view);
                    }
                    RunEvent::ViewCompleted { view, completed, total } => {
                        println!(
                            "[{completed}/{total}] Done: {} ({} bytes)",
                            view.view,
                            view.image.size()
                        );
                    }
                    RunEvent::Completed { .. } | RunEvent::Failed { .. } => break,
                }
            }
        }))
    };

    let outcome = orchestrator.generate().await.map(|_| ());
    if let Some(handle) = printer {
        let _ = handle.await;
    }

    // Views completed before any failure are still saved.
    let mut saved = Vec::new();
    for (index, view) in orchestrator.results().iter().enumerate() {
        let filename = format!(
            "{:02}_{}.{}",
            index + 1,
            view.view.replace(' ', "_"),
            view.image.format.extension()
        );
        let path = args.out_dir.join(filename);
        view.image.save(&path)?;
        saved.push((view.view.clone(), path));
    }

    let quota_state = orchestrator.quota().state();

    if json_output {
        let result = serde_json::json!({
            "success": outcome.is_ok(),
            "mode": orchestrator.mode().to_string(),
            "description": orchestrator.description(),
            "error": outcome.as_ref().err().map(|e| e.to_string()),
            "views": saved
                .iter()
                .map(|(view, path)| {
                    serde_json::json!({"view": view, "output": path.display().to_string()})
                })
                .collect::<Vec<_>>(),
            "credits": {
                "total": quota_state.total_credits,
                "used": quota_state.used_credits,
                "remaining": orchestrator.quota().remaining(),
            },
        });
        println!("{}", serde_json::to_string_pretty(&result)?);
    } else {
        for (view, path) in &saved {
            println!("Saved {}: {}", view, path.display());
        }
        println!(
            "Credits: {} of {} used ({} remaining)",
            quota_state.used_credits,
            quota_state.total_credits,
            orchestrator.quota().remaining()
        );
    }

    outcome?;
    Ok(())
}

async fn describe(image: &PathBuf, json_output: bool) -> anyhow::Result<()> {
    let source = SourceImage::from_path(image)?;
    let provider = GeminiProvider::builder().build()?;
    let description = provider.describe(&source).await?;

    if json_output {
        println!(
            "{}",
            serde_json::to_string_pretty(&serde_json::json!({ "description": description }))?
        );
    } else {
        println!("{description}");
    }
    Ok(())
}

fn quota(command: QuotaCommand, json_output: bool, data_dir: &PathBuf) -> anyhow::Result<()> {
    let mut quota = open_quota(data_dir)?;

    match command {
        QuotaCommand::Show => {}
        QuotaCommand::Set { total } => {
            if !quota.set_total(total)? {
                anyhow::bail!("total credits must be a non-negative integer");
            }
        }
        QuotaCommand::Reset => quota.reset_used()?,
    }

    let state = quota.state();
    if json_output {
        let result = serde_json::json!({
            "total": state.total_credits,
            "used": state.used_credits,
            "remaining": quota.remaining(),
            "depleted": quota.is_depleted(),
        });
        println!("{}", serde_json::to_string_pretty(&result)?);
    } else {
        println!(
            "Credits: {} of {} used ({} remaining)",
            state.used_credits,
            state.total_credits,
            quota.remaining()
        );
        if quota.is_depleted() {
            println!("Quota depleted: set a new balance or reset usage to generate again.");
        }
    }
    Ok(())
}

async fn check(json_output: bool) -> anyhow::Result<()> {
    let provider = GeminiProvider::builder().build()?;
    provider.health_check().await?;

    if json_output {
        println!(
            "{}",
            serde_json::to_string_pretty(&serde_json::json!({
                "provider": provider.kind().to_string(),
                "ok": true,
            }))?
        );
    } else {
        println!("{}: ok", provider.name());
    }
    Ok(())
}
