use anyhow::{anyhow, Context as _, Result};
use clap::{Parser, Subcommand};
use colored::*;
use std::io::Write as _;
use std::path::Path;

use filepipe::config::{Config, Interface, CONFIG_FILE};
use filepipe::diff;
use filepipe::error::categorize_error;
use filepipe::git::GitQuery;
use filepipe::permissions::FileRule;
use filepipe::session::{DiffRequest, SessionManager};

/// Fallback signaling endpoint for ad-hoc single-file sharing without a
/// config file.
const DEFAULT_SIGNALING: &str = "wss://signal.filepipe.dev";

#[derive(Parser)]
#[command(name = "filepipe")]
#[command(
    about = "Share local files with remote interfaces over replicated documents, in both directions",
    version
)]
struct Cli {
    /// Interface host to share a single file with (ad-hoc mode)
    url: Option<String>,

    /// File to share when a host is given; prompted for if omitted
    file: Option<String>,

    /// Mirror a git diff into read-only base/head maps, optionally against BRANCH
    #[arg(long, value_name = "BRANCH")]
    diff: Option<Option<String>>,

    /// Show recoverable errors and per-path activity
    #[arg(short, long)]
    verbose: bool,

    #[command(subcommand)]
    command: Option<Commands>,
}

#[derive(Subcommand)]
enum Commands {
    /// Print the files changed between two git references
    Diff {
        base: Option<String>,
        head: Option<String>,
    },
}

#[tokio::main(flavor = "current_thread")]
async fn main() {
    let cli = Cli::parse();
    init_tracing(cli.verbose);

    if let Err(err) = run(cli).await {
        if categorize_error(&err).is_fatal() {
            eprintln!("{} {:#}", "✗".red().bold(), err);
        } else {
            eprintln!("{} unexpected failure: {:#}", "✗".red().bold(), err);
        }
        std::process::exit(1);
    }
}

fn init_tracing(verbose: bool) {
    let default = if verbose { "filepipe=debug" } else { "filepipe=warn" };
    let filter = tracing_subscriber::EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new(default));
    tracing_subscriber::fmt().with_env_filter(filter).init();
}

async fn run(cli: Cli) -> Result<()> {
    let root = std::env::current_dir().context("cannot determine working directory")?;

    if let Some(Commands::Diff { base, head }) = cli.command {
        return diff_command(&root, base, head).await;
    }

    let config = Config::load(Path::new(CONFIG_FILE)).await;

    let (signaling, diff_base, interfaces) = if let Some(host) = cli.url.clone() {
        // Ad-hoc mode: one interface, one read/write file.
        let file = match cli.file.clone() {
            Some(file) => file,
            None => prompt("File to share: ")?,
        };
        let iface = Interface {
            name: file.clone(),
            host,
            rules: vec![FileRule::for_path(&file)?],
            manager: false,
            open: false,
        };
        match config {
            Ok(cfg) => (cfg.signaling_server.clone(), cfg.diff_base_branch.clone(), vec![iface]),
            Err(_) => (DEFAULT_SIGNALING.to_string(), None, vec![iface]),
        }
    } else {
        let cfg = config?;
        let interfaces = cfg.interfaces()?;
        (cfg.signaling_server.clone(), cfg.diff_base_branch.clone(), interfaces)
    };

    let diff_request = cli.diff.map(|branch| DiffRequest {
        base_ref: branch
            .or_else(|| diff_base.clone())
            .unwrap_or_else(|| "main".to_string()),
    });

    let manager = SessionManager::start(&root, &signaling, interfaces, diff_request.as_ref()).await?;

    println!("{}", "Sharing interfaces:".cyan().bold());
    for session in manager.sessions() {
        println!(
            "  {} {}",
            format!("{}:", session.name).bright_white(),
            session.url.bright_blue()
        );
        if session.open {
            println!("    {}", "(open this URL in a browser)".bright_black());
        }
    }
    println!("{}", "Press Ctrl-C to stop.".bright_black());

    tokio::signal::ctrl_c()
        .await
        .context("cannot listen for shutdown signal")?;
    println!("\n{}", "Shutting down...".yellow());
    manager.shutdown().await;
    Ok(())
}

async fn diff_command(root: &Path, base: Option<String>, head: Option<String>) -> Result<()> {
    let git = GitQuery::open(root)?;
    let base = match base {
        Some(base) => base,
        None => default_base(root).await,
    };
    let head = match head {
        Some(head) => head,
        None => git.current_branch()?,
    };

    let snap = diff::snapshot(&git, None, root, &base, &head)?;
    if snap.changed.is_empty() {
        println!("{}", format!("no changes between {base} and {head}").green());
        return Ok(());
    }

    println!(
        "{}",
        format!(
            "{} changed file(s) between {base} and {head}:",
            snap.changed.len()
        )
        .cyan()
        .bold()
    );
    for path in &snap.changed {
        let old_len = snap.base.get(path).map(String::len).unwrap_or(0);
        let new_len = snap.head.get(path).map(String::len).unwrap_or(0);
        let marker = if old_len == 0 {
            "A".green()
        } else if new_len == 0 {
            "D".red()
        } else {
            "M".yellow()
        };
        println!("  {} {}", marker.bold(), path.bright_white());
    }
    Ok(())
}

async fn default_base(root: &Path) -> String {
    match Config::load(&root.join(CONFIG_FILE)).await {
        Ok(cfg) => cfg.diff_base_branch.unwrap_or_else(|| "main".into()),
        Err(_) => "main".into(),
    }
}

fn prompt(message: &str) -> Result<String> {
    print!("{message}");
    std::io::stdout().flush()?;
    let mut line = String::new();
    std::io::stdin().read_line(&mut line)?;
    let line = line.trim().to_string();
    if line.is_empty() {
        return Err(anyhow!("no file given; interface configuration is required"));
    }
    Ok(line)
}
