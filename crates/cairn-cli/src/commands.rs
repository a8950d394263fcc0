use std::path::Path;

use anyhow::Context;
use cairn_sdk::{CairnConfig, LogFormat, LoggingConfig, Storage};
use cairn_types::CancellationToken;
use cairn_workspace::{FileChange, LayerId, SyncReport, VerifyReport, WorkspaceStatus};
use colored::Colorize;
use tracing_subscriber::EnvFilter;

use crate::cli::*;

const DEFAULT_CONFIG: &str = "cairn.toml";

pub async fn run_command(cli: Cli) -> anyhow::Result<()> {
    let config = load_config(&cli)?;
    init_logging(&config.logging, cli.verbose);
    let format = cli.format;

    match cli.command {
        Command::Config => cmd_config(&config),
        Command::Chunk(args) => cmd_chunk(config, args, format),
        Command::Snapshot(args) => cmd_snapshot(config, args),
        Command::Extract(args) => cmd_extract(config, args),
        Command::Archive(args) => cmd_archive(config, args),
        Command::Sync(args) => cmd_sync(config, args, format).await,
        Command::RemoveLayer(args) => cmd_remove_layer(config, args, format).await,
        Command::Layers(args) => cmd_layers(config, args),
        Command::Status(args) => cmd_status(config, args, format).await,
        Command::Verify(args) => cmd_verify(config, args, format).await,
        Command::Clean(args) => cmd_clean(config, args, format).await,
        Command::Refs(args) => cmd_refs(config, args),
    }
}

fn load_config(cli: &Cli) -> anyhow::Result<CairnConfig> {
    let mut config = match &cli.config {
        Some(path) => CairnConfig::from_file(path)
            .with_context(|| format!("loading {}", path.display()))?,
        None if Path::new(DEFAULT_CONFIG).is_file() => {
            CairnConfig::from_file(Path::new(DEFAULT_CONFIG))
                .with_context(|| format!("loading {DEFAULT_CONFIG}"))?
        }
        None => CairnConfig::default(),
    };
    if let Some(store) = &cli.store {
        config.storage.root = store.clone();
    }
    Ok(config)
}

fn init_logging(config: &LoggingConfig, verbose: bool) {
    let fallback = if verbose { "debug" } else { config.filter.as_str() };
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(fallback));
    let builder = tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(std::io::stderr);
    match config.format {
        LogFormat::Text => builder.init(),
        LogFormat::Json => builder.json().init(),
    }
}

/// A token cancelled by Ctrl-C.
fn interrupt_token() -> CancellationToken {
    let token = CancellationToken::new();
    let trigger = token.clone();
    tokio::spawn(async move {
        if tokio::signal::ctrl_c().await.is_ok() {
            tracing::warn!("interrupted, stopping after the current unit of work");
            trigger.cancel();
        }
    });
    token
}

fn cmd_config(config: &CairnConfig) -> anyhow::Result<()> {
    print!("{}", config.to_toml_string()?);
    Ok(())
}

fn cmd_chunk(mut config: CairnConfig, args: ChunkArgs, format: OutputFormat) -> anyhow::Result<()> {
    if args.parallel_segment.is_some() {
        config.chunking.parallel_segment_size = args.parallel_segment;
    }
    let storage = Storage::open(config)?;
    let chunks = storage.chunk_file(&args.path)?;
    let stored = if args.write {
        let data = std::fs::read(&args.path)?;
        Some(storage.write_data(&data, &interrupt_token())?)
    } else {
        None
    };

    if format == OutputFormat::Json {
        let value = serde_json::json!({
            "path": args.path.display().to_string(),
            "chunks": chunks.iter().map(|c| [c.offset, c.length]).collect::<Vec<_>>(),
            "root": stored.as_ref().map(|(root, _)| root.to_hex()),
            "stream_hash": stored.as_ref().map(|(_, data)| data.stream_hash.to_hex()),
        });
        println!("{}", serde_json::to_string_pretty(&value)?);
        return Ok(());
    }

    for c in &chunks {
        println!("{:>12} {:>8}", c.offset, c.length);
    }
    let total: usize = chunks.iter().map(|c| c.length).sum();
    let average = if chunks.is_empty() { 0 } else { total / chunks.len() };
    println!(
        "{} chunks, {} bytes, average {} bytes",
        chunks.len().to_string().bold(),
        total,
        average
    );
    if let Some((root, data)) = stored {
        println!("  Root: {}", root.to_hex().yellow());
        println!("  Stream hash: {}", data.stream_hash.to_hex().dimmed());
    }
    Ok(())
}

fn cmd_snapshot(config: CairnConfig, args: SnapshotArgs) -> anyhow::Result<()> {
    let storage = Storage::open(config)?;
    let tree = storage.snapshot(&args.dir, &interrupt_token())?;
    let node = storage.read_tree(&tree)?;
    println!("{} Snapshot of {}", "✓".green().bold(), args.dir.display().to_string().bold());
    println!("  Tree: {}", tree.to_hex().yellow());
    println!("  Size: {} bytes", node.length());
    if let Some(name) = &args.ref_name {
        let previous = storage.set_ref(name, tree)?;
        match previous {
            Some(old) if old != tree => {
                println!("  Ref: {} ({} → {})", name.cyan(), old.short_hex().dimmed(), tree.short_hex())
            }
            _ => println!("  Ref: {}", name.cyan()),
        }
    }
    Ok(())
}

fn cmd_extract(config: CairnConfig, args: ExtractArgs) -> anyhow::Result<()> {
    let storage = Storage::open(config)?;
    let tree = storage.resolve(&args.tree)?;
    let stats = storage.extract(&tree, &args.dir, &interrupt_token())?;
    println!(
        "{} Extracted {} into {}",
        "✓".green().bold(),
        tree.short_hex().yellow(),
        args.dir.display().to_string().bold()
    );
    println!(
        "  {} files, {} directories, {} bytes",
        stats.files, stats.directories, stats.bytes
    );
    Ok(())
}

fn cmd_archive(config: CairnConfig, args: ArchiveArgs) -> anyhow::Result<()> {
    let storage = Storage::open(config)?;
    let tree = storage.resolve(&args.tree)?;
    storage.archive(&tree, &args.output)?;
    println!(
        "{} Archived {} to {}",
        "✓".green().bold(),
        tree.short_hex().yellow(),
        args.output.display().to_string().bold()
    );
    Ok(())
}

async fn cmd_sync(config: CairnConfig, args: SyncArgs, format: OutputFormat) -> anyhow::Result<()> {
    let storage = Storage::open(config)?;
    let tree = storage.resolve(&args.tree)?;
    let layer: LayerId = args.layer.parse()?;
    let workspace = storage.open_workspace(&args.workspace)?;
    let report = workspace
        .sync_at(&layer, &args.base, Some(tree), &interrupt_token())
        .await?;
    print_report(&format!("Synced layer {layer}"), &report, format)
}

async fn cmd_remove_layer(
    config: CairnConfig,
    args: LayerArgs,
    format: OutputFormat,
) -> anyhow::Result<()> {
    let storage = Storage::open(config)?;
    let layer: LayerId = args.layer.parse()?;
    let workspace = storage.open_workspace(&args.workspace)?;
    let report = workspace.remove_layer(&layer, &interrupt_token()).await?;
    print_report(&format!("Removed layer {layer}"), &report, format)
}

fn print_report(title: &str, report: &SyncReport, format: OutputFormat) -> anyhow::Result<()> {
    if format == OutputFormat::Json {
        println!("{}", serde_json::to_string_pretty(report)?);
    } else {
        let mark = if report.is_clean() { "✓".green().bold() } else { "!".yellow().bold() };
        println!("{mark} {title}");
        if let Some(tree) = report.tree {
            println!("  Tree: {}", tree.to_hex().yellow());
        }
        let s = &report.stats;
        println!(
            "  kept {}, moved {}, copied {}, downloaded {}, deleted {}",
            s.files_kept, s.files_moved, s.files_copied, s.files_downloaded, s.files_deleted
        );
        println!(
            "  {} bytes reused, {} bytes downloaded",
            s.bytes_reused, s.bytes_downloaded
        );
        for failure in &report.failures {
            println!("  {} {}", "✗".red(), failure);
        }
    }
    if !report.is_clean() {
        anyhow::bail!("{} file(s) could not be synced", report.failures.len());
    }
    Ok(())
}

fn cmd_layers(config: CairnConfig, args: LayersArgs) -> anyhow::Result<()> {
    let storage = Storage::open(config)?;
    let workspace = storage.open_workspace(&args.workspace)?;
    let layers = workspace.layers()?;
    if layers.is_empty() {
        println!("No layers.");
    }
    for layer in layers {
        let manifest = workspace.layer_manifest(&layer)?;
        let tree = manifest
            .tree
            .map(|t| t.short_hex())
            .unwrap_or_else(|| "(none)".into());
        println!(
            "{}  {}  {} files",
            layer.as_str().cyan().bold(),
            tree.yellow(),
            manifest.files.len()
        );
    }
    Ok(())
}

async fn cmd_status(config: CairnConfig, args: LayersArgs, format: OutputFormat) -> anyhow::Result<()> {
    let storage = Storage::open(config)?;
    let workspace = storage.open_workspace(&args.workspace)?;
    let status = workspace.status(&interrupt_token()).await?;
    print_status(&status, format)
}

fn print_status(status: &WorkspaceStatus, format: OutputFormat) -> anyhow::Result<()> {
    if format == OutputFormat::Json {
        println!("{}", serde_json::to_string_pretty(status)?);
        return Ok(());
    }
    for entry in &status.entries {
        let label = match entry.change {
            FileChange::Modified => "modified".yellow(),
            FileChange::Missing => "missing".red(),
            FileChange::Untracked => "untracked".green(),
        };
        println!("{:>10}  {}", label, entry.path);
    }
    if status.is_clean() {
        println!("{} {} tracked files, no changes", "✓".green().bold(), status.tracked);
    } else {
        println!("{} changes in {} tracked files", status.entries.len(), status.tracked);
    }
    Ok(())
}

async fn cmd_verify(config: CairnConfig, args: VerifyArgs, format: OutputFormat) -> anyhow::Result<()> {
    let storage = Storage::open(config)?;
    let workspace = storage.open_workspace(&args.workspace)?;
    let layer = args.layer.as_deref().map(str::parse::<LayerId>).transpose()?;
    let report = workspace.verify(layer.as_ref(), &interrupt_token()).await?;
    print_verify(&report, format)
}

fn print_verify(report: &VerifyReport, format: OutputFormat) -> anyhow::Result<()> {
    if format == OutputFormat::Json {
        println!("{}", serde_json::to_string_pretty(report)?);
    } else {
        let mark = if report.is_clean() { "✓".green().bold() } else { "!".yellow().bold() };
        println!(
            "{mark} Verified {} files, {} bytes",
            report.files_checked, report.bytes_checked
        );
        for mismatch in &report.mismatches {
            println!("  {} {}", "✗".red(), mismatch);
        }
    }
    if !report.is_clean() {
        anyhow::bail!("{} file(s) do not match their manifest", report.mismatches.len());
    }
    Ok(())
}

async fn cmd_clean(config: CairnConfig, args: LayersArgs, format: OutputFormat) -> anyhow::Result<()> {
    let storage = Storage::open(config)?;
    let workspace = storage.open_workspace(&args.workspace)?;
    let removed = workspace.clean(&interrupt_token()).await?;
    if format == OutputFormat::Json {
        println!("{}", serde_json::to_string_pretty(&removed)?);
        return Ok(());
    }
    for path in &removed {
        println!("  {} {}", "-".red(), path);
    }
    println!("{} Removed {} untracked files", "✓".green().bold(), removed.len());
    Ok(())
}

fn cmd_refs(config: CairnConfig, args: RefsArgs) -> anyhow::Result<()> {
    let storage = Storage::open(config)?;
    match args.action.unwrap_or(RefAction::List { prefix: String::new() }) {
        RefAction::List { prefix } => {
            let refs = storage.list_refs(&prefix)?;
            if refs.is_empty() {
                println!("No refs.");
            }
            for (name, target) in refs {
                println!("{}  {}", target.to_hex().yellow(), name.as_str());
            }
        }
        RefAction::Set { name, target } => {
            let hash = storage.resolve(&target)?;
            storage.set_ref(&name, hash)?;
            println!("Set {} → {}", name.cyan(), hash.short_hex().yellow());
        }
        RefAction::Delete { name } => {
            if storage.delete_ref(&name)? {
                println!("Deleted ref {}", name.cyan());
            } else {
                anyhow::bail!("ref not found: {name}");
            }
        }
    }
    Ok(())
}
