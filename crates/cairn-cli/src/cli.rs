use std::path::PathBuf;

use clap::{Args, Parser, Subcommand};

#[derive(Parser)]
#[command(
    name = "cairn",
    about = "Cairn: content-defined chunking, bundled blob storage and layered workspaces",
    version,
)]
pub struct Cli {
    #[command(subcommand)]
    pub command: Command,

    /// Configuration file. Defaults to ./cairn.toml when present.
    #[arg(short, long, global = true)]
    pub config: Option<PathBuf>,

    /// Store root, overriding `storage.root`.
    #[arg(long, global = true)]
    pub store: Option<PathBuf>,

    /// Log at debug level unless RUST_LOG is set.
    #[arg(short, long, global = true)]
    pub verbose: bool,

    #[arg(long, global = true, default_value = "text")]
    pub format: OutputFormat,
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, clap::ValueEnum)]
pub enum OutputFormat {
    Text,
    Json,
}

#[derive(Subcommand)]
pub enum Command {
    /// Show the content-defined chunk boundaries of a file
    Chunk(ChunkArgs),
    /// Store a directory and print its tree hash
    Snapshot(SnapshotArgs),
    /// Write a stored tree out to a directory
    Extract(ExtractArgs),
    /// Export a stored tree as a zip archive
    Archive(ArchiveArgs),
    /// Bring a workspace layer in line with a stored tree
    Sync(SyncArgs),
    /// Delete a layer's files from a workspace
    RemoveLayer(LayerArgs),
    /// List the layers of a workspace
    Layers(LayersArgs),
    /// Show modified, missing and untracked files of a workspace
    Status(LayersArgs),
    /// Rehash workspace files against their layer manifests
    Verify(VerifyArgs),
    /// Delete files no layer owns
    Clean(LayersArgs),
    /// List, set or delete refs
    Refs(RefsArgs),
    /// Print the effective configuration
    Config,
}

#[derive(Args)]
pub struct ChunkArgs {
    pub path: PathBuf,
    /// Scan in parallel segments of this many bytes
    #[arg(long)]
    pub parallel_segment: Option<usize>,
    /// Also store the file and print its root hash
    #[arg(long)]
    pub write: bool,
}

#[derive(Args)]
pub struct SnapshotArgs {
    pub dir: PathBuf,
    /// Point this ref at the new tree
    #[arg(long = "ref")]
    pub ref_name: Option<String>,
}

#[derive(Args)]
pub struct ExtractArgs {
    /// Tree hash or ref name
    pub tree: String,
    pub dir: PathBuf,
}

#[derive(Args)]
pub struct ArchiveArgs {
    /// Tree hash or ref name
    pub tree: String,
    pub output: PathBuf,
}

#[derive(Args)]
pub struct SyncArgs {
    pub workspace: PathBuf,
    /// Tree hash or ref name
    pub tree: String,
    #[arg(short, long, default_value = "default")]
    pub layer: String,
    /// Directory below the workspace root to place the tree in
    #[arg(long, default_value = "")]
    pub base: String,
}

#[derive(Args)]
pub struct LayerArgs {
    pub workspace: PathBuf,
    #[arg(short, long, default_value = "default")]
    pub layer: String,
}

#[derive(Args)]
pub struct LayersArgs {
    pub workspace: PathBuf,
}

#[derive(Args)]
pub struct VerifyArgs {
    pub workspace: PathBuf,
    /// Only this layer's files. Defaults to every layer.
    #[arg(short, long)]
    pub layer: Option<String>,
}

#[derive(Args)]
pub struct RefsArgs {
    #[command(subcommand)]
    pub action: Option<RefAction>,
}

#[derive(Subcommand)]
pub enum RefAction {
    /// List refs, optionally under a prefix
    List {
        #[arg(default_value = "")]
        prefix: String,
    },
    /// Point a ref at a hash or at another ref's target
    Set { name: String, target: String },
    /// Delete a ref
    Delete { name: String },
}

#[cfg(test)]
mod tests {
    use clap::CommandFactory;

    use super::*;

    #[test]
    fn command_definition_is_consistent() {
        Cli::command().debug_assert();
    }

    #[test]
    fn sync_defaults_to_the_default_layer() {
        let cli = Cli::try_parse_from(["cairn", "sync", "ws", "builds/latest"]).unwrap();
        match cli.command {
            Command::Sync(args) => {
                assert_eq!(args.layer, "default");
                assert_eq!(args.tree, "builds/latest");
                assert_eq!(args.base, "");
            }
            _ => panic!("expected sync"),
        }
    }

    #[test]
    fn sync_accepts_a_base_directory() {
        let cli =
            Cli::try_parse_from(["cairn", "sync", "ws", "abc", "-l", "tools", "--base", "vendor/tools"])
                .unwrap();
        match cli.command {
            Command::Sync(args) => {
                assert_eq!(args.layer, "tools");
                assert_eq!(args.base, "vendor/tools");
            }
            _ => panic!("expected sync"),
        }
    }

    #[test]
    fn inspection_commands_parse() {
        let cli = Cli::try_parse_from(["cairn", "status", "ws"]).unwrap();
        assert!(matches!(cli.command, Command::Status(ref a) if a.workspace == PathBuf::from("ws")));

        let cli = Cli::try_parse_from(["cairn", "verify", "ws"]).unwrap();
        match cli.command {
            Command::Verify(args) => assert_eq!(args.layer, None),
            _ => panic!("expected verify"),
        }
        let cli = Cli::try_parse_from(["cairn", "verify", "ws", "--layer", "engine"]).unwrap();
        match cli.command {
            Command::Verify(args) => assert_eq!(args.layer.as_deref(), Some("engine")),
            _ => panic!("expected verify"),
        }

        let cli = Cli::try_parse_from(["cairn", "clean", "ws", "--format", "json"]).unwrap();
        assert_eq!(cli.format, OutputFormat::Json);
        assert!(matches!(cli.command, Command::Clean(_)));
    }

    #[test]
    fn global_flags_follow_the_subcommand() {
        let cli = Cli::try_parse_from([
            "cairn", "snapshot", "src", "--ref", "builds/1", "--store", "/tmp/s", "--format", "json",
        ])
        .unwrap();
        assert_eq!(cli.store, Some(PathBuf::from("/tmp/s")));
        assert_eq!(cli.format, OutputFormat::Json);
        match cli.command {
            Command::Snapshot(args) => assert_eq!(args.ref_name.as_deref(), Some("builds/1")),
            _ => panic!("expected snapshot"),
        }
    }
}
