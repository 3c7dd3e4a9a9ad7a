//! `yarnix` - turn a resolved package-registry dump into the artifacts
//! a content-addressed build needs: a `yarn-manifest.nix`, a loader
//! resolution registry, and a lockfile snapshot.

use anyhow::{Context, Result};
use clap::{Args as ClapArgs, Parser, Subcommand};
use std::path::{Path, PathBuf};
use tracing::info;
use yarnix_core::outputs::{PathHasher, PriorManifest, SystemProbe, hash_unavailable};
use yarnix_core::pipeline;
use yarnix_core::registry::parse_dump;

#[derive(Parser, Debug)]
#[command(name = "yarnix")]
#[command(about = "Bridge a resolved Yarn package registry into Nix build inputs")]
struct Args {
  #[command(subcommand)]
  command: Command,
}

#[derive(ClapArgs, Debug)]
struct GraphArgs {
  /// Path to the package registry dump (JSON)
  #[arg(long, value_name = "FILE")]
  registry: PathBuf,

  /// Top-level package locator, e.g. "app@workspace:."
  #[arg(long, value_name = "LOCATOR")]
  top_level: String,
}

#[derive(Subcommand, Debug)]
enum Command {
  /// Write the yarn-manifest.nix build manifest
  Manifest {
    #[command(flatten)]
    graph: GraphArgs,

    /// Platform key for outputHashByPlatform, e.g. "x86_64-linux"
    #[arg(long, value_name = "SYSTEM")]
    system: String,

    /// Directory under which unplugged packages extract
    #[arg(long, value_name = "DIR", default_value = ".yarn/unplugged")]
    unplugged_root: PathBuf,

    /// Prior manifest (JSON) for incremental hash reuse
    #[arg(long, value_name = "FILE")]
    prior_manifest: Option<PathBuf>,

    /// Output path
    #[arg(long, value_name = "FILE", default_value = "yarn-manifest.nix")]
    out: PathBuf,
  },

  /// Write the module-loader resolution registry (JSON)
  LoaderData {
    #[command(flatten)]
    graph: GraphArgs,

    /// Directory the loader file will live in
    #[arg(long, value_name = "DIR")]
    out_directory: String,

    /// Directory of the top-level package
    #[arg(long, value_name = "DIR")]
    top_level_directory: String,

    /// Output path
    #[arg(long, value_name = "FILE")]
    out: PathBuf,
  },

  /// Write a Yarn-format lockfile snapshot of the graph
  Lockfile {
    #[command(flatten)]
    graph: GraphArgs,

    /// Output path
    #[arg(long, value_name = "FILE", default_value = "yarn.lock")]
    out: PathBuf,
  },
}

/// Real capabilities: the filesystem, and `nix hash path` as the
/// directory-hashing backend.
struct NixSystem;

impl SystemProbe for NixSystem {
  async fn path_exists(&self, path: &Path) -> bool {
    tokio::fs::try_exists(path).await.unwrap_or(false)
  }
}

impl PathHasher for NixSystem {
  async fn hash_path(&self, path: &Path) -> yarnix_core::error::Result<String> {
    let output = tokio::process::Command::new("nix")
      .args(["hash", "path", "--type", "sha512"])
      .arg(path)
      .output()
      .await
      .map_err(|err| hash_unavailable(path, err.to_string()))?;
    if !output.status.success() {
      return Err(hash_unavailable(
        path,
        String::from_utf8_lossy(&output.stderr).into_owned(),
      ));
    }
    Ok(String::from_utf8_lossy(&output.stdout).trim().to_string())
  }
}

fn load_graph(
  args: &GraphArgs,
) -> Result<(
  yarnix_core::graph::ProjectSnapshot,
  yarnix_core::graph::ResolvedWorkingSet,
)> {
  let json = std::fs::read_to_string(&args.registry)
    .with_context(|| format!("reading registry dump {}", args.registry.display()))?;
  let dump = parse_dump(&json)
    .with_context(|| format!("parsing registry dump {}", args.registry.display()))?;
  let graph = pipeline::build_graph(&dump, &args.top_level)
    .with_context(|| format!("rebuilding package graph for {}", args.top_level))?;
  Ok(graph)
}

fn write_out(path: &Path, contents: &str) -> Result<()> {
  std::fs::write(path, contents).with_context(|| format!("writing {}", path.display()))?;
  info!(path = %path.display(), bytes = contents.len(), "wrote artifact");
  Ok(())
}

#[tokio::main(flavor = "current_thread")]
async fn main() -> Result<()> {
  tracing_subscriber::fmt()
    .with_env_filter(
      tracing_subscriber::EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new("info")),
    )
    .with_writer(std::io::stderr)
    .init();

  let args = Args::parse();

  match args.command {
    Command::Manifest {
      graph,
      system,
      unplugged_root,
      prior_manifest,
      out,
    } => {
      let prior: Option<PriorManifest> = match &prior_manifest {
        Some(path) => {
          let json = std::fs::read_to_string(path)
            .with_context(|| format!("reading prior manifest {}", path.display()))?;
          Some(
            serde_json::from_str(&json)
              .with_context(|| format!("parsing prior manifest {}", path.display()))?,
          )
        }
        None => None,
      };

      let (snapshot, working_set) = load_graph(&graph)?;
      let options = pipeline::PipelineOptions {
        system: &system,
        unplugged_root: &unplugged_root,
        prior_manifest: prior.as_ref(),
      };
      let (_, rendered) =
        pipeline::synthesize_manifest(&snapshot, &working_set, &options, &NixSystem).await;
      write_out(&out, &rendered)?;
    }

    Command::LoaderData {
      graph,
      out_directory,
      top_level_directory,
      out,
    } => {
      let (snapshot, working_set) = load_graph(&graph)?;
      let data = pipeline::synthesize_loader_data(
        &snapshot,
        &working_set,
        &out_directory,
        &top_level_directory,
      )
      .context("generating loader resolution registry")?;
      let json = serde_json::to_string(&data).context("serializing loader registry")?;
      write_out(&out, &json)?;
    }

    Command::Lockfile { graph, out } => {
      let (snapshot, _) = load_graph(&graph)?;
      let rendered = yarnix_core::lockfile::render_lockfile(&snapshot);
      write_out(&out, &rendered)?;
    }
  }

  Ok(())
}
