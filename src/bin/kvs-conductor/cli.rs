//! CLI argument parsing and command dispatch.

use std::path::PathBuf;
use std::sync::Arc;

use anyhow::Context;
use anyhow::Result;
use clap::Args;
use clap::Parser;
use clap::Subcommand;
use kvs_conductor::CleanupScope;
use kvs_conductor::ClusterConductor;
use kvs_conductor::ConductorConfig;
use kvs_conductor::DockerCli;
use kvs_conductor::ImageBuilder;

use crate::output::SpawnOutput;
use crate::output::print_output;
use crate::output::print_success;

/// Container cluster conductor for key-value store fault testing.
#[derive(Parser)]
#[command(name = "kvs-conductor")]
#[command(version)]
#[command(about = "Spawn, partition and sweep containerised key-value store clusters")]
#[command(propagate_version = true)]
#[command(arg_required_else_help = true)]
pub struct Cli {
    #[command(flatten)]
    pub global: GlobalOptions,

    #[command(subcommand)]
    pub command: Commands,
}

/// Global options available to all commands.
#[derive(Args, Clone)]
pub struct GlobalOptions {
    /// TOML configuration file.
    ///
    /// Without it, `./kvs-conductor.toml` is used when present. `KVS_*`
    /// environment variables override file values either way.
    #[arg(long, env = "KVS_CONDUCTOR_CONFIG", global = true)]
    pub config: Option<PathBuf>,

    /// Test group id.
    #[arg(long, global = true)]
    pub group: Option<String>,

    /// Resource name prefix shared by all runs.
    #[arg(long, global = true)]
    pub prefix: Option<String>,

    /// Node image tag.
    #[arg(long, global = true)]
    pub image: Option<String>,

    /// Host port of node 0.
    #[arg(long, global = true)]
    pub port_base: Option<u16>,

    /// Output JSON instead of human-readable format.
    #[arg(long = "json", global = true)]
    pub is_json: bool,

    /// Enable verbose logging.
    #[arg(short = 'v', long = "verbose", global = true)]
    pub is_verbose: bool,

    /// Suppress all logging output.
    #[arg(short = 'q', long = "quiet", global = true)]
    pub is_quiet: bool,
}

/// Top-level commands.
#[derive(Subcommand)]
pub enum Commands {
    /// Remove containers and networks left behind by earlier runs.
    Cleanup {
        /// Sweep every run under the prefix, not just this group.
        ///
        /// Also removes resources of runs that are still live.
        #[arg(long)]
        all: bool,
    },

    /// Build the node image from a source directory.
    Build {
        /// Directory containing the Dockerfile.
        context: PathBuf,
    },

    /// Remove the node image and prune dangling images.
    RemoveImage,

    /// Spawn a cluster and wait for every node to come online.
    Spawn {
        /// Number of nodes.
        #[arg(long, short = 'n')]
        nodes: usize,

        /// Nodes per shard; all nodes form one shard when omitted.
        #[arg(long)]
        shard_size: Option<usize>,

        /// Write node logs here before exiting.
        #[arg(long)]
        logs_dir: Option<PathBuf>,

        /// Destroy the cluster again before exiting.
        #[arg(long)]
        teardown: bool,
    },

    /// Destroy every resource of the group.
    Destroy,
}

impl Cli {
    /// Resolve configuration: file or defaults, then env, then flags.
    fn load_config(&self) -> Result<ConductorConfig> {
        let mut config = match &self.global.config {
            Some(path) => {
                let mut config = ConductorConfig::from_toml_file(path)
                    .with_context(|| format!("failed to load {}", path.display()))?;
                config.apply_env_overrides().context("invalid environment override")?;
                config
            }
            None => ConductorConfig::load_with_layers().context("failed to load configuration")?,
        };

        if let Some(group) = &self.global.group {
            config.group_id = group.clone();
        }
        if let Some(prefix) = &self.global.prefix {
            config.name_prefix = prefix.clone();
        }
        if let Some(image) = &self.global.image {
            config.base_image = image.clone();
        }
        if let Some(port) = self.global.port_base {
            config.external_port_base = port;
        }

        config.validate().context("invalid configuration")?;
        Ok(config)
    }

    pub fn run(self) -> Result<()> {
        let config = self.load_config()?;
        let json = self.global.is_json;

        match self.command {
            Commands::Cleanup { all } => {
                let scope = if all { CleanupScope::AllRuns } else { CleanupScope::Group };
                let mut conductor = ClusterConductor::docker(config)?;
                let report = conductor.cleanup_hanging(scope)?;
                print_output(&report, json);
                report.into_result()?;
                Ok(())
            }
            Commands::Build { context } => {
                let builder = image_builder(&config, context);
                let message = if builder.build_unless_skipped(config.skip_image_build)? {
                    format!("built image {}", builder.tag())
                } else {
                    format!("skipped building image {}", builder.tag())
                };
                print_success(&message, json);
                Ok(())
            }
            Commands::RemoveImage => {
                let builder = image_builder(&config, PathBuf::from("."));
                builder.cleanup()?;
                print_success(&format!("removed image {}", builder.tag()), json);
                Ok(())
            }
            Commands::Spawn {
                nodes,
                shard_size,
                logs_dir,
                teardown,
            } => {
                let mut conductor = ClusterConductor::docker(config)?;
                let spawned = conductor.spawn_cluster(nodes, shard_size);

                let result = spawned.map(|shards| SpawnOutput {
                    shards,
                    topology: conductor.describe_cluster(),
                });

                let dumped = match &logs_dir {
                    Some(dir) => conductor
                        .dump_logs(dir)
                        .map(|_| ())
                        .with_context(|| format!("failed to dump logs to {}", dir.display())),
                    None => Ok(()),
                };

                // never leave a half-started cluster behind
                if teardown || result.is_err() {
                    conductor.destroy_cluster()?.into_result()?;
                }

                let output = result?;
                dumped?;
                print_output(&output, json);
                Ok(())
            }
            Commands::Destroy => {
                let mut conductor = ClusterConductor::docker(config)?;
                let report = conductor.destroy_cluster()?;
                print_output(&report, json);
                report.into_result()?;
                Ok(())
            }
        }
    }
}

fn image_builder(config: &ConductorConfig, context: PathBuf) -> ImageBuilder {
    let platform = Arc::new(DockerCli::new(config.docker_binary.clone()));
    ImageBuilder::new(platform, context, config.base_image.clone())
}
