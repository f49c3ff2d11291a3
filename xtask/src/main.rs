// Licensed under the Apache-2.0 license

use std::path::{Path, PathBuf};

use anyhow::Result;
use clap::{Parser, Subcommand};
use fw_bundler::args::MergeArgs;
use log::{info, LevelFilter};
use simple_logger::SimpleLogger;
use unified_builder::BuildEnv;

mod partitions;

#[derive(Parser)]
#[command(version, about, long_about = None)]
struct Xtask {
    /// Log level for diagnostic output
    #[arg(long, global = true, default_value_t = LevelFilter::Info)]
    log_level: LevelFilter,

    #[command(subcommand)]
    xtask: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Run the post-build actions for a finished firmware build
    PostBuild {
        /// Path to the TOML file describing the build environment
        #[arg(long, value_name = "BUILD_ENV")]
        env: PathBuf,

        /// Override the BUILD_DIR variable
        #[arg(long, env = "UNIFIED_BUILD_DIR")]
        build_dir: Option<PathBuf>,

        /// Override the PROJECT_DIR variable
        #[arg(long, env = "UNIFIED_PROJECT_DIR")]
        project_dir: Option<PathBuf>,

        /// Override the PROGNAME variable
        #[arg(long, env = "UNIFIED_PROGNAME")]
        progname: Option<String>,
    },
    /// Merge binaries into a single image at the given addresses
    MergeBin {
        #[command(flatten)]
        args: MergeArgs,
    },
    /// Parse a partition table CSV and print its partitions
    Partitions {
        /// Path to the partition table CSV
        #[arg(value_name = "CSV")]
        csv: PathBuf,
    },
}

fn post_build(
    env_file: &Path,
    build_dir: Option<&Path>,
    project_dir: Option<&Path>,
    progname: Option<&str>,
) -> Result<()> {
    let mut env = BuildEnv::from_file(env_file)?;
    if let Some(dir) = build_dir {
        env.set_var("BUILD_DIR", dir.to_string_lossy());
    }
    if let Some(dir) = project_dir {
        env.set_var("PROJECT_DIR", dir.to_string_lossy());
    }
    if let Some(name) = progname {
        env.set_var("PROGNAME", name);
    }

    if let Some(output) = unified_builder::post_build(&env)? {
        info!("Unified binary: {}", output.display());
    }
    Ok(())
}

fn main() {
    let cli = Xtask::parse();
    let _ = SimpleLogger::new()
        .with_level(cli.log_level)
        .without_timestamps()
        .init();

    let result = match &cli.xtask {
        Commands::PostBuild {
            env,
            build_dir,
            project_dir,
            progname,
        } => post_build(
            env,
            build_dir.as_deref(),
            project_dir.as_deref(),
            progname.as_deref(),
        ),
        Commands::MergeBin { args } => fw_bundler::execute(args)
            .map(|summary| {
                info!(
                    "Wrote {} ({:#x} bytes)",
                    summary.output.display(),
                    summary.image_size
                )
            })
            .map_err(anyhow::Error::from),
        Commands::Partitions { csv } => partitions::show(csv),
    };
    result.unwrap_or_else(|e| {
        eprintln!("Error: {:?}", e);
        std::process::exit(1);
    });
}
