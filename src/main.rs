use anyhow::Result;
use clap::Parser;

use bucketjoin::logging::init_logger;

mod commands;

use commands::{run_bucket, run_check, run_inspect, run_join, Cli, Commands};

fn main() -> Result<()> {
    let cli = Cli::parse();
    init_logger(cli.verbose);

    match &cli.command {
        Commands::Bucket(args) => run_bucket(args),
        Commands::Inspect { dir } => run_inspect(dir),
        Commands::Check {
            dirs,
            by_secondary,
            parallelism,
        } => run_check(dirs, *by_secondary, *parallelism),
        Commands::Join(args) => run_join(args),
    }
}
