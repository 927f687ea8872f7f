// Copyright (c) 2025 Varshith Gudur. Licensed under AGPLv3.
use clap::{Parser, Subcommand};
use std::path::PathBuf;
use treehash_cli::commands::{decode, hash, verify};

#[derive(Parser)]
#[command(name = "treehash")]
#[command(about = "Verified streaming tree hashes, computed in an isolated worker", long_about = None)]
struct Cli {
    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Hash a file, or stdin when no file is given.
    Hash {
        input: Option<PathBuf>,

        /// Stream the file through a session instead of letting the worker map it
        #[arg(long)]
        stream: bool,

        /// Bytes per write when streaming
        #[arg(long)]
        chunk_size: Option<usize>,

        /// Write the outboard proof to this file
        #[arg(long, short)]
        proof_out: Option<PathBuf>,

        /// Worker executable (defaults to this binary in worker mode)
        #[arg(long)]
        worker: Option<PathBuf>,

        /// Argument for the worker executable; repeat for several
        #[arg(long = "worker-arg", requires = "worker", allow_hyphen_values = true)]
        worker_args: Vec<String>,

        /// Print the result as JSON
        #[arg(long)]
        json: bool,

        /// Print Prometheus metrics after hashing
        #[arg(long)]
        metrics: bool,
    },
    /// Print the hex root behind a content identifier
    Decode {
        identifier: String,
    },
    /// Verify a file, or a byte range of it, against a root and its proof
    Verify {
        content_path: PathBuf,

        /// Outboard proof written by `hash --proof-out`
        #[arg(long, short)]
        proof: PathBuf,

        /// Content identifier or hex root
        #[arg(long, short)]
        root: String,

        #[arg(long, default_value_t = 0)]
        offset: u64,

        #[arg(long)]
        len: Option<u64>,
    },
    /// Serve as the hashing worker on stdin/stdout. Started by `hash`, not by hand.
    #[command(hide = true)]
    Worker,
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();

    match cli.command {
        Commands::Hash {
            input,
            stream,
            chunk_size,
            proof_out,
            worker,
            worker_args,
            json,
            metrics,
        } => {
            treehash_node::telemetry::init_telemetry();
            let options = hash::HashOptions { stream, chunk_size, proof_out, worker, worker_args, json };
            hash::run(input.as_deref(), &options).await?;
            if metrics {
                println!("{}", treehash_node::telemetry::get_metrics());
            }
            Ok(())
        }
        Commands::Decode { identifier } => decode::run(&identifier).map(|_| ()),
        Commands::Verify {
            content_path,
            proof,
            root,
            offset,
            len,
        } => verify::run(&content_path, &proof, &root, offset, len).map(|_| ()),
        Commands::Worker => {
            treehash_node::worker::init_logging();
            let code = treehash_node::worker::run_stdio().await;
            // stdin may still be held by a blocking reader; do not wait for it.
            std::process::exit(code);
        }
    }
}
