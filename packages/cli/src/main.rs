use std::path::PathBuf;

use clap::{Parser, Subcommand};
use regrid::UploadMode;
use regrid_cli::UploadRequest;
use tracing_subscriber::EnvFilter;

/// regrid - store files as chunked documents
#[derive(Parser, Debug)]
#[command(name = "regrid")]
#[command(author, version, about, long_about = None)]
struct Cli {
    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand, Debug)]
enum Command {
    /// Upload a local file into a fresh in-memory bucket and print its report
    Upload {
        /// File to read
        local_file: PathBuf,

        /// Path the file is stored under, e.g. /files/big.gz
        virtual_path: String,

        /// Database holding the bucket
        #[arg(long, default_value = "pyregrid")]
        database: String,

        /// Bucket name (overrides the config file)
        #[arg(long)]
        bucket: Option<String>,

        /// Chunk size in bytes (overrides the config file)
        #[arg(long)]
        chunk_size: Option<usize>,

        /// Maximum chunk writes in flight (overrides the config file)
        #[arg(long)]
        concurrency: Option<usize>,

        /// Write one chunk at a time
        #[arg(long)]
        sequential: bool,

        /// JSON bucket config
        #[arg(long)]
        config: Option<PathBuf>,

        /// Also print every stored document
        #[arg(long)]
        dump: bool,
    },
}

#[tokio::main]
async fn main() {
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::from_default_env())
        .with_writer(std::io::stderr)
        .init();

    let cli = Cli::parse();
    let request = match cli.command {
        Command::Upload {
            local_file,
            virtual_path,
            database,
            bucket,
            chunk_size,
            concurrency,
            sequential,
            config,
            dump,
        } => UploadRequest {
            local_file,
            virtual_path,
            database,
            config,
            bucket,
            chunk_size,
            concurrency,
            mode: if sequential {
                UploadMode::Sequential
            } else {
                UploadMode::Concurrent
            },
            dump,
        },
    };

    let output = match regrid_cli::upload(&request).await {
        Ok(output) => output,
        Err(e) => {
            eprintln!("Error: {}", e);
            std::process::exit(1);
        }
    };

    match serde_json::to_string_pretty(&output) {
        Ok(json) => println!("{}", json),
        Err(e) => {
            eprintln!("Error: {}", e);
            std::process::exit(1);
        }
    }
}
