use std::path::PathBuf;

use anyhow::{Context, Result};
use clap::{Parser, Subcommand};
use storage::Storage;

#[derive(Parser, Debug)]
struct Cli {
    #[arg(long, default_value = "sqlite://./data/documents.db")]
    database_url: String,
    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand, Debug)]
enum Command {
    /// Register a model template directly in the document store.
    ImportModel { path: PathBuf },
    /// List the registered model templates.
    ListModels,
    /// Write a produced artifact from the store to disk.
    ExportOutput { filename: String, target: PathBuf },
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();
    let storage = Storage::new(&cli.database_url).await?;

    match cli.command {
        Command::ImportModel { path } => {
            let filename = path
                .file_name()
                .and_then(|name| name.to_str())
                .with_context(|| format!("path has no usable file name: {}", path.display()))?
                .to_string();
            let bytes = std::fs::read(&path)
                .with_context(|| format!("failed to read {}", path.display()))?;
            storage.upsert_model(&filename, &bytes).await?;
            println!("imported model {filename}");
        }
        Command::ListModels => {
            for name in storage.list_model_names().await? {
                println!("{name}");
            }
        }
        Command::ExportOutput { filename, target } => {
            let output = storage
                .load_output(&filename)
                .await?
                .with_context(|| format!("no artifact named {filename}"))?;
            std::fs::write(&target, output.bytes)
                .with_context(|| format!("failed to write {}", target.display()))?;
            println!("exported {} to {}", filename, target.display());
        }
    }

    Ok(())
}
