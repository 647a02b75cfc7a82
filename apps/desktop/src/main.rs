use std::path::{Path, PathBuf};

use anyhow::{Context, Result};
use clap::{Parser, Subcommand};
use client_core::{FilePayload, WorkbenchController};

#[derive(Parser, Debug)]
struct Cli {
    #[arg(long, default_value = "http://127.0.0.1:5000")]
    server_url: String,
    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand, Debug)]
enum Command {
    /// List the registered model templates.
    ListModels,
    /// Register a model template.
    UploadModel { path: PathBuf },
    /// Upload a content file, process it against a model, and save the
    /// produced document.
    Generate {
        #[arg(long)]
        model: String,
        #[arg(long)]
        content: PathBuf,
        #[arg(long)]
        output: Option<PathBuf>,
    },
}

#[tokio::main]
async fn main() -> Result<()> {
    tracing_subscriber::fmt().with_env_filter("info").init();
    let cli = Cli::parse();
    let controller = WorkbenchController::new(cli.server_url);

    match cli.command {
        Command::ListModels => {
            let names = controller.refresh_model_list().await?;
            if names.is_empty() {
                println!("no models registered");
            }
            for name in names {
                println!("{name}");
            }
        }
        Command::UploadModel { path } => {
            let response = controller.upload_model(&[read_payload(&path)?]).await?;
            println!("registered model {}", response.filename);
        }
        Command::Generate {
            model,
            content,
            output,
        } => {
            controller.upload_content(&[read_payload(&content)?]).await?;
            controller.select_model(Some(model)).await;

            let response = controller
                .process()
                .await?
                .context("processing skipped: model and content must both be set")?;
            let bytes = controller.download(&response.download_url).await?;

            let target = output.unwrap_or_else(|| {
                let name = response
                    .download_url
                    .rsplit('/')
                    .next()
                    .unwrap_or("processed.docx");
                PathBuf::from(name)
            });
            std::fs::write(&target, bytes)
                .with_context(|| format!("failed to write {}", target.display()))?;
            println!("saved {}", target.display());
        }
    }

    Ok(())
}

fn read_payload(path: &Path) -> Result<FilePayload> {
    let name = path
        .file_name()
        .and_then(|name| name.to_str())
        .with_context(|| format!("path has no usable file name: {}", path.display()))?
        .to_string();
    let bytes =
        std::fs::read(path).with_context(|| format!("failed to read {}", path.display()))?;
    Ok(FilePayload::new(name, bytes))
}
