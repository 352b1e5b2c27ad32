use std::collections::HashMap;
use std::path::PathBuf;

use anyhow::Result;
use clap::Parser;
use tracing::info;
use upload_client::ClientConfig;
use uploader::logging::{init_logging, LoggingConfig};
use uploader::{UploadCallbacks, UploadConfig, UploadOutcome, Uploader};

const USER_AGENT: &str = concat!("upload", "/", env!("CARGO_PKG_VERSION"));

/// Uploads one file and prints its remote identifier.
#[derive(Parser)]
struct UploadCommand {
    /// Public key of the project receiving the file.
    public_key: String,

    /// The file to upload.
    path: PathBuf,

    /// Content type sent with the file.
    #[clap(long, default_value = "application/octet-stream")]
    mime_type: String,

    /// Metadata entry as KEY=VALUE. May be repeated.
    #[clap(long = "metadata", value_parser = parse_key_value)]
    metadata: Vec<(String, String)>,

    /// Base URL of the upload service.
    #[clap(long)]
    endpoint: Option<String>, // if not specified we use env:UPLOADER_UPLOAD_ENDPOINT

    /// Maximum number of parts transferred at once.
    #[clap(long)]
    concurrency: Option<usize>,
}

fn parse_key_value(s: &str) -> std::result::Result<(String, String), String> {
    let (key, value) = s.split_once('=').ok_or_else(|| format!("expected KEY=VALUE, got {s:?}"))?;
    if key.is_empty() {
        return Err(format!("metadata key is empty in {s:?}"));
    }
    Ok((key.to_owned(), value.to_owned()))
}

impl UploadCommand {
    async fn run(self) -> Result<()> {
        let mut client_config = ClientConfig {
            user_agent: USER_AGENT.to_owned(),
            ..Default::default()
        };
        if let Some(endpoint) = self.endpoint {
            client_config = client_config.with_endpoint(endpoint);
        }

        let mut config = UploadConfig::default();
        if let Some(n) = self.concurrency {
            config.max_concurrent_parts = n;
        }

        let uploader = Uploader::remote(client_config, config)?;

        let callbacks = UploadCallbacks::new()
            .on_progress(|current, total| info!(current, total, "progress"))
            .on_remote_id(|remote_id| info!(remote_id, "remote id assigned"))
            .on_outcome(|outcome| {
                if let UploadOutcome::Failed { kind, description } = outcome {
                    eprintln!("upload failed ({kind}): {description}");
                }
            });

        let metadata: HashMap<String, String> = self.metadata.into_iter().collect();
        let handle = uploader.start_upload(self.public_key, self.path, self.mime_type, metadata, callbacks)?;

        let remote_id = handle.join().await?;
        println!("{remote_id}");
        Ok(())
    }
}

#[tokio::main]
async fn main() -> Result<()> {
    init_logging(LoggingConfig::new(USER_AGENT));

    let cli = UploadCommand::parse();
    cli.run().await
}
