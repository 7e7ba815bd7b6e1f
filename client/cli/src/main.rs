//! snapd-request - Issue requests to snapd over its Unix socket
//!
//! A thin front end over `snapd-client-core`, handy for poking at the snapd
//! REST API by hand.
//!
//! # Usage
//!
//! ```bash
//! # Simple request; prints the envelope's `result`
//! snapd-request /v2/system-info
//!
//! # Query string and alternate socket
//! snapd-request -s /tmp/snapd.socket /v2/find -q 'q=hello'
//!
//! # Start an operation and follow it until it is ready (Ctrl-C aborts it)
//! snapd-request -X post /v2/snaps/hello -d '{"action":"install"}' --track
//!
//! # Sideload a snap
//! snapd-request -X post /v2/snaps --file ./hello_1.0_amd64.snap --track
//!
//! # Add assertions
//! snapd-request -X post /v2/assertions --assertion ./model.assert
//!
//! # Verbose logging
//! RUST_LOG=debug snapd-request /v2/snaps
//! ```

use std::path::{Path, PathBuf};

use anyhow::{bail, Context, Result};
use clap::{Parser, ValueEnum};
use serde_json::Value;
use tracing::{debug, info, warn};

use snapd_client_core::assertions::{self, ASSERTION_CONTENT_TYPE};
use snapd_client_core::transport::MultipartForm;
use snapd_client_core::{
    load_config_from_path, Body, ConfigOverrides, Method, OperationSnapshot, RequestDescriptor,
    Response, SnapdClient,
};

/// HTTP method accepted on the command line
#[derive(Clone, Copy, Debug, ValueEnum)]
enum CliMethod {
    Get,
    Post,
    Put,
    Delete,
}

impl From<CliMethod> for Method {
    fn from(method: CliMethod) -> Self {
        match method {
            CliMethod::Get => Method::Get,
            CliMethod::Post => Method::Post,
            CliMethod::Put => Method::Put,
            CliMethod::Delete => Method::Delete,
        }
    }
}

/// snapd-request - Send one request to snapd and print the result
#[derive(Parser, Debug)]
#[command(name = "snapd-request")]
#[command(author, version, about, long_about = None)]
struct Args {
    /// API path, e.g. /v2/snaps
    path: String,

    /// HTTP method
    #[arg(short = 'X', long, value_enum, default_value = "get")]
    method: CliMethod,

    /// Query string without the leading '?'
    #[arg(short = 'q', long)]
    query: Option<String>,

    /// JSON request body
    #[arg(short = 'd', long, conflicts_with_all = ["file", "assertion"])]
    data: Option<String>,

    /// Snap file to upload as multipart/form-data
    #[arg(long, value_name = "FILE", conflicts_with = "assertion")]
    file: Option<PathBuf>,

    /// Assertion file to send; may be repeated
    #[arg(long, value_name = "FILE")]
    assertion: Vec<PathBuf>,

    /// Treat the response as an operation and poll it until ready
    #[arg(short = 't', long)]
    track: bool,

    /// Print the whole response body instead of the envelope's result
    #[arg(long)]
    raw: bool,

    /// Unix socket path of snapd
    #[arg(short = 's', long, value_name = "PATH")]
    socket_path: Option<PathBuf>,

    /// Configuration file path
    #[arg(short = 'c', long, env = "SNAPD_CLIENT_CONFIG", value_name = "FILE")]
    config: Option<PathBuf>,

    /// Let snapd prompt for authorization
    #[arg(long)]
    allow_interaction: bool,

    /// User-Agent header value
    #[arg(long)]
    user_agent: Option<String>,

    /// Interval between operation polls (milliseconds)
    #[arg(long, value_name = "MS")]
    poll_interval_ms: Option<u64>,

    /// Log level (trace, debug, info, warn, error)
    #[arg(short = 'l', long, env = "SNAPD_CLIENT_LOG_LEVEL", default_value = "warn")]
    log_level: String,
}

impl Args {
    fn overrides(&self) -> ConfigOverrides {
        let mut overrides = ConfigOverrides::new();
        if let Some(ref path) = self.socket_path {
            overrides = overrides.with_socket_path(path.clone());
        }
        if let Some(ref agent) = self.user_agent {
            overrides = overrides.with_user_agent(agent.clone());
        }
        if self.allow_interaction {
            overrides = overrides.with_allow_interaction(true);
        }
        if let Some(ms) = self.poll_interval_ms {
            overrides = overrides.with_poll_interval_ms(ms);
        }
        overrides
    }

    fn request(&self) -> Result<RequestDescriptor> {
        let mut request = RequestDescriptor::new(self.method.into(), &self.path);
        if let Some(ref query) = self.query {
            request = request.with_query(query);
        }

        if let Some(ref data) = self.data {
            let value: Value = serde_json::from_str(data).context("--data is not valid JSON")?;
            request = request.with_json(value);
        } else if let Some(ref file) = self.file {
            request = request.with_body(Body::Multipart(snap_upload(file)?));
        } else if !self.assertion.is_empty() {
            let mut list = Vec::new();
            for path in &self.assertion {
                let text = std::fs::read_to_string(path)
                    .with_context(|| format!("Failed to read assertion file: {path:?}"))?;
                list.push(text.trim_end().to_string());
            }
            request = request.with_body(Body::Assertions(list));
        }

        Ok(request)
    }
}

/// Form uploading a snap file the way `snap install <file>` does
fn snap_upload(path: &Path) -> Result<MultipartForm> {
    let data =
        std::fs::read(path).with_context(|| format!("Failed to read snap file: {path:?}"))?;
    let filename = path
        .file_name()
        .map_or_else(|| "snap".to_string(), |n| n.to_string_lossy().into_owned());

    Ok(MultipartForm::new()
        .text("action", "install")
        .file("snap", filename, "application/octet-stream", data))
}

/// Initialize logging with the specified level
fn init_logging(level: &str) {
    let filter = tracing_subscriber::EnvFilter::try_from_default_env().unwrap_or_else(|_| {
        tracing_subscriber::EnvFilter::new(format!(
            "snapd_request={level},snapd_client_core={level}"
        ))
    });

    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_target(true)
        .with_writer(std::io::stderr)
        .init();
}

/// Print a simple response to stdout
fn print_response(response: Response, raw: bool) -> Result<()> {
    if response.content_type() == Some(ASSERTION_CONTENT_TYPE) {
        for assertion in assertions::split(&response.body)? {
            println!("{assertion}\n");
        }
        return Ok(());
    }

    if raw {
        println!("{}", String::from_utf8_lossy(&response.body));
        return Ok(());
    }

    let result = response.into_result()?;
    println!("{}", serde_json::to_string_pretty(&result)?);
    Ok(())
}

/// One progress line for a snapshot
fn describe(snapshot: &OperationSnapshot) -> String {
    let status = snapshot.status.as_deref().unwrap_or("?");
    let summary = snapshot.summary.as_deref().unwrap_or("");
    let current = snapshot
        .tasks
        .iter()
        .find(|t| t.status.as_deref() == Some("Doing"));

    match current {
        Some(task) if task.total > 0 => format!(
            "[{status}] {summary}: {} ({}/{})",
            task.summary.as_deref().unwrap_or(""),
            task.done,
            task.total
        ),
        Some(task) => format!("[{status}] {summary}: {}", task.summary.as_deref().unwrap_or("")),
        None => format!("[{status}] {summary}"),
    }
}

/// Follow a tracked request to completion, aborting it on Ctrl-C
async fn follow(client: &SnapdClient, request: RequestDescriptor) -> Result<()> {
    let mut tracked = client.submit_tracked(request).await?;
    let mut cancelled = false;

    loop {
        tokio::select! {
            progress = tracked.next_progress() => match progress {
                Some(snapshot) => eprintln!("{}", describe(&snapshot)),
                None => break,
            },
            signal = tokio::signal::ctrl_c(), if !cancelled => {
                if let Err(e) = signal {
                    warn!(error = %e, "Failed to listen for Ctrl-C");
                }
                info!(request = %tracked.id(), "Aborting operation");
                eprintln!("Aborting...");
                tracked.handle().cancel().await;
                cancelled = true;
            }
        }
    }

    let result = tracked.wait().await?;
    debug!(operation = %result.id, "Operation ready");
    eprintln!("{}", describe(&result.snapshot));
    if let Some(data) = result.data {
        println!("{}", serde_json::to_string_pretty(&data)?);
    }
    Ok(())
}

#[tokio::main]
async fn main() -> Result<()> {
    let args = Args::parse();
    init_logging(&args.log_level);

    let mut config = load_config_from_path(args.config.clone())?;
    args.overrides().apply(&mut config)?;
    info!(
        socket = ?config.transport.socket_path,
        source = %config.source(),
        "Configuration loaded"
    );

    if !args.path.starts_with('/') {
        bail!("path must start with '/': {}", args.path);
    }
    let request = args.request()?;
    let client = SnapdClient::new(&config);

    let outcome = if args.track {
        follow(&client, request).await
    } else {
        match client.send(request).await {
            Ok(response) => print_response(response, args.raw),
            Err(e) => Err(e.into()),
        }
    };

    client.shutdown().await;
    outcome
}
