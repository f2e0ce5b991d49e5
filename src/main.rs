//! Command-line host for the Lustre language client
//!
//! Activates the client the way an editor would, opens the given files,
//! prints the diagnostics the server reports and deactivates again.

use anyhow::{anyhow, Context, Result};
use clap::Parser;
use lustre_client::extension::{self, ExtensionContext, ExtensionMode, Settings};
use lustre_client::lsp::{path_to_uri, Diagnostic, LanguageClient, Trace};
use std::path::{Path, PathBuf};
use std::time::{Duration, Instant};
use std::{env, fs, thread};
use tracing::warn;

#[derive(Parser)]
#[command(name = "lustre-client")]
#[command(about = "Run the Lustre language server on files and print its diagnostics", long_about = None)]
struct Cli {
    /// Extension root containing the `server/` directory (default: next to this binary)
    #[arg(short = 'e', long)]
    extension_path: Option<PathBuf>,

    /// Platform identifier used to pick the server binary (default: this host)
    #[arg(long)]
    platform: Option<String>,

    /// Launch the debug variant of the server
    #[arg(long)]
    debug: bool,

    /// Protocol trace: off, messages or verbose (overrides the settings file)
    #[arg(long)]
    trace: Option<Trace>,

    /// How long to wait for pushed diagnostics, in milliseconds
    #[arg(long, default_value_t = 2000)]
    wait_ms: u64,

    /// Lustre files to open
    files: Vec<PathBuf>,
}

fn main() -> Result<()> {
    let cli = Cli::parse();
    lustre_client::logging::init("warn")?;

    let mut settings = Settings::load()?;
    if let Some(trace) = cli.trace {
        settings.trace = trace;
    }

    let extension_path = match cli.extension_path {
        Some(path) => path,
        None => default_extension_path()?,
    };

    let mode = if cli.debug {
        ExtensionMode::Development
    } else {
        ExtensionMode::Production
    };

    let mut context = ExtensionContext::new(extension_path)
        .with_settings(settings)
        .with_mode(mode)
        .with_workspace_folder(env::current_dir()?);
    if let Some(platform) = &cli.platform {
        context = context.with_platform(platform);
    }

    let started = extension::activate(&mut context)
        .wait()
        .ok_or_else(|| anyhow!("language client start was abandoned"))
        .and_then(|result| result.map_err(anyhow::Error::from));

    let outcome = match started {
        Ok(()) => match context.client() {
            Some(client) => report(client, &cli.files, Duration::from_millis(cli.wait_ms)),
            None => Err(anyhow!("no active language client")),
        },
        Err(e) => Err(e.context("starting the Lustre language server")),
    };

    if let Some(stopping) = extension::deactivate(&mut context) {
        match stopping.wait() {
            Some(Ok(())) => {}
            Some(Err(e)) => warn!("Stopping the language server failed: {}", e),
            None => warn!("Language server shutdown was abandoned"),
        }
    }

    for channel in context.output_channels() {
        for line in channel.lines() {
            eprintln!("[{}] {}", channel.name(), line);
        }
    }

    outcome
}

/// The directory holding this binary, so `server/` can sit next to it
fn default_extension_path() -> Result<PathBuf> {
    let exe = env::current_exe().context("locating the current executable")?;
    exe.parent()
        .map(Path::to_path_buf)
        .ok_or_else(|| anyhow!("executable {} has no parent directory", exe.display()))
}

/// Open every file and print what the server reports for it
fn report(client: &LanguageClient, files: &[PathBuf], wait: Duration) -> Result<()> {
    let mut opened = Vec::new();
    for file in files {
        let text =
            fs::read_to_string(file).with_context(|| format!("reading {}", file.display()))?;
        let path = file.canonicalize().unwrap_or_else(|_| file.clone());
        if !client.did_open_path(&path, &text)? {
            warn!("Skipping {}: not a Lustre file", file.display());
            continue;
        }
        opened.push((file, path_to_uri(&path)));
    }

    let capabilities = client.capabilities();
    let features = capabilities.features();
    if features.is_empty() {
        eprintln!("{}: no optional features announced", client.name());
    } else {
        eprintln!("{}: {}", client.name(), features.join(", "));
    }

    let pull = capabilities.diagnostic_provider;
    for (file, uri) in opened {
        let diagnostics = if pull {
            client
                .pull_diagnostics(&uri)
                .wait()
                .ok_or_else(|| anyhow!("connection closed while pulling diagnostics"))??
        } else {
            wait_for_pushed(client, &uri, wait)
        };
        print_diagnostics(file, &diagnostics);
    }
    Ok(())
}

/// Poll for `textDocument/publishDiagnostics` until the deadline
fn wait_for_pushed(client: &LanguageClient, uri: &str, wait: Duration) -> Vec<Diagnostic> {
    let deadline = Instant::now() + wait;
    loop {
        if client.all_diagnostics().contains_key(uri) || Instant::now() >= deadline {
            return client.diagnostics(uri);
        }
        thread::sleep(Duration::from_millis(25));
    }
}

fn print_diagnostics(file: &Path, diagnostics: &[Diagnostic]) {
    if diagnostics.is_empty() {
        println!("{}: no diagnostics", file.display());
        return;
    }
    for d in diagnostics {
        let severity = d.severity.map_or("diagnostic", |s| s.label());
        println!(
            "{}:{}:{}: {}: {}",
            file.display(),
            d.range.start.line + 1,
            d.range.start.character + 1,
            severity,
            d.message
        );
    }
}
