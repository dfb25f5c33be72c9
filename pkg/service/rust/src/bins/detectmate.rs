// Unless explicitly stated otherwise all files in this repository are licensed
// under the Apache License Version 2.0.
// This product includes software developed at Datadog (https://www.datadoghq.com/).
// Copyright 2026-present Datadog, Inc.

use std::path::PathBuf;
use std::process::ExitCode;
use std::thread;
use std::time::Duration;

use anyhow::{Context, Result};
use clap::{Parser, Subcommand};
use detectmate_service::config_store::ConfigStore;
use detectmate_service::protocol::{ReconfigureRequest, Reply, Request};
use detectmate_service::{ControlClient, ServiceBuilder, Settings};
use log::{error, info};
use nix::sys::signal::{SigSet, Signal};

/// Run a detection component as a service, or talk to a running one.
#[derive(Parser, Debug)]
#[command(name = "detectmate", version)]
struct Args {
    /// Settings file (YAML). Missing means defaults plus DETECTMATE_* overrides.
    #[arg(long, global = true)]
    settings: Option<PathBuf>,

    /// Reply timeout for control commands, in milliseconds
    #[arg(long, global = true, default_value = "2000")]
    timeout: u64,

    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand, Debug)]
enum Command {
    /// Run the service in the foreground until stopped
    Start,
    /// Print the service status
    Status,
    Ping,
    Pause,
    Resume,
    /// Ask the service to shut down
    Stop,
    /// Replace the component config
    Reconfigure {
        /// Config file, YAML or JSON by extension
        #[arg(long)]
        config: PathBuf,
        /// Also write the new config to the service's config file
        #[arg(long)]
        persist: bool,
    },
}

fn main() -> ExitCode {
    let args = Args::parse();
    match run(args) {
        Ok(code) => code,
        Err(e) => {
            eprintln!("detectmate: {e:#}");
            ExitCode::FAILURE
        }
    }
}

fn run(args: Args) -> Result<ExitCode> {
    let settings = Settings::load(args.settings.as_deref())?;
    let request = match args.command {
        Command::Start => return serve(settings),
        Command::Status => Request::Status,
        Command::Ping => Request::Ping,
        Command::Pause => Request::Pause,
        Command::Resume => Request::Resume,
        Command::Stop => Request::Stop,
        Command::Reconfigure { config, persist } => {
            let config = ConfigStore::new(&config)
                .load()?
                .with_context(|| format!("{} does not exist", config.display()))?;
            Request::Reconfigure(ReconfigureRequest { config, persist })
        }
    };

    let client = ControlClient::connect(
        &settings.manager_addr,
        Duration::from_millis(args.timeout),
    )
    .with_context(|| format!("cannot reach service at {}", settings.manager_addr))?;
    let reply = client.request(&request)?;
    print_reply(&reply)?;
    Ok(if reply.ok {
        ExitCode::SUCCESS
    } else {
        ExitCode::FAILURE
    })
}

fn print_reply(reply: &Reply) -> Result<()> {
    println!("{}", serde_json::to_string_pretty(reply)?);
    Ok(())
}

fn serve(settings: Settings) -> Result<ExitCode> {
    detectmate_log::init(&settings.log_config()).context("failed to initialize logging")?;

    // Block before any thread exists so every thread inherits the mask and
    // only the waiter below sees the signals.
    let mut signals = SigSet::empty();
    signals.add(Signal::SIGINT);
    signals.add(Signal::SIGTERM);
    signals
        .thread_block()
        .context("failed to block termination signals")?;

    let service = ServiceBuilder::new(settings).start()?;
    let handle = service.handle();
    thread::Builder::new()
        .name("signals".to_string())
        .spawn(move || match signals.wait() {
            Ok(signal) => {
                info!("received {}, shutting down", signal.as_str());
                handle.request_stop();
            }
            Err(e) => error!("failed to wait for signals: {e}"),
        })
        .context("failed to spawn signal thread")?;

    service.wait().inspect_err(|e| error!("{e}"))?;
    Ok(ExitCode::SUCCESS)
}
