// SPDX-License-Identifier: AGPL-3.0-or-later
// Copyright (C) 2025 Blackman Artificial Intelligence Technologies Inc.

//! nokode - entry point

use std::net::SocketAddr;
use std::sync::Arc;

use anyhow::Context;
use clap::Parser;

use nokode::cli::{Cli, Commands, Dialect, ServeArgs, ToolsArgs};
use nokode::config::Settings;
use nokode::llm::providers::openai::dialect_tools;
use nokode::server::{self, AppState};
use nokode::tools::{Database, MemoryStore, ToolRegistry};

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();

    // Before tracing so `DEBUG` and `RUST_LOG` from .env take effect
    let dotenv = dotenvy::dotenv();
    init_tracing(cli.verbose);
    match dotenv {
        Ok(path) => tracing::debug!(path = %path.display(), "loaded .env"),
        Err(e) if e.not_found() => {}
        Err(e) => tracing::warn!(error = %e, "failed to load .env"),
    }

    let settings = Settings::load(cli.config.as_deref()).context("failed to load settings")?;

    match cli.command {
        None => run_serve(settings, ServeArgs::default()).await,
        Some(Commands::Serve(args)) => run_serve(settings, args).await,
        Some(Commands::Tools(args)) => print_tools(&settings, args),
    }
}

fn init_tracing(verbose: u8) {
    let mut env_filter = tracing_subscriber::EnvFilter::from_default_env()
        .add_directive(tracing::Level::WARN.into());

    let debug_env = std::env::var("DEBUG")
        .map(|v| v.eq_ignore_ascii_case("true") || v == "1")
        .unwrap_or(false);

    let directives: &[&str] = match (verbose, debug_env) {
        (0, false) => &["nokode=info"],
        (0, true) | (1, _) => &["nokode=debug"],
        _ => &["nokode=trace", "tower_http=debug"],
    };
    for directive in directives {
        if let Ok(parsed) = directive.parse() {
            env_filter = env_filter.add_directive(parsed);
        }
    }

    tracing_subscriber::fmt().with_env_filter(env_filter).init();
}

async fn run_serve(mut settings: Settings, args: ServeArgs) -> anyhow::Result<()> {
    if let Some(host) = args.host {
        settings.server.host = host;
    }
    if let Some(port) = args.port {
        settings.server.port = port;
    }
    if let Some(provider) = args.provider {
        settings.provider = provider;
    }
    settings.validate().context("invalid settings")?;

    let addr: SocketAddr = format!("{}:{}", settings.server.host, settings.server.port)
        .parse()
        .with_context(|| {
            format!(
                "invalid listen address {}:{}",
                settings.server.host, settings.server.port
            )
        })?;

    let state = AppState::from_settings(&settings).context("failed to initialize server")?;
    tracing::info!(
        provider = %settings.provider,
        prompt = %settings.paths.prompt.display(),
        memory = %settings.paths.memory.display(),
        database = %settings.paths.database.display(),
        "starting nokode"
    );

    server::serve(Arc::new(state), addr).await?;
    Ok(())
}

fn print_tools(settings: &Settings, args: ToolsArgs) -> anyhow::Result<()> {
    let registry = ToolRegistry::with_builtins(
        Arc::new(Database::open_in_memory()?),
        Arc::new(MemoryStore::new(settings.paths.memory.clone())),
    );
    let definitions = registry.definitions();

    let rendered = match args.dialect {
        Dialect::Anthropic => serde_json::to_string_pretty(&definitions)?,
        Dialect::Openai => serde_json::to_string_pretty(&dialect_tools(&definitions))?,
    };
    println!("{}", rendered);
    Ok(())
}
