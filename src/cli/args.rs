// SPDX-License-Identifier: AGPL-3.0-or-later
// Copyright (C) 2025 Blackman Artificial Intelligence Technologies Inc.

//! CLI argument definitions using Clap

use clap::{Parser, Subcommand, ValueEnum};
use std::path::PathBuf;

use crate::config::ProviderKind;

/// nokode - an HTTP server whose application logic is a language model
#[derive(Parser, Debug)]
#[command(name = "nokode")]
#[command(version, about = "HTTP server that lets a language model answer every request")]
#[command(propagate_version = true)]
pub struct Cli {
    /// Config file path (YAML, TOML or JSON)
    #[arg(short = 'f', long, global = true)]
    pub config: Option<PathBuf>,

    /// Verbosity level (-v, -vv)
    #[arg(short, long, action = clap::ArgAction::Count, global = true)]
    pub verbose: u8,

    #[command(subcommand)]
    pub command: Option<Commands>,
}

/// Available subcommands
#[derive(Subcommand, Debug)]
pub enum Commands {
    /// Run the HTTP server (default when no command given)
    Serve(ServeArgs),

    /// Print the tool definitions as a vendor would receive them
    Tools(ToolsArgs),
}

/// Arguments for the serve subcommand
#[derive(clap::Args, Debug, Default)]
pub struct ServeArgs {
    /// Address to bind
    #[arg(long)]
    pub host: Option<String>,

    /// Port to listen on
    #[arg(short, long)]
    pub port: Option<u16>,

    /// LLM provider (anthropic, openai, qwen, baidu, spark)
    #[arg(long)]
    pub provider: Option<ProviderKind>,
}

/// Arguments for the tools subcommand
#[derive(clap::Args, Debug)]
pub struct ToolsArgs {
    /// Wire format to print
    #[arg(long, value_enum, default_value = "anthropic")]
    pub dialect: Dialect,
}

/// Tool-definition wire formats
#[derive(ValueEnum, Clone, Copy, Debug, PartialEq, Eq)]
pub enum Dialect {
    /// `{name, description, input_schema}`
    Anthropic,
    /// `{type: "function", function: {name, description, parameters}}`
    Openai,
}
