// SPDX-License-Identifier: AGPL-3.0-or-later
// Copyright (C) 2025 Blackman Artificial Intelligence Technologies Inc.

use clap::Parser;
use nokode::cli::{Cli, Commands, Dialect};
use nokode::config::ProviderKind;

#[test]
fn test_parse_no_command_means_serve() {
    let cli = Cli::try_parse_from(["nokode"]).expect("Valid command parsing");
    assert!(cli.command.is_none());
}

#[test]
fn test_parse_serve_with_port() {
    let cli = Cli::try_parse_from(["nokode", "serve", "--port", "8081"]).expect("Valid command parsing");
    if let Some(Commands::Serve(args)) = cli.command {
        assert_eq!(args.port, Some(8081));
        assert!(args.host.is_none());
        assert!(args.provider.is_none());
    } else {
        panic!("Expected Serve command");
    }
}

#[test]
fn test_parse_every_provider() {
    for (name, kind) in [
        ("anthropic", ProviderKind::Anthropic),
        ("openai", ProviderKind::OpenAi),
        ("qwen", ProviderKind::Qwen),
        ("baidu", ProviderKind::Baidu),
        ("spark", ProviderKind::Spark),
    ] {
        let cli = Cli::try_parse_from(["nokode", "serve", "--provider", name])
            .expect("Valid command parsing");
        match cli.command {
            Some(Commands::Serve(args)) => assert_eq!(args.provider, Some(kind)),
            _ => panic!("Expected Serve command"),
        }
    }
}

#[test]
fn test_parse_invalid_port() {
    assert!(Cli::try_parse_from(["nokode", "serve", "--port", "70000"]).is_err());
}

#[test]
fn test_parse_tools_openai() {
    let cli = Cli::try_parse_from(["nokode", "-v", "tools", "--dialect", "openai"])
        .expect("Valid command parsing");
    assert_eq!(cli.verbose, 1);
    match cli.command {
        Some(Commands::Tools(args)) => assert_eq!(args.dialect, Dialect::Openai),
        _ => panic!("Expected Tools command"),
    }
}

#[test]
fn test_parse_unknown_command() {
    assert!(Cli::try_parse_from(["nokode", "chat"]).is_err());
}
