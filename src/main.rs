#![cfg_attr(not(test), deny(clippy::panic))]

use clap::Parser;
use frameyard_server::config;
use frameyard_server::logging;
use frameyard_server::server::AppState;
use frameyard_server::websocket;
use std::net::SocketAddr;

/// Frameyard -- coordination server for a collaborative 60-frame animation game
#[derive(Parser, Debug)]
#[command(name = "frameyard-server")]
#[command(about = "Coordination server for a collaborative 60-frame animation game")]
#[command(version)]
struct Cli {
    /// Validate configuration and exit without starting the server.
    /// Useful for CI/CD pipelines and pre-deployment checks.
    #[arg(long, short = 'c', conflicts_with = "print_config")]
    validate_config: bool,

    /// Print the loaded configuration to stdout (as JSON) and exit.
    /// Useful for debugging configuration loading from multiple sources.
    #[arg(long, conflicts_with = "validate_config")]
    print_config: bool,
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();

    let cfg = config::load();

    if cli.print_config {
        let json = serde_json::to_string_pretty(&cfg)
            .map_err(|e| anyhow::anyhow!("failed to serialize config: {e}"))?;
        println!("{json}");
        return Ok(());
    }

    let validation_result = config::validate_config(&cfg);

    if cli.validate_config {
        match validation_result {
            Ok(()) => {
                println!("Configuration validation passed");
                println!();
                println!("Configuration summary:");
                println!("  Port: {}", cfg.port);
                println!("  Data dir: {}", cfg.persistence.data_dir);
                println!("  Room cache max: {}", cfg.store.room_cache_max);
                println!("  Reservation window: {} ms", cfg.store.reservation_ms);
                println!("  Backup interval: {} ms", cfg.persistence.backup_interval_ms);
                println!("  Admin key configured: {}", cfg.admin.admin_key.is_some());
                return Ok(());
            }
            Err(e) => {
                eprintln!("Configuration validation failed:\n{e}");
                std::process::exit(1);
            }
        }
    }

    validation_result.map_err(|e| anyhow::anyhow!(e))?;

    logging::init_with_config(&cfg.logging);

    let port = cfg.port;
    let addr = SocketAddr::from(([0, 0, 0, 0], port));
    let cors_origins = cfg.protocol.cors_origins.clone();

    tracing::info!(%addr, data_dir = %cfg.persistence.data_dir, "starting frameyard server");

    let state = AppState::new(cfg).await?;
    state.spawn_background_tasks();

    let router = websocket::create_router(&cors_origins).with_state(state);
    let make_service = router.into_make_service_with_connect_info::<SocketAddr>();

    let listener = tokio::net::TcpListener::bind(addr).await?;
    tracing::info!(%addr, "server listening");

    axum::serve(listener, make_service).await?;

    Ok(())
}

#[cfg(test)]
mod cli_tests {
    use super::Cli;
    use clap::Parser;

    #[test]
    fn test_cli_default_no_flags() {
        let cli = Cli::try_parse_from(["frameyard-server"]).unwrap();
        assert!(!cli.validate_config);
        assert!(!cli.print_config);
    }

    #[test]
    fn test_cli_validate_config_long() {
        let cli = Cli::try_parse_from(["frameyard-server", "--validate-config"]).unwrap();
        assert!(cli.validate_config);
        assert!(!cli.print_config);
    }

    #[test]
    fn test_cli_validate_config_short() {
        let cli = Cli::try_parse_from(["frameyard-server", "-c"]).unwrap();
        assert!(cli.validate_config);
        assert!(!cli.print_config);
    }

    #[test]
    fn test_cli_print_config() {
        let cli = Cli::try_parse_from(["frameyard-server", "--print-config"]).unwrap();
        assert!(!cli.validate_config);
        assert!(cli.print_config);
    }

    #[test]
    fn test_cli_validate_and_print_config_conflict() {
        let result = Cli::try_parse_from(["frameyard-server", "--validate-config", "--print-config"]);
        assert!(result.is_err());
        let err = result.unwrap_err();
        assert!(err.to_string().contains("cannot be used with"));
    }

    #[test]
    fn test_cli_help_contains_flags() {
        let result = Cli::try_parse_from(["frameyard-server", "--help"]);
        assert!(result.is_err());
        let err = result.unwrap_err();
        let help_text = err.to_string();
        assert!(help_text.contains("--validate-config"));
        assert!(help_text.contains("--print-config"));
        assert!(help_text.contains("-c"));
    }

    #[test]
    fn test_cli_version() {
        let result = Cli::try_parse_from(["frameyard-server", "--version"]);
        assert!(result.is_err());
    }
}
