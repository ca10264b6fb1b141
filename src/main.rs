use clap::Parser;
use nh_rep_finder::adapters::SourceReader;
use nh_rep_finder::app::service::http_client;
use nh_rep_finder::config::cli::{Command, LookupArgs, ValidateCsvArgs};
use nh_rep_finder::core::overlay::{validate_headers, OverlayIndex, OverlaySide};
use nh_rep_finder::core::votes::VoteCache;
use nh_rep_finder::domain::ports::TextSource;
use nh_rep_finder::utils::error::{ErrorCategory, ErrorSeverity, StageError};
use nh_rep_finder::utils::{logger, validation::Validate};
use nh_rep_finder::{build_service, AppConfig, Cli, GeoPoint, LookupError};
use serde::Serialize;
use std::sync::Arc;

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();

    logger::init_cli_logger(cli.verbose, cli.log_json);
    tracing::info!("Starting nh-rep-finder");

    let config = match AppConfig::load(cli.config.as_deref()) {
        Ok(config) => config,
        Err(e) => exit_with(&e),
    };
    if cli.verbose {
        tracing::debug!("Config: {:?}", redacted(&config));
    }
    if let Err(e) = config.validate() {
        tracing::error!("Configuration validation failed: {}", e);
        tracing::error!("Suggestion: {}", e.recovery_suggestion());
        eprintln!("{}", e.user_friendly_message());
        std::process::exit(1);
    }

    match cli.command {
        Command::Lookup(args) => lookup(&config, args).await,
        Command::District { label } => {
            let components = build_or_exit(&config).await;
            match components.service.district(&label).await {
                Ok((label, legislators)) => print_json(&serde_json::json!({
                    "district": label,
                    "legislators": legislators,
                })),
                Err(e) => exit_with_stage(&e),
            }
        }
        Command::OverlayStats => {
            let components = build_or_exit(&config).await;
            print_json(&components.service.overlay_stats().await)
        }
        Command::ValidateCsv(args) => validate_csv(&config, args).await,
        Command::VoteMap => {
            let votes = votes_or_exit(&config).await;
            match votes.table().await {
                Ok(table) => print_json(&table.report(votes.location())),
                Err(e) => exit_with(&e),
            }
        }
        Command::VotesCsv => {
            let votes = votes_or_exit(&config).await;
            match votes.raw_csv().await {
                Ok(csv) => {
                    print!("{}", csv);
                    Ok(())
                }
                Err(e) => exit_with(&e),
            }
        }
        Command::BillLink { bill, year } => {
            let components = build_or_exit(&config).await;
            match components.openstates.bill_link(&bill, year.as_deref()).await {
                Ok(link) => print_json(&link),
                Err(e) => exit_with(&e),
            }
        }
    }
}

async fn votes_or_exit(config: &AppConfig) -> Arc<VoteCache<SourceReader>> {
    match build_or_exit(config).await.votes {
        Some(votes) => votes,
        None => exit_with(&LookupError::Config {
            message: "votes.csv (or VOTES_CSV_URL) is not configured".to_string(),
        }),
    }
}

async fn lookup(config: &AppConfig, args: LookupArgs) -> anyhow::Result<()> {
    let components = build_or_exit(config).await;
    let result = match (args.lat, args.lon) {
        (Some(lat), Some(lon)) => components.service.lookup_point(GeoPoint::new(lat, lon)).await,
        _ => {
            components
                .service
                .lookup(args.address.as_deref().unwrap_or_default())
                .await
        }
    };
    match result {
        Ok(result) => {
            for failure in &result.diagnostics.failed_districts {
                eprintln!("warning: {} could not be fetched: {}", failure.district, failure.error);
            }
            print_json(&result)
        }
        Err(e) => exit_with_stage(&e),
    }
}

async fn validate_csv(config: &AppConfig, args: ValidateCsvArgs) -> anyhow::Result<()> {
    let client = match http_client(config) {
        Ok(client) => client,
        Err(e) => exit_with(&e),
    };
    let text = match SourceReader::new(client).read_text(&args.path).await {
        Ok(text) => text,
        Err(e) => exit_with(&e),
    };

    let side = OverlaySide::from(args.kind);
    let check = validate_headers(side, &text);
    let stats = match side {
        OverlaySide::Base => OverlayIndex::load(&text, "").stats(),
        OverlaySide::Town => OverlayIndex::load("", &text).stats(),
    };
    let entries = match side {
        OverlaySide::Base => stats.base_to_floterial_count,
        OverlaySide::Town => stats.town_to_floterial_count,
    };
    print_json(&serde_json::json!({
        "path": args.path,
        "check": check,
        "entries": entries,
    }))?;
    if !check.ok {
        eprintln!("Missing columns: {}", check.missing.join(", "));
        std::process::exit(1);
    }
    Ok(())
}

async fn build_or_exit(config: &AppConfig) -> nh_rep_finder::app::Components {
    match build_service(config).await {
        Ok(components) => components,
        Err(e) => exit_with(&e),
    }
}

fn print_json<T: Serialize>(value: &T) -> anyhow::Result<()> {
    println!("{}", serde_json::to_string_pretty(value)?);
    Ok(())
}

/// Exit code by severity; client input errors always exit 2.
fn exit_code(e: &LookupError) -> i32 {
    if e.category() == ErrorCategory::Input {
        return 2;
    }
    match e.severity() {
        ErrorSeverity::Low | ErrorSeverity::High => 1,
        ErrorSeverity::Medium => 4,
        ErrorSeverity::Critical => 3,
    }
}

fn exit_with(e: &LookupError) -> ! {
    tracing::error!(
        "{} (Category: {:?}, Severity: {:?})",
        e,
        e.category(),
        e.severity()
    );
    eprintln!("{}", e.user_friendly_message());
    eprintln!("Suggestion: {}", e.recovery_suggestion());
    std::process::exit(exit_code(e));
}

fn exit_with_stage(e: &StageError) -> ! {
    tracing::error!("Lookup failed at stage '{}': {}", e.stage, e.error);
    if let Ok(body) = serde_json::to_string_pretty(&e.body()) {
        println!("{}", body);
    }
    eprintln!("{}", e.error.user_friendly_message());
    eprintln!("Suggestion: {}", e.error.recovery_suggestion());
    std::process::exit(exit_code(&e.error));
}

fn redacted(config: &AppConfig) -> AppConfig {
    let mut config = config.clone();
    if config.openstates.api_key.is_some() {
        config.openstates.api_key = Some("***".to_string());
    }
    config
}
