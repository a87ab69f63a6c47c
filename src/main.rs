use std::net::SocketAddr;
use std::sync::Arc;

use anyhow::Context;
use clap::Parser;
use tower_http::cors::CorsLayer;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

use portal::models::application::{ApplicationStatus, ReviewAction};
use portal::models::policy::{complete_policies, PolicyUpdate};
use portal::models::student_csv::parse_student_csv;
use portal::store::postgres::PgStore;
use portal::{api, cli, config, jobs, review, roster, AppState};

/// Reviewer recorded on decisions made from the command line.
const CLI_REVIEWER: &str = "cli";

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    use opentelemetry::KeyValue;
    use opentelemetry_sdk::{trace as sdktrace, Resource};

    let telemetry_layer = if std::env::var("OTEL_EXPORTER_OTLP_ENDPOINT").is_ok() {
        let tracer = opentelemetry_otlp::new_pipeline()
            .tracing()
            .with_exporter(opentelemetry_otlp::new_exporter().tonic())
            .with_trace_config(sdktrace::config().with_resource(Resource::new(vec![
                KeyValue::new("service.name", "permit-portal"),
            ])))
            .install_batch(opentelemetry_sdk::runtime::Tokio)
            .context("failed to install OpenTelemetry tracer")?;
        Some(tracing_opentelemetry::layer().with_tracer(tracer))
    } else {
        None
    };

    tracing_subscriber::registry()
        .with(tracing_subscriber::EnvFilter::new(
            std::env::var("RUST_LOG").unwrap_or_else(|_| "portal=debug,tower_http=debug".into()),
        ))
        .with(tracing_subscriber::fmt::layer())
        .with(telemetry_layer)
        .init();

    let cfg = config::load()?;
    let args = cli::Cli::parse();

    let result = match args.command {
        Some(cli::Commands::Serve { port }) => {
            let port = port.unwrap_or(cfg.port);
            run_server(cfg, port).await
        }
        Some(cli::Commands::Approval { command }) => {
            let state = connect_state(cfg).await?;
            handle_approval_command(&state, command).await
        }
        Some(cli::Commands::Policy { command }) => {
            let db = PgStore::connect(&cfg.database_url).await?;
            handle_policy_command(&db, command).await
        }
        Some(cli::Commands::Student { command }) => {
            let db = PgStore::connect(&cfg.database_url).await?;
            handle_student_command(&db, command).await
        }
        Some(cli::Commands::Roster { command }) => {
            let state = connect_state(cfg).await?;
            handle_roster_command(&state, command).await
        }
        Some(cli::Commands::Consent { command }) => {
            let db = PgStore::connect(&cfg.database_url).await?;
            handle_consent_command(&db, command).await
        }
        None => {
            let port = cfg.port;
            run_server(cfg, port).await
        }
    };

    if let Err(ref e) = result {
        eprintln!("Error: {:?}", e);
    }
    result
}

async fn connect_state(cfg: config::Config) -> anyhow::Result<AppState> {
    let db = PgStore::connect(&cfg.database_url).await?;
    AppState::new(db, cfg)
}

async fn run_server(cfg: config::Config, port: u16) -> anyhow::Result<()> {
    cfg.validate_for_server()?;

    tracing::info!("Connecting to database...");
    let db = PgStore::connect(&cfg.database_url).await?;

    tracing::info!("Running migrations...");
    db.migrate().await?;

    let dashboard_origin = cfg.dashboard_origin.clone();
    let auto_approval_every = cfg.auto_approval_interval_secs;
    let state = Arc::new(AppState::new(db, cfg)?);

    let app = api::app_router(state.clone()).layer({
        use axum::http::{header, Method};
        use tower_http::cors::AllowOrigin;
        CorsLayer::new()
            .allow_origin(AllowOrigin::predicate(move |origin, _| {
                let origin_str = origin.to_str().unwrap_or("");
                origin_str == dashboard_origin
                    || origin_str.starts_with("http://localhost:")
                    || origin_str.starts_with("http://127.0.0.1:")
            }))
            .allow_methods([
                Method::GET,
                Method::POST,
                Method::PATCH,
                Method::DELETE,
                Method::OPTIONS,
            ])
            .allow_headers([header::CONTENT_TYPE, header::AUTHORIZATION])
            .expose_headers([header::CONTENT_DISPOSITION])
            .allow_credentials(true)
    });

    if jobs::auto_approval::spawn(state.db.clone(), auto_approval_every) {
        tracing::info!(
            every_secs = auto_approval_every,
            "Background auto-approval job started"
        );
    }

    let addr = SocketAddr::from(([0, 0, 0, 0], port));
    let listener = tokio::net::TcpListener::bind(addr).await?;
    tracing::info!("Permit portal listening on {}", addr);
    axum::serve(listener, app).await?;

    Ok(())
}

async fn handle_approval_command(
    state: &AppState,
    cmd: cli::ApprovalCommands,
) -> anyhow::Result<()> {
    let (id, action) = match cmd {
        cli::ApprovalCommands::List { status } => {
            let status = status
                .as_deref()
                .map(str::parse::<ApplicationStatus>)
                .transpose()
                .map_err(anyhow::Error::msg)?;
            let items = state.db.list_applications(status).await?;
            if items.is_empty() {
                println!("No applications found.");
                return Ok(());
            }
            println!(
                "{:<6} {:<24} {:<8} {:<14} {:<12} SUBMITTED",
                "ID", "STUDENT", "TYPE", "STATUS", "NUMBER"
            );
            for a in items {
                println!(
                    "{:<6} {:<24} {:<8} {:<14} {:<12} {}",
                    a.id,
                    a.student_id,
                    a.application_type.as_str(),
                    a.status.as_str(),
                    a.approval_number.as_deref().unwrap_or("-"),
                    a.submitted_at.format("%Y-%m-%d %H:%M")
                );
            }
            return Ok(());
        }
        cli::ApprovalCommands::Approve { id, number } => (
            id,
            ReviewAction::Approve {
                approval_number: number,
            },
        ),
        cli::ApprovalCommands::Reject { id, reason } => (id, ReviewAction::Reject { reason }),
        cli::ApprovalCommands::Reset { id } => (id, ReviewAction::Reset),
    };

    let outcome = review::review_application(
        &state.db,
        Some(state.roster_sync()),
        id,
        &action,
        CLI_REVIEWER,
    )
    .await?;
    match outcome {
        Some(outcome) => {
            println!(
                "Application {} is now {}",
                outcome.item.id,
                outcome.item.status.as_str()
            );
            if let Some(number) = outcome.item.approval_number {
                println!("  Approval number: {}", number);
            }
            if let Some(err) = outcome.sync_error {
                println!("  Roster sync failed: {}", err);
            }
        }
        None => println!("Application {} not found.", id),
    }
    Ok(())
}

async fn handle_policy_command(db: &PgStore, cmd: cli::PolicyCommands) -> anyhow::Result<()> {
    match cmd {
        cli::PolicyCommands::List => {
            let policies = complete_policies(db.list_policies().await?);
            println!("{:<8} {:<10} {:<6} UPDATED", "KEY", "MODE", "DELAY");
            for p in policies {
                println!(
                    "{:<8} {:<10} {:<6} {}",
                    p.policy_key.as_str(),
                    p.mode.as_str(),
                    p.delay_minutes,
                    p.updated_at
                        .map(|t| t.format("%Y-%m-%d %H:%M").to_string())
                        .unwrap_or_else(|| "-".into())
                );
            }
        }
        cli::PolicyCommands::Set { key, mode, delay } => {
            let update = PolicyUpdate::parse(Some(&key), Some(&mode), Some(delay))
                .map_err(anyhow::Error::msg)?;
            let policy = db.upsert_policy(&update).await?;
            println!(
                "Policy updated:\n  Key:   {}\n  Mode:  {}\n  Delay: {} min",
                policy.policy_key.as_str(),
                policy.mode.as_str(),
                policy.delay_minutes
            );
        }
        cli::PolicyCommands::Run => {
            let count = db.run_auto_approval().await?;
            println!("Auto-approved {} application(s).", count);
        }
    }
    Ok(())
}

async fn handle_student_command(db: &PgStore, cmd: cli::StudentCommands) -> anyhow::Result<()> {
    match cmd {
        cli::StudentCommands::Import { path } => {
            let bytes = tokio::fs::read(&path)
                .await
                .with_context(|| format!("failed to read {}", path.display()))?;
            let students = parse_student_csv(&bytes)?;
            let count = db.upsert_students(&students).await?;
            println!("Imported {} student(s) from {}.", count, path.display());
        }
        cli::StudentCommands::List => {
            let students = db.list_students().await?;
            if students.is_empty() {
                println!("No students registered.");
                return Ok(());
            }
            println!("{:<28} {:<12} {:<6} CLASS", "STUDENT", "NAME", "GRADE");
            for s in students {
                println!(
                    "{:<28} {:<12} {:<6} {}",
                    s.student_id, s.name, s.grade, s.class_num
                );
            }
        }
    }
    Ok(())
}

async fn handle_roster_command(state: &AppState, cmd: cli::RosterCommands) -> anyhow::Result<()> {
    match cmd {
        cli::RosterCommands::Sync => {
            let sync = state.roster_sync();
            let count = roster::sync_roster(&state.db, sync.sheets, sync.fallback_url).await?;
            println!("Synced {} gate roster row(s).", count);
        }
    }
    Ok(())
}

async fn handle_consent_command(db: &PgStore, cmd: cli::ConsentCommands) -> anyhow::Result<()> {
    match cmd {
        cli::ConsentCommands::Publish {
            consent_type,
            title,
            content_file,
        } => {
            let content = tokio::fs::read_to_string(&content_file)
                .await
                .with_context(|| format!("failed to read {}", content_file.display()))?;
            let doc = db.publish_consent(&consent_type, &title, &content).await?;
            println!(
                "Consent document published:\n  Type:    {}\n  Version: {}\n  ID:      {}",
                doc.consent_type, doc.version, doc.id
            );
        }
    }
    Ok(())
}
