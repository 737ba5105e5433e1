use std::net::SocketAddr;
use std::path::Path;
use std::sync::Arc;
use std::time::Duration;

use anyhow::Context;
use clap::Parser;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

use approval_gate::models::job::JobEvent;
use approval_gate::models::pipeline::ApprovalTarget;
use approval_gate::services::Services;
use approval_gate::workflow::{definition, engine};
use approval_gate::{api, cli, config, launcher, AppState};

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    use opentelemetry::KeyValue;

    use opentelemetry_sdk::{trace as sdktrace, Resource};

    // OTLP export only when an endpoint is configured.
    let telemetry_layer = if std::env::var("OTEL_EXPORTER_OTLP_ENDPOINT").is_ok() {
        let tracer = opentelemetry_otlp::new_pipeline()
            .tracing()
            .with_exporter(opentelemetry_otlp::new_exporter().tonic())
            .with_trace_config(sdktrace::config().with_resource(Resource::new(vec![
                KeyValue::new("service.name", "approval-gate"),
            ])))
            .install_batch(opentelemetry_sdk::runtime::Tokio)
            .context("failed to install OpenTelemetry tracer")?;
        Some(tracing_opentelemetry::layer().with_tracer(tracer))
    } else {
        None
    };

    tracing_subscriber::registry()
        .with(tracing_subscriber::EnvFilter::new(
            std::env::var("RUST_LOG")
                .unwrap_or_else(|_| "approval_gate=debug,tower_http=debug".into()),
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
        Some(cli::Commands::Evaluate { event }) => {
            let services = Services::from_config(&cfg)?;
            let event = read_event(&event)?;
            let outcome = services.evaluator.evaluate_event(&event).await;
            println!("{}", serde_json::to_string_pretty(&outcome)?);
            Ok(())
        }
        Some(cli::Commands::Approve {
            pipeline,
            stage,
            action,
        }) => {
            let services = Services::from_config(&cfg)?;
            let target = ApprovalTarget {
                pipeline_name: pipeline
                    .or_else(|| cfg.approval.pipeline_name.clone())
                    .context("no pipeline given and APPROVAL_GATE_PIPELINE_NAME is not set")?,
                stage_name: stage.unwrap_or_else(|| cfg.approval.stage_name.clone()),
                action_name: action.unwrap_or_else(|| cfg.approval.action_name.clone()),
            };
            services
                .approver
                .resolve_and_approve(&target)
                .await
                .with_context(|| format!("could not approve {}", target))?;
            println!("Approved {}", target);
            Ok(())
        }
        Some(cli::Commands::Run { event }) => {
            let services = Services::from_config(&cfg)?;
            let event = read_event(&event)?;
            let record = services.local_engine.run(event).await;
            println!("{}", serde_json::to_string_pretty(&record)?);
            Ok(())
        }
        Some(cli::Commands::Definition {
            evaluate_resource,
            approve_resource,
        }) => {
            let def = definition::state_machine(&cfg.workflow, &evaluate_resource, &approve_resource);
            println!("{}", serde_json::to_string_pretty(&def)?);
            Ok(())
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

fn read_event(path: &Path) -> anyhow::Result<JobEvent> {
    let raw = std::fs::read_to_string(path)
        .with_context(|| format!("could not read {}", path.display()))?;
    serde_json::from_str(&raw).with_context(|| format!("{} is not a job event", path.display()))
}

async fn run_server(cfg: config::Config, port: u16) -> anyhow::Result<()> {
    tracing::info!("Building AWS clients...");
    let services = Services::from_config(&cfg)?;

    let engine = engine::select(
        cfg.workflow_id.as_deref(),
        services.local_engine.clone(),
        services.step_functions.clone(),
    )?;

    services
        .local_engine
        .spawn_sweeper(cfg.execution_retention.min(Duration::from_secs(60)));

    let state = Arc::new(AppState {
        config: cfg,
        evaluator: services.evaluator,
        approver: services.approver,
        executions: services.local_engine,
        launcher: launcher::Launcher::new(engine, services.pipeline),
    });

    let app = api::app(state.clone());

    let addr = SocketAddr::from(([0, 0, 0, 0], port));
    let listener = tokio::net::TcpListener::bind(addr).await?;
    tracing::info!(
        workflow = state.config.workflow_id.as_deref().unwrap_or_default(),
        "approval gate listening on {}",
        addr
    );
    axum::serve(listener, app).await?;

    Ok(())
}
