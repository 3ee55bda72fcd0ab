//! Voice Gateway Server Entry Point

use anyhow::Context;
use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt, Layer};

use voice_gateway_agent::{VoiceAgent, VoiceAgentConfig};
use voice_gateway_config::{load_settings, Settings};
use voice_gateway_llm::{ClaudeBackend, ClaudeConfig, DemoBackend, LlmBackend};
use voice_gateway_persistence::{ConversationStore, InMemoryConversationStore, ScyllaConfig};
use voice_gateway_server::{build_publisher, create_router, init_metrics, AppState};
use voice_gateway_tools::create_registry;

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    // Priority: env vars > config/{env}.toml > config/default.toml > defaults
    let env = std::env::var("VOICE_GATEWAY_ENV").ok();
    let mut config = match load_settings(env.as_deref()) {
        Ok(settings) => {
            // Tracing not yet initialized, use eprintln for early logging
            eprintln!(
                "Loaded configuration from files (env: {})",
                env.as_deref().unwrap_or("default")
            );
            settings
        }
        Err(e) => {
            eprintln!("Warning: Failed to load config: {}. Using defaults.", e);
            Settings::default()
        }
    };
    if std::env::args().any(|arg| arg == "--demo") {
        config.demo = true;
    }

    init_tracing(&config);

    tracing::info!("Starting Voice Gateway v{}", env!("CARGO_PKG_VERSION"));
    tracing::info!(
        environment = ?config.environment,
        demo = config.demo,
        integrations = %config.status_line(),
        "Configuration loaded"
    );

    config.validate().context("invalid configuration")?;
    let missing = config.missing_keys();
    if !missing.is_empty() {
        tracing::warn!(missing = ?missing, "Vendor keys missing; affected calls will fail");
    }

    if config.observability.metrics_enabled && init_metrics().is_some() {
        tracing::info!("Initialized Prometheus metrics at /metrics");
    }

    let store = init_store(&config).await;
    let publisher = build_publisher(&config.notifications);
    let tools = Arc::new(create_registry(
        store.clone(),
        publisher.clone(),
        &config.tools,
        &config.twilio,
        config.demo,
    ));
    tracing::info!(tools = tools.len(), "Tool registry ready");

    let backend = init_backend(&config)?;
    let agent = Arc::new(VoiceAgent::new(
        backend,
        tools,
        VoiceAgentConfig::from_settings(&config.agent),
    ));
    tracing::info!(model = %agent.model_name(), "Agent ready");

    let addr: SocketAddr = format!("{}:{}", config.server.host, config.server.port)
        .parse()
        .context("invalid server.host/server.port")?;

    let state = AppState::new(config, store, agent, publisher);
    let cleanup = state.calls.start_cleanup_task();
    let calls = state.calls.clone();

    let app = create_router(state);

    tracing::info!("Listening on {}", addr);
    let listener = tokio::net::TcpListener::bind(addr).await?;

    axum::serve(listener, app)
        .with_graceful_shutdown(shutdown_signal())
        .await?;

    let _ = cleanup.send(true);
    calls.close_all();
    tracing::info!("Server shutdown complete");
    Ok(())
}

/// Wait for shutdown signal (Ctrl+C or SIGTERM)
async fn shutdown_signal() {
    let ctrl_c = async {
        if let Err(e) = tokio::signal::ctrl_c().await {
            tracing::error!(error = %e, "Failed to install Ctrl+C handler");
            std::future::pending::<()>().await;
        }
    };

    #[cfg(unix)]
    let terminate = async {
        match tokio::signal::unix::signal(tokio::signal::unix::SignalKind::terminate()) {
            Ok(mut signal) => {
                signal.recv().await;
            }
            Err(e) => {
                tracing::error!(error = %e, "Failed to install SIGTERM handler");
                std::future::pending::<()>().await;
            }
        }
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => {
            tracing::info!("Received Ctrl+C, initiating graceful shutdown...");
        }
        _ = terminate => {
            tracing::info!("Received SIGTERM, initiating graceful shutdown...");
        }
    }
}

/// ScyllaDB when enabled and reachable, otherwise in-memory
async fn init_store(config: &Settings) -> Arc<dyn ConversationStore> {
    let expiry = Duration::from_secs(config.persistence.session_expiry_hours * 3600);

    if !config.persistence.enabled || config.demo {
        tracing::info!("Persistence disabled, using in-memory conversation store");
        return Arc::new(InMemoryConversationStore::new(expiry));
    }

    tracing::info!("Initializing ScyllaDB persistence layer...");
    let scylla = ScyllaConfig {
        hosts: config.persistence.scylla_hosts.clone(),
        keyspace: config.persistence.keyspace.clone(),
        replication_factor: config.persistence.replication_factor,
    };
    match voice_gateway_persistence::init(scylla, expiry).await {
        Ok(store) => {
            tracing::info!(
                hosts = ?config.persistence.scylla_hosts,
                keyspace = %config.persistence.keyspace,
                "ScyllaDB persistence initialized"
            );
            Arc::new(store)
        }
        Err(e) => {
            tracing::error!(
                "Failed to initialize ScyllaDB: {}. Falling back to in-memory.",
                e
            );
            Arc::new(InMemoryConversationStore::new(expiry))
        }
    }
}

/// Claude in live mode, canned replies in demo mode
fn init_backend(config: &Settings) -> anyhow::Result<Arc<dyn LlmBackend>> {
    if config.demo {
        tracing::info!("Demo mode: using canned agent replies");
        return Ok(Arc::new(DemoBackend::new()));
    }

    let agent = &config.agent;
    let claude = ClaudeConfig::new(agent.api_key.clone())
        .with_model(agent.model.clone())
        .with_max_tokens(agent.max_tokens)
        .with_endpoint(agent.endpoint.clone())
        .with_timeout(Duration::from_secs(agent.request_timeout_secs));
    let backend = ClaudeBackend::new(claude).context("reasoning engine unavailable")?;
    Ok(Arc::new(backend))
}

/// Initialize tracing (with optional OpenTelemetry when feature enabled)
#[cfg(feature = "telemetry")]
fn init_tracing(config: &Settings) {
    use opentelemetry::trace::TracerProvider as _;
    use opentelemetry_otlp::WithExportConfig;

    let env_filter = tracing_subscriber::EnvFilter::try_from_default_env().unwrap_or_else(|_| {
        let level = &config.observability.log_level;
        format!("voice_gateway={},tower_http=debug", level).into()
    });

    let subscriber = tracing_subscriber::registry().with(env_filter);
    let fmt_layer = if config.observability.log_json {
        tracing_subscriber::fmt::layer().json().boxed()
    } else {
        tracing_subscriber::fmt::layer().boxed()
    };

    if let Some(otlp_endpoint) = &config.observability.otlp_endpoint {
        if config.observability.tracing_enabled {
            let exporter = opentelemetry_otlp::SpanExporter::builder()
                .with_tonic()
                .with_endpoint(otlp_endpoint)
                .build();
            match exporter {
                Ok(exporter) => {
                    let provider = opentelemetry_sdk::trace::TracerProvider::builder()
                        .with_batch_exporter(exporter, opentelemetry_sdk::runtime::Tokio)
                        .with_resource(opentelemetry_sdk::Resource::new(vec![
                            opentelemetry::KeyValue::new("service.name", "voice-gateway"),
                            opentelemetry::KeyValue::new(
                                "service.version",
                                env!("CARGO_PKG_VERSION"),
                            ),
                        ]))
                        .build();
                    let tracer = provider.tracer("voice-gateway");
                    opentelemetry::global::set_tracer_provider(provider);

                    let otel_layer = tracing_opentelemetry::layer().with_tracer(tracer);
                    subscriber.with(fmt_layer).with(otel_layer).init();
                    tracing::info!(endpoint = %otlp_endpoint, "OpenTelemetry tracing enabled");
                    return;
                }
                Err(e) => eprintln!("Failed to initialize OpenTelemetry: {}. Falling back.", e),
            }
        }
    }
    subscriber.with(fmt_layer).init();
}

/// Initialize tracing (console only - telemetry feature disabled)
#[cfg(not(feature = "telemetry"))]
fn init_tracing(config: &Settings) {
    let env_filter = tracing_subscriber::EnvFilter::try_from_default_env().unwrap_or_else(|_| {
        let level = &config.observability.log_level;
        format!("voice_gateway={},tower_http=debug", level).into()
    });

    let subscriber = tracing_subscriber::registry().with(env_filter);
    let fmt_layer = if config.observability.log_json {
        tracing_subscriber::fmt::layer().json().boxed()
    } else {
        tracing_subscriber::fmt::layer().boxed()
    };
    subscriber.with(fmt_layer).init();
}
