//! Consumer-process composition root (spec.md sections 4.3/4.7/4.8/4.9/4.10):
//! wires the Credential Broker, Configuration Resolver, Offset Store,
//! Chunked File Assembler, and the per-(server, topic) Conductor Supervisor
//! into one process, alongside a health/metrics admin server, all
//! coordinated by the lifecycle `Manager`.

use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;

use axum::routing::get;
use axum::Router;
use common_health::HealthRegistry;
use common_lifecycle::{Manager, ManagerOptions};
use envconfig::Envconfig;
use federator_auth::CredentialBroker;
use federator_client::assembler::ChunkedFileAssembler;
use federator_client::config::ClientConfig;
use federator_client::connections::load_connections;
use federator_client::sink::KafkaRecordSink;
use federator_client::supervisor::ConductorSupervisor;
use federator_config::{ConfigurationResolver, JobParams, JobScheduler};
use federator_objectstore::{LocalFiles, ReceivedFileStorage, S3Files};
use metrics_exporter_prometheus::PrometheusBuilder;
use tracing::info;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt, EnvFilter};

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let config = ClientConfig::init_from_env().expect("invalid configuration");

    tracing_subscriber::registry()
        .with(tracing_subscriber::fmt::layer())
        .with(EnvFilter::builder().with_default_directive(tracing::Level::INFO.into()).from_env_lossy())
        .init();

    let connections = load_connections(&config.connections_config_path).expect("failed to load connections config");

    let offset_store = Arc::new(
        common_store::OffsetStore::connect(config.offset_store_config())
            .await
            .expect("failed to connect to offset store"),
    );

    let http = config.idp.build_http_client().expect("failed to build IDP HTTP client");
    let credential_broker = Arc::new(CredentialBroker::new(config.idp.clone(), offset_store.clone(), http.clone()));
    let resolver = Arc::new(ConfigurationResolver::new(
        config.management_node_base_url.clone(),
        http,
        credential_broker.clone(),
    ));
    resolver
        .refresh_once()
        .await
        .expect("initial configuration pull from management node failed");

    let sink = Arc::new(
        KafkaRecordSink::connect(&config.kafka)
            .await
            .expect("failed to connect local bus sink"),
    );

    let received_file_storage: Arc<dyn ReceivedFileStorage> = match &config.s3_received_files_bucket {
        Some(bucket) => {
            let region = config.s3_region.clone().expect("s3.receivedFilesBucket requires s3.region");
            let aws_config = aws_config::defaults(aws_config::BehaviorVersion::latest())
                .region(aws_sdk_s3::config::Region::new(region))
                .load()
                .await;
            let mut builder = aws_sdk_s3::config::Builder::from(&aws_config).force_path_style(true);
            if let Some(endpoint) = &config.s3_endpoint {
                builder = builder.endpoint_url(endpoint);
            }
            if let (Some(key), Some(secret)) = (&config.s3_access_key_id, &config.s3_secret_access_key) {
                builder = builder.credentials_provider(aws_sdk_s3::config::Credentials::new(key, secret, None, None, "env"));
            }
            let client = aws_sdk_s3::Client::from_conf(builder.build());
            Arc::new(S3Files {
                client,
                bucket_for_received_files: Some(bucket.clone()),
                remove_local_after_upload: config.s3_remove_local_after_upload,
            })
        }
        None => Arc::new(LocalFiles {
            base_dir: config.client_files_temp_dir.clone().into(),
        }),
    };
    let assembler = Arc::new(ChunkedFileAssembler::new(config.client_files_temp_dir.clone(), received_file_storage));

    let supervisor = Arc::new(ConductorSupervisor::new(
        config.client_name.clone(),
        connections,
        resolver.clone(),
        offset_store.clone(),
        credential_broker,
        sink,
        assembler,
    ));

    let liveness = HealthRegistry::new("liveness");
    let mut lifecycle = Manager::new(ManagerOptions::new("federator-client"));

    let job_scheduler = Arc::new(JobScheduler::new());
    let resolver_handle = lifecycle.register("configuration-resolver");
    let resolver_health = liveness.register("configuration_resolver".to_string(), Duration::from_secs(90)).await;
    {
        let job_scheduler = job_scheduler.clone();
        let resolver = resolver.clone();
        let handle = resolver_handle.clone();
        let interval = config.configuration_poll_interval();
        tokio::spawn(async move {
            job_scheduler
                .register_job(
                    JobParams {
                        job_id: "configuration-resolver".to_string(),
                        job_name: "configuration-resolver".to_string(),
                        interval,
                        max_retries: 3,
                        require_immediate_trigger: false,
                    },
                    resolver,
                )
                .await;
            handle.shutdown_recv().await;
            job_scheduler.stop().await;
            handle.work_completed();
        });
        resolver_health.report_healthy().await;
    }

    let supervisor_handle = lifecycle.register("conductor-supervisor");
    let supervisor_health = liveness.register("conductor_supervisor".to_string(), Duration::from_secs(90)).await;
    {
        let supervisor = supervisor.clone();
        let handle = supervisor_handle.clone();
        let interval = config.supervisor_poll_interval();
        tokio::spawn(async move {
            let stop = handle.cancellation_token();
            supervisor.run(interval, stop, Some(supervisor_health)).await;
            handle.work_completed();
        });
    }

    let admin_handle = lifecycle.register("admin-server");
    {
        let recorder = PrometheusBuilder::new().install_recorder().expect("failed to install prometheus recorder");
        let liveness = liveness.clone();
        let shutdown_token = admin_handle.cancellation_token();
        let admin_addr: SocketAddr = format!("0.0.0.0:{}", config.admin_port).parse()?;
        let router = Router::new()
            .route("/healthz", get(move || { let liveness = liveness.clone(); async move { liveness.get_status() } }))
            .route("/metrics", get(move || { let recorder = recorder.clone(); async move { recorder.render() } }));

        tokio::spawn(async move {
            let listener = tokio::net::TcpListener::bind(admin_addr).await.expect("failed to bind admin port");
            info!(addr = %admin_addr, "admin server listening");
            let result = axum::serve(listener, router)
                .with_graceful_shutdown(async move { shutdown_token.cancelled().await })
                .await;
            match result {
                Ok(()) => admin_handle.work_completed(),
                Err(e) => admin_handle.signal_failure(e.to_string()),
            }
        });
    }

    info!(client = %config.client_name, admin_port = config.admin_port, "federator-client starting");
    lifecycle.run().await?;
    info!("federator-client stopped");
    Ok(())
}
