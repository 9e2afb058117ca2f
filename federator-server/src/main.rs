//! Producer-process composition root (spec.md sections 4/5/6): wires the
//! Credential Broker, Configuration Resolver, Offset Store, auth gate, and
//! the Record/File Stream Services into one tonic server, alongside a
//! health/metrics admin server, all coordinated by the lifecycle `Manager`.

use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;

use axum::routing::get;
use axum::Router;
use common_health::HealthRegistry;
use common_lifecycle::{Manager, ManagerOptions};
use envconfig::Envconfig;
use federator_auth::CredentialBroker;
use federator_config::{ConfigurationResolver, JobParams, JobScheduler};
use federator_filter::FilterEngine;
use federator_objectstore::{FileSource, LocalFiles, S3Files};
use federator_proto::federator_server::FederatorServer;
use federator_server::auth_interceptor::AuthInterceptor;
use federator_server::config::ServerConfig;
use federator_server::service::{FederatorService, FederatorSourceResolver};
use metrics_exporter_prometheus::PrometheusBuilder;
use tonic::transport::{Identity, Server, ServerTlsConfig};
use tracing::info;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt, EnvFilter};

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let config = ServerConfig::init_from_env().expect("invalid configuration");

    tracing_subscriber::registry()
        .with(tracing_subscriber::fmt::layer())
        .with(EnvFilter::builder().with_default_directive(tracing::Level::INFO.into()).from_env_lossy())
        .init();

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

    let liveness = HealthRegistry::new("liveness");
    let mut lifecycle = Manager::new(ManagerOptions::new("federator-server"));

    let job_scheduler = Arc::new(JobScheduler::new());
    let resolver_handle = lifecycle.register("configuration-resolver");
    let resolver_health = liveness.register("configuration_resolver".to_string(), Duration::from_secs(60)).await;
    {
        let job_scheduler = job_scheduler.clone();
        let resolver = resolver.clone();
        let handle = resolver_handle.clone();
        tokio::spawn(async move {
            job_scheduler
                .register_job(
                    JobParams {
                        job_id: "configuration-resolver".to_string(),
                        job_name: "configuration-resolver".to_string(),
                        interval: Duration::from_secs(30),
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

    let local_source: Arc<dyn FileSource> = Arc::new(LocalFiles {
        base_dir: config.file_source_local_base_dir.clone().into(),
    });
    let s3_source: Option<Arc<dyn FileSource>> = match &config.s3_region {
        Some(region) => {
            let aws_config = aws_config::defaults(aws_config::BehaviorVersion::latest())
                .region(aws_sdk_s3::config::Region::new(region.clone()))
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
            Some(Arc::new(S3Files {
                client,
                bucket_for_received_files: None,
                remove_local_after_upload: false,
            }))
        }
        None => {
            info!("s3.region not configured, S3 file descriptors will fail with ProviderNotConfigured");
            None
        }
    };
    let file_source_resolver = Arc::new(FederatorSourceResolver {
        local: local_source,
        s3: s3_source,
    });

    let federator_service = FederatorService {
        resolver: resolver.clone(),
        filter_engine: FilterEngine::default(),
        kafka: config.kafka.clone(),
        file_source_resolver,
        chunk_size: config.file_stream_chunk_size,
        shared_headers: None,
    };

    let auth_interceptor = AuthInterceptor::new(credential_broker);

    let rpc_handle = lifecycle.register("rpc-server");
    let rpc_health = liveness.register("rpc_server".to_string(), Duration::from_secs(30)).await;
    let rpc_addr: SocketAddr = format!("0.0.0.0:{}", config.server_port).parse()?;
    let shutdown_token = rpc_handle.cancellation_token();
    {
        let mut server = Server::builder()
            .http2_keepalive_interval(Some(config.keep_alive_time()))
            .http2_keepalive_timeout(Some(config.keep_alive_timeout()));

        if config.server_tls_enabled {
            let cert = std::fs::read(config.server_cert_chain_file.as_deref().expect("server.tlsEnabled requires certChainFile"))?;
            let key = std::fs::read(config.server_private_key_file.as_deref().expect("server.tlsEnabled requires privateKeyFile"))?;
            let mut tls = ServerTlsConfig::new().identity(Identity::from_pem(cert, key));
            if let Some(ca_path) = &config.server_ca_pem {
                let ca = std::fs::read(ca_path)?;
                tls = tls.client_ca_root(tonic::transport::Certificate::from_pem(ca));
            }
            server = server.tls_config(tls)?;
        }

        tokio::spawn(async move {
            rpc_health.report_healthy().await;
            let result = server
                .add_service(FederatorServer::with_interceptor(federator_service, move |req| auth_interceptor.intercept(req)))
                .serve_with_shutdown(rpc_addr, async move { shutdown_token.cancelled().await })
                .await;
            match result {
                Ok(()) => rpc_handle.work_completed(),
                Err(e) => rpc_handle.signal_failure(e.to_string()),
            }
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

    info!(port = config.server_port, admin_port = config.admin_port, "federator-server starting");
    lifecycle.run().await?;
    info!("federator-server stopped");
    Ok(())
}
