use std::sync::Arc;

use anyhow::Context;

use iotforge_infra::PlatformConfig;

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    iotforge_observability::init_from_env();

    let config = PlatformConfig::from_env().context("invalid configuration")?;
    let bind_addr = config.bind_addr.clone();

    let services = Arc::new(
        iotforge_api::app::services::build_services(config)
            .await
            .context("failed to wire services")?,
    );
    let app = iotforge_api::app::build_app(services.clone());

    let listener = tokio::net::TcpListener::bind(&bind_addr)
        .await
        .with_context(|| format!("failed to bind {bind_addr}"))?;
    tracing::info!(addr = %listener.local_addr()?, "listening");

    axum::serve(listener, app)
        .with_graceful_shutdown(async {
            let _ = tokio::signal::ctrl_c().await;
        })
        .await?;

    services.shutdown().await;
    Ok(())
}
