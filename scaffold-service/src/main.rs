use scaffold_service::prelude::*;

#[tokio::main]
async fn main() -> Result<()> {
    let config = Config::load()?;
    init_tracing(&config)?;

    let state = AppState::connect(config.clone()).await?;

    #[cfg(feature = "events")]
    if let Some(consumer) = scaffold_service::example::consumer::spawn_consumer(&state).await? {
        tokio::spawn(async move {
            match consumer.await {
                Ok(report) => tracing::warn!(?report, "event consumer stopped"),
                Err(e) => tracing::error!(error = %e, "event consumer task failed"),
            }
        });
    }

    Server::new(config).serve(app(state)).await
}
