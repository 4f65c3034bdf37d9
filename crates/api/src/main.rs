//! SurveyFlow API server entry point

use surveyflow_api::routes::create_router;
use surveyflow_api::{AppState, Config};
use surveyflow_billing::StripeClient;

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    dotenvy::dotenv().ok();

    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "surveyflow_api=info,surveyflow_billing=info,info".into()),
        )
        .json()
        .init();

    let config = Config::from_env()?;
    tracing::info!(bind_address = %config.bind_address, "Starting SurveyFlow API");

    let pool = surveyflow_shared::create_pool(&config.database_url).await?;
    surveyflow_shared::run_migrations(&pool).await?;

    let stripe = StripeClient::from_env()?;
    let generation = surveyflow_api::generation::GenerationClient::from_config(&config)?;

    let state = AppState::new(config.clone(), pool, stripe, generation);
    let router = create_router(state);

    let listener = tokio::net::TcpListener::bind(&config.bind_address).await?;
    tracing::info!(addr = %config.bind_address, "Listening");
    axum::serve(listener, router).await?;

    Ok(())
}
