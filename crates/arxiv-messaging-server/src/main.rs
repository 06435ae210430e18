use arxiv_messaging_server::{AppConfig, init_tracing, run};

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let _ = dotenvy::dotenv();
    init_tracing();

    let config = AppConfig::from_env()?;
    config.validate().map_err(|e| anyhow::anyhow!(e))?;

    run(config).await
}
