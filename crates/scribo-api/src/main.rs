use scribo_core::Config;

#[tokio::main]
async fn main() -> Result<(), anyhow::Error> {
    let config = Config::from_env()?;

    let (state, router) = scribo_api::setup::initialize_app(config).await?;

    scribo_api::setup::server::start_server(state, router).await?;

    Ok(())
}
