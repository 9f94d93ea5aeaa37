use ticket_core::config::ServiceConfig;
use ticket_server::state::AppState;

pub fn run(config: ServiceConfig) -> anyhow::Result<()> {
    let rt = tokio::runtime::Runtime::new()?;
    rt.block_on(async move {
        let port = config.port;
        let state = AppState::from_config(config).await?;
        ticket_server::serve(state, port).await
    })
}
