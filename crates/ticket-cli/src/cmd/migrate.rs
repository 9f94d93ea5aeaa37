use anyhow::Context;
use ticket_core::config::ServiceConfig;
use ticket_core::store::PgStore;

/// Apply pending migrations, then check the declared column tables.
pub fn run(config: ServiceConfig) -> anyhow::Result<()> {
    let url = config
        .database_url
        .context("migrate needs a database; set DATABASE_URL or --database-url")?;
    let rt = tokio::runtime::Runtime::new()?;
    rt.block_on(async move {
        let store = PgStore::connect(&url).await?;
        store.migrate().await?;
        store.verify_schema().await?;
        anyhow::Ok(())
    })?;
    println!("Database schema is up to date.");
    Ok(())
}
