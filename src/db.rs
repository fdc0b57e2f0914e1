use sqlx::postgres::PgPoolOptions;
use sqlx::PgPool;

/// Connect and bring the schema up to date. Migrations are embedded at
/// compile time from ./migrations.
pub async fn connect_pg(database_url: &str, max_connections: u32) -> anyhow::Result<PgPool> {
    let pool = PgPoolOptions::new()
        .max_connections(max_connections)
        .connect(database_url)
        .await?;

    sqlx::migrate!().run(&pool).await?;

    Ok(pool)
}
