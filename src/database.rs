//! PostgreSQL connection pool.
use sqlx::PgPool;
use sqlx::postgres::{PgConnectOptions, PgPoolOptions};

use crate::config::Postgres;

pub const DEFAULT_CREDENTIALS: &str = "postgres";
pub const DEFAULT_DATABASE_NAME: &str = "passage";
pub const DEFAULT_POOL_SIZE: u32 = 10;

/// Connection options from `hostname[:port]` and credentials.
///
/// Credentials are passed as-is, never through a URL.
fn connect_options(config: &Postgres) -> PgConnectOptions {
    let (host, port) = match config.address.rsplit_once(':') {
        Some((host, port)) => match port.parse::<u16>() {
            Ok(port) => (host, Some(port)),
            Err(_) => (config.address.as_str(), None),
        },
        None => (config.address.as_str(), None),
    };

    let options = PgConnectOptions::new()
        .host(host)
        .username(config.username.as_deref().unwrap_or(DEFAULT_CREDENTIALS))
        .password(config.password.as_deref().unwrap_or(DEFAULT_CREDENTIALS))
        .database(config.database.as_deref().unwrap_or(DEFAULT_DATABASE_NAME));

    match port {
        Some(port) => options.port(port),
        None => options,
    }
}

/// Init database connections.
pub async fn connect(config: &Postgres) -> Result<PgPool, sqlx::Error> {
    let options = connect_options(config);
    let hostname = options.get_host().to_owned();
    let db = options.get_database().unwrap_or_default().to_owned();

    let postgres = PgPoolOptions::new()
        .max_connections(config.pool_size.unwrap_or(DEFAULT_POOL_SIZE))
        .connect_with(options)
        .await?;

    tracing::info!(%hostname, %db, "postgres connected");

    Ok(postgres)
}
