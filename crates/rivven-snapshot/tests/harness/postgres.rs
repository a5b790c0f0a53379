//! PostgreSQL testcontainer for split read tests

use anyhow::{Context, Result};
use std::sync::Arc;
use std::time::Duration;
use testcontainers::{runners::AsyncRunner, ContainerAsync, ImageExt};
use testcontainers_modules::postgres::Postgres;
use tokio::time::sleep;
use tokio_postgres::{Client, NoTls};
use tracing::{debug, info};

/// PostgreSQL 16 container with a `postgres` superuser.
pub struct PostgresTestContainer {
    #[allow(dead_code)]
    container: ContainerAsync<Postgres>,
    pub host: String,
    pub port: u16,
}

impl PostgresTestContainer {
    pub async fn start() -> Result<Self> {
        info!("Starting PostgreSQL testcontainer");

        let container = Postgres::default()
            .with_tag("16-alpine")
            .start()
            .await
            .context("Failed to start PostgreSQL container")?;

        let host = container.get_host().await?.to_string();
        let port = container.get_host_port_ipv4(5432).await?;
        info!("PostgreSQL container started on {}:{}", host, port);

        let instance = Self {
            container,
            host,
            port,
        };
        instance.wait_for_ready().await?;
        Ok(instance)
    }

    pub fn connection_string(&self) -> String {
        format!(
            "host={} port={} user=postgres password=postgres dbname=postgres",
            self.host, self.port
        )
    }

    async fn wait_for_ready(&self) -> Result<()> {
        let conn_str = self.connection_string();
        for attempt in 1..=60 {
            match tokio_postgres::connect(&conn_str, NoTls).await {
                Ok(_) => {
                    debug!("PostgreSQL ready after {} attempts", attempt);
                    return Ok(());
                }
                Err(e) => {
                    if attempt % 10 == 0 {
                        info!("Waiting for PostgreSQL (attempt {}/60): {}", attempt, e);
                    }
                    sleep(Duration::from_millis(500)).await;
                }
            }
        }
        anyhow::bail!("PostgreSQL did not become ready in time")
    }

    /// A fresh session. Each concurrently scanned split needs its own.
    pub async fn new_client(&self) -> Result<Arc<Client>> {
        let client = rivven_snapshot::postgres::connect(&self.connection_string()).await?;
        Ok(client)
    }

    pub async fn execute(&self, sql: &str) -> Result<()> {
        let client = self.new_client().await?;
        client
            .batch_execute(sql)
            .await
            .with_context(|| format!("Failed to execute: {sql}"))?;
        Ok(())
    }
}

/// Number of cursors open in the client's session.
pub async fn open_cursors(client: &Client) -> Result<i64> {
    let row = client
        .query_one("SELECT count(*) FROM pg_cursors", &[])
        .await?;
    Ok(row.get(0))
}

/// Whether the client's session is idle inside a transaction.
pub async fn in_transaction(admin: &Client, pid: i32) -> Result<bool> {
    let row = admin
        .query_one(
            "SELECT state FROM pg_stat_activity WHERE pid = $1",
            &[&pid],
        )
        .await?;
    let state: Option<String> = row.get(0);
    Ok(state.as_deref() == Some("idle in transaction"))
}

pub async fn backend_pid(client: &Client) -> Result<i32> {
    Ok(client.query_one("SELECT pg_backend_pid()", &[]).await?.get(0))
}
