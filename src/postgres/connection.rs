use futures::{StreamExt, TryStreamExt};
use std::time::Duration;
use tokio_postgres::types::{ToSql, Type};
use tokio_postgres::{Client, Config, NoTls, Statement};
use tracing::{debug, error, info, warn};

use super::types::{convert_row, text_projection};
use crate::config::PostgresConfig;
use crate::source::{RowSource, RowStream};
use crate::{Error, Result};

/// Runs the poll query against PostgreSQL.
///
/// The connection is opened lazily on the first `execute`, reused while it
/// stays healthy, and dropped after any failure so the next call reconnects.
pub struct PostgresSource {
    config: Config,
    connection: Option<Connection>,
}

struct Connection {
    client: Client,
    connection_task: tokio::task::JoinHandle<()>,
    /// The last query text and the statement prepared for it.
    prepared: Option<(String, Statement)>,
}

impl Connection {
    fn close(self) {
        self.connection_task.abort();
    }
}

impl PostgresSource {
    pub fn new(config: &PostgresConfig) -> Self {
        let mut pg = Config::new();
        pg.host(&config.host)
            .port(config.port)
            .user(&config.username)
            .dbname(&config.database)
            .application_name("pg-poller")
            .connect_timeout(Duration::from_secs(config.connect_timeout_secs));
        if let Some(password) = &config.password {
            pg.password(password);
        }

        Self::from_config(pg)
    }

    pub fn from_config(config: Config) -> Self {
        Self {
            config,
            connection: None,
        }
    }

    pub fn is_connected(&self) -> bool {
        self.connection
            .as_ref()
            .is_some_and(|conn| !conn.client.is_closed())
    }

    async fn client(&mut self) -> Result<&Client> {
        let stale = self
            .connection
            .as_ref()
            .is_some_and(|conn| conn.client.is_closed());
        if stale {
            warn!("PostgreSQL connection closed, reconnecting");
            self.disconnect();
        }

        if self.connection.is_none() {
            info!("Connecting to PostgreSQL");
            let (client, connection) = self.config.connect(NoTls).await?;
            let connection_task = tokio::spawn(async move {
                if let Err(e) = connection.await {
                    error!("Connection error: {}", e);
                }
            });
            info!("Successfully connected to PostgreSQL");
            self.connection = Some(Connection {
                client,
                connection_task,
                prepared: None,
            });
        }

        self.connection
            .as_ref()
            .map(|conn| &conn.client)
            .ok_or_else(|| Error::Connection("no PostgreSQL connection".to_string()))
    }

    /// Prepares `query` once per connection. Columns of types the row
    /// converter cannot read are cast to text server-side.
    async fn prepare(&mut self, query: &str) -> Result<Statement> {
        self.client().await?;
        let conn = self
            .connection
            .as_mut()
            .ok_or_else(|| Error::Connection("no PostgreSQL connection".to_string()))?;

        if let Some((cached, statement)) = &conn.prepared {
            if cached == query {
                return Ok(statement.clone());
            }
        }

        let statement = conn.client.prepare(query).await?;
        let columns: Vec<(&str, &Type)> = statement
            .columns()
            .iter()
            .map(|column| (column.name(), column.type_()))
            .collect();
        let statement = match text_projection(query, &columns) {
            Some(rewritten) => {
                debug!(query = %rewritten, "Casting unsupported columns to text");
                conn.client.prepare(&rewritten).await?
            }
            None => statement,
        };

        conn.prepared = Some((query.to_string(), statement.clone()));
        Ok(statement)
    }

    async fn start_query(&mut self, query: &str) -> Result<tokio_postgres::RowStream> {
        let statement = self.prepare(query).await?;
        let client = self.client().await?;
        Ok(client.query_raw(&statement, no_params(&[])).await?)
    }

    fn disconnect(&mut self) {
        if let Some(conn) = self.connection.take() {
            conn.close();
        }
    }
}

fn no_params<'a>(
    params: &'a [&'a (dyn ToSql + Sync)],
) -> impl ExactSizeIterator<Item = &'a dyn ToSql> + 'a {
    params.iter().map(|p| *p as _)
}

#[async_trait::async_trait]
impl RowSource for PostgresSource {
    async fn execute(&mut self, query: &str) -> Result<RowStream> {
        match self.start_query(query).await {
            Ok(rows) => {
                debug!("Query started");
                let stream = rows
                    .map_err(Error::from)
                    .and_then(|row| async move { convert_row(&row) });
                Ok(stream.boxed())
            }
            Err(e) => {
                self.disconnect();
                Err(e)
            }
        }
    }

    async fn close(&mut self) {
        if self.connection.is_some() {
            info!("Closing PostgreSQL connection");
            self.disconnect();
        }
    }
}

impl Drop for PostgresSource {
    fn drop(&mut self) {
        self.disconnect();
    }
}
