use std::collections::HashMap;
use std::hash::BuildHasher;

use async_trait::async_trait;
use postgres_types::{ToSql, Type};
use tokio_postgres::{NoTls, Row, Statement, Transaction};

use crate::error::{AppError, DbError, StorageContext};

pub mod pool;

pub struct CrcBuilder;

impl BuildHasher for CrcBuilder {
    type Hasher = crc32fast::Hasher;

    fn build_hasher(&self) -> crc32fast::Hasher {
        crc32fast::Hasher::new()
    }
}

/// A connection with its own prepared statement cache.
pub struct Client {
    client: tokio_postgres::Client,
    prepared: HashMap<&'static str, Statement, CrcBuilder>,
}

impl Client {
    pub async fn with_config(config: &tokio_postgres::Config) -> Result<Client, DbError> {
        let (client, connection) = config.connect(NoTls).await?;
        tokio::spawn(async move {
            if let Err(e) = connection.await {
                log::error!("database connection error: {}", e);
            }
        });
        let prepared = HashMap::with_capacity_and_hasher(32, CrcBuilder);
        Ok(Client { client, prepared })
    }

    #[cfg(test)]
    pub async fn connect(url: &str) -> Result<Client, DbError> {
        let config: tokio_postgres::Config = url.parse()?;
        Client::with_config(&config).await
    }

    pub fn is_closed(&self) -> bool {
        self.client.is_closed()
    }

    pub async fn transaction(&mut self) -> Result<Transaction<'_>, AppError> {
        self.client.transaction().await.context("starting a transaction")
    }

    async fn prepare_typed(&mut self, source: &'static str, types: &[Type]) -> Result<Statement, DbError> {
        if let Some(statement) = self.prepared.get(source) {
            return Ok(statement.clone());
        }
        let statement = self.client.prepare_typed(source, types).await?;
        self.prepared.insert(source, statement.clone());
        Ok(statement)
    }
}

/// Anything statements can be run against: a pooled client or an open transaction.
#[async_trait]
pub trait Querist: Send {
    async fn query_typed(
        &mut self,
        source: &'static str,
        types: &[Type],
        params: &[&(dyn ToSql + Sync)],
    ) -> Result<Vec<Row>, DbError>;

    async fn execute_typed(
        &mut self,
        source: &'static str,
        types: &[Type],
        params: &[&(dyn ToSql + Sync)],
    ) -> Result<u64, DbError>;

    async fn query(&mut self, source: &'static str, params: &[&(dyn ToSql + Sync)]) -> Result<Vec<Row>, DbError> {
        self.query_typed(source, &[], params).await
    }

    async fn query_one(&mut self, source: &'static str, params: &[&(dyn ToSql + Sync)]) -> Result<Option<Row>, DbError> {
        let rows = self.query_typed(source, &[], params).await?;
        Ok(rows.into_iter().next())
    }

    async fn execute(&mut self, source: &'static str, params: &[&(dyn ToSql + Sync)]) -> Result<u64, DbError> {
        self.execute_typed(source, &[], params).await
    }
}

#[async_trait]
impl Querist for Client {
    async fn query_typed(
        &mut self,
        source: &'static str,
        types: &[Type],
        params: &[&(dyn ToSql + Sync)],
    ) -> Result<Vec<Row>, DbError> {
        let statement = self.prepare_typed(source, types).await?;
        self.client.query(&statement, params).await
    }

    async fn execute_typed(
        &mut self,
        source: &'static str,
        types: &[Type],
        params: &[&(dyn ToSql + Sync)],
    ) -> Result<u64, DbError> {
        let statement = self.prepare_typed(source, types).await?;
        self.client.execute(&statement, params).await
    }
}

#[async_trait]
impl<'a> Querist for Transaction<'a> {
    async fn query_typed(
        &mut self,
        source: &'static str,
        types: &[Type],
        params: &[&(dyn ToSql + Sync)],
    ) -> Result<Vec<Row>, DbError> {
        let statement = Transaction::prepare_typed(self, source, types).await?;
        Transaction::query(self, &statement, params).await
    }

    async fn execute_typed(
        &mut self,
        source: &'static str,
        types: &[Type],
        params: &[&(dyn ToSql + Sync)],
    ) -> Result<u64, DbError> {
        let statement = Transaction::prepare_typed(self, source, types).await?;
        Transaction::execute(self, &statement, params).await
    }
}

pub struct PostgresFactory {
    config: tokio_postgres::Config,
}

impl PostgresFactory {
    pub fn new(url: &str) -> Result<PostgresFactory, DbError> {
        let config = url.parse()?;
        Ok(PostgresFactory { config })
    }
}

#[async_trait]
impl pool::Factory for PostgresFactory {
    type Output = Client;
    type Error = DbError;

    async fn make(&self) -> Result<Client, DbError> {
        Client::with_config(&self.config).await
    }

    fn is_broken(&self, client: &Client) -> bool {
        client.is_closed()
    }
}

pub type Pool = pool::Pool<PostgresFactory>;
pub type Connect = pool::Connect<PostgresFactory>;

impl pool::Pool<PostgresFactory> {
    pub async fn connect(&self) -> Result<Connect, AppError> {
        self.get().await.context("connecting to the database")
    }
}

pub async fn connect_pool(url: &str, size: usize) -> Result<Pool, AppError> {
    let factory = PostgresFactory::new(url).context("parsing the database url")?;
    let pool = Pool::with_num(size, factory)
        .await
        .context("opening the connection pool")?;
    log::info!("connected to the database with {} connections", size);
    Ok(pool)
}

#[cfg(test)]
pub async fn test_client() -> Client {
    dotenv::dotenv().ok();
    let url = std::env::var("DATABASE_URL").expect("DATABASE_URL must be set for database tests");
    Client::connect(&url).await.expect("failed to connect to the test database")
}

#[cfg(test)]
pub async fn test_pool() -> Pool {
    dotenv::dotenv().ok();
    let url = std::env::var("DATABASE_URL").expect("DATABASE_URL must be set for database tests");
    connect_pool(&url, 2).await.expect("failed to connect to the test database")
}

#[tokio::test]
#[ignore = "requires a PostgreSQL database at DATABASE_URL"]
async fn querist_test() {
    let mut client = test_client().await;
    let row = client.query_one("SELECT 1::BIGINT + $1", &[&41i64]).await.unwrap().unwrap();
    assert_eq!(row.get::<_, i64>(0), 42);
    // the second run hits the statement cache
    let row = client.query_one("SELECT 1::BIGINT + $1", &[&1i64]).await.unwrap().unwrap();
    assert_eq!(row.get::<_, i64>(0), 2);

    let mut trans = client.transaction().await.unwrap();
    let affected = trans.execute("SELECT 1", &[]).await.unwrap();
    assert_eq!(affected, 1);
}
