//! PostgreSQL containers for adapter tests
//!
//! Every `TestDatabase` owns a fresh container with the migrations applied,
//! so tests never observe each other's identifier allocations.

use sqlx::postgres::PgPoolOptions;
use sqlx::PgPool;
use std::time::Duration;
use testcontainers::{runners::AsyncRunner, ContainerAsync};
use testcontainers_modules::postgres::Postgres;

pub type BoxError = Box<dyn std::error::Error + Send + Sync>;

const USER: &str = "intake";
const PASSWORD: &str = "intake";
const DATABASE: &str = "claims_intake_test";

/// Tables holding test data, children first
const DATA_TABLES: [&str; 7] = [
    "upload_records",
    "watermark_consumption",
    "batch_watermarks",
    "batch_reservations",
    "staged_claim_services",
    "staged_claims",
    "channels",
];

fn connection_url(host: &str, port: u16) -> String {
    format!("postgres://{USER}:{PASSWORD}@{host}:{port}/{DATABASE}")
}

pub struct TestDatabase {
    _container: ContainerAsync<Postgres>,
    url: String,
    pool: PgPool,
}

impl TestDatabase {
    /// Starts a container and applies the migrations
    pub async fn start() -> Result<Self, BoxError> {
        let container = Postgres::default()
            .with_user(USER)
            .with_password(PASSWORD)
            .with_db_name(DATABASE)
            .start()
            .await?;
        let host = container.get_host().await?.to_string();
        let port = container.get_host_port_ipv4(5432).await?;
        let url = connection_url(&host, port);

        let pool = PgPoolOptions::new()
            .max_connections(8)
            .acquire_timeout(Duration::from_secs(30))
            .connect(&url)
            .await?;
        infra_db::run_migrations(&pool).await?;

        Ok(Self {
            _container: container,
            url,
            pool,
        })
    }

    pub fn pool(&self) -> &PgPool {
        &self.pool
    }

    pub fn url(&self) -> &str {
        &self.url
    }

    /// Removes all rows and rewinds the staging identifier allocators
    ///
    /// Item types are kept; seeding them is idempotent.
    pub async fn reset(&self) -> Result<(), BoxError> {
        let mut tx = self.pool.begin().await?;
        for table in DATA_TABLES {
            sqlx::query(&format!("TRUNCATE TABLE {table} RESTART IDENTITY CASCADE"))
                .execute(&mut *tx)
                .await?;
        }
        sqlx::query("UPDATE id_allocators SET last_reserved = 0")
            .execute(&mut *tx)
            .await?;
        tx.commit().await?;
        Ok(())
    }
}

/// Declares an ignored test that runs against its own container
#[macro_export]
macro_rules! db_test {
    ($name:ident, |$pool:ident| $body:block) => {
        #[tokio::test]
        #[ignore = "requires docker"]
        async fn $name() {
            let db = $crate::database::TestDatabase::start()
                .await
                .expect("test database should start");
            let $pool = db.pool().clone();
            $body
        }
    };
}
