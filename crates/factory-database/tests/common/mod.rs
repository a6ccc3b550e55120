//! Shared fixtures for database integration tests.
#![allow(dead_code)]

use factory_database::{connect, ConnectionOptions, ConnectionOptionsBuilder, PoolHandle};
use std::path::PathBuf;
use std::time::Duration;
use tempfile::{tempdir, TempDir};

/// On-disk database in a temporary directory.
pub struct TestDb {
    pub temp_dir: TempDir,
    pub path: PathBuf,
}

impl TestDb {
    pub fn new() -> Self {
        factory_common_log::init_for_tests();
        let temp_dir = tempdir().expect("Failed to create temp dir");
        let path = temp_dir.path().join("test.db");
        Self { temp_dir, path }
    }

    pub fn dsn(&self) -> String {
        format!("sqlite://{}", self.path.display())
    }

    pub fn options(&self) -> ConnectionOptionsBuilder {
        ConnectionOptions::builder()
            .dsn(self.dsn())
            .max_connections(4)
            .busy_timeout(Duration::from_millis(250))
            .connect_timeout(Duration::from_secs(10))
    }

    pub async fn connect(&self) -> PoolHandle {
        let options = self.options().build().expect("valid options");
        connect(&options).await.expect("Failed to connect")
    }

    /// Connected pool with `accounts(id, balance)` holding (1, 100), (2, 0).
    pub async fn accounts(&self) -> PoolHandle {
        let pool = self.connect().await;
        let db = pool.handle();
        db.exec(
            "CREATE TABLE accounts (id INTEGER PRIMARY KEY, balance INTEGER NOT NULL)",
            &[],
        )
        .await
        .expect("create accounts");
        db.exec("INSERT INTO accounts (id, balance) VALUES (1, 100), (2, 0)", &[])
            .await
            .expect("seed accounts");
        pool
    }
}

pub async fn balance(pool: &PoolHandle, id: i64) -> i64 {
    let row: Option<(i64,)> = pool
        .handle()
        .get("SELECT balance FROM accounts WHERE id = ?", &factory_database::args![id])
        .await
        .expect("read balance");
    row.expect("account exists").0
}

/// Wait until every open connection is back in the pool.
pub async fn wait_until_idle(pool: &PoolHandle) {
    tokio::time::timeout(Duration::from_secs(5), async {
        loop {
            let stats = pool.stats();
            if stats.idle == stats.size as usize {
                return;
            }
            tokio::time::sleep(Duration::from_millis(10)).await;
        }
    })
    .await
    .expect("connections were not returned to the pool");
}
