//! deadpool manager for libsql connections.

use deadpool::managed::{self, Pool, RecycleError, RecycleResult};
use libsql::{Connection, Database, Error as LibsqlError};

pub struct LibsqlManager {
    database: Database,
}

impl LibsqlManager {
    pub fn new(database: Database) -> Self {
        Self { database }
    }
}

impl managed::Manager for LibsqlManager {
    type Type = Connection;
    type Error = LibsqlError;

    async fn create(&self) -> Result<Self::Type, Self::Error> {
        self.database.connect()
    }

    async fn recycle(
        &self,
        conn: &mut Self::Type,
        _: &managed::Metrics,
    ) -> RecycleResult<Self::Error> {
        // Liveness probe before handing the connection back out.
        conn.query("SELECT 1", ())
            .await
            .map_err(RecycleError::Backend)?
            .next()
            .await
            .map_err(RecycleError::Backend)?;
        Ok(())
    }
}

pub type LibsqlPool = Pool<LibsqlManager>;
