pub mod registry;
pub mod system;

use r2d2::{Pool, PooledConnection};
use r2d2_sqlite::SqliteConnectionManager;
use tracing::*;

use crate::config::Config;
use crate::errors::Result;

pub use registry::{Registry, SchemaRecord};

/// Connection checked out of the pool. Goes back to the pool when dropped.
pub type Connection = PooledConnection<SqliteConnectionManager>;

/// Handle to the relational datastore. Cheap to clone, all clones share one pool.
#[derive(Clone)]
pub struct Database {
    pool: Pool<SqliteConnectionManager>,
}

impl Database {
    pub fn open(config: &Config) -> Result<Self> {
        let busy_timeout = config.busy_timeout;
        let manager = SqliteConnectionManager::file(&config.database_path).with_init(move |conn| {
            conn.busy_timeout(busy_timeout)?;
            conn.pragma_update(None, "foreign_keys", true)
        });
        let pool = Pool::builder().max_size(config.pool_size).build(manager)?;
        let database = Database { pool };
        {
            let conn = database.connection()?;
            let journal_mode: String =
                conn.pragma_update_and_check(None, "journal_mode", "WAL", |row| row.get(0))?;
            debug!(
                "Opened database `{}` in journal mode {}",
                config.database_path.display(),
                journal_mode
            );
        }
        system::bootstrap(&database)?;
        Ok(database)
    }

    pub fn connection(&self) -> Result<Connection> {
        Ok(self.pool.get()?)
    }
}

/// Whether a table of this name exists, according to the datastore's own catalog.
pub fn table_exists(conn: &rusqlite::Connection, table_name: &str) -> Result<bool> {
    Ok(conn.query_row(
        "SELECT EXISTS (SELECT 1 FROM sqlite_master WHERE type = 'table' AND name = ?1)",
        [table_name],
        |row| row.get(0),
    )?)
}

/// Names of all tables in the datastore, system ones included.
pub fn table_names(conn: &rusqlite::Connection) -> Result<Vec<String>> {
    let mut statement =
        conn.prepare("SELECT name FROM sqlite_master WHERE type = 'table' ORDER BY name")?;
    let names = statement
        .query_map([], |row| row.get(0))?
        .collect::<rusqlite::Result<Vec<String>>>()?;
    Ok(names)
}
