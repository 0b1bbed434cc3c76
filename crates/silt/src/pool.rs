//! Connection pooling.
//!
//! A [`Datastore`](crate::Datastore) owns one bounded deadpool of
//! long-lived connections. Two lease patterns exist:
//!
//! - a plain connection lease for single-statement reads, and
//! - a cursor lease: one `tokio_postgres` transaction, committed on
//!   success. Dropping the transaction without committing rolls back,
//!   which also covers a task cancelled while holding the lease.

use deadpool_postgres::{Manager, ManagerConfig, Pool, RecyclingMethod};
use tokio_postgres::NoTls;

use crate::config::DatastoreConfig;
use crate::error::{Error, Result};

/// Build the process-wide pool for one database.
pub(crate) fn build_pool(config: &DatastoreConfig, dbname: &str) -> Result<Pool> {
    let mgr = Manager::from_config(
        config.pg_config(dbname),
        NoTls,
        ManagerConfig {
            recycling_method: RecyclingMethod::Fast,
        },
    );
    Pool::builder(mgr)
        .max_size(config.connection_pool_max)
        .build()
        .map_err(|e| Error::Pool(e.to_string()))
}

/// Open a single out-of-pool connection, e.g. against the default
/// database while creating a missing one. The driver task is spawned and
/// ends when the client drops.
pub(crate) async fn connect_single(
    config: &DatastoreConfig,
    dbname: &str,
) -> Result<tokio_postgres::Client> {
    let (client, connection) = config
        .pg_config(dbname)
        .connect(NoTls)
        .await
        .map_err(|e| Error::Unavailable(e.to_string()))?;
    tokio::spawn(async move {
        if let Err(e) = connection.await {
            tracing::debug!(error = %e, "connection driver finished with error");
        }
    });
    Ok(client)
}
