//! The base datastore: database and table lifecycle, raw document CRUD
//! with revision control, attachment sidecars, and view execution.
//!
//! Documents are JSON maps with reserved `_id` and `_rev` keys mirrored
//! into the row columns. Every mutation goes through a cursor lease (one
//! transaction); dropping the lease without committing is the rollback
//! path, so a cancelled task releases its pool slot cleanly.

use std::sync::Arc;

use deadpool_postgres::Pool;
use serde_json::Value as Json;
use tokio_postgres::Transaction;
use tracing::{Instrument, debug, info};

use crate::config::{DatastoreConfig, Profile};
use crate::error::{self, Error, Result};
use crate::pool::{build_pool, connect_single};
use crate::profile::{self, TableKind};
use crate::sql::{BuiltQuery, SqlBuilder, SqlValue, bind_params};
use crate::tracer::StatementTracer;
use crate::views::{PlannedView, View, ViewFilter, ViewRow, map_row};

/// A document body: a JSON map carrying `_id` and `_rev`.
pub type Doc = serde_json::Map<String, Json>;

pub(crate) const ID_FIELD: &str = "_id";
pub(crate) const REV_FIELD: &str = "_rev";

const DB_INIT_SQL: &str = include_str!("../res/db_init.sql");

/// Resolve the embedded DDL script for a profile.
fn profile_script(profile: Profile) -> &'static str {
    match profile {
        Profile::Basic => include_str!("../res/profile_basic.sql"),
        Profile::Resources => include_str!("../res/profile_resources.sql"),
        Profile::Directory => include_str!("../res/profile_directory.sql"),
        Profile::Events => include_str!("../res/profile_events.sql"),
    }
}

/// Object-kind hint steering reads and deletes to a sidecar table.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DocKind {
    Association,
    DirEntry,
}

/// Reference to a document by id, or by value when the caller wants the
/// revision asserted against the stored row.
#[derive(Debug, Clone, Copy)]
pub enum DocRef<'a> {
    Id(&'a str),
    Doc(&'a Doc),
}

impl<'a> From<&'a str> for DocRef<'a> {
    fn from(id: &'a str) -> Self {
        DocRef::Id(id)
    }
}

impl<'a> From<&'a Doc> for DocRef<'a> {
    fn from(doc: &'a Doc) -> Self {
        DocRef::Doc(doc)
    }
}

/// Attachment payload for create/update.
#[derive(Debug, Clone)]
pub struct AttachmentData {
    pub data: Vec<u8>,
    /// Stored and returned verbatim; never parsed.
    pub content_type: Option<String>,
}

/// One row of `list_attachments`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AttachmentInfo {
    pub name: String,
    pub content_type: Option<String>,
}

/// Generate a fresh 32-hex document id.
pub fn get_unique_id() -> String {
    uuid::Uuid::new_v4().simple().to_string()
}

fn doc_id_of(doc: &Doc) -> Result<&str> {
    doc.get(ID_FIELD)
        .and_then(Json::as_str)
        .ok_or_else(|| Error::BadRequest("doc must have '_id'".into()))
}

fn doc_rev_of(doc: &Doc) -> Result<i64> {
    let rev = doc
        .get(REV_FIELD)
        .ok_or_else(|| Error::BadRequest("doc must have '_rev'".into()))?;
    match rev {
        Json::String(s) => s.parse().map_err(|_| {
            Error::BadRequest(format!("doc revision is not an integer: {s}"))
        }),
        Json::Number(n) => n
            .as_i64()
            .ok_or_else(|| Error::BadRequest(format!("doc revision is not an integer: {n}"))),
        _ => Err(Error::BadRequest("doc revision is not an integer".into())),
    }
}

/// A database name goes into `CREATE DATABASE` unparameterized, so it is
/// held to strict identifier rules.
fn validate_db_ident(name: &str) -> Result<()> {
    let mut chars = name.chars();
    let head_ok = chars
        .next()
        .is_some_and(|c| c.is_ascii_lowercase() || c == '_');
    if !head_ok
        || !name
            .chars()
            .all(|c| c.is_ascii_lowercase() || c.is_ascii_digit() || c == '_')
    {
        return Err(Error::BadRequest(format!("invalid database name: {name}")));
    }
    Ok(())
}

/// Standalone datastore over one PostgreSQL database.
///
/// Uses a bounded connection pool so concurrent tasks interleave safely;
/// each task holds at most one cursor lease at a time.
pub struct Datastore {
    config: DatastoreConfig,
    pool: Pool,
    tracer: Arc<StatementTracer>,
    datastore_name: Option<String>,
    profile: Profile,
}

impl Datastore {
    /// Connect, creating and initializing the database on first failure.
    pub async fn new(datastore_name: Option<&str>, config: DatastoreConfig) -> Result<Self> {
        Self::with_tracer(
            datastore_name,
            config,
            Arc::new(StatementTracer::new(false)),
        )
        .await
    }

    pub async fn with_tracer(
        datastore_name: Option<&str>,
        config: DatastoreConfig,
        tracer: Arc<StatementTracer>,
    ) -> Result<Self> {
        let database = config.scoped_database();
        let pool = build_pool(&config, &database)?;

        if let Err(first) = pool.get().await {
            info!(database = %database, error = %first, "database not reachable, creating");
            Self::create_database(&config, &database, &tracer).await?;
            // one automatic attempt only; a second failure is terminal
            pool.get()
                .await
                .map_err(|e| Error::Unavailable(e.to_string()))?;
        }

        let datastore_name = match datastore_name {
            Some(name) => Some(config.scoped_datastore_name(name)?),
            None => None,
        };
        let profile = config.profile;
        let ds = Datastore {
            config,
            pool,
            tracer,
            datastore_name,
            profile,
        };

        if ds.datastore_name.is_some() && !ds.datastore_exists(None).await? {
            ds.create_datastore(None, None).await?;
        }

        info!(
            database = %database,
            datastore = ds.datastore_name.as_deref().unwrap_or("-"),
            profile = ds.profile.as_str(),
            "datastore instance ready"
        );
        Ok(ds)
    }

    async fn create_database(
        config: &DatastoreConfig,
        database: &str,
        tracer: &StatementTracer,
    ) -> Result<()> {
        validate_db_ident(database)?;
        info!(database = %database, "creating database");
        let admin = connect_single(config, &config.default_database).await?;
        let stmt = format!("CREATE DATABASE {database}");
        admin.batch_execute(&stmt).await?;
        tracer.record(&stmt, 0);
        drop(admin);

        let client = connect_single(config, database).await?;
        client.batch_execute(DB_INIT_SQL).await?;
        tracer.record("EXECUTE db_init.sql", 0);
        debug!(database = %database, "database initialized");
        Ok(())
    }

    /// Drop the configured (scoped) database. Companion to the automatic
    /// create path; intended for tests and teardown tooling.
    pub async fn drop_database(config: &DatastoreConfig) -> Result<()> {
        let database = config.scoped_database();
        validate_db_ident(&database)?;
        let admin = connect_single(config, &config.default_database).await?;
        admin
            .batch_execute(&format!("DROP DATABASE IF EXISTS {database}"))
            .await?;
        info!(database = %database, "dropped database");
        Ok(())
    }

    /// Close the pool; subsequent operations fail `Unavailable`.
    pub fn close(&self) {
        self.pool.close();
    }

    pub fn tracer(&self) -> &Arc<StatementTracer> {
        &self.tracer
    }

    pub fn profile(&self) -> Profile {
        self.profile
    }

    pub fn datastore_name(&self) -> Option<&str> {
        self.datastore_name.as_deref()
    }

    pub(crate) fn resolve_name(&self, datastore_name: Option<&str>) -> Result<String> {
        match datastore_name {
            Some(name) => self.config.scoped_datastore_name(name),
            None => self
                .datastore_name
                .clone()
                .ok_or_else(|| Error::BadRequest("no datastore name provided".into())),
        }
    }

    async fn client(&self) -> Result<deadpool_postgres::Object> {
        self.pool.get().await.map_err(Into::into)
    }

    /// Run a built query on a pooled connection and trace it.
    pub(crate) async fn query_built(&self, q: &BuiltQuery) -> Result<Vec<tokio_postgres::Row>> {
        let conn = self.client().await?;
        let params = bind_params(&q.params);
        let refs: Vec<&(dyn tokio_postgres::types::ToSql + Sync)> = params
            .iter()
            .map(|p| p as &(dyn tokio_postgres::types::ToSql + Sync))
            .collect();
        let span = tracing::debug_span!("store.query", sql = %q.sql);
        let rows = conn
            .query(&q.sql, &refs)
            .instrument(span)
            .await
            .map_err(error::classify)?;
        self.tracer.record(&q.sql, rows.len() as u64);
        Ok(rows)
    }

    async fn execute_in(&self, tx: &Transaction<'_>, q: &BuiltQuery) -> Result<u64> {
        let params = bind_params(&q.params);
        let refs: Vec<&(dyn tokio_postgres::types::ToSql + Sync)> = params
            .iter()
            .map(|p| p as &(dyn tokio_postgres::types::ToSql + Sync))
            .collect();
        let span = tracing::debug_span!("store.execute", sql = %q.sql);
        let affected = tx
            .execute(&q.sql, &refs)
            .instrument(span)
            .await
            .map_err(error::classify)?;
        self.tracer.record(&q.sql, affected);
        Ok(affected)
    }

    // -------------------------------------------------------------------
    // Datastore (table set) lifecycle

    /// Create the table set for a datastore from its profile DDL.
    pub async fn create_datastore(
        &self,
        datastore_name: Option<&str>,
        profile: Option<Profile>,
    ) -> Result<()> {
        let ds_name = self.resolve_name(datastore_name)?;
        let profile = profile.unwrap_or(self.profile);
        info!(datastore = %ds_name, profile = profile.as_str(), "creating datastore");

        let sql = profile_script(profile).replace("{ds}", &ds_name);
        let mut conn = self.client().await?;
        let client = &mut **conn;
        let tx = client.transaction().await.map_err(error::classify)?;
        tx.batch_execute(&sql).await.map_err(|e| {
            if e.code() == Some(&tokio_postgres::error::SqlState::DUPLICATE_TABLE) {
                Error::BadRequest(format!("datastore with name {ds_name} already exists"))
            } else {
                error::classify(e)
            }
        })?;
        tx.commit().await.map_err(error::classify)?;
        self.tracer
            .record(&format!("EXECUTE {}", profile.script_name()), 0);
        debug!(datastore = %ds_name, "datastore created");
        Ok(())
    }

    /// Drop all tables of a datastore.
    pub async fn delete_datastore(&self, datastore_name: Option<&str>) -> Result<()> {
        let ds_name = self.resolve_name(datastore_name)?;
        info!(datastore = %ds_name, "deleting datastore");
        let mut conn = self.client().await?;
        let client = &mut **conn;
        let tx = client.transaction().await.map_err(error::classify)?;
        // sidecars first; CASCADE covers the attachment FK either way
        for kind in [
            TableKind::Att,
            TableKind::Assoc,
            TableKind::Dir,
            TableKind::Primary,
        ] {
            let stmt = format!(
                "DROP TABLE IF EXISTS \"{}\" CASCADE",
                kind.table_name(&ds_name)
            );
            tx.batch_execute(&stmt).await.map_err(error::classify)?;
            self.tracer.record(&stmt, 0);
        }
        tx.commit().await.map_err(error::classify)?;
        Ok(())
    }

    /// Truncate all tables of a datastore, keeping the schema.
    pub async fn clear_datastore(&self, datastore_name: Option<&str>) -> Result<()> {
        let ds_name = self.resolve_name(datastore_name)?;
        info!(datastore = %ds_name, "clearing datastore");
        let tables = self.existing_tables(&ds_name).await?;
        if tables.is_empty() {
            return Ok(());
        }
        let mut conn = self.client().await?;
        let client = &mut **conn;
        let tx = client.transaction().await.map_err(error::classify)?;
        for table in &tables {
            let stmt = format!("TRUNCATE TABLE \"{table}\" CASCADE");
            tx.batch_execute(&stmt).await.map_err(error::classify)?;
            self.tracer.record(&stmt, 0);
        }
        tx.commit().await.map_err(error::classify)?;
        Ok(())
    }

    async fn existing_tables(&self, ds_name: &str) -> Result<Vec<String>> {
        let mut b = SqlBuilder::new();
        b.push(
            "SELECT table_name FROM information_schema.tables \
             WHERE table_schema='public' AND table_name IN (",
        );
        for (i, kind) in [
            TableKind::Primary,
            TableKind::Assoc,
            TableKind::Att,
            TableKind::Dir,
        ]
        .iter()
        .enumerate()
        {
            if i > 0 {
                b.push(",");
            }
            b.push_param(kind.table_name(ds_name));
        }
        b.push(")");
        let rows = self.query_built(&b.finish()).await?;
        Ok(rows.iter().map(|r| r.get(0)).collect())
    }

    /// All primary tables in the database, suppressing sidecars.
    pub async fn list_datastores(&self) -> Result<Vec<String>> {
        let q = BuiltQuery {
            sql: "SELECT table_name FROM information_schema.tables WHERE table_schema='public'"
                .into(),
            params: vec![],
        };
        let rows = self.query_built(&q).await?;
        let list: Vec<String> = rows
            .iter()
            .map(|r| r.get::<_, String>(0))
            .filter(|t| {
                !t.ends_with("_assoc") && !t.ends_with("_att") && !t.ends_with("_dir")
            })
            .collect();
        debug!(count = list.len(), "list_datastores");
        Ok(list)
    }

    pub async fn datastore_exists(&self, datastore_name: Option<&str>) -> Result<bool> {
        let ds_name = self.resolve_name(datastore_name)?;
        let mut b = SqlBuilder::new();
        b.push("SELECT exists(SELECT * FROM information_schema.tables WHERE table_name=");
        b.push_param(ds_name.as_str());
        b.push(")");
        let rows = self.query_built(&b.finish()).await?;
        Ok(rows[0].get(0))
    }

    /// Placeholder parity with other datastore backends.
    pub async fn info_datastore(&self, datastore_name: Option<&str>) -> Result<Doc> {
        self.resolve_name(datastore_name)?;
        Ok(Doc::new())
    }

    // -------------------------------------------------------------------
    // Document operations

    /// All document ids in the primary table.
    pub async fn list_objects(&self) -> Result<Vec<String>> {
        let ds_name = self.resolve_name(None)?;
        let mut b = SqlBuilder::new();
        b.push("SELECT id FROM ");
        b.push_ident(&ds_name);
        let rows = self.query_built(&b.finish()).await?;
        Ok(rows.iter().map(|r| r.get(0)).collect())
    }

    /// Revision history is not retained; only HEAD exists.
    pub async fn list_object_revisions(&self, _object_id: &str) -> Result<Vec<String>> {
        self.resolve_name(None)?;
        Ok(Vec::new())
    }

    /// Create a document, assigning a fresh id when absent, and write any
    /// attachments after the primary row.
    pub async fn create_doc(
        &self,
        mut doc: Doc,
        object_id: Option<&str>,
        attachments: Option<Vec<(String, AttachmentData)>>,
    ) -> Result<(String, String)> {
        let ds_name = self.resolve_name(None)?;

        let (oid, version) = {
            let mut conn = self.client().await?;
            let client = &mut **conn;
            let tx = client.transaction().await.map_err(error::classify)?;
            let created = self.insert_doc(&tx, &ds_name, &mut doc, object_id).await?;
            tx.commit().await.map_err(error::classify)?;
            created
        };

        if let Some(attachments) = attachments {
            for (name, att) in attachments {
                self.create_attachment(
                    DocRef::Id(&oid),
                    &name,
                    &att.data,
                    att.content_type.as_deref(),
                )
                .await?;
            }
        }

        Ok((oid, version))
    }

    /// Bulk create with per-row savepoints: a duplicate id falls back to
    /// an update of that row while the surrounding transaction continues.
    pub async fn create_doc_mult(
        &self,
        docs: Vec<Doc>,
        object_ids: Option<Vec<String>>,
    ) -> Result<Vec<(bool, String, String)>> {
        if let Some(ids) = &object_ids {
            if ids.len() != docs.len() {
                return Err(Error::BadRequest("invalid object_ids".into()));
            }
        }
        if docs.is_empty() {
            return Ok(Vec::new());
        }
        debug!(count = docs.len(), "create_doc_mult");

        let ds_name = self.resolve_name(None)?;
        let mut conn = self.client().await?;
        let client = &mut **conn;
        let mut tx = client.transaction().await.map_err(error::classify)?;

        let mut results = Vec::with_capacity(docs.len());
        for (i, mut doc) in docs.into_iter().enumerate() {
            let object_id = object_ids.as_ref().map(|ids| ids[i].as_str());
            let sp = tx
                .savepoint("bulk_update")
                .await
                .map_err(error::classify)?;
            match self.insert_doc(&sp, &ds_name, &mut doc, object_id).await {
                Ok((id, rev)) => {
                    sp.commit().await.map_err(error::classify)?;
                    results.push((true, id, rev));
                }
                Err(Error::AlreadyExists(_)) => {
                    debug!(id = object_id.unwrap_or("-"), "doc exists, trying update");
                    sp.rollback().await.map_err(error::classify)?;
                    // the failed insert stamped `_rev` = "1"; the update
                    // proceeds from there and conflicts if the stored row
                    // has moved past it
                    let (id, rev) = self.update_doc_in(&tx, &ds_name, &mut doc).await?;
                    results.push((true, id, rev));
                }
                Err(e) => return Err(e),
            }
        }
        tx.commit().await.map_err(error::classify)?;

        Ok(results)
    }

    async fn insert_doc(
        &self,
        tx: &Transaction<'_>,
        ds_name: &str,
        doc: &mut Doc,
        object_id: Option<&str>,
    ) -> Result<(String, String)> {
        if !doc.contains_key(ID_FIELD) {
            let id = object_id.map(str::to_owned).unwrap_or_else(get_unique_id);
            doc.insert(ID_FIELD.into(), Json::String(id));
        }
        doc.insert(REV_FIELD.into(), Json::String("1".into()));
        let id = doc_id_of(doc)?.to_owned();

        let (kind, extra_cols) = profile::dispatch(self.profile, doc);
        let extras: Vec<(&str, SqlValue)> = extra_cols
            .iter()
            .filter_map(|col| profile::extra_value(doc, col).map(|v| (*col, v)))
            .collect();

        let mut b = SqlBuilder::new();
        b.push("INSERT INTO ");
        b.push_ident(&kind.table_name(ds_name));
        b.push(" (id, rev, doc");
        for (col, _) in &extras {
            b.push(", ");
            b.push(col);
        }
        b.push(") VALUES (");
        b.push_param(id.as_str());
        b.push(", 1, ");
        b.push_param(Json::Object(doc.clone()));
        for (_, value) in extras {
            b.push(", ");
            b.push_param(value);
        }
        b.push(")");
        let q = b.finish();

        match self.execute_in(tx, &q).await {
            Ok(_) => Ok((id, "1".into())),
            Err(Error::AlreadyExists(_)) => Err(Error::AlreadyExists(format!(
                "object with id {id} already exists"
            ))),
            Err(e) => Err(e),
        }
    }

    /// Read the document body. `object_kind` steers the lookup to a
    /// sidecar table.
    pub async fn read_doc(&self, doc_id: &str, object_kind: Option<DocKind>) -> Result<Doc> {
        let ds_name = self.resolve_name(None)?;
        let table = read_table(&ds_name, object_kind);
        let mut b = SqlBuilder::new();
        b.push("SELECT doc FROM ");
        b.push_ident(&table);
        b.push(" WHERE id=");
        b.push_param(doc_id);
        let rows = self.query_built(&b.finish()).await?;

        if rows.is_empty() {
            return Err(Error::NotFound(format!(
                "object with id {doc_id} does not exist"
            )));
        }
        if rows.len() > 1 {
            return Err(Error::Inconsistent(format!(
                "object with id {doc_id} has {} rows",
                rows.len()
            )));
        }
        let doc: Json = rows[0].get(0);
        doc.as_object().cloned().ok_or_else(|| {
            Error::Inconsistent(format!("document {doc_id} body is not a map"))
        })
    }

    /// Fetch several documents preserving input order; a missing id
    /// leaves a `None` slot.
    pub async fn read_doc_mult(
        &self,
        object_ids: &[String],
        object_kind: Option<DocKind>,
    ) -> Result<Vec<Option<Doc>>> {
        if object_ids.is_empty() {
            return Ok(Vec::new());
        }
        let ds_name = self.resolve_name(None)?;
        let table = read_table(&ds_name, object_kind);
        let mut b = SqlBuilder::new();
        b.push("SELECT id, doc FROM ");
        b.push_ident(&table);
        b.push(" WHERE id IN (");
        for (i, id) in object_ids.iter().enumerate() {
            if i > 0 {
                b.push(",");
            }
            b.push_param(id.as_str());
        }
        b.push(")");
        let rows = self.query_built(&b.finish()).await?;

        let mut by_id = std::collections::HashMap::with_capacity(rows.len());
        for row in &rows {
            let id: String = row.get(0);
            let doc: Json = row.get(1);
            if let Some(doc) = doc.as_object() {
                by_id.insert(id, doc.clone());
            }
        }
        Ok(object_ids.iter().map(|id| by_id.get(id).cloned()).collect())
    }

    pub(crate) async fn read_doc_rev(&self, doc_id: &str) -> Result<String> {
        let ds_name = self.resolve_name(None)?;
        let mut b = SqlBuilder::new();
        b.push("SELECT rev FROM ");
        b.push_ident(&ds_name);
        b.push(" WHERE id=");
        b.push_param(doc_id);
        let rows = self.query_built(&b.finish()).await?;
        if rows.is_empty() {
            return Err(Error::NotFound(format!(
                "object with id {doc_id} does not exist"
            )));
        }
        let rev: i64 = rows[0].get(0);
        Ok(rev.to_string())
    }

    async fn assert_doc_rev(&self, doc: &Doc) -> Result<()> {
        let id = doc_id_of(doc)?;
        let stored = self.read_doc_rev(id).await?;
        let given = doc_rev_of(doc)?.to_string();
        if stored != given {
            return Err(Error::Conflict(format!(
                "object with id {id} revision conflict is={stored}, need={given}"
            )));
        }
        Ok(())
    }

    /// Revision-checked update: the row moves only if the caller supplied
    /// the current revision; otherwise `Conflict`.
    pub async fn update_doc(&self, mut doc: Doc) -> Result<(String, String)> {
        doc_id_of(&doc)?;
        doc_rev_of(&doc)?;
        let ds_name = self.resolve_name(None)?;

        let mut conn = self.client().await?;
        let client = &mut **conn;
        let tx = client.transaction().await.map_err(error::classify)?;
        let result = self.update_doc_in(&tx, &ds_name, &mut doc).await?;
        tx.commit().await.map_err(error::classify)?;
        Ok(result)
    }

    pub async fn update_doc_mult(&self, docs: Vec<Doc>) -> Result<Vec<(bool, String, String)>> {
        for doc in &docs {
            doc_id_of(doc)?;
            doc_rev_of(doc)?;
        }
        if docs.is_empty() {
            return Ok(Vec::new());
        }
        debug!(count = docs.len(), "update_doc_mult");
        let ds_name = self.resolve_name(None)?;

        let mut conn = self.client().await?;
        let client = &mut **conn;
        let tx = client.transaction().await.map_err(error::classify)?;
        let mut results = Vec::with_capacity(docs.len());
        for mut doc in docs {
            let (id, rev) = self.update_doc_in(&tx, &ds_name, &mut doc).await?;
            results.push((true, id, rev));
        }
        tx.commit().await.map_err(error::classify)?;
        Ok(results)
    }

    async fn update_doc_in(
        &self,
        tx: &Transaction<'_>,
        ds_name: &str,
        doc: &mut Doc,
    ) -> Result<(String, String)> {
        let id = doc_id_of(doc)?.to_owned();
        let old_rev = doc_rev_of(doc)?;
        let new_rev = old_rev + 1;
        doc.insert(REV_FIELD.into(), Json::String(new_rev.to_string()));

        let (kind, extra_cols) = profile::dispatch(self.profile, doc);
        let extras: Vec<(&str, SqlValue)> = extra_cols
            .iter()
            .filter_map(|col| profile::extra_value(doc, col).map(|v| (*col, v)))
            .collect();

        let mut b = SqlBuilder::new();
        b.push("UPDATE ");
        b.push_ident(&kind.table_name(ds_name));
        b.push(" SET doc=");
        b.push_param(Json::Object(doc.clone()));
        b.push(", rev=");
        b.push_param(new_rev);
        for (col, value) in extras {
            b.push(", ");
            b.push(col);
            b.push("=");
            b.push_param(value);
        }
        b.push(" WHERE id=");
        b.push_param(id.as_str());
        b.push(" AND rev=");
        b.push_param(old_rev);
        let q = b.finish();

        let affected = self.execute_in(tx, &q).await?;
        if affected == 0 {
            return Err(Error::Conflict(format!(
                "object with id {id} revision conflict"
            )));
        }
        Ok((id, new_rev.to_string()))
    }

    /// Delete by id. The DIRECTORY profile and an explicit kind hint steer
    /// to the matching sidecar.
    pub async fn delete_doc(&self, doc_id: &str, object_kind: Option<DocKind>) -> Result<()> {
        let ds_name = self.resolve_name(None)?;
        let table = delete_table(&ds_name, self.profile, object_kind);
        debug!(id = doc_id, table = %table, "delete_doc");

        let mut conn = self.client().await?;
        let client = &mut **conn;
        let tx = client.transaction().await.map_err(error::classify)?;
        self.delete_doc_in(&tx, &table, doc_id).await?;
        tx.commit().await.map_err(error::classify)?;
        Ok(())
    }

    pub async fn delete_doc_mult(
        &self,
        object_ids: &[String],
        object_kind: Option<DocKind>,
    ) -> Result<()> {
        if object_ids.is_empty() {
            return Ok(());
        }
        let ds_name = self.resolve_name(None)?;
        let table = delete_table(&ds_name, self.profile, object_kind);

        let mut conn = self.client().await?;
        let client = &mut **conn;
        let tx = client.transaction().await.map_err(error::classify)?;
        for id in object_ids {
            self.delete_doc_in(&tx, &table, id).await?;
        }
        tx.commit().await.map_err(error::classify)?;
        Ok(())
    }

    async fn delete_doc_in(&self, tx: &Transaction<'_>, table: &str, doc_id: &str) -> Result<()> {
        let mut b = SqlBuilder::new();
        b.push("DELETE FROM ");
        b.push_ident(table);
        b.push(" WHERE id=");
        b.push_param(doc_id);
        let affected = self.execute_in(tx, &b.finish()).await?;
        if affected == 0 {
            return Err(Error::NotFound(format!(
                "object with id {doc_id} does not exist"
            )));
        }
        Ok(())
    }

    // -------------------------------------------------------------------
    // Attachments

    /// Create a named attachment under an existing document.
    ///
    /// Passing a full document asserts its revision first. A missing
    /// parent surfaces as `NotFound` through the foreign key.
    pub async fn create_attachment(
        &self,
        doc: DocRef<'_>,
        name: &str,
        data: &[u8],
        content_type: Option<&str>,
    ) -> Result<()> {
        let ds_name = self.resolve_name(None)?;
        let doc_id = self.checked_doc_id(doc).await?;

        let mut b = SqlBuilder::new();
        b.push("INSERT INTO ");
        b.push_ident(&TableKind::Att.table_name(&ds_name));
        b.push(" (docid, rev, doc, name, content_type) VALUES (");
        b.push_param(doc_id.as_str());
        b.push(", 1, ");
        b.push_param(SqlValue::Bytes(data.to_vec()));
        b.push(", ");
        b.push_param(name);
        b.push(", ");
        b.push_param(opt_text(content_type));
        b.push(")");
        let q = b.finish();

        let mut conn = self.client().await?;
        let client = &mut **conn;
        let tx = client.transaction().await.map_err(error::classify)?;
        match self.execute_in(&tx, &q).await {
            Ok(_) => {}
            Err(Error::Postgres(e)) if error::is_foreign_key_violation(&e) => {
                return Err(Error::NotFound(format!(
                    "object with id {doc_id} does not exist"
                )));
            }
            Err(Error::AlreadyExists(_)) => {
                return Err(Error::AlreadyExists(format!(
                    "attachment {name} already exists on {doc_id}"
                )));
            }
            Err(e) => return Err(e),
        }
        tx.commit().await.map_err(error::classify)?;
        Ok(())
    }

    /// Replace an attachment's content, bumping its revision.
    pub async fn update_attachment(
        &self,
        doc: DocRef<'_>,
        name: &str,
        data: &[u8],
        content_type: Option<&str>,
    ) -> Result<()> {
        let ds_name = self.resolve_name(None)?;
        let doc_id = self.checked_doc_id(doc).await?;

        let mut b = SqlBuilder::new();
        b.push("UPDATE ");
        b.push_ident(&TableKind::Att.table_name(&ds_name));
        b.push(" SET rev=rev+1, doc=");
        b.push_param(SqlValue::Bytes(data.to_vec()));
        b.push(", content_type=");
        b.push_param(opt_text(content_type));
        b.push(" WHERE docid=");
        b.push_param(doc_id.as_str());
        b.push(" AND name=");
        b.push_param(name);
        let q = b.finish();

        let mut conn = self.client().await?;
        let client = &mut **conn;
        let tx = client.transaction().await.map_err(error::classify)?;
        let affected = self.execute_in(&tx, &q).await?;
        if affected == 0 {
            return Err(Error::NotFound(format!(
                "attachment {name} for object with id {doc_id} does not exist"
            )));
        }
        tx.commit().await.map_err(error::classify)?;
        Ok(())
    }

    pub async fn read_attachment(&self, doc: DocRef<'_>, name: &str) -> Result<Vec<u8>> {
        let ds_name = self.resolve_name(None)?;
        let doc_id = match doc {
            DocRef::Id(id) => id.to_owned(),
            DocRef::Doc(d) => doc_id_of(d)?.to_owned(),
        };

        let mut b = SqlBuilder::new();
        b.push("SELECT doc FROM ");
        b.push_ident(&TableKind::Att.table_name(&ds_name));
        b.push(" WHERE docid=");
        b.push_param(doc_id.as_str());
        b.push(" AND name=");
        b.push_param(name);
        let rows = self.query_built(&b.finish()).await?;

        match rows.first() {
            Some(row) => Ok(row.get::<_, Vec<u8>>(0)),
            None => Err(Error::NotFound(format!(
                "attachment {name} does not exist in document {ds_name}.{doc_id}"
            ))),
        }
    }

    pub async fn list_attachments(&self, doc: DocRef<'_>) -> Result<Vec<AttachmentInfo>> {
        let ds_name = self.resolve_name(None)?;
        let doc_id = match doc {
            DocRef::Id(id) => id.to_owned(),
            DocRef::Doc(d) => doc_id_of(d)?.to_owned(),
        };

        let mut b = SqlBuilder::new();
        b.push("SELECT name, content_type FROM ");
        b.push_ident(&TableKind::Att.table_name(&ds_name));
        b.push(" WHERE docid=");
        b.push_param(doc_id.as_str());
        let rows = self.query_built(&b.finish()).await?;

        Ok(rows
            .iter()
            .map(|r| AttachmentInfo {
                name: r.get(0),
                content_type: r.get(1),
            })
            .collect())
    }

    pub async fn delete_attachment(&self, doc: DocRef<'_>, name: &str) -> Result<()> {
        let ds_name = self.resolve_name(None)?;
        let doc_id = self.checked_doc_id(doc).await?;

        let mut b = SqlBuilder::new();
        b.push("DELETE FROM ");
        b.push_ident(&TableKind::Att.table_name(&ds_name));
        b.push(" WHERE docid=");
        b.push_param(doc_id.as_str());
        b.push(" AND name=");
        b.push_param(name);
        let q = b.finish();

        let mut conn = self.client().await?;
        let client = &mut **conn;
        let tx = client.transaction().await.map_err(error::classify)?;
        let affected = self.execute_in(&tx, &q).await?;
        if affected == 0 {
            return Err(Error::NotFound(format!(
                "attachment {name} does not exist in document {ds_name}.{doc_id}"
            )));
        }
        tx.commit().await.map_err(error::classify)?;
        Ok(())
    }

    /// Resolve a document reference to its id, asserting the revision
    /// when the caller passed the full document.
    async fn checked_doc_id(&self, doc: DocRef<'_>) -> Result<String> {
        match doc {
            DocRef::Id(id) => Ok(id.to_owned()),
            DocRef::Doc(d) => {
                let id = doc_id_of(d)?.to_owned();
                self.assert_doc_rev(d).await?;
                Ok(id)
            }
        }
    }

    // -------------------------------------------------------------------
    // Views

    /// Execute a named view and map its rows.
    pub async fn find_docs_by_view(
        &self,
        view: &View,
        id_only: bool,
        filter: &ViewFilter,
    ) -> Result<Vec<ViewRow>> {
        let ds_name = self.resolve_name(None)?;
        let planned: PlannedView = view.build(&ds_name, id_only, filter);
        let rows = self.query_built(&planned.query).await?;
        let result: Vec<ViewRow> = rows.iter().map(|r| map_row(&planned, r)).collect();
        debug!(results = result.len(), "find_docs_by_view");
        Ok(result)
    }
}

fn opt_text(value: Option<&str>) -> SqlValue {
    match value {
        Some(v) => SqlValue::Text(v.to_owned()),
        None => SqlValue::Null,
    }
}

fn read_table(ds_name: &str, object_kind: Option<DocKind>) -> String {
    match object_kind {
        Some(DocKind::Association) => TableKind::Assoc.table_name(ds_name),
        Some(DocKind::DirEntry) => TableKind::Dir.table_name(ds_name),
        None => ds_name.to_owned(),
    }
}

fn delete_table(ds_name: &str, profile: Profile, object_kind: Option<DocKind>) -> String {
    match object_kind {
        Some(DocKind::Association) => TableKind::Assoc.table_name(ds_name),
        Some(DocKind::DirEntry) => TableKind::Dir.table_name(ds_name),
        None if profile == Profile::Directory => TableKind::Dir.table_name(ds_name),
        None => ds_name.to_owned(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn unique_ids_are_32_hex() {
        let id = get_unique_id();
        assert_eq!(id.len(), 32);
        assert!(id.chars().all(|c| c.is_ascii_hexdigit()));
        assert!(!id.contains('-'));
    }

    #[test]
    fn db_ident_validation() {
        assert!(validate_db_ident("silt_db1").is_ok());
        assert!(validate_db_ident("Silt").is_err());
        assert!(validate_db_ident("1silt").is_err());
        assert!(validate_db_ident("silt; DROP TABLE x").is_err());
        assert!(validate_db_ident("").is_err());
    }

    #[test]
    fn doc_rev_accepts_string_and_number() {
        let doc = json!({"_id": "a", "_rev": "3"}).as_object().unwrap().clone();
        assert_eq!(doc_rev_of(&doc).unwrap(), 3);
        let doc = json!({"_id": "a", "_rev": 3}).as_object().unwrap().clone();
        assert_eq!(doc_rev_of(&doc).unwrap(), 3);
        let doc = json!({"_id": "a", "_rev": "x"}).as_object().unwrap().clone();
        assert!(doc_rev_of(&doc).is_err());
        let doc = json!({"_id": "a"}).as_object().unwrap().clone();
        assert!(matches!(doc_rev_of(&doc), Err(Error::BadRequest(_))));
    }

    #[test]
    fn delete_steers_to_sidecars() {
        assert_eq!(delete_table("ds", Profile::Basic, None), "ds");
        assert_eq!(delete_table("ds", Profile::Directory, None), "ds_dir");
        assert_eq!(
            delete_table("ds", Profile::Basic, Some(DocKind::Association)),
            "ds_assoc"
        );
        assert_eq!(
            delete_table("ds", Profile::Directory, Some(DocKind::DirEntry)),
            "ds_dir"
        );
        assert_eq!(read_table("ds", Some(DocKind::Association)), "ds_assoc");
        assert_eq!(read_table("ds", None), "ds");
    }
}
