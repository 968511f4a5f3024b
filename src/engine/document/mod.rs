//! Document Store Engine Adapter (`MongoDB`)
//!
//! Statements are JSON documents naming a collection and an operation:
//!
//! ```json
//! {"collection": "users", "op": "find", "filter": {"age": {"$gt": 25}}, "limit": 10}
//! {"collection": "orders", "op": "aggregate", "pipeline": [{"$group": {"_id": "$status"}}]}
//! {"command": {"listCollections": 1}}
//! ```
//!
//! `op` defaults to `find`. Filters, documents and pipelines accept extended JSON
//! (`{"$oid": "..."}`, `{"$date": "..."}`), and results come back as relaxed
//! extended JSON.
//!
//! The target database is the statement's `database` field, else the database in the
//! connection string path.

use std::time::Duration;

use futures_util::TryStreamExt;
use mongodb::bson::{doc, Bson, Document};
use mongodb::error::ErrorKind;
use mongodb::options::ClientOptions;
use mongodb::{Client, Cursor, Database};
use serde::Deserialize;
use serde_json::{json, Value};

use crate::engine::{EngineAdapter, QueryLimits, QueryResult};
use crate::error::{DbError, Result};
use crate::resolver::ConnectionDescriptor;

/// Connect budget assumed when the adapter is built without one
const DEFAULT_CONNECT_BUDGET: Duration = Duration::from_secs(10);

/// Open `MongoDB` client
///
/// `client` is `None` once the handle has been disconnected.
pub struct DocumentHandle {
    client: Option<Client>,
    default_database: Option<String>,
}

/// Document-store engine adapter
///
/// Server selection and socket connect are bounded inside `connect_budget`, so an
/// unreachable deployment fails as `ConnectionError` before the caller's connect
/// timeout fires.
#[derive(Debug, Clone, Copy)]
pub struct DocumentStoreAdapter {
    connect_budget: Duration,
}

impl Default for DocumentStoreAdapter {
    fn default() -> Self {
        Self::within(DEFAULT_CONNECT_BUDGET)
    }
}

impl DocumentStoreAdapter {
    /// Adapter whose connect attempt fits inside `connect_budget`
    #[must_use]
    pub const fn within(connect_budget: Duration) -> Self {
        Self { connect_budget }
    }

    /// Driver-side deadline: three quarters of the budget
    #[must_use]
    pub fn driver_timeout(&self) -> Duration {
        self.connect_budget.saturating_sub(self.connect_budget / 4)
    }

    /// Clamp driver timeouts so they never outlast the connect budget
    fn bound(&self, options: &mut ClientOptions) {
        let limit = self.driver_timeout();
        let clamp = |current: Option<Duration>| Some(current.map_or(limit, |d| d.min(limit)));
        options.server_selection_timeout = clamp(options.server_selection_timeout);
        options.connect_timeout = clamp(options.connect_timeout);
    }
}

/// Operation named by a document statement
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "camelCase")]
pub enum DocumentOp {
    #[default]
    Find,
    FindOne,
    #[serde(alias = "countDocuments")]
    Count,
    Aggregate,
    InsertOne,
    UpdateMany,
    DeleteMany,
}

/// Parsed document statement
#[derive(Debug, Clone, Default, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct DocumentStatement {
    pub collection: Option<String>,
    #[serde(default)]
    pub op: DocumentOp,
    pub filter: Option<Value>,
    pub pipeline: Option<Vec<Value>>,
    pub document: Option<Value>,
    pub update: Option<Value>,
    pub sort: Option<Value>,
    pub projection: Option<Value>,
    pub limit: Option<i64>,
    pub database: Option<String>,
    pub command: Option<Value>,
}

impl DocumentStatement {
    /// Parse a statement from its JSON text
    pub fn parse(statement: &str) -> Result<Self> {
        let parsed: Self = serde_json::from_str(statement).map_err(|e| {
            DbError::query_failed(format!(
                "Document statements must be JSON like {{\"collection\": \"users\", \"filter\": {{}}}}: {e}"
            ))
        })?;

        if parsed.command.is_none() && parsed.collection.as_deref().map_or(true, str::is_empty) {
            return Err(DbError::query_failed(
                "Document statement needs a \"collection\" (or a \"command\" document)",
            ));
        }

        Ok(parsed)
    }
}

/// Convert extended JSON into a BSON document
fn to_document(value: Option<Value>, field: &str) -> Result<Document> {
    let Some(value) = value else {
        return Ok(Document::new());
    };

    match Bson::try_from(value) {
        Ok(Bson::Document(doc)) => Ok(doc),
        Ok(other) => Err(DbError::query_failed(format!(
            "\"{field}\" must be a JSON object, got {:?}",
            other.element_type()
        ))),
        Err(e) => Err(DbError::query_failed(format!("Invalid extended JSON in \"{field}\": {e}"))),
    }
}

fn required_document(value: Option<Value>, field: &str, op: &str) -> Result<Document> {
    if value.is_none() {
        return Err(DbError::query_failed(format!("\"{op}\" requires \"{field}\"")));
    }
    to_document(value, field)
}

fn document_to_json(doc: Document) -> Value {
    Bson::Document(doc).into_relaxed_extjson()
}

fn mongo_error(e: &mongodb::error::Error) -> DbError {
    DbError::query_failed(e.to_string())
}

fn closed_handle() -> DbError {
    DbError::query_failed("Connection is already closed")
}

/// Drain a cursor into a JSON array, stopping at the row cap
async fn collect_documents(mut cursor: Cursor<Document>, limits: &QueryLimits) -> Result<QueryResult> {
    let mut documents = Vec::new();
    let mut truncated = false;

    while let Some(doc) = cursor.try_next().await.map_err(|e| mongo_error(&e))? {
        if limits.reached(documents.len()) {
            truncated = true;
            break;
        }
        documents.push(document_to_json(doc));
    }

    let count = documents.len();
    Ok(QueryResult::rows(Value::Array(documents), count, truncated))
}

impl DocumentHandle {
    fn database(&self, requested: Option<&str>) -> Result<Database> {
        let client = self.client.as_ref().ok_or_else(closed_handle)?;
        let name = requested.or(self.default_database.as_deref()).ok_or_else(|| {
            DbError::query_failed(
                "No database selected: add one to the connection string path or set \"database\" in the statement",
            )
        })?;
        Ok(client.database(name))
    }
}

async fn run_statement(
    handle: &DocumentHandle,
    statement: DocumentStatement,
    limits: &QueryLimits,
) -> Result<QueryResult> {
    let db = handle.database(statement.database.as_deref())?;

    if let Some(command) = statement.command {
        let command = to_document(Some(command), "command")?;
        let reply = db.run_command(command).await.map_err(|e| mongo_error(&e))?;
        return Ok(QueryResult::scalar(document_to_json(reply)));
    }

    // Presence checked by DocumentStatement::parse
    let name = statement.collection.unwrap_or_default();
    let collection = db.collection::<Document>(&name);

    match statement.op {
        DocumentOp::Find => {
            let mut find = collection.find(to_document(statement.filter, "filter")?);
            if statement.sort.is_some() {
                find = find.sort(to_document(statement.sort, "sort")?);
            }
            if statement.projection.is_some() {
                find = find.projection(to_document(statement.projection, "projection")?);
            }
            if let Some(limit) = statement.limit {
                find = find.limit(limit);
            }
            let cursor = find.await.map_err(|e| mongo_error(&e))?;
            collect_documents(cursor, limits).await
        }
        DocumentOp::FindOne => {
            let mut find = collection.find_one(to_document(statement.filter, "filter")?);
            if statement.sort.is_some() {
                find = find.sort(to_document(statement.sort, "sort")?);
            }
            if statement.projection.is_some() {
                find = find.projection(to_document(statement.projection, "projection")?);
            }
            let found = find.await.map_err(|e| mongo_error(&e))?;
            let count = usize::from(found.is_some());
            Ok(QueryResult::rows(found.map_or(Value::Null, document_to_json), count, false))
        }
        DocumentOp::Count => {
            let count = collection
                .count_documents(to_document(statement.filter, "filter")?)
                .await
                .map_err(|e| mongo_error(&e))?;
            Ok(QueryResult::scalar(json!({ "count": count })))
        }
        DocumentOp::Aggregate => {
            let pipeline = statement
                .pipeline
                .ok_or_else(|| DbError::query_failed("\"aggregate\" requires \"pipeline\""))?
                .into_iter()
                .map(|stage| to_document(Some(stage), "pipeline"))
                .collect::<Result<Vec<_>>>()?;
            let cursor = collection.aggregate(pipeline).await.map_err(|e| mongo_error(&e))?;
            collect_documents(cursor, limits).await
        }
        DocumentOp::InsertOne => {
            let document = required_document(statement.document, "document", "insertOne")?;
            let inserted = collection.insert_one(document).await.map_err(|e| mongo_error(&e))?;
            Ok(QueryResult::scalar(json!({
                "inserted_id": inserted.inserted_id.into_relaxed_extjson(),
            })))
        }
        DocumentOp::UpdateMany => {
            let filter = to_document(statement.filter, "filter")?;
            let update = required_document(statement.update, "update", "updateMany")?;
            let updated =
                collection.update_many(filter, update).await.map_err(|e| mongo_error(&e))?;
            Ok(QueryResult::scalar(json!({
                "matched_count": updated.matched_count,
                "modified_count": updated.modified_count,
                "upserted_id": updated.upserted_id.map(Bson::into_relaxed_extjson),
            })))
        }
        DocumentOp::DeleteMany => {
            let deleted = collection
                .delete_many(to_document(statement.filter, "filter")?)
                .await
                .map_err(|e| mongo_error(&e))?;
            Ok(QueryResult::scalar(json!({ "deleted_count": deleted.deleted_count })))
        }
    }
}

impl EngineAdapter for DocumentStoreAdapter {
    type Handle = DocumentHandle;

    async fn connect(&self, descriptor: &ConnectionDescriptor) -> Result<DocumentHandle> {
        let mut options = ClientOptions::parse(descriptor.connection_string()).await.map_err(|e| {
            if matches!(*e.kind, ErrorKind::InvalidArgument { .. }) {
                DbError::invalid_connection_string(format!("MongoDB rejected the connection string: {e}"))
            } else {
                DbError::connection_failed(format!("Failed to resolve MongoDB hosts: {e}"))
            }
        })?;

        options.app_name.get_or_insert_with(|| env!("CARGO_PKG_NAME").to_string());
        self.bound(&mut options);
        let default_database = options.default_database.clone();

        let client = Client::with_options(options)
            .map_err(|e| DbError::connection_failed(format!("Failed to create MongoDB client: {e}")))?;

        // The driver connects lazily; ping so auth and network failures surface here
        client
            .database("admin")
            .run_command(doc! { "ping": 1 })
            .await
            .map_err(|e| DbError::connection_failed(format!("Failed to connect to MongoDB: {e}")))?;

        Ok(DocumentHandle { client: Some(client), default_database })
    }

    async fn query(
        &self,
        handle: &mut DocumentHandle,
        statement: &str,
        limits: &QueryLimits,
    ) -> Result<QueryResult> {
        let statement = DocumentStatement::parse(statement)?;
        run_statement(handle, statement, limits).await
    }

    async fn disconnect(&self, handle: &mut DocumentHandle) -> Result<()> {
        if let Some(client) = handle.client.take() {
            client.shutdown().await;
        }
        Ok(())
    }

    async fn health_check(&self, handle: &mut DocumentHandle) -> bool {
        match handle.client.as_ref() {
            Some(client) => client.database("admin").run_command(doc! { "ping": 1 }).await.is_ok(),
            None => false,
        }
    }

    async fn server_version(&self, handle: &mut DocumentHandle) -> Option<String> {
        let client = handle.client.as_ref()?;
        let info = client.database("admin").run_command(doc! { "buildInfo": 1 }).await.ok()?;
        info.get_str("version").ok().map(|v| format!("MongoDB {v}"))
    }
}
