//! SQLite-backed store: migrations, filtered reads, and writes that
//! publish change notifications.

use std::str::FromStr;

use async_trait::async_trait;
use serde::Serialize;
use serde_json::Value;
use sqlx::sqlite::{SqliteConnectOptions, SqlitePoolOptions, SqliteRow};
use sqlx::{Executor, FromRow, Sqlite, SqlitePool};
use tracing::{debug, info};

use super::{ChangeFeed, DataStore};
use crate::errors::Result;
use crate::records::{ChangeEvent, ChangeKind, Collection, Filter, Query, Record};

/// Establish a SQLite connection pool and run pending migrations.
pub async fn init_pool(database_url: &str) -> Result<SqlitePool> {
    let url = if database_url.starts_with("sqlite:") {
        database_url.to_string()
    } else {
        format!("sqlite:{database_url}")
    };

    let options = SqliteConnectOptions::from_str(&url)?.create_if_missing(true);

    // An in-memory database lives and dies with its connection, so keep
    // exactly one around for the lifetime of the pool.
    let pool = if url.contains(":memory:") {
        SqlitePoolOptions::new()
            .max_connections(1)
            .idle_timeout(None)
            .max_lifetime(None)
            .connect_with(options)
            .await?
    } else {
        SqlitePoolOptions::new()
            .max_connections(5)
            .connect_with(options)
            .await?
    };

    sqlx::migrate!("./migrations").run(&pool).await?;
    info!("Database migrations applied successfully");
    Ok(pool)
}

#[derive(Debug, Serialize, FromRow)]
struct PaymentRow {
    id: i64,
    amount: Option<f64>,
    status: String,
}

#[derive(Debug, Serialize, FromRow)]
struct OrderRow {
    id: i64,
    status: String,
}

#[derive(Clone)]
pub struct SqliteStore {
    pool: SqlitePool,
    feed: ChangeFeed,
}

impl SqliteStore {
    pub fn new(pool: SqlitePool) -> Self {
        Self {
            pool,
            feed: ChangeFeed::new(),
        }
    }

    pub async fn connect(database_url: &str) -> Result<Self> {
        Ok(Self::new(init_pool(database_url).await?))
    }

    fn notify(&self, collection: Collection, kind: ChangeKind) {
        let reached = self.feed.publish(ChangeEvent::now(collection, kind));
        debug!(%collection, ?kind, listeners = reached, "Published change notification");
    }

    // ─────────────────────────────────────────────────────
    // Writes
    // ─────────────────────────────────────────────────────

    /// Record a payment. Returns the new row id.
    pub async fn insert_payment(&self, amount: Option<f64>, status: &str) -> Result<i64> {
        let id = sqlx::query("INSERT INTO payments (amount, status) VALUES (?1, ?2)")
            .bind(amount)
            .bind(status)
            .execute(&self.pool)
            .await?
            .last_insert_rowid();
        self.notify(Collection::Payments, ChangeKind::Insert);
        Ok(id)
    }

    /// Record an order. Returns the new row id.
    pub async fn insert_order(&self, status: &str) -> Result<i64> {
        let id = sqlx::query("INSERT INTO orders (status) VALUES (?1)")
            .bind(status)
            .execute(&self.pool)
            .await?
            .last_insert_rowid();
        self.notify(Collection::Orders, ChangeKind::Insert);
        Ok(id)
    }

    /// Returns `false` when no order has that id.
    pub async fn set_order_status(&self, id: i64, status: &str) -> Result<bool> {
        let affected = sqlx::query("UPDATE orders SET status = ?1 WHERE id = ?2")
            .bind(status)
            .bind(id)
            .execute(&self.pool)
            .await?
            .rows_affected();
        if affected > 0 {
            self.notify(Collection::Orders, ChangeKind::Update);
        }
        Ok(affected > 0)
    }

    pub async fn delete_order(&self, id: i64) -> Result<bool> {
        let affected = sqlx::query("DELETE FROM orders WHERE id = ?1")
            .bind(id)
            .execute(&self.pool)
            .await?
            .rows_affected();
        if affected > 0 {
            self.notify(Collection::Orders, ChangeKind::Delete);
        }
        Ok(affected > 0)
    }
}

#[async_trait]
impl DataStore for SqliteStore {
    async fn query_rows(&self, collection: Collection, filter: &Filter) -> Result<Vec<Record>> {
        fetch_rows(&self.pool, collection, filter).await
    }

    fn supports_snapshot(&self) -> bool {
        true
    }

    async fn query_snapshot(&self, queries: &[Query]) -> Result<Vec<Vec<Record>>> {
        let mut tx = self.pool.begin().await?;
        let mut results = Vec::with_capacity(queries.len());
        for q in queries {
            results.push(fetch_rows(&mut *tx, q.collection, &q.filter).await?);
        }
        tx.commit().await?;
        Ok(results)
    }

    async fn fetch_all(&self, collection: Collection) -> Result<Vec<Record>> {
        let sql = select_sql(collection, None);
        match collection {
            Collection::Payments => fetch_typed::<PaymentRow, _>(&self.pool, &sql, &[]).await,
            Collection::Orders => fetch_typed::<OrderRow, _>(&self.pool, &sql, &[]).await,
        }
    }

    fn feed(&self) -> &ChangeFeed {
        &self.feed
    }
}

// ─────────────────────────────────────────────────────────
// Reads
// ─────────────────────────────────────────────────────────

async fn fetch_rows<'c, E>(executor: E, collection: Collection, filter: &Filter) -> Result<Vec<Record>>
where
    E: Executor<'c, Database = Sqlite>,
{
    filter.validate(collection)?;
    let sql = select_sql(collection, Some(filter));
    let values = filter.values();
    match collection {
        Collection::Payments => fetch_typed::<PaymentRow, E>(executor, &sql, &values).await,
        Collection::Orders => fetch_typed::<OrderRow, E>(executor, &sql, &values).await,
    }
}

async fn fetch_typed<'c, O, E>(executor: E, sql: &str, values: &[&str]) -> Result<Vec<Record>>
where
    O: for<'r> FromRow<'r, SqliteRow> + Serialize + Send + Unpin,
    E: Executor<'c, Database = Sqlite>,
{
    let mut query = sqlx::query_as::<_, O>(sql);
    for value in values {
        query = query.bind(*value);
    }
    let rows = query.fetch_all(executor).await?;
    rows.iter().map(into_record).collect()
}

/// Build the `SELECT` for a validated filter, or for the whole table when
/// there is none. Column names come from [`Collection::fields`]; values are
/// always bound.
fn select_sql(collection: Collection, filter: Option<&Filter>) -> String {
    let columns = collection.fields().join(", ");
    let predicate = match filter {
        None => String::new(),
        Some(Filter::Eq { field, .. }) => format!(" WHERE {field} = ?1"),
        Some(Filter::AnyOf { field, values }) => {
            let slots: Vec<String> = (1..=values.len()).map(|i| format!("?{i}")).collect();
            format!(" WHERE {field} IN ({})", slots.join(", "))
        }
    };
    format!(
        "SELECT {columns} FROM {}{predicate} ORDER BY id ASC",
        collection.as_str()
    )
}

fn into_record<T: Serialize>(row: &T) -> Result<Record> {
    match serde_json::to_value(row)? {
        Value::Object(map) => Ok(map),
        _ => Ok(Record::new()),
    }
}
