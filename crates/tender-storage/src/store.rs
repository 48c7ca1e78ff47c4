use std::str::FromStr;

use async_trait::async_trait;
use chrono::{DateTime, NaiveDateTime, Utc};
use serde::Serialize;
use sqlx::sqlite::{SqliteConnectOptions, SqlitePool, SqlitePoolOptions, SqliteRow};
use sqlx::Row;
use tender_core::{Category, ParseLabelError, TenderRecord, TenderStatus};
use thiserror::Error;

const TIMESTAMP_FORMAT: &str = "%Y-%m-%dT%H:%M:%SZ";

const SCHEMA: &str = r#"
CREATE TABLE IF NOT EXISTS tenders (
    id TEXT PRIMARY KEY,
    title TEXT NOT NULL DEFAULT '',
    description TEXT NOT NULL DEFAULT '',
    buyer_name TEXT,
    supplier_name TEXT,
    value_amount REAL,
    value_currency TEXT NOT NULL DEFAULT 'AUD',
    date_signed TEXT,
    period_start TEXT,
    period_end TEXT,
    closing_date TEXT,
    state TEXT,
    locality TEXT,
    source TEXT NOT NULL,
    category TEXT NOT NULL DEFAULT 'General Construction',
    is_construction INTEGER NOT NULL DEFAULT 0,
    tender_status TEXT NOT NULL DEFAULT 'awarded' CHECK (tender_status IN ('open', 'awarded')),
    external_reference_id TEXT,
    external_url TEXT,
    created_at TEXT NOT NULL DEFAULT (strftime('%Y-%m-%dT%H:%M:%SZ', 'now'))
);

CREATE INDEX IF NOT EXISTS idx_tenders_construction_status ON tenders(is_construction, tender_status);
CREATE INDEX IF NOT EXISTS idx_tenders_closing ON tenders(closing_date);
CREATE INDEX IF NOT EXISTS idx_tenders_signed ON tenders(date_signed DESC);
CREATE INDEX IF NOT EXISTS idx_tenders_state ON tenders(state);
"#;

const INSERT_COLUMNS: &str = r#"
INSERT INTO tenders (
    id, title, description, buyer_name, supplier_name,
    value_amount, value_currency, date_signed, period_start, period_end,
    closing_date, state, locality, source, category,
    is_construction, tender_status, external_reference_id, external_url
) VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10, ?11, ?12, ?13, ?14, ?15, ?16, ?17, ?18, ?19)
"#;

// Awarded rows keep buyer, supplier, dates and category from first capture.
const AWARDED_CONFLICT: &str = r#"
ON CONFLICT(id) DO UPDATE SET
    title = excluded.title,
    description = excluded.description,
    value_amount = excluded.value_amount,
    is_construction = excluded.is_construction
"#;

const OPEN_CONFLICT: &str = r#"
ON CONFLICT(id) DO UPDATE SET
    title = excluded.title,
    description = excluded.description,
    value_amount = excluded.value_amount,
    is_construction = excluded.is_construction,
    closing_date = excluded.closing_date,
    tender_status = excluded.tender_status
"#;

const SELECT_COLUMNS: &str = r#"
SELECT id, title, description, buyer_name, supplier_name,
       value_amount, value_currency, date_signed, period_start, period_end,
       closing_date, state, locality, source, category,
       is_construction, tender_status, external_reference_id, external_url
  FROM tenders
"#;

const RECENT_ORDER: &str = r#"
 ORDER BY CASE tender_status WHEN 'open' THEN 0 ELSE 1 END,
          COALESCE(closing_date, date_signed) DESC,
          id ASC
"#;

#[derive(Debug, Error)]
pub enum StoreError {
    #[error(transparent)]
    Sqlx(#[from] sqlx::Error),
    #[error("row {id} has invalid {column}: {reason}")]
    CorruptRow {
        id: String,
        column: &'static str,
        reason: String,
    },
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct CategoryCount {
    pub category: String,
    pub count: u64,
}

/// Persisted tender state. Injected into adapters, the orchestrator and the
/// query API as `Arc<dyn TenderStore>`.
#[async_trait]
pub trait TenderStore: Send + Sync {
    /// Insert-or-update as one statement. Never fails on a duplicate id.
    async fn upsert(&self, record: &TenderRecord, status: TenderStatus) -> Result<(), StoreError>;

    async fn upsert_open(&self, record: &TenderRecord) -> Result<(), StoreError> {
        self.upsert(record, TenderStatus::Open).await
    }

    async fn upsert_awarded(&self, record: &TenderRecord) -> Result<(), StoreError> {
        self.upsert(record, TenderStatus::Awarded).await
    }

    async fn get(&self, id: &str) -> Result<Option<TenderRecord>, StoreError>;

    async fn select_recent(&self, limit: u32) -> Result<Vec<TenderRecord>, StoreError>;

    async fn select_by_region(&self, region: &str, limit: u32) -> Result<Vec<TenderRecord>, StoreError>;

    async fn select_open(&self, limit: u32) -> Result<Vec<TenderRecord>, StoreError>;

    async fn select_awarded(&self, limit: u32) -> Result<Vec<TenderRecord>, StoreError>;

    async fn count(&self) -> Result<u64, StoreError>;

    async fn count_open(&self) -> Result<u64, StoreError>;

    async fn category_counts(&self) -> Result<Vec<CategoryCount>, StoreError>;
}

#[derive(Debug, Clone)]
pub struct SqliteTenderStore {
    pool: SqlitePool,
}

impl SqliteTenderStore {
    /// Opens (creating if missing) the database and ensures the schema.
    pub async fn connect(database_url: &str) -> Result<Self, StoreError> {
        let options = SqliteConnectOptions::from_str(database_url)?.create_if_missing(true);
        // Every :memory: connection is its own database, so pin to one.
        let in_memory = database_url.contains(":memory:");
        let pool_options = if in_memory {
            SqlitePoolOptions::new()
                .max_connections(1)
                .idle_timeout(None)
                .max_lifetime(None)
        } else {
            SqlitePoolOptions::new().max_connections(4)
        };
        let pool = pool_options.connect_with(options).await?;
        let store = Self { pool };
        store.init_schema().await?;
        Ok(store)
    }

    pub async fn init_schema(&self) -> Result<(), StoreError> {
        sqlx::raw_sql(SCHEMA).execute(&self.pool).await?;
        Ok(())
    }

    pub async fn close(&self) {
        self.pool.close().await;
    }

    async fn fetch_records(
        &self,
        sql: &str,
        binds: &[&str],
        limit: u32,
    ) -> Result<Vec<TenderRecord>, StoreError> {
        let mut query = sqlx::query(sql);
        for value in binds {
            query = query.bind(*value);
        }
        let rows = query.bind(i64::from(limit)).fetch_all(&self.pool).await?;
        rows.iter().map(row_to_record).collect()
    }

    async fn scalar_count(&self, sql: &str) -> Result<u64, StoreError> {
        let count: i64 = sqlx::query_scalar(sql).fetch_one(&self.pool).await?;
        Ok(count.max(0) as u64)
    }
}

#[async_trait]
impl TenderStore for SqliteTenderStore {
    async fn upsert(&self, record: &TenderRecord, status: TenderStatus) -> Result<(), StoreError> {
        let conflict = match status {
            TenderStatus::Open => OPEN_CONFLICT,
            TenderStatus::Awarded => AWARDED_CONFLICT,
        };
        let sql = format!("{INSERT_COLUMNS}{conflict}");

        sqlx::query(&sql)
            .bind(&record.id)
            .bind(&record.title)
            .bind(&record.description)
            .bind(&record.buyer_name)
            .bind(&record.supplier_name)
            .bind(record.value_amount)
            .bind(&record.value_currency)
            .bind(encode_ts(record.date_signed))
            .bind(encode_ts(record.period_start))
            .bind(encode_ts(record.period_end))
            .bind(encode_ts(record.closing_date))
            .bind(&record.state)
            .bind(&record.locality)
            .bind(&record.source)
            .bind(record.category.label())
            .bind(record.is_construction)
            .bind(status.as_str())
            .bind(&record.external_reference_id)
            .bind(&record.external_url)
            .execute(&self.pool)
            .await?;
        Ok(())
    }

    async fn get(&self, id: &str) -> Result<Option<TenderRecord>, StoreError> {
        let sql = format!("{SELECT_COLUMNS} WHERE id = ?1");
        let row = sqlx::query(&sql).bind(id).fetch_optional(&self.pool).await?;
        row.as_ref().map(row_to_record).transpose()
    }

    async fn select_recent(&self, limit: u32) -> Result<Vec<TenderRecord>, StoreError> {
        let sql = format!("{SELECT_COLUMNS} WHERE is_construction = 1 {RECENT_ORDER} LIMIT ?1");
        self.fetch_records(&sql, &[], limit).await
    }

    async fn select_by_region(&self, region: &str, limit: u32) -> Result<Vec<TenderRecord>, StoreError> {
        let sql = format!(
            "{SELECT_COLUMNS} WHERE is_construction = 1 AND UPPER(state) = UPPER(?1) {RECENT_ORDER} LIMIT ?2"
        );
        self.fetch_records(&sql, &[region], limit).await
    }

    async fn select_open(&self, limit: u32) -> Result<Vec<TenderRecord>, StoreError> {
        let sql = format!(
            "{SELECT_COLUMNS} WHERE is_construction = 1 AND tender_status = 'open'
              ORDER BY closing_date IS NULL, closing_date ASC, id ASC LIMIT ?1"
        );
        self.fetch_records(&sql, &[], limit).await
    }

    async fn select_awarded(&self, limit: u32) -> Result<Vec<TenderRecord>, StoreError> {
        let sql = format!(
            "{SELECT_COLUMNS} WHERE is_construction = 1 AND tender_status = 'awarded'
              ORDER BY date_signed DESC, id ASC LIMIT ?1"
        );
        self.fetch_records(&sql, &[], limit).await
    }

    async fn count(&self) -> Result<u64, StoreError> {
        self.scalar_count("SELECT COUNT(*) FROM tenders WHERE is_construction = 1")
            .await
    }

    async fn count_open(&self) -> Result<u64, StoreError> {
        self.scalar_count(
            "SELECT COUNT(*) FROM tenders WHERE is_construction = 1 AND tender_status = 'open'",
        )
        .await
    }

    async fn category_counts(&self) -> Result<Vec<CategoryCount>, StoreError> {
        let rows = sqlx::query(
            r#"
            SELECT category, COUNT(*) AS count
              FROM tenders
             WHERE is_construction = 1
             GROUP BY category
             ORDER BY count DESC, category ASC
            "#,
        )
        .fetch_all(&self.pool)
        .await?;

        let mut out = Vec::with_capacity(rows.len());
        for row in rows {
            let count: i64 = row.try_get("count")?;
            out.push(CategoryCount {
                category: row.try_get("category")?,
                count: count.max(0) as u64,
            });
        }
        Ok(out)
    }
}

fn encode_ts(value: Option<DateTime<Utc>>) -> Option<String> {
    value.map(|ts| ts.format(TIMESTAMP_FORMAT).to_string())
}

fn decode_ts(
    id: &str,
    column: &'static str,
    value: Option<String>,
) -> Result<Option<DateTime<Utc>>, StoreError> {
    let Some(text) = value else {
        return Ok(None);
    };
    NaiveDateTime::parse_from_str(&text, TIMESTAMP_FORMAT)
        .map(|naive| Some(naive.and_utc()))
        .map_err(|e| StoreError::CorruptRow {
            id: id.to_string(),
            column,
            reason: e.to_string(),
        })
}

fn label_error(id: &str, column: &'static str, err: ParseLabelError) -> StoreError {
    StoreError::CorruptRow {
        id: id.to_string(),
        column,
        reason: err.to_string(),
    }
}

fn row_to_record(row: &SqliteRow) -> Result<TenderRecord, StoreError> {
    let id: String = row.try_get("id")?;
    let category: String = row.try_get("category")?;
    let status: String = row.try_get("tender_status")?;

    Ok(TenderRecord {
        title: row.try_get("title")?,
        description: row.try_get("description")?,
        buyer_name: row.try_get("buyer_name")?,
        supplier_name: row.try_get("supplier_name")?,
        value_amount: row.try_get("value_amount")?,
        value_currency: row.try_get("value_currency")?,
        date_signed: decode_ts(&id, "date_signed", row.try_get("date_signed")?)?,
        period_start: decode_ts(&id, "period_start", row.try_get("period_start")?)?,
        period_end: decode_ts(&id, "period_end", row.try_get("period_end")?)?,
        closing_date: decode_ts(&id, "closing_date", row.try_get("closing_date")?)?,
        state: row.try_get("state")?,
        locality: row.try_get("locality")?,
        source: row.try_get("source")?,
        category: Category::from_str(&category).map_err(|e| label_error(&id, "category", e))?,
        is_construction: row.try_get("is_construction")?,
        tender_status: TenderStatus::from_str(&status)
            .map_err(|e| label_error(&id, "tender_status", e))?,
        external_reference_id: row.try_get("external_reference_id")?,
        external_url: row.try_get("external_url")?,
        id,
    })
}
