use chrono::{DateTime, Local, NaiveDate, Utc};
use serde::Serialize;
use sqlx::sqlite::{SqliteConnectOptions, SqliteJournalMode, SqlitePool, SqlitePoolOptions};
use sqlx::types::Json;
use sqlx::{FromRow, Row};
use std::str::FromStr;
use std::time::Duration;
use utoipa::ToSchema;

use crate::sentiment::{AnalysisRecord, Sentiment};

const RECENT_LIMIT: i64 = 5;
const PREVIEW_CHARS: usize = 100;

/// Daily rollup row. `analysis_count` always equals the sum of the three
/// sentiment counters.
#[derive(Debug, Clone, PartialEq, Serialize, ToSchema, FromRow)]
pub struct DailyCounter {
    pub date: String,
    pub analysis_count: i64,
    pub positive_count: i64,
    pub negative_count: i64,
    pub neutral_count: i64,
}

#[derive(Debug, Clone, PartialEq, Serialize, ToSchema)]
pub struct RecentAnalysis {
    /// First 100 characters, with `...` appended when cut.
    pub text: String,
    pub sentiment: Sentiment,
    pub score: f64,
    pub timestamp: DateTime<Utc>,
}

#[derive(Debug, Clone, PartialEq, Serialize, ToSchema)]
pub struct Stats {
    pub total: i64,
    pub positive: i64,
    pub negative: i64,
    pub neutral: i64,
    pub recent: Vec<RecentAnalysis>,
}

/// Durable store for analyses and their daily rollups.
///
/// Every call borrows a pooled connection for its own duration only.
#[derive(Clone)]
pub struct SentimentStore {
    pool: SqlitePool,
}

impl SentimentStore {
    pub async fn connect(database_url: &str, max_connections: u32) -> Result<Self, sqlx::Error> {
        let options = SqliteConnectOptions::from_str(database_url)?
            .create_if_missing(true)
            .journal_mode(SqliteJournalMode::Wal)
            .busy_timeout(Duration::from_secs(10));

        let pool = SqlitePoolOptions::new()
            .max_connections(max_connections.max(1))
            .connect_with(options)
            .await?;

        let store = Self { pool };
        store.init_schema().await?;
        Ok(store)
    }

    pub fn from_pool(pool: SqlitePool) -> Self {
        Self { pool }
    }

    pub fn pool(&self) -> &SqlitePool {
        &self.pool
    }

    pub async fn init_schema(&self) -> Result<(), sqlx::Error> {
        sqlx::query(
            r#"
            CREATE TABLE IF NOT EXISTS analyses (
                id INTEGER PRIMARY KEY AUTOINCREMENT,
                text TEXT NOT NULL,
                sentiment TEXT NOT NULL,
                score REAL NOT NULL,
                positive_score REAL NOT NULL,
                word_sentiments TEXT NOT NULL,
                timestamp DATETIME DEFAULT CURRENT_TIMESTAMP
            );
            "#,
        )
        .execute(&self.pool)
        .await?;

        sqlx::query(
            r#"
            CREATE TABLE IF NOT EXISTS analytics (
                id INTEGER PRIMARY KEY AUTOINCREMENT,
                analysis_count INTEGER NOT NULL DEFAULT 0,
                positive_count INTEGER NOT NULL DEFAULT 0,
                negative_count INTEGER NOT NULL DEFAULT 0,
                neutral_count INTEGER NOT NULL DEFAULT 0,
                date DATE UNIQUE
            );
            "#,
        )
        .execute(&self.pool)
        .await?;

        sqlx::query("CREATE INDEX IF NOT EXISTS idx_analyses_sentiment ON analyses(sentiment);")
            .execute(&self.pool)
            .await?;
        sqlx::query("CREATE INDEX IF NOT EXISTS idx_analytics_date ON analytics(date);")
            .execute(&self.pool)
            .await?;

        Ok(())
    }

    /// Stores the record and bumps its day's counters in one transaction.
    ///
    /// On any error the transaction is dropped uncommitted, which rolls both
    /// writes back.
    pub async fn insert(&self, record: &AnalysisRecord) -> Result<i64, sqlx::Error> {
        let date = counter_date(record.timestamp).format("%Y-%m-%d").to_string();
        let (positive, negative, neutral) = match record.sentiment {
            Sentiment::Positive => (1i64, 0i64, 0i64),
            Sentiment::Negative => (0, 1, 0),
            Sentiment::Neutral => (0, 0, 1),
        };

        let mut tx = self.pool.begin().await?;

        let id = sqlx::query(
            r#"
            INSERT INTO analyses (text, sentiment, score, positive_score, word_sentiments, timestamp)
            VALUES (?1, ?2, ?3, ?4, ?5, ?6)
            "#,
        )
        .bind(&record.text)
        .bind(record.sentiment.as_str())
        .bind(record.score)
        .bind(record.positive_score)
        .bind(Json(&record.word_sentiments))
        .bind(record.timestamp)
        .execute(&mut *tx)
        .await?
        .last_insert_rowid();

        sqlx::query(
            r#"
            INSERT INTO analytics (date, analysis_count, positive_count, negative_count, neutral_count)
            VALUES (?1, 1, ?2, ?3, ?4)
            ON CONFLICT(date) DO UPDATE SET
                analysis_count = analysis_count + 1,
                positive_count = positive_count + excluded.positive_count,
                negative_count = negative_count + excluded.negative_count,
                neutral_count = neutral_count + excluded.neutral_count
            "#,
        )
        .bind(&date)
        .bind(positive)
        .bind(negative)
        .bind(neutral)
        .execute(&mut *tx)
        .await?;

        tx.commit().await?;
        Ok(id)
    }

    /// Lifetime totals plus the five newest analyses, newest first.
    pub async fn stats(&self) -> Result<Stats, sqlx::Error> {
        let counts = sqlx::query(
            r#"
            SELECT
                COUNT(*) AS total,
                COALESCE(SUM(CASE WHEN sentiment = 'positive' THEN 1 ELSE 0 END), 0) AS positive,
                COALESCE(SUM(CASE WHEN sentiment = 'negative' THEN 1 ELSE 0 END), 0) AS negative,
                COALESCE(SUM(CASE WHEN sentiment = 'neutral' THEN 1 ELSE 0 END), 0) AS neutral
            FROM analyses
            "#,
        )
        .fetch_one(&self.pool)
        .await?;

        let rows = sqlx::query(
            "SELECT text, sentiment, score, timestamp FROM analyses ORDER BY id DESC LIMIT ?1",
        )
        .bind(RECENT_LIMIT)
        .fetch_all(&self.pool)
        .await?;

        let mut recent = Vec::with_capacity(rows.len());
        for row in rows {
            let text: String = row.try_get("text")?;
            let sentiment: String = row.try_get("sentiment")?;
            recent.push(RecentAnalysis {
                text: preview(&text),
                sentiment: sentiment
                    .parse()
                    .map_err(|e: anyhow::Error| sqlx::Error::Decode(e.into()))?,
                score: row.try_get("score")?,
                timestamp: row.try_get("timestamp")?,
            });
        }

        Ok(Stats {
            total: counts.try_get("total")?,
            positive: counts.try_get("positive")?,
            negative: counts.try_get("negative")?,
            neutral: counts.try_get("neutral")?,
            recent,
        })
    }

    /// Newest days first.
    pub async fn daily_counters(&self, limit: i64) -> Result<Vec<DailyCounter>, sqlx::Error> {
        sqlx::query_as::<_, DailyCounter>(
            r#"SELECT date, analysis_count, positive_count, negative_count, neutral_count
               FROM analytics ORDER BY date DESC LIMIT ?1"#,
        )
        .bind(limit)
        .fetch_all(&self.pool)
        .await
    }

    pub async fn daily_counter(&self, date: NaiveDate) -> Result<Option<DailyCounter>, sqlx::Error> {
        sqlx::query_as::<_, DailyCounter>(
            r#"SELECT date, analysis_count, positive_count, negative_count, neutral_count
               FROM analytics WHERE date = ?1"#,
        )
        .bind(date.format("%Y-%m-%d").to_string())
        .fetch_optional(&self.pool)
        .await
    }

    pub async fn close(&self) {
        self.pool.close().await;
    }
}

/// Rollups are keyed by the server's local calendar date.
pub fn counter_date(timestamp: DateTime<Utc>) -> NaiveDate {
    timestamp.with_timezone(&Local).date_naive()
}

fn preview(text: &str) -> String {
    if text.chars().count() > PREVIEW_CHARS {
        let cut: String = text.chars().take(PREVIEW_CHARS).collect();
        format!("{}...", cut)
    } else {
        text.to_string()
    }
}
