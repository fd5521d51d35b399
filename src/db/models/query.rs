//! Client query models and the query repository.
//!
//! A query starts `Open` and can be closed exactly once; there is no way back.

use chrono::{DateTime, SecondsFormat, Utc};
use serde::{Deserialize, Serialize};
use sqlx::{FromRow, SqlitePool};
use std::future::Future;
use tracing::{info, warn};

use super::query_id::{allocate_next_id, QueryId};
use crate::db::error::is_unique_violation;
use crate::db::StoreError;

/// How many times `create` re-allocates after losing an ID race
pub const MAX_ID_ATTEMPTS: usize = 3;

/// Lifecycle state of a query
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum QueryStatus {
    Open,
    Closed,
}

impl QueryStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            QueryStatus::Open => "Open",
            QueryStatus::Closed => "Closed",
        }
    }
}

impl std::fmt::Display for QueryStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

impl std::str::FromStr for QueryStatus {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_lowercase().as_str() {
            "open" => Ok(QueryStatus::Open),
            "closed" => Ok(QueryStatus::Closed),
            _ => Err(format!("Unknown query status: {}", s)),
        }
    }
}

/// Fixed categories a client picks from when raising a query
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum QueryHeading {
    #[serde(rename = "Account Suspension")]
    AccountSuspension,
    #[serde(rename = "Billing Problem")]
    BillingProblem,
    #[serde(rename = "Bug Report")]
    BugReport,
    #[serde(rename = "Data Export")]
    DataExport,
    #[serde(rename = "Feature Request")]
    FeatureRequest,
    #[serde(rename = "Login Issue")]
    LoginIssue,
    #[serde(rename = "Payment Failure")]
    PaymentFailure,
    #[serde(rename = "Subscription Cancellation")]
    SubscriptionCancellation,
    #[serde(rename = "Technical Support")]
    TechnicalSupport,
    #[serde(rename = "UI Feedback")]
    UiFeedback,
}

impl QueryHeading {
    pub const ALL: [QueryHeading; 10] = [
        QueryHeading::AccountSuspension,
        QueryHeading::BillingProblem,
        QueryHeading::BugReport,
        QueryHeading::DataExport,
        QueryHeading::FeatureRequest,
        QueryHeading::LoginIssue,
        QueryHeading::PaymentFailure,
        QueryHeading::SubscriptionCancellation,
        QueryHeading::TechnicalSupport,
        QueryHeading::UiFeedback,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            QueryHeading::AccountSuspension => "Account Suspension",
            QueryHeading::BillingProblem => "Billing Problem",
            QueryHeading::BugReport => "Bug Report",
            QueryHeading::DataExport => "Data Export",
            QueryHeading::FeatureRequest => "Feature Request",
            QueryHeading::LoginIssue => "Login Issue",
            QueryHeading::PaymentFailure => "Payment Failure",
            QueryHeading::SubscriptionCancellation => "Subscription Cancellation",
            QueryHeading::TechnicalSupport => "Technical Support",
            QueryHeading::UiFeedback => "UI Feedback",
        }
    }

    pub fn labels() -> Vec<&'static str> {
        Self::ALL.iter().map(|h| h.as_str()).collect()
    }
}

impl std::fmt::Display for QueryHeading {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

impl std::str::FromStr for QueryHeading {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let wanted = s.trim();
        Self::ALL
            .iter()
            .find(|h| h.as_str().eq_ignore_ascii_case(wanted))
            .copied()
            .ok_or_else(|| format!("Unknown query heading: {}", s))
    }
}

/// A row of `synthetic_client_queries`
#[derive(Debug, Clone, Serialize, Deserialize, FromRow)]
pub struct Query {
    pub query_id: String,
    pub client_email: String,
    pub client_mobile: String,
    pub query_heading: String,
    pub query_description: String,
    pub query_status: String,
    pub date_raised: String,
    pub date_closed: Option<String>,
}

/// Fields a client supplies when raising a query
#[derive(Debug, Clone, Deserialize)]
pub struct QueryDraft {
    pub client_email: String,
    pub client_mobile: String,
    pub query_heading: String,
    pub query_description: String,
}

impl QueryDraft {
    /// Required fields must be non-blank and the heading must be a known category
    pub fn validate(&self) -> Result<QueryHeading, StoreError> {
        if self.client_email.trim().is_empty() {
            return Err(StoreError::validation("client_email", "Email is required"));
        }
        if self.client_mobile.trim().is_empty() {
            return Err(StoreError::validation(
                "client_mobile",
                "Mobile number is required",
            ));
        }
        if self.query_description.trim().is_empty() {
            return Err(StoreError::validation(
                "query_description",
                "Query description is required",
            ));
        }
        self.query_heading
            .parse()
            .map_err(|e: String| StoreError::validation("query_heading", e))
    }
}

/// Optional equality filters for listing queries; `None` matches everything
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct QueryFilter {
    pub status: Option<QueryStatus>,
    pub heading: Option<String>,
}

impl QueryFilter {
    pub fn with_status(mut self, status: QueryStatus) -> Self {
        self.status = Some(status);
        self
    }

    pub fn with_heading(mut self, heading: impl Into<String>) -> Self {
        self.heading = Some(heading.into());
        self
    }
}

/// Open/closed totals for the admin dashboard
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct QuerySummary {
    pub open: i64,
    pub closed: i64,
    pub total: i64,
}

const QUERY_COLUMNS: &str = "query_id, client_email, client_mobile, query_heading, \
    query_description, query_status, date_raised, date_closed";

/// Timestamps are stored as fixed-width RFC 3339 UTC strings so that
/// lexical order matches chronological order.
pub fn format_timestamp(at: DateTime<Utc>) -> String {
    at.to_rfc3339_opts(SecondsFormat::Micros, true)
}

impl Query {
    /// Insert a new Open query and return its allocated ID
    pub async fn create(
        db: &SqlitePool,
        draft: &QueryDraft,
        id_floor: i64,
    ) -> Result<QueryId, StoreError> {
        Self::create_at(db, draft, id_floor, Utc::now()).await
    }

    pub async fn create_at(
        db: &SqlitePool,
        draft: &QueryDraft,
        id_floor: i64,
        raised_at: DateTime<Utc>,
    ) -> Result<QueryId, StoreError> {
        Self::insert_with_retry(db, draft, raised_at, || allocate_next_id(db, id_floor)).await
    }

    /// Insert `draft` under the ID from `next_id`, asking for a fresh ID
    /// whenever the insert hits a primary-key conflict.
    async fn insert_with_retry<F, Fut>(
        db: &SqlitePool,
        draft: &QueryDraft,
        raised_at: DateTime<Utc>,
        mut next_id: F,
    ) -> Result<QueryId, StoreError>
    where
        F: FnMut() -> Fut,
        Fut: Future<Output = QueryId>,
    {
        let heading = draft.validate()?;
        let date_raised = format_timestamp(raised_at);

        for attempt in 1..=MAX_ID_ATTEMPTS {
            let query_id = next_id().await;

            let result = sqlx::query(
                r#"
                INSERT INTO synthetic_client_queries
                (query_id, client_email, client_mobile, query_heading,
                 query_description, query_status, date_raised, date_closed)
                VALUES (?, ?, ?, ?, ?, 'Open', ?, NULL)
                "#,
            )
            .bind(query_id.as_str())
            .bind(draft.client_email.trim())
            .bind(draft.client_mobile.trim())
            .bind(heading.as_str())
            .bind(&draft.query_description)
            .bind(&date_raised)
            .execute(db)
            .await;

            match result {
                Ok(_) => {
                    info!(query_id = %query_id, heading = %heading, "Query submitted");
                    return Ok(query_id);
                }
                Err(e) if is_unique_violation(&e) => {
                    warn!(
                        query_id = %query_id,
                        attempt,
                        "Query ID taken by a concurrent submission, retrying"
                    );
                }
                Err(e) => return Err(e.into()),
            }
        }

        Err(StoreError::Conflict(
            "Could not allocate a unique query ID, please try again".to_string(),
        ))
    }

    pub async fn find(db: &SqlitePool, query_id: &str) -> Result<Option<Query>, StoreError> {
        let sql = format!(
            "SELECT {} FROM synthetic_client_queries WHERE query_id = ?",
            QUERY_COLUMNS
        );
        let query = sqlx::query_as::<_, Query>(&sql)
            .bind(query_id)
            .fetch_optional(db)
            .await?;
        Ok(query)
    }

    /// List queries matching the filter, most recently raised first
    pub async fn list(db: &SqlitePool, filter: &QueryFilter) -> Result<Vec<Query>, StoreError> {
        let mut conditions = Vec::new();
        let mut bindings: Vec<String> = Vec::new();

        if let Some(status) = filter.status {
            conditions.push("query_status = ?");
            bindings.push(status.as_str().to_string());
        }

        if let Some(heading) = &filter.heading {
            conditions.push("query_heading = ?");
            bindings.push(heading.clone());
        }

        let where_clause = if conditions.is_empty() {
            String::new()
        } else {
            format!("WHERE {}", conditions.join(" AND "))
        };

        let sql = format!(
            "SELECT {} FROM synthetic_client_queries {} ORDER BY date_raised DESC, query_id DESC",
            QUERY_COLUMNS, where_clause
        );
        let mut query_builder = sqlx::query_as::<_, Query>(&sql);
        for binding in &bindings {
            query_builder = query_builder.bind(binding);
        }

        Ok(query_builder.fetch_all(db).await?)
    }

    /// Rewrite heading/description and close an Open query.
    ///
    /// Returns `false` when nothing was updated: the ID is unknown or the
    /// query is already closed (its `date_closed` is left untouched).
    pub async fn close(
        db: &SqlitePool,
        query_id: &str,
        new_heading: &str,
        new_description: &str,
    ) -> Result<bool, StoreError> {
        Self::close_at(db, query_id, new_heading, new_description, Utc::now()).await
    }

    pub async fn close_at(
        db: &SqlitePool,
        query_id: &str,
        new_heading: &str,
        new_description: &str,
        closed_at: DateTime<Utc>,
    ) -> Result<bool, StoreError> {
        let result = sqlx::query(
            r#"
            UPDATE synthetic_client_queries
            SET query_heading = ?,
                query_description = ?,
                query_status = 'Closed',
                date_closed = ?
            WHERE query_id = ? AND query_status = 'Open'
            "#,
        )
        .bind(new_heading)
        .bind(new_description)
        .bind(format_timestamp(closed_at))
        .bind(query_id)
        .execute(db)
        .await?;

        let closed = result.rows_affected() > 0;
        if closed {
            info!(query_id = %query_id, "Query closed");
        } else {
            warn!(query_id = %query_id, "Close affected no rows (unknown or already closed)");
        }
        Ok(closed)
    }

    /// Headings currently present in the table, alphabetically
    pub async fn distinct_headings(db: &SqlitePool) -> Result<Vec<String>, StoreError> {
        let headings = sqlx::query_scalar::<_, String>(
            r#"
            SELECT DISTINCT query_heading FROM synthetic_client_queries
            ORDER BY query_heading ASC
            "#,
        )
        .fetch_all(db)
        .await?;
        Ok(headings)
    }

    pub async fn summary(db: &SqlitePool) -> Result<QuerySummary, StoreError> {
        let rows: Vec<(String, i64)> = sqlx::query_as(
            "SELECT query_status, COUNT(*) FROM synthetic_client_queries GROUP BY query_status",
        )
        .fetch_all(db)
        .await?;

        let mut summary = QuerySummary::default();
        for (status, count) in rows {
            match status.parse::<QueryStatus>() {
                Ok(QueryStatus::Open) => summary.open = count,
                Ok(QueryStatus::Closed) => summary.closed = count,
                Err(_) => {}
            }
            summary.total += count;
        }
        Ok(summary)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::db::test_pool;
    use chrono::TimeZone;

    fn draft(heading: &str, description: &str) -> QueryDraft {
        QueryDraft {
            client_email: "client@example.com".to_string(),
            client_mobile: "9876543210".to_string(),
            query_heading: heading.to_string(),
            query_description: description.to_string(),
        }
    }

    fn at(hour: u32) -> DateTime<Utc> {
        Utc.with_ymd_and_hms(2024, 3, 1, hour, 0, 0).unwrap()
    }

    #[test]
    fn test_heading_parsing() {
        assert_eq!(
            "bug report".parse::<QueryHeading>().unwrap(),
            QueryHeading::BugReport
        );
        assert_eq!(
            "UI Feedback".parse::<QueryHeading>().unwrap(),
            QueryHeading::UiFeedback
        );
        assert!("Complaint".parse::<QueryHeading>().is_err());
        assert_eq!(QueryHeading::labels().len(), 10);
    }

    #[test]
    fn test_heading_serializes_as_label() {
        let json = serde_json::to_string(&QueryHeading::SubscriptionCancellation).unwrap();
        assert_eq!(json, "\"Subscription Cancellation\"");
    }

    #[test]
    fn test_status_parsing() {
        assert_eq!("open".parse::<QueryStatus>().unwrap(), QueryStatus::Open);
        assert_eq!("Closed".parse::<QueryStatus>().unwrap(), QueryStatus::Closed);
        assert!("pending".parse::<QueryStatus>().is_err());
    }

    #[test]
    fn test_draft_validation() {
        assert!(draft("Bug Report", "Crash on save").validate().is_ok());

        let mut missing_mobile = draft("Bug Report", "Crash on save");
        missing_mobile.client_mobile = "  ".to_string();
        assert!(matches!(
            missing_mobile.validate(),
            Err(StoreError::Validation { field: "client_mobile", .. })
        ));

        assert!(matches!(
            draft("Nonsense", "Crash on save").validate(),
            Err(StoreError::Validation { field: "query_heading", .. })
        ));
    }

    #[test]
    fn test_timestamps_sort_lexically() {
        let earlier = format_timestamp(at(9));
        let later = format_timestamp(at(10));
        assert!(earlier < later);
        assert_eq!(earlier, "2024-03-01T09:00:00.000000Z");
    }

    #[tokio::test]
    async fn test_create_then_list_open_round_trip() {
        let pool = test_pool().await;
        let input = draft("Login Issue", "Cannot sign in since Monday");

        let id = Query::create_at(&pool, &input, 15, at(9)).await.unwrap();
        assert_eq!(id.as_str(), "Q0015");

        let open = Query::list(&pool, &QueryFilter::default().with_status(QueryStatus::Open))
            .await
            .unwrap();
        assert_eq!(open.len(), 1);

        let query = &open[0];
        assert_eq!(query.query_id, "Q0015");
        assert_eq!(query.client_email, input.client_email);
        assert_eq!(query.client_mobile, input.client_mobile);
        assert_eq!(query.query_heading, "Login Issue");
        assert_eq!(query.query_description, input.query_description);
        assert_eq!(query.query_status, "Open");
        assert_eq!(query.date_raised, format_timestamp(at(9)));
        assert!(query.date_closed.is_none());
    }

    #[tokio::test]
    async fn test_create_assigns_sequential_ids() {
        let pool = test_pool().await;
        let first = Query::create(&pool, &draft("Bug Report", "a"), 15).await.unwrap();
        let second = Query::create(&pool, &draft("Bug Report", "b"), 15).await.unwrap();
        assert_eq!(first.as_str(), "Q0015");
        assert_eq!(second.as_str(), "Q0016");
    }

    #[tokio::test]
    async fn test_create_with_empty_description_inserts_nothing() {
        let pool = test_pool().await;
        let result = Query::create(&pool, &draft("Bug Report", ""), 15).await;

        assert!(matches!(
            result,
            Err(StoreError::Validation { field: "query_description", .. })
        ));
        let all = Query::list(&pool, &QueryFilter::default()).await.unwrap();
        assert!(all.is_empty());
    }

    #[tokio::test]
    async fn test_create_reallocates_after_losing_id_race() {
        let pool = test_pool().await;
        // A concurrent submission already stored Q0015
        let winner = Query::create(&pool, &draft("Bug Report", "first"), 15)
            .await
            .unwrap();
        assert_eq!(winner.as_str(), "Q0015");

        // This submission read the IDs before the winner's insert landed
        let db = &pool;
        let mut calls = 0;
        let loser = Query::insert_with_retry(db, &draft("Login Issue", "second"), at(9), || {
            calls += 1;
            let stale = calls == 1;
            async move {
                if stale {
                    QueryId::from_number(15)
                } else {
                    allocate_next_id(db, 15).await
                }
            }
        })
        .await
        .unwrap();

        assert_eq!(calls, 2);
        assert_eq!(loser.as_str(), "Q0016");

        let all = Query::list(&pool, &QueryFilter::default()).await.unwrap();
        assert_eq!(all.len(), 2);
        let first = Query::find(&pool, "Q0015").await.unwrap().unwrap();
        assert_eq!(first.query_description, "first");
        let second = Query::find(&pool, "Q0016").await.unwrap().unwrap();
        assert_eq!(second.query_description, "second");
    }

    #[tokio::test]
    async fn test_create_gives_up_after_repeated_conflicts() {
        let pool = test_pool().await;
        // Every insert of this description collides, whatever ID is allocated
        sqlx::query(
            "CREATE UNIQUE INDEX uniq_description ON synthetic_client_queries(query_description)",
        )
        .execute(&pool)
        .await
        .unwrap();
        Query::create(&pool, &draft("Bug Report", "duplicate"), 15)
            .await
            .unwrap();

        let result = Query::create(&pool, &draft("Bug Report", "duplicate"), 15).await;
        assert!(matches!(result, Err(StoreError::Conflict(_))));

        let all = Query::list(&pool, &QueryFilter::default()).await.unwrap();
        assert_eq!(all.len(), 1);
    }

    #[tokio::test]
    async fn test_list_filters_and_orders() {
        let pool = test_pool().await;
        let bug_old = Query::create_at(&pool, &draft("Bug Report", "old bug"), 15, at(8))
            .await
            .unwrap();
        let billing = Query::create_at(&pool, &draft("Billing Problem", "charged twice"), 15, at(9))
            .await
            .unwrap();
        let bug_new = Query::create_at(&pool, &draft("Bug Report", "new bug"), 15, at(10))
            .await
            .unwrap();
        let bug_open = Query::create_at(&pool, &draft("Bug Report", "still open"), 15, at(11))
            .await
            .unwrap();

        for (id, heading) in [
            (&bug_old, "Bug Report"),
            (&billing, "Billing Problem"),
            (&bug_new, "Bug Report"),
        ] {
            assert!(Query::close_at(&pool, id.as_str(), heading, "done", at(12))
                .await
                .unwrap());
        }

        let filter = QueryFilter::default()
            .with_status(QueryStatus::Closed)
            .with_heading("Bug Report");
        let closed_bugs = Query::list(&pool, &filter).await.unwrap();
        let ids: Vec<&str> = closed_bugs.iter().map(|q| q.query_id.as_str()).collect();
        assert_eq!(ids, vec![bug_new.as_str(), bug_old.as_str()]);

        let all = Query::list(&pool, &QueryFilter::default()).await.unwrap();
        let ids: Vec<&str> = all.iter().map(|q| q.query_id.as_str()).collect();
        assert_eq!(
            ids,
            vec![bug_open.as_str(), bug_new.as_str(), billing.as_str(), bug_old.as_str()]
        );
    }

    #[tokio::test]
    async fn test_close_sets_fields_and_date() {
        let pool = test_pool().await;
        let id = Query::create_at(&pool, &draft("Data Export", "need csv"), 15, at(9))
            .await
            .unwrap();

        let closed = Query::close_at(&pool, id.as_str(), "Technical Support", "sent csv", at(10))
            .await
            .unwrap();
        assert!(closed);

        let query = Query::find(&pool, id.as_str()).await.unwrap().unwrap();
        assert_eq!(query.query_status, "Closed");
        assert_eq!(query.query_heading, "Technical Support");
        assert_eq!(query.query_description, "sent csv");
        assert_eq!(query.date_closed, Some(format_timestamp(at(10))));
        assert_eq!(query.date_raised, format_timestamp(at(9)));
    }

    #[tokio::test]
    async fn test_close_already_closed_returns_false_and_keeps_date() {
        let pool = test_pool().await;
        let id = Query::create_at(&pool, &draft("Bug Report", "x"), 15, at(9))
            .await
            .unwrap();
        assert!(Query::close_at(&pool, id.as_str(), "Bug Report", "fixed", at(10))
            .await
            .unwrap());

        let again = Query::close_at(&pool, id.as_str(), "Bug Report", "again", at(11))
            .await
            .unwrap();
        assert!(!again);

        let query = Query::find(&pool, id.as_str()).await.unwrap().unwrap();
        assert_eq!(query.date_closed, Some(format_timestamp(at(10))));
        assert_eq!(query.query_description, "fixed");
    }

    #[tokio::test]
    async fn test_close_unknown_id_returns_false() {
        let pool = test_pool().await;
        let closed = Query::close(&pool, "Q9999", "Bug Report", "x").await.unwrap();
        assert!(!closed);
    }

    #[tokio::test]
    async fn test_distinct_headings_and_summary() {
        let pool = test_pool().await;
        let a = Query::create(&pool, &draft("Bug Report", "a"), 15).await.unwrap();
        Query::create(&pool, &draft("Bug Report", "b"), 15).await.unwrap();
        Query::create(&pool, &draft("Billing Problem", "c"), 15).await.unwrap();
        Query::close(&pool, a.as_str(), "Bug Report", "done").await.unwrap();

        let headings = Query::distinct_headings(&pool).await.unwrap();
        assert_eq!(headings, vec!["Billing Problem", "Bug Report"]);

        let summary = Query::summary(&pool).await.unwrap();
        assert_eq!(summary, QuerySummary { open: 2, closed: 1, total: 3 });
    }
}
