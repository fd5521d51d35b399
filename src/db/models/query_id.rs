//! Query identifiers and the allocator that hands out the next free one.
//!
//! Identifiers look like `Q0017`: the `Q` prefix followed by an integer
//! zero-padded to four digits. Numbers wider than four digits are kept as is.

use serde::{Deserialize, Serialize};
use sqlx::{Executor, Sqlite};
use std::collections::HashSet;
use tracing::{debug, warn};

pub const QUERY_ID_PREFIX: char = 'Q';

/// Lowest number the allocator hands out unless configured otherwise
pub const DEFAULT_ID_FLOOR: i64 = 15;

#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct QueryId(String);

impl QueryId {
    pub fn from_number(number: i64) -> Self {
        Self(format!("{}{:04}", QUERY_ID_PREFIX, number))
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl std::fmt::Display for QueryId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(&self.0)
    }
}

impl std::str::FromStr for QueryId {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let trimmed = s.trim();
        match parse_suffix(trimmed) {
            Some(_) => Ok(Self(trimmed.to_string())),
            None => Err(format!("Invalid query ID: {}", s)),
        }
    }
}

/// Numeric part of a stored identifier, or `None` if it is not `Q<digits>`
pub fn parse_suffix(id: &str) -> Option<i64> {
    let digits = id.strip_prefix(QUERY_ID_PREFIX)?;
    if digits.is_empty() || !digits.chars().all(|c| c.is_ascii_digit()) {
        return None;
    }
    digits.parse().ok()
}

/// Smallest number `>= floor` that is not already taken
pub fn next_free_id(existing: &HashSet<i64>, floor: i64) -> QueryId {
    let mut candidate = floor;
    while existing.contains(&candidate) {
        candidate += 1;
    }
    QueryId::from_number(candidate)
}

async fn existing_suffixes<'e, E>(executor: E) -> Result<HashSet<i64>, sqlx::Error>
where
    E: Executor<'e, Database = Sqlite>,
{
    let ids: Vec<String> = sqlx::query_scalar("SELECT query_id FROM synthetic_client_queries")
        .fetch_all(executor)
        .await?;

    Ok(ids
        .iter()
        .filter_map(|id| {
            let suffix = parse_suffix(id);
            if suffix.is_none() {
                debug!(query_id = %id, "Skipping malformed query ID");
            }
            suffix
        })
        .collect())
}

/// Compute the next unused query ID.
///
/// If the existing IDs cannot be read, this degrades to the floor ID instead
/// of failing the caller. A collision from that fallback is caught by the
/// primary key when the row is inserted.
///
/// Allocation is check-then-use: two callers may receive the same ID.
/// [`crate::db::Query::create`] retries on the resulting conflict.
pub async fn allocate_next_id<'e, E>(executor: E, floor: i64) -> QueryId
where
    E: Executor<'e, Database = Sqlite>,
{
    match existing_suffixes(executor).await {
        Ok(existing) => next_free_id(&existing, floor),
        Err(e) => {
            warn!(error = %e, floor, "Failed to read existing query IDs, falling back to floor");
            QueryId::from_number(floor)
        }
    }
}
