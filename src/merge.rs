//! Batched, idempotent upsert planning.
//!
//! A fetched batch becomes one transaction holding a single multi-row
//! `INSERT ... ON CONFLICT (tweet_id) DO UPDATE`, followed by a row count of
//! the table. Re-applying the same batch rewrites the mutable columns with
//! identical values and refreshes `archived_at`; it never adds rows.

use std::collections::HashMap;

use crate::escape::{jsonb_literal, optional_literal, text_literal};
use crate::model::Record;

pub const BOOKMARKS_TABLE: &str = "kb.x_bookmarks";

/// One row of the merge, already derived from its source record.
#[derive(Debug, Clone, PartialEq)]
pub struct PlannedRow<'a> {
    pub tweet_id: String,
    pub author_id: String,
    pub author_name: Option<String>,
    pub tweet_text: Option<String>,
    pub url: String,
    pub record: &'a Record,
}

impl<'a> PlannedRow<'a> {
    fn from_record(record: &'a Record) -> Self {
        Self {
            tweet_id: record.id(),
            author_id: record.author_id(),
            author_name: record.author_username(),
            tweet_text: record.text(),
            url: record.canonical_url(),
            record,
        }
    }

    fn values_tuple(&self) -> String {
        format!(
            "({}, {}, {}, {}, {}, {})",
            text_literal(&self.tweet_id),
            text_literal(&self.author_id),
            optional_literal(self.author_name.as_deref()),
            optional_literal(self.tweet_text.as_deref()),
            jsonb_literal(self.record.raw()),
            text_literal(&self.url),
        )
    }
}

/// The statement for one batch plus the bookkeeping that produced it.
#[derive(Debug, Clone, PartialEq)]
pub struct MergePlan {
    pub statement: String,
    /// Distinct identifiers written by the statement.
    pub rows: usize,
    /// Records dropped for lacking an identifier.
    pub skipped: usize,
    /// Earlier observations replaced by a later record with the same id.
    pub collapsed: usize,
}

/// Builds the merge for `records`, or `None` when nothing is mergeable.
///
/// Records without an identifier are skipped. When an identifier repeats,
/// the last observation wins; the row keeps the position of the first one.
/// PostgreSQL refuses to update the same row twice in one `ON CONFLICT`
/// statement, so the collapse happens here rather than in the store.
#[must_use]
pub fn plan(records: &[Record]) -> Option<MergePlan> {
    let mut rows: Vec<PlannedRow<'_>> = Vec::with_capacity(records.len());
    let mut positions: HashMap<String, usize> = HashMap::with_capacity(records.len());
    let mut skipped = 0usize;
    let mut collapsed = 0usize;

    for (index, record) in records.iter().enumerate() {
        let row = PlannedRow::from_record(record);
        if row.tweet_id.is_empty() {
            tracing::warn!(index, "skipping record without an id");
            skipped += 1;
            continue;
        }
        if let Some(&position) = positions.get(&row.tweet_id) {
            tracing::debug!(tweet_id = %row.tweet_id, "later observation replaces earlier one");
            rows[position] = row;
            collapsed += 1;
        } else {
            positions.insert(row.tweet_id.clone(), rows.len());
            rows.push(row);
        }
    }

    if rows.is_empty() {
        return None;
    }

    Some(MergePlan {
        statement: render_statement(&rows),
        rows: rows.len(),
        skipped,
        collapsed,
    })
}

fn render_statement(rows: &[PlannedRow<'_>]) -> String {
    let values = rows
        .iter()
        .map(PlannedRow::values_tuple)
        .collect::<Vec<_>>()
        .join(",\n");

    format!(
        "BEGIN;\n\
         INSERT INTO {BOOKMARKS_TABLE}\n\
         (tweet_id, author_id, author_name, tweet_text, full_json, url)\n\
         VALUES\n\
         {values}\n\
         ON CONFLICT (tweet_id) DO UPDATE SET\n    \
         tweet_text = EXCLUDED.tweet_text,\n    \
         full_json = EXCLUDED.full_json,\n    \
         author_name = EXCLUDED.author_name,\n    \
         url = EXCLUDED.url,\n    \
         archived_at = now();\n\
         SELECT COUNT(*) FROM {BOOKMARKS_TABLE};\n\
         COMMIT;\n"
    )
}
