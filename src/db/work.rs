//! Work item operations: idempotent create, pending selection, completion.

use std::path::PathBuf;

use chrono::{DateTime, Utc};
use opentelemetry::KeyValue;

use crate::error::{Error, Result};
use crate::model::*;
use crate::telemetry::metrics;

use super::{Db, WorkStore};

/// Result of creating a work item.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CreateResult {
    /// New pending record inserted.
    Created,
    /// The identity already exists; nothing was written.
    Duplicate,
}

impl WorkStore for Db {
    async fn create(&self, new: NewWorkItem) -> Result<CreateResult> {
        let now = Utc::now();

        // The primary key is the uniqueness constraint. Conflicts are
        // skipped so re-planning is a no-op rather than an error.
        let rows_affected = sqlx::query(
            "INSERT INTO prompt_requests (id, team, variant, prompt, trial, output_dir, completed, created_at, updated_at)
             VALUES (?1, ?2, ?3, ?4, ?5, ?6, 0, ?7, ?7)
             ON CONFLICT(id) DO NOTHING",
        )
        .bind(new.id.as_str())
        .bind(&new.team)
        .bind(&new.variant)
        .bind(&new.prompt)
        .bind(i64::from(new.trial))
        .bind(new.output_dir.to_string_lossy().into_owned())
        .bind(now)
        .execute(self.pool())
        .await?
        .rows_affected();

        let result = if rows_affected == 0 {
            CreateResult::Duplicate
        } else {
            CreateResult::Created
        };

        metrics::work_planned().add(
            1,
            &[KeyValue::new(
                "result",
                match result {
                    CreateResult::Created => "created",
                    CreateResult::Duplicate => "duplicate",
                },
            )],
        );

        Ok(result)
    }

    async fn list_pending(&self, limit: usize) -> Result<Vec<WorkItem>> {
        let limit = i64::try_from(limit).unwrap_or(i64::MAX);
        let rows: Vec<WorkItemRow> = sqlx::query_as(
            "SELECT id, team, variant, prompt, trial, output_dir, completed, outcome, detail, attempts, created_at, updated_at, completed_at
             FROM prompt_requests
             WHERE completed = 0
             ORDER BY created_at ASC, id ASC
             LIMIT ?1",
        )
        .bind(limit)
        .fetch_all(self.pool())
        .await?;

        rows.into_iter().map(WorkItemRow::try_into_work_item).collect()
    }

    async fn mark_completed(&self, id: &WorkId, outcome: &Outcome) -> Result<bool> {
        let now = Utc::now();

        // Guarded on completed = 0: the flag moves false -> true once.
        let rows_affected = sqlx::query(
            "UPDATE prompt_requests
             SET completed = 1, outcome = ?1, detail = ?2, attempts = ?3, updated_at = ?4, completed_at = ?4
             WHERE id = ?5 AND completed = 0",
        )
        .bind(outcome.kind.to_string())
        .bind(&outcome.detail)
        .bind(i64::from(outcome.attempts))
        .bind(now)
        .bind(id.as_str())
        .execute(self.pool())
        .await?
        .rows_affected();

        if rows_affected == 0 {
            // Either unknown or already completed; distinguish for the caller.
            self.get(id).await?;
            return Ok(false);
        }

        metrics::work_completed().add(1, &[KeyValue::new("outcome", outcome.kind.to_string())]);
        Ok(true)
    }

    async fn count(&self, completed: Option<bool>) -> Result<u64> {
        let row: (i64,) = sqlx::query_as(
            "SELECT COUNT(*) FROM prompt_requests WHERE ?1 IS NULL OR completed = ?1",
        )
        .bind(completed)
        .fetch_one(self.pool())
        .await?;
        Ok(row.0.max(0) as u64)
    }

    async fn get(&self, id: &WorkId) -> Result<WorkItem> {
        let row: Option<WorkItemRow> = sqlx::query_as(
            "SELECT id, team, variant, prompt, trial, output_dir, completed, outcome, detail, attempts, created_at, updated_at, completed_at
             FROM prompt_requests WHERE id = ?1",
        )
        .bind(id.as_str())
        .fetch_optional(self.pool())
        .await?;

        row.ok_or_else(|| Error::NotFound(id.to_string()))?
            .try_into_work_item()
    }
}

/// Internal row type for sqlx::FromRow.
#[derive(sqlx::FromRow)]
struct WorkItemRow {
    id: String,
    team: String,
    variant: String,
    prompt: String,
    trial: i64,
    output_dir: String,
    completed: bool,
    outcome: Option<String>,
    detail: Option<String>,
    attempts: i64,
    created_at: DateTime<Utc>,
    updated_at: DateTime<Utc>,
    completed_at: Option<DateTime<Utc>>,
}

impl WorkItemRow {
    fn try_into_work_item(self) -> Result<WorkItem> {
        let trial = u32::try_from(self.trial)
            .map_err(|_| Error::Other(format!("bad trial index {} for {}", self.trial, self.id)))?;

        Ok(WorkItem {
            id: WorkId(self.id),
            team: self.team,
            variant: self.variant,
            prompt: self.prompt,
            trial,
            output_dir: PathBuf::from(self.output_dir),
            completed: self.completed,
            outcome: self
                .outcome
                .as_deref()
                .map(str::parse::<OutcomeKind>)
                .transpose()?,
            detail: self.detail,
            attempts: u32::try_from(self.attempts).unwrap_or(0),
            created_at: self.created_at,
            updated_at: self.updated_at,
            completed_at: self.completed_at,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn item(team: &str, variant: &str, trial: u32) -> NewWorkItem {
        NewWorkItem::new("final", team, variant, trial)
            .prompt(format!("draw \"{variant}\""))
            .output_dir(format!("out/{team}/raw/{variant}"))
    }

    #[tokio::test]
    async fn create_is_idempotent_on_identity() {
        let db = Db::in_memory().await.unwrap();

        assert_eq!(db.create(item("t", "A", 1)).await.unwrap(), CreateResult::Created);
        assert_eq!(db.create(item("t", "A", 1)).await.unwrap(), CreateResult::Duplicate);
        assert_eq!(db.count(None).await.unwrap(), 1);
    }

    #[tokio::test]
    async fn duplicate_create_does_not_overwrite_prompt() {
        let db = Db::in_memory().await.unwrap();
        db.create(item("t", "A", 1)).await.unwrap();
        db.create(item("t", "A", 1).prompt("changed")).await.unwrap();

        let stored = db.get(&WorkId::derive("final", "t", "A", 1)).await.unwrap();
        assert_eq!(stored.prompt, "draw \"A\"");
    }

    #[tokio::test]
    async fn mark_completed_flips_flag_once() {
        let db = Db::in_memory().await.unwrap();
        db.create(item("t", "A", 1)).await.unwrap();
        let id = WorkId::derive("final", "t", "A", 1);

        let first = db
            .mark_completed(&id, &Outcome::new(OutcomeKind::Success, 2))
            .await
            .unwrap();
        let second = db
            .mark_completed(&id, &Outcome::new(OutcomeKind::Fatal, 3).with_detail("late"))
            .await
            .unwrap();

        assert!(first);
        assert!(!second);

        let stored = db.get(&id).await.unwrap();
        assert!(stored.completed);
        assert_eq!(stored.outcome, Some(OutcomeKind::Success));
        assert_eq!(stored.attempts, 2);
        assert!(stored.detail.is_none());
        assert!(stored.completed_at.is_some());
    }

    #[tokio::test]
    async fn mark_completed_unknown_id_is_not_found() {
        let db = Db::in_memory().await.unwrap();
        let result = db
            .mark_completed(&WorkId("missing".into()), &Outcome::new(OutcomeKind::Success, 1))
            .await;
        assert!(matches!(result, Err(Error::NotFound(_))));
    }

    #[tokio::test]
    async fn counts_and_pending_agree() {
        let db = Db::in_memory().await.unwrap();
        for trial in 1..=3 {
            db.create(item("t", "A", trial)).await.unwrap();
        }
        db.mark_completed(
            &WorkId::derive("final", "t", "A", 2),
            &Outcome::new(OutcomeKind::Empty, 1),
        )
        .await
        .unwrap();

        assert_eq!(db.count(None).await.unwrap(), 3);
        assert_eq!(db.count(Some(true)).await.unwrap(), 1);
        assert_eq!(db.count(Some(false)).await.unwrap(), 2);

        let pending = db.list_pending(10).await.unwrap();
        assert_eq!(pending.len(), 2);
        assert!(pending.iter().all(|item| !item.completed));
        assert_eq!(db.list_pending(1).await.unwrap().len(), 1);
    }
}
