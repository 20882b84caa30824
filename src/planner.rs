//! Fan-out planner: prompt × variants × trials → pending work items.
//!
//! Planning is re-runnable. Identities are derived from coordinates and the
//! store skips existing ones, so an unchanged prompt set plans to the same
//! records every time.

use std::path::PathBuf;
use std::sync::Arc;

use tracing::warn;

use crate::config::RunConfig;
use crate::db::{CreateResult, WorkStore};
use crate::error::Result;
use crate::event::{EventKind, Unit};
use crate::model::{NewWorkItem, VariantSet};
use crate::sink::RunLog;
use crate::source::PromptSource;

/// Counts from one planning pass.
#[derive(Debug, Default, Clone, Copy, PartialEq, Eq)]
pub struct PlanSummary {
    /// Teams that produced work items.
    pub teams: usize,
    pub created: u64,
    /// Items already planned by an earlier pass.
    pub duplicates: u64,
    pub skipped_empty: usize,
    /// Items or teams that could not be planned; logged and skipped.
    pub failed: u64,
}

impl PlanSummary {
    fn absorb(&mut self, other: PlanSummary) {
        self.teams += other.teams;
        self.created += other.created;
        self.duplicates += other.duplicates;
        self.skipped_empty += other.skipped_empty;
        self.failed += other.failed;
    }
}

/// Expands prompts into work items and persists them as pending.
pub struct Planner<S> {
    store: Arc<S>,
    log: Arc<RunLog>,
    phase: String,
    stage: String,
    placeholder: String,
    variants: VariantSet,
    trials: u32,
    output_root: PathBuf,
}

impl<S: WorkStore> Planner<S> {
    pub fn new(
        store: Arc<S>,
        log: Arc<RunLog>,
        config: &RunConfig,
        output_root: impl Into<PathBuf>,
    ) -> Self {
        Self {
            store,
            log,
            phase: config.phase.clone(),
            stage: config.stage.clone(),
            placeholder: config.placeholder.clone(),
            variants: config.variants.clone(),
            trials: config.trials,
            output_root: output_root.into(),
        }
    }

    /// Plan every source in order. A team that fails to plan is logged
    /// and skipped.
    pub async fn plan_sources(&self, sources: &[PromptSource]) -> Result<PlanSummary> {
        if sources.is_empty() {
            self.log.record(EventKind::NoSources).await;
            return Ok(PlanSummary::default());
        }

        let mut summary = PlanSummary::default();
        for source in sources {
            match self.plan_prompt(&source.team, &source.text).await {
                Ok(planned) => summary.absorb(planned),
                Err(e) => {
                    warn!(team = %source.team, error = %e, "team skipped");
                    summary.failed += 1;
                }
            }
        }
        Ok(summary)
    }

    /// Plan one team's prompt: one item per (variant, trial).
    ///
    /// An empty prompt is logged and produces nothing. Duplicate
    /// identities are counted and skipped, as are items the store rejects.
    ///
    /// # Errors
    /// Fails only if the output directories cannot be created.
    pub async fn plan_prompt(&self, team: &str, text: &str) -> Result<PlanSummary> {
        let mut summary = PlanSummary::default();

        if text.is_empty() {
            self.log
                .record(EventKind::EmptySource {
                    team: team.to_string(),
                })
                .await;
            summary.skipped_empty = 1;
            return Ok(summary);
        }

        let stage_dir = self.output_root.join(team).join(&self.stage);
        tokio::fs::create_dir_all(&stage_dir).await?;

        self.log
            .record(EventKind::TeamPlanned {
                team: team.to_string(),
                variants: self.variants.len(),
            })
            .await;

        for variant in self.variants.iter() {
            let variant_dir = stage_dir.join(variant);
            tokio::fs::create_dir_all(&variant_dir).await?;

            let prompt = substitute(text, &self.placeholder, variant);

            for trial in 1..=self.trials {
                let new = NewWorkItem::new(&self.phase, team, variant, trial)
                    .prompt(prompt.clone())
                    .output_dir(variant_dir.clone());
                let id = new.id.clone();

                match self.store.create(new).await {
                    Ok(CreateResult::Created) => {
                        summary.created += 1;
                        self.log
                            .record(EventKind::Planned {
                                id,
                                unit: Unit {
                                    team: team.to_string(),
                                    variant: variant.to_string(),
                                    trial,
                                },
                            })
                            .await;
                    }
                    Ok(CreateResult::Duplicate) => summary.duplicates += 1,
                    Err(e) => {
                        warn!(%id, error = %e, "work item not saved");
                        summary.failed += 1;
                    }
                }
            }
        }

        summary.teams = 1;
        Ok(summary)
    }
}

/// Replace every occurrence of `placeholder` with the quoted variant symbol.
pub fn substitute(text: &str, placeholder: &str, variant: &str) -> String {
    text.replace(placeholder, &format!("\"{variant}\""))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn substitutes_every_occurrence_quoted() {
        assert_eq!(
            substitute("draw <OBJECT> then <OBJECT>", "<OBJECT>", "A"),
            "draw \"A\" then \"A\""
        );
    }

    #[test]
    fn text_without_placeholder_is_unchanged() {
        assert_eq!(substitute("no token here", "<OBJECT>", "A"), "no token here");
    }
}
