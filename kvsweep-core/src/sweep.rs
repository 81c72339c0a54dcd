//! Copy and clean workflows.
//!
//! A full run is three phases in a fixed order:
//!
//! 1. copy aged secrets from the source mount to the destination mount
//! 2. clean the same aged paths out of the source
//! 3. clean the destination on its own retention clock
//!
//! Phases and paths run sequentially; the first error aborts the run and
//! nothing already done is rolled back.

use std::sync::Arc;

use chrono::{DateTime, Utc};
use tracing::{error, info};

use crate::{Connector, Result, age, enumerate, retire, transfer, with_session};

/// Source of "now" for age checks.
pub type ClockFn = Arc<dyn Fn() -> DateTime<Utc> + Send + Sync + 'static>;

/// Mounts and retention thresholds for one run.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SweepPlan {
    pub source_mount: String,
    pub destination_mount: String,
    pub source_max_age_days: u32,
    pub destination_max_age_days: u32,
}

/// What a completed run did.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct RunSummary {
    pub copied: Vec<String>,
    pub source_deleted: Vec<String>,
    pub destination_deleted: Vec<String>,
}

/// What a run would touch, without touching it.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct PlanReport {
    pub source_aged: Vec<String>,
    pub destination_aged: Vec<String>,
}

pub struct Sweeper {
    connector: Arc<dyn Connector>,
    clock: ClockFn,
}

impl std::fmt::Debug for Sweeper {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Sweeper")
            .field("address", &self.connector.address())
            .finish()
    }
}

impl Sweeper {
    pub fn new(connector: Arc<dyn Connector>) -> Self {
        Self {
            connector,
            clock: Arc::new(Utc::now),
        }
    }

    /// Replace the wall clock, e.g. to evaluate ages as of a fixed instant.
    pub fn with_clock(mut self, clock: ClockFn) -> Self {
        self.clock = clock;
        self
    }

    /// Paths under `mount` whose age exceeds `max_age_days`.
    ///
    /// Enumeration and every age check share one session.
    pub async fn aged_paths(&self, mount: &str, max_age_days: u32) -> Result<Vec<String>> {
        let now = (self.clock)();
        with_session(self.connector.as_ref(), |session| async move {
            let mut aged = Vec::new();
            for path in enumerate::list_paths(session.as_ref(), mount).await? {
                if age::is_old(session.as_ref(), mount, &path, max_age_days, now).await? {
                    aged.push(path);
                }
            }
            info!(
                mount,
                max_age_days,
                count = aged.len(),
                "retrieved {} paths older than {max_age_days} days from mount {mount}",
                aged.len()
            );
            Ok(aged)
        })
        .await
        .inspect_err(|e| error!(mount, "getting paths from mount {mount} failed: {e}"))
    }

    /// Copy every aged path of `source` to `destination`; returns the paths copied.
    pub async fn copy_aged_secrets(
        &self,
        source: &str,
        destination: &str,
        max_age_days: u32,
    ) -> Result<Vec<String>> {
        let paths = self.aged_paths(source, max_age_days).await?;
        for path in &paths {
            transfer::copy(self.connector.as_ref(), source, destination, path).await?;
        }
        Ok(paths)
    }

    /// Delete every aged path of `mount`; returns the paths deleted.
    pub async fn clean_aged_paths(&self, mount: &str, max_age_days: u32) -> Result<Vec<String>> {
        let paths = self.aged_paths(mount, max_age_days).await?;
        for path in &paths {
            retire::delete(self.connector.as_ref(), mount, path).await?;
        }
        Ok(paths)
    }

    /// Copy, then clean the source, then clean the destination.
    pub async fn run(&self, plan: &SweepPlan) -> Result<RunSummary> {
        info!(
            source = %plan.source_mount,
            destination = %plan.destination_mount,
            address = self.connector.address(),
            "starting sweep"
        );

        let copied = self
            .copy_aged_secrets(
                &plan.source_mount,
                &plan.destination_mount,
                plan.source_max_age_days,
            )
            .await?;
        let source_deleted = self
            .clean_aged_paths(&plan.source_mount, plan.source_max_age_days)
            .await?;
        let destination_deleted = self
            .clean_aged_paths(&plan.destination_mount, plan.destination_max_age_days)
            .await?;

        info!(
            copied = copied.len(),
            source_deleted = source_deleted.len(),
            destination_deleted = destination_deleted.len(),
            "sweep complete"
        );
        Ok(RunSummary {
            copied,
            source_deleted,
            destination_deleted,
        })
    }

    /// Report the aged paths of both mounts without copying or deleting.
    pub async fn preview(&self, plan: &SweepPlan) -> Result<PlanReport> {
        Ok(PlanReport {
            source_aged: self
                .aged_paths(&plan.source_mount, plan.source_max_age_days)
                .await?,
            destination_aged: self
                .aged_paths(&plan.destination_mount, plan.destination_max_age_days)
                .await?,
        })
    }
}
