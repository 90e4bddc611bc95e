//! Batched duty-status automation against the portal.
//!
//! One run signs in, selects the vessel, then makes two passes:
//!
//! 1. The first list is marked **OFF** duty.
//! 2. The second list is marked **ON** duty, with the status pre-filter
//!    re-applied whenever a new batch starts (the portal lists everyone
//!    by default).
//!
//! Within a pass every row is searched for and selected individually.
//! Selected rows accumulate in a [`Batch`]; a full batch, and whatever is
//! left at the end of the list, is committed with one bulk action. Row
//! failures only cost that row. A failed bulk action costs every row in the
//! batch. Login and vessel selection failures abort the run.

pub mod batch;
mod portal;

use std::fmt;

use serde::{Deserialize, Serialize};

pub use batch::Batch;

use crate::config::{EngineConfig, PortalConfig, PortalSelectors};
use crate::driver::PageDriver;
use crate::error::{AutomationError, SelectError};
use crate::sheet::Row;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum DutyMode {
    Off,
    On,
}

impl DutyMode {
    fn action_selector(self, selectors: &PortalSelectors) -> &str {
        match self {
            DutyMode::Off => &selectors.bulk_off_duty,
            DutyMode::On => &selectors.bulk_on_duty,
        }
    }
}

impl fmt::Display for DutyMode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            DutyMode::Off => write!(f, "OFF"),
            DutyMode::On => write!(f, "ON"),
        }
    }
}

/// How far a row got before it was applied or dropped.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RowState {
    Init,
    Searched,
    Selected,
    Batched,
    Applied,
    Failed,
}

impl fmt::Display for RowState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            RowState::Init => "init",
            RowState::Searched => "searched",
            RowState::Selected => "selected",
            RowState::Batched => "batched",
            RowState::Applied => "applied",
            RowState::Failed => "failed",
        };
        f.write_str(s)
    }
}

/// One list's worth of rows and the column holding their identifiers.
#[derive(Debug, Clone, Copy)]
pub struct ListInput<'a> {
    pub rows: &'a [Row],
    pub identifier_column: &'a str,
}

#[derive(Debug, Clone, Default, PartialEq)]
pub struct ListOutcome {
    /// Rows confirmed applied by a bulk action.
    pub applied: usize,
    /// Rows that did not reach the applied state, with their original columns.
    pub failed: Vec<Row>,
    /// Number of bulk actions attempted.
    pub bulk_applies: usize,
}

impl ListOutcome {
    pub fn total(&self) -> usize {
        self.applied + self.failed.len()
    }
}

#[derive(Debug, Clone, Default, PartialEq)]
pub struct RunOutcome {
    pub off_duty: ListOutcome,
    pub on_duty: ListOutcome,
}

pub struct AutomationEngine {
    config: EngineConfig,
    portal: PortalConfig,
}

impl AutomationEngine {
    pub fn new(config: EngineConfig, portal: PortalConfig) -> Self {
        Self { config, portal }
    }

    pub fn config(&self) -> &EngineConfig {
        &self.config
    }

    /// Full run: login, vessel, OFF pass, ON pass, logout.
    ///
    /// Logout is best-effort and never changes the outcome.
    pub async fn run(
        &self,
        driver: &dyn PageDriver,
        vessel: &str,
        off_duty: ListInput<'_>,
        on_duty: ListInput<'_>,
    ) -> Result<RunOutcome, AutomationError> {
        self.login(driver).await.map_err(AutomationError::Login)?;
        tracing::info!("Logged in to portal");

        self.select_vessel(driver, vessel)
            .await
            .map_err(|source| AutomationError::VesselSelection {
                vessel: vessel.to_string(),
                source,
            })?;
        tracing::info!(vessel, "Vessel selected");

        let off = self
            .process_list(
                driver,
                off_duty.rows,
                off_duty.identifier_column,
                DutyMode::Off,
                false,
            )
            .await;
        let on = self
            .process_list(
                driver,
                on_duty.rows,
                on_duty.identifier_column,
                DutyMode::On,
                true,
            )
            .await;

        if let Err(e) = self.logout(driver).await {
            tracing::warn!(error = %e, "Logout failed, ignoring");
        }

        Ok(RunOutcome {
            off_duty: off,
            on_duty: on,
        })
    }

    /// Search, select and bulk-apply every row of one list.
    ///
    /// Every input row ends up either applied or in `failed`, never both.
    pub async fn process_list(
        &self,
        driver: &dyn PageDriver,
        rows: &[Row],
        identifier_column: &str,
        mode: DutyMode,
        apply_pre_filter: bool,
    ) -> ListOutcome {
        let mut outcome = ListOutcome::default();
        let mut batch = Batch::new(self.config.batch_size);

        for row in rows {
            if apply_pre_filter && batch.is_empty() {
                self.pre_filter(driver).await;
            }

            let identifier = row.identifier(identifier_column);
            let mut state = RowState::Init;
            let selected = if identifier.is_empty() {
                Err(SelectError::EmptyIdentifier)
            } else {
                self.search_and_select(driver, &identifier, &mut state)
                    .await
            };

            match selected {
                Ok(()) => {
                    tracing::debug!(identifier = %identifier, state = %RowState::Batched, "Row selected");
                    batch.push(row.clone());
                    if batch.is_full() {
                        self.flush(driver, mode, &mut batch, &mut outcome).await;
                    }
                }
                Err(e) => {
                    tracing::warn!(
                        identifier = %identifier,
                        mode = %mode,
                        reached = %state,
                        error = %e,
                        "Row failed"
                    );
                    outcome.failed.push(row.clone());
                }
            }
        }

        if !batch.is_empty() {
            if apply_pre_filter {
                self.pre_filter(driver).await;
            }
            self.flush(driver, mode, &mut batch, &mut outcome).await;
        }

        tracing::info!(
            mode = %mode,
            rows = rows.len(),
            applied = outcome.applied,
            failed = outcome.failed.len(),
            bulk_applies = outcome.bulk_applies,
            "List processed"
        );
        outcome
    }

    /// Commit the open batch. On failure every batched row is failed.
    async fn flush(
        &self,
        driver: &dyn PageDriver,
        mode: DutyMode,
        batch: &mut Batch,
        outcome: &mut ListOutcome,
    ) {
        let rows = batch.take();
        outcome.bulk_applies += 1;
        match self.bulk_apply(driver, mode).await {
            Ok(()) => {
                tracing::info!(mode = %mode, rows = rows.len(), state = %RowState::Applied, "Batch applied");
                outcome.applied += rows.len();
            }
            Err(e) => {
                tracing::warn!(
                    mode = %mode,
                    rows = rows.len(),
                    state = %RowState::Failed,
                    error = %e,
                    "Bulk action failed, failing whole batch"
                );
                outcome.failed.extend(rows);
            }
        }
    }

    async fn pre_filter(&self, driver: &dyn PageDriver) {
        if let Err(e) = self.apply_pre_filter(driver).await {
            tracing::warn!(error = %e, "Status pre-filter not applied");
        }
    }
}
