//! Weekly allowance accrual.
//!
//! Accrual only runs on Sundays (local time) and only for children whose
//! `last_allowance_date` is before the current week boundary, Sunday 12:00.
//! A child that has been skipped for several weeks receives a single week's
//! allowance on the next run.

use chrono::{DateTime, Datelike, Duration, FixedOffset, NaiveTime, Utc, Weekday};
use shared::{Transaction, TransactionType, WEEKLY_ALLOWANCE_DESCRIPTION};
use std::sync::Arc;
use tracing::{debug, info};

use crate::backend::domain::clock::Clock;
use crate::backend::errors::Result;
use crate::backend::storage::{ChildPatch, Collection, DbConnection};

/// Local hour of day at which the accrual week turns over
pub const ACCRUAL_HOUR: i64 = 12;

/// Whether the weekly sweep may run at this local time
pub fn is_accrual_day(now: &DateTime<FixedOffset>) -> bool {
    now.weekday() == Weekday::Sun
}

/// The most recent Sunday at [`ACCRUAL_HOUR`] local time at or before `now`.
///
/// On a Sunday morning this is the previous Sunday's boundary.
pub fn week_boundary(now: &DateTime<FixedOffset>) -> DateTime<FixedOffset> {
    let offset = *now.offset();
    let days_since_sunday = i64::from(now.weekday().num_days_from_sunday());
    let sunday = now.date_naive() - Duration::days(days_since_sunday);
    let local_noon = sunday.and_time(NaiveTime::default()) + Duration::hours(ACCRUAL_HOUR);
    let utc_noon = local_noon - Duration::seconds(i64::from(offset.local_minus_utc()));

    let boundary = DateTime::<FixedOffset>::from_naive_utc_and_offset(utc_noon, offset);
    if boundary > *now {
        boundary - Duration::weeks(1)
    } else {
        boundary
    }
}

/// Why a sweep granted nothing
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AccrualSkip {
    NotAccrualDay,
    NothingDue,
}

/// Summary of one accrual sweep
#[derive(Debug, Clone, PartialEq)]
pub struct AccrualReport {
    pub ran_at: DateTime<Utc>,
    /// `None` when the sweep did not run because it is not Sunday
    pub boundary: Option<DateTime<Utc>>,
    pub accrued: Vec<Transaction>,
    pub skipped_reason: Option<AccrualSkip>,
}

impl AccrualReport {
    pub fn total_accrued(&self) -> f64 {
        self.accrued.iter().map(|t| t.amount).sum()
    }
}

#[derive(Clone)]
pub struct AllowanceService {
    db: Arc<DbConnection>,
    clock: Arc<dyn Clock>,
}

impl AllowanceService {
    pub fn new(db: Arc<DbConnection>, clock: Arc<dyn Clock>) -> Self {
        Self { db, clock }
    }

    /// Grant one week's allowance to every child that has not been credited
    /// since the current week boundary.
    ///
    /// Each child is credited in its own atomic unit. If a unit fails the
    /// error is returned and children credited before it stay credited; a
    /// later run picks up the rest.
    pub async fn process_weekly_allowance(&self) -> Result<AccrualReport> {
        let now = self.clock.now();
        let ran_at = now.with_timezone(&Utc);

        if !is_accrual_day(&now) {
            debug!(%ran_at, "Not an accrual day, skipping allowance sweep");
            return Ok(AccrualReport {
                ran_at,
                boundary: None,
                accrued: Vec::new(),
                skipped_reason: Some(AccrualSkip::NotAccrualDay),
            });
        }

        let boundary = week_boundary(&now).with_timezone(&Utc);
        let due: Vec<String> = self
            .db
            .list_children()
            .await?
            .into_iter()
            .filter(|child| child.last_allowance_date < boundary)
            .map(|child| child.id)
            .collect();

        info!(%boundary, due = due.len(), "Processing weekly allowance");

        let mut accrued = Vec::with_capacity(due.len());
        for child_id in &due {
            if let Some(transaction) = self.accrue_child(child_id, boundary, ran_at).await? {
                accrued.push(transaction);
            }
        }

        let skipped_reason = accrued.is_empty().then_some(AccrualSkip::NothingDue);
        Ok(AccrualReport {
            ran_at,
            boundary: Some(boundary),
            accrued,
            skipped_reason,
        })
    }

    /// Credit a single child. The child is re-read inside the unit so a
    /// concurrent removal or an earlier sweep is honoured.
    async fn accrue_child(
        &self,
        child_id: &str,
        boundary: DateTime<Utc>,
        now: DateTime<Utc>,
    ) -> Result<Option<Transaction>> {
        let mut unit = self.db.begin(&Collection::ALL).await?;

        let Some(child) = unit.get_child(child_id).await? else {
            debug!(child_id, "Child removed before accrual");
            return Ok(None);
        };
        if child.last_allowance_date >= boundary {
            debug!(child_id, "Child already accrued for this week");
            return Ok(None);
        }

        let new_balance = child.balance + child.weekly_allowance;
        let patch = ChildPatch {
            balance: Some(new_balance),
            last_allowance_date: Some(boundary),
            ..Default::default()
        };
        let transaction = Transaction::new(
            child_id,
            TransactionType::Allowance,
            child.weekly_allowance,
            WEEKLY_ALLOWANCE_DESCRIPTION,
            now,
        );

        unit.update_child(child_id, &patch, now).await?;
        unit.add_transaction(&transaction).await?;
        unit.commit().await?;

        info!(
            child_id,
            amount = child.weekly_allowance,
            new_balance,
            "Added weekly allowance of ${:.2} for {}",
            child.weekly_allowance,
            child.name
        );
        Ok(Some(transaction))
    }
}
