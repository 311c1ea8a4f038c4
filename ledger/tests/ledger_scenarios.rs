//! End-to-end behaviour of the ledger through its public surface.

use std::sync::Arc;

use allowance_ledger::backend::DbConnection;
use allowance_ledger::{AllowanceLedger, FixedClock, LedgerError};
use chrono::{DateTime, Duration, FixedOffset, TimeZone, Utc};
use shared::{AddChildRequest, ChildProfile, TransactionType, UpdateChildRequest};

fn local(y: i32, m: u32, d: u32, h: u32) -> DateTime<FixedOffset> {
    FixedOffset::east_opt(0).unwrap().with_ymd_and_hms(y, m, d, h, 0, 0).unwrap()
}

/// Ledger on a fresh in-memory store, clock on Wednesday 2024-02-21 09:00
async fn setup_ledger() -> (AllowanceLedger, Arc<FixedClock>) {
    let db = Arc::new(DbConnection::init_in_memory().await.expect("Failed to open store"));
    let clock = Arc::new(FixedClock::new(local(2024, 2, 21, 9)));
    (AllowanceLedger::new(db, clock.clone()), clock)
}

/// Opening balance plus the signed sum of the child's ledger
async fn assert_consistent(ledger: &AllowanceLedger, child: &ChildProfile, opening_balance: f64) {
    let audit = ledger.audit_child(&child.id).await.unwrap();
    assert!(
        (audit.implied_opening_balance() - opening_balance).abs() < 1e-9,
        "balance {} drifted from ledger total {} (opening {})",
        audit.cached_balance,
        audit.ledger_total,
        opening_balance
    );
}

#[tokio::test]
async fn scenario_deduction_then_payout() {
    let (ledger, _) = setup_ledger().await;

    let alice = ledger
        .add_child(AddChildRequest::new("Alice", 10.0).with_initial_balance(5.0))
        .await
        .unwrap();
    assert_eq!(alice.balance, 5.0);
    assert!(ledger.transactions().await.unwrap().is_empty());

    let deduction = ledger.add_deduction(&alice.id, 2.0, "candy").await.unwrap();
    assert_eq!(deduction.transaction_type, TransactionType::Deduction);
    assert_eq!(deduction.amount, 2.0);
    assert_eq!(ledger.get_child(&alice.id).await.unwrap().unwrap().balance, 3.0);

    let payout = ledger.pay_child(&alice.id).await.unwrap().unwrap();
    assert_eq!(payout.transaction_type, TransactionType::Payout);
    assert_eq!(payout.amount, 3.0);
    assert_eq!(ledger.get_child(&alice.id).await.unwrap().unwrap().balance, 0.0);

    let transactions = ledger.transactions().await.unwrap();
    assert_eq!(transactions.len(), 2);
    assert_consistent(&ledger, &alice, 5.0).await;
}

#[tokio::test]
async fn scenario_missed_weeks_accrue_once() {
    let (ledger, clock) = setup_ledger().await;
    let alice = ledger.add_child(AddChildRequest::new("Alice", 10.0)).await.unwrap();

    // Two full weeks later, Sunday afternoon
    clock.set(local(2024, 3, 10, 15));
    let report = ledger.process_weekly_allowance().await.unwrap();

    assert_eq!(report.accrued.len(), 1);
    assert_eq!(report.accrued[0].amount, 10.0);
    assert_eq!(report.accrued[0].transaction_type, TransactionType::Allowance);

    let stored = ledger.get_child(&alice.id).await.unwrap().unwrap();
    assert_eq!(stored.balance, 10.0);
    assert_eq!(stored.last_allowance_date, Utc.with_ymd_and_hms(2024, 3, 10, 12, 0, 0).unwrap());
}

#[tokio::test]
async fn scenario_payout_of_empty_balance_is_noop() {
    let (ledger, clock) = setup_ledger().await;
    let alice = ledger.add_child(AddChildRequest::new("Alice", 10.0)).await.unwrap();
    clock.advance(Duration::hours(1));

    assert!(ledger.pay_child(&alice.id).await.unwrap().is_none());

    let stored = ledger.get_child(&alice.id).await.unwrap().unwrap();
    assert_eq!(stored.updated_at, alice.updated_at);
    assert!(ledger.transactions().await.unwrap().is_empty());
}

#[tokio::test]
async fn balance_tracks_ledger_across_operations() {
    let (ledger, clock) = setup_ledger().await;
    let openings = [("Alice", 10.0, 5.0), ("Bob", 7.25, 0.0), ("Cleo", 0.0, -3.0)];

    let mut children = Vec::new();
    for (name, weekly_allowance, opening) in openings {
        let child = ledger
            .add_child(AddChildRequest::new(name, weekly_allowance).with_initial_balance(opening))
            .await
            .unwrap();
        children.push((child, opening));
    }

    // Four weeks of mixed activity, checking after every operation
    for week in 0..4_i64 {
        for (index, (child, opening)) in children.iter().enumerate() {
            clock.advance(Duration::hours(5));
            let amount = 0.75 + (week as f64) * 1.5 + index as f64;
            ledger.add_deduction(&child.id, amount, "chores missed").await.unwrap();
            assert_consistent(&ledger, child, *opening).await;

            if (week + index as i64) % 3 == 0 {
                ledger.pay_child(&child.id).await.unwrap();
                assert_consistent(&ledger, child, *opening).await;
            }
        }

        clock.set(local(2024, 3, 3, 14) + Duration::weeks(week));
        ledger.process_weekly_allowance().await.unwrap();
        for (child, opening) in &children {
            assert_consistent(&ledger, child, *opening).await;
        }
    }

    for (child, _) in &children {
        let allowances = ledger
            .transactions()
            .await
            .unwrap()
            .into_iter()
            .filter(|t| t.child_id == child.id && t.transaction_type == TransactionType::Allowance)
            .count();
        assert_eq!(allowances, 4);
    }
}

#[tokio::test]
async fn balance_override_is_outside_the_ledger() {
    let (ledger, _) = setup_ledger().await;
    let alice = ledger
        .add_child(AddChildRequest::new("Alice", 10.0).with_initial_balance(5.0))
        .await
        .unwrap();

    ledger
        .update_child(
            &alice.id,
            UpdateChildRequest {
                balance: Some(20.0),
                ..Default::default()
            },
        )
        .await
        .unwrap();

    assert!(ledger.transactions().await.unwrap().is_empty());
    let audit = ledger.audit_child(&alice.id).await.unwrap();
    assert_eq!(audit.implied_opening_balance(), 20.0);
}

#[tokio::test]
async fn migration_twice_equals_migration_once() {
    let (ledger, _) = setup_ledger().await;
    let alice = ledger
        .add_child(AddChildRequest::new("Alice", 10.0).with_initial_balance(1.0))
        .await
        .unwrap();
    let bob = ledger.add_child(AddChildRequest::new("Bob", 5.0)).await.unwrap();

    for (child, json) in [
        (
            &alice,
            r#"[{"amount": 2, "reason": "candy", "date": "2024-01-07T10:00:00Z"},
                {"amount": 0.5, "reason": "gum", "date": "2024-01-14T10:00:00Z"}]"#,
        ),
        (&bob, r#"[{"amount": 3, "reason": "toy", "date": "2024-01-20T10:00:00Z"}]"#),
    ] {
        sqlx::query("UPDATE children SET deductions = ? WHERE id = ?")
            .bind(json)
            .bind(&child.id)
            .execute(ledger.db().pool())
            .await
            .unwrap();
    }

    let first = ledger.migrate_legacy_deductions().await.unwrap();
    assert_eq!(first.children_migrated, 2);
    assert_eq!(first.transactions_created, 3);
    let snapshot_once = ledger.snapshot().await.unwrap();

    let second = ledger.migrate_legacy_deductions().await.unwrap();
    assert!(second.is_noop());
    assert_eq!(ledger.snapshot().await.unwrap(), snapshot_once);

    let descriptions: Vec<&str> = snapshot_once.transactions.iter().map(|t| t.description.as_str()).collect();
    assert_eq!(descriptions, vec!["toy", "gum", "candy"]);
}

#[tokio::test]
async fn accrual_twice_on_same_sunday_grants_once() {
    let (ledger, clock) = setup_ledger().await;
    let alice = ledger.add_child(AddChildRequest::new("Alice", 10.0)).await.unwrap();
    let bob = ledger.add_child(AddChildRequest::new("Bob", 4.0)).await.unwrap();

    clock.set(local(2024, 3, 10, 18));
    let first = ledger.process_weekly_allowance().await.unwrap();
    let second = ledger.process_weekly_allowance().await.unwrap();

    assert_eq!(first.accrued.len(), 2);
    assert!(second.accrued.is_empty());

    for child in [&alice, &bob] {
        let count = ledger
            .transactions()
            .await
            .unwrap()
            .iter()
            .filter(|t| t.child_id == child.id)
            .count();
        assert_eq!(count, 1);
    }
}

#[tokio::test]
async fn removing_a_child_removes_its_ledger() {
    let (ledger, _) = setup_ledger().await;
    let alice = ledger
        .add_child(AddChildRequest::new("Alice", 10.0).with_initial_balance(9.0))
        .await
        .unwrap();
    let bob = ledger.add_child(AddChildRequest::new("Bob", 5.0)).await.unwrap();
    ledger.add_deduction(&alice.id, 1.0, "a").await.unwrap();
    ledger.add_deduction(&alice.id, 2.0, "b").await.unwrap();
    ledger.pay_child(&alice.id).await.unwrap();
    ledger.add_deduction(&bob.id, 1.0, "c").await.unwrap();

    let removal = ledger.remove_child(&alice.id).await.unwrap();
    assert!(removal.child_existed);
    assert_eq!(removal.transactions_removed, 3);

    let remaining = ledger.transactions().await.unwrap();
    assert!(remaining.iter().all(|t| t.child_id != alice.id));
    assert_eq!(remaining.len(), 1);
    assert!(ledger.get_child(&alice.id).await.unwrap().is_none());

    // Removing again is a no-op
    let again = ledger.remove_child(&alice.id).await.unwrap();
    assert!(!again.child_existed);
    assert_eq!(again.transactions_removed, 0);
}

#[tokio::test]
async fn payout_zeroes_balance() {
    let (ledger, _) = setup_ledger().await;
    let alice = ledger
        .add_child(AddChildRequest::new("Alice", 10.0).with_initial_balance(42.5))
        .await
        .unwrap();

    let payout = ledger.pay_child(&alice.id).await.unwrap().unwrap();
    assert_eq!(payout.amount, 42.5);
    assert_eq!(payout.transaction_type, TransactionType::Payout);
    assert_eq!(ledger.get_child(&alice.id).await.unwrap().unwrap().balance, 0.0);
    assert_eq!(ledger.transactions().await.unwrap(), vec![payout]);
}

#[tokio::test]
async fn errors_leave_state_untouched() {
    let (ledger, _) = setup_ledger().await;
    let alice = ledger.add_child(AddChildRequest::new("Alice", 10.0)).await.unwrap();

    assert!(matches!(
        ledger.add_child(AddChildRequest::new("  ", 10.0)).await,
        Err(LedgerError::Validation(_))
    ));
    assert!(matches!(
        ledger.add_child(AddChildRequest::new("Bob", -1.0)).await,
        Err(LedgerError::Validation(_))
    ));
    assert!(matches!(
        ledger.add_deduction(&alice.id, -5.0, "oops").await,
        Err(LedgerError::Validation(_))
    ));
    assert!(ledger
        .update_child("missing", UpdateChildRequest::default())
        .await
        .unwrap_err()
        .is_not_found());

    assert_eq!(ledger.children().await.unwrap(), vec![alice]);
    assert!(ledger.transactions().await.unwrap().is_empty());
}

#[tokio::test]
async fn watcher_reflects_each_operation() {
    let (ledger, _) = setup_ledger().await;
    let mut watcher = ledger.watch();

    let alice = ledger
        .add_child(AddChildRequest::new("Alice", 10.0).with_initial_balance(3.0))
        .await
        .unwrap();
    let snapshot = watcher.changed().await.unwrap().unwrap();
    assert_eq!(snapshot.children.len(), 1);

    ledger.pay_child(&alice.id).await.unwrap();
    let snapshot = watcher.changed().await.unwrap().unwrap();
    assert_eq!(snapshot.child(&alice.id).unwrap().balance, 0.0);
    assert_eq!(snapshot.transactions_for(&alice.id).count(), 1);
}

#[tokio::test]
async fn concurrent_operations_on_file_store_all_succeed() {
    let dir = tempfile::tempdir().unwrap();
    let url = allowance_ledger::LedgerConfig::database_url_for(dir.path());
    let db = Arc::new(DbConnection::new(&url).await.expect("Failed to create database"));
    // Sunday afternoon, so the sweep has work to do
    let clock = Arc::new(FixedClock::new(local(2024, 3, 10, 15)));
    let ledger = AllowanceLedger::new(db, clock.clone());

    clock.set(local(2024, 3, 6, 9));
    let alice = ledger
        .add_child(AddChildRequest::new("Alice", 10.0).with_initial_balance(100.0))
        .await
        .unwrap();
    clock.set(local(2024, 3, 10, 15));

    let (accrual, deduction) = tokio::join!(
        ledger.process_weekly_allowance(),
        ledger.add_deduction(&alice.id, 1.0, "snack")
    );
    assert_eq!(accrual.expect("Accrual failed").accrued.len(), 1);
    deduction.expect("Deduction failed");

    for _ in 0..20 {
        let (first, second) = tokio::join!(
            ledger.add_deduction(&alice.id, 1.0, "a"),
            ledger.add_deduction(&alice.id, 1.0, "b")
        );
        first.expect("First deduction failed");
        second.expect("Second deduction failed");
    }

    let stored = ledger.get_child(&alice.id).await.unwrap().unwrap();
    assert_eq!(stored.balance, 100.0 + 10.0 - 1.0 - 40.0);
    assert_eq!(ledger.transactions().await.unwrap().len(), 42);
    assert_consistent(&ledger, &alice, 100.0).await;
}
