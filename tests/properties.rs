//! Property tests for ledger mutation and amount conversion.

use ledger_sync::models::apply_change;
use ledger_sync::{Cents, ChangeKind, Transaction};
use proptest::prelude::*;
use serde_json::json;

fn transaction(id: u32, amount: i64) -> Transaction {
    Transaction::from_row(&json!({
        "id": format!("t{}", id),
        "user_id": "user-1",
        "transaction_type": "transfer",
        "status": "completed",
        "amount": amount,
    }))
    .unwrap()
}

fn ledger_strategy() -> impl Strategy<Value = Vec<Transaction>> {
    proptest::collection::hash_set(0u32..500, 0..20).prop_flat_map(|ids| {
        let ids: Vec<u32> = ids.into_iter().collect();
        let len = ids.len();
        proptest::collection::vec(-1_000_000i64..1_000_000, len).prop_map(move |amounts| {
            ids.iter()
                .zip(amounts)
                .map(|(id, amount)| transaction(*id, amount))
                .collect()
        })
    })
}

proptest! {
    #[test]
    fn prop_insert_prepends(ledger in ledger_strategy(), amount in any::<i32>()) {
        let new = transaction(10_000, amount as i64);
        let next = apply_change(&ledger, ChangeKind::Insert, &new);

        prop_assert_eq!(next.len(), ledger.len() + 1);
        prop_assert_eq!(&next[0], &new);
        prop_assert_eq!(&next[1..], &ledger[..]);
    }

    #[test]
    fn prop_update_preserves_order(ledger in ledger_strategy(), pick in any::<prop::sample::Index>(), amount in any::<i32>()) {
        prop_assume!(!ledger.is_empty());
        let idx = pick.index(ledger.len());
        let mut changed = ledger[idx].clone();
        changed.amount_cents = amount as i64;
        changed.amount = Cents(amount as i64).to_major();

        let next = apply_change(&ledger, ChangeKind::Update, &changed);

        prop_assert_eq!(next.len(), ledger.len());
        for (i, (before, after)) in ledger.iter().zip(next.iter()).enumerate() {
            if i == idx {
                prop_assert_eq!(after, &changed);
            } else {
                prop_assert_eq!(after, before);
            }
        }
    }

    #[test]
    fn prop_delete_absent_is_noop(ledger in ledger_strategy()) {
        let absent = transaction(99_999, 1);
        prop_assert_eq!(apply_change(&ledger, ChangeKind::Delete, &absent), ledger.clone());
        prop_assert_eq!(apply_change(&ledger, ChangeKind::Update, &absent), ledger);
    }

    #[test]
    fn prop_delete_removes_only_target(ledger in ledger_strategy(), pick in any::<prop::sample::Index>()) {
        prop_assume!(!ledger.is_empty());
        let target = ledger[pick.index(ledger.len())].clone();

        let next = apply_change(&ledger, ChangeKind::Delete, &target);

        let expected: Vec<_> = ledger.iter().filter(|t| t.id != target.id).cloned().collect();
        prop_assert_eq!(next, expected);
    }

    #[test]
    fn prop_cents_round_trip_to_the_cent(cents in -10_000_000_000i64..10_000_000_000) {
        let major = Cents(cents).to_major();
        prop_assert_eq!((major * 100.0).round() as i64, cents);
    }
}
