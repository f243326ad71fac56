//! Integration tests for the sync services.

use ledger_sync::{
    AccountKey, Backend, BalanceModel, BalanceService, ChangeKind, FeedOp, Freshness,
    LiveTransactions, MemoryBackend, Source, TransactionStatus, TransactionType,
    TransactionsModel, TransactionsService, UserId,
};
use serde_json::json;
use std::sync::Arc;
use std::thread;

const ACCOUNTS: &str = "bank_accounts";
const TRANSACTIONS: &str = "transactions";

fn init_tracing() {
    let _ = tracing_subscriber::fmt().with_test_writer().try_init();
}

fn backend() -> Arc<MemoryBackend> {
    init_tracing();
    let backend = Arc::new(MemoryBackend::new());
    backend.seed(ACCOUNTS, json!({"id": "acc-1", "user_id": "user-1", "balance": 123456}));
    backend.seed(ACCOUNTS, json!({"id": "acc-2", "user_id": "user-1", "balance": 500}));
    backend
}

fn balances(backend: &Arc<MemoryBackend>) -> BalanceService {
    let shared: Arc<dyn Backend> = backend.clone();
    BalanceService::new(shared, BalanceModel::default())
}

fn transactions(backend: &Arc<MemoryBackend>) -> TransactionsService {
    let shared: Arc<dyn Backend> = backend.clone();
    TransactionsService::new(shared, TransactionsModel::default())
}

fn tx(id: &str, amount: i64, created_at: &str) -> serde_json::Value {
    json!({
        "id": id,
        "user_id": "user-1",
        "account_id": "acc-1",
        "transaction_type": "payment",
        "status": "completed",
        "amount": amount,
        "created_at": created_at
    })
}

fn ids(service: &TransactionsService) -> Vec<String> {
    service
        .transactions()
        .iter()
        .map(|t| t.id.to_string())
        .collect()
}

// --- Lifecycle ---

#[test]
fn test_start_twice_opens_one_feed() {
    let backend = backend();
    let service = balances(&backend);
    let key = AccountKey::new("user-1", "acc-1");

    service.start(key.clone()).unwrap();
    service.start(key).unwrap();

    assert_eq!(backend.fetch_count(), 1);
    assert_eq!(backend.live_feed_count(), 1);
    assert_eq!(backend.feed_log().len(), 1);
}

#[test]
fn test_rebind_releases_before_opening() {
    let backend = backend();
    let service = balances(&backend);

    service.start(AccountKey::new("user-1", "acc-1")).unwrap();
    service.start(AccountKey::new("user-1", "acc-2")).unwrap();

    let log = backend.feed_log();
    assert_eq!(log.len(), 3);
    let first = match &log[0] {
        FeedOp::Opened { id, filter, .. } => {
            assert_eq!(filter.to_string(), "id=eq.acc-1");
            *id
        }
        other => panic!("unexpected {:?}", other),
    };
    assert_eq!(log[1], FeedOp::Released { id: first });
    assert!(matches!(&log[2], FeedOp::Opened { filter, .. } if filter.to_string() == "id=eq.acc-2"));

    assert_eq!(backend.max_live_feeds(), 1);
    assert_eq!(service.balance(), 5.0);
    assert_eq!(
        service.current_connection_state().bound_key.as_deref(),
        Some("acc-2")
    );
}

#[test]
fn test_stop_clears_binding_keeps_value() {
    let backend = backend();
    let service = balances(&backend);

    service.start(AccountKey::new("user-1", "acc-1")).unwrap();
    service.stop();

    let conn = service.current_connection_state();
    assert!(!conn.is_connected);
    assert!(conn.bound_key.is_none());
    assert_eq!(service.balance(), 1234.56);
    assert_eq!(backend.live_feed_count(), 0);
    assert_eq!(service.freshness(), Freshness::Stale);
}

#[test]
fn test_concurrent_starts_share_one_feed() {
    let backend = backend();
    let service = balances(&backend);

    let handles: Vec<_> = (0..8)
        .map(|_| {
            let service = service.clone();
            thread::spawn(move || service.start(AccountKey::new("user-1", "acc-1")))
        })
        .collect();
    for handle in handles {
        handle.join().unwrap().unwrap();
    }

    assert_eq!(backend.fetch_count(), 1);
    assert_eq!(backend.max_live_feeds(), 1);
}

#[test]
fn test_last_lease_closes_feed() {
    let backend = backend();
    let service = balances(&backend);
    let key = AccountKey::new("user-1", "acc-1");

    let first = service.acquire(key.clone()).unwrap();
    let second = service.acquire(key).unwrap();
    assert_eq!(service.lease_count(), 2);
    assert_eq!(backend.live_feed_count(), 1);

    drop(first);
    assert_eq!(backend.live_feed_count(), 1);
    drop(second);
    assert_eq!(backend.live_feed_count(), 0);
    assert_eq!(service.balance(), 1234.56);
}

#[test]
fn test_stale_lease_does_not_close_new_binding() {
    let backend = backend();
    let service = balances(&backend);

    let old = service.acquire(AccountKey::new("user-1", "acc-1")).unwrap();
    service.start(AccountKey::new("user-1", "acc-2")).unwrap();
    drop(old);

    assert_eq!(backend.live_feed_count(), 1);
    assert!(service.current_connection_state().is_connected);
}

// --- Balance ---

#[test]
fn test_balance_converted_from_cents() {
    let backend = backend();
    let service = balances(&backend);

    service.start(AccountKey::new("user-1", "acc-1")).unwrap();
    assert_eq!(service.balance(), 1234.56);
    assert_eq!(service.freshness(), Freshness::Live);
}

#[test]
fn test_realtime_balance_update() {
    let backend = backend();
    let service = balances(&backend);
    service.start(AccountKey::new("user-1", "acc-1")).unwrap();
    let values = service.subscribe_value();
    let realtime = service.subscribe_updates_from(Source::Realtime);

    backend
        .update(ACCOUNTS, json!({"id": "acc-1", "user_id": "user-1", "balance": 99}))
        .unwrap();

    assert_eq!(values.drain(), vec![1234.56, 0.99]);
    let updates = realtime.drain();
    assert_eq!(updates.len(), 1);
    assert_eq!(updates[0].balance_cents, 99);
}

#[test]
fn test_other_account_changes_are_not_delivered() {
    let backend = backend();
    let service = balances(&backend);
    service.start(AccountKey::new("user-1", "acc-1")).unwrap();

    backend
        .update(ACCOUNTS, json!({"id": "acc-2", "user_id": "user-1", "balance": 1}))
        .unwrap();

    assert_eq!(service.balance(), 1234.56);
}

#[test]
fn test_repeated_balance_suppressed_on_value_stream_only() {
    let backend = backend();
    let service = balances(&backend);
    service.start(AccountKey::new("user-1", "acc-1")).unwrap();

    let values = service.subscribe_value();
    let updates = service.subscribe_updates();
    values.drain();
    updates.drain();

    let row = json!({"id": "acc-1", "user_id": "user-1", "balance": 10000});
    backend.update(ACCOUNTS, row.clone()).unwrap();
    backend.update(ACCOUNTS, row).unwrap();

    assert_eq!(values.drain(), vec![100.0]);
    assert_eq!(updates.drain().len(), 2);

    let late = service.subscribe_value();
    assert_eq!(late.drain(), vec![100.0]);
}

#[test]
fn test_refresh_emits_refresh_update() {
    let backend = backend();
    let service = balances(&backend);
    let key = AccountKey::new("user-1", "acc-1");
    service.start(key.clone()).unwrap();
    let refreshes = service.subscribe_updates_from(Source::Refresh);

    service.refresh(&key).unwrap();

    assert_eq!(refreshes.drain().len(), 1);
    assert_eq!(backend.fetch_count(), 2);
}

// --- Transactions ---

#[test]
fn test_initial_load_is_newest_first() {
    let backend = backend();
    backend.seed(TRANSACTIONS, tx("t1", 100, "2024-01-01T00:00:00Z"));
    backend.seed(TRANSACTIONS, tx("t3", 300, "2024-03-01T00:00:00Z"));
    backend.seed(TRANSACTIONS, tx("t2", 200, "2024-02-01T00:00:00Z"));
    let service = transactions(&backend);

    service.start(UserId::from("user-1")).unwrap();

    assert_eq!(ids(&service), vec!["t3", "t2", "t1"]);
    assert_eq!(service.transaction(&"t2".into()).map(|t| t.amount), Some(2.0));
}

#[test]
fn test_insert_update_delete_flow() {
    let backend = backend();
    backend.seed(TRANSACTIONS, tx("t1", 100, "2024-01-01T00:00:00Z"));
    let service = transactions(&backend);
    service.start(UserId::from("user-1")).unwrap();
    let deletes = service.subscribe_updates_of(ChangeKind::Delete);

    backend.insert(TRANSACTIONS, tx("t2", 200, "2024-02-01T00:00:00Z"));
    assert_eq!(ids(&service), vec!["t2", "t1"]);

    let mut changed = tx("t1", 150, "2024-01-01T00:00:00Z");
    changed["status"] = json!("cancelled");
    backend.update(TRANSACTIONS, changed).unwrap();
    assert_eq!(ids(&service), vec!["t2", "t1"]);
    assert_eq!(service.transactions()[1].amount_cents, 150);

    backend.delete(TRANSACTIONS, "t2").unwrap();
    assert_eq!(ids(&service), vec!["t1"]);
    let removed = deletes.drain();
    assert_eq!(removed.len(), 1);
    assert_eq!(removed[0].transaction.id.as_str(), "t2");
}

#[test]
fn test_delete_of_unknown_id_is_noop() {
    let backend = backend();
    backend.seed(TRANSACTIONS, tx("t1", 100, "2024-01-01T00:00:00Z"));
    let service = transactions(&backend);
    service.start(UserId::from("user-1")).unwrap();

    backend.inject_raw(
        TRANSACTIONS,
        json!({"eventType": "DELETE", "old": {"id": "missing"}, "new": {}}),
    );

    assert_eq!(ids(&service), vec!["t1"]);
    assert!(service.current_connection_state().is_connected);
}

#[test]
fn test_query_helpers_filter_cached_ledger() {
    let backend = backend();
    let mut deposit = tx("t1", 100, "2024-01-01T00:00:00Z");
    deposit["transaction_type"] = json!("deposit");
    let mut pending = tx("t2", 200, "2024-02-01T00:00:00Z");
    pending["status"] = json!("pending");
    backend.seed(TRANSACTIONS, deposit);
    backend.seed(TRANSACTIONS, pending);
    let service = transactions(&backend);
    service.start(UserId::from("user-1")).unwrap();

    let deposits = service.transactions_by_type(TransactionType::Deposit);
    assert_eq!(deposits.len(), 1);
    assert_eq!(deposits[0].id.as_str(), "t1");

    let pending = service.transactions_by_status(TransactionStatus::Pending);
    assert_eq!(pending.len(), 1);
    assert_eq!(pending[0].id.as_str(), "t2");
    assert!(service.transaction(&"t9".into()).is_none());
}

#[test]
fn test_other_users_transactions_are_filtered() {
    let backend = backend();
    let service = transactions(&backend);
    service.start(UserId::from("user-1")).unwrap();

    let mut foreign = tx("x1", 100, "2024-01-01T00:00:00Z");
    foreign["user_id"] = json!("user-2");
    backend.insert(TRANSACTIONS, foreign);

    assert!(service.transactions().is_empty());
}

#[test]
fn test_live_transactions_reports_new_transaction() {
    let backend = backend();
    let service = transactions(&backend);
    let mut view = LiveTransactions::mount(&service, Some(UserId::from("user-1")));
    assert!(view.new_transaction().is_none());

    backend.insert(TRANSACTIONS, tx("t9", 900, "2024-09-01T00:00:00Z"));
    assert!(view.poll());

    assert_eq!(view.transactions().len(), 1);
    assert_eq!(view.new_transaction().map(|t| t.amount), Some(9.0));
    assert_eq!(view.freshness(), Freshness::Live);
}

#[test]
fn test_live_view_over_large_ledger_sees_later_inserts() {
    let backend = backend();
    for i in 0..300 {
        backend.seed(TRANSACTIONS, tx(&format!("t{}", i), 100, "2024-01-01T00:00:00Z"));
    }
    let service = transactions(&backend);
    let mut view = LiveTransactions::mount(&service, Some(UserId::from("user-1")));
    assert_eq!(view.transactions().len(), 300);

    backend.insert(TRANSACTIONS, tx("fresh", 4200, "2024-06-01T00:00:00Z"));
    assert!(view.poll());

    assert_eq!(view.transactions().len(), 301);
    assert_eq!(
        view.new_transaction().map(|t| t.id.as_str()),
        Some("fresh")
    );
}

#[test]
fn test_lagging_subscriber_keeps_receiving() {
    let backend = backend();
    let service = transactions(&backend);
    service.start(UserId::from("user-1")).unwrap();
    let updates = service.subscribe_updates();
    updates.drain();

    for i in 0..400 {
        backend.insert(TRANSACTIONS, tx(&format!("t{}", i), 1, "2024-01-01T00:00:00Z"));
    }

    let pending = updates.drain();
    assert_eq!(pending.len(), 256);
    assert_eq!(updates.missed(), 144);
    assert_eq!(pending.last().map(|u| u.transaction.id.as_str()), Some("t399"));

    backend.insert(TRANSACTIONS, tx("after", 1, "2024-01-02T00:00:00Z"));
    assert_eq!(updates.drain().len(), 1);
}
