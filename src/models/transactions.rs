//! Transaction ledger model.

use crate::error::{Result, SyncError};
use crate::feed::{Backend, ChangePayload, Filter, OrderBy};
use crate::streams::Subscription;
use crate::sync::{SyncModel, SyncService, Transition};
use crate::types::{AccountId, Cents, ChangeKind, Source, Timestamp, TransactionId, UserId};
use serde::{Deserialize, Serialize};

/// Default table holding transactions.
pub const TRANSACTIONS_TABLE: &str = "transactions";

#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TransactionType {
    Deposit,
    Withdrawal,
    Transfer,
    Payment,
    Fee,
    #[serde(other)]
    Other,
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TransactionStatus {
    Pending,
    Completed,
    Failed,
    Cancelled,
    #[serde(other)]
    Other,
}

/// Row shape as stored upstream.
#[derive(Deserialize)]
struct TransactionRow {
    id: TransactionId,
    user_id: UserId,
    #[serde(default)]
    account_id: Option<AccountId>,
    transaction_type: TransactionType,
    #[serde(default = "default_status")]
    status: TransactionStatus,
    #[serde(default)]
    category: Option<String>,
    #[serde(default)]
    description: Option<String>,
    #[serde(default)]
    created_at: Option<String>,
}

fn default_status() -> TransactionStatus {
    TransactionStatus::Pending
}

/// A ledger entry with its amount converted to reais.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct Transaction {
    pub id: TransactionId,
    pub user_id: UserId,
    pub account_id: Option<AccountId>,
    pub transaction_type: TransactionType,
    pub status: TransactionStatus,
    pub category: Option<String>,
    pub description: Option<String>,
    /// Amount in reais.
    pub amount: f64,
    /// Amount as stored, in centavos.
    pub amount_cents: i64,
    pub created_at: Option<String>,
}

impl Transaction {
    /// Translate an upstream row.
    pub fn from_row(row: &serde_json::Value) -> Result<Self> {
        let parsed = TransactionRow::deserialize(row)?;
        let cents = Cents::from_field(row, "amount")?;
        Ok(Self {
            id: parsed.id,
            user_id: parsed.user_id,
            account_id: parsed.account_id,
            transaction_type: parsed.transaction_type,
            status: parsed.status,
            category: parsed.category,
            description: parsed.description,
            amount: cents.to_major(),
            amount_cents: cents.0,
            created_at: parsed.created_at,
        })
    }

    /// Stand-in for a deleted row known only by id.
    fn removed(id: TransactionId, user_id: UserId) -> Self {
        Self {
            id,
            user_id,
            account_id: None,
            transaction_type: TransactionType::Other,
            status: TransactionStatus::Other,
            category: None,
            description: None,
            amount: 0.0,
            amount_cents: 0,
            created_at: None,
        }
    }
}

/// A single transaction change with its metadata.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct TransactionUpdate {
    pub transaction: Transaction,
    pub timestamp: Timestamp,
    pub source: Source,
    pub kind: ChangeKind,
}

impl TransactionUpdate {
    fn new(transaction: Transaction, source: Source, kind: ChangeKind) -> Self {
        Self {
            transaction,
            timestamp: Timestamp::now(),
            source,
            kind,
        }
    }
}

/// Keeps a user's transactions in sync, newest first.
#[derive(Clone, Debug)]
pub struct TransactionsModel {
    table: String,
}

impl TransactionsModel {
    pub fn new(table: impl Into<String>) -> Self {
        Self {
            table: table.into(),
        }
    }
}

impl Default for TransactionsModel {
    fn default() -> Self {
        Self::new(TRANSACTIONS_TABLE)
    }
}

/// Apply one row-level change to a newest-first ledger.
///
/// INSERT prepends, UPDATE replaces in place, DELETE removes; updating or
/// deleting an id that is not present leaves the ledger unchanged.
pub fn apply_change(ledger: &[Transaction], kind: ChangeKind, transaction: &Transaction) -> Vec<Transaction> {
    match kind {
        ChangeKind::Insert => {
            let mut next = Vec::with_capacity(ledger.len() + 1);
            next.push(transaction.clone());
            next.extend_from_slice(ledger);
            next
        }
        ChangeKind::Update => ledger
            .iter()
            .map(|t| {
                if t.id == transaction.id {
                    transaction.clone()
                } else {
                    t.clone()
                }
            })
            .collect(),
        ChangeKind::Delete => ledger
            .iter()
            .filter(|t| t.id != transaction.id)
            .cloned()
            .collect(),
    }
}

impl SyncModel for TransactionsModel {
    type Key = UserId;
    type Value = Vec<Transaction>;
    type Update = TransactionUpdate;

    fn name(&self) -> &'static str {
        "transactions"
    }

    fn entity_id(&self, key: &UserId) -> String {
        key.to_string()
    }

    fn feed_target(&self, key: &UserId) -> (String, Filter) {
        (self.table.clone(), Filter::eq("user_id", key.as_str()))
    }

    fn fetch(
        &self,
        backend: &dyn Backend,
        key: &UserId,
        source: Source,
    ) -> Result<Transition<Vec<Transaction>, TransactionUpdate>> {
        let rows = backend.fetch_many(
            &self.table,
            &Filter::eq("user_id", key.as_str()),
            &OrderBy::desc("created_at"),
        )?;
        // One unreadable row must not block the rest of the ledger.
        let ledger: Vec<Transaction> = rows
            .iter()
            .filter_map(|row| match Transaction::from_row(row) {
                Ok(transaction) => Some(transaction),
                Err(e) => {
                    tracing::warn!(user = %key, id = ?row.get("id"), error = %e, "skipping unreadable transaction row");
                    None
                }
            })
            .collect();

        tracing::debug!(user = %key, count = ledger.len(), %source, "transactions loaded");

        let updates = ledger
            .iter()
            .map(|t| TransactionUpdate::new(t.clone(), source, ChangeKind::Insert))
            .collect();
        Ok(Transition {
            value: ledger,
            updates,
        })
    }

    fn apply(
        &self,
        key: &UserId,
        current: &Vec<Transaction>,
        change: ChangePayload,
    ) -> Result<Transition<Vec<Transaction>, TransactionUpdate>> {
        let kind = change.event_type;
        let transaction = match kind {
            ChangeKind::Insert | ChangeKind::Update => {
                let row = change.new_row().ok_or_else(|| {
                    SyncError::Parse(format!("{} notification carries no new row", kind))
                })?;
                Transaction::from_row(row)?
            }
            ChangeKind::Delete => {
                let old = change
                    .old_row()
                    .ok_or_else(|| SyncError::Parse("DELETE notification carries no old row".into()))?;
                let id: TransactionId = old
                    .get("id")
                    .cloned()
                    .map(serde_json::from_value::<TransactionId>)
                    .transpose()?
                    .ok_or_else(|| SyncError::Parse("DELETE notification has no id".into()))?;
                current
                    .iter()
                    .find(|t| t.id == id)
                    .cloned()
                    .or_else(|| Transaction::from_row(old).ok())
                    .unwrap_or_else(|| Transaction::removed(id, key.clone()))
            }
        };

        Ok(Transition {
            value: apply_change(current, kind, &transaction),
            updates: vec![TransactionUpdate::new(transaction, Source::Realtime, kind)],
        })
    }

    fn source_of(update: &TransactionUpdate) -> Source {
        update.source
    }
}

/// Live transaction ledger of one user.
pub type TransactionsService = SyncService<TransactionsModel>;

impl SyncService<TransactionsModel> {
    pub fn transactions(&self) -> Vec<Transaction> {
        self.current_value()
    }

    /// Cached transaction by id.
    pub fn transaction(&self, id: &TransactionId) -> Option<Transaction> {
        self.current_value().into_iter().find(|t| &t.id == id)
    }

    pub fn transactions_by_type(&self, transaction_type: TransactionType) -> Vec<Transaction> {
        self.current_value()
            .into_iter()
            .filter(|t| t.transaction_type == transaction_type)
            .collect()
    }

    pub fn transactions_by_status(&self, status: TransactionStatus) -> Vec<Transaction> {
        self.current_value()
            .into_iter()
            .filter(|t| t.status == status)
            .collect()
    }

    /// Updates of one change kind only.
    pub fn subscribe_updates_of(&self, kind: ChangeKind) -> Subscription<TransactionUpdate> {
        self.subscribe_updates_where(move |update| update.kind == kind)
    }
}
