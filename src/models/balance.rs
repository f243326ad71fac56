//! Account balance model.

use crate::error::{Result, SyncError};
use crate::feed::{Backend, ChangePayload, Filter};
use crate::sync::{SyncModel, SyncService, Transition};
use crate::types::{AccountId, Cents, Source, Timestamp, UserId};
use serde::{Deserialize, Serialize};

/// Default table holding bank accounts.
pub const ACCOUNTS_TABLE: &str = "bank_accounts";

/// Column holding the balance in cents.
const BALANCE_COLUMN: &str = "balance";

/// Identifies the balance to follow. The account is the bound entity; the
/// user is carried for logging.
#[derive(Clone, Debug, PartialEq, Eq, Hash)]
pub struct AccountKey {
    pub user_id: UserId,
    pub account_id: AccountId,
}

impl AccountKey {
    pub fn new(user_id: impl Into<UserId>, account_id: impl Into<AccountId>) -> Self {
        Self {
            user_id: user_id.into(),
            account_id: account_id.into(),
        }
    }
}

/// A balance change with its metadata.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct BalanceUpdate {
    pub account_id: AccountId,
    /// Balance in reais.
    pub balance: f64,
    /// Balance as stored, in centavos.
    pub balance_cents: i64,
    pub timestamp: Timestamp,
    pub source: Source,
}

/// Keeps the balance of one bank account in sync.
#[derive(Clone, Debug)]
pub struct BalanceModel {
    table: String,
}

impl BalanceModel {
    pub fn new(table: impl Into<String>) -> Self {
        Self {
            table: table.into(),
        }
    }

    fn transition(&self, key: &AccountKey, cents: Cents, source: Source) -> Transition<f64, BalanceUpdate> {
        let balance = cents.to_major();
        Transition {
            value: balance,
            updates: vec![BalanceUpdate {
                account_id: key.account_id.clone(),
                balance,
                balance_cents: cents.0,
                timestamp: Timestamp::now(),
                source,
            }],
        }
    }
}

impl Default for BalanceModel {
    fn default() -> Self {
        Self::new(ACCOUNTS_TABLE)
    }
}

impl SyncModel for BalanceModel {
    type Key = AccountKey;
    type Value = f64;
    type Update = BalanceUpdate;

    fn name(&self) -> &'static str {
        "balance"
    }

    fn entity_id(&self, key: &AccountKey) -> String {
        key.account_id.to_string()
    }

    fn feed_target(&self, key: &AccountKey) -> (String, Filter) {
        (self.table.clone(), Filter::eq("id", key.account_id.as_str()))
    }

    fn fetch(
        &self,
        backend: &dyn Backend,
        key: &AccountKey,
        source: Source,
    ) -> Result<Transition<f64, BalanceUpdate>> {
        let row = backend.fetch_one(&self.table, &Filter::eq("id", key.account_id.as_str()))?;
        let cents = Cents::from_field(&row, BALANCE_COLUMN)?;

        tracing::debug!(
            user = %key.user_id,
            account = %key.account_id,
            balance_cents = cents.0,
            %source,
            "balance loaded"
        );
        Ok(self.transition(key, cents, source))
    }

    fn apply(
        &self,
        key: &AccountKey,
        _current: &f64,
        change: ChangePayload,
    ) -> Result<Transition<f64, BalanceUpdate>> {
        let row = change.new_row().ok_or_else(|| {
            SyncError::Parse(format!("{} notification carries no account row", change.event_type))
        })?;
        let cents = Cents::from_field(row, BALANCE_COLUMN)?;
        Ok(self.transition(key, cents, Source::Realtime))
    }

    fn source_of(update: &BalanceUpdate) -> Source {
        update.source
    }
}

/// Live balance of one bank account.
pub type BalanceService = SyncService<BalanceModel>;

impl SyncService<BalanceModel> {
    /// Current balance in reais.
    pub fn balance(&self) -> f64 {
        self.current_value()
    }
}
