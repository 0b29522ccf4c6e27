//! Balance snapshots and the wallet pointer.

use bigdecimal::BigDecimal;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use super::transaction::TransactionType;

/// Append-only record of one applied balance change.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Balance {
    pub id: Uuid,
    pub user_id: Uuid,
    pub transaction_id: Uuid,
    pub transaction_type: TransactionType,
    pub balance_before: BigDecimal,
    pub balance_after: BigDecimal,
    pub created_at: DateTime<Utc>,
}

impl Balance {
    /// Starting point for a user with no snapshot history.
    pub fn zero(user_id: Uuid) -> Self {
        Self {
            id: Uuid::nil(),
            user_id,
            transaction_id: Uuid::nil(),
            transaction_type: TransactionType::Credit,
            balance_before: BigDecimal::from(0),
            balance_after: BigDecimal::from(0),
            created_at: DateTime::<Utc>::MIN_UTC,
        }
    }

    /// Builds the snapshot that follows `self` after moving `amount` in the given direction.
    pub fn next(
        &self,
        transaction_id: Uuid,
        transaction_type: TransactionType,
        amount: &BigDecimal,
    ) -> Balance {
        let balance_before = self.balance_after.clone();
        let balance_after = match transaction_type {
            TransactionType::Credit => &balance_before + amount,
            TransactionType::Debit => &balance_before - amount,
        };

        Balance {
            id: Uuid::new_v4(),
            user_id: self.user_id,
            transaction_id,
            transaction_type,
            balance_before,
            balance_after,
            created_at: Utc::now(),
        }
    }
}

/// The single live running-balance pointer for a user.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Wallet {
    pub id: Uuid,
    pub user_id: Uuid,
    pub balance_before: BigDecimal,
    pub balance_after: BigDecimal,
    pub transaction_id: Option<Uuid>,
    pub transaction_type: Option<TransactionType>,
    pub balance_id: Option<Uuid>,
    pub created_at: DateTime<Utc>,
    pub updated_at: Option<DateTime<Utc>>,
}

impl Wallet {
    pub fn open(user_id: Uuid) -> Self {
        Self {
            id: Uuid::new_v4(),
            user_id,
            balance_before: BigDecimal::from(0),
            balance_after: BigDecimal::from(0),
            transaction_id: None,
            transaction_type: None,
            balance_id: None,
            created_at: Utc::now(),
            updated_at: None,
        }
    }

    /// Moves the pointer to the state produced by `snapshot`.
    pub fn advance_to(&mut self, snapshot: &Balance) {
        self.balance_before = std::mem::replace(&mut self.balance_after, snapshot.balance_after.clone());
        self.transaction_id = Some(snapshot.transaction_id);
        self.transaction_type = Some(snapshot.transaction_type);
        self.balance_id = Some(snapshot.id);
        self.updated_at = Some(Utc::now());
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::str::FromStr;

    fn dec(s: &str) -> BigDecimal {
        BigDecimal::from_str(s).unwrap()
    }

    #[test]
    fn credit_adds_and_debit_subtracts() {
        let user = Uuid::new_v4();
        let first = Balance::zero(user).next(Uuid::new_v4(), TransactionType::Credit, &dec("500.0"));
        assert_eq!(first.balance_before, dec("0"));
        assert_eq!(first.balance_after, dec("500"));

        let second = first.next(Uuid::new_v4(), TransactionType::Debit, &dec("120.25"));
        assert_eq!(second.balance_before, dec("500"));
        assert_eq!(second.balance_after, dec("379.75"));
        assert_eq!(second.user_id, user);
    }

    #[test]
    fn wallet_advance_keeps_previous_value_as_before() {
        let user = Uuid::new_v4();
        let mut wallet = Wallet::open(user);
        let snapshot = Balance::zero(user).next(Uuid::new_v4(), TransactionType::Credit, &dec("42"));

        wallet.advance_to(&snapshot);
        assert_eq!(wallet.balance_before, dec("0"));
        assert_eq!(wallet.balance_after, dec("42"));
        assert_eq!(wallet.balance_id, Some(snapshot.id));
        assert_eq!(wallet.transaction_type, Some(TransactionType::Credit));

        let next = snapshot.next(Uuid::new_v4(), TransactionType::Debit, &dec("2"));
        wallet.advance_to(&next);
        assert_eq!(wallet.balance_before, dec("42"));
        assert_eq!(wallet.balance_after, dec("40"));
    }
}
