//! Conflict resolution: last-write-wins on update timestamps
//!
//! Single-user-per-account makes LWW acceptable here. The comparison uses
//! local wall-clock time against the server's update time, which is known to
//! be unsafe under clock skew across devices; that limitation is accepted
//! rather than papered over with a guessed policy.

use chrono::{DateTime, Utc};

use crate::models::{Expense, SyncStatus};
use crate::sync::transport::RemoteExpense;

/// Which side survives a version conflict
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Winner {
    Local,
    Server,
}

/// Decide the surviving side. Strictly-newer local edits win; ties go to
/// the server so both replicas converge on the same record.
#[must_use]
pub fn decide(local_updated_at_ms: i64, server_updated_at: DateTime<Utc>) -> Winner {
    if local_updated_at_ms > server_updated_at.timestamp_millis() {
        Winner::Local
    } else {
        Winner::Server
    }
}

/// Build the local row that adopts the server's record wholesale
///
/// The local identifier is preserved so UI references stay stable; fields,
/// remote id, and version come from the server.
#[must_use]
pub fn adopt_server(local: &Expense, server: &RemoteExpense) -> Expense {
    Expense {
        id: local.id,
        remote_id: Some(server.id.clone()),
        user_id: server.user_id.clone(),
        date: server.date,
        category: server.category,
        kind: server.kind,
        payment_method: server.payment_method,
        description: server.description.clone(),
        amount: server.amount,
        is_deleted: false,
        sync_status: SyncStatus::Synced,
        local_created_at: local.local_created_at,
        local_updated_at: server.updated_at.timestamp_millis(),
        sync_attempts: 0,
        last_sync_error: None,
        version: server.version,
        idempotency_key: local.idempotency_key.clone(),
    }
}

/// Build the local row that keeps its own value but supersedes the server's
/// version, ready for a fast-follow retry
#[must_use]
pub fn supersede_server(local: &Expense, server: &RemoteExpense, idempotency_key: String) -> Expense {
    Expense {
        remote_id: Some(server.id.clone()),
        sync_status: SyncStatus::Pending,
        sync_attempts: 0,
        last_sync_error: None,
        version: server.version + 1,
        idempotency_key,
        ..local.clone()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::{Category, ExpenseFields, ExpenseKind, PaymentMethod};
    use chrono::TimeZone;
    use pretty_assertions::assert_eq;

    fn local_expense(updated_at_ms: i64) -> Expense {
        let mut expense = Expense::new(
            ExpenseFields {
                user_id: "user-1".to_string(),
                date: Utc.with_ymd_and_hms(2025, 6, 1, 9, 0, 0).unwrap(),
                category: Category::Grocery,
                kind: ExpenseKind::Personal,
                payment_method: PaymentMethod::Upi,
                description: "Local edit".to_string(),
                amount: 500.0,
            },
            updated_at_ms,
            "key-local".to_string(),
        );
        expense.remote_id = Some("srv-1".to_string());
        expense.version = 3;
        expense
    }

    fn server_record(updated_at_ms: i64) -> RemoteExpense {
        RemoteExpense {
            id: "srv-1".to_string(),
            user_id: "user-1".to_string(),
            date: Utc.with_ymd_and_hms(2025, 6, 2, 9, 0, 0).unwrap(),
            category: Category::Travel,
            kind: ExpenseKind::Shared,
            payment_method: PaymentMethod::Card,
            description: "Server edit".to_string(),
            amount: 750.0,
            version: 5,
            updated_at: DateTime::from_timestamp_millis(updated_at_ms).unwrap(),
        }
    }

    #[test]
    fn newer_local_wins_newer_server_wins() {
        assert_eq!(
            decide(2_000, DateTime::from_timestamp_millis(1_000).unwrap()),
            Winner::Local
        );
        assert_eq!(
            decide(1_000, DateTime::from_timestamp_millis(2_000).unwrap()),
            Winner::Server
        );
    }

    #[test]
    fn ties_go_to_the_server() {
        assert_eq!(
            decide(1_000, DateTime::from_timestamp_millis(1_000).unwrap()),
            Winner::Server
        );
    }

    #[test]
    fn decision_is_deterministic_regardless_of_order() {
        // The same pair of timestamps always produces the same winner.
        for (local, server) in [(10, 20), (20, 10), (15, 15)] {
            let first = decide(local, DateTime::from_timestamp_millis(server).unwrap());
            let second = decide(local, DateTime::from_timestamp_millis(server).unwrap());
            assert_eq!(first, second);
        }
    }

    #[test]
    fn adopt_server_keeps_local_identity() {
        let local = local_expense(1_000);
        let adopted = adopt_server(&local, &server_record(5_000));

        assert_eq!(adopted.id, local.id);
        assert_eq!(adopted.remote_id.as_deref(), Some("srv-1"));
        assert_eq!(adopted.description, "Server edit");
        assert_eq!(adopted.version, 5);
        assert_eq!(adopted.sync_status, SyncStatus::Synced);
        assert_eq!(adopted.local_updated_at, 5_000);
        assert!(adopted.last_sync_error.is_none());
    }

    #[test]
    fn supersede_keeps_local_fields_and_outruns_server_version() {
        let local = local_expense(9_000);
        let superseded = supersede_server(&local, &server_record(5_000), "key-fresh".to_string());

        assert_eq!(superseded.description, "Local edit");
        assert_eq!(superseded.version, 6);
        assert_eq!(superseded.sync_status, SyncStatus::Pending);
        assert_eq!(superseded.idempotency_key, "key-fresh");
        assert_eq!(superseded.local_updated_at, 9_000);
    }
}
