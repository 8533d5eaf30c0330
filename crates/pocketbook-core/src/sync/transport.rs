//! Remote service abstraction for the sync engine
//!
//! The trait hides the network layer so the engine can run against the real
//! HTTP backend or an in-process mock that scripts failures, replays by
//! idempotency key, and enforces version checks the way the server does.

use std::collections::{HashMap, VecDeque};
use std::future::Future;
use std::sync::atomic::{AtomicI64, AtomicU64, Ordering};
use std::sync::Mutex;
use std::time::Duration;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::models::{Category, ExpenseFields, ExpenseKind, PaymentMethod};

/// The server's representation of an expense
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RemoteExpense {
    /// Server-assigned identifier
    pub id: String,
    pub user_id: String,
    pub date: DateTime<Utc>,
    pub category: Category,
    #[serde(rename = "type")]
    pub kind: ExpenseKind,
    pub payment_method: PaymentMethod,
    pub description: String,
    pub amount: f64,
    pub version: i64,
    /// Server-side last-modified time, compared during conflict resolution
    pub updated_at: DateTime<Utc>,
}

impl RemoteExpense {
    /// Domain fields of the server record
    #[must_use]
    pub fn fields(&self) -> ExpenseFields {
        ExpenseFields {
            user_id: self.user_id.clone(),
            date: self.date,
            category: self.category,
            kind: self.kind,
            payment_method: self.payment_method,
            description: self.description.clone(),
            amount: self.amount,
        }
    }
}

/// Result of a mutating call the server actually answered
#[derive(Debug, Clone, PartialEq)]
pub enum MutationOutcome {
    /// 2xx. `expense` is `None` for deletes; `replayed` is set when the
    /// server served its stored response for an already-seen idempotency key
    Applied {
        expense: Option<RemoteExpense>,
        replayed: bool,
    },
    /// 409 with the server's current record
    Conflict { server: RemoteExpense },
}

/// A mutating call the server did not accept
#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum TransportError {
    /// Network failure, timeout, or 5xx; worth retrying with backoff
    #[error("retryable sync failure: {reason}")]
    Retryable { status: Option<u16>, reason: String },
    /// 4xx other than 409; retrying the same payload cannot succeed
    #[error("request rejected ({status}): {reason}")]
    Rejected { status: u16, reason: String },
}

pub type TransportResult = std::result::Result<MutationOutcome, TransportError>;

/// The remote service contract consumed by the sync engine
///
/// Every mutating call carries the outbox entry's idempotency key; the
/// server must replay its original response for a repeated key instead of
/// applying the operation twice.
pub trait RemoteService: Send + Sync + 'static {
    /// POST a new expense
    fn create(
        &self,
        payload: &serde_json::Value,
        idempotency_key: &str,
    ) -> impl Future<Output = TransportResult> + Send;

    /// PUT an update, compare-and-swap on `expected_version`
    fn update(
        &self,
        remote_id: &str,
        payload: &serde_json::Value,
        expected_version: i64,
        idempotency_key: &str,
    ) -> impl Future<Output = TransportResult> + Send;

    /// DELETE an expense
    fn delete(
        &self,
        remote_id: &str,
        idempotency_key: &str,
    ) -> impl Future<Output = TransportResult> + Send;

    /// Bulk fetch for cold-start seeding only
    fn fetch_all(
        &self,
        user_id: &str,
    ) -> impl Future<Output = std::result::Result<Vec<RemoteExpense>, TransportError>> + Send;
}

const IDEMPOTENCY_KEY_HEADER: &str = "X-Idempotency-Key";
const EXPECTED_VERSION_HEADER: &str = "X-Expected-Version";
const REPLAY_HEADER: &str = "X-Idempotent-Replay";

#[derive(Debug, Deserialize)]
struct ExpenseEnvelope {
    expense: RemoteExpense,
}

#[derive(Debug, Deserialize)]
struct ExpenseListEnvelope {
    expenses: Vec<RemoteExpense>,
}

/// HTTP implementation of [`RemoteService`] using `reqwest`
#[derive(Clone)]
pub struct HttpRemoteService {
    base_url: String,
    client: reqwest::Client,
}

impl HttpRemoteService {
    /// Build a client against the given endpoint, e.g. `https://api.example.com`
    pub fn new(base_url: impl Into<String>, timeout: Duration) -> crate::Result<Self> {
        let base_url = normalize_base_url(base_url.into())?;
        Ok(Self {
            base_url,
            client: reqwest::Client::builder().timeout(timeout).build()?,
        })
    }

    fn url(&self, path: &str) -> String {
        format!("{}{path}", self.base_url)
    }

    async fn handle_mutation(
        response: std::result::Result<reqwest::Response, reqwest::Error>,
        expects_body: bool,
    ) -> TransportResult {
        let response = response.map_err(classify_reqwest_error)?;
        let status = response.status();
        let replayed = response
            .headers()
            .get(REPLAY_HEADER)
            .and_then(|value| value.to_str().ok())
            .is_some_and(|value| value.eq_ignore_ascii_case("true"));

        if status.is_success() {
            if !expects_body {
                return Ok(MutationOutcome::Applied {
                    expense: None,
                    replayed,
                });
            }
            let envelope: ExpenseEnvelope =
                response.json().await.map_err(classify_reqwest_error)?;
            return Ok(MutationOutcome::Applied {
                expense: Some(envelope.expense),
                replayed,
            });
        }

        if status.as_u16() == 409 {
            let server: RemoteExpense = response.json().await.map_err(classify_reqwest_error)?;
            return Ok(MutationOutcome::Conflict { server });
        }

        let code = status.as_u16();
        let body = response.text().await.unwrap_or_default();
        let reason = if body.trim().is_empty() {
            format!("HTTP {code}")
        } else {
            format!("HTTP {code}: {}", body.trim())
        };

        if status.is_client_error() {
            Err(TransportError::Rejected {
                status: code,
                reason,
            })
        } else {
            Err(TransportError::Retryable {
                status: Some(code),
                reason,
            })
        }
    }
}

impl RemoteService for HttpRemoteService {
    async fn create(&self, payload: &serde_json::Value, idempotency_key: &str) -> TransportResult {
        let response = self
            .client
            .post(self.url("/expenses"))
            .header(IDEMPOTENCY_KEY_HEADER, idempotency_key)
            .json(payload)
            .send()
            .await;
        Self::handle_mutation(response, true).await
    }

    async fn update(
        &self,
        remote_id: &str,
        payload: &serde_json::Value,
        expected_version: i64,
        idempotency_key: &str,
    ) -> TransportResult {
        let response = self
            .client
            .put(self.url(&format!("/expenses/{remote_id}")))
            .header(IDEMPOTENCY_KEY_HEADER, idempotency_key)
            .header(EXPECTED_VERSION_HEADER, expected_version)
            .json(payload)
            .send()
            .await;
        Self::handle_mutation(response, true).await
    }

    async fn delete(&self, remote_id: &str, idempotency_key: &str) -> TransportResult {
        let response = self
            .client
            .delete(self.url(&format!("/expenses/{remote_id}")))
            .header(IDEMPOTENCY_KEY_HEADER, idempotency_key)
            .send()
            .await;
        Self::handle_mutation(response, false).await
    }

    async fn fetch_all(
        &self,
        user_id: &str,
    ) -> std::result::Result<Vec<RemoteExpense>, TransportError> {
        let response = self
            .client
            .get(self.url("/expenses"))
            .query(&[("userId", user_id)])
            .send()
            .await
            .map_err(classify_reqwest_error)?;

        let status = response.status();
        if !status.is_success() {
            return Err(TransportError::Retryable {
                status: Some(status.as_u16()),
                reason: format!("HTTP {}", status.as_u16()),
            });
        }

        let envelope: ExpenseListEnvelope =
            response.json().await.map_err(classify_reqwest_error)?;
        Ok(envelope.expenses)
    }
}

fn classify_reqwest_error(error: reqwest::Error) -> TransportError {
    TransportError::Retryable {
        status: error.status().map(|status| status.as_u16()),
        reason: error.to_string(),
    }
}

fn normalize_base_url(raw: String) -> crate::Result<String> {
    let trimmed = raw.trim();
    if trimmed.is_empty() {
        return Err(crate::Error::InvalidInput(
            "server URL must not be empty".to_string(),
        ));
    }
    if trimmed.starts_with("http://") || trimmed.starts_with("https://") {
        Ok(trimmed.trim_end_matches('/').to_string())
    } else {
        Err(crate::Error::InvalidInput(
            "server URL must include http:// or https://".to_string(),
        ))
    }
}

/// A scripted failure for the mock, optionally applied after the server
/// has already committed the mutation (the ambiguous-timeout case)
#[derive(Debug, Clone)]
struct ScriptedFailure {
    error: TransportError,
    after_commit: bool,
}

#[derive(Debug, Default)]
struct MockState {
    expenses: HashMap<String, RemoteExpense>,
    /// Stored response per idempotency key, replayed on repeats
    responses: HashMap<String, MutationOutcome>,
    failures: VecDeque<ScriptedFailure>,
    /// Log of mutations actually applied (not replays): (operation, key)
    applied: Vec<(String, String)>,
}

/// In-memory [`RemoteService`] faithful to the server contract, for tests
///
/// Deduplicates by idempotency key, rejects stale versions with a conflict
/// carrying its current record, and can be scripted to fail.
#[derive(Debug, Default)]
pub struct MockRemoteService {
    state: Mutex<MockState>,
    next_id: AtomicU64,
    now_ms: AtomicI64,
    fetch_calls: AtomicU64,
}

impl MockRemoteService {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Set the server's notion of "now", used for `updated_at` stamps
    pub fn set_now_ms(&self, now_ms: i64) {
        self.now_ms.store(now_ms, Ordering::SeqCst);
    }

    /// Queue a failure for the next mutating call; nothing is committed
    pub fn push_failure(&self, error: TransportError) {
        self.lock().failures.push_back(ScriptedFailure {
            error,
            after_commit: false,
        });
    }

    /// Queue an ambiguous failure: the mutation commits server-side but the
    /// client sees an error (timeout after the server already applied it)
    pub fn push_failure_after_commit(&self, error: TransportError) {
        self.lock().failures.push_back(ScriptedFailure {
            error,
            after_commit: true,
        });
    }

    /// Pre-populate a server record (for conflict and seeding tests)
    pub fn seed_expense(&self, expense: RemoteExpense) {
        self.lock().expenses.insert(expense.id.clone(), expense);
    }

    /// Number of entities currently stored server-side
    pub fn expense_count(&self) -> usize {
        self.lock().expenses.len()
    }

    /// Server record by id
    pub fn expense(&self, remote_id: &str) -> Option<RemoteExpense> {
        self.lock().expenses.get(remote_id).cloned()
    }

    /// Mutations that were freshly applied, as (operation, idempotency key)
    pub fn applied_log(&self) -> Vec<(String, String)> {
        self.lock().applied.clone()
    }

    /// Number of bulk fetches served
    pub fn fetch_calls(&self) -> u64 {
        self.fetch_calls.load(Ordering::SeqCst)
    }

    fn lock(&self) -> std::sync::MutexGuard<'_, MockState> {
        self.state.lock().unwrap_or_else(std::sync::PoisonError::into_inner)
    }

    fn server_now(&self) -> DateTime<Utc> {
        DateTime::from_timestamp_millis(self.now_ms.load(Ordering::SeqCst))
            .unwrap_or(DateTime::UNIX_EPOCH)
    }

    fn parse_fields(payload: &serde_json::Value) -> std::result::Result<ExpenseFields, TransportError> {
        serde_json::from_value(payload.clone()).map_err(|e| TransportError::Rejected {
            status: 422,
            reason: format!("invalid payload: {e}"),
        })
    }

    fn run_mutation(
        &self,
        operation: &str,
        idempotency_key: &str,
        apply: impl FnOnce(&mut MockState) -> TransportResult,
    ) -> TransportResult {
        let mut state = self.lock();

        // Replay check happens before failure scripting: a repeated key must
        // return the stored response, exactly like the server middleware.
        if let Some(stored) = state.responses.get(idempotency_key) {
            return Ok(match stored.clone() {
                MutationOutcome::Applied { expense, .. } => MutationOutcome::Applied {
                    expense,
                    replayed: true,
                },
                conflict @ MutationOutcome::Conflict { .. } => conflict,
            });
        }

        let scripted = state.failures.pop_front();
        if let Some(failure) = &scripted {
            if !failure.after_commit {
                return Err(failure.error.clone());
            }
        }

        let outcome = apply(&mut state)?;
        if matches!(outcome, MutationOutcome::Applied { .. }) {
            state
                .responses
                .insert(idempotency_key.to_string(), outcome.clone());
            state
                .applied
                .push((operation.to_string(), idempotency_key.to_string()));
        }

        match scripted {
            Some(failure) => Err(failure.error),
            None => Ok(outcome),
        }
    }
}

impl RemoteService for MockRemoteService {
    async fn create(&self, payload: &serde_json::Value, idempotency_key: &str) -> TransportResult {
        let updated_at = self.server_now();
        let id = format!("srv-{}", self.next_id.fetch_add(1, Ordering::SeqCst) + 1);

        self.run_mutation("create", idempotency_key, |state| {
            let fields = Self::parse_fields(payload)?;
            let expense = RemoteExpense {
                id: id.clone(),
                user_id: fields.user_id,
                date: fields.date,
                category: fields.category,
                kind: fields.kind,
                payment_method: fields.payment_method,
                description: fields.description,
                amount: fields.amount,
                version: 1,
                updated_at,
            };
            state.expenses.insert(id.clone(), expense.clone());
            Ok(MutationOutcome::Applied {
                expense: Some(expense),
                replayed: false,
            })
        })
    }

    async fn update(
        &self,
        remote_id: &str,
        payload: &serde_json::Value,
        expected_version: i64,
        idempotency_key: &str,
    ) -> TransportResult {
        let updated_at = self.server_now();
        let remote_id = remote_id.to_string();

        self.run_mutation("update", idempotency_key, |state| {
            let fields = Self::parse_fields(payload)?;
            let Some(existing) = state.expenses.get_mut(&remote_id) else {
                return Err(TransportError::Rejected {
                    status: 404,
                    reason: format!("no expense {remote_id}"),
                });
            };

            if existing.version != expected_version {
                return Ok(MutationOutcome::Conflict {
                    server: existing.clone(),
                });
            }

            existing.date = fields.date;
            existing.category = fields.category;
            existing.kind = fields.kind;
            existing.payment_method = fields.payment_method;
            existing.description = fields.description;
            existing.amount = fields.amount;
            existing.version += 1;
            existing.updated_at = updated_at;

            Ok(MutationOutcome::Applied {
                expense: Some(existing.clone()),
                replayed: false,
            })
        })
    }

    async fn delete(&self, remote_id: &str, idempotency_key: &str) -> TransportResult {
        let remote_id = remote_id.to_string();

        self.run_mutation("delete", idempotency_key, |state| {
            if state.expenses.remove(&remote_id).is_none() {
                return Err(TransportError::Rejected {
                    status: 404,
                    reason: format!("no expense {remote_id}"),
                });
            }
            Ok(MutationOutcome::Applied {
                expense: None,
                replayed: false,
            })
        })
    }

    async fn fetch_all(
        &self,
        user_id: &str,
    ) -> std::result::Result<Vec<RemoteExpense>, TransportError> {
        self.fetch_calls.fetch_add(1, Ordering::SeqCst);

        let mut state = self.lock();
        if let Some(failure) = state.failures.pop_front() {
            return Err(failure.error);
        }

        let mut expenses: Vec<RemoteExpense> = state
            .expenses
            .values()
            .filter(|expense| expense.user_id == user_id)
            .cloned()
            .collect();
        expenses.sort_by(|a, b| b.date.cmp(&a.date));
        Ok(expenses)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;
    use pretty_assertions::assert_eq;

    fn payload() -> serde_json::Value {
        serde_json::to_value(ExpenseFields {
            user_id: "user-1".to_string(),
            date: Utc.with_ymd_and_hms(2025, 6, 1, 9, 0, 0).unwrap(),
            category: Category::Grocery,
            kind: ExpenseKind::Personal,
            payment_method: PaymentMethod::Upi,
            description: "Veggies".to_string(),
            amount: 500.0,
        })
        .unwrap()
    }

    #[tokio::test]
    async fn mock_create_assigns_id_and_replays_by_key() {
        let mock = MockRemoteService::new();

        let first = mock.create(&payload(), "key-1").await.unwrap();
        let MutationOutcome::Applied { expense, replayed } = first else {
            panic!("expected applied");
        };
        assert!(!replayed);
        let expense = expense.unwrap();
        assert_eq!(expense.version, 1);

        // Same key: replayed, not re-applied
        let second = mock.create(&payload(), "key-1").await.unwrap();
        let MutationOutcome::Applied { replayed, .. } = second else {
            panic!("expected applied");
        };
        assert!(replayed);
        assert_eq!(mock.expense_count(), 1);
        assert_eq!(mock.applied_log().len(), 1);
    }

    #[tokio::test]
    async fn mock_failure_after_commit_still_deduplicates() {
        let mock = MockRemoteService::new();
        mock.push_failure_after_commit(TransportError::Retryable {
            status: None,
            reason: "timeout".to_string(),
        });

        // The client sees a timeout, but the entity was written.
        let error = mock.create(&payload(), "key-1").await.unwrap_err();
        assert!(matches!(error, TransportError::Retryable { .. }));
        assert_eq!(mock.expense_count(), 1);

        // Retry with the same key: one entity, replay flagged.
        let retry = mock.create(&payload(), "key-1").await.unwrap();
        assert!(matches!(
            retry,
            MutationOutcome::Applied { replayed: true, .. }
        ));
        assert_eq!(mock.expense_count(), 1);
    }

    #[tokio::test]
    async fn mock_update_enforces_versions() {
        let mock = MockRemoteService::new();
        let MutationOutcome::Applied { expense, .. } =
            mock.create(&payload(), "key-1").await.unwrap()
        else {
            panic!("expected applied");
        };
        let id = expense.unwrap().id;

        // Stale expected version: conflict with the server's record.
        let conflict = mock.update(&id, &payload(), 99, "key-2").await.unwrap();
        assert!(matches!(conflict, MutationOutcome::Conflict { .. }));

        // Matching version: applied and bumped.
        let ok = mock.update(&id, &payload(), 1, "key-3").await.unwrap();
        let MutationOutcome::Applied { expense, .. } = ok else {
            panic!("expected applied");
        };
        assert_eq!(expense.unwrap().version, 2);
    }

    #[tokio::test]
    async fn mock_rejects_malformed_payload() {
        let mock = MockRemoteService::new();
        let error = mock
            .create(&serde_json::json!({ "amount": "not-a-number" }), "key-1")
            .await
            .unwrap_err();
        assert!(matches!(error, TransportError::Rejected { status: 422, .. }));
        assert_eq!(mock.expense_count(), 0);
    }

    #[test]
    fn base_url_normalization() {
        assert!(HttpRemoteService::new("", Duration::from_secs(5)).is_err());
        assert!(HttpRemoteService::new("api.example.com", Duration::from_secs(5)).is_err());
        let service =
            HttpRemoteService::new("https://api.example.com/", Duration::from_secs(5)).unwrap();
        assert_eq!(service.url("/expenses"), "https://api.example.com/expenses");
    }
}
