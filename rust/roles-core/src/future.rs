// rust/roles-core/src/future.rs

//! Pending results of remote calls and the `wait_all` aggregator.
//!
//! A [`PendingResult`] moves from `Pending` to exactly one terminal state
//! (`Resolved`, `Failed` or `TimedOut`) and never changes afterwards. A
//! fan-out call returns a [`FutureSet`] keyed by destination name;
//! [`wait_all`] waits for every entry and either returns all values, in the
//! input's shape and order, or a [`FanoutFailure`] that lists every failed
//! entry together with the values of the entries that did resolve.

use std::fmt;
use std::time::Duration;

use async_trait::async_trait;
use indexmap::IndexMap;
use serde_json::Value;
use tokio::sync::oneshot;
use tokio::sync::oneshot::error::TryRecvError;
use tokio::time::Instant;

use crate::error::CallError;
use crate::identity::Identity;

/// Outcome of a single remote call.
pub type CallResult = std::result::Result<Value, CallError>;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CallStatus {
    Pending,
    Resolved,
    Failed,
    TimedOut,
}

impl CallStatus {
    pub fn is_terminal(self) -> bool {
        self != Self::Pending
    }
}

#[derive(Debug, Clone, Copy)]
struct Deadline {
    at: Instant,
    timeout: Duration,
}

/// Completion side of a [`PendingResult`], held by the transport.
#[derive(Debug)]
pub struct ResultSender {
    tx: oneshot::Sender<CallResult>,
}

impl ResultSender {
    /// Completes the call. Returns false if nobody observes the result anymore.
    pub fn send(self, result: CallResult) -> bool {
        self.tx.send(result).is_ok()
    }
}

/// The eventual result of one remote call.
#[derive(Debug)]
pub struct PendingResult {
    destination: Identity,
    deadline: Option<Deadline>,
    outcome: Option<CallResult>,
    receiver: Option<oneshot::Receiver<CallResult>>,
}

impl PendingResult {
    /// Creates a pending result and the sender that completes it.
    ///
    /// With a timeout, the result turns `TimedOut` once the deadline passes
    /// even if the sender never reports back.
    pub fn channel(destination: Identity, timeout: Option<Duration>) -> (ResultSender, Self) {
        let (tx, rx) = oneshot::channel();
        let deadline = timeout.map(|timeout| Deadline {
            at: Instant::now() + timeout,
            timeout,
        });
        let pending = Self {
            destination,
            deadline,
            outcome: None,
            receiver: Some(rx),
        };
        (ResultSender { tx }, pending)
    }

    /// A result that is already resolved.
    pub fn resolved(destination: Identity, value: Value) -> Self {
        Self::completed(destination, Ok(value))
    }

    /// A result that already failed, e.g. because dispatch was impossible.
    pub fn failed(destination: Identity, error: CallError) -> Self {
        Self::completed(destination, Err(error))
    }

    fn completed(destination: Identity, result: CallResult) -> Self {
        Self {
            destination,
            deadline: None,
            outcome: Some(result),
            receiver: None,
        }
    }

    pub fn destination(&self) -> &Identity {
        &self.destination
    }

    pub fn deadline(&self) -> Option<Instant> {
        self.deadline.map(|d| d.at)
    }

    /// Status as last observed, without checking for new completions.
    pub fn status(&self) -> CallStatus {
        match &self.outcome {
            None => CallStatus::Pending,
            Some(Ok(_)) => CallStatus::Resolved,
            Some(Err(e)) if e.is_timeout() => CallStatus::TimedOut,
            Some(Err(_)) => CallStatus::Failed,
        }
    }

    /// Checks for completion or an expired deadline without blocking.
    pub fn poll_status(&mut self) -> CallStatus {
        if self.outcome.is_none() {
            if let Some(receiver) = self.receiver.as_mut() {
                match receiver.try_recv() {
                    Ok(result) => self.settle(result),
                    Err(TryRecvError::Closed) => self.settle(Err(self.dropped())),
                    Err(TryRecvError::Empty) => {
                        if let Some(deadline) = self.deadline {
                            if Instant::now() >= deadline.at {
                                self.settle(Err(self.expired(deadline)));
                            }
                        }
                    }
                }
            }
        }
        self.status()
    }

    /// Waits until the call reaches a terminal state.
    ///
    /// Cancel safe: dropping the returned future leaves the entry pending
    /// and it can be waited on again.
    pub async fn wait(&mut self) -> &CallResult {
        if self.outcome.is_none() {
            let result = match self.receiver.as_mut() {
                Some(receiver) => {
                    let received = match self.deadline {
                        Some(deadline) => {
                            match tokio::time::timeout_at(deadline.at, receiver).await {
                                Ok(received) => received.ok(),
                                Err(_) => Some(Err(CallError::timed_out(
                                    self.destination.global_name(),
                                    deadline.timeout,
                                ))),
                            }
                        }
                        None => receiver.await.ok(),
                    };
                    received.unwrap_or_else(|| Err(self.dropped()))
                }
                None => Err(self.dropped()),
            };
            self.settle(result);
        }

        let destination = self.destination.global_name();
        self.outcome
            .get_or_insert_with(|| Err(CallError::Dropped { destination: destination.to_string() }))
    }

    pub fn result(&self) -> Option<&CallResult> {
        self.outcome.as_ref()
    }

    pub fn value(&self) -> Option<&Value> {
        self.outcome.as_ref().and_then(|r| r.as_ref().ok())
    }

    pub fn error(&self) -> Option<&CallError> {
        self.outcome.as_ref().and_then(|r| r.as_ref().err())
    }

    // Terminal states are never overwritten.
    fn settle(&mut self, result: CallResult) {
        if self.outcome.is_none() {
            self.outcome = Some(result);
        }
        self.receiver = None;
    }

    fn dropped(&self) -> CallError {
        CallError::Dropped {
            destination: self.destination.global_name().to_string(),
        }
    }

    fn expired(&self, deadline: Deadline) -> CallError {
        CallError::timed_out(self.destination.global_name(), deadline.timeout)
    }
}

/// Pending results of one fan-out call, keyed by destination name in
/// dispatch order.
#[derive(Debug, Default)]
pub struct FutureSet {
    entries: IndexMap<String, PendingResult>,
}

impl FutureSet {
    pub fn new() -> Self {
        Self::default()
    }

    /// Adds an entry under its destination's global name.
    pub fn push(&mut self, pending: PendingResult) -> Option<PendingResult> {
        let key = pending.destination().global_name().to_string();
        self.entries.insert(key, pending)
    }

    pub fn insert(&mut self, key: impl Into<String>, pending: PendingResult) -> Option<PendingResult> {
        self.entries.insert(key.into(), pending)
    }

    pub fn get(&self, key: &str) -> Option<&PendingResult> {
        self.entries.get(key)
    }

    pub fn get_mut(&mut self, key: &str) -> Option<&mut PendingResult> {
        self.entries.get_mut(key)
    }

    pub fn keys(&self) -> impl Iterator<Item = &str> {
        self.entries.keys().map(String::as_str)
    }

    pub fn iter(&self) -> impl Iterator<Item = (&str, &PendingResult)> {
        self.entries.iter().map(|(k, v)| (k.as_str(), v))
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// Drops the keys, keeping dispatch order.
    pub fn into_sequence(self) -> Vec<PendingResult> {
        self.entries.into_values().collect()
    }
}

impl FromIterator<(String, PendingResult)> for FutureSet {
    fn from_iter<I: IntoIterator<Item = (String, PendingResult)>>(iter: I) -> Self {
        Self {
            entries: iter.into_iter().collect(),
        }
    }
}

impl IntoIterator for FutureSet {
    type Item = (String, PendingResult);
    type IntoIter = indexmap::map::IntoIter<String, PendingResult>;

    fn into_iter(self) -> Self::IntoIter {
        self.entries.into_iter()
    }
}

/// Position of an entry in the collection handed to [`wait_all`].
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub enum ResultKey {
    Name(String),
    Index(usize),
}

impl fmt::Display for ResultKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Name(name) => f.write_str(name),
            Self::Index(index) => write!(f, "#{}", index),
        }
    }
}

/// One failed entry of a fan-out.
#[derive(Debug, Clone, PartialEq)]
pub struct MemberFailure {
    pub key: ResultKey,
    pub destination: Identity,
    pub cause: CallError,
}

/// Composite error of a fan-out in which at least one call failed.
///
/// Lists every failed entry with its cause and keeps the values of the
/// entries that resolved, so partial success stays visible.
#[derive(Debug, Clone, PartialEq)]
pub struct FanoutFailure {
    failures: Vec<MemberFailure>,
    resolved: Vec<(ResultKey, Value)>,
}

impl FanoutFailure {
    /// Failed entries in input order.
    pub fn failures(&self) -> &[MemberFailure] {
        &self.failures
    }

    /// Resolved entries in input order.
    pub fn resolved(&self) -> &[(ResultKey, Value)] {
        &self.resolved
    }

    /// Number of entries that were waited on.
    pub fn total(&self) -> usize {
        self.failures.len() + self.resolved.len()
    }

    pub fn failure(&self, name: &str) -> Option<&MemberFailure> {
        self.failures
            .iter()
            .find(|f| matches!(&f.key, ResultKey::Name(key) if key == name))
    }

    pub fn resolved_value(&self, name: &str) -> Option<&Value> {
        self.resolved
            .iter()
            .find(|(key, _)| matches!(key, ResultKey::Name(key) if key == name))
            .map(|(_, value)| value)
    }
}

impl fmt::Display for FanoutFailure {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "{} of {} remote calls failed",
            self.failures.len(),
            self.total()
        )?;
        for (i, failure) in self.failures.iter().enumerate() {
            let sep = if i == 0 { ": " } else { "; " };
            write!(
                f,
                "{}{} (rank {}): {}",
                sep,
                failure.key,
                failure.destination.global_rank(),
                failure.cause
            )?;
        }
        Ok(())
    }
}

impl std::error::Error for FanoutFailure {}

/// Collections of pending results that can be waited on as a whole.
#[async_trait]
pub trait WaitAll: Send {
    /// Realized values, in the same shape as the input.
    type Output;

    async fn wait_all(&mut self) -> Result<Self::Output, FanoutFailure>;
}

#[async_trait]
impl WaitAll for FutureSet {
    type Output = IndexMap<String, Value>;

    async fn wait_all(&mut self) -> Result<Self::Output, FanoutFailure> {
        for pending in self.entries.values_mut() {
            pending.wait().await;
        }
        let (resolved, failures) = gather(
            self.entries
                .iter()
                .map(|(key, pending)| (ResultKey::Name(key.clone()), pending)),
        );
        finish(resolved, failures).map(|values| {
            values
                .into_iter()
                .filter_map(|(key, value)| match key {
                    ResultKey::Name(name) => Some((name, value)),
                    ResultKey::Index(_) => None,
                })
                .collect()
        })
    }
}

#[async_trait]
impl WaitAll for Vec<PendingResult> {
    type Output = Vec<Value>;

    async fn wait_all(&mut self) -> Result<Self::Output, FanoutFailure> {
        for pending in self.iter_mut() {
            pending.wait().await;
        }
        let (resolved, failures) = gather(
            self.iter()
                .enumerate()
                .map(|(index, pending)| (ResultKey::Index(index), pending)),
        );
        finish(resolved, failures)
            .map(|values| values.into_iter().map(|(_, value)| value).collect())
    }
}

/// Waits until every entry is terminal.
///
/// Entries are awaited in input order but the calls behind them run
/// concurrently, so the total wait is bounded by the slowest entry. Every
/// entry remains inspectable through `futures` afterwards.
///
/// # Errors
///
/// Returns a [`FanoutFailure`] naming every entry that failed or timed out.
pub async fn wait_all<F: WaitAll>(futures: &mut F) -> Result<F::Output, FanoutFailure> {
    futures.wait_all().await
}

fn gather<'a>(
    entries: impl Iterator<Item = (ResultKey, &'a PendingResult)>,
) -> (Vec<(ResultKey, Value)>, Vec<MemberFailure>) {
    let mut resolved = Vec::new();
    let mut failures = Vec::new();
    for (key, pending) in entries {
        match pending.result() {
            Some(Ok(value)) => resolved.push((key, value.clone())),
            Some(Err(cause)) => failures.push(MemberFailure {
                key,
                destination: pending.destination().clone(),
                cause: cause.clone(),
            }),
            None => failures.push(MemberFailure {
                key,
                destination: pending.destination().clone(),
                cause: pending.dropped(),
            }),
        }
    }
    (resolved, failures)
}

fn finish(
    resolved: Vec<(ResultKey, Value)>,
    failures: Vec<MemberFailure>,
) -> Result<Vec<(ResultKey, Value)>, FanoutFailure> {
    if failures.is_empty() {
        return Ok(resolved);
    }
    tracing::debug!(
        failed = failures.len(),
        resolved = resolved.len(),
        "Fan-out completed with failures"
    );
    Err(FanoutFailure { failures, resolved })
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn id(rank: u32) -> Identity {
        Identity::new(format!("w{}", rank), rank, "ps", rank)
    }

    #[test]
    fn test_completed_states() {
        let ok = PendingResult::resolved(id(0), json!(1));
        assert_eq!(ok.status(), CallStatus::Resolved);
        assert_eq!(ok.value(), Some(&json!(1)));

        let failed = PendingResult::failed(id(1), CallError::unreachable("w1", "down"));
        assert_eq!(failed.status(), CallStatus::Failed);
        assert!(failed.error().is_some());

        let timed_out = PendingResult::failed(id(2), CallError::timed_out("w2", Duration::from_millis(1)));
        assert_eq!(timed_out.status(), CallStatus::TimedOut);
        assert!(timed_out.status().is_terminal());
    }

    #[tokio::test]
    async fn test_channel_resolves() {
        let (tx, mut pending) = PendingResult::channel(id(0), Some(Duration::from_secs(5)));
        assert_eq!(pending.poll_status(), CallStatus::Pending);
        assert!(pending.deadline().is_some());

        assert!(tx.send(Ok(json!("done"))));
        assert_eq!(pending.wait().await, &Ok(json!("done")));
        assert_eq!(pending.status(), CallStatus::Resolved);
    }

    #[tokio::test]
    async fn test_poll_status_sees_completion() {
        let (tx, mut pending) = PendingResult::channel(id(0), None);
        tx.send(Ok(json!(7)));
        assert_eq!(pending.poll_status(), CallStatus::Resolved);
        assert_eq!(pending.value(), Some(&json!(7)));
    }

    #[tokio::test]
    async fn test_deadline_expires_without_sender() {
        let (tx, mut pending) = PendingResult::channel(id(3), Some(Duration::from_millis(5)));
        let result = pending.wait().await.clone();
        assert!(matches!(result, Err(CallError::TimedOut { .. })));
        assert_eq!(pending.status(), CallStatus::TimedOut);

        // A late completion does not change the terminal state
        assert!(!tx.send(Ok(json!(1))));
        assert_eq!(pending.poll_status(), CallStatus::TimedOut);
    }

    #[tokio::test]
    async fn test_poll_status_detects_expired_deadline() {
        let (_tx, mut pending) = PendingResult::channel(id(3), Some(Duration::from_millis(1)));
        tokio::time::sleep(Duration::from_millis(10)).await;
        assert_eq!(pending.poll_status(), CallStatus::TimedOut);
    }

    #[tokio::test]
    async fn test_dropped_sender() {
        let (tx, mut pending) = PendingResult::channel(id(0), None);
        drop(tx);
        let result = pending.wait().await.clone();
        assert_eq!(result, Err(CallError::Dropped { destination: "w0".to_string() }));
        assert_eq!(pending.status(), CallStatus::Failed);
    }

    #[tokio::test]
    async fn test_wait_is_cancel_safe() {
        let (tx, mut pending) = PendingResult::channel(id(0), None);

        let waited = tokio::time::timeout(Duration::from_millis(5), pending.wait()).await;
        assert!(waited.is_err());
        assert_eq!(pending.status(), CallStatus::Pending);

        tx.send(Ok(json!(1)));
        assert_eq!(pending.wait().await, &Ok(json!(1)));
    }

    #[tokio::test]
    async fn test_wait_all_keyed_preserves_order() {
        let mut set = FutureSet::new();
        let mut senders = Vec::new();
        for rank in [2, 0, 1] {
            let (tx, pending) = PendingResult::channel(id(rank), None);
            set.push(pending);
            senders.push((rank, tx));
        }

        // Complete out of dispatch order
        for (rank, tx) in senders.into_iter().rev() {
            tx.send(Ok(json!(rank)));
        }

        let values = wait_all(&mut set).await.unwrap();
        let keys: Vec<&str> = values.keys().map(String::as_str).collect();
        assert_eq!(keys, vec!["w2", "w0", "w1"]);
        assert_eq!(values["w0"], json!(0));
    }

    #[tokio::test]
    async fn test_wait_all_sequence() {
        let mut pending = vec![
            PendingResult::resolved(id(0), json!("a")),
            PendingResult::resolved(id(1), json!("b")),
        ];
        let values = wait_all(&mut pending).await.unwrap();
        assert_eq!(values, vec![json!("a"), json!("b")]);
    }

    #[tokio::test]
    async fn test_wait_all_empty() {
        let mut set = FutureSet::new();
        assert!(wait_all(&mut set).await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn test_wait_all_reports_every_failure() {
        let mut set: FutureSet = vec![
            ("w0".to_string(), PendingResult::resolved(id(0), json!(42))),
            (
                "w1".to_string(),
                PendingResult::failed(id(1), CallError::unreachable("w1", "refused")),
            ),
            ("w2".to_string(), PendingResult::resolved(id(2), json!(43))),
            (
                "w3".to_string(),
                PendingResult::failed(id(3), CallError::timed_out("w3", Duration::from_millis(1))),
            ),
        ]
        .into_iter()
        .collect();

        let failure = wait_all(&mut set).await.unwrap_err();
        assert_eq!(failure.total(), 4);
        assert_eq!(failure.failures().len(), 2);
        assert_eq!(failure.failure("w1").unwrap().destination.global_rank(), 1);
        assert!(failure.failure("w3").unwrap().cause.is_timeout());
        assert_eq!(failure.resolved_value("w0"), Some(&json!(42)));
        assert_eq!(failure.resolved_value("w2"), Some(&json!(43)));

        let message = failure.to_string();
        assert!(message.starts_with("2 of 4 remote calls failed"));
        assert!(message.contains("w1 (rank 1)"));
        assert!(message.contains("w3 (rank 3)"));

        // Entries stay inspectable after the failed wait
        assert_eq!(set.get("w0").unwrap().status(), CallStatus::Resolved);
        assert_eq!(set.get("w3").unwrap().status(), CallStatus::TimedOut);
    }

    #[tokio::test]
    async fn test_wait_all_sequence_failure_keys() {
        let mut pending = vec![
            PendingResult::failed(id(0), CallError::unreachable("w0", "down")),
            PendingResult::resolved(id(1), json!(1)),
        ];
        let failure = wait_all(&mut pending).await.unwrap_err();
        assert_eq!(failure.failures()[0].key, ResultKey::Index(0));
        assert_eq!(failure.resolved()[0].0, ResultKey::Index(1));
    }

    #[test]
    fn test_into_sequence_keeps_order() {
        let mut set = FutureSet::new();
        set.push(PendingResult::resolved(id(1), json!(1)));
        set.push(PendingResult::resolved(id(0), json!(0)));
        let ranks: Vec<u32> = set
            .into_sequence()
            .iter()
            .map(|p| p.destination().global_rank())
            .collect();
        assert_eq!(ranks, vec![1, 0]);
    }
}
