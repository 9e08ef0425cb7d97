// Input Providers
// Sources of user answers for conditions that call input()

use crate::error::{EngineError, EngineResult};

use async_trait::async_trait;
use std::collections::{HashMap, VecDeque};
use std::sync::{Arc, Mutex, MutexGuard};
use tokio::sync::{oneshot, Mutex as AsyncMutex};

/// A pending request for one condition's input value
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct InputRequest {
    pub request_id: String,
    pub run_id: String,
    pub space_id: String,
    pub condition: String,
    pub prompt: String,
}

impl InputRequest {
    pub fn new(
        run_id: impl Into<String>,
        space_id: impl Into<String>,
        condition: impl Into<String>,
    ) -> Self {
        let condition = condition.into();
        let space_id = space_id.into();
        Self {
            request_id: uuid::Uuid::new_v4().to_string(),
            run_id: run_id.into(),
            prompt: format!(
                "Input required to evaluate transition from '{}': {}",
                space_id, condition
            ),
            space_id,
            condition,
        }
    }
}

/// Answers input requests. Implementations may wait as long as they like;
/// the engine bounds the wait with its configured input timeout.
#[async_trait]
pub trait InputProvider: Send + Sync {
    /// Called right before `input:required` is emitted for `request`
    fn announce(&self, _request: &InputRequest) {}

    async fn request_input(&self, request: &InputRequest) -> EngineResult<String>;
}

/// Hands out a fixed sequence of answers, one per request
#[derive(Debug, Default)]
pub struct StaticInputProvider {
    answers: AsyncMutex<VecDeque<String>>,
}

impl StaticInputProvider {
    pub fn new<I, S>(answers: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        Self {
            answers: AsyncMutex::new(answers.into_iter().map(Into::into).collect()),
        }
    }
}

#[async_trait]
impl InputProvider for StaticInputProvider {
    async fn request_input(&self, request: &InputRequest) -> EngineResult<String> {
        self.answers.lock().await.pop_front().ok_or_else(|| {
            EngineError::Input(format!(
                "no answer left for condition '{}'",
                request.condition
            ))
        })
    }
}

type Reply = Result<String, String>;

struct Pending {
    run_id: String,
    reply: oneshot::Sender<Reply>,
}

/// A request whose event went out but whose waiter is not registered yet
struct Announced {
    run_id: String,
    answer: Option<String>,
}

#[derive(Default)]
struct BrokerState {
    pending: HashMap<String, Pending>,
    announced: HashMap<String, Announced>,
}

/// Registry of outstanding input requests answered from elsewhere, e.g. a UI
/// reacting to `input:required` events.
#[derive(Clone, Default)]
pub struct InputBroker {
    state: Arc<Mutex<BrokerState>>,
}

impl InputBroker {
    pub fn new() -> Self {
        Self::default()
    }

    fn lock(&self) -> MutexGuard<'_, BrokerState> {
        // The state stays consistent even if a holder panicked
        self.state.lock().unwrap_or_else(|e| e.into_inner())
    }

    /// Answer a request. Returns true if a waiting request received the value.
    ///
    /// An answer to an announced request that is not awaited yet is kept
    /// until it is. Answers to unknown or already settled requests are dropped.
    pub fn respond(&self, request_id: &str, value: impl Into<String>) -> bool {
        let mut state = self.lock();
        if let Some(pending) = state.pending.remove(request_id) {
            return pending.reply.send(Ok(value.into())).is_ok();
        }

        match state.announced.get_mut(request_id) {
            Some(announced) => announced.answer = Some(value.into()),
            None => tracing::debug!(request_id, "dropping answer for unknown input request"),
        }
        false
    }

    /// Fail every pending request of a run. Returns how many were rejected.
    pub fn reject_run(&self, run_id: &str, reason: &str) -> usize {
        let mut state = self.lock();
        let ids: Vec<String> = state
            .pending
            .iter()
            .filter(|(_, pending)| pending.run_id == run_id)
            .map(|(id, _)| id.clone())
            .collect();

        for id in &ids {
            if let Some(pending) = state.pending.remove(id) {
                let _ = pending.reply.send(Err(reason.to_string()));
            }
        }
        state.announced.retain(|_, announced| announced.run_id != run_id);
        ids.len()
    }

    /// Ids of requests currently waiting for an answer
    pub fn pending_requests(&self) -> Vec<String> {
        let mut ids: Vec<String> = self.lock().pending.keys().cloned().collect();
        ids.sort();
        ids
    }
}

/// Removes a request from the broker when its waiter goes away, including
/// when the engine's timeout drops the waiting future.
struct PendingGuard<'a> {
    broker: &'a InputBroker,
    request_id: String,
}

impl Drop for PendingGuard<'_> {
    fn drop(&mut self) {
        self.broker.lock().pending.remove(&self.request_id);
    }
}

#[async_trait]
impl InputProvider for InputBroker {
    fn announce(&self, request: &InputRequest) {
        self.lock().announced.insert(
            request.request_id.clone(),
            Announced {
                run_id: request.run_id.clone(),
                answer: None,
            },
        );
    }

    async fn request_input(&self, request: &InputRequest) -> EngineResult<String> {
        let rx = {
            let mut state = self.lock();
            let early = state
                .announced
                .remove(&request.request_id)
                .and_then(|announced| announced.answer);
            if let Some(value) = early {
                return Ok(value);
            }
            let (tx, rx) = oneshot::channel();
            state.pending.insert(
                request.request_id.clone(),
                Pending {
                    run_id: request.run_id.clone(),
                    reply: tx,
                },
            );
            rx
        };

        let _guard = PendingGuard {
            broker: self,
            request_id: request.request_id.clone(),
        };

        match rx.await {
            Ok(Ok(value)) => Ok(value),
            Ok(Err(reason)) => Err(EngineError::Input(reason)),
            Err(_) => Err(EngineError::Input(format!(
                "input request {} was dropped",
                request.request_id
            ))),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::time::Duration;

    fn request(run_id: &str) -> InputRequest {
        InputRequest::new(run_id, "S1", "input() == 'y'")
    }

    #[tokio::test]
    async fn test_static_provider_answers_in_order() {
        let provider = StaticInputProvider::new(["a", "b"]);
        let req = request("r1");

        assert_eq!(provider.request_input(&req).await.unwrap(), "a");
        assert_eq!(provider.request_input(&req).await.unwrap(), "b");
        assert!(matches!(
            provider.request_input(&req).await,
            Err(EngineError::Input(_))
        ));
    }

    #[tokio::test]
    async fn test_broker_delivers_response() {
        let broker = InputBroker::new();
        let req = request("r1");
        let id = req.request_id.clone();

        let waiter = {
            let broker = broker.clone();
            tokio::spawn(async move { broker.request_input(&req).await })
        };

        while broker.pending_requests().is_empty() {
            tokio::time::sleep(Duration::from_millis(5)).await;
        }
        assert!(broker.respond(&id, "y"));
        assert_eq!(waiter.await.unwrap().unwrap(), "y");
        assert!(broker.pending_requests().is_empty());
    }

    #[tokio::test]
    async fn test_broker_accepts_early_answer() {
        let broker = InputBroker::new();
        let req = request("r1");

        broker.announce(&req);
        assert!(!broker.respond(&req.request_id, "n"));
        assert_eq!(broker.request_input(&req).await.unwrap(), "n");
        assert!(broker.lock().announced.is_empty());
    }

    #[tokio::test]
    async fn test_broker_drops_unknown_and_late_answers() {
        let broker = InputBroker::new();
        assert!(!broker.respond("made-up", "x"));

        let req = request("r1");
        broker.announce(&req);
        let result =
            tokio::time::timeout(Duration::from_millis(20), broker.request_input(&req)).await;
        assert!(result.is_err());
        assert!(!broker.respond(&req.request_id, "late"));

        let state = broker.lock();
        assert!(state.announced.is_empty());
        assert!(state.pending.is_empty());
    }

    #[test]
    fn test_reject_run_forgets_announced_requests() {
        let broker = InputBroker::new();
        let first = request("r1");
        let second = request("r2");
        broker.announce(&first);
        broker.announce(&second);
        broker.respond(&first.request_id, "kept");

        assert_eq!(broker.reject_run("r1", "run finished"), 0);

        let state = broker.lock();
        assert!(!state.announced.contains_key(&first.request_id));
        assert!(state.announced.contains_key(&second.request_id));
    }

    #[tokio::test]
    async fn test_reject_run_only_hits_that_run() {
        let broker = InputBroker::new();
        let first = request("r1");
        let second = request("r2");
        let second_id = second.request_id.clone();

        let a = {
            let broker = broker.clone();
            tokio::spawn(async move { broker.request_input(&first).await })
        };
        let b = {
            let broker = broker.clone();
            tokio::spawn(async move { broker.request_input(&second).await })
        };

        while broker.pending_requests().len() < 2 {
            tokio::time::sleep(Duration::from_millis(5)).await;
        }
        assert_eq!(broker.reject_run("r1", "run terminated"), 1);
        assert!(matches!(a.await.unwrap(), Err(EngineError::Input(_))));

        assert!(broker.respond(&second_id, "ok"));
        assert_eq!(b.await.unwrap().unwrap(), "ok");
    }

    #[tokio::test]
    async fn test_timeout_removes_pending_request() {
        let broker = InputBroker::new();
        let req = request("r1");

        let result =
            tokio::time::timeout(Duration::from_millis(50), broker.request_input(&req)).await;
        assert!(result.is_err());
        assert!(broker.pending_requests().is_empty());
    }
}
