// Input-driven adapter over presence sessions.
//
// A view (or the CLI) feeds the binding its current document and user on
// every change. The binding keeps one viewer channel for its whole life and
// makes sure the previous session is fully torn down before the next one
// starts.

use std::sync::Arc;

use quill_common::types::{CurrentUser, DocumentId, PresenceUser};
use tokio::sync::watch;
use tracing::debug;

use crate::session::{spawn_session, PresenceHandle, PresenceState, PresenceTarget, SessionOptions};
use crate::transport::ConnectionFactory;

pub struct PresenceBinding<F: ConnectionFactory> {
    factory: Arc<F>,
    options: SessionOptions,
    viewers: Arc<watch::Sender<Vec<PresenceUser>>>,
    current: Option<PresenceHandle>,
}

impl<F: ConnectionFactory> PresenceBinding<F> {
    pub fn new(factory: Arc<F>, options: SessionOptions) -> Self {
        let (viewers, _) = watch::channel(Vec::new());
        Self { factory, options, viewers: Arc::new(viewers), current: None }
    }

    /// Viewer list of whichever session is current; empty while idle.
    pub fn viewers(&self) -> watch::Receiver<Vec<PresenceUser>> {
        self.viewers.subscribe()
    }

    pub fn current_viewers(&self) -> Vec<PresenceUser> {
        self.viewers.borrow().clone()
    }

    pub fn handle(&self) -> Option<&PresenceHandle> {
        self.current.as_ref()
    }

    pub fn state(&self) -> PresenceState {
        self.current.as_ref().map_or(PresenceState::Idle, PresenceHandle::state)
    }

    /// Apply new inputs. Unchanged inputs keep the running session.
    pub async fn update(&mut self, document_id: Option<DocumentId>, user: Option<CurrentUser>) {
        let next = PresenceTarget::from_inputs(document_id, user);
        let current = self.current.as_ref().and_then(PresenceHandle::target);
        if current == next.as_ref() {
            return;
        }

        if let Some(handle) = self.current.take() {
            debug!(session_id = %handle.session_id(), "replacing presence session");
            handle.stop().await;
        }
        self.viewers.send_replace(Vec::new());

        if let Some(target) = next {
            self.current = Some(spawn_session(
                Arc::clone(&self.factory),
                self.options.clone(),
                target,
                Arc::clone(&self.viewers),
            ));
        }
    }

    /// Tear down the current session, if any.
    pub async fn close(mut self) {
        if let Some(handle) = self.current.take() {
            handle.stop().await;
        }
        self.viewers.send_replace(Vec::new());
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::transport::mock::{Call, MockFactory};
    use proptest::prelude::*;
    use quill_common::protocol::presence::Destination;
    use serde_json::json;

    fn kim() -> CurrentUser {
        CurrentUser::new(7, "Kim", "k@x.com")
    }

    async fn wait_active(binding: &PresenceBinding<MockFactory>) {
        let mut states = binding.handle().expect("binding should have a session").state_changes();
        let _ = states.wait_for(|state| state.is_active()).await.expect("session should activate");
    }

    fn new_binding() -> (Arc<MockFactory>, PresenceBinding<MockFactory>) {
        let factory = Arc::new(MockFactory::default());
        let binding = PresenceBinding::new(Arc::clone(&factory), SessionOptions::default());
        (factory, binding)
    }

    #[tokio::test]
    async fn starts_idle_and_stays_idle_without_user() {
        let (factory, mut binding) = new_binding();
        assert_eq!(binding.state(), PresenceState::Idle);

        binding.update(Some(42), None).await;
        binding.update(None, Some(kim())).await;

        assert_eq!(binding.state(), PresenceState::Idle);
        assert!(binding.current_viewers().is_empty());
        assert!(factory.calls().is_empty());
    }

    #[tokio::test]
    async fn same_inputs_keep_the_running_session() {
        let (factory, mut binding) = new_binding();
        binding.update(Some(42), Some(kim())).await;
        wait_active(&binding).await;
        let session_id = binding.handle().unwrap().session_id();

        binding.update(Some(42), Some(kim())).await;

        assert_eq!(binding.handle().unwrap().session_id(), session_id);
        assert_eq!(factory.joins(), 1);
        binding.close().await;
    }

    #[tokio::test]
    async fn switching_documents_tears_down_before_connecting() {
        let (factory, mut binding) = new_binding();
        binding.update(Some(1), Some(kim())).await;
        wait_active(&binding).await;
        binding.update(Some(2), Some(kim())).await;
        wait_active(&binding).await;

        let calls = factory.calls();
        let leave_1 = calls
            .iter()
            .position(|c| matches!(c, Call::Publish { destination: Destination::Leave(1), .. }))
            .expect("leave for document 1");
        let close_1 = calls.iter().position(|c| *c == Call::Close).expect("close of first session");
        let second_connect = calls
            .iter()
            .enumerate()
            .filter(|(_, c)| **c == Call::Connect)
            .nth(1)
            .map(|(i, _)| i)
            .expect("second connect");
        assert!(leave_1 < close_1);
        assert!(close_1 < second_connect);

        binding.close().await;
        assert_eq!(factory.joins(), 2);
        assert_eq!(factory.leaves(), 2);
    }

    #[tokio::test]
    async fn switching_documents_clears_stale_viewers() {
        let (factory, mut binding) = new_binding();
        binding.update(Some(1), Some(kim())).await;
        wait_active(&binding).await;
        let mut viewers = binding.viewers();

        let body = json!({
            "type": "presence",
            "users": [{"userId": 7, "name": "Kim", "email": "k@x.com"}]
        });
        factory.push(&body.to_string());
        viewers.changed().await.unwrap();
        assert_eq!(viewers.borrow_and_update().len(), 1);

        binding.update(Some(2), Some(kim())).await;
        assert!(binding.current_viewers().is_empty());
        binding.close().await;
    }

    #[tokio::test]
    async fn losing_the_user_tears_down() {
        let (factory, mut binding) = new_binding();
        binding.update(Some(42), Some(kim())).await;
        wait_active(&binding).await;

        binding.update(Some(42), None).await;

        assert_eq!(binding.state(), PresenceState::Idle);
        assert_eq!(factory.leaves(), 1);
        assert_eq!(factory.calls().last(), Some(&Call::Close));
    }

    #[tokio::test]
    async fn changing_user_rejoins_as_new_user() {
        let (factory, mut binding) = new_binding();
        binding.update(Some(42), Some(kim())).await;
        wait_active(&binding).await;
        binding.update(Some(42), Some(CurrentUser::new(8, "Lee", "lee@x.com"))).await;
        wait_active(&binding).await;

        let join_bodies: Vec<String> = factory
            .calls()
            .into_iter()
            .filter_map(|c| match c {
                Call::Publish { destination: Destination::Join(_), body } => Some(body),
                _ => None,
            })
            .collect();
        assert_eq!(join_bodies.len(), 2);
        assert!(join_bodies[1].contains("\"userId\":8"));
        binding.close().await;
    }

    #[tokio::test]
    async fn d1_d2_d1_keeps_join_leave_balance() {
        let (factory, mut binding) = new_binding();
        for doc in [1, 2, 1] {
            binding.update(Some(doc), Some(kim())).await;
            wait_active(&binding).await;
            assert_eq!(factory.joins(), factory.leaves() + 1);
        }
        binding.close().await;
        assert_eq!(factory.joins(), 3);
        assert_eq!(factory.leaves(), 3);
    }

    proptest! {
        #![proptest_config(ProptestConfig::with_cases(32))]

        #[test]
        fn joins_exceed_leaves_by_one_while_mounted(docs in prop::collection::vec(1i64..4, 1..8)) {
            let runtime = tokio::runtime::Builder::new_current_thread()
                .enable_all()
                .build()
                .expect("runtime should build");
            runtime.block_on(async move {
                let (factory, mut binding) = new_binding();
                for doc in docs {
                    binding.update(Some(doc), Some(kim())).await;
                    wait_active(&binding).await;
                    prop_assert_eq!(factory.joins(), factory.leaves() + 1);
                    prop_assert_eq!(factory.count(|c| matches!(c, Call::Subscribe(_))), factory.joins());
                }
                binding.close().await;
                prop_assert_eq!(factory.joins(), factory.leaves());
                Ok::<(), TestCaseError>(())
            })?;
        }
    }
}
