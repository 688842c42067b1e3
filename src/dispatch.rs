//! Parallel fan-out of generation requests.
//!
//! A dispatch sends `count` identical requests to one provider, waits for
//! all of them, and folds the results into a [`Batch`]. How a failing
//! request affects its siblings is decided by [`JoinPolicy`].

use crate::error::{DimShiftError, Result};
use crate::gallery::{Artifact, Batch};
use crate::image::{AspectRatio, GeneratedImage, GenerationRequest, ImageProvider, ImageSize, SourceImage};
use crate::prompt;
use chrono::Utc;
use futures::future::{join_all, try_join_all};
use serde::{Deserialize, Serialize};

/// Maximum requests per dispatch.
pub const MAX_COUNT: u32 = 4;

/// How the results of one dispatch are joined.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum JoinPolicy {
    /// The first failing request fails the whole dispatch.
    /// Sibling successes are discarded.
    #[default]
    Strict,
    /// Every request settles on its own. Successes and failures are
    /// reported side by side; the dispatch fails only if every request did.
    Settled,
}

impl std::fmt::Display for JoinPolicy {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Strict => f.write_str("strict"),
            Self::Settled => f.write_str("settled"),
        }
    }
}

/// What the user asked for in one dispatch.
#[derive(Debug, Clone)]
pub struct DispatchRequest {
    /// Photo sent with every request.
    pub source: SourceImage,
    /// Optional user text; blank selects the default scene.
    pub instruction: String,
    /// Number of requests, `1..=MAX_COUNT`.
    pub count: u32,
    /// Aspect ratio asked of the model.
    pub aspect_ratio: AspectRatio,
    /// Output resolution asked of the model.
    pub image_size: ImageSize,
}

impl DispatchRequest {
    /// Creates a request with no instruction and default image config.
    pub fn new(source: SourceImage, count: u32) -> Self {
        Self {
            source,
            instruction: String::new(),
            count,
            aspect_ratio: AspectRatio::default(),
            image_size: ImageSize::default(),
        }
    }

    /// Sets the user instruction.
    pub fn with_instruction(mut self, instruction: impl Into<String>) -> Self {
        self.instruction = instruction.into();
        self
    }

    /// Sets the aspect ratio.
    pub fn with_aspect_ratio(mut self, ratio: AspectRatio) -> Self {
        self.aspect_ratio = ratio;
        self
    }

    /// Sets the output resolution.
    pub fn with_image_size(mut self, size: ImageSize) -> Self {
        self.image_size = size;
        self
    }

    fn validate(&self) -> Result<()> {
        if !(1..=MAX_COUNT).contains(&self.count) {
            return Err(DimShiftError::InvalidRequest(format!(
                "count must be between 1 and {MAX_COUNT}, got {}",
                self.count
            )));
        }
        if self.source.data().is_empty() {
            return Err(DimShiftError::InvalidRequest("source image is empty".into()));
        }
        Ok(())
    }
}

/// Sends batches of requests through one provider.
pub struct Dispatcher<P> {
    provider: P,
    policy: JoinPolicy,
}

impl<P: ImageProvider> Dispatcher<P> {
    /// Creates a dispatcher with the strict join policy.
    pub fn new(provider: P) -> Self {
        Self {
            provider,
            policy: JoinPolicy::default(),
        }
    }

    /// Sets the join policy.
    pub fn with_policy(mut self, policy: JoinPolicy) -> Self {
        self.policy = policy;
        self
    }

    /// Join policy in use.
    pub fn policy(&self) -> JoinPolicy {
        self.policy
    }

    /// Provider the requests go through.
    pub fn provider(&self) -> &P {
        &self.provider
    }

    /// Runs `request.count` generations concurrently and joins them.
    ///
    /// All requests are polled from the calling task; nothing is spawned.
    /// The returned batch never holds more than `request.count` artifacts.
    ///
    /// When every request fails under [`JoinPolicy::Settled`], the error
    /// returned is the first one that invalidates the credential, if any.
    pub async fn dispatch(&self, request: &DispatchRequest) -> Result<Batch> {
        request.validate()?;

        let generation = GenerationRequest::new(
            request.source.clone(),
            prompt::compose(&request.instruction),
        )
        .with_aspect_ratio(request.aspect_ratio)
        .with_image_size(request.image_size);

        tracing::info!(
            provider = self.provider.name(),
            count = request.count,
            policy = %self.policy,
            source_bytes = request.source.size(),
            "dispatching generation batch"
        );

        let slots = (0..request.count).map(|slot| self.generate_slot(&generation, slot));

        let (images, failures) = match self.policy {
            JoinPolicy::Strict => (try_join_all(slots).await?, Vec::new()),
            JoinPolicy::Settled => {
                let mut images = Vec::new();
                let mut failures = Vec::new();
                for result in join_all(slots).await {
                    match result {
                        Ok(image) => images.push(image),
                        Err(e) => failures.push(e),
                    }
                }
                if images.is_empty() && !failures.is_empty() {
                    let first = failures
                        .iter()
                        .position(DimShiftError::invalidates_credential)
                        .unwrap_or(0);
                    return Err(failures.swap_remove(first));
                }
                (images, failures)
            }
        };

        let batch_millis = Utc::now().timestamp_millis();
        let artifacts: Vec<Artifact> = images
            .into_iter()
            .flatten()
            .enumerate()
            .map(|(index, image)| Artifact {
                id: format!("{batch_millis}-{index}"),
                batch: 0,
                image,
                created_at: Utc::now(),
            })
            .collect();

        tracing::info!(
            requested = request.count,
            succeeded = artifacts.len(),
            failed = failures.len(),
            "generation batch settled"
        );

        Ok(Batch {
            artifacts,
            failures,
        })
    }

    async fn generate_slot(
        &self,
        request: &GenerationRequest,
        slot: u32,
    ) -> Result<Option<GeneratedImage>> {
        match self.provider.generate(request).await {
            Ok(Some(image)) => {
                tracing::debug!(slot, size_bytes = image.size(), "slot produced an image");
                Ok(Some(image))
            }
            Ok(None) => {
                tracing::debug!(slot, "slot completed without an image");
                Ok(None)
            }
            Err(e) => {
                tracing::warn!(slot, "generation request failed: {e}");
                Err(e)
            }
        }
    }
}

#[cfg(test)]
pub(crate) mod tests {
    use super::*;
    use crate::image::ImageFormat;
    use async_trait::async_trait;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::sync::Mutex;
    use std::time::Duration;

    /// Scripted result of one provider call.
    #[derive(Debug, Clone, Copy)]
    pub(crate) enum Outcome {
        Image,
        Empty,
        NetworkDown,
        KeyRejected,
    }

    /// Provider that replays `outcomes` in call order.
    pub(crate) struct ScriptedProvider {
        outcomes: Vec<Outcome>,
        calls: AtomicUsize,
        prompts: Mutex<Vec<String>>,
        barrier: Option<tokio::sync::Barrier>,
    }

    impl ScriptedProvider {
        pub(crate) fn new(outcomes: Vec<Outcome>) -> Self {
            Self {
                outcomes,
                calls: AtomicUsize::new(0),
                prompts: Mutex::new(Vec::new()),
                barrier: None,
            }
        }

        /// Every call blocks until `n` calls are in flight together.
        fn with_barrier(mut self, n: usize) -> Self {
            self.barrier = Some(tokio::sync::Barrier::new(n));
            self
        }

        pub(crate) fn calls(&self) -> usize {
            self.calls.load(Ordering::SeqCst)
        }
    }

    #[async_trait]
    impl ImageProvider for ScriptedProvider {
        async fn generate(&self, request: &GenerationRequest) -> Result<Option<GeneratedImage>> {
            let call = self.calls.fetch_add(1, Ordering::SeqCst);
            self.prompts.lock().unwrap().push(request.prompt.clone());
            if let Some(barrier) = &self.barrier {
                barrier.wait().await;
            }
            match self.outcomes[call % self.outcomes.len()] {
                Outcome::Image => Ok(Some(GeneratedImage::new(
                    vec![call as u8],
                    ImageFormat::Png,
                    Default::default(),
                ))),
                Outcome::Empty => Ok(None),
                Outcome::NetworkDown => Err(DimShiftError::Api {
                    status: 503,
                    message: "service unavailable".into(),
                }),
                Outcome::KeyRejected => Err(DimShiftError::Auth(
                    "Requested entity was not found.".into(),
                )),
            }
        }

        fn name(&self) -> &str {
            "scripted"
        }

        async fn health_check(&self) -> Result<()> {
            Ok(())
        }
    }

    pub(crate) fn source() -> SourceImage {
        SourceImage::new(vec![0x89, 0x50, 0x4E, 0x47], "image/png").unwrap()
    }

    #[tokio::test]
    async fn test_all_succeed_yields_exactly_count() {
        let dispatcher = Dispatcher::new(ScriptedProvider::new(vec![Outcome::Image]));
        let batch = dispatcher
            .dispatch(&DispatchRequest::new(source(), 3))
            .await
            .unwrap();

        assert_eq!(batch.len(), 3);
        assert!(batch.failures.is_empty());
        assert_eq!(dispatcher.provider().calls(), 3);

        let ids: Vec<_> = batch.artifacts.iter().map(|a| a.id.clone()).collect();
        let prefix = ids[0].split('-').next().unwrap().to_string();
        assert_eq!(
            ids,
            vec![
                format!("{prefix}-0"),
                format!("{prefix}-1"),
                format!("{prefix}-2")
            ]
        );
    }

    #[tokio::test]
    async fn test_empty_slots_are_dropped() {
        let provider = ScriptedProvider::new(vec![Outcome::Image, Outcome::Empty]);
        let batch = Dispatcher::new(provider)
            .dispatch(&DispatchRequest::new(source(), 4))
            .await
            .unwrap();

        assert_eq!(batch.len(), 2);
        assert!(batch.failures.is_empty());
    }

    #[tokio::test]
    async fn test_strict_fails_whole_batch() {
        let provider = ScriptedProvider::new(vec![Outcome::Image, Outcome::NetworkDown]);
        let result = Dispatcher::new(provider)
            .dispatch(&DispatchRequest::new(source(), 3))
            .await;

        assert!(matches!(result, Err(DimShiftError::Api { status: 503, .. })));
    }

    #[tokio::test]
    async fn test_settled_keeps_partial_successes() {
        let provider = ScriptedProvider::new(vec![Outcome::Image, Outcome::NetworkDown]);
        let batch = Dispatcher::new(provider)
            .with_policy(JoinPolicy::Settled)
            .dispatch(&DispatchRequest::new(source(), 4))
            .await
            .unwrap();

        assert_eq!(batch.len(), 2);
        assert_eq!(batch.failures.len(), 2);
    }

    #[tokio::test]
    async fn test_settled_fails_when_every_request_fails() {
        let provider = ScriptedProvider::new(vec![Outcome::KeyRejected]);
        let result = Dispatcher::new(provider)
            .with_policy(JoinPolicy::Settled)
            .dispatch(&DispatchRequest::new(source(), 2))
            .await;

        assert!(matches!(result, Err(DimShiftError::Auth(_))));
    }

    #[tokio::test]
    async fn test_settled_total_failure_surfaces_rejected_key() {
        let provider = ScriptedProvider::new(vec![
            Outcome::NetworkDown,
            Outcome::NetworkDown,
            Outcome::KeyRejected,
        ]);
        let result = Dispatcher::new(provider)
            .with_policy(JoinPolicy::Settled)
            .dispatch(&DispatchRequest::new(source(), 3))
            .await;

        assert!(matches!(result, Err(DimShiftError::Auth(_))));
    }

    #[tokio::test]
    async fn test_settled_records_rejected_key_beside_successes() {
        let provider = ScriptedProvider::new(vec![Outcome::Image, Outcome::KeyRejected]);
        let batch = Dispatcher::new(provider)
            .with_policy(JoinPolicy::Settled)
            .dispatch(&DispatchRequest::new(source(), 2))
            .await
            .unwrap();

        assert_eq!(batch.len(), 1);
        assert_eq!(batch.failures.len(), 1);
        assert!(batch.failures[0].invalidates_credential());
    }

    #[tokio::test]
    async fn test_settled_all_empty_is_ok() {
        let provider = ScriptedProvider::new(vec![Outcome::Empty]);
        let batch = Dispatcher::new(provider)
            .with_policy(JoinPolicy::Settled)
            .dispatch(&DispatchRequest::new(source(), 2))
            .await
            .unwrap();

        assert!(batch.is_empty());
        assert!(batch.failures.is_empty());
    }

    #[tokio::test]
    async fn test_requests_are_in_flight_together() {
        let provider = ScriptedProvider::new(vec![Outcome::Image]).with_barrier(4);
        let dispatcher = Dispatcher::new(provider);

        let batch = tokio::time::timeout(
            Duration::from_secs(5),
            dispatcher.dispatch(&DispatchRequest::new(source(), 4)),
        )
        .await
        .expect("requests were not issued concurrently")
        .unwrap();

        assert_eq!(batch.len(), 4);
    }

    #[tokio::test]
    async fn test_every_request_carries_the_composed_prompt() {
        let dispatcher = Dispatcher::new(ScriptedProvider::new(vec![Outcome::Image]));
        let request = DispatchRequest::new(source(), 2).with_instruction("hiding in the library");
        dispatcher.dispatch(&request).await.unwrap();

        let prompts = dispatcher.provider().prompts.lock().unwrap().clone();
        assert_eq!(prompts.len(), 2);
        assert_eq!(prompts[0], prompts[1]);
        assert_eq!(prompts[0], prompt::compose("hiding in the library"));
    }

    #[tokio::test]
    async fn test_count_out_of_range_is_rejected_before_any_call() {
        let dispatcher = Dispatcher::new(ScriptedProvider::new(vec![Outcome::Image]));

        for count in [0, MAX_COUNT + 1] {
            let result = dispatcher
                .dispatch(&DispatchRequest::new(source(), count))
                .await;
            assert!(matches!(result, Err(DimShiftError::InvalidRequest(_))));
        }
        assert_eq!(dispatcher.provider().calls(), 0);
    }

    #[test]
    fn test_join_policy_serde() {
        let policy: JoinPolicy = serde_json::from_str("\"settled\"").unwrap();
        assert_eq!(policy, JoinPolicy::Settled);
        assert_eq!(JoinPolicy::default(), JoinPolicy::Strict);
        assert_eq!(JoinPolicy::Strict.to_string(), "strict");
    }
}
