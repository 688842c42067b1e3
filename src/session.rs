//! Session controller: the explicit state record and its transitions.
//!
//! Every change to [`SessionState`] goes through a method on [`Session`].
//! `generate` takes `&mut self`, so a second batch cannot start while one
//! is in flight.

use crate::credential::{self, CredentialStore};
use crate::dispatch::{DispatchRequest, Dispatcher, JoinPolicy, MAX_COUNT};
use crate::error::{DimShiftError, Result};
use crate::gallery::Gallery;
use crate::image::{AspectRatio, ImageProvider, ImageSize, SourceImage};
use std::path::Path;

/// Shown when the selected file cannot be read as an image.
pub const IMAGE_READ_MESSAGE: &str = "Failed to process image.";
/// Shown after the service rejected the held credential.
pub const INVALID_KEY_MESSAGE: &str = "API key invalid or not found. Please set a key again.";
/// Shown for every other failed dispatch.
pub const GENERIC_FAILURE_MESSAGE: &str = "Something strange happened. Please try again.";

/// Whether a usable credential is held.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CredentialState {
    /// No credential; generation is unavailable.
    Unset,
    /// A credential is held.
    Set,
}

/// Everything the front end renders.
#[derive(Debug)]
pub struct SessionState {
    /// Photo the next dispatch will use.
    pub source_image: Option<SourceImage>,
    /// Requests per dispatch, `1..=MAX_COUNT`.
    pub image_count: u32,
    /// Free-form scenario text.
    pub user_prompt: String,
    /// Aspect ratio asked of the model.
    pub aspect_ratio: AspectRatio,
    /// Output resolution asked of the model.
    pub image_size: ImageSize,
    /// Whether generation is available.
    pub credential: CredentialState,
    /// Results so far, newest batch first.
    pub gallery: Gallery,
    /// User-facing message from the last failed action.
    pub error: Option<String>,
}

impl Default for SessionState {
    fn default() -> Self {
        Self {
            source_image: None,
            image_count: 1,
            user_prompt: String::new(),
            aspect_ratio: AspectRatio::default(),
            image_size: ImageSize::default(),
            credential: CredentialState::Unset,
            gallery: Gallery::new(),
            error: None,
        }
    }
}

/// Result of a successful `generate` call.
#[derive(Debug)]
pub struct GenerationSummary {
    /// Artifacts added to the front of the gallery.
    pub added: usize,
    /// Per-request failures kept by the settled policy.
    pub failures: Vec<DimShiftError>,
}

/// Owns the session state and the credential store.
pub struct Session<S> {
    store: S,
    credential: Option<String>,
    policy: JoinPolicy,
    state: SessionState,
}

impl<S: CredentialStore> Session<S> {
    /// Starts a session, reading the stored credential.
    pub fn load(store: S) -> Result<Self> {
        let credential = store.get()?;
        let state = SessionState {
            credential: if credential.is_some() {
                CredentialState::Set
            } else {
                CredentialState::Unset
            },
            ..SessionState::default()
        };
        Ok(Self {
            store,
            credential,
            policy: JoinPolicy::default(),
            state,
        })
    }

    /// Sets the join policy used by `generate`.
    pub fn with_policy(mut self, policy: JoinPolicy) -> Self {
        self.policy = policy;
        self
    }

    /// Uses a credential for this session without persisting it.
    ///
    /// Ignored when a credential is already held.
    pub fn with_ephemeral_credential(mut self, key: Option<String>) -> Self {
        if self.credential.is_none() {
            if let Some(key) = key.and_then(|k| credential::normalize(&k).ok()) {
                self.credential = Some(key);
                self.state.credential = CredentialState::Set;
            }
        }
        self
    }

    /// Current state record.
    pub fn state(&self) -> &SessionState {
        &self.state
    }

    /// Backing credential store.
    pub fn store(&self) -> &S {
        &self.store
    }

    /// `Unset -> Set`. Blank input is rejected and changes nothing.
    pub fn save_credential(&mut self, text: &str) -> Result<()> {
        let key = credential::normalize(text)?;
        self.store.set(&key)?;
        self.credential = Some(key);
        self.state.credential = CredentialState::Set;
        self.state.error = None;
        Ok(())
    }

    /// Forgets the credential in memory and in the store.
    pub fn clear_credential(&mut self) -> Result<()> {
        self.credential = None;
        self.state.credential = CredentialState::Unset;
        self.store.clear()
    }

    /// Replaces the source image with the file at `path`.
    ///
    /// On failure the previous selection is kept and the error message set.
    pub fn select_image(&mut self, path: impl AsRef<Path>) -> Result<()> {
        match SourceImage::from_path(path) {
            Ok(source) => {
                self.set_source_image(source);
                Ok(())
            }
            Err(e) => {
                tracing::warn!("failed to read source image: {e}");
                self.state.error = Some(IMAGE_READ_MESSAGE.to_string());
                Err(e)
            }
        }
    }

    /// Replaces the source image with already-loaded bytes.
    pub fn set_source_image(&mut self, source: SourceImage) {
        self.state.source_image = Some(source);
        self.state.error = None;
    }

    /// Sets the per-dispatch count. Values outside `1..=MAX_COUNT` are rejected.
    pub fn set_image_count(&mut self, count: u32) -> Result<()> {
        if !(1..=MAX_COUNT).contains(&count) {
            return Err(DimShiftError::InvalidRequest(format!(
                "image count must be between 1 and {MAX_COUNT}"
            )));
        }
        self.state.image_count = count;
        Ok(())
    }

    /// Sets the scenario text.
    pub fn set_user_prompt(&mut self, prompt: impl Into<String>) {
        self.state.user_prompt = prompt.into();
    }

    /// Sets the aspect ratio.
    pub fn set_aspect_ratio(&mut self, ratio: AspectRatio) {
        self.state.aspect_ratio = ratio;
    }

    /// Sets the output resolution.
    pub fn set_image_size(&mut self, size: ImageSize) {
        self.state.image_size = size;
    }

    /// Runs one dispatch with a provider built from the held credential.
    ///
    /// Success prepends the batch to the gallery. A credential-invalidating
    /// failure clears the stored key and returns to `Unset`; any other
    /// failure only sets the generic message. The underlying error is
    /// returned in both cases.
    ///
    /// Under the settled policy a batch can succeed with a rejected key among
    /// its failures. The images are kept and the credential is still cleared.
    pub async fn generate<P, F>(&mut self, make_provider: F) -> Result<GenerationSummary>
    where
        P: ImageProvider,
        F: FnOnce(&str) -> Result<P>,
    {
        let Some(source) = self.state.source_image.clone() else {
            return Err(DimShiftError::InvalidRequest("no source image selected".into()));
        };
        let Some(key) = self.credential.clone() else {
            return Err(DimShiftError::InvalidRequest("no API key set".into()));
        };

        self.state.error = None;

        let request = DispatchRequest::new(source, self.state.image_count)
            .with_instruction(self.state.user_prompt.clone())
            .with_aspect_ratio(self.state.aspect_ratio)
            .with_image_size(self.state.image_size);

        let outcome = match make_provider(&key) {
            Ok(provider) => {
                Dispatcher::new(provider)
                    .with_policy(self.policy)
                    .dispatch(&request)
                    .await
            }
            Err(e) => Err(e),
        };

        match outcome {
            Ok(batch) => {
                let added = batch.artifacts.len();
                self.state.gallery.prepend(batch.artifacts);
                if let Some(rejected) = batch
                    .failures
                    .iter()
                    .find(|e| e.invalidates_credential())
                {
                    self.invalidate_credential(rejected);
                }
                Ok(GenerationSummary {
                    added,
                    failures: batch.failures,
                })
            }
            Err(e) if e.invalidates_credential() => {
                self.invalidate_credential(&e);
                Err(e)
            }
            Err(e) => {
                tracing::warn!("generation failed: {e}");
                self.state.error = Some(GENERIC_FAILURE_MESSAGE.to_string());
                Err(e)
            }
        }
    }

    /// `Set -> Unset` after the service rejected the key.
    fn invalidate_credential(&mut self, reason: &DimShiftError) {
        tracing::warn!("credential rejected, clearing stored key: {reason}");
        self.credential = None;
        self.state.credential = CredentialState::Unset;
        self.state.error = Some(INVALID_KEY_MESSAGE.to_string());
        if let Err(clear_err) = self.store.clear() {
            tracing::warn!("failed to remove stored key: {clear_err}");
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::credential::MemoryCredentialStore;
    use crate::dispatch::tests::{source, Outcome, ScriptedProvider};

    fn ready_session(store: MemoryCredentialStore) -> Session<MemoryCredentialStore> {
        let mut session = Session::load(store).unwrap();
        session.set_source_image(source());
        session
    }

    #[test]
    fn test_initial_state_follows_store() {
        let empty = Session::load(MemoryCredentialStore::new()).unwrap();
        assert_eq!(empty.state().credential, CredentialState::Unset);

        let stored = Session::load(MemoryCredentialStore::with_credential("k")).unwrap();
        assert_eq!(stored.state().credential, CredentialState::Set);
        assert_eq!(stored.state().image_count, 1);
        assert!(stored.state().gallery.is_empty());
    }

    #[test]
    fn test_save_credential_sets_and_persists() {
        let mut session = Session::load(MemoryCredentialStore::new()).unwrap();

        assert!(session.save_credential("   ").is_err());
        assert_eq!(session.state().credential, CredentialState::Unset);

        session.save_credential(" AIza-key ").unwrap();
        assert_eq!(session.state().credential, CredentialState::Set);
        assert_eq!(session.store().get().unwrap().as_deref(), Some("AIza-key"));

        session.clear_credential().unwrap();
        assert_eq!(session.state().credential, CredentialState::Unset);
        assert!(!session.store().is_set().unwrap());
    }

    #[test]
    fn test_ephemeral_credential_is_not_persisted() {
        let session = Session::load(MemoryCredentialStore::new())
            .unwrap()
            .with_ephemeral_credential(Some("env-key".into()));
        assert_eq!(session.state().credential, CredentialState::Set);
        assert!(!session.store().is_set().unwrap());
    }

    #[test]
    fn test_select_image_failure_keeps_previous() {
        let mut session = ready_session(MemoryCredentialStore::new());
        assert!(session.select_image("/definitely/not/here.jpg").is_err());

        assert_eq!(session.state().source_image, Some(source()));
        assert_eq!(session.state().error.as_deref(), Some(IMAGE_READ_MESSAGE));
    }

    #[test]
    fn test_image_count_bounds() {
        let mut session = Session::load(MemoryCredentialStore::new()).unwrap();
        assert!(session.set_image_count(0).is_err());
        assert!(session.set_image_count(5).is_err());
        session.set_image_count(4).unwrap();
        assert_eq!(session.state().image_count, 4);
    }

    #[tokio::test]
    async fn test_generate_prepends_newest_batch() {
        let mut session = ready_session(MemoryCredentialStore::with_credential("good"));

        session.set_image_count(2).unwrap();
        session
            .generate(|_| Ok(ScriptedProvider::new(vec![Outcome::Image])))
            .await
            .unwrap();
        let older: Vec<_> = session
            .state()
            .gallery
            .iter()
            .map(|a| (a.batch, a.id.clone()))
            .collect();

        session.set_image_count(3).unwrap();
        let summary = session
            .generate(|key| {
                assert_eq!(key, "good");
                Ok(ScriptedProvider::new(vec![Outcome::Image]))
            })
            .await
            .unwrap();

        assert_eq!(summary.added, 3);
        let gallery = &session.state().gallery;
        assert_eq!(gallery.len(), 5);

        let entries: Vec<_> = gallery.iter().map(|a| (a.batch, a.id.clone())).collect();
        assert_eq!(entries[3..], older[..]);
        assert!(entries[..3].iter().all(|(batch, _)| *batch == 2));
        assert!(older.iter().all(|(batch, _)| *batch == 1));
        assert!(entries[0].1.ends_with("-0"));
        assert!(entries[2].1.ends_with("-2"));
        assert!(session.state().error.is_none());
    }

    #[tokio::test]
    async fn test_rejected_credential_is_cleared() {
        let mut session = ready_session(MemoryCredentialStore::with_credential("stale"));
        session.set_image_count(3).unwrap();

        let result = session
            .generate(|_| Ok(ScriptedProvider::new(vec![Outcome::KeyRejected])))
            .await;

        assert!(matches!(result, Err(DimShiftError::Auth(_))));
        assert_eq!(session.state().credential, CredentialState::Unset);
        assert!(!session.store().is_set().unwrap());
        assert_eq!(session.state().error.as_deref(), Some(INVALID_KEY_MESSAGE));
        assert!(session.state().gallery.is_empty());
        assert!(session.state().source_image.is_some());
    }

    #[tokio::test]
    async fn test_other_failure_keeps_credential() {
        let mut session = ready_session(MemoryCredentialStore::with_credential("good"));
        session.set_image_count(3).unwrap();

        let result = session
            .generate(|_| {
                Ok(ScriptedProvider::new(vec![
                    Outcome::Image,
                    Outcome::NetworkDown,
                ]))
            })
            .await;

        assert!(result.is_err());
        assert_eq!(session.state().credential, CredentialState::Set);
        assert!(session.store().is_set().unwrap());
        assert_eq!(session.state().error.as_deref(), Some(GENERIC_FAILURE_MESSAGE));
        assert!(session.state().gallery.is_empty());
    }

    #[tokio::test]
    async fn test_settled_policy_keeps_partial_batch() {
        let mut session = ready_session(MemoryCredentialStore::with_credential("good"))
            .with_policy(JoinPolicy::Settled);
        session.set_image_count(4).unwrap();

        let summary = session
            .generate(|_| {
                Ok(ScriptedProvider::new(vec![
                    Outcome::Image,
                    Outcome::NetworkDown,
                ]))
            })
            .await
            .unwrap();

        assert_eq!(summary.added, 2);
        assert_eq!(summary.failures.len(), 2);
        assert_eq!(session.state().gallery.len(), 2);
    }

    #[tokio::test]
    async fn test_settled_total_failure_with_rejected_key_clears_it() {
        let mut session = ready_session(MemoryCredentialStore::with_credential("stale"))
            .with_policy(JoinPolicy::Settled);
        session.set_image_count(2).unwrap();

        let result = session
            .generate(|_| {
                Ok(ScriptedProvider::new(vec![
                    Outcome::NetworkDown,
                    Outcome::KeyRejected,
                ]))
            })
            .await;

        assert!(matches!(result, Err(DimShiftError::Auth(_))));
        assert_eq!(session.state().credential, CredentialState::Unset);
        assert!(!session.store().is_set().unwrap());
        assert_eq!(session.state().error.as_deref(), Some(INVALID_KEY_MESSAGE));
        assert!(session.state().gallery.is_empty());
    }

    #[tokio::test]
    async fn test_settled_partial_success_with_rejected_key_clears_it() {
        let mut session = ready_session(MemoryCredentialStore::with_credential("stale"))
            .with_policy(JoinPolicy::Settled);
        session.set_image_count(2).unwrap();

        let summary = session
            .generate(|_| {
                Ok(ScriptedProvider::new(vec![
                    Outcome::Image,
                    Outcome::KeyRejected,
                ]))
            })
            .await
            .unwrap();

        assert_eq!(summary.added, 1);
        assert_eq!(session.state().gallery.len(), 1);
        assert_eq!(session.state().credential, CredentialState::Unset);
        assert!(!session.store().is_set().unwrap());
        assert_eq!(session.state().error.as_deref(), Some(INVALID_KEY_MESSAGE));

        let result = session
            .generate(|_| Ok(ScriptedProvider::new(vec![Outcome::Image])))
            .await;
        assert!(matches!(result, Err(DimShiftError::InvalidRequest(_))));
    }

    #[tokio::test]
    async fn test_generate_requires_image_and_key() {
        let mut no_image = Session::load(MemoryCredentialStore::with_credential("k")).unwrap();
        let result = no_image
            .generate(|_| Ok(ScriptedProvider::new(vec![Outcome::Image])))
            .await;
        assert!(matches!(result, Err(DimShiftError::InvalidRequest(_))));

        let mut no_key = ready_session(MemoryCredentialStore::new());
        let result = no_key
            .generate(|_| Ok(ScriptedProvider::new(vec![Outcome::Image])))
            .await;
        assert!(matches!(result, Err(DimShiftError::InvalidRequest(_))));
        assert!(no_key.state().error.is_none());
    }
}
