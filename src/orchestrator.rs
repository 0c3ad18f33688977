//! The generation orchestrator: per-key locking, fast-path cache hits,
//! phase transitions and the provider pipeline.
//!
//! Concurrency contract: at most one in-flight generation per
//! `(series, address)`. A second caller never blocks — it either observes
//! the finished artifact (fast path) or is handed the expected output path
//! while the original holder works. Locks expire on their own, so a crashed
//! generation cannot wedge its key.

use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;

use anyhow::Context as _;
use tokio_util::sync::CancellationToken;

use crate::annotate::annotate;
use crate::config::{Config, safe_component};
use crate::context::ContextManager;
use crate::dress::{DownloadMode, PromptComposer, sanitize_file_name};
use crate::errors::{GenerationError, ServiceError};
use crate::locks::LockTable;
use crate::progress::{GenerationPhase, PhaseStatus, ProgressTracker};
use crate::services::{EnhanceClient, ImageClient, ImagePayload, SpeechClient};
use crate::wordbank::WordbankCache;

pub const DEFAULT_IMAGE_LOCK_TTL: Duration = Duration::from_secs(5 * 60);
pub const DEFAULT_SPEECH_LOCK_TTL: Duration = Duration::from_secs(2 * 60);

/// Composition root for the whole pipeline. Construct once and share.
pub struct Atelier {
    config: Arc<Config>,
    wordbank: Arc<WordbankCache>,
    contexts: ContextManager,
    progress: ProgressTracker,
    image_locks: LockTable,
    speech_locks: LockTable,
    enhance: EnhanceClient,
    image: ImageClient,
    speech: SpeechClient,
}

impl Atelier {
    pub fn new(config: Config) -> Self {
        let config = Arc::new(config);
        let wordbank = Arc::new(WordbankCache::new(config.cache_dir()));
        Self {
            contexts: ContextManager::new(config.clone(), wordbank.clone()),
            progress: ProgressTracker::new(),
            image_locks: LockTable::new("image"),
            speech_locks: LockTable::new("speech"),
            enhance: EnhanceClient::new(&config),
            image: ImageClient::new(&config),
            speech: SpeechClient::new(&config),
            wordbank,
            config,
        }
    }

    pub fn config(&self) -> &Config {
        &self.config
    }

    pub fn contexts(&self) -> &ContextManager {
        &self.contexts
    }

    pub fn progress(&self) -> &ProgressTracker {
        &self.progress
    }

    pub fn wordbank(&self) -> &Arc<WordbankCache> {
        &self.wordbank
    }

    /// Generate (or find) the annotated image for `(series, address)`.
    ///
    /// Returns the annotated path. With `skip_image` the provider phases are
    /// marked skipped and only prompts are produced; the returned path is
    /// where the artifact would live.
    pub async fn generate_image(
        &self,
        series: &str,
        address: &str,
        skip_image: bool,
        lock_ttl: Option<Duration>,
        cancel: &CancellationToken,
    ) -> Result<PathBuf, GenerationError> {
        if address.trim().is_empty() {
            return Err(GenerationError::EmptyAddress);
        }
        safe_component(series).map_err(GenerationError::Series)?;
        let lock_ttl = normalize_ttl(lock_ttl, DEFAULT_IMAGE_LOCK_TTL);
        self.image_locks.sweep_expired();

        let file_name = sanitize_file_name(address);
        let annotated_path = self.config.annotated_path(series, &file_name);

        // Fast path: the terminal artifact already exists.
        if annotated_path.exists() {
            tracing::debug!(series, address, "annotated image already on disk");
            self.progress.synthesize_cache_hit(series, address);
            return Ok(annotated_path);
        }

        let key = LockTable::key(series, address);
        let Some(_guard) = self.image_locks.acquire(&key, lock_ttl) else {
            // Another caller is mid-generation (or just finished). Hand back
            // the expected path and let the holder carry on.
            tracing::debug!(%key, "generation in flight, returning expected path");
            return Ok(annotated_path);
        };

        match self
            .run_image_pipeline(series, address, &file_name, skip_image, cancel)
            .await
        {
            Ok(path) => Ok(path),
            Err(e) => {
                self.progress.fail(series, address, &e.to_string());
                Err(e)
            }
        }
    }

    async fn run_image_pipeline(
        &self,
        series: &str,
        address: &str,
        file_name: &str,
        skip_image: bool,
        cancel: &CancellationToken,
    ) -> Result<PathBuf, GenerationError> {
        let context = self.contexts.get(series)?;
        let dress = context.dress_for(address)?;
        self.progress.start(series, address);

        let annotated_path = self.config.annotated_path(series, file_name);
        let generated_path = self.config.generated_path(series, file_name);

        // Prompts were rendered and persisted when the dress was derived.
        self.set_phase(series, address, GenerationPhase::BasePrompts, PhaseStatus::Done);

        if skip_image {
            for phase in [
                GenerationPhase::Enhance,
                GenerationPhase::ImageWait,
                GenerationPhase::ImagePrep,
                GenerationPhase::ImageDownload,
                GenerationPhase::Annotate,
            ] {
                self.set_phase(series, address, phase, PhaseStatus::Skipped);
            }
            let mut dress = dress.lock().expect("dress lock poisoned");
            dress.completed = true;
            context.write_snapshot(&dress);
            self.progress.complete(series, address, false);
            return Ok(annotated_path);
        }

        check_cancelled(cancel)?;

        self.set_phase(series, address, GenerationPhase::Enhance, PhaseStatus::Running);
        let (base, persona, terse, seed_hint, cached_enhanced) = {
            let dress = dress.lock().expect("dress lock poisoned");
            (
                dress.prompts.base.clone(),
                PromptComposer::persona(&dress.attributes),
                dress.prompts.terse.clone(),
                seed_hint(&dress.seed),
                dress.prompts.enhanced.clone(),
            )
        };
        let enhanced = match cached_enhanced {
            Some(text) => {
                tracing::debug!(series, address, "reusing persisted enhanced prompt");
                text
            }
            None => {
                let text = self.enhance.enhance(&persona, &base, seed_hint).await?;
                context.composer().store_enhanced(series, file_name, &text);
                text
            }
        };
        {
            let mut dress = dress.lock().expect("dress lock poisoned");
            dress.prompts.enhanced = Some(enhanced.clone());
        }
        self.set_phase(series, address, GenerationPhase::Enhance, PhaseStatus::Done);

        check_cancelled(cancel)?;

        self.set_phase(series, address, GenerationPhase::ImageWait, PhaseStatus::Running);
        let payload = self.image.generate(&enhanced).await?;
        self.set_phase(series, address, GenerationPhase::ImageWait, PhaseStatus::Done);

        let (bytes, mode) = match payload {
            ImagePayload::Placeholder => {
                self.set_phase(series, address, GenerationPhase::ImagePrep, PhaseStatus::Skipped);
                self.set_phase(series, address, GenerationPhase::ImageDownload, PhaseStatus::Skipped);
                (Vec::new(), None)
            }
            ImagePayload::Inline(bytes) => {
                self.set_phase(series, address, GenerationPhase::ImagePrep, PhaseStatus::Done);
                self.set_phase(series, address, GenerationPhase::ImageDownload, PhaseStatus::Skipped);
                (bytes, Some(DownloadMode::Base64))
            }
            ImagePayload::Url(url) => {
                self.set_phase(series, address, GenerationPhase::ImagePrep, PhaseStatus::Skipped);
                self.set_phase(series, address, GenerationPhase::ImageDownload, PhaseStatus::Running);
                let bytes = self.image.download(&url).await?;
                self.set_phase(series, address, GenerationPhase::ImageDownload, PhaseStatus::Done);
                (bytes, Some(DownloadMode::Url))
            }
        };
        write_artifact(&generated_path, &bytes)?;

        check_cancelled(cancel)?;

        self.set_phase(series, address, GenerationPhase::Annotate, PhaseStatus::Running);
        let annotated_bytes = annotate(&bytes, &terse)?;
        write_artifact(&annotated_path, &annotated_bytes)?;
        self.set_phase(series, address, GenerationPhase::Annotate, PhaseStatus::Done);

        {
            let mut dress = dress.lock().expect("dress lock poisoned");
            dress.generated_path = Some(generated_path);
            dress.annotated_path = Some(annotated_path.clone());
            dress.download_mode = mode;
            dress.completed = true;
            dress.cache_hit = false;
            context.write_snapshot(&dress);
        }
        self.progress.complete(series, address, false);
        tracing::info!(series, address, path = %annotated_path.display(), "generation complete");

        if self.config.local_commands {
            if let Err(e) = open::that(&annotated_path) {
                tracing::warn!(error = %e, "failed to open annotated image locally");
            }
        }
        Ok(annotated_path)
    }

    /// Generate (or find) the narration audio for `(series, address)`.
    ///
    /// Same locking shape as images in its own namespace, but no phase
    /// machine: existence check, synthesize if absent.
    pub async fn generate_speech(
        &self,
        series: &str,
        address: &str,
        lock_ttl: Option<Duration>,
        cancel: &CancellationToken,
    ) -> Result<PathBuf, GenerationError> {
        if address.trim().is_empty() {
            return Err(GenerationError::EmptyAddress);
        }
        safe_component(series).map_err(GenerationError::Series)?;
        let lock_ttl = normalize_ttl(lock_ttl, DEFAULT_SPEECH_LOCK_TTL);
        self.speech_locks.sweep_expired();

        let file_name = sanitize_file_name(address);
        let audio_path = self.config.audio_path(series, &file_name);
        if audio_path.exists() {
            tracing::debug!(series, address, "narration already on disk");
            return Ok(audio_path);
        }

        let key = LockTable::key(series, address);
        let Some(_guard) = self.speech_locks.acquire(&key, lock_ttl) else {
            tracing::debug!(%key, "narration in flight, returning expected path");
            return Ok(audio_path);
        };

        let context = self.contexts.get(series)?;
        let dress = context.dress_for(address)?;
        let narration = {
            let dress = dress.lock().expect("dress lock poisoned");
            format!("{}. {}", dress.prompts.title, dress.prompts.base)
        };
        let bytes = self.speech.synthesize(&narration, cancel).await?;
        write_artifact(&audio_path, &bytes)?;
        tracing::info!(series, address, path = %audio_path.display(), "narration complete");
        Ok(audio_path)
    }

    fn set_phase(&self, series: &str, address: &str, phase: GenerationPhase, status: PhaseStatus) {
        self.progress.set_phase(series, address, phase, status);
    }
}

fn normalize_ttl(requested: Option<Duration>, default: Duration) -> Duration {
    match requested {
        Some(ttl) if !ttl.is_zero() => ttl,
        _ => default,
    }
}

fn check_cancelled(cancel: &CancellationToken) -> Result<(), GenerationError> {
    if cancel.is_cancelled() {
        Err(GenerationError::Service(ServiceError::Cancelled))
    } else {
        Ok(())
    }
}

/// The provider's sampling seed: the leading stride of the dress seed.
fn seed_hint(seed: &str) -> u64 {
    seed.get(..8)
        .and_then(|chunk| u64::from_str_radix(chunk, 16).ok())
        .unwrap_or(0)
}

fn write_artifact(path: &Path, bytes: &[u8]) -> Result<(), GenerationError> {
    let write = || -> anyhow::Result<()> {
        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent)
                .with_context(|| format!("Failed to create {}", parent.display()))?;
        }
        std::fs::write(path, bytes)
            .with_context(|| format!("Failed to write {}", path.display()))?;
        Ok(())
    };
    write().map_err(GenerationError::Other)
}
