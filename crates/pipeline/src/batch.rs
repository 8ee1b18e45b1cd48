//! Batch scheduler for the image phase.
//!
//! Image sources are split into consecutive batches. Files inside a batch
//! are composited concurrently on the blocking pool; batch `i + 1` starts
//! only after every file of batch `i` has resolved.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use futures::stream::{FuturesUnordered, StreamExt};
use indexmap::IndexMap;
use stickerbatch_media_model::{Blob, ProcessedOutput, SourceFile, StickerPlacement};
use stickerbatch_render_engine::{CompositeCause, CompositeError, Composer, StickerImage};

use crate::error::{PipelineError, PipelineResult};

/// Drives a [`Composer`] over image sources, batch by batch.
#[derive(Clone)]
pub struct BatchScheduler {
    batch_size: usize,
    composer: Arc<dyn Composer>,
    cancel: Option<Arc<AtomicBool>>,
}

impl BatchScheduler {
    /// A zero batch size is treated as 1.
    pub fn new(batch_size: usize, composer: impl Composer) -> Self {
        Self {
            batch_size: batch_size.max(1),
            composer: Arc::new(composer),
            cancel: None,
        }
    }

    /// Stop before the next batch once `flag` is set.
    pub fn with_cancel_flag(mut self, flag: Arc<AtomicBool>) -> Self {
        self.cancel = Some(flag);
        self
    }

    pub fn batch_size(&self) -> usize {
        self.batch_size
    }

    /// Composite every image-kind file in `files`.
    ///
    /// `on_progress` receives `completed / total * 100` after each file, where
    /// `total` counts image sources only. Outputs are keyed by source name in
    /// input order. The first failure aborts the run and discards everything
    /// produced so far.
    pub async fn run<F>(
        &self,
        files: &[SourceFile],
        sticker: Arc<StickerImage>,
        placement: StickerPlacement,
        mut on_progress: F,
    ) -> PipelineResult<IndexMap<String, Blob>>
    where
        F: FnMut(f64),
    {
        let images: Vec<&SourceFile> = files.iter().filter(|f| f.is_image()).collect();
        let total = images.len();
        let mut outputs = IndexMap::with_capacity(total);
        if total == 0 {
            tracing::debug!("No image sources; skipping image phase");
            return Ok(outputs);
        }

        tracing::info!(
            files = total,
            batch_size = self.batch_size,
            "Starting image phase"
        );

        let mut completed = 0usize;
        for (index, batch) in images.chunks(self.batch_size).enumerate() {
            if self.is_cancelled() {
                tracing::info!(batch = index, "Image phase cancelled");
                return Err(PipelineError::Cancelled);
            }

            let mut pending: FuturesUnordered<_> = batch
                .iter()
                .enumerate()
                .map(|(slot, file)| self.spawn_compose(slot, (*file).clone(), &sticker, placement))
                .collect();

            let mut slots: Vec<Option<ProcessedOutput>> = (0..batch.len()).map(|_| None).collect();
            while let Some((slot, result)) = pending.next().await {
                let output = result.map_err(|e| {
                    tracing::error!(file = %e.file, cause = e.cause.kind(), error = %e, "Compositing failed");
                    e
                })?;
                completed += 1;
                on_progress(completed as f64 / total as f64 * 100.0);
                slots[slot] = Some(output);
            }

            for output in slots.into_iter().flatten() {
                outputs.insert(output.name, output.blob);
            }
            tracing::debug!(batch = index, completed, total, "Batch settled");
        }

        Ok(outputs)
    }

    fn spawn_compose(
        &self,
        slot: usize,
        file: SourceFile,
        sticker: &Arc<StickerImage>,
        placement: StickerPlacement,
    ) -> impl std::future::Future<Output = (usize, Result<ProcessedOutput, CompositeError>)> {
        let name = file.name().to_string();
        let composer = Arc::clone(&self.composer);
        let sticker = Arc::clone(sticker);
        let task =
            tokio::task::spawn_blocking(move || composer.compose(&file, &sticker, &placement));

        async move {
            let result = match task.await {
                Ok(result) => result,
                Err(e) => {
                    tracing::error!(file = %name, error = %e, "Compositing task aborted");
                    Err(CompositeError::new(name, CompositeCause::Interrupted))
                }
            };
            (slot, result)
        }
    }

    fn is_cancelled(&self) -> bool {
        self.cancel
            .as_ref()
            .is_some_and(|flag| flag.load(Ordering::SeqCst))
    }
}

impl std::fmt::Debug for BatchScheduler {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("BatchScheduler")
            .field("batch_size", &self.batch_size)
            .field("cancel", &self.cancel)
            .finish_non_exhaustive()
    }
}
