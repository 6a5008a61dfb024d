use std::panic::{catch_unwind, AssertUnwindSafe};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Mutex;

use super::threads::{adjust_for_item, baseline_threads};
use super::{normalize_image, RecognitionEngine, RecognitionUnit, UnitSource};
use crate::config::RecognitionConfig;
use crate::error::ProcessError;
use crate::resources::HostResources;

const MIB: u64 = 1024 * 1024;

#[derive(Debug, Clone, PartialEq)]
pub enum UnitOutcome {
    Recognized(String),
    Failed(String),
}

#[derive(Debug, Clone, Default)]
pub struct RecognitionOutput {
    /// Recognized text of every successful unit, in unit order.
    pub text: String,
    pub units: Vec<UnitOutcome>,
    /// Indexes of units that failed.
    pub failed_units: Vec<usize>,
    pub threads: usize,
}

/// Runs recognition over the units of one item with bounded parallelism.
///
/// Decoding and rendering run on up to `threads` scoped threads; the
/// engine is behind a mutex so at most one unit is recognized at a time.
pub struct BoundedRecognizer {
    engine: Mutex<Box<dyn RecognitionEngine>>,
    config: RecognitionConfig,
    host: HostResources,
}

impl BoundedRecognizer {
    pub fn new(
        engine: Box<dyn RecognitionEngine>,
        config: RecognitionConfig,
        host: HostResources,
    ) -> Self {
        Self {
            engine: Mutex::new(engine),
            config,
            host,
        }
    }

    /// Thread count for an item. A non-zero `requested` replaces the
    /// host-derived baseline.
    pub fn threads_for(&self, item_bytes: u64, unit_count: usize, requested: usize) -> usize {
        let baseline = if requested > 0 {
            requested
        } else {
            baseline_threads(&self.host, self.config.per_thread_memory_mb * MIB)
        };
        adjust_for_item(baseline, item_bytes, unit_count, &self.config)
    }

    pub fn recognize(
        &self,
        sources: Vec<UnitSource>,
        item_bytes: u64,
        requested_threads: usize,
    ) -> Result<RecognitionOutput, ProcessError> {
        let total = sources.len();
        if total == 0 {
            return Ok(RecognitionOutput::default());
        }

        let threads = self.threads_for(item_bytes, total, requested_threads);
        let _span = tracing::info_span!("recognition.item", units = total, threads).entered();

        let next = AtomicUsize::new(0);
        let (result_tx, result_rx) = crossbeam_channel::unbounded();

        std::thread::scope(|scope| {
            for _ in 0..threads {
                let result_tx = result_tx.clone();
                let sources = &sources;
                let next = &next;
                scope.spawn(move || loop {
                    let index = next.fetch_add(1, Ordering::SeqCst);
                    let Some(source) = sources.get(index) else {
                        break;
                    };
                    let outcome = self.process_unit(index, source);
                    if result_tx.send((index, outcome)).is_err() {
                        break;
                    }
                });
            }
        });
        drop(result_tx);

        let mut units: Vec<Option<UnitOutcome>> = vec![None; total];
        for (index, outcome) in result_rx.try_iter() {
            units[index] = Some(outcome);
        }
        let units: Vec<UnitOutcome> = units
            .into_iter()
            .map(|u| u.unwrap_or_else(|| UnitOutcome::Failed("unit was not processed".to_string())))
            .collect();

        assemble(units, threads)
    }

    fn process_unit(&self, index: usize, source: &UnitSource) -> UnitOutcome {
        let prepared = source.load().and_then(|raw| normalize_image(&raw));
        let png = match prepared {
            Ok(png) => png,
            Err(e) => {
                log::warn!("Unit {} could not be prepared: {}", index, e);
                return UnitOutcome::Failed(e.to_string());
            }
        };

        let unit = RecognitionUnit { index, png };
        match self.with_engine(|engine| engine.recognize(&unit)) {
            Ok(text) => UnitOutcome::Recognized(text),
            Err(e) => {
                log::warn!("Unit {} failed recognition: {}", index, e);
                UnitOutcome::Failed(e.to_string())
            }
        }
    }

    fn with_engine<T, F>(&self, f: F) -> Result<T, ProcessError>
    where
        F: FnOnce(&mut dyn RecognitionEngine) -> Result<T, ProcessError>,
    {
        let mut engine = self
            .engine
            .lock()
            .map_err(|_| ProcessError::RecognitionFailed("engine lock poisoned".to_string()))?;
        // The guard lives outside the unwind boundary, so a panicking
        // engine does not poison the lock for the remaining units.
        match catch_unwind(AssertUnwindSafe(|| f(engine.as_mut()))) {
            Ok(result) => result,
            Err(_) => Err(ProcessError::RecognitionFailed(
                "engine panicked".to_string(),
            )),
        }
    }
}

fn assemble(units: Vec<UnitOutcome>, threads: usize) -> Result<RecognitionOutput, ProcessError> {
    let failed_units: Vec<usize> = units
        .iter()
        .enumerate()
        .filter(|(_, u)| matches!(u, UnitOutcome::Failed(_)))
        .map(|(i, _)| i)
        .collect();

    if failed_units.len() == units.len() {
        let first = match units.first() {
            Some(UnitOutcome::Failed(msg)) => msg.clone(),
            _ => String::new(),
        };
        return Err(ProcessError::RecognitionFailed(format!(
            "all {} units failed; first error: {}",
            units.len(),
            first
        )));
    }

    let text = units
        .iter()
        .filter_map(|u| match u {
            UnitOutcome::Recognized(text) => Some(text.trim()),
            UnitOutcome::Failed(_) => None,
        })
        .filter(|t| !t.is_empty())
        .collect::<Vec<_>>()
        .join("\n");

    Ok(RecognitionOutput {
        text,
        units,
        failed_units,
        threads,
    })
}
