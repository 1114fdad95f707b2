// In: src/bridge/cluster.rs

use std::sync::Arc;
use std::thread;

use log::{error, info};

use crate::array::MemArray;
use crate::chunk_pipeline::{redimension_worker, ExternalMergeSortService, InProcessShuffle, ShuffleService, SortService};
use crate::config::RedimConfig;
use crate::error::RedimError;
use crate::layout::{ChunkDistribution, HashedDistribution};
use crate::settings::{ClusterContext, Settings};
use crate::types::ArraySchema;

/// Runs a redimension on a simulated cluster: one thread per worker, one
/// in-process shuffle shared by all of them.
#[derive(Clone)]
pub struct LocalCluster {
    num_workers: u32,
    config: RedimConfig,
    distribution: Arc<dyn ChunkDistribution>,
    sort_service: Arc<dyn SortService>,
}

impl std::fmt::Debug for LocalCluster {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("LocalCluster")
            .field("num_workers", &self.num_workers)
            .field("config", &self.config)
            .field("distribution", &self.distribution)
            .finish_non_exhaustive()
    }
}

/// Releases the shuffle unless the worker finished cleanly, including when it
/// unwinds from a panic.
struct AbortOnFailure<'a> {
    shuffle: &'a dyn ShuffleService,
    armed: bool,
}

impl Drop for AbortOnFailure<'_> {
    fn drop(&mut self) {
        if self.armed {
            self.shuffle.abort();
        }
    }
}

impl LocalCluster {
    pub fn new(num_workers: u32, config: RedimConfig) -> Result<Self, RedimError> {
        if num_workers == 0 {
            return Err(RedimError::Config("a cluster needs at least one worker".into()));
        }
        config.validate()?;
        Ok(Self {
            num_workers,
            config,
            distribution: Arc::new(HashedDistribution),
            sort_service: Arc::new(ExternalMergeSortService),
        })
    }

    pub fn with_distribution(mut self, distribution: Arc<dyn ChunkDistribution>) -> Self {
        self.distribution = distribution;
        self
    }

    pub fn with_sort_service(mut self, sort_service: Arc<dyn SortService>) -> Self {
        self.sort_service = sort_service;
        self
    }

    pub fn num_workers(&self) -> u32 {
        self.num_workers
    }

    pub fn config(&self) -> &RedimConfig {
        &self.config
    }

    /// Deals `source` out to the workers chunk by chunk and redimensions it.
    pub fn redimension(&self, source: &MemArray, output_schema: &ArraySchema) -> Result<Vec<MemArray>, RedimError> {
        let partitions = source.partition(self.num_workers as usize)?;
        self.run(&partitions, output_schema)
    }

    /// Runs worker `w` on `partitions[w]`. Returns every worker's share of the
    /// destination array, indexed by worker.
    ///
    /// If any worker fails, the shuffle is aborted and the first failure that
    /// did not come from that abort is returned.
    pub fn run(&self, partitions: &[MemArray], output_schema: &ArraySchema) -> Result<Vec<MemArray>, RedimError> {
        if partitions.len() != self.num_workers as usize {
            return Err(RedimError::Config(format!(
                "{} partitions for {} workers",
                partitions.len(),
                self.num_workers
            )));
        }
        let input_schema = partitions[0].schema();
        if partitions.iter().any(|p| p.schema() != input_schema) {
            return Err(RedimError::Config("partitions disagree on the source schema".into()));
        }
        info!(
            "redimensioning '{}' into '{}' on {} workers",
            input_schema.name, output_schema.name, self.num_workers
        );

        let shuffle = InProcessShuffle::new(self.num_workers);
        let results: Vec<Result<MemArray, RedimError>> = thread::scope(|scope| {
            let mut handles = Vec::with_capacity(partitions.len());
            for (w, part) in partitions.iter().enumerate() {
                let shuffle = &shuffle;
                let spawned = thread::Builder::new()
                    .name(format!("redim-worker-{}", w))
                    .spawn_scoped(scope, move || self.run_worker(w as u32, part, output_schema, shuffle));
                match spawned {
                    Ok(handle) => handles.push(handle),
                    Err(e) => {
                        shuffle.abort();
                        handles.clear();
                        return vec![Err(RedimError::Io(e))];
                    }
                }
            }
            handles
                .into_iter()
                .enumerate()
                .map(|(w, h)| {
                    h.join().unwrap_or_else(|_| {
                        Err(RedimError::Internal(format!("worker {} panicked", w)))
                    })
                })
                .collect()
        });

        let mut outputs = Vec::with_capacity(results.len());
        let mut first_abort = None;
        for result in results {
            match result {
                Ok(out) => outputs.push(out),
                Err(e) if matches!(e.root_cause(), RedimError::Aborted(_)) => {
                    first_abort.get_or_insert(e);
                }
                Err(e) => {
                    error!("redimension failed: {}", e);
                    return Err(e);
                }
            }
        }
        match first_abort {
            Some(e) => Err(e),
            None => Ok(outputs),
        }
    }

    fn run_worker(
        &self,
        w: u32,
        part: &MemArray,
        output_schema: &ArraySchema,
        shuffle: &InProcessShuffle,
    ) -> Result<MemArray, RedimError> {
        let mut guard = AbortOnFailure { shuffle, armed: true };
        let cluster = ClusterContext::new(w, self.num_workers, Arc::clone(&self.distribution))?;
        let settings = Settings::new(part.schema(), output_schema, cluster, &self.config)?;
        let output = redimension_worker(part, &settings, self.sort_service.as_ref(), shuffle)
            .map_err(|e| e.at_stage(&format!("worker {}", w)))?;
        guard.armed = false;
        Ok(output)
    }
}
