//! Database-level driver: biosphere flow classification, per-activity
//! balancing, sample aggregation and presample export.

use crate::activity::ActivityLandBalancer;
use crate::BalanceError;
use landbalancer_engine::presamples;
use landbalancer_engine::{EngineError, SampleBlock, SampleMatrix};
use landbalancer_store::{RecordKey, SharedStore};
use rand::rngs::StdRng;
use rand::SeedableRng;
use std::collections::HashSet;
use std::path::{Path, PathBuf};
use std::sync::Arc;

/// Name prefix of elementary flows transforming land *into* a state.
pub const LAND_IN_PATTERN: &str = "Transformation, from";
/// Name prefix of elementary flows transforming land *out of* a state.
pub const LAND_OUT_PATTERN: &str = "Transformation, to";

/// Balances land exchanges across one technosphere database.
///
/// Construction scans the biosphere database once and classifies every
/// elementary flow by name, so per-activity work is a set lookup. Sample
/// blocks returned by the per-activity balancers are stacked into a single
/// matrix whose rows are indexed by `(flow key, activity key)` pairs,
/// aligned with [`matrix_indices`](Self::matrix_indices).
#[derive(Debug)]
pub struct DatabaseLandBalancer {
    store: SharedStore,
    database_name: String,
    land_in_keys: Arc<HashSet<RecordKey>>,
    land_out_keys: Arc<HashSet<RecordKey>>,
    all_land_keys: Arc<HashSet<RecordKey>>,
    group: String,
    matrix_indices: Vec<(RecordKey, RecordKey)>,
    matrix_samples: Option<SampleMatrix>,
    rng: StdRng,
}

impl DatabaseLandBalancer {
    /// Balancer for `database_name`, classifying flows from the database
    /// named `biosphere`.
    pub fn new(store: SharedStore, database_name: &str) -> Result<Self, BalanceError> {
        Self::with_biosphere(store, database_name, "biosphere")
    }

    pub fn with_biosphere(
        store: SharedStore,
        database_name: &str,
        biosphere_name: &str,
    ) -> Result<Self, BalanceError> {
        let (land_in_keys, land_out_keys) = {
            let guard = store.read();
            guard.database(database_name)?;
            let biosphere = guard.database(biosphere_name)?;
            let mut land_in = HashSet::new();
            let mut land_out = HashSet::new();
            for flow in biosphere.activities.values() {
                if flow.name.starts_with(LAND_IN_PATTERN) {
                    land_in.insert(flow.key());
                } else if flow.name.starts_with(LAND_OUT_PATTERN) {
                    land_out.insert(flow.key());
                }
            }
            (land_in, land_out)
        };
        let all_land_keys: HashSet<RecordKey> =
            land_in_keys.union(&land_out_keys).cloned().collect();
        tracing::debug!(
            database = database_name,
            biosphere = biosphere_name,
            land_in = land_in_keys.len(),
            land_out = land_out_keys.len(),
            "classified land transformation flows"
        );

        Ok(Self {
            store,
            database_name: database_name.to_string(),
            land_in_keys: Arc::new(land_in_keys),
            land_out_keys: Arc::new(land_out_keys),
            all_land_keys: Arc::new(all_land_keys),
            group: format!("{database_name}_land_balancing"),
            matrix_indices: Vec::new(),
            matrix_samples: None,
            rng: StdRng::from_entropy(),
        })
    }

    /// Replace the entropy-seeded generator, for reproducible runs.
    pub fn with_rng_seed(mut self, seed: u64) -> Self {
        self.rng = StdRng::seed_from_u64(seed);
        self
    }

    pub fn store(&self) -> SharedStore {
        Arc::clone(&self.store)
    }

    pub fn database_name(&self) -> &str {
        &self.database_name
    }

    pub fn land_in_keys(&self) -> Arc<HashSet<RecordKey>> {
        Arc::clone(&self.land_in_keys)
    }

    pub fn land_out_keys(&self) -> Arc<HashSet<RecordKey>> {
        Arc::clone(&self.land_out_keys)
    }

    pub fn all_land_keys(&self) -> Arc<HashSet<RecordKey>> {
        Arc::clone(&self.all_land_keys)
    }

    /// Parameter group name all balancing parameters of this database
    /// register under.
    pub fn group(&self) -> &str {
        &self.group
    }

    /// `(flow key, activity key)` pair per aggregated matrix row.
    pub fn matrix_indices(&self) -> &[(RecordKey, RecordKey)] {
        &self.matrix_indices
    }

    pub fn matrix_samples(&self) -> Option<&SampleMatrix> {
        self.matrix_samples.as_ref()
    }

    /// Balance one activity and return its sample block without touching the
    /// aggregate matrix. `Ok(None)` means the activity was skipped.
    pub fn balance_activity(
        &mut self,
        act_key: &RecordKey,
        iterations: usize,
    ) -> Result<Option<SampleBlock>, BalanceError> {
        let mut balancer = ActivityLandBalancer::new(act_key.clone(), self)?;
        balancer.generate_samples(iterations, &mut self.rng)
    }

    /// Balance one activity and stack its rows onto the aggregate matrix.
    pub fn add_samples_for_act(
        &mut self,
        act_key: &RecordKey,
        iterations: usize,
    ) -> Result<(), BalanceError> {
        if let Some(block) = self.balance_activity(act_key, iterations)? {
            match &mut self.matrix_samples {
                Some(matrix) => matrix.vstack(&block.samples)?,
                None => self.matrix_samples = Some(block.samples),
            }
            self.matrix_indices.extend(block.indices);
        }
        Ok(())
    }

    /// Balance every activity of the database, in stable (code) order.
    pub fn add_samples_for_all_acts(&mut self, iterations: usize) -> Result<(), BalanceError> {
        let keys: Vec<RecordKey> = {
            let guard = self.store.read();
            guard
                .database(&self.database_name)?
                .activities
                .values()
                .map(|act| act.key())
                .collect()
        };
        for key in keys {
            tracing::debug!(activity = %key, "balancing land exchanges");
            self.add_samples_for_act(&key, iterations)?;
        }
        Ok(())
    }

    /// Write the aggregated matrix as a presample package. Errors with
    /// [`EngineError::EmptyMatrix`] if no samples have been aggregated.
    pub fn create_presamples(
        &self,
        id: Option<&str>,
        outdir: Option<&Path>,
    ) -> Result<(String, PathBuf), BalanceError> {
        let samples = self
            .matrix_samples
            .as_ref()
            .ok_or(EngineError::EmptyMatrix)?;
        Ok(presamples::create_presamples(
            samples,
            &self.matrix_indices,
            id,
            outdir,
        )?)
    }
}
