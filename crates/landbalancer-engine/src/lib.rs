//! Parameter registration and stochastic evaluation.
//!
//! The balancer hands this engine a set of named [`ActivityParameter`]s plus
//! the exchange formulas of one activity, scoped under a group label, and
//! gets back a matrix of Monte-Carlo draws indexed by flow identity:
//!
//! 1. [`ParameterEngine::new_activity_parameters`] registers parameters for
//!    a group (and attaches them to the owning activity record).
//! 2. [`ParameterEngine::add_exchanges_to_group`] binds the exchange-level
//!    formulas currently live on the activity.
//! 3. [`ParameterEngine::recalculate`] resolves the static amounts of
//!    derived (formula) parameters in dependency order.
//! 4. [`StochasticModel`] draws per-parameter sample vectors and
//!    materializes one sample row per bound exchange.
//! 5. [`ParameterEngine::remove_from_group`] tears the registration down.
//!
//! Formulas stay plain strings at this boundary; they are parsed with
//! `landbalancer-formula` on the way in.

use landbalancer_formula::{parse_formula, FormulaError, FormulaExpr};
use landbalancer_store::{ActivityParameter, RecordKey, Store, StoreError, Uncertainty};
use rand::rngs::StdRng;
use rand_distr::{Distribution, LogNormal, Normal, Triangular, Uniform};
use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, BTreeSet};
use thiserror::Error;

pub mod presamples;


#[derive(Debug, Error)]
pub enum EngineError {
    #[error("parameter group `{name}` does not exist")]
    UnknownGroup { name: String },
    #[error("parameter `{name}` already registered in group")]
    DuplicateParameter { name: String },
    #[error("formula references unknown parameter `{name}`")]
    UnknownParameter { name: String },
    #[error("circular parameter dependency in group `{group}`")]
    CircularDependency { group: String },
    #[error("sample matrix is empty, nothing to persist")]
    EmptyMatrix,
    #[error("column count mismatch: expected {expected}, got {got}")]
    ColumnMismatch { expected: usize, got: usize },
    #[error("index length {indices} does not match matrix rows {rows}")]
    ShapeMismatch { rows: usize, indices: usize },
    #[error("invalid uncertainty descriptor: {reason}")]
    InvalidDistribution { reason: String },
    #[error(transparent)]
    Formula(#[from] FormulaError),
    #[error(transparent)]
    Store(#[from] StoreError),
    #[error(transparent)]
    Io(#[from] std::io::Error),
    #[error("presample encoding failed: {0}")]
    Encoding(#[from] bincode::Error),
}

// ============================================================================
// Sample matrices
// ============================================================================

/// Dense row-major matrix of Monte-Carlo draws: one row per flow, one column
/// per iteration.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SampleMatrix {
    rows: usize,
    cols: usize,
    values: Vec<f64>,
}

impl SampleMatrix {
    /// Empty matrix with a fixed column (iteration) count.
    pub fn with_cols(cols: usize) -> Self {
        Self {
            rows: 0,
            cols,
            values: Vec::new(),
        }
    }

    pub fn from_rows(rows: &[Vec<f64>]) -> Result<Self, EngineError> {
        let cols = rows.first().map(Vec::len).unwrap_or(0);
        let mut matrix = Self::with_cols(cols);
        for row in rows {
            matrix.push_row(row)?;
        }
        Ok(matrix)
    }

    pub fn rows(&self) -> usize {
        self.rows
    }

    pub fn cols(&self) -> usize {
        self.cols
    }

    pub fn get(&self, row: usize, col: usize) -> f64 {
        self.values[row * self.cols + col]
    }

    pub fn row(&self, row: usize) -> &[f64] {
        &self.values[row * self.cols..(row + 1) * self.cols]
    }

    pub fn push_row(&mut self, row: &[f64]) -> Result<(), EngineError> {
        if row.len() != self.cols {
            return Err(EngineError::ColumnMismatch {
                expected: self.cols,
                got: row.len(),
            });
        }
        self.values.extend_from_slice(row);
        self.rows += 1;
        Ok(())
    }

    /// Append another matrix's rows below this one. Column counts must agree.
    pub fn vstack(&mut self, other: &SampleMatrix) -> Result<(), EngineError> {
        if other.cols != self.cols {
            return Err(EngineError::ColumnMismatch {
                expected: self.cols,
                got: other.cols,
            });
        }
        self.values.extend_from_slice(&other.values);
        self.rows += other.rows;
        Ok(())
    }

    /// Column sums filtered by a row mask (diagnostics and tests).
    pub fn masked_column_sums(&self, mask: &[bool]) -> Vec<f64> {
        let mut sums = vec![0.0; self.cols];
        for (row, selected) in mask.iter().enumerate() {
            if !selected {
                continue;
            }
            for (col, sum) in sums.iter_mut().enumerate() {
                *sum += self.get(row, col);
            }
        }
        sums
    }
}

/// Draws for one activity's balanced exchanges plus the identifying index:
/// one `(input flow key, owning activity key)` pair per row.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SampleBlock {
    pub samples: SampleMatrix,
    pub indices: Vec<(RecordKey, RecordKey)>,
}

// ============================================================================
// Parameter groups
// ============================================================================

/// An exchange-level formula bound into a group: evaluating the formula
/// against the group's parameter draws yields the row for `(input, output)`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ExchangeBinding {
    pub input: RecordKey,
    pub output: RecordKey,
    pub formula: String,
}

#[derive(Debug, Clone, Default)]
struct ParameterGroup {
    params: Vec<ActivityParameter>,
    bindings: Vec<ExchangeBinding>,
}

/// Registry of parameter groups. Each balancing round registers one group,
/// evaluates it, and removes it again.
#[derive(Debug, Default)]
pub struct ParameterEngine {
    groups: BTreeMap<String, ParameterGroup>,
}

impl ParameterEngine {
    pub fn new() -> Self {
        Self::default()
    }

    /// Register activity parameters under `group` and attach them to the
    /// owning activity's parameter-list field. Parameter names must be unique
    /// within the group.
    pub fn new_activity_parameters(
        &mut self,
        store: &mut Store,
        params: Vec<ActivityParameter>,
        group: &str,
    ) -> Result<(), EngineError> {
        let entry = self.groups.entry(group.to_string()).or_default();
        let mut seen: BTreeSet<&str> = entry.params.iter().map(|p| p.name.as_str()).collect();
        for param in &params {
            if !seen.insert(&param.name) {
                return Err(EngineError::DuplicateParameter {
                    name: param.name.clone(),
                });
            }
        }
        for param in &params {
            let key = param.activity_key();
            store.activity_mut(&key)?.parameters.push(param.clone());
        }
        tracing::debug!(group, count = params.len(), "registered activity parameters");
        entry.params.extend(params);
        Ok(())
    }

    /// Bind every exchange of `activity` that currently carries a live
    /// formula. The group must already exist.
    pub fn add_exchanges_to_group(
        &mut self,
        group: &str,
        activity: &landbalancer_store::Activity,
    ) -> Result<(), EngineError> {
        let entry = self
            .groups
            .get_mut(group)
            .ok_or_else(|| EngineError::UnknownGroup {
                name: group.to_string(),
            })?;
        let output = activity.key();
        for exchange in &activity.exchanges {
            if let Some(formula) = &exchange.formula {
                entry.bindings.push(ExchangeBinding {
                    input: exchange.input.clone(),
                    output: output.clone(),
                    formula: formula.clone(),
                });
            }
        }
        Ok(())
    }

    /// Resolve static amounts of derived (formula) parameters, multi-pass in
    /// dependency order. A full pass without progress means either a name
    /// that is defined nowhere or a dependency cycle.
    pub fn recalculate(&mut self, group: &str) -> Result<(), EngineError> {
        let entry = self
            .groups
            .get_mut(group)
            .ok_or_else(|| EngineError::UnknownGroup {
                name: group.to_string(),
            })?;

        let mut env: BTreeMap<String, f64> = entry
            .params
            .iter()
            .filter(|p| p.formula.is_none())
            .map(|p| (p.name.clone(), p.amount))
            .collect();

        let mut pending: Vec<(usize, FormulaExpr)> = Vec::new();
        for (i, param) in entry.params.iter().enumerate() {
            if let Some(formula) = &param.formula {
                pending.push((i, parse_formula(formula)?));
            }
        }
        let known: BTreeSet<String> = env
            .keys()
            .cloned()
            .chain(pending.iter().map(|(i, _)| entry.params[*i].name.clone()))
            .collect();

        while !pending.is_empty() {
            let mut progressed = false;
            pending.retain(|(i, expr)| {
                if expr.params().iter().all(|name| env.contains_key(*name)) {
                    // Names are checked above, eval cannot fail here.
                    let value = expr.eval(&|name| env.get(name).copied()).unwrap_or(f64::NAN);
                    env.insert(entry.params[*i].name.clone(), value);
                    progressed = true;
                    false
                } else {
                    true
                }
            });
            if !progressed {
                for (_, expr) in &pending {
                    if let Some(missing) =
                        expr.params().iter().find(|name| !known.contains(**name))
                    {
                        return Err(EngineError::UnknownParameter {
                            name: missing.to_string(),
                        });
                    }
                }
                return Err(EngineError::CircularDependency {
                    group: group.to_string(),
                });
            }
        }

        for param in entry.params.iter_mut() {
            if param.formula.is_some() {
                param.amount = env[&param.name];
            }
        }
        Ok(())
    }

    /// Drop the parameters and bindings `activity_key` contributed to the
    /// group; removes the group entirely once empty.
    pub fn remove_from_group(&mut self, group: &str, activity_key: &RecordKey) {
        if let Some(entry) = self.groups.get_mut(group) {
            entry
                .params
                .retain(|p| p.activity_key() != *activity_key);
            entry.bindings.retain(|b| b.output != *activity_key);
            if entry.params.is_empty() && entry.bindings.is_empty() {
                self.groups.remove(group);
            }
        }
    }

    pub fn has_group(&self, group: &str) -> bool {
        self.groups.contains_key(group)
    }

    fn group(&self, group: &str) -> Result<&ParameterGroup, EngineError> {
        self.groups.get(group).ok_or_else(|| EngineError::UnknownGroup {
            name: group.to_string(),
        })
    }
}

// ============================================================================
// Stochastic evaluation
// ============================================================================

fn sample_vector(
    uncertainty: &Uncertainty,
    iterations: usize,
    rng: &mut StdRng,
) -> Result<Vec<f64>, EngineError> {
    let invalid = |reason: String| EngineError::InvalidDistribution { reason };
    match *uncertainty {
        Uncertainty::Lognormal {
            loc,
            scale,
            negative,
        } => {
            let dist = LogNormal::new(loc, scale).map_err(|e| invalid(e.to_string()))?;
            let sign = if negative { -1.0 } else { 1.0 };
            Ok((0..iterations).map(|_| sign * dist.sample(rng)).collect())
        }
        Uncertainty::Normal { loc, scale } => {
            let dist = Normal::new(loc, scale).map_err(|e| invalid(e.to_string()))?;
            Ok((0..iterations).map(|_| dist.sample(rng)).collect())
        }
        Uncertainty::Uniform { minimum, maximum } => {
            if !(minimum < maximum) {
                return Err(invalid(format!(
                    "uniform minimum {minimum} must be below maximum {maximum}"
                )));
            }
            let dist = Uniform::new(minimum, maximum);
            Ok((0..iterations).map(|_| dist.sample(rng)).collect())
        }
        Uncertainty::Triangular {
            minimum,
            loc,
            maximum,
        } => {
            let dist =
                Triangular::new(minimum, maximum, loc).map_err(|e| invalid(format!("{e:?}")))?;
            Ok((0..iterations).map(|_| dist.sample(rng)).collect())
        }
    }
}

/// Stochastic model over one parameter group: per-parameter draw vectors and
/// per-binding sample rows.
#[derive(Debug)]
pub struct StochasticModel {
    group: String,
    params: Vec<ActivityParameter>,
    bindings: Vec<ExchangeBinding>,
    draws: BTreeMap<String, Vec<f64>>,
    iterations: usize,
}

impl StochasticModel {
    /// Load the group's parameter data.
    pub fn new(engine: &ParameterEngine, group: &str) -> Result<Self, EngineError> {
        let data = engine.group(group)?;
        Ok(Self {
            group: group.to_string(),
            params: data.params.clone(),
            bindings: data.bindings.clone(),
            draws: BTreeMap::new(),
            iterations: 0,
        })
    }

    /// Draw `iterations` samples for every parameter. Base parameters sample
    /// their uncertainty descriptor (or replicate their static amount);
    /// derived parameters evaluate their formula elementwise against the
    /// draws of the parameters they reference.
    pub fn calculate_stochastic(
        &mut self,
        iterations: usize,
        rng: &mut StdRng,
    ) -> Result<(), EngineError> {
        self.iterations = iterations;
        self.draws.clear();

        let mut pending: Vec<(&str, FormulaExpr)> = Vec::new();
        for param in &self.params {
            match (&param.formula, &param.uncertainty) {
                (Some(formula), _) => pending.push((&param.name, parse_formula(formula)?)),
                (None, Some(uncertainty)) => {
                    self.draws.insert(
                        param.name.clone(),
                        sample_vector(uncertainty, iterations, rng)?,
                    );
                }
                (None, None) => {
                    self.draws
                        .insert(param.name.clone(), vec![param.amount; iterations]);
                }
            }
        }

        while !pending.is_empty() {
            let mut progressed = false;
            let mut still_pending = Vec::new();
            for (name, expr) in pending {
                if expr.params().iter().all(|n| self.draws.contains_key(*n)) {
                    let mut values = Vec::with_capacity(iterations);
                    for i in 0..iterations {
                        values.push(expr.eval(&|n| self.draws.get(n).map(|v| v[i]))?);
                    }
                    self.draws.insert(name.to_string(), values);
                    progressed = true;
                } else {
                    still_pending.push((name, expr));
                }
            }
            if !progressed {
                return Err(EngineError::CircularDependency {
                    group: self.group.clone(),
                });
            }
            pending = still_pending;
        }
        Ok(())
    }

    /// Draw vector for a named parameter, once sampled.
    pub fn parameter_draws(&self, name: &str) -> Option<&[f64]> {
        self.draws.get(name).map(Vec::as_slice)
    }

    /// Materialize one sample row per bound exchange, in binding order.
    pub fn matrix_samples(&self) -> Result<SampleBlock, EngineError> {
        let mut samples = SampleMatrix::with_cols(self.iterations);
        let mut indices = Vec::with_capacity(self.bindings.len());
        for binding in &self.bindings {
            let expr = parse_formula(&binding.formula)?;
            let mut row = Vec::with_capacity(self.iterations);
            for i in 0..self.iterations {
                row.push(expr.eval(&|name| self.draws.get(name).map(|v| v[i]))?);
            }
            samples.push_row(&row)?;
            indices.push((binding.input.clone(), binding.output.clone()));
        }
        Ok(SampleBlock { samples, indices })
    }
}
