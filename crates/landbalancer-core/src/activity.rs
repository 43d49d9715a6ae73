//! Activity-level balancing: strategy selection, balancing-equation
//! derivation and guarded sample generation.

use crate::database::DatabaseLandBalancer;
use crate::names::ParameterNameGenerator;
use crate::BalanceError;
use landbalancer_engine::{ParameterEngine, SampleBlock, StochasticModel};
use landbalancer_store::{ActivityParameter, Exchange, RecordKey, SharedStore};
use rand::rngs::StdRng;
use serde::{Deserialize, Serialize};
use std::collections::HashSet;
use std::fmt;
use std::sync::Arc;

/// How an activity's land exchanges get rebalanced.
///
/// - `Skip`: nothing to do (no land exchanges, a side with only zero
///   amounts, or no uncertainty anywhere).
/// - `Default`: rescale the uncertain (variable) inputs so each draw's
///   input/output ratio equals the static ratio.
/// - `Inverse`: mirror image, rescaling the uncertain outputs.
/// - `SetStatic`: a single uncertain land exchange is pinned to its static
///   amount; no ratio is involved.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Strategy {
    Skip,
    Default,
    Inverse,
    SetStatic,
}

impl fmt::Display for Strategy {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Strategy::Skip => write!(f, "skip"),
            Strategy::Default => write!(f, "default"),
            Strategy::Inverse => write!(f, "inverse"),
            Strategy::SetStatic => write!(f, "set_static"),
        }
    }
}

/// Per-exchange land classification.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum LandExchangeKind {
    LandIn,
    LandOut,
    /// Keyed as a land flow but resolvable to neither side; excluded from
    /// the balance with a warning.
    Unclassified,
}

/// A derived static quantity. `NotCalculated` is the explicit sentinel for
/// strategies that never compute ratios (`set_static`).
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub enum StaticValue {
    Computed(f64),
    NotCalculated,
}

impl StaticValue {
    pub fn value(&self) -> Option<f64> {
        match self {
            StaticValue::Computed(v) => Some(*v),
            StaticValue::NotCalculated => None,
        }
    }
}

/// Balances land exchange samples for a single activity.
///
/// Construction classifies the activity's land exchanges (using the sets the
/// owning [`DatabaseLandBalancer`] computed) and moves any pre-existing
/// exchange formulas aside so they stay invisible to the parameter engine
/// for the duration of the round. [`generate_samples`](Self::generate_samples)
/// does the actual work; the activity record is guaranteed to be restored to
/// its pre-call state afterwards, even if the engine fails.
pub struct ActivityLandBalancer {
    store: SharedStore,
    act_key: RecordKey,
    land_in_keys: Arc<HashSet<RecordKey>>,
    land_out_keys: Arc<HashSet<RecordKey>>,
    all_land_keys: Arc<HashSet<RecordKey>>,
    group: String,
    land_exchange_keys: Vec<RecordKey>,
    land_exchange_kinds: Vec<LandExchangeKind>,
    land_exchange_param_names: Vec<String>,
    strategy: Option<Strategy>,
    static_ratio: Option<StaticValue>,
    static_balance: Option<StaticValue>,
    activity_params: Vec<ActivityParameter>,
}

impl ActivityLandBalancer {
    pub fn new(
        act_key: RecordKey,
        balancer: &DatabaseLandBalancer,
    ) -> Result<Self, BalanceError> {
        let store = balancer.store();
        let land_in_keys = balancer.land_in_keys();
        let land_out_keys = balancer.land_out_keys();
        let all_land_keys = balancer.all_land_keys();
        let group = balancer.group().to_string();

        let has_land = {
            let guard = store.read();
            let act = guard.activity(&act_key)?;
            act.exchanges
                .iter()
                .any(|e| all_land_keys.contains(&e.input))
        };

        let mut this = Self {
            store,
            act_key,
            land_in_keys,
            land_out_keys,
            all_land_keys,
            group,
            land_exchange_keys: Vec::new(),
            land_exchange_kinds: Vec::new(),
            land_exchange_param_names: Vec::new(),
            strategy: None,
            static_ratio: None,
            static_balance: None,
            activity_params: Vec::new(),
        };

        if !has_land {
            this.strategy = Some(Strategy::Skip);
            return Ok(this);
        }

        this.move_exchange_formulas_to_temp()?;

        // Re-enumerate after the move so classification sees the live state.
        let mut namer = ParameterNameGenerator::new();
        let guard = this.store.read();
        let act = guard.activity(&this.act_key)?;
        let mut keys = Vec::new();
        let mut kinds = Vec::new();
        let mut names = Vec::new();
        for exc in act
            .exchanges
            .iter()
            .filter(|e| this.all_land_keys.contains(&e.input))
        {
            keys.push(exc.input.clone());
            kinds.push(classify(&this.land_in_keys, &this.land_out_keys, exc));
            names.push(namer.next("land_param"));
        }
        drop(guard);
        this.land_exchange_keys = keys;
        this.land_exchange_kinds = kinds;
        this.land_exchange_param_names = names;
        Ok(this)
    }

    pub fn strategy(&self) -> Option<Strategy> {
        self.strategy
    }

    pub fn static_ratio(&self) -> Option<StaticValue> {
        self.static_ratio
    }

    pub fn static_balance(&self) -> Option<StaticValue> {
        self.static_balance
    }

    pub fn activity_params(&self) -> &[ActivityParameter] {
        &self.activity_params
    }

    /// Input keys of the activity's land exchanges, in exchange order (the
    /// row order of the generated sample block).
    pub fn land_exchange_keys(&self) -> &[RecordKey] {
        &self.land_exchange_keys
    }

    pub fn land_exchange_kinds(&self) -> &[LandExchangeKind] {
        &self.land_exchange_kinds
    }

    /// True once strategy and balancing parameters are fully derived (for
    /// `skip`, as soon as the strategy is known).
    pub fn processed(&self) -> bool {
        match self.strategy {
            None => false,
            Some(Strategy::Skip) => true,
            Some(_) => {
                self.static_ratio.is_some()
                    && self.static_balance.is_some()
                    && !self.activity_params.is_empty()
            }
        }
    }

    /// Clear derived state so strategy and parameters can be re-derived
    /// (e.g. after an upstream data change).
    pub fn reset(&mut self) {
        self.strategy = None;
        self.static_ratio = None;
        self.static_balance = None;
        self.activity_params.clear();
    }

    /// Pick the rebalancing strategy from the land exchanges' static amounts
    /// and uncertainty presence.
    pub fn identify_strategy(&mut self) -> Result<(), BalanceError> {
        let mut has_nonzero_in = false;
        let mut has_nonzero_out = false;
        let mut uncertain_in = 0usize;
        let mut uncertain_out = 0usize;
        {
            let guard = self.store.read();
            let act = guard.activity(&self.act_key)?;
            let land = act
                .exchanges
                .iter()
                .filter(|e| self.all_land_keys.contains(&e.input));
            for (exc, kind) in land.zip(&self.land_exchange_kinds) {
                match kind {
                    LandExchangeKind::LandIn => {
                        if exc.amount != 0.0 {
                            has_nonzero_in = true;
                        }
                        if exc.is_uncertain() {
                            uncertain_in += 1;
                        }
                    }
                    LandExchangeKind::LandOut => {
                        if exc.amount != 0.0 {
                            has_nonzero_out = true;
                        }
                        if exc.is_uncertain() {
                            uncertain_out += 1;
                        }
                    }
                    LandExchangeKind::Unclassified => {}
                }
            }
        }

        // A balance needs at least one non-zero exchange on each side, and
        // at least one uncertain exchange to rebalance at all.
        let uncertain_total = uncertain_in + uncertain_out;
        self.strategy = Some(if !has_nonzero_in || !has_nonzero_out {
            Strategy::Skip
        } else if uncertain_total == 0 {
            Strategy::Skip
        } else if uncertain_total == 1 {
            Strategy::SetStatic
        } else if uncertain_in == 0 {
            Strategy::Inverse
        } else {
            Strategy::Default
        });
        Ok(())
    }

    /// Derive the activity-level parameters and per-exchange balance
    /// formulas for the identified strategy. Formulas are written to the
    /// exchanges' `land_formula` slot; the live `formula` field is only
    /// touched during [`generate_samples`](Self::generate_samples).
    pub fn define_balancing_parameters(&mut self) -> Result<(), BalanceError> {
        match self.strategy {
            None => Err(BalanceError::NotProcessed),
            Some(Strategy::Skip) => Ok(()),
            Some(Strategy::Default) => self.derive_rescale(LandExchangeKind::LandIn),
            Some(Strategy::Inverse) => self.derive_rescale(LandExchangeKind::LandOut),
            Some(Strategy::SetStatic) => self.derive_set_static(),
        }
    }

    /// Run the full round: derive (if needed), stage formulas, register with
    /// the parameter engine, sample, and restore. Returns `None` for the
    /// `skip` strategy without touching the store.
    ///
    /// The activity's exchange formulas and parameter list are restored to
    /// their pre-call state on every exit path; the derived balance formulas
    /// remain inspectable on the exchanges' `land_formula` field.
    pub fn generate_samples(
        &mut self,
        iterations: usize,
        rng: &mut StdRng,
    ) -> Result<Option<SampleBlock>, BalanceError> {
        if !self.processed() {
            self.activity_params.clear();
            self.identify_strategy()?;
            self.define_balancing_parameters()?;
        }
        if self.strategy == Some(Strategy::Skip) {
            return Ok(None);
        }

        // Stage derived formulas into the live field and stash the existing
        // parameter list. From here on the restore guard owns cleanup.
        let original_params = {
            let mut guard = self.store.write();
            let act = guard.activity_mut(&self.act_key)?;
            for exc in &mut act.exchanges {
                if let Some(formula) = exc.land_formula.take() {
                    exc.formula = Some(formula);
                }
            }
            std::mem::take(&mut act.parameters)
        };
        let _restore = RestoreGuard {
            store: Arc::clone(&self.store),
            key: self.act_key.clone(),
            original_params,
        };

        let mut engine = ParameterEngine::new();
        let outcome = self.run_stochastic(&mut engine, iterations, rng);
        engine.remove_from_group(&self.group, &self.act_key);
        outcome.map(Some)
    }

    fn run_stochastic(
        &self,
        engine: &mut ParameterEngine,
        iterations: usize,
        rng: &mut StdRng,
    ) -> Result<SampleBlock, BalanceError> {
        {
            let mut guard = self.store.write();
            engine.new_activity_parameters(&mut guard, self.activity_params.clone(), &self.group)?;
        }
        let act = {
            let guard = self.store.read();
            guard.activity(&self.act_key)?.clone()
        };
        engine.add_exchanges_to_group(&self.group, &act)?;
        engine.recalculate(&self.group)?;

        let mut model = StochasticModel::new(engine, &self.group)?;
        model.calculate_stochastic(iterations, rng)?;
        Ok(model.matrix_samples()?)
    }

    /// Shared derivation for `default` (variable side = inputs) and
    /// `inverse` (variable side = outputs). Exchanges on the variable side
    /// with uncertainty are hooked to `<name> * scaling`; everything else is
    /// hooked to its own parameter name unchanged.
    fn derive_rescale(&mut self, variable: LandExchangeKind) -> Result<(), BalanceError> {
        let mut var_terms: Vec<String> = Vec::new();
        let mut const_terms: Vec<String> = Vec::new();
        let mut fixed_terms: Vec<String> = Vec::new();
        let mut in_total = 0.0;
        let mut out_total = 0.0;
        let mut params = Vec::new();
        let act_db;
        let act_code;

        {
            let mut guard = self.store.write();
            let act = guard.activity_mut(&self.act_key)?;
            act_db = act.database.clone();
            act_code = act.code.clone();
            let mut idx = 0;
            for exc in act.exchanges.iter_mut() {
                if !self.all_land_keys.contains(&exc.input) {
                    continue;
                }
                let kind = self.land_exchange_kinds[idx];
                let name = self.land_exchange_param_names[idx].clone();
                idx += 1;
                match kind {
                    LandExchangeKind::LandIn => in_total += exc.amount,
                    LandExchangeKind::LandOut => out_total += exc.amount,
                    LandExchangeKind::Unclassified => continue,
                }
                params.push(convert_exchange_to_param(exc, &name, &act_db, &act_code));
                if kind == variable {
                    if exc.is_uncertain() {
                        exc.land_formula = Some(format!("{name} * scaling"));
                        var_terms.push(name);
                    } else {
                        exc.land_formula = Some(name.clone());
                        const_terms.push(name);
                    }
                } else {
                    exc.land_formula = Some(name.clone());
                    fixed_terms.push(name);
                }
            }
        }

        let (ratio, balance) = match variable {
            // default: scale inputs to match in/out ratio of the statics
            LandExchangeKind::LandIn => (
                if out_total != 0.0 {
                    in_total / out_total
                } else {
                    f64::INFINITY
                },
                in_total - out_total,
            ),
            // inverse: scale outputs to match out/in ratio of the statics
            _ => (
                if in_total != 0.0 {
                    out_total / in_total
                } else {
                    f64::INFINITY
                },
                out_total - in_total,
            ),
        };
        self.static_ratio = Some(StaticValue::Computed(ratio));
        self.static_balance = Some(StaticValue::Computed(balance));

        params.push(ActivityParameter {
            name: "static_ratio".to_string(),
            amount: ratio,
            uncertainty: None,
            database: act_db.clone(),
            code: act_code.clone(),
            formula: None,
        });

        let fixed_term = join_terms(&fixed_terms, None, None)?;
        let const_term = join_terms(&const_terms, Some("0"), None)?;
        // The inverse strategy requires >= 2 variable terms (a single
        // uncertain output would have resolved to set_static); the default
        // strategy carries no such guard. Preserved as observed.
        let min_var = if variable == LandExchangeKind::LandOut {
            Some(2)
        } else {
            None
        };
        let var_term = join_terms(&var_terms, None, min_var)?;

        params.push(ActivityParameter {
            name: "scaling".to_string(),
            amount: 0.0,
            uncertainty: None,
            database: act_db.clone(),
            code: act_code.clone(),
            formula: Some(format!("({ratio}*{fixed_term}-{const_term})/({var_term})")),
        });
        // Diagnostics only: per-draw realized ratio, not consumed downstream.
        params.push(ActivityParameter {
            name: "ratio".to_string(),
            amount: 0.0,
            uncertainty: None,
            database: act_db,
            code: act_code,
            formula: Some(format!(
                "(scaling * {var_term} + {const_term})/{fixed_term}"
            )),
        });

        self.activity_params = params;
        Ok(())
    }

    /// Pin the single uncertain land exchange to its static amount: its
    /// formula becomes the literal parameter `cst`, whose draws are the
    /// constant static amount.
    fn derive_set_static(&mut self) -> Result<(), BalanceError> {
        let param = {
            let mut guard = self.store.write();
            let act = guard.activity_mut(&self.act_key)?;
            let act_db = act.database.clone();
            let act_code = act.code.clone();
            let mut uncertain: Vec<&mut Exchange> = act
                .exchanges
                .iter_mut()
                .filter(|e| self.all_land_keys.contains(&e.input) && e.is_uncertain())
                .collect();
            if uncertain.len() != 1 {
                return Err(BalanceError::SetStaticCardinality {
                    got: uncertain.len(),
                });
            }
            let exc = &mut *uncertain[0];
            exc.land_formula = Some("cst".to_string());
            let mut param = convert_exchange_to_param(exc, "cst", &act_db, &act_code);
            param.uncertainty = None;
            param
        };

        self.activity_params = vec![param];
        self.static_ratio = Some(StaticValue::NotCalculated);
        self.static_balance = Some(StaticValue::NotCalculated);
        Ok(())
    }

    /// Move pre-existing exchange formulas out of the way. Upstream data
    /// reuses the formula field for things like chemical formulas on
    /// biosphere exchanges; those must not reach the parameter engine.
    fn move_exchange_formulas_to_temp(&self) -> Result<(), BalanceError> {
        let mut guard = self.store.write();
        let act = guard.activity_mut(&self.act_key)?;
        for exc in &mut act.exchanges {
            if let Some(formula) = exc.formula.take() {
                exc.temp_formula = Some(formula);
            }
        }
        Ok(())
    }
}

fn classify(
    land_in_keys: &HashSet<RecordKey>,
    land_out_keys: &HashSet<RecordKey>,
    exc: &Exchange,
) -> LandExchangeKind {
    if land_in_keys.contains(&exc.input) {
        LandExchangeKind::LandIn
    } else if land_out_keys.contains(&exc.input) {
        LandExchangeKind::LandOut
    } else {
        tracing::warn!(
            input = %exc.input,
            kind = ?exc.kind,
            "exchange type not understood, excluded from balance"
        );
        LandExchangeKind::Unclassified
    }
}

/// Copy one exchange into a parameter hooked to `name`.
fn convert_exchange_to_param(
    exc: &Exchange,
    name: &str,
    act_db: &str,
    act_code: &str,
) -> ActivityParameter {
    ActivityParameter {
        name: name.to_string(),
        amount: exc.amount,
        uncertainty: exc.uncertainty,
        database: act_db.to_string(),
        code: act_code.to_string(),
        formula: None,
    }
}

/// Join term names into a single formula fragment: one term stays bare,
/// several are parenthesized and `+`-joined.
fn join_terms(
    terms: &[String],
    on_empty: Option<&str>,
    min_terms: Option<usize>,
) -> Result<String, BalanceError> {
    if let Some(needed) = min_terms {
        if terms.len() < needed {
            return Err(BalanceError::TooFewTerms {
                needed,
                got: terms.len(),
            });
        }
    }
    match terms.len() {
        0 => on_empty
            .map(str::to_string)
            .ok_or(BalanceError::EmptyTermGroup),
        1 => Ok(terms[0].clone()),
        _ => Ok(format!("({})", terms.join(" + "))),
    }
}

/// Restores the activity record on drop: live formulas are archived to
/// `land_formula`, moved-aside formulas return to the live field, and the
/// original parameter list replaces whatever the engine attached.
struct RestoreGuard {
    store: SharedStore,
    key: RecordKey,
    original_params: Vec<ActivityParameter>,
}

impl Drop for RestoreGuard {
    fn drop(&mut self) {
        let mut guard = self.store.write();
        let act = match guard.activity_mut(&self.key) {
            Ok(act) => act,
            Err(e) => {
                tracing::error!(
                    key = %self.key,
                    error = %e,
                    "restore failed, activity state is inconsistent"
                );
                return;
            }
        };
        for exc in &mut act.exchanges {
            if let Some(formula) = exc.formula.take() {
                exc.land_formula = Some(formula);
            }
            if let Some(formula) = exc.temp_formula.take() {
                exc.formula = Some(formula);
            }
        }
        act.parameters = std::mem::take(&mut self.original_params);
    }
}
