//! In-memory LCA data store.
//!
//! Holds the activity and elementary-flow records the land balancer reads and
//! mutates in place:
//!
//! - A [`Store`] is a set of named [`Database`]s.
//! - A [`Database`] maps record codes to [`Activity`] records in a stable,
//!   code-sorted order (downstream aggregation documents and relies on this
//!   iteration order).
//! - An [`Activity`] owns its [`Exchange`]s and an attached parameter list.
//!   Elementary (biosphere) flows are activities with category data and no
//!   exchanges, matching the record shape of common LCA stores.
//!
//! Exchanges carry three formula slots: the live `formula` field seen by the
//! parameter engine, `temp_formula` (pre-existing formulas moved aside for
//! the duration of a balancing round) and `land_formula` (derived balance
//! formulas, staged in and archived back out by the balancer).

use parking_lot::RwLock;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::fmt;
use std::sync::Arc;
use thiserror::Error;


// ============================================================================
// Keys
// ============================================================================

/// Compound identity of a record (activity or elementary flow): the owning
/// database name plus the record's code, unique within that database.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct RecordKey {
    pub database: String,
    pub code: String,
}

impl RecordKey {
    pub fn new(database: impl Into<String>, code: impl Into<String>) -> Self {
        Self {
            database: database.into(),
            code: code.into(),
        }
    }
}

impl From<(&str, &str)> for RecordKey {
    fn from((database, code): (&str, &str)) -> Self {
        Self::new(database, code)
    }
}

impl fmt::Display for RecordKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "('{}', '{}')", self.database, self.code)
    }
}

// ============================================================================
// Uncertainty
// ============================================================================

/// Uncertainty descriptor of an exchange amount.
///
/// Absence of uncertainty is represented by `Option::None` on the owning
/// record, not by a dedicated variant. `loc`/`scale` follow the usual LCA
/// convention: for lognormal, `loc` is the natural log of the static amount.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum Uncertainty {
    Lognormal {
        loc: f64,
        scale: f64,
        #[serde(default)]
        negative: bool,
    },
    Normal {
        loc: f64,
        scale: f64,
    },
    Uniform {
        minimum: f64,
        maximum: f64,
    },
    Triangular {
        minimum: f64,
        loc: f64,
        maximum: f64,
    },
}

impl Uncertainty {
    /// Numeric distribution code used by the upstream data format
    /// (0 = none, 2 = lognormal, 3 = normal, 4 = uniform, 5 = triangular).
    /// Kept for diagnostics only.
    pub fn type_code(&self) -> u8 {
        match self {
            Uncertainty::Lognormal { .. } => 2,
            Uncertainty::Normal { .. } => 3,
            Uncertainty::Uniform { .. } => 4,
            Uncertainty::Triangular { .. } => 5,
        }
    }
}

// ============================================================================
// Exchanges
// ============================================================================

/// Direction/role of an exchange within its activity.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ExchangeKind {
    Production,
    Technosphere,
    Biosphere,
}

/// A directed flow record between an activity and an input record (another
/// activity or an elementary flow). Owned by its activity and mutated in
/// place during a balancing round.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Exchange {
    pub input: RecordKey,
    pub name: String,
    pub amount: f64,
    pub kind: ExchangeKind,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub uncertainty: Option<Uncertainty>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub formula: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub temp_formula: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub land_formula: Option<String>,
}

impl Exchange {
    pub fn new(input: impl Into<RecordKey>, name: &str, amount: f64, kind: ExchangeKind) -> Self {
        Self {
            input: input.into(),
            name: name.to_string(),
            amount,
            kind,
            uncertainty: None,
            formula: None,
            temp_formula: None,
            land_formula: None,
        }
    }

    pub fn production(input: impl Into<RecordKey>, name: &str, amount: f64) -> Self {
        Self::new(input, name, amount, ExchangeKind::Production)
    }

    pub fn technosphere(input: impl Into<RecordKey>, name: &str, amount: f64) -> Self {
        Self::new(input, name, amount, ExchangeKind::Technosphere)
    }

    pub fn biosphere(input: impl Into<RecordKey>, name: &str, amount: f64) -> Self {
        Self::new(input, name, amount, ExchangeKind::Biosphere)
    }

    pub fn with_uncertainty(mut self, uncertainty: Uncertainty) -> Self {
        self.uncertainty = Some(uncertainty);
        self
    }

    pub fn with_formula(mut self, formula: &str) -> Self {
        self.formula = Some(formula.to_string());
        self
    }

    /// True when the exchange carries a non-trivial uncertainty descriptor.
    pub fn is_uncertain(&self) -> bool {
        self.uncertainty.is_some()
    }
}

// ============================================================================
// Activity parameters
// ============================================================================

/// A named symbolic quantity attached to an activity, registered with the
/// parameter engine for joint stochastic evaluation. Either a direct copy of
/// one exchange (no formula) or a derived scalar whose formula combines other
/// parameter names.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ActivityParameter {
    pub name: String,
    pub amount: f64,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub uncertainty: Option<Uncertainty>,
    /// Database of the owning activity.
    pub database: String,
    /// Code of the owning activity.
    pub code: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub formula: Option<String>,
}

impl ActivityParameter {
    /// Key of the activity this parameter belongs to.
    pub fn activity_key(&self) -> RecordKey {
        RecordKey::new(self.database.clone(), self.code.clone())
    }
}

// ============================================================================
// Activities and databases
// ============================================================================

/// An activity record. Elementary flows reuse the same shape with
/// `categories` set and no exchanges.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Activity {
    pub database: String,
    pub code: String,
    pub name: String,
    pub unit: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub location: Option<String>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub categories: Vec<String>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub exchanges: Vec<Exchange>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub parameters: Vec<ActivityParameter>,
}

impl Activity {
    pub fn new(database: &str, code: &str, name: &str, unit: &str) -> Self {
        Self {
            database: database.to_string(),
            code: code.to_string(),
            name: name.to_string(),
            unit: unit.to_string(),
            location: None,
            categories: Vec::new(),
            exchanges: Vec::new(),
            parameters: Vec::new(),
        }
    }

    /// Convenience constructor for an elementary (biosphere) flow record.
    pub fn flow(database: &str, code: &str, name: &str, categories: &[&str], unit: &str) -> Self {
        let mut act = Self::new(database, code, name, unit);
        act.categories = categories.iter().map(|c| c.to_string()).collect();
        act
    }

    pub fn with_location(mut self, location: &str) -> Self {
        self.location = Some(location.to_string());
        self
    }

    pub fn with_exchange(mut self, exchange: Exchange) -> Self {
        self.exchanges.push(exchange);
        self
    }

    pub fn key(&self) -> RecordKey {
        RecordKey::new(self.database.clone(), self.code.clone())
    }
}

/// A named collection of activity records with stable, code-sorted iteration
/// order.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct Database {
    pub name: String,
    pub activities: BTreeMap<String, Activity>,
}

impl Database {
    pub fn new(name: &str) -> Self {
        Self {
            name: name.to_string(),
            activities: BTreeMap::new(),
        }
    }

    pub fn insert(&mut self, activity: Activity) {
        debug_assert_eq!(activity.database, self.name);
        self.activities.insert(activity.code.clone(), activity);
    }

    pub fn with_activity(mut self, activity: Activity) -> Self {
        self.insert(activity);
        self
    }

    pub fn len(&self) -> usize {
        self.activities.len()
    }

    pub fn is_empty(&self) -> bool {
        self.activities.is_empty()
    }
}

// ============================================================================
// Store
// ============================================================================

#[derive(Debug, Error)]
pub enum StoreError {
    #[error("database `{name}` not imported")]
    DatabaseMissing { name: String },
    #[error("activity {key} not found")]
    ActivityMissing { key: RecordKey },
}

/// Shared handle to a store. Balancing is single-threaded; the lock exists so
/// the balancer, the parameter engine and the caller can hold one handle.
pub type SharedStore = Arc<RwLock<Store>>;

/// The root data store: all registered databases.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct Store {
    pub databases: BTreeMap<String, Database>,
}

impl Store {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn register(&mut self, database: Database) {
        tracing::debug!(name = %database.name, records = database.len(), "registering database");
        self.databases.insert(database.name.clone(), database);
    }

    pub fn has_database(&self, name: &str) -> bool {
        self.databases.contains_key(name)
    }

    pub fn database(&self, name: &str) -> Result<&Database, StoreError> {
        self.databases.get(name).ok_or_else(|| StoreError::DatabaseMissing {
            name: name.to_string(),
        })
    }

    pub fn activity(&self, key: &RecordKey) -> Result<&Activity, StoreError> {
        self.database(&key.database)?
            .activities
            .get(&key.code)
            .ok_or_else(|| StoreError::ActivityMissing { key: key.clone() })
    }

    pub fn activity_mut(&mut self, key: &RecordKey) -> Result<&mut Activity, StoreError> {
        self.databases
            .get_mut(&key.database)
            .ok_or_else(|| StoreError::DatabaseMissing {
                name: key.database.clone(),
            })?
            .activities
            .get_mut(&key.code)
            .ok_or_else(|| StoreError::ActivityMissing { key: key.clone() })
    }

    pub fn into_shared(self) -> SharedStore {
        Arc::new(RwLock::new(self))
    }

    pub fn to_json(&self) -> serde_json::Result<String> {
        serde_json::to_string_pretty(self)
    }

    pub fn from_json(text: &str) -> serde_json::Result<Self> {
        serde_json::from_str(text)
    }
}
