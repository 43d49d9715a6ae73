//! Balancer tests against a small two-database fixture.
//!
//! The fixture's activities each exercise one strategy path:
//! A and C rebalance inputs (ratios 1 and 2), B and D rebalance outputs
//! (ratios 1 and 0.5), G and H pin a single uncertain exchange, I, J and K
//! are skipped (missing side or no uncertainty), X has no land exchanges.

use crate::{
    ActivityLandBalancer, BalanceError, DatabaseLandBalancer, LandExchangeKind, StaticValue,
    Strategy,
};
use approx::assert_relative_eq;
use landbalancer_engine::presamples::{load_presample_indices, load_presample_samples};
use landbalancer_engine::SampleBlock;
use landbalancer_store::{
    Activity, Database, Exchange, RecordKey, SharedStore, Store, StoreError, Uncertainty,
};
use rand::rngs::StdRng;
use rand::SeedableRng;
use tempfile::tempdir;

const FROM_1: (&str, &str) = ("biosphere", "Transformation, from 1");
const FROM_2: (&str, &str) = ("biosphere", "Transformation, from 2");
const TO_1: (&str, &str) = ("biosphere", "Transformation, to 1");
const TO_2: (&str, &str) = ("biosphere", "Transformation, to 2");

fn rng() -> StdRng {
    StdRng::seed_from_u64(42)
}

fn lognormal(amount: f64) -> Uncertainty {
    Uncertainty::Lognormal {
        loc: amount.ln(),
        scale: 0.1,
        negative: false,
    }
}

fn land_flow(code: &str) -> Activity {
    Activity::flow(
        "biosphere",
        code,
        code,
        &["natural resource", "land"],
        "square meter",
    )
}

fn production(code: &str) -> Exchange {
    Exchange::production(("test_db", code), "some product", 1.0)
}

fn input_from_x() -> Exchange {
    Exchange::technosphere(("test_db", "X"), "some product", 1.0).with_uncertainty(lognormal(1.0))
}

fn fixture_store() -> SharedStore {
    let biosphere = Database::new("biosphere")
        .with_activity(land_flow("Transformation, from 1"))
        .with_activity(land_flow("Transformation, from 2"))
        .with_activity(land_flow("Transformation, to 1"))
        .with_activity(land_flow("Transformation, to 2"))
        .with_activity(Activity::flow(
            "biosphere",
            "Something else",
            "Something else to air, in m3",
            &["air"],
            "kg",
        ));

    let test_db = Database::new("test_db")
        .with_activity(
            Activity::new("test_db", "X", "X", "kilogram")
                .with_location("GLO")
                .with_exchange(production("X")),
        )
        // uncertain in and out on both sides, in/out ratio 1
        .with_activity(
            Activity::new("test_db", "A", "A", "kilogram")
                .with_location("GLO")
                .with_exchange(production("A"))
                .with_exchange(
                    Exchange::biosphere(FROM_1, "Transformation, from 1", 1.0)
                        .with_uncertainty(lognormal(1.0))
                        .with_formula("some_formula"),
                )
                .with_exchange(
                    Exchange::biosphere(FROM_2, "Transformation, from 2", 2.0)
                        .with_uncertainty(lognormal(2.0)),
                )
                .with_exchange(Exchange::biosphere(TO_1, "Transformation, to 1", 1.0))
                .with_exchange(
                    Exchange::biosphere(TO_2, "Transformation, to 2", 2.0)
                        .with_uncertainty(lognormal(2.0)),
                )
                .with_exchange(input_from_x()),
        )
        // only outputs uncertain, in/out ratio 1
        .with_activity(
            Activity::new("test_db", "B", "B", "kilogram")
                .with_location("GLO")
                .with_exchange(production("B"))
                .with_exchange(Exchange::biosphere(FROM_1, "Transformation, from 1", 1.0))
                .with_exchange(Exchange::biosphere(FROM_2, "Transformation, from 2", 2.0))
                .with_exchange(
                    Exchange::biosphere(TO_1, "Transformation, to 1", 1.0)
                        .with_uncertainty(lognormal(1.0)),
                )
                .with_exchange(
                    Exchange::biosphere(TO_2, "Transformation, to 2", 2.0)
                        .with_uncertainty(lognormal(2.0)),
                )
                .with_exchange(input_from_x()),
        )
        // everything uncertain, in/out ratio 2, plus a non-land emission
        .with_activity(
            Activity::new("test_db", "C", "C", "kilogram")
                .with_location("GLO")
                .with_exchange(production("C"))
                .with_exchange(
                    Exchange::biosphere(FROM_1, "Transformation, from 1", 2.0)
                        .with_uncertainty(lognormal(2.0)),
                )
                .with_exchange(
                    Exchange::biosphere(FROM_2, "Transformation, from 2", 4.0)
                        .with_uncertainty(lognormal(4.0)),
                )
                .with_exchange(
                    Exchange::biosphere(TO_1, "Transformation, to 1", 1.0)
                        .with_uncertainty(lognormal(1.0)),
                )
                .with_exchange(
                    Exchange::biosphere(TO_2, "Transformation, to 2", 2.0)
                        .with_uncertainty(lognormal(2.0)),
                )
                .with_exchange(
                    Exchange::biosphere(
                        ("biosphere", "Something else"),
                        "Something else, to air",
                        100.0,
                    )
                    .with_uncertainty(lognormal(100.0)),
                )
                .with_exchange(input_from_x()),
        )
        // only outputs uncertain, out/in ratio 0.5
        .with_activity(
            Activity::new("test_db", "D", "D", "kilogram")
                .with_location("GLO")
                .with_exchange(production("D"))
                .with_exchange(Exchange::biosphere(FROM_1, "Transformation, from 1", 2.0))
                .with_exchange(Exchange::biosphere(FROM_2, "Transformation, from 2", 4.0))
                .with_exchange(
                    Exchange::biosphere(TO_1, "Transformation, to 1", 1.0)
                        .with_uncertainty(lognormal(1.0)),
                )
                .with_exchange(
                    Exchange::biosphere(TO_2, "Transformation, to 2", 2.0)
                        .with_uncertainty(lognormal(2.0)),
                )
                .with_exchange(input_from_x()),
        )
        // single uncertain exchange, on the input side
        .with_activity(
            Activity::new("test_db", "G", "G", "kilogram")
                .with_location("GLO")
                .with_exchange(production("G"))
                .with_exchange(
                    Exchange::biosphere(FROM_1, "Transformation, from 1", 1.0)
                        .with_uncertainty(lognormal(1.0)),
                )
                .with_exchange(Exchange::biosphere(FROM_2, "Transformation, from 2", 2.0))
                .with_exchange(Exchange::biosphere(TO_1, "Transformation, to 1", 1.0))
                .with_exchange(Exchange::biosphere(TO_2, "Transformation, to 2", 2.0))
                .with_exchange(Exchange::technosphere(
                    ("test_db", "X"),
                    "some product",
                    1.0,
                )),
        )
        // single uncertain exchange, on the output side
        .with_activity(
            Activity::new("test_db", "H", "H", "kilogram")
                .with_location("GLO")
                .with_exchange(production("H"))
                .with_exchange(Exchange::biosphere(FROM_1, "Transformation, from 1", 1.0))
                .with_exchange(Exchange::biosphere(FROM_2, "Transformation, from 2", 2.0))
                .with_exchange(
                    Exchange::biosphere(TO_1, "Transformation, to 1", 1.0)
                        .with_uncertainty(lognormal(1.0)),
                )
                .with_exchange(Exchange::biosphere(TO_2, "Transformation, to 2", 2.0)),
        )
        // no land inputs at all
        .with_activity(
            Activity::new("test_db", "I", "I", "kilogram")
                .with_location("GLO")
                .with_exchange(production("I"))
                .with_exchange(
                    Exchange::biosphere(TO_1, "Transformation, to 1", 1.0)
                        .with_uncertainty(lognormal(1.0)),
                )
                .with_exchange(
                    Exchange::biosphere(TO_2, "Transformation, to 2", 2.0)
                        .with_uncertainty(lognormal(2.0)),
                ),
        )
        // no land outputs at all
        .with_activity(
            Activity::new("test_db", "J", "J", "kilogram")
                .with_location("GLO")
                .with_exchange(production("J"))
                .with_exchange(
                    Exchange::biosphere(FROM_1, "Transformation, from 1", 1.0)
                        .with_uncertainty(lognormal(1.0)),
                )
                .with_exchange(
                    Exchange::biosphere(FROM_2, "Transformation, from 2", 2.0)
                        .with_uncertainty(lognormal(2.0)),
                )
                .with_exchange(input_from_x()),
        )
        // both sides present, nothing uncertain
        .with_activity(
            Activity::new("test_db", "K", "K", "kilogram")
                .with_location("GLO")
                .with_exchange(production("K"))
                .with_exchange(Exchange::biosphere(FROM_1, "Transformation, from 1", 1.0))
                .with_exchange(Exchange::biosphere(FROM_2, "Transformation, from 2", 2.0))
                .with_exchange(Exchange::biosphere(TO_1, "Transformation, to 1", 1.0))
                .with_exchange(Exchange::biosphere(TO_2, "Transformation, to 2", 2.0)),
        );

    let mut store = Store::new();
    store.register(biosphere);
    store.register(test_db);
    store.into_shared()
}

fn balancer(store: &SharedStore) -> DatabaseLandBalancer {
    DatabaseLandBalancer::new(SharedStore::clone(store), "test_db")
        .unwrap()
        .with_rng_seed(7)
}

/// Column sums over the block's land-in and land-out rows, classified by the
/// balancer's exchange order.
fn in_out_sums(ab: &ActivityLandBalancer, block: &SampleBlock) -> (Vec<f64>, Vec<f64>) {
    let kind_of = |key: &RecordKey| {
        ab.land_exchange_keys()
            .iter()
            .position(|k| k == key)
            .map(|i| ab.land_exchange_kinds()[i])
    };
    let in_mask: Vec<bool> = block
        .indices
        .iter()
        .map(|(input, _)| kind_of(input) == Some(LandExchangeKind::LandIn))
        .collect();
    let out_mask: Vec<bool> = block
        .indices
        .iter()
        .map(|(input, _)| kind_of(input) == Some(LandExchangeKind::LandOut))
        .collect();
    (
        block.samples.masked_column_sums(&in_mask),
        block.samples.masked_column_sums(&out_mask),
    )
}

#[test]
fn missing_database_is_rejected() {
    let store = fixture_store();
    let err = DatabaseLandBalancer::new(SharedStore::clone(&store), "no such db").unwrap_err();
    assert!(matches!(
        err,
        BalanceError::Store(StoreError::DatabaseMissing { .. })
    ));
    assert!(err.to_string().contains("not imported"));

    let err =
        DatabaseLandBalancer::with_biosphere(store, "test_db", "no such biosphere").unwrap_err();
    assert!(matches!(
        err,
        BalanceError::Store(StoreError::DatabaseMissing { .. })
    ));
}

#[test]
fn classifies_land_flows_by_name() {
    let store = fixture_store();
    let wb = balancer(&store);

    let expected_in: Vec<RecordKey> = vec![FROM_1.into(), FROM_2.into()];
    let expected_out: Vec<RecordKey> = vec![TO_1.into(), TO_2.into()];
    assert_eq!(wb.land_in_keys().len(), 2);
    assert!(expected_in.iter().all(|k| wb.land_in_keys().contains(k)));
    assert_eq!(wb.land_out_keys().len(), 2);
    assert!(expected_out.iter().all(|k| wb.land_out_keys().contains(k)));
    assert_eq!(wb.all_land_keys().len(), 4);
    assert!(!wb
        .all_land_keys()
        .contains(&("biosphere", "Something else").into()));
}

#[test]
fn construction_moves_formulas_aside() {
    let store = fixture_store();
    let wb = balancer(&store);
    let a_key: RecordKey = ("test_db", "A").into();

    {
        let guard = store.read();
        let act = guard.activity(&a_key).unwrap();
        let exc = act
            .exchanges
            .iter()
            .find(|e| e.input == FROM_1.into())
            .unwrap();
        assert_eq!(exc.formula.as_deref(), Some("some_formula"));
    }

    let _ab = ActivityLandBalancer::new(a_key.clone(), &wb).unwrap();

    let guard = store.read();
    let act = guard.activity(&a_key).unwrap();
    let exc = act
        .exchanges
        .iter()
        .find(|e| e.input == FROM_1.into())
        .unwrap();
    assert_eq!(exc.formula, None);
    assert_eq!(exc.temp_formula.as_deref(), Some("some_formula"));
}

#[test]
fn initially_unprocessed() {
    let store = fixture_store();
    let wb = balancer(&store);
    let mut ab = ActivityLandBalancer::new(("test_db", "A").into(), &wb).unwrap();
    assert!(!ab.processed());
    ab.identify_strategy().unwrap();
    assert!(!ab.processed());
    ab.define_balancing_parameters().unwrap();
    assert!(ab.processed());
}

#[test]
fn reset_clears_derived_state() {
    let store = fixture_store();
    let wb = balancer(&store);
    let mut ab = ActivityLandBalancer::new(("test_db", "A").into(), &wb).unwrap();
    ab.identify_strategy().unwrap();
    ab.define_balancing_parameters().unwrap();
    assert!(ab.processed());

    ab.reset();
    assert!(!ab.processed());
    assert_eq!(ab.strategy(), None);
    assert_eq!(ab.static_ratio(), None);
    assert_eq!(ab.static_balance(), None);
    assert!(ab.activity_params().is_empty());
}

#[test]
fn rederivation_after_reset_is_identical() {
    let store = fixture_store();
    let wb = balancer(&store);
    let mut ab = ActivityLandBalancer::new(("test_db", "A").into(), &wb).unwrap();
    ab.identify_strategy().unwrap();
    ab.define_balancing_parameters().unwrap();

    let strategy = ab.strategy();
    let ratio = ab.static_ratio();
    let balance = ab.static_balance();
    let params = ab.activity_params().to_vec();

    ab.reset();
    ab.identify_strategy().unwrap();
    ab.define_balancing_parameters().unwrap();

    assert_eq!(ab.strategy(), strategy);
    assert_eq!(ab.static_ratio(), ratio);
    assert_eq!(ab.static_balance(), balance);
    assert_eq!(ab.activity_params(), params.as_slice());
}

#[test]
fn define_before_identify_is_an_error() {
    let store = fixture_store();
    let wb = balancer(&store);
    let mut ab = ActivityLandBalancer::new(("test_db", "A").into(), &wb).unwrap();
    assert!(matches!(
        ab.define_balancing_parameters().unwrap_err(),
        BalanceError::NotProcessed
    ));
}

#[test]
fn rebalance_default_ratio_1() {
    let store = fixture_store();
    let mut wb = balancer(&store);
    assert!(wb.matrix_indices().is_empty());
    assert!(wb.matrix_samples().is_none());

    let a_key: RecordKey = ("test_db", "A").into();
    let mut ab = ActivityLandBalancer::new(a_key.clone(), &wb).unwrap();
    ab.identify_strategy().unwrap();
    assert_eq!(ab.strategy(), Some(Strategy::Default));
    ab.define_balancing_parameters().unwrap();
    assert_eq!(ab.static_ratio(), Some(StaticValue::Computed(1.0)));
    assert_eq!(ab.static_balance(), Some(StaticValue::Computed(0.0)));
    assert_eq!(ab.static_ratio().unwrap().value(), Some(1.0));

    let block = ab.generate_samples(5, &mut rng()).unwrap().unwrap();
    assert_eq!(block.samples.rows(), 4);
    assert_eq!(block.samples.cols(), 5);
    let (in_sums, out_sums) = in_out_sums(&ab, &block);
    for (i, o) in in_sums.iter().zip(&out_sums) {
        assert_relative_eq!(i / o, 1.0, max_relative = 1e-9);
    }

    wb.add_samples_for_act(&a_key, 5).unwrap();
    assert_eq!(wb.matrix_indices().len(), 4);
    let samples = wb.matrix_samples().unwrap();
    assert_eq!(samples.rows(), 4);
    assert_eq!(samples.cols(), 5);
}

#[test]
fn rebalance_restores_activity_state() {
    let store = fixture_store();
    let wb = balancer(&store);
    let a_key: RecordKey = ("test_db", "A").into();

    let mut ab = ActivityLandBalancer::new(a_key.clone(), &wb).unwrap();
    ab.generate_samples(5, &mut rng()).unwrap().unwrap();

    let guard = store.read();
    let act = guard.activity(&a_key).unwrap();
    assert!(act.parameters.is_empty());
    let from_1 = act
        .exchanges
        .iter()
        .find(|e| e.input == FROM_1.into())
        .unwrap();
    // Pre-existing formula back in place, derived one archived.
    assert_eq!(from_1.formula.as_deref(), Some("some_formula"));
    assert_eq!(from_1.temp_formula, None);
    assert_eq!(from_1.land_formula.as_deref(), Some("land_param_0 * scaling"));
    let to_1 = act
        .exchanges
        .iter()
        .find(|e| e.input == TO_1.into())
        .unwrap();
    assert_eq!(to_1.formula, None);
    assert_eq!(to_1.land_formula.as_deref(), Some("land_param_2"));
}

#[test]
fn rebalance_inverse_ratio_1() {
    let store = fixture_store();
    let wb = balancer(&store);
    let mut ab = ActivityLandBalancer::new(("test_db", "B").into(), &wb).unwrap();
    ab.identify_strategy().unwrap();
    assert_eq!(ab.strategy(), Some(Strategy::Inverse));
    ab.define_balancing_parameters().unwrap();
    assert_eq!(ab.static_ratio(), Some(StaticValue::Computed(1.0)));
    assert_eq!(ab.static_balance(), Some(StaticValue::Computed(0.0)));

    let block = ab.generate_samples(5, &mut rng()).unwrap().unwrap();
    assert_eq!(block.samples.rows(), 4);
    assert_eq!(block.samples.cols(), 5);
    let (in_sums, out_sums) = in_out_sums(&ab, &block);
    for (i, o) in in_sums.iter().zip(&out_sums) {
        assert_relative_eq!(o / i, 1.0, max_relative = 1e-9);
    }
}

#[test]
fn rebalance_default_ratio_2() {
    let store = fixture_store();
    let wb = balancer(&store);
    let mut ab = ActivityLandBalancer::new(("test_db", "C").into(), &wb).unwrap();
    ab.identify_strategy().unwrap();
    assert_eq!(ab.strategy(), Some(Strategy::Default));
    ab.define_balancing_parameters().unwrap();
    assert_eq!(ab.static_ratio(), Some(StaticValue::Computed(2.0)));
    assert_eq!(ab.static_balance(), Some(StaticValue::Computed(3.0)));

    let block = ab.generate_samples(5, &mut rng()).unwrap().unwrap();
    // The non-land emission contributes no row.
    assert_eq!(block.samples.rows(), 4);
    assert_eq!(block.samples.cols(), 5);
    let (in_sums, out_sums) = in_out_sums(&ab, &block);
    for (i, o) in in_sums.iter().zip(&out_sums) {
        assert_relative_eq!(i / o, 2.0, max_relative = 1e-9);
    }
}

#[test]
fn rebalance_inverse_ratio_0_5() {
    let store = fixture_store();
    let wb = balancer(&store);
    let mut ab = ActivityLandBalancer::new(("test_db", "D").into(), &wb).unwrap();
    ab.identify_strategy().unwrap();
    assert_eq!(ab.strategy(), Some(Strategy::Inverse));
    ab.define_balancing_parameters().unwrap();
    assert_eq!(ab.static_ratio(), Some(StaticValue::Computed(0.5)));
    assert_eq!(ab.static_balance(), Some(StaticValue::Computed(-3.0)));

    let block = ab.generate_samples(5, &mut rng()).unwrap().unwrap();
    assert_eq!(block.samples.rows(), 4);
    assert_eq!(block.samples.cols(), 5);
    let (in_sums, out_sums) = in_out_sums(&ab, &block);
    for (i, o) in in_sums.iter().zip(&out_sums) {
        assert_relative_eq!(o / i, 0.5, max_relative = 1e-9);
    }
}

#[test]
fn rebalance_set_static_one_input() {
    // G: "Transformation, from 1" is the only uncertain land exchange.
    let store = fixture_store();
    let wb = balancer(&store);
    let g_key: RecordKey = ("test_db", "G").into();
    let mut ab = ActivityLandBalancer::new(g_key.clone(), &wb).unwrap();
    ab.identify_strategy().unwrap();
    assert_eq!(ab.strategy(), Some(Strategy::SetStatic));

    ab.define_balancing_parameters().unwrap();
    assert_eq!(ab.static_ratio(), Some(StaticValue::NotCalculated));
    assert_eq!(ab.static_balance(), Some(StaticValue::NotCalculated));
    assert_eq!(ab.static_ratio().unwrap().value(), None);
    {
        let guard = store.read();
        let act = guard.activity(&g_key).unwrap();
        let exc = act
            .exchanges
            .iter()
            .find(|e| e.input == FROM_1.into())
            .unwrap();
        assert_eq!(exc.land_formula.as_deref(), Some("cst"));
    }
    let params = ab.activity_params();
    assert_eq!(params.len(), 1);
    assert_eq!(params[0].name, "cst");
    assert_eq!(params[0].amount, 1.0);
    assert_eq!(params[0].uncertainty, None);

    let block = ab.generate_samples(5, &mut rng()).unwrap().unwrap();
    assert_eq!(block.samples.rows(), 1);
    assert_eq!(block.samples.cols(), 5);
    assert!(block.samples.row(0).iter().all(|&v| v == 1.0));
    assert_eq!(block.indices, vec![(FROM_1.into(), g_key)]);
}

#[test]
fn rebalance_set_static_one_output() {
    let store = fixture_store();
    let wb = balancer(&store);
    let h_key: RecordKey = ("test_db", "H").into();
    let mut ab = ActivityLandBalancer::new(h_key.clone(), &wb).unwrap();
    ab.identify_strategy().unwrap();
    assert_eq!(ab.strategy(), Some(Strategy::SetStatic));

    ab.define_balancing_parameters().unwrap();
    assert_eq!(ab.static_ratio(), Some(StaticValue::NotCalculated));
    assert_eq!(ab.static_balance(), Some(StaticValue::NotCalculated));
    let params = ab.activity_params();
    assert_eq!(params.len(), 1);
    assert_eq!(params[0].name, "cst");
    assert_eq!(params[0].amount, 1.0);
    assert_eq!(params[0].uncertainty, None);

    let block = ab.generate_samples(5, &mut rng()).unwrap().unwrap();
    assert_eq!(block.samples.rows(), 1);
    assert_eq!(block.samples.cols(), 5);
    assert!(block.samples.row(0).iter().all(|&v| v == 1.0));
    assert_eq!(block.indices, vec![(TO_1.into(), h_key)]);
}

#[test]
fn skip_when_no_land_inputs() {
    let store = fixture_store();
    let wb = balancer(&store);
    let mut ab = ActivityLandBalancer::new(("test_db", "I").into(), &wb).unwrap();
    ab.identify_strategy().unwrap();
    assert_eq!(ab.strategy(), Some(Strategy::Skip));
    assert!(ab.processed());
    assert_eq!(ab.static_ratio(), None);
    assert_eq!(ab.static_balance(), None);
    assert!(ab.generate_samples(5, &mut rng()).unwrap().is_none());
}

#[test]
fn skip_when_no_land_outputs() {
    let store = fixture_store();
    let wb = balancer(&store);
    let mut ab = ActivityLandBalancer::new(("test_db", "J").into(), &wb).unwrap();
    ab.identify_strategy().unwrap();
    assert_eq!(ab.strategy(), Some(Strategy::Skip));
    assert_eq!(ab.static_ratio(), None);
    assert_eq!(ab.static_balance(), None);
}

#[test]
fn skip_when_nothing_uncertain() {
    let store = fixture_store();
    let wb = balancer(&store);
    let mut ab = ActivityLandBalancer::new(("test_db", "K").into(), &wb).unwrap();
    ab.identify_strategy().unwrap();
    assert_eq!(ab.strategy(), Some(Strategy::Skip));
    assert_eq!(ab.static_ratio(), None);
    assert_eq!(ab.static_balance(), None);
}

#[test]
fn skip_when_no_land_exchanges_at_all() {
    let store = fixture_store();
    let wb = balancer(&store);
    let mut ab = ActivityLandBalancer::new(("test_db", "X").into(), &wb).unwrap();
    // Decided at construction, before any strategy work.
    assert_eq!(ab.strategy(), Some(Strategy::Skip));
    assert!(ab.generate_samples(5, &mut rng()).unwrap().is_none());
}

#[test]
fn aggregates_whole_database_and_writes_presamples() {
    let store = fixture_store();
    let mut wb = balancer(&store);
    assert!(wb.matrix_indices().is_empty());
    assert!(wb.matrix_samples().is_none());

    wb.add_samples_for_all_acts(5).unwrap();
    // A, B, C, D contribute 4 rows each, G and H one each; the rest skip.
    assert_eq!(wb.matrix_indices().len(), 18);
    let samples = wb.matrix_samples().unwrap();
    assert_eq!(samples.rows(), 18);
    assert_eq!(samples.cols(), 5);

    let dir = tempdir().unwrap();
    let (id, path) = wb.create_presamples(Some("test"), Some(dir.path())).unwrap();
    assert_eq!(id, "test");
    let indices = load_presample_indices(&path.join("test.0.indices")).unwrap();
    let samples = load_presample_samples(&path.join("test.0.samples")).unwrap();
    assert_eq!(indices.len(), 18);
    assert_eq!(indices, wb.matrix_indices());
    assert_eq!(samples.rows(), 18);
    assert_eq!(samples.cols(), 5);
}

#[test]
fn presamples_without_samples_is_an_error() {
    let store = fixture_store();
    let wb = balancer(&store);
    assert!(wb.create_presamples(Some("x"), None).is_err());
}
