//! End-to-end scenarios over small hand-built tables.

use relfeat::aggregations::{Aggregation, AggregationKind};
use relfeat::containers::{Column, DataFrame, Match, MatchMaker};
use relfeat::dfs::DeepFeatureSynthesis;
use relfeat::loss::{LossFunction, SquareLoss, Update};
use relfeat::trees::{DataUsed, Ensemble};
use relfeat::{FeatureLearner, Hyperparameters};

fn population_one_row(ts: f64, y: f64) -> DataFrame {
    let mut df = DataFrame::new("population");
    df.push_join_key(Column::new("jk", vec![1])).expect("push");
    df.push_time_stamp(Column::new("ts", vec![ts])).expect("push");
    df.push_target(Column::new("y", vec![y])).expect("push");
    df
}

fn peripheral_rows(keys: Vec<i64>, lower_ts: Vec<f64>, x: Vec<f64>) -> DataFrame {
    let mut df = DataFrame::new("peripheral");
    df.push_join_key(Column::new("jk", keys)).expect("push");
    df.push_time_stamp(Column::new("lower_ts", lower_ts)).expect("push");
    df.push_numerical(Column::new("x", x)).expect("push");
    df
}

fn one_tree_hyp() -> Hyperparameters {
    Hyperparameters {
        num_features: 1,
        aggregations: vec![AggregationKind::Avg],
        ..Hyperparameters::default()
    }
}

/// S1: an empty peripheral yields a single-leaf tree, the prediction stays
/// at the initial prediction, and the emitted feature is the coerced 0.0.
#[test]
fn scenario_empty_peripheral() {
    let population = population_one_row(0.0, 1.0);
    let peripheral = peripheral_rows(vec![], vec![], vec![]);

    let ensemble = Ensemble::fit(
        &population,
        std::slice::from_ref(&peripheral),
        &[(0, AggregationKind::Avg)],
        &one_tree_hyp(),
    )
    .expect("fit");

    assert_eq!(ensemble.trees().len(), 1);
    assert!(ensemble.trees()[0].root().is_leaf());

    let predictions = ensemble
        .predict(&population, std::slice::from_ref(&peripheral), true)
        .expect("predict");
    assert_eq!(predictions, vec![1.0]);

    let mut learner = FeatureLearner::new(one_tree_hyp());
    learner
        .fit(&population, std::slice::from_ref(&peripheral))
        .expect("fit");
    let features = learner
        .transform(&population, std::slice::from_ref(&peripheral))
        .expect("transform");
    assert_eq!(features.row(0), &[0.0]);
}

/// S2: one peripheral row inside the time range gives one match; the AVG
/// feature over x is x itself, and the closed-form weight for a residual of
/// 2.0 over that single match is 2.0.
#[test]
fn scenario_single_match() {
    let population = population_one_row(10.0, 2.0);
    let peripheral = peripheral_rows(vec![1], vec![5.0], vec![3.0]);

    let matches = MatchMaker::make_matches(&population, &peripheral, true).expect("matches");
    assert_eq!(matches.len(), 1);

    // The mechanical AVG over x.
    let mut dfs = DeepFeatureSynthesis::new(one_tree_hyp());
    dfs.fit(&population, std::slice::from_ref(&peripheral)).expect("fit");
    let features = dfs
        .transform(&population, std::slice::from_ref(&peripheral))
        .expect("transform");
    let names = dfs.feature_names().expect("names");
    let avg_ix = names.iter().position(|n| n.starts_with("AVG")).expect("avg");
    assert_eq!(features.row(0)[avg_ix], 3.0);

    // The learned weight for the single-match set.
    let mut aggregation = Aggregation::new(
        AggregationKind::Avg,
        SquareLoss::new(vec![2.0], 0.0),
        &matches,
        1,
    );
    let weights = aggregation.calc_weights(Update::CalcAll, 1.0, 0.0, &matches, 0, 0, 1, 1);
    assert!((weights[0].greater - 2.0).abs() < 1e-12);
    let reduction = aggregation.evaluate_split(0.0, &weights[0]);
    assert!((reduction - 4.0).abs() < 1e-12);

    // The fitted tree stays a leaf (the residual is zero after the
    // intercept) and the learner's feature column is finite.
    let mut learner = FeatureLearner::new(one_tree_hyp());
    learner
        .fit(&population, std::slice::from_ref(&peripheral))
        .expect("fit");
    let predictions = learner
        .predict(&population, std::slice::from_ref(&peripheral))
        .expect("predict");
    assert!((predictions[0] - 2.0).abs() < 1e-9);
}

/// S3: a peripheral row starting after the population's time stamp never
/// matches; the transform emits the coerced 0.0.
#[test]
fn scenario_time_stamp_filter() {
    let population = population_one_row(10.0, 2.0);
    let peripheral = peripheral_rows(vec![1], vec![15.0], vec![3.0]);

    let matches = MatchMaker::make_matches(&population, &peripheral, true).expect("matches");
    assert!(matches.is_empty());

    let mut learner = FeatureLearner::new(one_tree_hyp());
    learner
        .fit(&population, std::slice::from_ref(&peripheral))
        .expect("fit");
    let features = learner
        .transform(&population, std::slice::from_ref(&peripheral))
        .expect("transform");
    assert_eq!(features.row(0), &[0.0]);
}

/// S4: a categorical column that fully determines the target is found by
/// the first tree; a second tree adds nearly nothing.
#[test]
fn scenario_categorical_split() {
    let n = 100;
    let mut population = DataFrame::new("population");
    population
        .push_join_key(Column::new("jk", (0..n as i64).collect()))
        .expect("push");
    let y: Vec<f64> = (0..n).map(|i| (i % 2) as f64).collect();
    population.push_target(Column::new("y", y.clone())).expect("push");

    let mut peripheral = DataFrame::new("peripheral");
    peripheral
        .push_join_key(Column::new("jk", (0..n as i64).collect()))
        .expect("push");
    // Category 1 ("B") where y = 1, category 0 ("A") where y = 0.
    let cats: Vec<i64> = (0..n).map(|i| (i % 2) as i64).collect();
    peripheral
        .push_categorical(Column::new("cat", cats))
        .expect("push");

    let hyp = Hyperparameters {
        num_features: 2,
        max_depth: 1,
        shrinkage: 1.0,
        aggregations: vec![AggregationKind::Avg],
        use_timestamps: false,
        ..Hyperparameters::default()
    };

    let peripherals = vec![peripheral];
    let ensemble =
        Ensemble::fit(&population, &peripherals, &[(0, AggregationKind::Avg)], &hyp)
            .expect("fit");

    let first = &ensemble.trees()[0];
    let split = first.root().split().expect("split");
    assert_eq!(split.data_used, DataUsed::CategoricalInput);

    // One tree at full shrinkage recovers the target exactly.
    let predictions = ensemble.predict(&population, &peripherals, false).expect("predict");
    let mse: f64 = y
        .iter()
        .zip(&predictions)
        .map(|(t, p)| (t - p) * (t - p))
        .sum::<f64>()
        / n as f64;
    assert!(mse < 1e-18, "mse = {mse}");

    // The second tree's contribution is near zero.
    if let Some(second) = ensemble.trees().get(1) {
        let contribution: f64 = (0..n)
            .map(|row| {
                second
                    .feature_value(&population, &peripherals[0], row, false)
                    .expect("feature")
                    .abs()
            })
            .sum();
        assert!(second.update_rate().abs() * contribution < 1e-9);
    }
}

/// S5: for a numerical column with several critical values, the CalcAll-only
/// path and the CalcDiff fast path produce identical candidates.
#[test]
fn scenario_calc_diff_equivalence() {
    // Four matches per output row (power-of-two counts) and dyadic
    // residuals keep every intermediate exactly representable, so the two
    // paths must agree bit for bit.
    let matches: Vec<Match> = (0..8)
        .map(|i| Match { ix_output: i % 2, ix_input: i })
        .collect();
    let residuals = vec![2.0, -4.0];

    // Split boundaries after descending sort by ix_input here (the buffer is
    // already "sorted": boundaries are positions).
    let boundaries = [1usize, 3, 4, 6, 7];

    let fresh = |ms: &[Match]| {
        Aggregation::new(
            AggregationKind::Avg,
            SquareLoss::new(residuals.clone(), 0.0),
            ms,
            2,
        )
    };

    // Default path: CalcAll once, then CalcDiff per boundary.
    let mut diff_path = fresh(&matches);
    let mut diff_candidates = Vec::new();
    let mut last = 0usize;
    for (i, &b) in boundaries.iter().enumerate() {
        let update = if i == 0 { Update::CalcAll } else { Update::CalcDiff };
        let weights =
            diff_path.calc_weights(update, 1.0, 0.0, &matches, 0, last, b, matches.len());
        for w in weights {
            let reduction = diff_path.evaluate_split(0.0, &w);
            diff_candidates.push((b, w, reduction));
        }
        last = b;
    }

    // CalcAll-only path: a fresh recomputation per boundary.
    let mut all_candidates = Vec::new();
    for &b in &boundaries {
        let mut agg = fresh(&matches);
        let weights = agg.calc_weights(Update::CalcAll, 1.0, 0.0, &matches, 0, 0, b, matches.len());
        for w in weights {
            let reduction = agg.evaluate_split(0.0, &w);
            all_candidates.push((b, w, reduction));
        }
    }

    assert_eq!(diff_candidates.len(), all_candidates.len());
    for (d, a) in diff_candidates.iter().zip(&all_candidates) {
        assert_eq!(d.0, a.0);
        assert_eq!(d.1.intercept.to_bits(), a.1.intercept.to_bits());
        assert_eq!(d.1.greater.to_bits(), a.1.greater.to_bits());
        assert_eq!(d.1.smaller.to_bits(), a.1.smaller.to_bits());
        assert_eq!(d.2.to_bits(), a.2.to_bits());
    }
}

/// S6: any number of un-reverted candidates is undone by one
/// revert_to_commit.
#[test]
fn scenario_commit_revert() {
    let matches: Vec<Match> = (0..6)
        .map(|i| Match { ix_output: i % 3, ix_input: i })
        .collect();
    let mut agg = Aggregation::new(
        AggregationKind::Sum,
        SquareLoss::new(vec![1.0, -2.0, 3.0], 0.5),
        &matches,
        3,
    );

    // Three candidates without revert.
    agg.calc_weights(Update::CalcAll, 1.0, 0.0, &matches, 0, 0, 2, 6);
    agg.calc_weights(Update::CalcDiff, 1.0, 0.0, &matches, 0, 2, 4, 6);
    agg.calc_weights(Update::CalcDiff, 1.0, 0.0, &matches, 0, 4, 5, 6);

    agg.revert_to_commit();

    for ix in 0..3 {
        assert_eq!(agg.counts(ix), (0.0, 0.0));
        assert_eq!(agg.eta1(ix), 0.0);
        assert_eq!(agg.eta2(ix), 0.0);
    }
    assert!(agg.touched_rows().is_empty());
}
