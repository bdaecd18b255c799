//! Deep feature synthesis: mechanical propositionalization.
//!
//! Instead of learning filter conditions, DFS enumerates every compatible
//! (aggregation × column × condition) tuple from the schema and evaluates
//! the closed-form aggregation over each population row's match set.
//! Numerical aggregations accept numerical and discrete columns, the
//! distinct-count pair accepts categorical columns, COUNT needs no column
//! at all. For every pair of equal-unit categorical columns across the
//! population and a peripheral table, a same-unit equality condition is
//! synthesized; text columns contribute per-token COUNT features through
//! the fitted vocabulary.
//!
//! The transform is data-parallel over population shards (default shard
//! count: half the hardware concurrency). Shards write disjoint row ranges,
//! report progress every 5000 rows through a shared atomic counter, and
//! every shard's failure is surfaced - errors are aggregated, never
//! swallowed.

use crate::containers::{DataFrame, Match, MatchMaker};
use crate::error::{Error, Result};
use crate::features::Features;
use crate::hyperparameters::Hyperparameters;
use crate::pool::Pool;
use crate::schema::Schema;
use crate::text::{PooledTokenIndex, TokenIndex, Vocabulary};
use rayon::prelude::*;
use serde::{Deserialize, Serialize};
use std::path::PathBuf;
use std::sync::atomic::{AtomicUsize, Ordering};
use tracing::{debug, info};

const LOG_ITER: usize = 5000;

/// The closed-form aggregation of one DFS feature.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum DfsAggregation {
    Avg,
    Count,
    CountDistinct,
    CountMinusCountDistinct,
    Max,
    Median,
    Min,
    Stddev,
    Sum,
    Var,
}

impl DfsAggregation {
    /// Aggregations taking a float column.
    pub const NUMERICAL: &'static [DfsAggregation] = &[
        DfsAggregation::Avg,
        DfsAggregation::Max,
        DfsAggregation::Median,
        DfsAggregation::Min,
        DfsAggregation::Stddev,
        DfsAggregation::Sum,
        DfsAggregation::Var,
    ];

    /// Aggregations taking a categorical column.
    pub const CATEGORICAL: &'static [DfsAggregation] = &[
        DfsAggregation::CountDistinct,
        DfsAggregation::CountMinusCountDistinct,
    ];

    pub fn name(self) -> &'static str {
        match self {
            DfsAggregation::Avg => "AVG",
            DfsAggregation::Count => "COUNT",
            DfsAggregation::CountDistinct => "COUNT DISTINCT",
            DfsAggregation::CountMinusCountDistinct => "COUNT MINUS COUNT DISTINCT",
            DfsAggregation::Max => "MAX",
            DfsAggregation::Median => "MEDIAN",
            DfsAggregation::Min => "MIN",
            DfsAggregation::Stddev => "STDDEV",
            DfsAggregation::Sum => "SUM",
            DfsAggregation::Var => "VAR",
        }
    }

    /// The closed form over the (condition-filtered) float values of a
    /// row's matches. NaN values are skipped as NULLs.
    fn apply_numeric(self, values: &mut Vec<f64>) -> f64 {
        values.retain(|v| !v.is_nan());
        let n = values.len() as f64;
        if values.is_empty() {
            return f64::NAN;
        }
        match self {
            DfsAggregation::Avg => values.iter().sum::<f64>() / n,
            DfsAggregation::Sum => values.iter().sum(),
            DfsAggregation::Max => values.iter().copied().fold(f64::NEG_INFINITY, f64::max),
            DfsAggregation::Min => values.iter().copied().fold(f64::INFINITY, f64::min),
            DfsAggregation::Median => {
                values.sort_by(f64::total_cmp);
                let mid = values.len() / 2;
                if values.len() % 2 == 1 {
                    values[mid]
                } else {
                    (values[mid - 1] + values[mid]) / 2.0
                }
            }
            DfsAggregation::Var | DfsAggregation::Stddev => {
                let mean = values.iter().sum::<f64>() / n;
                let var = values.iter().map(|v| (v - mean) * (v - mean)).sum::<f64>() / n;
                if self == DfsAggregation::Var {
                    var
                } else {
                    var.sqrt()
                }
            }
            _ => unreachable!("not a numerical aggregation"),
        }
    }
}

impl std::fmt::Display for DfsAggregation {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.name())
    }
}

/// Which peripheral column a DFS feature aggregates.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum DfsDataUsed {
    Numerical,
    Discrete,
    Categorical,
    /// A per-token text membership count.
    Text,
    /// COUNT over the match set itself.
    NotApplicable,
}

/// A same-unit equality filter: a match passes iff the population row's
/// categorical value equals the peripheral row's.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct Condition {
    /// Categorical column in the population table.
    pub output_col: usize,
    /// Categorical column in the peripheral table.
    pub input_col: usize,
}

/// One enumerated feature: aggregation, the column it uses, the peripheral
/// it draws matches from, and the conjunctive filter conditions.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AbstractFeature {
    pub aggregation: DfsAggregation,
    pub data_used: DfsDataUsed,
    /// Column index within its role; the text column for `Text`.
    pub input_col: usize,
    /// Vocabulary token for `Text` features.
    pub token_id: u32,
    pub peripheral_ix: usize,
    pub conditions: Vec<Condition>,
}

impl AbstractFeature {
    /// Human-readable name, e.g. `AVG( orders.amount ) WHERE t1.plan = t2.plan`.
    pub fn name(&self, population: &Schema, peripherals: &[Schema]) -> String {
        let peripheral = &peripherals[self.peripheral_ix];
        let column = match self.data_used {
            DfsDataUsed::Numerical => format!(
                " {}.{} ",
                peripheral.name, peripheral.numericals[self.input_col]
            ),
            DfsDataUsed::Discrete => format!(
                " {}.{} ",
                peripheral.name, peripheral.discretes[self.input_col]
            ),
            DfsDataUsed::Categorical => format!(
                " {}.{} ",
                peripheral.name, peripheral.categoricals[self.input_col]
            ),
            DfsDataUsed::Text => format!(
                " {}.{} CONTAINS token #{} ",
                peripheral.name, peripheral.text[self.input_col], self.token_id
            ),
            DfsDataUsed::NotApplicable => " * ".to_string(),
        };
        let mut name = format!("{}({})", self.aggregation, column);
        for c in &self.conditions {
            name.push_str(&format!(
                " WHERE {}.{} = {}.{}",
                population.name,
                population.categoricals[c.output_col],
                peripheral.name,
                peripheral.categoricals[c.input_col],
            ));
        }
        name
    }
}

/// The propositionalization engine.
pub struct DeepFeatureSynthesis {
    hyp: Hyperparameters,
    spill_dir: Option<PathBuf>,
    population_schema: Option<Schema>,
    peripheral_schemas: Vec<Schema>,
    /// Per peripheral, per text column.
    vocabularies: Vec<Vec<Vocabulary>>,
    features: Vec<AbstractFeature>,
}

impl DeepFeatureSynthesis {
    pub fn new(hyp: Hyperparameters) -> Self {
        DeepFeatureSynthesis {
            hyp,
            spill_dir: None,
            population_schema: None,
            peripheral_schemas: Vec::new(),
            vocabularies: Vec::new(),
            features: Vec::new(),
        }
    }

    /// Spills the transform-time token indices to a memory-mapped pool
    /// under `dir` instead of holding them on the heap.
    pub fn with_spill_dir(mut self, dir: PathBuf) -> Self {
        self.spill_dir = Some(dir);
        self
    }

    pub fn features(&self) -> &[AbstractFeature] {
        &self.features
    }

    pub fn is_fitted(&self) -> bool {
        self.population_schema.is_some()
    }

    /// Human-readable names of the enumerated features.
    pub fn feature_names(&self) -> Result<Vec<String>> {
        let population = self.population_schema.as_ref().ok_or(Error::NotFitted)?;
        Ok(self
            .features
            .iter()
            .map(|f| f.name(population, &self.peripheral_schemas))
            .collect())
    }

    /// Enumerates the feature bank from the schema and fits the text
    /// vocabularies.
    pub fn fit(&mut self, population: &DataFrame, peripherals: &[DataFrame]) -> Result<()> {
        if population.nrows() == 0 {
            return Err(Error::EmptyTable(population.name().to_string()));
        }
        if peripherals.is_empty() {
            return Err(Error::FlatDataModel);
        }

        self.vocabularies = peripherals
            .iter()
            .map(|p| {
                p.text()
                    .iter()
                    .map(|col| {
                        Vocabulary::build(
                            col.iter().map(String::as_str),
                            self.hyp.min_df,
                            self.hyp.vocab_size,
                        )
                    })
                    .collect()
            })
            .collect();

        self.features.clear();
        for (peripheral_ix, peripheral) in peripherals.iter().enumerate() {
            self.enumerate_peripheral(population, peripheral, peripheral_ix);
        }

        self.population_schema = Some(Schema::from_dataframe(population));
        self.peripheral_schemas = peripherals.iter().map(Schema::from_dataframe).collect();

        info!(
            num_features = self.features.len(),
            num_peripherals = peripherals.len(),
            "enumerated feature bank"
        );
        Ok(())
    }

    fn enumerate_peripheral(
        &mut self,
        population: &DataFrame,
        peripheral: &DataFrame,
        peripheral_ix: usize,
    ) {
        // The empty condition set plus one same-unit filter per equal-unit
        // categorical pair. Comparison-only columns are admissible here -
        // comparing is exactly what they are for.
        let mut condition_sets: Vec<Vec<Condition>> = vec![Vec::new()];
        for (output_col, oc) in population.categoricals().iter().enumerate() {
            if oc.unit().is_empty() {
                continue;
            }
            for (input_col, ic) in peripheral.categoricals().iter().enumerate() {
                if ic.unit() == oc.unit() {
                    condition_sets.push(vec![Condition {
                        output_col,
                        input_col,
                    }]);
                }
            }
        }

        for conditions in &condition_sets {
            self.features.push(AbstractFeature {
                aggregation: DfsAggregation::Count,
                data_used: DfsDataUsed::NotApplicable,
                input_col: 0,
                token_id: 0,
                peripheral_ix,
                conditions: conditions.clone(),
            });

            for &aggregation in DfsAggregation::NUMERICAL {
                for (input_col, col) in peripheral.numericals().iter().enumerate() {
                    if col.is_comparison_only() {
                        continue;
                    }
                    self.features.push(AbstractFeature {
                        aggregation,
                        data_used: DfsDataUsed::Numerical,
                        input_col,
                        token_id: 0,
                        peripheral_ix,
                        conditions: conditions.clone(),
                    });
                }
                for (input_col, col) in peripheral.discretes().iter().enumerate() {
                    if col.is_comparison_only() {
                        continue;
                    }
                    self.features.push(AbstractFeature {
                        aggregation,
                        data_used: DfsDataUsed::Discrete,
                        input_col,
                        token_id: 0,
                        peripheral_ix,
                        conditions: conditions.clone(),
                    });
                }
            }

            for &aggregation in DfsAggregation::CATEGORICAL {
                for (input_col, col) in peripheral.categoricals().iter().enumerate() {
                    if col.is_comparison_only() {
                        continue;
                    }
                    self.features.push(AbstractFeature {
                        aggregation,
                        data_used: DfsDataUsed::Categorical,
                        input_col,
                        token_id: 0,
                        peripheral_ix,
                        conditions: conditions.clone(),
                    });
                }
            }
        }

        // Per-token membership counts, over the unconditioned match set.
        let vocab_lens: Vec<usize> = self.vocabularies[peripheral_ix]
            .iter()
            .map(Vocabulary::len)
            .collect();
        for (input_col, &vocab_len) in vocab_lens.iter().enumerate() {
            for token_id in 0..vocab_len as u32 {
                self.features.push(AbstractFeature {
                    aggregation: DfsAggregation::Count,
                    data_used: DfsDataUsed::Text,
                    input_col,
                    token_id,
                    peripheral_ix,
                    conditions: Vec::new(),
                });
            }
        }
    }

    /// Computes the feature matrix, sharded over population rows.
    pub fn transform(
        &self,
        population: &DataFrame,
        peripherals: &[DataFrame],
    ) -> Result<Features> {
        let population_schema = self.population_schema.as_ref().ok_or(Error::NotFitted)?;
        if population.nrows() == 0 {
            return Err(Error::EmptyTable(population.name().to_string()));
        }
        population_schema.validate(population)?;
        if peripherals.len() != self.peripheral_schemas.len() {
            return Err(Error::Schema(format!(
                "expected {} peripheral tables, got {}",
                self.peripheral_schemas.len(),
                peripherals.len()
            )));
        }
        for (schema, df) in self.peripheral_schemas.iter().zip(peripherals) {
            schema.validate(df)?;
        }

        let token_indices = self.build_token_indices(peripherals)?;

        let nrows = population.nrows();
        let num_shards = self.hyp.effective_num_threads();
        let chunk = nrows.div_ceil(num_shards).max(1);
        let counter = AtomicUsize::new(0);

        debug!(nrows, num_shards, "starting sharded transform");

        let shard_results: Vec<Result<Vec<Vec<f64>>>> = (0..num_shards)
            .into_par_iter()
            .map(|shard| {
                let begin = (shard * chunk).min(nrows);
                let end = ((shard + 1) * chunk).min(nrows);
                self.build_rows(population, peripherals, &token_indices, begin, end, &counter)
            })
            .collect();

        let mut rows: Vec<Vec<f64>> = Vec::with_capacity(nrows);
        let mut errors: Vec<String> = Vec::new();
        for result in shard_results {
            match result {
                Ok(shard_rows) => rows.extend(shard_rows),
                Err(e) => errors.push(e.to_string()),
            }
        }
        if !errors.is_empty() {
            return Err(Error::WorkerErrors(errors));
        }

        Ok(Features::from_rows(rows))
    }

    fn build_token_indices(&self, peripherals: &[DataFrame]) -> Result<Vec<Vec<TokenIndex>>> {
        peripherals
            .iter()
            .enumerate()
            .map(|(peripheral_ix, peripheral)| {
                peripheral
                    .text()
                    .iter()
                    .zip(&self.vocabularies[peripheral_ix])
                    .enumerate()
                    .map(|(col_ix, (column, vocabulary))| {
                        if let Some(dir) = &self.spill_dir {
                            let path = dir.join(format!(
                                "tokens-{}-{}.bin",
                                peripheral_ix, col_ix
                            ));
                            let pool = Pool::create(&path)?;
                            Ok(PooledTokenIndex::build(column, vocabulary, pool)?.to_memory())
                        } else {
                            Ok(TokenIndex::build(column, vocabulary))
                        }
                    })
                    .collect()
            })
            .collect()
    }

    /// Computes the rows `[begin, end)` of the feature matrix. One shard's
    /// share of the work; shards are independent.
    fn build_rows(
        &self,
        population: &DataFrame,
        peripherals: &[DataFrame],
        token_indices: &[Vec<TokenIndex>],
        begin: usize,
        end: usize,
        counter: &AtomicUsize,
    ) -> Result<Vec<Vec<f64>>> {
        let mut rows = Vec::with_capacity(end - begin);
        for row in begin..end {
            let matches: Vec<Vec<Match>> = peripherals
                .iter()
                .map(|p| {
                    MatchMaker::matches_for_row(population, p, row, self.hyp.use_timestamps)
                })
                .collect::<Result<_>>()?;

            let values = self
                .features
                .iter()
                .map(|f| self.eval_feature(f, population, peripherals, token_indices, &matches))
                .collect();
            rows.push(values);

            let completed = counter.fetch_add(1, Ordering::Relaxed) + 1;
            if completed % LOG_ITER == 0 {
                info!(
                    rows = completed,
                    progress_pct = completed * 100 / population.nrows(),
                    "built rows"
                );
            }
        }
        Ok(rows)
    }

    fn eval_feature(
        &self,
        feature: &AbstractFeature,
        population: &DataFrame,
        peripherals: &[DataFrame],
        token_indices: &[Vec<TokenIndex>],
        matches: &[Vec<Match>],
    ) -> f64 {
        let peripheral = &peripherals[feature.peripheral_ix];
        let row_matches = &matches[feature.peripheral_ix];

        let passes = |m: &Match| {
            feature.conditions.iter().all(|c| {
                population.categoricals()[c.output_col].get(m.ix_output)
                    == peripheral.categoricals()[c.input_col].get(m.ix_input)
            })
        };

        match feature.data_used {
            DfsDataUsed::NotApplicable => {
                row_matches.iter().filter(|m| passes(m)).count() as f64
            }
            DfsDataUsed::Text => {
                let index = &token_indices[feature.peripheral_ix][feature.input_col];
                row_matches
                    .iter()
                    .filter(|m| passes(m) && index.contains(m.ix_input, feature.token_id))
                    .count() as f64
            }
            DfsDataUsed::Numerical | DfsDataUsed::Discrete => {
                let column = match feature.data_used {
                    DfsDataUsed::Numerical => &peripheral.numericals()[feature.input_col],
                    _ => &peripheral.discretes()[feature.input_col],
                };
                let mut values: Vec<f64> = row_matches
                    .iter()
                    .filter(|m| passes(m))
                    .map(|m| column.get(m.ix_input))
                    .collect();
                feature.aggregation.apply_numeric(&mut values)
            }
            DfsDataUsed::Categorical => {
                let column = &peripheral.categoricals()[feature.input_col];
                let mut values: Vec<i64> = row_matches
                    .iter()
                    .filter(|m| passes(m))
                    .map(|m| column.get(m.ix_input))
                    .collect();
                let count = values.len() as f64;
                values.sort_unstable();
                values.dedup();
                let distinct = values.len() as f64;
                match feature.aggregation {
                    DfsAggregation::CountDistinct => distinct,
                    DfsAggregation::CountMinusCountDistinct => count - distinct,
                    _ => unreachable!("not a categorical aggregation"),
                }
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::containers::Column;

    fn tables() -> (DataFrame, DataFrame) {
        let mut population = DataFrame::new("population");
        population
            .push_join_key(Column::new("jk", vec![1, 2]))
            .expect("push");
        population
            .push_time_stamp(Column::new("ts", vec![100.0, 100.0]))
            .expect("push");

        let mut peripheral = DataFrame::new("orders");
        peripheral
            .push_join_key(Column::new("jk", vec![1, 1, 2]))
            .expect("push");
        peripheral
            .push_time_stamp(Column::new("ts", vec![0.0, 0.0, 0.0]))
            .expect("push");
        peripheral
            .push_numerical(Column::new("amount", vec![2.0, 4.0, 10.0]))
            .expect("push");
        (population, peripheral)
    }

    #[test]
    fn test_enumeration_covers_numerical_aggregations() {
        let (population, peripheral) = tables();
        let mut dfs = DeepFeatureSynthesis::new(Hyperparameters::default());
        dfs.fit(&population, &[peripheral]).expect("fit");

        // COUNT plus the seven numerical aggregations over `amount`.
        assert_eq!(dfs.features().len(), 1 + DfsAggregation::NUMERICAL.len());
        assert!(dfs
            .features()
            .iter()
            .any(|f| f.aggregation == DfsAggregation::Count));
    }

    #[test]
    fn test_transform_values() {
        let (population, peripheral) = tables();
        let mut dfs = DeepFeatureSynthesis::new(Hyperparameters::default());
        dfs.fit(&population, &[peripheral.clone()]).expect("fit");

        let features = dfs.transform(&population, &[peripheral]).expect("transform");
        assert_eq!(features.nrows(), 2);

        let names = dfs.feature_names().expect("names");
        let avg_ix = names
            .iter()
            .position(|n| n.starts_with("AVG"))
            .expect("avg feature");
        let count_ix = names
            .iter()
            .position(|n| n.starts_with("COUNT"))
            .expect("count feature");

        assert_eq!(features.row(0)[count_ix], 2.0);
        assert_eq!(features.row(0)[avg_ix], 3.0);
        assert_eq!(features.row(1)[count_ix], 1.0);
        assert_eq!(features.row(1)[avg_ix], 10.0);
    }

    #[test]
    fn test_not_fitted() {
        let (population, peripheral) = tables();
        let dfs = DeepFeatureSynthesis::new(Hyperparameters::default());
        let err = dfs.transform(&population, &[peripheral]).unwrap_err();
        assert!(matches!(err, Error::NotFitted));
    }

    #[test]
    fn test_flat_data_model() {
        let (population, _) = tables();
        let mut dfs = DeepFeatureSynthesis::new(Hyperparameters::default());
        let err = dfs.fit(&population, &[]).unwrap_err();
        assert!(matches!(err, Error::FlatDataModel));
    }

    #[test]
    fn test_same_unit_condition_synthesis() {
        let (mut population, mut peripheral) = tables();
        population
            .push_categorical(Column::with_unit("plan", "plan", vec![0, 1]))
            .expect("push");
        peripheral
            .push_categorical(Column::with_unit("plan", "plan", vec![0, 1, 1]))
            .expect("push");

        let mut dfs = DeepFeatureSynthesis::new(Hyperparameters::default());
        dfs.fit(&population, &[peripheral.clone()]).expect("fit");

        let conditioned: Vec<&AbstractFeature> = dfs
            .features()
            .iter()
            .filter(|f| !f.conditions.is_empty())
            .collect();
        assert!(!conditioned.is_empty());

        // Row 0 (plan 0) has two matches but only one with plan = 0.
        let features = dfs.transform(&population, &[peripheral]).expect("transform");
        let names = dfs.feature_names().expect("names");
        let cond_count_ix = names
            .iter()
            .position(|n| n.starts_with("COUNT") && n.contains("WHERE"))
            .expect("conditioned count");
        assert_eq!(features.row(0)[cond_count_ix], 1.0);
    }

    #[test]
    fn test_comparison_only_excluded_from_aggregation() {
        let (population, mut peripheral) = tables();
        peripheral
            .push_numerical(Column::with_unit(
                "zip",
                "zip, comparison only",
                vec![1.0, 2.0, 3.0],
            ))
            .expect("push");

        let mut dfs = DeepFeatureSynthesis::new(Hyperparameters::default());
        dfs.fit(&population, &[peripheral]).expect("fit");
        assert!(dfs
            .features()
            .iter()
            .all(|f| f.data_used != DfsDataUsed::Numerical || f.input_col == 0));
    }

    #[test]
    fn test_text_token_counts() {
        let (population, mut peripheral) = tables();
        peripheral
            .push_text(Column::new(
                "notes",
                vec![
                    "urgent delivery".to_string(),
                    "standard".to_string(),
                    "urgent".to_string(),
                ],
            ))
            .expect("push");

        let hyp = Hyperparameters {
            min_df: 1,
            vocab_size: 10,
            ..Hyperparameters::default()
        };
        let mut dfs = DeepFeatureSynthesis::new(hyp);
        dfs.fit(&population, &[peripheral.clone()]).expect("fit");

        let text_features: Vec<usize> = dfs
            .features()
            .iter()
            .enumerate()
            .filter(|(_, f)| f.data_used == DfsDataUsed::Text)
            .map(|(ix, _)| ix)
            .collect();
        assert_eq!(text_features.len(), 3); // delivery, standard, urgent

        let features = dfs.transform(&population, &[peripheral]).expect("transform");
        // Row 0 has two matched orders; "urgent" appears in one of them...
        let urgent_id = dfs.vocabularies[0][0].id("urgent").expect("urgent");
        let urgent_ix = dfs
            .features()
            .iter()
            .position(|f| f.data_used == DfsDataUsed::Text && f.token_id == urgent_id)
            .expect("urgent feature");
        assert_eq!(features.row(0)[urgent_ix], 1.0);
        // ...and row 1's single order is also urgent.
        assert_eq!(features.row(1)[urgent_ix], 1.0);
    }
}
