//! The feature-learner façade.
//!
//! Binds schemata to role-typed columns, reduces text columns to derived
//! categorical columns through the fitted vocabularies, dispatches to the
//! boosting ensemble, and emits the feature matrix. One feature per fitted
//! tree: its raw aggregated output per population row.

use crate::aggregations::AggregationKind;
use crate::containers::{Column, DataFrame, NOT_KNOWN};
use crate::error::{Error, Result};
use crate::features::Features;
use crate::hyperparameters::Hyperparameters;
use crate::schema::Schema;
use crate::text::{tokenize, Vocabulary};
use crate::trees::Ensemble;
use serde::{Deserialize, Serialize};
use std::path::Path;
use tracing::info;

/// The relational gradient-boosted feature learner.
#[derive(Debug, Serialize, Deserialize)]
pub struct FeatureLearner {
    hyperparameters: Hyperparameters,
    population_schema: Option<Schema>,
    peripheral_schemas: Vec<Schema>,
    population_vocabularies: Vec<Vocabulary>,
    /// Per peripheral, per text column.
    peripheral_vocabularies: Vec<Vec<Vocabulary>>,
    ensemble: Option<Ensemble>,
}

impl FeatureLearner {
    pub fn new(hyperparameters: Hyperparameters) -> Self {
        FeatureLearner {
            hyperparameters,
            population_schema: None,
            peripheral_schemas: Vec::new(),
            population_vocabularies: Vec::new(),
            peripheral_vocabularies: Vec::new(),
            ensemble: None,
        }
    }

    pub fn hyperparameters(&self) -> &Hyperparameters {
        &self.hyperparameters
    }

    pub fn is_fitted(&self) -> bool {
        self.ensemble.is_some()
    }

    /// The fitted population schema.
    pub fn schema(&self) -> Result<&Schema> {
        self.population_schema.as_ref().ok_or(Error::NotFitted)
    }

    pub fn peripheral_schemas(&self) -> &[Schema] {
        &self.peripheral_schemas
    }

    /// Number of emitted features (fitted trees).
    pub fn num_features(&self) -> usize {
        self.ensemble.as_ref().map_or(0, |e| e.trees().len())
    }

    /// Fits the learner on a `(population, peripherals)` snapshot.
    pub fn fit(&mut self, population: &DataFrame, peripherals: &[DataFrame]) -> Result<()> {
        if population.nrows() == 0 {
            return Err(Error::EmptyTable(population.name().to_string()));
        }
        if peripherals.is_empty() {
            return Err(Error::FlatDataModel);
        }
        population.primary_target()?;

        self.population_vocabularies = self.build_vocabularies(population);
        self.peripheral_vocabularies =
            peripherals.iter().map(|p| self.build_vocabularies(p)).collect();

        let population_bound = augment_with_text(population, &self.population_vocabularies)?;
        let peripherals_bound: Vec<DataFrame> = peripherals
            .iter()
            .zip(&self.peripheral_vocabularies)
            .map(|(p, vocabs)| augment_with_text(p, vocabs))
            .collect::<Result<_>>()?;

        let mut combos: Vec<(usize, AggregationKind)> = Vec::new();
        for peripheral_ix in 0..peripherals.len() {
            for &kind in &self.hyperparameters.aggregations {
                combos.push((peripheral_ix, kind));
            }
        }

        let ensemble = Ensemble::fit(
            &population_bound,
            &peripherals_bound,
            &combos,
            &self.hyperparameters,
        )?;

        self.population_schema = Some(Schema::from_dataframe(population));
        self.peripheral_schemas = peripherals.iter().map(Schema::from_dataframe).collect();
        info!(
            num_features = ensemble.trees().len(),
            "feature learner fitted"
        );
        self.ensemble = Some(ensemble);
        Ok(())
    }

    /// Emits the feature matrix: one column per fitted tree, NaN/±∞
    /// coerced to 0.0 by the [`Features`] type.
    pub fn transform(
        &self,
        population: &DataFrame,
        peripherals: &[DataFrame],
    ) -> Result<Features> {
        let ensemble = self.ensemble.as_ref().ok_or(Error::NotFitted)?;
        if population.nrows() == 0 {
            return Err(Error::EmptyTable(population.name().to_string()));
        }
        self.validate(population, peripherals)?;

        let population_bound = augment_with_text(population, &self.population_vocabularies)?;
        let peripherals_bound: Vec<DataFrame> = peripherals
            .iter()
            .zip(&self.peripheral_vocabularies)
            .map(|(p, vocabs)| augment_with_text(p, vocabs))
            .collect::<Result<_>>()?;

        let mut columns: Vec<Vec<f64>> = Vec::with_capacity(ensemble.trees().len());
        for tree_ix in 0..ensemble.trees().len() {
            columns.push(ensemble.feature_column(
                tree_ix,
                &population_bound,
                &peripherals_bound,
                self.hyperparameters.use_timestamps,
            )?);
        }

        let nrows = population.nrows();
        let rows: Vec<Vec<f64>> = (0..nrows)
            .map(|r| columns.iter().map(|c| c[r]).collect())
            .collect();
        Ok(Features::from_rows(rows))
    }

    /// The ensemble's predictions (intercept plus shrunken tree sum).
    pub fn predict(&self, population: &DataFrame, peripherals: &[DataFrame]) -> Result<Vec<f64>> {
        let ensemble = self.ensemble.as_ref().ok_or(Error::NotFitted)?;
        self.validate(population, peripherals)?;

        let population_bound = augment_with_text(population, &self.population_vocabularies)?;
        let peripherals_bound: Vec<DataFrame> = peripherals
            .iter()
            .zip(&self.peripheral_vocabularies)
            .map(|(p, vocabs)| augment_with_text(p, vocabs))
            .collect::<Result<_>>()?;

        ensemble.predict(
            &population_bound,
            &peripherals_bound,
            self.hyperparameters.use_timestamps,
        )
    }

    fn validate(&self, population: &DataFrame, peripherals: &[DataFrame]) -> Result<()> {
        let schema = self.population_schema.as_ref().ok_or(Error::NotFitted)?;
        schema.validate(population)?;
        if peripherals.len() != self.peripheral_schemas.len() {
            return Err(Error::Schema(format!(
                "expected {} peripheral tables, got {}",
                self.peripheral_schemas.len(),
                peripherals.len()
            )));
        }
        for (s, df) in self.peripheral_schemas.iter().zip(peripherals) {
            s.validate(df)?;
        }
        Ok(())
    }

    fn build_vocabularies(&self, df: &DataFrame) -> Vec<Vocabulary> {
        df.text()
            .iter()
            .map(|col| {
                Vocabulary::build(
                    col.iter().map(String::as_str),
                    self.hyperparameters.min_df,
                    self.hyperparameters.vocab_size,
                )
            })
            .collect()
    }

    /// Serializes the fitted learner.
    pub fn to_json(&self) -> Result<String> {
        if !self.is_fitted() {
            return Err(Error::NotFitted);
        }
        Ok(serde_json::to_string(self)?)
    }

    /// Restores a learner, rebuilding the transient lookup tables.
    pub fn from_json(json: &str) -> Result<FeatureLearner> {
        let mut learner: FeatureLearner = serde_json::from_str(json)?;
        for v in &mut learner.population_vocabularies {
            v.rebuild_lookup();
        }
        for vocabs in &mut learner.peripheral_vocabularies {
            for v in vocabs {
                v.rebuild_lookup();
            }
        }
        Ok(learner)
    }

    pub fn save(&self, path: &Path) -> Result<()> {
        std::fs::write(path, self.to_json()?)?;
        Ok(())
    }

    pub fn load(path: &Path) -> Result<FeatureLearner> {
        let json = std::fs::read_to_string(path)?;
        FeatureLearner::from_json(&json)
    }
}

/// Appends, per text column, a derived categorical column holding the
/// highest-ranked vocabulary token present in the cell (or the unknown
/// marker). This is what the trees split on; raw text never reaches them.
fn augment_with_text(df: &DataFrame, vocabularies: &[Vocabulary]) -> Result<DataFrame> {
    if df.text().is_empty() {
        return Ok(df.clone());
    }
    let mut bound = df.clone();
    for (col, vocabulary) in df.text().iter().zip(vocabularies) {
        let data: Vec<i64> = col
            .iter()
            .map(|cell| {
                tokenize(cell)
                    .filter_map(|t| vocabulary.id(&t))
                    .min()
                    .map_or(NOT_KNOWN, i64::from)
            })
            .collect();
        bound.push_categorical(Column::new(format!("{}__token", col.name()), data))?;
    }
    Ok(bound)
}
