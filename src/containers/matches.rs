//! The match buffer and the match maker.
//!
//! A match is an ordered pair `(ix_output, ix_input)`: peripheral (input)
//! row `ix_input` is joinable to population (output) row `ix_output` under
//! the active join-key pair and, when time stamps are enabled, satisfies
//! `lower_ts <= population_ts` and (`upper_ts` is NaN or `> population_ts`).
//!
//! Matches are produced once at the start of each tree fit and stored in a
//! single contiguous buffer; candidate-split evaluation partitions and sorts
//! this buffer in place.

use crate::containers::dataframe::DataFrame;
use crate::error::{Error, Result};
use rayon::prelude::*;

/// One admitted (population row, peripheral row) pair.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Match {
    /// Row in the output (population) table.
    pub ix_output: usize,
    /// Row in the input (peripheral) table.
    pub ix_input: usize,
}

/// Produces the match buffer for one (population, peripheral) pair.
pub struct MatchMaker;

impl MatchMaker {
    /// Builds all matches, grouped by `ix_output`. The loop is data-parallel
    /// over population rows; per-row outputs are concatenated in row order,
    /// so the result is deterministic.
    pub fn make_matches(
        population: &DataFrame,
        peripheral: &DataFrame,
        use_timestamps: bool,
    ) -> Result<Vec<Match>> {
        let pop_keys = population.primary_join_key()?;
        peripheral.primary_join_key()?;
        if use_timestamps {
            Self::check_time_stamps(population, peripheral)?;
        }

        let per_row: Vec<Vec<Match>> = (0..population.nrows())
            .into_par_iter()
            .map(|ix_output| {
                Self::row_matches(pop_keys.get(ix_output), ix_output, population, peripheral, use_timestamps)
            })
            .collect();

        Ok(per_row.into_iter().flatten().collect())
    }

    /// The matches of a single population row, in peripheral table order.
    pub fn matches_for_row(
        population: &DataFrame,
        peripheral: &DataFrame,
        ix_output: usize,
        use_timestamps: bool,
    ) -> Result<Vec<Match>> {
        let key = population.primary_join_key()?.get(ix_output);
        peripheral.primary_join_key()?;
        if use_timestamps {
            Self::check_time_stamps(population, peripheral)?;
        }
        Ok(Self::row_matches(key, ix_output, population, peripheral, use_timestamps))
    }

    fn check_time_stamps(population: &DataFrame, peripheral: &DataFrame) -> Result<()> {
        for df in [population, peripheral] {
            if df.time_stamps().is_empty() {
                return Err(Error::Schema(format!(
                    "time stamps are enabled, but table '{}' has no time stamp column",
                    df.name()
                )));
            }
        }
        Ok(())
    }

    fn row_matches(
        key: i64,
        ix_output: usize,
        population: &DataFrame,
        peripheral: &DataFrame,
        use_timestamps: bool,
    ) -> Vec<Match> {
        let ts = population.time_stamp(ix_output);
        peripheral
            .join_key_index(0)
            .rows(key)
            .iter()
            .filter(|&&ix_input| !use_timestamps || Self::in_time_range(peripheral, ix_input, ts))
            .map(|&ix_input| Match { ix_output, ix_input })
            .collect()
    }

    /// NaN time stamps always fail the inequality test, so a row with an
    /// unknown lower time stamp is never matched. An unknown (NaN) upper
    /// time stamp means "no upper bound".
    #[inline]
    fn in_time_range(peripheral: &DataFrame, ix_input: usize, population_ts: f64) -> bool {
        let lower = peripheral.time_stamp(ix_input);
        if !(lower <= population_ts) {
            return false;
        }
        let upper = peripheral.upper_time_stamp(ix_input);
        upper.is_nan() || upper > population_ts
    }
}
