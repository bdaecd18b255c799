//! Table schemata: column names listed by role.
//!
//! Column order is significant inside a role, roles themselves are
//! unordered. Schemata must match between fit and transform up to column
//! sets: extra columns in the data are ignored, missing non-target columns
//! are an error. Targets may be absent at transform time.

use crate::containers::DataFrame;
use crate::error::{Error, Result};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

/// The role-wise column listing of one table, plus the unit tags.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct Schema {
    pub name: String,
    #[serde(default)]
    pub categoricals: Vec<String>,
    #[serde(default)]
    pub discretes: Vec<String>,
    #[serde(default)]
    pub join_keys: Vec<String>,
    #[serde(default)]
    pub numericals: Vec<String>,
    #[serde(default)]
    pub targets: Vec<String>,
    #[serde(default)]
    pub text: Vec<String>,
    #[serde(default)]
    pub time_stamps: Vec<String>,
    #[serde(default)]
    pub unused_floats: Vec<String>,
    #[serde(default)]
    pub unused_strings: Vec<String>,
    /// Unit tag per column name, omitted for unit-less columns.
    #[serde(default)]
    pub units: BTreeMap<String, String>,
}

impl Schema {
    pub fn new(name: impl Into<String>) -> Self {
        Schema {
            name: name.into(),
            ..Schema::default()
        }
    }

    /// Captures the roles and units of a role-typed DataFrame.
    pub fn from_dataframe(df: &DataFrame) -> Self {
        fn names<T>(cols: &[crate::containers::Column<T>], units: &mut BTreeMap<String, String>) -> Vec<String> {
            cols.iter()
                .map(|c| {
                    if !c.unit().is_empty() {
                        units.insert(c.name().to_string(), c.unit().to_string());
                    }
                    c.name().to_string()
                })
                .collect()
        }

        let mut units = BTreeMap::new();
        Schema {
            name: df.name().to_string(),
            categoricals: names(df.categoricals(), &mut units),
            join_keys: names(df.join_keys(), &mut units),
            discretes: names(df.discretes(), &mut units),
            numericals: names(df.numericals(), &mut units),
            targets: names(df.targets(), &mut units),
            text: names(df.text(), &mut units),
            time_stamps: names(df.time_stamps(), &mut units),
            unused_floats: Vec::new(),
            unused_strings: Vec::new(),
            units,
        }
    }

    /// The unit of a column, empty when untagged.
    pub fn unit(&self, column: &str) -> &str {
        self.units.get(column).map_or("", String::as_str)
    }

    /// Checks that every non-target column this schema names exists in `df`
    /// under the same role. Extra columns in `df` are ignored.
    pub fn validate(&self, df: &DataFrame) -> Result<()> {
        let check = |names: &[String], present: &mut dyn Iterator<Item = &str>| -> Result<()> {
            let present: Vec<&str> = present.collect();
            for name in names {
                if !present.contains(&name.as_str()) {
                    return Err(Error::MissingColumn { name: name.clone() });
                }
            }
            Ok(())
        };

        check(
            &self.categoricals,
            &mut df.categoricals().iter().map(|c| c.name()),
        )?;
        check(&self.join_keys, &mut df.join_keys().iter().map(|c| c.name()))?;
        check(&self.discretes, &mut df.discretes().iter().map(|c| c.name()))?;
        check(
            &self.numericals,
            &mut df.numericals().iter().map(|c| c.name()),
        )?;
        check(&self.text, &mut df.text().iter().map(|c| c.name()))?;
        check(
            &self.time_stamps,
            &mut df.time_stamps().iter().map(|c| c.name()),
        )?;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::containers::Column;

    fn sample_df() -> DataFrame {
        let mut df = DataFrame::new("orders");
        df.push_join_key(Column::new("customer_id", vec![1, 2]))
            .expect("push");
        df.push_numerical(Column::with_unit("amount", "dollars", vec![1.0, 2.0]))
            .expect("push");
        df.push_categorical(Column::new("status", vec![0, 1]))
            .expect("push");
        df.push_time_stamp(Column::new("ordered_at", vec![0.0, 1.0]))
            .expect("push");
        df
    }

    #[test]
    fn test_roundtrip_preserves_roles_and_units() {
        let schema = Schema::from_dataframe(&sample_df());
        let json = serde_json::to_string(&schema).expect("serialize");
        let restored: Schema = serde_json::from_str(&json).expect("deserialize");
        assert_eq!(schema, restored);
        assert_eq!(restored.unit("amount"), "dollars");
        assert_eq!(restored.unit("status"), "");
        assert_eq!(restored.numericals, vec!["amount"]);
        assert_eq!(restored.join_keys, vec!["customer_id"]);
    }

    #[test]
    fn test_validate_accepts_matching_table() {
        let df = sample_df();
        let schema = Schema::from_dataframe(&df);
        schema.validate(&df).expect("validate");
    }

    #[test]
    fn test_validate_ignores_extra_columns() {
        let df = sample_df();
        let mut schema = Schema::from_dataframe(&df);
        schema.numericals.clear(); // schema now names fewer columns
        schema.validate(&df).expect("extra columns are fine");
    }

    #[test]
    fn test_validate_rejects_missing_column() {
        let df = sample_df();
        let mut schema = Schema::from_dataframe(&df);
        schema.numericals.push("discount".to_string());

        let err = schema.validate(&df).unwrap_err();
        match err {
            Error::MissingColumn { name } => assert_eq!(name, "discount"),
            other => panic!("unexpected error: {other}"),
        }
    }

    #[test]
    fn test_missing_target_is_not_validated() {
        // Targets may be absent at transform time.
        let mut df = DataFrame::new("orders");
        df.push_join_key(Column::new("customer_id", vec![1]))
            .expect("push");

        let mut schema = Schema::new("orders");
        schema.join_keys.push("customer_id".to_string());
        schema.targets.push("churn".to_string());
        schema.validate(&df).expect("missing target is fine");
    }
}
