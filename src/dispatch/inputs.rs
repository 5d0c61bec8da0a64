//! Positional input vectors and the work units cut from them

use crate::error::{common, Result};
use serde::{Deserialize, Serialize};
use serde_json::Value;

/// One positional element of the vectorized inputs.
///
/// `args` holds the `index`-th element of every input vector, in vector order.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct WorkUnit {
    pub index: usize,
    pub args: Vec<Value>,
}

impl WorkUnit {
    pub fn new(index: usize, args: Vec<Value>) -> Self {
        Self { index, args }
    }

    /// 1-based unit number used in log file names and failure reports
    pub fn number(&self) -> usize {
        self.index + 1
    }
}

/// Equal-length input vectors zipped positionally.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct Inputs {
    columns: Vec<Vec<Value>>,
}

impl Inputs {
    /// A single input vector
    pub fn single<I>(values: I) -> Self
    where
        I: IntoIterator,
        I::Item: Into<Value>,
    {
        Self {
            columns: vec![values.into_iter().map(Into::into).collect()],
        }
    }

    /// Several input vectors; all must share the first vector's length
    pub fn zip(columns: Vec<Vec<Value>>) -> Result<Self> {
        if let Some(first) = columns.first() {
            let expected = first.len();
            for (position, column) in columns.iter().enumerate().skip(1) {
                if column.len() != expected {
                    return Err(common::length_mismatch(expected, position, column.len()));
                }
            }
        }
        Ok(Self { columns })
    }

    /// Number of work units (`length(first input vector)`)
    pub fn len(&self) -> usize {
        self.columns.first().map_or(0, Vec::len)
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    pub fn width(&self) -> usize {
        self.columns.len()
    }

    /// The first input vector, used for naming results
    pub fn first(&self) -> &[Value] {
        self.columns.first().map_or(&[], Vec::as_slice)
    }

    /// Text names for the results when the first vector is entirely textual
    pub fn text_names(&self) -> Option<Vec<String>> {
        self.first()
            .iter()
            .map(|value| value.as_str().map(str::to_string))
            .collect()
    }

    /// Cut the inputs into units, one per position, in order
    pub fn units(&self) -> Vec<WorkUnit> {
        (0..self.len())
            .map(|index| {
                let args = self
                    .columns
                    .iter()
                    .map(|column| column[index].clone())
                    .collect();
                WorkUnit::new(index, args)
            })
            .collect()
    }
}

impl From<Vec<Value>> for Inputs {
    fn from(values: Vec<Value>) -> Self {
        Self {
            columns: vec![values],
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_units_zip_columns_positionally() {
        let inputs = Inputs::zip(vec![
            vec![json!(1), json!(2), json!(3)],
            vec![json!("a"), json!("b"), json!("c")],
        ])
        .unwrap();

        let units = inputs.units();
        assert_eq!(units.len(), 3);
        assert_eq!(units[1].index, 1);
        assert_eq!(units[1].args, vec![json!(2), json!("b")]);
        assert_eq!(units[2].number(), 3);
    }

    #[test]
    fn test_length_mismatch_is_rejected() {
        let err = Inputs::zip(vec![vec![json!(1), json!(2)], vec![json!(1)]]).unwrap_err();
        assert_eq!(
            err.code(),
            crate::error::ErrorCode::VALIDATION_LENGTH_MISMATCH
        );
    }

    #[test]
    fn test_empty_inputs() {
        let inputs = Inputs::zip(Vec::new()).unwrap();
        assert!(inputs.is_empty());
        assert!(inputs.units().is_empty());
        assert_eq!(inputs.text_names(), Some(Vec::new()));
    }

    #[test]
    fn test_text_names_require_all_strings() {
        assert_eq!(
            Inputs::single(["a", "b"]).text_names(),
            Some(vec!["a".to_string(), "b".to_string()])
        );
        assert_eq!(Inputs::single(vec![json!("a"), json!(2)]).text_names(), None);
    }
}
