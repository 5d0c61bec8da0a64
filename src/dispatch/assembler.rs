//! Merges per-unit outcomes into the final result

use super::inputs::Inputs;
use super::options::MapOptions;
use super::simplify::{simplify, MapResult};
use super::wrapper::JobResult;
use crate::error::{ParmapError, Result, UnitFailure};
use serde_json::Value;

/// Failures among `results`, in unit order
pub fn collect_failures(results: &[JobResult]) -> Vec<UnitFailure> {
    results
        .iter()
        .enumerate()
        .filter_map(|(index, result)| {
            result
                .error()
                .map(|record| UnitFailure::new(index, record.to_string()))
        })
        .collect()
}

/// Build the call's result from ordered per-unit outcomes.
///
/// Without an impute policy any failure aborts the call and no partial
/// result is returned.
pub fn assemble(results: Vec<JobResult>, inputs: &Inputs, options: &MapOptions) -> Result<MapResult> {
    let values: Vec<Value> = match &options.impute_error {
        None => {
            let failures = collect_failures(&results);
            if !failures.is_empty() {
                return Err(ParmapError::abort(failures));
            }
            results
                .into_iter()
                .filter_map(|result| match result {
                    JobResult::Value(value) => Some(value),
                    JobResult::Error(_) => None,
                })
                .collect()
        }
        Some(impute) => results
            .into_iter()
            .map(|result| match result {
                JobResult::Value(value) => value,
                JobResult::Error(record) => impute.apply(&record),
            })
            .collect(),
    };

    let names = if options.use_names && !values.is_empty() {
        inputs.text_names()
    } else {
        None
    };

    Ok(MapResult {
        values: simplify(values, options.simplify),
        names,
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::dispatch::options::{ImputeError, Simplify};
    use crate::dispatch::simplify::Collection;
    use crate::dispatch::wrapper::ErrorRecord;
    use serde_json::json;

    fn mixed() -> Vec<JobResult> {
        vec![
            JobResult::Value(json!(1)),
            JobResult::Error(ErrorRecord::raised("unit two broke")),
            JobResult::Value(json!(3)),
        ]
    }

    #[test]
    fn test_failure_aborts_without_partial_result() {
        let inputs = Inputs::single([1, 2, 3]);
        let err = assemble(mixed(), &inputs, &MapOptions::new()).unwrap_err();

        assert!(err.is_abort());
        assert_eq!(err.failures().len(), 1);
        assert_eq!(err.failures()[0].index, 1);
        let message = err.to_string();
        assert!(message.contains("00002: unit two broke"));
        assert!(!message.contains("00001"));
    }

    #[test]
    fn test_constant_impute() {
        let inputs = Inputs::single([1, 2, 3]);
        let options = MapOptions::new().with_impute_error(ImputeError::constant(json!(null)));
        let result = assemble(mixed(), &inputs, &options).unwrap();
        assert_eq!(result.items().unwrap(), &[json!(1), json!(null), json!(3)]);
    }

    #[test]
    fn test_transform_impute() {
        let inputs = Inputs::single([1, 2, 3]);
        let options = MapOptions::new()
            .with_impute_error(ImputeError::transform(|record| json!(record.message.len())));
        let result = assemble(mixed(), &inputs, &options).unwrap();
        assert_eq!(result.items().unwrap()[1], json!("unit two broke".len()));
    }

    #[test]
    fn test_names_from_textual_inputs() {
        let inputs = Inputs::single(["a", "b"]);
        let results = vec![JobResult::Value(json!("A")), JobResult::Value(json!("B"))];

        let named = assemble(results.clone(), &inputs, &MapOptions::new().with_use_names(true))
            .unwrap();
        assert_eq!(named.names, Some(vec!["a".to_string(), "b".to_string()]));

        let unnamed = assemble(results, &inputs, &MapOptions::new()).unwrap();
        assert_eq!(unnamed.names, None);
    }

    #[test]
    fn test_non_textual_inputs_are_unnamed() {
        let inputs = Inputs::single([1, 2]);
        let results = vec![JobResult::Value(json!(1)), JobResult::Value(json!(2))];
        let result = assemble(results, &inputs, &MapOptions::new().with_use_names(true)).unwrap();
        assert_eq!(result.names, None);
    }

    #[test]
    fn test_simplify_applied_after_impute() {
        let inputs = Inputs::single([1, 2, 3]);
        let options = MapOptions::new()
            .with_impute_error(ImputeError::constant(json!(0)))
            .with_simplify(Simplify::BestEffort);
        let result = assemble(mixed(), &inputs, &options).unwrap();
        assert_eq!(
            result.values,
            Collection::Vector {
                items: vec![json!(1), json!(0), json!(3)]
            }
        );
    }

    #[test]
    fn test_empty_results() {
        let inputs = Inputs::zip(Vec::new()).unwrap();
        let options = MapOptions::new().with_use_names(true).with_simplify(Simplify::Array);
        let result = assemble(Vec::new(), &inputs, &options).unwrap();
        assert!(result.is_empty());
        assert_eq!(result.names, None);
    }
}
