//! Result collections and shape simplification

use super::options::Simplify;
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

/// The assembled values of a mapping call, one slot per unit
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "shape", rename_all = "snake_case")]
pub enum Collection {
    /// One arbitrary value per unit
    List { items: Vec<Value> },
    /// One scalar per unit
    Vector { items: Vec<Value> },
    /// `nrow` values per unit, one column per unit, column-major
    Matrix {
        nrow: usize,
        ncol: usize,
        data: Vec<Value>,
    },
    /// Equally shaped arrays stacked along a trailing dimension, column-major
    Array { dim: Vec<usize>, data: Vec<Value> },
}

impl Collection {
    /// Number of unit slots
    pub fn len(&self) -> usize {
        match self {
            Collection::List { items } | Collection::Vector { items } => items.len(),
            Collection::Matrix { ncol, .. } => *ncol,
            Collection::Array { dim, .. } => dim.last().copied().unwrap_or(0),
        }
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Per-unit values of an unsimplified or vector collection
    pub fn items(&self) -> Option<&[Value]> {
        match self {
            Collection::List { items } | Collection::Vector { items } => Some(items),
            _ => None,
        }
    }
}

/// Final outcome of a mapping call
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct MapResult {
    pub values: Collection,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub names: Option<Vec<String>>,
}

impl MapResult {
    pub fn len(&self) -> usize {
        self.values.len()
    }

    pub fn is_empty(&self) -> bool {
        self.values.is_empty()
    }

    pub fn items(&self) -> Option<&[Value]> {
        self.values.items()
    }

    /// Name-to-value view of a named list or vector
    pub fn named(&self) -> Option<Map<String, Value>> {
        let names = self.names.as_ref()?;
        let items = self.items()?;
        Some(names.iter().cloned().zip(items.iter().cloned()).collect())
    }
}

fn value_len(value: &Value) -> usize {
    match value {
        Value::Null => 0,
        Value::Array(items) => items.len(),
        Value::Object(fields) => fields.len(),
        _ => 1,
    }
}

fn elements(value: Value) -> Vec<Value> {
    match value {
        Value::Null => Vec::new(),
        Value::Array(items) => items,
        Value::Object(fields) => fields.into_iter().map(|(_, v)| v).collect(),
        scalar => vec![scalar],
    }
}

/// Shape of a rectangular nested array, `None` when ragged or not an array
fn array_shape(value: &Value) -> Option<Vec<usize>> {
    match value {
        Value::Array(items) => {
            let first = match items.first() {
                Some(first) => first,
                None => return Some(vec![0]),
            };
            match first {
                Value::Array(_) => {
                    let inner = array_shape(first)?;
                    for item in &items[1..] {
                        if array_shape(item)? != inner {
                            return None;
                        }
                    }
                    let mut shape = vec![items.len()];
                    shape.extend(inner);
                    Some(shape)
                }
                _ => {
                    if items.iter().any(Value::is_array) {
                        None
                    } else {
                        Some(vec![items.len()])
                    }
                }
            }
        }
        _ => None,
    }
}

fn element_at<'a>(value: &'a Value, index: &[usize]) -> &'a Value {
    index
        .iter()
        .try_fold(value, |current, &i| current.get(i))
        .unwrap_or(&Value::Null)
}

/// Flatten a rectangular nested array with the first index varying fastest
fn flatten_column_major(value: &Value, shape: &[usize]) -> Vec<Value> {
    let total: usize = shape.iter().product();
    let mut out = Vec::with_capacity(total);
    let mut index = vec![0usize; shape.len()];
    for _ in 0..total {
        out.push(element_at(value, &index).clone());
        for (axis, extent) in shape.iter().enumerate() {
            index[axis] += 1;
            if index[axis] < *extent {
                break;
            }
            index[axis] = 0;
        }
    }
    out
}

fn simplify_array(values: &[Value]) -> Option<Collection> {
    let shape = array_shape(values.first()?)?;
    if shape.len() < 2 {
        return None;
    }
    for value in &values[1..] {
        if array_shape(value)? != shape {
            return None;
        }
    }

    let data = values
        .iter()
        .flat_map(|value| flatten_column_major(value, &shape))
        .collect();
    let mut dim = shape;
    dim.push(values.len());
    Some(Collection::Array { dim, data })
}

fn simplify_best_effort(values: Vec<Value>) -> Collection {
    let common = match values.first().map(value_len) {
        Some(len) if values.iter().all(|v| value_len(v) == len) => len,
        _ => return Collection::List { items: values },
    };

    match common {
        0 => Collection::List { items: values },
        1 => Collection::Vector {
            items: values.into_iter().flat_map(elements).collect(),
        },
        nrow => {
            let ncol = values.len();
            Collection::Matrix {
                nrow,
                ncol,
                data: values.into_iter().flat_map(elements).collect(),
            }
        }
    }
}

/// Coerce per-unit values into the requested shape.
///
/// Empty input is returned as an empty list regardless of `mode`.
pub fn simplify(values: Vec<Value>, mode: Simplify) -> Collection {
    if values.is_empty() {
        return Collection::List { items: values };
    }

    match mode {
        Simplify::None => Collection::List { items: values },
        Simplify::BestEffort => simplify_best_effort(values),
        Simplify::Array => match simplify_array(&values) {
            Some(array) => array,
            None => simplify_best_effort(values),
        },
    }
}
