//! Ordering helpers for cached entity lists.

use serde_json::Value;
use std::cmp::Ordering;
use std::fmt;
use std::str::FromStr;

use super::traits::Entity;

/// Sort direction.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub enum SortOrder {
  #[default]
  Asc,
  Desc,
}

impl FromStr for SortOrder {
  type Err = String;

  fn from_str(s: &str) -> Result<Self, Self::Err> {
    match s.to_lowercase().as_str() {
      "asc" | "ascending" => Ok(SortOrder::Asc),
      "desc" | "descending" => Ok(SortOrder::Desc),
      other => Err(format!("unknown sort order '{}', expected asc or desc", other)),
    }
  }
}

impl fmt::Display for SortOrder {
  fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
    match self {
      SortOrder::Asc => write!(f, "asc"),
      SortOrder::Desc => write!(f, "desc"),
    }
  }
}

/// Sort most recent first by `updated_at`, falling back to `created_at`.
///
/// Stable: entities with equal keys keep their relative order.
pub fn sort_by_recency<T: Entity>(entities: &mut [T]) {
  entities.sort_by(|a, b| b.recency_key().cmp(a.recency_key()));
}

/// Return a copy of `entities` sorted by a named field.
///
/// Fields are read from the entity's JSON form. A missing or null field sorts
/// like the empty string, ahead of every present value. Strings compare
/// lexically, numbers numerically and booleans false before true. Values of
/// different kinds are ranked null, bool, number, string, then arrays and
/// objects, so a field that is only sometimes set still sorts consistently.
pub fn sort_by_property<T: Entity>(entities: &[T], property: &str, order: SortOrder) -> Vec<T> {
  let mut keyed: Vec<(Value, T)> = entities
    .iter()
    .map(|entity| (property_value(entity, property), entity.clone()))
    .collect();

  keyed.sort_by(|(a, _), (b, _)| {
    let ordering = compare_values(a, b);
    match order {
      SortOrder::Asc => ordering,
      SortOrder::Desc => ordering.reverse(),
    }
  });

  keyed.into_iter().map(|(_, entity)| entity).collect()
}

fn property_value<T: Entity>(entity: &T, property: &str) -> Value {
  serde_json::to_value(entity)
    .ok()
    .and_then(|value| value.get(property).cloned())
    .unwrap_or(Value::Null)
}

fn kind_rank(value: &Value) -> u8 {
  match value {
    Value::Null => 0,
    Value::Bool(_) => 1,
    Value::Number(_) => 2,
    Value::String(s) if s.is_empty() => 0,
    Value::String(_) => 3,
    Value::Array(_) | Value::Object(_) => 4,
  }
}

fn compare_values(a: &Value, b: &Value) -> Ordering {
  kind_rank(a).cmp(&kind_rank(b)).then_with(|| match (a, b) {
    (Value::String(a), Value::String(b)) => a.cmp(b),
    (Value::Number(a), Value::Number(b)) => {
      let (a, b) = (a.as_f64().unwrap_or(0.0), b.as_f64().unwrap_or(0.0));
      a.total_cmp(&b)
    }
    (Value::Bool(a), Value::Bool(b)) => a.cmp(b),
    (Value::Array(_) | Value::Object(_), Value::Array(_) | Value::Object(_)) => {
      a.to_string().cmp(&b.to_string())
    }
    // Null and "" share rank 0 and are equal
    _ => Ordering::Equal,
  })
}
