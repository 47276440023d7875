use serde_json::{Number, Value};

use super::{Aggregation, QueryFormat, QueryType};
use crate::query::compiler::{CompileError, CompileResult, SqlParam};

/// A descriptor after defaults and shape checks, ready for compilation
#[derive(Debug, Clone, PartialEq)]
pub struct ResolvedDescriptor {
    pub id: String,
    pub query: ResolvedQuery,
}

#[derive(Debug, Clone, PartialEq)]
pub enum ResolvedQuery {
    /// Caller-supplied statement used verbatim
    Raw(RawQuery),
    Search(SearchQuery),
    Term(TermQuery),
    Range(RangeQuery),
}

#[derive(Debug, Clone, PartialEq)]
pub struct RawQuery {
    pub statement: String,
    /// Declared type, kept so the response can be reshaped
    pub kind: QueryType,
    /// First data field, read back when reshaping aggregations
    pub data_field: Option<String>,
}

#[derive(Debug, Clone, PartialEq)]
pub struct SearchQuery {
    pub tables: Vec<String>,
    pub include_fields: Vec<String>,
    pub data_fields: Vec<String>,
    pub value: Option<MatchValue>,
    pub query_format: QueryFormat,
    pub sort_field: Option<String>,
    pub sort_by: SortOrder,
    pub vector: Option<VectorSearch>,
    pub where_clause: Option<String>,
    pub size: u64,
    pub from: Option<u64>,
}

#[derive(Debug, Clone, PartialEq)]
pub struct TermQuery {
    pub tables: Vec<String>,
    pub data_fields: Vec<String>,
    pub where_clause: Option<String>,
    pub aggregation_size: Option<u64>,
}

#[derive(Debug, Clone, PartialEq)]
pub struct RangeQuery {
    pub tables: Vec<String>,
    pub data_fields: Vec<String>,
    pub value: Option<RangeValue>,
    pub aggregations: Vec<Aggregation>,
    pub interval: Option<f64>,
    pub where_clause: Option<String>,
}

#[derive(Debug, Clone, PartialEq)]
pub struct VectorSearch {
    pub field: String,
    pub vector: Vec<f64>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SortOrder {
    Asc,
    Desc,
}

impl SortOrder {
    pub fn parse(order: &str) -> CompileResult<Self> {
        match order.to_ascii_lowercase().as_str() {
            "asc" => Ok(SortOrder::Asc),
            "desc" => Ok(SortOrder::Desc),
            other => Err(CompileError::InvalidArgument(format!(
                "sortBy must be one of `asc` or `desc`, got `{}`",
                other
            ))),
        }
    }

    pub fn as_sql(&self) -> &'static str {
        match self {
            SortOrder::Asc => "asc",
            SortOrder::Desc => "desc",
        }
    }
}

/// The value of a search, suggestion or term descriptor
#[derive(Debug, Clone, PartialEq)]
pub enum MatchValue {
    Single(SqlParam),
    Many(Vec<SqlParam>),
}

impl MatchValue {
    /// Parses a scalar or array value. Absent, null, empty strings and
    /// empty arrays all mean "no value".
    pub fn parse(value: Option<&Value>) -> CompileResult<Option<Self>> {
        match value {
            None | Some(Value::Null) => Ok(None),
            Some(Value::Array(items)) => {
                let params = items
                    .iter()
                    .map(scalar_param)
                    .collect::<CompileResult<Vec<_>>>()?;
                let params: Vec<SqlParam> = params.into_iter().flatten().collect();
                if params.is_empty() {
                    Ok(None)
                } else {
                    Ok(Some(MatchValue::Many(params)))
                }
            }
            Some(scalar) => Ok(scalar_param(scalar)?.map(MatchValue::Single)),
        }
    }

    pub fn params(&self) -> Vec<&SqlParam> {
        match self {
            MatchValue::Single(param) => vec![param],
            MatchValue::Many(params) => params.iter().collect(),
        }
    }
}

fn scalar_param(value: &Value) -> CompileResult<Option<SqlParam>> {
    match value {
        Value::Null => Ok(None),
        Value::String(s) if s.is_empty() => Ok(None),
        Value::String(s) => Ok(Some(SqlParam::Text(s.clone()))),
        Value::Number(n) => Ok(Some(SqlParam::Number(n.clone()))),
        Value::Bool(b) => Ok(Some(SqlParam::Bool(*b))),
        Value::Array(_) | Value::Object(_) => Err(CompileError::InvalidArgument(
            "value should be one of array or string when type is one of `search, suggestion, term`"
                .to_string(),
        )),
    }
}

/// One side of a range value
#[derive(Debug, Clone, PartialEq)]
pub enum RangeBound {
    Number(Number),
    Text(String),
}

impl RangeBound {
    fn parse(name: &str, value: Option<&Value>) -> CompileResult<Option<Self>> {
        match value {
            None | Some(Value::Null) => Ok(None),
            Some(Value::Number(n)) => Ok(Some(RangeBound::Number(n.clone()))),
            Some(Value::String(s)) if s.is_empty() => Ok(None),
            Some(Value::String(s)) => Ok(Some(RangeBound::Text(s.clone()))),
            Some(other) => Err(CompileError::InvalidArgument(format!(
                "range `{}` must be a number or a string, got {}",
                name, other
            ))),
        }
    }
}

/// `{start?, end?}` value of a range descriptor
#[derive(Debug, Clone, PartialEq)]
pub struct RangeValue {
    pub start: Option<RangeBound>,
    pub end: Option<RangeBound>,
}

impl RangeValue {
    /// Parses a range value. `null` and `{}` yield `None`; anything that is
    /// not an object is rejected.
    pub fn parse(value: Option<&Value>) -> CompileResult<Option<Self>> {
        let object = match value {
            None | Some(Value::Null) => return Ok(None),
            Some(Value::Object(object)) => object,
            Some(_) => {
                return Err(CompileError::InvalidArgument(
                    "value should be an object when type is `range`".to_string(),
                ))
            }
        };

        let start = RangeBound::parse("start", object.get("start"))?;
        let end = RangeBound::parse("end", object.get("end"))?;
        if start.is_none() && end.is_none() {
            return Ok(None);
        }
        Ok(Some(RangeValue { start, end }))
    }
}
