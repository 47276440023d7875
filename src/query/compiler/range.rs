//! Min/max and histogram statements for range descriptors.
//!
//! When a histogram is requested together with min or max, the min/max
//! statement is wrapped as the `OverallStats` CTE and cross-joined, so the
//! overall bounds ride along with every bucket row. Buckets use floor
//! division: a value exactly on an edge belongs to the bucket starting at
//! that edge.

use serde_json::{json, Map, Value};

use super::fields::{
    HISTOGRAM_COUNT_FIELD, HISTOGRAM_KEY_FIELD, MAX_FIELD, MIN_FIELD, OVERALL_STATS_CTE,
};
use super::{
    merge_where, CompileError, CompileResult, CustomData, ParamSet, SqlParam, SqlQueryObject,
    Statement,
};
use super::value::{build_value_clause, ValueFilter};
use crate::query::descriptor::{Aggregation, QueryFormat, RangeBound, RangeQuery, RangeValue};
use crate::query::response::{parse_count, Bucket, Row};

/// Statement computing the overall min and/or max of a field, and the
/// aliases it actually selects
#[derive(Debug, Clone, PartialEq)]
pub struct MinMaxQueryDetails {
    pub min_field: Option<&'static str>,
    pub max_field: Option<&'static str>,
    pub query: String,
}

impl MinMaxQueryDetails {
    fn fields(&self) -> impl Iterator<Item = &'static str> {
        self.min_field.into_iter().chain(self.max_field)
    }
}

fn quote_table(table: &str) -> String {
    format!("\"{}\"", table)
}

/// Builds `SELECT MIN(field) AS .., MAX(field) AS .. FROM "table" [WHERE ..]`.
/// `where_clause` must not include the `WHERE` keyword.
pub fn build_range_min_max_query(
    field: &str,
    table: &str,
    where_clause: Option<&str>,
    want_min: bool,
    want_max: bool,
) -> CompileResult<MinMaxQueryDetails> {
    if !want_min && !want_max {
        return Err(CompileError::InvalidArgument(
            "one of min/max is required!".to_string(),
        ));
    }

    let mut select = Vec::new();
    let min_field = want_min.then_some(MIN_FIELD);
    let max_field = want_max.then_some(MAX_FIELD);
    if let Some(alias) = min_field {
        select.push(format!("MIN({}) AS {}", field, alias));
    }
    if let Some(alias) = max_field {
        select.push(format!("MAX({}) AS {}", field, alias));
    }

    let mut query = format!("SELECT {} FROM {}", select.join(", "), quote_table(table));
    if let Some(clause) = where_clause {
        query.push_str(" WHERE ");
        query.push_str(clause);
    }

    Ok(MinMaxQueryDetails {
        min_field,
        max_field,
        query,
    })
}

fn render_bound(bound: &RangeBound, params: &mut ParamSet) -> String {
    match bound {
        RangeBound::Number(n) => n.to_string(),
        RangeBound::Text(s) => params.bind(SqlParam::Text(s.clone())),
    }
}

/// Renders the condition for an already parsed range value
pub fn range_where_clause(field: &str, value: &RangeValue, params: &mut ParamSet) -> String {
    match (&value.start, &value.end) {
        (Some(start), Some(end)) => {
            let start = render_bound(start, params);
            let end = render_bound(end, params);
            format!("{} between {} and {}", field, start, end)
        }
        (Some(start), None) => format!("{} > {}", field, render_bound(start, params)),
        (None, Some(end)) => format!("{} < {}", field, render_bound(end, params)),
        (None, None) => String::new(),
    }
}

/// Builds the condition for a raw `{start?, end?}` value. `null` and `{}`
/// produce no condition; anything other than an object is an error.
pub fn build_range_where_clause(
    field: &str,
    value: Option<&Value>,
    params: &mut ParamSet,
) -> CompileResult<Option<String>> {
    Ok(RangeValue::parse(value)?.map(|range| range_where_clause(field, &range, params)))
}

/// Renders the bucket width. Any width other than 1 keeps a decimal
/// point so Postgres divides integer columns as numeric and `FLOOR` rounds
/// negative values down instead of truncating toward zero.
fn format_interval(interval: f64) -> String {
    if interval == 1.0 {
        "1".to_string()
    } else {
        format!("{:?}", interval)
    }
}

/// Builds the bucket statement. With `min_max` the min/max statement
/// becomes a CTE whose aliases are added to both the select and group by
/// lists.
pub fn build_histogram_query(
    field: &str,
    table: &str,
    interval: f64,
    where_clause: Option<&str>,
    min_max: Option<&MinMaxQueryDetails>,
) -> String {
    let interval = format_interval(interval);
    let bucket = format!("FLOOR({} / {})", field, interval);

    let mut select = vec![
        format!("{} * {} AS {}", bucket, interval, HISTOGRAM_KEY_FIELD),
        format!("COUNT(*) AS {}", HISTOGRAM_COUNT_FIELD),
    ];
    let mut group_by = vec![bucket];
    let mut from = quote_table(table);
    let mut query = String::new();

    if let Some(details) = min_max {
        query.push_str(&format!("WITH {} AS ({}) ", OVERALL_STATS_CTE, details.query));
        from.push_str(&format!(", {} o", OVERALL_STATS_CTE));
        for alias in details.fields() {
            select.push(format!("o.{}", alias));
            group_by.push(format!("o.{}", alias));
        }
    }

    query.push_str(&format!("SELECT {} FROM {}", select.join(", "), from));
    if let Some(clause) = where_clause {
        query.push_str(" WHERE ");
        query.push_str(clause);
    }
    query.push_str(&format!(
        " GROUP BY {} ORDER BY {}",
        group_by.join(", "),
        HISTOGRAM_KEY_FIELD
    ));
    query
}

/// Compiles a range descriptor. Without aggregations nothing is executed
/// and the response for the descriptor is `null`.
pub fn build_range_query(range: &RangeQuery) -> CompileResult<SqlQueryObject> {
    if range.aggregations.is_empty() {
        return Ok(SqlQueryObject {
            statement: None,
            custom_data: CustomData::Range {
                data_field: None,
                min_field: None,
                max_field: None,
                histogram: false,
                empty_response: true,
            },
        });
    }

    let field = range
        .data_fields
        .first()
        .ok_or_else(|| CompileError::MissingField("dataField".to_string()))?;
    // Range aggregations read from a single relation
    let table = range
        .tables
        .first()
        .ok_or_else(|| CompileError::MissingField("table".to_string()))?;

    let want_min = range.aggregations.contains(&Aggregation::Min);
    let want_max = range.aggregations.contains(&Aggregation::Max);
    let want_histogram = range.aggregations.contains(&Aggregation::Histogram);

    let mut params = ParamSet::new();
    let value_tokens = build_value_clause(
        range.value.as_ref().map(ValueFilter::Range),
        std::slice::from_ref(field),
        QueryFormat::default(),
        &mut params,
    )?;
    let value_clause = (!value_tokens.is_empty()).then(|| value_tokens.join(" "));
    let where_clause = merge_where(value_clause, range.where_clause.as_deref());

    let min_max = if want_min || want_max {
        Some(build_range_min_max_query(
            field,
            table,
            where_clause.as_deref(),
            want_min,
            want_max,
        )?)
    } else {
        None
    };

    let sql = if want_histogram {
        let interval = range
            .interval
            .filter(|i| i.is_finite() && *i > 0.0)
            .ok_or_else(|| {
                CompileError::InvalidArgument(
                    "a positive `interval` is required for histogram".to_string(),
                )
            })?;
        build_histogram_query(field, table, interval, where_clause.as_deref(), min_max.as_ref())
    } else {
        // Neither histogram nor an empty list, so min or max was requested
        min_max
            .as_ref()
            .map(|details| details.query.clone())
            .unwrap_or_default()
    };

    Ok(SqlQueryObject {
        statement: Some(Statement::new(sql, params)),
        custom_data: CustomData::Range {
            data_field: Some(field.clone()),
            min_field: min_max.as_ref().and_then(|d| d.min_field).map(str::to_string),
            max_field: min_max.as_ref().and_then(|d| d.max_field).map(str::to_string),
            histogram: want_histogram,
            empty_response: false,
        },
    })
}

/// Reshapes range rows into `{min?, max?, <field>?: {buckets}}`. Only the
/// aliases recorded at compile time are read back.
pub fn transform_range_response(
    rows: &[Row],
    data_field: &str,
    min_field: Option<&str>,
    max_field: Option<&str>,
    histogram: bool,
) -> Value {
    let mut aggregations = Map::new();
    let first = rows.first();

    for (name, alias) in [("min", min_field), ("max", max_field)] {
        if let Some(alias) = alias {
            let value = first
                .and_then(|row| row.get(alias))
                .cloned()
                .unwrap_or(Value::Null);
            aggregations.insert(name.to_string(), json!({ "value": value }));
        }
    }

    if histogram {
        let buckets: Vec<Bucket> = rows
            .iter()
            .map(|row| Bucket {
                key: row.get(HISTOGRAM_KEY_FIELD).cloned().unwrap_or(Value::Null),
                doc_count: parse_count(row.get(HISTOGRAM_COUNT_FIELD)),
            })
            .collect();
        aggregations.insert(data_field.to_string(), json!({ "buckets": buckets }));
    }

    Value::Object(aggregations)
}
