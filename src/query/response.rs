//! Reshapes raw rows into the search-engine style response envelope.

use serde::Serialize;
use serde_json::{json, Map, Value};

use crate::query::compiler::fields::{
    HISTOGRAM_KEY_FIELD, MAX_FIELD, MIN_FIELD, TOTAL_COUNT_FIELD,
};
use crate::query::compiler::range::transform_range_response;
use crate::query::compiler::term::transform_term_response;
use crate::query::compiler::CustomData;
use crate::query::descriptor::QueryType;
use crate::query::executor::ResponseObject;

/// Envelope key holding the batch timing; never a valid descriptor id
pub const SETTINGS_KEY: &str = "settings";

/// A result row keyed by column name
pub type Row = Map<String, Value>;

/// An aggregation bucket
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct Bucket {
    pub key: Value,
    pub doc_count: u64,
}

/// Reads a count column, which drivers may return as a number or as the
/// text of a bigint
pub fn parse_count(value: Option<&Value>) -> u64 {
    match value {
        Some(Value::Number(n)) => n
            .as_u64()
            .or_else(|| n.as_f64().map(|f| f.max(0.0) as u64))
            .unwrap_or(0),
        Some(Value::String(s)) => s
            .trim()
            .parse::<u64>()
            .ok()
            .or_else(|| s.trim().parse::<f64>().ok().map(|f| f.max(0.0) as u64))
            .unwrap_or(0),
        _ => 0,
    }
}

/// Rounds a millisecond duration to hundredths
pub fn round_took(took: f64) -> f64 {
    (took * 100.0).round() / 100.0
}

fn empty_hits() -> Value {
    json!({ "total": { "value": 0 }, "hits": [] })
}

fn search_hits(rows: &[Row]) -> Value {
    let total = rows
        .first()
        .and_then(|row| row.get(TOTAL_COUNT_FIELD))
        .map(|count| parse_count(Some(count)))
        .unwrap_or(rows.len() as u64);

    let hits: Vec<Value> = rows
        .iter()
        .map(|row| {
            let mut source = row.clone();
            source.remove(TOTAL_COUNT_FIELD);
            json!({ "_score": 1, "_source": source })
        })
        .collect();

    json!({ "total": { "value": total }, "hits": hits })
}

fn search_body(took: f64, rows: &[Row]) -> Value {
    json!({ "took": took, "hits": search_hits(rows) })
}

fn aggregation_body(took: f64, aggregations: Value) -> Value {
    json!({ "took": took, "hits": empty_hits(), "aggregations": aggregations })
}

fn term_body(took: f64, rows: &[Row], data_field: &str) -> Value {
    let buckets = transform_term_response(rows, data_field);
    aggregation_body(took, json!({ data_field: { "buckets": buckets } }))
}

/// A caller-supplied range statement declares no aliases, so the ones
/// present in its first row are read back
fn raw_range_body(took: f64, rows: &[Row], data_field: Option<&str>) -> Value {
    let has = |alias: &str| rows.first().is_some_and(|row| row.contains_key(alias));
    let min_field = has(MIN_FIELD).then_some(MIN_FIELD);
    let max_field = has(MAX_FIELD).then_some(MAX_FIELD);
    let histogram = data_field.is_some() && has(HISTOGRAM_KEY_FIELD);
    aggregation_body(
        took,
        transform_range_response(
            rows,
            data_field.unwrap_or_default(),
            min_field,
            max_field,
            histogram,
        ),
    )
}

/// Builds the keyed response envelope one settled query at a time
#[derive(Debug, Default)]
pub struct ResponseAssembler {
    envelope: Map<String, Value>,
}

impl ResponseAssembler {
    pub fn new() -> Self {
        Self::default()
    }

    /// Adds an error entry for `id`
    pub fn push_error(&mut self, id: &str, message: &str, status: u16, took: f64) {
        self.envelope.insert(
            id.to_string(),
            json!({
                "id": id,
                "hits": null,
                "error": message,
                "status": status,
                "took": round_took(took),
            }),
        );
    }

    /// Adds the reshaped result of one executed query
    pub fn push_response(&mut self, response: &ResponseObject) {
        let rows = match &response.result {
            Ok(rows) => rows,
            Err(e) => {
                self.push_error(&response.id, &e.to_string(), 500, response.took);
                return;
            }
        };
        let took = round_took(response.took);

        let body = match &response.custom_data {
            CustomData::Search => search_body(took, rows),
            CustomData::Raw {
                query_type: QueryType::Term,
                data_field: Some(data_field),
            } => term_body(took, rows, data_field),
            CustomData::Raw {
                query_type: QueryType::Range,
                data_field,
            } => raw_range_body(took, rows, data_field.as_deref()),
            CustomData::Raw { .. } => search_body(took, rows),
            CustomData::Term { data_field } => term_body(took, rows, data_field),
            CustomData::Range {
                empty_response: true,
                ..
            } => Value::Null,
            CustomData::Range {
                data_field,
                min_field,
                max_field,
                histogram,
                ..
            } => aggregation_body(
                took,
                transform_range_response(
                    rows,
                    data_field.as_deref().unwrap_or_default(),
                    min_field.as_deref(),
                    max_field.as_deref(),
                    *histogram,
                ),
            ),
        };

        self.envelope.insert(response.id.clone(), body);
    }

    /// Closes the envelope with the total batch time
    pub fn finish(mut self, total_took: f64) -> Value {
        self.envelope
            .insert(SETTINGS_KEY.to_string(), json!({ "took": round_took(total_took) }));
        Value::Object(self.envelope)
    }
}
