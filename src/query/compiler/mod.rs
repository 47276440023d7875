//! Compiles resolved descriptors into SQL statements.
//!
//! Every compiled statement uses Postgres positional placeholders (`$1`,
//! `$2`, ...) for text supplied by the caller. Values that were already
//! parsed into numbers are rendered as literals. Raw `where` fragments and
//! `defaultQuery` statements are passed through untouched; the caller owns
//! their correctness.

pub mod fields;
pub mod range;
pub mod search;
pub mod sort;
pub mod term;
pub mod value;

use serde::Serialize;
use serde_json::Number;
use thiserror::Error;

use crate::query::descriptor::{QueryType, ResolvedDescriptor, ResolvedQuery};

#[derive(Debug, Error, Clone, PartialEq)]
pub enum CompileError {
    #[error("`{0}` is a required property!")]
    MissingField(String),
    #[error("Invalid argument: {0}")]
    InvalidArgument(String),
    #[error("Invalid identifier: {0}")]
    InvalidIdentifier(String),
}

/// Result type for compile operations
pub type CompileResult<T> = Result<T, CompileError>;

/// A value bound to a statement placeholder
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(untagged)]
pub enum SqlParam {
    Text(String),
    Number(Number),
    Bool(bool),
}

impl SqlParam {
    pub fn as_text(&self) -> String {
        match self {
            SqlParam::Text(s) => s.clone(),
            SqlParam::Number(n) => n.to_string(),
            SqlParam::Bool(b) => b.to_string(),
        }
    }
}

/// Collects bound values while a statement is being built
#[derive(Debug, Default)]
pub struct ParamSet {
    params: Vec<SqlParam>,
}

impl ParamSet {
    pub fn new() -> Self {
        Self::default()
    }

    /// Binds a value and returns the placeholder referring to it
    pub fn bind(&mut self, param: SqlParam) -> String {
        self.params.push(param);
        format!("${}", self.params.len())
    }

    pub fn len(&self) -> usize {
        self.params.len()
    }

    pub fn is_empty(&self) -> bool {
        self.params.is_empty()
    }

    pub fn into_params(self) -> Vec<SqlParam> {
        self.params
    }
}

/// SQL text plus the values for its placeholders
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct Statement {
    #[serde(rename = "statement")]
    pub sql: String,
    #[serde(skip_serializing_if = "Vec::is_empty")]
    pub params: Vec<SqlParam>,
}

impl Statement {
    pub fn new(sql: impl Into<String>, params: ParamSet) -> Self {
        Self {
            sql: sql.into(),
            params: params.into_params(),
        }
    }

    pub fn raw(sql: impl Into<String>) -> Self {
        Self {
            sql: sql.into(),
            params: Vec::new(),
        }
    }
}

/// Side-channel metadata the response assembler needs to reshape rows
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(tag = "kind", rename_all = "camelCase")]
pub enum CustomData {
    Search,
    #[serde(rename_all = "camelCase")]
    Raw {
        query_type: QueryType,
        data_field: Option<String>,
    },
    #[serde(rename_all = "camelCase")]
    Term { data_field: String },
    #[serde(rename_all = "camelCase")]
    Range {
        data_field: Option<String>,
        min_field: Option<String>,
        max_field: Option<String>,
        histogram: bool,
        /// No statement runs; the response for this id is `null`
        empty_response: bool,
    },
}

impl CustomData {
    /// Short label used in logs and metrics
    pub fn kind(&self) -> &'static str {
        match self {
            CustomData::Search => "search",
            CustomData::Raw { .. } => "raw",
            CustomData::Term { .. } => "term",
            CustomData::Range { .. } => "range",
        }
    }
}

/// One compiled descriptor
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct SqlQueryObject {
    #[serde(flatten)]
    pub statement: Option<Statement>,
    pub custom_data: CustomData,
}

/// Joins a computed condition with a caller-supplied `where` fragment
pub(crate) fn merge_where(computed: Option<String>, custom: Option<&str>) -> Option<String> {
    let custom = custom.map(str::trim).filter(|c| !c.is_empty());
    match (computed.filter(|c| !c.is_empty()), custom) {
        (Some(computed), Some(custom)) => Some(format!("({}) AND ({})", computed, custom)),
        (Some(computed), None) => Some(computed),
        (None, Some(custom)) => Some(custom.to_string()),
        (None, None) => None,
    }
}

/// Turns resolved descriptors into statements
#[derive(Debug, Clone, Copy)]
pub struct QueryCompiler {
    with_total_count: bool,
}

impl Default for QueryCompiler {
    fn default() -> Self {
        Self::new()
    }
}

impl QueryCompiler {
    /// Compiler for statements that will be executed
    pub fn new() -> Self {
        Self {
            with_total_count: true,
        }
    }

    /// Compiler for validation-only output, which skips the window count
    /// used for pagination metadata
    pub fn for_validation() -> Self {
        Self {
            with_total_count: false,
        }
    }

    pub fn compile(&self, descriptor: &ResolvedDescriptor) -> CompileResult<SqlQueryObject> {
        match &descriptor.query {
            ResolvedQuery::Raw(raw) => Ok(SqlQueryObject {
                statement: Some(Statement::raw(raw.statement.clone())),
                custom_data: CustomData::Raw {
                    query_type: raw.kind,
                    data_field: raw.data_field.clone(),
                },
            }),
            ResolvedQuery::Search(search) => {
                search::build_search_query(search, self.with_total_count)
            }
            ResolvedQuery::Term(term) => term::build_term_query(term),
            ResolvedQuery::Range(range) => range::build_range_query(range),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::query::descriptor::QueryDescriptor;
    use serde_json::json;

    fn compile(value: serde_json::Value) -> CompileResult<SqlQueryObject> {
        let descriptor: QueryDescriptor = serde_json::from_value(value).unwrap();
        QueryCompiler::new().compile(&descriptor.resolve(None)?)
    }

    #[test]
    fn test_missing_table_fails_for_every_type() {
        for query_type in ["search", "suggestion", "term", "range"] {
            let result = compile(json!({
                "id": "q",
                "type": query_type,
                "dataField": "title",
                "aggregations": ["min"]
            }));
            assert_eq!(result, Err(CompileError::MissingField("table".to_string())));
        }

        let raw = compile(json!({"id": "q", "defaultQuery": {"query": "select 1"}}));
        assert!(matches!(raw, Err(CompileError::MissingField(_))));
    }

    #[test]
    fn test_default_query_is_verbatim() {
        let compiled = compile(json!({
            "id": "q",
            "table": "books",
            "value": "ignored",
            "defaultQuery": {"query": "SELECT * FROM books WHERE id = 7"}
        }))
        .unwrap();
        let statement = compiled.statement.unwrap();
        assert_eq!(statement.sql, "SELECT * FROM books WHERE id = 7");
        assert!(statement.params.is_empty());
    }

    #[test]
    fn test_compilation_is_idempotent() {
        let descriptor: QueryDescriptor = serde_json::from_value(json!({
            "id": "q",
            "table": "books",
            "dataField": ["title", "author"],
            "value": "dune",
            "where": "year > 1960"
        }))
        .unwrap();
        let compiler = QueryCompiler::new();
        let first = compiler.compile(&descriptor.resolve(None).unwrap()).unwrap();
        let second = compiler.compile(&descriptor.resolve(None).unwrap()).unwrap();
        assert_eq!(first, second);
    }

    #[test]
    fn test_serialized_shape() {
        let compiled = compile(json!({
            "id": "q",
            "table": "books",
            "type": "term",
            "dataField": "genre"
        }))
        .unwrap();
        let value = serde_json::to_value(&compiled).unwrap();
        assert!(value["statement"].as_str().unwrap().starts_with("SELECT genre"));
        assert_eq!(value["customData"]["kind"], "term");
        assert_eq!(value["customData"]["dataField"], "genre");
        assert!(value.get("params").is_none());
    }

    #[test]
    fn test_merge_where() {
        assert_eq!(merge_where(None, None), None);
        assert_eq!(merge_where(None, Some("  ")), None);
        assert_eq!(merge_where(Some("a = 1".into()), None), Some("a = 1".into()));
        assert_eq!(merge_where(None, Some("b = 2")), Some("b = 2".into()));
        assert_eq!(
            merge_where(Some("a = 1 OR c = 3".into()), Some("b = 2")),
            Some("(a = 1 OR c = 3) AND (b = 2)".into())
        );
    }

    #[test]
    fn test_param_placeholders_are_positional() {
        let mut params = ParamSet::new();
        assert_eq!(params.bind(SqlParam::Text("a".into())), "$1");
        assert_eq!(params.bind(SqlParam::Bool(true)), "$2");
        assert_eq!(params.len(), 2);
    }
}
