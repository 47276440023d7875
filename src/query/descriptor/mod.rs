//! Query descriptors as they arrive on the wire, and their resolution into
//! one of the compiler's query variants.
//!
//! A [`QueryDescriptor`] is never modified after deserialization. Every
//! default the compiler relies on is applied while building the
//! [`ResolvedQuery`], so compiling the same descriptor twice always yields
//! the same statement.

pub mod resolved;
pub mod validator;

pub use resolved::{
    MatchValue, RangeBound, RangeQuery, RangeValue, RawQuery, ResolvedDescriptor, ResolvedQuery,
    SearchQuery, SortOrder, TermQuery, VectorSearch,
};
pub use validator::{DescriptorValidator, SchemaValidator};

use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::query::compiler::{CompileError, CompileResult};

/// Default page size for search queries
pub const DEFAULT_SIZE: u64 = 10;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum QueryType {
    #[default]
    Search,
    Suggestion,
    Term,
    Range,
}

impl QueryType {
    pub fn as_str(&self) -> &'static str {
        match self {
            QueryType::Search => "search",
            QueryType::Suggestion => "suggestion",
            QueryType::Term => "term",
            QueryType::Range => "range",
        }
    }
}

/// Boolean operator placed between the conditions of several data fields
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum QueryFormat {
    #[default]
    Or,
    And,
}

impl QueryFormat {
    pub fn as_sql(&self) -> &'static str {
        match self {
            QueryFormat::Or => "OR",
            QueryFormat::And => "AND",
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Aggregation {
    Min,
    Max,
    Histogram,
}

/// One or more source relations
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum TableRef {
    One(String),
    Many(Vec<String>),
}

impl TableRef {
    pub fn names(&self) -> Vec<String> {
        match self {
            TableRef::One(name) => vec![name.clone()],
            TableRef::Many(names) => names.clone(),
        }
    }
}

/// A data field entry, either a bare column name or a weighted one
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum DataFieldEntry {
    Name(String),
    Weighted {
        field: String,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        weight: Option<f64>,
    },
}

impl DataFieldEntry {
    pub fn field(&self) -> &str {
        match self {
            DataFieldEntry::Name(name) => name,
            DataFieldEntry::Weighted { field, .. } => field,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum DataField {
    One(String),
    Many(Vec<DataFieldEntry>),
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct DefaultQuery {
    #[serde(default)]
    pub query: Option<String>,
}

/// A single named sub-query of a batch request
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct QueryDescriptor {
    pub id: Option<String>,
    #[serde(alias = "index")]
    pub table: Option<TableRef>,
    #[serde(rename = "type")]
    pub query_type: Option<QueryType>,
    pub include_fields: Option<Vec<String>>,
    pub value: Option<Value>,
    pub data_field: Option<DataField>,
    pub query_format: Option<QueryFormat>,
    pub sort_field: Option<String>,
    pub sort_by: Option<String>,
    #[serde(rename = "where")]
    pub where_clause: Option<String>,
    pub size: Option<u64>,
    pub from: Option<u64>,
    pub default_query: Option<DefaultQuery>,
    pub execute: Option<bool>,
    pub vector_data_field: Option<String>,
    pub query_vector: Option<Vec<f64>>,
    pub aggregations: Option<Vec<Aggregation>>,
    pub interval: Option<f64>,
    pub aggregation_size: Option<u64>,
}

/// Flattens a data field specification into plain column names, dropping
/// any weights.
pub fn parse_data_fields(data_field: Option<&DataField>) -> Vec<String> {
    match data_field {
        None => Vec::new(),
        Some(DataField::One(name)) => vec![name.clone()],
        Some(DataField::Many(entries)) => entries.iter().map(|e| e.field().to_string()).collect(),
    }
}

/// Rejects identifiers that could break out of their position in a statement
pub fn check_identifier(name: &str) -> CompileResult<()> {
    let suspicious = name.is_empty()
        || name.contains(['\'', '"', ';', '\\'])
        || name.chars().any(char::is_whitespace)
        || name.contains("--")
        || name.contains("/*");
    if suspicious {
        return Err(CompileError::InvalidIdentifier(name.to_string()));
    }
    Ok(())
}

fn check_identifiers(names: &[String]) -> CompileResult<()> {
    names.iter().try_for_each(|name| check_identifier(name))
}

impl QueryDescriptor {
    pub fn query_type(&self) -> QueryType {
        self.query_type.unwrap_or_default()
    }

    /// Whether the descriptor takes part in compilation and execution
    pub fn should_execute(&self) -> bool {
        self.execute.unwrap_or(true)
    }

    pub fn id(&self) -> &str {
        self.id.as_deref().unwrap_or_default()
    }

    /// Source relations, failing when none were given
    pub fn tables(&self) -> CompileResult<Vec<String>> {
        let tables: Vec<String> = self
            .table
            .as_ref()
            .map(TableRef::names)
            .unwrap_or_default()
            .into_iter()
            .filter(|t| !t.is_empty())
            .collect();
        if tables.is_empty() {
            return Err(CompileError::MissingField("table".to_string()));
        }
        check_identifiers(&tables)?;
        Ok(tables)
    }

    pub fn data_fields(&self) -> Vec<String> {
        parse_data_fields(self.data_field.as_ref())
    }

    /// Whether an embedding should be fetched for this descriptor's value
    pub fn wants_embedding(&self) -> bool {
        self.vector_data_field.is_some()
            && self.query_vector.is_none()
            && matches!(self.query_type(), QueryType::Search | QueryType::Suggestion)
            && self.value_text().is_some()
    }

    /// The value as plain text, if it is a non-empty string
    pub fn value_text(&self) -> Option<&str> {
        self.value.as_ref().and_then(Value::as_str).filter(|v| !v.is_empty())
    }

    /// Derives the compiler's view of the descriptor with every default
    /// applied. `embedded` is a query vector fetched for this descriptor,
    /// used only when no explicit `queryVector` was given.
    pub fn resolve(&self, embedded: Option<&[f64]>) -> CompileResult<ResolvedDescriptor> {
        self.resolve_with_size(embedded, DEFAULT_SIZE)
    }

    /// Like [`resolve`](Self::resolve), with a different page size for
    /// search descriptors that carry no `size`
    pub fn resolve_with_size(
        &self,
        embedded: Option<&[f64]>,
        default_size: u64,
    ) -> CompileResult<ResolvedDescriptor> {
        let tables = self.tables()?;
        let data_fields = self.data_fields();
        check_identifiers(&data_fields)?;

        let query = if let Some(statement) = self
            .default_query
            .as_ref()
            .and_then(|d| d.query.clone())
            .filter(|q| !q.trim().is_empty())
        {
            ResolvedQuery::Raw(RawQuery {
                statement,
                kind: self.query_type(),
                data_field: data_fields.first().cloned(),
            })
        } else {
            match self.query_type() {
                QueryType::Search | QueryType::Suggestion => ResolvedQuery::Search(
                    self.resolve_search(tables, data_fields, embedded, default_size)?,
                ),
                QueryType::Term => {
                    // A term's own value filters the queries reacting to it,
                    // not its aggregation, so only its shape is checked here.
                    MatchValue::parse(self.value.as_ref())?;
                    ResolvedQuery::Term(TermQuery {
                        tables,
                        data_fields,
                        where_clause: self.where_clause.clone(),
                        aggregation_size: self.aggregation_size,
                    })
                }
                QueryType::Range => ResolvedQuery::Range(RangeQuery {
                    tables,
                    data_fields,
                    value: RangeValue::parse(self.value.as_ref())?,
                    aggregations: self.aggregations.clone().unwrap_or_default(),
                    interval: self.interval,
                    where_clause: self.where_clause.clone(),
                }),
            }
        };

        Ok(ResolvedDescriptor {
            id: self.id().to_string(),
            query,
        })
    }

    fn resolve_search(
        &self,
        tables: Vec<String>,
        data_fields: Vec<String>,
        embedded: Option<&[f64]>,
        default_size: u64,
    ) -> CompileResult<SearchQuery> {
        let include_fields = match &self.include_fields {
            Some(fields) if !fields.is_empty() => fields.clone(),
            _ => vec!["*".to_string()],
        };
        check_identifiers(&include_fields)?;

        if let Some(field) = &self.sort_field {
            check_identifier(field)?;
        }
        let sort_by = match &self.sort_by {
            Some(order) => SortOrder::parse(order)?,
            None => SortOrder::Asc,
        };

        let vector = match (&self.vector_data_field, &self.query_vector) {
            (Some(field), Some(vector)) => Some((field, vector.clone())),
            (Some(field), None) => embedded.map(|v| (field, v.to_vec())),
            _ => None,
        };
        let vector = match vector {
            Some((field, vector)) if !vector.is_empty() => {
                check_identifier(field)?;
                Some(VectorSearch {
                    field: field.clone(),
                    vector,
                })
            }
            _ => None,
        };

        Ok(SearchQuery {
            tables,
            include_fields,
            data_fields,
            value: MatchValue::parse(self.value.as_ref())?,
            query_format: self.query_format.unwrap_or_default(),
            sort_field: self.sort_field.clone(),
            sort_by,
            vector,
            where_clause: self.where_clause.clone(),
            size: self.size.unwrap_or(default_size),
            from: self.from,
        })
    }
}
