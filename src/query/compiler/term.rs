use super::fields::term_count_field;
use super::{
    merge_where, CompileError, CompileResult, CustomData, ParamSet, SqlQueryObject, Statement,
};
use crate::query::descriptor::TermQuery;
use crate::query::response::{parse_count, Bucket, Row};

/// Builds the `GROUP BY` / `COUNT` statement of a term aggregation. Only
/// the first data field is aggregated.
pub fn build_term_query(term: &TermQuery) -> CompileResult<SqlQueryObject> {
    let field = term
        .data_fields
        .first()
        .ok_or_else(|| CompileError::MissingField("dataField".to_string()))?;
    let count_field = term_count_field(field);

    let mut query = vec![
        "SELECT".to_string(),
        format!("{}, COUNT(*) AS {}", field, count_field),
        "FROM".to_string(),
        term.tables.join(", "),
    ];
    if let Some(clause) = merge_where(None, term.where_clause.as_deref()) {
        query.push("WHERE".to_string());
        query.push(clause);
    }
    query.push(format!("GROUP BY {} ORDER BY {} DESC", field, count_field));
    if let Some(size) = term.aggregation_size {
        query.push(format!("LIMIT {}", size));
    }

    Ok(SqlQueryObject {
        statement: Some(Statement::new(query.join(" "), ParamSet::new())),
        custom_data: CustomData::Term {
            data_field: field.clone(),
        },
    })
}

/// One bucket per row, in the order the database returned them
pub fn transform_term_response(rows: &[Row], data_field: &str) -> Vec<Bucket> {
    let count_field = term_count_field(data_field);
    rows.iter()
        .map(|row| Bucket {
            key: row.get(data_field).cloned().unwrap_or_default(),
            doc_count: parse_count(row.get(&count_field)),
        })
        .collect()
}
