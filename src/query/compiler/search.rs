use super::fields::TOTAL_COUNT_FIELD;
use super::sort::build_order_clause;
use super::value::{build_value_clause, ValueFilter};
use super::{merge_where, CompileResult, CustomData, ParamSet, SqlQueryObject, Statement};
use crate::query::descriptor::SearchQuery;

/// Builds the statement of a search or suggestion descriptor.
/// `with_total_count` adds the window count used for pagination metadata.
pub fn build_search_query(
    search: &SearchQuery,
    with_total_count: bool,
) -> CompileResult<SqlQueryObject> {
    let mut params = ParamSet::new();

    let mut select = search.include_fields.join(", ");
    if with_total_count {
        select.push_str(&format!(", COUNT(*) OVER() AS {}", TOTAL_COUNT_FIELD));
    }
    let mut query = vec![
        "SELECT".to_string(),
        select,
        "FROM".to_string(),
        search.tables.join(", "),
    ];

    let value_tokens = build_value_clause(
        search.value.as_ref().map(ValueFilter::Contains),
        &search.data_fields,
        search.query_format,
        &mut params,
    )?;
    let computed = (!value_tokens.is_empty()).then(|| value_tokens.join(" "));
    if let Some(clause) = merge_where(computed, search.where_clause.as_deref()) {
        query.push("WHERE".to_string());
        query.push(clause);
    }

    let order = build_order_clause(search);
    if !order.is_empty() {
        query.push("ORDER BY".to_string());
        query.extend(order);
    }

    query.push(format!("LIMIT {}", search.size));
    if let Some(from) = search.from {
        query.push(format!("OFFSET {}", from));
    }

    Ok(SqlQueryObject {
        statement: Some(Statement::new(query.join(" "), params)),
        custom_data: CustomData::Search,
    })
}
