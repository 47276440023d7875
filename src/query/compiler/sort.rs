use crate::query::descriptor::{SearchQuery, SortOrder, VectorSearch};

/// Tokens following `ORDER BY` for a plain sort. The sort field falls back
/// to the first data field; with neither there is no sorting.
pub fn build_sort_clause(
    sort_field: Option<&str>,
    sort_by: SortOrder,
    data_fields: &[String],
) -> Vec<String> {
    let field = match sort_field {
        Some(field) => field,
        None => match data_fields.first() {
            Some(field) => field.as_str(),
            None => return Vec::new(),
        },
    };
    vec![field.to_string(), sort_by.as_sql().to_string()]
}

/// Tokens following `ORDER BY` for nearest-neighbour ordering
pub fn build_vector_clause(vector: &VectorSearch) -> Vec<String> {
    let components: Vec<String> = vector.vector.iter().map(f64::to_string).collect();
    vec![
        vector.field.clone(),
        "<->".to_string(),
        format!("'[{}]'", components.join(",")),
    ]
}

/// The ordering of a search: vector distance when requested, the sort
/// clause otherwise. The two are never combined.
pub fn build_order_clause(search: &SearchQuery) -> Vec<String> {
    match &search.vector {
        Some(vector) => build_vector_clause(vector),
        None => build_sort_clause(
            search.sort_field.as_deref(),
            search.sort_by,
            &search.data_fields,
        ),
    }
}
