use super::range::range_where_clause;
use super::{CompileError, CompileResult, ParamSet, SqlParam};
use crate::query::descriptor::{MatchValue, QueryFormat, RangeValue};

/// How a descriptor's value is matched against its data fields
#[derive(Debug, Clone, Copy)]
pub enum ValueFilter<'a> {
    /// Pattern match, used by search and suggestion
    Contains(&'a MatchValue),
    /// Equality. Term descriptors aggregate without filtering on their own
    /// value, so this serves callers composing their own statements.
    Equals(&'a MatchValue),
    Range(&'a RangeValue),
}

/// Builds the condition tokens that follow `WHERE`. Returns no tokens when
/// there is no value, in which case every row matches.
pub fn build_value_clause(
    filter: Option<ValueFilter<'_>>,
    data_fields: &[String],
    format: QueryFormat,
    params: &mut ParamSet,
) -> CompileResult<Vec<String>> {
    let Some(filter) = filter else {
        return Ok(Vec::new());
    };

    if data_fields.is_empty() {
        return Err(CompileError::InvalidArgument(
            "`dataField` is required when `value` is passed!".to_string(),
        ));
    }

    let conditions = match filter {
        ValueFilter::Contains(value) => {
            let placeholders: Vec<String> = value
                .params()
                .into_iter()
                .map(|p| params.bind(SqlParam::Text(format!("%{}%", p.as_text()))))
                .collect();
            data_fields
                .iter()
                .flat_map(|field| {
                    placeholders
                        .iter()
                        .map(move |p| vec![field.clone(), "LIKE".to_string(), p.clone()])
                })
                .collect::<Vec<_>>()
        }
        ValueFilter::Equals(value) => {
            let (operator, operand) = match value {
                MatchValue::Single(param) => ("=", params.bind(param.clone())),
                MatchValue::Many(values) => {
                    let placeholders: Vec<String> =
                        values.iter().map(|p| params.bind(p.clone())).collect();
                    ("IN", format!("({})", placeholders.join(", ")))
                }
            };
            data_fields
                .iter()
                .map(|field| vec![field.clone(), operator.to_string(), operand.clone()])
                .collect()
        }
        ValueFilter::Range(value) => {
            // Range filters apply to the first data field only
            vec![vec![range_where_clause(&data_fields[0], value, params)]]
        }
    };

    let mut tokens = Vec::new();
    let last = conditions.len().saturating_sub(1);
    for (index, condition) in conditions.into_iter().enumerate() {
        tokens.extend(condition);
        if index != last {
            tokens.push(format.as_sql().to_string());
        }
    }
    Ok(tokens)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::query::descriptor::RangeBound;

    fn fields(names: &[&str]) -> Vec<String> {
        names.iter().map(|s| s.to_string()).collect()
    }

    fn text(s: &str) -> SqlParam {
        SqlParam::Text(s.to_string())
    }

    #[test]
    fn test_no_value_yields_no_tokens() {
        let mut params = ParamSet::new();
        let tokens = build_value_clause(None, &[], QueryFormat::Or, &mut params).unwrap();
        assert!(tokens.is_empty());
        assert!(params.is_empty());
    }

    #[test]
    fn test_value_without_data_field() {
        let value = MatchValue::Single(text("dune"));
        let mut params = ParamSet::new();
        let result = build_value_clause(
            Some(ValueFilter::Contains(&value)),
            &[],
            QueryFormat::Or,
            &mut params,
        );
        assert!(matches!(result, Err(CompileError::InvalidArgument(_))));
    }

    #[test]
    fn test_contains_reuses_one_placeholder() {
        let value = MatchValue::Single(text("dune"));
        let mut params = ParamSet::new();
        let tokens = build_value_clause(
            Some(ValueFilter::Contains(&value)),
            &fields(&["title", "author"]),
            QueryFormat::And,
            &mut params,
        )
        .unwrap();
        assert_eq!(tokens.join(" "), "title LIKE $1 AND author LIKE $1");
        assert_eq!(params.into_params(), vec![text("%dune%")]);
    }

    #[test]
    fn test_contains_array_value() {
        let value = MatchValue::Many(vec![text("a"), text("b")]);
        let mut params = ParamSet::new();
        let tokens = build_value_clause(
            Some(ValueFilter::Contains(&value)),
            &fields(&["title"]),
            QueryFormat::Or,
            &mut params,
        )
        .unwrap();
        assert_eq!(tokens.join(" "), "title LIKE $1 OR title LIKE $2");
    }

    #[test]
    fn test_equals_single_and_many() {
        let single = MatchValue::Single(text("scifi"));
        let mut params = ParamSet::new();
        let tokens = build_value_clause(
            Some(ValueFilter::Equals(&single)),
            &fields(&["genre", "tag"]),
            QueryFormat::Or,
            &mut params,
        )
        .unwrap();
        assert_eq!(tokens.join(" "), "genre = $1 OR tag = $1");

        let many = MatchValue::Many(vec![text("a"), text("b")]);
        let mut params = ParamSet::new();
        let tokens = build_value_clause(
            Some(ValueFilter::Equals(&many)),
            &fields(&["genre"]),
            QueryFormat::Or,
            &mut params,
        )
        .unwrap();
        assert_eq!(tokens.join(" "), "genre IN ($1, $2)");
        assert_eq!(params.len(), 2);
    }

    #[test]
    fn test_range_uses_first_field() {
        let value = RangeValue {
            start: Some(RangeBound::Number(1980.into())),
            end: Some(RangeBound::Number(2018.into())),
        };
        let mut params = ParamSet::new();
        let tokens = build_value_clause(
            Some(ValueFilter::Range(&value)),
            &fields(&["year", "other"]),
            QueryFormat::Or,
            &mut params,
        )
        .unwrap();
        assert_eq!(tokens, vec!["year between 1980 and 2018"]);
    }
}
