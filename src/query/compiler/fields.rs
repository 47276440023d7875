//! Column aliases shared by the statement builders and the response
//! assembler.

/// Window count attached to every search row for pagination
pub const TOTAL_COUNT_FIELD: &str = "rs__total_count";

pub const MIN_FIELD: &str = "rs__overall_min_year";
pub const MAX_FIELD: &str = "rs__overall_max_year";

pub const HISTOGRAM_KEY_FIELD: &str = "rs__key";
pub const HISTOGRAM_COUNT_FIELD: &str = "rs__doc_count";

/// Name of the min/max CTE wrapped around histogram statements
pub const OVERALL_STATS_CTE: &str = "OverallStats";

/// Alias of the count column for a term aggregation on `field`
pub fn term_count_field(field: &str) -> String {
    let field: String = field
        .chars()
        .map(|c| if c.is_ascii_alphanumeric() { c } else { '_' })
        .collect();
    format!("rs__term_count_{}", field)
}
