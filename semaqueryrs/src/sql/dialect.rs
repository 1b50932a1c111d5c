//! SQL dialect abstractions.

use crate::model::elements::{DatePart, TimeGranularity};
use crate::model::manifest::{AggregationType, OffsetWindow};
use crate::sql::plan::{SqlFunction, WindowFunction};

/// Dialects render identifiers and primitive expression pieces.
/// Expression tree walking lives in the renderer; the dialect only maps
/// logical constructs to SQL fragments.
pub trait Dialect {
    fn quote_ident(&self, ident: &str) -> String;

    /// Quote each part of a possibly schema-qualified table name.
    fn qualify_table(&self, table: &str) -> String {
        table
            .split('.')
            .map(|part| self.quote_ident(part))
            .collect::<Vec<_>>()
            .join(".")
    }

    fn render_function(&self, func: SqlFunction, args: Vec<String>) -> String {
        match func {
            SqlFunction::Coalesce => format!("COALESCE({})", args.join(", ")),
            SqlFunction::NullIf => format!("NULLIF({})", args.join(", ")),
        }
    }

    fn render_aggregation(&self, agg: AggregationType, expr: &str) -> String {
        match agg {
            AggregationType::Sum => format!("SUM({expr})"),
            AggregationType::Count => format!("COUNT({expr})"),
            AggregationType::CountDistinct => format!("COUNT(DISTINCT {expr})"),
            AggregationType::Min => format!("MIN({expr})"),
            AggregationType::Max => format!("MAX({expr})"),
            AggregationType::Average => format!("AVG({expr})"),
            AggregationType::SumBoolean => format!("SUM(CAST({expr} AS INTEGER))"),
        }
    }

    fn render_window_function(&self, func: WindowFunction, expr: &str) -> String {
        match func {
            WindowFunction::Sum => format!("SUM({expr})"),
            WindowFunction::Min => format!("MIN({expr})"),
            WindowFunction::Max => format!("MAX({expr})"),
        }
    }

    fn render_date_trunc(&self, granularity: TimeGranularity, expr: &str) -> String;

    fn render_extract(&self, date_part: DatePart, expr: &str) -> String;

    fn render_add_interval(&self, expr: &str, window: OffsetWindow) -> String;

    fn render_literal(&self, value: &serde_json::Value) -> String {
        match value {
            serde_json::Value::Null => "NULL".to_string(),
            serde_json::Value::Bool(b) => b.to_string(),
            serde_json::Value::Number(n) => n.to_string(),
            serde_json::Value::String(s) => format!("'{}'", s.replace('\'', "''")),
            serde_json::Value::Array(items) => {
                let rendered: Vec<String> = items.iter().map(|v| self.render_literal(v)).collect();
                rendered.join(", ")
            }
            serde_json::Value::Object(_) => {
                format!("'{}'", value.to_string().replace('\'', "''"))
            }
        }
    }
}

#[derive(Debug, Default, Clone, Copy)]
pub struct DuckDbDialect;

impl Dialect for DuckDbDialect {
    fn quote_ident(&self, ident: &str) -> String {
        format!("\"{}\"", ident.replace('"', "\"\""))
    }

    fn render_date_trunc(&self, granularity: TimeGranularity, expr: &str) -> String {
        format!("DATE_TRUNC('{granularity}', {expr})")
    }

    fn render_extract(&self, date_part: DatePart, expr: &str) -> String {
        let field = match date_part {
            DatePart::Dow => "isodow",
            other => other.as_str(),
        };
        format!("EXTRACT({field} FROM {expr})")
    }

    fn render_add_interval(&self, expr: &str, window: OffsetWindow) -> String {
        format!("{expr} + INTERVAL {} {}", window.count, window.granularity)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn duckdb_quotes_and_escapes_identifiers() {
        assert_eq!(DuckDbDialect.quote_ident("subq_0"), "\"subq_0\"");
        assert_eq!(DuckDbDialect.quote_ident("a\"b"), "\"a\"\"b\"");
        assert_eq!(DuckDbDialect.qualify_table("main.fct_bookings"), "\"main\".\"fct_bookings\"");
    }

    #[test]
    fn duckdb_time_functions() {
        assert_eq!(
            DuckDbDialect.render_date_trunc(TimeGranularity::Month, "ds"),
            "DATE_TRUNC('month', ds)"
        );
        assert_eq!(
            DuckDbDialect.render_extract(DatePart::Dow, "ds"),
            "EXTRACT(isodow FROM ds)"
        );
        assert_eq!(
            DuckDbDialect.render_add_interval(
                "ds",
                OffsetWindow {
                    count: 2,
                    granularity: TimeGranularity::Week
                }
            ),
            "ds + INTERVAL 2 week"
        );
    }

    #[test]
    fn aggregations() {
        assert_eq!(
            DuckDbDialect.render_aggregation(AggregationType::CountDistinct, "user_id"),
            "COUNT(DISTINCT user_id)"
        );
        assert_eq!(
            DuckDbDialect.render_aggregation(AggregationType::SumBoolean, "is_instant"),
            "SUM(CAST(is_instant AS INTEGER))"
        );
    }
}
