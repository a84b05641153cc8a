//! Response Composer
//!
//! Turns a query result into the answer text and, when asked for or implied by the
//! question wording, a chart specification.

use super::types::{ChartKind, ChartPoint, ChartSpec, ComposedAnswer, QueryResult};
use crate::catalog::{SchemaCatalog, SemanticType};
use crate::text;
use serde_json::Value;
use std::sync::Arc;

/// Rows quoted in the text of a multi-row answer
const PREVIEW_ROWS: usize = 5;
const PIE_MAX_SLICES: usize = 10;
const BAR_MAX_BARS: usize = 15;
const HISTOGRAM_BINS: usize = 10;

pub const NO_DATA_MESSAGE: &str = "No matching data was found in the election results.";

/// Chart kind implied by the wording of a question
pub fn chart_from_wording(question: &str) -> Option<ChartKind> {
    let q = text::normalize(question);
    let has = |words: &[&str]| words.iter().any(|w| text::contains_phrase(&q, w));
    let pie: &[&str] = &["CAMEMBERT", "PIE"];
    let histogram: &[&str] = &["HISTOGRAMME", "HISTOGRAM", "DISTRIBUTION"];
    let bar: &[&str] = &["GRAPHIQUE", "GRAPHE", "BARRE", "BARRES", "BAR", "CHART", "REPARTITION", "TOP"];

    if has(pie) {
        Some(ChartKind::Pie)
    } else if has(histogram) {
        Some(ChartKind::Histogram)
    } else if has(bar) {
        Some(ChartKind::Bar)
    } else {
        None
    }
}

/// Group the integer part of a number by thousands
fn group_thousands(digits: &str) -> String {
    let mut grouped = String::with_capacity(digits.len() + digits.len() / 3);
    for (i, c) in digits.chars().enumerate() {
        if i > 0 && (digits.len() - i) % 3 == 0 {
            grouped.push(' ');
        }
        grouped.push(c);
    }
    grouped
}

fn format_number(value: f64, decimals: usize) -> String {
    let formatted = format!("{:.*}", decimals, value.abs());
    let (int_part, frac_part) = match formatted.split_once('.') {
        Some((i, f)) => (i, Some(f)),
        None => (formatted.as_str(), None),
    };
    let mut out = String::new();
    if value < 0.0 && formatted.chars().any(|c| c != '0' && c != '.') {
        out.push('-');
    }
    out.push_str(&group_thousands(int_part));
    if let Some(frac) = frac_part {
        out.push('.');
        out.push_str(frac);
    }
    out
}

fn humanize(column: &str) -> String {
    let spaced = column.replace('_', " ");
    let mut chars = spaced.chars();
    match chars.next() {
        Some(first) => first.to_uppercase().chain(chars).collect(),
        None => spaced,
    }
}

pub struct ResponseComposer {
    catalog: Arc<SchemaCatalog>,
}

impl ResponseComposer {
    pub fn new(catalog: Arc<SchemaCatalog>) -> Self {
        Self { catalog }
    }

    pub fn compose(
        &self,
        question: &str,
        result: QueryResult,
        sql: &str,
        chart: Option<ChartKind>,
        best_effort: bool,
    ) -> ComposedAnswer {
        let mut text = self.text(&result);
        if best_effort && !result.is_empty() {
            text = format!(
                "Several records matched and none was chosen, so all of them are listed.\n{}",
                text
            );
        }

        let chart = chart
            .or_else(|| chart_from_wording(question))
            .and_then(|kind| self.chart(&result, kind));

        ComposedAnswer {
            text,
            data: result,
            chart,
            sql: sql.to_string(),
            best_effort,
        }
    }

    /// Answer text for a result
    pub fn text(&self, result: &QueryResult) -> String {
        if result.is_empty() {
            return NO_DATA_MESSAGE.to_string();
        }

        if let [row] = result.rows.as_slice() {
            return self.describe_row(&result.columns, row, ": ", "; ");
        }

        let mut lines = vec![format!(
            "{} results{}:",
            result.row_count,
            if result.truncated { " (list truncated)" } else { "" }
        )];
        for row in result.rows.iter().take(PREVIEW_ROWS) {
            lines.push(format!("- {}", self.describe_row(&result.columns, row, ": ", ", ")));
        }
        if result.row_count > PREVIEW_ROWS {
            lines.push(format!("... and {} more.", result.row_count - PREVIEW_ROWS));
        }
        lines.join("\n")
    }

    fn describe_row(&self, columns: &[String], row: &[Value], pair_sep: &str, sep: &str) -> String {
        columns
            .iter()
            .zip(row)
            .map(|(column, value)| {
                format!("{}{}{}", humanize(column), pair_sep, self.format_value(column, value))
            })
            .collect::<Vec<_>>()
            .join(sep)
    }

    /// Format a cell according to the semantic type of its column
    pub fn format_value(&self, column: &str, value: &Value) -> String {
        let semantic = self.catalog.semantic_type_of(column);
        match value {
            Value::Null => "n/a".to_string(),
            Value::Bool(b) => (if *b { "yes" } else { "no" }).to_string(),
            Value::String(s) => s.clone(),
            Value::Number(n) => {
                let v = n.as_f64().unwrap_or_default();
                match semantic {
                    Some(SemanticType::Percentage) => format!("{}%", format_number(v, 2)),
                    Some(SemanticType::Flag) => (if v != 0.0 { "yes" } else { "no" }).to_string(),
                    _ if v.fract() == 0.0 => format_number(v, 0),
                    _ => format_number(v, 2),
                }
            }
            other => other.to_string(),
        }
    }

    /// Chart for a result, `None` when the data does not fit the chart shape
    pub fn chart(&self, result: &QueryResult, kind: ChartKind) -> Option<ChartSpec> {
        if result.rows.len() < 2 {
            return None;
        }

        let first = &result.rows[0];
        let value_idx = first.iter().position(|v| v.is_number())?;
        let value_field = result.columns.get(value_idx)?.clone();

        // A histogram only needs the values
        if kind == ChartKind::Histogram {
            let values: Vec<f64> = result
                .rows
                .iter()
                .filter_map(|row| row.get(value_idx)?.as_f64())
                .collect();
            return Some(ChartSpec {
                kind,
                x_field: value_field,
                y_field: "count".to_string(),
                data: histogram(&values),
            });
        }

        let label_idx = first.iter().position(|v| v.is_string())?;
        let label_field = result.columns.get(label_idx)?.clone();
        let cap = if kind == ChartKind::Pie {
            PIE_MAX_SLICES
        } else {
            BAR_MAX_BARS
        };
        let data = result
            .rows
            .iter()
            .filter_map(|row| {
                let label = row.get(label_idx)?.as_str()?.to_string();
                let value = row.get(value_idx)?.as_f64()?;
                Some(ChartPoint { label, value })
            })
            .take(cap)
            .collect();

        Some(ChartSpec {
            kind,
            x_field: label_field,
            y_field: value_field,
            data,
        })
    }
}

/// Equal-width bins over the value range
fn histogram(values: &[f64]) -> Vec<ChartPoint> {
    let min = values.iter().copied().fold(f64::INFINITY, f64::min);
    let max = values.iter().copied().fold(f64::NEG_INFINITY, f64::max);
    if values.is_empty() {
        return Vec::new();
    }
    if max <= min {
        return vec![ChartPoint {
            label: format_number(min, 0),
            value: values.len() as f64,
        }];
    }

    let width = (max - min) / HISTOGRAM_BINS as f64;
    let mut counts = [0usize; HISTOGRAM_BINS];
    for v in values {
        let bin = (((v - min) / width) as usize).min(HISTOGRAM_BINS - 1);
        counts[bin] += 1;
    }

    counts
        .iter()
        .enumerate()
        .map(|(i, count)| {
            let lower = min + width * i as f64;
            let upper = lower + width;
            ChartPoint {
                label: format!("{} to {}", format_number(lower, 0), format_number(upper, 0)),
                value: *count as f64,
            }
        })
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::catalog::test_catalog;
    use pretty_assertions::assert_eq;
    use serde_json::json;

    fn composer() -> ResponseComposer {
        ResponseComposer::new(Arc::new(test_catalog()))
    }

    fn party_votes(n: usize) -> QueryResult {
        QueryResult::new(
            vec!["parti_standardized".to_string(), "total_voix".to_string()],
            (0..n)
                .map(|i| vec![json!(format!("P{}", i)), json!(1_000 * (n - i))])
                .collect(),
        )
    }

    #[test]
    fn test_empty_result_says_so() {
        let result = QueryResult::new(vec!["total_voix".to_string()], vec![]);
        let answer = composer().compose("Voix à Tiapoum", result, "SELECT 1", None, false);
        assert_eq!(answer.text, NO_DATA_MESSAGE);
        assert!(answer.chart.is_none());
    }

    #[test]
    fn test_single_value_answer() {
        let result = QueryResult::new(vec!["total_voix".to_string()], vec![vec![json!(1234567)]]);
        assert_eq!(composer().text(&result), "Total voix: 1 234 567");

        let result = QueryResult::new(vec!["taux_participation".to_string()], vec![vec![json!(35.04)]]);
        assert_eq!(composer().text(&result), "Taux participation: 35.04%");
    }

    #[test]
    fn test_multi_row_answer_lists_a_preview() {
        let text = composer().text(&party_votes(7));
        let lines: Vec<&str> = text.lines().collect();
        assert_eq!(lines[0], "7 results:");
        assert_eq!(lines[1], "- Parti standardized: P0, Total voix: 7 000");
        assert_eq!(lines.len(), 1 + PREVIEW_ROWS + 1);
        assert_eq!(lines[6], "... and 2 more.");
    }

    #[test]
    fn test_flags_and_nulls() {
        let c = composer();
        assert_eq!(c.format_value("est_elu", &json!(1)), "yes");
        assert_eq!(c.format_value("score", &Value::Null), "n/a");
        assert_eq!(c.format_value("moyenne", &json!(12.3456)), "12.35");
    }

    #[test]
    fn test_chart_from_wording() {
        assert_eq!(chart_from_wording("Camembert des sièges par parti"), Some(ChartKind::Pie));
        assert_eq!(chart_from_wording("Histogramme des scores"), Some(ChartKind::Histogram));
        assert_eq!(chart_from_wording("Top 10 des candidats"), Some(ChartKind::Bar));
        assert_eq!(chart_from_wording("Combien de voix pour le RHDP ?"), None);
    }

    #[test]
    fn test_chart_caps() {
        let c = composer();
        let pie = c.chart(&party_votes(30), ChartKind::Pie).unwrap();
        assert_eq!(pie.data.len(), PIE_MAX_SLICES);
        assert_eq!(pie.x_field, "parti_standardized");
        assert_eq!(pie.y_field, "total_voix");

        let bar = c.chart(&party_votes(30), ChartKind::Bar).unwrap();
        assert_eq!(bar.data.len(), BAR_MAX_BARS);
        assert_eq!(bar.data[0], ChartPoint { label: "P0".to_string(), value: 30_000.0 });
    }

    #[test]
    fn test_histogram_bins_cover_every_row() {
        let chart = composer().chart(&party_votes(25), ChartKind::Histogram).unwrap();
        assert_eq!(chart.data.len(), HISTOGRAM_BINS);
        let total: f64 = chart.data.iter().map(|p| p.value).sum();
        assert_eq!(total, 25.0);
        assert_eq!(chart.y_field, "count");
    }

    #[test]
    fn test_chart_needs_two_rows_and_a_label() {
        let c = composer();
        assert!(c.chart(&party_votes(1), ChartKind::Bar).is_none());

        let numbers_only = QueryResult::new(
            vec!["voix".to_string()],
            vec![vec![json!(1)], vec![json!(2)]],
        );
        assert!(c.chart(&numbers_only, ChartKind::Bar).is_none());
        assert!(c.chart(&numbers_only, ChartKind::Pie).is_none());
    }

    #[test]
    fn test_histogram_of_a_numeric_column() {
        let votes = QueryResult::new(
            vec!["voix".to_string()],
            (0..20).map(|i| vec![json!(i * 100)]).collect(),
        );
        let chart = composer().chart(&votes, ChartKind::Histogram).unwrap();
        assert_eq!(chart.x_field, "voix");
        assert_eq!(chart.y_field, "count");
        assert_eq!(chart.data.len(), HISTOGRAM_BINS);
        let total: f64 = chart.data.iter().map(|p| p.value).sum();
        assert_eq!(total, 20.0);
    }

    #[test]
    fn test_explicit_chart_overrides_wording() {
        let answer = composer().compose(
            "Camembert des voix par parti",
            party_votes(3),
            "SELECT 1",
            Some(ChartKind::Bar),
            false,
        );
        assert_eq!(answer.chart.unwrap().kind, ChartKind::Bar);
    }

    #[test]
    fn test_best_effort_answers_say_so() {
        let answer = composer().compose("Voix à Tiapoum", party_votes(2), "SELECT 1", None, true);
        assert!(answer.best_effort);
        assert!(answer.text.starts_with("Several records matched"));
    }
}
