//! Console tables
//!
//! One facts table and one results table per test case, rendered with
//! `comfy-table`.

use colored::*;
use comfy_table::presets::UTF8_FULL;
use comfy_table::{Cell, CellAlignment, Color, ContentArrangement, Table};

use crate::executor::TestCaseResult;

fn base_table(header: Vec<&str>) -> Table {
    let mut table = Table::new();
    table
        .load_preset(UTF8_FULL)
        .set_content_arrangement(ContentArrangement::Dynamic)
        .set_header(header);
    table
}

pub fn facts_table(case: &TestCaseResult) -> Table {
    let mut table = base_table(vec!["Test case", "Value"]);
    for fact in &case.facts {
        table.add_row(vec![Cell::new(fact.title), Cell::new(fact.value.to_string())]);
    }
    table
}

/// Value, error, unit and relative error in percent.
pub fn results_table(case: &TestCaseResult) -> Table {
    let mut table = base_table(vec!["Measure", "Value", "Error", "Unit", "Rel. error"]);
    for row in &case.rows {
        let m = &row.measure;
        table.add_row(vec![
            Cell::new(row.title),
            Cell::new(m.value()).set_alignment(CellAlignment::Right),
            Cell::new(m.error()).set_alignment(CellAlignment::Right),
            Cell::new(m.unit()),
            Cell::new(format!("{:.2}%", m.relerr() * 100.0)).set_alignment(CellAlignment::Right),
        ]);
    }

    let code = case.error_code();
    let color = if case.is_success() { Color::Green } else { Color::Red };
    table.add_row(vec![Cell::new("return code"), Cell::new(code).fg(color)]);
    table
}

pub fn print_case(case: &TestCaseResult) {
    let status = if case.is_success() {
        "✅".to_string()
    } else {
        format!("❌ {}", case.error_code()).red().to_string()
    };
    println!(
        "\n{} {} using {} on {} {}",
        "▸".bold().cyan(),
        case.operation.bold(),
        case.label,
        case.vector,
        status
    );
    println!("{}", facts_table(case));
    println!("{}", results_table(case));
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::executor::{derive_measures, pool, Fact, PerThreadResult};
    use crate::operation::FailureKind;
    use crate::stats::TimerEpsilon;

    fn case(results: Vec<PerThreadResult>) -> TestCaseResult {
        let timer = TimerEpsilon {
            resolution_ns: 30.0,
            error_ns: 2.0,
        };
        let run = pool(results, 5.0).unwrap();
        let rows = match &run.statistics {
            Some(stats) => derive_measures(stats, run.wallclock_ms, &timer, 1, 16),
            None => Vec::new(),
        };
        TestCaseResult {
            operation: "rand".into(),
            label: "rng".into(),
            vector: "testvec0016".into(),
            facts: vec![Fact {
                title: "algorithm",
                key: "algorithm",
                value: "rand".into(),
            }],
            rows,
            run,
            capture_datapoints: false,
        }
    }

    #[test]
    fn results_table_lists_every_row() {
        let case = case(vec![PerThreadResult::succeeded(vec![1.0, 1.2, 0.9, 1.1])]);
        let rendered = results_table(&case).to_string();
        assert!(rendered.contains("latency, average"));
        assert!(rendered.contains("global TPS, average"));
        assert!(rendered.contains("CKR_OK"));
        assert!(facts_table(&case).to_string().contains("algorithm"));
    }

    #[test]
    fn failed_case_shows_code() {
        let case = case(vec![PerThreadResult::failed(FailureKind::ObjectNotFound)]);
        assert!(results_table(&case).to_string().contains("CKR_OBJECT_NOT_FOUND"));
    }
}
