//! Console report lines and the markdown summary table.

use std::{fs, io::Write, path::Path};

use candle_core::DType;

use crate::runner::BenchmarkResult;
use crate::shape::ProblemShape;
use crate::HarnessError;

pub const SEPARATOR: &str = "------------------------------------------------------------------------------------------------------------------------";

const RESULTS_HEADER: &str = "# Attention Benchmarks\n\n";

/// `{tag:>25}: [v0, v1, vlast], time:{ms}ms, TFLOPS:{tflops}`.
///
/// The probes are the first two and the last element of the output in its
/// own layout, rounded to 8 decimals.
pub fn format_report_line(result: &BenchmarkResult) -> Result<String, HarnessError> {
    let values = result
        .output
        .to_dtype(DType::F32)?
        .flatten_all()?
        .to_vec1::<f32>()?;
    let probe = |idx: Option<usize>| {
        let value = idx.and_then(|i| values.get(i)).copied().unwrap_or(f32::NAN);
        format!("{:<12}", round8(value))
    };
    Ok(format!(
        "{:>25}: [{}, {}, {}], time:{:.6}ms, TFLOPS:{:<6.2}",
        result.tag,
        probe(Some(0)),
        probe(Some(1)),
        probe(values.len().checked_sub(1)),
        result.mean_ms,
        result.tflops
    ))
}

fn round8(value: f32) -> f64 {
    (value as f64 * 1e8).round() / 1e8
}

/// One row of the end-of-sweep table.
#[derive(Debug, Clone, PartialEq)]
pub struct SummaryRow {
    pub tag: String,
    pub shape: ProblemShape,
    pub mean_ms: f64,
    pub tflops: f64,
    /// `None` when the variant was not certified.
    pub verdict: Option<bool>,
}

impl SummaryRow {
    pub fn from_result(result: &BenchmarkResult, verdict: Option<bool>) -> Self {
        Self {
            tag: result.tag.clone(),
            shape: result.shape,
            mean_ms: result.mean_ms,
            tflops: result.tflops,
            verdict,
        }
    }

    fn cells(&self) -> Vec<String> {
        vec![
            self.tag.clone(),
            self.shape.to_string(),
            format!("{:.4}", self.mean_ms),
            format!("{:.3}", self.tflops),
            match self.verdict {
                Some(true) => "pass".to_string(),
                Some(false) => "FAIL".to_string(),
                None => "-".to_string(),
            },
        ]
    }
}

pub fn summary_table(rows: &[SummaryRow]) -> String {
    let cells: Vec<Vec<String>> = rows.iter().map(SummaryRow::cells).collect();
    format_markdown_table(&["Variant", "Shape", "Mean (ms)", "TFLOPS", "Check"], &cells)
}

pub fn format_markdown_table(headers: &[&str], rows: &[Vec<String>]) -> String {
    let mut table = String::new();
    table.push_str("| ");
    table.push_str(&headers.join(" | "));
    table.push_str(" |\n| ");
    table.push_str(&headers.iter().map(|_| "---").collect::<Vec<_>>().join(" | "));
    table.push_str(" |\n");
    for row in rows {
        table.push_str("| ");
        table.push_str(&row.join(" | "));
        table.push_str(" |\n");
    }
    table
}

/// Replace the `section` block of the markdown file at `path`, appending it
/// when the markers are missing. The file and its parents are created on
/// demand.
pub fn update_results(path: &Path, section: &str, content: &str) -> std::io::Result<()> {
    let section_upper = section.to_uppercase();
    let start_marker = format!("<!-- {section_upper}_START -->");
    let end_marker = format!("<!-- {section_upper}_END -->");

    if let Some(parent) = path.parent().filter(|p| !p.as_os_str().is_empty()) {
        fs::create_dir_all(parent)?;
    }
    let mut body = if path.exists() {
        fs::read_to_string(path)?
    } else {
        RESULTS_HEADER.to_string()
    };

    let block = format!("{start_marker}\n{content}\n{end_marker}\n");
    match (body.find(&start_marker), body.find(&end_marker)) {
        (Some(start), Some(end)) if start < end => {
            let mut end = end + end_marker.len();
            if body[end..].starts_with('\n') {
                end += 1;
            }
            body.replace_range(start..end, &block);
        }
        _ => {
            if !body.ends_with('\n') {
                body.push('\n');
            }
            body.push_str(&block);
        }
    }

    let mut file = fs::File::create(path)?;
    file.write_all(body.as_bytes())?;
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::shape::AxisConvention;
    use candle_core::{Device, Tensor};

    fn result(values: Vec<f32>) -> BenchmarkResult {
        let len = values.len();
        BenchmarkResult {
            tag: "split-q+stage1".to_string(),
            shape: ProblemShape::new(1, 1, len, 1),
            output: Tensor::from_vec(values, (1, 1, len, 1), &Device::Cpu).unwrap(),
            convention: AxisConvention::HeadsMajor,
            mean_ms: 1.5,
            tflops: 0.25,
        }
    }

    #[test]
    fn report_line_layout() {
        let line = format_report_line(&result(vec![0.5, -0.123456789, 0.0, 2.0])).unwrap();
        let expected = format!(
            "{:>25}: [{:<12}, {:<12}, {:<12}], time:1.500000ms, TFLOPS:0.25  ",
            "split-q+stage1", "0.5", "-0.12345679", "2"
        );
        assert_eq!(line, expected);
    }

    #[test]
    fn missing_probe_prints_nan() {
        let line = format_report_line(&result(vec![1.0])).unwrap();
        assert!(line.contains("[1           , NaN         , 1           ]"), "{line}");
    }

    #[test]
    fn summary_table_marks_verdicts() {
        let rows = vec![
            SummaryRow::from_result(&result(vec![1.0, 2.0]), Some(true)),
            SummaryRow::from_result(&result(vec![1.0, 2.0]), Some(false)),
            SummaryRow::from_result(&result(vec![1.0, 2.0]), None),
        ];
        let table = summary_table(&rows);
        let lines: Vec<&str> = table.lines().collect();
        assert_eq!(lines.len(), 5);
        assert_eq!(lines[0], "| Variant | Shape | Mean (ms) | TFLOPS | Check |");
        assert_eq!(lines[1], "| --- | --- | --- | --- | --- |");
        assert!(lines[2].ends_with("| pass |"));
        assert!(lines[3].ends_with("| FAIL |"));
        assert!(lines[4].contains("B=1, H=1, N=2, D=1"));
        assert!(lines[4].ends_with("| - |"));
    }

    #[test]
    fn update_results_appends_then_replaces() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("nested").join("RESULTS.md");

        update_results(&path, "sweep", "first").unwrap();
        let body = fs::read_to_string(&path).unwrap();
        assert!(body.starts_with(RESULTS_HEADER));
        assert!(body.contains("<!-- SWEEP_START -->\nfirst\n<!-- SWEEP_END -->\n"));

        update_results(&path, "other", "kept").unwrap();
        update_results(&path, "sweep", "second").unwrap();
        let body = fs::read_to_string(&path).unwrap();
        assert!(!body.contains("first"));
        assert!(body.contains("<!-- SWEEP_START -->\nsecond\n<!-- SWEEP_END -->\n"));
        assert!(body.contains("<!-- OTHER_START -->\nkept\n<!-- OTHER_END -->\n"));
        assert_eq!(body.matches("SWEEP_START").count(), 1);
    }
}
