//! Parser for the syscall summary table printed by `strace -c`.
//!
//! ```text
//! % time     seconds  usecs/call     calls    errors syscall
//! ------ ----------- ----------- --------- --------- ----------------
//!  45.00    0.000450          45        10           read
//!  30.00    0.000300          30        10         2 openat
//! ------ ----------- ----------- --------- --------- ----------------
//! 100.00    0.001000                    20         2 total
//! ```

use tracing::debug;

/// Token that opens the closing separator of the table.
pub const REPORT_END: &str = "------";

/// Header lines preceding the syscall rows.
const HEADER_LINES: usize = 2;

/// One syscall row attributed to a traced process.
#[derive(Debug, Clone, PartialEq)]
pub struct SyscallMetric {
    pub pid: u32,
    pub command: String,
    pub syscall: String,
    pub calls: f64,
    pub seconds: f64,
}

#[derive(Debug, PartialEq)]
enum Row<'a> {
    Syscall {
        name: &'a str,
        calls: f64,
        seconds: f64,
    },
    End,
}

/// Parses one table line, `None` for anything that is not a syscall row.
///
/// Rows carry five columns, six when the errors column is filled; the
/// syscall name is always the last one.
fn parse_row(line: &str) -> Option<Row<'_>> {
    let tokens: Vec<&str> = line.split_whitespace().collect();
    if tokens.first() == Some(&REPORT_END) {
        return Some(Row::End);
    }
    let name = match tokens.len() {
        5 => tokens[4],
        6 => tokens[5],
        _ => return None,
    };
    let seconds = tokens[1].parse::<f64>().ok()?;
    let calls = tokens[3].parse::<f64>().ok()?;
    Some(Row::Syscall {
        name,
        calls,
        seconds,
    })
}

/// Extracts per-syscall call counts and seconds from a summary.
///
/// Malformed rows are skipped; parsing stops at the closing separator so
/// the trailing `total` row is never reported.
pub fn parse_summary(text: &str, pid: u32, command: &str) -> Vec<SyscallMetric> {
    let mut metrics = Vec::new();
    for line in text.lines().skip(HEADER_LINES) {
        match parse_row(line) {
            Some(Row::End) => break,
            Some(Row::Syscall {
                name,
                calls,
                seconds,
            }) => metrics.push(SyscallMetric {
                pid,
                command: command.to_string(),
                syscall: name.to_string(),
                calls,
                seconds,
            }),
            None => {
                if !line.trim().is_empty() {
                    debug!(pid, line, "Skipping malformed summary row");
                }
            }
        }
    }
    metrics
}

#[cfg(test)]
mod tests {
    use super::*;

    const SUMMARY: &str = "\
% time     seconds  usecs/call     calls    errors syscall
------ ----------- ----------- --------- --------- ----------------
 45.00    0.000450          45        10           read
 30.00    0.000300          30        10         2 openat
  oops
------ ----------- ----------- --------- --------- ----------------
100.00    0.001000                    20         2 total
";

    #[test]
    fn test_parses_five_and_six_column_rows() {
        let metrics = parse_summary(SUMMARY, 51, "httpd,51");
        assert_eq!(metrics.len(), 2);

        assert_eq!(metrics[0].syscall, "read");
        assert_eq!(metrics[0].calls, 10.0);
        assert!((metrics[0].seconds - 0.00045).abs() < 1e-12);

        assert_eq!(metrics[1].syscall, "openat");
        assert_eq!(metrics[1].calls, 10.0);
        assert_eq!(metrics[1].pid, 51);
        assert_eq!(metrics[1].command, "httpd,51");
    }

    #[test]
    fn test_stops_at_separator_and_skips_total() {
        let metrics = parse_summary(SUMMARY, 1, "x,1");
        assert!(metrics.iter().all(|m| m.syscall != "total"));
    }

    #[test]
    fn test_empty_or_header_only_report() {
        assert!(parse_summary("", 1, "x,1").is_empty());
        let header = "% time     seconds  usecs/call     calls    errors syscall\n\
                      ------ ----------- ----------- --------- --------- ----------------\n";
        assert!(parse_summary(header, 1, "x,1").is_empty());
    }

    #[test]
    fn test_parse_row_rejects_non_numeric_columns() {
        assert_eq!(parse_row("a b c d e"), None);
        assert_eq!(parse_row("------ -----"), Some(Row::End));
        assert_eq!(parse_row(""), None);
    }
}
