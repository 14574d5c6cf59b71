//! tsqllint report parsing.
//!
//! tsqllint prints one finding per line:
//!
//! ```text
//! <path>(<line>,<col>): <severity> <rule> : <message>
//! ```
//!
//! `path` ends just before the first `(line,col):` group after which the rest
//! of the line also matches. `line` is 1-based and unsigned, `col` is 1-based
//! and may be zero or negative. `severity` is a single word, `rule` contains no
//! colon. Lines that do not match (banners, summaries, blank lines) are skipped.

use std::path::Path;

use tsqlls_types::{DiagnosticSeverity, LintDiagnostic, Position, Range};

use crate::workspace::{comparison_key, resolve_against};

/// One matched report line, before any path filtering or position mapping.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ReportEntry<'a> {
    pub path: &'a str,
    /// 1-based.
    pub line: u64,
    /// 1-based; values `<= 0` mean "start of line".
    pub column: i64,
    pub severity: &'a str,
    /// Verbatim, including any whitespace the grammar leaves attached.
    pub rule: &'a str,
    pub message: &'a str,
}

/// Parse a tsqllint report into diagnostics for one document.
///
/// Entries whose path, resolved against `working_dir`, is not `target` are
/// dropped: the tool also reports on files it reaches transitively. Positions
/// are mapped onto `lines`, the live buffer contents. Output order follows the
/// report.
#[must_use]
pub fn parse_report(
    report: &str,
    target: &Path,
    working_dir: &Path,
    lines: &[&str],
) -> Vec<LintDiagnostic> {
    let target_key = comparison_key(&resolve_against(working_dir, target));

    report
        .lines()
        .filter(|line| !line.trim().is_empty())
        .filter_map(parse_line)
        .filter(|entry| {
            comparison_key(&resolve_against(working_dir, Path::new(entry.path))) == target_key
        })
        .map(|entry| to_diagnostic(&entry, lines))
        .collect()
}

/// Match a single report line against the grammar.
#[must_use]
pub fn parse_line(line: &str) -> Option<ReportEntry<'_>> {
    let line = line.strip_suffix('\r').unwrap_or(line);

    // The path is the shortest prefix whose remainder matches.
    line.char_indices()
        .filter(|&(i, c)| c == '(' && i > 0)
        .find_map(|(i, _)| {
            let (path, rest) = line.split_at(i);
            parse_tail(rest).map(|tail| ReportEntry {
                path,
                line: tail.line,
                column: tail.column,
                severity: tail.severity,
                rule: tail.rule,
                message: tail.message,
            })
        })
}

struct Tail<'a> {
    line: u64,
    column: i64,
    severity: &'a str,
    rule: &'a str,
    message: &'a str,
}

/// Match `(<line>,<col>): <severity> <rule> : <message>` against the whole of `rest`.
fn parse_tail(rest: &str) -> Option<Tail<'_>> {
    let rest = rest.strip_prefix('(')?;
    let (line, rest) = split_digits(rest)?;
    let rest = rest.strip_prefix(',')?;
    let (negative, rest) = match rest.strip_prefix('-') {
        Some(after) => (true, after),
        None => (false, rest),
    };
    let (column, rest) = split_digits(rest)?;
    let rest = rest.strip_prefix("):")?;

    let rest = strip_whitespace_run(rest)?;
    let word_len = rest
        .find(|c: char| !is_word_char(c))
        .unwrap_or(rest.len());
    if word_len == 0 {
        return None;
    }
    let (severity, rest) = rest.split_at(word_len);

    // Give whitespace back to the rule only when nothing else can fill it.
    let ws_end = rest.len() - rest.trim_start().len();
    let (rule, message) = rest[..ws_end]
        .char_indices()
        .skip(1)
        .map(|(i, _)| i)
        .chain((ws_end > 0).then_some(ws_end))
        .collect::<Vec<_>>()
        .into_iter()
        .rev()
        .find_map(|start| split_rule_and_message(&rest[start..]))?;

    let line = saturating_parse(line);
    let column = i64::try_from(saturating_parse(column)).unwrap_or(i64::MAX);
    Some(Tail {
        line,
        column: if negative { -column } else { column },
        severity,
        rule,
        message,
    })
}

/// Split `<rule> : <message>` at the first colon.
///
/// The rule is non-empty and the colon is surrounded by at least one
/// whitespace character on each side; the rule keeps any whitespace beyond the
/// single character consumed before the colon.
fn split_rule_and_message(rest: &str) -> Option<(&str, &str)> {
    let colon = rest.find(':')?;
    let (before, after) = (&rest[..colon], &rest[colon + 1..]);

    let last_ws = before.chars().next_back().filter(|c| c.is_whitespace())?;
    let rule = &before[..before.len() - last_ws.len_utf8()];
    if rule.is_empty() {
        return None;
    }

    let trimmed = after.trim_start();
    let ws_len = after.len() - trimmed.len();
    if ws_len == 0 {
        return None;
    }
    let message = if trimmed.is_empty() {
        // A whitespace-only tail still yields a one-character message once a
        // separator character is left over.
        let last = after.chars().next_back()?;
        if after.chars().count() < 2 {
            return None;
        }
        &after[after.len() - last.len_utf8()..]
    } else {
        trimmed
    };

    Some((rule, message))
}

fn split_digits(s: &str) -> Option<(&str, &str)> {
    let len = s
        .find(|c: char| !c.is_ascii_digit())
        .unwrap_or(s.len());
    (len > 0).then(|| s.split_at(len))
}

/// Strip a non-empty run of leading whitespace.
fn strip_whitespace_run(s: &str) -> Option<&str> {
    let trimmed = s.trim_start();
    (trimmed.len() < s.len()).then_some(trimmed)
}

fn is_word_char(c: char) -> bool {
    c.is_ascii_alphanumeric() || c == '_'
}

fn saturating_parse(digits: &str) -> u64 {
    digits.parse().unwrap_or(u64::MAX)
}

fn to_diagnostic(entry: &ReportEntry<'_>, lines: &[&str]) -> LintDiagnostic {
    let line = u32::try_from(entry.line.saturating_sub(1)).unwrap_or(u32::MAX);
    let column = if entry.column <= 0 {
        0
    } else {
        u32::try_from(entry.column - 1).unwrap_or(u32::MAX)
    };

    let line_len = lines
        .get(line as usize)
        .map_or(0, |text| text.encode_utf16().count());
    let line_len = u32::try_from(line_len).unwrap_or(u32::MAX);

    let range = if column >= line_len {
        let end_of_line = Position::new(line, line_len);
        Range::new(end_of_line, end_of_line)
    } else {
        Range::new(Position::new(line, column), Position::new(line, column + 1))
    };

    LintDiagnostic::new(
        DiagnosticSeverity::from_report(entry.severity),
        range,
        entry.rule.to_string(),
        entry.message.to_string(),
    )
}
