// src/results/listfile.rs
//
// =============================================================================
// FLOWCALC: LIST FILE BUDGET PARSER (v 0.3 )
// =============================================================================
//
// Extracts the volumetric budget tables from a MODFLOW list file.
//
// Each budget block looks like:
//
//   VOLUMETRIC BUDGET FOR ENTIRE MODEL AT END OF TIME STEP  1, STRESS PERIOD  1
//        CUMULATIVE VOLUMES      L**3       RATES FOR THIS TIME STEP      L**3/T
//              IN:                                      IN:
//                STORAGE =           0.0000               STORAGE =       0.0000
//               TOTAL IN =         100.0000              TOTAL IN =       1.0000
//             OUT:                                     OUT:
//   ...
//               IN - OUT =           0.0000              IN - OUT =       0.0000
//    PERCENT DISCREPANCY =           0.00     PERCENT DISCREPANCY =       0.00
//
// followed by a TIME SUMMARY block whose TOTAL TIME row carries totim in
// seconds, minutes, hours, days and years.

use std::collections::BTreeMap;
use std::str::FromStr;

const BUDGET_MARKER: &str = "VOLUMETRIC BUDGET FOR ENTIRE MODEL";
const SUMMARY_MARKER: &str = "TIME SUMMARY";
const TOTAL_TIME: &str = "TOTAL TIME";

/// Column of the TIME SUMMARY table used as totim.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum TimeUnit {
    Seconds,
    Minutes,
    Hours,
    #[default]
    Days,
    Years,
}

impl TimeUnit {
    /// From the MODFLOW discretization ITMUNI code. Undefined maps to days.
    pub fn from_itmuni(code: i64) -> Self {
        match code {
            1 => TimeUnit::Seconds,
            2 => TimeUnit::Minutes,
            3 => TimeUnit::Hours,
            5 => TimeUnit::Years,
            _ => TimeUnit::Days,
        }
    }

    fn column(self) -> usize {
        match self {
            TimeUnit::Seconds => 0,
            TimeUnit::Minutes => 1,
            TimeUnit::Hours => 2,
            TimeUnit::Days => 3,
            TimeUnit::Years => 4,
        }
    }
}

/// One budget table of the list file.
#[derive(Debug, Clone, PartialEq)]
pub struct BudgetRecord {
    pub totim: f64,
    /// Zero-based (time step, stress period).
    pub kstpkper: (usize, usize),
    pub cumulative: BTreeMap<String, f64>,
    pub incremental: BTreeMap<String, f64>,
}

#[derive(Clone, Copy, PartialEq)]
enum Flow {
    None,
    In,
    Out,
}

/// Parses every complete budget table. Tables without a following time
/// summary (list file still being written) are dropped.
pub fn parse_budgets(text: &str, unit: TimeUnit) -> Vec<BudgetRecord> {
    let mut records = Vec::new();
    let mut current: Option<BudgetRecord> = None;
    let mut flow = Flow::None;
    let mut in_summary = false;

    for line in text.lines() {
        let upper = line.to_ascii_uppercase();

        if upper.contains(BUDGET_MARKER) {
            current = step_and_period(&upper).map(|kstpkper| BudgetRecord {
                totim: f64::NAN,
                kstpkper,
                cumulative: BTreeMap::new(),
                incremental: BTreeMap::new(),
            });
            flow = Flow::None;
            in_summary = false;
            continue;
        }

        let Some(record) = current.as_mut() else {
            continue;
        };

        if upper.contains(SUMMARY_MARKER) {
            in_summary = true;
            continue;
        }

        if in_summary {
            if let Some(rest) = upper.trim_start().strip_prefix(TOTAL_TIME) {
                let values: Vec<f64> = rest.split_whitespace().filter_map(parse_fortran).collect();
                if let Some(totim) = values.get(unit.column()) {
                    record.totim = *totim;
                    if let Some(done) = current.take() {
                        records.push(done);
                    }
                }
                in_summary = false;
            }
            continue;
        }

        let trimmed = upper.trim();
        if trimmed.starts_with("IN:") {
            flow = Flow::In;
            continue;
        }
        if trimmed.starts_with("OUT:") {
            flow = Flow::Out;
            continue;
        }

        if let Some((name, cumulative, rate)) = budget_line(line) {
            let key = term_name(&name, flow);
            if let Some(v) = cumulative {
                record.cumulative.insert(key.clone(), v);
            }
            if let Some(v) = rate {
                record.incremental.insert(key, v);
            }
        }
    }

    records
}

/// `... TIME STEP    3, STRESS PERIOD   2` → (2, 1)
fn step_and_period(upper: &str) -> Option<(usize, usize)> {
    let number_after = |marker: &str| -> Option<usize> {
        let rest = &upper[upper.find(marker)? + marker.len()..];
        let digits: String = rest
            .trim_start()
            .chars()
            .take_while(|c| c.is_ascii_digit())
            .collect();
        usize::from_str(&digits).ok()
    };
    let kstp = number_after("TIME STEP")?;
    let kper = number_after("STRESS PERIOD")?;
    Some((kstp.checked_sub(1)?, kper.checked_sub(1)?))
}

/// Splits `NAME = cum   NAME = rate` into its name and both values.
fn budget_line(line: &str) -> Option<(String, Option<f64>, Option<f64>)> {
    let parts: Vec<&str> = line.split('=').collect();
    if parts.len() < 2 {
        return None;
    }
    let name = parts[0].trim();
    if name.is_empty() {
        return None;
    }
    let cumulative = parts[1].split_whitespace().next().and_then(parse_fortran);
    let rate = parts
        .get(2)
        .and_then(|p| p.split_whitespace().next())
        .and_then(parse_fortran);
    Some((name.to_string(), cumulative, rate))
}

fn term_name(raw: &str, flow: Flow) -> String {
    let upper = raw.trim().to_ascii_uppercase();
    if upper.replace(' ', "") == "IN-OUT" {
        return "IN-OUT".to_string();
    }
    let base = upper.split_whitespace().collect::<Vec<_>>().join("_");
    if base == "PERCENT_DISCREPANCY" || base.starts_with("TOTAL") {
        return base;
    }
    match flow {
        Flow::In => format!("{}_IN", base),
        Flow::Out => format!("{}_OUT", base),
        Flow::None => base,
    }
}

/// Fortran writes `1.5E+03`, `1.5D+03` and `*****` on overflow.
fn parse_fortran(token: &str) -> Option<f64> {
    token
        .replace(['D', 'd'], "E")
        .parse::<f64>()
        .ok()
        .filter(|v| v.is_finite())
}
