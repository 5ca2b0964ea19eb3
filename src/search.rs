//! Per-category row filtering and mapping.
//!
//! Each data category is a pure function over the rows fetched from its tab:
//! case-insensitively match one to three key columns, then map the remaining
//! columns positionally into a typed record. Keeping these free of any I/O
//! means they can be exercised directly against literal rows.

use std::collections::HashSet;

use serde_json::{Map, Value};

use crate::records::{DisReportResult, DisRptResult, EpoxyResult, ProcessResult, SearchResult};

/// Fetch ranges for each category tab.
pub const SEARCH_RANGE: &str = "Data1!A2:Y";
pub const DIS_REPORT_RANGE: &str = "Data2!O:R";
pub const DIS_RPT_RANGE: &str = "Data3!A2:E";
pub const GRIND_RANGE: &str = "Grind!A2:N";
pub const POLISH_RANGE: &str = "Polish!A2:N";
pub const EPOXY_RANGE: &str = "Epoxy!A2:T";

fn norm(value: &str) -> String {
    value.trim().to_lowercase()
}

fn cell_norm(row: &[String], idx: usize) -> String {
    row.get(idx).map(|v| norm(v)).unwrap_or_default()
}

/// Case-insensitive equality against an optional filter. An absent or blank
/// filter matches everything.
fn matches_eq(row_value: &str, filter: Option<&str>) -> bool {
    match filter {
        Some(f) if !f.trim().is_empty() => row_value == norm(f),
        _ => true,
    }
}

/// Case-insensitive substring match against an optional filter.
fn matches_sub(row_value: &str, filter: Option<&str>) -> bool {
    match filter {
        Some(f) if !f.trim().is_empty() => row_value.contains(&norm(f)),
        _ => true,
    }
}

/// Shared predicate for the block/part/thickness tabs: the block number must
/// match exactly, part and thickness only when supplied. Rows without a block
/// number are skipped.
fn block_row_matches(
    row: &[String],
    block_no: &str,
    part_no: Option<&str>,
    thickness: Option<&str>,
) -> bool {
    if cell_norm(row, 0).is_empty() {
        return false;
    }
    cell_norm(row, 0) == norm(block_no)
        && matches_eq(&cell_norm(row, 1), part_no)
        && matches_eq(&cell_norm(row, 2), thickness)
}

/// Main block search over the `Data1` tab.
pub fn filter_search(
    rows: &[Vec<String>],
    block_no: &str,
    part_no: Option<&str>,
    thickness: Option<&str>,
) -> Vec<SearchResult> {
    rows.iter()
        .filter(|row| block_row_matches(row.as_slice(), block_no, part_no, thickness))
        .map(|row| SearchResult::from_row(row))
        .collect()
}

/// Project the main search results down to columns that carry data.
///
/// A column that is empty in every matched row is dropped from the response,
/// except the three key columns which the result table always renders.
pub fn prune_empty_columns(results: Vec<SearchResult>) -> Vec<Value> {
    let mut keep: HashSet<String> = ["blockNo", "partNo", "thickness"]
        .iter()
        .map(|k| k.to_string())
        .collect();

    let maps: Vec<Map<String, Value>> = results
        .iter()
        .filter_map(|r| match serde_json::to_value(r) {
            Ok(Value::Object(map)) => Some(map),
            _ => None,
        })
        .collect();

    for map in &maps {
        for (key, value) in map {
            if value.as_str().is_some_and(|s| !s.trim().is_empty()) {
                keep.insert(key.clone());
            }
        }
    }

    maps.into_iter()
        .map(|map| {
            Value::Object(
                map.into_iter()
                    .filter(|(key, _)| keep.contains(key))
                    .collect(),
            )
        })
        .collect()
}

/// Dispatch report over columns O through R of the `Data2` tab.
///
/// A blank block number yields no results rather than an error; the routing
/// layer has already rejected a missing parameter by this point.
pub fn filter_dis_report(
    rows: &[Vec<String>],
    block_no: &str,
    thickness: Option<&str>,
) -> Vec<DisReportResult> {
    if block_no.trim().is_empty() {
        return Vec::new();
    }
    rows.iter()
        .filter(|row| {
            let row = row.as_slice();
            !cell_norm(row, 0).is_empty()
                && cell_norm(row, 0) == norm(block_no)
                && matches_eq(&cell_norm(row, 1), thickness)
        })
        .map(|row| DisReportResult::from_row(row))
        .collect()
}

/// Dispatch summary over the `Data3` tab.
pub fn filter_dis_rpt(
    rows: &[Vec<String>],
    block_no: &str,
    part_no: Option<&str>,
    thickness: Option<&str>,
) -> Vec<DisRptResult> {
    rows.iter()
        .filter(|row| block_row_matches(row.as_slice(), block_no, part_no, thickness))
        .map(|row| DisRptResult::from_row(row))
        .collect()
}

/// Grinding or polishing work log; both tabs share the same layout so the
/// caller picks the range.
pub fn filter_process(
    rows: &[Vec<String>],
    block_no: &str,
    part_no: Option<&str>,
    thickness: Option<&str>,
) -> Vec<ProcessResult> {
    rows.iter()
        .filter(|row| block_row_matches(row.as_slice(), block_no, part_no, thickness))
        .map(|row| ProcessResult::from_row(row))
        .collect()
}

/// Epoxy treatment log over the `Epoxy` tab.
pub fn filter_epoxy(
    rows: &[Vec<String>],
    block_no: &str,
    part_no: Option<&str>,
    thickness: Option<&str>,
) -> Vec<EpoxyResult> {
    rows.iter()
        .filter(|row| block_row_matches(row.as_slice(), block_no, part_no, thickness))
        .map(|row| EpoxyResult::from_row(row))
        .collect()
}

/// Colour search over the `Epoxy` tab: substring match on factory colour,
/// sub colour and type. All filters are optional; rows without a block number
/// are still returned here since the colour columns are the keys.
pub fn filter_ecol(
    rows: &[Vec<String>],
    factory_color: Option<&str>,
    sub_color: Option<&str>,
    kind: Option<&str>,
) -> Vec<EpoxyResult> {
    rows.iter()
        .filter(|row| {
            let row = row.as_slice();
            matches_sub(&cell_norm(row, 18), factory_color)
                && matches_sub(&cell_norm(row, 19), sub_color)
                && matches_sub(&cell_norm(row, 5), kind)
        })
        .map(|row| EpoxyResult::from_row(row))
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;

    fn row(cells: &[&str]) -> Vec<String> {
        cells.iter().map(|c| c.to_string()).collect()
    }

    fn grind_rows() -> Vec<Vec<String>> {
        vec![
            row(&["B-101", "P1", "2", "Rough", "5"]),
            row(&["B-101", "P2", "3", "Fine", "2"]),
            row(&["b-101", "p1", "2", "Rough", "1"]),
            row(&["B-202", "P1", "2", "Rough", "9"]),
            row(&["", "P1", "2"]),
        ]
    }

    #[test]
    fn block_match_is_case_insensitive_and_required() {
        let results = filter_process(&grind_rows(), "b-101", None, None);
        assert_eq!(results.len(), 3);
        assert!(results.iter().all(|r| r.block_no.to_lowercase() == "b-101"));
    }

    #[test]
    fn optional_filters_narrow_the_match() {
        let results = filter_process(&grind_rows(), "B-101", Some("P1"), None);
        assert_eq!(results.len(), 2);

        let results = filter_process(&grind_rows(), "B-101", Some("P1"), Some("3"));
        assert!(results.is_empty());

        // Blank filters behave like absent ones.
        let results = filter_process(&grind_rows(), "B-101", Some("  "), Some(""));
        assert_eq!(results.len(), 3);
    }

    #[test]
    fn rows_without_a_block_number_are_skipped() {
        let results = filter_process(&grind_rows(), "", None, None);
        assert!(results.is_empty());
    }

    #[test]
    fn filters_trim_surrounding_whitespace() {
        let results = filter_process(&grind_rows(), "  B-101  ", Some(" p2 "), None);
        assert_eq!(results.len(), 1);
        assert_eq!(results[0].finish, "Fine");
    }

    #[test]
    fn dis_report_blank_block_yields_nothing() {
        let rows = vec![row(&["B-1", "2cm", "10", "3.2"])];
        assert!(filter_dis_report(&rows, "   ", None).is_empty());
        assert_eq!(filter_dis_report(&rows, "B-1", None).len(), 1);
        assert_eq!(filter_dis_report(&rows, "B-1", Some("2CM")).len(), 1);
        assert!(filter_dis_report(&rows, "B-1", Some("3cm")).is_empty());
    }

    #[test]
    fn dis_rpt_maps_five_columns() {
        let rows = vec![row(&["B-9", "P1", "2", "14", "22.5"])];
        let results = filter_dis_rpt(&rows, "b-9", None, None);
        assert_eq!(results.len(), 1);
        assert_eq!(results[0].nos, "14");
        assert_eq!(results[0].m2, "22.5");
    }

    fn epoxy_rows() -> Vec<Vec<String>> {
        let mut a = vec![String::new(); 20];
        a[0] = "B-1".into();
        a[5] = "Type-A".into();
        a[18] = "Galaxy Black".into();
        a[19] = "Deep".into();
        let mut b = vec![String::new(); 20];
        b[0] = "B-2".into();
        b[5] = "Type-B".into();
        b[18] = "Steel Grey".into();
        b[19] = "Light".into();
        vec![a, b]
    }

    #[test]
    fn ecol_matches_substrings_on_colour_columns() {
        let results = filter_ecol(&epoxy_rows(), Some("galaxy"), None, None);
        assert_eq!(results.len(), 1);
        assert_eq!(results[0].factory_color, "Galaxy Black");

        let results = filter_ecol(&epoxy_rows(), None, Some("ight"), Some("type-b"));
        assert_eq!(results.len(), 1);
        assert_eq!(results[0].block_no, "B-2");
    }

    #[test]
    fn ecol_without_filters_returns_everything() {
        assert_eq!(filter_ecol(&epoxy_rows(), None, None, None).len(), 2);
    }

    #[test]
    fn epoxy_search_matches_on_block_part_thickness() {
        let results = filter_epoxy(&epoxy_rows(), "B-1", None, None);
        assert_eq!(results.len(), 1);
        assert_eq!(results[0].kind, "Type-A");
    }

    #[test]
    fn prune_drops_columns_empty_in_every_row() {
        let mut a = vec![String::new(); 25];
        a[0] = "B-1".into();
        a[4] = "done".into();
        let mut b = vec![String::new(); 25];
        b[0] = "B-1".into();
        b[5] = "12.5".into();
        let results = filter_search(&[a, b], "B-1", None, None);
        let pruned = prune_empty_columns(results);

        assert_eq!(pruned.len(), 2);
        let first = pruned[0].as_object().unwrap();
        // Key columns survive even when empty.
        assert!(first.contains_key("blockNo"));
        assert!(first.contains_key("partNo"));
        assert!(first.contains_key("thickness"));
        // A column populated in either row is kept in both.
        assert!(first.contains_key("grind"));
        assert!(first.contains_key("net"));
        // A column empty everywhere disappears.
        assert!(!first.contains_key("polish"));
        assert!(!first.contains_key("color2"));
    }

    #[test]
    fn prune_of_no_results_is_empty() {
        assert!(prune_empty_columns(Vec::new()).is_empty());
    }
}
