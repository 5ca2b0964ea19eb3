//! Typed result records for each data category.
//!
//! Every record is a flat set of string fields mapped positionally from a sheet
//! row. Cells missing from a ragged row default to the empty string. Wire names
//! are camelCase to match what the portal pages expect.

use serde::Serialize;

/// Read cell `idx` from a possibly ragged row, defaulting to empty.
pub fn cell(row: &[String], idx: usize) -> String {
    row.get(idx).cloned().unwrap_or_default()
}

/// Record for the main block search (`Data1` tab, columns A through Y).
#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct SearchResult {
    pub block_no: String,
    pub part_no: String,
    pub thickness: String,
    pub nos: String,
    pub grind: String,
    pub net: String,
    pub epoxy: String,
    pub polish: String,
    pub lea: String,
    pub lap: String,
    pub hon: String,
    pub shot: String,
    pub pol_r: String,
    pub flam: String,
    pub bal: String,
    pub b_s_p: String,
    pub edge: String,
    pub trim: String,
    pub meas: String,
    pub l_cm: String,
    pub h_cm: String,
    pub status: String,
    pub date: String,
    pub color1: String,
    pub color2: String,
}

impl SearchResult {
    pub fn from_row(row: &[String]) -> Self {
        Self {
            block_no: cell(row, 0),
            part_no: cell(row, 1),
            thickness: cell(row, 2),
            nos: cell(row, 3),
            grind: cell(row, 4),
            net: cell(row, 5),
            epoxy: cell(row, 6),
            polish: cell(row, 7),
            lea: cell(row, 8),
            lap: cell(row, 9),
            hon: cell(row, 10),
            shot: cell(row, 11),
            pol_r: cell(row, 12),
            flam: cell(row, 13),
            bal: cell(row, 14),
            b_s_p: cell(row, 15),
            edge: cell(row, 16),
            trim: cell(row, 17),
            meas: cell(row, 18),
            l_cm: cell(row, 19),
            h_cm: cell(row, 20),
            status: cell(row, 21),
            date: cell(row, 22),
            color1: cell(row, 23),
            color2: cell(row, 24),
        }
    }
}

/// Record for the dispatch report (`Data2` tab, columns O through R).
///
/// The report pages address the trailing cells by their sheet column letter,
/// so those field names stay as-is on the wire.
#[derive(Debug, Clone, Serialize)]
pub struct DisReportResult {
    #[serde(rename = "blockNo")]
    pub block_no: String,
    pub thickness: String,
    pub o_column: String,
    pub p_column: String,
    pub q_column: String,
    pub r_column: String,
}

impl DisReportResult {
    pub fn from_row(row: &[String]) -> Self {
        Self {
            block_no: cell(row, 0),
            thickness: cell(row, 1),
            o_column: cell(row, 0),
            p_column: cell(row, 1),
            q_column: cell(row, 2),
            r_column: cell(row, 3),
        }
    }
}

/// Record for the dispatch summary (`Data3` tab, columns A through E).
#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct DisRptResult {
    pub block_no: String,
    pub part_no: String,
    pub thickness: String,
    pub nos: String,
    pub m2: String,
}

impl DisRptResult {
    pub fn from_row(row: &[String]) -> Self {
        Self {
            block_no: cell(row, 0),
            part_no: cell(row, 1),
            thickness: cell(row, 2),
            nos: cell(row, 3),
            m2: cell(row, 4),
        }
    }
}

/// Record for grinding and polishing work logs (`Grind` / `Polish` tabs,
/// columns A through N). Both tabs share the same column layout.
#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ProcessResult {
    pub block_no: String,
    pub part_no: String,
    pub thickness: String,
    pub finish: String,
    pub nos: String,
    pub re: String,
    pub l_cm: String,
    pub h_cm: String,
    pub sft: String,
    pub date: String,
    pub shift: String,
    pub machine: String,
    pub remark: String,
    pub slab_no: String,
}

impl ProcessResult {
    pub fn from_row(row: &[String]) -> Self {
        Self {
            block_no: cell(row, 0),
            part_no: cell(row, 1),
            thickness: cell(row, 2),
            finish: cell(row, 3),
            nos: cell(row, 4),
            re: cell(row, 5),
            l_cm: cell(row, 6),
            h_cm: cell(row, 7),
            sft: cell(row, 8),
            date: cell(row, 9),
            shift: cell(row, 10),
            machine: cell(row, 11),
            remark: cell(row, 12),
            slab_no: cell(row, 13),
        }
    }
}

/// Record for epoxy treatment logs (`Epoxy` tab, columns A through T,
/// including the factory and sub colour columns). Also returned by the
/// colour search.
#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct EpoxyResult {
    pub block_no: String,
    pub part_no: String,
    pub thickness: String,
    pub finish: String,
    pub nos: String,
    #[serde(rename = "type")]
    pub kind: String,
    pub ratio: String,
    pub a_kg: String,
    pub b_kg: String,
    pub c_kg: String,
    pub l_cm: String,
    pub h_cm: String,
    pub sft: String,
    pub date: String,
    pub shift: String,
    pub machine: String,
    pub remark: String,
    pub slab_no: String,
    pub factory_color: String,
    pub sub_color: String,
}

impl EpoxyResult {
    pub fn from_row(row: &[String]) -> Self {
        Self {
            block_no: cell(row, 0),
            part_no: cell(row, 1),
            thickness: cell(row, 2),
            finish: cell(row, 3),
            nos: cell(row, 4),
            kind: cell(row, 5),
            ratio: cell(row, 6),
            a_kg: cell(row, 7),
            b_kg: cell(row, 8),
            c_kg: cell(row, 9),
            l_cm: cell(row, 10),
            h_cm: cell(row, 11),
            sft: cell(row, 12),
            date: cell(row, 13),
            shift: cell(row, 14),
            machine: cell(row, 15),
            remark: cell(row, 16),
            slab_no: cell(row, 17),
            factory_color: cell(row, 18),
            sub_color: cell(row, 19),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn row(cells: &[&str]) -> Vec<String> {
        cells.iter().map(|c| c.to_string()).collect()
    }

    #[test]
    fn ragged_rows_default_to_empty() {
        let r = ProcessResult::from_row(&row(&["B-101", "P2"]));
        assert_eq!(r.block_no, "B-101");
        assert_eq!(r.part_no, "P2");
        assert_eq!(r.thickness, "");
        assert_eq!(r.slab_no, "");
    }

    #[test]
    fn wire_names_are_camel_case() {
        let r = ProcessResult::from_row(&row(&["B-101", "P2", "2", "Rough"]));
        let json = serde_json::to_value(&r).unwrap();
        assert_eq!(json["blockNo"], "B-101");
        assert_eq!(json["partNo"], "P2");
        assert_eq!(json["slabNo"], "");
        assert!(json.get("block_no").is_none());
    }

    #[test]
    fn epoxy_type_and_colours_serialize_under_expected_names() {
        let mut cells = vec![String::new(); 20];
        cells[5] = "A".into();
        cells[18] = "Galaxy Black".into();
        cells[19] = "Deep".into();
        let json = serde_json::to_value(EpoxyResult::from_row(&cells)).unwrap();
        assert_eq!(json["type"], "A");
        assert_eq!(json["factoryColor"], "Galaxy Black");
        assert_eq!(json["subColor"], "Deep");
        assert_eq!(json["aKg"], "");
    }

    #[test]
    fn dis_report_duplicates_key_columns_under_letter_names() {
        let r = DisReportResult::from_row(&row(&["B-7", "2cm", "12", "4.5"]));
        let json = serde_json::to_value(&r).unwrap();
        assert_eq!(json["blockNo"], "B-7");
        assert_eq!(json["o_column"], "B-7");
        assert_eq!(json["p_column"], "2cm");
        assert_eq!(json["q_column"], "12");
        assert_eq!(json["r_column"], "4.5");
    }

    #[test]
    fn search_result_maps_all_25_columns() {
        let cells: Vec<String> = (0..25).map(|i| format!("v{i}")).collect();
        let r = SearchResult::from_row(&cells);
        assert_eq!(r.block_no, "v0");
        assert_eq!(r.pol_r, "v12");
        assert_eq!(r.b_s_p, "v15");
        assert_eq!(r.color2, "v24");
        let json = serde_json::to_value(&r).unwrap();
        assert_eq!(json["polR"], "v12");
        assert_eq!(json["bSP"], "v15");
    }
}
