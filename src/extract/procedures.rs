use std::sync::OnceLock;

use scraper::{Html, Selector};

use super::{
    is_header_cell, optional_cell, parse_date, required_cell, row_cells, selector, BillDraft,
    ExtractError,
};
use crate::db::ProcedureRecord;

static ROWS_SEL: OnceLock<Selector> = OnceLock::new();

/// Stage 5: parliamentary procedures. Cells: chamber, topic, date, result.
pub fn extract(document: &Html, draft: &mut BillDraft) -> Result<(), ExtractError> {
    for row in document
        .root_element()
        .select(selector(&ROWS_SEL, "div.item5 tr"))
    {
        let cells = row_cells(row);
        if cells.len() <= 1 || is_header_cell(&cells) {
            continue;
        }

        draft.procedures.push(ProcedureRecord {
            source: required_cell(&cells, 0, "procedure chamber")?,
            topic: required_cell(&cells, 1, "procedure topic")?,
            date: parse_date(&required_cell(&cells, 2, "procedure date")?)?,
            result: optional_cell(&cells, 3, ""),
        });
    }
    Ok(())
}
