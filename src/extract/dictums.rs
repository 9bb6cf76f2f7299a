use std::sync::OnceLock;

use scraper::{Html, Selector};

use super::{
    is_header_cell, optional_cell, parse_date, required_cell, row_cells, selector, BillDraft,
    ExtractError,
};
use crate::db::DictumRecord;

static ROWS_SEL: OnceLock<Selector> = OnceLock::new();

/// Stage 4: committee dictums over the bill. Cells: chamber, order paper,
/// date, result (result may be pending and is allowed to be empty).
pub fn extract(document: &Html, draft: &mut BillDraft) -> Result<(), ExtractError> {
    for row in document
        .root_element()
        .select(selector(&ROWS_SEL, "div.item4 tr"))
    {
        let cells = row_cells(row);
        if cells.len() <= 1 || is_header_cell(&cells) {
            continue;
        }

        draft.dictums.push(DictumRecord {
            source: required_cell(&cells, 0, "dictum chamber")?,
            order_paper: required_cell(&cells, 1, "dictum order paper")?,
            date: parse_date(&required_cell(&cells, 2, "dictum date")?)?,
            result: optional_cell(&cells, 3, ""),
        });
    }
    Ok(())
}
