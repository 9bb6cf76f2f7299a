use std::sync::OnceLock;

use scraper::{Html, Selector};

use super::{
    is_header_cell, optional_cell, required_cell, row_cells, selector, BillDraft, ExtractError,
};
use crate::db::PersonRecord;

static ROWS_SEL: OnceLock<Selector> = OnceLock::new();

/// Stage 2: legislators who signed the bill. One row per person: name,
/// party, province. Single-cell rows are the section title.
pub fn extract(document: &Html, draft: &mut BillDraft) -> Result<(), ExtractError> {
    for row in document
        .root_element()
        .select(selector(&ROWS_SEL, "div.item2 tr"))
    {
        let cells = row_cells(row);
        if cells.len() <= 1 || is_header_cell(&cells) {
            continue;
        }

        draft.subscribers.push(PersonRecord {
            name: required_cell(&cells, 0, "subscriber name")?,
            party: optional_cell(&cells, 1, "NONE"),
            province: required_cell(&cells, 2, "subscriber province")?,
        });
    }
    Ok(())
}
