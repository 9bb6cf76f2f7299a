use std::sync::OnceLock;

use scraper::{Html, Selector};

use super::{is_header_cell, required_cell, row_cells, selector, BillDraft, ExtractError};

static ROWS_SEL: OnceLock<Selector> = OnceLock::new();

/// Stage 3: committees the bill was referred to. Plain strings, one per row;
/// the header row is the section title.
pub fn extract(document: &Html, draft: &mut BillDraft) -> Result<(), ExtractError> {
    for row in document
        .root_element()
        .select(selector(&ROWS_SEL, "div.item3 tr"))
    {
        let cells = row_cells(row);
        if cells.is_empty() || is_header_cell(&cells) {
            continue;
        }
        draft
            .committees
            .push(required_cell(&cells, 0, "committee name")?);
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn skips_title_and_collects_names() {
        let html = "<div class=\"toc\"><div class=\"item3\"><table>\
                    <tr><th>GIRO A COMISIONES</th></tr>\
                    <tr><td>LEGISLACION GENERAL</td></tr>\
                    </table></div></div>";
        let document = Html::parse_fragment(html);
        let mut draft = BillDraft::default();
        extract(&document, &mut draft).unwrap();
        assert_eq!(draft.committees, vec!["LEGISLACION GENERAL"]);
    }

    #[test]
    fn empty_committee_row_is_an_error() {
        let html = "<div class=\"toc\"><div class=\"item3\"><table>\
                    <tr><td></td></tr>\
                    </table></div></div>";
        let document = Html::parse_fragment(html);
        let mut draft = BillDraft::default();
        assert!(matches!(
            extract(&document, &mut draft),
            Err(ExtractError::EmptyElement("committee name"))
        ));
    }
}
