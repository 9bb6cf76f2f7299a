use std::sync::OnceLock;

use scraper::{Html, Selector};

use super::{optional_content, required_content, selector, BillDraft, ExtractError};

static TYPE_SEL: OnceLock<Selector> = OnceLock::new();
static GENERAL_SEL: OnceLock<Selector> = OnceLock::new();
static ALT_SUMMARY_SEL: OnceLock<Selector> = OnceLock::new();

/// A standard general-information block carries at least this many child
/// nodes; anything shorter is the revision layout.
const STANDARD_MIN_NODES: usize = 12;

/// Stage 1: general bill information.
///
/// Values are read positionally from the general-information block, matching
/// the label/value node interleaving of the source page. The revision layout
/// replaces the publication reference with the revision chamber and file, and
/// moves the summary into its own span.
pub fn extract(document: &Html, draft: &mut BillDraft) -> Result<(), ExtractError> {
    let root = document.root_element();

    let general = root
        .select(selector(&GENERAL_SEL, "div.item1 > div"))
        .next()
        .ok_or(ExtractError::EmptyElement("general information block"))?;

    draft.bill_type = Some(
        root.select(selector(&TYPE_SEL, "div.item1 > b"))
            .next()
            .map(|el| super::cell_text(&el))
            .unwrap_or_default(),
    );
    draft.source = Some(required_content(general, 1, "source chamber")?);
    draft.file = Some(required_content(general, 3, "bill file")?);

    if general.children().count() < STANDARD_MIN_NODES {
        draft.revision_chamber = Some(optional_content(general, 6));
        draft.revision_file = Some(optional_content(general, 8));
        draft.creation_date = Some(super::parse_date(&required_content(
            general,
            10,
            "creation date",
        )?)?);
        draft.summary = Some(
            root.select(selector(&ALT_SUMMARY_SEL, "span.sumario"))
                .next()
                .map(|el| super::cell_text(&el))
                .unwrap_or_default(),
        );
    } else {
        draft.published_on = Some(required_content(general, 6, "publication reference")?);
        draft.creation_date = Some(super::parse_date(&required_content(
            general,
            8,
            "creation date",
        )?)?);
        draft.summary = Some(optional_content(general, 11));
    }

    Ok(())
}
