pub mod bill;
pub mod committees;
pub mod dictums;
pub mod procedures;
pub mod subscribers;

use std::sync::OnceLock;

use chrono::NaiveDate;
use rayon::prelude::*;
use regex::Regex;
use scraper::{ElementRef, Html, Node, Selector};
use thiserror::Error;

use crate::db::{BillRecord, DictumRecord, PersonRecord, ProcedureRecord};

#[derive(Debug, Error)]
pub enum ExtractError {
    #[error("empty element: {0}")]
    EmptyElement(&'static str),
    #[error("invalid date {value:?}: {source}")]
    BadDate {
        value: String,
        source: chrono::ParseError,
    },
}

/// Accumulator shared by the pipeline stages. Every field is optional until
/// the finalize step validates completeness.
#[derive(Debug, Default, Clone)]
pub struct BillDraft {
    pub bill_type: Option<String>,
    pub source: Option<String>,
    pub file: Option<String>,
    pub published_on: Option<String>,
    pub creation_date: Option<NaiveDate>,
    pub summary: Option<String>,
    pub revision_chamber: Option<String>,
    pub revision_file: Option<String>,
    pub subscribers: Vec<PersonRecord>,
    pub committees: Vec<String>,
    pub dictums: Vec<DictumRecord>,
    pub procedures: Vec<ProcedureRecord>,
}

impl BillDraft {
    /// Validate the accumulator and assemble the persistable record. The
    /// file id, source chamber and creation date are the hard requirements;
    /// everything else defaults to empty.
    pub fn finalize(&self) -> Result<BillRecord, ExtractError> {
        Ok(BillRecord {
            file: self
                .file
                .clone()
                .ok_or(ExtractError::EmptyElement("bill file"))?,
            bill_type: self.bill_type.clone().unwrap_or_default(),
            source: self
                .source
                .clone()
                .ok_or(ExtractError::EmptyElement("source chamber"))?,
            published_on: self.published_on.clone().unwrap_or_default(),
            creation_date: self
                .creation_date
                .ok_or(ExtractError::EmptyElement("creation date"))?,
            summary: self.summary.clone().unwrap_or_default(),
            revision_chamber: self.revision_chamber.clone().unwrap_or_default(),
            revision_file: self.revision_file.clone().unwrap_or_default(),
            subscribers: self.subscribers.clone(),
            committees: self.committees.clone(),
            dictums: self.dictums.clone(),
            procedures: self.procedures.clone(),
        })
    }
}

/// Result of running the pipeline over one fragment: either a complete record
/// or the partial accumulator plus the error that stopped it.
#[derive(Debug)]
pub enum FragmentOutcome {
    Extracted(BillRecord),
    Failed {
        draft: BillDraft,
        stage: &'static str,
        error: ExtractError,
    },
}

type Stage = fn(&Html, &mut BillDraft) -> Result<(), ExtractError>;

/// Stage order is fixed; a failure aborts the remaining stages for this
/// fragment only.
const STAGES: &[(&str, Stage)] = &[
    ("bill", bill::extract),
    ("subscribers", subscribers::extract),
    ("committees", committees::extract),
    ("dictums", dictums::extract),
    ("procedures", procedures::extract),
];

pub fn process_fragment(fragment_html: &str) -> FragmentOutcome {
    let document = Html::parse_fragment(fragment_html);
    let mut draft = BillDraft::default();

    for (stage, extract) in STAGES.iter().copied() {
        if let Err(error) = extract(&document, &mut draft) {
            return FragmentOutcome::Failed {
                draft,
                stage,
                error,
            };
        }
    }

    match draft.finalize() {
        Ok(bill) => FragmentOutcome::Extracted(bill),
        Err(error) => FragmentOutcome::Failed {
            draft,
            stage: "finalize",
            error,
        },
    }
}

/// Extract every fragment of a page in parallel. Stages inside a fragment
/// stay sequential; siblings never affect each other.
pub fn process_fragments(fragments: &[String]) -> Vec<FragmentOutcome> {
    fragments
        .par_iter()
        .map(|html| process_fragment(html))
        .collect()
}

// ── Shared helpers ──

pub(crate) fn selector(cache: &'static OnceLock<Selector>, css: &'static str) -> &'static Selector {
    cache.get_or_init(|| Selector::parse(css).expect("static CSS selector is valid"))
}

fn collapse_ws(raw: &str) -> String {
    static WS: OnceLock<Regex> = OnceLock::new();
    let ws = WS.get_or_init(|| Regex::new(r"\s+").expect("static regex is valid"));
    ws.replace_all(raw.trim(), " ").to_string()
}

/// Text of the nth child node of `el`, positionally, the way the source page
/// interleaves label elements and text values. Whitespace-only nodes count.
fn content_text(el: ElementRef, idx: usize) -> Option<String> {
    let node = el.children().nth(idx)?;
    let raw = match node.value() {
        Node::Text(text) => text.to_string(),
        Node::Element(_) => ElementRef::wrap(node)
            .map(|e| e.text().collect::<String>())
            .unwrap_or_default(),
        _ => String::new(),
    };
    let text = collapse_ws(&raw);
    (!text.is_empty()).then_some(text)
}

pub(crate) fn required_content(
    el: ElementRef,
    idx: usize,
    what: &'static str,
) -> Result<String, ExtractError> {
    content_text(el, idx).ok_or(ExtractError::EmptyElement(what))
}

pub(crate) fn optional_content(el: ElementRef, idx: usize) -> String {
    content_text(el, idx).unwrap_or_default()
}

pub(crate) fn row_cells<'a>(row: ElementRef<'a>) -> Vec<ElementRef<'a>> {
    row.children().filter_map(ElementRef::wrap).collect()
}

pub(crate) fn is_header_cell(cells: &[ElementRef]) -> bool {
    cells
        .first()
        .is_some_and(|cell| cell.value().name() == "th")
}

pub(crate) fn cell_text(cell: &ElementRef) -> String {
    collapse_ws(&cell.text().collect::<String>())
}

pub(crate) fn required_cell(
    cells: &[ElementRef],
    idx: usize,
    what: &'static str,
) -> Result<String, ExtractError> {
    let text = cells.get(idx).map(cell_text).unwrap_or_default();
    if text.is_empty() {
        Err(ExtractError::EmptyElement(what))
    } else {
        Ok(text)
    }
}

pub(crate) fn optional_cell(cells: &[ElementRef], idx: usize, default: &str) -> String {
    let text = cells.get(idx).map(cell_text).unwrap_or_default();
    if text.is_empty() {
        default.to_string()
    } else {
        text
    }
}

/// Dates on the page are day/month/year with slashes. Day-first parsing is
/// load-bearing: "05/03/2010" is the 5th of March, never the 3rd of May.
pub(crate) fn parse_date(value: &str) -> Result<NaiveDate, ExtractError> {
    NaiveDate::parse_from_str(value, "%d/%m/%Y").map_err(|source| ExtractError::BadDate {
        value: value.to_string(),
        source,
    })
}

// ── Tests ──


#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn standard_fragment_extracts_complete_bill() {
        let outcome = process_fragment(&fixtures::standard_fragment("0001-D-2010"));
        let bill = match outcome {
            FragmentOutcome::Extracted(bill) => bill,
            FragmentOutcome::Failed { stage, error, .. } => {
                panic!("stage {} failed: {}", stage, error)
            }
        };

        assert_eq!(bill.file, "0001-D-2010");
        assert_eq!(bill.bill_type, "PROYECTO DE LEY");
        assert_eq!(bill.source, "Diputados");
        assert_eq!(bill.published_on, "Trámite Parlamentario 21");
        assert_eq!(
            bill.creation_date,
            NaiveDate::from_ymd_opt(2010, 3, 5).unwrap()
        );
        assert!(bill.summary.contains("energías renovables"));
        assert!(bill.revision_chamber.is_empty());

        // Title row skipped; party defaults to NONE when the cell is empty.
        assert_eq!(bill.subscribers.len(), 2);
        assert_eq!(bill.subscribers[0].name, "Juan Perez");
        assert_eq!(bill.subscribers[0].party, "UCR");
        assert_eq!(bill.subscribers[1].party, "NONE");
        assert_eq!(bill.subscribers[1].province, "Córdoba");

        assert_eq!(
            bill.committees,
            vec!["PRESUPUESTO Y HACIENDA", "ENERGIA Y COMBUSTIBLES"]
        );

        assert_eq!(bill.dictums.len(), 1);
        assert_eq!(bill.dictums[0].order_paper, "OD 1234");
        assert_eq!(
            bill.dictums[0].date,
            NaiveDate::from_ymd_opt(2010, 6, 1).unwrap()
        );
        assert_eq!(bill.dictums[0].result, "APROBADO");

        assert_eq!(bill.procedures.len(), 1);
        assert_eq!(bill.procedures[0].source, "Senado");
        assert_eq!(bill.procedures[0].result, "");
    }

    #[test]
    fn revision_fragment_extracts_revision_fields() {
        let outcome = process_fragment(&fixtures::revision_fragment("0042-D-2011"));
        let bill = match outcome {
            FragmentOutcome::Extracted(bill) => bill,
            FragmentOutcome::Failed { stage, error, .. } => {
                panic!("stage {} failed: {}", stage, error)
            }
        };

        assert_eq!(bill.file, "0042-D-2011");
        assert_eq!(bill.revision_chamber, "Senado");
        assert_eq!(bill.revision_file, "0099-S-2011");
        assert_eq!(
            bill.creation_date,
            NaiveDate::from_ymd_opt(2011, 11, 12).unwrap()
        );
        assert_eq!(bill.summary, "Texto con media sanción");
        assert!(bill.published_on.is_empty());
    }

    #[test]
    fn missing_file_fails_at_bill_stage_with_partial_draft() {
        match process_fragment(&fixtures::fragment_missing_file()) {
            FragmentOutcome::Failed {
                draft,
                stage,
                error,
            } => {
                assert_eq!(stage, "bill");
                assert!(matches!(error, ExtractError::EmptyElement("bill file")));
                // The accumulator keeps what earlier steps produced.
                assert_eq!(draft.source.as_deref(), Some("Diputados"));
                assert!(draft.file.is_none());
                assert!(draft.subscribers.is_empty());
            }
            FragmentOutcome::Extracted(_) => panic!("fragment without file must fail"),
        }
    }

    #[test]
    fn reextraction_is_deterministic() {
        let html = fixtures::standard_fragment("0001-D-2010");
        let (first, second) = match (process_fragment(&html), process_fragment(&html)) {
            (FragmentOutcome::Extracted(a), FragmentOutcome::Extracted(b)) => (a, b),
            _ => panic!("both extractions must succeed"),
        };
        assert_eq!(first.file, second.file);
        assert_eq!(first.summary, second.summary);
        assert_eq!(first.subscribers.len(), second.subscribers.len());
        assert_eq!(first.committees, second.committees);
    }

    #[test]
    fn day_month_year_is_parsed_day_first() {
        let date = parse_date("05/03/2010").unwrap();
        assert_eq!(date, NaiveDate::from_ymd_opt(2010, 3, 5).unwrap());

        // 13th month cannot exist: proves the parser is not month-first.
        assert!(parse_date("25/13/2010").is_err());
        assert_eq!(
            parse_date("13/12/2010").unwrap(),
            NaiveDate::from_ymd_opt(2010, 12, 13).unwrap()
        );
    }

    #[test]
    fn sibling_fragments_are_isolated() {
        let fragments = vec![
            fixtures::standard_fragment("0001-D-2010"),
            fixtures::fragment_missing_file(),
            fixtures::standard_fragment("0002-D-2010"),
        ];
        let outcomes = process_fragments(&fragments);
        assert_eq!(outcomes.len(), 3);
        assert!(matches!(outcomes[0], FragmentOutcome::Extracted(_)));
        assert!(matches!(outcomes[1], FragmentOutcome::Failed { .. }));
        assert!(matches!(outcomes[2], FragmentOutcome::Extracted(_)));
    }
}
