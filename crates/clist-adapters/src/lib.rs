//! Cause-list source adapters: date discovery, document download, text
//! extraction and the line-oriented entry parser.

use std::fs;
use std::io::Write;
use std::path::{Path, PathBuf};
use std::process::Command;
use std::str::FromStr;
use std::sync::{Arc, LazyLock};

use anyhow::{Context, Result};
use async_trait::async_trait;
use chrono::NaiveDate;
use clist_core::CauseEntry;
use clist_storage::{FetchError, HttpFetcher};
use regex::Regex;
use scraper::{Html, Selector};
use serde::{Deserialize, Serialize};
use serde_json::Value as JsonValue;
use thiserror::Error;
use tracing::{debug, warn};

pub const CRATE_NAME: &str = "clist-adapters";

pub const DEFAULT_BASE_URL: &str = "https://mhc.tn.gov.in/judis/clists/clists-madras";

/// Lines examined after an opening case line when looking for case type and
/// respondent.
pub const LOOKAHEAD_LINES: usize = 5;

pub const DEFAULT_DOMAIN_KEYWORDS: &[&str] = &[
    "HRCE",
    "Hindu Religious",
    "Charitable Endowments",
    "Temple",
    "Devasthanam",
    "Devaswom",
    "Mutt",
    "Religious Trust",
    "Dharmada",
    "Arulmigu",
];

const HONORIFICS: [&str; 6] = ["M/S.", "Mr.", "Ms.", "Mrs.", "Dr.", "Adv."];

#[derive(Debug, Error)]
pub enum AdapterError {
    #[error("{0}")]
    Message(String),
    #[error("invalid date listing: {0}")]
    Listing(String),
    #[error("text extraction failed: {0}")]
    Extraction(String),
    #[error(transparent)]
    Anyhow(#[from] anyhow::Error),
}

// ---------------------------------------------------------------------------
// Source site: date discovery and document retrieval
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CauseListSite {
    base_url: String,
}

impl Default for CauseListSite {
    fn default() -> Self {
        Self::new(DEFAULT_BASE_URL)
    }
}

impl CauseListSite {
    pub fn new(base_url: impl Into<String>) -> Self {
        let base_url = base_url.into().trim().trim_end_matches('/').to_string();
        Self { base_url }
    }

    pub fn base_url(&self) -> &str {
        &self.base_url
    }

    pub fn dates_url(&self) -> String {
        format!("{}/api/getDate.php?toc=1", self.base_url)
    }

    pub fn document_url(&self, hearing_date: NaiveDate) -> String {
        format!(
            "{}/causelists/pdf/{}",
            self.base_url,
            document_file_name(hearing_date)
        )
    }
}

/// `cause_<DDMMYYYY>.pdf`
pub fn document_file_name(hearing_date: NaiveDate) -> String {
    format!("cause_{}.pdf", hearing_date.format("%d%m%Y"))
}

/// Parse the listing endpoint's JSON array into sorted, distinct dates.
/// Items that carry no recognisable `YYYY-MM-DD` value are skipped.
pub fn parse_listing_dates(body: &[u8]) -> Result<Vec<NaiveDate>, AdapterError> {
    let value: JsonValue = serde_json::from_slice(body)
        .map_err(|e| AdapterError::Listing(format!("body is not JSON: {e}")))?;
    let items = value
        .as_array()
        .ok_or_else(|| AdapterError::Listing("expected a JSON array".to_string()))?;

    let mut dates = items
        .iter()
        .filter_map(date_from_listing_item)
        .collect::<Vec<_>>();
    dates.sort();
    dates.dedup();
    Ok(dates)
}

fn date_from_listing_item(item: &JsonValue) -> Option<NaiveDate> {
    match item {
        JsonValue::String(s) => parse_iso_date_prefix(s),
        JsonValue::Object(map) => ["date", "cdate", "cause_date", "list_date"]
            .iter()
            .filter_map(|key| map.get(*key).and_then(JsonValue::as_str))
            .find_map(parse_iso_date_prefix)
            .or_else(|| {
                map.values()
                    .filter_map(JsonValue::as_str)
                    .find_map(parse_iso_date_prefix)
            }),
        _ => None,
    }
}

fn parse_iso_date_prefix(value: &str) -> Option<NaiveDate> {
    let value = value.trim();
    let head = value.get(..10).unwrap_or(value);
    NaiveDate::parse_from_str(head, "%Y-%m-%d").ok()
}

/// Discovery result. A transport failure is kept distinct from "the source
/// answered with no dates" so callers can pick a policy for each.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum DateDiscovery {
    Dates(Vec<NaiveDate>),
    Unreachable(FetchError),
}

impl DateDiscovery {
    pub fn into_dates(self) -> Vec<NaiveDate> {
        match self {
            DateDiscovery::Dates(dates) => dates,
            DateDiscovery::Unreachable(_) => Vec::new(),
        }
    }
}

#[async_trait]
pub trait CauseListSource: Send + Sync {
    async fn discover_dates(&self) -> DateDiscovery;

    /// Dates with a published document; empty on any failure.
    async fn list_available_dates(&self) -> Vec<NaiveDate> {
        self.discover_dates().await.into_dates()
    }

    /// One attempt, no retries.
    async fn fetch_document(&self, hearing_date: NaiveDate) -> Result<Vec<u8>, FetchError>;
}

#[derive(Debug, Clone)]
pub struct HttpCauseListSource {
    site: CauseListSite,
    http: HttpFetcher,
}

impl HttpCauseListSource {
    pub fn new(site: CauseListSite, http: HttpFetcher) -> Self {
        Self { site, http }
    }
}

#[async_trait]
impl CauseListSource for HttpCauseListSource {
    async fn discover_dates(&self) -> DateDiscovery {
        let url = self.site.dates_url();
        match self.http.fetch_bytes(&url).await {
            Ok(resp) => match parse_listing_dates(&resp.body) {
                Ok(dates) => {
                    debug!(count = dates.len(), "discovered cause list dates");
                    DateDiscovery::Dates(dates)
                }
                Err(err) => {
                    warn!(%url, error = %err, "date listing unreadable");
                    DateDiscovery::Dates(Vec::new())
                }
            },
            Err(err) if err.is_connectivity() => {
                warn!(%url, error = %err, "date listing unreachable");
                DateDiscovery::Unreachable(err)
            }
            Err(err) => {
                warn!(%url, error = %err, "date listing unavailable");
                DateDiscovery::Dates(Vec::new())
            }
        }
    }

    async fn fetch_document(&self, hearing_date: NaiveDate) -> Result<Vec<u8>, FetchError> {
        let url = self.site.document_url(hearing_date);
        let resp = self.http.fetch_bytes(&url).await?;
        if resp.body.is_empty() {
            return Err(FetchError::NotFound {
                url: resp.final_url,
                status: resp.status.as_u16(),
            });
        }
        Ok(resp.body)
    }
}

// ---------------------------------------------------------------------------
// Text extraction and document-source strategies
// ---------------------------------------------------------------------------

/// Plain text of a document, one string per page in page order.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct DocumentText {
    pub pages: Vec<String>,
}

impl DocumentText {
    /// Pages split on form feed; trailing blank pages are dropped.
    pub fn from_form_feed_text(raw: &str) -> Self {
        let mut pages = raw
            .split('\u{000C}')
            .map(|chunk| chunk.replace('\u{0000}', ""))
            .collect::<Vec<_>>();
        while pages.last().is_some_and(|page| page.trim().is_empty()) {
            pages.pop();
        }
        Self { pages }
    }

    pub fn lines(&self) -> impl Iterator<Item = &str> + '_ {
        self.pages.iter().flat_map(|page| page.lines())
    }
}

pub trait TextExtractor: Send + Sync {
    fn extract(&self, bytes: &[u8]) -> Result<DocumentText, AdapterError>;
}

/// Runs poppler's `pdftotext` in layout mode so column gaps survive as runs
/// of spaces.
#[derive(Debug, Clone)]
pub struct PdfToTextExtractor {
    program: PathBuf,
}

impl Default for PdfToTextExtractor {
    fn default() -> Self {
        Self {
            program: PathBuf::from("pdftotext"),
        }
    }
}

impl PdfToTextExtractor {
    pub fn with_program(program: impl Into<PathBuf>) -> Self {
        Self {
            program: program.into(),
        }
    }

    fn run(&self, pdf_path: &Path) -> Result<String> {
        let output = Command::new(&self.program)
            .arg("-layout")
            .arg("-enc")
            .arg("UTF-8")
            .arg(pdf_path)
            .arg("-")
            .output()
            .with_context(|| {
                format!(
                    "failed to execute {} for {}",
                    self.program.display(),
                    pdf_path.display()
                )
            })?;

        if !output.status.success() {
            let stderr = String::from_utf8_lossy(&output.stderr);
            anyhow::bail!(
                "{} returned non-zero exit status for {}: {}",
                self.program.display(),
                pdf_path.display(),
                stderr.trim()
            );
        }
        Ok(String::from_utf8_lossy(&output.stdout).into_owned())
    }
}

impl TextExtractor for PdfToTextExtractor {
    fn extract(&self, bytes: &[u8]) -> Result<DocumentText, AdapterError> {
        let mut file = tempfile::Builder::new()
            .prefix("cause-list-")
            .suffix(".pdf")
            .tempfile()
            .context("creating temp document")?;
        file.write_all(bytes).context("writing temp document")?;
        file.flush().context("flushing temp document")?;

        let raw = self
            .run(file.path())
            .map_err(|e| AdapterError::Extraction(format!("{e:#}")))?;
        Ok(DocumentText::from_form_feed_text(&raw))
    }
}

/// Treats the bytes as already-extracted UTF-8 text (pages split on form feed).
#[derive(Debug, Clone, Copy, Default)]
pub struct PlainTextExtractor;

impl TextExtractor for PlainTextExtractor {
    fn extract(&self, bytes: &[u8]) -> Result<DocumentText, AdapterError> {
        Ok(DocumentText::from_form_feed_text(&String::from_utf8_lossy(
            bytes,
        )))
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum DocumentFormat {
    Pdf,
    Html,
}

impl DocumentFormat {
    pub fn extension(&self) -> &'static str {
        match self {
            DocumentFormat::Pdf => "pdf",
            DocumentFormat::Html => "html",
        }
    }
}

impl FromStr for DocumentFormat {
    type Err = AdapterError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "pdf" => Ok(DocumentFormat::Pdf),
            "html" | "htm" => Ok(DocumentFormat::Html),
            other => Err(AdapterError::Message(format!(
                "unknown document format {other:?} (expected pdf or html)"
            ))),
        }
    }
}

/// Turns one downloaded document into the ordered lines the parser consumes.
pub trait DocumentSource: Send + Sync {
    fn format(&self) -> DocumentFormat;

    /// False when serial numbers are synthesized, in which case the case
    /// number is the only trustworthy identity.
    fn provides_serials(&self) -> bool;

    fn lines(&self, bytes: &[u8]) -> Result<Vec<String>, AdapterError>;
}

pub struct PdfTextSource {
    extractor: Box<dyn TextExtractor>,
}

impl PdfTextSource {
    pub fn new(extractor: Box<dyn TextExtractor>) -> Self {
        Self { extractor }
    }
}

impl Default for PdfTextSource {
    fn default() -> Self {
        Self::new(Box::<PdfToTextExtractor>::default())
    }
}

impl DocumentSource for PdfTextSource {
    fn format(&self) -> DocumentFormat {
        DocumentFormat::Pdf
    }

    fn provides_serials(&self) -> bool {
        true
    }

    fn lines(&self, bytes: &[u8]) -> Result<Vec<String>, AdapterError> {
        let text = self.extractor.extract(bytes)?;
        Ok(text.lines().map(ToString::to_string).collect())
    }
}

/// Legacy HTML cause list: one line per `div.cause-entry` or table row, cells
/// separated by a two-space gap. Rows opening with a bare case number get a
/// running row number as their serial; rows opening with `AND` keep joining
/// the previous serial. Pages with neither fall back to long text blocks.
#[derive(Debug, Clone, Copy, Default)]
pub struct HtmlTableSource;

/// Shorter blocks of free page text are navigation or headings.
const MIN_TEXT_BLOCK_CHARS: usize = 50;

fn normalize_whitespace(text: &str) -> String {
    text.split_whitespace().collect::<Vec<_>>().join(" ")
}

fn parse_selector(selector: &str) -> Result<Selector, AdapterError> {
    Selector::parse(selector).map_err(|e| AdapterError::Message(e.to_string()))
}

impl DocumentSource for HtmlTableSource {
    fn format(&self) -> DocumentFormat {
        DocumentFormat::Html
    }

    fn provides_serials(&self) -> bool {
        false
    }

    fn lines(&self, bytes: &[u8]) -> Result<Vec<String>, AdapterError> {
        let document = Html::parse_document(&String::from_utf8_lossy(bytes));
        let entry_sel = parse_selector("div.cause-entry")?;
        let row_sel = parse_selector("tr")?;
        let cell_sel = parse_selector("td, th")?;

        let mut raw_lines = document
            .select(&entry_sel)
            .map(|entry| {
                entry
                    .text()
                    .map(normalize_whitespace)
                    .filter(|piece| !piece.is_empty())
                    .collect::<Vec<_>>()
                    .join("  ")
            })
            .collect::<Vec<_>>();

        if raw_lines.is_empty() {
            raw_lines = document
                .select(&row_sel)
                .map(|row| {
                    row.select(&cell_sel)
                        .map(|cell| normalize_whitespace(&cell.text().collect::<Vec<_>>().join(" ")))
                        .filter(|cell| !cell.is_empty())
                        .collect::<Vec<_>>()
                        .join("  ")
                })
                .collect();
        }

        if raw_lines.is_empty() {
            raw_lines = text_blocks(&document.root_element().text().collect::<String>());
        }

        let mut row_no = 0u32;
        Ok(raw_lines
            .into_iter()
            .filter(|line| !line.trim().is_empty())
            .map(|line| match classify_line(&line) {
                LineKind::PrimaryCase { serial, .. } => {
                    row_no = serial.parse().map_or(row_no, |n: u32| n.max(row_no));
                    line
                }
                LineKind::ConnectedCase { .. } if !LEADING_AND.is_match(&line) => {
                    row_no += 1;
                    format!("{row_no}  {}", line.trim())
                }
                _ => line,
            })
            .collect())
    }
}

/// Blank-line separated blocks of page text long enough to hold an entry,
/// each flattened to one line.
fn text_blocks(text: &str) -> Vec<String> {
    text.split("\n\n")
        .filter(|block| block.trim().chars().count() > MIN_TEXT_BLOCK_CHARS)
        .map(normalize_whitespace)
        .collect()
}

pub fn document_source(format: DocumentFormat) -> Arc<dyn DocumentSource> {
    match format {
        DocumentFormat::Pdf => Arc::new(PdfTextSource::default()),
        DocumentFormat::Html => Arc::new(HtmlTableSource),
    }
}

// ---------------------------------------------------------------------------
// Line classification
// ---------------------------------------------------------------------------

/// Case-number shape: `WP/111/2024`, `W.P.No.1234 of 2024`, `CRL.OP 55/2023`.
const CASE_NO_PATTERN: &str =
    r"[A-Z][A-Z.()]{0,15}(?:\s?(?i:no)\.?)?\s?/?\s?\d{1,7}\s?(?:/|\s(?i:of)\s)\s?(?:19|20)\d{2}\b";

static COURT_HEADER: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"^\s*(?i:court)\s+(?i:no)\.?\s*:?\s*(?P<num>\d{1,3})(?:\s?(?P<letter>[A-Z])\b)?")
        .expect("valid court header regex")
});

static PRIMARY_CASE: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(&format!(
        r"^\s*(?P<serial>\d{{1,4}})[.)]?\s+(?P<case>{CASE_NO_PATTERN})(?P<rest>.*)$"
    ))
    .expect("valid primary case regex")
});

static CONNECTED_CASE: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(&format!(
        r"^\s*(?:(?i:and)\s+)?(?P<case>{CASE_NO_PATTERN})(?P<rest>.*)$"
    ))
    .expect("valid connected case regex")
});

static CONTINUATION_MARKER: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"^\s*(?i:and)\s*$").expect("valid marker regex"));

static LEADING_AND: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"^\s*(?i:and)\s+").expect("valid leading and regex"));

static WIDE_GAP: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"[ \t]{2,}").expect("valid gap regex"));

static PARENTHESIZED: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"\(([^()]*)\)").expect("valid paren regex"));

static VS_TOKEN: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"(?i)\bvs\b\.?").expect("valid vs regex"));

/// What a single line of cause-list text is, by shape alone.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum LineKind<'a> {
    CourtHeader {
        court: String,
    },
    PrimaryCase {
        serial: &'a str,
        case_no: &'a str,
        remainder: &'a str,
    },
    ConnectedCase {
        case_no: &'a str,
        remainder: &'a str,
    },
    ContinuationMarker,
    Other,
}

impl LineKind<'_> {
    /// Lines that open (or announce) a new entry end the lookahead of the
    /// previous one.
    pub fn is_entry_boundary(&self) -> bool {
        !matches!(self, LineKind::Other)
    }
}

/// Classify by precedence: court header, primary case, continuation marker,
/// connected case, other.
pub fn classify_line(line: &str) -> LineKind<'_> {
    if let Some(caps) = COURT_HEADER.captures(line) {
        let num = caps.name("num").map_or("", |m| m.as_str());
        let num = match num.trim_start_matches('0') {
            "" => "0",
            trimmed => trimmed,
        };
        let letter = caps.name("letter").map_or("", |m| m.as_str());
        return LineKind::CourtHeader {
            court: format!("{num}{letter}"),
        };
    }

    if let Some(caps) = PRIMARY_CASE.captures(line) {
        if let (Some(serial), Some(case_no)) = (caps.name("serial"), caps.name("case")) {
            return LineKind::PrimaryCase {
                serial: serial.as_str(),
                case_no: case_no.as_str().trim(),
                remainder: caps.name("rest").map_or("", |m| m.as_str().trim()),
            };
        }
    }

    if CONTINUATION_MARKER.is_match(line) {
        return LineKind::ContinuationMarker;
    }

    if let Some(caps) = CONNECTED_CASE.captures(line) {
        if let Some(case_no) = caps.name("case") {
            return LineKind::ConnectedCase {
                case_no: case_no.as_str().trim(),
                remainder: caps.name("rest").map_or("", |m| m.as_str().trim()),
            };
        }
    }

    LineKind::Other
}

// ---------------------------------------------------------------------------
// Field heuristics
// ---------------------------------------------------------------------------

fn find_honorific(text: &str) -> Option<usize> {
    // ASCII upper-casing keeps byte offsets stable.
    let upper = text.to_ascii_uppercase();
    HONORIFICS
        .iter()
        .filter_map(|token| {
            let token = token.to_ascii_uppercase();
            upper
                .match_indices(&token)
                .map(|(idx, _)| idx)
                .find(|&idx| idx == 0 || upper[..idx].ends_with(char::is_whitespace))
        })
        .min()
}

/// Split a case line's remainder into `(petitioner, advocate)`: at the first
/// honorific if there is one, otherwise at the first wide gap.
pub fn split_party_and_advocate(remainder: &str) -> (String, String) {
    let remainder = remainder.trim();
    if let Some(idx) = find_honorific(remainder) {
        return (
            remainder[..idx].trim().to_string(),
            remainder[idx..].trim().to_string(),
        );
    }
    match WIDE_GAP.find(remainder) {
        Some(gap) => (
            remainder[..gap.start()].trim().to_string(),
            remainder[gap.end()..].trim().to_string(),
        ),
        None => (remainder.to_string(), String::new()),
    }
}

fn truncate_at_wide_gap(text: &str) -> &str {
    let text = text.trim();
    match WIDE_GAP.find(text) {
        Some(gap) => text[..gap.start()].trim(),
        None => text,
    }
}

#[derive(Debug, Clone, Default, PartialEq, Eq)]
struct LookaheadFields {
    case_type: Option<String>,
    respondent: Option<String>,
}

fn lookahead_window<'a>(following: &'a [&'a str]) -> &'a [&'a str] {
    let limit = following.len().min(LOOKAHEAD_LINES);
    let end = following[..limit]
        .iter()
        .position(|line| classify_line(line).is_entry_boundary())
        .unwrap_or(limit);
    &following[..end]
}

fn scan_lookahead(window: &[&str]) -> LookaheadFields {
    let mut fields = LookaheadFields::default();
    let mut seen_vs = false;

    for line in window {
        if fields.case_type.is_none() {
            fields.case_type = PARENTHESIZED
                .captures(line)
                .and_then(|caps| caps.get(1))
                .map(|m| m.as_str().trim().to_string())
                .filter(|inner| !inner.is_empty());
        }

        if fields.respondent.is_some() {
            continue;
        }
        if seen_vs {
            let candidate = truncate_at_wide_gap(line);
            if !candidate.is_empty() {
                fields.respondent = Some(candidate.to_string());
            }
        } else if let Some(vs) = VS_TOKEN.find(line) {
            seen_vs = true;
            let after = line[vs.end()..]
                .trim()
                .trim_start_matches('-')
                .trim();
            if after.chars().count() > 3 {
                fields.respondent = Some(after.to_string());
            }
        }
    }
    fields
}

// ---------------------------------------------------------------------------
// Entry parser
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Default)]
struct ParserState {
    current_court: String,
    current_serial: Option<String>,
}

/// Converts one document's lines into raw (unflagged, undeduplicated)
/// entries. Never fails: unreadable lines are skipped and unextractable
/// fields are left empty.
#[derive(Debug, Clone)]
pub struct EntryParser {
    hearing_date: NaiveDate,
}

impl EntryParser {
    pub fn new(hearing_date: NaiveDate) -> Self {
        Self { hearing_date }
    }

    pub fn parse<I, S>(&self, lines: I) -> Vec<CauseEntry>
    where
        I: IntoIterator<Item = S>,
        S: AsRef<str>,
    {
        let owned = lines
            .into_iter()
            .map(|line| line.as_ref().trim_end().to_string())
            .filter(|line| !line.trim().is_empty())
            .collect::<Vec<_>>();
        let lines = owned.iter().map(String::as_str).collect::<Vec<_>>();

        let mut state = ParserState::default();
        let mut entries = Vec::new();
        let mut idx = 0;

        while idx < lines.len() {
            let line = lines[idx];
            match classify_line(line) {
                LineKind::CourtHeader { court } => {
                    state.current_court = court;
                    idx += 1;
                }
                LineKind::PrimaryCase {
                    serial,
                    case_no,
                    remainder,
                } => {
                    state.current_serial = Some(serial.to_string());
                    entries.push(self.open_entry(
                        &state,
                        serial,
                        case_no,
                        remainder,
                        line,
                        &lines[idx + 1..],
                    ));
                    idx += 1;
                }
                LineKind::ContinuationMarker => {
                    let next = lines.get(idx + 1).copied();
                    match (state.current_serial.as_deref(), next.map(classify_line)) {
                        (
                            Some(serial),
                            Some(LineKind::ConnectedCase {
                                case_no,
                                remainder,
                            }),
                        ) => {
                            let connected_line = lines[idx + 1];
                            entries.push(self.open_entry(
                                &state,
                                serial,
                                case_no,
                                remainder,
                                connected_line,
                                &lines[idx + 2..],
                            ));
                            idx += 2;
                        }
                        _ => idx += 1,
                    }
                }
                LineKind::ConnectedCase { case_no, remainder } => {
                    if let Some(serial) = state.current_serial.as_deref() {
                        entries.push(self.open_entry(
                            &state,
                            serial,
                            case_no,
                            remainder,
                            line,
                            &lines[idx + 1..],
                        ));
                    }
                    idx += 1;
                }
                LineKind::Other => idx += 1,
            }
        }

        entries
    }

    fn open_entry(
        &self,
        state: &ParserState,
        serial: &str,
        case_no: &str,
        remainder: &str,
        line: &str,
        following: &[&str],
    ) -> CauseEntry {
        let mut entry = CauseEntry::new(serial, state.current_court.clone(), case_no, self.hearing_date);
        let (petitioner, advocate) = split_party_and_advocate(remainder);
        entry.petitioner = petitioner;
        entry.advocate = advocate;

        let fields = scan_lookahead(lookahead_window(following));
        entry.case_type = fields.case_type.unwrap_or_default();
        entry.respondent = fields.respondent.unwrap_or_default();
        entry.set_raw_text(line);
        entry
    }
}

// ---------------------------------------------------------------------------
// Domain flag classification
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Deserialize)]
struct KeywordsFile {
    keywords: Vec<String>,
}

/// Marks entries whose parties or source text mention a domain keyword.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DomainFlagClassifier {
    keywords: Vec<String>,
}

impl Default for DomainFlagClassifier {
    fn default() -> Self {
        Self::new(DEFAULT_DOMAIN_KEYWORDS.iter().copied())
    }
}

impl DomainFlagClassifier {
    pub fn new<I, S>(keywords: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: AsRef<str>,
    {
        let keywords = keywords
            .into_iter()
            .map(|k| k.as_ref().trim().to_uppercase())
            .filter(|k| !k.is_empty())
            .collect();
        Self { keywords }
    }

    /// `keywords: [..]` YAML document.
    pub fn from_yaml_str(yaml: &str) -> Result<Self, AdapterError> {
        let file: KeywordsFile = serde_yaml::from_str(yaml)
            .map_err(|e| AdapterError::Message(format!("invalid keywords yaml: {e}")))?;
        Ok(Self::new(file.keywords))
    }

    pub fn from_yaml_file(path: impl AsRef<Path>) -> Result<Self> {
        let path = path.as_ref();
        let text = fs::read_to_string(path).with_context(|| format!("reading {}", path.display()))?;
        Self::from_yaml_str(&text).with_context(|| format!("parsing {}", path.display()))
    }

    pub fn keywords(&self) -> &[String] {
        &self.keywords
    }

    pub fn matches_text(&self, text: &str) -> bool {
        if text.is_empty() {
            return false;
        }
        let upper = text.to_uppercase();
        self.keywords.iter().any(|k| upper.contains(k.as_str()))
    }

    pub fn is_flagged(&self, entry: &CauseEntry) -> bool {
        [&entry.petitioner, &entry.respondent, &entry.raw_text]
            .into_iter()
            .any(|field| self.matches_text(field))
    }

    pub fn apply(&self, entries: &mut [CauseEntry]) {
        for entry in entries {
            entry.is_flagged = self.is_flagged(entry);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn hearing_date() -> NaiveDate {
        NaiveDate::from_ymd_opt(2024, 7, 1).unwrap()
    }

    fn parse(lines: &[&str]) -> Vec<CauseEntry> {
        EntryParser::new(hearing_date()).parse(lines.iter().copied())
    }

    #[test]
    fn classifies_each_line_kind() {
        assert_eq!(
            classify_line("   COURT NO. 05"),
            LineKind::CourtHeader { court: "5".into() }
        );
        assert_eq!(
            classify_line("COURT NO. 12A"),
            LineKind::CourtHeader { court: "12A".into() }
        );
        assert_eq!(
            classify_line("3 WP/111/2024 ABC Temple Mr. X"),
            LineKind::PrimaryCase {
                serial: "3",
                case_no: "WP/111/2024",
                remainder: "ABC Temple Mr. X",
            }
        );
        assert_eq!(classify_line("  AND "), LineKind::ContinuationMarker);
        assert_eq!(
            classify_line("AND WP/112/2024 DEF Co"),
            LineKind::ConnectedCase {
                case_no: "WP/112/2024",
                remainder: "DEF Co",
            }
        );
        assert_eq!(classify_line("THE STATE OF TAMIL NADU"), LineKind::Other);
    }

    #[test]
    fn recognises_long_form_case_numbers() {
        match classify_line("12. W.P.No.1234 of 2024  K. MURUGAN  M/S. R. KUMAR") {
            LineKind::PrimaryCase { serial, case_no, remainder } => {
                assert_eq!(serial, "12");
                assert_eq!(case_no, "W.P.No.1234 of 2024");
                assert_eq!(remainder, "K. MURUGAN  M/S. R. KUMAR");
            }
            other => panic!("unexpected {other:?}"),
        }
        assert!(matches!(
            classify_line("CRL.OP 55/2023 SELVAM"),
            LineKind::ConnectedCase { case_no: "CRL.OP 55/2023", .. }
        ));
    }

    #[test]
    fn connected_cases_share_the_primary_serial() {
        let entries = parse(&[
            "3 WP/111/2024 ABC Temple Mr. X",
            "AND",
            "WP/112/2024 DEF Co Ms. Y",
        ]);
        assert_eq!(entries.len(), 2);
        assert!(entries.iter().all(|e| e.serial_no == "3"));
        assert_eq!(entries[0].case_no, "WP/111/2024");
        assert_eq!(entries[1].case_no, "WP/112/2024");
        assert_eq!(entries[1].petitioner, "DEF Co");
        assert_eq!(entries[1].advocate, "Ms. Y");
        assert_eq!(entries[1].raw_text, "WP/112/2024 DEF Co Ms. Y");
    }

    #[test]
    fn split_prefers_honorific_then_wide_gap() {
        assert_eq!(
            split_party_and_advocate("ABC Ltd  Mr. X Ramesh"),
            ("ABC Ltd".to_string(), "Mr. X Ramesh".to_string())
        );
        assert_eq!(
            split_party_and_advocate("ABC Ltd    XYZ Corp"),
            ("ABC Ltd".to_string(), "XYZ Corp".to_string())
        );
        assert_eq!(
            split_party_and_advocate("SOLE PETITIONER"),
            ("SOLE PETITIONER".to_string(), String::new())
        );
    }

    #[test]
    fn honorific_must_start_a_word() {
        let (petitioner, advocate) = split_party_and_advocate("GREEN FARMS. LTD  M/S. A. KRISHNAN");
        assert_eq!(petitioner, "GREEN FARMS. LTD");
        assert_eq!(advocate, "M/S. A. KRISHNAN");
    }

    #[test]
    fn unrecognised_line_between_cases_is_ignored() {
        let entries = parse(&[
            "1 WP/10/2024 FIRST PETITIONER  Mr. A",
            "~~~ garbled ~~~ 12//",
            "2 WP/20/2024 SECOND PETITIONER  Mr. B",
        ]);
        assert_eq!(entries.len(), 2);
        assert_eq!(entries[0].petitioner, "FIRST PETITIONER");
        assert_eq!(entries[1].petitioner, "SECOND PETITIONER");
        assert_eq!(entries[1].serial_no, "2");
    }

    #[test]
    fn lookahead_collects_case_type_and_respondent() {
        let entries = parse(&[
            "COURT NO. 7",
            "4 WP/300/2024 ARULMIGU SRI RANGANATHASWAMY TEMPLE  Mr. S. SELVAM",
            "(WRIT PETITION)",
            "VS",
            "THE COMMISSIONER HR&CE       Mr. GOVT PLEADER",
        ]);
        assert_eq!(entries.len(), 1);
        let entry = &entries[0];
        assert_eq!(entry.court_no, "7");
        assert_eq!(entry.case_type, "WRIT PETITION");
        assert_eq!(entry.respondent, "THE COMMISSIONER HR&CE");
        assert_eq!(entry.advocate, "Mr. S. SELVAM");
    }

    #[test]
    fn respondent_on_the_vs_line_wins() {
        let entries = parse(&[
            "1 WP/1/2024 K. MURUGAN",
            "vs -- STATE OF TAMIL NADU",
            "IGNORED NEXT LINE",
        ]);
        assert_eq!(entries[0].respondent, "STATE OF TAMIL NADU");
    }

    #[test]
    fn short_text_after_vs_defers_to_next_line() {
        let entries = parse(&["1 WP/1/2024 K. MURUGAN", "VS ..", "R. KUMAR   Mr. X"]);
        assert_eq!(entries[0].respondent, "R. KUMAR");
    }

    #[test]
    fn lookahead_stops_at_next_case_line() {
        let entries = parse(&[
            "1 WP/1/2024 FIRST",
            "2 WP/2/2024 SECOND",
            "(WRIT APPEAL)",
            "VS STATE OF TAMIL NADU",
        ]);
        assert_eq!(entries[0].case_type, "");
        assert_eq!(entries[0].respondent, "");
        assert_eq!(entries[1].case_type, "WRIT APPEAL");
        assert_eq!(entries[1].respondent, "STATE OF TAMIL NADU");
    }

    #[test]
    fn lookahead_is_bounded() {
        let entries = parse(&[
            "1 WP/1/2024 FIRST",
            "line a",
            "line b",
            "line c",
            "line d",
            "line e",
            "(TOO FAR)",
        ]);
        assert_eq!(entries[0].case_type, "");
    }

    #[test]
    fn marker_followed_by_noise_is_skipped() {
        let entries = parse(&["5 WP/50/2024 A  Mr. B", "AND", "not a case line", "WP/51/2024 C"]);
        assert_eq!(entries.len(), 2);
        assert_eq!(entries[1].serial_no, "5");
        assert_eq!(entries[1].case_no, "WP/51/2024");
    }

    #[test]
    fn connected_lines_need_an_open_serial() {
        let entries = parse(&["COURT NO. 1", "AND", "WP/9/2024 ORPHAN", "WP/10/2024 ALSO ORPHAN"]);
        assert!(entries.is_empty());
    }

    #[test]
    fn court_header_is_sticky_across_entries() {
        let entries = parse(&[
            "COURT NO. 3",
            "1 WP/1/2024 A",
            "2 WP/2/2024 B",
            "COURT NO. 4B",
            "1 WA/1/2024 C",
        ]);
        let courts = entries.iter().map(|e| e.court_no.as_str()).collect::<Vec<_>>();
        assert_eq!(courts, vec!["3", "3", "4B"]);
    }

    #[test]
    fn flags_match_any_field_case_insensitively() {
        let classifier = DomainFlagClassifier::default();
        let mut entries = parse(&[
            "1 WP/1/2024 sri kapaleeshwarar temple  Mr. A",
            "2 WP/2/2024 R. KUMAR  Mr. B",
            "VS THE DEVASTHANAM BOARD",
            "3 WP/3/2024 S. SELVAM  Mr. C",
        ]);
        classifier.apply(&mut entries);
        let flags = entries.iter().map(|e| e.is_flagged).collect::<Vec<_>>();
        assert_eq!(flags, vec![true, true, false]);
    }

    #[test]
    fn keyword_list_can_come_from_yaml() {
        let classifier = DomainFlagClassifier::from_yaml_str("keywords:\n  - Wakf\n  - ' '\n").unwrap();
        assert_eq!(classifier.keywords(), ["WAKF".to_string()]);
        assert!(classifier.matches_text("tamil nadu wakf board"));
        assert!(!classifier.matches_text("arulmigu temple"));
        assert!(DomainFlagClassifier::from_yaml_str("keywords: 3").is_err());
    }

    #[test]
    fn document_url_uses_day_month_year() {
        let site = CauseListSite::new("https://example.test/clists/");
        let date = NaiveDate::from_ymd_opt(2024, 3, 7).unwrap();
        assert_eq!(
            site.document_url(date),
            "https://example.test/clists/causelists/pdf/cause_07032024.pdf"
        );
        assert_eq!(site.dates_url(), "https://example.test/clists/api/getDate.php?toc=1");
    }

    #[test]
    fn listing_dates_are_sorted_and_distinct() {
        let body = br#"[{"date":"2024-07-02"},{"date":"2024-07-01 00:00:00"},{"cdate":"2024-07-02"},{"other":"x"}]"#;
        let dates = parse_listing_dates(body).unwrap();
        assert_eq!(
            dates,
            vec![
                NaiveDate::from_ymd_opt(2024, 7, 1).unwrap(),
                NaiveDate::from_ymd_opt(2024, 7, 2).unwrap(),
            ]
        );
        assert!(parse_listing_dates(b"<html>").is_err());
        assert!(parse_listing_dates(br#"{"date":"2024-07-01"}"#).is_err());
    }

    #[test]
    fn plain_text_pages_split_on_form_feed() {
        let text = PlainTextExtractor
            .extract(b"COURT NO. 1\n1 WP/1/2024 A\x0c2 WP/2/2024 B\n\x0c  \n")
            .unwrap();
        assert_eq!(text.pages.len(), 2);
        assert_eq!(text.lines().count(), 3);
    }

    #[test]
    fn missing_pdftotext_is_an_extraction_error() {
        let extractor = PdfToTextExtractor::with_program("/nonexistent/bin/pdftotext");
        let err = extractor.extract(b"%PDF-1.4").unwrap_err();
        assert!(matches!(err, AdapterError::Extraction(_)));
    }

    #[test]
    fn html_rows_without_serials_get_row_numbers() {
        let html = br#"<table>
            <tr><th>COURT NO. 2</th></tr>
            <tr><td>WP/1/2024</td><td>ARULMIGU TEMPLE</td><td>Mr. A</td></tr>
            <tr><td>WP/2/2024</td><td>K. MURUGAN</td><td>Ms. B</td></tr>
        </table>"#;
        let source = HtmlTableSource;
        let lines = source.lines(html).unwrap();
        assert_eq!(
            lines,
            vec![
                "COURT NO. 2".to_string(),
                "1  WP/1/2024  ARULMIGU TEMPLE  Mr. A".to_string(),
                "2  WP/2/2024  K. MURUGAN  Ms. B".to_string(),
            ]
        );
        assert!(!source.provides_serials());

        let entries = EntryParser::new(hearing_date()).parse(&lines);
        assert_eq!(entries.len(), 2);
        assert_eq!(entries[0].court_no, "2");
        assert_eq!(entries[0].petitioner, "ARULMIGU TEMPLE");
        assert_eq!(entries[1].advocate, "Ms. B");
    }

    #[test]
    fn html_and_rows_stay_connected_to_previous_serial() {
        let html = br#"<table>
            <tr><td>1</td><td>WP/1/2024</td><td>A TEMPLE</td><td>Mr. A</td></tr>
            <tr><td>AND WP/2/2024</td><td>B CO</td><td>Ms. B</td></tr>
            <tr><td>WP/3/2024</td><td>C TRUST</td><td>Mr. C</td></tr>
        </table>"#;
        let lines = HtmlTableSource.lines(html).unwrap();
        assert_eq!(
            lines,
            vec![
                "1  WP/1/2024  A TEMPLE  Mr. A".to_string(),
                "AND WP/2/2024  B CO  Ms. B".to_string(),
                "2  WP/3/2024  C TRUST  Mr. C".to_string(),
            ]
        );

        let entries = EntryParser::new(hearing_date()).parse(&lines);
        let keys = entries
            .iter()
            .map(|e| (e.serial_no.as_str(), e.case_no.as_str()))
            .collect::<Vec<_>>();
        assert_eq!(
            keys,
            vec![("1", "WP/1/2024"), ("1", "WP/2/2024"), ("2", "WP/3/2024")]
        );
        assert_eq!(entries[1].petitioner, "B CO");
    }

    #[test]
    fn html_row_numbers_continue_after_explicit_serials() {
        let html = br#"<table>
            <tr><td>7</td><td>WP/70/2024</td><td>A TEMPLE</td><td>Mr. A</td></tr>
            <tr><td>WP/71/2024</td><td>B CO</td><td>Ms. B</td></tr>
        </table>"#;
        let lines = HtmlTableSource.lines(html).unwrap();
        assert_eq!(lines[1], "8  WP/71/2024  B CO  Ms. B");
    }

    #[test]
    fn html_without_rows_falls_back_to_long_text_blocks() {
        let html = b"<p>Home</p>\n\n<p>WP/7/2024 SRI RANGANATHA SWAMY\n TEMPLE TRUST Mr. R. Kumar</p>\n\n<p>WP/8/2024 ARULMIGU KAPALEESWARAR TEMPLE MYLAPORE Ms. S. Devi</p>";
        let lines = HtmlTableSource.lines(html).unwrap();
        assert_eq!(
            lines,
            vec![
                "1  WP/7/2024 SRI RANGANATHA SWAMY TEMPLE TRUST Mr. R. Kumar".to_string(),
                "2  WP/8/2024 ARULMIGU KAPALEESWARAR TEMPLE MYLAPORE Ms. S. Devi".to_string(),
            ]
        );
    }

    #[test]
    fn document_format_parses_case_insensitively() {
        assert_eq!("PDF".parse::<DocumentFormat>().unwrap(), DocumentFormat::Pdf);
        assert_eq!("htm".parse::<DocumentFormat>().unwrap(), DocumentFormat::Html);
        assert!("docx".parse::<DocumentFormat>().is_err());
    }
}
