//! HTML and script scraping for the router's admin pages

use crate::error::ResolveError;
use crate::models::{DeviceRecord, SessionToken};
use regex::Regex;
use scraper::{ElementRef, Html, Selector};
use serde::Deserialize;

/// Ways the login response can hand out the session id, in the order they are tried
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TokenPattern {
    /// `setCookie('<token>')`
    SetCookie,
    /// One or more `document.cookie = '<fragment>'` assignments
    DocumentCookie,
}

impl TokenPattern {
    pub const ALL: [TokenPattern; 2] = [TokenPattern::SetCookie, TokenPattern::DocumentCookie];

    /// Raw token text, before normalization into a cookie value
    pub fn extract(self, body: &str) -> Option<String> {
        match self {
            Self::SetCookie => {
                let token = Regex::new(r#"setCookie\(\s*['"]([^'"]+)['"]\s*\)"#)
                    .ok()?
                    .captures(body)?
                    .get(1)?
                    .as_str()
                    .trim()
                    .to_string();
                (!token.is_empty()).then_some(token)
            }
            Self::DocumentCookie => {
                let re = Regex::new(r#"document\.cookie\s*=\s*(?:'([^']*)'|"([^"]*)")"#).ok()?;
                let fragments: Vec<&str> = re
                    .captures_iter(body)
                    .filter_map(|caps| caps.get(1).or_else(|| caps.get(2)))
                    .map(|m| m.as_str().trim())
                    .filter(|s| !s.is_empty())
                    .collect();
                (!fragments.is_empty()).then(|| fragments.join("; "))
            }
        }
    }
}

/// Find the session token in a login response body.
///
/// The first pattern that yields a non-empty token wins.
pub fn extract_session_token(body: &str) -> Option<SessionToken> {
    TokenPattern::ALL.iter().find_map(|pattern| {
        let raw = pattern.extract(body)?;
        tracing::debug!("Session token matched {:?}", pattern);
        SessionToken::from_raw(&raw)
    })
}

/// Row layouts found across router firmware versions
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RowLayout {
    /// Name in `td:nth(2) .wol_main_span`, MAC in a hidden `wakeupchk` input
    LabeledColumn,
    /// Two sibling spans holding MAC then name
    PairedSpan,
}

/// Which row layouts to try, from configuration
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum ListingLayout {
    #[default]
    Auto,
    LabeledColumn,
    PairedSpan,
}

impl ListingLayout {
    pub fn layouts(self) -> &'static [RowLayout] {
        match self {
            Self::Auto => &[RowLayout::LabeledColumn, RowLayout::PairedSpan],
            Self::LabeledColumn => &[RowLayout::LabeledColumn],
            Self::PairedSpan => &[RowLayout::PairedSpan],
        }
    }
}

struct Selectors {
    row: Selector,
    cell: Selector,
    label: Selector,
    wake_input: Selector,
    span: Selector,
    mac: Regex,
}

impl Selectors {
    fn new() -> Result<Self, ResolveError> {
        fn css(s: &str) -> Result<Selector, ResolveError> {
            Selector::parse(s)
                .map_err(|e| ResolveError::MalformedListing(format!("selector '{}': {:?}", s, e)))
        }

        Ok(Self {
            row: css("tr.wol_main_tr")?,
            cell: css("td")?,
            label: css(".wol_main_span")?,
            wake_input: css(r#"input[name="wakeupchk"]"#)?,
            span: css("span")?,
            mac: Regex::new(r"^[0-9A-Fa-f]{2}([:-][0-9A-Fa-f]{2}){5}$")
                .map_err(|e| ResolveError::MalformedListing(e.to_string()))?,
        })
    }

    fn is_mac(&self, s: &str) -> bool {
        self.mac.is_match(s)
    }
}

fn element_text(el: ElementRef<'_>) -> String {
    el.text().collect::<String>().trim().to_string()
}

impl RowLayout {
    fn parse_row(self, row: ElementRef<'_>, sel: &Selectors) -> Option<DeviceRecord> {
        let (display_name, hardware_address) = match self {
            Self::LabeledColumn => {
                let label = row.select(&sel.cell).nth(2)?.select(&sel.label).next()?;
                let mac = row
                    .select(&sel.wake_input)
                    .next()?
                    .value()
                    .attr("value")?
                    .trim()
                    .to_string();
                (element_text(label), mac)
            }
            Self::PairedSpan => {
                // First adjacent span pair whose leading span holds a MAC
                let (mac, name) = row.select(&sel.span).find_map(|span| {
                    let mac = element_text(span);
                    if !sel.is_mac(&mac) {
                        return None;
                    }
                    let next = span.next_siblings().find_map(ElementRef::wrap)?;
                    (next.value().name() == "span").then(|| (mac, element_text(next)))
                })?;
                (name, mac)
            }
        };

        // A row whose address field is not a MAC belongs to some other layout
        if !sel.is_mac(&hardware_address) {
            return None;
        }

        Some(DeviceRecord {
            display_name,
            hardware_address,
        })
    }
}

/// Parse every device row in document order, skipping rows no layout recognizes.
///
/// Returns the parsed records and the number of marker rows seen.
pub fn parse_device_list(
    html: &str,
    layouts: &[RowLayout],
) -> Result<(Vec<DeviceRecord>, usize), ResolveError> {
    let sel = Selectors::new()?;
    let document = Html::parse_document(html);

    let mut rows = 0;
    let mut records = Vec::new();
    for row in document.select(&sel.row) {
        rows += 1;
        match layouts.iter().find_map(|layout| layout.parse_row(row, &sel)) {
            Some(record) => records.push(record),
            None => tracing::debug!("Row {} matches no known layout", rows),
        }
    }

    Ok((records, rows))
}

/// Find the first row whose display name equals `target_name`.
pub fn find_device(
    html: &str,
    target_name: &str,
    layouts: &[RowLayout],
) -> Result<DeviceRecord, ResolveError> {
    let target = target_name.trim();
    let (records, rows) = parse_device_list(html, layouts)?;

    if rows > 0 && records.is_empty() {
        return Err(ResolveError::MalformedListing(format!(
            "{} device rows, none in a known layout",
            rows
        )));
    }

    records
        .into_iter()
        .find(|record| record.display_name == target)
        .ok_or_else(|| ResolveError::DeviceNotFound(target.to_string()))
}
