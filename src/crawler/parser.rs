//! HTML parsers for catalogue pages
//!
//! This module turns fetched HTML into typed values:
//! - Listing pages yield the ordered book links and the optional next page
//! - Detail pages yield a [`ParsedBook`]
//!
//! All links are returned as absolute URLs. Detail pages are validated at the
//! boundary: a page without a name fails instead of producing a partial record.

use crate::catalog::{ParsedBook, Price};
use scraper::{ElementRef, Html, Selector};
use thiserror::Error;
use url::Url;

/// Errors raised while extracting data from a page
#[derive(Debug, Clone, PartialEq, Error)]
pub enum ParseError {
    #[error("Missing element: {0}")]
    MissingElement(&'static str),

    #[error("Missing field: {0}")]
    MissingField(&'static str),

    #[error("Invalid value for {field}: {value:?}")]
    InvalidField { field: &'static str, value: String },

    #[error("Invalid URL: {0}")]
    InvalidUrl(String),
}

/// Links extracted from one listing page
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ParsedListing {
    /// Book detail links in page order (absolute URLs)
    pub book_links: Vec<String>,

    /// The next listing page, absent on the last page
    pub next_page: Option<String>,
}

/// Maps raw page HTML to typed crawl input
///
/// Implementations must be pure: the same input always yields the same output.
pub trait PageParser: Send + Sync {
    /// Extracts book links and the next-page link from a listing page
    ///
    /// Relative links are resolved against `page_url`.
    fn parse_listing(&self, html: &str, page_url: &Url) -> Result<ParsedListing, ParseError>;

    /// Extracts the book fields from a detail page fetched from `source_url`
    fn parse_detail(&self, html: &str, source_url: &str) -> Result<ParsedBook, ParseError>;
}

/// Parser for the books.toscrape.com page layout
#[derive(Debug, Clone, Copy, Default)]
pub struct CatalogueParser;

impl CatalogueParser {
    pub fn new() -> Self {
        Self
    }
}

impl PageParser for CatalogueParser {
    fn parse_listing(&self, html: &str, page_url: &Url) -> Result<ParsedListing, ParseError> {
        let document = Html::parse_document(html);

        let anchors = select_all(&document, ".product_pod h3 a");
        let mut book_links = Vec::with_capacity(anchors.len());
        for anchor in anchors {
            let href = anchor
                .value()
                .attr("href")
                .ok_or(ParseError::MissingField("book link href"))?;
            book_links.push(resolve_link(href, page_url)?);
        }

        let next_page = match select_first(&document, "li.next a") {
            Some(anchor) => {
                let href = anchor
                    .value()
                    .attr("href")
                    .ok_or(ParseError::MissingField("next page href"))?;
                Some(resolve_link(href, page_url)?)
            }
            None => None,
        };

        // A page with neither books nor a way forward is not a listing page
        if book_links.is_empty() && next_page.is_none() && !has_match(&document, ".product_pod") {
            return Err(ParseError::MissingElement(".product_pod"));
        }

        Ok(ParsedListing {
            book_links,
            next_page,
        })
    }

    fn parse_detail(&self, html: &str, source_url: &str) -> Result<ParsedBook, ParseError> {
        let page_url =
            Url::parse(source_url).map_err(|_| ParseError::InvalidUrl(source_url.to_string()))?;
        let document = Html::parse_document(html);

        let name = select_first(&document, "h1")
            .map(element_text)
            .ok_or(ParseError::MissingElement("h1"))?;
        if name.is_empty() {
            return Err(ParseError::MissingField("name"));
        }

        let table = product_table(&document);
        let lookup = |key: &str| {
            table
                .iter()
                .find(|(header, _)| header == key)
                .map(|(_, value)| value.as_str())
        };

        let price = Price {
            including_tax: parse_price("price_including_tax", lookup("Price (incl. tax)"))?,
            excluding_tax: parse_price("price_excluding_tax", lookup("Price (excl. tax)"))?,
        };

        let num_reviews = lookup("Number of reviews")
            .map(|value| {
                value.parse::<u32>().map_err(|_| ParseError::InvalidField {
                    field: "num_reviews",
                    value: value.to_string(),
                })
            })
            .transpose()?;

        let availability = select_first(&document, ".instock.availability")
            .map(element_text)
            .or_else(|| lookup("Availability").map(str::to_string))
            .filter(|s| !s.is_empty());

        let image_url = select_first(&document, ".item.active img")
            .or_else(|| select_first(&document, "#product_gallery img"))
            .and_then(|img| img.value().attr("src"))
            .map(|src| resolve_link(src, &page_url))
            .transpose()?;

        Ok(ParsedBook {
            source_url: page_url.to_string(),
            upc: lookup("UPC").map(str::to_string).filter(|s| !s.is_empty()),
            name,
            description: select_first(&document, "#product_description ~ p")
                .map(element_text)
                .filter(|s| !s.is_empty()),
            category: select_first(&document, "ul.breadcrumb li:nth-of-type(3) a")
                .map(element_text)
                .filter(|s| !s.is_empty()),
            price,
            availability,
            num_reviews,
            image_url,
            rating: select_first(&document, ".star-rating").and_then(star_rating),
        })
    }
}

fn select_first<'a>(document: &'a Html, css: &str) -> Option<ElementRef<'a>> {
    let selector = Selector::parse(css).ok()?;
    document.select(&selector).next()
}

fn select_all<'a>(document: &'a Html, css: &str) -> Vec<ElementRef<'a>> {
    match Selector::parse(css) {
        Ok(selector) => document.select(&selector).collect(),
        Err(_) => Vec::new(),
    }
}

fn has_match(document: &Html, css: &str) -> bool {
    select_first(document, css).is_some()
}

/// Element text with runs of whitespace collapsed to single spaces
fn element_text(element: ElementRef<'_>) -> String {
    element
        .text()
        .collect::<String>()
        .split_whitespace()
        .collect::<Vec<_>>()
        .join(" ")
}

/// Header/value pairs from the product information table
fn product_table(document: &Html) -> Vec<(String, String)> {
    let (Ok(row), Ok(th), Ok(td)) = (
        Selector::parse("table tr"),
        Selector::parse("th"),
        Selector::parse("td"),
    ) else {
        return Vec::new();
    };

    document
        .select(&row)
        .filter_map(|tr| {
            let header = tr.select(&th).next().map(element_text)?;
            let value = tr.select(&td).next().map(element_text)?;
            Some((header, value))
        })
        .collect()
}

/// Parses a price cell such as `£51.77`
///
/// A missing cell reads as zero; a present but unreadable one is an error.
fn parse_price(field: &'static str, cell: Option<&str>) -> Result<f64, ParseError> {
    let Some(cell) = cell else {
        return Ok(0.0);
    };

    let amount = cell.trim_start_matches(|c: char| !c.is_ascii_digit() && c != '.' && c != '-');
    amount.parse::<f64>().map_err(|_| ParseError::InvalidField {
        field,
        value: cell.to_string(),
    })
}

/// Reads the rating from a class such as `star-rating Three`
fn star_rating(element: ElementRef<'_>) -> Option<u8> {
    element.value().classes().find_map(|class| match class {
        "One" => Some(1),
        "Two" => Some(2),
        "Three" => Some(3),
        "Four" => Some(4),
        "Five" => Some(5),
        _ => None,
    })
}

/// Resolves a link href to an absolute http(s) URL
fn resolve_link(href: &str, base_url: &Url) -> Result<String, ParseError> {
    let href = href.trim();
    if href.is_empty() {
        return Err(ParseError::InvalidUrl(href.to_string()));
    }

    match base_url.join(href) {
        Ok(absolute) if absolute.scheme() == "http" || absolute.scheme() == "https" => {
            Ok(absolute.to_string())
        }
        _ => Err(ParseError::InvalidUrl(href.to_string())),
    }
}
