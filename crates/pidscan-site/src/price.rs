use lazy_static::lazy_static;
use regex::Regex;
use scraper::{Html, Selector};

use crate::catalog::{body_text, text_of};

const CURRENCY: char = '¥';
const FEE_LABEL: &str = "费用";

lazy_static! {
    static ref SUMMARY: Selector = Selector::parse(".ordersummarybottom-title").unwrap();
    static ref SUMMARY_PRICE: Selector = Selector::parse(".ordersummarybottom-price").unwrap();
    static ref SUMMARY_INTEGER: Selector = Selector::parse(".pricePositioning").unwrap();
    static ref ANY: Selector = Selector::parse("*").unwrap();
    static ref NUMBER: Regex = Regex::new(r"^\d+\.?\d*$").unwrap();
    static ref AMOUNT: Regex = Regex::new(r"¥\s*([\d,]+\.?\d*)").unwrap();
    static ref TOTAL: Regex = Regex::new(r"费用合计[：:]\s*¥\s*([\d,]+\.?\d*)").unwrap();
}

/// Strips thousands separators and prefixes the currency sign, `None` when
/// `raw` is not a plain decimal
pub fn normalize_price(raw: &str) -> Option<String> {
    let digits = raw.trim().replace(',', "");
    NUMBER
        .is_match(&digits)
        .then(|| format!("{CURRENCY}{digits}"))
}

fn first_amount(text: &str) -> Option<String> {
    AMOUNT
        .captures(text)
        .and_then(|caps| normalize_price(&caps[1]))
}

/// Tries the known layouts from most to least specific
pub(crate) fn extract_price(doc: &Html) -> Option<String> {
    summary_price(doc)
        .or_else(|| labelled_total(doc))
        .or_else(|| fee_element(doc))
        .or_else(|| plausible_amount(doc))
}

/// The order summary block, either one price element or integer and
/// fraction split across two
fn summary_price(doc: &Html) -> Option<String> {
    let container = doc.select(&SUMMARY).next()?;
    if let Some(price_el) = container.select(&SUMMARY_PRICE).next() {
        let fraction = text_of(price_el);
        if let Some(price) = normalize_price(&fraction) {
            return Some(price);
        }
        if let Some(integer_el) = container.select(&SUMMARY_INTEGER).next() {
            let joined = format!("{}{}", text_of(integer_el).trim(), fraction.trim());
            if let Some(price) = normalize_price(&joined) {
                return Some(price);
            }
        }
    }
    first_amount(&text_of(container))
}

fn labelled_total(doc: &Html) -> Option<String> {
    TOTAL
        .captures(&body_text(doc))
        .and_then(|caps| normalize_price(&caps[1]))
}

fn fee_element(doc: &Html) -> Option<String> {
    doc.select(&ANY)
        .map(text_of)
        .filter(|text| text.contains(FEE_LABEL))
        .find_map(|text| first_amount(&text))
}

/// Last resort: the first amount on the page within a sane range
fn plausible_amount(doc: &Html) -> Option<String> {
    let text = body_text(doc);
    AMOUNT
        .captures_iter(&text)
        .filter_map(|caps| normalize_price(&caps[1]))
        .find(|price| {
            price
                .trim_start_matches(CURRENCY)
                .parse::<f64>()
                .is_ok_and(|value| (1.0..=9_999_999.0).contains(&value))
        })
}
