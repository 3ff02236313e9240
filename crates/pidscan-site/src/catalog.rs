use lazy_static::lazy_static;
use pidscan_scanner::{FailureCode, PageClassifier, Snapshot};
use scraper::{ElementRef, Html, Selector};

use crate::price;

pub const POPUP_SELECTOR: &str = r#"input[type="button"].layer-cancel[value="已阅读知晓"]"#;

const NOT_FOUND_NOTICE: &str = "抱歉找不到页面";
const MIN_BODY_CHARS: usize = 100;
const MAX_NAV_REGIONS: usize = 3;

lazy_static! {
    static ref TITLE: Selector = Selector::parse("title").unwrap();
    static ref BODY: Selector = Selector::parse("body").unwrap();
    static ref LOADED: Selector =
        Selector::parse(".allocation-header-title, .os-card, .configureproduct").unwrap();
    static ref CONTENT: Selector = Selector::parse(
        ".allocation-header-title, .os-card, .configureproduct, .sky-cart-menu-item"
    )
    .unwrap();
    static ref MAINTENANCE: Selector = Selector::parse(".maintain-text-title").unwrap();
    static ref PRODUCT_NAME: Selector = Selector::parse(".allocation-header-title h1").unwrap();
    static ref OS_CARD: Selector = Selector::parse(".os-card").unwrap();
    static ref REGION_ITEM: Selector = Selector::parse(".sky-cart-menu-item").unwrap();
    static ref CYCLE_GROUP: Selector =
        Selector::parse(".sky-btn-group.btn-group-toggle").unwrap();
    static ref CONFIG_BUTTON: Selector = Selector::parse(".sky-config-btn").unwrap();
    static ref CONFIG_AREA: Selector = Selector::parse(".configureproduct").unwrap();
    static ref BUY_BUTTON: Selector = Selector::parse(".btn-buyNow").unwrap();
}

pub(crate) fn text_of(element: ElementRef) -> String {
    element.text().collect()
}

pub(crate) fn body_text(doc: &Html) -> String {
    doc.select(&BODY).next().map(text_of).unwrap_or_default()
}

fn page_title(doc: &Html) -> String {
    doc.select(&TITLE)
        .next()
        .map(|el| text_of(el).trim().to_string())
        .unwrap_or_default()
}

fn has_text(element: Option<ElementRef>) -> bool {
    element.is_some_and(|el| !text_of(el).trim().is_empty())
}

/// The structural markers a product configuration page is recognized by
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct PageFlags {
    pub product_name: bool,
    pub os_card: bool,
    /// More region entries than a product page's sidebar carries
    pub region_menu: bool,
    pub cycle_options: bool,
    pub config_options: bool,
    pub config_area: bool,
    pub buy_button: bool,
}

impl PageFlags {
    pub fn inspect(doc: &Html) -> Self {
        let cycle_options = doc.select(&CYCLE_GROUP).next().is_some_and(|group| {
            group.children().any(|child| child.value().is_element())
        });
        Self {
            product_name: has_text(doc.select(&PRODUCT_NAME).next()),
            os_card: doc.select(&OS_CARD).next().is_some(),
            region_menu: doc.select(&REGION_ITEM).count() > MAX_NAV_REGIONS,
            cycle_options,
            config_options: doc.select(&CONFIG_BUTTON).next().is_some(),
            config_area: doc.select(&CONFIG_AREA).next().is_some(),
            buy_button: has_text(doc.select(&BUY_BUTTON).next()),
        }
    }

    pub fn has_product_info(&self) -> bool {
        self.product_name
            || self.os_card
            || (self.config_area && (self.cycle_options || self.config_options))
    }

    /// Product markers plus an order button. A region menu without any
    /// product marker is a navigation page.
    pub fn is_valid(&self) -> bool {
        if !self.product_name && !self.os_card && !self.config_area {
            return false;
        }
        if self.region_menu && !self.has_product_info() {
            return false;
        }
        self.has_product_info() && self.buy_button
    }
}

#[derive(Debug, Clone, Copy, Default)]
pub struct CatalogClassifier;

impl PageClassifier for CatalogClassifier {
    type Document = Html;

    fn parse(&self, snapshot: &Snapshot) -> Html {
        Html::parse_document(&snapshot.html)
    }

    fn popup_selector(&self) -> Option<&str> {
        Some(POPUP_SELECTOR)
    }

    fn is_loaded(&self, doc: &Html) -> bool {
        doc.select(&LOADED).next().is_some()
    }

    fn detect_transient_error(&self, doc: &Html) -> Option<FailureCode> {
        let title = page_title(doc);

        if title.contains("404") {
            return Some(FailureCode::NotFound);
        }
        if doc
            .select(&MAINTENANCE)
            .next()
            .is_some_and(|el| text_of(el).contains(NOT_FOUND_NOTICE))
        {
            return Some(FailureCode::NotFound);
        }
        if title.contains("502 Bad Gateway") {
            return Some(FailureCode::BadGateway);
        }
        if title.contains("500") {
            return Some(FailureCode::Internal);
        }
        if title.contains("403") {
            return Some(FailureCode::Forbidden);
        }
        if title.contains("503") {
            return Some(FailureCode::Unavailable);
        }

        let has_content = doc.select(&CONTENT).next().is_some();
        if !has_content
            && (title.contains("错误")
                || title.contains("Error")
                || body_text(doc).trim().chars().count() < MIN_BODY_CHARS)
        {
            return Some(FailureCode::Empty);
        }

        None
    }

    fn is_valid_page(&self, doc: &Html) -> bool {
        let flags = PageFlags::inspect(doc);
        let valid = flags.is_valid();
        log::debug!("Page flags {flags:?} valid={valid}");
        valid
    }

    fn extract_title(&self, doc: &Html) -> Option<String> {
        doc.select(&PRODUCT_NAME)
            .next()
            .map(|el| text_of(el).trim().to_string())
            .filter(|title| !title.is_empty())
    }

    fn extract_price(&self, doc: &Html) -> Option<String> {
        price::extract_price(doc)
    }
}
