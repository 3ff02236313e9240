mod catalog;
mod price;

pub use catalog::{CatalogClassifier, PageFlags};
pub use price::normalize_price;
