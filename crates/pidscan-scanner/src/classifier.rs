use crate::browser::Snapshot;
use crate::records::FailureCode;

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Verdict {
    TransientError(FailureCode),
    Valid { title: String, price: String },
    Invalid,
}

/// Site specific page heuristics, pure queries over a parsed snapshot
pub trait PageClassifier {
    type Document;

    fn parse(&self, snapshot: &Snapshot) -> Self::Document;

    /// Button that closes the notice popup shown on some loads
    fn popup_selector(&self) -> Option<&str> {
        None
    }

    /// Whether any "substantially loaded" marker is present yet
    fn is_loaded(&self, doc: &Self::Document) -> bool;

    fn detect_transient_error(&self, doc: &Self::Document) -> Option<FailureCode>;

    fn is_valid_page(&self, doc: &Self::Document) -> bool;

    fn extract_title(&self, doc: &Self::Document) -> Option<String>;

    fn extract_price(&self, doc: &Self::Document) -> Option<String>;

    fn classify(&self, doc: &Self::Document, collect_price: bool) -> Verdict {
        if let Some(code) = self.detect_transient_error(doc) {
            return Verdict::TransientError(code);
        }
        if !self.is_valid_page(doc) {
            return Verdict::Invalid;
        }
        let title = self.extract_title(doc).unwrap_or_default();
        let price = if collect_price {
            self.extract_price(doc).unwrap_or_default()
        } else {
            String::new()
        };
        Verdict::Valid { title, price }
    }
}
