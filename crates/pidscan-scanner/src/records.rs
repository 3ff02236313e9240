use std::fmt;

use serde::{Deserialize, Serialize};

pub type PageId = u64;

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SuccessRecord {
    #[serde(alias = "pid")]
    pub id: PageId,
    #[serde(default)]
    pub title: String,
    #[serde(default)]
    pub price: String,
}

impl SuccessRecord {
    pub fn new(id: PageId) -> Self {
        Self {
            id,
            title: String::new(),
            price: String::new(),
        }
    }

    /// Formats the record as `id title price`, omitting empty parts
    pub fn to_line(&self) -> String {
        let mut line = self.id.to_string();
        for part in [&self.title, &self.price] {
            if !part.is_empty() {
                line.push(' ');
                line.push_str(part);
            }
        }
        line
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct FailureRecord {
    #[serde(alias = "pid")]
    pub id: PageId,
    #[serde(default = "unknown_code")]
    pub code: FailureCode,
}

impl fmt::Display for FailureRecord {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{} ({})", self.id, self.code)
    }
}

fn unknown_code() -> FailureCode {
    FailureCode::Other(String::from("ERROR"))
}

/// Why an id ended up in the failure list
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(from = "String", into = "String")]
pub enum FailureCode {
    /// The page or the site's "page not found" block
    NotFound,
    Forbidden,
    Internal,
    BadGateway,
    Unavailable,
    /// No content marker and almost no text
    Empty,
    /// Still not recognized after the retry reload
    ClassifyFailed,
    Other(String),
}

impl FailureCode {
    pub fn as_str(&self) -> &str {
        match self {
            Self::NotFound => "404",
            Self::Forbidden => "403",
            Self::Internal => "500",
            Self::BadGateway => "502",
            Self::Unavailable => "503",
            Self::Empty => "EMPTY",
            Self::ClassifyFailed => "CLASSIFY_FAILED",
            Self::Other(code) => code,
        }
    }
}

impl From<String> for FailureCode {
    fn from(code: String) -> Self {
        match code.as_str() {
            "404" => Self::NotFound,
            "403" => Self::Forbidden,
            "500" => Self::Internal,
            "502" => Self::BadGateway,
            "503" => Self::Unavailable,
            "EMPTY" => Self::Empty,
            "CLASSIFY_FAILED" | "识别失败" => Self::ClassifyFailed,
            _ => Self::Other(code),
        }
    }
}

impl From<&str> for FailureCode {
    fn from(code: &str) -> Self {
        Self::from(code.to_string())
    }
}

impl From<FailureCode> for String {
    fn from(code: FailureCode) -> Self {
        code.as_str().to_string()
    }
}

impl fmt::Display for FailureCode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Success entries were once stored as bare ids
#[derive(Debug, Deserialize)]
#[serde(untagged)]
pub(crate) enum StoredSuccess {
    Bare(PageId),
    Record(SuccessRecord),
}

impl From<StoredSuccess> for SuccessRecord {
    fn from(stored: StoredSuccess) -> Self {
        match stored {
            StoredSuccess::Bare(id) => SuccessRecord::new(id),
            StoredSuccess::Record(record) => record,
        }
    }
}

#[derive(Debug, Deserialize)]
#[serde(untagged)]
pub(crate) enum StoredFailure {
    Bare(PageId),
    Record(FailureRecord),
}

impl From<StoredFailure> for FailureRecord {
    fn from(stored: StoredFailure) -> Self {
        match stored {
            StoredFailure::Bare(id) => FailureRecord {
                id,
                code: unknown_code(),
            },
            StoredFailure::Record(record) => record,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct Summary {
    pub successes: usize,
    pub failures: usize,
}

impl fmt::Display for Summary {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "Scan complete: {} valid product pages found, {} failed.",
            self.successes, self.failures
        )
    }
}
