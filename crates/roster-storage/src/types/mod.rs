mod departments;
mod groups;
mod ids;
mod items;
mod jobs;

pub use departments::*;
pub use groups::*;
pub use ids::*;
pub use items::*;
pub use jobs::*;

/// A status, role or type label that does not name a known variant.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct ParseLabelError {
    kind: &'static str,
    value: String,
}

impl ParseLabelError {
    pub(crate) fn new(kind: &'static str, value: &str) -> Self {
        Self {
            kind,
            value: value.to_string(),
        }
    }
}

impl std::fmt::Display for ParseLabelError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "invalid {}: {}", self.kind, self.value)
    }
}

impl std::error::Error for ParseLabelError {}
