use serde::{Deserialize, Serialize};
use tally_types::PageRequest;

/// Tunables for [`LedgerService`](crate::LedgerService).
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct LedgerConfig {
    /// Longest accepted movement description, in characters.
    pub max_description_len: usize,
    /// Attempts at find-or-create before a balance insert conflict is
    /// reported to the caller.
    pub create_retries: u32,
    /// Page size used when a request's size is out of range.
    pub default_page_size: u32,
}

impl Default for LedgerConfig {
    fn default() -> Self {
        Self {
            max_description_len: 255,
            create_retries: 3,
            default_page_size: PageRequest::DEFAULT_PAGE_SIZE,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn defaults() {
        let c = LedgerConfig::default();
        assert_eq!(c.max_description_len, 255);
        assert_eq!(c.create_retries, 3);
        assert_eq!(c.default_page_size, 10);
    }
}
