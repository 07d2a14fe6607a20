use serde::{Deserialize, Serialize};

/// Table-level size figures persisted alongside layout metadata.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct TableStats {
    pub rows: u64,
    pub bytes: u64,
}
