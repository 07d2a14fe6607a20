use std::fmt;

use arrow_schema::{DataType, SchemaRef};
use serde::{Deserialize, Serialize};

use crate::provider::{StoredLayout, TableMeta};

/// Logical layout of a dataset as seen by the join planner.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum Layout {
    /// No usable partitioning.
    Unpartitioned,
    /// Small enough to be replicated in full to every worker.
    Broadcast,
    /// Hash-bucketed on `key` into `bucket_count` buckets, sorted by `key` inside each.
    Bucketed { key: String, bucket_count: u32 },
}

impl Layout {
    pub fn is_broadcast(&self) -> bool {
        matches!(self, Layout::Broadcast)
    }

    /// `(key, bucket_count)` when bucketed.
    pub fn bucketing(&self) -> Option<(&str, u32)> {
        match self {
            Layout::Bucketed { key, bucket_count } => Some((key.as_str(), *bucket_count)),
            _ => None,
        }
    }
}

impl fmt::Display for Layout {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Layout::Unpartitioned => write!(f, "unpartitioned"),
            Layout::Broadcast => write!(f, "broadcast"),
            Layout::Bucketed { key, bucket_count } => {
                write!(f, "bucketed({key}, {bucket_count})")
            }
        }
    }
}

/// Immutable reference to a named dataset.
///
/// Transforms (bucketing, joining, broadcast marking) never modify a handle;
/// they return a new one.
#[derive(Debug, Clone, PartialEq)]
pub struct DatasetHandle {
    name: String,
    schema: SchemaRef,
    estimated_row_count: u64,
    layout: Layout,
}

impl DatasetHandle {
    pub fn new(
        name: impl Into<String>,
        schema: SchemaRef,
        estimated_row_count: u64,
        layout: Layout,
    ) -> Self {
        Self {
            name: name.into(),
            schema,
            estimated_row_count,
            layout,
        }
    }

    /// Build a handle whose layout mirrors what the store actually persisted.
    pub fn from_meta(meta: &TableMeta) -> Self {
        let layout = match &meta.layout {
            StoredLayout::Unpartitioned => Layout::Unpartitioned,
            StoredLayout::Bucketed {
                key, bucket_count, ..
            } => Layout::Bucketed {
                key: key.clone(),
                bucket_count: *bucket_count,
            },
        };
        Self::new(
            meta.name.clone(),
            meta.schema_ref(),
            meta.stats.rows,
            layout,
        )
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn schema(&self) -> SchemaRef {
        self.schema.clone()
    }

    pub fn estimated_row_count(&self) -> u64 {
        self.estimated_row_count
    }

    pub fn layout(&self) -> &Layout {
        &self.layout
    }

    pub fn column_type(&self, column: &str) -> Option<&DataType> {
        self.schema
            .field_with_name(column)
            .ok()
            .map(|f| f.data_type())
    }

    /// Copy of this handle marked for replication.
    pub fn as_broadcast(&self) -> Self {
        self.with_layout(Layout::Broadcast)
    }

    pub fn with_layout(&self, layout: Layout) -> Self {
        Self {
            layout,
            ..self.clone()
        }
    }
}

#[cfg(test)]
mod tests {
    use std::sync::Arc;

    use arrow_schema::{DataType, Field, Schema};

    use super::{DatasetHandle, Layout};

    #[test]
    fn broadcast_marking_returns_new_handle() {
        let schema = Arc::new(Schema::new(vec![Field::new(
            "medal_id",
            DataType::Int64,
            false,
        )]));
        let medals = DatasetHandle::new(
            "medals",
            schema,
            42,
            Layout::Bucketed {
                key: "medal_id".to_string(),
                bucket_count: 4,
            },
        );
        let marked = medals.as_broadcast();
        assert_eq!(marked.layout(), &Layout::Broadcast);
        assert_eq!(medals.layout().bucketing(), Some(("medal_id", 4)));
        assert_eq!(marked.estimated_row_count(), 42);
        assert_eq!(marked.column_type("medal_id"), Some(&DataType::Int64));
    }
}
