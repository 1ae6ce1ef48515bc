//! Store configuration.

use crate::error::{CoreError, CoreResult};
use std::num::NonZeroU32;
use std::time::Duration;

/// Tunables shared by every participant of a [`crate::StoreRegistry`].
#[derive(Debug, Clone)]
pub struct Config {
    /// Size of the buffer used when copying blob content.
    pub copy_buffer_size: usize,

    /// How long a transaction waits for another transaction's lease on the
    /// same object. `None` disables leasing; non-overlap is then the
    /// caller's responsibility.
    pub lease_timeout: Option<Duration>,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            copy_buffer_size: 8 * 1024,
            lease_timeout: None,
        }
    }
}

impl Config {
    /// Creates a new configuration with default values.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Sets the copy buffer size.
    #[must_use]
    pub const fn copy_buffer_size(mut self, size: usize) -> Self {
        self.copy_buffer_size = size;
        self
    }

    /// Enables per-object leases with the given wait timeout.
    #[must_use]
    pub const fn lease_timeout(mut self, timeout: Duration) -> Self {
        self.lease_timeout = Some(timeout);
        self
    }

    /// Checks the configuration for values that cannot work.
    ///
    /// # Errors
    ///
    /// Returns [`CoreError::InvalidConfig`] if the copy buffer is empty.
    pub fn validate(&self) -> CoreResult<()> {
        if self.copy_buffer_size == 0 {
            return Err(CoreError::invalid_config("copy_buffer_size must be > 0"));
        }
        Ok(())
    }
}

/// Where staged-file blobs of one object type live inside a path store.
///
/// ```text
/// <root>/<type>/[<bucket>/]<id>       committed content
/// <root>/<type>/[<bucket>/]<id>.tmp   staged content
/// <root>/<type>/[<bucket>/]<id>.bak   previous content
/// ```
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FileLayout {
    /// Relative directory prefix inside the path store; may be empty.
    pub root: String,
    /// Number of bucket subdirectories objects are spread over.
    pub sub_dirs: Option<NonZeroU32>,
}

impl FileLayout {
    /// Creates a layout rooted at `root` without bucket subdirectories.
    #[must_use]
    pub fn new(root: impl Into<String>) -> Self {
        Self {
            root: root.into(),
            sub_dirs: None,
        }
    }

    /// Spreads objects over `count` bucket subdirectories.
    #[must_use]
    pub fn sub_dirs(mut self, count: NonZeroU32) -> Self {
        self.sub_dirs = Some(count);
        self
    }

    /// Checks the layout.
    ///
    /// # Errors
    ///
    /// Returns [`CoreError::InvalidConfig`] for a root that is not a valid
    /// relative path.
    pub fn validate(&self) -> CoreResult<()> {
        if !self.root.is_empty() {
            txstore_storage::validate(&self.root)
                .map_err(|e| CoreError::invalid_config(e.to_string()))?;
        }
        Ok(())
    }
}

/// The column holding inline blobs of one object type.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct BlobColumn {
    /// Table name.
    pub table: String,
    /// Binary column name.
    pub column: String,
    /// Column holding the object ID.
    pub key_column: String,
}

impl BlobColumn {
    /// Creates a column reference keyed by `ID`.
    #[must_use]
    pub fn new(table: impl Into<String>, column: impl Into<String>) -> Self {
        Self {
            table: table.into(),
            column: column.into(),
            key_column: "ID".to_string(),
        }
    }

    /// Sets the key column.
    #[must_use]
    pub fn key_column(mut self, column: impl Into<String>) -> Self {
        self.key_column = column.into();
        self
    }

    /// Checks that every identifier is a plain SQL identifier, since they
    /// are spliced into statement text.
    ///
    /// # Errors
    ///
    /// Returns [`CoreError::InvalidConfig`] for any other identifier.
    pub fn validate(&self) -> CoreResult<()> {
        for ident in [&self.table, &self.column, &self.key_column] {
            let mut bytes = ident.bytes();
            let valid = matches!(bytes.next(), Some(b) if b.is_ascii_alphabetic() || b == b'_')
                && bytes.all(|b| b.is_ascii_alphanumeric() || b == b'_');
            if !valid {
                return Err(CoreError::invalid_config(format!(
                    "invalid SQL identifier {ident:?}"
                )));
            }
        }
        Ok(())
    }
}

/// How blobs of one object type are stored.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum StoreKind {
    /// In a database column, durable through the transaction's connection.
    Inline(BlobColumn),
    /// As staged files in the registry's path store.
    StagedFile(FileLayout),
}

impl StoreKind {
    /// Validates the wrapped configuration.
    ///
    /// # Errors
    ///
    /// Returns [`CoreError::InvalidConfig`] when the layout or column is
    /// invalid.
    pub fn validate(&self) -> CoreResult<()> {
        match self {
            Self::Inline(column) => column.validate(),
            Self::StagedFile(layout) => layout.validate(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn default_config() {
        let config = Config::default();
        assert_eq!(config.copy_buffer_size, 8192);
        assert!(config.lease_timeout.is_none());
        assert!(config.validate().is_ok());
    }

    #[test]
    fn builder_pattern() {
        let config = Config::new()
            .copy_buffer_size(16)
            .lease_timeout(Duration::from_millis(50));

        assert_eq!(config.copy_buffer_size, 16);
        assert_eq!(config.lease_timeout, Some(Duration::from_millis(50)));
    }

    #[test]
    fn zero_buffer_rejected() {
        assert!(Config::new().copy_buffer_size(0).validate().is_err());
    }

    #[test]
    fn layout_validation() {
        assert!(FileLayout::new("").validate().is_ok());
        let hundred = NonZeroU32::new(100).unwrap();
        assert!(FileLayout::new("blobs").sub_dirs(hundred).validate().is_ok());
        assert!(FileLayout::new("../blobs").validate().is_err());
    }

    #[test]
    fn column_identifiers_are_checked() {
        assert!(BlobColumn::new("T_DOC", "CONTENT").validate().is_ok());
        assert!(BlobColumn::new("T_DOC", "CONTENT; DROP TABLE x")
            .validate()
            .is_err());
        assert!(BlobColumn::new("T_DOC", "CONTENT")
            .key_column("1ID")
            .validate()
            .is_err());
    }
}
