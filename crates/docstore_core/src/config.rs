//! Store configuration.

/// Configuration shared by every entity type of a store.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StoreConfig {
    /// Capacity of each per-type version table (0 = tokens are never memoized).
    pub version_table_size: usize,

    /// Default maximum number of documents returned by a search.
    pub search_limit: usize,

    /// Maximum number of ids returned by an id scan.
    pub scan_limit: usize,

    /// Whether change log entries carry the document content.
    pub log_content: bool,

    /// Maximum number of entries a single templated ACL item may expand to.
    pub acl_item_fill_limit: usize,

    /// Maximum number of entries a filled ACL may hold.
    pub acl_total_fill_limit: usize,
}

impl Default for StoreConfig {
    fn default() -> Self {
        Self {
            version_table_size: 1000,
            search_limit: 50,
            scan_limit: 1000,
            log_content: false,
            acl_item_fill_limit: 100,
            acl_total_fill_limit: 1024,
        }
    }
}

impl StoreConfig {
    /// Creates a new configuration with default values.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Sets the version table capacity.
    #[must_use]
    pub const fn version_table_size(mut self, size: usize) -> Self {
        self.version_table_size = size;
        self
    }

    /// Sets the default search limit.
    #[must_use]
    pub const fn search_limit(mut self, limit: usize) -> Self {
        self.search_limit = limit;
        self
    }

    /// Sets the id scan limit.
    #[must_use]
    pub const fn scan_limit(mut self, limit: usize) -> Self {
        self.scan_limit = limit;
        self
    }

    /// Sets whether log entries carry document content.
    #[must_use]
    pub const fn log_content(mut self, value: bool) -> Self {
        self.log_content = value;
        self
    }

    /// Sets the ACL fill limits (per item, total).
    #[must_use]
    pub const fn acl_fill_limits(mut self, per_item: usize, total: usize) -> Self {
        self.acl_item_fill_limit = per_item;
        self.acl_total_fill_limit = total;
        self
    }
}
