//! Configuration for the pipeline and its sinks.

use std::collections::{BTreeMap, BTreeSet};
use std::time::Duration;

/// Default bound on concurrently processed logical records.
pub const DEFAULT_MAX_IN_FLIGHT: usize = 32;

/// Configuration for batch processing.
#[derive(Debug, Clone)]
pub struct PipelineConfig {
    /// Maximum number of logical records processed concurrently.
    pub max_in_flight: usize,
    /// Overall time budget for one batch invocation.
    pub time_budget: Option<Duration>,
    /// Whether aggregate checksums are verified.
    pub verify_checksums: bool,
    /// Ledger tables whose revisions are projected. `None` projects all.
    pub tables: Option<BTreeSet<String>>,
}

impl PipelineConfig {
    /// Creates a new pipeline configuration.
    pub fn new() -> Self {
        Self {
            max_in_flight: DEFAULT_MAX_IN_FLIGHT,
            time_budget: None,
            verify_checksums: true,
            tables: None,
        }
    }

    /// Sets the concurrency bound. Zero is treated as one.
    pub fn with_max_in_flight(mut self, max_in_flight: usize) -> Self {
        self.max_in_flight = max_in_flight.max(1);
        self
    }

    /// Sets the time budget for one batch.
    pub fn with_time_budget(mut self, budget: Duration) -> Self {
        self.time_budget = Some(budget);
        self
    }

    /// Enables or disables aggregate checksum verification.
    pub fn with_verify_checksums(mut self, verify: bool) -> Self {
        self.verify_checksums = verify;
        self
    }

    /// Restricts projection to the named tables.
    pub fn with_tables<I, S>(mut self, tables: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.tables = Some(tables.into_iter().map(Into::into).collect());
        self
    }

    /// Returns true if events from `table` should be projected.
    ///
    /// With an allow-list configured, events that carry no table name are
    /// not projected.
    pub fn allows_table(&self, table: Option<&str>) -> bool {
        match (&self.tables, table) {
            (None, _) => true,
            (Some(tables), Some(table)) => tables.contains(table),
            (Some(_), None) => false,
        }
    }
}

impl Default for PipelineConfig {
    fn default() -> Self {
        Self::new()
    }
}

/// Renames applied to business fields before they are stored.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct FieldMap {
    renames: BTreeMap<String, String>,
}

impl FieldMap {
    /// Creates an empty map (every field passes through).
    pub fn new() -> Self {
        Self::default()
    }

    /// Adds a rename from `source` to `target`.
    pub fn rename(mut self, source: impl Into<String>, target: impl Into<String>) -> Self {
        self.renames.insert(source.into(), target.into());
        self
    }

    /// Returns the stored name for a source field.
    pub fn target<'a>(&'a self, source: &'a str) -> &'a str {
        self.renames.get(source).map_or(source, String::as_str)
    }

    /// Returns true if no renames are configured.
    pub fn is_empty(&self) -> bool {
        self.renames.is_empty()
    }
}

impl<S: Into<String>, T: Into<String>> FromIterator<(S, T)> for FieldMap {
    fn from_iter<I: IntoIterator<Item = (S, T)>>(iter: I) -> Self {
        Self {
            renames: iter
                .into_iter()
                .map(|(s, t)| (s.into(), t.into()))
                .collect(),
        }
    }
}

/// Configuration for the key-value sink.
#[derive(Debug, Clone)]
pub struct KeyValueSinkConfig {
    /// Target table.
    pub table_name: String,
    /// Primary key attribute holding the document ID.
    pub key_attribute: String,
    /// Attribute holding the stored version.
    pub version_attribute: String,
    /// Attribute set on tombstones.
    pub deleted_attribute: String,
    /// Field renames.
    pub field_map: FieldMap,
}

impl KeyValueSinkConfig {
    /// Creates a configuration for `table_name` with default attribute names.
    pub fn new(table_name: impl Into<String>) -> Self {
        Self {
            table_name: table_name.into(),
            key_attribute: "pk".to_string(),
            version_attribute: "version".to_string(),
            deleted_attribute: "isDeleted".to_string(),
            field_map: FieldMap::new(),
        }
    }

    /// Sets the primary key attribute.
    pub fn with_key_attribute(mut self, name: impl Into<String>) -> Self {
        self.key_attribute = name.into();
        self
    }

    /// Sets the version attribute.
    pub fn with_version_attribute(mut self, name: impl Into<String>) -> Self {
        self.version_attribute = name.into();
        self
    }

    /// Sets the tombstone flag attribute.
    pub fn with_deleted_attribute(mut self, name: impl Into<String>) -> Self {
        self.deleted_attribute = name.into();
        self
    }

    /// Sets the field renames.
    pub fn with_field_map(mut self, field_map: FieldMap) -> Self {
        self.field_map = field_map;
        self
    }
}

impl Default for KeyValueSinkConfig {
    fn default() -> Self {
        Self::new("BicycleLicence")
    }
}

/// How the search index compares external versions.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub enum VersionType {
    /// Accept only versions strictly greater than the stored one.
    #[default]
    External,
    /// Accept versions greater than or equal to the stored one.
    ExternalGte,
}

impl VersionType {
    /// Returns the query parameter value.
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::External => "external",
            Self::ExternalGte => "external_gte",
        }
    }

    /// Returns true if a write at `incoming` conflicts with `stored`.
    pub fn conflicts(&self, stored: u64, incoming: u64) -> bool {
        match self {
            Self::External => stored >= incoming,
            Self::ExternalGte => stored > incoming,
        }
    }
}

/// Configuration for the search-index sink.
#[derive(Debug, Clone)]
pub struct SearchSinkConfig {
    /// Target index.
    pub index: String,
    /// External version comparison mode.
    pub version_type: VersionType,
    /// Field renames.
    pub field_map: FieldMap,
}

impl SearchSinkConfig {
    /// Creates a configuration for `index`.
    pub fn new(index: impl Into<String>) -> Self {
        Self {
            index: index.into(),
            version_type: VersionType::External,
            field_map: FieldMap::new(),
        }
    }

    /// Sets the version comparison mode.
    pub fn with_version_type(mut self, version_type: VersionType) -> Self {
        self.version_type = version_type;
        self
    }

    /// Sets the field renames.
    pub fn with_field_map(mut self, field_map: FieldMap) -> Self {
        self.field_map = field_map;
        self
    }
}

impl Default for SearchSinkConfig {
    fn default() -> Self {
        Self::new("licence")
    }
}
