//! Searchable fields and provenance queries.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::error::{ProvenanceError, Result};
use crate::event::ProvenanceEventRecord;

// MARK: - Searchable Field

/// A field that supports indexed lookup.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum SearchableField {
    EventType,
    FlowUnitUuid,
    LineageIdentity,
    ComponentId,
    ComponentType,
    Relationship,
    Details,
    TransitUri,
    /// A flow-unit attribute, by name.
    Attribute(String),
}

impl SearchableField {
    /// The fixed set of record fields every durable backend indexes.
    pub fn standard() -> Vec<SearchableField> {
        vec![
            SearchableField::EventType,
            SearchableField::FlowUnitUuid,
            SearchableField::LineageIdentity,
            SearchableField::ComponentId,
            SearchableField::ComponentType,
            SearchableField::Relationship,
            SearchableField::Details,
            SearchableField::TransitUri,
        ]
    }

    /// Whether this names a flow-unit attribute.
    pub fn is_attribute(&self) -> bool {
        matches!(self, SearchableField::Attribute(_))
    }
}

impl std::fmt::Display for SearchableField {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            SearchableField::EventType => write!(f, "EventType"),
            SearchableField::FlowUnitUuid => write!(f, "FlowUnitUuid"),
            SearchableField::LineageIdentity => write!(f, "LineageIdentity"),
            SearchableField::ComponentId => write!(f, "ComponentId"),
            SearchableField::ComponentType => write!(f, "ComponentType"),
            SearchableField::Relationship => write!(f, "Relationship"),
            SearchableField::Details => write!(f, "Details"),
            SearchableField::TransitUri => write!(f, "TransitUri"),
            SearchableField::Attribute(name) => write!(f, "attribute:{}", name),
        }
    }
}

// MARK: - Query

/// One `field = value` condition. `*` in the value matches any run of characters.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SearchTerm {
    pub field: SearchableField,
    pub value: String,
}

impl SearchTerm {
    /// Whether `record` satisfies this term (case-insensitive).
    pub fn matches(&self, record: &ProvenanceEventRecord) -> bool {
        record
            .field_value(&self.field)
            .map(|actual| wildcard_match(&self.value.to_lowercase(), &actual.to_lowercase()))
            .unwrap_or(false)
    }
}

/// A provenance search. All terms must match.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Query {
    pub search_terms: Vec<SearchTerm>,
    pub start_date: Option<DateTime<Utc>>,
    pub end_date: Option<DateTime<Utc>>,
    pub min_event_id: Option<u64>,
    pub max_results: usize,
}

impl Default for Query {
    fn default() -> Self {
        Self {
            search_terms: Vec::new(),
            start_date: None,
            end_date: None,
            min_event_id: None,
            max_results: 1000,
        }
    }
}

impl Query {
    /// An unrestricted query returning up to 1000 events.
    pub fn new() -> Self {
        Self::default()
    }

    /// Add a search term.
    pub fn with_term(mut self, field: SearchableField, value: impl Into<String>) -> Self {
        self.search_terms.push(SearchTerm {
            field,
            value: value.into(),
        });
        self
    }

    /// Restrict to events at or after `start`.
    pub fn since(mut self, start: DateTime<Utc>) -> Self {
        self.start_date = Some(start);
        self
    }

    /// Restrict to events at or before `end`.
    pub fn until(mut self, end: DateTime<Utc>) -> Self {
        self.end_date = Some(end);
        self
    }

    /// Restrict to events with id at least `id`.
    pub fn from_event_id(mut self, id: u64) -> Self {
        self.min_event_id = Some(id);
        self
    }

    /// Limit the number of returned events.
    pub fn limit(mut self, max_results: usize) -> Self {
        self.max_results = max_results;
        self
    }

    /// Reject queries the repository cannot run.
    pub fn validate(&self, searchable: &[SearchableField], attributes: &[String]) -> Result<()> {
        if self.max_results == 0 {
            return Err(ProvenanceError::InvalidRequest(
                "max_results must be positive".to_string(),
            ));
        }
        if let (Some(start), Some(end)) = (self.start_date, self.end_date) {
            if start > end {
                return Err(ProvenanceError::InvalidRequest(
                    "start_date is after end_date".to_string(),
                ));
            }
        }
        for term in &self.search_terms {
            let supported = match &term.field {
                SearchableField::Attribute(name) => attributes.iter().any(|a| a == name),
                field => searchable.contains(field),
            };
            if !supported {
                return Err(ProvenanceError::InvalidRequest(format!(
                    "field {} is not searchable",
                    term.field
                )));
            }
        }
        Ok(())
    }

    /// Whether `record` satisfies every restriction.
    pub fn matches(&self, record: &ProvenanceEventRecord) -> bool {
        if let Some(min) = self.min_event_id {
            if record.event_id < min {
                return false;
            }
        }
        if let Some(start) = self.start_date {
            if record.timestamp < start {
                return false;
            }
        }
        if let Some(end) = self.end_date {
            if record.timestamp > end {
                return false;
            }
        }
        self.search_terms.iter().all(|term| term.matches(record))
    }
}

/// Outcome of a completed query.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct QueryResult {
    /// Matching events the caller may see, ascending by id, at most `max_results`.
    pub events: Vec<ProvenanceEventRecord>,
    /// How many visible events matched in total.
    pub total_hit_count: u64,
}

// MARK: - Wildcards

/// Glob match where `*` matches any (possibly empty) run of characters.
pub(crate) fn wildcard_match(pattern: &str, text: &str) -> bool {
    let pattern: Vec<char> = pattern.chars().collect();
    let text: Vec<char> = text.chars().collect();

    let (mut p, mut t) = (0, 0);
    let mut star: Option<usize> = None;
    let mut resume = 0;

    while t < text.len() {
        if p < pattern.len() && pattern[p] != '*' && pattern[p] == text[t] {
            p += 1;
            t += 1;
        } else if p < pattern.len() && pattern[p] == '*' {
            star = Some(p);
            resume = t;
            p += 1;
        } else if let Some(s) = star {
            p = s + 1;
            resume += 1;
            t = resume;
        } else {
            return false;
        }
    }

    pattern[p..].iter().all(|&c| c == '*')
}

// MARK: - Tests
