//! Filter expressions.
//!
//! Predicates are a small expression tree evaluated directly against stored
//! objects. Keys and values are data inside the tree, never text spliced
//! into a query string, so a value such as `"x OR 1 = 1"` is only ever
//! compared as a value.
//!
//! ```rust
//! use ledgerbridge_core::Predicate;
//!
//! // uId == "A1" AND name == "Checking"
//! let by_fields = Predicate::from_fields([("uId", "A1"), ("name", "Checking")]);
//!
//! // every token must hit name or location, case- and accent-insensitively
//! let by_text = Predicate::search("coffee downtown", &["name", "location"]);
//! # let _ = (by_fields, by_text);
//! ```

mod text;

pub use text::{tokenize, MatchOptions};

use crate::error::{CoreError, CoreResult};
use crate::object::{ObjectId, StoredObject};
use crate::schema::EntityDescription;
use std::collections::BTreeMap;
use std::fmt;

/// A composable boolean filter over an entity's fields.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Predicate {
    /// Attribute equals a value; `None` matches an unset attribute.
    Equals {
        /// Attribute name.
        key: String,
        /// Expected value.
        value: Option<String>,
    },
    /// Attribute contains a substring.
    Contains {
        /// Attribute name.
        key: String,
        /// Substring to look for.
        needle: String,
        /// Comparison options.
        options: MatchOptions,
    },
    /// Relationship points at a given object.
    RelatedTo {
        /// Relationship name.
        relationship: String,
        /// Target object id.
        target: ObjectId,
    },
    /// All sub-predicates hold. Empty is always true.
    And(Vec<Predicate>),
    /// At least one sub-predicate holds. Empty is always false.
    Or(Vec<Predicate>),
    /// The sub-predicate does not hold.
    Not(Box<Predicate>),
}

impl Predicate {
    /// `key == value`.
    pub fn eq(key: impl Into<String>, value: impl Into<String>) -> Self {
        Self::Equals {
            key: key.into(),
            value: Some(value.into()),
        }
    }

    /// Matches objects where `key` is unset.
    pub fn is_unset(key: impl Into<String>) -> Self {
        Self::Equals {
            key: key.into(),
            value: None,
        }
    }

    /// `key CONTAINS needle` with the given options.
    pub fn contains(key: impl Into<String>, needle: impl Into<String>, options: MatchOptions) -> Self {
        Self::Contains {
            key: key.into(),
            needle: needle.into(),
            options,
        }
    }

    /// Relationship `relationship` points at `target`.
    pub fn related_to(relationship: impl Into<String>, target: ObjectId) -> Self {
        Self::RelatedTo {
            relationship: relationship.into(),
            target,
        }
    }

    /// Conjunction.
    #[must_use]
    pub fn and(clauses: Vec<Predicate>) -> Self {
        Self::And(clauses)
    }

    /// Disjunction.
    #[must_use]
    pub fn or(clauses: Vec<Predicate>) -> Self {
        Self::Or(clauses)
    }

    /// Negation.
    #[must_use]
    pub fn negate(self) -> Self {
        Self::Not(Box::new(self))
    }

    /// One equality clause per entry, joined with AND.
    ///
    /// Clauses are ordered by key so the same mapping always produces the
    /// same tree. A later duplicate key replaces an earlier one. An empty
    /// mapping yields an empty conjunction, which matches everything.
    pub fn from_fields<I, K, V>(fields: I) -> Self
    where
        I: IntoIterator<Item = (K, V)>,
        K: Into<String>,
        V: Into<String>,
    {
        let sorted: BTreeMap<String, String> = fields
            .into_iter()
            .map(|(k, v)| (k.into(), v.into()))
            .collect();
        Self::And(
            sorted
                .into_iter()
                .map(|(key, value)| Self::Equals {
                    key,
                    value: Some(value),
                })
                .collect(),
        )
    }

    /// Free-text predicate.
    ///
    /// Each token of `query` (see [`tokenize`]) becomes an OR of
    /// case- and accent-insensitive `CONTAINS` clauses over `keys`; the
    /// per-token disjunctions are joined with AND. A query with no tokens
    /// matches everything.
    pub fn search<S: AsRef<str>>(query: &str, keys: &[S]) -> Self {
        Self::And(
            tokenize(query)
                .into_iter()
                .map(|token| {
                    Self::Or(
                        keys.iter()
                            .map(|key| Self::contains(key.as_ref(), token, MatchOptions::folded()))
                            .collect(),
                    )
                })
                .collect(),
        )
    }

    /// Evaluates the predicate against an object.
    #[must_use]
    pub fn evaluate(&self, object: &StoredObject) -> bool {
        match self {
            Self::Equals { key, value } => object.attribute(key) == value.as_deref(),
            Self::Contains {
                key,
                needle,
                options,
            } => object
                .attribute(key)
                .is_some_and(|haystack| text::contains(haystack, needle, *options)),
            Self::RelatedTo {
                relationship,
                target,
            } => object.relation(relationship) == Some(*target),
            Self::And(clauses) => clauses.iter().all(|c| c.evaluate(object)),
            Self::Or(clauses) => clauses.iter().any(|c| c.evaluate(object)),
            Self::Not(inner) => !inner.evaluate(object),
        }
    }

    /// Checks every key against an entity description.
    ///
    /// # Errors
    ///
    /// Returns `DataFetchFailed` for an attribute or relationship the
    /// entity does not declare.
    pub fn validate(&self, description: &EntityDescription) -> CoreResult<()> {
        match self {
            Self::Equals { key, .. } | Self::Contains { key, .. } => {
                if description.has_attribute(key) {
                    Ok(())
                } else {
                    Err(CoreError::data_fetch_failed(format!(
                        "{} has no attribute `{key}`",
                        description.name
                    )))
                }
            }
            Self::RelatedTo { relationship, .. } => {
                if description.relationship_named(relationship).is_some() {
                    Ok(())
                } else {
                    Err(CoreError::data_fetch_failed(format!(
                        "{} has no relationship `{relationship}`",
                        description.name
                    )))
                }
            }
            Self::And(clauses) | Self::Or(clauses) => {
                clauses.iter().try_for_each(|c| c.validate(description))
            }
            Self::Not(inner) => inner.validate(description),
        }
    }

    /// Writes the values implied by the predicate's top-level conjunction
    /// onto `object`: `Equals` clauses with a value and `RelatedTo` clauses.
    ///
    /// Used when an upsert creates the object it was looking for, so that a
    /// repeated lookup with the same predicate finds it.
    pub(crate) fn seed(&self, object: &mut StoredObject) {
        match self {
            Self::Equals {
                key,
                value: Some(value),
            } => object.set_attribute(key, Some(value.clone())),
            Self::RelatedTo {
                relationship,
                target,
            } => object.set_relation(relationship, Some(*target)),
            Self::And(clauses) => clauses.iter().for_each(|c| c.seed(object)),
            _ => {}
        }
    }
}

impl fmt::Display for Predicate {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        fn join(f: &mut fmt::Formatter<'_>, clauses: &[Predicate], op: &str) -> fmt::Result {
            write!(f, "(")?;
            for (i, clause) in clauses.iter().enumerate() {
                if i > 0 {
                    write!(f, " {op} ")?;
                }
                write!(f, "{clause}")?;
            }
            write!(f, ")")
        }

        match self {
            Self::Equals { key, value: Some(v) } => write!(f, "{key} == {v:?}"),
            Self::Equals { key, value: None } => write!(f, "{key} == nil"),
            Self::Contains {
                key,
                needle,
                options,
            } => {
                let flags = match (options.case_insensitive, options.diacritic_insensitive) {
                    (true, true) => "[cd]",
                    (true, false) => "[c]",
                    (false, true) => "[d]",
                    (false, false) => "",
                };
                write!(f, "{key} CONTAINS{flags} {needle:?}")
            }
            Self::RelatedTo {
                relationship,
                target,
            } => write!(f, "{relationship} == <{target}>"),
            Self::And(clauses) if clauses.is_empty() => write!(f, "TRUE"),
            Self::Or(clauses) if clauses.is_empty() => write!(f, "FALSE"),
            Self::And(clauses) => join(f, clauses, "AND"),
            Self::Or(clauses) => join(f, clauses, "OR"),
            Self::Not(inner) => write!(f, "NOT {inner}"),
        }
    }
}
