//! Ranked Cross-Property Validation
//!
//! A [`DependencyValidator`] relates a set of properties and yields a
//! [`RankedValidation`]: OK, an advisory warning, a fatal error, or
//! "data not ready" when an involved value has not been read yet. The
//! store re-evaluates a validator whenever one of its properties changes
//! and broadcasts `validity_changed` for every member when the outcome
//! differs.
//!
//! What-if probing substitutes a candidate value for one property in the
//! transaction's view and re-runs the closure, without touching stored
//! state - UIs use it to vet an edit before writing it.

use crate::properties::id::PropertyId;
use crate::properties::value::{Value, ValueType};
use crate::result::{Error, OptionalResult, Result};

use std::collections::BTreeSet;
use std::sync::Mutex;
use std::sync::atomic::{AtomicBool, Ordering};

// =============================================================================
// Ranked Result
// =============================================================================

/// Severity of a failed dependency validation.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub enum ValidationRank {
    /// Advisory; the configuration is usable.
    Warning,
    /// An involved value is absent, so the relation cannot be judged yet.
    DataNotReady,
    /// The configuration is invalid.
    FatalError,
}

/// Outcome of one dependency validation.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RankedValidation {
    result: Result<()>,
    rank: Option<ValidationRank>,
}

impl RankedValidation {
    /// Successful validation.
    #[must_use]
    pub fn ok() -> Self {
        Self {
            result: Ok(()),
            rank: None,
        }
    }

    /// Advisory failure.
    #[must_use]
    pub fn warning(general: impl Into<String>, detail: impl Into<String>) -> Self {
        Self {
            result: Err(Error::with_detail(general, detail)),
            rank: Some(ValidationRank::Warning),
        }
    }

    /// Fatal failure.
    #[must_use]
    pub fn error(general: impl Into<String>, detail: impl Into<String>) -> Self {
        Self {
            result: Err(Error::with_detail(general, detail)),
            rank: Some(ValidationRank::FatalError),
        }
    }

    /// Fatal failure wrapping an existing error.
    #[must_use]
    pub fn from_error(error: Error) -> Self {
        Self {
            result: Err(error),
            rank: Some(ValidationRank::FatalError),
        }
    }

    /// An involved value has not been read yet.
    #[must_use]
    pub fn data_not_ready(detail: impl Into<String>) -> Self {
        Self {
            result: Err(Error::with_detail("Data not ready!", detail)),
            rank: Some(ValidationRank::DataNotReady),
        }
    }

    /// The carried result.
    #[must_use]
    pub fn result(&self) -> &Result<()> {
        &self.result
    }

    /// The severity, absent when OK.
    #[must_use]
    pub fn rank(&self) -> Option<ValidationRank> {
        self.rank
    }

    /// OK and Warning outcomes permit proceeding.
    #[must_use]
    pub fn is_acceptable(&self) -> bool {
        self.result.is_ok() || self.rank == Some(ValidationRank::Warning)
    }

    fn severity(&self) -> u8 {
        match self.rank {
            None => 0,
            Some(ValidationRank::Warning) => 1,
            Some(ValidationRank::DataNotReady) => 2,
            Some(ValidationRank::FatalError) => 3,
        }
    }

    /// Combine two outcomes; the worse one wins
    /// (`FatalError > DataNotReady > Warning > Ok`).
    #[must_use]
    pub fn worst(self, other: RankedValidation) -> RankedValidation {
        if other.severity() > self.severity() {
            other
        } else {
            self
        }
    }
}

impl Default for RankedValidation {
    fn default() -> Self {
        Self::ok()
    }
}

// =============================================================================
// Value Access View
// =============================================================================

/// Read access to property values, as seen by validator closures.
///
/// Implemented by the transaction view and by the what-if overlay.
pub trait ValueAccess {
    /// Current three-state value of a property.
    fn value_of(&self, id: PropertyId) -> OptionalResult<Value>;

    /// Declared type of a property, if it exists.
    fn value_type_of(&self, id: PropertyId) -> Option<ValueType>;
}

/// Overlay substituting one candidate value over a base view.
struct WhatIfView<'a> {
    base: &'a dyn ValueAccess,
    id: PropertyId,
    value: Value,
}

impl ValueAccess for WhatIfView<'_> {
    fn value_of(&self, id: PropertyId) -> OptionalResult<Value> {
        if id == self.id {
            return Some(Ok(self.value.clone()));
        }
        self.base.value_of(id)
    }

    fn value_type_of(&self, id: PropertyId) -> Option<ValueType> {
        self.base.value_type_of(id)
    }
}

// =============================================================================
// Dependency Validator
// =============================================================================

type ValidateClosure = Box<dyn Fn(&dyn ValueAccess) -> RankedValidation + Send + Sync>;

/// A validation relation over a set of properties.
pub struct DependencyValidator {
    property_ids: BTreeSet<PropertyId>,
    validate: ValidateClosure,
    ignored: AtomicBool,
    result: Mutex<RankedValidation>,
}

impl DependencyValidator {
    /// Relation over `property_ids`, evaluated by `validate`.
    #[must_use]
    pub fn new(
        property_ids: BTreeSet<PropertyId>,
        validate: impl Fn(&dyn ValueAccess) -> RankedValidation + Send + Sync + 'static,
    ) -> Self {
        debug_assert!(!property_ids.is_empty(), "validator without properties");
        Self {
            property_ids,
            validate: Box::new(validate),
            ignored: AtomicBool::new(false),
            result: Mutex::new(RankedValidation::ok()),
        }
    }

    /// The properties this relation spans.
    #[must_use]
    pub fn property_ids(&self) -> &BTreeSet<PropertyId> {
        &self.property_ids
    }

    /// Whether `id` participates in this relation.
    #[must_use]
    pub fn concerns(&self, id: PropertyId) -> bool {
        self.property_ids.contains(&id)
    }

    /// Suppress or re-enable change-driven re-evaluation.
    pub fn set_ignored(&self, ignored: bool) {
        self.ignored.store(ignored, Ordering::SeqCst);
    }

    /// Whether change-driven re-evaluation is suppressed.
    #[must_use]
    pub fn is_ignored(&self) -> bool {
        self.ignored.load(Ordering::SeqCst)
    }

    /// Last computed outcome.
    #[must_use]
    pub fn current_result(&self) -> RankedValidation {
        self.result.lock().expect("validator poisoned").clone()
    }

    /// Run the relation over a view (ignoring suppression).
    #[must_use]
    pub fn evaluate(&self, access: &dyn ValueAccess) -> RankedValidation {
        (self.validate)(access)
    }

    /// Re-run after a member value changed. Returns the new outcome when
    /// it differs from the stored one (the caller then broadcasts
    /// `validity_changed` for every member). Suppressed validators keep
    /// their stored result.
    #[must_use]
    pub fn reevaluate(&self, access: &dyn ValueAccess) -> Option<RankedValidation> {
        if self.is_ignored() {
            return None;
        }
        let new_result = self.evaluate(access);
        let mut stored = self.result.lock().expect("validator poisoned");
        if *stored == new_result {
            return None;
        }
        *stored = new_result.clone();
        Some(new_result)
    }

    /// Re-run with `value` substituted for `id` in the view. The stored
    /// outcome is untouched.
    #[must_use]
    pub fn validate_what_if(
        &self,
        id: PropertyId,
        value: Value,
        access: &dyn ValueAccess,
    ) -> RankedValidation {
        if !self.concerns(id) {
            debug_assert!(false, "what-if on a property outside the relation");
            return RankedValidation::error(
                "Validation error!",
                format!("property handle {} not part of this relation", id.index()),
            );
        }

        match access.value_type_of(id) {
            Some(expected) if expected == value.value_type() => {}
            Some(expected) => {
                return RankedValidation::error(
                    "Validation error!",
                    format!(
                        "invalid property type: {} expected: {}",
                        value.value_type().as_str(),
                        expected.as_str()
                    ),
                );
            }
            None => {
                return RankedValidation::error(
                    "Validation error!",
                    format!("unknown property handle {}", id.index()),
                );
            }
        }

        let overlay = WhatIfView {
            base: access,
            id,
            value,
        };
        self.evaluate(&overlay)
    }
}

impl std::fmt::Debug for DependencyValidator {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("DependencyValidator")
            .field("property_ids", &self.property_ids)
            .field("ignored", &self.is_ignored())
            .finish_non_exhaustive()
    }
}
