//! Failure classification for exception filtering
//!
//! This module decides which command failures count toward the error rate and
//! which are expected outcomes to be ignored. Failure kinds are modelled as a
//! compile-time hierarchy: an error type names its [`FailureCategory`], each
//! category names its parent, and [`ExcludedFailures`] matches a category if it
//! is one of the excluded entries or descends from one.

use std::fmt;
use std::hash::Hash;
use std::time::Duration;

/// Context provided to failure classifiers for error evaluation
#[derive(Debug)]
pub struct FailureContext<'a, E> {
    /// Command key
    pub command: &'a str,
    /// The error returned by the command
    pub error: &'a E,
    /// How long the failed call ran
    pub duration: Duration,
}

/// Trait for classifying failures - determines if an error is reportable
///
/// A reportable failure is recorded in the rolling window and can open the
/// circuit. A non-reportable one is handed back to the caller untouched.
pub trait FailureClassifier<E>: Send + Sync + fmt::Debug {
    fn is_reportable(&self, ctx: &FailureContext<'_, E>) -> bool;
}

/// Default classifier that reports all errors
#[derive(Debug, Clone, Copy, Default)]
pub struct DefaultClassifier;

impl<E> FailureClassifier<E> for DefaultClassifier {
    fn is_reportable(&self, _ctx: &FailureContext<'_, E>) -> bool {
        true
    }
}

/// Predicate-based classifier using a closure
pub struct PredicateClassifier<F> {
    predicate: F,
}

impl<F> PredicateClassifier<F> {
    pub fn new<E>(predicate: F) -> Self
    where
        F: Fn(&FailureContext<'_, E>) -> bool + Send + Sync,
    {
        Self { predicate }
    }
}

impl<E, F> FailureClassifier<E> for PredicateClassifier<F>
where
    F: Fn(&FailureContext<'_, E>) -> bool + Send + Sync,
{
    fn is_reportable(&self, ctx: &FailureContext<'_, E>) -> bool {
        (self.predicate)(ctx)
    }
}

impl<F> fmt::Debug for PredicateClassifier<F> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("PredicateClassifier")
            .field("predicate", &"<closure>")
            .finish()
    }
}

/// A node in a failure-category hierarchy
///
/// `parent` must eventually return `None`; hierarchies are trees.
///
/// ```rust
/// use command_breaker::FailureCategory;
///
/// #[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
/// enum Kind {
///     Client,
///     NotFound,
///     Server,
/// }
///
/// impl FailureCategory for Kind {
///     fn parent(self) -> Option<Self> {
///         match self {
///             Kind::NotFound => Some(Kind::Client),
///             Kind::Client | Kind::Server => None,
///         }
///     }
/// }
///
/// assert!(Kind::NotFound.is_a(Kind::Client));
/// assert!(!Kind::Client.is_a(Kind::NotFound));
/// ```
pub trait FailureCategory: Copy + Eq + Hash + fmt::Debug + Send + Sync + 'static {
    fn parent(self) -> Option<Self>;

    /// True if `self` is `ancestor` or a descendant of it
    fn is_a(self, ancestor: Self) -> bool {
        let mut current = Some(self);
        while let Some(category) = current {
            if category == ancestor {
                return true;
            }
            current = category.parent();
        }
        false
    }
}

/// Error types that belong to a failure-category hierarchy
pub trait Categorized {
    type Category: FailureCategory;

    fn category(&self) -> Self::Category;
}

/// Ordered set of failure categories treated as non-reportable
///
/// Membership is a set test: the order entries were added in never changes
/// the result.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ExcludedFailures<C> {
    categories: Vec<C>,
}

impl<C: FailureCategory> ExcludedFailures<C> {
    pub fn new() -> Self {
        Self {
            categories: Vec::new(),
        }
    }

    /// Add a category (duplicates are ignored)
    pub fn with(mut self, category: C) -> Self {
        self.insert(category);
        self
    }

    pub fn insert(&mut self, category: C) -> bool {
        if self.categories.contains(&category) {
            return false;
        }
        self.categories.push(category);
        true
    }

    /// True if `category` is an excluded entry or descends from one
    pub fn excludes(&self, category: C) -> bool {
        self.categories.iter().any(|&excluded| category.is_a(excluded))
    }

    pub fn is_reportable(&self, category: C) -> bool {
        !self.excludes(category)
    }

    pub fn iter(&self) -> impl Iterator<Item = C> + '_ {
        self.categories.iter().copied()
    }

    pub fn len(&self) -> usize {
        self.categories.len()
    }

    pub fn is_empty(&self) -> bool {
        self.categories.is_empty()
    }
}

impl<C: FailureCategory> Default for ExcludedFailures<C> {
    fn default() -> Self {
        Self::new()
    }
}

impl<C: FailureCategory> FromIterator<C> for ExcludedFailures<C> {
    fn from_iter<I: IntoIterator<Item = C>>(iter: I) -> Self {
        let mut set = Self::new();
        for category in iter {
            set.insert(category);
        }
        set
    }
}

impl<E: Categorized> FailureClassifier<E> for ExcludedFailures<E::Category> {
    fn is_reportable(&self, ctx: &FailureContext<'_, E>) -> bool {
        ExcludedFailures::is_reportable(self, ctx.error.category())
    }
}
