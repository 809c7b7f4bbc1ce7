//! Ordered aggregate of independent failures

use std::error::Error;
use std::fmt;

/// Several failures collected from one operation, in the order they occurred
///
/// [`Error::source`] yields the first cause; the full list is available
/// through [`ErrorList::errors`] or [`ErrorList::into_errors`].
#[derive(Debug)]
pub struct ErrorList<E> {
    errors: Vec<E>,
}

impl<E> ErrorList<E> {
    #[must_use]
    pub fn new() -> Self {
        Self { errors: Vec::new() }
    }

    pub fn push(&mut self, error: E) {
        self.errors.push(error);
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.errors.is_empty()
    }

    #[must_use]
    pub fn len(&self) -> usize {
        self.errors.len()
    }

    #[must_use]
    pub fn errors(&self) -> &[E] {
        &self.errors
    }

    #[must_use]
    pub fn first(&self) -> Option<&E> {
        self.errors.first()
    }

    pub fn into_errors(self) -> Vec<E> {
        self.errors
    }

    /// `Ok(())` when nothing was collected, otherwise the list itself
    pub fn into_result(self) -> Result<(), Self> {
        if self.errors.is_empty() {
            Ok(())
        } else {
            Err(self)
        }
    }
}

impl<E> Default for ErrorList<E> {
    fn default() -> Self {
        Self::new()
    }
}

impl<E> From<Vec<E>> for ErrorList<E> {
    fn from(errors: Vec<E>) -> Self {
        Self { errors }
    }
}

impl<E> FromIterator<E> for ErrorList<E> {
    fn from_iter<I: IntoIterator<Item = E>>(iter: I) -> Self {
        Self {
            errors: iter.into_iter().collect(),
        }
    }
}

impl<E> IntoIterator for ErrorList<E> {
    type Item = E;
    type IntoIter = std::vec::IntoIter<E>;

    fn into_iter(self) -> Self::IntoIter {
        self.errors.into_iter()
    }
}

impl<E: fmt::Display> fmt::Display for ErrorList<E> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self.errors.as_slice() {
            [] => f.write_str("no errors"),
            [only] => write!(f, "{only}"),
            many => {
                write!(f, "{} errors: ", many.len())?;
                for (i, err) in many.iter().enumerate() {
                    if i > 0 {
                        f.write_str("; ")?;
                    }
                    write!(f, "{err}")?;
                }
                Ok(())
            }
        }
    }
}

impl<E> Error for ErrorList<E>
where
    E: Error + 'static,
{
    fn source(&self) -> Option<&(dyn Error + 'static)> {
        self.errors.first().map(|e| e as &(dyn Error + 'static))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::ValidationError;

    #[test]
    fn test_empty_list_is_ok() {
        let list: ErrorList<ValidationError> = ErrorList::new();
        assert!(list.into_result().is_ok());
    }

    #[test]
    fn test_preserves_order_and_display() {
        let mut list = ErrorList::new();
        list.push(ValidationError::required("a"));
        list.push(ValidationError::required("b"));

        assert_eq!(list.len(), 2);
        assert_eq!(list.errors()[1].field, "b");
        assert_eq!(
            list.to_string(),
            "2 errors: validation failed for a: is required; validation failed for b: is required"
        );

        let source = list.source().map(ToString::to_string);
        assert_eq!(source.as_deref(), Some("validation failed for a: is required"));
    }

    #[test]
    fn test_single_error_display() {
        let list: ErrorList<_> = vec![ValidationError::required("only")].into();
        assert_eq!(list.to_string(), "validation failed for only: is required");
    }
}
