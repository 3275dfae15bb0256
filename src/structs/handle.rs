use serde::{Deserialize, Serialize};

use super::INTEGRAL_SEPARATOR;

/// A handle uniquely and absolutely identifies an integral within a form;
/// it is attached to every diagnostic so that errors can be traced back to
/// their source integral.
#[derive(Clone, Serialize, Deserialize)]
pub struct Handle {
    /// the form to which the integral belongs
    pub form: String,
    /// the name of the integral within its form, e.g. `cell_0`
    pub name: String,
}
impl std::cmp::Ord for Handle {
    fn cmp(&self, other: &Self) -> std::cmp::Ordering {
        match self.form.cmp(&other.form) {
            std::cmp::Ordering::Equal => self.name.cmp(&other.name),
            other => other,
        }
    }
}
impl std::cmp::PartialOrd for Handle {
    fn partial_cmp(&self, other: &Self) -> Option<std::cmp::Ordering> {
        Some(self.cmp(other))
    }
}
impl std::cmp::PartialEq for Handle {
    fn eq(&self, other: &Self) -> bool {
        (self.form == other.form) && (self.name == other.name)
    }
}
impl std::cmp::Eq for Handle {}
impl std::hash::Hash for Handle {
    fn hash<H: std::hash::Hasher>(&self, state: &mut H) {
        self.form.hash(state);
        self.name.hash(state);
    }
}
impl Handle {
    pub fn new<S1: AsRef<str>, S2: AsRef<str>>(form: S1, name: S2) -> Self {
        Handle {
            form: form.as_ref().to_owned(),
            name: name.as_ref().to_owned(),
        }
    }

    /// Generate the handle of the ith integral of a given domain kind
    pub fn ith<S: AsRef<str>>(form: S, kind: &str, i: usize) -> Handle {
        Handle {
            form: form.as_ref().to_owned(),
            name: format!("{}{}{}", kind, INTEGRAL_SEPARATOR, i),
        }
    }

    pub fn mangled_name(&self) -> String {
        format!("{}{}{}", self.form, INTEGRAL_SEPARATOR, self.name)
    }
}

impl std::fmt::Display for Handle {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}.{}", self.form, self.name)
    }
}
impl std::fmt::Debug for Handle {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}.{}", self.form, self.name)
    }
}
