use serde::{Deserialize, Serialize};
use std::fmt;

/// A database object reference.
///
/// Negative values are invalid; [`NOTHING`] is the canonical "no object"
/// value.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub struct Dbref(pub i32);

/// The "no object" dbref, printed as `#-1`.
pub const NOTHING: Dbref = Dbref(-1);

impl Dbref {
    /// Whether this dbref can possibly name a real object.
    pub fn is_valid(self) -> bool {
        self.0 >= 0
    }
}

impl fmt::Display for Dbref {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "#{}", self.0)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn display_and_validity() {
        assert_eq!(Dbref(5).to_string(), "#5");
        assert_eq!(NOTHING.to_string(), "#-1");
        assert!(Dbref(0).is_valid());
        assert!(!NOTHING.is_valid());
    }
}
