// Shared object lifecycle, referenced by every L2 resource type.
//
// An object progresses Uninitialized -> Configuring -> Created ->
// Destroyed and never backwards; operations valid in one state are
// rejected with WrongState in another. Built on the four-state flow
// implicit in the device/instance construction-then-use-then-destroy
// pattern (device.rs, instance.rs), made explicit here as its own enum so
// every resource module can share one validation helper instead of
// re-deriving the same match arms.

use crate::error::{Error, ErrorKind, Result};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Lifecycle {
    Uninitialized,
    Configuring,
    Created,
    Destroyed,
}

impl Lifecycle {
    /// Pipelines and shaders accumulate configuration (slots, attributes,
    /// push-constant layout) before their first use; this checks a
    /// mutation is only attempted in `Configuring`.
    pub fn require_configuring(self) -> Result<()> {
        match self {
            Lifecycle::Configuring => Ok(()),
            _ => Err(Error::new(ErrorKind::WrongState, "object is not in the Configuring state")),
        }
    }

    /// Binding, drawing, uploading, and downloading all require a fully
    /// built object.
    pub fn require_created(self) -> Result<()> {
        match self {
            Lifecycle::Created => Ok(()),
            _ => Err(Error::new(ErrorKind::WrongState, "object is not in the Created state")),
        }
    }

    pub fn require_not_destroyed(self) -> Result<()> {
        match self {
            Lifecycle::Destroyed => Err(Error::new(ErrorKind::WrongState, "object has already been destroyed")),
            _ => Ok(()),
        }
    }

    /// Advances the lifecycle, rejecting a backward or skipped transition.
    pub fn advance(self, to: Lifecycle) -> Result<Lifecycle> {
        let ok = matches!(
            (self, to),
            (Lifecycle::Uninitialized, Lifecycle::Configuring)
                | (Lifecycle::Uninitialized, Lifecycle::Created)
                | (Lifecycle::Configuring, Lifecycle::Created)
                | (Lifecycle::Created, Lifecycle::Destroyed)
                | (Lifecycle::Configuring, Lifecycle::Destroyed)
                | (Lifecycle::Uninitialized, Lifecycle::Destroyed)
        );
        if ok {
            Ok(to)
        } else {
            Err(Error::new(
                ErrorKind::WrongState,
                format!("illegal lifecycle transition {:?} -> {:?}", self, to),
            ))
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn forward_transitions_are_legal() {
        let s = Lifecycle::Uninitialized;
        let s = s.advance(Lifecycle::Configuring).unwrap();
        let s = s.advance(Lifecycle::Created).unwrap();
        let s = s.advance(Lifecycle::Destroyed).unwrap();
        assert_eq!(s, Lifecycle::Destroyed);
    }

    #[test]
    fn backward_transition_rejected() {
        let s = Lifecycle::Created;
        assert!(s.advance(Lifecycle::Configuring).is_err());
    }
}
