//! Strongly-typed handles for registered entities.
//!
//! Every entity registered with a [`ModelBuilder`](crate::model::ModelBuilder) is
//! stored in a contiguous pool and referred to by a small integer handle.
//! `EquationH(n)` is the n-th equation that was registered.

use serde::{Deserialize, Serialize};
use std::fmt;

/// Behaviour shared by all handle types so that [`Pool`](crate::arena::Pool) can be generic.
pub trait Handle: Copy + Eq + Ord + fmt::Debug {
    /// Name of the entity kind, used in error messages.
    const KIND: &'static str;

    fn from_position(position: usize) -> Self;

    fn position(self) -> usize;
}

macro_rules! define_handle {
    ($(#[$meta:meta])* $name:ident, $kind:literal) => {
        $(#[$meta])*
        #[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
        pub struct $name(pub u32);

        impl Handle for $name {
            const KIND: &'static str = $kind;

            fn from_position(position: usize) -> Self {
                Self(position as u32)
            }

            fn position(self) -> usize {
                self.0 as usize
            }
        }

        impl fmt::Display for $name {
            fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
                write!(f, "{}", self.0)
            }
        }
    };
}

define_handle!(
    /// Identifies an index set.
    IndexSetH,
    "index set"
);
define_handle!(
    /// Identifies a parameter group.
    ParameterGroupH,
    "parameter group"
);
define_handle!(
    /// Identifies a parameter.
    ParameterH,
    "parameter"
);
define_handle!(
    /// Identifies an input time series.
    InputH,
    "input"
);
define_handle!(
    /// Identifies an equation.
    EquationH,
    "equation"
);
define_handle!(
    /// Identifies a solver.
    SolverH,
    "solver"
);

/// A concrete position within one index set.
///
/// Used to pin an index set explicitly when reading a value, and to address
/// storage from outside the model.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct Index {
    pub set: IndexSetH,
    pub position: usize,
}

impl Index {
    pub fn new(set: IndexSetH, position: usize) -> Self {
        Self { set, position }
    }
}
