use std::fmt;
use thiserror::Error;

/// One hop of a dependency ring: `dependent` reads the current value of `dependency`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DependencyHop {
    pub dependent: String,
    pub dependency: String,
}

impl fmt::Display for DependencyHop {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "\"{}\" depends on \"{}\"", self.dependent, self.dependency)
    }
}

/// A closed chain of dependencies, reported when scheduling finds a cycle.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DependencyRing(pub Vec<DependencyHop>);

impl DependencyRing {
    /// Returns true if any hop of the ring mentions the named equation.
    pub fn mentions(&self, equation: &str) -> bool {
        self.0
            .iter()
            .any(|hop| hop.dependent == equation || hop.dependency == equation)
    }
}

impl fmt::Display for DependencyRing {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        for (i, hop) in self.0.iter().enumerate() {
            if i > 0 {
                write!(f, ", ")?;
            }
            write!(f, "{}", hop)?;
        }
        Ok(())
    }
}

/// Error type for model construction and execution.
#[derive(Error, Debug)]
pub enum CatchmentError {
    #[error("{kind} \"{name}\" was registered more than once")]
    DuplicateName { kind: &'static str, name: String },

    #[error("No {kind} named \"{name}\" has been registered")]
    UnknownName { kind: &'static str, name: String },

    #[error("Handle {handle} does not refer to a registered {kind}")]
    UnknownHandle { kind: &'static str, handle: u32 },

    #[error("Equation \"{equation}\" has no body")]
    UndefinedEquationBody { equation: String },

    #[error("Equation \"{equation}\" is integrated but has not been assigned a solver")]
    IntegratedWithoutSolver { equation: String },

    #[error("Equation \"{equation}\" can not be added to solver \"{solver}\": {reason}")]
    InvalidSolverMember {
        equation: String,
        solver: String,
        reason: String,
    },

    #[error("Equation \"{equation}\" references \"{target}\": {reason}")]
    InvalidReference {
        equation: String,
        target: String,
        reason: String,
    },

    #[error("Equation \"{equation}\" writes to \"{target}\" without declaring it")]
    UndeclaredWrite { equation: String, target: String },

    #[error("Index \"{index}\" of index set \"{index_set}\" lists \"{input}\" as a branch input, but branch inputs must be declared before the indices they feed")]
    InvalidBranchInput {
        index_set: String,
        index: String,
        input: String,
    },

    #[error("Parameter \"{parameter}\" has type {expected}, got a value of type {found}")]
    ParameterTypeMismatch {
        parameter: String,
        expected: String,
        found: String,
    },

    #[error("{0} is not a valid date")]
    InvalidDate(String),

    #[error("Equation \"{equation}\" computes parameter \"{parameter}\" but varies over index set \"{index_set}\" which the parameter does not")]
    ComputedParameterShape {
        equation: String,
        parameter: String,
        index_set: String,
    },

    #[error("Access to \"{entity}\" does not specify an index for index set \"{index_set}\"")]
    IncompleteIndex { entity: String, index_set: String },

    #[error("Index {index} is out of range for index set \"{index_set}\" which has {count} indices")]
    IndexOutOfRange {
        index_set: String,
        index: usize,
        count: usize,
    },

    #[error("\"{entity}\" expected {expected} values, got {found}")]
    DataShapeMismatch {
        entity: String,
        expected: usize,
        found: usize,
    },

    #[error("The data set was not created for this model: {0}")]
    IncompatibleDataSet(String),

    #[error("Cyclic dependency between equations: {ring}")]
    CyclicDependency { ring: DependencyRing },

    #[error("Cyclic dependency between the non-integrated equations of solver \"{solver}\": {ring}")]
    SolverCycle { solver: String, ring: DependencyRing },

    #[error("Cyclic dependency between initial values: {ring}")]
    InitialValueCycle { ring: DependencyRing },

    #[error("Index set dependencies did not settle after {iterations} iterations. The model structure is inconsistent")]
    ClosureDidNotConverge { iterations: usize },

    #[error("Batch group sinking did not settle after {iterations} passes")]
    SinkingDidNotConverge { iterations: usize },

    #[error("Equation \"{equation}\" produced a non-finite value at timestep {timestep}\n{diagnostic}")]
    NonFiniteResult {
        equation: String,
        timestep: i64,
        diagnostic: String,
    },

    #[error("Solver \"{solver}\" failed: {message}")]
    SolverFailed { solver: String, message: String },

    #[error("A Jacobian was requested from a solver batch that was not set up to estimate one")]
    JacobianUnavailable,

    #[error("Invalid configuration: {0}")]
    Config(#[from] toml::de::Error),
}

/// Convenience type for `Result<T, CatchmentError>`.
pub type CatchmentResult<T> = Result<T, CatchmentError>;
