//! Graph and status primitives shared by every step in the workflow engine:
//! the lifecycle [`status::Status`] state machine, declarative [`field`]
//! validation for config-constructed values, and the [`reference`] graph
//! walk that underlies cycle detection, depth bounding, and pruning.

pub mod error;
pub mod field;
pub mod reference;
pub mod status;

pub use error::{CircularReferenceError, ExceedsMaximumDepthError, GraphError, MAXIMUM_REFERENCE_DEPTH};
pub use field::{validate_fields, FieldError, FieldSpec};
pub use reference::{all_references, reference_generations, reverse_mapping, Node, ReferenceFieldSpec, ReverseMapping};
pub use status::{RunnableStage, Stage, Status, StepFailure};
