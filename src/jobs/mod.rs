pub mod array;
pub mod hold;
pub mod job;
pub mod registry;
pub mod state;

pub use array::JobArray;
pub use hold::{HoldSpec, HoldTypes, SetMode};
pub use job::{Job, ServerFlags};
pub use registry::{JobRegistry, LockedArray, LockedJob};
pub use state::{evaluate_state, JobState, JobSubstate};
