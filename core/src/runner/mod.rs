mod abort;
mod io_pump;
mod run;
mod traits;
pub mod types;

pub use abort::terminate;
pub use run::invoke;
pub use traits::{RunnerPlugin, RunnerSession};
pub use types::{
    InvocationOutcome, InvocationResult, InvokeOptions, RunOutcome, RunnerStartArgs, Signal,
};
