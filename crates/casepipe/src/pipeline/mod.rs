pub mod context;
pub mod dispatcher;
pub mod registry;
pub mod stage;
pub mod stages;

pub use context::{StageContext, StageSettings};
pub use dispatcher::Dispatcher;
pub use registry::{StageFunction, StageRegistry};
pub use stage::{Stage, UnknownStage};
