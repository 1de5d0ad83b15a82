//! Core modules for proxlock

pub mod smoother;
pub mod distance;
pub mod history;
pub mod registry;
pub mod supervisor;
pub mod evaluator;
pub mod presence;
pub mod clock;
pub mod adapter;
pub mod lock;
pub mod batcher;
pub mod engine;
pub mod api;

pub use smoother::{SignalSmoother, EstimatorState};
pub use distance::estimate_distance;
pub use history::{SampleHistory, LinkHistories};
pub use registry::DeviceRegistry;
pub use supervisor::{ConnectionSupervisor, SessionState, SupervisorConfig};
pub use evaluator::{LinkEvaluator, Evaluation, EvaluatorSettings};
pub use presence::PresenceCore;
pub use clock::{Clock, SystemClock, ManualClock};
pub use adapter::{RadioAdapter, LoggingAdapter, AdapterCall};
pub use lock::{LockAction, CommandLock, LogOnlyLock};
pub use batcher::UpdateBatcher;
pub use engine::{Engine, EngineHandle};
pub use api::{create_router, run_server};
