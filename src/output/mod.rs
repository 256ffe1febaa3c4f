pub mod dummy;
pub mod engine;
pub mod queue;
pub mod refcount;
pub mod state;

pub use dummy::{DummyBufferPool, DummyRegistry};
pub use engine::{EngineStats, OutputEngine, OutputSnapshot};
pub use refcount::{Edge, RefCount};
pub use state::OutputState;
