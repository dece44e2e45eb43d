pub mod alert_queue;
pub mod classifier;
pub mod cursor;
pub mod observable;
pub mod sound;
pub mod store;
pub mod sync;
pub mod toast;

pub use observable::Observable;
pub use sync::{
    EngineOutputs, EngineSettings, FetchMode, FetchOutcome, FetchRequest, FetchTicket, SyncEngine,
};
