#![forbid(unsafe_code)]
#![deny(unreachable_pub)]

//! Job registry, provider/upstream wiring, and the beam-search orchestrator
//! state machine that drives one optimization job from PREPARE through
//! FINALIZE.

pub mod metadata;
pub mod orchestrator;
pub mod providers;
pub mod registry;
pub mod router;
pub mod upstream;

pub use metadata::{DefaultPathBuilder, FilesystemPersist, PathBuilder, Persist, PersistError};
pub use orchestrator::Orchestrator;
pub use providers::ProviderSet;
pub use registry::{JobRegistry, PendingEntry};
pub use router::{Router, SubmitResponse};
pub use upstream::UpstreamContext;
