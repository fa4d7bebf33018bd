pub mod config;
pub mod error;
pub mod model;
pub mod prompt;
pub mod sampling;
pub mod server;
pub mod state;

pub use config::AppConfig;
pub use model::{Consultant, Consultation, ConsultingBackend, ModelInfo};
pub use sampling::SamplingOptions;
pub use server::build_router;
pub use state::ServiceState;
