mod consultant;
mod loader;
mod types;

pub use consultant::{Consultant, ConsultingBackend, error_answer};
pub use loader::{ModelArtifacts, ModelInstance};
pub use types::{Consultation, ModelInfo};
