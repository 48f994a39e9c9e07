pub mod loader;
pub mod models;
pub mod settings;
pub mod validation;

pub use loader::load_config;
pub use models::*;
pub use settings::{LogFormat, RuntimeSettings};
pub use validation::{RoutingConfigValidator, ValidationError, ValidationResult};
