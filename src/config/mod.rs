//! # Configuration System
//!
//! TOML-based configuration for the load balancer: parsing, validation and
//! saving.
//!
//! ## Example Configuration
//!
//! ```toml
//! [balancer]
//! strategy = "weighted-round-robin"
//! persistence = "lb-cookie"
//! request_timeout = "30s"
//!
//! [health_check]
//! interval = "10s"
//! unhealthy_retries = 3
//! healthy_retries = 2
//!
//! [affinity]
//! cookie_name = "R0N_LB"
//!
//! [logging]
//! level = "info"
//! format = "json"
//!
//! [[endpoints]]
//! host = "10.0.0.1"
//! port = 8080
//! weight = 3
//!
//! [[endpoints]]
//! host = "10.0.0.2"
//! port = 8080
//! ```

mod error;
mod loader;
mod types;
mod validation;

pub use error::{ConfigError, ConfigResult};
pub use loader::ConfigLoader;
pub use types::{BalancerConfig, LogFormat, LogLevel, LogOutput, LoggingConfig};
pub use validation::{
    BasicValidator, PersistenceValidator, ValidationError, ValidationResult, ValidationSeverity,
    Validator,
};
