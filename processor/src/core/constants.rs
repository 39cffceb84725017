// =============================================================================
// Application Identity
// =============================================================================

/// Application name in lowercase (for paths and identifiers)
pub const APP_NAME_LOWER: &str = "reshape";

/// Library crate name, used as a log filter target
pub const CRATE_NAME: &str = "otel_reshape";

// =============================================================================
// Environment Variables
// =============================================================================

/// Environment variable for config file path
pub const ENV_CONFIG: &str = "RESHAPE_CONFIG";

/// Environment variable for the OTLP export to replay
pub const ENV_INPUT: &str = "RESHAPE_INPUT";

/// Environment variable for the resource attribute used to split batches
pub const ENV_ATTRIBUTE_KEY: &str = "RESHAPE_ATTRIBUTE_KEY";

/// Environment variable for log level/filter
pub const ENV_LOG: &str = "RESHAPE_LOG";
