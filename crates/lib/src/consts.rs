//! Crate-wide constants: names, environment variables and serialization tags.

pub const APP_NAME: &str = "cairn";

/// Default directory (relative to the working directory) for filesystem state.
pub const DEFAULT_STATE_DIR: &str = ".cairn";

/// Fallback stage when neither `CAIRN_STAGE` nor `USER` is set.
pub const DEFAULT_STAGE: &str = "dev";

/// Resource kind recorded in a parent's state store for every nested scope.
pub const SCOPE_KIND: &str = "cairn::scope";

// Environment variables
pub const ENV_STAGE: &str = "CAIRN_STAGE";
pub const ENV_PASSPHRASE: &str = "CAIRN_PASSPHRASE";
pub const ENV_STATE_DIR: &str = "CAIRN_STATE_DIR";
pub const ENV_PHASE: &str = "CAIRN_PHASE";

/// Prefix for environment variables consulted by the env secret transform.
pub const SECRET_ENV_PREFIX: &str = "CAIRN_SECRET_";

// Tags used by the codec for non-plain values
pub const SECRET_TAG: &str = "@secret";
pub const DATE_TAG: &str = "@date";
pub const SCOPE_TAG: &str = "@scope";
pub const SYMBOL_TAG: &str = "@symbol";
pub const SCHEMA_TAG: &str = "@schema";
pub const RESOURCE_TAG: &str = "@resource";

/// Extension of per-resource state files.
pub const STATE_FILE_EXT: &str = "json";
