//! Standard exit codes for CLI operations
//!
//! These exit codes follow Unix conventions and sysexits.h where applicable.

/// Success - operation completed without errors
pub const SUCCESS: i32 = 0;

/// General error - unspecified failure
pub const ERROR: i32 = 1;

/// Configuration error - bad config file, unknown environment, bad override
pub const CONFIG_ERROR: i32 = 2;

/// Template error - template missing, invalid, or failed to render
pub const TEMPLATE_ERROR: i32 = 3;

/// Cluster error - kubeconfig, API server, or helm failure outside a batch
pub const CLUSTER_ERROR: i32 = 4;

/// IO error - file not found, permission denied, etc.
pub const IO_ERROR: i32 = 5;

/// Batch finished with failed or unready replicas
pub const DEPLOY_FAILED: i32 = 6;
