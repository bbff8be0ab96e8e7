// SPDX-License-Identifier: CEPL-1.0
#![deny(unsafe_op_in_unsafe_fn)]

/// Default filter when `RUST_LOG` is unset.
pub const DEFAULT_FILTER: &str = "info";

/// Installs the process-wide subscriber. `RUST_LOG` wins over `fallback`.
/// Calling it twice is harmless; the second install is ignored.
pub fn init_tracing(fallback: &str) {
    use tracing_subscriber::{fmt, EnvFilter};
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(fallback));
    let installed = fmt()
        .with_env_filter(filter)
        .with_target(false)
        .compact()
        .try_init()
        .is_ok();
    if installed {
        tracing::debug!("tracing ready (fallback filter: {fallback})");
    }
}
