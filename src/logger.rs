use crate::peer::types::IceCandidate;
use tracing::debug;
use tracing_subscriber::EnvFilter;

#[cfg(debug_assertions)]
const DEFAULT_FILTER: &str = "randchat=debug";

#[cfg(not(debug_assertions))]
const DEFAULT_FILTER: &str = "randchat=info";

/// Installs the fmt subscriber. `RUST_LOG` wins over the build default;
/// a second call is a no-op.
pub fn init_tracing() {
    let filter =
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(DEFAULT_FILTER));
    let _ = tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_target(true)
        .try_init();
}

/// Trickle-ICE trace line.
pub fn log_candidate(direction: &str, candidate: &IceCandidate) {
    debug!(
        direction,
        kind = candidate.candidate_type(),
        sdp_mid = ?candidate.sdp_mid,
        sdp_mline_index = ?candidate.sdp_mline_index,
        "trickle candidate: {}",
        candidate.candidate
    );
}
