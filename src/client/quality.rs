//! Quality tier clamping and negotiation.

use tracing::warn;

use super::ClientError;
use crate::media::Provider;

/// Clamps a requested tier into the provider's supported range.
///
/// Clamping is a capability warning, not an error.
#[must_use]
pub fn clamp_quality(provider: Provider, requested: u8) -> u8 {
    let clamped = requested.clamp(provider.min_quality(), provider.max_quality());
    if clamped != requested {
        warn!(
            provider = %provider,
            requested,
            using = clamped,
            "requested quality is not available from this provider"
        );
    }
    clamped
}

/// Picks the tier to download among those the item is offered in.
///
/// Prefers the highest tier at or below `requested`; when every offered tier
/// is above it, takes the lowest one.
///
/// # Errors
///
/// Returns [`ClientError::NonStreamable`] when nothing is offered.
pub fn negotiate_available(requested: u8, available: &[u8]) -> Result<u8, ClientError> {
    available
        .iter()
        .copied()
        .filter(|tier| *tier <= requested)
        .max()
        .or_else(|| available.iter().copied().min())
        .ok_or_else(|| ClientError::non_streamable("No quality tier is available for this item."))
}
