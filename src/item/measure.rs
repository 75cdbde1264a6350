//! Measurement adapter - the boundary to the host platform.
//!
//! The host knows how to find a rendered element and report its bounding
//! rect. The engine only needs the height, and it never assumes the future
//! resolves: every measurement is raced against the item's max-wait timer.

use futures::future::LocalBoxFuture;

use crate::types::{ElementRef, NodeRect};

/// Asynchronously measure a rendered element.
pub trait Measure {
    /// Resolve to the element's bounding rect. May never resolve.
    fn measure(&self, element: &ElementRef) -> LocalBoxFuture<'static, NodeRect>;
}

/// Whether a measured height can be used for layout.
pub fn is_usable_height(height: f32) -> bool {
    height.is_finite() && height > 0.0
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_usable_heights() {
        assert!(is_usable_height(1.0));
        assert!(!is_usable_height(0.0));
        assert!(!is_usable_height(-3.0));
        assert!(!is_usable_height(f32::INFINITY));
        assert!(!is_usable_height(f32::NAN));
    }
}
