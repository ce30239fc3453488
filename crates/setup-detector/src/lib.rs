//! Layer 3 and Layer 4: break-of-structure + retest detection and Greek
//! entry confirmation.

pub mod confirmation;
pub mod price_action;

pub use confirmation::confirm_candidate;
pub use price_action::PriceActionDetector;
