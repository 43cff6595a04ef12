//! Displacement tiers, tried in priority order. The first tier that names a
//! victim decides the displacement.

mod competitive;
mod elite;
mod force_close;
mod legacy;

pub use competitive::CompetitiveTier;
pub use elite::EliteTier;
pub use force_close::ForceCloseTier;
pub use legacy::LegacyTier;

use super::{AdmissionConfig, DisplacementTier};

/// Elite, competitive, force-close, legacy.
pub fn default_tiers(config: &AdmissionConfig) -> Vec<Box<dyn DisplacementTier>> {
    vec![
        Box::new(EliteTier::from_config(config)),
        Box::new(CompetitiveTier::from_config(config)),
        Box::new(ForceCloseTier::from_config(config)),
        Box::new(LegacyTier::from_config(config)),
    ]
}
