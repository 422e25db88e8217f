mod listing;
mod profile;

pub use listing::{load_listing, parse_listing};
pub use profile::{load_profile, parse_profile};
