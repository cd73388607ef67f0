pub mod store;

pub use store::{detour_before, next_permanent_ordinal, splice_leg, RouteStore};
