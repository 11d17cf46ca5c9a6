//! Market primitives and price sources

pub mod price_feed;
pub mod types;

pub use price_feed::{FixedPrices, PriceSource, RandomWalkPrices, BASE_PRICES};
pub use types::{OrderType, PositionSide, Side, Symbol};
