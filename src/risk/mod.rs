// Sizing and stop-price policy
pub mod sizing;

pub use sizing::{
    close_sizing, target_stop_price, validate_stop_side, CloseSizing, Fraction, LiquidityFallback,
    Reserve, ReservePolicy,
};
