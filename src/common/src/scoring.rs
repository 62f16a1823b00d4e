//! Pure position scoring.
//!
//! Turns one open position plus a current price into settled points. This
//! is a pure function of its inputs; the settlement engine and the
//! read-side stats preview both call it.

use rust_decimal::Decimal;

use crate::models::PositionType;

/// Score a single position against the current price.
///
/// Liquidated positions score zero: a long is liquidated once the price
/// falls below its liquidation price, a short once it rises above it.
/// Otherwise the allocation is converted to units at the entry price,
/// marked at the current price, and the leveraged difference is added back
/// onto the allocation, floored at zero.
pub fn score(
    entry_price: Decimal,
    leverage: Decimal,
    current_price: Decimal,
    liquidation_price: Decimal,
    points_allocated: Decimal,
    position_type: PositionType,
) -> Decimal {
    match position_type {
        PositionType::Long if current_price < liquidation_price => return Decimal::ZERO,
        PositionType::Short if current_price > liquidation_price => return Decimal::ZERO,
        _ => {}
    }

    let unit_points = if entry_price.is_zero() {
        Decimal::ZERO
    } else {
        points_allocated / entry_price
    };
    let notional = unit_points * current_price;

    let raw_diff = match position_type {
        PositionType::Long => notional - points_allocated,
        PositionType::Short => points_allocated - notional,
    };

    let final_points = raw_diff * leverage + points_allocated;
    final_points.max(Decimal::ZERO)
}
