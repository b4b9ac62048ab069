//! Registration checks applied before anything is sent

use rust_decimal::Decimal;
use trading_messages::{OrderRegister, OrderType};

/// Reason the registration must not reach the venue, if any
pub fn validate_register(register: &OrderRegister) -> Option<String> {
    if register.security_id.code.is_empty() {
        return Some("security is not specified".into());
    }
    if !register.security_id.has_board() {
        return Some(format!("security {} has no board", register.security_id.code));
    }
    if register.portfolio_name.is_empty() {
        return Some("portfolio is not specified".into());
    }
    if register.price < Decimal::ZERO {
        return Some(format!("price {} is negative", register.price));
    }
    if register.order_type == OrderType::Limit && register.price.is_zero() {
        return Some("limit order has zero price".into());
    }

    if register.is_conditional() {
        if register.condition.is_none() {
            return Some("conditional order has no condition".into());
        }
    } else if register.volume <= Decimal::ZERO {
        return Some(format!("volume {} must be positive", register.volume));
    }
    None
}

#[cfg(test)]
mod tests {
    use super::*;
    use rust_decimal_macros::dec;
    use trading_messages::{OrderCondition, SecurityId, Side};

    fn register(price: Decimal, volume: Decimal) -> OrderRegister {
        OrderRegister::new(
            1,
            SecurityId::new("SBER", "TQBR"),
            "pf",
            Side::Buy,
            price,
            volume,
        )
    }

    #[test]
    fn test_valid_limit_order() {
        assert_eq!(validate_register(&register(dec!(100), dec!(1))), None);
    }

    #[test]
    fn test_rejections() {
        assert!(validate_register(&register(dec!(0), dec!(1))).is_some());
        assert!(validate_register(&register(dec!(-1), dec!(1))).is_some());
        assert!(validate_register(&register(dec!(100), dec!(0))).is_some());

        let mut no_portfolio = register(dec!(100), dec!(1));
        no_portfolio.portfolio_name.clear();
        assert!(validate_register(&no_portfolio).is_some());

        let mut no_board = register(dec!(100), dec!(1));
        no_board.security_id = SecurityId::new("SBER", "");
        assert!(validate_register(&no_board).is_some());
    }

    #[test]
    fn test_market_and_conditional_orders() {
        let market = register(dec!(0), dec!(5)).with_order_type(OrderType::Market);
        assert_eq!(validate_register(&market), None);

        let bare_stop = register(dec!(100), dec!(0)).with_order_type(OrderType::Conditional);
        assert!(validate_register(&bare_stop).is_some());

        let stop = bare_stop.with_condition(OrderCondition {
            trigger_price: Some(dec!(95)),
            ..Default::default()
        });
        assert_eq!(validate_register(&stop), None);
    }
}
