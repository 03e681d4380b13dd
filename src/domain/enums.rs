//! Closed enums mirroring the substrate's constrained value sets.
//!
//! Each enum round-trips through its wire string (`as_str` / `FromStr`);
//! parsing an unknown value is a substrate-shape failure, not a panic.

use std::fmt;
use std::str::FromStr;

use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};

use crate::error::CoreError;

macro_rules! wire_enum {
    ($(#[$meta:meta])* $name:ident { $($variant:ident => $wire:literal),+ $(,)? }) => {
        $(#[$meta])*
        #[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
        pub enum $name {
            $(#[serde(rename = $wire)] $variant),+
        }

        impl $name {
            pub const fn as_str(&self) -> &'static str {
                match self {
                    $(Self::$variant => $wire),+
                }
            }
        }

        impl fmt::Display for $name {
            fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
                f.write_str(self.as_str())
            }
        }

        impl FromStr for $name {
            type Err = CoreError;

            fn from_str(value: &str) -> Result<Self, Self::Err> {
                match value {
                    $($wire => Ok(Self::$variant),)+
                    other => Err(CoreError::InvariantViolation(format!(
                        concat!("invalid ", stringify!($name), " value {:?}"),
                        other
                    ))),
                }
            }
        }
    };
}

wire_enum! {
    /// Execution environment for a run.
    RunMode {
        Backtest => "BACKTEST",
        Paper => "PAPER",
        Live => "LIVE",
    }
}

wire_enum! {
    /// Prediction and signal horizon.
    Horizon {
        H1 => "H1",
        H4 => "H4",
        H24 => "H24",
    }
}

wire_enum! {
    /// Role of a model in the ensemble.
    ModelRole {
        BaseTree => "BASE_TREE",
        BaseDeep => "BASE_DEEP",
        Regime => "REGIME",
        Meta => "META",
    }
}

wire_enum! {
    /// Trading signal action.
    SignalAction {
        Enter => "ENTER",
        Hold => "HOLD",
        Exit => "EXIT",
    }
}

wire_enum! {
    /// Signal direction; LONG only for entries.
    Direction {
        Long => "LONG",
        Flat => "FLAT",
    }
}

wire_enum! {
    /// Order side.
    OrderSide {
        Buy => "BUY",
        Sell => "SELL",
    }
}

wire_enum! {
    /// Order type.
    OrderType {
        Limit => "LIMIT",
        Market => "MARKET",
    }
}

wire_enum! {
    /// Time-in-force policy.
    TimeInForce {
        Gtc => "GTC",
        Ioc => "IOC",
        Fok => "FOK",
    }
}

wire_enum! {
    /// Order lifecycle status.
    OrderStatus {
        New => "NEW",
        Ack => "ACK",
        Partial => "PARTIAL",
        Filled => "FILLED",
        Cancelled => "CANCELLED",
        Rejected => "REJECTED",
    }
}

wire_enum! {
    /// Discrete drawdown classification.
    DrawdownTier {
        Normal => "NORMAL",
        Dd10 => "DD10",
        Dd15 => "DD15",
        Halt20 => "HALT20",
    }
}

wire_enum! {
    /// Fill liquidity classification.
    LiquidityFlag {
        Maker => "MAKER",
        Taker => "TAKER",
        Unknown => "UNKNOWN",
    }
}

wire_enum! {
    /// Deterministic fill price provenance.
    PriceSource {
        OrderBook => "ORDER_BOOK",
        OhlcvClose => "OHLCV_CLOSE",
        Unavailable => "UNAVAILABLE",
    }
}

wire_enum! {
    /// Risk-runtime state machine mode.
    RiskStateMode {
        Normal => "NORMAL",
        EntryHalt => "ENTRY_HALT",
        KillSwitchLockdown => "KILL_SWITCH_LOCKDOWN",
        SevereLossRecovery => "SEVERE_LOSS_RECOVERY",
    }
}

wire_enum! {
    /// Exposure-cap accounting mode.
    ExposureMode {
        PercentOfPv => "PERCENT_OF_PV",
        AbsoluteAmount => "ABSOLUTE_AMOUNT",
    }
}

wire_enum! {
    /// Model activation lifecycle status.
    ActivationStatus {
        Pending => "PENDING",
        Approved => "APPROVED",
        Revoked => "REVOKED",
    }
}

wire_enum! {
    /// Risk event category.
    RiskEventType {
        RiskGate => "RISK_GATE",
        CapitalRule => "CAPITAL_RULE",
        ClusterCap => "CLUSTER_CAP",
        ActivationGate => "ACTIVATION_GATE",
        OrderLifecycle => "ORDER_LIFECYCLE",
        DecisionTrace => "DECISION_TRACE",
    }
}

wire_enum! {
    /// Risk event severity.
    Severity {
        Low => "LOW",
        Medium => "MEDIUM",
        High => "HIGH",
        Critical => "CRITICAL",
    }
}

impl DrawdownTier {
    /// The unique tier for a drawdown fraction: [0,0.10) NORMAL,
    /// [0.10,0.15) DD10, [0.15,0.20) DD15, [0.20,1] HALT20.
    pub fn from_drawdown_pct(drawdown_pct: Decimal) -> Self {
        let dd10 = Decimal::new(10, 2);
        let dd15 = Decimal::new(15, 2);
        let halt = Decimal::new(20, 2);
        if drawdown_pct < dd10 {
            DrawdownTier::Normal
        } else if drawdown_pct < dd15 {
            DrawdownTier::Dd10
        } else if drawdown_pct < halt {
            DrawdownTier::Dd15
        } else {
            DrawdownTier::Halt20
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use rust_decimal_macros::dec;

    #[test]
    fn wire_round_trips() {
        assert_eq!(RunMode::from_str("BACKTEST").unwrap(), RunMode::Backtest);
        assert_eq!(RunMode::Live.as_str(), "LIVE");
        assert_eq!(Horizon::from_str("H24").unwrap(), Horizon::H24);
        assert_eq!(ModelRole::from_str("BASE_DEEP").unwrap(), ModelRole::BaseDeep);
        assert_eq!(PriceSource::OhlcvClose.as_str(), "OHLCV_CLOSE");
        assert_eq!(
            RiskStateMode::from_str("KILL_SWITCH_LOCKDOWN").unwrap(),
            RiskStateMode::KillSwitchLockdown
        );
        assert_eq!(ExposureMode::PercentOfPv.as_str(), "PERCENT_OF_PV");
        assert!(RunMode::from_str("SHADOW").is_err());
    }

    #[test]
    fn drawdown_tier_boundaries() {
        assert_eq!(DrawdownTier::from_drawdown_pct(dec!(0)), DrawdownTier::Normal);
        assert_eq!(
            DrawdownTier::from_drawdown_pct(dec!(0.099999)),
            DrawdownTier::Normal
        );
        assert_eq!(DrawdownTier::from_drawdown_pct(dec!(0.10)), DrawdownTier::Dd10);
        assert_eq!(DrawdownTier::from_drawdown_pct(dec!(0.15)), DrawdownTier::Dd15);
        assert_eq!(DrawdownTier::from_drawdown_pct(dec!(0.20)), DrawdownTier::Halt20);
        assert_eq!(DrawdownTier::from_drawdown_pct(dec!(1)), DrawdownTier::Halt20);
    }
}
