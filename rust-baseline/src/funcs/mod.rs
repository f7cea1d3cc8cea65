pub mod backtest;

pub use backtest::*;
