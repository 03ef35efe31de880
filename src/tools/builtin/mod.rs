//! Financial tools shipped with the service.
//!
//! Each module is one tool unit. Adding a tool means adding a module with a
//! `load` function and one line to [`catalog`].

mod chart_builder;
mod customer_query;
mod debt_payoff;
mod letter_counter;
mod rent_vs_buy;

pub use chart_builder::ChartBuilderTool;
pub use customer_query::CustomerQueryTool;
pub use debt_payoff::DebtPayoffTool;
pub use letter_counter::LetterCounterTool;
pub use rent_vs_buy::RentVsBuyTool;

use super::ToolCatalog;

/// Catalog of the built-in tool units
pub fn catalog() -> ToolCatalog {
    crate::tool_catalog![
        "letter_counter" => letter_counter::load,
        "debt_payoff" => debt_payoff::load,
        "rent_vs_buy" => rent_vs_buy::load,
        "customer_query" => customer_query::load,
        "chart_builder" => chart_builder::load,
    ]
}

/// Round to cents for presentation
pub(crate) fn cents(value: f64) -> f64 {
    (value * 100.0).round() / 100.0
}
