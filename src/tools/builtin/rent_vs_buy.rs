use anyhow::Result;
use async_trait::async_trait;
use serde_json::{Value, json};

use super::cents;
use crate::tools::{
    CalculationDetails, CalculationStep, Tool, ToolContext, ToolError, ToolPayload, optional_f64,
    require_f64,
};

const DEFAULT_RENT_INCREASE: f64 = 3.0;
const DEFAULT_APPRECIATION: f64 = 3.0;
const DEFAULT_LOAN_TERM_YEARS: f64 = 30.0;
/// Property tax plus maintenance, percent of purchase price per year
const DEFAULT_OWNERSHIP_COST_RATE: f64 = 2.0;

pub(super) fn load(_ctx: &ToolContext) -> Result<Vec<Box<dyn Tool>>> {
    Ok(vec![Box::new(RentVsBuyTool)])
}

/// Compares renting against buying over a holding period
pub struct RentVsBuyTool;

#[derive(Debug, Clone, Copy)]
struct Inputs {
    monthly_rent: f64,
    home_price: f64,
    down_payment_percent: f64,
    mortgage_rate: f64,
    years: u32,
    rent_increase: f64,
    appreciation: f64,
    loan_term_years: f64,
    ownership_cost_rate: f64,
}

#[derive(Debug)]
struct Comparison {
    total_rent: f64,
    down_payment: f64,
    loan_amount: f64,
    monthly_mortgage: f64,
    mortgage_paid: f64,
    remaining_balance: f64,
    ownership_costs: f64,
    home_value: f64,
    equity: f64,
    net_cost_of_buying: f64,
}

impl Inputs {
    fn parse(args: &Value) -> Result<Self, ToolError> {
        let inputs = Self {
            monthly_rent: require_f64(args, "monthly_rent")?,
            home_price: require_f64(args, "home_price")?,
            down_payment_percent: require_f64(args, "down_payment_percent")?,
            mortgage_rate: require_f64(args, "mortgage_rate")?,
            years: {
                let years = require_f64(args, "years")?;
                if !(1.0..=50.0).contains(&years) {
                    return Err(ToolError::InvalidArguments(
                        "years must be between 1 and 50".into(),
                    ));
                }
                years.round() as u32
            },
            rent_increase: optional_f64(args, "annual_rent_increase", DEFAULT_RENT_INCREASE)?,
            appreciation: optional_f64(args, "annual_appreciation", DEFAULT_APPRECIATION)?,
            loan_term_years: optional_f64(args, "loan_term_years", DEFAULT_LOAN_TERM_YEARS)?,
            ownership_cost_rate: optional_f64(
                args,
                "ownership_cost_rate",
                DEFAULT_OWNERSHIP_COST_RATE,
            )?,
        };

        if inputs.monthly_rent <= 0.0 || inputs.home_price <= 0.0 {
            return Err(ToolError::InvalidArguments(
                "monthly_rent and home_price must be greater than zero".into(),
            ));
        }
        if !(0.0..=100.0).contains(&inputs.down_payment_percent) {
            return Err(ToolError::InvalidArguments(
                "down_payment_percent must be between 0 and 100".into(),
            ));
        }
        if inputs.mortgage_rate < 0.0 || inputs.loan_term_years < 1.0 {
            return Err(ToolError::InvalidArguments(
                "mortgage_rate cannot be negative and loan_term_years must be at least 1".into(),
            ));
        }
        Ok(inputs)
    }

    fn compare(&self) -> Comparison {
        let total_rent: f64 = (0..self.years)
            .map(|year| {
                self.monthly_rent * 12.0 * (1.0 + self.rent_increase / 100.0).powi(year as i32)
            })
            .sum();

        let down_payment = self.home_price * self.down_payment_percent / 100.0;
        let loan_amount = self.home_price - down_payment;
        let i = self.mortgage_rate / 100.0 / 12.0;
        let term_months = (self.loan_term_years * 12.0).round();
        let held_months = (self.years as f64 * 12.0).min(term_months);

        let (monthly_mortgage, remaining_balance) = if i == 0.0 {
            let payment = loan_amount / term_months;
            (payment, loan_amount - payment * held_months)
        } else {
            let payment = loan_amount * i / (1.0 - (1.0 + i).powf(-term_months));
            let growth = (1.0 + i).powf(held_months);
            (
                payment,
                loan_amount * growth - payment * (growth - 1.0) / i,
            )
        };
        let remaining_balance = remaining_balance.max(0.0);

        let mortgage_paid = monthly_mortgage * held_months;
        let ownership_costs =
            self.home_price * self.ownership_cost_rate / 100.0 * self.years as f64;
        let home_value =
            self.home_price * (1.0 + self.appreciation / 100.0).powi(self.years as i32);
        let equity = home_value - remaining_balance;
        let net_cost_of_buying = down_payment + mortgage_paid + ownership_costs - equity;

        Comparison {
            total_rent,
            down_payment,
            loan_amount,
            monthly_mortgage,
            mortgage_paid,
            remaining_balance,
            ownership_costs,
            home_value,
            equity,
            net_cost_of_buying,
        }
    }
}

#[async_trait]
impl Tool for RentVsBuyTool {
    fn name(&self) -> &str {
        "rent_vs_buy"
    }

    fn description(&self) -> &str {
        "Compare the cost of renting versus buying a home over a number of years. \
         Parameters: monthly_rent, home_price, down_payment_percent (e.g. 20), \
         mortgage_rate (annual percent), years (holding period), and optionally \
         annual_rent_increase (percent, default 3), annual_appreciation (percent, default 3), \
         loan_term_years (default 30), ownership_cost_rate (tax and maintenance, percent of \
         price per year, default 2). Returns total rent, the net cost of buying after equity, \
         and a recommendation."
    }

    fn schema(&self) -> Value {
        json!({
            "type": "object",
            "properties": {
                "monthly_rent": {"type": "number"},
                "home_price": {"type": "number"},
                "down_payment_percent": {"type": "number"},
                "mortgage_rate": {"type": "number", "description": "Annual rate in percent"},
                "years": {"type": "number", "description": "How long the home would be kept"},
                "annual_rent_increase": {"type": "number"},
                "annual_appreciation": {"type": "number"},
                "loan_term_years": {"type": "number"},
                "ownership_cost_rate": {"type": "number"}
            },
            "required": ["monthly_rent", "home_price", "down_payment_percent", "mortgage_rate", "years"]
        })
    }

    async fn execute(&self, args: Value) -> Result<ToolPayload, ToolError> {
        let inputs = Inputs::parse(&args)?;
        let c = inputs.compare();

        let recommendation = if c.net_cost_of_buying < c.total_rent {
            "buy"
        } else {
            "rent"
        };

        Ok(ToolPayload::Calculation(CalculationDetails {
            calculation: "rent_vs_buy".to_string(),
            inputs: args,
            steps: vec![
                CalculationStep::new("total_rent", cents(c.total_rent))
                    .with_formula("sum of monthly_rent * 12 * (1 + rent_increase)^year"),
                CalculationStep::new("down_payment", cents(c.down_payment)),
                CalculationStep::new("loan_amount", cents(c.loan_amount)),
                CalculationStep::new("monthly_mortgage", cents(c.monthly_mortgage))
                    .with_formula("L * i / (1 - (1 + i)^-n)"),
                CalculationStep::new("mortgage_paid", cents(c.mortgage_paid)),
                CalculationStep::new("ownership_costs", cents(c.ownership_costs)),
                CalculationStep::new("home_value", cents(c.home_value))
                    .with_formula("home_price * (1 + appreciation)^years"),
                CalculationStep::new("remaining_balance", cents(c.remaining_balance)),
                CalculationStep::new("equity", cents(c.equity))
                    .with_formula("home_value - remaining_balance"),
                CalculationStep::new("net_cost_of_buying", cents(c.net_cost_of_buying))
                    .with_formula("down_payment + mortgage_paid + ownership_costs - equity"),
            ],
            result: json!({
                "recommendation": recommendation,
                "total_rent": cents(c.total_rent),
                "net_cost_of_buying": cents(c.net_cost_of_buying),
                "difference": cents((c.total_rent - c.net_cost_of_buying).abs()),
                "years": inputs.years,
            }),
        }))
    }
}
