use anyhow::Result;
use async_trait::async_trait;
use serde_json::{Value, json};

use super::cents;
use crate::tools::{
    CalculationDetails, CalculationStep, Tool, ToolContext, ToolError, ToolPayload, require_f64,
};

/// Fifty years of monthly payments
const MAX_MONTHS: u32 = 600;

pub(super) fn load(_ctx: &ToolContext) -> Result<Vec<Box<dyn Tool>>> {
    Ok(vec![Box::new(DebtPayoffTool)])
}

/// Amortization of a single debt under a fixed monthly payment
pub struct DebtPayoffTool;

#[async_trait]
impl Tool for DebtPayoffTool {
    fn name(&self) -> &str {
        "debt_payoff"
    }

    fn description(&self) -> &str {
        "Calculate how long it takes to pay off a debt with a fixed monthly payment. \
         Parameters: balance (current amount owed), annual_rate (APR in percent, e.g. 18.5), \
         monthly_payment. Returns months to payoff, total interest and total paid, \
         with the intermediate steps."
    }

    fn schema(&self) -> Value {
        json!({
            "type": "object",
            "properties": {
                "balance": {"type": "number", "description": "Current amount owed"},
                "annual_rate": {"type": "number", "description": "Annual interest rate in percent"},
                "monthly_payment": {"type": "number", "description": "Fixed payment made each month"}
            },
            "required": ["balance", "annual_rate", "monthly_payment"]
        })
    }

    async fn execute(&self, args: Value) -> Result<ToolPayload, ToolError> {
        let balance = require_f64(&args, "balance")?;
        let annual_rate = require_f64(&args, "annual_rate")?;
        let payment = require_f64(&args, "monthly_payment")?;

        if balance <= 0.0 {
            return Err(ToolError::InvalidArguments(
                "balance must be greater than zero".into(),
            ));
        }
        if payment <= 0.0 {
            return Err(ToolError::InvalidArguments(
                "monthly_payment must be greater than zero".into(),
            ));
        }
        if annual_rate < 0.0 {
            return Err(ToolError::InvalidArguments(
                "annual_rate cannot be negative".into(),
            ));
        }

        let schedule = amortize(balance, annual_rate, payment)?;

        Ok(ToolPayload::Calculation(CalculationDetails {
            calculation: "debt_payoff".to_string(),
            inputs: json!({
                "balance": balance,
                "annual_rate": annual_rate,
                "monthly_payment": payment,
            }),
            steps: vec![
                CalculationStep::new("monthly_rate", schedule.monthly_rate)
                    .with_formula("annual_rate / 100 / 12"),
                CalculationStep::new("first_month_interest", cents(balance * schedule.monthly_rate))
                    .with_formula("balance * monthly_rate"),
                CalculationStep::new("months_to_payoff", schedule.months),
                CalculationStep::new("total_interest", cents(schedule.total_interest)),
                CalculationStep::new("total_paid", cents(schedule.total_paid))
                    .with_formula("balance + total_interest"),
            ],
            result: json!({
                "months_to_payoff": schedule.months,
                "years_to_payoff": cents(schedule.months as f64 / 12.0),
                "total_interest": cents(schedule.total_interest),
                "total_paid": cents(schedule.total_paid),
                "final_payment": cents(schedule.final_payment),
            }),
        }))
    }
}

#[derive(Debug)]
struct Schedule {
    monthly_rate: f64,
    months: u32,
    total_interest: f64,
    total_paid: f64,
    final_payment: f64,
}

fn amortize(balance: f64, annual_rate: f64, payment: f64) -> Result<Schedule, ToolError> {
    let monthly_rate = annual_rate / 100.0 / 12.0;
    let first_interest = balance * monthly_rate;
    if payment <= first_interest {
        return Err(ToolError::Calculation(format!(
            "a monthly payment of {:.2} does not cover the first month's interest of {:.2}",
            payment, first_interest
        )));
    }

    let mut remaining = balance;
    let mut months = 0;
    let mut total_interest = 0.0;
    let mut total_paid = 0.0;
    let mut final_payment = 0.0;

    while remaining > 0.005 {
        if months >= MAX_MONTHS {
            return Err(ToolError::Calculation(format!(
                "debt is not paid off within {} months",
                MAX_MONTHS
            )));
        }
        let interest = remaining * monthly_rate;
        remaining += interest;
        let paid = payment.min(remaining);
        remaining -= paid;

        total_interest += interest;
        total_paid += paid;
        final_payment = paid;
        months += 1;
    }

    Ok(Schedule {
        monthly_rate,
        months,
        total_interest,
        total_paid,
        final_payment,
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn zero_interest_is_simple_division() {
        let schedule = amortize(1000.0, 0.0, 250.0).unwrap();
        assert_eq!(schedule.months, 4);
        assert_eq!(schedule.total_interest, 0.0);
        assert!((schedule.total_paid - 1000.0).abs() < 1e-9);
    }

    #[test]
    fn credit_card_payoff() {
        // 5,000 at 18% APR paying 200/month: 32 payments
        let schedule = amortize(5000.0, 18.0, 200.0).unwrap();
        assert_eq!(schedule.months, 32);
        assert!(schedule.total_interest > 1300.0 && schedule.total_interest < 1400.0);
        assert!(schedule.final_payment <= 200.0);
    }

    #[test]
    fn payment_below_interest_fails() {
        let err = amortize(10_000.0, 24.0, 150.0).unwrap_err();
        assert_eq!(err.kind(), "calculation");
    }

    #[tokio::test]
    async fn rejects_non_positive_balance() {
        let err = DebtPayoffTool
            .execute(json!({"balance": 0, "annual_rate": 5, "monthly_payment": 100}))
            .await
            .unwrap_err();
        assert_eq!(err.kind(), "invalid_arguments");
    }
}
