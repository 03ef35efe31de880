use serde::{Deserialize, Serialize};

use crate::tools::ToolContext;

/// Which tool units discovery should load
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ToolPolicy {
    /// Catalog unit names to skip
    #[serde(default)]
    pub disabled: Vec<String>,
}

impl ToolPolicy {
    pub fn is_disabled(&self, unit: &str) -> bool {
        self.disabled.iter().any(|d| d == unit)
    }

    /// Apply this policy to a discovery context
    pub fn apply(&self, ctx: ToolContext) -> ToolContext {
        self.disabled
            .iter()
            .fold(ctx, |ctx, unit| ctx.disable(unit.as_str()))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parses_disabled_units() {
        let policy: ToolPolicy = toml::from_str(r#"disabled = ["chart_builder"]"#).unwrap();
        assert!(policy.is_disabled("chart_builder"));
        assert!(!policy.is_disabled("debt_payoff"));
    }

    #[test]
    fn applies_to_context() {
        let policy = ToolPolicy {
            disabled: vec!["customer_query".into()],
        };
        let ctx = policy.apply(ToolContext::new());
        assert!(ctx.disabled_units.contains("customer_query"));
    }
}
