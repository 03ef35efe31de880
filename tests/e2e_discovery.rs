mod common;

use serde_json::json;

use advisor_chat::tools::{RegistryError, RegistryState, builtin};
use advisor_chat::{ToolContext, ToolPayload, ToolRegistry, tool_catalog};
use common::{conflicting_catalog, fixture_catalog};

#[test]
fn test_discovery_registers_valid_units_and_reports_broken_ones() {
    let registry = ToolRegistry::discovered(&fixture_catalog(), &ToolContext::new())
        .expect("discovery should succeed");

    assert_eq!(registry.state(), RegistryState::Populated);
    assert_eq!(registry.names(), vec!["letter_counter", "debt_payoff"]);
    assert!(registry.get("broken_tool").is_none());

    let report = registry.last_report().expect("discovery leaves a report");
    assert!(!report.is_clean());
    assert_eq!(report.failures.len(), 1);
    assert_eq!(report.failures[0].unit, "broken_tool");
    assert!(report.failures[0].error.contains("failed to initialize"));
}

#[test]
fn test_discovery_name_conflict_is_fatal() {
    let err = ToolRegistry::discovered(&conflicting_catalog(), &ToolContext::new())
        .err()
        .expect("duplicate names must fail discovery");
    assert_eq!(err, RegistryError::NameConflict("letter_counter".to_string()));
}

#[test]
fn test_disabled_and_private_units_are_skipped() {
    fn load_counter(
        _ctx: &ToolContext,
    ) -> anyhow::Result<Vec<Box<dyn advisor_chat::Tool>>> {
        Ok(vec![Box::new(builtin::LetterCounterTool)])
    }
    let catalog = tool_catalog![
        "_scratch" => load_counter,
        "base" => load_counter,
        "letter_counter" => load_counter,
    ];

    let registry = ToolRegistry::discovered(&catalog, &ToolContext::new().disable("letter_counter"))
        .expect("discovery should succeed");

    assert!(registry.is_empty());
    let report = registry.last_report().expect("report");
    assert!(report.is_clean());
    assert_eq!(report.skipped.len(), 3);
}

#[test]
fn test_builtin_catalog_without_database_still_loads_calculators() {
    let registry = ToolRegistry::discovered(&builtin::catalog(), &ToolContext::new())
        .expect("discovery should succeed");

    assert!(registry.get("debt_payoff").is_some());
    assert!(registry.get("rent_vs_buy").is_some());
    assert!(registry.get("chart_builder").is_some());
    assert!(registry.get("customer_query").is_none());

    let report = registry.last_report().expect("report");
    assert_eq!(report.failures.len(), 1);
    assert_eq!(report.failures[0].unit, "customer_query");
}

#[tokio::test]
async fn test_discovered_tool_runs_through_runtime_adapter() {
    let registry = ToolRegistry::discovered(&fixture_catalog(), &ToolContext::new())
        .expect("discovery should succeed");
    let tools = registry.export_for_runtime();
    let counter = tools
        .iter()
        .find(|t| t.name() == "letter_counter")
        .expect("letter_counter exported");

    let output = counter.invoke(json!({ "text": "Hello" })).await;
    assert!(output.success);
    let Some(ToolPayload::Calculation(details)) = output.payload else {
        panic!("expected a calculation payload");
    };
    assert_eq!(details.result["letters"], 5);

    let failed = counter.invoke(json!({})).await;
    assert!(!failed.success);
    assert_eq!(failed.error_type.as_deref(), Some("invalid_arguments"));
}
