use anyhow::Result;
use async_trait::async_trait;
use serde::Deserialize;
use serde_json::{Value, json};

use crate::tools::{ChartDataset, ChartSpec, ChartType, Tool, ToolContext, ToolError, ToolPayload};

pub(super) fn load(_ctx: &ToolContext) -> Result<Vec<Box<dyn Tool>>> {
    Ok(vec![Box::new(ChartBuilderTool)])
}

/// Turns labelled series into a chart the client can render
pub struct ChartBuilderTool;

#[derive(Debug, Deserialize)]
struct ChartArgs {
    chart_type: ChartType,
    title: String,
    labels: Vec<String>,
    datasets: Vec<ChartDataset>,
}

fn build(args: ChartArgs) -> Result<ChartSpec, ToolError> {
    if args.labels.is_empty() {
        return Err(ToolError::InvalidArguments("labels cannot be empty".into()));
    }
    if args.datasets.is_empty() {
        return Err(ToolError::InvalidArguments(
            "at least one dataset is required".into(),
        ));
    }
    if args.chart_type == ChartType::Pie && args.datasets.len() > 1 {
        return Err(ToolError::InvalidArguments(
            "a pie chart takes exactly one dataset".into(),
        ));
    }
    for dataset in &args.datasets {
        if dataset.values.len() != args.labels.len() {
            return Err(ToolError::InvalidArguments(format!(
                "dataset '{}' has {} values for {} labels",
                dataset.label,
                dataset.values.len(),
                args.labels.len()
            )));
        }
        if dataset.values.iter().any(|v| !v.is_finite()) {
            return Err(ToolError::InvalidArguments(format!(
                "dataset '{}' contains a non-finite value",
                dataset.label
            )));
        }
    }

    Ok(ChartSpec {
        chart_type: args.chart_type,
        title: args.title,
        labels: args.labels,
        datasets: args.datasets,
    })
}

#[async_trait]
impl Tool for ChartBuilderTool {
    fn name(&self) -> &str {
        "chart_builder"
    }

    fn description(&self) -> &str {
        "Build a chart from labelled numeric series so the user sees it rendered. \
         Parameters: chart_type (bar, line or pie), title, labels (list of strings), \
         datasets (list of {label, values}); every dataset needs one value per label, \
         and a pie chart takes a single dataset."
    }

    fn schema(&self) -> Value {
        json!({
            "type": "object",
            "properties": {
                "chart_type": {"type": "string", "enum": ["bar", "line", "pie"]},
                "title": {"type": "string"},
                "labels": {"type": "array", "items": {"type": "string"}},
                "datasets": {
                    "type": "array",
                    "items": {
                        "type": "object",
                        "properties": {
                            "label": {"type": "string"},
                            "values": {"type": "array", "items": {"type": "number"}}
                        },
                        "required": ["label", "values"]
                    }
                }
            },
            "required": ["chart_type", "title", "labels", "datasets"]
        })
    }

    async fn execute(&self, args: Value) -> Result<ToolPayload, ToolError> {
        let args: ChartArgs =
            serde_json::from_value(args).map_err(|e| ToolError::InvalidArguments(e.to_string()))?;
        Ok(ToolPayload::Chart(build(args)?))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn builds_bar_chart() {
        let payload = ChartBuilderTool
            .execute(json!({
                "chart_type": "bar",
                "title": "Monthly spending",
                "labels": ["Rent", "Food"],
                "datasets": [{"label": "March", "values": [1800.0, 450.5]}]
            }))
            .await
            .unwrap();

        let ToolPayload::Chart(spec) = payload else {
            panic!("expected chart payload");
        };
        assert_eq!(spec.chart_type, ChartType::Bar);
        assert_eq!(spec.labels.len(), 2);
    }

    #[tokio::test]
    async fn mismatched_lengths_are_rejected() {
        let err = ChartBuilderTool
            .execute(json!({
                "chart_type": "line",
                "title": "Balance",
                "labels": ["Jan", "Feb", "Mar"],
                "datasets": [{"label": "Card", "values": [1.0, 2.0]}]
            }))
            .await
            .unwrap_err();
        assert!(err.to_string().contains("2 values for 3 labels"));
    }

    #[tokio::test]
    async fn pie_with_two_datasets_is_rejected() {
        let err = ChartBuilderTool
            .execute(json!({
                "chart_type": "pie",
                "title": "Split",
                "labels": ["A"],
                "datasets": [
                    {"label": "x", "values": [1.0]},
                    {"label": "y", "values": [2.0]}
                ]
            }))
            .await
            .unwrap_err();
        assert_eq!(err.kind(), "invalid_arguments");
    }

    #[tokio::test]
    async fn unknown_chart_type_is_rejected() {
        let err = ChartBuilderTool
            .execute(json!({"chart_type": "radar", "title": "t", "labels": [], "datasets": []}))
            .await
            .unwrap_err();
        assert_eq!(err.kind(), "invalid_arguments");
    }
}
