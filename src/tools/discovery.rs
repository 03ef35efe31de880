use std::collections::HashSet;
use std::fmt;
use std::panic::{self, AssertUnwindSafe};
use std::path::PathBuf;

use anyhow::Result;
use tracing::{debug, warn};

use super::{RegistryError, Tool};

/// Unit names that never provide tools (the contract and the registry itself).
pub const RESERVED_UNITS: &[&str] = &["base", "registry"];

/// Loader for one unit: constructs the tools that unit defines.
pub type UnitLoader = fn(&ToolContext) -> Result<Vec<Box<dyn Tool>>>;

/// One entry of a [`ToolCatalog`]
#[derive(Clone, Copy)]
pub struct ToolUnit {
    pub name: &'static str,
    pub load: UnitLoader,
}

impl ToolUnit {
    pub const fn new(name: &'static str, load: UnitLoader) -> Self {
        Self { name, load }
    }

    fn skip_reason(&self, ctx: &ToolContext) -> Option<&'static str> {
        if self.name.starts_with('_') {
            Some("private unit")
        } else if RESERVED_UNITS.contains(&self.name) {
            Some("reserved unit")
        } else if ctx.disabled_units.contains(self.name) {
            Some("disabled by configuration")
        } else {
            None
        }
    }
}

impl fmt::Debug for ToolUnit {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ToolUnit").field("name", &self.name).finish()
    }
}

/// Compile-time list of tool units, scanned by discovery in order.
///
/// Build one with [`tool_catalog!`](crate::tool_catalog).
#[derive(Debug, Clone, Default)]
pub struct ToolCatalog {
    units: Vec<ToolUnit>,
}

impl ToolCatalog {
    pub fn new(units: Vec<ToolUnit>) -> Self {
        Self { units }
    }

    /// Append another catalog's units after this one's
    pub fn extend(mut self, other: ToolCatalog) -> Self {
        self.units.extend(other.units);
        self
    }

    pub fn units(&self) -> &[ToolUnit] {
        &self.units
    }

    pub fn len(&self) -> usize {
        self.units.len()
    }

    pub fn is_empty(&self) -> bool {
        self.units.is_empty()
    }
}

/// Declare a [`ToolCatalog`](crate::tools::ToolCatalog) from `"unit" => loader` pairs.
#[macro_export]
macro_rules! tool_catalog {
    ($($name:literal => $load:expr),* $(,)?) => {
        $crate::tools::ToolCatalog::new(vec![
            $($crate::tools::ToolUnit::new($name, $load)),*
        ])
    };
}

/// What loaders may use to construct their tools
#[derive(Debug, Clone, Default)]
pub struct ToolContext {
    /// SQLite database holding customer records
    pub database_path: Option<PathBuf>,
    /// Units to leave out of discovery
    pub disabled_units: HashSet<String>,
}

impl ToolContext {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_database(mut self, path: impl Into<PathBuf>) -> Self {
        self.database_path = Some(path.into());
        self
    }

    pub fn disable(mut self, unit: impl Into<String>) -> Self {
        self.disabled_units.insert(unit.into());
        self
    }
}

/// A unit that could not be loaded
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DiscoveryFailure {
    pub unit: String,
    pub error: String,
}

/// Outcome of a discovery pass
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct DiscoveryReport {
    /// Registered tool names, in registration order
    pub registered: Vec<String>,
    pub failures: Vec<DiscoveryFailure>,
    /// Unit names left out, with the reason
    pub skipped: Vec<(String, String)>,
}

impl DiscoveryReport {
    pub fn is_clean(&self) -> bool {
        self.failures.is_empty()
    }
}

impl fmt::Display for DiscoveryReport {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        writeln!(
            f,
            "{} tool(s) registered, {} unit(s) failed, {} skipped",
            self.registered.len(),
            self.failures.len(),
            self.skipped.len()
        )?;
        for name in &self.registered {
            writeln!(f, "  ok      {}", name)?;
        }
        for failure in &self.failures {
            writeln!(f, "  failed  {}: {}", failure.unit, failure.error)?;
        }
        for (unit, reason) in &self.skipped {
            writeln!(f, "  skipped {} ({})", unit, reason)?;
        }
        Ok(())
    }
}

/// Walk the catalog, isolating per-unit failures.
///
/// `register` is called once per constructed tool. A nameless tool counts
/// against its unit; a name conflict aborts the pass.
pub(crate) fn run_discovery<F>(
    catalog: &ToolCatalog,
    ctx: &ToolContext,
    mut register: F,
) -> Result<DiscoveryReport, RegistryError>
where
    F: FnMut(Box<dyn Tool>) -> Result<(), RegistryError>,
{
    let mut report = DiscoveryReport::default();

    for unit in catalog.units() {
        if let Some(reason) = unit.skip_reason(ctx) {
            debug!(unit = unit.name, reason, "skipping tool unit");
            report
                .skipped
                .push((unit.name.to_string(), reason.to_string()));
            continue;
        }

        let tools = match load_unit(unit, ctx) {
            Ok(tools) => tools,
            Err(error) => {
                warn!(unit = unit.name, error = %error, "failed to load tool unit");
                report.failures.push(DiscoveryFailure {
                    unit: unit.name.to_string(),
                    error,
                });
                continue;
            }
        };

        if tools.is_empty() {
            debug!(unit = unit.name, "tool unit defines no tools");
        }

        for tool in tools {
            let name = tool.name().to_string();
            match register(tool) {
                Ok(()) => report.registered.push(name),
                Err(RegistryError::EmptyName) => {
                    warn!(unit = unit.name, "tool unit defines a tool with an empty name");
                    report.failures.push(DiscoveryFailure {
                        unit: unit.name.to_string(),
                        error: RegistryError::EmptyName.to_string(),
                    });
                }
                Err(conflict) => return Err(conflict),
            }
        }
    }

    Ok(report)
}

fn load_unit(unit: &ToolUnit, ctx: &ToolContext) -> Result<Vec<Box<dyn Tool>>, String> {
    match panic::catch_unwind(AssertUnwindSafe(|| (unit.load)(ctx))) {
        Ok(Ok(tools)) => Ok(tools),
        Ok(Err(e)) => Err(format!("{:#}", e)),
        Err(panic) => Err(format!("loader panicked: {}", panic_message(panic.as_ref()))),
    }
}

pub(crate) fn panic_message(panic: &(dyn std::any::Any + Send)) -> String {
    if let Some(s) = panic.downcast_ref::<&str>() {
        (*s).to_string()
    } else if let Some(s) = panic.downcast_ref::<String>() {
        s.clone()
    } else {
        "unknown panic".to_string()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::tools::{ToolError, ToolPayload, ToolRegistry};
    use async_trait::async_trait;
    use serde_json::{Value, json};

    struct Echo(&'static str);

    #[async_trait]
    impl Tool for Echo {
        fn name(&self) -> &str {
            self.0
        }

        fn description(&self) -> &str {
            "echo"
        }

        fn schema(&self) -> Value {
            json!({"type": "object"})
        }

        async fn execute(&self, args: Value) -> Result<ToolPayload, ToolError> {
            Ok(ToolPayload::Generic { data: args })
        }
    }

    fn load_alpha(_: &ToolContext) -> Result<Vec<Box<dyn Tool>>> {
        Ok(vec![Box::new(Echo("alpha"))])
    }

    fn load_beta(_: &ToolContext) -> Result<Vec<Box<dyn Tool>>> {
        Ok(vec![Box::new(Echo("beta"))])
    }

    fn load_broken(_: &ToolContext) -> Result<Vec<Box<dyn Tool>>> {
        anyhow::bail!("missing dependency")
    }

    fn load_panicking(_: &ToolContext) -> Result<Vec<Box<dyn Tool>>> {
        panic!("constructor exploded")
    }

    #[test]
    fn failures_are_isolated_in_any_order() {
        let orders = [
            crate::tool_catalog!["alpha" => load_alpha, "broken" => load_broken, "beta" => load_beta],
            crate::tool_catalog!["broken" => load_broken, "beta" => load_beta, "alpha" => load_alpha],
            crate::tool_catalog!["beta" => load_beta, "alpha" => load_alpha, "broken" => load_broken],
        ];

        for catalog in &orders {
            let mut registry = ToolRegistry::new();
            let report = registry.discover(catalog, &ToolContext::new()).unwrap();
            assert_eq!(report.registered.len(), 2);
            assert_eq!(report.failures.len(), 1);
            assert_eq!(report.failures[0].unit, "broken");
            assert!(report.failures[0].error.contains("missing dependency"));
        }
    }

    #[test]
    fn panicking_loader_is_a_failure() {
        let catalog = crate::tool_catalog!["alpha" => load_alpha, "kaboom" => load_panicking];
        let mut registry = ToolRegistry::new();
        let report = registry.discover(&catalog, &ToolContext::new()).unwrap();

        assert_eq!(report.registered, vec!["alpha"]);
        assert_eq!(report.failures.len(), 1);
        assert!(report.failures[0].error.contains("constructor exploded"));
    }

    fn load_nameless(_: &ToolContext) -> Result<Vec<Box<dyn Tool>>> {
        Ok(vec![Box::new(Echo(""))])
    }

    #[test]
    fn nameless_tool_fails_only_its_unit() {
        let catalog = crate::tool_catalog!["nameless" => load_nameless, "alpha" => load_alpha];
        let mut registry = ToolRegistry::new();
        let report = registry.discover(&catalog, &ToolContext::new()).unwrap();

        assert_eq!(report.registered, vec!["alpha"]);
        assert_eq!(report.failures.len(), 1);
        assert_eq!(report.failures[0].unit, "nameless");
        assert!(report.failures[0].error.contains("non-empty"));
        assert!(registry.get("alpha").is_some());
    }

    #[test]
    fn reserved_private_and_disabled_units_are_skipped() {
        let catalog = crate::tool_catalog![
            "base" => load_alpha,
            "_helpers" => load_alpha,
            "beta" => load_beta,
            "registry" => load_alpha,
        ];
        let ctx = ToolContext::new().disable("beta");
        let mut registry = ToolRegistry::new();
        let report = registry.discover(&catalog, &ctx).unwrap();

        assert!(registry.is_empty());
        assert!(report.is_clean());
        assert_eq!(report.skipped.len(), 4);
    }

    #[test]
    fn duplicate_across_units_aborts() {
        let catalog = crate::tool_catalog!["alpha" => load_alpha, "alpha_again" => load_alpha];
        let mut registry = ToolRegistry::new();
        let err = registry
            .discover(&catalog, &ToolContext::new())
            .unwrap_err();
        assert_eq!(err, RegistryError::NameConflict("alpha".to_string()));
    }

    #[test]
    fn report_renders_each_outcome() {
        let catalog = crate::tool_catalog!["alpha" => load_alpha, "broken" => load_broken];
        let report = ToolRegistry::new()
            .discover(&catalog, &ToolContext::new())
            .unwrap();
        let text = report.to_string();
        assert!(text.starts_with("1 tool(s) registered, 1 unit(s) failed, 0 skipped"));
        assert!(text.contains("ok      alpha"));
        assert!(text.contains("failed  broken: missing dependency"));
    }
}
