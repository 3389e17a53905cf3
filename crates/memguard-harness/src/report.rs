//! Serializable reports for the resolved table and the self-test.

use serde::Serialize;

use memguard_abi::ProcessInterceptors;
use memguard_abi::resolve;
use memguard_core::{InterceptOptions, PrimitiveId, ResolverStrategy};

use crate::selftest::CaseResult;

/// One resolved primitive.
#[derive(Debug, Clone, Serialize)]
pub struct BindingRow {
    pub primitive: PrimitiveId,
    pub symbol: String,
    /// Name this build exports its dispatch function under.
    pub exported_as: String,
    pub entry: String,
    /// Image that provides the genuine implementation.
    pub module: Option<String>,
    /// Nearest exported symbol at the entry, if the loader knows one.
    pub resolved_name: Option<String>,
}

/// Snapshot of the sealed process interceptors.
#[derive(Debug, Clone, Serialize)]
pub struct BootstrapReport {
    pub strategy: ResolverStrategy,
    pub options: InterceptOptions,
    pub bindings: Vec<BindingRow>,
}

impl BootstrapReport {
    #[must_use]
    pub fn from_interceptors(interceptors: &ProcessInterceptors) -> Self {
        let bindings = interceptors
            .bindings()
            .iter()
            .filter_map(|binding| {
                let entry = binding.entry_point?;
                Some(BindingRow {
                    primitive: binding.id,
                    symbol: binding.id.name().to_owned(),
                    exported_as: resolve::exported_symbol(binding.id).to_string_lossy().into_owned(),
                    entry: format!("{:#x}", entry.addr()),
                    module: resolve::module_path(entry),
                    resolved_name: resolve::symbol_name(entry),
                })
            })
            .collect();
        Self {
            strategy: interceptors.table().strategy(),
            options: *interceptors.options(),
            bindings,
        }
    }

    /// Render the report as markdown.
    #[must_use]
    pub fn to_markdown(&self) -> String {
        let mut out = String::new();
        out.push_str("# memguard bindings\n\n");
        out.push_str(&format!("- Strategy: {}\n", self.strategy));
        out.push_str(&format!("- Primitives: {}\n\n", self.bindings.len()));
        out.push_str("| Primitive | Exported as | Entry | Module |\n");
        out.push_str("|-----------|-------------|-------|--------|\n");
        for row in &self.bindings {
            out.push_str(&format!(
                "| {} | `{}` | {} | {} |\n",
                row.symbol,
                row.exported_as,
                row.entry,
                row.module.as_deref().unwrap_or("?")
            ));
        }
        out
    }

    /// Render the report as JSON.
    #[must_use]
    pub fn to_json(&self) -> String {
        serde_json::to_string_pretty(self).unwrap_or_else(|e| format!("{{\"error\": \"{e}\"}}"))
    }
}

/// Result of running every exported dispatch function against its genuine
/// binding.
#[derive(Debug, Clone, Serialize)]
pub struct SelftestReport {
    pub total: usize,
    pub passed: usize,
    pub failed: usize,
    pub results: Vec<CaseResult>,
}

impl SelftestReport {
    #[must_use]
    pub fn from_results(results: Vec<CaseResult>) -> Self {
        let passed = results.iter().filter(|r| r.passed).count();
        Self {
            total: results.len(),
            passed,
            failed: results.len() - passed,
            results,
        }
    }

    #[must_use]
    pub fn all_passed(&self) -> bool {
        self.failed == 0
    }

    /// Render the report as markdown.
    #[must_use]
    pub fn to_markdown(&self) -> String {
        let mut out = String::new();
        out.push_str("# memguard selftest\n\n");
        out.push_str(&format!("- Total: {}\n", self.total));
        out.push_str(&format!("- Passed: {}\n", self.passed));
        out.push_str(&format!("- Failed: {}\n\n", self.failed));
        out.push_str("| Primitive | Case | Status | Detail |\n");
        out.push_str("|-----------|------|--------|--------|\n");
        for r in &self.results {
            let status = if r.passed { "PASS" } else { "FAIL" };
            out.push_str(&format!(
                "| {} | {} | {} | {} |\n",
                r.primitive.name(),
                r.case_name,
                status,
                r.detail.as_deref().unwrap_or("")
            ));
        }
        out
    }

    /// Render the report as JSON.
    #[must_use]
    pub fn to_json(&self) -> String {
        serde_json::to_string_pretty(self).unwrap_or_else(|e| format!("{{\"error\": \"{e}\"}}"))
    }
}
