//! Replay and fact-table reports, printable as text or JSON.

use std::collections::BTreeMap;
use std::fmt;

use alcfix_core::device::{MemoryTree, PropertyValue};
use alcfix_core::facts::FactTable;
use alcfix_core::prelude::{DeviceTree, Orchestrator, RecordingClock};
use serde::Serialize;
use serde_json::Value;

use crate::scenario::Machine;

/// Everything a replay changed.
#[derive(Debug, Serialize)]
pub struct ReplayReport
{
    /// Verb support enabled by injection.
    pub verbs_enabled: bool,
    /// Start delay enabled by injection.
    pub delay_enabled: bool,
    /// Layout id the OS should see, when overridden.
    pub layout_override: Option<u32>,
    /// Progress bit names.
    pub progress: Vec<String>,
    /// Discovered controllers.
    pub controllers: Vec<ControllerReport>,
    /// Validated codecs.
    pub codecs: Vec<CodecReport>,
    /// Installed hooks by symbol.
    pub hooks: Vec<String>,
    /// Pool ids handed out.
    pub pool: Vec<String>,
    /// Total time spent in delays.
    pub slept_ms: u128,
    /// One line per replayed event.
    pub events: Vec<String>,
    /// Final node state in declaration order.
    pub nodes: Vec<NodeReport>,
}

/// A controller instance.
#[derive(Debug, Serialize)]
pub struct ControllerReport
{
    /// `vendor:device rev`
    pub id: String,
    /// Assigned layout id.
    pub layout: u32,
    /// Matched entry name.
    pub matched: Option<String>,
    /// Patches queued for the instance.
    pub patches: usize,
}

/// A codec instance.
#[derive(Debug, Serialize)]
pub struct CodecReport
{
    /// Owning controller index.
    pub controller: usize,
    /// `vendor:codec rev`
    pub id: String,
    /// Matched entry name.
    pub matched: Option<String>,
}

/// A device tree node.
#[derive(Debug, Serialize)]
pub struct NodeReport
{
    /// Scenario id.
    pub id: String,
    /// Current name.
    pub name: Option<String>,
    /// Driver was terminated.
    pub terminated: bool,
    /// Properties in ioreg-like form.
    pub properties: BTreeMap<String, Value>,
}

impl ReplayReport
{
    /// Collect the state left behind by a replay.
    #[must_use]
    pub fn collect(orchestrator: &Orchestrator<RecordingClock>, machine: &Machine, events: Vec<String>) -> Self
    {
        let facts = orchestrator.facts();
        let injection = orchestrator.injection();
        let controllers = orchestrator
            .controllers()
            .iter()
            .map(|controller| ControllerReport {
                id: format!("{:04X}:{:04X} rev {:X}", controller.vendor, controller.device, controller.revision),
                layout: controller.layout,
                matched: controller
                    .info
                    .and_then(|matched| facts.controller(matched))
                    .map(|entry| entry.name.clone()),
                patches: controller.patches.len(),
            })
            .collect();
        let codecs = orchestrator
            .codecs()
            .iter()
            .map(|codec| CodecReport {
                controller: codec.controller,
                id: format!("{:04X}:{:04X} rev {:X}", codec.vendor, codec.codec, codec.revision),
                matched: codec
                    .info
                    .and_then(|matched| facts.codec(matched))
                    .map(|(vendor, entry)| format!("{} {}", vendor.name, entry.name)),
            })
            .collect();

        Self {
            verbs_enabled: injection.verbs_enabled,
            delay_enabled: injection.delay_enabled,
            layout_override: injection.layout_override,
            progress: orchestrator
                .progress()
                .bits()
                .iter_names()
                .map(|(name, _)| name.to_owned())
                .collect(),
            controllers,
            codecs,
            hooks: orchestrator.hooks().iter().map(|(kind, _)| kind.to_string()).collect(),
            pool: orchestrator.pool().used_ids().iter().map(|id| format!("{id:08X}")).collect(),
            slept_ms: orchestrator.clock().total().as_millis(),
            events,
            nodes: machine
                .nodes
                .iter()
                .map(|(id, node)| NodeReport {
                    id: id.clone(),
                    name: machine.tree.name(*node).map(str::to_owned),
                    terminated: machine.tree.is_terminated(*node),
                    properties: node_properties(&machine.tree, *node),
                })
                .collect(),
        }
    }
}

fn node_properties(tree: &MemoryTree, node: alcfix_core::device::NodeId) -> BTreeMap<String, Value>
{
    tree.properties(node)
        .map(|properties| {
            properties
                .iter()
                .map(|(key, value)| (key.clone(), property_json(value)))
                .collect()
        })
        .unwrap_or_default()
}

/// Render a property value the way `ioreg` shows it: data as `<hex>`.
#[must_use]
pub fn property_json(value: &PropertyValue) -> Value
{
    match value {
        PropertyValue::Data(bytes) => Value::String(format!("<{}>", hex::encode(bytes))),
        PropertyValue::Number(number) => Value::from(*number),
        PropertyValue::Bool(flag) => Value::Bool(*flag),
        PropertyValue::String(text) => Value::String(text.clone()),
        PropertyValue::Array(items) => Value::Array(items.iter().map(property_json).collect()),
        PropertyValue::Dict(entries) => Value::Object(
            entries
                .iter()
                .map(|(key, item)| (key.clone(), property_json(item)))
                .collect(),
        ),
    }
}

impl fmt::Display for ReplayReport
{
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result
    {
        writeln!(f, "Injection:")?;
        writeln!(f, "  verbs: {}  delay: {}", self.verbs_enabled, self.delay_enabled)?;
        if let Some(layout) = self.layout_override {
            writeln!(f, "  layout override: {layout}")?;
        }
        writeln!(f, "Progress: {}", self.progress.join(" | "))?;

        writeln!(f, "Controllers:")?;
        for (index, controller) in self.controllers.iter().enumerate() {
            writeln!(
                f,
                "  [{index}] {} layout {} -> {} ({} patches)",
                controller.id,
                controller.layout,
                controller.matched.as_deref().unwrap_or("unmatched"),
                controller.patches
            )?;
        }
        writeln!(f, "Codecs:")?;
        for codec in &self.codecs {
            writeln!(
                f,
                "  [{}] {} -> {}",
                codec.controller,
                codec.id,
                codec.matched.as_deref().unwrap_or("unmatched")
            )?;
        }
        writeln!(f, "Hooks: {}", self.hooks.join(", "))?;
        if !self.pool.is_empty() {
            writeln!(f, "Pool ids: {}", self.pool.join(", "))?;
        }
        writeln!(f, "Slept: {} ms", self.slept_ms)?;

        writeln!(f, "Events:")?;
        for line in &self.events {
            writeln!(f, "  {line}")?;
        }
        writeln!(f, "Nodes:")?;
        for node in &self.nodes {
            let terminated = if node.terminated { " (terminated)" } else { "" };
            writeln!(f, "  {} [{}]{terminated}", node.name.as_deref().unwrap_or("-"), node.id)?;
            for (key, value) in &node.properties {
                writeln!(f, "    {key} = {value}")?;
            }
        }
        Ok(())
    }
}

/// Summary of a fact table without resource payloads.
#[derive(Debug, Serialize)]
pub struct FactsReport
{
    /// Controller entries in priority order.
    pub controllers: Vec<ControllerEntry>,
    /// Codec entries grouped by vendor.
    pub codecs: Vec<CodecEntry>,
}

/// Controller entry summary.
#[derive(Debug, Serialize)]
pub struct ControllerEntry
{
    /// Position in the table.
    pub index: usize,
    /// Entry name.
    pub name: String,
    /// `vendor:device`
    pub id: String,
    /// Accepted revisions, empty for any.
    pub revisions: Vec<u32>,
    /// Platform restriction.
    pub platform: String,
    /// Model mask.
    pub models: u32,
    /// Number of patches.
    pub patches: usize,
}

/// Codec entry summary.
#[derive(Debug, Serialize)]
pub struct CodecEntry
{
    /// Vendor name.
    pub vendor: String,
    /// Codec name.
    pub name: String,
    /// `vendor:codec`
    pub id: String,
    /// Accepted revisions, empty for any.
    pub revisions: Vec<u32>,
    /// Number of patches.
    pub patches: usize,
    /// Layout ids with resource files.
    pub layouts: Vec<u32>,
    /// Layout ids with platform files.
    pub platforms: Vec<u32>,
}

impl FactsReport
{
    /// Summarize a table.
    #[must_use]
    pub fn collect(facts: &FactTable) -> Self
    {
        let controllers = facts
            .controllers
            .iter()
            .enumerate()
            .map(|(index, entry)| ControllerEntry {
                index,
                name: entry.name.clone(),
                id: format!("{:04X}:{:04X}", entry.vendor, entry.device),
                revisions: entry.revisions.to_vec(),
                platform: entry.platform.to_string(),
                models: entry.models.bits(),
                patches: entry.patches.len(),
            })
            .collect();
        let codecs = facts
            .vendors
            .iter()
            .flat_map(|vendor| {
                vendor.codecs.iter().map(move |codec| CodecEntry {
                    vendor: vendor.name.clone(),
                    name: codec.name.clone(),
                    id: format!("{:04X}:{:04X}", vendor.vendor, codec.codec),
                    revisions: codec.revisions.to_vec(),
                    patches: codec.patches.len(),
                    layouts: codec.layouts.iter().map(|file| file.layout).collect(),
                    platforms: codec.platforms.iter().map(|file| file.layout).collect(),
                })
            })
            .collect();
        Self { controllers, codecs }
    }
}

impl fmt::Display for FactsReport
{
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result
    {
        writeln!(f, "Controllers:")?;
        for entry in &self.controllers {
            writeln!(
                f,
                "  [{}] {} {} revisions {:?} platform {} models {:#X} ({} patches)",
                entry.index, entry.name, entry.id, entry.revisions, entry.platform, entry.models, entry.patches
            )?;
        }
        writeln!(f, "Codecs:")?;
        for entry in &self.codecs {
            writeln!(
                f,
                "  {} {} {} revisions {:?} ({} patches) layouts {:?} platforms {:?}",
                entry.vendor, entry.name, entry.id, entry.revisions, entry.patches, entry.layouts, entry.platforms
            )?;
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests
{
    use alcfix_core::facts::builtin;

    use super::*;

    #[test]
    fn test_property_json_uses_ioreg_data_form()
    {
        assert_eq!(property_json(&PropertyValue::data_u32(12)), Value::String("<0c000000>".to_owned()));
        let nested = PropertyValue::Array(vec![PropertyValue::Number(3), PropertyValue::Bool(true)]);
        assert_eq!(property_json(&nested), serde_json::json!([3, true]));
    }

    #[test]
    fn test_facts_report_keeps_table_order()
    {
        let facts = builtin::table();
        let report = FactsReport::collect(facts);
        assert_eq!(report.controllers.len(), facts.controllers.len());
        for (index, entry) in report.controllers.iter().enumerate() {
            assert_eq!(entry.index, index);
            assert_eq!(entry.name, facts.controllers[index].name);
        }
        let text = report.to_string();
        assert!(text.starts_with("Controllers:"));
        assert!(text.contains("Codecs:"));
    }
}
