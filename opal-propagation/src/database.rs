//! Snapshot of the analysis results, and its JSON rendering.

use std::collections::BTreeMap;

use opal_program::Program;
use serde_json::{json, Value};

use crate::propagator::{Propagator, PropagatorConfig};
use crate::type_set::TypeSet;

/// Per-site and per-parameter types at fixpoint.
///
/// Positions are absolute byte offsets into the bytecode stream: a
/// usage entry keys the bytecode that observed the value, a method or
/// block entry keys the method's header. The JSON document lists usages
/// first, then methods, then blocks, each section in ascending position
/// order.
#[derive(Debug, Default)]
pub struct TypeDatabase {
    sites: BTreeMap<u32, TypeSet>,
    methods: BTreeMap<u32, Vec<TypeSet>>,
    blocks: BTreeMap<u32, Vec<TypeSet>>,
}

impl TypeDatabase {
    pub(crate) fn new() -> TypeDatabase {
        TypeDatabase::default()
    }

    /// Run the whole analysis for `program`.
    pub fn compute(program: &Program) -> TypeDatabase {
        Propagator::new(program).propagate()
    }

    pub fn compute_with_config(program: &Program, config: PropagatorConfig) -> TypeDatabase {
        Propagator::with_config(program, config).propagate()
    }

    pub(crate) fn add_usage(&mut self, position: u32, type_set: TypeSet) {
        self.sites
            .entry(position)
            .and_modify(|existing| {
                existing.add_all(&type_set);
            })
            .or_insert(type_set);
    }

    pub(crate) fn add_method_arguments(&mut self, position: u32, columns: Vec<TypeSet>) {
        Self::add_arguments(&mut self.methods, position, columns);
    }

    pub(crate) fn add_block_arguments(&mut self, position: u32, columns: Vec<TypeSet>) {
        Self::add_arguments(&mut self.blocks, position, columns);
    }

    fn add_arguments(map: &mut BTreeMap<u32, Vec<TypeSet>>, position: u32, columns: Vec<TypeSet>) {
        map.entry(position)
            .and_modify(|existing| {
                debug_assert_eq!(existing.len(), columns.len());
                for (slot, incoming) in existing.iter_mut().zip(columns.iter()) {
                    slot.add_all(incoming);
                }
            })
            .or_insert(columns);
    }

    /// Positions of all analyzed methods, ascending.
    pub fn methods(&self) -> impl Iterator<Item = u32> + '_ {
        self.methods.keys().copied()
    }

    /// Argument-type columns of a method, or `None` if it was never
    /// reached.
    pub fn arguments(&self, position: u32) -> Option<&[TypeSet]> {
        self.methods.get(&position).map(Vec::as_slice)
    }

    /// Argument-type columns of a block (receiver slot excluded).
    pub fn block_arguments(&self, position: u32) -> Option<&[TypeSet]> {
        self.blocks.get(&position).map(Vec::as_slice)
    }

    /// The observed value type at a bytecode site.
    pub fn usage(&self, position: u32) -> Option<&TypeSet> {
        self.sites.get(&position)
    }

    pub fn to_json_value(&self, program: &Program) -> Value {
        let mut entries = Vec::new();
        for (&position, type_set) in &self.sites {
            entries.push(json!({
                "position": position,
                "type": type_set.to_json(program),
            }));
        }
        for (&position, columns) in &self.methods {
            let arguments: Vec<Value> = columns
                .iter()
                .map(|column| column.to_json(program))
                .collect();
            entries.push(json!({
                "position": position,
                "arguments": arguments,
            }));
        }
        for (&position, columns) in &self.blocks {
            let mut arguments = vec![json!("[]")];
            arguments.extend(columns.iter().map(|column| column.to_json(program)));
            entries.push(json!({
                "position": position,
                "arguments": arguments,
            }));
        }
        Value::Array(entries)
    }

    pub fn as_json(&self, program: &Program) -> String {
        self.to_json_value(program).to_string()
    }

    pub fn as_json_pretty(&self, program: &Program) -> String {
        serde_json::to_string_pretty(&self.to_json_value(program)).unwrap_or_default()
    }
}
