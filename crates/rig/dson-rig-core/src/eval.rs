//! Formula network construction and topological evaluation.
//!
//! Lowering walks the modifiers of loaded assets, resolves every formula
//! output and input reference to a [`ChannelKey`], and folds constants. The
//! evaluator orders output channels so a channel is computed after every
//! channel its formulas read, evaluates each, and clamps to the channel's
//! declared limits. Cyclic components fail with a `FormulaCycle` issue and
//! fall back to their static values; the rest of the network still evaluates.
//!
//! Evaluation writes only into the returned mapping, never into shared
//! channel state, so an abandoned pass leaves nothing half-applied.

use crate::formula::{evaluate_formula_list, Formula, Op, Operand, Stage};
use dson_asset_core::document::{OperandRecord, StageRecord};
use dson_asset_core::{resolve, Asset, AssetGraph, ResolutionContext, Target};
use dson_api_core::{
    AssetId, ChannelKey, DsonError, Issue, IssueKind, IssueList, Reference,
};
use hashbrown::HashMap;
use log::debug;
use std::collections::{BTreeMap, BTreeSet, VecDeque};

/// Static value and limits of one channel, captured at lowering time.
#[derive(Debug, Clone, Copy, Default)]
pub struct ChannelState {
    pub value: f64,
    pub min: Option<f64>,
    pub max: Option<f64>,
    pub clamped: bool,
}

impl ChannelState {
    fn clamp(&self, value: f64) -> f64 {
        if !self.clamped {
            return value;
        }
        let mut v = value;
        if let Some(min) = self.min {
            v = v.max(min);
        }
        if let Some(max) = self.max {
            v = v.min(max);
        }
        v
    }
}

/// The lowered formula network for a set of assets.
#[derive(Debug, Default)]
pub struct FormulaNetwork {
    formulas: Vec<Formula>,
    by_output: BTreeMap<ChannelKey, Vec<usize>>,
    channels: HashMap<ChannelKey, ChannelState>,
    issues: IssueList,
}

/// Result of one evaluation pass: computed channel values plus any cycle or
/// evaluation issues, alongside which the rest of the network still holds.
#[derive(Debug)]
pub struct Evaluation {
    pub values: BTreeMap<ChannelKey, f64>,
    pub issues: IssueList,
}

impl FormulaNetwork {
    pub fn new() -> FormulaNetwork {
        FormulaNetwork::default()
    }

    /// Problems collected while lowering assets into the network.
    pub fn issues(&self) -> &IssueList {
        &self.issues
    }

    pub fn formula_count(&self) -> usize {
        self.formulas.len()
    }

    /// Formulas writing `key`, in document order.
    pub fn formulas_for(&self, key: &ChannelKey) -> impl Iterator<Item = &Formula> {
        self.by_output
            .get(key)
            .into_iter()
            .flatten()
            .map(|&idx| &self.formulas[idx])
    }

    /// Channels that at least one formula writes.
    pub fn outputs(&self) -> impl Iterator<Item = &ChannelKey> {
        self.by_output.keys()
    }

    /// Lower every formula of an asset's modifiers into the network, and
    /// register channel state for the asset's nodes and modifiers. A formula
    /// whose output or inputs fail to resolve is skipped with a warning.
    pub fn add_asset(&mut self, graph: &mut AssetGraph, id: &AssetId) -> Result<(), DsonError> {
        let asset = graph.load(id)?;
        self.register_channels(&asset);

        let ctx = ResolutionContext::new(id.clone());
        let modifiers: Vec<(String, Vec<dson_asset_core::document::FormulaRecord>)> = asset
            .modifiers
            .values()
            .map(|m| (m.id.clone(), m.formulas.clone()))
            .collect();
        drop(asset);

        for (modifier_id, records) in modifiers {
            for record in records {
                match self.lower_formula(graph, &ctx, &record) {
                    Ok(mut formula) => {
                        formula.fold_constants();
                        let idx = self.formulas.len();
                        self.by_output
                            .entry(formula.output.clone())
                            .or_default()
                            .push(idx);
                        self.formulas.push(formula);
                    }
                    Err(e) => {
                        self.issues
                            .push(Issue::from_error(&e, format!("{id}#{modifier_id}")));
                    }
                }
            }
        }
        debug!("network holds {} formulas after {id}", self.formulas.len());
        Ok(())
    }

    fn register_channels(&mut self, asset: &Asset) {
        for node in asset.nodes.values() {
            for channel in node.channels.values() {
                let key = ChannelKey::new(asset.id.clone(), node.id.clone(), channel.id.clone());
                self.channels.insert(key, state_of(channel));
            }
        }
        for modifier in asset.modifiers.values() {
            let key = ChannelKey::new(
                asset.id.clone(),
                modifier.id.clone(),
                modifier.channel.id.clone(),
            );
            self.channels.insert(key, state_of(&modifier.channel));
        }
    }

    fn lower_formula(
        &mut self,
        graph: &mut AssetGraph,
        ctx: &ResolutionContext,
        record: &dson_asset_core::document::FormulaRecord,
    ) -> Result<Formula, DsonError> {
        let output = resolve_channel(graph, &record.output, ctx)?;
        let stage = match record.stage {
            StageRecord::Sum => Stage::Sum,
            StageRecord::Mult => Stage::Mult,
            StageRecord::Exclusive => Stage::Exclusive,
        };

        let mut ops = Vec::with_capacity(record.operations.len());
        for operation in &record.operations {
            let op = match operation.op.as_str() {
                "push" => {
                    if let Some(url) = &operation.url {
                        Op::Push(Operand::Channel(resolve_channel(graph, url, ctx)?))
                    } else {
                        match &operation.val {
                            Some(OperandRecord::Scalar(v)) => Op::Push(Operand::Scalar(*v)),
                            Some(OperandRecord::Knot(k)) => Op::Push(Operand::Knot(k.clone())),
                            None => {
                                return Err(DsonError::Parse {
                                    reason: "push without url or val".to_string(),
                                })
                            }
                        }
                    }
                }
                "add" => Op::Add,
                "sub" => Op::Sub,
                "mult" => Op::Mult,
                "div" => Op::Div,
                "spline_tcb" => Op::SplineTcb,
                "spline_linear" => Op::SplineLinear,
                "spline_constant" => Op::SplineConstant,
                other => {
                    return Err(DsonError::UnsupportedConstruct {
                        construct: format!("formula op {other}"),
                        context: record.output.to_string(),
                    })
                }
            };
            ops.push(op);
        }

        Ok(Formula::new(output, stage, ops))
    }

    /// Evaluate the whole network. `overrides` supplies caller-provided
    /// values (pose state) that take precedence over static channel values.
    pub fn evaluate(&self, overrides: &BTreeMap<ChannelKey, f64>) -> Evaluation {
        let mut issues = IssueList::new();
        let (order, cyclic) = self.schedule();

        let mut computed: BTreeMap<ChannelKey, f64> = BTreeMap::new();
        for key in &order {
            let value = self.evaluate_channel(key, overrides, &computed, &mut issues);
            computed.insert(key.clone(), value);
        }

        // Cyclic components fall back to their static values; one issue per
        // component, the rest of the network is unaffected.
        for component in &cyclic {
            issues.push(Issue::from_error(
                &DsonError::FormulaCycle {
                    channels: component.iter().map(|k| k.to_string()).collect(),
                },
                "evaluate",
            ));
            for key in component {
                computed.insert(key.clone(), self.static_value(key, overrides));
            }
        }

        Evaluation {
            values: computed,
            issues,
        }
    }

    fn evaluate_channel(
        &self,
        key: &ChannelKey,
        overrides: &BTreeMap<ChannelKey, f64>,
        computed: &BTreeMap<ChannelKey, f64>,
        issues: &mut IssueList,
    ) -> f64 {
        let static_value = self.static_value(key, overrides);
        let formulas: Vec<&Formula> = self.formulas_for(key).collect();

        let exclusive = formulas
            .iter()
            .filter(|f| f.stage == Stage::Exclusive)
            .count();
        if exclusive > 1 {
            issues.push(Issue::warning(
                IssueKind::Conflict,
                key.to_string(),
                format!("{exclusive} exclusive formulas target this channel; last wins"),
            ));
        }

        let mut read = |input: &ChannelKey| -> f64 {
            if let Some(v) = computed.get(input) {
                return *v;
            }
            self.static_value(input, overrides)
        };

        let raw = match evaluate_formula_list(&formulas, static_value, &mut read) {
            Ok(v) => v,
            Err(e) => {
                issues.push(Issue::from_error(&e, key.to_string()));
                static_value
            }
        };
        self.state_for(key).clamp(raw)
    }

    fn static_value(&self, key: &ChannelKey, overrides: &BTreeMap<ChannelKey, f64>) -> f64 {
        if let Some(v) = overrides.get(key) {
            return *v;
        }
        self.state_for(key).value
    }

    fn state_for(&self, key: &ChannelKey) -> ChannelState {
        self.channels.get(key).copied().unwrap_or_default()
    }

    /// Order output channels so inputs come before the channels reading
    /// them. Returns the acyclic order plus the cyclic components.
    fn schedule(&self) -> (Vec<ChannelKey>, Vec<Vec<ChannelKey>>) {
        // Edges between output channels only; reads of formula-less channels
        // are plain lookups, not dependencies.
        let mut indeg: BTreeMap<&ChannelKey, usize> = BTreeMap::new();
        let mut out_edges: BTreeMap<&ChannelKey, BTreeSet<&ChannelKey>> = BTreeMap::new();
        for output in self.by_output.keys() {
            indeg.entry(output).or_insert(0);
        }
        for (output, indices) in &self.by_output {
            for &idx in indices {
                for input in self.formulas[idx].inputs() {
                    if !self.by_output.contains_key(input) {
                        continue;
                    }
                    if out_edges.entry(input).or_default().insert(output) {
                        *indeg.entry(output).or_insert(0) += 1;
                    }
                }
            }
        }

        let mut ready: VecDeque<&ChannelKey> = indeg
            .iter()
            .filter(|(_, &d)| d == 0)
            .map(|(&k, _)| k)
            .collect();
        let mut order = Vec::with_capacity(indeg.len());
        while let Some(key) = ready.pop_front() {
            order.push(key.clone());
            if let Some(next) = out_edges.get(key) {
                for &succ in next {
                    if let Some(d) = indeg.get_mut(succ) {
                        *d -= 1;
                        if *d == 0 {
                            ready.push_back(succ);
                        }
                    }
                }
            }
        }

        if order.len() == indeg.len() {
            return (order, Vec::new());
        }

        // Group the leftover (cyclic) channels into connected components,
        // treating dependency edges as undirected.
        let ordered: BTreeSet<ChannelKey> = order.iter().cloned().collect();
        let remaining: BTreeSet<&ChannelKey> = self
            .by_output
            .keys()
            .filter(|k| !ordered.contains(k))
            .collect();

        let mut neighbors: BTreeMap<&ChannelKey, BTreeSet<&ChannelKey>> = BTreeMap::new();
        for (&from, tos) in &out_edges {
            for &to in tos {
                if remaining.contains(from) && remaining.contains(to) {
                    neighbors.entry(from).or_default().insert(to);
                    neighbors.entry(to).or_default().insert(from);
                }
            }
        }

        let mut components = Vec::new();
        let mut seen: BTreeSet<&ChannelKey> = BTreeSet::new();
        for &start in &remaining {
            if seen.contains(start) {
                continue;
            }
            let mut component = Vec::new();
            let mut queue = VecDeque::from([start]);
            seen.insert(start);
            while let Some(key) = queue.pop_front() {
                component.push(key.clone());
                if let Some(next) = neighbors.get(key) {
                    for &n in next {
                        if seen.insert(n) {
                            queue.push_back(n);
                        }
                    }
                }
            }
            component.sort();
            components.push(component);
        }
        (order, components)
    }
}

fn state_of(channel: &dson_asset_core::Channel) -> ChannelState {
    ChannelState {
        value: channel.effective().as_f64(),
        min: channel.min,
        max: channel.max,
        clamped: channel.clamped,
    }
}

fn resolve_channel(
    graph: &mut AssetGraph,
    reference: &Reference,
    ctx: &ResolutionContext,
) -> Result<ChannelKey, DsonError> {
    match resolve(graph, reference, ctx)? {
        Target::Channel(key) => Ok(key),
        Target::Node { .. } => Err(DsonError::Resolve {
            reference: reference.to_string(),
            reason: "expected a channel, found a node".to_string(),
        }),
    }
}
