//! The host binding boundary.
//!
//! The engine never touches host scene objects. The host implements
//! [`HostBinding`]; the engine reads pose state through it, evaluates, and
//! hands back a value mapping the host applies itself. Results live in a
//! transient mapping until [`commit`] is called, so an abandoned evaluation
//! changes nothing on the host side.

use crate::eval::{Evaluation, FormulaNetwork};
use dson_api_core::ChannelKey;
use std::collections::{BTreeMap, BTreeSet};

/// What the engine needs from the host scene.
pub trait HostBinding {
    /// Current host-side value of a channel, if the host tracks it.
    fn channel_value(&self, key: &ChannelKey) -> Option<f64>;

    /// Apply one evaluated value to the host scene.
    fn set_channel_value(&mut self, key: &ChannelKey, value: f64);

    /// Modifiers the host currently has enabled.
    fn active_modifiers(&self) -> BTreeSet<String>;
}

/// Evaluate the network against host state. `dirty` names the channels whose
/// host values should drive the pass; anything not dirty and not computed
/// keeps its static value.
pub fn request_evaluation(
    network: &FormulaNetwork,
    binding: &dyn HostBinding,
    dirty: &BTreeSet<ChannelKey>,
) -> Evaluation {
    let mut overrides: BTreeMap<ChannelKey, f64> = BTreeMap::new();
    for key in dirty {
        if let Some(value) = binding.channel_value(key) {
            overrides.insert(key.clone(), value);
        }
    }
    network.evaluate(&overrides)
}

/// Write an evaluation's values back through the binding.
pub fn commit(binding: &mut dyn HostBinding, evaluation: &Evaluation) {
    for (key, value) in &evaluation.values {
        binding.set_channel_value(key, *value);
    }
}
