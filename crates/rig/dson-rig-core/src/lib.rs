//! dson-rig-core: modifier dependency resolution and formula evaluation.
//!
//! Built on top of `dson-asset-core`'s loaded assets:
//!
//! - [`closure`] computes which modifiers must be active to satisfy a user
//!   selection, with cycle detection over the requires graph.
//! - [`formula`] and [`spline`] hold the stack-machine operations and the
//!   control-point curves they interpolate.
//! - [`eval`] lowers asset formulas into a network and evaluates it in
//!   dependency order, isolating cyclic components.
//! - [`classify`] decides whether a modifier is baked once or kept live.
//! - [`binding`] is the boundary to the host scene.

pub mod binding;
pub mod classify;
pub mod closure;
pub mod eval;
pub mod formula;
pub mod spline;

pub use binding::{commit, request_evaluation, HostBinding};
pub use classify::{classify, Classification};
pub use closure::{ClosureResult, RequiresGraph};
pub use eval::{ChannelState, Evaluation, FormulaNetwork};
pub use formula::{evaluate_formula_list, Formula, Op, Operand, Stage};
pub use spline::{evaluate_constant, evaluate_linear, KochanekBartelsSpline, TcbKey};
