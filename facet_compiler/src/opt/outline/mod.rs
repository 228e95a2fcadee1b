//! The outlining pass.
//!
//! Discovers repeated instruction sequences across the module and factors
//! them into shared functions:
//!
//! 1. Linearize the module into an integer stream (`linearize.rs`).
//! 2. Feed the stream to the suffix-tree engine, which calls back into the
//!    target (`target.rs`) to group matches by structural equality
//!    (`numbering.rs`) and single-escape legality (`escape.rs`).
//! 3. For each beneficial group, build the shared function and rewrite the
//!    call sites (`build.rs`).
//!
//! Rounds repeat until nothing changes or `max_rounds` is hit; outlined
//! bodies and rewritten callers shrink below `min_length`, so a fixed
//! point arrives quickly.

pub mod escape;
pub mod linearize;
pub mod numbering;
pub mod target;

mod build;

use crate::ir::{FuncId, Module};
use crate::opt::{ModulePass, OptimizationSettings, OutliningSettings};
use crate::outliner::{get_functions_to_outline, OutlinedFunction};

use build::{build_outlined_function, outline_candidate};
use linearize::convert_module_to_stream;
use target::IrOutlinerTarget;

// =============================================================================
// Statistics
// =============================================================================

/// Counters for one run of the pass.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct OutliningStats {
    /// Candidates replaced with calls.
    pub candidates_outlined: u32,
    /// Outlined functions created.
    pub functions_created: u32,
    /// Instructions removed, net of the one body that remains per function.
    pub instructions_saved: u32,
    /// Rounds that changed the module.
    pub rounds: u32,
}

// =============================================================================
// Pass
// =============================================================================

/// The outlining pass. Holds nothing across runs except statistics.
#[derive(Debug, Default)]
pub struct Outlining {
    stats: OutliningStats,
}

impl Outlining {
    pub fn new() -> Self {
        Self::default()
    }

    /// Statistics accumulated so far.
    pub fn stats(&self) -> OutliningStats {
        self.stats
    }

    /// Run one round. Returns whether anything was outlined.
    fn outline_module_once(&mut self, module: &mut Module, settings: &OutliningSettings) -> bool {
        let (stream, instructions) = convert_module_to_stream(module, settings);

        let mut functions: Vec<OutlinedFunction> = Vec::new();
        {
            let mut target = IrOutlinerTarget::new(*settings, module, &instructions);
            get_functions_to_outline(&mut functions, &stream, &mut target);
        }

        let mut changed = false;
        for function_info in &functions {
            // Don't outline if it's not beneficial.
            if function_info.benefit() < 1 {
                continue;
            }

            // The function is created lazily, on the first candidate that
            // actually outlines.
            let mut function: Option<FuncId> = None;
            let mut num_outlined: u32 = 0;
            for candidate in function_info.candidates.iter().filter(|c| !c.is_deleted()) {
                let func = match function {
                    Some(func) => func,
                    None => {
                        let func = build_outlined_function(
                            module,
                            function_info,
                            &instructions,
                            settings,
                        );
                        tracing::debug!(
                            name = %module.func(func).name,
                            sequence_size = function_info.sequence_size,
                            "created outlined function"
                        );
                        self.stats.functions_created += 1;
                        function = Some(func);
                        func
                    }
                };
                if outline_candidate(module, candidate, func, &instructions) {
                    changed = true;
                    num_outlined += 1;
                }
            }
            self.stats.candidates_outlined += num_outlined;
            if num_outlined > 1 {
                self.stats.instructions_saved +=
                    (num_outlined - 1) * function_info.sequence_size as u32;
            }
        }
        changed
    }
}

impl ModulePass for Outlining {
    fn name(&self) -> &'static str {
        "outlining"
    }

    fn run(&mut self, module: &mut Module, settings: &OptimizationSettings) -> bool {
        if !settings.outlining {
            return false;
        }
        let outlining_settings = settings.outlining_settings;
        tracing::debug!(
            place_near_caller = outlining_settings.place_near_caller,
            max_rounds = outlining_settings.max_rounds,
            min_length = outlining_settings.min_length,
            min_parameters = outlining_settings.min_parameters,
            max_parameters = outlining_settings.max_parameters,
            "running outliner on all functions"
        );

        let mut changed = false;
        for round in 0..outlining_settings.max_rounds {
            if !self.outline_module_once(module, &outlining_settings) {
                // Nothing found; another round won't find anything either.
                tracing::debug!(round, "outliner reached a fixed point");
                break;
            }
            self.stats.rounds += 1;
            changed = true;
        }
        changed
    }
}
