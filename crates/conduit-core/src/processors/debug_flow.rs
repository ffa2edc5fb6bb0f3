//! DebugFlow: a processor that cycles through every session outcome.
//!
//! With a flow unit available it responds, in turn, with success, failure,
//! rollback, rollback with yield, rollback with penalty and an error, each
//! for the configured number of triggers before moving to the next. Without
//! a flow unit it cycles through skip, error and yield the same way.

use crate::context::ProcessContext;
use crate::error::ProcessError;
use crate::flow_unit::FlowUnit;
use crate::processor::{Processor, PropertyDescriptor, PropertyKind};
use crate::relationship::Relationship;
use crate::session::ProcessSession;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum FlowUnitResponse {
    Success,
    Failure,
    Rollback,
    RollbackYield,
    RollbackPenalty,
    Exception,
}

impl FlowUnitResponse {
    const COUNT: usize = 6;

    fn next(self) -> Self {
        match self {
            FlowUnitResponse::Success => FlowUnitResponse::Failure,
            FlowUnitResponse::Failure => FlowUnitResponse::Rollback,
            FlowUnitResponse::Rollback => FlowUnitResponse::RollbackYield,
            FlowUnitResponse::RollbackYield => FlowUnitResponse::RollbackPenalty,
            FlowUnitResponse::RollbackPenalty => FlowUnitResponse::Exception,
            FlowUnitResponse::Exception => FlowUnitResponse::Success,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum NoFlowUnitResponse {
    Skip,
    Exception,
    Yield,
}

impl NoFlowUnitResponse {
    const COUNT: usize = 3;

    fn next(self) -> Self {
        match self {
            NoFlowUnitResponse::Skip => NoFlowUnitResponse::Exception,
            NoFlowUnitResponse::Exception => NoFlowUnitResponse::Yield,
            NoFlowUnitResponse::Yield => NoFlowUnitResponse::Skip,
        }
    }
}

/// Diagnostic processor for exercising session handling.
#[derive(Debug)]
pub struct DebugFlow {
    flow_unit_state: FlowUnitResponse,
    flow_unit_max: [u64; FlowUnitResponse::COUNT],
    flow_unit_curr: [u64; FlowUnitResponse::COUNT],
    no_flow_unit_state: NoFlowUnitResponse,
    no_flow_unit_max: [u64; NoFlowUnitResponse::COUNT],
    no_flow_unit_curr: [u64; NoFlowUnitResponse::COUNT],
}

impl DebugFlow {
    pub const FF_SUCCESS_ITERATIONS: &'static str = "flow_unit_success_iterations";
    pub const FF_FAILURE_ITERATIONS: &'static str = "flow_unit_failure_iterations";
    pub const FF_ROLLBACK_ITERATIONS: &'static str = "flow_unit_rollback_iterations";
    pub const FF_ROLLBACK_YIELD_ITERATIONS: &'static str = "flow_unit_rollback_yield_iterations";
    pub const FF_ROLLBACK_PENALTY_ITERATIONS: &'static str = "flow_unit_rollback_penalty_iterations";
    pub const FF_EXCEPTION_ITERATIONS: &'static str = "flow_unit_exception_iterations";
    pub const NO_FF_SKIP_ITERATIONS: &'static str = "no_flow_unit_skip_iterations";
    pub const NO_FF_EXCEPTION_ITERATIONS: &'static str = "no_flow_unit_exception_iterations";
    pub const NO_FF_YIELD_ITERATIONS: &'static str = "no_flow_unit_yield_iterations";

    const FLOW_UNIT_PROPERTIES: [&'static str; FlowUnitResponse::COUNT] = [
        Self::FF_SUCCESS_ITERATIONS,
        Self::FF_FAILURE_ITERATIONS,
        Self::FF_ROLLBACK_ITERATIONS,
        Self::FF_ROLLBACK_YIELD_ITERATIONS,
        Self::FF_ROLLBACK_PENALTY_ITERATIONS,
        Self::FF_EXCEPTION_ITERATIONS,
    ];

    const NO_FLOW_UNIT_PROPERTIES: [&'static str; NoFlowUnitResponse::COUNT] = [
        Self::NO_FF_SKIP_ITERATIONS,
        Self::NO_FF_EXCEPTION_ITERATIONS,
        Self::NO_FF_YIELD_ITERATIONS,
    ];

    pub fn new() -> Self {
        Self {
            flow_unit_state: FlowUnitResponse::Success,
            flow_unit_max: [0; FlowUnitResponse::COUNT],
            flow_unit_curr: [0; FlowUnitResponse::COUNT],
            no_flow_unit_state: NoFlowUnitResponse::Skip,
            no_flow_unit_max: [0; NoFlowUnitResponse::COUNT],
            no_flow_unit_curr: [0; NoFlowUnitResponse::COUNT],
        }
    }

    /// Configured success iterations; `0` until scheduled.
    pub fn flow_unit_max_success(&self) -> u64 {
        self.flow_unit_max[FlowUnitResponse::Success as usize]
    }

    /// Configured failure iterations; `0` until scheduled.
    pub fn flow_unit_max_failure(&self) -> u64 {
        self.flow_unit_max[FlowUnitResponse::Failure as usize]
    }

    /// Configured skip iterations; `0` until scheduled.
    pub fn no_flow_unit_max_skip(&self) -> u64 {
        self.no_flow_unit_max[NoFlowUnitResponse::Skip as usize]
    }

    fn respond_with_unit(
        &mut self,
        context: &ProcessContext,
        session: &mut ProcessSession,
        unit: FlowUnit,
    ) -> Result<(), ProcessError> {
        // one full cycle plus the state we started in
        for _ in 0..=FlowUnitResponse::COUNT {
            let i = self.flow_unit_state as usize;
            if self.flow_unit_curr[i] < self.flow_unit_max[i] {
                self.flow_unit_curr[i] += 1;
                return self.apply_with_unit(self.flow_unit_state, context, session, &unit);
            }
            self.flow_unit_curr[i] = 0;
            self.flow_unit_state = self.flow_unit_state.next();
        }
        Err(ProcessError::invalid_property(
            Self::FF_SUCCESS_ITERATIONS,
            "every flow-unit iteration count is zero",
        ))
    }

    fn apply_with_unit(
        &self,
        response: FlowUnitResponse,
        context: &ProcessContext,
        session: &mut ProcessSession,
        unit: &FlowUnit,
    ) -> Result<(), ProcessError> {
        match response {
            FlowUnitResponse::Success => {
                tracing::info!("{} transferring {} to success", context, unit);
                session.transfer(unit, &Relationship::success())?;
            }
            FlowUnitResponse::Failure => {
                tracing::info!("{} transferring {} to failure", context, unit);
                session.transfer(unit, &Relationship::failure())?;
            }
            FlowUnitResponse::Rollback => {
                tracing::info!("{} rolling back {}", context, unit);
                session.rollback(false)?;
            }
            FlowUnitResponse::RollbackYield => {
                tracing::info!("{} rolling back {} and yielding", context, unit);
                session.rollback(false)?;
                context.yield_processor();
            }
            FlowUnitResponse::RollbackPenalty => {
                tracing::info!("{} rolling back {} with penalty", context, unit);
                session.rollback(true)?;
            }
            FlowUnitResponse::Exception => {
                return Err(ProcessError::failure(format!(
                    "forced failure by {} for {}",
                    context, unit
                )));
            }
        }
        Ok(())
    }

    fn respond_without_unit(&mut self, context: &ProcessContext) -> Result<(), ProcessError> {
        for _ in 0..=NoFlowUnitResponse::COUNT {
            let i = self.no_flow_unit_state as usize;
            if self.no_flow_unit_curr[i] < self.no_flow_unit_max[i] {
                self.no_flow_unit_curr[i] += 1;
                return match self.no_flow_unit_state {
                    NoFlowUnitResponse::Skip => Ok(()),
                    NoFlowUnitResponse::Exception => Err(ProcessError::failure(format!(
                        "forced failure by {} with no flow unit",
                        context
                    ))),
                    NoFlowUnitResponse::Yield => {
                        tracing::info!("{} yielding with no flow unit", context);
                        context.yield_processor();
                        Ok(())
                    }
                };
            }
            self.no_flow_unit_curr[i] = 0;
            self.no_flow_unit_state = self.no_flow_unit_state.next();
        }
        Ok(())
    }
}

impl Default for DebugFlow {
    fn default() -> Self {
        Self::new()
    }
}

fn iterations(name: &str, description: &str, default: &str) -> PropertyDescriptor {
    PropertyDescriptor::new(name, description)
        .with_kind(PropertyKind::NonNegativeInteger)
        .with_default(default)
}

impl Processor for DebugFlow {
    fn component_type(&self) -> &str {
        "DebugFlow"
    }

    fn relationships(&self) -> Vec<Relationship> {
        vec![
            Relationship::new("success", "Flow units processed successfully"),
            Relationship::new("failure", "Flow units that failed to process"),
        ]
    }

    fn property_descriptors(&self) -> Vec<PropertyDescriptor> {
        vec![
            iterations(Self::FF_SUCCESS_ITERATIONS, "Triggers that transfer the flow unit to success", "1"),
            iterations(Self::FF_FAILURE_ITERATIONS, "Triggers that transfer the flow unit to failure", "0"),
            iterations(Self::FF_ROLLBACK_ITERATIONS, "Triggers that roll the session back", "0"),
            iterations(
                Self::FF_ROLLBACK_YIELD_ITERATIONS,
                "Triggers that roll the session back and yield",
                "0",
            ),
            iterations(
                Self::FF_ROLLBACK_PENALTY_ITERATIONS,
                "Triggers that roll the session back with penalty",
                "0",
            ),
            iterations(Self::FF_EXCEPTION_ITERATIONS, "Triggers that fail with a flow unit", "0"),
            iterations(Self::NO_FF_SKIP_ITERATIONS, "Triggers without a flow unit that do nothing", "1"),
            iterations(Self::NO_FF_EXCEPTION_ITERATIONS, "Triggers without a flow unit that fail", "0"),
            iterations(Self::NO_FF_YIELD_ITERATIONS, "Triggers without a flow unit that yield", "0"),
        ]
    }

    fn on_scheduled(&mut self, context: &ProcessContext) -> Result<(), ProcessError> {
        for (i, name) in Self::FLOW_UNIT_PROPERTIES.iter().enumerate() {
            self.flow_unit_max[i] = context.parse_property(name)?;
        }
        for (i, name) in Self::NO_FLOW_UNIT_PROPERTIES.iter().enumerate() {
            self.no_flow_unit_max[i] = context.parse_property(name)?;
        }
        if self.flow_unit_max.iter().all(|max| *max == 0) {
            return Err(ProcessError::invalid_property(
                Self::FF_SUCCESS_ITERATIONS,
                "at least one flow-unit iteration count must be positive",
            ));
        }

        self.flow_unit_state = FlowUnitResponse::Success;
        self.flow_unit_curr = [0; FlowUnitResponse::COUNT];
        self.no_flow_unit_state = NoFlowUnitResponse::Skip;
        self.no_flow_unit_curr = [0; NoFlowUnitResponse::COUNT];
        Ok(())
    }

    fn on_trigger(
        &mut self,
        context: &ProcessContext,
        session: &mut ProcessSession,
    ) -> Result<(), ProcessError> {
        match session.get()? {
            Some(unit) => self.respond_with_unit(context, session, unit),
            None => self.respond_without_unit(context),
        }
    }
}
