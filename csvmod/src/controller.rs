//! The business-logic seam of a pipeline run.

use crate::config::ControllerConfig;
use crate::error::PipelineResult;
use crate::row::Row;

/// What the pipeline does with a row after the hook ran.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub enum WriteDecision {
    /// Write only when a field differs from its origin
    #[default]
    WriteIfChanged,

    /// Write even when nothing changed
    ForceWrite,

    /// Never write this row
    Skip,
}

impl WriteDecision {
    pub fn should_write(&self, row: &Row) -> bool {
        match self {
            WriteDecision::WriteIfChanged => row.is_changed(),
            WriteDecision::ForceWrite => true,
            WriteDecision::Skip => false,
        }
    }
}

/// Configuration plus the per-row mutation hook.
pub trait Controller {
    /// Fresh configuration for one run.
    fn config(&self) -> ControllerConfig;

    /// Called by [`crate::Pipeline::begin`] before anything is opened.
    /// Controllers that count rows reset their counters here.
    fn begin_run(&mut self) {}

    /// Mutate `row` in place. The decoded values stay readable through
    /// [`Row::origin`].
    fn handle(&mut self, row: &mut Row) -> PipelineResult<WriteDecision>;

    /// One-line description shown by `--list`
    fn description(&self) -> String {
        String::new()
    }
}

/// Controller built from a configuration and a closure.
pub struct FnController<F> {
    config: ControllerConfig,
    hook: F,
}

impl<F> FnController<F>
where
    F: FnMut(&mut Row) -> PipelineResult<WriteDecision>,
{
    pub fn new(config: ControllerConfig, hook: F) -> Self {
        Self { config, hook }
    }
}

impl<F> Controller for FnController<F>
where
    F: FnMut(&mut Row) -> PipelineResult<WriteDecision>,
{
    fn config(&self) -> ControllerConfig {
        self.config.clone()
    }

    fn handle(&mut self, row: &mut Row) -> PipelineResult<WriteDecision> {
        (self.hook)(row)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_write_decision() {
        let mut row = Row::new(match json!({"A": 1}) {
            serde_json::Value::Object(map) => map,
            _ => unreachable!(),
        });

        assert!(!WriteDecision::WriteIfChanged.should_write(&row));
        assert!(WriteDecision::ForceWrite.should_write(&row));

        row.set("A", 2);
        assert!(WriteDecision::WriteIfChanged.should_write(&row));
        assert!(!WriteDecision::Skip.should_write(&row));
    }

    #[test]
    fn test_fn_controller() {
        let mut controller = FnController::new(ControllerConfig::new(), |row: &mut Row| {
            row.set("seen", true);
            Ok(WriteDecision::ForceWrite)
        });

        let mut row = Row::new(Default::default());
        assert_eq!(controller.handle(&mut row).unwrap(), WriteDecision::ForceWrite);
        assert_eq!(row.get("seen").unwrap(), &json!(true));
        assert_eq!(controller.config().input.name, "main");
    }
}
