//! Single-pass read → transform → conditional-write driver.
//!
//! # Example
//!
//! ```rust,ignore
//! use csvmod::{execute, Location, RunOptions};
//!
//! let mut controller = registry.resolve("shipping")?;
//! let report = execute(
//!     controller.as_mut(),
//!     Location::file("in.csv"),
//!     Location::file("out.csv"),
//!     &RunOptions::default(),
//! )?;
//! println!("{}", report);
//! ```
//!
//! A [`Pipeline`] moves through `Idle → Opened → Streaming → Closed`.
//! Every file it opened is closed by [`Pipeline::finish`], by a failing
//! step, or at the latest when the pipeline is dropped.

use crate::config::{ControllerConfig, RunOptions};
use crate::controller::Controller;
use crate::error::{PipelineError, PipelineResult};
use crate::join::{JoinRegistry, JoinSet};
use crate::logs::{log_info, log_info_indent, log_success};
use crate::parser::Location;
use crate::statistics::{Statistics, StatisticsReport};
use crate::table::{TableReader, TableWriter};

/// Lifecycle position of a [`Pipeline`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PipelineState {
    Idle,
    Opened,
    Streaming,
    Closed,
}

impl PipelineState {
    pub fn as_str(&self) -> &'static str {
        match self {
            PipelineState::Idle => "idle",
            PipelineState::Opened => "opened",
            PipelineState::Streaming => "streaming",
            PipelineState::Closed => "closed",
        }
    }
}

pub struct Pipeline<'a> {
    controller: &'a mut dyn Controller,
    config: ControllerConfig,
    state: PipelineState,
    input: Option<TableReader>,
    output: Option<TableWriter>,
    joins: JoinRegistry,
    statistics: Statistics,
}

impl<'a> Pipeline<'a> {
    /// Pipeline over the controller's own configuration.
    pub fn new(controller: &'a mut dyn Controller) -> Self {
        let config = controller.config();
        Self::with_config(controller, config)
    }

    /// Pipeline over an adjusted configuration (locations, overrides).
    pub fn with_config(controller: &'a mut dyn Controller, config: ControllerConfig) -> Self {
        Self {
            controller,
            config,
            state: PipelineState::Idle,
            input: None,
            output: None,
            joins: JoinRegistry::new(),
            statistics: Statistics::new(),
        }
    }

    pub fn state(&self) -> PipelineState {
        self.state
    }

    pub fn statistics(&self) -> &Statistics {
        &self.statistics
    }

    /// Root joins, available once the pipeline is opened
    pub fn joins(&self) -> &JoinRegistry {
        &self.joins
    }

    fn expect_state(&self, operation: &'static str, allowed: &[PipelineState]) -> PipelineResult<()> {
        if allowed.contains(&self.state) {
            Ok(())
        } else {
            Err(PipelineError::InvalidState {
                operation,
                state: self.state.as_str(),
            })
        }
    }

    /// Open the input, check its header, open the output and every join.
    pub fn begin(&mut self) -> PipelineResult<()> {
        self.expect_state("begin", &[PipelineState::Idle])?;
        self.controller.begin_run();

        if let Err(e) = self.open() {
            let _ = self.release();
            self.state = PipelineState::Closed;
            return Err(e);
        }

        self.state = PipelineState::Opened;
        Ok(())
    }

    fn open(&mut self) -> PipelineResult<()> {
        self.joins = JoinSet::build(&self.config.joins, &self.config.input.joins)?;

        let input = TableReader::open(&self.config.input)?.with_joins(self.joins.clone());
        log_info(format!(
            "📄 Reading {}: {}",
            describe(&self.config.input.location),
            input.fields().join(", ")
        ));
        let fields = input.fields().to_vec();
        self.input = Some(input);

        let output = TableWriter::open(&self.config.output, &fields)?;
        log_info(format!(
            "📝 Writing {}: {}",
            describe(&self.config.output.location),
            output.columns().join(", ")
        ));
        self.output = Some(output);

        if !self.joins.is_empty() {
            log_info(format!("🔗 Opening {} join(s)", self.joins.len()));
        }
        self.joins.begin_all()
    }

    /// Stream every input record through the controller.
    pub fn run(&mut self) -> PipelineResult<()> {
        self.expect_state("run", &[PipelineState::Opened])?;
        self.state = PipelineState::Streaming;

        let result = self.stream();
        if result.is_err() {
            let _ = self.release();
            self.state = PipelineState::Closed;
        }
        result
    }

    fn stream(&mut self) -> PipelineResult<()> {
        let (Some(input), Some(output)) = (self.input.as_mut(), self.output.as_mut()) else {
            return Err(PipelineError::InvalidState {
                operation: "run",
                state: "unopened",
            });
        };

        while let Some(mut row) = input.next_row()? {
            let decision = self.controller.handle(&mut row)?;
            self.statistics.process(&row);

            if decision.should_write(&row) {
                output.write_row(&row)?;
                self.statistics.record_written();
            }
        }

        log_info(format!(
            "Read {} records, wrote {}",
            input.records_read(),
            output.written()
        ));
        Ok(())
    }

    /// Close everything and produce the report.
    pub fn finish(&mut self) -> PipelineResult<StatisticsReport> {
        self.expect_state("finish", &[PipelineState::Opened, PipelineState::Streaming])?;

        let metrics = self.joins.metrics();
        let released = self.release();
        self.state = PipelineState::Closed;
        released?;

        for (name, m) in &metrics {
            log_info_indent(format!("Join '{}': {}", name, m), 1);
        }

        let report = self.statistics.finish();
        log_success(format!("Finished, modified {} rows.", report.rows_changed));
        for (field, n) in &report.fields {
            log_info_indent(format!("{:6} {}", n, field), 1);
        }
        Ok(report)
    }

    /// Close input, output and joins. Every resource is closed even when
    /// one fails; the first failure is returned.
    fn release(&mut self) -> PipelineResult<()> {
        let mut first_error = None;

        if let Some(mut input) = self.input.take() {
            if let Err(e) = input.close() {
                first_error.get_or_insert(e);
            }
        }
        if let Some(mut output) = self.output.take() {
            if let Err(e) = output.close() {
                first_error.get_or_insert(e);
            }
        }
        if let Err(e) = self.joins.end_all() {
            first_error.get_or_insert(e);
        }

        match first_error {
            Some(e) => Err(e),
            None => Ok(()),
        }
    }
}

impl Drop for Pipeline<'_> {
    fn drop(&mut self) {
        if self.state != PipelineState::Closed {
            let _ = self.release();
        }
    }
}

fn describe(location: &Option<Location>) -> String {
    location
        .as_ref()
        .map(Location::describe)
        .unwrap_or_else(|| "<unset>".to_string())
}

/// Run `controller` from `input` to `output` with the given overrides.
pub fn execute(
    controller: &mut dyn Controller,
    input: Location,
    output: Location,
    options: &RunOptions,
) -> PipelineResult<StatisticsReport> {
    let mut config = controller.config();
    config.input.location = Some(input);
    config.output.location = Some(output);
    options.apply(&mut config);

    let mut pipeline = Pipeline::with_config(controller, config);
    pipeline.begin()?;
    pipeline.run()?;
    pipeline.finish()
}
