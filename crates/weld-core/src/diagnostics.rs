use crate::fusion::{DowngradeCause, Infeasibility, PromotionWarning};
use crate::{BufferId, Internalization, KernelName, RVec};
use derive_new::new;
use parking_lot::Mutex;
use std::io::Write;
use std::sync::Arc;

/// Stable category of a [`Warning`], for tooling that matches on it.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Category {
    DimensionMismatch,
    GlobalSizeMismatch,
    LocalSizeMismatch,
    PromotionConflict,
    PromotionSizeMissing,
    PromotionDowngrade,
}

impl Category {
    pub fn as_str(&self) -> &'static str {
        match self {
            Category::DimensionMismatch => "dimension-mismatch",
            Category::GlobalSizeMismatch => "global-size-mismatch",
            Category::LocalSizeMismatch => "local-size-mismatch",
            Category::PromotionConflict => "promotion-conflict",
            Category::PromotionSizeMissing => "promotion-size-missing",
            Category::PromotionDowngrade => "promotion-downgrade",
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum WarningKind {
    FusionAborted(Infeasibility),
    Promotion(PromotionWarning),
}

impl WarningKind {
    pub fn category(&self) -> Category {
        match self {
            WarningKind::FusionAborted(Infeasibility::DimensionMismatch) => {
                Category::DimensionMismatch
            }
            WarningKind::FusionAborted(Infeasibility::GlobalSizeMismatch) => {
                Category::GlobalSizeMismatch
            }
            WarningKind::FusionAborted(Infeasibility::LocalSizeMismatch)
            | WarningKind::Promotion(PromotionWarning::SizeMismatch) => Category::LocalSizeMismatch,
            WarningKind::Promotion(PromotionWarning::Conflict { .. }) => Category::PromotionConflict,
            WarningKind::Promotion(PromotionWarning::SizeMissing) => Category::PromotionSizeMissing,
            WarningKind::Promotion(PromotionWarning::Downgrade(_)) => Category::PromotionDowngrade,
        }
    }

    pub fn message(&self) -> String {
        match self {
            WarningKind::FusionAborted(reason) => reason.message().to_string(),
            WarningKind::Promotion(warning) => warning.message(),
        }
    }

    pub fn conflict(skipped: Internalization) -> Self {
        WarningKind::Promotion(PromotionWarning::Conflict { skipped })
    }

    pub fn downgrade(cause: DowngradeCause) -> Self {
        WarningKind::Promotion(PromotionWarning::Downgrade(cause))
    }
}

/// A fallback taken while resolving a fusion session.
#[derive(Debug, Clone, PartialEq, Eq, new)]
pub struct Warning {
    pub kind: WarningKind,
    /// Kernels involved, in submission order.
    pub kernels: RVec<KernelName>,
    /// The buffer, for promotion warnings.
    pub buffer: Option<BufferId>,
}

impl Warning {
    /// Verbosity at which fallback warnings are shown.
    pub const LEVEL: u32 = 1;

    pub fn level(&self) -> u32 {
        Self::LEVEL
    }

    pub fn category(&self) -> Category {
        self.kind.category()
    }

    pub fn message(&self) -> String {
        self.kind.message()
    }
}

impl std::fmt::Display for Warning {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "WARNING: {}", self.message())
    }
}

/// Destination of emitted warnings.
pub trait WarningSink: Send {
    fn emit(&mut self, warning: &Warning);
}

/// Writes each warning as one `WARNING: ...` line.
pub struct StreamSink<W: Write + Send> {
    writer: W,
}

impl<W: Write + Send> StreamSink<W> {
    pub fn new(writer: W) -> Self {
        Self { writer }
    }

    pub fn into_inner(self) -> W {
        self.writer
    }
}

impl<W: Write + Send> WarningSink for StreamSink<W> {
    fn emit(&mut self, warning: &Warning) {
        if let Err(e) = writeln!(self.writer, "{warning}").and_then(|_| self.writer.flush()) {
            log::error!("Failed to write warning {:?}: {e}", warning.category());
        }
    }
}

/// Forwards warnings to the `log` facade.
#[derive(Debug, Clone, Copy, Default)]
pub struct LogSink;

impl WarningSink for LogSink {
    fn emit(&mut self, warning: &Warning) {
        log::warn!(
            target: "weld::fusion",
            "[{}] {} (kernels: {:?}, buffer: {:?})",
            warning.category().as_str(),
            warning.message(),
            warning.kernels,
            warning.buffer
        );
    }
}

/// Keeps warnings in memory. Clones share the same list.
#[derive(Debug, Clone, Default)]
pub struct MemorySink(Arc<Mutex<Vec<Warning>>>);

impl MemorySink {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn warnings(&self) -> Vec<Warning> {
        self.0.lock().clone()
    }

    pub fn lines(&self) -> Vec<String> {
        self.0.lock().iter().map(ToString::to_string).collect()
    }

    /// Drains the collected warnings.
    pub fn take(&self) -> Vec<Warning> {
        std::mem::take(&mut *self.0.lock())
    }
}

impl WarningSink for MemorySink {
    fn emit(&mut self, warning: &Warning) {
        self.0.lock().push(warning.clone());
    }
}

/// Emits warnings at or below the configured verbosity, in order.
pub struct Reporter {
    threshold: u32,
    sink: Box<dyn WarningSink>,
}

impl Reporter {
    pub fn new(threshold: u32, sink: impl WarningSink + 'static) -> Self {
        Self {
            threshold,
            sink: Box::new(sink),
        }
    }

    /// A reporter that never emits.
    pub fn silent() -> Self {
        Self::new(0, LogSink)
    }

    pub fn threshold(&self) -> u32 {
        self.threshold
    }

    /// Emits `warnings` and returns how many passed the threshold.
    pub fn report(&mut self, warnings: Vec<Warning>) -> usize {
        let mut emitted = 0;
        for warning in warnings {
            if warning.level() <= self.threshold {
                self.sink.emit(&warning);
                emitted += 1;
            } else {
                log::debug!("suppressed: {}", warning.message());
            }
        }
        emitted
    }
}

impl std::fmt::Debug for Reporter {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Reporter")
            .field("threshold", &self.threshold)
            .finish_non_exhaustive()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn warning(kind: WarningKind) -> Warning {
        Warning::new(kind, rvec![KernelName::new("Kernel1")], None)
    }

    #[test]
    fn test_display_format() {
        let w = warning(WarningKind::FusionAborted(Infeasibility::DimensionMismatch));
        assert_eq!(
            w.to_string(),
            "WARNING: Cannot fuse kernels with different dimensionality"
        );
        assert_eq!(w.category().as_str(), "dimension-mismatch");
    }

    #[test]
    fn test_categories() {
        assert_eq!(
            WarningKind::Promotion(PromotionWarning::SizeMismatch).category(),
            Category::LocalSizeMismatch
        );
        assert_eq!(
            WarningKind::conflict(Internalization::Private).category(),
            Category::PromotionConflict
        );
        assert_eq!(
            WarningKind::downgrade(DowngradeCause::ThisLocal).category(),
            Category::PromotionDowngrade
        );
    }

    #[test]
    fn test_threshold_gates_emission() {
        let sink = MemorySink::new();
        let mut silent = Reporter::new(0, sink.clone());
        let ws = vec![warning(WarningKind::FusionAborted(
            Infeasibility::GlobalSizeMismatch,
        ))];
        assert_eq!(silent.report(ws.clone()), 0);
        assert!(sink.warnings().is_empty());

        let mut loud = Reporter::new(1, sink.clone());
        assert_eq!(loud.report(ws), 1);
        assert_eq!(
            sink.lines(),
            vec!["WARNING: Cannot fuse kernels with different global size"]
        );
    }

    #[test]
    fn test_silent_reporter_never_emits() {
        let mut reporter = Reporter::silent();
        assert_eq!(reporter.threshold(), 0);
        let ws = vec![
            warning(WarningKind::FusionAborted(Infeasibility::LocalSizeMismatch)),
            warning(WarningKind::Promotion(PromotionWarning::SizeMismatch)),
        ];
        assert_eq!(reporter.report(ws), 0);
        assert_eq!(Reporter::new(Warning::LEVEL, LogSink).threshold(), 1);
    }

    #[test]
    fn test_log_sink_counts_as_emitted() {
        let _ = env_logger::builder().is_test(true).try_init();
        let mut reporter = Reporter::new(1, LogSink);
        let ws = vec![warning(WarningKind::conflict(Internalization::Private))];
        assert_eq!(reporter.report(ws), 1);
    }

    #[test]
    fn test_memory_sink_take_drains() {
        let sink = MemorySink::new();
        let mut reporter = Reporter::new(1, sink.clone());
        reporter.report(vec![warning(WarningKind::Promotion(
            PromotionWarning::SizeMissing,
        ))]);
        let taken = sink.take();
        assert_eq!(taken.len(), 1);
        assert_eq!(taken[0].category(), Category::PromotionSizeMissing);
        assert!(sink.warnings().is_empty());

        reporter.report(vec![warning(WarningKind::FusionAborted(
            Infeasibility::DimensionMismatch,
        ))]);
        assert_eq!(sink.take().len(), 1);
    }

    #[test]
    fn test_stream_sink_writes_lines_in_order() {
        let mut sink = StreamSink::new(Vec::new());
        sink.emit(&warning(WarningKind::Promotion(PromotionWarning::SizeMissing)));
        sink.emit(&warning(WarningKind::conflict(Internalization::Local)));
        let text = String::from_utf8(sink.into_inner()).unwrap();
        let lines: Vec<_> = text.lines().collect();
        assert_eq!(lines.len(), 2);
        assert_eq!(
            lines[0],
            "WARNING: Work-group size for local promotion not specified, not performing \
             internalization"
        );
        assert!(lines[1].starts_with("WARNING: Not performing specified local promotion"));
    }
}
