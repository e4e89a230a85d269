use crate::fusion::{BufferSlots, analyze};
use crate::{
    CompletionOptions, FusionCache, FusionConfig, FusionDecision, InvalidStateError, KernelRecord,
    Reporter, WarningSink,
};
use std::sync::Arc;

/// Lifecycle of a [`FusionSession`].
///
/// `Resolved` and `Aborted` are transient: the session passes through them
/// and is back in `Idle` by the time `complete_fusion` or `cancel_fusion`
/// returns.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
pub enum SessionState {
    #[default]
    Idle,
    Accumulating,
    Resolved,
    Aborted,
}

/// The fusion state owned by one queue.
///
/// Callers must serialise access; the session does no locking of its own.
#[derive(Debug)]
pub struct FusionSession {
    state: SessionState,
    records: Vec<KernelRecord>,
    config: FusionConfig,
    reporter: Reporter,
    cache: Option<FusionCache>,
}

impl FusionSession {
    /// Creates an idle session reporting warnings to `sink`, filtered by
    /// `config.warning_level`. A private cache is created when caching is on.
    pub fn new(config: FusionConfig, sink: impl WarningSink + 'static) -> Self {
        Self {
            state: SessionState::Idle,
            records: Vec::new(),
            config,
            reporter: Reporter::new(config.warning_level, sink),
            cache: config.caching.then(FusionCache::new),
        }
    }

    /// Like [`FusionSession::new`], using the process-wide
    /// [`FusionConfig::global`].
    pub fn from_global(sink: impl WarningSink + 'static) -> Self {
        Self::new(FusionConfig::global(), sink)
    }

    /// Shares `cache` with other sessions. Ignored when caching is disabled.
    pub fn with_cache(mut self, cache: FusionCache) -> Self {
        if self.config.caching {
            self.cache = Some(cache);
        }
        self
    }

    pub fn state(&self) -> SessionState {
        self.state
    }

    pub fn config(&self) -> &FusionConfig {
        &self.config
    }

    pub fn cache(&self) -> Option<&FusionCache> {
        self.cache.as_ref()
    }

    pub fn is_in_fusion_mode(&self) -> bool {
        self.state == SessionState::Accumulating
    }

    /// Kernels recorded so far, in submission order.
    pub fn records(&self) -> &[KernelRecord] {
        &self.records
    }

    pub fn start_fusion(&mut self) -> Result<(), InvalidStateError> {
        self.expect(SessionState::Idle, "start fusion")?;
        self.transition(SessionState::Accumulating);
        Ok(())
    }

    /// Appends `record`, returning its submission position. Nothing is
    /// validated until completion.
    pub fn record(&mut self, record: KernelRecord) -> Result<usize, InvalidStateError> {
        self.expect(SessionState::Accumulating, "record a kernel")?;
        log::trace!("recording {} at {}", record.name(), self.records.len());
        self.records.push(record);
        Ok(self.records.len() - 1)
    }

    /// Validates and resolves everything recorded, reports the warnings, and
    /// returns the decision.
    pub fn complete_fusion(
        &mut self,
        options: CompletionOptions,
    ) -> Result<FusionDecision, InvalidStateError> {
        self.expect(SessionState::Accumulating, "complete fusion")?;
        let records = std::mem::take(&mut self.records);
        let slots = BufferSlots::of(&records);

        let resolution = match &self.cache {
            Some(cache) => cache.resolve(&records, &slots),
            None => Arc::new(analyze(&records, &slots)),
        };
        let (decision, warnings) = resolution.bind(&records, &slots, options);
        self.transition(SessionState::Resolved);

        let emitted = self.reporter.report(warnings);
        log::debug!(
            "fusion of {} kernels {} ({emitted} warnings emitted)",
            records.len(),
            if decision.is_fused() { "succeeded" } else { "fell back" },
        );

        self.transition(SessionState::Idle);
        Ok(decision)
    }

    /// Discards every recorded kernel without reporting anything. Returns the
    /// number of kernels discarded.
    pub fn cancel_fusion(&mut self) -> Result<usize, InvalidStateError> {
        self.expect(SessionState::Accumulating, "cancel fusion")?;
        let discarded = self.records.len();
        self.records.clear();
        self.transition(SessionState::Aborted);
        self.transition(SessionState::Idle);
        Ok(discarded)
    }

    fn expect(&self, state: SessionState, operation: &'static str) -> Result<(), InvalidStateError> {
        if self.state == state {
            Ok(())
        } else {
            Err(InvalidStateError {
                operation,
                state: self.state,
            })
        }
    }

    fn transition(&mut self, next: SessionState) {
        log::debug!("fusion session {:?} -> {:?}", self.state, next);
        self.state = next;
    }
}
