use crate::{
    CompletionOptions, FusedPlan, FusionDecision, FusionSession, KernelPlan, KernelRecord,
    QueueError,
};
use derive_new::new;

/// Runs kernels on behalf of a [`FusionQueue`].
///
/// The queue hands over plans exactly as decided: either every kernel on
/// its own in submission order, or all of them as one fused launch.
pub trait Executor {
    type Kernel;

    fn execute(&mut self, plan: &KernelPlan, kernel: &Self::Kernel) -> anyhow::Result<()>;

    /// `kernels[i]` is the kernel of `plan.stages[i]`.
    fn execute_fused(&mut self, plan: &FusedPlan, kernels: &[&Self::Kernel]) -> anyhow::Result<()>;
}

/// A kernel as submitted to a queue: what the analysis sees, and what the
/// executor runs.
#[derive(Debug, Clone, new)]
pub struct KernelDescriptor<K> {
    pub record: KernelRecord,
    pub kernel: K,
}

/// An in-order queue with a fusion mode.
///
/// Outside fusion mode every submission executes immediately. Inside it,
/// submissions are only recorded until [`FusionQueue::complete_fusion`] or
/// [`FusionQueue::cancel_fusion`].
pub struct FusionQueue<E: Executor> {
    executor: E,
    session: FusionSession,
    pending: Vec<E::Kernel>,
}

impl<E: Executor> FusionQueue<E> {
    pub fn new(executor: E, session: FusionSession) -> Self {
        Self {
            executor,
            session,
            pending: Vec::new(),
        }
    }

    pub fn executor(&self) -> &E {
        &self.executor
    }

    pub fn executor_mut(&mut self) -> &mut E {
        &mut self.executor
    }

    pub fn session(&self) -> &FusionSession {
        &self.session
    }

    pub fn into_executor(self) -> E {
        self.executor
    }

    pub fn is_in_fusion_mode(&self) -> bool {
        self.session.is_in_fusion_mode()
    }

    pub fn start_fusion(&mut self) -> Result<(), QueueError> {
        self.session.start_fusion()?;
        Ok(())
    }

    pub fn submit(&mut self, descriptor: KernelDescriptor<E::Kernel>) -> Result<(), QueueError> {
        let KernelDescriptor { record, kernel } = descriptor;
        if self.session.is_in_fusion_mode() {
            self.session.record(record)?;
            self.pending.push(kernel);
            return Ok(());
        }
        let plan = KernelPlan::new(record.name().clone(), 0, record.nd_range().clone());
        self.executor.execute(&plan, &kernel)?;
        Ok(())
    }

    /// Decides how the recorded kernels run, reports every fallback, then
    /// dispatches them.
    pub fn complete_fusion(
        &mut self,
        options: CompletionOptions,
    ) -> Result<FusionDecision, QueueError> {
        let decision = self.session.complete_fusion(options)?;
        let kernels = std::mem::take(&mut self.pending);
        self.dispatch(&decision, &kernels)?;
        Ok(decision)
    }

    /// Drops every recorded kernel unexecuted.
    pub fn cancel_fusion(&mut self) -> Result<usize, QueueError> {
        let discarded = self.session.cancel_fusion()?;
        self.pending.clear();
        Ok(discarded)
    }

    fn dispatch(&mut self, decision: &FusionDecision, kernels: &[E::Kernel]) -> anyhow::Result<()> {
        let lookup = |plan: &KernelPlan| {
            kernels.get(plan.position).ok_or_else(|| {
                anyhow::anyhow!(
                    "No kernel submitted at position {} for {}",
                    plan.position,
                    plan.kernel
                )
            })
        };

        match decision {
            FusionDecision::Fused { plan, .. } => {
                let stages = plan.stages.iter().map(lookup).collect::<anyhow::Result<Vec<_>>>()?;
                log::debug!("dispatching {} kernels as one launch", stages.len());
                self.executor.execute_fused(plan, &stages)
            }
            FusionDecision::Unfused { plans, .. } => {
                for plan in plans {
                    self.executor.execute(plan, lookup(plan)?)?;
                }
                Ok(())
            }
        }
    }
}
