//! # Host executor
//!
//! A reference [`Executor`] that interprets kernels on the host over `i32`
//! buffers. Fused launches honour the plan's promotions: a promoted buffer
//! is backed by per-work-group (local) or per-work-item (private) storage
//! and is never written back to global memory. Reading promoted storage that
//! the launch has not written is an error, so a wrong promotion decision
//! shows up as a failed launch instead of silently stale data.

use crate::{BufferId, Executor, FusedPlan, HashMap, Internalization, KernelName, KernelPlan, NdRange};
use anyhow::{Context, anyhow};
use std::sync::Arc;

/// Position of one work-item in a launch.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct WorkItem {
    /// Row-major linear id within the global range.
    pub global_id: usize,
    /// Linear id within the work-group.
    pub local_id: usize,
    pub group_id: usize,
}

/// Memory as seen by a running work-item.
pub trait Accessor {
    fn read(&mut self, buffer: BufferId, index: usize) -> anyhow::Result<i32>;
    fn write(&mut self, buffer: BufferId, index: usize, value: i32) -> anyhow::Result<()>;
}

type KernelFn = dyn Fn(WorkItem, &mut dyn Accessor) -> anyhow::Result<()> + Send + Sync;

/// A kernel body, run once per work-item.
#[derive(Clone)]
pub struct HostKernel(Arc<KernelFn>);

impl HostKernel {
    pub fn new(
        body: impl Fn(WorkItem, &mut dyn Accessor) -> anyhow::Result<()> + Send + Sync + 'static,
    ) -> Self {
        Self(Arc::new(body))
    }

    fn run(&self, item: WorkItem, memory: &mut dyn Accessor) -> anyhow::Result<()> {
        (self.0)(item, memory)
    }
}

impl std::fmt::Debug for HostKernel {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str("HostKernel")
    }
}

/// One launch as observed by the executor.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Launch {
    pub kernels: Vec<KernelName>,
    pub fused: bool,
}

#[derive(Debug, Default)]
pub struct HostExecutor {
    buffers: HashMap<BufferId, Vec<i32>>,
    launches: Vec<Launch>,
}

impl HostExecutor {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn create_buffer(&mut self, data: Vec<i32>) -> BufferId {
        let id = BufferId::new();
        self.buffers.insert(id, data);
        id
    }

    pub fn buffer(&self, id: BufferId) -> Option<&[i32]> {
        self.buffers.get(&id).map(Vec::as_slice)
    }

    pub fn buffer_mut(&mut self, id: BufferId) -> Option<&mut Vec<i32>> {
        self.buffers.get_mut(&id)
    }

    pub fn launches(&self) -> &[Launch] {
        &self.launches
    }

    pub fn clear_launches(&mut self) {
        self.launches.clear();
    }
}

impl Executor for HostExecutor {
    type Kernel = HostKernel;

    fn execute(&mut self, plan: &KernelPlan, kernel: &HostKernel) -> anyhow::Result<()> {
        log::trace!("host launch of {}", plan.kernel);
        let mut memory = GlobalMemory(&mut self.buffers);
        for_each_item(&plan.nd_range, |item| kernel.run(item, &mut memory))
            .with_context(|| format!("Kernel {} failed", plan.kernel))?;
        self.launches.push(Launch {
            kernels: vec![plan.kernel.clone()],
            fused: false,
        });
        Ok(())
    }

    fn execute_fused(&mut self, plan: &FusedPlan, kernels: &[&HostKernel]) -> anyhow::Result<()> {
        if kernels.len() != plan.stages.len() {
            return Err(anyhow!(
                "Fused plan has {} stages but {} kernels were supplied",
                plan.stages.len(),
                kernels.len()
            ));
        }
        log::trace!(
            "host fused launch of {} stages, barriers: {}",
            kernels.len(),
            plan.barriers
        );

        let mut memory = FusedMemory {
            global: &mut self.buffers,
            plan,
            local: HashMap::default(),
            private: HashMap::default(),
            local_id: 0,
        };

        for (group_id, group) in plan.nd_range.work_groups().into_iter().enumerate() {
            memory.local.clear();
            memory.private.clear();
            let items = group.iter().enumerate().map(|(local_id, &global_id)| WorkItem {
                global_id,
                local_id,
                group_id,
            });

            if plan.barriers {
                // Every item finishes a stage before any item starts the next.
                for (stage, kernel) in plan.stages.iter().zip(kernels) {
                    for item in items.clone() {
                        memory.local_id = item.local_id;
                        kernel
                            .run(item, &mut memory)
                            .with_context(|| format!("Fused stage {} failed", stage.kernel))?;
                    }
                }
            } else {
                for item in items {
                    memory.local_id = item.local_id;
                    for (stage, kernel) in plan.stages.iter().zip(kernels) {
                        kernel
                            .run(item, &mut memory)
                            .with_context(|| format!("Fused stage {} failed", stage.kernel))?;
                    }
                }
            }
        }

        self.launches.push(Launch {
            kernels: plan.stages.iter().map(|s| s.kernel.clone()).collect(),
            fused: true,
        });
        Ok(())
    }
}

fn for_each_item(
    nd_range: &NdRange,
    mut f: impl FnMut(WorkItem) -> anyhow::Result<()>,
) -> anyhow::Result<()> {
    for (group_id, group) in nd_range.work_groups().into_iter().enumerate() {
        for (local_id, global_id) in group.into_iter().enumerate() {
            f(WorkItem {
                global_id,
                local_id,
                group_id,
            })?;
        }
    }
    Ok(())
}

struct GlobalMemory<'a>(&'a mut HashMap<BufferId, Vec<i32>>);

impl Accessor for GlobalMemory<'_> {
    fn read(&mut self, buffer: BufferId, index: usize) -> anyhow::Result<i32> {
        read_global(self.0, buffer, index)
    }

    fn write(&mut self, buffer: BufferId, index: usize, value: i32) -> anyhow::Result<()> {
        write_global(self.0, buffer, index, value)
    }
}

struct FusedMemory<'a> {
    global: &'a mut HashMap<BufferId, Vec<i32>>,
    plan: &'a FusedPlan,
    local: HashMap<(BufferId, usize), i32>,
    private: HashMap<(usize, BufferId, usize), i32>,
    local_id: usize,
}

impl Accessor for FusedMemory<'_> {
    fn read(&mut self, buffer: BufferId, index: usize) -> anyhow::Result<i32> {
        match self.plan.promotion(buffer) {
            Internalization::None => read_global(self.global, buffer, index),
            Internalization::Local => self.local.get(&(buffer, index)).copied().ok_or_else(|| {
                anyhow!("Read of unwritten local memory {buffer:?}[{index}]")
            }),
            Internalization::Private => self
                .private
                .get(&(self.local_id, buffer, index))
                .copied()
                .ok_or_else(|| anyhow!("Read of unwritten private memory {buffer:?}[{index}]")),
        }
    }

    fn write(&mut self, buffer: BufferId, index: usize, value: i32) -> anyhow::Result<()> {
        match self.plan.promotion(buffer) {
            Internalization::None => write_global(self.global, buffer, index, value)?,
            Internalization::Local => {
                self.local.insert((buffer, index), value);
            }
            Internalization::Private => {
                self.private.insert((self.local_id, buffer, index), value);
            }
        }
        Ok(())
    }
}

fn read_global(
    buffers: &HashMap<BufferId, Vec<i32>>,
    buffer: BufferId,
    index: usize,
) -> anyhow::Result<i32> {
    buffers
        .get(&buffer)
        .ok_or_else(|| anyhow!("Unknown buffer {buffer:?}"))?
        .get(index)
        .copied()
        .ok_or_else(|| anyhow!("Index {index} out of bounds for {buffer:?}"))
}

fn write_global(
    buffers: &mut HashMap<BufferId, Vec<i32>>,
    buffer: BufferId,
    index: usize,
    value: i32,
) -> anyhow::Result<()> {
    let slot = buffers
        .get_mut(&buffer)
        .ok_or_else(|| anyhow!("Unknown buffer {buffer:?}"))?
        .get_mut(index)
        .ok_or_else(|| anyhow!("Index {index} out of bounds for {buffer:?}"))?;
    *slot = value;
    Ok(())
}
