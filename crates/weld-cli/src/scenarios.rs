//! The fallback scenarios: each one fuses a producer `tmp = in1 + in2` with a
//! consumer `out = tmp * in3` and reports whether the results are still
//! correct after whatever fallback the fusion engine took.

use parking_lot::Mutex;
use std::io::Write;
use std::sync::Arc;
use weld::fusion::CacheStats;
use weld::host::{HostExecutor, HostKernel};
use weld::{
    BufferId, CompletionOptions, FusionCache, FusionConfig, FusionQueue, FusionSession,
    Internalization, KernelDescriptor, KernelRecord, LogSink, NdRange, Range, StreamSink,
};

pub const DATA_SIZE: usize = 512;

/// A writer shared between scenario output and the warning sink, so both end
/// up interleaved in emission order.
pub struct SharedOutput<W>(Arc<Mutex<W>>);

impl<W> Clone for SharedOutput<W> {
    fn clone(&self) -> Self {
        Self(self.0.clone())
    }
}

impl<W: Write> Write for SharedOutput<W> {
    fn write(&mut self, buf: &[u8]) -> std::io::Result<usize> {
        self.0.lock().write(buf)
    }

    fn flush(&mut self) -> std::io::Result<()> {
        self.0.lock().flush()
    }
}

#[derive(Clone, Copy)]
struct Buffers {
    in1: BufferId,
    in2: BufferId,
    in3: BufferId,
    tmp: BufferId,
    out: BufferId,
}

impl Buffers {
    fn create(exec: &mut HostExecutor) -> Self {
        let init = |scale: i32| (0..DATA_SIZE as i32).map(|i| i * scale).collect();
        Self {
            in1: exec.create_buffer(init(2)),
            in2: exec.create_buffer(init(3)),
            in3: exec.create_buffer(init(4)),
            tmp: exec.create_buffer(vec![-1; DATA_SIZE]),
            out: exec.create_buffer(vec![-1; DATA_SIZE]),
        }
    }

    fn producer(&self) -> HostKernel {
        let Buffers { in1, in2, tmp, .. } = *self;
        HostKernel::new(move |item, mem| {
            let i = item.global_id;
            let v = mem.read(in1, i)? + mem.read(in2, i)?;
            mem.write(tmp, i, v)
        })
    }

    fn consumer(&self) -> HostKernel {
        let Buffers { tmp, in3, out, .. } = *self;
        HostKernel::new(move |item, mem| {
            let i = item.global_id;
            let v = mem.read(tmp, i)? * mem.read(in3, i)?;
            mem.write(out, i, v)
        })
    }
}

/// How a scenario's results turned out.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Verdict {
    Ok,
    ComputationError,
    WrongInternalization,
}

impl std::fmt::Display for Verdict {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(match self {
            Verdict::Ok => "COMPUTATION OK",
            Verdict::ComputationError => "COMPUTATION ERROR",
            Verdict::WrongInternalization => "WRONG INTERNALIZATION",
        })
    }
}

struct Promotion {
    level: Internalization,
    local: usize,
}

const fn promote(level: Internalization, local: usize) -> Promotion {
    Promotion { level, local }
}

/// Label, first kernel, second kernel, and whether `tmp` is expected to stay
/// on-chip.
const INTERNALIZATION_SCENARIOS: [(&str, Promotion, Promotion, bool); 6] = [
    (
        "None, Local(0)",
        promote(Internalization::None, 0),
        promote(Internalization::Local, 0),
        false,
    ),
    (
        "None, Private",
        promote(Internalization::None, 0),
        promote(Internalization::Private, 0),
        false,
    ),
    (
        "Local(8), Local(0)",
        promote(Internalization::Local, 8),
        promote(Internalization::Local, 0),
        false,
    ),
    (
        "Local(0), Local(8)",
        promote(Internalization::Local, 0),
        promote(Internalization::Local, 8),
        false,
    ),
    (
        "Local(8), Local(16)",
        promote(Internalization::Local, 8),
        promote(Internalization::Local, 16),
        false,
    ),
    (
        "Local(8), Private(8)",
        promote(Internalization::Local, 8),
        promote(Internalization::Private, 8),
        true,
    ),
];

pub struct ScenarioRunner<W: Write + Send + 'static> {
    out: SharedOutput<W>,
    config: FusionConfig,
    cache: FusionCache,
    log_warnings: bool,
}

impl<W: Write + Send + 'static> ScenarioRunner<W> {
    pub fn new(writer: W, config: FusionConfig) -> Self {
        Self {
            out: SharedOutput(Arc::new(Mutex::new(writer))),
            config,
            cache: FusionCache::new(),
            log_warnings: false,
        }
    }

    /// Runs with the process-wide [`FusionConfig::global`].
    pub fn from_global(writer: W) -> Self {
        Self::new(writer, FusionConfig::global())
    }

    /// Sends warnings to the `log` facade instead of the output stream.
    pub fn with_log_warnings(mut self, log_warnings: bool) -> Self {
        self.log_warnings = log_warnings;
        self
    }

    /// Statistics of the cache shared by every scenario, if caching is on.
    pub fn cache_stats(&self) -> Option<CacheStats> {
        self.config.caching.then(|| self.cache.stats())
    }

    fn queue(&self) -> FusionQueue<HostExecutor> {
        let session = if self.log_warnings {
            FusionSession::new(self.config, LogSink)
        } else {
            FusionSession::new(self.config, StreamSink::new(self.out.clone()))
        };
        let session = session.with_cache(self.cache.clone());
        FusionQueue::new(HostExecutor::new(), session)
    }

    /// Promotion requests that conflict, lack a work-group size, or disagree
    /// on it.
    pub fn abort_internalization(&mut self) -> anyhow::Result<Vec<Verdict>> {
        let mut verdicts = Vec::with_capacity(INTERNALIZATION_SCENARIOS.len());
        for (label, first, second, expect_internalization) in &INTERNALIZATION_SCENARIOS {
            writeln!(self.out, "{label}")?;
            let verdict = self.run_internalization(first, second, *expect_internalization)?;
            writeln!(self.out, "{verdict}")?;
            verdicts.push(verdict);
        }
        Ok(verdicts)
    }

    fn run_internalization(
        &self,
        first: &Promotion,
        second: &Promotion,
        expect_internalization: bool,
    ) -> anyhow::Result<Verdict> {
        let mut queue = self.queue();
        let buffers = Buffers::create(queue.executor_mut());
        let nd_range = |local: usize| -> anyhow::Result<NdRange> {
            let global = Range::linear(DATA_SIZE)?;
            Ok(match local {
                0 => NdRange::global_only(global),
                local => NdRange::new(global, Range::linear(local)?)?,
            })
        };

        queue.start_fusion()?;
        let name = if first.local > 0 { "Kernel1" } else { "KernelOne" };
        let record = KernelRecord::builder(name, nd_range(first.local)?)
            .access(buffers.in1)
            .access(buffers.in2)
            .request(buffers.tmp, first.level)
            .build();
        queue.submit(KernelDescriptor::new(record, buffers.producer()))?;

        let name = if second.local > 0 { "Kernel2" } else { "KernelTwo" };
        let record = KernelRecord::builder(name, nd_range(second.local)?)
            .request(buffers.tmp, second.level)
            .access(buffers.in3)
            .access(buffers.out)
            .build();
        queue.submit(KernelDescriptor::new(record, buffers.consumer()))?;

        queue.complete_fusion(CompletionOptions::default().with_no_barriers())?;
        anyhow::ensure!(
            !queue.is_in_fusion_mode(),
            "Queue should not be in fusion mode anymore"
        );

        check(queue.executor(), &buffers, DATA_SIZE, expect_internalization)
    }

    /// Geometry that rules out fusion: rank, global size, local size.
    pub fn abort_fusion(&mut self) -> anyhow::Result<Vec<Verdict>> {
        let scenarios = [
            (("Kernel1_1", "Kernel2_1"), Range::new(&[32, 16])?, Range::new(&[1, 8])?),
            (("Kernel1_2", "Kernel2_2"), Range::linear(256)?, Range::linear(8)?),
            (("Kernel1_3", "Kernel2_3"), Range::linear(DATA_SIZE)?, Range::linear(16)?),
        ];
        let mut verdicts = Vec::with_capacity(scenarios.len());
        for ((first, second), global, local) in scenarios {
            let verdict = self.run_geometry(first, second, global, local)?;
            writeln!(self.out, "{verdict}")?;
            verdicts.push(verdict);
        }
        Ok(verdicts)
    }

    fn run_geometry(
        &self,
        first: &str,
        second: &str,
        global: Range,
        local: Range,
    ) -> anyhow::Result<Verdict> {
        let mut queue = self.queue();
        let buffers = Buffers::create(queue.executor_mut());
        let checked = global.size();

        queue.start_fusion()?;
        let record = KernelRecord::builder(first, NdRange::new(global, local)?)
            .access(buffers.in1)
            .access(buffers.in2)
            .access(buffers.tmp)
            .build();
        queue.submit(KernelDescriptor::new(record, buffers.producer()))?;

        let consumer_range = NdRange::new(Range::linear(DATA_SIZE)?, Range::linear(8)?)?;
        let record = KernelRecord::builder(second, consumer_range)
            .access(buffers.tmp)
            .access(buffers.in3)
            .access(buffers.out)
            .build();
        queue.submit(KernelDescriptor::new(record, buffers.consumer()))?;

        queue.complete_fusion(CompletionOptions::default().with_no_barriers())?;
        check(queue.executor(), &buffers, checked, true)
    }
}

fn check(
    exec: &HostExecutor,
    buffers: &Buffers,
    len: usize,
    expect_internalization: bool,
) -> anyhow::Result<Verdict> {
    let out = exec
        .buffer(buffers.out)
        .ok_or_else(|| anyhow::anyhow!("Output buffer {:?} is gone", buffers.out))?;
    let tmp = exec
        .buffer(buffers.tmp)
        .ok_or_else(|| anyhow::anyhow!("Temporary buffer {:?} is gone", buffers.tmp))?;

    let errors = (0..len)
        .filter(|&i| out.get(i).map(|&v| i64::from(v)) != Some(20 * (i * i) as i64))
        .count();
    let internalized = tmp.iter().take(len).filter(|&&v| v == -1).count();
    log::debug!("{errors} errors, {internalized} internalized elements");

    Ok(if errors > 0 {
        Verdict::ComputationError
    } else if !expect_internalization && internalized > 0 {
        Verdict::WrongInternalization
    } else {
        Verdict::Ok
    })
}
