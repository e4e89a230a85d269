use weld::host::{HostExecutor, HostKernel};
use weld::{
    BufferId, CompletionOptions, FusionConfig, FusionDecision, FusionQueue, FusionSession,
    Internalization, KernelDescriptor, KernelRecord, MemorySink, NdRange, Range,
};

const DATA_SIZE: usize = 512;

struct Run {
    lines: Vec<String>,
    decision: FusionDecision,
    tmp: Vec<i32>,
    out: Vec<i32>,
}

fn nd_range(local: usize) -> anyhow::Result<NdRange> {
    let global = Range::linear(DATA_SIZE)?;
    Ok(if local > 0 {
        NdRange::new(global, Range::linear(local)?)?
    } else {
        NdRange::global_only(global)
    })
}

fn perform_fusion(
    first: (Internalization, usize),
    second: (Internalization, usize),
) -> anyhow::Result<Run> {
    let mut exec = HostExecutor::new();
    let init = |f: fn(i32) -> i32| (0..DATA_SIZE as i32).map(f).collect::<Vec<_>>();
    let in1 = exec.create_buffer(init(|i| i * 2));
    let in2 = exec.create_buffer(init(|i| i * 3));
    let in3 = exec.create_buffer(init(|i| i * 4));
    let tmp = exec.create_buffer(vec![-1; DATA_SIZE]);
    let out = exec.create_buffer(vec![-1; DATA_SIZE]);

    let sink = MemorySink::new();
    let config = FusionConfig::default()
        .with_warning_level(1)
        .with_caching(false);
    let mut queue = FusionQueue::new(exec, FusionSession::new(config, sink.clone()));

    queue.start_fusion()?;
    assert!(queue.is_in_fusion_mode());

    let name = if first.1 > 0 { "Kernel1" } else { "KernelOne" };
    let record = KernelRecord::builder(name, nd_range(first.1)?)
        .access(in1)
        .access(in2)
        .request(tmp, first.0)
        .build();
    queue.submit(KernelDescriptor::new(record, add(in1, in2, tmp)))?;

    let name = if second.1 > 0 { "Kernel2" } else { "KernelTwo" };
    let record = KernelRecord::builder(name, nd_range(second.1)?)
        .request(tmp, second.0)
        .access(in3)
        .access(out)
        .build();
    queue.submit(KernelDescriptor::new(record, mul(tmp, in3, out)))?;

    let decision = queue.complete_fusion(CompletionOptions::default().with_no_barriers())?;
    assert!(!queue.is_in_fusion_mode());

    let exec = queue.executor();
    Ok(Run {
        lines: sink.lines(),
        decision,
        tmp: exec.buffer(tmp).unwrap_or_default().to_vec(),
        out: exec.buffer(out).unwrap_or_default().to_vec(),
    })
}

fn add(a: BufferId, b: BufferId, dst: BufferId) -> HostKernel {
    HostKernel::new(move |item, mem| {
        let i = item.global_id;
        let v = mem.read(a, i)? + mem.read(b, i)?;
        mem.write(dst, i, v)
    })
}

fn mul(a: BufferId, b: BufferId, dst: BufferId) -> HostKernel {
    HostKernel::new(move |item, mem| {
        let i = item.global_id;
        let v = mem.read(a, i)? * mem.read(b, i)?;
        mem.write(dst, i, v)
    })
}

impl Run {
    fn computation_ok(&self) -> bool {
        self.out
            .iter()
            .enumerate()
            .all(|(i, &v)| v as i64 == 20 * (i * i) as i64)
    }

    fn internalized(&self) -> usize {
        self.tmp.iter().filter(|&&v| v == -1).count()
    }
}

const CONFLICT_LOCAL: &str = "WARNING: Not performing specified local promotion, due to previous \
                              mismatch or because previous accessor specified no promotion";
const CONFLICT_PRIVATE: &str = "WARNING: Not performing specified private promotion, due to \
                                previous mismatch or because previous accessor specified no \
                                promotion";
const SIZE_MISSING: &str =
    "WARNING: Work-group size for local promotion not specified, not performing internalization";
const SIZE_MISMATCH: &str =
    "WARNING: Not performing specified local promotion due to work-group size mismatch";
const LOCAL_SIZE: &str = "WARNING: Cannot fuse kernels with different local size";
const DOWNGRADE: &str = "WARNING: Performing local internalization instead, because previous \
                         accessor specified local promotion";

#[test]
fn test_none_then_local() -> anyhow::Result<()> {
    let _ = env_logger::builder().is_test(true).try_init();
    let run = perform_fusion((Internalization::None, 0), (Internalization::Local, 0))?;
    assert_eq!(run.lines, vec![CONFLICT_LOCAL]);
    assert!(run.decision.is_fused());
    assert!(run.computation_ok());
    assert_eq!(run.internalized(), 0);
    Ok(())
}

#[test]
fn test_none_then_private() -> anyhow::Result<()> {
    let _ = env_logger::builder().is_test(true).try_init();
    let run = perform_fusion((Internalization::None, 0), (Internalization::Private, 0))?;
    assert_eq!(run.lines, vec![CONFLICT_PRIVATE]);
    assert!(run.decision.is_fused());
    assert!(run.computation_ok());
    assert_eq!(run.internalized(), 0);
    Ok(())
}

#[test]
fn test_second_kernel_without_work_group_size() -> anyhow::Result<()> {
    let _ = env_logger::builder().is_test(true).try_init();
    let run = perform_fusion((Internalization::Local, 8), (Internalization::Local, 0))?;
    assert_eq!(run.lines, vec![SIZE_MISSING]);
    assert!(run.decision.is_fused());
    assert!(run.computation_ok());
    assert_eq!(run.internalized(), 0);
    Ok(())
}

#[test]
fn test_first_kernel_without_work_group_size() -> anyhow::Result<()> {
    let _ = env_logger::builder().is_test(true).try_init();
    let run = perform_fusion((Internalization::Local, 0), (Internalization::Local, 8))?;
    assert_eq!(run.lines, vec![SIZE_MISSING, CONFLICT_LOCAL, LOCAL_SIZE]);
    assert!(!run.decision.is_fused());
    assert_eq!(run.decision.launch_count(), 2);
    assert!(run.computation_ok());
    assert_eq!(run.internalized(), 0);
    Ok(())
}

#[test]
fn test_mismatching_work_group_sizes() -> anyhow::Result<()> {
    let _ = env_logger::builder().is_test(true).try_init();
    let run = perform_fusion((Internalization::Local, 8), (Internalization::Local, 16))?;
    assert_eq!(run.lines, vec![SIZE_MISMATCH, LOCAL_SIZE]);
    assert!(!run.decision.is_fused());
    assert!(run.computation_ok());
    assert_eq!(run.internalized(), 0);
    Ok(())
}

#[test]
fn test_local_then_private_keeps_local() -> anyhow::Result<()> {
    let _ = env_logger::builder().is_test(true).try_init();
    let run = perform_fusion((Internalization::Local, 8), (Internalization::Private, 8))?;
    assert_eq!(run.lines, vec![DOWNGRADE]);
    let plan = run.decision.fused_plan().expect("fused");
    assert_eq!(plan.promoted.len(), 1);
    assert_eq!(plan.promoted[0].1, Internalization::Local);
    assert!(run.computation_ok());
    assert_eq!(run.internalized(), DATA_SIZE);
    Ok(())
}
