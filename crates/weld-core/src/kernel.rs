use crate::{NdRange, RVec, Range};
use derive_new::new;
use std::sync::Arc;

/// Identity of a kernel: the name it was submitted under.
#[derive(Clone, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct KernelName(Arc<str>);

impl KernelName {
    pub fn new(name: impl AsRef<str>) -> Self {
        Self(Arc::from(name.as_ref()))
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl From<&str> for KernelName {
    fn from(name: &str) -> Self {
        Self::new(name)
    }
}

impl From<String> for KernelName {
    fn from(name: String) -> Self {
        Self(Arc::from(name))
    }
}

impl std::fmt::Debug for KernelName {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl std::fmt::Display for KernelName {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(&self.0)
    }
}

/// Unique identifier for buffers.
#[derive(Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct BufferId(usize);

impl BufferId {
    pub fn new() -> Self {
        use std::sync::atomic;
        static COUNTER: atomic::AtomicUsize = atomic::AtomicUsize::new(1);
        Self(COUNTER.fetch_add(1, atomic::Ordering::Relaxed))
    }
}

impl Default for BufferId {
    fn default() -> Self {
        Self::new()
    }
}

impl std::fmt::Debug for BufferId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "B{}", self.0)
    }
}

/// Memory a buffer is promoted into for the duration of a fused launch.
///
/// The ordering matters: it is the capability order used by the resolver.
/// A resolved level never exceeds the level it was folded from.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Default)]
#[repr(u8)]
pub enum Internalization {
    /// Buffer stays in global device memory.
    #[default]
    None = 0,
    /// Work-group local memory. Requires a work-group size.
    Local = 1,
    /// Per work-item private memory.
    Private = 2,
}

impl Internalization {
    pub fn as_str(&self) -> &'static str {
        match self {
            Internalization::None => "none",
            Internalization::Local => "local",
            Internalization::Private => "private",
        }
    }

    pub fn is_promoted(&self) -> bool {
        !matches!(self, Internalization::None)
    }
}

/// One kernel's access to a buffer, and the promotion it asks for.
#[derive(Debug, Clone, PartialEq, Eq, Hash, new)]
pub struct BufferPromotionRequest {
    pub buffer: BufferId,
    pub level: Internalization,
    /// Work-group size of the requesting kernel, if it specified one.
    pub local_range: Option<Range>,
}

/// Immutable description of a kernel submitted in fusion mode.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct KernelRecord {
    name: KernelName,
    nd_range: NdRange,
    requests: RVec<BufferPromotionRequest>,
}

impl KernelRecord {
    pub fn builder(name: impl Into<KernelName>, nd_range: NdRange) -> KernelRecordBuilder {
        KernelRecordBuilder {
            name: name.into(),
            nd_range,
            requests: RVec::new(),
        }
    }

    pub fn name(&self) -> &KernelName {
        &self.name
    }

    pub fn nd_range(&self) -> &NdRange {
        &self.nd_range
    }

    pub fn rank(&self) -> usize {
        self.nd_range.rank()
    }

    pub fn global(&self) -> &Range {
        self.nd_range.global()
    }

    pub fn local(&self) -> Option<&Range> {
        self.nd_range.local()
    }

    pub fn requests(&self) -> &[BufferPromotionRequest] {
        &self.requests
    }
}

/// Captures a kernel's geometry and buffer accesses into a [`KernelRecord`].
///
/// Requests keep the order in which the accesses were declared.
#[derive(Debug, Clone)]
pub struct KernelRecordBuilder {
    name: KernelName,
    nd_range: NdRange,
    requests: RVec<BufferPromotionRequest>,
}

impl KernelRecordBuilder {
    pub fn request(mut self, buffer: BufferId, level: Internalization) -> Self {
        let local_range = self.nd_range.local().cloned();
        self.requests
            .push(BufferPromotionRequest::new(buffer, level, local_range));
        self
    }

    /// Plain access, no promotion.
    pub fn access(self, buffer: BufferId) -> Self {
        self.request(buffer, Internalization::None)
    }

    pub fn promote_local(self, buffer: BufferId) -> Self {
        self.request(buffer, Internalization::Local)
    }

    pub fn promote_private(self, buffer: BufferId) -> Self {
        self.request(buffer, Internalization::Private)
    }

    pub fn build(self) -> KernelRecord {
        KernelRecord {
            name: self.name,
            nd_range: self.nd_range,
            requests: self.requests,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_internalization_ordering() {
        assert!(Internalization::None < Internalization::Local);
        assert!(Internalization::Local < Internalization::Private);
        assert!(!Internalization::None.is_promoted());
        assert!(Internalization::Private.is_promoted());
    }

    #[test]
    fn test_buffer_ids_are_unique() {
        let a = BufferId::new();
        let b = BufferId::new();
        assert_ne!(a, b);
        assert!(format!("{a:?}").starts_with('B'));
    }

    #[test]
    fn test_builder_captures_local_range_per_request() -> anyhow::Result<()> {
        let tmp = BufferId::new();
        let input = BufferId::new();
        let nd = NdRange::new(Range::linear(512)?, Range::linear(8)?)?;
        let record = KernelRecord::builder("Kernel1", nd)
            .access(input)
            .promote_local(tmp)
            .build();

        assert_eq!(record.name().as_str(), "Kernel1");
        assert_eq!(record.requests().len(), 2);
        let req = &record.requests()[1];
        assert_eq!(req.buffer, tmp);
        assert_eq!(req.level, Internalization::Local);
        assert_eq!(req.local_range, Some(Range::linear(8)?));
        Ok(())
    }

    #[test]
    fn test_builder_without_work_group_size() -> anyhow::Result<()> {
        let tmp = BufferId::new();
        let record = KernelRecord::builder("KernelOne", NdRange::global_only(Range::linear(512)?))
            .promote_private(tmp)
            .build();
        assert_eq!(record.local(), None);
        assert_eq!(record.requests()[0].local_range, None);
        Ok(())
    }
}
