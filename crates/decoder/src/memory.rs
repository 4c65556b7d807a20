//! Memory bridge handed to the decoder at init.
//!
//! The decoder allocates all of its working memory through these callbacks,
//! from its own internal threads, during init and teardown:
//!
//! - **Generic**: aligned heap memory for parser state and bitstream buffers.
//! - **GPU**: output surfaces. The alignment is raised to the hardware
//!   minimum, the size rounded up to it, and the block mapped for GPU
//!   read/write before the base address is returned.
//!
//! Both directions keep an address-keyed registry so a free only needs the
//! pointer. The registries sit behind `parking_lot` mutexes; the decoder may
//! call in from several threads at once.

use std::alloc::{self, Layout};
use std::collections::{HashMap, HashSet};
use std::fmt;
use std::ptr::NonNull;
use std::sync::Arc;

use parking_lot::Mutex;
use tracing::{debug, error, warn};

use avb_common::config::DEFAULT_GPU_ALIGNMENT;
use avb_common::BridgeError;

/// Round `value` up to the next multiple of `align` (a power of two).
/// `None` when the result does not fit in `usize`.
pub const fn align_up(value: usize, align: usize) -> Option<usize> {
    match value.checked_add(align - 1) {
        Some(v) => Some(v & !(align - 1)),
        None => None,
    }
}

/// Build a layout, separating a bad alignment from an unrepresentable size.
fn block_layout(size: usize, alignment: usize) -> Result<Layout, BridgeError> {
    if !alignment.is_power_of_two() {
        return Err(BridgeError::InvalidAlignment(alignment));
    }
    Layout::from_size_align(size.max(1), alignment)
        .map_err(|_| BridgeError::OutOfMemory { size, alignment })
}

// ---------------------------------------------------------------------------
// Capability the decoder consumes
// ---------------------------------------------------------------------------

/// The four allocation callbacks wired into the decoder's init parameters.
pub trait DecoderMemory: Send + Sync {
    fn allocate(&self, alignment: usize, size: usize) -> Result<NonNull<u8>, BridgeError>;
    fn deallocate(&self, ptr: NonNull<u8>) -> Result<(), BridgeError>;
    fn allocate_gpu(&self, alignment: usize, size: usize) -> Result<NonNull<u8>, BridgeError>;
    fn deallocate_gpu(&self, ptr: NonNull<u8>) -> Result<(), BridgeError>;
}

// ---------------------------------------------------------------------------
// Platform GPU memory primitives
// ---------------------------------------------------------------------------

/// Access rights requested when mapping a block for the GPU.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum GpuAccess {
    Read,
    ReadWrite,
}

/// A GPU-addressable block returned by [`GpuMemory::alloc_block`].
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct GpuBlock {
    pub id: u32,
    pub base: usize,
    pub size: usize,
}

/// Platform primitives for GPU-visible memory: block acquisition plus
/// mapping into the GPU's address space.
pub trait GpuMemory: Send + Sync {
    fn alloc_block(&self, size: usize, alignment: usize) -> Result<GpuBlock, BridgeError>;
    fn map(&self, base: usize, size: usize, access: GpuAccess) -> Result<(), BridgeError>;
    fn unmap(&self, base: usize) -> Result<(), BridgeError>;
    fn free_block(&self, block: GpuBlock);
}

/// Host-memory stand-in for a GPU memory pool, used on machines without a
/// shared CPU/GPU pool and in tests. Blocks come from the global allocator
/// and "mapping" is tracked bookkeeping only.
#[derive(Default)]
pub struct HostGpuMemory {
    inner: Mutex<HostGpuInner>,
}

#[derive(Default)]
struct HostGpuInner {
    next_id: u32,
    blocks: HashMap<u32, (usize, Layout)>,
    mapped: HashSet<usize>,
}

impl HostGpuMemory {
    pub fn new() -> Self {
        Self::default()
    }

    /// Number of blocks currently held.
    pub fn live_blocks(&self) -> usize {
        self.inner.lock().blocks.len()
    }

    /// Number of blocks currently mapped.
    pub fn mapped_blocks(&self) -> usize {
        self.inner.lock().mapped.len()
    }
}

impl GpuMemory for HostGpuMemory {
    fn alloc_block(&self, size: usize, alignment: usize) -> Result<GpuBlock, BridgeError> {
        let layout = block_layout(size, alignment)?;
        // SAFETY: layout has a non-zero size.
        let ptr = unsafe { alloc::alloc_zeroed(layout) };
        if ptr.is_null() {
            return Err(BridgeError::OutOfMemory { size, alignment });
        }

        let mut inner = self.inner.lock();
        inner.next_id = inner.next_id.wrapping_add(1);
        let id = inner.next_id;
        inner.blocks.insert(id, (ptr as usize, layout));
        Ok(GpuBlock {
            id,
            base: ptr as usize,
            size,
        })
    }

    fn map(&self, base: usize, size: usize, _access: GpuAccess) -> Result<(), BridgeError> {
        let mut inner = self.inner.lock();
        let owned = inner
            .blocks
            .values()
            .any(|(addr, layout)| *addr == base && layout.size() >= size);
        if !owned {
            return Err(BridgeError::MapFailed {
                address: base,
                size,
                reason: "no block at this address".to_string(),
            });
        }
        inner.mapped.insert(base);
        Ok(())
    }

    fn unmap(&self, base: usize) -> Result<(), BridgeError> {
        if self.inner.lock().mapped.remove(&base) {
            Ok(())
        } else {
            Err(BridgeError::UnknownBlock { address: base })
        }
    }

    fn free_block(&self, block: GpuBlock) {
        let entry = self.inner.lock().blocks.remove(&block.id);
        match entry {
            // SAFETY: (addr, layout) came from alloc_zeroed in alloc_block and
            // was removed from the table, so it is freed exactly once.
            Some((addr, layout)) => unsafe { alloc::dealloc(addr as *mut u8, layout) },
            None => warn!(id = block.id, "Freeing unknown GPU block"),
        }
    }
}

impl Drop for HostGpuMemory {
    fn drop(&mut self) {
        let inner = self.inner.get_mut();
        for (id, (addr, layout)) in inner.blocks.drain() {
            warn!(id, address = format_args!("0x{addr:x}"), "GPU block leaked until pool drop");
            // SAFETY: still-registered blocks were never freed.
            unsafe { alloc::dealloc(addr as *mut u8, layout) };
        }
    }
}

// ---------------------------------------------------------------------------
// MemoryBridge
// ---------------------------------------------------------------------------

/// Default implementation of [`DecoderMemory`].
pub struct MemoryBridge {
    heap: Mutex<HashMap<usize, Layout>>,
    gpu: Arc<dyn GpuMemory>,
    gpu_blocks: Mutex<HashMap<usize, GpuBlock>>,
    min_gpu_alignment: usize,
}

impl MemoryBridge {
    /// `min_gpu_alignment` must be a power of two.
    pub fn new(gpu: Arc<dyn GpuMemory>, min_gpu_alignment: usize) -> Result<Self, BridgeError> {
        if !min_gpu_alignment.is_power_of_two() {
            return Err(BridgeError::InvalidAlignment(min_gpu_alignment));
        }
        Ok(Self {
            heap: Mutex::new(HashMap::new()),
            gpu,
            gpu_blocks: Mutex::new(HashMap::new()),
            min_gpu_alignment,
        })
    }

    /// Bridge over [`HostGpuMemory`] with the default 256 KiB alignment.
    pub fn host() -> Self {
        Self {
            heap: Mutex::new(HashMap::new()),
            gpu: Arc::new(HostGpuMemory::new()),
            gpu_blocks: Mutex::new(HashMap::new()),
            min_gpu_alignment: DEFAULT_GPU_ALIGNMENT,
        }
    }

    pub fn min_gpu_alignment(&self) -> usize {
        self.min_gpu_alignment
    }

    pub fn live_heap_allocations(&self) -> usize {
        self.heap.lock().len()
    }

    pub fn live_gpu_blocks(&self) -> usize {
        self.gpu_blocks.lock().len()
    }
}

impl fmt::Debug for MemoryBridge {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("MemoryBridge")
            .field("min_gpu_alignment", &self.min_gpu_alignment)
            .field("heap_allocations", &self.live_heap_allocations())
            .field("gpu_blocks", &self.live_gpu_blocks())
            .finish()
    }
}

impl DecoderMemory for MemoryBridge {
    fn allocate(&self, alignment: usize, size: usize) -> Result<NonNull<u8>, BridgeError> {
        let layout = block_layout(size, alignment.max(1))?;
        // SAFETY: layout has a non-zero size.
        let ptr = unsafe { alloc::alloc(layout) };
        let ptr = NonNull::new(ptr).ok_or(BridgeError::OutOfMemory { size, alignment })?;
        self.heap.lock().insert(ptr.as_ptr() as usize, layout);
        Ok(ptr)
    }

    fn deallocate(&self, ptr: NonNull<u8>) -> Result<(), BridgeError> {
        let address = ptr.as_ptr() as usize;
        let layout = self
            .heap
            .lock()
            .remove(&address)
            .ok_or(BridgeError::UnknownBlock { address })?;
        // SAFETY: the pointer was produced by `allocate` with this layout and
        // its registry entry has just been removed.
        unsafe { alloc::dealloc(ptr.as_ptr(), layout) };
        Ok(())
    }

    fn allocate_gpu(&self, alignment: usize, size: usize) -> Result<NonNull<u8>, BridgeError> {
        if alignment != 0 && !alignment.is_power_of_two() {
            return Err(BridgeError::InvalidAlignment(alignment));
        }
        let alignment = alignment.max(self.min_gpu_alignment);
        let size = align_up(size.max(1), alignment)
            .ok_or(BridgeError::OutOfMemory { size, alignment })?;

        let block = self.gpu.alloc_block(size, alignment)?;
        if let Err(e) = self.gpu.map(block.base, size, GpuAccess::ReadWrite) {
            error!(error = %e, size, "GPU map failed, releasing block");
            self.gpu.free_block(block);
            return Err(e);
        }

        debug!(
            id = block.id,
            base = format_args!("0x{:x}", block.base),
            size,
            alignment,
            "Allocated GPU block"
        );

        self.gpu_blocks.lock().insert(block.base, block);
        NonNull::new(block.base as *mut u8).ok_or(BridgeError::OutOfMemory { size, alignment })
    }

    fn deallocate_gpu(&self, ptr: NonNull<u8>) -> Result<(), BridgeError> {
        let address = ptr.as_ptr() as usize;
        let block = self
            .gpu_blocks
            .lock()
            .remove(&address)
            .ok_or(BridgeError::UnknownBlock { address })?;

        if let Err(e) = self.gpu.unmap(block.base) {
            warn!(error = %e, id = block.id, "GPU unmap failed");
        }
        self.gpu.free_block(block);
        debug!(id = block.id, size = block.size, "Freed GPU block");
        Ok(())
    }
}

impl Drop for MemoryBridge {
    fn drop(&mut self) {
        for (address, layout) in self.heap.get_mut().drain() {
            warn!(address = format_args!("0x{address:x}"), size = layout.size(), "Heap allocation leaked by decoder");
            // SAFETY: registered allocations were never freed.
            unsafe { alloc::dealloc(address as *mut u8, layout) };
        }
        for (_, block) in self.gpu_blocks.get_mut().drain() {
            warn!(id = block.id, size = block.size, "GPU block leaked by decoder");
            let _ = self.gpu.unmap(block.base);
            self.gpu.free_block(block);
        }
    }
}
