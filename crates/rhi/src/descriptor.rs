//! Descriptor layouts, pools and writers.
//!
//! - [`BindingSetShape`] declares which resource kind sits at which slot.
//!   Built once, then shared read-only by the Vulkan layout and by every
//!   [`DescriptorWriter`] that fills sets of that layout.
//! - [`DescriptorPool`] is a fixed-capacity arena of descriptor sets. Its
//!   [`PoolBudget`] tracks live sets and per-kind descriptor counts so that
//!   exhaustion is reported as [`RhiError::PoolExhausted`] before the driver
//!   is ever asked.
//! - [`DescriptorWriter`] pairs concrete buffers and images with the slots of
//!   one set, validates them against the shape and commits them.
//!
//! ```no_run
//! # use std::sync::Arc;
//! # use lumen_rhi::device::Device;
//! use lumen_rhi::descriptor::*;
//! use lumen_rhi::vk;
//!
//! # fn example(device: Arc<Device>, ubo: vk::DescriptorBufferInfo) -> lumen_rhi::RhiResult<()> {
//! let shape = BindingSetShape::builder()
//!     .binding(0, ResourceKind::UniformBuffer, vk::ShaderStageFlags::ALL_GRAPHICS, 1)
//!     .build()?;
//! let layout = DescriptorSetLayout::new(device.clone(), shape)?;
//! let mut pool = DescriptorPool::new(device.clone(), 2, &[PoolSize::new(ResourceKind::UniformBuffer, 2)])?;
//!
//! let set = pool.allocate(&layout)?;
//! DescriptorWriter::new(layout.shape())
//!     .buffer(0, ubo)
//!     .commit(&device, set)?;
//! # Ok(())
//! # }
//! ```

use std::collections::BTreeMap;
use std::sync::Arc;

use ash::vk;
use tracing::debug;

use crate::device::Device;
use crate::error::{RhiError, RhiResult};

/// Kind of resource bound at a slot.
#[derive(Clone, Copy, Debug, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub enum ResourceKind {
    UniformBuffer,
    CombinedImageSampler,
}

impl ResourceKind {
    pub fn to_vk(self) -> vk::DescriptorType {
        match self {
            ResourceKind::UniformBuffer => vk::DescriptorType::UNIFORM_BUFFER,
            ResourceKind::CombinedImageSampler => vk::DescriptorType::COMBINED_IMAGE_SAMPLER,
        }
    }

    /// Whether the slot takes an image (rather than a buffer region).
    pub fn is_image(self) -> bool {
        matches!(self, ResourceKind::CombinedImageSampler)
    }
}

/// One slot of a [`BindingSetShape`].
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct BindingDesc {
    pub slot: u32,
    pub kind: ResourceKind,
    pub stages: vk::ShaderStageFlags,
    pub count: u32,
}

/// Ordered mapping from slot to binding. Immutable once built.
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct BindingSetShape {
    bindings: BTreeMap<u32, BindingDesc>,
}

/// Collects bindings for a [`BindingSetShape`].
#[derive(Default)]
pub struct BindingSetShapeBuilder {
    bindings: Vec<BindingDesc>,
}

impl BindingSetShapeBuilder {
    pub fn binding(
        mut self,
        slot: u32,
        kind: ResourceKind,
        stages: vk::ShaderStageFlags,
        count: u32,
    ) -> Self {
        self.bindings.push(BindingDesc {
            slot,
            kind,
            stages,
            count,
        });
        self
    }

    /// Fails with [`RhiError::DuplicateBinding`] if a slot is declared twice.
    pub fn build(self) -> RhiResult<BindingSetShape> {
        let mut bindings = BTreeMap::new();
        for binding in self.bindings {
            if bindings.insert(binding.slot, binding).is_some() {
                return Err(RhiError::DuplicateBinding(binding.slot));
            }
        }
        Ok(BindingSetShape { bindings })
    }
}

impl BindingSetShape {
    pub fn builder() -> BindingSetShapeBuilder {
        BindingSetShapeBuilder::default()
    }

    pub fn get(&self, slot: u32) -> Option<&BindingDesc> {
        self.bindings.get(&slot)
    }

    /// Bindings in slot order.
    pub fn bindings(&self) -> impl Iterator<Item = &BindingDesc> {
        self.bindings.values()
    }

    pub fn len(&self) -> usize {
        self.bindings.len()
    }

    pub fn is_empty(&self) -> bool {
        self.bindings.is_empty()
    }

    /// Descriptors of each kind one set of this shape consumes.
    pub fn descriptor_counts(&self) -> BTreeMap<ResourceKind, u32> {
        let mut counts = BTreeMap::new();
        for binding in self.bindings.values() {
            *counts.entry(binding.kind).or_insert(0) += binding.count;
        }
        counts
    }

    fn to_vk_bindings(&self) -> Vec<vk::DescriptorSetLayoutBinding<'static>> {
        self.bindings
            .values()
            .map(|binding| {
                vk::DescriptorSetLayoutBinding::default()
                    .binding(binding.slot)
                    .descriptor_type(binding.kind.to_vk())
                    .descriptor_count(binding.count)
                    .stage_flags(binding.stages)
            })
            .collect()
    }
}

/// A Vulkan descriptor set layout created from a [`BindingSetShape`].
pub struct DescriptorSetLayout {
    device: Arc<Device>,
    layout: vk::DescriptorSetLayout,
    shape: BindingSetShape,
}

impl DescriptorSetLayout {
    pub fn new(device: Arc<Device>, shape: BindingSetShape) -> RhiResult<Self> {
        let bindings = shape.to_vk_bindings();
        let create_info = vk::DescriptorSetLayoutCreateInfo::default().bindings(&bindings);

        let layout = unsafe {
            device
                .handle()
                .create_descriptor_set_layout(&create_info, None)?
        };

        debug!(
            "Created descriptor set layout with {} binding(s)",
            bindings.len()
        );

        Ok(Self {
            device,
            layout,
            shape,
        })
    }

    #[inline]
    pub fn handle(&self) -> vk::DescriptorSetLayout {
        self.layout
    }

    #[inline]
    pub fn shape(&self) -> &BindingSetShape {
        &self.shape
    }
}

impl Drop for DescriptorSetLayout {
    fn drop(&mut self) {
        unsafe {
            self.device
                .handle()
                .destroy_descriptor_set_layout(self.layout, None);
        }
        debug!("Destroyed descriptor set layout");
    }
}

/// Capacity for one resource kind across all sets of a pool.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct PoolSize {
    pub kind: ResourceKind,
    pub count: u32,
}

impl PoolSize {
    pub fn new(kind: ResourceKind, count: u32) -> Self {
        Self { kind, count }
    }
}

/// CPU-side accounting of a descriptor pool's capacity.
///
/// A reservation either fits entirely or changes nothing.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct PoolBudget {
    max_sets: u32,
    live_sets: u32,
    capacity: BTreeMap<ResourceKind, u32>,
    used: BTreeMap<ResourceKind, u32>,
}

impl PoolBudget {
    pub fn new(max_sets: u32, sizes: &[PoolSize]) -> Self {
        let mut capacity = BTreeMap::new();
        for size in sizes {
            *capacity.entry(size.kind).or_insert(0) += size.count;
        }
        Self {
            max_sets,
            live_sets: 0,
            capacity,
            used: BTreeMap::new(),
        }
    }

    /// Claims room for one set of `shape`.
    pub fn reserve(&mut self, shape: &BindingSetShape) -> RhiResult<()> {
        if self.live_sets >= self.max_sets {
            return Err(RhiError::PoolExhausted(format!(
                "all {} sets in use",
                self.max_sets
            )));
        }

        let counts = shape.descriptor_counts();
        for (kind, needed) in &counts {
            let capacity = self.capacity.get(kind).copied().unwrap_or(0);
            let used = self.used.get(kind).copied().unwrap_or(0);
            if used + needed > capacity {
                return Err(RhiError::PoolExhausted(format!(
                    "{:?}: {} of {} used, {} requested",
                    kind, used, capacity, needed
                )));
            }
        }

        self.live_sets += 1;
        for (kind, needed) in counts {
            *self.used.entry(kind).or_insert(0) += needed;
        }
        Ok(())
    }

    /// Returns the room claimed by `sets` sets of `shape`.
    pub fn release(&mut self, shape: &BindingSetShape, sets: u32) {
        self.live_sets = self.live_sets.saturating_sub(sets);
        for (kind, count) in shape.descriptor_counts() {
            if let Some(used) = self.used.get_mut(&kind) {
                *used = used.saturating_sub(count * sets);
            }
        }
    }

    /// Forgets every reservation.
    pub fn reset(&mut self) {
        self.live_sets = 0;
        self.used.clear();
    }

    #[inline]
    pub fn live_sets(&self) -> u32 {
        self.live_sets
    }

    #[inline]
    pub fn max_sets(&self) -> u32 {
        self.max_sets
    }

    /// Descriptors of `kind` still available.
    pub fn remaining(&self, kind: ResourceKind) -> u32 {
        let capacity = self.capacity.get(&kind).copied().unwrap_or(0);
        capacity - self.used.get(&kind).copied().unwrap_or(0)
    }
}

/// Fixed-capacity descriptor pool.
///
/// Not thread-safe: allocation and freeing take `&mut self`.
pub struct DescriptorPool {
    device: Arc<Device>,
    pool: vk::DescriptorPool,
    budget: PoolBudget,
}

impl DescriptorPool {
    /// Creates a pool for at most `max_sets` live sets drawing on `sizes`.
    pub fn new(device: Arc<Device>, max_sets: u32, sizes: &[PoolSize]) -> RhiResult<Self> {
        let pool_sizes: Vec<vk::DescriptorPoolSize> = sizes
            .iter()
            .map(|size| {
                vk::DescriptorPoolSize::default()
                    .ty(size.kind.to_vk())
                    .descriptor_count(size.count)
            })
            .collect();

        let create_info = vk::DescriptorPoolCreateInfo::default()
            .flags(vk::DescriptorPoolCreateFlags::FREE_DESCRIPTOR_SET)
            .max_sets(max_sets)
            .pool_sizes(&pool_sizes);

        let pool = unsafe { device.handle().create_descriptor_pool(&create_info, None)? };

        debug!(
            "Created descriptor pool: max {} set(s), {} pool size(s)",
            max_sets,
            pool_sizes.len()
        );

        Ok(Self {
            device,
            pool,
            budget: PoolBudget::new(max_sets, sizes),
        })
    }

    /// Allocates one set of `layout`, or fails with `PoolExhausted`.
    pub fn allocate(&mut self, layout: &DescriptorSetLayout) -> RhiResult<vk::DescriptorSet> {
        self.budget.reserve(layout.shape())?;

        let layouts = [layout.handle()];
        let alloc_info = vk::DescriptorSetAllocateInfo::default()
            .descriptor_pool(self.pool)
            .set_layouts(&layouts);

        match unsafe { self.device.handle().allocate_descriptor_sets(&alloc_info) } {
            Ok(sets) => Ok(sets[0]),
            Err(result) => {
                self.budget.release(layout.shape(), 1);
                match result {
                    vk::Result::ERROR_OUT_OF_POOL_MEMORY | vk::Result::ERROR_FRAGMENTED_POOL => {
                        Err(RhiError::PoolExhausted(format!("driver reported {:?}", result)))
                    }
                    other => Err(other.into()),
                }
            }
        }
    }

    /// Allocates `count` sets of `layout`. On failure the already allocated
    /// ones are freed again.
    pub fn allocate_many(
        &mut self,
        layout: &DescriptorSetLayout,
        count: usize,
    ) -> RhiResult<Vec<vk::DescriptorSet>> {
        let mut sets = Vec::with_capacity(count);
        for _ in 0..count {
            match self.allocate(layout) {
                Ok(set) => sets.push(set),
                Err(e) => {
                    self.free(layout, &sets)?;
                    return Err(e);
                }
            }
        }
        Ok(sets)
    }

    /// Returns `sets` to the pool.
    ///
    /// No submitted GPU work may still reference them.
    pub fn free(
        &mut self,
        layout: &DescriptorSetLayout,
        sets: &[vk::DescriptorSet],
    ) -> RhiResult<()> {
        if sets.is_empty() {
            return Ok(());
        }
        unsafe { self.device.handle().free_descriptor_sets(self.pool, sets)? };
        self.budget.release(layout.shape(), sets.len() as u32);
        Ok(())
    }

    /// Returns every set to the pool.
    pub fn reset(&mut self) -> RhiResult<()> {
        unsafe {
            self.device
                .handle()
                .reset_descriptor_pool(self.pool, vk::DescriptorPoolResetFlags::empty())?
        };
        self.budget.reset();
        Ok(())
    }

    #[inline]
    pub fn handle(&self) -> vk::DescriptorPool {
        self.pool
    }

    #[inline]
    pub fn budget(&self) -> &PoolBudget {
        &self.budget
    }
}

impl Drop for DescriptorPool {
    fn drop(&mut self) {
        unsafe {
            self.device.handle().destroy_descriptor_pool(self.pool, None);
        }
        debug!("Destroyed descriptor pool");
    }
}

/// Resource supplied for one slot.
#[derive(Clone, Copy, Debug)]
pub enum WrittenResource {
    Buffer(vk::DescriptorBufferInfo),
    Image(vk::DescriptorImageInfo),
}

/// A validated slot write, as returned by [`DescriptorWriter::build`].
#[derive(Clone, Copy, Debug)]
pub struct WrittenBinding {
    pub slot: u32,
    pub kind: ResourceKind,
    pub resource: WrittenResource,
}

/// Fills the slots of one descriptor set.
///
/// Every slot declared in the shape must be written exactly once before
/// [`DescriptorWriter::build`] or [`DescriptorWriter::commit`]; a later
/// write to the same slot replaces the earlier one.
pub struct DescriptorWriter<'a> {
    shape: &'a BindingSetShape,
    writes: BTreeMap<u32, WrittenResource>,
    error: Option<RhiError>,
}

impl<'a> DescriptorWriter<'a> {
    pub fn new(shape: &'a BindingSetShape) -> Self {
        Self {
            shape,
            writes: BTreeMap::new(),
            error: None,
        }
    }

    /// Binds a buffer region to `slot`.
    pub fn buffer(self, slot: u32, info: vk::DescriptorBufferInfo) -> Self {
        self.write(slot, WrittenResource::Buffer(info))
    }

    /// Binds an image view and sampler to `slot`.
    pub fn image(self, slot: u32, info: vk::DescriptorImageInfo) -> Self {
        self.write(slot, WrittenResource::Image(info))
    }

    fn write(mut self, slot: u32, resource: WrittenResource) -> Self {
        if self.error.is_some() {
            return self;
        }
        match self.shape.get(slot) {
            None => {
                self.error = Some(RhiError::BindingError(format!(
                    "slot {} is not declared by the layout",
                    slot
                )));
            }
            Some(binding) if binding.count != 1 => {
                self.error = Some(RhiError::BindingError(format!(
                    "slot {} holds an array of {}, single writes only",
                    slot, binding.count
                )));
            }
            Some(binding) => {
                let is_image = matches!(resource, WrittenResource::Image(_));
                if binding.kind.is_image() != is_image {
                    self.error = Some(RhiError::BindingError(format!(
                        "slot {} expects {:?}",
                        slot, binding.kind
                    )));
                } else {
                    self.writes.insert(slot, resource);
                }
            }
        }
        self
    }

    /// Validates the writes and returns them in slot order.
    pub fn build(self) -> RhiResult<Vec<WrittenBinding>> {
        if let Some(error) = self.error {
            return Err(error);
        }

        self.shape
            .bindings()
            .map(|binding| {
                self.writes
                    .get(&binding.slot)
                    .map(|resource| WrittenBinding {
                        slot: binding.slot,
                        kind: binding.kind,
                        resource: *resource,
                    })
                    .ok_or_else(|| {
                        RhiError::BindingError(format!("slot {} was never written", binding.slot))
                    })
            })
            .collect()
    }

    /// Validates the writes and pushes them into `set`.
    ///
    /// The set must not be in use by any in-flight command buffer.
    pub fn commit(self, device: &Device, set: vk::DescriptorSet) -> RhiResult<()> {
        let written = self.build()?;

        let writes: Vec<vk::WriteDescriptorSet> = written
            .iter()
            .map(|binding| {
                let write = vk::WriteDescriptorSet::default()
                    .dst_set(set)
                    .dst_binding(binding.slot)
                    .dst_array_element(0)
                    .descriptor_type(binding.kind.to_vk());
                match &binding.resource {
                    WrittenResource::Buffer(info) => write.buffer_info(std::slice::from_ref(info)),
                    WrittenResource::Image(info) => write.image_info(std::slice::from_ref(info)),
                }
            })
            .collect();

        unsafe { device.handle().update_descriptor_sets(&writes, &[]) };
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use ash::vk::Handle;

    fn two_buffer_shape() -> BindingSetShape {
        BindingSetShape::builder()
            .binding(
                0,
                ResourceKind::UniformBuffer,
                vk::ShaderStageFlags::ALL_GRAPHICS,
                1,
            )
            .binding(
                1,
                ResourceKind::UniformBuffer,
                vk::ShaderStageFlags::ALL_GRAPHICS,
                1,
            )
            .build()
            .unwrap()
    }

    fn buffer(raw: u64) -> vk::DescriptorBufferInfo {
        vk::DescriptorBufferInfo::default()
            .buffer(vk::Buffer::from_raw(raw))
            .range(vk::WHOLE_SIZE)
    }

    #[test]
    fn test_duplicate_slot_rejected() {
        let result = BindingSetShape::builder()
            .binding(0, ResourceKind::UniformBuffer, vk::ShaderStageFlags::VERTEX, 1)
            .binding(
                0,
                ResourceKind::CombinedImageSampler,
                vk::ShaderStageFlags::FRAGMENT,
                1,
            )
            .build();
        assert!(matches!(result, Err(RhiError::DuplicateBinding(0))));
    }

    #[test]
    fn test_shape_orders_bindings_by_slot() {
        let shape = BindingSetShape::builder()
            .binding(2, ResourceKind::UniformBuffer, vk::ShaderStageFlags::VERTEX, 1)
            .binding(0, ResourceKind::UniformBuffer, vk::ShaderStageFlags::VERTEX, 1)
            .build()
            .unwrap();
        let slots: Vec<u32> = shape.bindings().map(|b| b.slot).collect();
        assert_eq!(slots, vec![0, 2]);
    }

    #[test]
    fn test_writer_round_trip_in_slot_order() {
        let shape = two_buffer_shape();
        // Written out of order on purpose.
        let written = DescriptorWriter::new(&shape)
            .buffer(1, buffer(22))
            .buffer(0, buffer(11))
            .build()
            .unwrap();

        assert_eq!(written.len(), 2);
        let handles: Vec<(u32, u64)> = written
            .iter()
            .map(|w| match w.resource {
                WrittenResource::Buffer(info) => (w.slot, info.buffer.as_raw()),
                WrittenResource::Image(_) => panic!("unexpected image"),
            })
            .collect();
        assert_eq!(handles, vec![(0, 11), (1, 22)]);
    }

    #[test]
    fn test_writer_rejects_missing_slot() {
        let shape = two_buffer_shape();
        let result = DescriptorWriter::new(&shape).buffer(0, buffer(1)).build();
        assert!(matches!(result, Err(RhiError::BindingError(_))));
    }

    #[test]
    fn test_writer_rejects_undeclared_slot() {
        let shape = two_buffer_shape();
        let result = DescriptorWriter::new(&shape)
            .buffer(0, buffer(1))
            .buffer(1, buffer(2))
            .buffer(5, buffer(3))
            .build();
        assert!(matches!(result, Err(RhiError::BindingError(_))));
    }

    #[test]
    fn test_writer_rejects_kind_mismatch() {
        let shape = BindingSetShape::builder()
            .binding(
                0,
                ResourceKind::CombinedImageSampler,
                vk::ShaderStageFlags::FRAGMENT,
                1,
            )
            .build()
            .unwrap();
        let result = DescriptorWriter::new(&shape).buffer(0, buffer(1)).build();
        assert!(matches!(result, Err(RhiError::BindingError(_))));
    }

    #[test]
    fn test_later_write_overwrites() {
        let shape = two_buffer_shape();
        let written = DescriptorWriter::new(&shape)
            .buffer(0, buffer(1))
            .buffer(1, buffer(2))
            .buffer(0, buffer(3))
            .build()
            .unwrap();
        match written[0].resource {
            WrittenResource::Buffer(info) => assert_eq!(info.buffer.as_raw(), 3),
            WrittenResource::Image(_) => panic!("unexpected image"),
        }
    }

    #[test]
    fn test_pool_exhaustion_fails_closed() {
        let shape = two_buffer_shape();
        let max_sets = 3;
        let mut budget = PoolBudget::new(
            max_sets,
            &[PoolSize::new(ResourceKind::UniformBuffer, 100)],
        );

        for _ in 0..max_sets {
            budget.reserve(&shape).unwrap();
        }
        let before = budget.clone();

        let overflow = budget.reserve(&shape);
        assert!(matches!(overflow, Err(RhiError::PoolExhausted(_))));
        assert_eq!(budget, before);

        budget.release(&shape, 1);
        assert!(budget.reserve(&shape).is_ok());
        assert_eq!(budget.live_sets(), max_sets);
    }

    #[test]
    fn test_pool_exhaustion_per_kind() {
        let shape = two_buffer_shape();
        let mut budget = PoolBudget::new(10, &[PoolSize::new(ResourceKind::UniformBuffer, 3)]);

        budget.reserve(&shape).unwrap();
        assert_eq!(budget.remaining(ResourceKind::UniformBuffer), 1);
        assert!(matches!(
            budget.reserve(&shape),
            Err(RhiError::PoolExhausted(_))
        ));
        assert_eq!(budget.live_sets(), 1);
    }

    #[test]
    fn test_pool_without_kind_rejects_it() {
        let shape = BindingSetShape::builder()
            .binding(
                0,
                ResourceKind::CombinedImageSampler,
                vk::ShaderStageFlags::FRAGMENT,
                1,
            )
            .build()
            .unwrap();
        let mut budget = PoolBudget::new(4, &[PoolSize::new(ResourceKind::UniformBuffer, 4)]);
        assert!(budget.reserve(&shape).is_err());
    }

    #[test]
    fn test_pool_reset_restores_capacity() {
        let shape = two_buffer_shape();
        let mut budget = PoolBudget::new(1, &[PoolSize::new(ResourceKind::UniformBuffer, 2)]);
        budget.reserve(&shape).unwrap();
        budget.reset();
        assert_eq!(budget.live_sets(), 0);
        assert_eq!(budget.remaining(ResourceKind::UniformBuffer), 2);
        assert!(budget.reserve(&shape).is_ok());
    }

    #[test]
    fn test_resource_kind_to_vk() {
        assert_eq!(
            ResourceKind::UniformBuffer.to_vk(),
            vk::DescriptorType::UNIFORM_BUFFER
        );
        assert_eq!(
            ResourceKind::CombinedImageSampler.to_vk(),
            vk::DescriptorType::COMBINED_IMAGE_SAMPLER
        );
        assert!(ResourceKind::CombinedImageSampler.is_image());
        assert!(!ResourceKind::UniformBuffer.is_image());
    }
}
