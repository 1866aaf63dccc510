//! Dispatch-size resolution
//!
//! A compute unit declares where its dispatch extent comes from; the extent is recomputed on
//! every encode because the source may be a texture that is not created yet or a buffer whose
//! element count changes between frames. The extent is then divided into thread groups.

use std::fmt;
use std::sync::Arc;

use crate::backend::Backend;
use crate::binding::StageBindings;
use crate::resource::LazyTexture;
use crate::{Error, Extent3d, Result};

/// Closure computing a dispatch extent
pub type DeferredExtent<B> = Arc<dyn Fn(&B) -> Result<Extent3d> + Send + Sync>;

/// Source of the extent a compute unit dispatches over
pub enum DispatchSize<B: Backend> {
    /// A fixed 1-D, 2-D or 3-D extent
    Fixed(Extent3d),
    /// The pixel size of the unit's own texture at this slot
    TextureSlot(usize),
    /// A grid covering the element count of the unit's own buffer at this slot
    BufferSlot { slot: usize, max_width: Option<u32> },
    /// The pixel size of an independent texture
    Texture(LazyTexture<B>),
    /// Computed by a closure
    Deferred(DeferredExtent<B>),
}

/// Number of thread groups needed to cover `extent` with groups of `threads_per_group`
///
/// Each axis is rounded up, so a 1000×1000 extent with 16×16 groups needs 63×63 groups.
///
/// # Arguments
/// * `extent` - Number of threads to cover per axis
/// * `threads_per_group` - Work-group size per axis; every axis must be non-zero
pub fn thread_groups(extent: Extent3d, threads_per_group: Extent3d) -> Result<Extent3d> {
    if threads_per_group.is_empty() {
        return Err(Error::configuration("thread group size", format!("{threads_per_group:?} has a zero axis")));
    }

    Ok(Extent3d::new(
        extent.width.div_ceil(threads_per_group.width),
        extent.height.div_ceil(threads_per_group.height),
        extent.depth.div_ceil(threads_per_group.depth),
    ))
}

/// A 2-D grid covering `element_count` items in rows of at most `max_width`
///
/// The width is `min(max_width, element_count)` and the height is the number of rows needed;
/// 130 elements with a maximum width of 16 give a 16×9 grid. No elements give an empty grid.
pub fn grid_for_elements(element_count: usize, max_width: u32) -> Extent3d {
    if element_count == 0 {
        return Extent3d::new(0, 0, 1);
    }

    let count = u64::try_from(element_count).unwrap_or(u64::MAX);
    let width = u64::from(max_width.max(1)).min(count);
    let height = count.div_ceil(width);
    Extent3d::new_2d(width as u32, u32::try_from(height).unwrap_or(u32::MAX))
}

impl<B: Backend> DispatchSize<B> {
    /// Dispatch over a fixed extent
    pub fn fixed(extent: impl Into<Extent3d>) -> Self {
        Self::Fixed(extent.into())
    }

    /// Dispatch over the elements of a buffer slot, one row if `max_width` is `None`
    pub fn buffer_slot(slot: usize, max_width: Option<u32>) -> Self {
        Self::BufferSlot { slot, max_width }
    }

    /// Computes the extent for this encode
    ///
    /// # Arguments
    /// * `backend` - Backend used to resolve textures or buffers the extent depends on
    /// * `bindings` - Bindings of the unit being encoded, for slot-based sources
    /// * `unit` - Label of the unit, for error messages
    pub fn extent(&mut self, backend: &B, bindings: &mut StageBindings<B>, unit: &str) -> Result<Extent3d> {
        match self {
            Self::Fixed(extent) => Ok(*extent),
            Self::TextureSlot(slot) => {
                let texture = bindings
                    .textures
                    .get_mut(*slot)
                    .ok_or_else(|| Error::configuration(unit, format!("dispatch follows texture slot {slot}, which is not bound")))?;
                Ok(texture.resolve(backend)?.size())
            }
            Self::BufferSlot { slot, max_width } => {
                let binding = bindings
                    .buffers
                    .get_mut(*slot)
                    .ok_or_else(|| Error::configuration(unit, format!("dispatch follows buffer slot {slot}, which is not bound")))?;
                let element_count = binding.buffer(backend)?.element_count;
                Ok(grid_for_elements(element_count, max_width.unwrap_or(u32::MAX)))
            }
            Self::Texture(texture) => Ok(texture.resolve(backend)?.size()),
            Self::Deferred(extent) => {
                let extent = &**extent;
                extent(backend)
            }
        }
    }
}

impl<B: Backend> Clone for DispatchSize<B> {
    fn clone(&self) -> Self {
        match self {
            Self::Fixed(extent) => Self::Fixed(*extent),
            Self::TextureSlot(slot) => Self::TextureSlot(*slot),
            Self::BufferSlot { slot, max_width } => Self::BufferSlot {
                slot: *slot,
                max_width: *max_width,
            },
            Self::Texture(texture) => Self::Texture(texture.clone()),
            Self::Deferred(extent) => Self::Deferred(extent.clone()),
        }
    }
}

impl<B: Backend> fmt::Debug for DispatchSize<B> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Fixed(extent) => f.debug_tuple("Fixed").field(extent).finish(),
            Self::TextureSlot(slot) => f.debug_tuple("TextureSlot").field(slot).finish(),
            Self::BufferSlot { slot, max_width } => f.debug_struct("BufferSlot").field("slot", slot).field("max_width", max_width).finish(),
            Self::Texture(texture) => f.debug_tuple("Texture").field(texture).finish(),
            Self::Deferred(_) => f.write_str("Deferred"),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::binding::{BufferList, TextureList};
    use crate::resource::{ConstantBytes, LazyBuffer};
    use crate::{BufferUsage, PixelFormat, RecordingBackend, TextureUsage};

    #[test]
    fn thread_groups_round_up_per_axis() {
        assert_eq!(thread_groups(Extent3d::new_2d(1000, 1000), Extent3d::new_2d(16, 16)).unwrap(), Extent3d::new(63, 63, 1));
        assert_eq!(thread_groups(Extent3d::new_2d(1024, 1), Extent3d::new_2d(16, 16)).unwrap(), Extent3d::new(64, 1, 1));
        assert_eq!(thread_groups(Extent3d::new_1d(1), Extent3d::new(64, 1, 1)).unwrap(), Extent3d::new(1, 1, 1));
    }

    #[test]
    fn zero_sized_groups_are_rejected() {
        assert!(matches!(thread_groups(Extent3d::new_2d(8, 8), Extent3d::new(8, 0, 1)), Err(Error::Configuration { .. })));
    }

    #[test]
    fn element_grids_wrap_at_the_maximum_width() {
        assert_eq!(grid_for_elements(130, 16), Extent3d::new_2d(16, 9));
        assert_eq!(grid_for_elements(128, 16), Extent3d::new_2d(16, 8));
        assert_eq!(grid_for_elements(5, 16), Extent3d::new_2d(5, 1));
        assert!(grid_for_elements(0, 16).is_empty());
    }

    #[test]
    fn slot_sources_read_the_units_own_resources() {
        let backend = RecordingBackend::new();
        let mut bindings = StageBindings::<RecordingBackend> {
            textures: TextureList::new().with(LazyTexture::new_2d("image", 300, 200, PixelFormat::Rgba8Unorm, TextureUsage::SHADER_READ)),
            buffers: BufferList::new()
                .with(LazyBuffer::zeroed::<f32>("particles", 130, BufferUsage::STORAGE))
                .with(ConstantBytes::from_value("dt", &0.016f32)),
            ..StageBindings::new()
        };

        let mut by_texture = DispatchSize::TextureSlot(0);
        assert_eq!(by_texture.extent(&backend, &mut bindings, "unit").unwrap(), Extent3d::new_2d(300, 200));

        let mut by_buffer = DispatchSize::buffer_slot(0, Some(16));
        assert_eq!(by_buffer.extent(&backend, &mut bindings, "unit").unwrap(), Extent3d::new_2d(16, 9));

        let mut by_constant = DispatchSize::buffer_slot(1, None);
        assert!(matches!(by_constant.extent(&backend, &mut bindings, "unit"), Err(Error::NoBackingMemory { .. })));

        let mut unbound = DispatchSize::TextureSlot(3);
        assert!(matches!(unbound.extent(&backend, &mut bindings, "unit"), Err(Error::Configuration { .. })));
    }

    #[test]
    fn deferred_extents_are_recomputed_each_time() {
        use std::sync::atomic::{AtomicU32, Ordering};

        let backend = RecordingBackend::new();
        let width = Arc::new(AtomicU32::new(4));
        let source = width.clone();
        let mut size = DispatchSize::<RecordingBackend>::Deferred(Arc::new(move |_: &RecordingBackend| Ok(Extent3d::new_1d(source.load(Ordering::SeqCst)))));
        let mut bindings = StageBindings::new();

        assert_eq!(size.extent(&backend, &mut bindings, "unit").unwrap().width, 4);
        width.store(12, Ordering::SeqCst);
        assert_eq!(size.extent(&backend, &mut bindings, "unit").unwrap().width, 12);
    }
}
