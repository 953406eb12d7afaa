pub mod descriptors;
pub mod pipeline;
pub mod render_pass;
pub mod vulkan;

use std::ffi::CStr;

/// Configuration for instance creation.
///
/// Layers and extensions are enumerated once at the top level and passed in
/// explicitly; nothing in the backend reads ambient global state.
#[derive(Clone, Debug)]
pub struct InstanceConfig {
    /// Request the Khronos validation layer. Instance creation fails if the
    /// layer is requested but not installed.
    pub validation: bool,
    pub app_name: Option<&'static CStr>,
}

impl Default for InstanceConfig {
    fn default() -> Self {
        Self {
            validation: cfg!(debug_assertions),
            app_name: None,
        }
    }
}

/// Configuration for logical device creation.
#[derive(Clone, Debug, Default)]
pub struct DeviceConfig {
    /// Device extensions beyond the swapchain extension, which is always
    /// enabled.
    pub extra_extensions: Vec<&'static CStr>,
}

#[derive(Clone, Debug)]
pub struct AdapterProperties {
    pub name: String,
    pub kind: AdapterKind,
    pub max_image_dimension_2d: u32,
}

#[derive(Copy, Clone, Debug, PartialEq, Eq, Hash)]
pub enum AdapterKind {
    DiscreteGpu,
    IntegratedGpu,
    Other,
}

/// Queue family indices required by the renderer.
///
/// The graphics and present family are frequently the same index; device
/// creation deduplicates them.
#[derive(Copy, Clone, Debug, PartialEq, Eq, Hash)]
pub struct QueueFamilyIndices {
    pub graphics: u32,
    pub present: u32,
}

impl QueueFamilyIndices {
    /// The set of unique family indices, used to build one queue-create info
    /// per family.
    pub fn unique(&self) -> Vec<u32> {
        if self.graphics == self.present {
            vec![self.graphics]
        } else {
            vec![self.graphics, self.present]
        }
    }
}

#[cfg(test)]
mod tests {
    use super::QueueFamilyIndices;

    #[test]
    fn unique_queue_families_deduplicated() {
        let families = QueueFamilyIndices {
            graphics: 0,
            present: 0,
        };
        assert_eq!(families.unique(), vec![0]);

        let families = QueueFamilyIndices {
            graphics: 0,
            present: 2,
        };
        assert_eq!(families.unique(), vec![0, 2]);
    }
}
