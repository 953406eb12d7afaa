use std::borrow::Cow;
use std::collections::HashSet;
use std::ffi::{c_void, CStr, CString};
use std::path::{Path, PathBuf};
use std::ptr::null_mut;
use std::sync::Arc;

use ash::ext::debug_utils;
use ash::vk::{
    self, AccessFlags, ApplicationInfo, Bool32, BufferCreateInfo, BufferUsageFlags,
    CommandBufferAllocateInfo, CommandBufferBeginInfo, CommandBufferLevel,
    CommandBufferUsageFlags, CommandPoolCreateFlags, CommandPoolCreateInfo, ComponentMapping,
    ComponentSwizzle, DebugUtilsMessageSeverityFlagsEXT, DebugUtilsMessageTypeFlagsEXT,
    DebugUtilsMessengerCallbackDataEXT, DebugUtilsMessengerCreateInfoEXT, DebugUtilsMessengerEXT,
    DependencyFlags, DeviceCreateInfo, DeviceQueueCreateInfo, Extent3D, FenceCreateFlags,
    FenceCreateInfo, Format, FormatFeatureFlags, ImageAspectFlags, ImageCreateFlags, ImageLayout,
    ImageMemoryBarrier, ImageSubresourceRange, ImageTiling, ImageUsageFlags, ImageViewCreateInfo,
    ImageViewType, InstanceCreateInfo, MemoryAllocateInfo, MemoryMapFlags, MemoryPropertyFlags,
    PhysicalDevice, PhysicalDeviceFeatures, PhysicalDeviceType, PipelineStageFlags,
    SampleCountFlags, SemaphoreCreateInfo, ShaderModuleCreateInfo, ShaderStageFlags, SharingMode,
    SubmitInfo, FALSE,
};
use ash::Entry;
use parking_lot::Mutex;
use raw_window_handle::{RawDisplayHandle, RawWindowHandle};
use thiserror::Error;
use tracing::{debug, info, warn};

use super::{AdapterKind, AdapterProperties, DeviceConfig, InstanceConfig, QueueFamilyIndices};

/// The highest version of Vulkan that we support.
///
/// See <https://registry.khronos.org/vulkan/specs/latest/man/html/VkApplicationInfo.html>
const API_VERSION: u32 = make_api_version(1, 2, 0);

const APPLICATION_VERSION: u32 = 0;
const ENGINE_VERSION: u32 = 0;

const VULKAN_VALIDATION_LAYERS: &CStr = c"VK_LAYER_KHRONOS_validation";

const EXTENSIONS: &[&CStr] = &[
    // Required to create any surface.
    ash::khr::surface::NAME,
    // Wayland
    #[cfg(target_os = "linux")]
    ash::khr::wayland_surface::NAME,
    // X11
    #[cfg(target_os = "linux")]
    ash::khr::xcb_surface::NAME,
    #[cfg(target_os = "linux")]
    ash::khr::xlib_surface::NAME,
    // Windows
    #[cfg(target_os = "windows")]
    ash::khr::win32_surface::NAME,
];

const DEVICE_EXTENSIONS: &[&CStr] = &[
    // VK_KHR_swapchain
    ash::khr::swapchain::NAME,
];

/// Depth formats in preference order. The first format with optimal-tiling
/// depth/stencil attachment support wins.
const DEPTH_FORMAT_CANDIDATES: &[Format] = &[
    Format::D32_SFLOAT,
    Format::D32_SFLOAT_S8_UINT,
    Format::D24_UNORM_S8_UINT,
];

const fn make_api_version(major: u32, minor: u32, patch: u32) -> u32 {
    (major << 22) | (minor << 12) | patch
}

#[derive(Debug, Error)]
pub enum Error {
    #[error("failed to load the vulkan library: {0}")]
    EntryLoading(#[from] ash::LoadingError),
    #[error("missing instance layer {0:?}")]
    MissingLayer(&'static CStr),
    #[error("no suitable physical device")]
    NoSuitableAdapter,
    #[error("the surface is unsupported by the window system")]
    UnsupportedWindowHandle,
    #[error("no supported format among {0:?}")]
    NoSupportedFormat(Vec<Format>),
    #[error("no suitable memory type for type mask {type_mask:#x}")]
    NoSuitableMemoryType { type_mask: u32 },
    #[error("failed to read shader {path:?}: {err}")]
    ShaderIo {
        path: PathBuf,
        err: std::io::Error,
    },
    #[error("render pass has no attachments, subpasses or dependencies")]
    EmptyRenderPass,
    #[error("subpass has no color attachment references")]
    NoColorAttachments,
    #[error(transparent)]
    Vk(#[from] vk::Result),
}

/// Wrapper around a Vulkan instance, created once at startup.
#[derive(Clone)]
pub struct Instance {
    shared: Arc<InstanceShared>,
}

struct InstanceShared {
    entry: Entry,
    instance: ash::Instance,
    messenger: Option<DebugUtilsMessengerEXT>,
}

impl Instance {
    pub fn new(config: &InstanceConfig) -> Result<Self, Error> {
        let entry = unsafe { Entry::load()? };

        let mut app = ApplicationInfo::default()
            .application_version(APPLICATION_VERSION)
            .engine_version(ENGINE_VERSION)
            .api_version(API_VERSION);

        if let Some(name) = config.app_name {
            app = app.application_name(name);
        }

        let mut layers = Vec::new();
        if config.validation {
            let available_layers = unsafe {
                entry
                    .enumerate_instance_layer_properties()?
                    .iter()
                    .map(|layer| layer.layer_name)
                    .collect::<HashSet<_>>()
            };

            if !available_layers.contains(&cstr_to_fixed_array(VULKAN_VALIDATION_LAYERS)) {
                return Err(Error::MissingLayer(VULKAN_VALIDATION_LAYERS));
            }

            layers.push(VULKAN_VALIDATION_LAYERS.as_ptr());
        }

        let mut extensions: Vec<_> = EXTENSIONS.iter().map(|ext| ext.as_ptr()).collect();
        if config.validation {
            extensions.push(debug_utils::NAME.as_ptr());
        }

        let mut info = InstanceCreateInfo::default()
            .application_info(&app)
            .enabled_layer_names(&layers)
            .enabled_extension_names(&extensions);

        let mut debug_info = DebugUtilsMessengerCreateInfoEXT::default()
            .message_severity(
                DebugUtilsMessageSeverityFlagsEXT::ERROR
                    | DebugUtilsMessageSeverityFlagsEXT::WARNING
                    | DebugUtilsMessageSeverityFlagsEXT::INFO,
            )
            .message_type(
                DebugUtilsMessageTypeFlagsEXT::GENERAL
                    | DebugUtilsMessageTypeFlagsEXT::VALIDATION
                    | DebugUtilsMessageTypeFlagsEXT::PERFORMANCE,
            )
            .pfn_user_callback(Some(debug_callback));
        if config.validation {
            info = info.push_next(&mut debug_info);
        }

        let instance = unsafe { entry.create_instance(&info, None)? };

        let messenger = if config.validation {
            let messenger = unsafe {
                debug_utils::Instance::new(&entry, &instance)
                    .create_debug_utils_messenger(&debug_info, None)?
            };
            Some(messenger)
        } else {
            None
        };

        Ok(Self {
            shared: Arc::new(InstanceShared {
                entry,
                instance,
                messenger,
            }),
        })
    }

    pub fn adapters(&self) -> Result<Vec<Adapter>, Error> {
        let physical_devices = unsafe { self.shared.instance.enumerate_physical_devices()? };
        Ok(physical_devices
            .into_iter()
            .map(|physical_device| Adapter {
                instance: self.clone(),
                physical_device,
            })
            .collect())
    }

    /// Selects the highest-scoring suitable adapter.
    ///
    /// Returns [`Error::NoSuitableAdapter`] if no adapter exposes a graphics
    /// and a present queue family together with anisotropic sampling.
    pub fn select_adapter(&self, surface: &Surface) -> Result<Adapter, Error> {
        let mut best: Option<(u64, Adapter)> = None;

        for adapter in self.adapters()? {
            let score = adapter.rate(surface)?;
            let properties = adapter.properties();
            debug!(
                "adapter {:?} ({:?}) scored {}",
                properties.name, properties.kind, score
            );

            if score == 0 || !adapter.is_suitable(surface)? {
                continue;
            }

            if best.as_ref().map_or(true, |(prev, _)| score > *prev) {
                best = Some((score, adapter));
            }
        }

        let (_, adapter) = best.ok_or(Error::NoSuitableAdapter)?;
        info!("selected adapter {:?}", adapter.properties().name);
        Ok(adapter)
    }

    pub fn create_surface(
        &self,
        display: RawDisplayHandle,
        window: RawWindowHandle,
    ) -> Result<Surface, Error> {
        let surface = match (display, window) {
            #[cfg(target_os = "linux")]
            (RawDisplayHandle::Wayland(display), RawWindowHandle::Wayland(window)) => {
                let info = vk::WaylandSurfaceCreateInfoKHR::default()
                    .display(display.display.as_ptr())
                    .surface(window.surface.as_ptr());

                let instance = ash::khr::wayland_surface::Instance::new(
                    &self.shared.entry,
                    &self.shared.instance,
                );
                unsafe { instance.create_wayland_surface(&info, None)? }
            }
            #[cfg(target_os = "linux")]
            (RawDisplayHandle::Xcb(display), RawWindowHandle::Xcb(window)) => {
                let info = vk::XcbSurfaceCreateInfoKHR::default()
                    .connection(display.connection.map(|v| v.as_ptr()).unwrap_or(null_mut()))
                    .window(window.window.get());

                let instance =
                    ash::khr::xcb_surface::Instance::new(&self.shared.entry, &self.shared.instance);
                unsafe { instance.create_xcb_surface(&info, None)? }
            }
            #[cfg(target_os = "linux")]
            (RawDisplayHandle::Xlib(display), RawWindowHandle::Xlib(window)) => {
                let info = vk::XlibSurfaceCreateInfoKHR::default()
                    .dpy(display.display.map(|v| v.as_ptr()).unwrap_or(null_mut()))
                    .window(window.window);

                let instance = ash::khr::xlib_surface::Instance::new(
                    &self.shared.entry,
                    &self.shared.instance,
                );
                unsafe { instance.create_xlib_surface(&info, None)? }
            }
            #[cfg(target_os = "windows")]
            (RawDisplayHandle::Windows(_), RawWindowHandle::Win32(window)) => {
                let info = vk::Win32SurfaceCreateInfoKHR::default()
                    .hinstance(window.hinstance.map(|v| v.get()).unwrap_or_default())
                    .hwnd(window.hwnd.get());

                let instance = ash::khr::win32_surface::Instance::new(
                    &self.shared.entry,
                    &self.shared.instance,
                );
                unsafe { instance.create_win32_surface(&info, None)? }
            }
            _ => return Err(Error::UnsupportedWindowHandle),
        };

        Ok(Surface {
            shared: Arc::new(SurfaceShared {
                instance: self.clone(),
                surface,
            }),
        })
    }

    pub fn raw(&self) -> &ash::Instance {
        &self.shared.instance
    }

    pub fn entry(&self) -> &Entry {
        &self.shared.entry
    }
}

impl Drop for InstanceShared {
    fn drop(&mut self) {
        if let Some(messenger) = self.messenger.take() {
            unsafe {
                debug_utils::Instance::new(&self.entry, &self.instance)
                    .destroy_debug_utils_messenger(messenger, None);
            }
        }

        unsafe {
            self.instance.destroy_instance(None);
        }
    }
}

/// A window surface. Cheaply clonable; the native surface is destroyed when
/// the last clone is dropped.
#[derive(Clone)]
pub struct Surface {
    shared: Arc<SurfaceShared>,
}

struct SurfaceShared {
    instance: Instance,
    surface: vk::SurfaceKHR,
}

impl Surface {
    pub fn raw(&self) -> vk::SurfaceKHR {
        self.shared.surface
    }

    fn khr(&self) -> ash::khr::surface::Instance {
        ash::khr::surface::Instance::new(
            &self.shared.instance.shared.entry,
            &self.shared.instance.shared.instance,
        )
    }

    pub fn supports_family(&self, adapter: &Adapter, family: u32) -> Result<bool, Error> {
        let supported = unsafe {
            self.khr().get_physical_device_surface_support(
                adapter.physical_device,
                family,
                self.shared.surface,
            )?
        };
        Ok(supported)
    }

    pub fn capabilities(&self, device: &Device) -> Result<vk::SurfaceCapabilitiesKHR, Error> {
        let caps = unsafe {
            self.khr().get_physical_device_surface_capabilities(
                device.shared.physical_device,
                self.shared.surface,
            )?
        };
        Ok(caps)
    }

    pub fn formats(&self, device: &Device) -> Result<Vec<vk::SurfaceFormatKHR>, Error> {
        let formats = unsafe {
            self.khr().get_physical_device_surface_formats(
                device.shared.physical_device,
                self.shared.surface,
            )?
        };
        Ok(formats)
    }

    pub fn present_modes(&self, device: &Device) -> Result<Vec<vk::PresentModeKHR>, Error> {
        let modes = unsafe {
            self.khr().get_physical_device_surface_present_modes(
                device.shared.physical_device,
                self.shared.surface,
            )?
        };
        Ok(modes)
    }
}

impl Drop for SurfaceShared {
    fn drop(&mut self) {
        let khr = ash::khr::surface::Instance::new(
            &self.instance.shared.entry,
            &self.instance.shared.instance,
        );
        unsafe {
            khr.destroy_surface(self.surface, None);
        }
    }
}

/// A physical device candidate.
#[derive(Clone)]
pub struct Adapter {
    instance: Instance,
    physical_device: PhysicalDevice,
}

impl Adapter {
    pub fn properties(&self) -> AdapterProperties {
        let properties = unsafe {
            self.instance
                .shared
                .instance
                .get_physical_device_properties(self.physical_device)
        };

        // `device_name` is a null-terminated UTF-8 string.
        let name = unsafe {
            CStr::from_ptr(properties.device_name.as_ptr())
                .to_string_lossy()
                .to_string()
        };

        let kind = match properties.device_type {
            PhysicalDeviceType::DISCRETE_GPU => AdapterKind::DiscreteGpu,
            PhysicalDeviceType::INTEGRATED_GPU => AdapterKind::IntegratedGpu,
            _ => AdapterKind::Other,
        };

        AdapterProperties {
            name,
            kind,
            max_image_dimension_2d: properties.limits.max_image_dimension2_d,
        }
    }

    fn features(&self) -> PhysicalDeviceFeatures {
        unsafe {
            self.instance
                .shared
                .instance
                .get_physical_device_features(self.physical_device)
        }
    }

    /// Scores the adapter: discrete-GPU bonus, maximum 2D image dimension and
    /// queue-availability bonuses. Returns 0 for adapters that cannot run the
    /// renderer at all.
    pub fn rate(&self, surface: &Surface) -> Result<u64, Error> {
        let properties = self.properties();
        let features = self.features();

        if features.geometry_shader == FALSE {
            return Ok(0);
        }

        let mut score = 0;
        if properties.kind == AdapterKind::DiscreteGpu {
            score += 1000;
        }
        score += u64::from(properties.max_image_dimension_2d);

        if self.queue_family_indices(surface)?.is_none() {
            return Ok(0);
        }
        // One bonus each for the graphics and the present family.
        score += 200;

        Ok(score)
    }

    /// A device is suitable only if it exposes both a graphics-capable and a
    /// presentation-capable queue family and supports anisotropic sampling.
    pub fn is_suitable(&self, surface: &Surface) -> Result<bool, Error> {
        let features = self.features();
        Ok(self.queue_family_indices(surface)?.is_some()
            && features.sampler_anisotropy != FALSE
            && features.geometry_shader != FALSE)
    }

    pub fn queue_family_indices(
        &self,
        surface: &Surface,
    ) -> Result<Option<QueueFamilyIndices>, Error> {
        let queue_families = unsafe {
            self.instance
                .shared
                .instance
                .get_physical_device_queue_family_properties(self.physical_device)
        };

        let mut graphics = None;
        let mut present = None;

        for (index, family) in queue_families.iter().enumerate() {
            let index = index as u32;

            if family.queue_count > 0 && family.queue_flags.contains(vk::QueueFlags::GRAPHICS) {
                graphics.get_or_insert(index);
            }

            if surface.supports_family(self, index)? {
                present.get_or_insert(index);
            }

            if graphics.is_some() && present.is_some() {
                break;
            }
        }

        match (graphics, present) {
            (Some(graphics), Some(present)) => Ok(Some(QueueFamilyIndices { graphics, present })),
            _ => Ok(None),
        }
    }

    pub fn raw(&self) -> PhysicalDevice {
        self.physical_device
    }
}

/// The logical device together with its graphics and present queues.
///
/// `Device` is cheaply clonable; every GPU object holds a clone, so the
/// native device outlives all objects created from it and is destroyed last.
#[derive(Clone)]
pub struct Device {
    shared: Arc<DeviceShared>,
}

struct DeviceShared {
    // Keeps the instance alive for as long as any device object exists.
    instance: Instance,
    physical_device: PhysicalDevice,
    device: ash::Device,
    graphics_queue: vk::Queue,
    present_queue: vk::Queue,
    families: QueueFamilyIndices,
    limits: vk::PhysicalDeviceLimits,
}

impl Device {
    pub fn new(
        adapter: &Adapter,
        surface: &Surface,
        config: &DeviceConfig,
    ) -> Result<Self, Error> {
        let families = adapter
            .queue_family_indices(surface)?
            .ok_or(Error::NoSuitableAdapter)?;

        let queue_priorities = [1.0];
        let queue_infos: Vec<_> = families
            .unique()
            .into_iter()
            .map(|family| {
                DeviceQueueCreateInfo::default()
                    .queue_family_index(family)
                    .queue_priorities(&queue_priorities)
            })
            .collect();

        let mut extensions: Vec<_> = DEVICE_EXTENSIONS.iter().map(|ext| ext.as_ptr()).collect();
        extensions.extend(config.extra_extensions.iter().map(|ext| ext.as_ptr()));

        let features = PhysicalDeviceFeatures::default().sampler_anisotropy(true);

        let create_info = DeviceCreateInfo::default()
            .queue_create_infos(&queue_infos)
            .enabled_extension_names(&extensions)
            .enabled_features(&features);

        let device = unsafe {
            adapter.instance.shared.instance.create_device(
                adapter.physical_device,
                &create_info,
                None,
            )?
        };

        let graphics_queue = unsafe { device.get_device_queue(families.graphics, 0) };
        let present_queue = unsafe { device.get_device_queue(families.present, 0) };

        let limits = unsafe {
            adapter
                .instance
                .shared
                .instance
                .get_physical_device_properties(adapter.physical_device)
                .limits
        };

        info!(
            "created device (graphics family {}, present family {})",
            families.graphics, families.present
        );

        Ok(Self {
            shared: Arc::new(DeviceShared {
                instance: adapter.instance.clone(),
                physical_device: adapter.physical_device,
                device,
                graphics_queue,
                present_queue,
                families,
                limits,
            }),
        })
    }

    pub fn raw(&self) -> &ash::Device {
        &self.shared.device
    }

    pub fn instance(&self) -> &Instance {
        &self.shared.instance
    }

    pub fn physical_device(&self) -> PhysicalDevice {
        self.shared.physical_device
    }

    pub fn graphics_queue(&self) -> vk::Queue {
        self.shared.graphics_queue
    }

    pub fn present_queue(&self) -> vk::Queue {
        self.shared.present_queue
    }

    pub fn queue_families(&self) -> QueueFamilyIndices {
        self.shared.families
    }

    /// The highest sample count supported for both color and depth
    /// framebuffer attachments.
    pub fn max_sample_count(&self) -> SampleCountFlags {
        let counts = self.shared.limits.framebuffer_color_sample_counts
            & self.shared.limits.framebuffer_depth_sample_counts;
        highest_sample_count(counts)
    }

    pub fn max_sampler_anisotropy(&self) -> f32 {
        self.shared.limits.max_sampler_anisotropy
    }

    pub fn find_memory_type(
        &self,
        type_mask: u32,
        properties: MemoryPropertyFlags,
    ) -> Result<u32, Error> {
        let memory_properties = unsafe {
            self.shared
                .instance
                .shared
                .instance
                .get_physical_device_memory_properties(self.shared.physical_device)
        };

        find_memory_type_index(&memory_properties, type_mask, properties)
            .ok_or(Error::NoSuitableMemoryType { type_mask })
    }

    /// Returns the first candidate format supporting `features` with optimal
    /// tiling.
    pub fn find_supported_format(
        &self,
        candidates: &[Format],
        features: FormatFeatureFlags,
    ) -> Result<Format, Error> {
        select_format(candidates, |format| {
            let props = unsafe {
                self.shared
                    .instance
                    .shared
                    .instance
                    .get_physical_device_format_properties(self.shared.physical_device, format)
            };
            props.optimal_tiling_features.contains(features)
        })
        .ok_or_else(|| Error::NoSupportedFormat(candidates.to_vec()))
    }

    pub fn find_depth_format(&self) -> Result<Format, Error> {
        self.find_supported_format(
            DEPTH_FORMAT_CANDIDATES,
            FormatFeatureFlags::DEPTH_STENCIL_ATTACHMENT,
        )
    }

    /// Blocks until all queues of the device are idle.
    pub fn wait_idle(&self) -> Result<(), Error> {
        unsafe {
            self.shared.device.device_wait_idle()?;
        }
        Ok(())
    }
}

impl Drop for DeviceShared {
    fn drop(&mut self) {
        unsafe {
            self.device.destroy_device(None);
        }
    }
}

pub struct Semaphore {
    device: Device,
    semaphore: vk::Semaphore,
}

impl Semaphore {
    pub fn new(device: &Device) -> Result<Self, Error> {
        let info = SemaphoreCreateInfo::default();
        let semaphore = unsafe { device.raw().create_semaphore(&info, None)? };
        Ok(Self {
            device: device.clone(),
            semaphore,
        })
    }

    pub fn raw(&self) -> vk::Semaphore {
        self.semaphore
    }
}

impl Drop for Semaphore {
    fn drop(&mut self) {
        unsafe {
            self.device.raw().destroy_semaphore(self.semaphore, None);
        }
    }
}

pub struct Fence {
    device: Device,
    fence: vk::Fence,
}

impl Fence {
    pub fn new(device: &Device, signaled: bool) -> Result<Self, Error> {
        let flags = if signaled {
            FenceCreateFlags::SIGNALED
        } else {
            FenceCreateFlags::empty()
        };
        let info = FenceCreateInfo::default().flags(flags);
        let fence = unsafe { device.raw().create_fence(&info, None)? };
        Ok(Self {
            device: device.clone(),
            fence,
        })
    }

    /// Blocks the calling thread until the fence is signaled.
    pub fn wait(&self) -> Result<(), Error> {
        unsafe {
            self.device
                .raw()
                .wait_for_fences(&[self.fence], true, u64::MAX)?;
        }
        Ok(())
    }

    pub fn reset(&self) -> Result<(), Error> {
        unsafe {
            self.device.raw().reset_fences(&[self.fence])?;
        }
        Ok(())
    }

    pub fn raw(&self) -> vk::Fence {
        self.fence
    }
}

impl Drop for Fence {
    fn drop(&mut self) {
        unsafe {
            self.device.raw().destroy_fence(self.fence, None);
        }
    }
}

/// A command pool on the graphics queue family.
pub struct CommandPool {
    device: Device,
    pool: vk::CommandPool,
}

impl CommandPool {
    pub fn new(device: &Device) -> Result<Self, Error> {
        let info = CommandPoolCreateInfo::default()
            .flags(CommandPoolCreateFlags::RESET_COMMAND_BUFFER)
            .queue_family_index(device.queue_families().graphics);

        let pool = unsafe { device.raw().create_command_pool(&info, None)? };

        Ok(Self {
            device: device.clone(),
            pool,
        })
    }

    /// Allocates a primary command buffer from the pool.
    pub fn allocate(&self) -> Result<CommandBuffer, Error> {
        let info = CommandBufferAllocateInfo::default()
            .command_pool(self.pool)
            .level(CommandBufferLevel::PRIMARY)
            .command_buffer_count(1);

        let buffers = unsafe { self.device.raw().allocate_command_buffers(&info)? };

        Ok(CommandBuffer {
            device: self.device.clone(),
            pool: self.pool,
            buffer: buffers[0],
        })
    }

    /// Allocates a command buffer already recording with one-time-submit
    /// usage, for synchronous upload and capture paths.
    pub fn one_shot(&self) -> Result<CommandBuffer, Error> {
        let cmd = self.allocate()?;
        cmd.begin(CommandBufferUsageFlags::ONE_TIME_SUBMIT)?;
        Ok(cmd)
    }

    pub fn raw(&self) -> vk::CommandPool {
        self.pool
    }
}

impl Drop for CommandPool {
    fn drop(&mut self) {
        unsafe {
            self.device.raw().destroy_command_pool(self.pool, None);
        }
    }
}

/// A primary command buffer.
///
/// The buffer is freed back to its pool on drop. All submissions using it
/// must have completed by then; the frame loop guarantees this via its fences
/// and the one-shot paths via [`submit_and_wait`].
///
/// [`submit_and_wait`]: Self::submit_and_wait
pub struct CommandBuffer {
    device: Device,
    pool: vk::CommandPool,
    buffer: vk::CommandBuffer,
}

impl CommandBuffer {
    pub fn begin(&self, flags: CommandBufferUsageFlags) -> Result<(), Error> {
        let info = CommandBufferBeginInfo::default().flags(flags);
        unsafe {
            self.device.raw().begin_command_buffer(self.buffer, &info)?;
        }
        Ok(())
    }

    pub fn end(&self) -> Result<(), Error> {
        unsafe {
            self.device.raw().end_command_buffer(self.buffer)?;
        }
        Ok(())
    }

    pub fn begin_render_pass(&self, info: &vk::RenderPassBeginInfo<'_>) {
        unsafe {
            self.device
                .raw()
                .cmd_begin_render_pass(self.buffer, info, vk::SubpassContents::INLINE);
        }
    }

    pub fn end_render_pass(&self) {
        unsafe {
            self.device.raw().cmd_end_render_pass(self.buffer);
        }
    }

    pub fn bind_graphics_pipeline(&self, pipeline: vk::Pipeline) {
        unsafe {
            self.device.raw().cmd_bind_pipeline(
                self.buffer,
                vk::PipelineBindPoint::GRAPHICS,
                pipeline,
            );
        }
    }

    pub fn bind_descriptor_sets(
        &self,
        layout: vk::PipelineLayout,
        first_set: u32,
        sets: &[vk::DescriptorSet],
    ) {
        unsafe {
            self.device.raw().cmd_bind_descriptor_sets(
                self.buffer,
                vk::PipelineBindPoint::GRAPHICS,
                layout,
                first_set,
                sets,
                &[],
            );
        }
    }

    pub fn bind_vertex_buffer(&self, buffer: &Buffer) {
        unsafe {
            self.device
                .raw()
                .cmd_bind_vertex_buffers(self.buffer, 0, &[buffer.raw()], &[0]);
        }
    }

    pub fn bind_index_buffer(&self, buffer: &Buffer) {
        unsafe {
            self.device.raw().cmd_bind_index_buffer(
                self.buffer,
                buffer.raw(),
                0,
                vk::IndexType::UINT32,
            );
        }
    }

    pub fn push_constants(
        &self,
        layout: vk::PipelineLayout,
        stages: ShaderStageFlags,
        offset: u32,
        data: &[u8],
    ) {
        unsafe {
            self.device
                .raw()
                .cmd_push_constants(self.buffer, layout, stages, offset, data);
        }
    }

    pub fn draw(&self, vertex_count: u32) {
        unsafe {
            self.device.raw().cmd_draw(self.buffer, vertex_count, 1, 0, 0);
        }
    }

    pub fn draw_indexed(&self, index_count: u32) {
        unsafe {
            self.device
                .raw()
                .cmd_draw_indexed(self.buffer, index_count, 1, 0, 0, 0);
        }
    }

    pub fn copy_buffer(&self, src: &Buffer, dst: &Buffer, size: vk::DeviceSize) {
        let region = vk::BufferCopy {
            src_offset: 0,
            dst_offset: 0,
            size,
        };
        unsafe {
            self.device
                .raw()
                .cmd_copy_buffer(self.buffer, src.raw(), dst.raw(), &[region]);
        }
    }

    pub fn copy_buffer_to_image(
        &self,
        src: &Buffer,
        dst: vk::Image,
        layout: ImageLayout,
        regions: &[vk::BufferImageCopy],
    ) {
        unsafe {
            self.device
                .raw()
                .cmd_copy_buffer_to_image(self.buffer, src.raw(), dst, layout, regions);
        }
    }

    /// Copies one rendered face into the given cubemap array layer.
    ///
    /// The source must be in `TRANSFER_SRC_OPTIMAL` and the cubemap in
    /// `TRANSFER_DST_OPTIMAL`.
    pub fn copy_image_to_cubemap_face(
        &self,
        src: vk::Image,
        dst: vk::Image,
        width: u32,
        height: u32,
        face: u32,
        mip_level: u32,
    ) {
        let region = vk::ImageCopy {
            src_subresource: vk::ImageSubresourceLayers {
                aspect_mask: ImageAspectFlags::COLOR,
                mip_level: 0,
                base_array_layer: 0,
                layer_count: 1,
            },
            src_offset: vk::Offset3D::default(),
            dst_subresource: vk::ImageSubresourceLayers {
                aspect_mask: ImageAspectFlags::COLOR,
                mip_level,
                base_array_layer: face,
                layer_count: 1,
            },
            dst_offset: vk::Offset3D::default(),
            extent: Extent3D {
                width,
                height,
                depth: 1,
            },
        };

        unsafe {
            self.device.raw().cmd_copy_image(
                self.buffer,
                src,
                ImageLayout::TRANSFER_SRC_OPTIMAL,
                dst,
                ImageLayout::TRANSFER_DST_OPTIMAL,
                &[region],
            );
        }
    }

    pub fn pipeline_barrier(
        &self,
        src_stage: PipelineStageFlags,
        dst_stage: PipelineStageFlags,
        barrier: &ImageMemoryBarrier<'_>,
    ) {
        unsafe {
            self.device.raw().cmd_pipeline_barrier(
                self.buffer,
                src_stage,
                dst_stage,
                DependencyFlags::empty(),
                &[],
                &[],
                std::slice::from_ref(barrier),
            );
        }
    }

    /// Submits the buffer to the graphics queue without any semaphores.
    pub fn submit(&self, fence: Option<&Fence>) -> Result<(), Error> {
        let buffers = [self.buffer];
        let info = SubmitInfo::default().command_buffers(&buffers);

        unsafe {
            self.device.raw().queue_submit(
                self.device.graphics_queue(),
                &[info],
                fence.map_or(vk::Fence::null(), Fence::raw),
            )?;
        }
        Ok(())
    }

    /// Submits the buffer and blocks until the graphics queue drains.
    ///
    /// Used for all synchronous upload and capture paths, which only run at
    /// initialization time.
    pub fn submit_and_wait(&self) -> Result<(), Error> {
        self.submit(None)?;
        unsafe {
            self.device
                .raw()
                .queue_wait_idle(self.device.graphics_queue())?;
        }
        Ok(())
    }

    /// Submits with the frame-loop semaphore/fence discipline: wait for
    /// `wait` at `wait_stage`, signal `signal`, signal `fence` on completion.
    pub fn submit_with_sync(
        &self,
        wait: &Semaphore,
        wait_stage: PipelineStageFlags,
        signal: &Semaphore,
        fence: &Fence,
    ) -> Result<(), Error> {
        let buffers = [self.buffer];
        let wait_semaphores = [wait.raw()];
        let wait_stages = [wait_stage];
        let signal_semaphores = [signal.raw()];

        let info = SubmitInfo::default()
            .wait_semaphores(&wait_semaphores)
            .wait_dst_stage_mask(&wait_stages)
            .command_buffers(&buffers)
            .signal_semaphores(&signal_semaphores);

        unsafe {
            self.device
                .raw()
                .queue_submit(self.device.graphics_queue(), &[info], fence.raw())?;
        }
        Ok(())
    }

    pub fn raw(&self) -> vk::CommandBuffer {
        self.buffer
    }
}

impl Drop for CommandBuffer {
    fn drop(&mut self) {
        unsafe {
            self.device
                .raw()
                .free_command_buffers(self.pool, &[self.buffer]);
        }
    }
}

/// A buffer together with its backing memory allocation and a
/// descriptor-compatible view (offset + range).
pub struct Buffer {
    device: Device,
    buffer: vk::Buffer,
    memory: vk::DeviceMemory,
    size: vk::DeviceSize,
    properties: MemoryPropertyFlags,
}

impl Buffer {
    pub fn new(
        device: &Device,
        size: vk::DeviceSize,
        usage: BufferUsageFlags,
        properties: MemoryPropertyFlags,
    ) -> Result<Self, Error> {
        assert!(size > 0);

        let info = BufferCreateInfo::default()
            .size(size)
            .usage(usage)
            .sharing_mode(SharingMode::EXCLUSIVE);

        let buffer = unsafe { device.raw().create_buffer(&info, None)? };

        let requirements = unsafe { device.raw().get_buffer_memory_requirements(buffer) };
        let memory_type = device.find_memory_type(requirements.memory_type_bits, properties)?;

        let alloc = MemoryAllocateInfo::default()
            .allocation_size(requirements.size)
            .memory_type_index(memory_type);
        let memory = unsafe { device.raw().allocate_memory(&alloc, None)? };

        unsafe {
            device.raw().bind_buffer_memory(buffer, memory, 0)?;
        }

        Ok(Self {
            device: device.clone(),
            buffer,
            memory,
            size,
            properties,
        })
    }

    /// Device-local vertex buffer, populated through a staging copy.
    pub fn create_vertex(device: &Device, pool: &CommandPool, data: &[u8]) -> Result<Self, Error> {
        let buffer = Self::new(
            device,
            data.len() as vk::DeviceSize,
            BufferUsageFlags::VERTEX_BUFFER | BufferUsageFlags::TRANSFER_DST,
            MemoryPropertyFlags::DEVICE_LOCAL,
        )?;
        buffer.write_staged(pool, data)?;
        Ok(buffer)
    }

    /// Device-local index buffer, populated through a staging copy.
    pub fn create_index(device: &Device, pool: &CommandPool, data: &[u8]) -> Result<Self, Error> {
        let buffer = Self::new(
            device,
            data.len() as vk::DeviceSize,
            BufferUsageFlags::INDEX_BUFFER | BufferUsageFlags::TRANSFER_DST,
            MemoryPropertyFlags::DEVICE_LOCAL,
        )?;
        buffer.write_staged(pool, data)?;
        Ok(buffer)
    }

    /// Host-visible, host-coherent uniform buffer, optionally pre-populated
    /// through a direct mapping.
    pub fn create_uniform(
        device: &Device,
        size: vk::DeviceSize,
        data: Option<&[u8]>,
    ) -> Result<Self, Error> {
        let buffer = Self::new(
            device,
            size,
            BufferUsageFlags::UNIFORM_BUFFER,
            MemoryPropertyFlags::HOST_VISIBLE | MemoryPropertyFlags::HOST_COHERENT,
        )?;
        if let Some(data) = data {
            buffer.write_mapped(data)?;
        }
        Ok(buffer)
    }

    /// Transient host-visible staging buffer.
    pub fn create_staging(device: &Device, data: Option<&[u8]>, size: vk::DeviceSize) -> Result<Self, Error> {
        let buffer = Self::new(
            device,
            size,
            BufferUsageFlags::TRANSFER_SRC,
            MemoryPropertyFlags::HOST_VISIBLE | MemoryPropertyFlags::HOST_COHERENT,
        )?;
        if let Some(data) = data {
            buffer.write_mapped(data)?;
        }
        Ok(buffer)
    }

    /// Writes through a direct memory mapping. The buffer must have been
    /// created host-visible.
    pub fn write_mapped(&self, data: &[u8]) -> Result<(), Error> {
        assert!(self.properties.contains(MemoryPropertyFlags::HOST_VISIBLE));
        assert!(data.len() as vk::DeviceSize <= self.size);

        unsafe {
            let ptr = self.device.raw().map_memory(
                self.memory,
                0,
                data.len() as vk::DeviceSize,
                MemoryMapFlags::empty(),
            )?;
            std::ptr::copy_nonoverlapping(data.as_ptr(), ptr.cast::<u8>(), data.len());
            self.device.raw().unmap_memory(self.memory);
        }
        Ok(())
    }

    /// Writes through a temporary staging buffer and a one-time copy
    /// submission that blocks until the copy completes. Works for any memory
    /// properties; the staging buffer is destroyed right after the copy.
    pub fn write_staged(&self, pool: &CommandPool, data: &[u8]) -> Result<(), Error> {
        assert!(data.len() as vk::DeviceSize <= self.size);

        let staging = Self::create_staging(&self.device, Some(data), data.len() as vk::DeviceSize)?;

        let cmd = pool.one_shot()?;
        cmd.copy_buffer(&staging, self, data.len() as vk::DeviceSize);
        cmd.end()?;
        cmd.submit_and_wait()?;

        Ok(())
    }

    pub fn descriptor_info(&self) -> vk::DescriptorBufferInfo {
        vk::DescriptorBufferInfo {
            buffer: self.buffer,
            offset: 0,
            range: self.size,
        }
    }

    pub fn size(&self) -> vk::DeviceSize {
        self.size
    }

    pub fn raw(&self) -> vk::Buffer {
        self.buffer
    }
}

impl Drop for Buffer {
    fn drop(&mut self) {
        unsafe {
            self.device.raw().destroy_buffer(self.buffer, None);
            self.device.raw().free_memory(self.memory, None);
        }
    }
}

/// Parameters for a generic [`Image`].
#[derive(Clone, Debug)]
pub struct ImageDescriptor {
    pub width: u32,
    pub height: u32,
    pub format: Format,
    pub tiling: ImageTiling,
    pub usage: ImageUsageFlags,
    pub memory: MemoryPropertyFlags,
    pub samples: SampleCountFlags,
    pub aspect: ImageAspectFlags,
    pub cubemap: bool,
    pub mip_levels: u32,
}

impl ImageDescriptor {
    pub fn color_2d(width: u32, height: u32, format: Format, usage: ImageUsageFlags) -> Self {
        Self {
            width,
            height,
            format,
            tiling: ImageTiling::OPTIMAL,
            usage,
            memory: MemoryPropertyFlags::DEVICE_LOCAL,
            samples: SampleCountFlags::TYPE_1,
            aspect: ImageAspectFlags::COLOR,
            cubemap: false,
            mip_levels: 1,
        }
    }

    pub fn cubemap(width: u32, height: u32, format: Format, usage: ImageUsageFlags) -> Self {
        Self {
            cubemap: true,
            ..Self::color_2d(width, height, format, usage)
        }
    }
}

/// An image plus its memory, view and explicitly tracked layout.
///
/// The tracked layout is mutated only by [`transition_layout`],
/// [`record_transition`] and [`assume_layout`]; every read and write must
/// happen in the layout the operation requires.
///
/// [`transition_layout`]: Self::transition_layout
/// [`record_transition`]: Self::record_transition
/// [`assume_layout`]: Self::assume_layout
pub struct Image {
    device: Device,
    image: vk::Image,
    memory: vk::DeviceMemory,
    view: vk::ImageView,
    format: Format,
    extent: Extent3D,
    samples: SampleCountFlags,
    cubemap: bool,
    layout: Mutex<ImageLayout>,
}

impl Image {
    pub fn new(device: &Device, descriptor: &ImageDescriptor) -> Result<Self, Error> {
        assert!(descriptor.width > 0 && descriptor.height > 0);

        let extent = Extent3D {
            width: descriptor.width,
            height: descriptor.height,
            depth: 1,
        };

        let layers = if descriptor.cubemap { 6 } else { 1 };
        let flags = if descriptor.cubemap {
            ImageCreateFlags::CUBE_COMPATIBLE
        } else {
            ImageCreateFlags::empty()
        };

        let info = vk::ImageCreateInfo::default()
            .image_type(vk::ImageType::TYPE_2D)
            .extent(extent)
            .mip_levels(descriptor.mip_levels)
            .array_layers(layers)
            .format(descriptor.format)
            .tiling(descriptor.tiling)
            .initial_layout(ImageLayout::UNDEFINED)
            .usage(descriptor.usage)
            .sharing_mode(SharingMode::EXCLUSIVE)
            .samples(descriptor.samples)
            .flags(flags);

        let image = unsafe { device.raw().create_image(&info, None)? };

        let requirements = unsafe { device.raw().get_image_memory_requirements(image) };
        let memory_type =
            device.find_memory_type(requirements.memory_type_bits, descriptor.memory)?;

        let alloc = MemoryAllocateInfo::default()
            .allocation_size(requirements.size)
            .memory_type_index(memory_type);
        let memory = unsafe { device.raw().allocate_memory(&alloc, None)? };

        unsafe {
            device.raw().bind_image_memory(image, memory, 0)?;
        }

        let view_type = if descriptor.cubemap {
            ImageViewType::CUBE
        } else {
            ImageViewType::TYPE_2D
        };

        let components = ComponentMapping::default()
            .r(ComponentSwizzle::IDENTITY)
            .g(ComponentSwizzle::IDENTITY)
            .b(ComponentSwizzle::IDENTITY)
            .a(ComponentSwizzle::IDENTITY);

        let subresource_range = ImageSubresourceRange::default()
            .aspect_mask(descriptor.aspect)
            .base_mip_level(0)
            .level_count(descriptor.mip_levels)
            .base_array_layer(0)
            .layer_count(layers);

        let view_info = ImageViewCreateInfo::default()
            .image(image)
            .view_type(view_type)
            .format(descriptor.format)
            .components(components)
            .subresource_range(subresource_range);

        let view = unsafe { device.raw().create_image_view(&view_info, None)? };

        Ok(Self {
            device: device.clone(),
            image,
            memory,
            view,
            format: descriptor.format,
            extent,
            samples: descriptor.samples,
            cubemap: descriptor.cubemap,
            layout: Mutex::new(ImageLayout::UNDEFINED),
        })
    }

    /// A depth attachment using the best supported depth/stencil format at
    /// the device's maximum sample count.
    pub fn create_depth(device: &Device, width: u32, height: u32) -> Result<Self, Error> {
        let format = device.find_depth_format()?;

        Self::new(
            device,
            &ImageDescriptor {
                width,
                height,
                format,
                tiling: ImageTiling::OPTIMAL,
                usage: ImageUsageFlags::DEPTH_STENCIL_ATTACHMENT,
                memory: MemoryPropertyFlags::DEVICE_LOCAL,
                samples: device.max_sample_count(),
                aspect: ImageAspectFlags::DEPTH,
                cubemap: false,
                mip_levels: 1,
            },
        )
    }

    /// A multisampled color attachment at the device's maximum sample count.
    pub fn create_render_target(
        device: &Device,
        width: u32,
        height: u32,
        format: Format,
    ) -> Result<Self, Error> {
        Self::new(
            device,
            &ImageDescriptor {
                width,
                height,
                format,
                tiling: ImageTiling::OPTIMAL,
                usage: ImageUsageFlags::COLOR_ATTACHMENT,
                memory: MemoryPropertyFlags::DEVICE_LOCAL,
                samples: device.max_sample_count(),
                aspect: ImageAspectFlags::COLOR,
                cubemap: false,
                mip_levels: 1,
            },
        )
    }

    /// The layer range covering the whole image.
    pub fn full_range(&self, aspect: ImageAspectFlags) -> ImageSubresourceRange {
        ImageSubresourceRange::default()
            .aspect_mask(aspect)
            .base_mip_level(0)
            .level_count(1)
            .base_array_layer(0)
            .layer_count(if self.cubemap { 6 } else { 1 })
    }

    /// Transitions the image to `new_layout` through a one-shot submission.
    pub fn transition_layout(
        &self,
        pool: &CommandPool,
        new_layout: ImageLayout,
        src_stage: PipelineStageFlags,
        dst_stage: PipelineStageFlags,
        range: ImageSubresourceRange,
    ) -> Result<(), Error> {
        let cmd = pool.one_shot()?;
        self.record_transition(&cmd, new_layout, src_stage, dst_stage, range);
        cmd.end()?;
        cmd.submit_and_wait()?;
        Ok(())
    }

    /// Records the layout transition barrier into `cmd` and updates the
    /// tracked layout.
    pub fn record_transition(
        &self,
        cmd: &CommandBuffer,
        new_layout: ImageLayout,
        src_stage: PipelineStageFlags,
        dst_stage: PipelineStageFlags,
        range: ImageSubresourceRange,
    ) {
        let mut layout = self.layout.lock();
        let (src_access, dst_access) = barrier_access_masks(*layout, new_layout);

        let barrier = ImageMemoryBarrier::default()
            .src_access_mask(src_access)
            .dst_access_mask(dst_access)
            .old_layout(*layout)
            .new_layout(new_layout)
            .src_queue_family_index(vk::QUEUE_FAMILY_IGNORED)
            .dst_queue_family_index(vk::QUEUE_FAMILY_IGNORED)
            .image(self.image)
            .subresource_range(range);

        cmd.pipeline_barrier(src_stage, dst_stage, &barrier);

        *layout = new_layout;
    }

    /// Records a layout change performed externally, e.g. by a render pass
    /// whose final attachment layout differs from the tracked one.
    pub fn assume_layout(&self, layout: ImageLayout) {
        *self.layout.lock() = layout;
    }

    /// Uploads pixel data through a staging buffer. The image must be in
    /// `TRANSFER_DST_OPTIMAL`; cubemaps copy six regions with per-face
    /// offsets.
    pub fn fill_from_bytes(&self, pool: &CommandPool, data: &[u8]) -> Result<(), Error> {
        assert!(!data.is_empty());
        assert_eq!(self.layout(), ImageLayout::TRANSFER_DST_OPTIMAL);

        let staging =
            Buffer::create_staging(&self.device, Some(data), data.len() as vk::DeviceSize)?;

        let regions = buffer_image_copy_regions(
            self.extent.width,
            self.extent.height,
            format_texel_size(self.format),
            self.cubemap,
        );

        let cmd = pool.one_shot()?;
        cmd.copy_buffer_to_image(&staging, self.image, self.layout(), &regions);
        cmd.end()?;
        cmd.submit_and_wait()?;

        Ok(())
    }

    pub fn layout(&self) -> ImageLayout {
        *self.layout.lock()
    }

    pub fn format(&self) -> Format {
        self.format
    }

    pub fn extent(&self) -> Extent3D {
        self.extent
    }

    pub fn samples(&self) -> SampleCountFlags {
        self.samples
    }

    pub fn is_cubemap(&self) -> bool {
        self.cubemap
    }

    pub fn view(&self) -> vk::ImageView {
        self.view
    }

    pub fn raw(&self) -> vk::Image {
        self.image
    }
}

impl Drop for Image {
    fn drop(&mut self) {
        unsafe {
            self.device.raw().destroy_image_view(self.view, None);
            self.device.raw().destroy_image(self.image, None);
            self.device.raw().free_memory(self.memory, None);
        }
    }
}

/// Computes the source/destination access masks for an image layout
/// transition.
///
/// Source access is derived from the old layout: transfer destinations were
/// written by transfers, transfer sources were read by them, everything else
/// (notably `UNDEFINED`) needs no source access. Destination access is
/// derived from the new layout; a shader-read-only destination with no source
/// access yet infers a host-write-or-transfer-write source, since sampled
/// data arrives either from a mapped write or a staging copy.
pub fn barrier_access_masks(old: ImageLayout, new: ImageLayout) -> (AccessFlags, AccessFlags) {
    let mut src = match old {
        ImageLayout::UNDEFINED => AccessFlags::empty(),
        ImageLayout::TRANSFER_DST_OPTIMAL => AccessFlags::TRANSFER_WRITE,
        ImageLayout::TRANSFER_SRC_OPTIMAL => AccessFlags::TRANSFER_READ,
        _ => AccessFlags::empty(),
    };

    let dst = match new {
        ImageLayout::TRANSFER_DST_OPTIMAL => AccessFlags::TRANSFER_WRITE,
        ImageLayout::TRANSFER_SRC_OPTIMAL => AccessFlags::TRANSFER_READ,
        ImageLayout::SHADER_READ_ONLY_OPTIMAL => {
            if src.is_empty() {
                src = AccessFlags::HOST_WRITE | AccessFlags::TRANSFER_WRITE;
            }
            AccessFlags::SHADER_READ
        }
        ImageLayout::DEPTH_STENCIL_ATTACHMENT_OPTIMAL => {
            AccessFlags::DEPTH_STENCIL_ATTACHMENT_WRITE
        }
        ImageLayout::COLOR_ATTACHMENT_OPTIMAL => AccessFlags::COLOR_ATTACHMENT_WRITE,
        _ => AccessFlags::empty(),
    };

    (src, dst)
}

/// Returns the first candidate accepted by `supported`.
pub fn select_format<F>(candidates: &[Format], supported: F) -> Option<Format>
where
    F: Fn(Format) -> bool,
{
    candidates.iter().copied().find(|format| supported(*format))
}

/// Bytes per texel for the formats this renderer uploads.
pub fn format_texel_size(format: Format) -> vk::DeviceSize {
    match format {
        Format::R32G32B32A32_SFLOAT => 16,
        _ => 4,
    }
}

/// Buffer-to-image copy regions: one region for a 2D image, six regions with
/// per-face byte offsets for a cubemap.
pub fn buffer_image_copy_regions(
    width: u32,
    height: u32,
    texel_size: vk::DeviceSize,
    cubemap: bool,
) -> Vec<vk::BufferImageCopy> {
    let faces = if cubemap { 6 } else { 1 };
    let face_size = vk::DeviceSize::from(width) * vk::DeviceSize::from(height) * texel_size;

    (0..faces)
        .map(|face| vk::BufferImageCopy {
            buffer_offset: vk::DeviceSize::from(face) * face_size,
            buffer_row_length: 0,
            buffer_image_height: 0,
            image_subresource: vk::ImageSubresourceLayers {
                aspect_mask: ImageAspectFlags::COLOR,
                mip_level: 0,
                base_array_layer: face,
                layer_count: 1,
            },
            image_offset: vk::Offset3D::default(),
            image_extent: Extent3D {
                width,
                height,
                depth: 1,
            },
        })
        .collect()
}

/// Picks the highest power-of-two sample count contained in `counts`.
pub fn highest_sample_count(counts: SampleCountFlags) -> SampleCountFlags {
    for candidate in [
        SampleCountFlags::TYPE_64,
        SampleCountFlags::TYPE_32,
        SampleCountFlags::TYPE_16,
        SampleCountFlags::TYPE_8,
        SampleCountFlags::TYPE_4,
        SampleCountFlags::TYPE_2,
    ] {
        if counts.contains(candidate) {
            return candidate;
        }
    }
    SampleCountFlags::TYPE_1
}

/// Returns the index of the first memory type matching `type_mask` whose
/// property flags contain `properties`.
pub fn find_memory_type_index(
    memory_properties: &vk::PhysicalDeviceMemoryProperties,
    type_mask: u32,
    properties: MemoryPropertyFlags,
) -> Option<u32> {
    memory_properties
        .memory_types
        .iter()
        .take(memory_properties.memory_type_count as usize)
        .enumerate()
        .find(|(index, memory_type)| {
            type_mask & (1 << index) != 0 && memory_type.property_flags.contains(properties)
        })
        .map(|(index, _)| index as u32)
}

/// An anisotropic linear sampler with repeat addressing.
pub struct Sampler {
    device: Device,
    sampler: vk::Sampler,
}

impl Sampler {
    pub fn new(device: &Device) -> Result<Self, Error> {
        let info = vk::SamplerCreateInfo::default()
            .mag_filter(vk::Filter::LINEAR)
            .min_filter(vk::Filter::LINEAR)
            .address_mode_u(vk::SamplerAddressMode::REPEAT)
            .address_mode_v(vk::SamplerAddressMode::REPEAT)
            .address_mode_w(vk::SamplerAddressMode::REPEAT)
            .anisotropy_enable(true)
            .max_anisotropy(device.max_sampler_anisotropy().min(16.0))
            .border_color(vk::BorderColor::INT_OPAQUE_BLACK)
            .unnormalized_coordinates(false)
            .compare_enable(false)
            .compare_op(vk::CompareOp::ALWAYS)
            .mipmap_mode(vk::SamplerMipmapMode::LINEAR)
            .mip_lod_bias(0.0)
            .min_lod(0.0)
            .max_lod(0.0);

        let sampler = unsafe { device.raw().create_sampler(&info, None)? };

        Ok(Self {
            device: device.clone(),
            sampler,
        })
    }

    pub fn raw(&self) -> vk::Sampler {
        self.sampler
    }
}

impl Drop for Sampler {
    fn drop(&mut self) {
        unsafe {
            self.device.raw().destroy_sampler(self.sampler, None);
        }
    }
}

/// A shader stage loaded from pre-compiled SPIR-V bytecode.
///
/// The file is read as raw bytes; nothing beyond open/alignment success is
/// validated.
pub struct Shader {
    device: Device,
    module: vk::ShaderModule,
    stage: ShaderStageFlags,
    entry: CString,
}

impl Shader {
    pub fn from_file(
        device: &Device,
        path: impl AsRef<Path>,
        stage: ShaderStageFlags,
        entry: &str,
    ) -> Result<Self, Error> {
        let path = path.as_ref();
        let bytes = std::fs::read(path).map_err(|err| Error::ShaderIo {
            path: path.to_path_buf(),
            err,
        })?;

        let mut cursor = std::io::Cursor::new(bytes);
        let code = ash::util::read_spv(&mut cursor).map_err(|err| Error::ShaderIo {
            path: path.to_path_buf(),
            err,
        })?;

        let info = ShaderModuleCreateInfo::default().code(&code);
        let module = unsafe { device.raw().create_shader_module(&info, None)? };

        Ok(Self {
            device: device.clone(),
            module,
            stage,
            entry: CString::new(entry).expect("entry point contains a nul byte"),
        })
    }

    pub fn stage(&self) -> ShaderStageFlags {
        self.stage
    }

    pub fn entry(&self) -> &CStr {
        &self.entry
    }

    pub fn module(&self) -> vk::ShaderModule {
        self.module
    }
}

impl Drop for Shader {
    fn drop(&mut self) {
        unsafe {
            self.device.raw().destroy_shader_module(self.module, None);
        }
    }
}

const fn cstr_to_fixed_array<const N: usize>(s: &CStr) -> [i8; N] {
    assert!(s.count_bytes() < N);

    let mut arr = [0; N];

    unsafe {
        core::ptr::copy_nonoverlapping(s.as_ptr(), arr.as_mut_ptr(), s.count_bytes());
    }

    arr
}

extern "system" fn debug_callback(
    severity: DebugUtilsMessageSeverityFlagsEXT,
    typ: DebugUtilsMessageTypeFlagsEXT,
    data: *const DebugUtilsMessengerCallbackDataEXT<'_>,
    _: *mut c_void,
) -> Bool32 {
    let data = unsafe { *data };
    let message = match unsafe { data.message_as_c_str() } {
        Some(msg) => msg.to_string_lossy(),
        None => Cow::Borrowed("(no message)"),
    };

    if severity.contains(DebugUtilsMessageSeverityFlagsEXT::ERROR) {
        tracing::error!("{:?} {}", typ, message);
    } else if severity.contains(DebugUtilsMessageSeverityFlagsEXT::WARNING) {
        warn!("{:?} {}", typ, message);
    } else {
        debug!("{:?} {}", typ, message);
    }

    // The application should always return `VK_FALSE`.
    FALSE
}

#[cfg(test)]
mod tests {
    use ash::vk::{
        AccessFlags, Format, ImageLayout, MemoryPropertyFlags, MemoryType,
        PhysicalDeviceMemoryProperties, SampleCountFlags,
    };

    use super::{
        barrier_access_masks, buffer_image_copy_regions, find_memory_type_index,
        format_texel_size, highest_sample_count, select_format,
    };

    #[test]
    fn access_masks_undefined_to_transfer_dst() {
        let (src, dst) =
            barrier_access_masks(ImageLayout::UNDEFINED, ImageLayout::TRANSFER_DST_OPTIMAL);
        assert_eq!(src, AccessFlags::empty());
        assert_eq!(dst, AccessFlags::TRANSFER_WRITE);
    }

    #[test]
    fn access_masks_transfer_dst_to_shader_read() {
        let (src, dst) = barrier_access_masks(
            ImageLayout::TRANSFER_DST_OPTIMAL,
            ImageLayout::SHADER_READ_ONLY_OPTIMAL,
        );
        assert_eq!(src, AccessFlags::TRANSFER_WRITE);
        assert_eq!(dst, AccessFlags::SHADER_READ);
    }

    #[test]
    fn access_masks_undefined_to_shader_read_infers_source() {
        // With no transfer recorded, the source is a host write or transfer
        // write.
        let (src, dst) = barrier_access_masks(
            ImageLayout::UNDEFINED,
            ImageLayout::SHADER_READ_ONLY_OPTIMAL,
        );
        assert_eq!(src, AccessFlags::HOST_WRITE | AccessFlags::TRANSFER_WRITE);
        assert_eq!(dst, AccessFlags::SHADER_READ);
    }

    #[test]
    fn access_masks_undefined_to_attachments() {
        let (src, dst) = barrier_access_masks(
            ImageLayout::UNDEFINED,
            ImageLayout::DEPTH_STENCIL_ATTACHMENT_OPTIMAL,
        );
        assert_eq!(src, AccessFlags::empty());
        assert_eq!(dst, AccessFlags::DEPTH_STENCIL_ATTACHMENT_WRITE);

        let (src, dst) = barrier_access_masks(
            ImageLayout::UNDEFINED,
            ImageLayout::COLOR_ATTACHMENT_OPTIMAL,
        );
        assert_eq!(src, AccessFlags::empty());
        assert_eq!(dst, AccessFlags::COLOR_ATTACHMENT_WRITE);
    }

    #[test]
    fn depth_format_falls_back_to_only_supported() {
        // A device that only supports the last-priority format must still
        // yield it.
        let format = select_format(super::DEPTH_FORMAT_CANDIDATES, |format| {
            format == Format::D24_UNORM_S8_UINT
        });
        assert_eq!(format, Some(Format::D24_UNORM_S8_UINT));
    }

    #[test]
    fn depth_format_priority_order() {
        let format = select_format(super::DEPTH_FORMAT_CANDIDATES, |_| true);
        assert_eq!(format, Some(Format::D32_SFLOAT));

        let format = select_format(super::DEPTH_FORMAT_CANDIDATES, |_| false);
        assert_eq!(format, None);
    }

    #[test]
    fn cubemap_copy_regions_have_face_offsets() {
        let regions = buffer_image_copy_regions(16, 16, 4, true);
        assert_eq!(regions.len(), 6);
        for (face, region) in regions.iter().enumerate() {
            assert_eq!(region.buffer_offset, face as u64 * 16 * 16 * 4);
            assert_eq!(region.image_subresource.base_array_layer, face as u32);
            assert_eq!(region.image_subresource.layer_count, 1);
        }

        let regions = buffer_image_copy_regions(8, 4, 16, false);
        assert_eq!(regions.len(), 1);
        assert_eq!(regions[0].buffer_offset, 0);
    }

    #[test]
    fn texel_sizes() {
        assert_eq!(format_texel_size(Format::R32G32B32A32_SFLOAT), 16);
        assert_eq!(format_texel_size(Format::R8G8B8A8_SRGB), 4);
    }

    #[test]
    fn highest_sample_count_picks_largest_power_of_two() {
        let counts = SampleCountFlags::TYPE_1 | SampleCountFlags::TYPE_4 | SampleCountFlags::TYPE_8;
        assert_eq!(highest_sample_count(counts), SampleCountFlags::TYPE_8);
        assert_eq!(
            highest_sample_count(SampleCountFlags::TYPE_1),
            SampleCountFlags::TYPE_1
        );
    }

    #[test]
    fn memory_type_selection_respects_mask_and_flags() {
        let mut props = PhysicalDeviceMemoryProperties::default();
        props.memory_type_count = 3;
        props.memory_types[0] = MemoryType {
            property_flags: MemoryPropertyFlags::DEVICE_LOCAL,
            heap_index: 0,
        };
        props.memory_types[1] = MemoryType {
            property_flags: MemoryPropertyFlags::HOST_VISIBLE | MemoryPropertyFlags::HOST_COHERENT,
            heap_index: 1,
        };
        props.memory_types[2] = MemoryType {
            property_flags: MemoryPropertyFlags::DEVICE_LOCAL,
            heap_index: 0,
        };

        // Type 0 is masked out, type 2 matches.
        let index = find_memory_type_index(&props, 0b100, MemoryPropertyFlags::DEVICE_LOCAL);
        assert_eq!(index, Some(2));

        let index = find_memory_type_index(
            &props,
            0b111,
            MemoryPropertyFlags::HOST_VISIBLE | MemoryPropertyFlags::HOST_COHERENT,
        );
        assert_eq!(index, Some(1));

        let index = find_memory_type_index(&props, 0b001, MemoryPropertyFlags::HOST_VISIBLE);
        assert_eq!(index, None);
    }
}
