// Device bootstrap - Core GPU interface
//
// Responsibilities:
// - Instance creation with optional validation layers
// - Surface creation through the windowing capability
// - Physical device selection (presentation + dedicated transfer queue)
// - Logical device + queue creation
// - Descriptor pool sized for overlay UI resources

use ash::ext::debug_utils;
use ash::khr::{surface, swapchain};
use ash::{vk, Entry};
use std::ffi::{c_char, CStr, CString};
use std::sync::Arc;

use crate::config::DeviceConfig;
use crate::error::{RenderError, RenderResult, ResultExt};
use crate::window::SurfaceProvider;

/// Lowest API version a GPU may report to be selected
pub const MIN_API_VERSION: u32 = vk::API_VERSION_1_2;

/// Per-type descriptor budget of the UI descriptor pool
pub const DESCRIPTORS_PER_TYPE: u32 = 1000;

const VALIDATION_LAYER: &CStr = c"VK_LAYER_KHRONOS_validation";

/// Queue family indices of the selected GPU. Graphics and present may alias.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct QueueFamilies {
    pub graphics: u32,
    pub present: u32,
    pub transfer: u32,
}

impl QueueFamilies {
    /// Pick queue families from a device's family list.
    ///
    /// Returns `None` when the device cannot draw, cannot present, or (when
    /// required) has no transfer-only family.
    pub fn find(
        families: &[vk::QueueFamilyProperties],
        supports_present: impl Fn(u32) -> bool,
        require_dedicated_transfer: bool,
    ) -> Option<Self> {
        let usable = |i: usize| families[i].queue_count > 0;

        let graphics = (0..families.len())
            .find(|&i| usable(i) && families[i].queue_flags.contains(vk::QueueFlags::GRAPHICS))?
            as u32;

        let present = if supports_present(graphics) {
            graphics
        } else {
            (0..families.len()).find(|&i| usable(i) && supports_present(i as u32))? as u32
        };

        let dedicated_transfer = (0..families.len())
            .find(|&i| {
                let flags = families[i].queue_flags;
                usable(i)
                    && flags.contains(vk::QueueFlags::TRANSFER)
                    && !flags.intersects(vk::QueueFlags::GRAPHICS | vk::QueueFlags::COMPUTE)
            })
            .map(|i| i as u32);

        let transfer = match dedicated_transfer {
            Some(index) => index,
            None if require_dedicated_transfer => return None,
            None => graphics,
        };

        Some(Self {
            graphics,
            present,
            transfer,
        })
    }

    /// Distinct family indices, one queue is created per entry
    pub fn unique(&self) -> Vec<u32> {
        let mut families = vec![self.graphics, self.present, self.transfer];
        families.sort_unstable();
        families.dedup();
        families
    }
}

/// One entry per standard descriptor type, sized for UI textures and samplers
pub fn descriptor_pool_sizes() -> [vk::DescriptorPoolSize; 11] {
    [
        vk::DescriptorType::SAMPLER,
        vk::DescriptorType::COMBINED_IMAGE_SAMPLER,
        vk::DescriptorType::SAMPLED_IMAGE,
        vk::DescriptorType::STORAGE_IMAGE,
        vk::DescriptorType::UNIFORM_TEXEL_BUFFER,
        vk::DescriptorType::STORAGE_TEXEL_BUFFER,
        vk::DescriptorType::UNIFORM_BUFFER,
        vk::DescriptorType::STORAGE_BUFFER,
        vk::DescriptorType::UNIFORM_BUFFER_DYNAMIC,
        vk::DescriptorType::STORAGE_BUFFER_DYNAMIC,
        vk::DescriptorType::INPUT_ATTACHMENT,
    ]
    .map(|ty| vk::DescriptorPoolSize {
        ty,
        descriptor_count: DESCRIPTORS_PER_TYPE,
    })
}

/// Vulkan device context with automatic cleanup
///
/// Owns every instance- and device-level handle. It is created once and is the
/// last thing destroyed: all other GPU objects hold an `Arc` to it.
pub struct DeviceContext {
    pub descriptor_pool: vk::DescriptorPool,

    // Queue handles
    pub graphics_queue: vk::Queue,
    pub present_queue: vk::Queue,
    pub transfer_queue: vk::Queue,
    pub queue_families: QueueFamilies,

    pub device: ash::Device,
    pub physical_device: vk::PhysicalDevice,
    pub properties: vk::PhysicalDeviceProperties,

    pub surface: vk::SurfaceKHR,
    pub surface_loader: surface::Instance,

    debug_utils: Option<(debug_utils::Instance, vk::DebugUtilsMessengerEXT)>,
    pub instance: ash::Instance,
    _entry: Entry,
}

impl DeviceContext {
    /// Bootstrap the GPU for presenting to the window behind `surfaces`.
    ///
    /// Any failure is an initialization error; objects created before the
    /// failing step are destroyed before returning.
    pub fn bootstrap(
        surfaces: &dyn SurfaceProvider,
        app_name: &str,
        config: &DeviceConfig,
    ) -> RenderResult<Arc<Self>> {
        log::info!("Bootstrapping Vulkan device: {}", app_name);

        // Step 1: Load Vulkan library
        let entry = unsafe { Entry::load() }.initialization("Failed to load Vulkan library")?;

        let mut partial = Partial::default();

        // Step 2: Create instance
        let enable_validation =
            config.validation_layers && Self::validation_layer_available(&entry);
        if config.validation_layers && !enable_validation {
            log::warn!("Validation layers requested but not installed");
        }
        let instance = Self::create_instance(&entry, app_name, surfaces, enable_validation)?;
        partial.instance = Some(instance.clone());

        // Step 3: Debug messenger
        let debug_utils = if enable_validation {
            let messenger = Self::setup_debug_messenger(&entry, &instance)?;
            partial.debug_utils = Some(messenger.clone());
            Some(messenger)
        } else {
            None
        };

        // Step 4: Surface from the windowing side
        let surface_loader = surface::Instance::new(&entry, &instance);
        let surface = surfaces.create_surface(&entry, &instance)?;
        partial.surface = Some((surface_loader.clone(), surface));

        // Step 5: Pick physical device (GPU)
        let (physical_device, queue_families) = Self::pick_physical_device(
            &instance,
            &surface_loader,
            surface,
            config.require_dedicated_transfer,
        )?;
        let properties = unsafe { instance.get_physical_device_properties(physical_device) };

        log::info!(
            "Selected GPU: {}",
            properties
                .device_name_as_c_str()
                .map(|name| name.to_string_lossy().into_owned())
                .unwrap_or_default()
        );
        log::info!(
            "API Version: {}.{}.{}",
            vk::api_version_major(properties.api_version),
            vk::api_version_minor(properties.api_version),
            vk::api_version_patch(properties.api_version)
        );
        log::debug!("Queue families: {:?}", queue_families);

        // Step 6: Create logical device
        let device = Self::create_logical_device(&instance, physical_device, &queue_families)?;
        partial.device = Some(device.clone());

        let (graphics_queue, present_queue, transfer_queue) = unsafe {
            (
                device.get_device_queue(queue_families.graphics, 0),
                device.get_device_queue(queue_families.present, 0),
                device.get_device_queue(queue_families.transfer, 0),
            )
        };

        // Step 7: Descriptor pool for the overlay
        let descriptor_pool = Self::create_descriptor_pool(&device)?;

        partial.disarm();

        Ok(Arc::new(Self {
            descriptor_pool,
            graphics_queue,
            present_queue,
            transfer_queue,
            queue_families,
            device,
            physical_device,
            properties,
            surface,
            surface_loader,
            debug_utils,
            instance,
            _entry: entry,
        }))
    }

    fn validation_layer_available(entry: &Entry) -> bool {
        let layers = unsafe { entry.enumerate_instance_layer_properties() }.unwrap_or_default();
        layers
            .iter()
            .any(|layer| layer.layer_name_as_c_str().map_or(false, |name| name == VALIDATION_LAYER))
    }

    fn create_instance(
        entry: &Entry,
        app_name: &str,
        surfaces: &dyn SurfaceProvider,
        enable_validation: bool,
    ) -> RenderResult<ash::Instance> {
        let app_name = CString::new(app_name).initialization("Invalid application name")?;

        let app_info = vk::ApplicationInfo::default()
            .application_name(&app_name)
            .application_version(vk::make_api_version(0, 0, 1, 0))
            .engine_name(c"Fresnel")
            .engine_version(vk::make_api_version(0, 0, 1, 0))
            .api_version(MIN_API_VERSION);

        // Surface extensions come from the window toolkit
        let mut extensions: Vec<*const c_char> = surfaces.required_extensions()?;
        if enable_validation {
            extensions.push(debug_utils::NAME.as_ptr());
        }

        let layer_names = if enable_validation {
            vec![VALIDATION_LAYER.as_ptr()]
        } else {
            vec![]
        };

        let create_info = vk::InstanceCreateInfo::default()
            .application_info(&app_info)
            .enabled_extension_names(&extensions)
            .enabled_layer_names(&layer_names);

        unsafe { entry.create_instance(&create_info, None) }
            .initialization("Failed to create Vulkan instance")
    }

    fn setup_debug_messenger(
        entry: &Entry,
        instance: &ash::Instance,
    ) -> RenderResult<(debug_utils::Instance, vk::DebugUtilsMessengerEXT)> {
        let loader = debug_utils::Instance::new(entry, instance);

        let create_info = vk::DebugUtilsMessengerCreateInfoEXT::default()
            .message_severity(
                vk::DebugUtilsMessageSeverityFlagsEXT::WARNING
                    | vk::DebugUtilsMessageSeverityFlagsEXT::ERROR,
            )
            .message_type(
                vk::DebugUtilsMessageTypeFlagsEXT::GENERAL
                    | vk::DebugUtilsMessageTypeFlagsEXT::VALIDATION
                    | vk::DebugUtilsMessageTypeFlagsEXT::PERFORMANCE,
            )
            .pfn_user_callback(Some(debug_callback));

        let messenger = unsafe { loader.create_debug_utils_messenger(&create_info, None) }
            .initialization("Failed to create debug messenger")?;

        Ok((loader, messenger))
    }

    /// First GPU that is new enough, has the swapchain extension, and has the
    /// queue families we need for this surface.
    fn pick_physical_device(
        instance: &ash::Instance,
        surface_loader: &surface::Instance,
        surface: vk::SurfaceKHR,
        require_dedicated_transfer: bool,
    ) -> RenderResult<(vk::PhysicalDevice, QueueFamilies)> {
        let devices = unsafe { instance.enumerate_physical_devices() }
            .initialization("Failed to enumerate GPUs")?;

        if devices.is_empty() {
            return Err(RenderError::Initialization("No Vulkan-capable GPU found".into()));
        }

        for device in devices {
            let props = unsafe { instance.get_physical_device_properties(device) };
            if props.api_version < MIN_API_VERSION {
                log::debug!("Skipping GPU without Vulkan 1.2 support");
                continue;
            }

            if !Self::supports_swapchain(instance, device) {
                log::debug!("Skipping GPU without swapchain support");
                continue;
            }

            let families =
                unsafe { instance.get_physical_device_queue_family_properties(device) };
            let supports_present = |index: u32| unsafe {
                surface_loader
                    .get_physical_device_surface_support(device, index, surface)
                    .unwrap_or(false)
            };

            if let Some(queue_families) =
                QueueFamilies::find(&families, supports_present, require_dedicated_transfer)
            {
                return Ok((device, queue_families));
            }
        }

        Err(RenderError::Initialization(
            "No GPU can present to this surface with the required queues".into(),
        ))
    }

    fn supports_swapchain(instance: &ash::Instance, device: vk::PhysicalDevice) -> bool {
        let extensions =
            unsafe { instance.enumerate_device_extension_properties(device) }.unwrap_or_default();
        extensions
            .iter()
            .any(|ext| ext.extension_name_as_c_str().map_or(false, |name| name == swapchain::NAME))
    }

    fn create_logical_device(
        instance: &ash::Instance,
        physical_device: vk::PhysicalDevice,
        queue_families: &QueueFamilies,
    ) -> RenderResult<ash::Device> {
        let queue_priorities = [1.0];
        let queue_create_infos: Vec<_> = queue_families
            .unique()
            .into_iter()
            .map(|family| {
                vk::DeviceQueueCreateInfo::default()
                    .queue_family_index(family)
                    .queue_priorities(&queue_priorities)
            })
            .collect();

        let extensions = [swapchain::NAME.as_ptr()];

        let create_info = vk::DeviceCreateInfo::default()
            .queue_create_infos(&queue_create_infos)
            .enabled_extension_names(&extensions);

        unsafe { instance.create_device(physical_device, &create_info, None) }
            .initialization("Failed to create logical device")
    }

    fn create_descriptor_pool(device: &ash::Device) -> RenderResult<vk::DescriptorPool> {
        let pool_sizes = descriptor_pool_sizes();

        let create_info = vk::DescriptorPoolCreateInfo::default()
            .flags(vk::DescriptorPoolCreateFlags::FREE_DESCRIPTOR_SET)
            .max_sets(DESCRIPTORS_PER_TYPE * pool_sizes.len() as u32)
            .pool_sizes(&pool_sizes);

        unsafe { device.create_descriptor_pool(&create_info, None) }
            .initialization("Failed to create descriptor pool")
    }

    /// Block until every queue of the device is idle
    pub fn wait_idle(&self) -> RenderResult<()> {
        unsafe { self.device.device_wait_idle() }.presentation("Failed to wait for device idle")
    }
}

impl Drop for DeviceContext {
    fn drop(&mut self) {
        log::info!("Destroying Vulkan device...");

        let _ = self.wait_idle();

        // Cleanup in reverse order
        unsafe {
            self.device.destroy_descriptor_pool(self.descriptor_pool, None);
            self.device.destroy_device(None);
            self.surface_loader.destroy_surface(self.surface, None);

            if let Some((loader, messenger)) = self.debug_utils.take() {
                loader.destroy_debug_utils_messenger(messenger, None);
            }

            self.instance.destroy_instance(None);
        }
    }
}

/// Objects created so far during bootstrap
///
/// Destroys whatever it still holds when dropped, so an early return from
/// `bootstrap` leaves nothing behind.
#[derive(Default)]
struct Partial {
    instance: Option<ash::Instance>,
    debug_utils: Option<(debug_utils::Instance, vk::DebugUtilsMessengerEXT)>,
    surface: Option<(surface::Instance, vk::SurfaceKHR)>,
    device: Option<ash::Device>,
}

impl Partial {
    /// Hand ownership over to the finished context
    fn disarm(&mut self) {
        self.device = None;
        self.surface = None;
        self.debug_utils = None;
        self.instance = None;
    }
}

impl Drop for Partial {
    fn drop(&mut self) {
        unsafe {
            if let Some(device) = self.device.take() {
                device.destroy_device(None);
            }
            if let Some((loader, surface)) = self.surface.take() {
                loader.destroy_surface(surface, None);
            }
            if let Some((loader, messenger)) = self.debug_utils.take() {
                loader.destroy_debug_utils_messenger(messenger, None);
            }
            if let Some(instance) = self.instance.take() {
                instance.destroy_instance(None);
            }
        }
    }
}

// Debug callback for validation layers
unsafe extern "system" fn debug_callback(
    message_severity: vk::DebugUtilsMessageSeverityFlagsEXT,
    _message_type: vk::DebugUtilsMessageTypeFlagsEXT,
    p_callback_data: *const vk::DebugUtilsMessengerCallbackDataEXT<'_>,
    _p_user_data: *mut std::ffi::c_void,
) -> vk::Bool32 {
    if p_callback_data.is_null() || (*p_callback_data).p_message.is_null() {
        return vk::FALSE;
    }
    let message = CStr::from_ptr((*p_callback_data).p_message);

    match message_severity {
        vk::DebugUtilsMessageSeverityFlagsEXT::ERROR => {
            log::error!("[Vulkan] {}", message.to_string_lossy());
        }
        vk::DebugUtilsMessageSeverityFlagsEXT::WARNING => {
            log::warn!("[Vulkan] {}", message.to_string_lossy());
        }
        _ => {
            log::debug!("[Vulkan] {}", message.to_string_lossy());
        }
    }

    vk::FALSE
}
