// Vulkan instance creation.
//
// The debug-utils messenger setup and `vulkan_debug_callback` are kept
// close to verbatim from their upstream source (generic Vulkan
// boilerplate, not compositor-specific), routed through `dvz_utils::log`
// instead of a `println!`. An unrelated Nvidia Aftermath crash-dump
// integration and a compositor `Display::extension_names` call are
// dropped: Aftermath is a vendor-specific integration with no counterpart
// in the rendering protocol (see DESIGN.md), and surface extension names
// are now supplied by the caller (the `window` module) instead of being
// pulled from a compositor `Display`.

use ash::extensions::ext;
use ash::{vk, Entry};

use dvz_utils::log;

use std::ffi::{CStr, CString};
use std::os::raw::c_void;

unsafe extern "system" fn vulkan_debug_callback(
    message_severity: vk::DebugUtilsMessageSeverityFlagsEXT,
    message_types: vk::DebugUtilsMessageTypeFlagsEXT,
    p_callback_data: *const vk::DebugUtilsMessengerCallbackDataEXT,
    _p_user_data: *mut c_void,
) -> u32 {
    log::error!(
        "[VK][{:?}][{:?}] {:?}",
        message_severity,
        message_types,
        CStr::from_ptr(p_callback_data.as_ref().unwrap().p_message)
    );
    vk::FALSE
}

/// Instance/device construction parameters: validation toggles and the
/// surface extensions the chosen `WindowBackend` requires.
#[derive(Debug, Clone, Default)]
pub struct CreateInfo {
    pub enable_validation: bool,
    pub enable_sync_validation: bool,
    /// Extra instance extensions required to create a surface on the
    /// active windowing backend (empty for the headless backend).
    pub surface_extensions: Vec<String>,
}

impl CreateInfo {
    pub fn headless() -> Self {
        Self {
            enable_validation: cfg!(debug_assertions),
            enable_sync_validation: false,
            surface_extensions: Vec::new(),
        }
    }
}

pub struct Instance {
    debug_loader: ext::DebugUtils,
    debug_callback: vk::DebugUtilsMessengerEXT,
    pub(crate) loader: Entry,
    pub(crate) inst: ash::Instance,
}

impl Instance {
    fn setup_debug(entry: &Entry, instance: &ash::Instance) -> (ext::DebugUtils, vk::DebugUtilsMessengerEXT) {
        let debug_info = vk::DebugUtilsMessengerCreateInfoEXT::builder()
            .message_severity(
                vk::DebugUtilsMessageSeverityFlagsEXT::ERROR
                    | vk::DebugUtilsMessageSeverityFlagsEXT::WARNING,
            )
            .message_type(
                vk::DebugUtilsMessageTypeFlagsEXT::GENERAL
                    | vk::DebugUtilsMessageTypeFlagsEXT::PERFORMANCE
                    | vk::DebugUtilsMessageTypeFlagsEXT::VALIDATION,
            )
            .pfn_user_callback(Some(vulkan_debug_callback));

        let dr_loader = ext::DebugUtils::new(entry, instance);
        let callback = unsafe { dr_loader.create_debug_utils_messenger(&debug_info, None).unwrap() };
        (dr_loader, callback)
    }

    pub fn new(info: &CreateInfo) -> crate::error::Result<Self> {
        let entry = Entry::linked();
        let app_name = CString::new("dvz-protocol").unwrap();

        let layer_names = if info.enable_validation {
            vec![CString::new("VK_LAYER_KHRONOS_validation").unwrap()]
        } else {
            Vec::new()
        };
        let layer_names_raw: Vec<*const i8> = layer_names.iter().map(|n: &CString| n.as_ptr()).collect();

        let mut extension_names_raw: Vec<*const i8> = info
            .surface_extensions
            .iter()
            .map(|s| CString::new(s.as_str()).unwrap().into_raw() as *const i8)
            .collect();
        extension_names_raw.push(ext::DebugUtils::name().as_ptr());

        let appinfo = vk::ApplicationInfo::builder()
            .application_name(&app_name)
            .application_version(0)
            .engine_name(&app_name)
            .engine_version(0)
            .api_version(vk::API_VERSION_1_2)
            .build();

        let mut create_info = vk::InstanceCreateInfo::builder()
            .application_info(&appinfo)
            .enabled_layer_names(&layer_names_raw)
            .enabled_extension_names(&extension_names_raw)
            .build();

        let sync_validation = [vk::ValidationFeatureEnableEXT::SYNCHRONIZATION_VALIDATION];
        let printf_info = vk::ValidationFeaturesEXT::builder().enabled_validation_features(&sync_validation).build();
        if info.enable_sync_validation {
            create_info.p_next = &printf_info as *const _ as *const std::os::raw::c_void;
        }

        let instance: ash::Instance = unsafe {
            entry
                .create_instance(&create_info, None)
                .map_err(|e| crate::error::Error::new(crate::error::ErrorKind::DeviceInit, format!("vkCreateInstance failed: {:?}", e)))?
        };

        let (dr_loader, d_callback) = Self::setup_debug(&entry, &instance);

        Ok(Self {
            loader: entry,
            inst: instance,
            debug_loader: dr_loader,
            debug_callback: d_callback,
        })
    }
}

impl Drop for Instance {
    fn drop(&mut self) {
        unsafe {
            self.debug_loader.destroy_debug_utils_messenger(self.debug_callback, None);
            self.inst.destroy_instance(None);
        }
    }
}
