// The Sampler object: a shareable filter/address-mode pair.
//
// A sampler is a filter mode and an address mode, with no other state.
// Built on `Device::create_sampler` (device.rs), generalized from its one
// hardcoded linear/repeat sampler to the `FilterMode`/`AddressMode` enums
// a CreateSampler request carries.

use ash::vk;

use crate::device::Device;
use crate::protocol::request::{AddressMode, FilterMode};
use crate::resources::lifecycle::Lifecycle;

fn vk_filter(mode: FilterMode) -> vk::Filter {
    match mode {
        FilterMode::Nearest => vk::Filter::NEAREST,
        FilterMode::Linear => vk::Filter::LINEAR,
    }
}

fn vk_address_mode(mode: AddressMode) -> vk::SamplerAddressMode {
    match mode {
        AddressMode::Repeat => vk::SamplerAddressMode::REPEAT,
        AddressMode::ClampToEdge => vk::SamplerAddressMode::CLAMP_TO_EDGE,
        AddressMode::ClampToBorder => vk::SamplerAddressMode::CLAMP_TO_BORDER,
    }
}

pub struct Sampler {
    pub filter: FilterMode,
    pub address_mode: AddressMode,
    pub handle: vk::Sampler,
    pub lifecycle: Lifecycle,
}

impl Sampler {
    pub fn new(filter: FilterMode, address_mode: AddressMode) -> Self {
        Self {
            filter,
            address_mode,
            handle: vk::Sampler::null(),
            lifecycle: Lifecycle::Uninitialized,
        }
    }

    pub fn create(&mut self, dev: &Device) -> crate::error::Result<()> {
        let info = vk::SamplerCreateInfo::builder()
            .mag_filter(vk_filter(self.filter))
            .min_filter(vk_filter(self.filter))
            .address_mode_u(vk_address_mode(self.address_mode))
            .address_mode_v(vk_address_mode(self.address_mode))
            .address_mode_w(vk_address_mode(self.address_mode))
            .unnormalized_coordinates(false);
        self.handle = unsafe { dev.dev.create_sampler(&info, None).unwrap() };
        self.lifecycle = self.lifecycle.advance(Lifecycle::Created)?;
        Ok(())
    }

    pub fn destroy(&mut self, dev: &Device) -> crate::error::Result<()> {
        self.lifecycle.require_not_destroyed()?;
        unsafe {
            dev.dev.destroy_sampler(self.handle, None);
        }
        self.lifecycle = Lifecycle::Destroyed;
        Ok(())
    }
}
