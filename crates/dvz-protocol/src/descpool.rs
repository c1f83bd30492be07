// A pool of descriptor pools.
//
// The upstream descriptor pool hardcoded a single COMBINED_IMAGE_SAMPLER
// binding for its bindless window list. Here the layout is built from the
// slot declarations a Pipeline collects during its Configuring state (a
// slot index, a shader stage, and a descriptor type), so one `DescPool`
// per device can serve every pipeline's descriptor sets instead of one
// hardcoded layout.

use ash::{vk, Device};

static POOL_SIZE: u32 = 16;

/// One descriptor-set allocation, tracking which pool it came from so it
/// can be freed back to the same pool.
pub struct Descriptor {
    pub pool_handle: usize,
    pub d_set: vk::DescriptorSet,
}

pub struct DescPool {
    pools: Vec<vk::DescriptorPool>,
    capacities: Vec<usize>,
}

impl DescPool {
    pub fn new(dev: &Device) -> DescPool {
        let mut ret = DescPool {
            pools: Vec::new(),
            capacities: Vec::new(),
        };
        ret.add_pool(dev);
        ret
    }

    /// Builds a descriptor set layout from a pipeline's declared slots,
    /// generalized from one fixed binding to an arbitrary slot list.
    pub fn create_layout(dev: &Device, bindings: &[(u32, vk::DescriptorType, vk::ShaderStageFlags)]) -> vk::DescriptorSetLayout {
        let vk_bindings: Vec<vk::DescriptorSetLayoutBinding> = bindings
            .iter()
            .map(|(slot, ty, stage)| {
                vk::DescriptorSetLayoutBinding::builder()
                    .binding(*slot)
                    .descriptor_type(*ty)
                    .stage_flags(*stage)
                    .descriptor_count(1)
                    .build()
            })
            .collect();
        let info = vk::DescriptorSetLayoutCreateInfo::builder().bindings(&vk_bindings);
        unsafe { dev.create_descriptor_set_layout(&info, None).unwrap() }
    }

    fn add_pool(&mut self, dev: &Device) -> usize {
        let sizes = [
            vk::DescriptorPoolSize::builder()
                .ty(vk::DescriptorType::COMBINED_IMAGE_SAMPLER)
                .descriptor_count(POOL_SIZE)
                .build(),
            vk::DescriptorPoolSize::builder()
                .ty(vk::DescriptorType::UNIFORM_BUFFER)
                .descriptor_count(POOL_SIZE)
                .build(),
            vk::DescriptorPoolSize::builder()
                .ty(vk::DescriptorType::STORAGE_BUFFER)
                .descriptor_count(POOL_SIZE)
                .build(),
        ];

        let info = vk::DescriptorPoolCreateInfo::builder()
            .pool_sizes(&sizes)
            .flags(vk::DescriptorPoolCreateFlags::FREE_DESCRIPTOR_SET)
            .max_sets(POOL_SIZE);

        self.pools.push(unsafe { dev.create_descriptor_pool(&info, None).unwrap() });
        self.capacities.push(0);
        self.pools.len() - 1
    }

    fn get_ideal_pool(&mut self, dev: &Device) -> usize {
        for (i, cap) in self.capacities.iter().enumerate() {
            if *cap < POOL_SIZE as usize {
                return i;
            }
        }
        self.add_pool(dev)
    }

    /// Allocates one descriptor set against `layout`.
    pub fn alloc_descriptor(&mut self, dev: &Device, layout: vk::DescriptorSetLayout) -> Descriptor {
        let pool_handle = self.get_ideal_pool(dev);
        let layouts = [layout];

        let info = vk::DescriptorSetAllocateInfo::builder()
            .descriptor_pool(self.pools[pool_handle])
            .set_layouts(&layouts)
            .build();

        self.capacities[pool_handle] += 1;

        let set = unsafe { dev.allocate_descriptor_sets(&info).unwrap()[0] };
        Descriptor { pool_handle, d_set: set }
    }

    pub fn free_descriptor(&mut self, dev: &Device, desc: &Descriptor) {
        assert!(desc.pool_handle < self.pools.len());
        unsafe {
            dev.free_descriptor_sets(self.pools[desc.pool_handle], &[desc.d_set]).unwrap();
        }
        self.capacities[desc.pool_handle] = self.capacities[desc.pool_handle].saturating_sub(1);
    }

    pub fn destroy_layout(&self, dev: &Device, layout: vk::DescriptorSetLayout) {
        unsafe {
            dev.destroy_descriptor_set_layout(layout, None);
        }
    }

    pub fn destroy(&mut self, dev: &Device) {
        unsafe {
            for p in self.pools.iter() {
                dev.destroy_descriptor_pool(*p, None);
            }
        }
    }
}
