// The authoritative ID -> object map.
//
// Maps opaque object identifiers to GPU-side allocations. Built on
// `lluvia`'s `Instance`/`Component` model for the backing store, collapsed
// into a single `ResourceObject` sum type (see `resources/mod.rs`) instead
// of one `lluvia::Component` per kind, because the dispatcher needs one
// lookup that can answer "what kind is this id" without probing five
// separate tables. `lluvia::Entity` is its own internal handle, not the
// protocol's externally-visible `Id`, so an external `HashMap<Id,
// ll::Entity>` bridges the two.

use std::collections::HashMap;

use ash::vk;
use lluvia as ll;

use crate::alloc::SharedBufferPool;
use crate::descpool::DescPool;
use crate::device::Device;
use crate::error::{Error, ErrorKind, Result};
use crate::graveyard::ResourceGraveyard;
use crate::id::Id;
use crate::protocol::request::{BufferType, ObjectKind, ShaderStage};
use crate::resources::ResourceObject;

pub struct ResourceManager {
    ecs: ll::Instance,
    objects: ll::Component<ResourceObject>,
    entities: HashMap<Id, ll::Entity>,
    kinds: HashMap<Id, ObjectKind>,
    buffer_pools: HashMap<(BufferType, bool), SharedBufferPool>,
    pub descpool: DescPool,
    pub graveyard: ResourceGraveyard,
}

impl ResourceManager {
    pub fn new(dev: &Device) -> Self {
        let mut ecs = ll::Instance::new();
        let objects = ecs.add_component::<ResourceObject>();
        Self {
            ecs,
            objects,
            entities: HashMap::new(),
            kinds: HashMap::new(),
            buffer_pools: HashMap::new(),
            descpool: DescPool::new(&dev.dev),
            graveyard: ResourceGraveyard::new(),
        }
    }

    pub fn num_objects(&self) -> usize {
        self.ecs.num_entities()
    }

    /// Returns the shared buffer pool for `(buffer_type, mappable)`,
    /// creating it on first use: one shared GPU buffer per
    /// `(buffer type, mappable?)` pair.
    pub fn pool_for(&mut self, dev: &Device, buffer_type: BufferType, mappable: bool) -> &mut SharedBufferPool {
        self.buffer_pools
            .entry((buffer_type, mappable))
            .or_insert_with(|| SharedBufferPool::new(dev, buffer_type, mappable))
    }

    pub fn pool_for_ref(&self, buffer_type: BufferType, mappable: bool) -> Option<&SharedBufferPool> {
        self.buffer_pools.get(&(buffer_type, mappable))
    }

    pub fn insert(&mut self, id: Id, kind: ObjectKind, object: ResourceObject) {
        let entity = self.ecs.add_entity();
        self.objects.set(&entity, object);
        self.kinds.insert(id, kind);
        self.entities.insert(id, entity);
    }

    pub fn kind_of(&self, id: Id) -> Option<ObjectKind> {
        self.kinds.get(&id).copied()
    }

    pub fn get(&self, id: Id) -> Result<ll::TableRef<'_, ResourceObject, ll::VecContainer<ResourceObject>>> {
        let entity = self.entities.get(&id).ok_or_else(|| Error::new(ErrorKind::StaleReference, "unknown object id"))?;
        self.objects.get(entity).ok_or_else(|| Error::new(ErrorKind::StaleReference, "object id has no live component"))
    }

    pub fn get_mut(&self, id: Id) -> Result<ll::TableRefMut<'_, ResourceObject, ll::VecContainer<ResourceObject>>> {
        let entity = self.entities.get(&id).ok_or_else(|| Error::new(ErrorKind::StaleReference, "unknown object id"))?;
        self.objects.get_mut(entity).ok_or_else(|| Error::new(ErrorKind::StaleReference, "object id has no live component"))
    }

    /// Builds a pipeline's Vulkan objects in place. Takes `&mut self.objects`
    /// and `&mut self.descpool` as disjoint field borrows (rather than going
    /// through `get_mut`, which reborrows the whole manager) so the pipeline
    /// can be mutated while its descriptor set is allocated from the same
    /// manager's pool.
    pub fn build_pipeline(
        &mut self,
        dev: &Device,
        id: Id,
        shader_modules: &HashMap<Id, (vk::ShaderModule, ShaderStage)>,
        render_pass: vk::RenderPass,
        extent: vk::Extent2D,
    ) -> Result<()> {
        let entity = self.entities.get(&id).ok_or_else(|| Error::new(ErrorKind::StaleReference, "unknown object id"))?.clone();
        let mut object = self
            .objects
            .get_mut(&entity)
            .ok_or_else(|| Error::new(ErrorKind::StaleReference, "object id has no live component"))?;
        match &mut *object {
            ResourceObject::Pipeline(p) => p.build(dev, &mut self.descpool, shader_modules, render_pass, extent),
            _ => Err(Error::new(ErrorKind::ValidationFailed, "target is not a pipeline")),
        }
    }

    /// Removes `id` from the live table and hands the object to the
    /// graveyard to be destroyed once `frame` is known complete. `frame`
    /// is already complete the moment the graveyard has never seen a
    /// later one (e.g. a delete in the same batch as the create, before
    /// any frame has been presented), so that path destroys immediately
    /// against `dev` rather than queuing for a completion that already
    /// happened.
    pub fn tombstone(&mut self, dev: &Device, id: Id, frame: u64) -> Result<()> {
        self.kinds.remove(&id);
        let entity = self
            .entities
            .remove(&id)
            .ok_or_else(|| Error::new(ErrorKind::StaleReference, "unknown object id"))?;
        let object = self.objects.take(&entity).ok_or_else(|| Error::new(ErrorKind::StaleReference, "object id has no live component"))?;
        if let Some((id, object)) = self.graveyard.schedule_drop_at_frame(id, object, frame) {
            self.destroy_object_with_device(dev, id, object)?;
        }
        Ok(())
    }

    /// Drains and destroys every graveyard entry whose scheduled frame is
    /// now complete (called once per frame by the presenter).
    pub fn drain_graveyard(&mut self, dev: &Device, completed_frame: u64) -> Result<()> {
        let ready = self.graveyard.drain_completed(completed_frame);
        for (id, object) in ready {
            self.destroy_object_with_device(dev, id, object)?;
        }
        Ok(())
    }

    fn destroy_object_with_device(&mut self, dev: &Device, _id: Id, object: ResourceObject) -> Result<()> {
        match object {
            ResourceObject::Dat(mut dat) => {
                let pool = if dat.standalone { None } else { Some(self.buffer_pools.get_mut(&(dat.buffer_type, dat.mappable)).expect("pool must exist")) };
                dat.destroy(dev, pool)?;
            }
            ResourceObject::Tex(mut tex) => tex.destroy(dev)?,
            ResourceObject::Sampler(mut s) => s.destroy(dev)?,
            ResourceObject::Shader(mut s) => s.destroy(dev)?,
            ResourceObject::Pipeline(mut p) => p.destroy(dev, &mut self.descpool)?,
        }
        Ok(())
    }

    pub unsafe fn destroy_all(&mut self, dev: &Device) {
        for (_, entity) in self.entities.drain() {
            if let Some(object) = self.objects.take(&entity) {
                let _ = match object {
                    ResourceObject::Dat(mut dat) => {
                        let pool = if dat.standalone {
                            None
                        } else {
                            self.buffer_pools.get_mut(&(dat.buffer_type, dat.mappable))
                        };
                        dat.destroy(dev, pool)
                    }
                    ResourceObject::Tex(mut tex) => tex.destroy(dev),
                    ResourceObject::Sampler(mut s) => s.destroy(dev),
                    ResourceObject::Shader(mut s) => s.destroy(dev),
                    ResourceObject::Pipeline(mut p) => p.destroy(dev, &mut self.descpool),
                };
            }
        }
        self.kinds.clear();
        for (_, pool) in self.buffer_pools.drain() {
            let mut pool = pool;
            pool.destroy_all(dev);
        }
        self.descpool.destroy(&dev.dev);
    }
}
