//! Demo scene: the collaborator that owns renderables and feeds the queue.

use std::sync::Arc;

use glam::{Quat, Vec3};
use penumbra_common::{Color, Transform};
use penumbra_render::{
    AmbientLight, Culling, DataSource, GeometryBuffers, GpuDevice, Light, Material, MeshData,
    ProgramKind, RenderError, RenderObject, RenderQueue, RenderStateKind, RenderSystem,
    SharedRenderState, Texture, TextureTarget, WrapMode,
};
use tracing::info;

const TERRAIN_RESOLUTION: u32 = 64;

pub struct Scene {
    objects: Vec<RenderObject>,
    meshes: Vec<GeometryBuffers>,
    spinner: usize,
    elapsed: f32,
}

impl Scene {
    /// Upload meshes, create programs and states, and light the scene.
    /// `system` must be initialized.
    pub fn build<D: GpuDevice>(system: &mut RenderSystem<D>) -> Result<Self, RenderError> {
        let lit = system.create_gpu_shader_program(ProgramKind::Rendering)?;
        let sky = system.create_gpu_shader_program(ProgramKind::SkyBox)?;
        let terrain = system.create_gpu_shader_program(ProgramKind::Tessellation)?;
        let glass = system.create_gpu_shader_program(ProgramKind::Transparent)?;

        let cube = system.upload_mesh(&MeshData::cube(0.5))?;
        let floor = system.upload_mesh(&MeshData::plane(10.0))?;
        let patch = system.upload_mesh(&MeshData::screen_quad())?;

        let plain = texture_state(
            system,
            vec![Texture::solid("white", 1, 1, [255; 4])?],
            TextureTarget::TwoDimensional,
            WrapMode::ClampToEdge,
        )?;

        let mut objects = Vec::new();

        let mut skybox = RenderObject::new("sky", cube.clone()).with_program(sky);
        skybox.set_background(true);
        skybox.set_render_state(texture_state(
            system,
            sky_faces()?,
            TextureTarget::CubeMap,
            WrapMode::ClampToEdge,
        )?);
        let culling = system.create_render_state(RenderStateKind::Culling)?;
        if let Some(state) = culling.borrow_mut().as_culling_mut() {
            state.set_culling(Culling::Disabled);
        }
        skybox.set_render_state(culling);
        objects.push(skybox);

        let mut ground = RenderObject::new("floor", floor.clone())
            .with_program(lit)
            .with_material(material("floor", Color::rgb(0.7, 0.7, 0.7)));
        ground.set_render_state(texture_state(
            system,
            vec![checkerboard(64, 8)],
            TextureTarget::TwoDimensional,
            WrapMode::Repeat,
        )?);
        objects.push(ground);

        let spinner = objects.len();
        for (name, position, color) in [
            ("origin cube", Vec3::new(0.0, 0.5, 0.0), Color::rgb(0.9, 0.9, 0.9)),
            ("red cube", Vec3::new(3.0, 0.5, 0.0), Color::rgb(0.9, 0.2, 0.2)),
            ("blue cube", Vec3::new(-3.0, 0.5, 3.0), Color::rgb(0.2, 0.3, 0.9)),
        ] {
            let mut object = RenderObject::new(name, cube.clone())
                .with_program(lit)
                .with_material(material(name, color))
                .with_transform(Transform::from_position(position));
            object.set_render_state(plain.clone());
            objects.push(object);
        }

        let mut pane = RenderObject::new("glass", cube.clone())
            .with_program(glass)
            .with_material(material("glass", Color { a: 0.4, ..Color::rgb(0.6, 0.8, 1.0) }))
            .with_transform(Transform {
                position: Vec3::new(0.0, 1.5, -3.0),
                scale: Vec3::new(3.0, 3.0, 0.2),
                ..Transform::default()
            });
        pane.set_render_state(plain.clone());
        let depth = system.create_render_state(RenderStateKind::ZBuffer)?;
        if let Some(state) = depth.borrow_mut().as_zbuffer_mut() {
            state.set_writable(false);
        }
        pane.set_render_state(depth);

        let mut hills = RenderObject::new("terrain", patch.clone())
            .with_program(terrain)
            .with_data_source(DataSource::InstancedPatch)
            .with_transform(Transform {
                position: Vec3::new(0.0, -0.05, -30.0),
                scale: Vec3::new(40.0, 6.0, 40.0),
                ..Transform::default()
            });
        hills.set_patch_resolution(Some(TERRAIN_RESOLUTION));
        hills.set_render_state(texture_state(
            system,
            vec![heightmap(128)],
            TextureTarget::TwoDimensional,
            WrapMode::ClampToEdge,
        )?);
        objects.push(hills);
        // blended geometry goes last
        objects.push(pane);

        system.set_active_lights(vec![
            Light::directional(Vec3::new(-0.4, -1.0, -0.3)),
            Light {
                diffuse: Color::rgb(1.0, 0.8, 0.5),
                linear_attenuation: 0.09,
                quadratic_attenuation: 0.032,
                ..Light::point(Vec3::new(2.0, 3.0, 2.0))
            },
        ]);
        system.set_ambient_light(AmbientLight {
            intensity: Color::rgb(0.25, 0.25, 0.3),
        });

        info!(renderables = objects.len(), "scene built");
        Ok(Self {
            objects,
            meshes: vec![cube, floor, patch],
            spinner,
            elapsed: 0.0,
        })
    }

    pub fn animate(&mut self, dt: f32) {
        self.elapsed += dt;
        if let Some(object) = self.objects.get_mut(self.spinner) {
            object.transform_mut().rotation = Quat::from_rotation_y(self.elapsed);
        }
    }

    pub fn enqueue<'a>(&'a self, queue: &mut RenderQueue<'a>) {
        for object in &self.objects {
            queue.add(object);
        }
    }

    pub fn len(&self) -> usize {
        self.objects.len()
    }

    /// Drop every renderable and free the uploaded meshes.
    pub fn release<D: GpuDevice>(&mut self, system: &mut RenderSystem<D>) {
        self.objects.clear();
        for mesh in self.meshes.drain(..) {
            system.release_mesh(&mesh);
        }
    }
}

fn material(name: &str, diffuse: Color) -> Material {
    Material {
        name: name.to_owned(),
        diffuse,
        specular: Color::rgb(0.5, 0.5, 0.5),
        shininess: 32.0,
        ..Material::default()
    }
}

fn texture_state<D: GpuDevice>(
    system: &RenderSystem<D>,
    textures: Vec<Texture>,
    target: TextureTarget,
    wrap: WrapMode,
) -> Result<SharedRenderState, RenderError> {
    let state = system.create_render_state(RenderStateKind::Texture)?;
    if let Some(texture_state) = state.borrow_mut().as_texture_mut() {
        texture_state.set_target(target);
        texture_state.set_wrap_mode(wrap);
        for (unit, texture) in textures.into_iter().enumerate() {
            texture_state.set_texture_at(Arc::new(texture), unit as u32)?;
        }
    }
    Ok(state)
}

fn checkerboard(size: u32, cells: u32) -> Texture {
    let cell = (size / cells).max(1);
    let mut pixels = Vec::with_capacity((size * size * 4) as usize);
    for y in 0..size {
        for x in 0..size {
            let light = ((x / cell) + (y / cell)) % 2 == 0;
            let v = if light { 220 } else { 90 };
            pixels.extend_from_slice(&[v, v, v, 255]);
        }
    }
    Texture::rgba8("checkerboard", size, size, pixels)
}

/// Rolling hills in the red channel.
fn heightmap(size: u32) -> Texture {
    let mut pixels = Vec::with_capacity((size * size * 4) as usize);
    for y in 0..size {
        for x in 0..size {
            let (u, v) = (x as f32 / size as f32, y as f32 / size as f32);
            let h = 0.5
                + 0.25 * (u * std::f32::consts::TAU * 2.0).sin()
                + 0.25 * (v * std::f32::consts::TAU * 3.0).cos();
            let h = (h.clamp(0.0, 1.0) * 255.0) as u8;
            pixels.extend_from_slice(&[h, h, h, 255]);
        }
    }
    Texture::rgba8("heightmap", size, size, pixels)
}

/// +X, -X, +Y, -Y, +Z, -Z.
fn sky_faces() -> Result<Vec<Texture>, RenderError> {
    let horizon = [150, 190, 230, 255];
    [horizon, horizon, [90, 140, 220, 255], [40, 45, 55, 255], horizon, horizon]
        .into_iter()
        .enumerate()
        .map(|(face, rgba)| Texture::solid(format!("sky_{face}"), 4, 4, rgba))
        .collect()
}

#[cfg(test)]
mod tests {
    use penumbra_render::{GpuCommand, RecordingDevice, RenderConfig, RenderView};

    use super::*;

    fn system() -> RenderSystem<RecordingDevice> {
        let mut system = RenderSystem::new(RecordingDevice::new(), RenderConfig::default()).unwrap();
        system.initialize().unwrap();
        system
    }

    #[test]
    fn scene_draws_every_object() {
        let mut system = system();
        let scene = Scene::build(&mut system).unwrap();
        let viewport = penumbra_render::Viewport::new(800, 600);
        let mut queue = system.create_render_queue();
        scene.enqueue(&mut queue);
        let stats = system
            .process_render_queue(&queue, &viewport, &RenderView::default())
            .unwrap();
        assert_eq!(stats.main_draws as usize, scene.len());
        assert_eq!(stats.skipped, 0);
        // the sky is background and casts no shadow
        assert_eq!(stats.shadow_draws as usize, scene.len() - 1);
    }

    #[test]
    fn scene_is_lit() {
        let mut system = system();
        let _scene = Scene::build(&mut system).unwrap();
        assert_eq!(system.active_lights().len(), 2);
        assert!(system.gpu_shader_program(ProgramKind::Tessellation).is_ok());
    }

    #[test]
    fn spinner_rotates() {
        let mut system = system();
        let mut scene = Scene::build(&mut system).unwrap();
        scene.animate(1.0);
        let rotation = scene.objects[scene.spinner].transform().rotation;
        assert!(rotation.angle_between(Quat::IDENTITY) > 0.5);
    }

    #[test]
    fn release_frees_meshes() {
        let mut system = system();
        let mut scene = Scene::build(&mut system).unwrap();
        scene.release(&mut system);
        assert_eq!(scene.len(), 0);
        let destroyed = system
            .device()
            .commands()
            .iter()
            .filter(|c| matches!(c, GpuCommand::DestroyGeometry(_)))
            .count();
        assert_eq!(destroyed, 3);
    }
}
