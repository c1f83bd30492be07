// Scenarios that need a real shader pipeline, gated behind the `glsl`
// feature so they only run when `shaderc` is actually available
// (`cargo test --features glsl`). Everything else in `tests/` avoids
// shader compilation entirely so it runs on a bare Vulkan install.

#![cfg(feature = "glsl")]

use dvz_protocol::protocol::{BufferType, DrawKind, PrimitiveTopology, ShaderSource, ShaderStage, SlotDecl};
use dvz_protocol::{Batch, Context, ContextInfo, HeadlessBackend, IdCounter, Presenter, RequestFlags};

fn headless_ctx() -> Context {
    Context::new(&ContextInfo::default()).expect("headless context construction should always succeed on a working Vulkan install")
}

const VERTEX_SHADER: &str = r#"
#version 450
layout(location = 0) in vec4 inPos;
void main() {
    gl_Position = inPos;
}
"#;

const FRAGMENT_SHADER: &str = r#"
#version 450
layout(location = 0) out vec4 outColor;
void main() {
    outColor = vec4(1.0, 0.0, 0.0, 1.0);
}
"#;

/// A single opaque triangle, covering the center of a small offscreen
/// canvas, paints its fragment shader's color at the center pixel while
/// leaving a far corner at the canvas's clear color.
#[test]
fn triangle_paints_its_fragment_color_over_the_clear_color() {
    let mut ctx = headless_ctx();
    let ids = IdCounter::new();

    let clear = [0.0, 0.0, 0.0, 1.0];
    let mut setup = Batch::new();
    let canvas = setup.create_canvas(&ids, 64, 64, clear, 1);

    let vs = setup.create_shader(&ids, ShaderStage::Vertex, ShaderSource::Glsl(VERTEX_SHADER.to_string()));
    let fs = setup.create_shader(&ids, ShaderStage::Fragment, ShaderSource::Glsl(FRAGMENT_SHADER.to_string()));
    let pipeline = setup.create_graphics(&ids, vs, fs, PrimitiveTopology::TriangleList, Vec::new());
    setup.set_vertex_layout(pipeline, 16);
    setup.set_attr(pipeline, 0, 0);

    // Clip-space vertices covering most of the viewport, as vec4 positions
    // (the pipeline's vertex attribute format is fixed to a 4-component
    // float regardless of what's declared, so every attribute is a vec4).
    let vertices: [[f32; 4]; 3] = [[-0.8, 0.8, 0.0, 1.0], [0.8, 0.8, 0.0, 1.0], [0.0, -0.8, 0.0, 1.0]];
    let mut vertex_bytes = Vec::with_capacity(48);
    for v in &vertices {
        for c in v {
            vertex_bytes.extend_from_slice(&c.to_le_bytes());
        }
    }
    let vbuf = setup.create_dat(&ids, BufferType::Vertex, vertex_bytes.len() as u64, RequestFlags::MAPPABLE);
    ctx.submit(setup);

    let mut upload = Batch::new();
    upload.upload_dat(vbuf, 0, vertex_bytes, None, RequestFlags::WAIT);
    ctx.submit(upload);

    let mut bind = Batch::new();
    bind.bind_vertex(pipeline, vbuf);
    ctx.submit(bind);

    let mut record = Batch::new();
    record.record_begin(canvas);
    record.record_viewport(canvas, 0, 0, 64, 64);
    record.record_draw(canvas, DrawKind::Direct, pipeline, 0, 3, 0, 1, 0, None);
    record.record_end(canvas);
    ctx.submit(record);

    let mut window = HeadlessBackend::new(64, 64);
    let mut presenter = Presenter::new();
    presenter
        .run(&ctx.device, &ctx.instance, &mut ctx.manager, &mut ctx.dispatcher, &mut window, 1)
        .expect("a single frame recording one triangle draw should not fail");

    ctx.device.wait_for_latest_timeline();

    let canvas_ref = ctx.dispatcher.canvas(canvas).expect("canvas must still be registered");
    let pixels = canvas_ref.read_color_pixels(&ctx.device, 0).expect("reading back the rendered image should succeed");

    let pixel_at = |x: u32, y: u32| -> &[u8] {
        let idx = ((y * 64 + x) * 4) as usize;
        &pixels[idx..idx + 4]
    };

    // The triangle's centroid in clip space sits near (0, 0.27); a pixel
    // directly under it should carry the fragment shader's solid red.
    let center = pixel_at(32, 28);
    assert_eq!(center, &[255, 0, 0, 255], "a pixel covered by the triangle should be fragment-shader red");

    // The top-left corner lies outside every triangle edge no matter how
    // the rasterizer's exact coverage rule falls, so it must still be the
    // canvas's clear color.
    let corner = pixel_at(1, 1);
    let expected_clear: Vec<u8> = clear.iter().map(|c| (c * 255.0).round() as u8).collect();
    assert_eq!(corner, expected_clear.as_slice(), "a pixel outside the triangle should still be the clear color");
}

/// A `dup` dat gets a physically distinct copy per swapchain image; writing
/// a different value to each copy and reading each one back individually
/// (by `image_index`) shows the copies don't alias each other, and writing
/// the *same* value to every copy shows they can still agree.
///
/// This exercises the transfer engine's per-copy addressing directly
/// (`upload_dat`/`download_dat` with an explicit `image_index`), one layer
/// below `uniform_dat_copy_is_resolved_per_rendered_image` below, which
/// drives the same guarantee through a bound descriptor and an actual draw.
#[test]
fn dup_dat_copies_are_independently_addressable_by_image_index() {
    let mut ctx = headless_ctx();
    let ids = IdCounter::new();

    const IMAGE_COUNT: u32 = 3;
    const SIZE: u64 = 16;

    let mut create = Batch::new();
    let canvas = create.create_canvas(&ids, 8, 8, [0.0, 0.0, 0.0, 1.0], IMAGE_COUNT);
    let dat = create.create_dat(&ids, BufferType::Uniform, SIZE, RequestFlags::MAPPABLE | RequestFlags::DUP);
    ctx.submit(create);
    let _ = canvas;

    for i in 0..IMAGE_COUNT {
        let mut upload = Batch::new();
        let pattern = vec![(i + 1) as u8; SIZE as usize];
        upload.upload_dat(dat, 0, pattern, Some(i), RequestFlags::WAIT);
        ctx.submit(upload);
    }

    for i in 0..IMAGE_COUNT {
        let mut download = Batch::new();
        download.download_dat(dat, 0, SIZE, Some(i), RequestFlags::empty());
        let results = ctx.submit(download);
        assert_eq!(results.len(), 1);
        let expected = vec![(i + 1) as u8; SIZE as usize];
        assert_eq!(results[0].bytes, expected, "copy {} should read back the value written to it, not a neighboring copy's", i);
    }

    let shared = vec![7u8; SIZE as usize];
    for i in 0..IMAGE_COUNT {
        let mut upload = Batch::new();
        upload.upload_dat(dat, 0, shared.clone(), Some(i), RequestFlags::WAIT);
        ctx.submit(upload);
    }
    for i in 0..IMAGE_COUNT {
        let mut download = Batch::new();
        download.download_dat(dat, 0, SIZE, Some(i), RequestFlags::empty());
        let results = ctx.submit(download);
        assert_eq!(results[0].bytes, shared, "every copy should agree once the same value is written to all of them");
    }
}

const UNIFORM_FRAGMENT_SHADER: &str = r#"
#version 450
layout(set = 0, binding = 0) uniform Encoded {
    vec4 color;
} ubo;
layout(location = 0) out vec4 outColor;
void main() {
    outColor = ubo.color;
}
"#;

/// A `dup` uniform dat with 3 copies, bound into a graphics pipeline's
/// fragment-stage descriptor slot, uploaded once with `image_index: None`
/// (broadcasting to every copy) and sampled by a full-viewport triangle
/// across 3 rendered frames. The encoded value must show up identically on
/// every one of the 3 swapchain images, which only holds if the pipeline's
/// descriptor binding is re-resolved against the currently-rendering image
/// before each frame's draw rather than frozen at bind time.
#[test]
fn uniform_dat_copy_is_resolved_per_rendered_image() {
    let mut ctx = headless_ctx();
    let ids = IdCounter::new();

    const IMAGE_COUNT: u32 = 3;
    const SIZE: u32 = 8;
    const ENCODED_VALUE: u8 = 42;

    let clear = [0.0, 0.0, 0.0, 1.0];
    let mut setup = Batch::new();
    let canvas = setup.create_canvas(&ids, SIZE, SIZE, clear, IMAGE_COUNT);

    let vs = setup.create_shader(&ids, ShaderStage::Vertex, ShaderSource::Glsl(VERTEX_SHADER.to_string()));
    let fs = setup.create_shader(&ids, ShaderStage::Fragment, ShaderSource::Glsl(UNIFORM_FRAGMENT_SHADER.to_string()));
    let pipeline = setup.create_graphics(
        &ids,
        vs,
        fs,
        PrimitiveTopology::TriangleList,
        vec![SlotDecl {
            slot: 0,
            stage: ShaderStage::Fragment,
        }],
    );
    setup.set_vertex_layout(pipeline, 16);
    setup.set_attr(pipeline, 0, 0);

    // A triangle well past the viewport on every side covers every pixel.
    let vertices: [[f32; 4]; 3] = [[-4.0, 4.0, 0.0, 1.0], [4.0, 4.0, 0.0, 1.0], [0.0, -4.0, 0.0, 1.0]];
    let mut vertex_bytes = Vec::with_capacity(48);
    for v in &vertices {
        for c in v {
            vertex_bytes.extend_from_slice(&c.to_le_bytes());
        }
    }
    let vbuf = setup.create_dat(&ids, BufferType::Vertex, vertex_bytes.len() as u64, RequestFlags::MAPPABLE);
    let ubo = setup.create_dat(&ids, BufferType::Uniform, 16, RequestFlags::MAPPABLE | RequestFlags::DUP);
    ctx.submit(setup);

    let mut upload = Batch::new();
    upload.upload_dat(vbuf, 0, vertex_bytes, None, RequestFlags::WAIT);
    // Broadcasts to all 3 copies: a single `upload_dat` call, no per-image
    // loop, matching a uniform that's set once and expected to read back
    // the same value regardless of which image renders it.
    let encoded: f32 = ENCODED_VALUE as f32 / 255.0;
    let mut ubo_bytes = Vec::with_capacity(16);
    ubo_bytes.extend_from_slice(&encoded.to_le_bytes());
    ubo_bytes.extend_from_slice(&0.0f32.to_le_bytes());
    ubo_bytes.extend_from_slice(&0.0f32.to_le_bytes());
    ubo_bytes.extend_from_slice(&1.0f32.to_le_bytes());
    upload.upload_dat(ubo, 0, ubo_bytes, None, RequestFlags::WAIT);
    ctx.submit(upload);

    let mut bind = Batch::new();
    bind.bind_vertex(pipeline, vbuf);
    bind.bind_dat(pipeline, 0, ubo);
    ctx.submit(bind);

    let mut record = Batch::new();
    record.record_begin(canvas);
    record.record_viewport(canvas, 0, 0, SIZE, SIZE);
    record.record_draw(canvas, DrawKind::Direct, pipeline, 0, 3, 0, 1, 0, None);
    record.record_end(canvas);
    ctx.submit(record);

    let mut window = HeadlessBackend::new(SIZE, SIZE);
    let mut presenter = Presenter::new();
    presenter
        .run(
            &ctx.device,
            &ctx.instance,
            &mut ctx.manager,
            &mut ctx.dispatcher,
            &mut window,
            IMAGE_COUNT as u64,
        )
        .expect("3 frames over a 3-image canvas should each draw without error");

    ctx.device.wait_for_latest_timeline();

    let canvas_ref = ctx.dispatcher.canvas(canvas).expect("canvas must still be registered");
    for image_index in 0..IMAGE_COUNT {
        let pixels = canvas_ref
            .read_color_pixels(&ctx.device, image_index)
            .unwrap_or_else(|e| panic!("reading back image {} should succeed: {:?}", image_index, e));
        let center = (SIZE / 2) as usize;
        let idx = (center * SIZE as usize + center) * 4;
        let red = pixels[idx];
        assert_eq!(
            red, ENCODED_VALUE,
            "image {}'s center pixel should encode the uniform's value, not whatever copy 0 happened to hold",
            image_index
        );
    }
}
