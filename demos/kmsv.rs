use std::collections::HashMap;

use anyhow::Result;
use clap::Parser;

use scanout::mock::{MockBackend, MockRequest};
use scanout::{
    AllocatorConfig, Device, Format, FormatModifier, FramebufferInfo, Modifier, PlaneDescriptor,
    PlaneKind, PropertyRange, PropertySchema,
};

/// Drives the allocator against an in-process fake display device and
/// prints the resulting plane assignment for each layer, standing in for
/// the real DRM card this crate never talks to directly.
#[derive(Parser)]
struct Cli {
    /// Number of overlay planes the fake device exposes, in addition to
    /// one primary plane.
    #[arg(short, long, default_value_t = 2)]
    overlays: u32,

    /// Number of layers the fake compositor wants shown.
    #[arg(short, long, default_value_t = 3)]
    layers: u32,
}

fn build_planes(overlay_count: u32) -> Vec<PlaneDescriptor> {
    let mut next_id = 0;
    let mut full_properties = |zpos: Option<u64>| -> HashMap<String, PropertySchema> {
        let mut props = HashMap::new();
        for name in ["CRTC_ID", "FB_ID", "CRTC_X", "CRTC_Y", "CRTC_W", "CRTC_H"] {
            next_id += 1;
            props.insert(
                name.to_owned(),
                PropertySchema::new(next_id, name, true, 0, PropertyRange::Unrestricted),
            );
        }
        if let Some(default) = zpos {
            next_id += 1;
            props.insert(
                "zpos".to_owned(),
                PropertySchema::new(next_id, "zpos", false, default, PropertyRange::Unrestricted),
            );
        }
        props
    };

    let mut planes = vec![PlaneDescriptor {
        id: 0,
        kind: PlaneKind::Primary,
        possible_crtcs: 1,
        properties: full_properties(None),
        in_formats: None,
    }];

    for i in 0..overlay_count {
        let id = planes.len() as u32;
        planes.push(PlaneDescriptor {
            id,
            kind: PlaneKind::Overlay,
            possible_crtcs: 1,
            properties: full_properties(Some(u64::from(i) + 1)),
            in_formats: Some(vec![FormatModifier::new(Format::ARGB8888, Modifier::LINEAR)]),
        });
    }

    planes
}

fn main() -> Result<()> {
    tracing_subscriber::fmt::init();

    let cli = Cli::parse();

    let mut backend = MockBackend::new(build_planes(cli.overlays));
    for fb_id in 1..=u64::from(cli.layers) {
        backend = backend.with_framebuffer(
            fb_id,
            FramebufferInfo {
                format: FormatModifier::new(Format::ARGB8888, Modifier::LINEAR),
                width: 1920,
                height: 1080,
            },
        );
    }

    let device = Device::new(backend);
    device.register_all_planes()?;
    let output = device.create_output(0);

    let layers: Vec<_> = (0..cli.layers)
        .map(|i| {
            let layer = output.create_layer();
            layer.set_property("FB_ID", u64::from(i) + 1);
            layer.set_property("CRTC_X", 0);
            layer.set_property("CRTC_Y", 0);
            layer.set_property("CRTC_W", 1920);
            layer.set_property("CRTC_H", 1080);
            layer
        })
        .collect();

    let request_backend = MockBackend::new(Vec::new());
    let mut request = MockRequest::new(&request_backend);

    let outcome = output.apply(&mut request, &AllocatorConfig::new())?;
    println!(
        "{} layer(s) assigned to planes, {} falling back to GPU composition",
        outcome.assigned, outcome.needs_composition
    );
    for (i, layer) in layers.iter().enumerate() {
        match layer.plane_id() {
            Some(plane_id) => println!("layer {i} -> plane {plane_id}"),
            None => println!("layer {i} -> composited"),
        }
    }

    Ok(())
}
