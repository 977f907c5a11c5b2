//! Reflection tests for the built-in shaders.
//!
//! These only need naga, so they run on machines without a GPU.

use windfield::gpu::reflect::ProgramLayout;
use windfield::{ShaderSources, ShaderStage, UniformKind, WindError};

fn layouts() -> [(&'static str, ProgramLayout); 3] {
    let s = ShaderSources::embedded();
    [
        ("draw", ProgramLayout::reflect(&s.draw_vert, &s.draw_frag).unwrap()),
        ("screen", ProgramLayout::reflect(&s.quad_vert, &s.screen_frag).unwrap()),
        ("update", ProgramLayout::reflect(&s.quad_vert, &s.update_frag).unwrap()),
    ]
}

#[test]
fn test_builtin_programs_link() {
    for (name, layout) in layouts() {
        assert_eq!(layout.vertex_entry, "main", "{name}");
        assert_eq!(layout.fragment_entry, "main", "{name}");
    }
}

#[test]
fn test_draw_program_interface() {
    let [(_, draw), _, _] = layouts();

    let index = draw.attribute("a_index").unwrap();
    assert_eq!(index.arity, 1);
    assert_eq!(index.location, 0);

    for sampler in ["u_particles", "u_wind", "u_color_ramp"] {
        assert_eq!(draw.uniform(sampler).unwrap().kind, UniformKind::Sampler, "{sampler}");
    }
    assert_eq!(draw.uniform("u_particles_res").unwrap().kind, UniformKind::Float);
    assert_eq!(draw.uniform("u_wind_min").unwrap().kind, UniformKind::Vec2);
    assert_eq!(draw.uniform("u_wind_max").unwrap().kind, UniformKind::Vec2);
}

#[test]
fn test_quad_programs_share_a_pos() {
    let [_, (_, screen), (_, update)] = layouts();
    for layout in [&screen, &update] {
        let pos = layout.attribute("a_pos").unwrap();
        assert_eq!(pos.arity, 2);
    }
    assert_eq!(screen.uniform("u_opacity").unwrap().kind, UniformKind::Float);
    assert_eq!(screen.uniform("u_screen").unwrap().kind, UniformKind::Sampler);
}

#[test]
fn test_update_program_uniforms() {
    let [_, _, (_, update)] = layouts();
    let expected = [
        ("u_particles", UniformKind::Sampler),
        ("u_wind", UniformKind::Sampler),
        ("u_wind_res", UniformKind::Vec2),
        ("u_wind_min", UniformKind::Vec2),
        ("u_wind_max", UniformKind::Vec2),
        ("u_rand_seed", UniformKind::Float),
        ("u_speed_factor", UniformKind::Float),
        ("u_drop_rate", UniformKind::Float),
        ("u_drop_rate_bump", UniformKind::Float),
    ];
    for (name, kind) in expected {
        let decl = update
            .uniform(name)
            .unwrap_or_else(|| panic!("missing uniform {name}"));
        assert_eq!(decl.kind, kind, "{name}");
    }
}

#[test]
fn test_broken_fragment_reports_fragment_stage() {
    let s = ShaderSources::embedded();
    let broken = s.screen_frag.replace("u_opacity", "u_opacity +");
    match ProgramLayout::reflect(&s.quad_vert, &broken) {
        Err(WindError::Compile(e)) => {
            assert_eq!(e.stage, ShaderStage::Fragment);
            assert!(!e.log.is_empty());
        }
        other => panic!("expected a compile error, got {other:?}"),
    }
}

#[test]
fn test_vertex_without_entry_point_fails() {
    let s = ShaderSources::embedded();
    let no_entry = "fn helper() -> f32 { return 1.0; }";
    match ProgramLayout::reflect(no_entry, &s.screen_frag) {
        Err(WindError::Compile(e)) => assert_eq!(e.stage, ShaderStage::Vertex),
        other => panic!("expected a compile error, got {other:?}"),
    }
}
