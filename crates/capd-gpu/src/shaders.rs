//! GLSL compute kernel sources, compiled to SPIR-V at preprocessor
//! construction time (spec &4.5).

/// Base kernel: samples the external texture at a UV transformed by
/// `transform_matrix`, writes RGB with A=1 to the output image. Workgroup
/// size 16x16, dispatched over `ceil(out_w/16) x ceil(out_h/16)`.
pub const BASE_KERNEL_SRC: &str = r"
#version 450
layout(local_size_x = 16, local_size_y = 16) in;

layout(binding = 0) uniform sampler2D in_tex;
layout(binding = 1, rgba8) writeonly uniform image2D out_img;

layout(push_constant) uniform Uniforms {
    vec2 in_size;
    vec2 out_size;
    mat4 transform_matrix;
} u;

void main() {
    ivec2 out_xy = ivec2(gl_GlobalInvocationID.xy);
    if (out_xy.x >= int(u.out_size.x) || out_xy.y >= int(u.out_size.y)) {
        return;
    }
    vec2 uv = (vec2(out_xy) + 0.5) / u.out_size;
    vec4 transformed = u.transform_matrix * vec4(uv, 0.0, 1.0);
    vec4 sampled = texture(in_tex, transformed.xy);
    imageStore(out_img, out_xy, vec4(sampled.rgb, 1.0));
}
";

/// ROI kernel: as the base kernel, but fits `roi` (normalized input
/// coordinates) into `out_size` with aspect-preserving letterboxing;
/// pixels outside the fitted rectangle are filled with 0.5 gray.
pub const ROI_KERNEL_SRC: &str = r"
#version 450
layout(local_size_x = 16, local_size_y = 16) in;

layout(binding = 0) uniform sampler2D in_tex;
layout(binding = 1, rgba8) writeonly uniform image2D out_img;

layout(push_constant) uniform Uniforms {
    vec2 in_size;
    vec2 out_size;
    mat4 transform_matrix;
    vec4 roi;
} u;

void main() {
    ivec2 out_xy = ivec2(gl_GlobalInvocationID.xy);
    if (out_xy.x >= int(u.out_size.x) || out_xy.y >= int(u.out_size.y)) {
        return;
    }

    float roi_aspect = u.roi.z / u.roi.w;
    float out_aspect = u.out_size.x / u.out_size.y;

    vec2 fit_size = u.out_size;
    vec2 fit_offset = vec2(0.0);
    if (roi_aspect > out_aspect) {
        fit_size.y = u.out_size.x / roi_aspect;
        fit_offset.y = (u.out_size.y - fit_size.y) * 0.5;
    } else {
        fit_size.x = u.out_size.y * roi_aspect;
        fit_offset.x = (u.out_size.x - fit_size.x) * 0.5;
    }

    vec2 local = vec2(out_xy) - fit_offset;
    if (local.x < 0.0 || local.y < 0.0 || local.x >= fit_size.x || local.y >= fit_size.y) {
        imageStore(out_img, out_xy, vec4(0.5, 0.5, 0.5, 1.0));
        return;
    }

    vec2 roi_uv = local / fit_size;
    vec2 uv = u.roi.xy + roi_uv * u.roi.zw;
    vec4 transformed = u.transform_matrix * vec4(uv, 0.0, 1.0);
    vec4 sampled = texture(in_tex, transformed.xy);
    imageStore(out_img, out_xy, vec4(sampled.rgb, 1.0));
}
";

/// Compiles `source` (a named compute shader) to SPIR-V.
pub fn compile_compute(compiler: &shaderc::Compiler, name: &str, source: &str) -> crate::error::Result<Vec<u32>> {
    let options = shaderc::CompileOptions::new()
        .ok_or_else(|| crate::error::Error::InternalError("failed to create shaderc options".into()))?;
    let artifact = compiler
        .compile_into_spirv(source, shaderc::ShaderKind::Compute, name, "main", Some(&options))
        .map_err(|e| crate::error::Error::InternalError(format!("{name}: {e}")))?;
    Ok(artifact.as_binary().to_vec())
}
