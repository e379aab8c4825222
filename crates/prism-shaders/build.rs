//! Build script to compile the GLSL ray tracing shaders to SPIR-V.

fn main() {
    // Rerun if shaders change
    println!("cargo:rerun-if-changed=shaders/");

    #[cfg(feature = "ray_tracing")]
    compile::all();
}

#[cfg(feature = "ray_tracing")]
mod compile {
    use shaderc::{Compiler, ShaderKind};
    use std::env;
    use std::fs;
    use std::path::Path;

    const SHADERS: [(&str, &str, ShaderKind); 5] = [
        ("raygen.rgen", "raygen.spv", ShaderKind::RayGeneration),
        ("primary.rchit", "primary_rchit.spv", ShaderKind::ClosestHit),
        ("shadow.rchit", "shadow_rchit.spv", ShaderKind::ClosestHit),
        ("primary.rmiss", "primary_rmiss.spv", ShaderKind::Miss),
        ("shadow.rmiss", "shadow_rmiss.spv", ShaderKind::Miss),
    ];

    pub fn all() {
        let out_dir = env::var("OUT_DIR").unwrap();
        let shader_dir = Path::new("shaders");

        let compiler = Compiler::new().expect("Failed to create shader compiler");

        for (source, output, kind) in SHADERS {
            compile_shader(
                &compiler,
                shader_dir.join(source),
                Path::new(&out_dir).join(output),
                kind,
            );
        }
    }

    fn compile_shader(
        compiler: &Compiler,
        input: impl AsRef<Path>,
        output: impl AsRef<Path>,
        kind: ShaderKind,
    ) {
        let input_path = input.as_ref();
        let output_path = output.as_ref();

        let source = fs::read_to_string(input_path)
            .unwrap_or_else(|e| panic!("Failed to read shader {input_path:?}: {e}"));

        let file_name = input_path.file_name().unwrap().to_str().unwrap();

        let mut options =
            shaderc::CompileOptions::new().expect("Failed to create compile options");
        options.set_target_env(
            shaderc::TargetEnv::Vulkan,
            shaderc::EnvVersion::Vulkan1_3 as u32,
        );
        options.set_target_spirv(shaderc::SpirvVersion::V1_6);
        options.set_optimization_level(shaderc::OptimizationLevel::Performance);

        let result = compiler
            .compile_into_spirv(&source, kind, file_name, "main", Some(&options))
            .unwrap_or_else(|e| panic!("Failed to compile shader {input_path:?}: {e}"));

        if result.get_num_warnings() > 0 {
            println!(
                "cargo:warning=Shader warnings in {input_path:?}: {}",
                result.get_warning_messages()
            );
        }

        fs::write(
            output_path,
            bytemuck::cast_slice::<u32, u8>(result.as_binary()),
        )
        .unwrap_or_else(|e| panic!("Failed to write shader {output_path:?}: {e}"));
    }
}
