// Build script to compile the fixed GLSL shaders to SPIR-V
//
// The pipeline reads vert.spv / frag.spv at startup. When glslc is missing the
// build still succeeds and the renderer reports a resource error at runtime.

use std::path::Path;
use std::process::Command;

fn main() {
    println!("cargo:rerun-if-changed=shaders/");

    compile_shader("shaders/fullscreen.vert", "vert.spv");
    compile_shader("shaders/fullscreen.frag", "frag.spv");
}

fn compile_shader(input: &str, output: &str) {
    let input_path = Path::new(input);
    let output_path = Path::new(output);

    if !input_path.exists() {
        println!("cargo:warning=shader source {} not found", input);
        return;
    }

    let result = Command::new("glslc")
        .arg(input_path)
        .arg("-o")
        .arg(output_path)
        .status();

    match result {
        Ok(status) if status.success() => {}
        Ok(status) => {
            panic!("Failed to compile {}: exit code {:?}", input, status.code());
        }
        Err(e) => {
            println!("cargo:warning=glslc not found ({}), shaders not compiled", e);
            println!("cargo:warning=compile manually: glslc {} -o {}", input, output);
        }
    }
}
