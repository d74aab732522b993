// Shader module loading
//
// Vulkan consumes SPIR-V bytecode. Modules are read from disk once per
// pipeline build and destroyed as soon as the pipeline exists.

use ash::vk;
use std::io::Cursor;
use std::path::Path;

use crate::error::{RenderError, RenderResult, ResultExt};

/// First word of every SPIR-V module
pub const SPIRV_MAGIC: u32 = 0x0723_0203;

/// Turn raw file bytes into SPIR-V words, rejecting anything that is not SPIR-V
pub fn parse_spirv(bytes: &[u8]) -> RenderResult<Vec<u32>> {
    // read_spv copies into aligned words, checks the length and fixes endianness
    let words = ash::util::read_spv(&mut Cursor::new(bytes)).resource("Invalid SPIR-V")?;

    match words.first() {
        Some(&SPIRV_MAGIC) => Ok(words),
        _ => Err(RenderError::ResourceBuild(
            "Invalid SPIR-V: bad magic number".into(),
        )),
    }
}

/// Read a compiled shader from disk
pub fn load_spirv(path: &Path) -> RenderResult<Vec<u32>> {
    let bytes = std::fs::read(path)
        .resource(&format!("Failed to read shader {}", path.display()))?;
    parse_spirv(&bytes).map_err(|e| match e {
        RenderError::ResourceBuild(reason) => {
            RenderError::ResourceBuild(format!("{}: {}", path.display(), reason))
        }
        other => other,
    })
}

/// Create a shader module from SPIR-V words
pub fn create_shader_module(device: &ash::Device, code: &[u32]) -> RenderResult<vk::ShaderModule> {
    let create_info = vk::ShaderModuleCreateInfo::default().code(code);

    unsafe { device.create_shader_module(&create_info, None) }
        .resource("Failed to create shader module")
}

#[cfg(test)]
mod tests {
    use super::*;

    fn module_bytes(words: &[u32]) -> Vec<u8> {
        words.iter().flat_map(|w| w.to_le_bytes()).collect()
    }

    #[test]
    fn accepts_spirv_words() {
        let bytes = module_bytes(&[SPIRV_MAGIC, 0x0001_0000, 0, 1, 0]);
        let words = parse_spirv(&bytes).unwrap();
        assert_eq!(words.len(), 5);
        assert_eq!(words[0], SPIRV_MAGIC);
    }

    #[test]
    fn rejects_truncated_module() {
        let mut bytes = module_bytes(&[SPIRV_MAGIC, 0x0001_0000]);
        bytes.pop();
        assert!(matches!(
            parse_spirv(&bytes),
            Err(RenderError::ResourceBuild(_))
        ));
    }

    #[test]
    fn rejects_wrong_magic() {
        let bytes = module_bytes(&[0xdead_beef, 0x0001_0000]);
        let err = parse_spirv(&bytes).unwrap_err();
        assert!(err.to_string().contains("magic"));
    }

    #[test]
    fn missing_file_is_a_resource_error() {
        let err = load_spirv(Path::new("no/such/shader.spv")).unwrap_err();
        assert!(matches!(err, RenderError::ResourceBuild(_)));
        assert!(err.to_string().contains("shader.spv"));
    }
}
