use std::io::Cursor;
use std::path::Path;
use std::sync::Arc;
use ash::vk;
use color_eyre::eyre::WrapErr;
use color_eyre::Result;

/// Vertex and fragment modules loaded from precompiled SPIR-V
pub struct GraphicsShader {
    pub vert_mod: vk::ShaderModule,
    pub frag_mod: vk::ShaderModule,
    device: Arc<ash::Device>,
}

impl GraphicsShader {
    pub fn new(
        vertex_path: &Path,
        fragment_path: &Path,
        device: Arc<ash::Device>,
    ) -> Result<Self> {
        let vert_mod = create_shader_module(vertex_path, &device)?;
        let frag_mod = match create_shader_module(fragment_path, &device) {
            Ok(module) => module,
            Err(e) => {
                unsafe { device.destroy_shader_module(vert_mod, None) };
                return Err(e);
            }
        };
        Ok(Self { vert_mod, frag_mod, device })
    }
}

impl Drop for GraphicsShader {
    fn drop(&mut self) {
        unsafe {
            self.device.destroy_shader_module(self.vert_mod, None);
            self.device.destroy_shader_module(self.frag_mod, None);
        }
    }
}

/// Reads SPIR-V words from a file, fixing up endianness
pub fn read_spirv(filepath: &Path) -> Result<Vec<u32>> {
    let bytes = std::fs::read(filepath)
        .wrap_err_with(|| format!("Failed to read shader {:?}", filepath))?;
    ash::util::read_spv(&mut Cursor::new(bytes))
        .wrap_err_with(|| format!("Shader {:?} is not valid SPIR-V", filepath))
}

fn create_shader_module(filepath: &Path, device: &ash::Device) -> Result<vk::ShaderModule> {
    let code = read_spirv(filepath)?;

    let shader_module_info = vk::ShaderModuleCreateInfo::default()
        .code(&code);

    let shader_module = unsafe {
        device.create_shader_module(&shader_module_info, None)
            .wrap_err_with(|| format!("Failed to create shader module from {:?}", filepath))?
    };

    Ok(shader_module)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn temp_file(name: &str, bytes: &[u8]) -> std::path::PathBuf {
        let path = std::env::temp_dir().join(format!("tessera-{}-{}", std::process::id(), name));
        std::fs::write(&path, bytes).unwrap();
        path
    }

    #[test]
    fn test_reads_spirv_words() {
        let words = [0x0723_0203u32, 0x0001_0000, 0, 1, 0];
        let bytes = words.iter().flat_map(|w| w.to_le_bytes()).collect::<Vec<_>>();
        let path = temp_file("valid.spv", &bytes);
        assert_eq!(read_spirv(&path).unwrap(), words);
        std::fs::remove_file(path).unwrap();
    }

    #[test]
    fn test_rejects_truncated_spirv() {
        let path = temp_file("truncated.spv", &[0x03, 0x02, 0x23]);
        assert!(read_spirv(&path).is_err());
        std::fs::remove_file(path).unwrap();
    }

    #[test]
    fn test_missing_file_is_an_error() {
        let path = std::env::temp_dir().join("tessera-does-not-exist.spv");
        assert!(read_spirv(&path).is_err());
    }
}
