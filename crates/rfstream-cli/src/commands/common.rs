//! Helpers shared by the CLI commands.

use std::path::Path;
use std::sync::Arc;

use anyhow::Context;
use rfstream_config::EngineConfig;
use rfstream_core::{
    Array, ArrayLayout, BufferElement, DType, ExecutionEngine, Processing, RingBuffer,
};

/// Loads and validates a configuration file.
pub fn load_config(path: &Path) -> anyhow::Result<EngineConfig> {
    let config = EngineConfig::load(path)?;
    config
        .validate()
        .with_context(|| format!("invalid configuration '{}'", path.display()))?;
    Ok(config)
}

/// Builds the engine described by `config` and the producer ring feeding it.
pub fn build_engine(config: &EngineConfig) -> anyhow::Result<(ExecutionEngine, Arc<RingBuffer>)> {
    let processing = Processing::new(config.build_graph()?)
        .with_input_buffer(config.input_buffer.into())
        .with_output_buffer(config.output_buffer.into())
        .with_device(config.device.properties());
    let host = Arc::new(config.host_ring()?);
    let engine = ExecutionEngine::new(processing, &config.descriptors(), Arc::clone(&host))?;
    Ok((engine, host))
}

/// Fills every array of `element` with a ramp offset by `frame`.
pub fn write_synthetic_frame(element: &BufferElement, frame: usize) -> anyhow::Result<()> {
    for (index, layout) in element.layouts().iter().enumerate() {
        let array = ramp(layout, frame)?;
        element.write_array(index, array.bytes())?;
    }
    Ok(())
}

fn ramp(layout: &ArrayLayout, frame: usize) -> anyhow::Result<Array> {
    let shape = layout.shape().to_vec();
    let n = layout.len();
    let array = match layout.dtype() {
        DType::F32 => {
            let data: Vec<f32> = (0..n).map(|i| ((i + frame) % 100) as f32).collect();
            Array::from_slice(shape, DType::F32, &data)?
        }
        DType::I16 => {
            let data: Vec<i16> = (0..n).map(|i| ((i + frame) % 2048) as i16 - 1024).collect();
            Array::from_slice(shape, DType::I16, &data)?
        }
        _ => Array::zeros(layout.clone()),
    };
    Ok(array)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn ramp_is_offset_by_frame() {
        let layout = ArrayLayout::new([4], DType::F32);
        let array = ramp(&layout, 98).unwrap();
        assert_eq!(array.to_vec::<f32>().unwrap(), vec![98.0, 99.0, 0.0, 1.0]);
    }

    #[test]
    fn unsupported_dtypes_are_zeroed() {
        let layout = ArrayLayout::new([2], DType::Complex64);
        let array = ramp(&layout, 3).unwrap();
        assert!(array.bytes().iter().all(|&b| b == 0));
        assert_eq!(array.bytes().len(), 16);
    }

    #[test]
    fn load_config_rejects_invalid_file() {
        let dir = tempfile::TempDir::new().unwrap();
        let path = dir.path().join("empty.toml");
        std::fs::write(&path, "frames = 3\n").unwrap();

        let err = load_config(&path).unwrap_err();
        assert!(err.to_string().contains("invalid configuration"));
    }
}
