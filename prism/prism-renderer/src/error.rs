use thiserror::Error;

/// Errors raised by the renderer. RHI calls return `Result<_, String>`; those lift into
/// [`RenderError::Gpu`] through `?`.
#[derive(Debug, Error)]
pub enum RenderError {
    #[error("gpu: {0}")]
    Gpu(String),

    #[error("shader {name}: {message}")]
    Shader { name: String, message: String },

    #[error("missing resource: {0}")]
    MissingResource(String),

    #[error("frame resource {key} is not a {expected}")]
    ResourceType { key: String, expected: &'static str },

    #[error("{system}: render called for frame slot {slot} without a preceding update")]
    NotUpdated { system: &'static str, slot: usize },

    #[error("invalid frame buffer: {0}")]
    InvalidFrameBuffer(String),

    #[error("io: {0}")]
    Io(#[from] std::io::Error),

    #[error("serialize: {0}")]
    Serialize(#[from] serde_json::Error),

    #[error("cache entry {key}: {message}")]
    CacheDecode { key: String, message: String },
}

impl From<String> for RenderError {
    fn from(message: String) -> Self {
        RenderError::Gpu(message)
    }
}

pub type Result<T> = std::result::Result<T, RenderError>;

#[cfg(test)]
mod tests {
    use super::*;

    fn lift() -> Result<()> {
        Err("device lost".to_string())?;
        Ok(())
    }

    #[test]
    fn rhi_strings_lift_into_gpu_errors() {
        let err = lift().unwrap_err();
        assert!(matches!(err, RenderError::Gpu(ref m) if m == "device lost"));
        assert_eq!(err.to_string(), "gpu: device lost");
    }
}
