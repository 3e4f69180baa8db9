//! WGSL source templating.
//!
//! Templates carry two placeholders the runtime fills in: `{{workgroupSize}}`
//! and `{{precision}}`. Any other `{{...}}` token is left alone for the caller
//! to fill with [`substitute`] (matrix dimensions, tile sizes and the like).
//! No WGSL validation happens here; a bad template only fails when the
//! kernel's pipeline is compiled.

pub mod templates;


use crate::dtype::DType;
use crate::error::{ComputeError, ComputeResult};
use crate::shape::Shape;

pub const WORKGROUP_SIZE_TOKEN: &str = "{{workgroupSize}}";
pub const PRECISION_TOKEN: &str = "{{precision}}";

/// Workgroup used when only an x extent is given.
pub const DEFAULT_WORKGROUP_X: usize = 256;

/// Resolved shader source plus the workgroup shape and precision baked into it.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ShaderCode {
    source: String,
    workgroup_size: Shape,
    precision: DType,
}

impl ShaderCode {
    /// Resolves `template` for the given workgroup shape and precision.
    pub fn new(template: &str, workgroup_size: Shape, precision: DType) -> ComputeResult<Self> {
        let valid = workgroup_size
            .as_xyz()
            .is_some_and(|axes| axes.iter().all(|&n| n > 0));
        if !valid {
            return Err(ComputeError::InvalidWorkgroupShape {
                shape: workgroup_size.to_string(),
            });
        }

        let mut source = template.to_string();
        replace_all(&mut source, WORKGROUP_SIZE_TOKEN, &workgroup_size.to_string());
        replace_all(&mut source, PRECISION_TOKEN, precision.as_str());
        log::trace!("shader code:\n{}", source);

        Ok(Self {
            source,
            workgroup_size,
            precision,
        })
    }

    /// Same as `new` with a `{x, 1, 1}` workgroup.
    pub fn with_workgroup_x(template: &str, x: usize, precision: DType) -> ComputeResult<Self> {
        Self::new(template, Shape::xyz(x, 1, 1), precision)
    }

    pub fn source(&self) -> &str {
        &self.source
    }

    pub fn workgroup_size(&self) -> &Shape {
        &self.workgroup_size
    }

    pub fn precision(&self) -> DType {
        self.precision
    }
}

/// Free-function spelling of [`ShaderCode::new`].
pub fn create_shader(
    template: &str,
    workgroup_size: Shape,
    precision: DType,
) -> ComputeResult<ShaderCode> {
    ShaderCode::new(template, workgroup_size, precision)
}

/// Replaces every non-overlapping occurrence of `from` with `to`.
///
/// Scanning resumes after each inserted replacement, so text coming from `to`
/// is never matched again even if it contains `from`.
pub fn replace_all(text: &mut String, from: &str, to: &str) {
    if from.is_empty() {
        return;
    }
    let mut start = 0;
    while let Some(found) = text[start..].find(from) {
        let at = start + found;
        text.replace_range(at..at + from.len(), to);
        start = at + to.len();
    }
}

/// Caller-level substitution of extra template tokens, applied in order.
pub fn substitute(template: &str, replacements: &[(&str, &str)]) -> String {
    let mut out = template.to_string();
    for (token, value) in replacements {
        replace_all(&mut out, token, value);
    }
    out
}
