//! WGSL validation and uniform reflection using the naga library.

use std::collections::BTreeMap;

use crate::blur::shaders::ShaderProgram;
use crate::host::CompileError;

/// Parse and validate one WGSL module.
pub fn validate_wgsl(label: &str, source: &str) -> Result<naga::Module, CompileError> {
    let module = naga::front::wgsl::parse_str(source).map_err(|e| CompileError::Parse {
        label: label.to_string(),
        message: format_naga_error(source, &e),
    })?;

    naga::valid::Validator::new(
        naga::valid::ValidationFlags::all(),
        naga::valid::Capabilities::all(),
    )
    .validate(&module)
    .map_err(|e| CompileError::Validation {
        label: label.to_string(),
        message: format!("{e:?}"),
    })?;

    Ok(module)
}

/// Validate both stages of a program and return the fragment module, which
/// carries every uniform the program reads.
pub fn validate_program(program: &ShaderProgram) -> Result<naga::Module, CompileError> {
    validate_wgsl(&format!("{} (vertex)", program.label), &program.vertex)?;
    validate_wgsl(&format!("{} (fragment)", program.label), &program.fragment)
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum UniformFieldKind {
    Float,
    Int,
    Vec2,
    /// `array<vec4f, N>` addressed as a flat float array of `4 * N` entries.
    PackedFloatArray { vec4_count: u32, stride: u32 },
}

impl UniformFieldKind {
    /// Number of scalar slots the field holds.
    pub fn capacity(&self) -> usize {
        match self {
            UniformFieldKind::Float | UniformFieldKind::Int => 1,
            UniformFieldKind::Vec2 => 2,
            UniformFieldKind::PackedFloatArray { vec4_count, .. } => *vec4_count as usize * 4,
        }
    }
}

#[derive(Clone, Debug, PartialEq, Eq)]
pub struct UniformField {
    pub name: String,
    pub block: usize,
    pub offset: u32,
    pub kind: UniformFieldKind,
}

#[derive(Clone, Debug, PartialEq, Eq)]
pub struct UniformBlockLayout {
    pub variable: String,
    pub group: u32,
    pub binding: u32,
    pub size: u32,
}

/// Every uniform member the program declares, keyed by member name.
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct UniformLayout {
    pub blocks: Vec<UniformBlockLayout>,
    pub fields: Vec<UniformField>,
    by_name: BTreeMap<String, usize>,
}

impl UniformLayout {
    pub fn field(&self, name: &str) -> Option<(usize, &UniformField)> {
        let index = *self.by_name.get(name)?;
        Some((index, &self.fields[index]))
    }

    pub fn field_at(&self, index: usize) -> Option<&UniformField> {
        self.fields.get(index)
    }

    pub fn names(&self) -> impl Iterator<Item = &str> {
        self.fields.iter().map(|f| f.name.as_str())
    }
}

/// Reflect the members of every `var<uniform>` struct in `module`.
///
/// Members of a type the blur programs never use are left out, so looking
/// them up behaves like an inactive uniform.
pub fn reflect_uniforms(module: &naga::Module) -> UniformLayout {
    let mut layout = UniformLayout::default();

    for (_, var) in module.global_variables.iter() {
        if var.space != naga::AddressSpace::Uniform {
            continue;
        }
        let naga::TypeInner::Struct { members, span } = &module.types[var.ty].inner else {
            continue;
        };
        let block = layout.blocks.len();
        layout.blocks.push(UniformBlockLayout {
            variable: var.name.clone().unwrap_or_default(),
            group: var.binding.as_ref().map(|b| b.group).unwrap_or(0),
            binding: var.binding.as_ref().map(|b| b.binding).unwrap_or(0),
            size: *span,
        });

        for member in members {
            let Some(name) = member.name.clone() else {
                continue;
            };
            let Some(kind) = field_kind(module, member.ty) else {
                continue;
            };
            layout.by_name.insert(name.clone(), layout.fields.len());
            layout.fields.push(UniformField {
                name,
                block,
                offset: member.offset,
                kind,
            });
        }
    }

    layout
}

fn field_kind(module: &naga::Module, ty: naga::Handle<naga::Type>) -> Option<UniformFieldKind> {
    match &module.types[ty].inner {
        naga::TypeInner::Scalar(naga::Scalar { kind, .. }) => match kind {
            naga::ScalarKind::Float => Some(UniformFieldKind::Float),
            naga::ScalarKind::Sint => Some(UniformFieldKind::Int),
            _ => None,
        },
        naga::TypeInner::Vector { size, scalar } => {
            (*size as usize == 2 && scalar.kind == naga::ScalarKind::Float)
                .then_some(UniformFieldKind::Vec2)
        }
        naga::TypeInner::Array {
            base,
            size: naga::ArraySize::Constant(count),
            stride,
        } => match &module.types[*base].inner {
            naga::TypeInner::Vector { size, scalar }
                if *size as usize == 4 && scalar.kind == naga::ScalarKind::Float =>
            {
                Some(UniformFieldKind::PackedFloatArray {
                    vec4_count: count.get(),
                    stride: *stride,
                })
            }
            _ => None,
        },
        _ => None,
    }
}

/// Format a naga parse error with the numbered source for easier debugging.
fn format_naga_error(source: &str, error: &naga::front::wgsl::ParseError) -> String {
    let mut output = String::new();

    output.push_str(&format!("  {}\n", error));
    output.push_str("\nGenerated WGSL:\n");
    output.push_str("---\n");
    for (line_num, line) in source.lines().enumerate() {
        output.push_str(&format!("{:4} | {}\n", line_num + 1, line));
    }
    output.push_str("---\n");

    output
}
