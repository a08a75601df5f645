//! Uniform reflection over WGSL source.
//!
//! Programs look their uniforms up by name exactly once, when they are built:
//! [`Reflection::from_wgsl`] finds every `var<uniform>` declaration, lays out
//! the struct it refers to with the WGSL alignment rules, and produces a
//! name → [`UniformSlot`] map. Per-frame code writes through the resolved
//! slots into a [`UniformData`] staging block and never touches a string.

use std::collections::HashMap;

use glam::{Mat4, Vec3, Vec4};
use thiserror::Error;

#[derive(Error, Debug, PartialEq)]
pub enum ReflectError {
    #[error("struct `{0}` is not declared")]
    MissingStruct(String),

    #[error("field `{field}` of `{structure}` has unsupported type `{ty}`")]
    UnsupportedType {
        structure: String,
        field: String,
        ty: String,
    },

    #[error("malformed declaration: {0}")]
    Malformed(String),

    #[error("uniform `{0}` is not declared")]
    MissingUniform(String),

    #[error("uniform `{name}` is declared in both group {first} and group {second}")]
    DuplicateUniform { name: String, first: u32, second: u32 },

    #[error("uniform `{name}` is declared as {found:?}, expected {expected:?}")]
    TypeMismatch {
        name: String,
        expected: UniformType,
        found: UniformType,
    },
}

/// The WGSL types a uniform struct member may have.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub enum UniformType {
    F32,
    U32,
    I32,
    Vec2,
    Vec3,
    Vec4,
    Mat4,
}

impl UniformType {
    pub fn parse(ty: &str) -> Option<Self> {
        let ty: String = ty.chars().filter(|c| !c.is_whitespace()).collect();
        match ty.as_str() {
            "f32" => Some(Self::F32),
            "u32" => Some(Self::U32),
            "i32" => Some(Self::I32),
            "vec2f" | "vec2<f32>" => Some(Self::Vec2),
            "vec3f" | "vec3<f32>" => Some(Self::Vec3),
            "vec4f" | "vec4<f32>" => Some(Self::Vec4),
            "mat4x4f" | "mat4x4<f32>" => Some(Self::Mat4),
            _ => None,
        }
    }

    pub fn align(self) -> u32 {
        match self {
            Self::F32 | Self::U32 | Self::I32 => 4,
            Self::Vec2 => 8,
            Self::Vec3 | Self::Vec4 | Self::Mat4 => 16,
        }
    }

    pub fn size(self) -> u32 {
        match self {
            Self::F32 | Self::U32 | Self::I32 => 4,
            Self::Vec2 => 8,
            Self::Vec3 => 12,
            Self::Vec4 => 16,
            Self::Mat4 => 64,
        }
    }
}

/// Where one uniform lives: bind group, binding, byte offset and type.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct UniformSlot {
    pub group: u32,
    pub binding: u32,
    pub offset: u32,
    pub ty: UniformType,
}

/// A `var<uniform>` declaration and the layout of its struct.
#[derive(Clone, Debug, PartialEq)]
pub struct UniformBlock {
    pub name: String,
    pub struct_name: String,
    pub group: u32,
    pub binding: u32,
    /// Struct size in bytes, rounded up to the struct's alignment.
    pub size: u32,
}

/// Every uniform block of a shader module and every member slot by name.
#[derive(Clone, Debug, Default)]
pub struct Reflection {
    blocks: Vec<UniformBlock>,
    slots: HashMap<String, UniformSlot>,
}

impl Reflection {
    pub fn from_wgsl(source: &str) -> Result<Self, ReflectError> {
        let source = strip_comments(source);
        let mut reflection = Reflection::default();

        for decl in uniform_declarations(&source)? {
            let fields = struct_fields(&source, &decl.struct_name)?;
            let mut offset = 0u32;
            let mut align = 1u32;
            for (field, ty) in fields {
                offset = round_up(offset, ty.align());
                align = align.max(ty.align());
                let slot = UniformSlot {
                    group: decl.group,
                    binding: decl.binding,
                    offset,
                    ty,
                };
                // slots are looked up by bare member name, so names must be unique
                if let Some(previous) = reflection.slots.insert(field.clone(), slot) {
                    return Err(ReflectError::DuplicateUniform {
                        name: field,
                        first: previous.group,
                        second: decl.group,
                    });
                }
                offset += ty.size();
            }
            reflection.blocks.push(UniformBlock {
                size: round_up(offset, align),
                ..decl
            });
        }

        Ok(reflection)
    }

    pub fn blocks(&self) -> &[UniformBlock] {
        &self.blocks
    }

    pub fn block(&self, group: u32) -> Option<&UniformBlock> {
        self.blocks.iter().find(|b| b.group == group)
    }

    pub fn slot(&self, name: &str) -> Option<UniformSlot> {
        self.slots.get(name).copied()
    }

    /// Looks up `name` and checks it has type `ty`.
    pub fn require(&self, name: &str, ty: UniformType) -> Result<UniformSlot, ReflectError> {
        let slot = self
            .slot(name)
            .ok_or_else(|| ReflectError::MissingUniform(name.to_string()))?;
        if slot.ty != ty {
            return Err(ReflectError::TypeMismatch {
                name: name.to_string(),
                expected: ty,
                found: slot.ty,
            });
        }
        Ok(slot)
    }
}

/// CPU staging copy of one uniform block.
#[derive(Clone, Debug)]
pub struct UniformData {
    bytes: Vec<u8>,
}

impl UniformData {
    pub fn new(size: u32) -> Self {
        Self {
            bytes: vec![0; size as usize],
        }
    }

    pub fn set_f32(&mut self, slot: UniformSlot, value: f32) {
        debug_assert_eq!(slot.ty, UniformType::F32);
        self.put(slot, bytemuck::bytes_of(&value));
    }

    pub fn set_u32(&mut self, slot: UniformSlot, value: u32) {
        debug_assert_eq!(slot.ty, UniformType::U32);
        self.put(slot, bytemuck::bytes_of(&value));
    }

    pub fn set_vec3(&mut self, slot: UniformSlot, value: Vec3) {
        debug_assert_eq!(slot.ty, UniformType::Vec3);
        self.put(slot, bytemuck::cast_slice(&value.to_array()));
    }

    pub fn set_vec4(&mut self, slot: UniformSlot, value: Vec4) {
        debug_assert_eq!(slot.ty, UniformType::Vec4);
        self.put(slot, bytemuck::cast_slice(&value.to_array()));
    }

    pub fn set_mat4(&mut self, slot: UniformSlot, value: Mat4) {
        debug_assert_eq!(slot.ty, UniformType::Mat4);
        self.put(slot, bytemuck::cast_slice(&value.to_cols_array()));
    }

    pub fn as_bytes(&self) -> &[u8] {
        &self.bytes
    }

    fn put(&mut self, slot: UniformSlot, data: &[u8]) {
        let start = slot.offset as usize;
        self.bytes[start..start + data.len()].copy_from_slice(data);
    }
}

pub(crate) fn round_up(value: u32, align: u32) -> u32 {
    value.div_ceil(align) * align
}

fn strip_comments(source: &str) -> String {
    source
        .lines()
        .map(|line| line.split("//").next().unwrap_or(""))
        .collect::<Vec<_>>()
        .join("\n")
}

/// Parses `@group(G) @binding(B) var<uniform> name: Struct;` declarations.
fn uniform_declarations(source: &str) -> Result<Vec<UniformBlock>, ReflectError> {
    const MARKER: &str = "var<uniform>";
    let mut blocks = Vec::new();
    let mut cursor = 0;

    while let Some(found) = source[cursor..].find(MARKER) {
        let at = cursor + found;
        let start = source[..at].rfind([';', '}']).map_or(0, |i| i + 1);
        let attributes = &source[start..at];
        let end = source[at..]
            .find(';')
            .map(|i| at + i)
            .ok_or_else(|| ReflectError::Malformed(source[at..].trim().to_string()))?;
        let decl = &source[at + MARKER.len()..end];

        let (name, struct_name) = decl
            .split_once(':')
            .map(|(n, t)| (n.trim().to_string(), t.trim().to_string()))
            .ok_or_else(|| ReflectError::Malformed(decl.trim().to_string()))?;
        let group = attribute(attributes, "@group")
            .ok_or_else(|| ReflectError::Malformed(format!("`{}` has no @group", name)))?;
        let binding = attribute(attributes, "@binding")
            .ok_or_else(|| ReflectError::Malformed(format!("`{}` has no @binding", name)))?;

        blocks.push(UniformBlock {
            name,
            struct_name,
            group,
            binding,
            size: 0,
        });
        cursor = end;
    }

    Ok(blocks)
}

fn attribute(text: &str, name: &str) -> Option<u32> {
    let at = text.find(name)? + name.len();
    let rest = text[at..].trim_start().strip_prefix('(')?;
    let close = rest.find(')')?;
    rest[..close].trim().parse().ok()
}

fn struct_fields(source: &str, name: &str) -> Result<Vec<(String, UniformType)>, ReflectError> {
    let body = struct_body(source, name).ok_or_else(|| ReflectError::MissingStruct(name.into()))?;

    body.split(',')
        .map(str::trim)
        .filter(|f| !f.is_empty())
        .map(|field| {
            if field.starts_with('@') {
                return Err(ReflectError::Malformed(format!(
                    "explicit layout attribute on `{}` in `{}`",
                    field, name
                )));
            }
            let (field_name, ty) = field
                .split_once(':')
                .ok_or_else(|| ReflectError::Malformed(field.to_string()))?;
            let field_name = field_name.trim().to_string();
            let ty = UniformType::parse(ty).ok_or_else(|| ReflectError::UnsupportedType {
                structure: name.to_string(),
                field: field_name.clone(),
                ty: ty.trim().to_string(),
            })?;
            Ok((field_name, ty))
        })
        .collect()
}

fn struct_body<'a>(source: &'a str, name: &str) -> Option<&'a str> {
    let mut cursor = 0;
    while let Some(found) = source[cursor..].find("struct") {
        let at = cursor + found + "struct".len();
        cursor = at;
        let rest = source[at..].trim_start();
        let ident_len = rest
            .find(|c: char| !(c.is_alphanumeric() || c == '_'))
            .unwrap_or(rest.len());
        if &rest[..ident_len] != name {
            continue;
        }
        let open = rest.find('{')?;
        let close = rest[open..].find('}')?;
        return Some(&rest[open + 1..open + close]);
    }
    None
}
