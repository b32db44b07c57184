use std::str::FromStr;

use anyhow::{Context, Result};
use jdescriptor::{MethodDescriptor, TypeDescriptor};

/// Decoded JVM field type.
#[derive(Clone, Debug, Eq, PartialEq)]
pub(crate) enum FieldType {
    Primitive,
    Object(String),
    Array,
}

/// Decode a JVM field descriptor such as `I`, `Lcom/x/Color;` or `[J`.
pub(crate) fn field_type(descriptor: &str) -> Result<FieldType> {
    let descriptor = TypeDescriptor::from_str(descriptor).context("parse field descriptor")?;
    let field_type = match descriptor {
        TypeDescriptor::Object(name) => FieldType::Object(name.replace('.', "/")),
        TypeDescriptor::Array(_, _) => FieldType::Array,
        TypeDescriptor::Void => anyhow::bail!("void is not a field type"),
        _ => FieldType::Primitive,
    };
    Ok(field_type)
}

/// Class named by an object field descriptor, if any.
///
/// Single-character descriptors are primitives and are rejected without
/// decoding. Arrays and malformed descriptors yield `None`.
pub(crate) fn object_class_name(descriptor: &str) -> Option<String> {
    if descriptor.len() <= 1 {
        return None;
    }
    match field_type(descriptor).ok()? {
        FieldType::Object(name) => Some(name),
        _ => None,
    }
}

/// Count parameters in a JVM method descriptor.
pub(crate) fn method_param_count(descriptor: &str) -> Result<usize> {
    let descriptor =
        MethodDescriptor::from_str(descriptor).context("parse method descriptor")?;
    Ok(descriptor.parameter_types().len())
}

/// Return kind of a JVM method descriptor.
#[derive(Copy, Clone, Debug, Eq, PartialEq)]
pub(crate) enum ReturnKind {
    Void,
    Primitive,
    Reference,
}

/// Determine the return kind from a JVM method descriptor.
pub(crate) fn method_return_kind(descriptor: &str) -> Result<ReturnKind> {
    let descriptor =
        MethodDescriptor::from_str(descriptor).context("parse method descriptor")?;
    let kind = match descriptor.return_type() {
        TypeDescriptor::Void => ReturnKind::Void,
        TypeDescriptor::Object(_) | TypeDescriptor::Array(_, _) => ReturnKind::Reference,
        _ => ReturnKind::Primitive,
    };
    Ok(kind)
}
