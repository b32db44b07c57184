use std::collections::{BTreeSet, VecDeque};
use std::fs;
use std::io::Read;
use std::path::{Path, PathBuf};

use anyhow::{Context, Result};
use jclassfile::class_file;
use jclassfile::constant_pool::ConstantPool;
use opentelemetry::KeyValue;
use serde_json::Value;
use serde_sarif::sarif::{Artifact, ArtifactLocation, ArtifactRoles};
use tracing::debug;
use zip::ZipArchive;

use crate::ir::{
    CallKind, CallSite, Class, ClassAccess, Field, FieldAccess, FieldAccessKind, FieldRef,
    Instruction, InstructionKind, LineNumber, Method, MethodAccess,
};
use crate::opcodes;
use crate::telemetry::{Telemetry, with_span};

/// Snapshot of parsed artifacts, classes, and counts for a scan.
pub(crate) struct ScanOutput {
    pub(crate) artifacts: Vec<Artifact>,
    pub(crate) class_count: usize,
    pub(crate) classes: Vec<Class>,
}

/// Collects parsed classes, keeping the first definition of each name.
#[derive(Default)]
struct Crawl {
    artifacts: Vec<Artifact>,
    class_count: usize,
    classes: Vec<Class>,
    names: BTreeSet<String>,
}

impl Crawl {
    fn push_class(&mut self, class: Class, origin: &str) {
        self.class_count += 1;
        if !self.names.insert(class.name.clone()) {
            debug!(class = %class.name, origin, "class shadowed by earlier definition; skipping");
            return;
        }
        self.classes.push(class);
    }
}

/// Parse every class reachable from `input` and `classpath`.
///
/// Classes are delivered in a deterministic order with unique names; the
/// first definition on the path wins, as on the JVM class path.
pub(crate) fn scan_inputs(
    input: &Path,
    classpath: &[PathBuf],
    telemetry: Option<&Telemetry>,
) -> Result<ScanOutput> {
    let mut crawl = Crawl::default();

    scan_path(input, true, true, telemetry, &mut crawl)?;

    // Keep deterministic ordering by sorting classpath entries and directory listings.
    let mut classpath_entries = classpath.to_vec();
    classpath_entries.sort_by(|a, b| path_key(a).cmp(&path_key(b)));

    if is_jar_path(input) {
        classpath_entries.extend(manifest_classpath(input)?);
    }

    let expanded = expand_classpath(classpath_entries)?;
    for entry in expanded {
        if entry == input {
            continue;
        }
        scan_path(&entry, false, true, telemetry, &mut crawl)?;
    }

    Ok(ScanOutput {
        artifacts: crawl.artifacts,
        class_count: crawl.class_count,
        classes: crawl.classes,
    })
}

fn scan_path(
    path: &Path,
    is_input: bool,
    strict: bool,
    telemetry: Option<&Telemetry>,
    crawl: &mut Crawl,
) -> Result<()> {
    if path.is_dir() {
        return scan_dir(path, telemetry, crawl);
    }

    let extension = path.extension().and_then(|ext| ext.to_str()).unwrap_or("");
    let roles = if is_input {
        Some(vec![
            serde_json::to_value(ArtifactRoles::AnalysisTarget)
                .context("serialize artifact role")?,
        ])
    } else {
        None
    };

    match extension {
        "class" => scan_class_file(path, roles, telemetry, crawl),
        "jar" => scan_jar_file(path, roles, telemetry, crawl),
        _ => {
            if strict {
                anyhow::bail!("unsupported input file: {}", path.display())
            } else {
                Ok(())
            }
        }
    }
}

fn scan_dir(path: &Path, telemetry: Option<&Telemetry>, crawl: &mut Crawl) -> Result<()> {
    let mut entries = Vec::new();
    for entry in fs::read_dir(path)
        .with_context(|| format!("failed to read directory {}", path.display()))?
    {
        let entry =
            entry.with_context(|| format!("failed to read entry under {}", path.display()))?;
        entries.push(entry.path());
    }

    entries.sort_by(|a, b| path_key(a).cmp(&path_key(b)));

    for entry in entries {
        if entry.is_dir() {
            scan_dir(&entry, telemetry, crawl)?;
        } else {
            scan_path(&entry, false, false, telemetry, crawl)?;
        }
    }

    Ok(())
}

fn scan_class_file(
    path: &Path,
    roles: Option<Vec<Value>>,
    telemetry: Option<&Telemetry>,
    crawl: &mut Crawl,
) -> Result<()> {
    let span_attributes = [KeyValue::new(
        "perfguide.class_path",
        path.display().to_string(),
    )];
    let (data, class) = with_span(
        telemetry,
        "class.scan",
        &span_attributes,
        || -> Result<(Vec<u8>, Class)> {
            let data = fs::read(path).with_context(|| format!("failed to read {}", path.display()))?;
            let class = parse_class_bytes(&data)
                .with_context(|| format!("failed to parse {}", path.display()))?;
            Ok((data, class))
        },
    )?;

    if roles.is_some() {
        push_path_artifact(path, roles, data.len() as u64, &mut crawl.artifacts);
    }
    crawl.push_class(class, &path.display().to_string());
    Ok(())
}

fn scan_jar_file(
    path: &Path,
    roles: Option<Vec<Value>>,
    telemetry: Option<&Telemetry>,
    crawl: &mut Crawl,
) -> Result<()> {
    let jar_span_attributes = [KeyValue::new(
        "perfguide.jar_path",
        path.display().to_string(),
    )];
    let mut archive = with_span(
        telemetry,
        "jar.scan",
        &jar_span_attributes,
        || -> Result<ZipArchive<fs::File>> {
            let file =
                fs::File::open(path).with_context(|| format!("failed to open {}", path.display()))?;
            ZipArchive::new(file).with_context(|| format!("failed to read {}", path.display()))
        },
    )?;

    let jar_len = fs::metadata(path)
        .with_context(|| format!("failed to read {}", path.display()))?
        .len();
    push_path_artifact(path, roles, jar_len, &mut crawl.artifacts);

    let mut entry_names = Vec::new();
    for index in 0..archive.len() {
        let entry = archive
            .by_index(index)
            .with_context(|| format!("failed to read {}", path.display()))?;
        if entry.is_dir() {
            continue;
        }
        let name = entry.name().to_string();
        if name.ends_with(".class")
            && !name.ends_with("module-info.class")
            && !name.starts_with("META-INF/versions/")
        {
            entry_names.push(name);
        }
    }

    entry_names.sort();

    for name in entry_names {
        let class_span_attributes = [
            KeyValue::new("perfguide.jar_path", path.display().to_string()),
            KeyValue::new("perfguide.jar_entry", name.clone()),
        ];
        let class = with_span(
            telemetry,
            "class.scan",
            &class_span_attributes,
            || -> Result<Class> {
                let mut entry = archive
                    .by_name(&name)
                    .with_context(|| format!("failed to read {}:{}", path.display(), name))?;
                let mut data = Vec::new();
                entry
                    .read_to_end(&mut data)
                    .with_context(|| format!("failed to read {}:{}", path.display(), name))?;
                parse_class_bytes(&data)
                    .with_context(|| format!("failed to parse {}:{}", path.display(), name))
            },
        )?;
        crawl.push_class(class, &format!("{}:{}", path.display(), name));
    }

    Ok(())
}

fn push_path_artifact(path: &Path, roles: Option<Vec<Value>>, len: u64, artifacts: &mut Vec<Artifact>) {
    let location = ArtifactLocation::builder().uri(path_to_uri(path)).build();
    let artifact = match roles {
        Some(roles) => Artifact::builder()
            .location(location)
            .length(len as i64)
            .roles(roles)
            .build(),
        None => Artifact::builder()
            .location(location)
            .length(len as i64)
            .build(),
    };
    artifacts.push(artifact);
}

fn path_to_uri(path: &Path) -> String {
    let absolute = if path.is_absolute() {
        path.to_path_buf()
    } else {
        std::env::current_dir()
            .unwrap_or_else(|_| PathBuf::from("."))
            .join(path)
    };
    format!("file://{}", absolute.to_string_lossy())
}

fn path_key(path: &Path) -> String {
    path.to_string_lossy().to_string()
}

fn expand_classpath(initial: Vec<PathBuf>) -> Result<Vec<PathBuf>> {
    let mut initial_sorted = initial;
    initial_sorted.sort_by(|a, b| path_key(a).cmp(&path_key(b)));
    let mut queue: VecDeque<PathBuf> = initial_sorted.into_iter().collect();

    let mut seen = BTreeSet::new();
    let mut result = Vec::new();
    while let Some(entry) = queue.pop_front() {
        let key = path_key(&entry);
        if !seen.insert(key) {
            continue;
        }
        if !entry.exists() {
            anyhow::bail!("classpath entry not found: {}", entry.display());
        }
        result.push(entry.clone());
        if is_jar_path(&entry) {
            let mut referenced = manifest_classpath(&entry)?;
            referenced.sort_by(|a, b| path_key(a).cmp(&path_key(b)));
            queue.extend(referenced);
        }
    }

    Ok(result)
}

fn manifest_classpath(path: &Path) -> Result<Vec<PathBuf>> {
    let file =
        fs::File::open(path).with_context(|| format!("failed to open {}", path.display()))?;
    let mut archive =
        ZipArchive::new(file).with_context(|| format!("failed to read {}", path.display()))?;
    let Ok(mut entry) = archive.by_name("META-INF/MANIFEST.MF") else {
        return Ok(Vec::new());
    };
    let mut content = String::new();
    entry
        .read_to_string(&mut content)
        .with_context(|| format!("failed to read manifest of {}", path.display()))?;
    Ok(parse_manifest_classpath(path, &content))
}

fn parse_manifest_classpath(jar_path: &Path, content: &str) -> Vec<PathBuf> {
    let mut class_path = None;
    let mut current_key: Option<String> = None;
    let mut current_value = String::new();

    for raw_line in content.lines() {
        let line = raw_line.trim_end_matches('\r');
        // Continuation lines start with a single space.
        if let Some(continued) = line.strip_prefix(' ') {
            if current_key.is_some() {
                current_value.push_str(continued);
            }
            continue;
        }

        if let Some(key) = current_key.take() {
            if key == "Class-Path" {
                class_path = Some(current_value.clone());
            }
            current_value.clear();
        }

        if let Some((key, value)) = line.split_once(':') {
            current_key = Some(key.trim().to_string());
            current_value.push_str(value.trim_start());
        }
    }

    if current_key.as_deref() == Some("Class-Path") {
        class_path = Some(current_value);
    }

    let Some(class_path) = class_path else {
        return Vec::new();
    };

    let base_dir = jar_path.parent().unwrap_or_else(|| Path::new(""));
    class_path
        .split_whitespace()
        .map(|entry| {
            let entry_path = PathBuf::from(entry);
            if entry_path.is_absolute() {
                entry_path
            } else {
                base_dir.join(entry_path)
            }
        })
        .collect()
}

fn is_jar_path(path: &Path) -> bool {
    path.extension()
        .and_then(|ext| ext.to_str())
        .map(|ext| ext.eq_ignore_ascii_case("jar"))
        .unwrap_or(false)
}

fn parse_class_bytes(data: &[u8]) -> Result<Class> {
    let class_file = class_file::parse(data).context("failed to parse class file bytes")?;
    let constant_pool = class_file.constant_pool();
    let name =
        resolve_class_name(constant_pool, class_file.this_class()).context("resolve class name")?;
    let super_name = if class_file.super_class() == 0 {
        None
    } else {
        Some(
            resolve_class_name(constant_pool, class_file.super_class())
                .context("resolve super class name")?,
        )
    };
    let mut interfaces = Vec::new();
    for interface in class_file.interfaces() {
        interfaces
            .push(resolve_class_name(constant_pool, *interface).context("resolve interface name")?);
    }

    let access = ClassAccess::from_bits(class_file.access_flags().bits());
    let fields = parse_fields(constant_pool, class_file.fields()).context("parse fields")?;
    let methods =
        parse_methods(constant_pool, class_file.methods()).context("parse method bytecode")?;

    Ok(Class {
        name,
        access,
        super_name,
        interfaces,
        fields,
        methods,
    })
}

fn resolve_class_name(constant_pool: &[ConstantPool], class_index: u16) -> Result<String> {
    let entry = constant_pool
        .get(class_index as usize)
        .context("missing class entry")?;
    match entry {
        ConstantPool::Class { name_index } => resolve_utf8(constant_pool, *name_index),
        _ => anyhow::bail!("unexpected class entry"),
    }
}

fn resolve_utf8(constant_pool: &[ConstantPool], index: u16) -> Result<String> {
    let entry = constant_pool
        .get(index as usize)
        .context("missing utf8 entry")?;
    match entry {
        ConstantPool::Utf8 { value } => Ok(value.clone()),
        _ => anyhow::bail!("unexpected utf8 entry"),
    }
}

fn parse_fields(
    constant_pool: &[ConstantPool],
    fields: &[jclassfile::fields::FieldInfo],
) -> Result<Vec<Field>> {
    let mut parsed = Vec::new();
    for field in fields {
        let name = resolve_utf8(constant_pool, field.name_index()).context("resolve field name")?;
        let descriptor = resolve_utf8(constant_pool, field.descriptor_index())
            .context("resolve field descriptor")?;
        parsed.push(Field {
            name,
            descriptor,
            access: FieldAccess::from_bits(field.access_flags().bits()),
        });
    }
    Ok(parsed)
}

fn parse_methods(
    constant_pool: &[ConstantPool],
    methods: &[jclassfile::methods::MethodInfo],
) -> Result<Vec<Method>> {
    let mut parsed = Vec::new();
    for method in methods {
        let name =
            resolve_utf8(constant_pool, method.name_index()).context("resolve method name")?;
        let descriptor = resolve_utf8(constant_pool, method.descriptor_index())
            .context("resolve method descriptor")?;
        let access = MethodAccess::from_bits(method.access_flags().bits());
        let code = method
            .attributes()
            .iter()
            .find_map(|attribute| match attribute {
                jclassfile::attributes::Attribute::Code {
                    code, attributes, ..
                } => Some((code, attributes)),
                _ => None,
            });
        // Abstract and native methods keep an empty body.
        let (instructions, line_numbers) = match code {
            Some((code, code_attributes)) => {
                let instructions = parse_bytecode(code, constant_pool)
                    .with_context(|| format!("parse bytecode of {name}{descriptor}"))?;
                (instructions, parse_line_numbers(code_attributes))
            }
            None => (Vec::new(), Vec::new()),
        };
        parsed.push(Method {
            name,
            descriptor,
            access,
            instructions,
            line_numbers,
        });
    }
    Ok(parsed)
}

fn parse_line_numbers(attributes: &[jclassfile::attributes::Attribute]) -> Vec<LineNumber> {
    let mut entries = Vec::new();
    for attribute in attributes {
        let jclassfile::attributes::Attribute::LineNumberTable { line_number_table } = attribute
        else {
            continue;
        };
        for record in line_number_table {
            entries.push(LineNumber {
                start_pc: record.start_pc() as u32,
                line: record.line_number() as u32,
            });
        }
    }
    entries.sort_by_key(|entry| entry.start_pc);
    entries
}

fn parse_bytecode(code: &[u8], constant_pool: &[ConstantPool]) -> Result<Vec<Instruction>> {
    let mut instructions = Vec::new();
    let mut offset = 0usize;
    while offset < code.len() {
        let opcode = code[offset];
        let length = opcode_length(code, offset)?;
        if length == 0 || offset + length > code.len() {
            anyhow::bail!("invalid bytecode length at offset {}", offset);
        }
        let kind = match opcode {
            opcodes::GETSTATIC | opcodes::PUTSTATIC | opcodes::GETFIELD | opcodes::PUTFIELD => {
                let index = read_u16(code, offset + 1)?;
                let member = resolve_member_ref(constant_pool, index).context("resolve field ref")?;
                let access_kind = match opcode {
                    opcodes::GETSTATIC => FieldAccessKind::GetStatic,
                    opcodes::PUTSTATIC => FieldAccessKind::PutStatic,
                    opcodes::GETFIELD => FieldAccessKind::GetField,
                    _ => FieldAccessKind::PutField,
                };
                InstructionKind::Field(FieldRef {
                    owner: member.owner,
                    name: member.name,
                    descriptor: member.descriptor,
                    kind: access_kind,
                })
            }
            opcodes::INVOKEVIRTUAL
            | opcodes::INVOKESPECIAL
            | opcodes::INVOKESTATIC
            | opcodes::INVOKEINTERFACE => {
                let index = read_u16(code, offset + 1)?;
                let member =
                    resolve_member_ref(constant_pool, index).context("resolve method ref")?;
                let call_kind = match opcode {
                    opcodes::INVOKEVIRTUAL => CallKind::Virtual,
                    opcodes::INVOKESPECIAL => CallKind::Special,
                    opcodes::INVOKESTATIC => CallKind::Static,
                    _ => CallKind::Interface,
                };
                InstructionKind::Invoke(CallSite {
                    owner: member.owner,
                    name: member.name,
                    descriptor: member.descriptor,
                    kind: call_kind,
                })
            }
            opcodes::ALOAD => {
                let index = code.get(offset + 1).copied().context("aload index")?;
                InstructionKind::LoadLocal(u16::from(index))
            }
            opcodes::ALOAD_0..=opcodes::ALOAD_3 => {
                InstructionKind::LoadLocal(u16::from(opcode - opcodes::ALOAD_0))
            }
            opcodes::WIDE if code.get(offset + 1) == Some(&opcodes::ALOAD) => {
                InstructionKind::LoadLocal(read_u16(code, offset + 2)?)
            }
            _ => InstructionKind::Other,
        };

        instructions.push(Instruction {
            offset: offset as u32,
            opcode,
            kind,
        });
        offset += length;
    }
    Ok(instructions)
}

/// Resolved constant pool field or method reference.
struct MemberRef {
    owner: String,
    name: String,
    descriptor: String,
}

fn resolve_member_ref(constant_pool: &[ConstantPool], index: u16) -> Result<MemberRef> {
    let entry = constant_pool
        .get(index as usize)
        .context("missing member ref entry")?;
    let (class_index, name_and_type_index) = match entry {
        ConstantPool::Fieldref {
            class_index,
            name_and_type_index,
        }
        | ConstantPool::Methodref {
            class_index,
            name_and_type_index,
        }
        | ConstantPool::InterfaceMethodref {
            class_index,
            name_and_type_index,
        } => (*class_index, *name_and_type_index),
        _ => anyhow::bail!("unexpected member ref entry"),
    };
    let owner = resolve_class_name(constant_pool, class_index).context("resolve owner")?;
    let (name_index, descriptor_index) = resolve_name_and_type(constant_pool, name_and_type_index)?;
    let name = resolve_utf8(constant_pool, name_index).context("resolve member name")?;
    let descriptor =
        resolve_utf8(constant_pool, descriptor_index).context("resolve member descriptor")?;
    Ok(MemberRef {
        owner,
        name,
        descriptor,
    })
}

fn resolve_name_and_type(constant_pool: &[ConstantPool], index: u16) -> Result<(u16, u16)> {
    let entry = constant_pool
        .get(index as usize)
        .context("missing name and type entry")?;
    match entry {
        ConstantPool::NameAndType {
            name_index,
            descriptor_index,
        } => Ok((*name_index, *descriptor_index)),
        _ => anyhow::bail!("unexpected name and type entry"),
    }
}

fn opcode_length(code: &[u8], offset: usize) -> Result<usize> {
    let opcode = code[offset];
    let length = match opcode {
        0x00..=0x0f => 1,
        0x10 => 2,
        0x11 => 3,
        opcodes::LDC => 2,
        opcodes::LDC_W | opcodes::LDC2_W => 3,
        0x15..=0x19 => 2,
        0x1a..=0x35 => 1,
        0x36..=0x3a => 2,
        0x3b..=0x83 => 1,
        0x84 => 3,
        0x85..=0x98 => 1,
        0x99..=0xa6 => 3,
        opcodes::GOTO | opcodes::JSR => 3,
        0xa9 => 2,
        opcodes::TABLESWITCH => tableswitch_length(code, offset)?,
        opcodes::LOOKUPSWITCH => lookupswitch_length(code, offset)?,
        0xac..=0xb1 => 1,
        0xb2..=0xb5 => 3,
        opcodes::INVOKEVIRTUAL | opcodes::INVOKESPECIAL | opcodes::INVOKESTATIC => 3,
        opcodes::INVOKEINTERFACE | opcodes::INVOKEDYNAMIC => 5,
        0xbb => 3,
        0xbc => 2,
        0xbd => 3,
        0xbe | 0xbf => 1,
        0xc0 | 0xc1 => 3,
        0xc2 | 0xc3 => 1,
        opcodes::WIDE => wide_length(code, offset)?,
        0xc5 => 4,
        0xc6 | 0xc7 => 3,
        opcodes::GOTO_W | opcodes::JSR_W => 5,
        0xca => 1,
        0xfe | 0xff => 1,
        _ => anyhow::bail!("unsupported opcode 0x{:02x}", opcode),
    };
    Ok(length)
}

fn tableswitch_length(code: &[u8], offset: usize) -> Result<usize> {
    let padding = padding(offset);
    let base = offset + 1 + padding;
    let low = read_i32(code, base + 4)?;
    let high = read_i32(code, base + 8)?;
    let count = high
        .checked_sub(low)
        .and_then(|v| v.checked_add(1))
        .context("invalid tableswitch range")?;
    if count < 0 {
        anyhow::bail!("invalid tableswitch range");
    }
    Ok(1 + padding + 12 + (count as usize) * 4)
}

fn lookupswitch_length(code: &[u8], offset: usize) -> Result<usize> {
    let padding = padding(offset);
    let base = offset + 1 + padding;
    let npairs = read_i32(code, base + 4)?;
    if npairs < 0 {
        anyhow::bail!("invalid lookupswitch pairs");
    }
    Ok(1 + padding + 8 + (npairs as usize) * 8)
}

fn wide_length(code: &[u8], offset: usize) -> Result<usize> {
    let opcode = code
        .get(offset + 1)
        .copied()
        .context("missing wide opcode")?;
    // wide iinc carries a two byte index and a two byte constant.
    if opcode == 0x84 { Ok(6) } else { Ok(4) }
}

fn padding(offset: usize) -> usize {
    (4 - ((offset + 1) % 4)) % 4
}

fn read_u16(code: &[u8], offset: usize) -> Result<u16> {
    let slice = code
        .get(offset..offset + 2)
        .context("bytecode u16 out of bounds")?;
    Ok(u16::from_be_bytes([slice[0], slice[1]]))
}

fn read_i32(code: &[u8], offset: usize) -> Result<i32> {
    let slice = code
        .get(offset..offset + 4)
        .context("bytecode i32 out of bounds")?;
    Ok(i32::from_be_bytes([slice[0], slice[1], slice[2], slice[3]]))
}
