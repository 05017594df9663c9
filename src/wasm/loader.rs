//! WASM binary inspection
//!
//! A small section walker that checks the header and lists a module's
//! imports and exports without compiling it. The resolver uses it to reject
//! error pages and truncated downloads before handing bytes to the engine.

use super::error::{WasmError, WasmResult};

/// WASM magic number: \0asm
const WASM_MAGIC: [u8; 4] = [0x00, 0x61, 0x73, 0x6D];

/// WASM version 1
const WASM_VERSION: [u8; 4] = [0x01, 0x00, 0x00, 0x00];

const SECTION_IMPORT: u8 = 2;
const SECTION_EXPORT: u8 = 7;

/// External kind of an import or export
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ExternKind {
    Func,
    Table,
    Memory,
    Global,
    Tag,
}

impl ExternKind {
    fn from_byte(byte: u8) -> WasmResult<Self> {
        match byte {
            0 => Ok(Self::Func),
            1 => Ok(Self::Table),
            2 => Ok(Self::Memory),
            3 => Ok(Self::Global),
            4 => Ok(Self::Tag),
            other => Err(invalid(format!("unknown extern kind {}", other))),
        }
    }
}

/// One entry of the import section
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ImportInfo {
    pub module: String,
    pub name: String,
    pub kind: ExternKind,
}

/// What a module imports and exports
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ModuleInfo {
    pub imports: Vec<ImportInfo>,
    pub exports: Vec<(String, ExternKind)>,
}

impl ModuleInfo {
    /// Whether a function with this name is exported
    pub fn exports_func(&self, name: &str) -> bool {
        self.exports
            .iter()
            .any(|(n, kind)| n == name && *kind == ExternKind::Func)
    }

    /// Whether any import comes from the given namespace
    pub fn imports_from(&self, module: &str) -> bool {
        self.imports.iter().any(|i| i.module == module)
    }
}

fn invalid(reason: impl Into<String>) -> WasmError {
    WasmError::InvalidModule {
        reason: reason.into(),
    }
}

/// Validates module binaries before compilation
pub struct ModuleValidator;

impl ModuleValidator {
    /// Check the header only
    pub fn validate_header(bytes: &[u8]) -> WasmResult<()> {
        // Check minimum size (magic + version)
        if bytes.len() < 8 {
            return Err(invalid("module too small"));
        }

        if bytes[0..4] != WASM_MAGIC {
            return Err(invalid("invalid magic number"));
        }

        if bytes[4..8] != WASM_VERSION {
            return Err(invalid("unsupported WASM version"));
        }

        Ok(())
    }

    /// Validate the header and walk the sections collecting imports and exports
    pub fn inspect(bytes: &[u8]) -> WasmResult<ModuleInfo> {
        Self::validate_header(bytes)?;

        let mut info = ModuleInfo::default();
        let mut reader = Reader::new(&bytes[8..]);

        while !reader.is_empty() {
            let section_id = reader.byte()?;
            let size = reader.leb()? as usize;
            let section = reader.take(size).map_err(|_| {
                invalid("section extends past end of module")
            })?;

            match section_id {
                SECTION_IMPORT => info.imports = parse_imports(section)?,
                SECTION_EXPORT => info.exports = parse_exports(section)?,
                _ => {}
            }
        }

        Ok(info)
    }
}

/// Cursor over a byte slice
struct Reader<'a> {
    data: &'a [u8],
    offset: usize,
}

impl<'a> Reader<'a> {
    fn new(data: &'a [u8]) -> Self {
        Self { data, offset: 0 }
    }

    fn is_empty(&self) -> bool {
        self.offset >= self.data.len()
    }

    fn byte(&mut self) -> WasmResult<u8> {
        let byte = *self
            .data
            .get(self.offset)
            .ok_or_else(|| invalid("unexpected end of module"))?;
        self.offset += 1;
        Ok(byte)
    }

    fn take(&mut self, len: usize) -> WasmResult<&'a [u8]> {
        let end = self
            .offset
            .checked_add(len)
            .filter(|end| *end <= self.data.len())
            .ok_or_else(|| invalid("unexpected end of module"))?;
        let slice = &self.data[self.offset..end];
        self.offset = end;
        Ok(slice)
    }

    /// Unsigned LEB128 (up to 64 bits)
    fn leb(&mut self) -> WasmResult<u64> {
        let mut result = 0u64;
        let mut shift = 0;

        for _ in 0..10 {
            let byte = self.byte()?;
            result |= ((byte & 0x7F) as u64) << shift;
            if byte & 0x80 == 0 {
                return Ok(result);
            }
            shift += 7;
        }

        Err(invalid("invalid LEB128"))
    }

    fn name(&mut self) -> WasmResult<String> {
        let len = self.leb()? as usize;
        let bytes = self.take(len)?;
        Ok(String::from_utf8_lossy(bytes).into_owned())
    }

    fn limits(&mut self) -> WasmResult<()> {
        let flags = self.byte()?;
        self.leb()?;
        if flags & 1 != 0 {
            self.leb()?;
        }
        Ok(())
    }
}

fn parse_imports(data: &[u8]) -> WasmResult<Vec<ImportInfo>> {
    let mut reader = Reader::new(data);
    let count = reader.leb()?;
    let mut imports = Vec::new();

    for _ in 0..count {
        let module = reader.name()?;
        let name = reader.name()?;
        let kind = ExternKind::from_byte(reader.byte()?)?;

        // Skip the type descriptor
        match kind {
            ExternKind::Func => {
                reader.leb()?;
            }
            ExternKind::Table => {
                reader.byte()?;
                reader.limits()?;
            }
            ExternKind::Memory => reader.limits()?,
            ExternKind::Global => {
                reader.byte()?;
                reader.byte()?;
            }
            ExternKind::Tag => {
                reader.byte()?;
                reader.leb()?;
            }
        }

        imports.push(ImportInfo { module, name, kind });
    }

    Ok(imports)
}

fn parse_exports(data: &[u8]) -> WasmResult<Vec<(String, ExternKind)>> {
    let mut reader = Reader::new(data);
    let count = reader.leb()?;
    let mut exports = Vec::new();

    for _ in 0..count {
        let name = reader.name()?;
        let kind = ExternKind::from_byte(reader.byte()?)?;
        reader.leb()?; // index
        exports.push((name, kind));
    }

    Ok(exports)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_read_leb128() {
        let mut reader = Reader::new(&[0xE5, 0x8E, 0x26]);
        assert_eq!(reader.leb().unwrap(), 624485);

        let mut reader = Reader::new(&[0x80]);
        assert!(reader.leb().is_err());
    }

    #[test]
    fn test_wasm_magic_check() {
        assert!(ModuleValidator::validate_header(b"<html>\n<body>").is_err());
        assert!(ModuleValidator::validate_header(&[0, 0x61, 0x73]).is_err());
        assert!(ModuleValidator::validate_header(&[0, 0x61, 0x73, 0x6D, 2, 0, 0, 0]).is_err());
        assert!(ModuleValidator::validate_header(&[0, 0x61, 0x73, 0x6D, 1, 0, 0, 0]).is_ok());
    }

    #[test]
    fn test_inspect_imports_and_exports() {
        let bytes = wat::parse_str(
            r#"(module
                (import "wasi_snapshot_preview1" "fd_write"
                    (func (param i32 i32 i32 i32) (result i32)))
                (import "env" "mem" (memory 1))
                (func (export "_start"))
                (global (export "g") i32 (i32.const 0)))"#,
        )
        .unwrap();

        let info = ModuleValidator::inspect(&bytes).unwrap();
        assert_eq!(info.imports.len(), 2);
        assert_eq!(info.imports[0].name, "fd_write");
        assert_eq!(info.imports[1].kind, ExternKind::Memory);
        assert!(info.imports_from("wasi_snapshot_preview1"));
        assert!(info.exports_func("_start"));
        assert!(!info.exports_func("g"));
    }

    #[test]
    fn test_inspect_truncated_section() {
        let mut bytes = wat::parse_str(r#"(module (func (export "main")))"#).unwrap();
        bytes.truncate(bytes.len() - 2);
        assert!(ModuleValidator::inspect(&bytes).is_err());
    }
}
